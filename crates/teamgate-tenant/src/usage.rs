//! Metered team operations
//!
//! AI requests, notes and file storage. Each goes through the request
//! pipeline and writes its usage record in the same transaction.

use crate::pipeline::{Gate, RequestPipeline};
use teamgate_billing::RateLimitedOperation;
use teamgate_common::{
    GateError, GateResult, LimitKey, MeteredResource, Permission, TeamId, UsageRecord, UserId,
};

/// Gate in front of an AI completion
pub fn ai_request_gate() -> Gate {
    Gate::permission(Permission::UseAi)
        .entitle(LimitKey::AiCredits)
        .rate_limit(RateLimitedOperation::AiRequest)
}

/// Creating a note counts against the plan; deleting one never does
pub fn note_gate(delta: i64) -> Gate {
    let gate = Gate::permission(Permission::Contribute);
    if delta > 0 {
        gate.entitle(LimitKey::Notes)
    } else {
        gate
    }
}

pub fn storage_gate(megabytes: i64) -> Gate {
    if megabytes > 0 {
        Gate::permission(Permission::UploadFiles).entitle(LimitKey::StorageQuotaMb)
    } else {
        Gate::permission(Permission::DeleteFiles)
    }
}

/// Metered operations over the request pipeline
#[derive(Clone)]
pub struct UsageService {
    pipeline: RequestPipeline,
}

impl UsageService {
    pub fn new(pipeline: RequestPipeline) -> Self {
        Self { pipeline }
    }

    /// Admit one AI request. Spends a rate-limit token; credits are
    /// metered once the completion is known.
    pub fn authorize_ai_request(&self, session: Option<UserId>, team_id: TeamId) -> GateResult<()> {
        self.pipeline.mutate(session, team_id, &ai_request_gate(), |_, _| Ok(()))
    }

    /// Meter a finished completion at the model's credit cost
    pub fn record_ai_completion(
        &self,
        session: Option<UserId>,
        team_id: TeamId,
        model: &str,
        token_count: u64,
    ) -> GateResult<UsageRecord> {
        let metering = self.pipeline.entitlements().metering();
        self.pipeline
            .mutate(session, team_id, &Gate::permission(Permission::UseAi), |tx, req| {
                metering.record_ai_completion(tx, req.team_id, model, token_count)
            })
    }

    /// +1 for a created note, -1 for a deleted one
    pub fn record_note(
        &self,
        session: Option<UserId>,
        team_id: TeamId,
        delta: i64,
    ) -> GateResult<UsageRecord> {
        if delta.abs() != 1 {
            return Err(GateError::Validation("note delta must be +1 or -1".into()));
        }
        let metering = self.pipeline.entitlements().metering();
        self.pipeline.mutate(session, team_id, &note_gate(delta), |tx, req| {
            metering.record_usage(tx, req.team_id, MeteredResource::Notes, delta)
        })
    }

    /// Megabytes stored (positive) or released (negative)
    pub fn record_storage(
        &self,
        session: Option<UserId>,
        team_id: TeamId,
        megabytes: i64,
    ) -> GateResult<UsageRecord> {
        let metering = self.pipeline.entitlements().metering();
        self.pipeline.mutate(session, team_id, &storage_gate(megabytes), |tx, req| {
            metering.record_usage(tx, req.team_id, MeteredResource::StorageMb, megabytes)
        })
    }
}
