//! Request pipeline
//!
//! Mandatory order for state-changing requests:
//!
//! ```text
//!   Authenticate ──► Authorize ──► Entitle ──► Rate-limit ──► Execute
//!   (fail closed)    (team perm)   (plan)      (bucket)       (write + meter)
//! ```
//!
//! Every stage runs inside one store transaction; any failure drops the
//! transaction and nothing is written. Reads authenticate and authorize
//! only, and answer "no data" to callers outside the team.

use crate::authz::{authorize, authorize_or_throw};
use crate::principal::{Principal, PrincipalResolver};
use std::sync::Arc;
use teamgate_billing::{Entitlements, RateLimitedOperation, RateLimiter};
use teamgate_common::{
    GateError, GateResult, LimitKey, Member, Permission, Store, TeamId, Transaction, UserId,
};

/// What a team-scoped mutation must pass before it executes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gate {
    pub permission: Permission,
    pub entitlements: Vec<LimitKey>,
    /// Bucket keyed by the team id
    pub rate_limit: Option<RateLimitedOperation>,
}

impl Gate {
    /// Authorization only
    pub fn permission(permission: Permission) -> Self {
        Self {
            permission,
            entitlements: Vec::new(),
            rate_limit: None,
        }
    }

    pub fn entitle(mut self, key: LimitKey) -> Self {
        self.entitlements.push(key);
        self
    }

    pub fn rate_limit(mut self, operation: RateLimitedOperation) -> Self {
        self.rate_limit = Some(operation);
        self
    }
}

/// Caller-side view handed to the execute step
pub struct Request<'a> {
    pub principal: &'a Principal,
    pub member: &'a Member,
    pub team_id: TeamId,
}

/// Request pipeline composer
#[derive(Clone)]
pub struct RequestPipeline {
    store: Arc<dyn Store>,
    resolver: PrincipalResolver,
    entitlements: Entitlements,
    limiter: Arc<RateLimiter>,
}

impl RequestPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        resolver: PrincipalResolver,
        entitlements: Entitlements,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            store,
            resolver,
            entitlements,
            limiter,
        }
    }

    pub fn resolver(&self) -> &PrincipalResolver {
        &self.resolver
    }

    pub fn entitlements(&self) -> &Entitlements {
        &self.entitlements
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Team-scoped mutation through every stage
    pub fn mutate<T>(
        &self,
        session: Option<UserId>,
        team_id: TeamId,
        gate: &Gate,
        execute: impl FnOnce(&mut dyn Transaction, Request<'_>) -> GateResult<T>,
    ) -> GateResult<T> {
        let mut tx = self.store.begin();
        let principal = self.resolver.resolve(tx.as_ref(), session)?;
        let member = authorize_or_throw(tx.as_ref(), &principal, team_id, gate.permission)?;
        for key in &gate.entitlements {
            self.entitlements.check_entitlement(tx.as_ref(), team_id, *key)?;
        }
        if let Some(operation) = gate.rate_limit {
            self.limiter.limit(operation, &team_id.to_string())?;
        }

        let request = Request {
            principal: &principal,
            member: &member,
            team_id,
        };
        let output = execute(tx.as_mut(), request)?;
        tx.commit()?;
        Ok(output)
    }

    /// Authenticated mutation whose team is only known after a lookup;
    /// the step authorizes itself
    pub fn transact<T>(
        &self,
        session: Option<UserId>,
        execute: impl FnOnce(&mut dyn Transaction, &Principal) -> GateResult<T>,
    ) -> GateResult<T> {
        let mut tx = self.store.begin();
        let principal = self.resolver.resolve(tx.as_ref(), session)?;
        let output = execute(tx.as_mut(), &principal)?;
        tx.commit()?;
        Ok(output)
    }

    /// Team-scoped read. `None` for unauthenticated callers and callers
    /// without `permission`.
    pub fn read<T>(
        &self,
        session: Option<UserId>,
        team_id: TeamId,
        permission: Permission,
        query: impl FnOnce(&dyn Transaction, Request<'_>) -> GateResult<T>,
    ) -> GateResult<Option<T>> {
        let tx = self.store.begin();
        let principal = match self.resolver.resolve(tx.as_ref(), session) {
            Ok(principal) => principal,
            Err(GateError::Unauthenticated) => return Ok(None),
            Err(e) => return Err(e),
        };
        let Some(member) = authorize(tx.as_ref(), &principal, team_id, permission) else {
            return Ok(None);
        };
        let request = Request {
            principal: &principal,
            member: &member,
            team_id,
        };
        query(tx.as_ref(), request).map(Some)
    }

    /// Authenticated read with no team gate
    pub fn view<T>(
        &self,
        session: Option<UserId>,
        query: impl FnOnce(&dyn Transaction, &Principal) -> T,
    ) -> GateResult<T> {
        let tx = self.store.begin();
        let principal = self.resolver.resolve(tx.as_ref(), session)?;
        Ok(query(tx.as_ref(), &principal))
    }

    /// Unauthenticated store access for system jobs and the billing webhook
    pub fn system<T>(
        &self,
        execute: impl FnOnce(&mut dyn Transaction) -> GateResult<T>,
    ) -> GateResult<T> {
        let mut tx = self.store.begin();
        let output = execute(tx.as_mut())?;
        tx.commit()?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::add_member;
    use crate::teams::create_team;
    use chrono::{TimeZone, Utc};
    use teamgate_billing::{BillingConfig, Metering, RateLimitConfig};
    use teamgate_common::{ManualClock, MemoryStore, MeteredResource, Role, User};

    struct Env {
        pipeline: RequestPipeline,
        owner: UserId,
        member: UserId,
        team: TeamId,
    }

    fn env() -> Env {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 8, 3, 14, 0, 0).unwrap()));
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new(clock.clone()));
        let pipeline = RequestPipeline::new(
            store,
            PrincipalResolver::new(clock.clone()),
            Entitlements::new(Metering::new(clock.clone()), BillingConfig::default()),
            Arc::new(RateLimiter::new(RateLimitConfig::default(), clock)),
        );
        let (owner, member, team) = pipeline
            .system(|tx| {
                let owner = tx.insert_user(User::new("o@x.io", "O"))?;
                let member = tx.insert_user(User::new("m@x.io", "M"))?;
                let team = create_team(tx, &owner, "Acme", false)?;
                add_member(tx, team.id, &member, Role::Member)?;
                Ok((owner.id, member.id, team.id))
            })
            .unwrap();
        Env { pipeline, owner, member, team }
    }

    fn note(tx: &mut dyn Transaction, team: TeamId) -> GateResult<()> {
        tx.append_usage(teamgate_common::UsageRecord::new(team, MeteredResource::Notes, 1))
            .map(|_| ())
    }

    fn notes(env: &Env) -> usize {
        env.pipeline
            .system(|tx| Ok(tx.team_usage(env.team, None).len()))
            .unwrap()
    }

    #[test]
    fn test_unauthenticated_fails_closed() {
        let env = env();
        let gate = Gate::permission(Permission::Contribute);
        let result = env.pipeline.mutate(None, env.team, &gate, |tx, req| note(tx, req.team_id));
        assert_eq!(result, Err(GateError::Unauthenticated));
        assert_eq!(notes(&env), 0);
    }

    #[test]
    fn test_unauthorized_stops_before_entitlement() {
        let env = env();
        // a garbage team id must look exactly like a forbidden one
        let gate = Gate::permission(Permission::ManageTeam).entitle(LimitKey::Members);
        let forbidden = env.pipeline.mutate(Some(env.member), env.team, &gate, |_, _| Ok(()));
        let unknown = env.pipeline.mutate(Some(env.member), TeamId::new(), &gate, |_, _| Ok(()));
        assert_eq!(forbidden, Err(GateError::Unauthorized));
        assert_eq!(unknown, Err(GateError::Unauthorized));
    }

    #[test]
    fn test_entitlement_runs_before_rate_limit() {
        let env = env();
        env.pipeline
            .system(|tx| {
                for n in 0..2 {
                    let u = tx.insert_user(User::new(format!("f{n}@x.io"), "F"))?;
                    add_member(tx, env.team, &u, Role::Member)?;
                }
                Ok(())
            })
            .unwrap();

        let gate = Gate::permission(Permission::InviteMembers)
            .entitle(LimitKey::Members)
            .rate_limit(RateLimitedOperation::SendInvite);
        for _ in 0..10 {
            let result = env.pipeline.mutate(Some(env.owner), env.team, &gate, |_, _| Ok(()));
            assert!(matches!(result, Err(GateError::PlanLimitExceeded { .. })));
        }
        // no tokens were spent on refused requests
        assert!(env
            .pipeline
            .limiter()
            .check(RateLimitedOperation::SendInvite, &env.team.to_string())
            .is_ok());
    }

    #[test]
    fn test_failed_execute_writes_nothing() {
        let env = env();
        let gate = Gate::permission(Permission::Contribute);
        let result: GateResult<()> =
            env.pipeline
                .mutate(Some(env.member), env.team, &gate, |tx, req| {
                    note(tx, req.team_id)?;
                    Err(GateError::Validation("boom".into()))
                });
        assert!(result.is_err());
        assert_eq!(notes(&env), 0);

        env.pipeline
            .mutate(Some(env.member), env.team, &gate, |tx, req| note(tx, req.team_id))
            .unwrap();
        assert_eq!(notes(&env), 1);
    }

    #[test]
    fn test_rate_limit_applies_after_authorization() {
        let env = env();
        let gate = Gate::permission(Permission::UseAi).rate_limit(RateLimitedOperation::AiRequest);
        for _ in 0..5 {
            env.pipeline.mutate(Some(env.member), env.team, &gate, |_, _| Ok(())).unwrap();
        }
        assert!(matches!(
            env.pipeline.mutate(Some(env.member), env.team, &gate, |_, _| Ok(())),
            Err(GateError::RateLimited { .. })
        ));
    }

    #[test]
    fn test_reads_return_no_data_to_outsiders() {
        let env = env();
        let outsider = env
            .pipeline
            .system(|tx| Ok(tx.insert_user(User::new("out@x.io", "Out"))?.id))
            .unwrap();
        let query = |tx: &dyn Transaction, req: Request<'_>| -> GateResult<usize> {
            Ok(tx.team_members(req.team_id).len())
        };
        let read = Permission::ReadMembers;

        assert_eq!(env.pipeline.read(Some(env.member), env.team, read, query), Ok(Some(2)));
        assert_eq!(env.pipeline.read(Some(outsider), env.team, read, query), Ok(None));
        assert_eq!(env.pipeline.read(None, env.team, Permission::ReadMembers, query), Ok(None));
        assert_eq!(
            env.pipeline.read(Some(env.member), TeamId::new(), Permission::ReadMembers, query),
            Ok(None)
        );
    }
}
