//! Engine facade
//!
//! One entry point per operation. Every call takes the caller's session
//! (the authenticated user id, or `None`) and opens its own transaction.
//! Notifications go out after the transaction commits.

use crate::admin::{self, DashboardMetrics, TeamSummary};
use crate::authz;
use crate::config::{ConfigError, EngineConfig};
use crate::custom_roles::{self, CustomRolePatch};
use crate::impersonation::{self, Impersonation, ImpersonationStatus};
use crate::invites;
use crate::membership::{self, MemberView};
use crate::ownership::{self, OwnershipTransfer};
use crate::pipeline::{Gate, RequestPipeline};
use crate::principal::{Principal, PrincipalResolver};
use crate::sweeper::{SweepReport, Sweeper};
use crate::teams;
use crate::usage::UsageService;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use teamgate_billing::{
    set_tenant_subscription, team_by_billing_customer, BillingSnapshot, Entitlements, Metering,
    RateLimitedOperation, RateLimiter, SubscriptionUpdate,
};
use teamgate_common::{
    deliver, normalize_email, AuditEntry, Clock, CustomRole, CustomRoleId, GateError, GateResult,
    Invite, InviteId, LimitKey, Member, MemberId, MemoryStore, NoopNotifier, Notification, Notifier,
    Permission, Role, Store, SystemClock, Team, TeamId, Transaction, UsageRecord, User, UserId,
};
use tracing::info;

/// Outcome of a sign-in
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignIn {
    pub user: User,
    /// First sign-in for this email
    pub created: bool,
    /// Set when this sign-in created the user's personal team
    pub personal_team: Option<Team>,
}

/// Authorization, entitlement and metering engine
pub struct Engine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    config: EngineConfig,
    pipeline: RequestPipeline,
    impersonation: Impersonation,
    usage: UsageService,
    sweeper: Arc<Sweeper>,
}

impl Engine {
    /// Validates `config` before wiring anything
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let entitlements = Entitlements::new(Metering::new(clock.clone()), config.billing.clone());
        let limiter = Arc::new(RateLimiter::new(config.rate_limits.clone(), clock.clone()));
        let pipeline = RequestPipeline::new(
            store.clone(),
            PrincipalResolver::new(clock.clone()),
            entitlements,
            limiter.clone(),
        );

        Ok(Self {
            impersonation: Impersonation::new(clock.clone(), config.impersonation_duration()),
            usage: UsageService::new(pipeline.clone()),
            sweeper: Arc::new(Sweeper::new(store.clone(), clock.clone(), limiter, &config)),
            store,
            clock,
            notifier,
            config,
            pipeline,
        })
    }

    /// In-memory store on the system clock, notifications dropped
    pub fn in_memory(config: EngineConfig) -> Result<Self, ConfigError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(MemoryStore::new(clock.clone()));
        Self::new(store, clock, Arc::new(NoopNotifier), config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    pub fn sweeper(&self) -> Arc<Sweeper> {
        self.sweeper.clone()
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn read<T>(&self, query: impl FnOnce(&dyn Transaction) -> T) -> T {
        let tx = self.store.begin();
        query(tx.as_ref())
    }

    /// Authenticated read; unauthenticated callers get the empty value
    fn read_scoped<T: Default>(
        &self,
        session: Option<UserId>,
        query: impl FnOnce(&dyn Transaction, &Principal) -> T,
    ) -> GateResult<T> {
        match self.pipeline.view(session, query) {
            Err(GateError::Unauthenticated) => Ok(T::default()),
            other => other,
        }
    }

    // --- identity --------------------------------------------------------

    /// Resolve or create the user for a verified email and give them a
    /// personal team if they belong to none
    pub fn sign_in(&self, email: &str, full_name: Option<&str>) -> GateResult<SignIn> {
        self.pipeline.system(|tx| {
            let (user, created) = self
                .pipeline
                .resolver()
                .get_or_create_user(tx, email, full_name)?;
            let personal_team = teams::ensure_personal_team(tx, &user)?;
            Ok(SignIn {
                user,
                created,
                personal_team,
            })
        })
    }

    /// Count one failed login for `email`
    pub fn record_failed_login(&self, email: &str) -> GateResult<()> {
        self.rate_limit(RateLimitedOperation::FailedLogin, &normalize_email(email))
    }

    /// Effective principal for a session
    pub fn principal(&self, session: Option<UserId>) -> GateResult<Principal> {
        self.pipeline.view(session, |_, principal| principal.clone())
    }

    // --- authorization ---------------------------------------------------

    /// Membership granting `permission`, or `None`
    pub fn authorize(
        &self,
        session: Option<UserId>,
        team_id: TeamId,
        permission: Permission,
    ) -> GateResult<Option<Member>> {
        self.pipeline
            .read(session, team_id, permission, |_, req| Ok(req.member.clone()))
    }

    pub fn authorize_or_throw(
        &self,
        session: Option<UserId>,
        team_id: TeamId,
        permission: Permission,
    ) -> GateResult<Member> {
        self.pipeline.view(session, |tx, principal| {
            authz::authorize_or_throw(tx, principal, team_id, permission)
        })?
    }

    pub fn viewer_permissions(
        &self,
        session: Option<UserId>,
        team_id: TeamId,
    ) -> GateResult<Vec<Permission>> {
        self.read_scoped(session, |tx, principal| authz::viewer_permissions(tx, principal, team_id))
    }

    // --- billing ---------------------------------------------------------

    /// Allow/deny for one limit key; no caller checks
    pub fn check_entitlement(&self, team_id: TeamId, key: LimitKey) -> GateResult<()> {
        self.read(|tx| self.pipeline.entitlements().check_entitlement(tx, team_id, key))
    }

    /// Plan and usage; `None` without "View Billing"
    pub fn billing_snapshot(
        &self,
        session: Option<UserId>,
        team_id: TeamId,
    ) -> GateResult<Option<BillingSnapshot>> {
        let entitlements = self.pipeline.entitlements();
        self.pipeline.read(session, team_id, Permission::ViewBilling, |tx, req| {
            entitlements.billing_snapshot(tx, req.team_id)
        })
    }

    /// Billing webhook effect. Owners hear about tier or status changes.
    pub fn set_tenant_subscription(
        &self,
        team_id: TeamId,
        update: SubscriptionUpdate,
    ) -> GateResult<Team> {
        let (before, team) = self.pipeline.system(|tx| {
            let before = tx.require_team(team_id)?;
            Ok((before, set_tenant_subscription(tx, team_id, update)?))
        })?;
        if (before.tier(), before.status()) != (team.tier(), team.status()) {
            let notification = Notification::SubscriptionChanged {
                team_name: team.name.clone(),
                tier: team.tier(),
                status: team.status().to_string(),
            };
            deliver(self.notifier.as_ref(), &notification);
        }
        Ok(team)
    }

    pub fn team_by_billing_customer(&self, customer_id: &str) -> Option<Team> {
        self.read(|tx| team_by_billing_customer(tx, customer_id))
    }

    pub fn rate_limit(&self, operation: RateLimitedOperation, key: &str) -> GateResult<()> {
        self.pipeline.limiter().limit(operation, key)
    }

    // --- teams -----------------------------------------------------------

    pub fn create_team(&self, session: Option<UserId>, name: &str) -> GateResult<Team> {
        self.pipeline
            .transact(session, |tx, principal| teams::create_team(tx, &principal.user, name, false))
    }

    pub fn rename_team(
        &self,
        session: Option<UserId>,
        team_id: TeamId,
        name: &str,
    ) -> GateResult<Team> {
        self.pipeline
            .transact(session, |tx, principal| teams::rename_team(tx, principal, team_id, name))
    }

    pub fn delete_team(&self, session: Option<UserId>, team_id: TeamId) -> GateResult<()> {
        self.pipeline
            .transact(session, |tx, principal| teams::delete_team(tx, principal, team_id))
    }

    pub fn teams_of(&self, session: Option<UserId>) -> GateResult<Vec<Team>> {
        self.read_scoped(session, teams::teams_of)
    }

    // --- members ---------------------------------------------------------

    pub fn update_member_role(
        &self,
        session: Option<UserId>,
        member_id: MemberId,
        role: Role,
    ) -> GateResult<Member> {
        self.pipeline.transact(session, |tx, principal| {
            membership::update_role(tx, principal, member_id, role)
        })
    }

    pub fn remove_member(&self, session: Option<UserId>, member_id: MemberId) -> GateResult<()> {
        let notification = self.pipeline.transact(session, |tx, principal| {
            membership::remove_member(tx, principal, member_id)?;
            let member = tx.member(member_id).ok_or(GateError::Unauthorized)?;
            Ok(Notification::MemberRemoved {
                team_name: tx.require_team(member.team_id)?.name,
                email: tx.user(member.user_id).and_then(|u| u.email),
            })
        })?;
        deliver(self.notifier.as_ref(), &notification);
        Ok(())
    }

    pub fn list_members(
        &self,
        session: Option<UserId>,
        team_id: TeamId,
        search: &str,
    ) -> GateResult<Vec<MemberView>> {
        self.read_scoped(session, |tx, principal| {
            membership::list_members(tx, principal, team_id, search)
        })
    }

    // --- ownership -------------------------------------------------------

    pub fn transfer_ownership(
        &self,
        session: Option<UserId>,
        team_id: TeamId,
        new_owner_member_id: MemberId,
    ) -> GateResult<OwnershipTransfer> {
        let (transfer, notification) = self.pipeline.transact(session, |tx, principal| {
            let transfer =
                ownership::transfer_ownership(tx, principal, team_id, new_owner_member_id)?;
            let notification = Notification::OwnershipTransferred {
                team_name: tx.require_team(team_id)?.name,
                new_owner_email: tx.user(transfer.new_owner_id).and_then(|u| u.email),
            };
            Ok((transfer, notification))
        })?;
        deliver(self.notifier.as_ref(), &notification);
        Ok(transfer)
    }

    pub fn get_owner(
        &self,
        session: Option<UserId>,
        team_id: TeamId,
    ) -> GateResult<Option<MemberView>> {
        self.read_scoped(session, |tx, principal| ownership::get_owner(tx, principal, team_id))
    }

    pub fn transfer_candidates(
        &self,
        session: Option<UserId>,
        team_id: TeamId,
    ) -> GateResult<Vec<MemberView>> {
        self.read_scoped(session, |tx, principal| {
            ownership::transfer_candidates(tx, principal, team_id)
        })
    }

    // --- invites ---------------------------------------------------------

    /// Invite Members → members entitlement → sendInvite bucket → insert
    pub fn send_invite(
        &self,
        session: Option<UserId>,
        team_id: TeamId,
        email: &str,
        role: Role,
    ) -> GateResult<Invite> {
        let gate = Gate::permission(Permission::InviteMembers)
            .entitle(LimitKey::Members)
            .rate_limit(RateLimitedOperation::SendInvite);
        let (now, ttl) = (self.now(), self.config.invite_ttl());

        let (invite, notification) = self.pipeline.mutate(session, team_id, &gate, |tx, req| {
            let invite =
                invites::create_invite(tx, req.principal, req.team_id, email, role, now, ttl)?;
            let notification = Notification::InviteSent {
                team_name: tx.require_team(req.team_id)?.name,
                email: invite.email.clone(),
                inviter_email: invite.inviter_email.clone(),
                role: invite.role,
            };
            Ok((invite, notification))
        })?;
        deliver(self.notifier.as_ref(), &notification);
        Ok(invite)
    }

    pub fn accept_invite(
        &self,
        session: Option<UserId>,
        invite_id: InviteId,
    ) -> GateResult<Member> {
        let entitlements = self.pipeline.entitlements();
        let (now, ttl) = (self.now(), self.config.invite_ttl());
        let (member, notification) = self.pipeline.transact(session, |tx, principal| {
            let invite = tx.invite(invite_id);
            let member = invites::accept_invite(tx, principal, invite_id, entitlements, now, ttl)?;
            let team_name = tx.require_team(member.team_id)?.name;
            let notification = invite.map(|invite| Notification::InviteAccepted {
                team_name,
                email: invite.email,
                inviter_email: invite.inviter_email,
            });
            Ok((member, notification))
        })?;
        if let Some(notification) = notification {
            deliver(self.notifier.as_ref(), &notification);
        }
        Ok(member)
    }

    pub fn revoke_invite(&self, session: Option<UserId>, invite_id: InviteId) -> GateResult<()> {
        self.pipeline
            .transact(session, |tx, principal| invites::revoke_invite(tx, principal, invite_id))
    }

    pub fn list_invites(
        &self,
        session: Option<UserId>,
        team_id: TeamId,
    ) -> GateResult<Vec<Invite>> {
        let (now, ttl) = (self.now(), self.config.invite_ttl());
        self.read_scoped(session, |tx, principal| {
            invites::list_invites(tx, principal, team_id, now, ttl)
        })
    }

    // --- custom roles ----------------------------------------------------

    pub fn create_custom_role(
        &self,
        session: Option<UserId>,
        team_id: TeamId,
        name: &str,
        description: Option<String>,
        permissions: Vec<Permission>,
    ) -> GateResult<CustomRole> {
        let entitlements = self.pipeline.entitlements();
        self.pipeline.transact(session, |tx, principal| {
            custom_roles::create_custom_role(
                tx,
                principal,
                entitlements,
                team_id,
                name,
                description,
                permissions,
            )
        })
    }

    pub fn update_custom_role(
        &self,
        session: Option<UserId>,
        role_id: CustomRoleId,
        patch: CustomRolePatch,
    ) -> GateResult<CustomRole> {
        let entitlements = self.pipeline.entitlements();
        self.pipeline.transact(session, |tx, principal| {
            custom_roles::update_custom_role(tx, principal, entitlements, role_id, patch)
        })
    }

    pub fn delete_custom_role(
        &self,
        session: Option<UserId>,
        role_id: CustomRoleId,
    ) -> GateResult<()> {
        self.pipeline.transact(session, |tx, principal| {
            custom_roles::delete_custom_role(tx, principal, role_id)
        })
    }

    pub fn list_custom_roles(
        &self,
        session: Option<UserId>,
        team_id: TeamId,
    ) -> GateResult<Vec<CustomRole>> {
        self.read_scoped(session, |tx, principal| {
            custom_roles::list_custom_roles(tx, principal, team_id)
        })
    }

    // --- privileged access -----------------------------------------------

    pub fn is_super_admin(&self, session: Option<UserId>) -> bool {
        self.read(|tx| impersonation::is_super_admin(tx, session))
    }

    /// Returns the session's expiry
    pub fn start_impersonation(
        &self,
        session: Option<UserId>,
        target_id: UserId,
    ) -> GateResult<DateTime<Utc>> {
        let (expires_at, notification) = self.pipeline.system(|tx| {
            let expires_at = self.impersonation.start(tx, session, target_id)?;
            let admin = session.ok_or(GateError::Unauthenticated)?;
            let notification = Notification::ImpersonationStarted {
                admin,
                target: target_id,
                target_email: tx.user(target_id).and_then(|u| u.email),
                expires_at,
            };
            Ok((expires_at, notification))
        })?;
        deliver(self.notifier.as_ref(), &notification);
        Ok(expires_at)
    }

    pub fn stop_impersonation(&self, session: Option<UserId>) -> GateResult<()> {
        let notification = self.pipeline.system(|tx| {
            let grant = session.and_then(|id| tx.user(id)).and_then(|u| u.impersonation);
            self.impersonation.stop(tx, session)?;
            Ok(grant.zip(session).map(|(grant, admin)| Notification::ImpersonationStopped {
                admin,
                target: grant.target,
            }))
        })?;
        if let Some(notification) = notification {
            deliver(self.notifier.as_ref(), &notification);
        }
        Ok(())
    }

    pub fn impersonation_status(&self, session: Option<UserId>) -> ImpersonationStatus {
        self.read(|tx| self.impersonation.status(tx, session))
    }

    pub fn list_users(&self, session: Option<UserId>) -> GateResult<Vec<User>> {
        self.read(|tx| admin::list_users(tx, session))
    }

    pub fn list_teams(&self, session: Option<UserId>) -> GateResult<Vec<TeamSummary>> {
        self.read(|tx| admin::list_teams(tx, session))
    }

    pub fn dashboard_metrics(&self, session: Option<UserId>) -> GateResult<DashboardMetrics> {
        let now = self.now();
        self.read(|tx| admin::dashboard_metrics(tx, session, now))
    }

    pub fn list_audit_log(
        &self,
        session: Option<UserId>,
        limit: Option<usize>,
    ) -> GateResult<Vec<AuditEntry>> {
        self.read(|tx| admin::list_audit_log(tx, session, limit))
    }

    // --- metered operations ----------------------------------------------

    pub fn authorize_ai_request(&self, session: Option<UserId>, team_id: TeamId) -> GateResult<()> {
        self.usage.authorize_ai_request(session, team_id)
    }

    pub fn record_ai_completion(
        &self,
        session: Option<UserId>,
        team_id: TeamId,
        model: &str,
        token_count: u64,
    ) -> GateResult<UsageRecord> {
        let record = self.usage.record_ai_completion(session, team_id, model, token_count)?;
        self.warn_on_limit(team_id, LimitKey::AiCredits, record.quantity);
        Ok(record)
    }

    pub fn record_note(
        &self,
        session: Option<UserId>,
        team_id: TeamId,
        delta: i64,
    ) -> GateResult<UsageRecord> {
        let record = self.usage.record_note(session, team_id, delta)?;
        self.warn_on_limit(team_id, LimitKey::Notes, record.quantity);
        Ok(record)
    }

    pub fn record_storage(
        &self,
        session: Option<UserId>,
        team_id: TeamId,
        megabytes: i64,
    ) -> GateResult<UsageRecord> {
        let record = self.usage.record_storage(session, team_id, megabytes)?;
        self.warn_on_limit(team_id, LimitKey::StorageQuotaMb, record.quantity);
        Ok(record)
    }

    /// Tell the team once usage crosses the warning share of its limit
    fn warn_on_limit(&self, team_id: TeamId, key: LimitKey, added: i64) {
        let warning = self.read(|tx| {
            let line = self.pipeline.entitlements().limit_warning(tx, team_id, key, added)?;
            Some(Notification::ApproachingLimit {
                team_name: tx.team(team_id)?.name,
                key,
                current: line.current,
                limit: line.limit,
            })
        });
        if let Some(notification) = warning {
            deliver(self.notifier.as_ref(), &notification);
        }
    }

    // --- maintenance -----------------------------------------------------

    /// One sweeper pass, outside the background task
    pub fn run_maintenance(&self) -> GateResult<SweepReport> {
        let report = self.sweeper.run_once()?;
        info!(?report, "maintenance pass");
        Ok(report)
    }
}
