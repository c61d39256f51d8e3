//! Stored records
//!
//! `created_at` is stamped by the store on insert; constructors leave it at
//! [`DateTime::<Utc>::MIN_UTC`].

use super::value_objects::*;
use crate::rbac::{Permission, Role};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Authenticated actor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: Option<String>,
    pub full_name: Option<String>,
    /// Set out-of-band, never self-service
    pub is_super_admin: bool,
    /// Written only by the impersonation service
    pub impersonation: Option<ImpersonationGrant>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    /// New regular user
    pub fn new(email: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            email: Some(email.into()),
            full_name: Some(full_name.into()),
            is_super_admin: false,
            impersonation: None,
            created_at: DateTime::<Utc>::MIN_UTC,
            deleted_at: None,
        }
    }

    /// Same user with the super-admin flag set
    pub fn super_admin(mut self) -> Self {
        self.is_super_admin = true;
        self
    }

    /// Name for display and slugs: full name, else the email local part
    pub fn display_name(&self) -> String {
        if let Some(name) = self.full_name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.trim().to_string();
        }
        self.email
            .as_deref()
            .and_then(|e| e.split('@').next())
            .filter(|local| !local.is_empty())
            .unwrap_or("User")
            .to_string()
    }
}

/// Active or lapsed impersonation session stored on the admin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpersonationGrant {
    pub target: UserId,
    pub expires_at: DateTime<Utc>,
}

impl ImpersonationGrant {
    /// Expired once `now` reaches the stored instant
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    /// Unique across all teams, including ones pending deletion
    pub slug: String,
    pub is_personal: bool,
    /// Raw value from the billing webhook; resolve with [`PlanTier::resolve`]
    pub subscription_tier: Option<String>,
    pub subscription_status: Option<String>,
    pub billing_customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Team {
    /// New team on the default tier
    pub fn new(name: impl Into<String>, slug: impl Into<String>, is_personal: bool) -> Self {
        Self {
            id: TeamId::new(),
            name: name.into(),
            slug: slug.into(),
            is_personal,
            subscription_tier: None,
            subscription_status: None,
            billing_customer_id: None,
            created_at: DateTime::<Utc>::MIN_UTC,
            deleted_at: None,
        }
    }

    /// Effective tier
    pub fn tier(&self) -> PlanTier {
        PlanTier::resolve(self.subscription_tier.as_deref())
    }

    /// Subscription status, `active` when the webhook never wrote one
    pub fn status(&self) -> &str {
        self.subscription_status.as_deref().unwrap_or("active")
    }

    /// Whether the grace period after soft deletion has run out
    pub fn is_purgeable(&self, now: DateTime<Utc>, grace: Duration) -> bool {
        self.deleted_at.is_some_and(|at| now >= at + grace)
    }
}

/// Team membership
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub team_id: TeamId,
    pub user_id: UserId,
    pub role: Role,
    /// Lower-cased "name email" used by member search
    pub searchable: String,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Member {
    /// New membership for `user`
    pub fn new(team_id: TeamId, user: &User, role: Role) -> Self {
        Self {
            id: MemberId::new(),
            team_id,
            user_id: user.id,
            role,
            searchable: searchable(&user.display_name(), user.email.as_deref().unwrap_or("")),
            created_at: DateTime::<Utc>::MIN_UTC,
            deleted_at: None,
        }
    }

    /// Not soft-deleted
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Normalize text for member search
pub fn searchable(name: &str, email: &str) -> String {
    format!("{name} {email}")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Pending invitation; expiry is derived from `created_at`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invite {
    pub id: InviteId,
    pub team_id: TeamId,
    /// Unique, lower-cased
    pub email: String,
    pub inviter_email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl Invite {
    /// New invite, email normalized
    pub fn new(team_id: TeamId, email: &str, inviter_email: &str, role: Role) -> Self {
        Self {
            id: InviteId::new(),
            team_id,
            email: normalize_email(email),
            inviter_email: inviter_email.to_string(),
            role,
            created_at: DateTime::<Utc>::MIN_UTC,
        }
    }

    /// Recomputed on every read, never cached
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now >= self.created_at + ttl
    }
}

/// Lower-case and trim an email address
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Enterprise-only informational role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomRole {
    pub id: CustomRoleId,
    pub team_id: TeamId,
    pub name: String,
    pub description: Option<String>,
    pub permissions: Vec<Permission>,
    pub created_at: DateTime<Utc>,
}

impl CustomRole {
    pub fn new(
        team_id: TeamId,
        name: impl Into<String>,
        description: Option<String>,
        permissions: Vec<Permission>,
    ) -> Self {
        Self {
            id: CustomRoleId::new(),
            team_id,
            name: name.into(),
            description,
            permissions,
            created_at: DateTime::<Utc>::MIN_UTC,
        }
    }
}

/// Resource payload of a usage record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeteredResource {
    /// AI completion billed in credits
    AiCredits { model: String, token_count: u64 },
    /// Note created (+1) or deleted (-1)
    Notes,
    /// Megabytes stored (+) or released (-)
    StorageMb,
}

impl MeteredResource {
    /// Limit key this resource counts against
    pub fn limit_key(&self) -> LimitKey {
        match self {
            Self::AiCredits { .. } => LimitKey::AiCredits,
            Self::Notes => LimitKey::Notes,
            Self::StorageMb => LimitKey::StorageQuotaMb,
        }
    }
}

/// Append-only metering event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: UsageRecordId,
    pub team_id: TeamId,
    pub resource: MeteredResource,
    pub quantity: i64,
    /// Stamped by the store
    pub recorded_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(team_id: TeamId, resource: MeteredResource, quantity: i64) -> Self {
        Self {
            id: UsageRecordId::new(),
            team_id,
            resource,
            quantity,
            recorded_at: DateTime::<Utc>::MIN_UTC,
        }
    }
}

/// Privileged action names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ImpersonationStart,
    ImpersonationStop,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImpersonationStart => "impersonation_start",
            Self::ImpersonationStop => "impersonation_stop",
        }
    }
}

/// Append-only audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub actor_id: UserId,
    pub action: AuditAction,
    pub target_id: Option<UserId>,
    pub metadata: serde_json::Value,
    /// Stamped by the store
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor_id: UserId,
        action: AuditAction,
        target_id: Option<UserId>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: AuditEntryId::new(),
            actor_id,
            action,
            target_id,
            metadata,
            timestamp: DateTime::<Utc>::MIN_UTC,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_display_name_falls_back_to_email() {
        let mut user = User::new("ada@example.com", "");
        assert_eq!(user.display_name(), "ada");
        user.full_name = Some("Ada Lovelace".into());
        assert_eq!(user.display_name(), "Ada Lovelace");
        user.full_name = None;
        user.email = None;
        assert_eq!(user.display_name(), "User");
    }

    #[test]
    fn test_team_defaults() {
        let mut team = Team::new("Acme", "acme", false);
        assert_eq!(team.tier(), PlanTier::Free);
        assert_eq!(team.status(), "active");
        team.subscription_tier = Some("platinum".into());
        assert_eq!(team.tier(), PlanTier::Free);
    }

    #[test]
    fn test_invite_staleness_is_derived() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let mut invite = Invite::new(TeamId::new(), " Bob@Example.COM ", "a@x.io", Role::Member);
        invite.created_at = t0;
        assert_eq!(invite.email, "bob@example.com");

        let ttl = Duration::days(7);
        assert!(!invite.is_stale(t0 + Duration::days(6), ttl));
        assert!(invite.is_stale(t0 + Duration::days(7), ttl));
    }

    #[test]
    fn test_grant_expiry_boundary() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap();
        let grant = ImpersonationGrant { target: UserId::new(), expires_at: at };
        assert!(!grant.is_expired(at - Duration::seconds(1)));
        assert!(grant.is_expired(at));
    }

    #[test]
    fn test_searchable_is_normalized() {
        assert_eq!(searchable("Ada  Lovelace", "ADA@x.io"), "ada lovelace ada@x.io");
    }

    #[test]
    fn test_purge_after_grace() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let mut team = Team::new("Acme", "acme", false);
        assert!(!team.is_purgeable(t0, Duration::days(7)));
        team.deleted_at = Some(t0);
        assert!(!team.is_purgeable(t0 + Duration::days(6), Duration::days(7)));
        assert!(team.is_purgeable(t0 + Duration::days(7), Duration::days(7)));
    }
}
