//! RBAC Catalog
//!
//! Closed set of permissions and system roles. Role grants are defined by an
//! exhaustive match, so the Owner ⊇ Admin ⊇ Member nesting follows from the
//! definitions below and a new permission cannot be added without deciding
//! what every role gets.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Atomic capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "Manage Team")]
    ManageTeam,
    #[serde(rename = "Delete Team")]
    DeleteTeam,
    #[serde(rename = "Read Members")]
    ReadMembers,
    #[serde(rename = "Manage Members")]
    ManageMembers,
    #[serde(rename = "Contribute")]
    Contribute,
    #[serde(rename = "Transfer Ownership")]
    TransferOwnership,
    #[serde(rename = "View Billing")]
    ViewBilling,
    #[serde(rename = "Manage Billing")]
    ManageBilling,
    #[serde(rename = "Upload Files")]
    UploadFiles,
    #[serde(rename = "Delete Files")]
    DeleteFiles,
    #[serde(rename = "Use AI")]
    UseAi,
    #[serde(rename = "View Analytics")]
    ViewAnalytics,
    #[serde(rename = "Manage Integrations")]
    ManageIntegrations,
    #[serde(rename = "Invite Members")]
    InviteMembers,
    #[serde(rename = "Manage Content")]
    ManageContent,
}

impl Permission {
    /// All 15 permissions
    pub const ALL: [Permission; 15] = [
        Permission::ManageTeam,
        Permission::DeleteTeam,
        Permission::ReadMembers,
        Permission::ManageMembers,
        Permission::Contribute,
        Permission::TransferOwnership,
        Permission::ViewBilling,
        Permission::ManageBilling,
        Permission::UploadFiles,
        Permission::DeleteFiles,
        Permission::UseAi,
        Permission::ViewAnalytics,
        Permission::ManageIntegrations,
        Permission::InviteMembers,
        Permission::ManageContent,
    ];

    /// Display name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManageTeam => "Manage Team",
            Self::DeleteTeam => "Delete Team",
            Self::ReadMembers => "Read Members",
            Self::ManageMembers => "Manage Members",
            Self::Contribute => "Contribute",
            Self::TransferOwnership => "Transfer Ownership",
            Self::ViewBilling => "View Billing",
            Self::ManageBilling => "Manage Billing",
            Self::UploadFiles => "Upload Files",
            Self::DeleteFiles => "Delete Files",
            Self::UseAi => "Use AI",
            Self::ViewAnalytics => "View Analytics",
            Self::ManageIntegrations => "Manage Integrations",
            Self::InviteMembers => "Invite Members",
            Self::ManageContent => "Manage Content",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownName(s.to_string()))
    }
}

/// System role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Owner,
    Admin,
    Member,
}

/// Roles from highest to lowest privilege
pub const ROLE_HIERARCHY: [Role; 3] = [Role::Owner, Role::Admin, Role::Member];

/// Role given to new non-owner members
pub const DEFAULT_ROLE: Role = Role::Member;

impl Role {
    /// Whether this role grants `permission`
    pub fn grants(&self, permission: Permission) -> bool {
        use Permission::*;
        match self {
            Self::Owner => true,
            Self::Admin => !matches!(permission, TransferOwnership | ManageBilling),
            Self::Member => matches!(permission, ReadMembers | Contribute | UploadFiles | UseAi),
        }
    }

    /// Exact permission set, in catalog order
    pub fn permissions(&self) -> Vec<Permission> {
        Permission::ALL
            .into_iter()
            .filter(|p| self.grants(*p))
            .collect()
    }

    /// Owner and Admin count as privileged for the last-admin rule
    pub fn is_privileged(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }

    /// Position in [`ROLE_HIERARCHY`], 0 is highest
    pub fn rank(&self) -> usize {
        match self {
            Self::Owner => 0,
            Self::Admin => 1,
            Self::Member => 2,
        }
    }

    /// Display name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "Owner",
            Self::Admin => "Admin",
            Self::Member => "Member",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ROLE_HIERARCHY
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| UnknownName(s.to_string()))
    }
}

/// Name outside the closed vocabulary
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown name: {0}")]
pub struct UnknownName(pub String);
