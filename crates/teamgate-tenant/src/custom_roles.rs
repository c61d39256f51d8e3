//! Custom roles (enterprise feature)
//!
//! Team-scoped named permission sets. Informational only: system
//! operations authorize against the member's system role.

use crate::authz::{authorize, authorize_or_throw};
use crate::principal::Principal;
use teamgate_billing::{Entitlements, Feature};
use teamgate_common::{
    CustomRole, CustomRoleId, GateError, GateResult, Permission, TeamId, Transaction,
};

/// Fields of a custom role update; `None` keeps the current value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomRolePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub permissions: Option<Vec<Permission>>,
}

fn validate_name(name: &str) -> GateResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(GateError::Validation("role name must not be empty".into()));
    }
    Ok(name.to_string())
}

fn dedup(mut permissions: Vec<Permission>) -> Vec<Permission> {
    permissions.sort();
    permissions.dedup();
    permissions
}

pub fn create_custom_role(
    tx: &mut dyn Transaction,
    principal: &Principal,
    entitlements: &Entitlements,
    team_id: TeamId,
    name: &str,
    description: Option<String>,
    permissions: Vec<Permission>,
) -> GateResult<CustomRole> {
    authorize_or_throw(tx, principal, team_id, Permission::ManageTeam)?;
    entitlements.check_feature(tx, team_id, Feature::CustomRoles)?;

    let name = validate_name(name)?;
    tx.insert_custom_role(CustomRole::new(team_id, name, description, dedup(permissions)))
}

pub fn update_custom_role(
    tx: &mut dyn Transaction,
    principal: &Principal,
    entitlements: &Entitlements,
    role_id: CustomRoleId,
    patch: CustomRolePatch,
) -> GateResult<CustomRole> {
    let mut role = tx.custom_role(role_id).ok_or(GateError::Unauthorized)?;
    authorize_or_throw(tx, principal, role.team_id, Permission::ManageTeam)?;
    entitlements.check_feature(tx, role.team_id, Feature::CustomRoles)?;

    if let Some(name) = patch.name {
        role.name = validate_name(&name)?;
    }
    if let Some(description) = patch.description {
        role.description = Some(description);
    }
    if let Some(permissions) = patch.permissions {
        role.permissions = dedup(permissions);
    }
    tx.update_custom_role(&role)?;
    Ok(role)
}

/// Deleting stays possible after a downgrade
pub fn delete_custom_role(
    tx: &mut dyn Transaction,
    principal: &Principal,
    role_id: CustomRoleId,
) -> GateResult<()> {
    let role = tx.custom_role(role_id).ok_or(GateError::Unauthorized)?;
    authorize_or_throw(tx, principal, role.team_id, Permission::ManageTeam)?;
    tx.delete_custom_role(role.id)
}

/// Custom roles of a team; empty for non-members
pub fn list_custom_roles(
    tx: &dyn Transaction,
    principal: &Principal,
    team_id: TeamId,
) -> Vec<CustomRole> {
    if authorize(tx, principal, team_id, Permission::ReadMembers).is_none() {
        return Vec::new();
    }
    tx.team_custom_roles(team_id)
}
