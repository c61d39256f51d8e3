//! Membership management

use crate::authz::{authorize, authorize_or_throw};
use crate::guard::{check_assignable, check_can_remove_or_demote};
use crate::principal::Principal;
use serde::Serialize;
use teamgate_common::{
    searchable, GateError, GateResult, Member, MemberId, Permission, Role, TeamId, Transaction,
    User, UserId,
};
use tracing::info;

/// Row of the member list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberView {
    pub member_id: MemberId,
    pub user_id: UserId,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub role: Role,
}

impl MemberView {
    /// Join a membership with its user
    pub fn load(tx: &dyn Transaction, member: Member) -> Self {
        let user = tx.user(member.user_id);
        Self {
            member_id: member.id,
            user_id: member.user_id,
            full_name: user.as_ref().and_then(|u| u.full_name.clone()),
            email: user.and_then(|u| u.email),
            role: member.role,
        }
    }
}

/// Membership the caller may manage.
///
/// Unknown ids look the same as rows of a foreign team (`Unauthorized`).
/// A removed member of the caller's own team is `NotFound`.
fn managed_member(
    tx: &dyn Transaction,
    principal: &Principal,
    member_id: MemberId,
) -> GateResult<Member> {
    let member = tx.member(member_id).ok_or(GateError::Unauthorized)?;
    authorize_or_throw(tx, principal, member.team_id, Permission::ManageMembers)?;
    if !member.is_live() {
        return Err(GateError::not_found("member", member_id));
    }
    Ok(member)
}

/// Insert a membership for `user`
pub fn add_member(
    tx: &mut dyn Transaction,
    team_id: TeamId,
    user: &User,
    role: Role,
) -> GateResult<Member> {
    let member = tx.insert_member(Member::new(team_id, user, role))?;
    info!(team_id = %team_id, user_id = %user.id, role = %role, "member added");
    Ok(member)
}

/// Change a member's system role
pub fn update_role(
    tx: &mut dyn Transaction,
    principal: &Principal,
    member_id: MemberId,
    role: Role,
) -> GateResult<Member> {
    let mut member = managed_member(tx, principal, member_id)?;
    check_assignable(role)?;
    check_can_remove_or_demote(tx, &member)?;

    member.role = role;
    tx.update_member(&member)?;
    info!(team_id = %member.team_id, member_id = %member.id, role = %role, "member role changed");
    Ok(member)
}

/// Soft-delete a membership
pub fn remove_member(
    tx: &mut dyn Transaction,
    principal: &Principal,
    member_id: MemberId,
) -> GateResult<()> {
    let member = managed_member(tx, principal, member_id)?;
    check_can_remove_or_demote(tx, &member)?;

    tx.soft_delete_member(member.id)?;
    info!(team_id = %member.team_id, member_id = %member.id, "member removed");
    Ok(())
}

/// Members of a team matching `search`; empty without "Read Members"
pub fn list_members(
    tx: &dyn Transaction,
    principal: &Principal,
    team_id: TeamId,
    search: &str,
) -> Vec<MemberView> {
    if authorize(tx, principal, team_id, Permission::ReadMembers).is_none() {
        return Vec::new();
    }
    let needle = searchable(search, "");
    tx.team_members(team_id)
        .into_iter()
        .filter(|m| needle.is_empty() || m.searchable.contains(&needle))
        .map(|m| MemberView::load(tx, m))
        .collect()
}
