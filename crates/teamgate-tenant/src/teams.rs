//! Team lifecycle
//!
//! Creation with unique slugs, the personal team created on first sign-in,
//! and soft deletion ahead of the hard purge.

use crate::authz::authorize_or_throw;
use crate::membership::add_member;
use crate::principal::Principal;
use teamgate_common::{
    GateError, GateResult, Permission, Role, Team, TeamId, Transaction, User, Violation,
};
use tracing::info;

const SLUG_MAX_LEN: usize = 30;

/// Lower-case alphanumeric slug, words joined by `-`
pub fn slugify(name: &str) -> String {
    let mut slug = String::new();
    for word in name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        if !slug.is_empty() {
            slug.push('-');
        }
        slug.push_str(&word.to_ascii_lowercase());
    }
    slug.truncate(SLUG_MAX_LEN);
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "team".to_string()
    } else {
        slug
    }
}

/// First free slug for `name`: `acme`, `acme-1`, `acme-2`, ...
pub fn unique_slug(tx: &dyn Transaction, name: &str) -> String {
    let base = slugify(name);
    if tx.team_by_slug(&base).is_none() {
        return base;
    }
    (1..)
        .map(|n| format!("{base}-{n}"))
        .find(|candidate| tx.team_by_slug(candidate).is_none())
        .unwrap_or(base)
}

/// New team with the creator as Owner
pub fn create_team(
    tx: &mut dyn Transaction,
    creator: &User,
    name: &str,
    is_personal: bool,
) -> GateResult<Team> {
    let name = name.trim();
    if name.is_empty() {
        return Err(GateError::Validation("team name must not be empty".into()));
    }
    let slug = unique_slug(tx, name);
    let team = tx.insert_team(Team::new(name, slug, is_personal))?;
    add_member(tx, team.id, creator, Role::Owner)?;
    info!(team_id = %team.id, slug = %team.slug, personal = is_personal, "team created");
    Ok(team)
}

/// Personal team for a user with no live membership
pub fn ensure_personal_team(tx: &mut dyn Transaction, user: &User) -> GateResult<Option<Team>> {
    if !tx.user_memberships(user.id).is_empty() {
        return Ok(None);
    }
    let name = format!("{}'s Team", user.display_name());
    create_team(tx, user, &name, true).map(Some)
}

/// Live teams the principal belongs to
pub fn teams_of(tx: &dyn Transaction, principal: &Principal) -> Vec<Team> {
    tx.user_memberships(principal.id())
        .into_iter()
        .filter_map(|m| tx.team(m.team_id))
        .collect()
}

/// Rename a team; the slug stays
pub fn rename_team(
    tx: &mut dyn Transaction,
    principal: &Principal,
    team_id: TeamId,
    name: &str,
) -> GateResult<Team> {
    authorize_or_throw(tx, principal, team_id, Permission::ManageTeam)?;
    let name = name.trim();
    if name.is_empty() {
        return Err(GateError::Validation("team name must not be empty".into()));
    }
    let mut team = tx.require_team(team_id)?;
    team.name = name.to_string();
    tx.update_team(&team)?;
    Ok(team)
}

/// Soft-delete a team; the sweeper purges it after the grace period
pub fn delete_team(
    tx: &mut dyn Transaction,
    principal: &Principal,
    team_id: TeamId,
) -> GateResult<()> {
    authorize_or_throw(tx, principal, team_id, Permission::DeleteTeam)?;
    let team = tx.require_team(team_id)?;
    if team.is_personal {
        return Err(Violation::PersonalTeam.into());
    }
    tx.soft_delete_team(team_id)?;
    info!(team_id = %team_id, "team scheduled for deletion");
    Ok(())
}
