//! Store - transactional table store abstraction
//!
//! The engine never talks to a database directly. It opens a
//! [`Transaction`], performs its read-check-write sequence, and commits.
//! Dropping a transaction without committing discards every write.
//!
//! Tombstones are filtered here, once: every secondary-index query returns
//! live rows only. Point lookups by id that may need to report "removed"
//! (`member`) return the raw row and say so in their docs.

use super::records::*;
use super::value_objects::*;
use crate::clock::Clock;
use crate::error::{GateError, GateResult};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// Source of transactions
pub trait Store: Send + Sync {
    /// Open a serializable transaction.
    ///
    /// Transactions are not reentrant: never call `begin` while the current
    /// thread still holds another transaction from the same store.
    fn begin(&self) -> Box<dyn Transaction + '_>;
}

/// One atomic unit of work against the store
pub trait Transaction {
    // --- users -----------------------------------------------------------

    /// Live user by id
    fn user(&self, id: UserId) -> Option<User>;
    /// Live user by normalized email
    fn user_by_email(&self, email: &str) -> Option<User>;
    /// All live users, oldest first
    fn users(&self) -> Vec<User>;
    fn insert_user(&mut self, user: User) -> GateResult<User>;
    fn update_user(&mut self, user: &User) -> GateResult<()>;

    // --- teams -----------------------------------------------------------

    /// Live team by id
    fn team(&self, id: TeamId) -> Option<Team>;
    /// Team by slug, including teams pending deletion
    fn team_by_slug(&self, slug: &str) -> Option<Team>;
    /// Live team by billing customer id
    fn team_by_billing_customer(&self, customer_id: &str) -> Option<Team>;
    /// All live teams, oldest first
    fn teams(&self) -> Vec<Team>;
    /// Soft-deleted teams awaiting purge
    fn teams_pending_deletion(&self) -> Vec<Team>;
    fn insert_team(&mut self, team: Team) -> GateResult<Team>;
    fn update_team(&mut self, team: &Team) -> GateResult<()>;
    fn soft_delete_team(&mut self, id: TeamId) -> GateResult<()>;
    /// Hard delete; cascades memberships, invites, custom roles and usage
    fn purge_team(&mut self, id: TeamId) -> GateResult<()>;

    // --- members ---------------------------------------------------------

    /// Membership by id, soft-deleted rows included
    fn member(&self, id: MemberId) -> Option<Member>;
    /// Live membership for (team, user)
    fn member_of(&self, team_id: TeamId, user_id: UserId) -> Option<Member>;
    /// Live memberships of a team, oldest first
    fn team_members(&self, team_id: TeamId) -> Vec<Member>;
    /// Live memberships of a user, oldest first
    fn user_memberships(&self, user_id: UserId) -> Vec<Member>;
    /// Fails with `Conflict` when a live membership for (team, user) exists
    fn insert_member(&mut self, member: Member) -> GateResult<Member>;
    fn update_member(&mut self, member: &Member) -> GateResult<()>;
    fn soft_delete_member(&mut self, id: MemberId) -> GateResult<()>;

    // --- invites ---------------------------------------------------------

    fn invite(&self, id: InviteId) -> Option<Invite>;
    fn invite_by_email(&self, email: &str) -> Option<Invite>;
    /// Every invite, oldest first
    fn invites(&self) -> Vec<Invite>;
    fn team_invites(&self, team_id: TeamId) -> Vec<Invite>;
    /// Fails with `Conflict` on a duplicate email
    fn insert_invite(&mut self, invite: Invite) -> GateResult<Invite>;
    fn delete_invite(&mut self, id: InviteId) -> GateResult<()>;

    // --- custom roles ----------------------------------------------------

    fn custom_role(&self, id: CustomRoleId) -> Option<CustomRole>;
    fn custom_role_by_name(&self, team_id: TeamId, name: &str) -> Option<CustomRole>;
    fn team_custom_roles(&self, team_id: TeamId) -> Vec<CustomRole>;
    /// Fails with `Conflict` on a duplicate (team, name)
    fn insert_custom_role(&mut self, role: CustomRole) -> GateResult<CustomRole>;
    fn update_custom_role(&mut self, role: &CustomRole) -> GateResult<()>;
    fn delete_custom_role(&mut self, id: CustomRoleId) -> GateResult<()>;

    // --- metering --------------------------------------------------------

    fn append_usage(&mut self, record: UsageRecord) -> GateResult<UsageRecord>;
    /// Usage records of a team recorded at or after `since` (all when `None`)
    fn team_usage(&self, team_id: TeamId, since: Option<DateTime<Utc>>) -> Vec<UsageRecord>;

    // --- audit -----------------------------------------------------------

    fn append_audit(&mut self, entry: AuditEntry) -> GateResult<AuditEntry>;
    /// Every audit entry in insertion order
    fn audit_entries(&self) -> Vec<AuditEntry>;

    /// Apply every staged write atomically
    fn commit(self: Box<Self>) -> GateResult<()>;

    // --- helpers ---------------------------------------------------------

    /// Live team or `NotFound`
    fn require_team(&self, id: TeamId) -> GateResult<Team> {
        self.team(id).ok_or_else(|| GateError::not_found("team", id))
    }

    /// Live user or `NotFound`
    fn require_user(&self, id: UserId) -> GateResult<User> {
        self.user(id).ok_or_else(|| GateError::not_found("user", id))
    }
}

/// Rows keyed by id, remembering insertion order
#[derive(Debug, Clone)]
struct Table<K, V> {
    rows: HashMap<K, (u64, V)>,
    next_seq: u64,
}

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self {
            rows: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<K: Eq + Hash, V: Clone> Table<K, V> {
    fn get(&self, id: &K) -> Option<&V> {
        self.rows.get(id).map(|(_, row)| row)
    }

    fn get_mut(&mut self, id: &K) -> Option<&mut V> {
        self.rows.get_mut(id).map(|(_, row)| row)
    }

    fn insert(&mut self, id: K, row: V) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.rows.insert(id, (seq, row));
    }

    fn remove(&mut self, id: &K) -> Option<V> {
        self.rows.remove(id).map(|(_, row)| row)
    }

    fn retain(&mut self, mut keep: impl FnMut(&V) -> bool) {
        self.rows.retain(|_, (_, row)| keep(&*row));
    }

    /// Unordered
    fn values(&self) -> impl Iterator<Item = &V> {
        self.rows.values().map(|(_, row)| row)
    }

    /// Matching rows in insertion order
    fn oldest_first(&self, keep: impl Fn(&V) -> bool) -> Vec<V> {
        let mut rows: Vec<_> = self.rows.values().filter(|(_, row)| keep(row)).collect();
        rows.sort_by_key(|(seq, _)| *seq);
        rows.into_iter().map(|(_, row)| row.clone()).collect()
    }
}

/// Table contents of the in-memory store
#[derive(Debug, Clone, Default)]
struct Tables {
    users: Table<UserId, User>,
    teams: Table<TeamId, Team>,
    members: Table<MemberId, Member>,
    invites: Table<InviteId, Invite>,
    custom_roles: Table<CustomRoleId, CustomRole>,
    usage: Vec<UsageRecord>,
    audit: Vec<AuditEntry>,
}

/// In-memory store (for testing and development)
///
/// Transactions are serialized behind one mutex. Writes go to a copy of the
/// tables taken on the first write and replace the originals on commit, so
/// readers never observe a half-applied transaction.
pub struct MemoryStore {
    tables: Mutex<Tables>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            clock,
        }
    }
}

impl Store for MemoryStore {
    fn begin(&self) -> Box<dyn Transaction + '_> {
        Box::new(MemoryTransaction {
            committed: self.tables.lock(),
            staged: None,
            clock: self.clock.as_ref(),
        })
    }
}

struct MemoryTransaction<'a> {
    committed: MutexGuard<'a, Tables>,
    staged: Option<Tables>,
    clock: &'a dyn Clock,
}

impl MemoryTransaction<'_> {
    fn view(&self) -> &Tables {
        self.staged.as_ref().unwrap_or(&*self.committed)
    }

    fn write(&mut self) -> &mut Tables {
        let committed = &self.committed;
        self.staged.get_or_insert_with(|| Tables::clone(committed))
    }

    /// Creation timestamp; ties keep insertion order
    fn stamp(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn user(&self, id: UserId) -> Option<User> {
        self.view().users.get(&id).filter(|u| u.deleted_at.is_none()).cloned()
    }

    fn user_by_email(&self, email: &str) -> Option<User> {
        let email = normalize_email(email);
        self.view()
            .users
            .values()
            .find(|u| {
                u.deleted_at.is_none()
                    && u.email.as_deref().map(normalize_email).as_deref() == Some(email.as_str())
            })
            .cloned()
    }

    fn users(&self) -> Vec<User> {
        self.view().users.oldest_first(|u| u.deleted_at.is_none())
    }

    fn insert_user(&mut self, mut user: User) -> GateResult<User> {
        if let Some(email) = user.email.as_deref() {
            if self.user_by_email(email).is_some() {
                return Err(GateError::Conflict(format!("email already registered: {email}")));
            }
        }
        user.created_at = self.stamp();
        self.write().users.insert(user.id, user.clone());
        Ok(user)
    }

    fn update_user(&mut self, user: &User) -> GateResult<()> {
        let row = self
            .write()
            .users
            .get_mut(&user.id)
            .ok_or_else(|| GateError::not_found("user", user.id))?;
        *row = User { created_at: row.created_at, ..user.clone() };
        Ok(())
    }

    fn team(&self, id: TeamId) -> Option<Team> {
        self.view().teams.get(&id).filter(|t| t.deleted_at.is_none()).cloned()
    }

    fn team_by_slug(&self, slug: &str) -> Option<Team> {
        self.view().teams.values().find(|t| t.slug == slug).cloned()
    }

    fn team_by_billing_customer(&self, customer_id: &str) -> Option<Team> {
        self.view()
            .teams
            .values()
            .find(|t| {
                t.deleted_at.is_none() && t.billing_customer_id.as_deref() == Some(customer_id)
            })
            .cloned()
    }

    fn teams(&self) -> Vec<Team> {
        self.view().teams.oldest_first(|t| t.deleted_at.is_none())
    }

    fn teams_pending_deletion(&self) -> Vec<Team> {
        self.view().teams.oldest_first(|t| t.deleted_at.is_some())
    }

    fn insert_team(&mut self, mut team: Team) -> GateResult<Team> {
        if self.team_by_slug(&team.slug).is_some() {
            return Err(GateError::Conflict(format!("slug already taken: {}", team.slug)));
        }
        team.created_at = self.stamp();
        self.write().teams.insert(team.id, team.clone());
        Ok(team)
    }

    fn update_team(&mut self, team: &Team) -> GateResult<()> {
        let slug_taken = self
            .view()
            .teams
            .values()
            .any(|t| t.id != team.id && t.slug == team.slug);
        if slug_taken {
            return Err(GateError::Conflict(format!("slug already taken: {}", team.slug)));
        }
        let row = self
            .write()
            .teams
            .get_mut(&team.id)
            .ok_or_else(|| GateError::not_found("team", team.id))?;
        *row = Team { created_at: row.created_at, ..team.clone() };
        Ok(())
    }

    fn soft_delete_team(&mut self, id: TeamId) -> GateResult<()> {
        let at = self.clock.now();
        let row = self
            .write()
            .teams
            .get_mut(&id)
            .filter(|t| t.deleted_at.is_none())
            .ok_or_else(|| GateError::not_found("team", id))?;
        row.deleted_at = Some(at);
        Ok(())
    }

    fn purge_team(&mut self, id: TeamId) -> GateResult<()> {
        let tables = self.write();
        if tables.teams.remove(&id).is_none() {
            return Err(GateError::not_found("team", id));
        }
        tables.members.retain(|m| m.team_id != id);
        tables.invites.retain(|i| i.team_id != id);
        tables.custom_roles.retain(|r| r.team_id != id);
        tables.usage.retain(|u| u.team_id != id);
        Ok(())
    }

    fn member(&self, id: MemberId) -> Option<Member> {
        self.view().members.get(&id).cloned()
    }

    fn member_of(&self, team_id: TeamId, user_id: UserId) -> Option<Member> {
        self.view()
            .members
            .values()
            .find(|m| m.is_live() && m.team_id == team_id && m.user_id == user_id)
            .cloned()
    }

    fn team_members(&self, team_id: TeamId) -> Vec<Member> {
        self.view()
            .members
            .oldest_first(|m| m.is_live() && m.team_id == team_id)
    }

    fn user_memberships(&self, user_id: UserId) -> Vec<Member> {
        self.view()
            .members
            .oldest_first(|m| m.is_live() && m.user_id == user_id)
    }

    fn insert_member(&mut self, mut member: Member) -> GateResult<Member> {
        if self.member_of(member.team_id, member.user_id).is_some() {
            return Err(GateError::Conflict("already a member of this team".into()));
        }
        member.created_at = self.stamp();
        self.write().members.insert(member.id, member.clone());
        Ok(member)
    }

    fn update_member(&mut self, member: &Member) -> GateResult<()> {
        let row = self
            .write()
            .members
            .get_mut(&member.id)
            .ok_or_else(|| GateError::not_found("member", member.id))?;
        *row = Member { created_at: row.created_at, ..member.clone() };
        Ok(())
    }

    fn soft_delete_member(&mut self, id: MemberId) -> GateResult<()> {
        let at = self.clock.now();
        let row = self
            .write()
            .members
            .get_mut(&id)
            .filter(|m| m.is_live())
            .ok_or_else(|| GateError::not_found("member", id))?;
        row.deleted_at = Some(at);
        Ok(())
    }

    fn invite(&self, id: InviteId) -> Option<Invite> {
        self.view().invites.get(&id).cloned()
    }

    fn invite_by_email(&self, email: &str) -> Option<Invite> {
        let email = normalize_email(email);
        self.view().invites.values().find(|i| i.email == email).cloned()
    }

    fn invites(&self) -> Vec<Invite> {
        self.view().invites.oldest_first(|_| true)
    }

    fn team_invites(&self, team_id: TeamId) -> Vec<Invite> {
        self.view().invites.oldest_first(|i| i.team_id == team_id)
    }

    fn insert_invite(&mut self, mut invite: Invite) -> GateResult<Invite> {
        if self.invite_by_email(&invite.email).is_some() {
            return Err(GateError::Conflict(format!("invite already pending for {}", invite.email)));
        }
        invite.created_at = self.stamp();
        self.write().invites.insert(invite.id, invite.clone());
        Ok(invite)
    }

    fn delete_invite(&mut self, id: InviteId) -> GateResult<()> {
        self.write()
            .invites
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| GateError::not_found("invite", id))
    }

    fn custom_role(&self, id: CustomRoleId) -> Option<CustomRole> {
        self.view().custom_roles.get(&id).cloned()
    }

    fn custom_role_by_name(&self, team_id: TeamId, name: &str) -> Option<CustomRole> {
        self.view()
            .custom_roles
            .values()
            .find(|r| r.team_id == team_id && r.name == name)
            .cloned()
    }

    fn team_custom_roles(&self, team_id: TeamId) -> Vec<CustomRole> {
        self.view().custom_roles.oldest_first(|r| r.team_id == team_id)
    }

    fn insert_custom_role(&mut self, mut role: CustomRole) -> GateResult<CustomRole> {
        if self.custom_role_by_name(role.team_id, &role.name).is_some() {
            return Err(GateError::Conflict(format!("custom role already exists: {}", role.name)));
        }
        role.created_at = self.stamp();
        self.write().custom_roles.insert(role.id, role.clone());
        Ok(role)
    }

    fn update_custom_role(&mut self, role: &CustomRole) -> GateResult<()> {
        let clash = self
            .view()
            .custom_roles
            .values()
            .any(|r| r.id != role.id && r.team_id == role.team_id && r.name == role.name);
        if clash {
            return Err(GateError::Conflict(format!("custom role already exists: {}", role.name)));
        }
        let row = self
            .write()
            .custom_roles
            .get_mut(&role.id)
            .ok_or_else(|| GateError::not_found("custom role", role.id))?;
        *row = CustomRole { created_at: row.created_at, ..role.clone() };
        Ok(())
    }

    fn delete_custom_role(&mut self, id: CustomRoleId) -> GateResult<()> {
        self.write()
            .custom_roles
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| GateError::not_found("custom role", id))
    }

    fn append_usage(&mut self, mut record: UsageRecord) -> GateResult<UsageRecord> {
        record.recorded_at = self.stamp();
        self.write().usage.push(record.clone());
        Ok(record)
    }

    fn team_usage(&self, team_id: TeamId, since: Option<DateTime<Utc>>) -> Vec<UsageRecord> {
        self.view()
            .usage
            .iter()
            .filter(|u| u.team_id == team_id && since.map_or(true, |s| u.recorded_at >= s))
            .cloned()
            .collect()
    }

    fn append_audit(&mut self, mut entry: AuditEntry) -> GateResult<AuditEntry> {
        entry.timestamp = self.stamp();
        self.write().audit.push(entry.clone());
        Ok(entry)
    }

    fn audit_entries(&self) -> Vec<AuditEntry> {
        self.view().audit.clone()
    }

    fn commit(self: Box<Self>) -> GateResult<()> {
        let MemoryTransaction { mut committed, staged, .. } = *self;
        if let Some(tables) = staged {
            *committed = tables;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::rbac::Role;
    use chrono::{Duration, TimeZone};

    fn store() -> (Arc<ManualClock>, MemoryStore) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()));
        (clock.clone(), MemoryStore::new(clock))
    }

    #[test]
    fn test_uncommitted_writes_are_discarded() {
        let (_, store) = store();
        {
            let mut tx = store.begin();
            tx.insert_user(User::new("a@x.io", "A")).unwrap();
        }
        assert!(store.begin().users().is_empty());

        let mut tx = store.begin();
        tx.insert_user(User::new("a@x.io", "A")).unwrap();
        tx.commit().unwrap();
        assert_eq!(store.begin().users().len(), 1);
    }

    #[test]
    fn test_same_instant_keeps_insertion_order() {
        let (clock, store) = store();
        let mut tx = store.begin();
        let team = tx.insert_team(Team::new("Acme", "acme", false)).unwrap();
        let invites: Vec<_> = ["c@x.io", "a@x.io", "b@x.io"]
            .into_iter()
            .map(|email| {
                tx.insert_invite(Invite::new(team.id, email, "o@x.io", Role::Member))
                    .unwrap()
            })
            .collect();

        // stamped with the clock, never ahead of it
        assert!(invites.iter().all(|i| i.created_at == clock.now()));
        let listed: Vec<_> = tx.team_invites(team.id).into_iter().map(|i| i.email).collect();
        assert_eq!(listed, ["c@x.io", "a@x.io", "b@x.io"]);
    }

    #[test]
    fn test_unique_indexes() {
        let (_, store) = store();
        let mut tx = store.begin();
        tx.insert_team(Team::new("Acme", "acme", false)).unwrap();
        let dup = tx.insert_team(Team::new("Acme 2", "acme", false));
        assert!(matches!(dup, Err(GateError::Conflict(_))));

        let dup_user = tx
            .insert_user(User::new("A@x.io", "A"))
            .and_then(|_| tx.insert_user(User::new("a@x.io", "B")));
        assert!(matches!(dup_user, Err(GateError::Conflict(_))));
    }

    #[test]
    fn test_soft_deleted_members_are_filtered_from_queries() {
        let (_, store) = store();
        let mut tx = store.begin();
        let user = tx.insert_user(User::new("a@x.io", "A")).unwrap();
        let team = tx.insert_team(Team::new("Acme", "acme", false)).unwrap();
        let member = tx.insert_member(Member::new(team.id, &user, Role::Owner)).unwrap();

        assert!(matches!(
            tx.insert_member(Member::new(team.id, &user, Role::Member)),
            Err(GateError::Conflict(_))
        ));

        tx.soft_delete_member(member.id).unwrap();
        assert!(tx.member_of(team.id, user.id).is_none());
        assert!(tx.team_members(team.id).is_empty());
        assert!(tx.user_memberships(user.id).is_empty());
        // point lookup still sees the tombstone
        assert!(tx.member(member.id).unwrap().deleted_at.is_some());
        // re-joining after removal is allowed
        tx.insert_member(Member::new(team.id, &user, Role::Member)).unwrap();
    }

    #[test]
    fn test_purge_cascades() {
        let (_, store) = store();
        let mut tx = store.begin();
        let user = tx.insert_user(User::new("a@x.io", "A")).unwrap();
        let team = tx.insert_team(Team::new("Acme", "acme", false)).unwrap();
        tx.insert_member(Member::new(team.id, &user, Role::Owner)).unwrap();
        tx.insert_invite(Invite::new(team.id, "b@x.io", "a@x.io", Role::Member)).unwrap();
        tx.append_usage(UsageRecord::new(team.id, MeteredResource::Notes, 1)).unwrap();

        tx.soft_delete_team(team.id).unwrap();
        assert!(tx.team(team.id).is_none());
        assert!(tx.team_by_slug("acme").is_some());
        assert_eq!(tx.teams_pending_deletion().len(), 1);

        tx.purge_team(team.id).unwrap();
        assert!(tx.team_by_slug("acme").is_none());
        assert!(tx.team_invites(team.id).is_empty());
        assert!(tx.team_usage(team.id, None).is_empty());
        assert!(tx.member_of(team.id, user.id).is_none());
    }

    #[test]
    fn test_usage_since_filter() {
        let (clock, store) = store();
        let team = TeamId::new();
        let mut tx = store.begin();
        tx.append_usage(UsageRecord::new(team, MeteredResource::Notes, 1)).unwrap();
        clock.advance(Duration::days(1));
        let cutoff = clock.now();
        tx.append_usage(UsageRecord::new(team, MeteredResource::Notes, 1)).unwrap();
        tx.commit().unwrap();

        let tx = store.begin();
        assert_eq!(tx.team_usage(team, None).len(), 2);
        assert_eq!(tx.team_usage(team, Some(cutoff)).len(), 1);
    }
}
