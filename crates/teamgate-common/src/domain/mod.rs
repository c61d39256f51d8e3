//! TeamGate Domain Model
//!
//! - **Value Objects**: typed ids, plan tiers, limit keys
//! - **Records**: users, teams, memberships, invites, usage and audit rows
//! - **Store**: transactional persistence abstraction

pub mod records;
pub mod store;
pub mod value_objects;

pub use records::*;
pub use store::*;
pub use value_objects::*;
