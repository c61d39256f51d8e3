//! TeamGate Common - shared types for the authorization, entitlement and
//! metering engine
//!
//! This crate provides:
//! - Typed identifiers and closed vocabularies (tiers, limit keys)
//! - The RBAC catalog (permissions and system roles)
//! - Stored records and the transactional store abstraction
//! - The error taxonomy every check fails with
//! - Time and notification seams
//!
//! ```text
//!   request ──► principal ──► authorize ──► entitle ──► rate-limit ──► execute
//!                  │              │             │                         │
//!                  └──────────────┴─────── Transaction (Store) ───────────┘
//! ```

#![warn(clippy::all)]

pub mod clock;
pub mod domain;
pub mod error;
pub mod notify;
pub mod rbac;

pub use clock::*;
pub use domain::*;
pub use error::*;
pub use notify::*;
pub use rbac::*;
