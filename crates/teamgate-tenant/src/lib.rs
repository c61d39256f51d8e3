//! TeamGate Tenant - authorization, tenant invariants and privileged access
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                              ENGINE                                 │
//! │                                                                     │
//! │  ┌──────────────────────── REQUEST PIPELINE ─────────────────────┐  │
//! │  │                                                               │  │
//! │  │  Authenticate ─► Authorize ─► Entitle ─► Rate-limit ─► Execute│  │
//! │  │   (principal)     (authz)    (billing)   (billing)            │  │
//! │  └───────────────────────────────────────────────┬───────────────┘  │
//! │                                                  │                  │
//! │  ┌──────────┐ ┌───────────┐ ┌─────────┐ ┌────────▼───────┐          │
//! │  │  Teams   │ │ Invites   │ │ Custom  │ │  Membership /  │          │
//! │  │          │ │           │ │ roles   │ │  Ownership     │          │
//! │  └──────────┘ └───────────┘ └─────────┘ └────────┬───────┘          │
//! │                                                  │                  │
//! │                                        ┌─────────▼──────────┐       │
//! │                                        │ Tenant invariant   │       │
//! │                                        │ guard              │       │
//! │                                        └────────────────────┘       │
//! │                                                                     │
//! │  ┌─────────────────────────┐    ┌──────────────────────────────┐    │
//! │  │ Impersonation / Admin   │    │ Sweeper (expiry, purge)      │    │
//! │  │ (super-admin, audited)  │    │ tokio interval task          │    │
//! │  └─────────────────────────┘    └──────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(clippy::all)]

pub mod admin;
pub mod authz;
pub mod config;
pub mod custom_roles;
pub mod engine;
pub mod guard;
pub mod impersonation;
pub mod invites;
pub mod membership;
pub mod ownership;
pub mod pipeline;
pub mod principal;
pub mod sweeper;
pub mod teams;
pub mod usage;

pub use admin::{DashboardMetrics, TeamSummary};
pub use authz::{authorize, authorize_or_throw, viewer_permissions};
pub use config::{ConfigError, EngineConfig};
pub use custom_roles::CustomRolePatch;
pub use engine::{Engine, SignIn};
pub use impersonation::{Impersonation, ImpersonationStatus};
pub use membership::MemberView;
pub use ownership::OwnershipTransfer;
pub use pipeline::{Gate, Request, RequestPipeline};
pub use principal::{Principal, PrincipalResolver};
pub use sweeper::{SweepReport, Sweeper};
pub use usage::UsageService;
