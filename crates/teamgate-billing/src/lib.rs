//! TeamGate Billing - plans, metering and entitlement enforcement
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        BILLING                               │
//! │                                                              │
//! │  ┌────────────┐   ┌──────────────┐   ┌────────────────────┐  │
//! │  │   Plans    │──►│ Entitlements │◄──│     Metering       │  │
//! │  │ (catalog)  │   │ limit checks │   │ usage ─► periods   │  │
//! │  └────────────┘   └──────────────┘   └────────────────────┘  │
//! │                                                              │
//! │  ┌────────────────────────┐   ┌───────────────────────────┐  │
//! │  │ Subscription (webhook) │   │ Rate limiter (buckets)    │  │
//! │  └────────────────────────┘   └───────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod entitlements;
pub mod metering;
pub mod plans;
pub mod ratelimit;
pub mod subscription;

pub use config::BillingConfig;
pub use entitlements::{BillingSnapshot, Entitlements, UsageLine, LIMIT_WARNING_PERCENT};
pub use metering::Metering;
pub use plans::{credit_cost, plan, Feature, PlanConfig, PlanLimits, UNLIMITED};
pub use ratelimit::{BucketRule, RateLimitConfig, RateLimitedOperation, RateLimiter};
pub use subscription::{set_tenant_subscription, team_by_billing_customer, SubscriptionUpdate};
