//! Billing configuration

use serde::{Deserialize, Serialize};

/// Billing settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    /// Link returned with every plan-limit refusal
    pub upgrade_url: String,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            upgrade_url: "/settings/billing".to_string(),
        }
    }
}
