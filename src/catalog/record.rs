//! Canonical endpoint records - the persisted catalog rows.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capabilities::{ExampleSpec, ParameterSpec, ResponseKind};

/// Access policy governing who may invoke an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessTier {
    #[default]
    Free,
    Vip,
    Premium,
    /// Nobody may invoke the endpoint.
    Disabled,
}

impl AccessTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessTier::Free => "free",
            AccessTier::Vip => "vip",
            AccessTier::Premium => "premium",
            AccessTier::Disabled => "disabled",
        }
    }

    /// Whether a caller on `plan` may invoke an endpoint on this tier.
    ///
    /// Plans are ordered free < vip < premium; a disabled endpoint admits
    /// nobody.
    pub fn admits(&self, plan: CallerPlan) -> bool {
        match self {
            AccessTier::Free => true,
            AccessTier::Vip => plan >= CallerPlan::Vip,
            AccessTier::Premium => plan >= CallerPlan::Premium,
            AccessTier::Disabled => false,
        }
    }
}

impl fmt::Display for AccessTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown tier or plan name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown access tier '{0}'")]
pub struct UnknownTier(pub String);

impl FromStr for AccessTier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(AccessTier::Free),
            "vip" => Ok(AccessTier::Vip),
            "premium" => Ok(AccessTier::Premium),
            "disabled" => Ok(AccessTier::Disabled),
            other => Err(UnknownTier(other.to_string())),
        }
    }
}

/// Subscription plan of the caller making a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerPlan {
    #[default]
    Free,
    Vip,
    Premium,
}

impl FromStr for CallerPlan {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(CallerPlan::Free),
            "vip" => Ok(CallerPlan::Vip),
            "premium" => Ok(CallerPlan::Premium),
            other => Err(UnknownTier(other.to_string())),
        }
    }
}

/// One persisted catalog row, keyed by `(path, method)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointRecord {
    pub id: i64,
    pub path: String,
    /// Single verb.
    pub method: String,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub access_tier: AccessTier,
    pub active: bool,
    pub parameters: Vec<ParameterSpec>,
    pub examples: Vec<ExampleSpec>,
    pub response_kind: ResponseKind,
    /// Module that declared the endpoint; `None` for admin-created rows.
    pub source_module_id: Option<String>,
    pub priority: i32,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EndpointRecord {
    pub fn key(&self) -> (&str, &str) {
        (&self.path, &self.method)
    }
}

/// Row to insert directly, bypassing reconciliation.
///
/// Used by the admin surface to create endpoints by hand. The method field is
/// stored verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecord {
    pub path: String,
    pub method: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub access_tier: AccessTier,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub source_module_id: Option<String>,
}

fn default_active() -> bool {
    true
}

impl NewRecord {
    pub fn new(path: impl Into<String>, method: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            name: name.into(),
            description: None,
            category: None,
            access_tier: AccessTier::Free,
            active: true,
            source_module_id: None,
        }
    }

    pub fn with_source_module(mut self, module: impl Into<String>) -> Self {
        self.source_module_id = Some(module.into());
        self
    }

    pub fn with_access_tier(mut self, tier: AccessTier) -> Self {
        self.access_tier = tier;
        self
    }
}

/// Admin edit of an endpoint's descriptive fields. `None` leaves a field as
/// it is. The next reload overwrites whatever the owning module declares.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub priority: Option<i32>,
}

/// Listing filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFilter {
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub source_module_id: Option<String>,
}

impl RecordFilter {
    pub fn active_only() -> Self {
        Self {
            active: Some(true),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_admission() {
        assert!(AccessTier::Free.admits(CallerPlan::Free));
        assert!(!AccessTier::Vip.admits(CallerPlan::Free));
        assert!(AccessTier::Vip.admits(CallerPlan::Premium));
        assert!(!AccessTier::Premium.admits(CallerPlan::Vip));
        assert!(!AccessTier::Disabled.admits(CallerPlan::Premium));
    }

    #[test]
    fn test_tier_parse() {
        assert_eq!("VIP".parse::<AccessTier>().unwrap(), AccessTier::Vip);
        assert_eq!(" disabled ".parse::<AccessTier>().unwrap(), AccessTier::Disabled);
        assert!("gold".parse::<AccessTier>().is_err());
        assert!("disabled".parse::<CallerPlan>().is_err());
    }
}
