//! World model for one simulation episode

use crate::attack::AttackAction;
use crate::error::LabError;
use crate::knowledge::{ExploitLibrarian, StrategicHint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Identifier the executor blocks when intrusion detection fires
pub const ATTACKER_ID: &str = "attacker_ip";

/// Privilege tiers in escalation order
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    #[default]
    None,
    Public,
    Internal,
    Admin,
}

impl AccessLevel {
    pub const ALL: [AccessLevel; 4] = [
        AccessLevel::None,
        AccessLevel::Public,
        AccessLevel::Internal,
        AccessLevel::Admin,
    ];

    /// Ordinal used for escalation rewards and table indexing
    pub fn rank(self) -> usize {
        match self {
            AccessLevel::None => 0,
            AccessLevel::Public => 1,
            AccessLevel::Internal => 2,
            AccessLevel::Admin => 3,
        }
    }

    pub fn next(self) -> Option<AccessLevel> {
        match self {
            AccessLevel::None => Some(AccessLevel::Public),
            AccessLevel::Public => Some(AccessLevel::Internal),
            AccessLevel::Internal => Some(AccessLevel::Admin),
            AccessLevel::Admin => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == AccessLevel::Admin
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccessLevel::None => "none",
            AccessLevel::Public => "public",
            AccessLevel::Internal => "internal",
            AccessLevel::Admin => "admin",
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = LabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(AccessLevel::None),
            "public" => Ok(AccessLevel::Public),
            "internal" => Ok(AccessLevel::Internal),
            "admin" => Ok(AccessLevel::Admin),
            other => Err(LabError::InvalidInput(format!(
                "unknown access level: {}",
                other
            ))),
        }
    }
}

/// Mutable state of the simulated target for one episode
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentState {
    pub access_level: AccessLevel,
    pub visited: BTreeSet<String>,
    pub blocked: BTreeSet<String>,
    pub discovered_services: Vec<String>,
    pub discovered_vulnerabilities: Vec<String>,
    pub iteration_count: u32,
    pub active_hint: Option<AttackAction>,
    pub hint_present: bool,
    pub hint_source_service: Option<String>,
    pub hint_confidence: f64,
    pub hint_followed: bool,
    pub hint_succeeded: bool,
}

impl EnvironmentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear every field back to the start-of-episode values
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Reset, then seed the hint fields from the librarian's best hint for `target_service`.
    ///
    /// A service with no known hint leaves `hint_present` false; the episode
    /// proceeds without one. Returns the applied hint.
    pub async fn reset_with_hint(
        &mut self,
        target_service: Option<&str>,
        version: Option<&str>,
        librarian: Option<&ExploitLibrarian>,
    ) -> Option<StrategicHint> {
        self.reset();

        let (service, librarian) = (target_service?, librarian?);
        match librarian.best_hint(service, version).await {
            Some(hint) => {
                tracing::info!(
                    action = %hint.action,
                    service = service,
                    confidence = hint.confidence,
                    cve = hint.cve_ref.as_deref().unwrap_or("N/A"),
                    "librarian suggests a strategic hint"
                );
                self.apply_hint(&hint);
                Some(hint)
            }
            None => {
                tracing::debug!(service = service, "no strategic hint for service");
                None
            }
        }
    }

    /// Make `hint` the active strategic hint for this episode
    pub fn apply_hint(&mut self, hint: &StrategicHint) {
        self.active_hint = Some(hint.action);
        self.hint_present = true;
        self.hint_source_service = Some(hint.service_name.clone());
        self.hint_confidence = hint.confidence.clamp(0.0, 1.0);
        self.hint_followed = false;
        self.hint_succeeded = false;
    }

    pub fn hint_matches(&self, action: AttackAction) -> bool {
        self.active_hint == Some(action)
    }

    pub fn mark_hint_followed(&mut self, success: bool) {
        self.hint_followed = true;
        self.hint_succeeded = success;
    }

    /// Raise the access level to `target`.
    ///
    /// Returns `false` and leaves the level untouched when the current level
    /// is already at or above `target`.
    pub fn escalate(&mut self, target: AccessLevel) -> bool {
        if target > self.access_level {
            self.access_level = target;
            true
        } else {
            false
        }
    }

    pub fn mark_visited(&mut self, entity: impl Into<String>) {
        self.visited.insert(entity.into());
    }

    pub fn is_blocked(&self, id: &str) -> bool {
        self.blocked.contains(id)
    }

    /// Block `id` for the rest of the episode
    pub fn block(&mut self, id: impl Into<String>) {
        self.blocked.insert(id.into());
    }

    pub fn is_terminal(&self) -> bool {
        self.access_level.is_terminal()
    }
}
