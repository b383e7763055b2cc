use crate::config::EngineConfig;
use crate::environment::{AccessLevel, EnvironmentState, ATTACKER_ID};
use crate::error::{LabError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Bernoulli, Distribution};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Abstract attack actions the simulated adversary can attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackAction {
    PublicAccessAttempt,
    AuthenticationBypassAttempt,
    SqlInjectionAttempt,
    PathTraversalAttempt,
    TokenReuseAttempt,
    SessionHijackAttempt,
    XssAttempt,
    SsrfAttempt,
    XxeAttempt,
    DeserializationAttempt,
    PrivilegeEscalationAttempt,
    LateralMovementAttempt,
    CommandInjectionAttempt,
}

/// Static catalog entry for one action
#[derive(Debug, Clone, Copy)]
pub struct ActionProfile {
    /// Lowest access level at which the action shows up in the menu
    pub unlocked_at: AccessLevel,
    /// Base success probability per access level where the action is listed
    pub base_probabilities: &'static [(AccessLevel, f64)],
    pub escalates_to: Option<AccessLevel>,
    pub vulnerability: Option<&'static str>,
}

impl AttackAction {
    /// Catalog order; also the Q-table column order
    pub const ALL: [AttackAction; 13] = [
        AttackAction::PublicAccessAttempt,
        AttackAction::AuthenticationBypassAttempt,
        AttackAction::SqlInjectionAttempt,
        AttackAction::PathTraversalAttempt,
        AttackAction::TokenReuseAttempt,
        AttackAction::SessionHijackAttempt,
        AttackAction::XssAttempt,
        AttackAction::SsrfAttempt,
        AttackAction::XxeAttempt,
        AttackAction::DeserializationAttempt,
        AttackAction::PrivilegeEscalationAttempt,
        AttackAction::LateralMovementAttempt,
        AttackAction::CommandInjectionAttempt,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttackAction::PublicAccessAttempt => "public_access_attempt",
            AttackAction::AuthenticationBypassAttempt => "authentication_bypass_attempt",
            AttackAction::SqlInjectionAttempt => "sql_injection_attempt",
            AttackAction::PathTraversalAttempt => "path_traversal_attempt",
            AttackAction::TokenReuseAttempt => "token_reuse_attempt",
            AttackAction::SessionHijackAttempt => "session_hijack_attempt",
            AttackAction::XssAttempt => "xss_attempt",
            AttackAction::SsrfAttempt => "ssrf_attempt",
            AttackAction::XxeAttempt => "xxe_attempt",
            AttackAction::DeserializationAttempt => "deserialization_attempt",
            AttackAction::PrivilegeEscalationAttempt => "privilege_escalation_attempt",
            AttackAction::LateralMovementAttempt => "lateral_movement_attempt",
            AttackAction::CommandInjectionAttempt => "command_injection_attempt",
        }
    }

    pub fn profile(self) -> ActionProfile {
        use AccessLevel::{Admin, Internal, Public};

        match self {
            AttackAction::PublicAccessAttempt => ActionProfile {
                unlocked_at: AccessLevel::None,
                base_probabilities: &[(AccessLevel::None, 0.3)],
                escalates_to: Some(Public),
                vulnerability: None,
            },
            AttackAction::AuthenticationBypassAttempt => ActionProfile {
                unlocked_at: AccessLevel::None,
                base_probabilities: &[(AccessLevel::None, 0.1)],
                escalates_to: Some(Public),
                vulnerability: None,
            },
            AttackAction::SqlInjectionAttempt => ActionProfile {
                unlocked_at: AccessLevel::None,
                base_probabilities: &[(AccessLevel::None, 0.15)],
                escalates_to: None,
                vulnerability: Some("SQL Injection"),
            },
            AttackAction::PathTraversalAttempt => ActionProfile {
                unlocked_at: AccessLevel::None,
                base_probabilities: &[(AccessLevel::None, 0.2), (Public, 0.2)],
                escalates_to: Some(Public),
                vulnerability: Some("Path Traversal"),
            },
            AttackAction::TokenReuseAttempt => ActionProfile {
                unlocked_at: Public,
                base_probabilities: &[(Public, 0.25)],
                escalates_to: Some(Internal),
                vulnerability: None,
            },
            AttackAction::SessionHijackAttempt => ActionProfile {
                unlocked_at: Public,
                base_probabilities: &[(Public, 0.2)],
                escalates_to: Some(Internal),
                vulnerability: None,
            },
            AttackAction::XssAttempt => ActionProfile {
                unlocked_at: Public,
                base_probabilities: &[(Public, 0.3)],
                escalates_to: None,
                vulnerability: Some("Cross-Site Scripting (XSS)"),
            },
            AttackAction::SsrfAttempt => ActionProfile {
                unlocked_at: Public,
                base_probabilities: &[(Public, 0.2)],
                escalates_to: None,
                vulnerability: Some("Server-Side Request Forgery (SSRF)"),
            },
            AttackAction::XxeAttempt => ActionProfile {
                unlocked_at: Public,
                base_probabilities: &[(Public, 0.15)],
                escalates_to: None,
                vulnerability: Some("XML External Entity (XXE)"),
            },
            AttackAction::DeserializationAttempt => ActionProfile {
                unlocked_at: Public,
                base_probabilities: &[(Public, 0.15)],
                escalates_to: Some(Internal),
                vulnerability: Some("Insecure Deserialization"),
            },
            AttackAction::PrivilegeEscalationAttempt => ActionProfile {
                unlocked_at: Internal,
                base_probabilities: &[(Internal, 0.2)],
                escalates_to: Some(Admin),
                vulnerability: None,
            },
            AttackAction::LateralMovementAttempt => ActionProfile {
                unlocked_at: Internal,
                base_probabilities: &[(Internal, 0.3), (Admin, 0.8)],
                escalates_to: Some(Internal),
                vulnerability: None,
            },
            AttackAction::CommandInjectionAttempt => ActionProfile {
                unlocked_at: Internal,
                base_probabilities: &[(Internal, 0.15)],
                escalates_to: None,
                vulnerability: Some("Command Injection"),
            },
        }
    }
}

impl ActionProfile {
    pub fn base_probability(&self, level: AccessLevel) -> Option<f64> {
        self.base_probabilities
            .iter()
            .find(|(l, _)| *l == level)
            .map(|(_, p)| *p)
    }

    /// Listed at `level`, or an escalation action already unlocked there
    pub fn is_applicable(&self, level: AccessLevel) -> bool {
        self.base_probability(level).is_some()
            || (self.escalates_to.is_some() && self.unlocked_at <= level)
    }
}

impl fmt::Display for AttackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttackAction {
    type Err = LabError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| LabError::UnknownAction(s.to_string()))
    }
}

/// Outcome of executing one action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackResult {
    pub success: bool,
    pub previous_access_level: AccessLevel,
    pub new_access_level: AccessLevel,
    pub message: String,
    pub discovered_entity: Option<String>,
    pub discovered_vuln: Option<String>,
    pub blocked: bool,
}

impl AttackResult {
    fn failure(level: AccessLevel, message: String) -> Self {
        Self {
            success: false,
            previous_access_level: level,
            new_access_level: level,
            message,
            discovered_entity: None,
            discovered_vuln: None,
            blocked: false,
        }
    }

    fn blocked(level: AccessLevel, message: &str) -> Self {
        Self {
            blocked: true,
            ..Self::failure(level, message.to_string())
        }
    }

    pub fn escalated(&self) -> bool {
        self.new_access_level > self.previous_access_level
    }
}

/// Probabilistic executor for attack actions
pub struct AttackEngine {
    config: EngineConfig,
    detector: Bernoulli,
    rng: StdRng,
}

impl AttackEngine {
    /// Engine seeded from OS entropy
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Reproducible engine
    pub fn with_seed(config: EngineConfig, seed: u64) -> Result<Self> {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(config: EngineConfig, rng: StdRng) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.success_cap)
            || !(0.0..=1.0).contains(&config.fallback_probability)
        {
            return Err(LabError::Config(
                "success cap and fallback probability must be within [0, 1]".to_string(),
            ));
        }
        if !config.learning_curve.is_finite() || config.learning_curve <= 0.0 {
            return Err(LabError::Config(
                "learning curve must be a positive number".to_string(),
            ));
        }

        let detector = Bernoulli::new(config.detection_probability).map_err(|e| {
            LabError::Config(format!(
                "detection probability {}: {}",
                config.detection_probability, e
            ))
        })?;
        Ok(Self {
            config,
            detector,
            rng,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute `action` against `state`, mutating it on success or detection.
    ///
    /// Never fails: blocked and inapplicable attempts come back as ordinary
    /// unsuccessful results.
    pub fn execute(&mut self, action: AttackAction, state: &mut EnvironmentState) -> AttackResult {
        let level = state.access_level;

        if state.is_blocked(ATTACKER_ID) {
            return AttackResult::blocked(level, "IP address is blocked");
        }

        let profile = action.profile();
        if !profile.is_applicable(level) {
            return AttackResult::failure(
                level,
                format!("Action {} not applicable at {} level", action, level),
            );
        }

        if self.detector.sample(&mut self.rng) {
            state.block(ATTACKER_ID);
            tracing::debug!(action = %action, level = %level, "attack detected, attacker blocked");
            return AttackResult::blocked(level, "Attack detected and blocked by IDS");
        }

        let probability = self.success_probability(action, level);
        if self.rng.gen::<f64>() >= probability {
            return AttackResult::failure(level, format!("Failed to execute {}", action));
        }

        if let Some(target) = profile.escalates_to {
            state.escalate(target);
        }

        let entity = format!("service_{}", self.rng.gen_range(1..=10));
        state.mark_visited(entity.clone());

        let vulnerability = profile.vulnerability.map(str::to_string);
        if let Some(vuln) = &vulnerability {
            state.discovered_vulnerabilities.push(vuln.clone());
        }

        AttackResult {
            success: true,
            previous_access_level: level,
            new_access_level: state.access_level,
            message: format!("Successfully executed {}", action),
            discovered_entity: Some(entity),
            discovered_vuln: vulnerability,
            blocked: false,
        }
    }

    /// Catalog probability scaled by the learning curve, capped
    pub fn success_probability(&self, action: AttackAction, level: AccessLevel) -> f64 {
        let base = action
            .profile()
            .base_probability(level)
            .unwrap_or(self.config.fallback_probability);
        (base * self.config.learning_curve).clamp(0.0, self.config.success_cap)
    }

    /// Actions offered at `level`, cumulative and in catalog order
    pub fn available_actions(level: AccessLevel) -> Vec<AttackAction> {
        AttackAction::ALL
            .iter()
            .copied()
            .filter(|a| a.profile().unlocked_at <= level)
            .collect()
    }
}
