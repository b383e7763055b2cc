//! # Attack Path Lab
//!
//! A knowledge-augmented reinforcement learning simulator for privilege
//! escalation. An abstract target moves through access levels as a Q-learning
//! agent tries attack actions against it. This library provides tools to:
//!
//! - Model the target as an access-level state machine with intrusion detection
//! - Train a Q-learning agent that trusts exploit-database hints for discovered services
//! - Look up strategic hints from a static catalog or an installed `searchsploit`
//! - Persist and rank discovered attack paths in SQLite
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use attack_path_lab::{DiscoveredService, LabConfig, SessionRegistry, SimulationRequest};
//!
//! # async fn run() -> attack_path_lab::Result<()> {
//! let registry = SessionRegistry::from_config(LabConfig::default()).await?;
//! let request = SimulationRequest::new(100)
//!     .with_service(DiscoveredService::new("Apache", 80, Some("2.4.50")));
//!
//! let report = registry.simulate(registry.default_session(), request).await?;
//! println!("reached {} in {} steps", report.final_access_level, report.total_iterations);
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod attack;
pub mod config;
pub mod db;
pub mod environment;
pub mod error;
pub mod knowledge;
pub mod ml;
pub mod simulation;

// Re-export commonly used types
pub use analysis::{AnalysisReport, Analyzer};
pub use attack::{AttackAction, AttackEngine, AttackResult};
pub use config::{AgentConfig, EngineConfig, KnowledgeConfig, LabConfig};
pub use db::{AttackPathRecord, PathStore, StepRecord, StoreStats};
pub use environment::{AccessLevel, EnvironmentState, ATTACKER_ID};
pub use error::{LabError, Result};
pub use knowledge::{ExploitLibrarian, ExploitSearch, Searchsploit, StrategicHint};
pub use ml::{AgentStats, QLearningAgent, QTable};
pub use simulation::{
    AttackOutcome, DiscoveredService, Session, SessionId, SessionRegistry, SimulationReport,
    SimulationRequest,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
