//! Episode loop and per-session state

use crate::attack::{AttackAction, AttackEngine, AttackResult};
use crate::config::LabConfig;
use crate::db::{calculate_path_score, PathStore, StepRecord};
use crate::environment::{AccessLevel, EnvironmentState};
use crate::error::{LabError, Result};
use crate::knowledge::{strongest, ExploitLibrarian, StrategicHint};
use crate::ml::{AgentStats, QLearningAgent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

pub type SessionId = Uuid;

/// A service reported by reconnaissance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredService {
    pub name: String,
    pub port: u16,
    pub version: Option<String>,
}

impl DiscoveredService {
    pub fn new(name: impl Into<String>, port: u16, version: Option<&str>) -> Self {
        Self {
            name: name.into(),
            port,
            version: version.map(str::to_string),
        }
    }
}

/// Parameters of one simulated episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRequest {
    pub iterations: u32,
    /// The first service seeds the strategic hint
    #[serde(default)]
    pub services: Vec<DiscoveredService>,
}

impl SimulationRequest {
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations,
            services: Vec::new(),
        }
    }

    pub fn with_service(mut self, service: DiscoveredService) -> Self {
        self.services.push(service);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(LabError::InvalidInput(
                "iterations must be at least 1".to_string(),
            ));
        }
        if self.services.iter().any(|s| s.name.trim().is_empty()) {
            return Err(LabError::InvalidInput(
                "service names must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Summary of a finished episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub attack_path: Vec<StepRecord>,
    pub final_access_level: AccessLevel,
    pub total_iterations: u32,
    pub successful_attacks: u32,
    pub failed_attacks: u32,
    pub discovered_vulnerabilities: Vec<String>,
    pub strategic_hint_used: Option<StrategicHint>,
    pub hint_success: bool,
    pub total_reward: f64,
    pub score: f64,
    /// Row id once the path has been saved
    pub path_id: Option<i64>,
}

/// Result of a single manual attack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackOutcome {
    pub result: AttackResult,
    pub reward: f64,
}

/// Environment, executor and learner owned by one caller
pub struct Session {
    id: SessionId,
    environment: EnvironmentState,
    engine: AttackEngine,
    agent: QLearningAgent,
}

impl Session {
    pub fn new(id: SessionId, config: &LabConfig, seed: Option<u64>) -> Result<Self> {
        let (engine, agent) = match seed {
            Some(seed) => (
                AttackEngine::with_seed(config.engine.clone(), seed)?,
                QLearningAgent::with_seed(config.agent.clone(), seed.wrapping_add(1)),
            ),
            None => (
                AttackEngine::new(config.engine.clone())?,
                QLearningAgent::new(config.agent.clone()),
            ),
        };

        Ok(Self {
            id,
            environment: EnvironmentState::new(),
            engine,
            agent,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn environment(&self) -> &EnvironmentState {
        &self.environment
    }

    pub fn agent(&self) -> &QLearningAgent {
        &self.agent
    }

    /// Execute, reward and learn from one action
    pub fn step(&mut self, action: AttackAction) -> (AttackResult, f64) {
        let state = self.environment.access_level;
        let result = self.engine.execute(action, &mut self.environment);
        let reward = self
            .agent
            .compute_reward(&result, &mut self.environment, action);
        self.agent
            .update(state, action, reward, self.environment.access_level);
        self.environment.iteration_count += 1;

        (result, reward)
    }

    /// Run one episode without persisting it
    pub async fn run_episode(
        &mut self,
        request: &SimulationRequest,
        librarian: &ExploitLibrarian,
    ) -> Result<SimulationReport> {
        request.validate()?;

        let target = request.services.first();
        let hint = self
            .environment
            .reset_with_hint(
                target.map(|s| s.name.as_str()),
                target.and_then(|s| s.version.as_deref()),
                Some(librarian),
            )
            .await;
        self.environment.discovered_services =
            request.services.iter().map(|s| s.name.clone()).collect();

        tracing::info!(
            session = %self.id,
            iterations = request.iterations,
            hint = hint.as_ref().map(|h| h.action.as_str()).unwrap_or("none"),
            "starting simulation"
        );

        let mut attack_path = Vec::new();
        let mut total_reward = 0.0;

        for iteration in 1..=request.iterations {
            let state = self.environment.access_level;
            let available = AttackEngine::available_actions(state);
            let action = self
                .agent
                .choose_action(state, &available, &self.environment)?;
            let hint_matched = self.environment.hint_matches(action);

            let (result, reward) = self.step(action);
            total_reward += reward;

            tracing::debug!(
                iteration = iteration,
                action = %action,
                success = result.success,
                level = %result.new_access_level,
                reward = reward,
                "step"
            );

            attack_path.push(StepRecord {
                iteration,
                action,
                success: result.success,
                access_level: result.new_access_level,
                message: result.message,
                reward,
                discovered_entity: result.discovered_entity,
                discovered_vuln: result.discovered_vuln,
                blocked: result.blocked,
                hint_present: self.environment.hint_present,
                hint_matched,
                active_hint: self.environment.active_hint,
            });

            if self.environment.is_terminal() {
                tracing::info!(session = %self.id, iteration = iteration, "reached admin access");
                break;
            }
        }

        self.agent.decay_exploration();

        let successful_attacks = attack_path.iter().filter(|s| s.success).count() as u32;
        let total_iterations = attack_path.len() as u32;
        let failed_attacks = total_iterations - successful_attacks;
        let discovered_vulnerabilities = self.environment.discovered_vulnerabilities.clone();
        let score = calculate_path_score(
            self.environment.access_level,
            attack_path.len(),
            successful_attacks,
            failed_attacks,
            discovered_vulnerabilities.len(),
        );

        tracing::info!(
            session = %self.id,
            final_level = %self.environment.access_level,
            successes = successful_attacks,
            failures = failed_attacks,
            score = score,
            "simulation finished"
        );

        Ok(SimulationReport {
            attack_path,
            final_access_level: self.environment.access_level,
            total_iterations,
            successful_attacks,
            failed_attacks,
            discovered_vulnerabilities,
            strategic_hint_used: hint,
            hint_success: self.environment.hint_succeeded,
            total_reward,
            score,
            path_id: None,
        })
    }

    /// Clear the environment and everything the agent learned
    pub fn reset(&mut self) {
        self.environment.reset();
        self.agent.reset();
    }
}

/// Sessions keyed by id, sharing one librarian and one path store
pub struct SessionRegistry {
    config: LabConfig,
    librarian: Arc<ExploitLibrarian>,
    store: PathStore,
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>,
}

impl SessionRegistry {
    /// Always present; used when callers do not manage sessions themselves
    pub const DEFAULT_SESSION: SessionId = Uuid::nil();

    pub fn new(config: LabConfig, librarian: Arc<ExploitLibrarian>, store: PathStore) -> Result<Self> {
        config.validate()?;
        let default = Session::new(Self::DEFAULT_SESSION, &config, config.seed)?;

        let mut sessions = HashMap::new();
        sessions.insert(Self::DEFAULT_SESSION, Arc::new(Mutex::new(default)));

        Ok(Self {
            config,
            librarian,
            store,
            sessions: RwLock::new(sessions),
        })
    }

    /// Connect the store and librarian described by `config`
    pub async fn from_config(config: LabConfig) -> Result<Self> {
        let store = PathStore::connect(&config.database_url).await?;
        let librarian = Arc::new(ExploitLibrarian::from_config(&config.knowledge).await);
        Self::new(config, librarian, store)
    }

    pub fn default_session(&self) -> SessionId {
        Self::DEFAULT_SESSION
    }

    pub fn store(&self) -> &PathStore {
        &self.store
    }

    pub fn librarian(&self) -> &ExploitLibrarian {
        &self.librarian
    }

    pub async fn create_session(&self, seed: Option<u64>) -> Result<SessionId> {
        let id = Uuid::new_v4();
        let session = Session::new(id, &self.config, seed.or(self.config.seed))?;
        self.sessions
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(session)));

        tracing::debug!(session = %id, "created session");
        Ok(id)
    }

    pub async fn drop_session(&self, id: SessionId) -> Result<()> {
        if id == Self::DEFAULT_SESSION {
            return Err(LabError::InvalidInput(
                "the default session cannot be dropped".to_string(),
            ));
        }
        self.sessions
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(LabError::UnknownSession(id))
    }

    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().copied().collect()
    }

    async fn session(&self, id: SessionId) -> Result<Arc<Mutex<Session>>> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(LabError::UnknownSession(id))
    }

    /// Snapshot of the session's environment
    pub async fn state(&self, id: SessionId) -> Result<EnvironmentState> {
        let session = self.session(id).await?;
        let guard = session.lock().await;
        Ok(guard.environment.clone())
    }

    pub async fn available_actions(&self, id: SessionId) -> Result<Vec<AttackAction>> {
        let session = self.session(id).await?;
        let guard = session.lock().await;
        Ok(AttackEngine::available_actions(guard.environment.access_level))
    }

    /// Execute one action by its wire id
    pub async fn attack(&self, id: SessionId, action_id: &str) -> Result<AttackOutcome> {
        let action: AttackAction = action_id.parse()?;
        let session = self.session(id).await?;
        let mut guard = session.lock().await;

        let (result, reward) = guard.step(action);
        Ok(AttackOutcome { result, reward })
    }

    /// Run and persist an episode.
    ///
    /// The session stays locked for the whole episode. If the path cannot be
    /// saved the report is returned inside [`LabError::Persistence`].
    pub async fn simulate(&self, id: SessionId, request: SimulationRequest) -> Result<SimulationReport> {
        let session = self.session(id).await?;
        let mut guard = session.lock().await;

        let mut report = guard.run_episode(&request, &self.librarian).await?;
        match self.store.save_report(&report).await {
            Ok(path_id) => {
                report.path_id = Some(path_id);
                Ok(report)
            }
            Err(e) => {
                tracing::warn!(session = %id, error = %e, "failed to save attack path");
                Err(LabError::Persistence {
                    source: Box::new(e),
                    report: Box::new(report),
                })
            }
        }
    }

    pub async fn reset(&self, id: SessionId) -> Result<()> {
        let session = self.session(id).await?;
        session.lock().await.reset();
        Ok(())
    }

    /// All hints for a service; the strongest one becomes the session's active hint
    pub async fn query_hints(
        &self,
        id: SessionId,
        service: &str,
        version: Option<&str>,
    ) -> Result<Vec<StrategicHint>> {
        if service.trim().is_empty() {
            return Err(LabError::InvalidInput(
                "service name must not be empty".to_string(),
            ));
        }
        let session = self.session(id).await?;
        let hints = self.librarian.lookup(service, version).await;

        if let Some(best) = strongest(&hints) {
            session.lock().await.environment.apply_hint(best);
        }
        Ok(hints)
    }

    pub async fn agent_stats(&self, id: SessionId) -> Result<AgentStats> {
        let session = self.session(id).await?;
        let guard = session.lock().await;
        Ok(guard.agent.stats())
    }
}
