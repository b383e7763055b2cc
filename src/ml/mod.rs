use crate::attack::{AttackAction, AttackResult};
use crate::config::AgentConfig;
use crate::environment::{AccessLevel, EnvironmentState};
use crate::error::{LabError, Result};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const SUCCESS_REWARD: f64 = 5.0;
const ESCALATION_REWARD_PER_LEVEL: f64 = 10.0;
const ENTITY_REWARD: f64 = 2.0;
const VULNERABILITY_REWARD: f64 = 3.0;
const HINT_SUCCESS_REWARD: f64 = 100.0;
const HINT_TRUST_BONUS: f64 = 2.0;
const FAILURE_PENALTY: f64 = -2.0;
const IGNORED_HINT_PENALTY: f64 = -1.0;
const BLOCKED_PENALTY: f64 = -10.0;

/// Tabular action values indexed by access level and action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QTable {
    values: Array2<f64>,
    written: Array2<bool>,
}

impl QTable {
    pub fn new() -> Self {
        let shape = (AccessLevel::ALL.len(), AttackAction::COUNT);
        Self {
            values: Array2::zeros(shape),
            written: Array2::from_elem(shape, false),
        }
    }

    pub fn get(&self, state: AccessLevel, action: AttackAction) -> f64 {
        self.values[[state.rank(), action.index()]]
    }

    pub fn set(&mut self, state: AccessLevel, action: AttackAction, value: f64) {
        let idx = [state.rank(), action.index()];
        self.values[idx] = value;
        self.written[idx] = true;
    }

    /// Whether any action value has been recorded for `state`
    pub fn has_state(&self, state: AccessLevel) -> bool {
        self.written.row(state.rank()).iter().any(|w| *w)
    }

    /// Largest recorded value for `state`, 0.0 when nothing is recorded
    pub fn max_value(&self, state: AccessLevel) -> f64 {
        let row = state.rank();
        self.values
            .row(row)
            .iter()
            .zip(self.written.row(row).iter())
            .filter(|(_, written)| **written)
            .map(|(v, _)| *v)
            .fold(None, |best: Option<f64>, v| Some(best.map_or(v, |b| b.max(v))))
            .unwrap_or(0.0)
    }

    /// Q(s,a) += lr * (reward + gamma * max Q(s',·) - Q(s,a))
    pub fn update(
        &mut self,
        state: AccessLevel,
        action: AttackAction,
        reward: f64,
        next_state: AccessLevel,
        learning_rate: f64,
        discount_factor: f64,
    ) -> f64 {
        let current = self.get(state, action);
        let target = reward + discount_factor * self.max_value(next_state);
        let updated = current + learning_rate * (target - current);
        self.set(state, action, updated);
        updated
    }

    /// Available actions sharing the highest value; `None` for a state never updated
    pub fn best_actions(
        &self,
        state: AccessLevel,
        available: &[AttackAction],
    ) -> Option<Vec<AttackAction>> {
        if !self.has_state(state) {
            return None;
        }

        let best = available
            .iter()
            .map(|a| self.get(state, *a))
            .fold(f64::NEG_INFINITY, f64::max);
        Some(
            available
                .iter()
                .copied()
                .filter(|a| self.get(state, *a) == best)
                .collect(),
        )
    }

    /// Number of recorded state-action pairs
    pub fn len(&self) -> usize {
        self.written.iter().filter(|w| **w).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.values.fill(0.0);
        self.written.fill(false);
    }
}

impl Default for QTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Learning statistics for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub epsilon: f64,
    pub total_rewards: f64,
    pub episode_count: u32,
    pub q_table_size: usize,
}

/// Knowledge-augmented Q-learning agent
///
/// Chooses actions epsilon-greedily over a coarse access-level state, but
/// follows an applicable strategic hint outright most of the time.
pub struct QLearningAgent {
    config: AgentConfig,
    q_table: QTable,
    epsilon: f64,
    total_rewards: f64,
    episode_count: u32,
    rng: StdRng,
}

impl QLearningAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_seed(config: AgentConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(config: AgentConfig, rng: StdRng) -> Self {
        Self {
            epsilon: config.epsilon,
            config,
            q_table: QTable::new(),
            total_rewards: 0.0,
            episode_count: 0,
            rng,
        }
    }

    /// Pick the next action for `state` from `available`
    pub fn choose_action(
        &mut self,
        state: AccessLevel,
        available: &[AttackAction],
        environment: &EnvironmentState,
    ) -> Result<AttackAction> {
        if available.is_empty() {
            return Err(LabError::InvalidInput("No available actions".to_string()));
        }

        if environment.hint_present {
            if let Some(hint) = environment.active_hint {
                if available.contains(&hint) && self.rng.gen::<f64>() < self.config.hint_priority {
                    tracing::debug!(action = %hint, "agent prioritizing strategic hint");
                    return Ok(hint);
                }
            }
        }

        let candidates = if self.rng.gen::<f64>() < self.epsilon {
            None
        } else {
            self.q_table.best_actions(state, available)
        };
        let pool = candidates.as_deref().unwrap_or(available);

        pool.choose(&mut self.rng)
            .copied()
            .ok_or_else(|| LabError::InvalidInput("No available actions".to_string()))
    }

    /// Reward for the outcome of `action`.
    ///
    /// All terms stack. Following the active hint sets `hint_followed` and
    /// `hint_succeeded` on `environment`.
    pub fn compute_reward(
        &self,
        result: &AttackResult,
        environment: &mut EnvironmentState,
        action: AttackAction,
    ) -> f64 {
        let hint_match = environment.hint_matches(action);
        let mut reward = 0.0;

        if result.success {
            reward += SUCCESS_REWARD;

            let gained = result.new_access_level.rank() as f64
                - result.previous_access_level.rank() as f64;
            if gained > 0.0 {
                reward += ESCALATION_REWARD_PER_LEVEL * gained;
            }
            if result.discovered_entity.is_some() {
                reward += ENTITY_REWARD;
            }
            if result.discovered_vuln.is_some() {
                reward += VULNERABILITY_REWARD;
            }
            if hint_match {
                reward += HINT_SUCCESS_REWARD;
                environment.mark_hint_followed(true);
                tracing::debug!(action = %action, "followed strategic hint and succeeded");
            }
        } else {
            reward += FAILURE_PENALTY;
            if environment.hint_present && !hint_match {
                reward += IGNORED_HINT_PENALTY;
            }
        }

        if hint_match && environment.hint_present {
            reward += HINT_TRUST_BONUS;
            if !result.success {
                environment.mark_hint_followed(false);
            }
        }

        if result.blocked {
            reward += BLOCKED_PENALTY;
        }

        reward
    }

    /// Apply one Q-learning update and accumulate the reward
    pub fn update(
        &mut self,
        state: AccessLevel,
        action: AttackAction,
        reward: f64,
        next_state: AccessLevel,
    ) -> f64 {
        self.total_rewards += reward;
        self.q_table.update(
            state,
            action,
            reward,
            next_state,
            self.config.learning_rate,
            self.config.discount_factor,
        )
    }

    /// Shrink exploration at the end of an episode
    pub fn decay_exploration(&mut self) {
        self.epsilon = (self.epsilon * self.config.epsilon_decay).max(self.config.min_epsilon);
        self.episode_count += 1;
    }

    /// Forget everything learned and restore the configured exploration rate
    pub fn reset(&mut self) {
        self.q_table.clear();
        self.epsilon = self.config.epsilon;
        self.total_rewards = 0.0;
        self.episode_count = 0;
    }

    pub fn q_value(&self, state: AccessLevel, action: AttackAction) -> f64 {
        self.q_table.get(state, action)
    }

    pub fn q_table(&self) -> &QTable {
        &self.q_table
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn stats(&self) -> AgentStats {
        AgentStats {
            epsilon: self.epsilon,
            total_rewards: self.total_rewards,
            episode_count: self.episode_count,
            q_table_size: self.q_table.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> QLearningAgent {
        QLearningAgent::with_seed(AgentConfig::default(), 11)
    }

    fn success(previous: AccessLevel, new: AccessLevel, vuln: Option<&str>) -> AttackResult {
        AttackResult {
            success: true,
            previous_access_level: previous,
            new_access_level: new,
            message: "ok".to_string(),
            discovered_entity: Some("service_4".to_string()),
            discovered_vuln: vuln.map(str::to_string),
            blocked: false,
        }
    }

    fn failure(level: AccessLevel, blocked: bool) -> AttackResult {
        AttackResult {
            success: false,
            previous_access_level: level,
            new_access_level: level,
            message: "nope".to_string(),
            discovered_entity: None,
            discovered_vuln: None,
            blocked,
        }
    }

    fn hinted(action: AttackAction) -> EnvironmentState {
        EnvironmentState {
            active_hint: Some(action),
            hint_present: true,
            hint_confidence: 0.95,
            ..EnvironmentState::default()
        }
    }

    #[test]
    fn test_q_table_defaults_and_size() {
        let mut table = QTable::new();
        assert_eq!(table.get(AccessLevel::None, AttackAction::XssAttempt), 0.0);
        assert!(table.is_empty());
        assert_eq!(table.max_value(AccessLevel::None), 0.0);

        table.set(AccessLevel::None, AttackAction::XssAttempt, -3.0);
        assert_eq!(table.len(), 1);
        assert!(table.has_state(AccessLevel::None));
        // only recorded entries count toward the max
        assert_eq!(table.max_value(AccessLevel::None), -3.0);
    }

    #[test]
    fn test_update_formula() {
        let mut agent = agent();
        agent.q_table.set(AccessLevel::Public, AttackAction::XssAttempt, 10.0);

        let q = agent.update(
            AccessLevel::None,
            AttackAction::PublicAccessAttempt,
            5.0,
            AccessLevel::Public,
        );
        // 0 + 0.1 * (5 + 0.9 * 10 - 0)
        assert!((q - 1.4).abs() < 1e-9);
        assert!((agent.stats().total_rewards - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_update_converges_monotonically() {
        let mut agent = agent();
        let mut last = 0.0;
        for _ in 0..200 {
            let q = agent.update(
                AccessLevel::Admin,
                AttackAction::LateralMovementAttempt,
                7.0,
                AccessLevel::None,
            );
            assert!(q > last);
            assert!(q <= 7.0);
            last = q;
        }
        assert!((last - 7.0).abs() < 1e-6);
    }

    #[test]
    fn test_choose_action_rejects_empty() {
        let mut agent = agent();
        let err = agent
            .choose_action(AccessLevel::None, &[], &EnvironmentState::default())
            .unwrap_err();
        assert!(matches!(err, LabError::InvalidInput(_)));
    }

    #[test]
    fn test_exploit_picks_best_action() {
        let config = AgentConfig {
            epsilon: 0.0,
            ..AgentConfig::default()
        };
        let mut agent = QLearningAgent::with_seed(config, 3);
        agent.q_table.set(AccessLevel::None, AttackAction::SqlInjectionAttempt, 4.0);
        agent.q_table.set(AccessLevel::None, AttackAction::PublicAccessAttempt, 1.0);

        let available = [
            AttackAction::PublicAccessAttempt,
            AttackAction::SqlInjectionAttempt,
            AttackAction::PathTraversalAttempt,
        ];
        for _ in 0..50 {
            let action = agent
                .choose_action(AccessLevel::None, &available, &EnvironmentState::default())
                .unwrap();
            assert_eq!(action, AttackAction::SqlInjectionAttempt);
        }
    }

    #[test]
    fn test_exploit_without_knowledge_is_uniform() {
        let config = AgentConfig {
            epsilon: 0.0,
            ..AgentConfig::default()
        };
        let mut agent = QLearningAgent::with_seed(config, 11);
        let available = [
            AttackAction::PublicAccessAttempt,
            AttackAction::SqlInjectionAttempt,
            AttackAction::PathTraversalAttempt,
        ];
        let env = EnvironmentState::default();

        // state never updated: any action in the menu
        let picked: std::collections::HashSet<AttackAction> = (0..100)
            .map(|_| agent.choose_action(AccessLevel::None, &available, &env).unwrap())
            .collect();
        assert_eq!(picked.len(), available.len());

        // two tied maxima: only those two, both reachable
        agent.q_table.set(AccessLevel::None, AttackAction::PublicAccessAttempt, 3.0);
        agent.q_table.set(AccessLevel::None, AttackAction::PathTraversalAttempt, 3.0);
        agent.q_table.set(AccessLevel::None, AttackAction::SqlInjectionAttempt, 1.0);
        let picked: std::collections::HashSet<AttackAction> = (0..100)
            .map(|_| agent.choose_action(AccessLevel::None, &available, &env).unwrap())
            .collect();
        assert_eq!(
            picked,
            [AttackAction::PublicAccessAttempt, AttackAction::PathTraversalAttempt]
                .into_iter()
                .collect()
        );
    }

    #[test]
    fn test_hint_is_prioritized() {
        let mut agent = QLearningAgent::with_seed(
            AgentConfig {
                hint_priority: 1.0,
                ..AgentConfig::default()
            },
            5,
        );
        let env = hinted(AttackAction::PathTraversalAttempt);
        let available = [
            AttackAction::PublicAccessAttempt,
            AttackAction::PathTraversalAttempt,
        ];
        for _ in 0..20 {
            assert_eq!(
                agent.choose_action(AccessLevel::None, &available, &env).unwrap(),
                AttackAction::PathTraversalAttempt
            );
        }

        // a hint outside the menu is ignored
        let env = hinted(AttackAction::CommandInjectionAttempt);
        let action = agent.choose_action(AccessLevel::None, &available, &env).unwrap();
        assert!(available.contains(&action));
    }

    #[test]
    fn test_hinted_success_reward_stacks() {
        let agent = agent();
        let mut env = hinted(AttackAction::PathTraversalAttempt);
        let result = success(AccessLevel::None, AccessLevel::Public, Some("Path Traversal"));

        let reward = agent.compute_reward(&result, &mut env, AttackAction::PathTraversalAttempt);
        // 5 + 10 + 2 + 3 + 100 + 2
        assert_eq!(reward, 122.0);
        assert!(env.hint_followed);
        assert!(env.hint_succeeded);
    }

    #[test]
    fn test_hint_reward_is_exactly_one_hundred_more() {
        let agent = agent();
        let result = success(AccessLevel::Public, AccessLevel::Internal, None);

        let mut plain = EnvironmentState::default();
        let base = agent.compute_reward(&result, &mut plain, AttackAction::TokenReuseAttempt);
        let mut env = hinted(AttackAction::TokenReuseAttempt);
        let with_hint = agent.compute_reward(&result, &mut env, AttackAction::TokenReuseAttempt);

        assert_eq!(base, 17.0);
        assert_eq!(with_hint - base, 100.0 + 2.0);
    }

    #[test]
    fn test_failure_rewards() {
        let agent = agent();

        let mut env = EnvironmentState::default();
        let r = agent.compute_reward(
            &failure(AccessLevel::None, false),
            &mut env,
            AttackAction::LateralMovementAttempt,
        );
        assert_eq!(r, -2.0);

        let mut env = hinted(AttackAction::PathTraversalAttempt);
        let r = agent.compute_reward(
            &failure(AccessLevel::None, false),
            &mut env,
            AttackAction::SqlInjectionAttempt,
        );
        assert_eq!(r, -3.0);
        assert!(!env.hint_followed);

        let mut env = hinted(AttackAction::PathTraversalAttempt);
        let r = agent.compute_reward(
            &failure(AccessLevel::None, false),
            &mut env,
            AttackAction::PathTraversalAttempt,
        );
        assert_eq!(r, 0.0);
        assert!(env.hint_followed);
        assert!(!env.hint_succeeded);

        let mut env = EnvironmentState::default();
        let r = agent.compute_reward(
            &failure(AccessLevel::Public, true),
            &mut env,
            AttackAction::XssAttempt,
        );
        assert_eq!(r, -12.0);
    }

    #[test]
    fn test_reward_is_deterministic() {
        let agent = agent();
        let result = success(AccessLevel::Internal, AccessLevel::Admin, None);
        let rewards: Vec<f64> = (0..5)
            .map(|_| {
                let mut env = hinted(AttackAction::PrivilegeEscalationAttempt);
                agent.compute_reward(&result, &mut env, AttackAction::PrivilegeEscalationAttempt)
            })
            .collect();
        assert!(rewards.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(rewards[0], 5.0 + 10.0 + 2.0 + 100.0 + 2.0);
    }

    #[test]
    fn test_decay_and_reset() {
        let mut agent = agent();
        for _ in 0..2000 {
            agent.decay_exploration();
        }
        assert_eq!(agent.epsilon(), 0.01);
        assert_eq!(agent.stats().episode_count, 2000);

        agent.update(AccessLevel::None, AttackAction::XssAttempt, 1.0, AccessLevel::None);
        agent.reset();
        let stats = agent.stats();
        assert_eq!(stats.epsilon, 0.1);
        assert_eq!(stats.q_table_size, 0);
        assert_eq!(stats.total_rewards, 0.0);
        assert_eq!(stats.episode_count, 0);
    }
}
