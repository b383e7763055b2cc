use attack_path_lab::*;
use attack_path_lab::db::calculate_path_score;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;

fn certain_engine() -> AttackEngine {
    let config = EngineConfig {
        detection_probability: 0.0,
        learning_curve: 10.0,
        success_cap: 1.0,
        ..EngineConfig::default()
    };
    AttackEngine::with_seed(config, 1).unwrap()
}

#[tokio::test]
async fn test_apache_hint_pays_off() {
    let librarian = ExploitLibrarian::new();
    let mut state = EnvironmentState::new();

    let hint = state
        .reset_with_hint(Some("Apache"), Some("2.4.50"), Some(&librarian))
        .await
        .unwrap();
    assert_eq!(hint.action, AttackAction::PathTraversalAttempt);
    assert_eq!(hint.confidence, 0.95);

    let agent_config = AgentConfig {
        hint_priority: 1.0,
        ..AgentConfig::default()
    };
    let mut agent = QLearningAgent::with_seed(agent_config, 1);
    let available = AttackEngine::available_actions(state.access_level);
    let action = agent
        .choose_action(state.access_level, &available, &state)
        .unwrap();
    assert_eq!(action, AttackAction::PathTraversalAttempt);

    let mut engine = certain_engine();
    let result = engine.execute(action, &mut state);
    assert!(result.success);
    assert_eq!(result.new_access_level, AccessLevel::Public);
    assert_eq!(result.discovered_vuln.as_deref(), Some("Path Traversal"));

    let reward = agent.compute_reward(&result, &mut state, action);
    assert_eq!(reward, 122.0);
    assert!(reward >= 105.0);
    assert!(state.hint_followed);
    assert!(state.hint_succeeded);
}

#[test]
fn test_lateral_movement_needs_a_foothold() {
    let mut state = EnvironmentState::new();
    let mut engine = certain_engine();
    let agent = QLearningAgent::with_seed(AgentConfig::default(), 1);

    let result = engine.execute(AttackAction::LateralMovementAttempt, &mut state);
    assert!(!result.success);
    assert!(!result.blocked);
    assert_eq!(result.new_access_level, AccessLevel::None);
    assert_eq!(state.access_level, AccessLevel::None);

    let reward = agent.compute_reward(&result, &mut state, AttackAction::LateralMovementAttempt);
    assert_eq!(reward, -2.0);
}

#[test]
fn test_escalation_is_monotonic_under_random_actions() {
    let mut rng = StdRng::seed_from_u64(99);
    let mut engine = AttackEngine::with_seed(EngineConfig::default(), 99).unwrap();
    let mut state = EnvironmentState::new();

    for _ in 0..500 {
        let before = state.access_level;
        let action = *AttackAction::ALL.choose(&mut rng).unwrap();
        let result = engine.execute(action, &mut state);
        assert!(state.access_level >= before);
        assert_eq!(result.previous_access_level, before);
        if state.is_blocked(ATTACKER_ID) {
            assert!(!engine.execute(action, &mut state).success);
            state.reset();
        }
    }
}

#[tokio::test]
async fn test_store_scoring_and_best_path() {
    let store = PathStore::in_memory().await.unwrap();
    assert!(store.best_path().await.unwrap().is_none());

    let steps: Vec<StepRecord> = (1..=10)
        .map(|i| StepRecord {
            iteration: i,
            action: AttackAction::SqlInjectionAttempt,
            success: i <= 8,
            access_level: AccessLevel::Admin,
            message: String::new(),
            reward: 0.0,
            discovered_entity: None,
            discovered_vuln: None,
            blocked: false,
            hint_present: false,
            hint_matched: false,
            active_hint: None,
        })
        .collect();
    let vulns = vec![
        "SQL Injection".to_string(),
        "Path Traversal".to_string(),
        "Command Injection".to_string(),
    ];

    assert_eq!(calculate_path_score(AccessLevel::Admin, 10, 8, 2, 3), 194.0);
    let id = store.save(&steps, AccessLevel::Admin, &vulns, None).await.unwrap();

    let best = store.best_path().await.unwrap().unwrap();
    assert_eq!(best.id, id);
    assert_eq!(best.score, 194.0);
}

#[tokio::test]
async fn test_file_backed_registry_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("paths.db").display());
    let config = LabConfig {
        database_url: url.clone(),
        seed: Some(42),
        ..LabConfig::default()
    };

    let registry = SessionRegistry::from_config(config).await.unwrap();
    let request = SimulationRequest::new(60)
        .with_service(DiscoveredService::new("Apache", 80, Some("2.4.50")));

    let mut ids = Vec::new();
    for _ in 0..3 {
        let report = registry
            .simulate(registry.default_session(), request.clone())
            .await
            .unwrap();
        ids.push(report.path_id.unwrap());
    }
    registry.store().close().await;

    let reopened = PathStore::connect(&url).await.unwrap();
    let stats = reopened.stats().await.unwrap();
    assert_eq!(stats.total_paths, 3);

    let listed = reopened.list_paths(10).await.unwrap();
    assert_eq!(listed.len(), 3);
    for pair in listed.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    for id in ids {
        let path = reopened.path_by_id(id).await.unwrap().unwrap();
        assert_eq!(path.total_iterations as usize, path.steps.len());
    }
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let store = PathStore::in_memory().await.unwrap();
    let registry =
        SessionRegistry::new(LabConfig::default(), Arc::new(ExploitLibrarian::new()), store).unwrap();

    let a = registry.create_session(Some(1)).await.unwrap();
    let b = registry.create_session(Some(2)).await.unwrap();

    registry.simulate(a, SimulationRequest::new(25)).await.unwrap();
    registry
        .query_hints(b, "redis", Some("6.0"))
        .await
        .unwrap();

    assert_eq!(registry.agent_stats(a).await.unwrap().episode_count, 1);
    assert_eq!(registry.agent_stats(b).await.unwrap().episode_count, 0);
    assert!(!registry.state(a).await.unwrap().hint_present);
    assert_eq!(
        registry.state(b).await.unwrap().active_hint,
        Some(AttackAction::CommandInjectionAttempt)
    );
}

#[tokio::test]
async fn test_analysis_over_simulations() {
    let store = PathStore::in_memory().await.unwrap();
    let config = LabConfig {
        seed: Some(5),
        ..LabConfig::default()
    };
    let registry = SessionRegistry::new(config, Arc::new(ExploitLibrarian::new()), store).unwrap();

    let mut reports = Vec::new();
    for _ in 0..5 {
        reports.push(
            registry
                .simulate(registry.default_session(), SimulationRequest::new(40))
                .await
                .unwrap(),
        );
    }

    let analyzer = Analyzer::new(reports);
    let report = analyzer.generate_report();
    assert_eq!(report.episode_summary.episodes, 5);
    assert!(!report.action_breakdown.is_empty());
    assert!(analyzer.export_json().is_ok());
}
