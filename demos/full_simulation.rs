use attack_path_lab::analysis::{self, Analyzer};
use attack_path_lab::{
    DiscoveredService, ExploitLibrarian, LabConfig, PathStore, SessionRegistry,
    SimulationRequest,
};
use colored::*;
use std::sync::Arc;

#[tokio::main]
async fn main() -> attack_path_lab::Result<()> {
    println!("{}", "=".repeat(80).bright_blue());
    println!("{}", "    ATTACK PATH LAB - FULL SIMULATION".bright_white().bold());
    println!("{}", "    Q-Learning with Exploit-Database Hints".bright_cyan());
    println!("{}", "=".repeat(80).bright_blue());

    let config = LabConfig {
        seed: Some(2024),
        ..LabConfig::default()
    };

    println!("\n{}", "Simulation Configuration:".bright_white().bold());
    println!("   Learning Rate: {}", config.agent.learning_rate);
    println!("   Discount Factor: {}", config.agent.discount_factor);
    println!("   Epsilon: {} (decay {})", config.agent.epsilon, config.agent.epsilon_decay);
    println!("   Hint Priority: {}", config.agent.hint_priority);
    println!("   Detection Probability: {}", config.engine.detection_probability);

    let store = PathStore::in_memory().await?;
    let registry = SessionRegistry::new(config, Arc::new(ExploitLibrarian::new()), store)?;

    let targets = [
        DiscoveredService::new("Apache", 80, Some("2.4.50")),
        DiscoveredService::new("mysql", 3306, Some("5.5.1")),
        DiscoveredService::new("internal-web", 8080, None),
    ];

    for target in targets {
        println!(
            "\n{} {} {}",
            "Target:".bright_white().bold(),
            target.name.bright_yellow(),
            target.version.as_deref().unwrap_or("")
        );

        let session = registry.create_session(Some(7)).await?;
        let request = SimulationRequest::new(100).with_service(target.clone());

        let mut reports = Vec::new();
        for _ in 0..50 {
            reports.push(registry.simulate(session, request.clone()).await?);
        }

        let hinted_action = reports
            .first()
            .and_then(|r| r.strategic_hint_used.as_ref())
            .map(|h| h.action);
        match hinted_action {
            Some(action) => println!("   Hint: {}", action.to_string().green()),
            None => println!("   Hint: {}", "none".dimmed()),
        }

        let stats = registry.agent_stats(session).await?;
        println!(
            "   Epsilon after training: {:.4}, Q entries: {}",
            stats.epsilon, stats.q_table_size
        );

        let state = registry.state(session).await?;
        println!(
            "   Last episode ended at {} (hint followed: {}, succeeded: {})",
            state.access_level, state.hint_followed, state.hint_succeeded
        );

        Analyzer::new(reports).print_summary();
        registry.drop_session(session).await?;
    }

    if let Some(best) = registry.store().best_path().await? {
        println!("\n{}", "Best path overall".bright_green().bold());
        println!("{}", analysis::path_table(&best));
    }
    println!("{}", analysis::stats_tables(&registry.store().stats().await?));

    Ok(())
}
