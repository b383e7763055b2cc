// src/main.rs
//! Attack path lab command-line driver
//!
//! Runs knowledge-augmented Q-learning episodes against the simulated target
//! and inspects the attack paths stored in SQLite.

use anyhow::{Context, Result};
use attack_path_lab::analysis::{self, Analyzer};
use attack_path_lab::{
    DiscoveredService, ExploitLibrarian, LabConfig, LabError, PathStore, SessionRegistry,
    SimulationRequest,
};
use clap::{Parser, Subcommand};
use colored::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Knowledge-augmented attack path simulator
#[derive(Parser)]
#[command(name = "attack-path-lab")]
#[command(version)]
#[command(about = "Learn privilege escalation paths with exploit-database hints")]
struct Cli {
    /// SQLite database for attack paths
    #[arg(long, env = "ATTACK_LAB_DATABASE_URL")]
    database: Option<String>,

    /// Query an installed searchsploit before the static catalog
    #[arg(long)]
    searchsploit: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run simulation episodes and store their paths
    Simulate {
        /// Number of episodes to run
        #[arg(short, long, default_value = "1")]
        episodes: u32,

        /// Step budget per episode
        #[arg(short, long)]
        iterations: Option<u32>,

        /// Discovered service used to seed the strategic hint
        #[arg(short, long)]
        service: Option<String>,

        /// Version of the discovered service
        #[arg(short = 'V', long = "service-version", requires = "service")]
        service_version: Option<String>,

        #[arg(short, long, default_value = "80")]
        port: u16,

        /// Seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,

        /// Print the analysis as JSON instead of tables
        #[arg(long)]
        json: bool,
    },
    /// Show the highest-scoring stored path
    Best,
    /// List stored paths by score
    Paths {
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },
    /// Aggregate statistics over all stored paths
    Stats,
    /// Look up strategic hints for a service
    Hints {
        service: String,

        #[arg(short = 'V', long = "service-version")]
        service_version: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "attack_path_lab=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = LabConfig::from_env().context("invalid ATTACK_LAB_* configuration")?;
    if let Some(url) = cli.database {
        config.database_url = url;
    }
    if cli.searchsploit {
        config.knowledge.use_searchsploit = true;
    }

    match cli.command {
        Commands::Simulate {
            episodes,
            iterations,
            service,
            service_version,
            port,
            seed,
            json,
        } => {
            if seed.is_some() {
                config.seed = seed;
            }
            let iterations = iterations.unwrap_or(config.default_iterations);
            let registry = SessionRegistry::from_config(config).await?;
            tracing::info!("database ready");

            let mut request = SimulationRequest::new(iterations);
            if let Some(name) = service {
                request = request.with_service(DiscoveredService::new(
                    name,
                    port,
                    service_version.as_deref(),
                ));
            }

            let mut reports = Vec::new();
            for episode in 1..=episodes {
                match registry
                    .simulate(registry.default_session(), request.clone())
                    .await
                {
                    Ok(report) => {
                        if !json {
                            println!(
                                "{} {:>4}  level={:<8} steps={:<4} score={:.2}",
                                "episode".bright_blue(),
                                episode,
                                report.final_access_level.to_string(),
                                report.total_iterations,
                                report.score
                            );
                        }
                        reports.push(report);
                    }
                    Err(LabError::Persistence { source, report }) => {
                        tracing::error!(episode = episode, error = %source, "attack path not saved");
                        reports.push(*report);
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            let analyzer = Analyzer::new(reports);
            if json {
                println!("{}", analyzer.export_json()?);
            } else {
                analyzer.print_summary();
                let stats = registry.agent_stats(registry.default_session()).await?;
                println!(
                    "agent: epsilon={:.4} episodes={} q-entries={} total reward={:.1}",
                    stats.epsilon, stats.episode_count, stats.q_table_size, stats.total_rewards
                );
            }

            registry.store().close().await;
        }
        Commands::Best => {
            let store = PathStore::connect(&config.database_url).await?;
            match store.best_path().await? {
                Some(path) => {
                    println!(
                        "{} #{}  level={}  score={:.2}",
                        "Best attack path".bright_green().bold(),
                        path.id,
                        path.final_access_level,
                        path.score
                    );
                    println!("{}", analysis::path_table(&path));
                    if !path.discovered_vulnerabilities.is_empty() {
                        println!("Vulnerabilities: {}", path.discovered_vulnerabilities.join(", "));
                    }
                }
                None => println!("{}", "No attack paths found".yellow()),
            }
        }
        Commands::Paths { limit } => {
            let store = PathStore::connect(&config.database_url).await?;
            let paths = store.list_paths(limit).await?;
            if paths.is_empty() {
                println!("{}", "No attack paths found".yellow());
            } else {
                println!("{}", analysis::paths_table(&paths));
            }
        }
        Commands::Stats => {
            let store = PathStore::connect(&config.database_url).await?;
            let stats = store.stats().await?;
            println!("{}", "Attack path statistics".bright_cyan().bold());
            println!("{}", analysis::stats_tables(&stats));
        }
        Commands::Hints {
            service,
            service_version,
        } => {
            let librarian = ExploitLibrarian::from_config(&config.knowledge).await;
            let hints = librarian
                .lookup(&service, service_version.as_deref())
                .await;
            if hints.is_empty() {
                println!("{}", format!("No strategic hints for {}", service).yellow());
            } else {
                println!("{}", analysis::hints_table(&hints));
            }
        }
    }

    Ok(())
}
