use crate::attack::AttackAction;
use crate::db::{AttackPathRecord, StoreStats};
use crate::environment::AccessLevel;
use crate::knowledge::StrategicHint;
use crate::simulation::SimulationReport;
use colored::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tabled::{Table, Tabled};

/// Analysis over a batch of episodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub episode_summary: EpisodeSummary,
    pub action_breakdown: Vec<ActionBreakdown>,
    pub discovered_vulnerabilities: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub episodes: usize,
    pub admin_reached: usize,
    pub admin_rate: f64,
    pub average_iterations: f64,
    pub average_score: f64,
    pub average_reward: f64,
    pub best_score: f64,
    /// Share of hinted episodes in which following the hint succeeded
    pub hint_success_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionBreakdown {
    pub action: AttackAction,
    pub attempts: usize,
    pub successes: usize,
    pub success_rate: f64,
}

/// Analyzer for simulation results
pub struct Analyzer {
    reports: Vec<SimulationReport>,
}

impl Analyzer {
    pub fn new(reports: Vec<SimulationReport>) -> Self {
        Self { reports }
    }

    /// Generate comprehensive analysis report
    pub fn generate_report(&self) -> AnalysisReport {
        let episode_summary = self.summarize_episodes();
        AnalysisReport {
            action_breakdown: self.break_down_actions(),
            discovered_vulnerabilities: self.collect_vulnerabilities(),
            recommendations: self.generate_recommendations(&episode_summary),
            episode_summary,
        }
    }

    fn summarize_episodes(&self) -> EpisodeSummary {
        let episodes = self.reports.len();
        let mean = |f: &dyn Fn(&SimulationReport) -> f64| {
            if episodes == 0 {
                0.0
            } else {
                self.reports.iter().map(f).sum::<f64>() / episodes as f64
            }
        };

        let admin_reached = self
            .reports
            .iter()
            .filter(|r| r.final_access_level == AccessLevel::Admin)
            .count();

        let hinted: Vec<&SimulationReport> = self
            .reports
            .iter()
            .filter(|r| r.strategic_hint_used.is_some())
            .collect();
        let hint_success_rate = (!hinted.is_empty()).then(|| {
            hinted.iter().filter(|r| r.hint_success).count() as f64 / hinted.len() as f64
        });

        EpisodeSummary {
            episodes,
            admin_reached,
            admin_rate: if episodes == 0 {
                0.0
            } else {
                admin_reached as f64 / episodes as f64
            },
            average_iterations: mean(&|r| f64::from(r.total_iterations)),
            average_score: mean(&|r| r.score),
            average_reward: mean(&|r| r.total_reward),
            best_score: self
                .reports
                .iter()
                .map(|r| r.score)
                .fold(0.0, f64::max),
            hint_success_rate,
        }
    }

    fn break_down_actions(&self) -> Vec<ActionBreakdown> {
        let mut counts: BTreeMap<AttackAction, (usize, usize)> = BTreeMap::new();
        for step in self.reports.iter().flat_map(|r| &r.attack_path) {
            let entry = counts.entry(step.action).or_default();
            entry.0 += 1;
            if step.success {
                entry.1 += 1;
            }
        }

        let mut breakdown: Vec<ActionBreakdown> = counts
            .into_iter()
            .map(|(action, (attempts, successes))| ActionBreakdown {
                action,
                attempts,
                successes,
                success_rate: successes as f64 / attempts as f64,
            })
            .collect();
        breakdown.sort_by(|a, b| b.successes.cmp(&a.successes).then(b.attempts.cmp(&a.attempts)));
        breakdown
    }

    fn collect_vulnerabilities(&self) -> Vec<String> {
        self.reports
            .iter()
            .flat_map(|r| r.discovered_vulnerabilities.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn generate_recommendations(&self, summary: &EpisodeSummary) -> Vec<String> {
        let mut recommendations = Vec::new();

        if summary.admin_rate > 0.5 {
            recommendations.push(
                "HIGH PRIORITY: Admin access reached in most episodes. Harden privilege boundaries between internal and admin tiers.".to_string()
            );
        }

        if let Some(rate) = summary.hint_success_rate {
            if rate > 0.0 {
                recommendations.push(format!(
                    "HIGH PRIORITY: Public exploits for discovered services succeeded in {:.0}% of hinted episodes. Patch the exposed service versions.",
                    rate * 100.0
                ));
            }
        }

        for vuln in self.collect_vulnerabilities() {
            recommendations.push(format!("Remediate {} findings on exposed services.", vuln));
        }

        if summary.episodes > 0 && summary.average_reward < 0.0 {
            recommendations.push(
                "Negative average reward: the agent is mostly failing or being blocked. Consider more episodes before drawing conclusions.".to_string()
            );
        }

        recommendations
    }

    /// Print summary to console
    pub fn print_summary(&self) {
        let report = self.generate_report();
        let summary = &report.episode_summary;

        println!("\n{}", "=".repeat(80));
        println!("{}", "ATTACK PATH ANALYSIS".bright_cyan().bold());
        println!("{}", "=".repeat(80));

        println!("\n{}", "EPISODES".bright_yellow().bold());
        println!("{}", "-".repeat(80));
        println!("Episodes: {}", summary.episodes);
        println!(
            "Admin reached: {} ({:.1}%)",
            summary.admin_reached,
            summary.admin_rate * 100.0
        );
        println!("Average iterations: {:.1}", summary.average_iterations);
        println!("Average score: {:.2}", summary.average_score);
        println!("Best score: {:.2}", summary.best_score);
        println!("Average reward: {:.2}", summary.average_reward);
        if let Some(rate) = summary.hint_success_rate {
            println!("Hint success rate: {:.1}%", rate * 100.0);
        }

        println!("\n{}", "ACTIONS".bright_yellow().bold());
        println!("{}", "-".repeat(80));
        println!("{}", report.display_table());

        if !report.discovered_vulnerabilities.is_empty() {
            println!("\n{}", "VULNERABILITIES".bright_red().bold());
            println!("{}", "-".repeat(80));
            for vuln in &report.discovered_vulnerabilities {
                println!("  • {}", vuln);
            }
        }

        if !report.recommendations.is_empty() {
            println!("\n{}", "RECOMMENDATIONS".bright_green().bold());
            println!("{}", "-".repeat(80));
            for (i, rec) in report.recommendations.iter().enumerate() {
                println!("{}. {}", i + 1, rec);
            }
        }

        println!("\n{}", "=".repeat(80));
    }

    /// Export analysis to JSON
    pub fn export_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.generate_report())
    }
}

#[derive(Tabled)]
pub struct ActionRow {
    #[tabled(rename = "Action")]
    pub action: String,
    #[tabled(rename = "Attempts")]
    pub attempts: usize,
    #[tabled(rename = "Successes")]
    pub successes: usize,
    #[tabled(rename = "Rate")]
    pub rate: String,
}

impl AnalysisReport {
    /// Per-action breakdown as a table
    pub fn display_table(&self) -> String {
        let rows: Vec<ActionRow> = self
            .action_breakdown
            .iter()
            .map(|b| ActionRow {
                action: b.action.to_string(),
                attempts: b.attempts,
                successes: b.successes,
                rate: format!("{:.1}%", b.success_rate * 100.0),
            })
            .collect();

        Table::new(rows).to_string()
    }
}

#[derive(Tabled)]
pub struct StepRow {
    #[tabled(rename = "#")]
    pub iteration: u32,
    #[tabled(rename = "Action")]
    pub action: String,
    #[tabled(rename = "Result")]
    pub result: String,
    #[tabled(rename = "Level")]
    pub level: String,
    #[tabled(rename = "Reward")]
    pub reward: String,
    #[tabled(rename = "Finding")]
    pub finding: String,
}

/// Step-by-step table of one stored path
pub fn path_table(path: &AttackPathRecord) -> String {
    let rows: Vec<StepRow> = path
        .steps
        .iter()
        .map(|s| StepRow {
            iteration: s.iteration,
            action: if s.hint_matched {
                format!("{} (hint)", s.action)
            } else {
                s.action.to_string()
            },
            result: if s.blocked {
                "blocked"
            } else if s.success {
                "success"
            } else {
                "failed"
            }
            .to_string(),
            level: s.access_level.to_string(),
            reward: format!("{:.1}", s.reward),
            finding: s
                .discovered_vuln
                .clone()
                .or_else(|| s.discovered_entity.clone())
                .unwrap_or_default(),
        })
        .collect();

    Table::new(rows).to_string()
}

#[derive(Tabled)]
pub struct PathRow {
    #[tabled(rename = "ID")]
    pub id: i64,
    #[tabled(rename = "Created")]
    pub created_at: String,
    #[tabled(rename = "Final Level")]
    pub final_level: String,
    #[tabled(rename = "Steps")]
    pub steps: u32,
    #[tabled(rename = "OK/Failed")]
    pub outcome: String,
    #[tabled(rename = "Score")]
    pub score: String,
}

/// Overview table of stored paths
pub fn paths_table(paths: &[AttackPathRecord]) -> String {
    let rows: Vec<PathRow> = paths
        .iter()
        .map(|p| PathRow {
            id: p.id,
            created_at: p.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            final_level: p.final_access_level.to_string(),
            steps: p.total_iterations,
            outcome: format!("{}/{}", p.successful_attacks, p.failed_attacks),
            score: format!("{:.2}", p.score),
        })
        .collect();

    Table::new(rows).to_string()
}

#[derive(Tabled)]
pub struct MetricsRow {
    #[tabled(rename = "Metric")]
    pub name: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[derive(Tabled)]
pub struct TallyRow {
    #[tabled(rename = "Action")]
    pub action: String,
    #[tabled(rename = "Successes")]
    pub successes: i64,
    #[tabled(rename = "Failures")]
    pub failures: i64,
}

/// Store totals followed by per-action tallies
pub fn stats_tables(stats: &StoreStats) -> String {
    let totals = vec![
        MetricsRow {
            name: "Stored paths".to_string(),
            value: stats.total_paths.to_string(),
        },
        MetricsRow {
            name: "Average score".to_string(),
            value: format!("{:.2}", stats.average_score),
        },
        MetricsRow {
            name: "Max score".to_string(),
            value: format!("{:.2}", stats.max_score),
        },
        MetricsRow {
            name: "Successful attacks".to_string(),
            value: stats.total_successful_attacks.to_string(),
        },
        MetricsRow {
            name: "Failed attacks".to_string(),
            value: stats.total_failed_attacks.to_string(),
        },
    ];

    let tallies: Vec<TallyRow> = stats
        .action_statistics
        .iter()
        .map(|t| TallyRow {
            action: t.action_type.clone(),
            successes: t.success_count,
            failures: t.failure_count,
        })
        .collect();

    format!("{}\n{}", Table::new(totals), Table::new(tallies))
}

#[derive(Tabled)]
pub struct HintRow {
    #[tabled(rename = "Action")]
    pub action: String,
    #[tabled(rename = "Confidence")]
    pub confidence: String,
    #[tabled(rename = "CVE")]
    pub cve: String,
    #[tabled(rename = "Exploit")]
    pub exploit: String,
    #[tabled(rename = "Description")]
    pub description: String,
}

pub fn hints_table(hints: &[StrategicHint]) -> String {
    let rows: Vec<HintRow> = hints
        .iter()
        .map(|h| HintRow {
            action: h.action.to_string(),
            confidence: format!("{:.2}", h.confidence),
            cve: h.cve_ref.clone().unwrap_or_else(|| "N/A".to_string()),
            exploit: h.exploit_ref.clone().unwrap_or_default(),
            description: h.description.clone(),
        })
        .collect();

    Table::new(rows).to_string()
}
