use attack_path_lab::analysis;
use attack_path_lab::{ExploitLibrarian, KnowledgeConfig};
use colored::*;

#[tokio::main]
async fn main() {
    // Set ATTACK_LAB_SEARCHSPLOIT=true to query an installed searchsploit
    let config = KnowledgeConfig {
        use_searchsploit: std::env::var("ATTACK_LAB_SEARCHSPLOIT").is_ok_and(|v| v == "true"),
        ..KnowledgeConfig::default()
    };
    let librarian = ExploitLibrarian::from_config(&config).await;

    let services = [
        ("Apache", Some("2.4.49")),
        ("Apache", Some("2.4.50")),
        ("mysql", Some("5.5.1")),
        ("postgresql", Some("10.0")),
        ("redis", Some("6.0.9")),
        ("www-frontend", None),
        ("gopher", None),
    ];

    for (service, version) in services {
        println!(
            "\n{} {} {}",
            "Service:".bright_white().bold(),
            service.bright_yellow(),
            version.unwrap_or("(any version)")
        );

        let hints = librarian.lookup(service, version).await;
        if hints.is_empty() {
            println!("   {}", "no strategic hints".dimmed());
            continue;
        }
        println!("{}", analysis::hints_table(&hints));

        if let Some(best) = librarian.best_hint(service, version).await {
            println!("   Best: {} ({:.2})", best.action.to_string().green(), best.confidence);
        }
    }

    println!("\nCached lookups: {}", librarian.cached_entries().await);
}
