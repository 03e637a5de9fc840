//! magpie-validate — run the nine integrity checks against the configured
//! stores, optionally repairing what they find.

use clap::Parser;
use tracing::info;

use magpie_core::config::{load_dotenv, Config};
use magpie_store::db::Db;
use magpie_store::{CategoryStore, ItemStore, QueueStore};
use magpie_validate::Validator;

/// Knowledge-base integrity validator.
#[derive(Parser, Debug)]
#[command(name = "magpie-validate", version, about)]
struct Cli {
    /// Apply repairs instead of only reporting.
    #[arg(long, env = "MAGPIE_VALIDATE_FIX", default_value_t = false)]
    fix: bool,

    /// Emit the full per-check report as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let config = Config::from_env();

    let db = Db::connect(&config.database).await?;
    let validator = Validator::new(
        ItemStore::new(db.clone()),
        QueueStore::new(db.clone()),
        CategoryStore::new(db),
        &config.paths.knowledge_base_dir,
    );

    let summary = validator.run_all(cli.fix).await?;
    let report = summary.health_report();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    for result in &summary.results {
        info!(
            check = result.name,
            valid = result.is_valid,
            issues = result.issue_count,
            fixes = result.fixes_applied,
            "check finished"
        );
        for issue in &result.issues {
            info!(check = result.name, issue = %issue, "issue");
        }
    }
    info!(
        score = report.score,
        status = report.status.as_str(),
        issues = report.total_issues,
        fixes = report.total_fixes,
        "health report"
    );

    if report.total_issues > report.total_fixes {
        std::process::exit(1);
    }
    Ok(())
}
