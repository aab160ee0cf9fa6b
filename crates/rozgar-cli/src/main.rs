use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rozgar_sync::{ExplainRequest, StatRequest};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "rozgar-cli")]
#[command(about = "Rozgar Darpan statistics portal")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API.
    Serve {
        #[arg(long, env = "ROZGAR_WEB_PORT", default_value_t = 8000)]
        port: u16,
    },
    /// Apply database migrations.
    Migrate,
    /// Fetch one fiscal year of statistics and persist new records.
    Fetch {
        #[arg(long)]
        state: String,
        #[arg(long)]
        fiscal_year: String,
        #[arg(long)]
        district: Option<String>,
        #[arg(long)]
        district_code: Option<String>,
        #[arg(long)]
        month: Option<String>,
    },
    /// Explain one record, generating the text only if it is not cached yet.
    Explain {
        /// JSON file holding the record to explain.
        #[arg(long)]
        data: PathBuf,
        #[arg(long)]
        language: Option<String>,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rozgar=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port } => {
            let services = rozgar_sync::build_services_from_env().await?;
            info!(crate_name = rozgar_web::CRATE_NAME, "starting API");
            rozgar_web::serve(services.into(), port).await?;
        }
        Commands::Migrate => {
            rozgar_sync::migrate_from_env().await?;
            println!("migrations applied");
        }
        Commands::Fetch {
            state,
            fiscal_year,
            district,
            district_code,
            month,
        } => {
            let services = rozgar_sync::build_services_from_env().await?;
            let summary = services
                .sync
                .fetch_and_persist(&StatRequest {
                    state_name: Some(state),
                    fiscal_year: Some(fiscal_year),
                    region_name: district,
                    region_code: district_code,
                    month,
                })
                .await?;
            println!(
                "fetch complete: saved={} skipped={} errored={} total={}",
                summary.counts.saved, summary.counts.skipped, summary.counts.errored, summary.total
            );
        }
        Commands::Explain { data, language } => {
            let text = std::fs::read_to_string(&data)
                .with_context(|| format!("reading {}", data.display()))?;
            let data = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", data.display()))?;
            let services = rozgar_sync::build_services_from_env().await?;
            let outcome = services
                .explain
                .explain(ExplainRequest { language, data })
                .await?;
            println!("{}", outcome.response);
            eprintln!("cached={}", outcome.cached);
        }
    }

    Ok(())
}
