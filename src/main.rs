mod config;
mod corpus;
mod error;
mod extract;
mod fetcher;
mod filter;
mod merge;
mod orchestrator;
mod pipeline;
mod results;
mod server;
mod session;
mod tender;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::sync::Arc;

use crate::config::ScrapeConfig;
use crate::corpus::latest_corpus;
use crate::filter::{FilterCriteria, FilterEngine};
use crate::results::{is_valid_set_name, ResultStore};

#[derive(Parser)]
#[command(name = "tender-harvester")]
#[command(about = "Scrapes a tender portal into a dated corpus and filters it into named result sets")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API (default)
    Serve,

    /// Run one scrape and merge into today's corpus
    Scrape,

    /// Filter the latest corpus into a named result set
    Filter {
        /// Result set name
        name: String,

        /// Comma-separated keywords (or patterns with --regex)
        #[arg(default_value = "")]
        keywords: String,

        /// Treat keywords as regular expressions
        #[arg(long)]
        regex: bool,

        /// Keep only tenders whose derived state contains this text
        #[arg(long)]
        state: Option<String>,

        /// Earliest date, YYYY-MM-DD
        #[arg(long)]
        from: Option<String>,

        /// Latest date, YYYY-MM-DD
        #[arg(long)]
        to: Option<String>,
    },
}

#[actix_web::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Arc::new(ScrapeConfig::from_env());
    info!("Loaded configuration: {:?}", config);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => server::serve(config).await.context("running HTTP server")?,
        Commands::Scrape => {
            let report = pipeline::run_scrape(config).await?;
            println!("{}", report.describe());
        }
        Commands::Filter { name, keywords, regex, state, from, to } => {
            if !is_valid_set_name(&name) {
                bail!("invalid result set name '{}'", name);
            }
            let corpus = latest_corpus(&config.data_dir)?
                .with_context(|| format!("no tender list found in {}", config.data_dir.display()))?;
            let criteria = FilterCriteria::from_inputs(
                FilterCriteria::parse_keyword_list(&keywords),
                regex,
                state.as_deref(),
                from.as_deref(),
                to.as_deref(),
            );
            let matched = FilterEngine::new(&config).run_file(&corpus, &criteria)?;
            let path = ResultStore::new(config.filtered_dir())
                .save(name.trim(), &matched)
                .await?;
            println!("{} tenders matched, saved to {}", matched.len(), path.display());
        }
    }
    Ok(())
}
