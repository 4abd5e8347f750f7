use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use coinfetch::cli::{Cli, Command};
use coinfetch::config::CoinfetchConfig;
use coinfetch::jobs::prices::CoinQuote;
use coinfetch::jobs::{self, BatchReport, JobContext};
use coinfetch::ui::{self, BatchProgress, LogWriter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let progress = BatchProgress::start(cli.command.name());
    init_tracing(cli.verbose, progress.log_writer());
    let outcome = execute(&cli).await;
    progress.clear();
    let (report, quotes) = outcome?;

    if let Some(quotes) = quotes {
        ui::print_quotes(&quotes);
    }
    progress.summary(&report);
    if cli.json {
        ui::print_report_json(&report);
    }
    Ok(())
}

async fn execute(cli: &Cli) -> Result<(BatchReport, Option<Vec<CoinQuote>>)> {
    let mut config = CoinfetchConfig::load(&cli.config)?;
    cli.apply_overrides(&mut config);
    let ctx = JobContext::from_config(&config)?;
    run(&cli.command, &ctx).await
}

async fn run(command: &Command, ctx: &JobContext) -> Result<(BatchReport, Option<Vec<CoinQuote>>)> {
    let report = match command {
        Command::Icons => jobs::icons::refresh_icons(ctx).await?,
        Command::Names => jobs::names::refresh_names(ctx).await?,
        Command::Ranks => jobs::ranks::backfill_ranks(ctx).await?,
        Command::Content => jobs::content::scrape_content(ctx).await?,
        Command::Ids => jobs::ids::resolve_duplicate_ids(ctx).await?,
        Command::Symbols => jobs::symbols::match_by_symbol(ctx).await?,
        Command::Import { .. } => jobs::import::import_coinbase(ctx).await?,
        Command::Prices { .. } => {
            let (report, quotes) = jobs::prices::price_table(ctx).await?;
            return Ok((report, Some(quotes)));
        }
    };
    Ok((report, None))
}

fn init_tracing(verbose: bool, writer: LogWriter) {
    let default = if verbose { "coinfetch=debug,info" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_target(false)
        .with_writer(writer)
        .init();
}
