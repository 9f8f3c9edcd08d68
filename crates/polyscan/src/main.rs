use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands::*, TraceLevel};
use dotenv::dotenv;
use polyscan_warehouse::pipeline::{self, Output};
use polyscan_warehouse::{Credential, FetchConfig, IngestError, Polygon, RetryPolicy, SchemaMode};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, subscriber, trace, warn, Level};
use tracing_subscriber::FmtSubscriber;

mod cli;
mod view;

fn preprocess(trace_level: Level) -> Result<()> {
    dotenv().ok();
    let my_subscriber = FmtSubscriber::builder()
        .with_max_level(trace_level)
        .finish();
    subscriber::set_global_default(my_subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.trace {
        TraceLevel::DEBUG => Level::DEBUG,
        TraceLevel::INFO => Level::INFO,
        TraceLevel::WARN => Level::WARN,
        TraceLevel::ERROR => Level::ERROR,
    };

    preprocess(log_level)?;
    trace!("Command line input recorded: {cli:#?}");

    ////////////////////////////////////////////////////////////////////////////////////////////////////

    // cli framework:
    // "> polyscan <COMMAND>"
    match &cli.command {
        // "> polyscan fetch [--dir DIR] [--out FILE] ..."
        // page through the ticker listing & save it
        Fetch(args) => fetch(args).await?,

        // "> polyscan ls [--dir DIR]"
        Ls { dir } => view::list(dir)?,

        // "> polyscan summary [FILE]"
        Summary { source, top } => {
            let path = view::resolve(source)?;
            view::summary(&path, *top)?;
        }

        // "> polyscan search [FILE] [--exchange X] [--type X] [--market X] [-q QUERY]"
        Search(args) => view::search(args)?,
    }

    Ok(())
}

async fn fetch(args: &cli::FetchArgs) -> Result<()> {
    info!("Loading API key");
    let credential = Credential::from_env()?;

    let config = FetchConfig {
        page_size: args.page_size,
        page_delay: Duration::from_millis(args.page_delay_ms),
        retry: RetryPolicy {
            delay: Duration::from_secs(args.retry_delay_secs),
            max_attempts: args.max_retries,
            max_elapsed: args.max_retry_wait_secs.map(Duration::from_secs),
        },
        ..FetchConfig::from_env()?
    };
    debug!("Fetch configuration: {config:?}");

    let output = Output {
        dir: args.dir.clone(),
        path: args.out.clone(),
        schema: match args.schema {
            cli::Schema::Union => SchemaMode::Union,
            cli::Schema::First => SchemaMode::First,
        },
    };

    let http_client = reqwest::ClientBuilder::new()
        .user_agent(concat!("polyscan/", env!("CARGO_PKG_VERSION")))
        .build()?;

    // Ctrl-C aborts the run, even mid back-off
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling the fetch");
            interrupt.cancel();
        }
    });

    let polygon = Polygon::new(credential, config).with_progress(polyscan_util::page_spinner());
    match pipeline::run(&http_client, &polygon, &output, &cancel).await {
        Ok(report) => {
            info!(
                "Successfully saved {} stock tickers across {} pages to {}",
                report.export.rows,
                report.pages,
                report.export.path.display()
            );
            Ok(())
        }
        Err(IngestError::EmptyDataset) => {
            error!("The API returned no tickers; nothing was saved");
            Err(IngestError::EmptyDataset.into())
        }
        Err(e) => {
            error!("Failed to fetch data: {e}");
            Err(e.into())
        }
    }
}
