//! Top-level CLI binary (spec §6). Parses flags, loads `retailers.yaml`,
//! and fans out bounded-concurrency harvest runs. Exit codes: 0 all
//! succeeded, 1 partial failure, 2 config/validation error, 3 fatal error.
//! Grounded on the teacher's `rootsignal-scout-supervisor` `main.rs`:
//! config load -> logging init -> dispatch -> process::exit(code).

use std::path::PathBuf;

use clap::Parser;
use futures::stream::{self, StreamExt};
use harvester_common::{config::parse_and_validate, Config, ProxyMode};
use harvester_orchestrator::{run_retailer, select_retailers, CliOverrides, RunOutcomeStatus};
use harvester_tracker::RunTracker;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "harvester-orchestrator", about = "Multi-retailer store-locator harvester")]
struct Cli {
    /// Run every enabled retailer.
    #[arg(long)]
    all: bool,

    /// Run one or more specific retailers by config key. Repeatable.
    #[arg(long = "retailer")]
    retailers: Vec<String>,

    /// Run every enabled retailer in this group.
    #[arg(long)]
    group: Option<String>,

    /// Exclude these retailer keys from whatever selection was made.
    #[arg(long = "exclude")]
    excludes: Vec<String>,

    /// Resume from a previously saved checkpoint rather than starting cold.
    #[arg(long)]
    resume: bool,

    /// Skip stores already present in stores_latest.json.
    #[arg(long)]
    incremental: bool,

    /// Cap the number of extracted stores per retailer (smoke-testing aid).
    #[arg(long)]
    limit: Option<usize>,

    /// Run without persisting stores/checkpoints/change reports to disk.
    #[arg(long)]
    test: bool,

    /// Override the configured proxy mode for this invocation.
    #[arg(long, value_enum)]
    proxy: Option<CliProxyMode>,

    /// Request JS rendering. Only valid with `--proxy web-scraper-api`.
    #[arg(long)]
    render_js: bool,

    /// Residential proxy exit country, when proxy mode supports it.
    #[arg(long)]
    proxy_country: Option<String>,

    /// Print the persisted run status for the selected retailers and exit.
    #[arg(long)]
    status: bool,

    /// Validate `config/retailers.yaml` and exit without running anything.
    #[arg(long)]
    validate: bool,

    /// Path to the retailers config file.
    #[arg(long, default_value = "config/retailers.yaml")]
    config: PathBuf,

    #[arg(long)]
    verbose: bool,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy)]
enum CliProxyMode {
    Direct,
    Residential,
    WebScraperApi,
}

impl From<CliProxyMode> for ProxyMode {
    fn from(m: CliProxyMode) -> Self {
        match m {
            CliProxyMode::Direct => ProxyMode::Direct,
            CliProxyMode::Residential => ProxyMode::Residential,
            CliProxyMode::WebScraperApi => ProxyMode::WebScraperApi,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let global = Config::from_env();
    if std::env::var("RUST_LOG").is_err() {
        let level = if cli.verbose { "debug" } else { &global.log_level };
        std::env::set_var("RUST_LOG", level);
    }
    harvester_common::logging::init_logging(false);
    global.log_redacted();

    let code = run(cli, global).await;
    std::process::exit(code);
}

async fn run(cli: Cli, global: Config) -> i32 {
    let yaml = match std::fs::read_to_string(&cli.config) {
        Ok(y) => y,
        Err(e) => {
            error!(path = %cli.config.display(), error = %e, "failed to read retailers config");
            return 2;
        }
    };

    let retailers_file = match parse_and_validate(&yaml) {
        Ok(f) => f,
        Err(errors) => {
            for e in &errors {
                error!("{e}");
            }
            return 2;
        }
    };

    if cli.validate {
        info!("config/retailers.yaml is valid");
        return 0;
    }

    let selected = select_retailers(&retailers_file, cli.all, &cli.retailers, &cli.group, &cli.excludes);
    if selected.is_empty() {
        error!("no retailers matched the given selection (--all/--retailer/--group)");
        return 2;
    }

    if cli.status {
        for key in &selected {
            let runs = RunTracker::list_runs(&global.data_dir, key);
            match runs.last() {
                Some(latest) => info!(
                    retailer = %key,
                    run_id = %latest.run_id,
                    status = ?latest.status,
                    phase = %latest.phase,
                    "last run status"
                ),
                None => info!(retailer = %key, "no runs recorded yet"),
            }
        }
        return 0;
    }

    let proxy_override = cli.proxy.map(ProxyMode::from);
    if let Err(e) = Config::validate_render_js(cli.render_js, proxy_override.unwrap_or(global.proxy_mode)) {
        error!("{e}");
        return 2;
    }

    let overrides = CliOverrides {
        resume: cli.resume,
        incremental: cli.incremental,
        limit: cli.limit,
        test_mode: cli.test,
        proxy: proxy_override,
        render_js: cli.render_js,
        proxy_country: cli.proxy_country.clone(),
    };

    let data_dir = PathBuf::from(&global.data_dir);
    let concurrency = global.top_level_concurrency.max(1);

    let results = stream::iter(selected.into_iter().map(|key| {
        let cfg = retailers_file.retailers.get(&key).expect("key came from this file").clone();
        let global = global.clone();
        let data_dir = data_dir.clone();
        let overrides = overrides.clone();
        async move {
            info!(retailer = %key, "starting harvest run");
            match run_retailer(&global, &data_dir, &key, &cfg, &overrides, None).await {
                Ok(summary) => summary,
                Err(e) => {
                    error!(retailer = %key, error = %e, "run_retailer returned a fatal error");
                    harvester_orchestrator::RetailerRunSummary {
                        retailer: key,
                        run_id: String::new(),
                        status: RunOutcomeStatus::Failed,
                        stats: Default::default(),
                        error: Some(e.to_string()),
                    }
                }
            }
        }
    }))
    .buffer_unordered(concurrency)
    .collect::<Vec<_>>()
    .await;

    let mut any_failed = false;
    for summary in &results {
        match summary.status {
            RunOutcomeStatus::Complete => info!(
                retailer = %summary.retailer,
                run_id = %summary.run_id,
                new = summary.stats.new,
                closed = summary.stats.closed,
                modified = summary.stats.modified,
                "run complete"
            ),
            RunOutcomeStatus::Failed => {
                any_failed = true;
                error!(retailer = %summary.retailer, error = ?summary.error, "run failed");
            }
        }
    }

    if any_failed {
        1
    } else {
        0
    }
}
