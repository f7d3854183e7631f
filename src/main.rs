use energy_collector::config::Config;
use energy_collector::{db, run_cycle, HttpFetcher, PgStore};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_CONFIG: u8 = 2;

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn load_config() -> Result<Config, anyhow::Error> {
    match std::env::var("APP_CONFIG") {
        Ok(path) if !path.trim().is_empty() => Config::load(path),
        _ => Config::from_env(),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cfg = match load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            init_tracing("info");
            error!("configuration error: {:#}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    init_tracing(&cfg.log_level);

    info!(
        solar = %cfg.solar.url,
        meter = cfg.meter.as_ref().map(|m| m.url.as_str()).unwrap_or("-"),
        timeout_secs = cfg.http.timeout_secs,
        "starting collection cycle"
    );

    let pool = match db::connect(&cfg.database) {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "invalid database settings");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    if cfg.database.ensure_schema {
        if let Err(e) = db::ensure_schema(&pool, cfg.database.timescale).await {
            warn!(error = %e, "could not ensure schema; continuing");
        }
    }

    let fetcher = match HttpFetcher::new(cfg.http.timeout()) {
        Ok(fetcher) => fetcher,
        Err(e) => {
            error!(error = %e, "could not build HTTP client");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    let store = PgStore::new(pool.clone());

    let report = run_cycle(&cfg, &fetcher, &store).await;
    for outcome in report.failed() {
        warn!(
            source = %outcome.source,
            failed_at = ?outcome.failed_at,
            "pipeline did not complete"
        );
    }
    info!(
        pipelines = report.outcomes.len(),
        failed = report.failed().count(),
        "collection cycle finished"
    );

    pool.close().await;
    ExitCode::from(report.exit_code())
}
