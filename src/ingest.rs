use crate::config::Config;
use crate::error::{ParseError, PipelineError, WriteError};
use crate::fetch::Fetch;
use crate::mapping::{parse_meter, parse_solar};
use crate::models::{CollectionLogEntry, CollectionStatus, MeterReading, SolarReading, SourceKind};
use crate::store::Store;
use chrono::{DateTime, Utc};
use std::fmt::Display;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// One device endpoint: how its payload is decoded and where it is written.
#[allow(async_fn_in_trait)]
pub trait Source {
    type Record;

    fn kind(&self) -> SourceKind;

    fn url(&self) -> &str;

    fn parse(&self, body: &[u8], ts: DateTime<Utc>) -> Result<Self::Record, ParseError>;

    async fn persist<S: Store>(&self, store: &S, record: &Self::Record) -> Result<(), WriteError>;

    /// One-line description of a stored record for the process log.
    fn summary(&self, record: &Self::Record) -> String;
}

pub struct SolarSource {
    url: String,
}

impl SolarSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Source for SolarSource {
    type Record = SolarReading;

    fn kind(&self) -> SourceKind {
        SourceKind::Solar
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn parse(&self, body: &[u8], ts: DateTime<Utc>) -> Result<SolarReading, ParseError> {
        parse_solar(body, ts)
    }

    async fn persist<S: Store>(&self, store: &S, record: &SolarReading) -> Result<(), WriteError> {
        store.write_solar(record).await
    }

    fn summary(&self, r: &SolarReading) -> String {
        format!(
            "power={}W temp={}°C today={}kWh",
            opt(r.p_ac),
            opt(r.temp),
            opt(r.e_today)
        )
    }
}

pub struct MeterSource {
    url: String,
}

impl MeterSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Source for MeterSource {
    type Record = MeterReading;

    fn kind(&self) -> SourceKind {
        SourceKind::Meter
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn parse(&self, body: &[u8], ts: DateTime<Utc>) -> Result<MeterReading, ParseError> {
        parse_meter(body, ts)
    }

    async fn persist<S: Store>(&self, store: &S, record: &MeterReading) -> Result<(), WriteError> {
        let device_id = store.write_meter(record).await?;
        debug!(device_id, unique_id = %record.device.unique_id, "meter reading linked to device");
        Ok(())
    }

    fn summary(&self, r: &MeterReading) -> String {
        format!(
            "power={}W tariff={} import={}kWh",
            r.active_power_w,
            opt(r.active_tariff),
            opt(r.total_power_import_kwh)
        )
    }
}

fn opt<T: Display>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| "-".into())
}

/// Pipeline progress. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Fetching,
    Parsing,
    Persisting,
    Done,
    Failed,
}

#[derive(Debug)]
pub struct PipelineOutcome {
    pub source: SourceKind,
    pub stage: Stage,
    /// Stage the pipeline was in when it failed.
    pub failed_at: Option<Stage>,
    pub error: Option<PipelineError>,
    pub duration: Duration,
    /// Whether the collection log row made it to the store.
    pub logged: bool,
}

impl PipelineOutcome {
    pub fn succeeded(&self) -> bool {
        self.stage == Stage::Done
    }
}

/// Fetch, parse and persist one source, then record the attempt in the
/// collection log. Never returns an error: every failure is folded into the
/// outcome so the other source is unaffected.
pub async fn run_pipeline<F, S, P>(fetcher: &F, store: &S, source: &P) -> PipelineOutcome
where
    F: Fetch,
    S: Store,
    P: Source,
{
    let kind = source.kind();
    let ts = Utc::now();
    let started = Instant::now();
    let mut stage = Stage::Idle;

    let result = collect(fetcher, store, source, ts, &mut stage).await;
    let duration = started.elapsed();
    let elapsed_ms = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);

    let (entry, failed_at, err) = match result {
        Ok(summary) => {
            info!(source = %kind, elapsed_ms, "collected: {}", summary);
            (CollectionLogEntry::success(ts, kind, elapsed_ms), None, None)
        }
        Err(e) => {
            error!(source = %kind, stage = ?stage, elapsed_ms, error = %e, "collection failed");
            (
                CollectionLogEntry::failure(ts, kind, e.to_string(), elapsed_ms),
                Some(stage),
                Some(e),
            )
        }
    };

    let logged = match store.write_log(&entry).await {
        Ok(()) => true,
        Err(e) => {
            error!(
                source = %kind,
                status = entry.status.as_str(),
                error = %e,
                "could not write collection log entry"
            );
            false
        }
    };

    PipelineOutcome {
        source: kind,
        stage: match entry.status {
            CollectionStatus::Success => Stage::Done,
            CollectionStatus::Failure => Stage::Failed,
        },
        failed_at,
        error: err,
        duration,
        logged,
    }
}

async fn collect<F, S, P>(
    fetcher: &F,
    store: &S,
    source: &P,
    ts: DateTime<Utc>,
    stage: &mut Stage,
) -> Result<String, PipelineError>
where
    F: Fetch,
    S: Store,
    P: Source,
{
    advance(stage, Stage::Fetching, source.kind());
    let body = fetcher.fetch(source.url()).await?;

    advance(stage, Stage::Parsing, source.kind());
    let record = source.parse(&body, ts)?;

    advance(stage, Stage::Persisting, source.kind());
    source.persist(store, &record).await?;

    Ok(source.summary(&record))
}

fn advance(stage: &mut Stage, next: Stage, kind: SourceKind) {
    debug!(source = %kind, from = ?*stage, to = ?next, "pipeline stage");
    *stage = next;
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub outcomes: Vec<PipelineOutcome>,
}

impl CycleReport {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(PipelineOutcome::succeeded)
    }

    pub fn failed(&self) -> impl Iterator<Item = &PipelineOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }

    /// 0 when every configured pipeline succeeded, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.all_succeeded() {
            0
        } else {
            1
        }
    }
}

/// One collection cycle: the solar pipeline, then the meter pipeline when a
/// meter endpoint is configured.
pub async fn run_cycle<F, S>(cfg: &Config, fetcher: &F, store: &S) -> CycleReport
where
    F: Fetch,
    S: Store,
{
    let mut report = CycleReport::default();

    let solar = SolarSource::new(cfg.solar.url.clone());
    report.outcomes.push(run_pipeline(fetcher, store, &solar).await);

    match &cfg.meter {
        Some(meter_cfg) => {
            let meter = MeterSource::new(meter_cfg.url.clone());
            report.outcomes.push(run_pipeline(fetcher, store, &meter).await);
        }
        None => debug!("no meter endpoint configured; skipping meter pipeline"),
    }

    report
}


#[cfg(test)]
mod tests {
    use super::testing::{MemoryStore, StubFetcher};
    use super::*;
    use crate::config::{DbConfig, EndpointConfig, HttpConfig};
    use crate::error::FetchError;

    const SOLAR_URL: &str = "http://inverter.test/real_time_data.xml";
    const METER_URL: &str = "http://p1.test/api/v1/data";

    const SOLAR_XML: &[u8] = b"<real_time_data><state>Normal</state><p-ac>1520</p-ac>\
<temp>41.3</temp><e-today>4.2</e-today><pac2>-</pac2></real_time_data>";
    const METER_JSON: &[u8] =
        br#"{"unique_id":"4E47434B","meter_model":"ISKRA","active_power_w":-543,"active_tariff":2}"#;

    fn config(with_meter: bool) -> Config {
        Config {
            solar: EndpointConfig {
                url: SOLAR_URL.into(),
            },
            meter: with_meter.then(|| EndpointConfig {
                url: METER_URL.into(),
            }),
            http: HttpConfig::default(),
            database: DbConfig::default(),
            log_level: "debug".into(),
        }
    }

    #[tokio::test]
    async fn test_both_pipelines_succeed() {
        let fetcher = StubFetcher::default()
            .respond(SOLAR_URL, Ok(SOLAR_XML))
            .respond(METER_URL, Ok(METER_JSON));
        let store = MemoryStore::default();

        let report = run_cycle(&config(true), &fetcher, &store).await;

        assert!(report.all_succeeded());
        assert_eq!(report.exit_code(), 0);
        let state = store.state.lock().unwrap();
        assert_eq!(state.solar.len(), 1);
        assert_eq!(state.solar[0].pac2, None);
        assert_eq!(state.meter.len(), 1);
        assert_eq!(state.logs.len(), 2);
        assert!(state
            .logs
            .iter()
            .all(|l| l.status == CollectionStatus::Success && l.error.is_none()));
    }

    #[tokio::test]
    async fn test_solar_timeout_does_not_affect_meter() {
        let fetcher = StubFetcher::default()
            .respond(SOLAR_URL, Err(FetchError::Timeout(Duration::from_secs(10))))
            .respond(METER_URL, Ok(METER_JSON));
        let store = MemoryStore::default();

        let report = run_cycle(&config(true), &fetcher, &store).await;

        assert_eq!(report.exit_code(), 1);
        let failed: Vec<_> = report.failed().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].source, SourceKind::Solar);
        assert_eq!(failed[0].failed_at, Some(Stage::Fetching));

        let state = store.state.lock().unwrap();
        assert!(state.solar.is_empty());
        assert_eq!(state.meter.len(), 1);

        let failures: Vec<_> = state
            .logs
            .iter()
            .filter(|l| l.status == CollectionStatus::Failure)
            .collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].source, SourceKind::Solar);
        assert!(failures[0].error.as_deref().unwrap().contains("fetch failed"));
    }

    #[tokio::test]
    async fn test_malformed_xml_is_isolated() {
        let fetcher = StubFetcher::default()
            .respond(SOLAR_URL, Ok(b"<real_time_data><state>Normal</sta"))
            .respond(METER_URL, Ok(METER_JSON));
        let store = MemoryStore::default();

        let report = run_cycle(&config(true), &fetcher, &store).await;

        assert_eq!(report.outcomes[0].failed_at, Some(Stage::Parsing));
        assert!(report.outcomes[1].succeeded());

        let state = store.state.lock().unwrap();
        assert!(state.solar.is_empty());
        assert_eq!(state.meter.len(), 1);
        let solar_log = state
            .logs
            .iter()
            .find(|l| l.source == SourceKind::Solar)
            .unwrap();
        assert_eq!(solar_log.status, CollectionStatus::Failure);
        assert!(solar_log.error.as_deref().unwrap().contains("malformed"));
        assert_eq!(solar_log.records_processed, 0);
    }

    #[tokio::test]
    async fn test_same_device_twice_is_upserted() {
        let fetcher = StubFetcher::default()
            .respond(SOLAR_URL, Ok(SOLAR_XML))
            .respond(METER_URL, Ok(METER_JSON));
        let store = MemoryStore::default();
        let cfg = config(true);

        run_cycle(&cfg, &fetcher, &store).await;
        run_cycle(&cfg, &fetcher, &store).await;

        let state = store.state.lock().unwrap();
        assert_eq!(state.devices.len(), 1);
        assert_eq!(state.meter.len(), 2);
        assert!(state.meter.iter().all(|(id, _)| *id == state.devices[0].0));
    }

    #[tokio::test]
    async fn test_meter_pipeline_skipped_without_endpoint() {
        let fetcher = StubFetcher::default().respond(SOLAR_URL, Ok(SOLAR_XML));
        let store = MemoryStore::default();

        let report = run_cycle(&config(false), &fetcher, &store).await;

        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].source, SourceKind::Solar);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(store.state.lock().unwrap().logs.len(), 1);
    }

    #[tokio::test]
    async fn test_write_failure_still_logs() {
        let fetcher = StubFetcher::default().respond(SOLAR_URL, Ok(SOLAR_XML));
        let store = MemoryStore {
            fail_readings: true,
            ..Default::default()
        };

        let outcome = run_pipeline(&fetcher, &store, &SolarSource::new(SOLAR_URL)).await;

        assert_eq!(outcome.stage, Stage::Failed);
        assert_eq!(outcome.failed_at, Some(Stage::Persisting));
        assert!(outcome.logged);
        let state = store.state.lock().unwrap();
        assert_eq!(state.logs.len(), 1);
        assert!(state.logs[0]
            .error
            .as_deref()
            .unwrap()
            .starts_with("write failed: store unavailable"));
    }

    #[tokio::test]
    async fn test_log_write_failure_does_not_fail_pipeline() {
        let fetcher = StubFetcher::default().respond(SOLAR_URL, Ok(SOLAR_XML));
        let store = MemoryStore {
            fail_logs: true,
            ..Default::default()
        };

        let outcome = run_pipeline(&fetcher, &store, &SolarSource::new(SOLAR_URL)).await;

        assert!(outcome.succeeded());
        assert!(!outcome.logged);
        assert_eq!(store.state.lock().unwrap().solar.len(), 1);
    }

    #[tokio::test]
    async fn test_log_write_failure_keeps_pipeline_error() {
        let fetcher = StubFetcher::default()
            .respond(SOLAR_URL, Err(FetchError::HttpStatus(500)));
        let store = MemoryStore {
            fail_logs: true,
            ..Default::default()
        };

        let outcome = run_pipeline(&fetcher, &store, &SolarSource::new(SOLAR_URL)).await;

        assert_eq!(outcome.stage, Stage::Failed);
        assert!(matches!(
            outcome.error,
            Some(PipelineError::Fetch(FetchError::HttpStatus(500)))
        ));
    }

    #[test]
    fn test_summaries_show_absent_values() {
        let reading = SolarReading {
            p_ac: Some(800),
            ..Default::default()
        };
        assert_eq!(
            SolarSource::new(SOLAR_URL).summary(&reading),
            "power=800W temp=-°C today=-kWh"
        );
    }
}
