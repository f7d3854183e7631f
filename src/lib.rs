pub mod config;
pub mod db;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod mapping;
pub mod models;
pub mod repositories;
pub mod store;

pub use config::Config;
pub use error::{AppError, FetchError, ParseError, PipelineError, WriteError};
pub use fetch::{Fetch, HttpFetcher};
pub use ingest::{
    run_cycle, run_pipeline, CycleReport, MeterSource, PipelineOutcome, SolarSource, Source, Stage,
};
pub use store::{PgStore, Store};
