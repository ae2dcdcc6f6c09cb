//! Event routing, shard workers and the engine facade used by the API.

pub mod accounts;
pub mod ingest;
pub mod orchestrator;
mod shard;

pub use accounts::AccountDirectory;
pub use ingest::{Accepted, FoldMode, IngestStats, IngestStatsSnapshot, Rejected};
pub use orchestrator::{
    AccountRegistration, BootstrapReport, Engine, EngineError, EngineStats, HistoryReport,
    RecomputeReport, TrendQuery,
};
