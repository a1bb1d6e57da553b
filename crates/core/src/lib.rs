pub mod config;
pub mod control;
pub mod job;
pub mod metrics;
pub mod orchestrator;
pub mod pool;
pub mod reconcile;
pub mod target;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use control::{BatchEvent, EventBus, JobResult, ProgressSnapshot, ResultStatus, RunState};
pub use job::{
    BulkJobRequest, Checkpoint, JobFilter, JobRecord, JobStatus, JobStore, SqliteJobStore, Stage,
    StoreError,
};
pub use orchestrator::{
    BatchAccepted, BulkOrchestrator, OrchestratorConfig, OrchestratorError, OrchestratorStatus,
};
pub use pool::{PoolError, PoolSlot, PoolStatus, WorkerPool};
pub use reconcile::{ReconciliationEngine, SourceProduct};
pub use target::{
    BridgeClient, BridgeConfig, ListingAgent, TargetConfig, TargetDriver, TargetError,
    TargetManager,
};
