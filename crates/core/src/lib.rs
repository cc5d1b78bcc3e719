pub mod archive;
pub mod config;
pub mod converter;
pub mod job;
pub mod metrics;
pub mod orchestrator;
pub mod testing;
pub mod workspace;

pub use archive::{ArchiveError, EntryKind, ExtractedEntry};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, DatabaseConfig,
    ServerConfig, StorageConfig,
};
pub use converter::{
    ConversionJob, ConversionResult, Converter, ConverterConfig, ConverterError,
    LibreOfficeConverter,
};
pub use job::{
    Job, JobFilter, JobSnapshot, JobStatus, JobStore, JobStoreError, SqliteJobStore, Unit,
    UnitStatus, INVALID_DOCUMENT_MESSAGE, TIMEOUT_MESSAGE, UNRECORDED_OUTCOME_MESSAGE,
};
pub use orchestrator::{
    BatchOrchestrator, OrchestratorConfig, OrchestratorError, OrchestratorStatus, RecoveryReport,
};
pub use workspace::Workspace;
