pub mod audit;
pub mod config;
pub mod dispatcher;
pub mod fetcher;
pub mod locator;
pub mod metrics;
pub mod packager;
pub mod publisher;
pub mod request;
pub mod submission;
pub mod testing;

pub use audit::{
    create_audit_system, AuditError, AuditEvent, AuditFilter, AuditHandle, AuditRecord,
    AuditStore, AuditWriter, SqliteAuditStore,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use dispatcher::{
    DispatchSignal, Dispatcher, DispatcherConfig, DispatcherError, DispatcherStatus,
    FanoutNotifier, LogNotifier, Notice, NoticeKind, Notifier, PipelineError, PipelineOutcome,
    PipelineStages, WorkspaceMode,
};
pub use fetcher::{FetchError, Fetcher, FetcherConfig, SubprocessFetcher, TrackListing};
pub use locator::{ArtifactLocator, LocatorError, LocatorPolicy};
pub use packager::{PackageError, PackagedArchive, Packager, PackagerConfig, ZipPackager};
pub use publisher::{PublishError, Publisher, PublisherConfig, SubprocessPublisher};
pub use request::{
    CreateRequest, Request, RequestFilter, RequestStatus, RequestStore, RequestStoreError,
    Selection, SqliteRequestStore, TrackSelection, ValidationError,
};
pub use submission::{
    PendingSelection, PendingSelectionStore, SqlitePendingSelectionStore, SubmissionConfig,
    SubmissionError, SubmissionService,
};
