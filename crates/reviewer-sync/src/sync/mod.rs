pub mod engine;
pub mod merge;
pub mod scheduler;
pub mod status;
pub mod types;
pub mod wire;

pub use engine::{SyncEngine, SyncEngineOptions};
pub use merge::{apply_if_newer, MergeOutcome, RowOutcome};
pub use scheduler::PushScheduler;
pub use status::{SyncStatus, SyncStatusSnapshot};
pub use types::{
    AuthProvider, PullReport, PushReport, RemoteRow, SharedIdentity, SyncErrorKind, SyncPhase,
    SyncReport, SyncTransport, SyncTransportError,
};
pub use wire::WireRecord;
