pub mod capture;
pub mod id_mapper;
pub mod reconciler;
pub mod remote;
pub mod repository;
pub mod service;
pub mod types;

// Re-exports
pub use capture::{MutationCapture, MutationCaptureImpl};
pub use id_mapper::IdMapper;
pub use reconciler::{IdentityReconciler, ReconcileSummary, Reconciler};
pub use remote::{ApiRemoteDataService, RemoteDataService, RemoteRecord};
pub use service::{SyncService, SyncServiceImpl};
pub use types::{BackoffPolicy, QueueItem, QueueOperation, QueuePayload, SyncConfig, SyncReport};
