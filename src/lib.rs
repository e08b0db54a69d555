pub mod api;
pub mod config;
pub mod error;
pub mod flow;
pub mod orchestrator;
pub mod upload;
pub mod utils;

// Re-export the main error types for convenience
pub use error::{LiftError, LiftResult};

pub use api::auth::{
    AuthError, AuthSession, KeyringTokenStore, MemoryTokenStore, TokenKind, TokenSet, TokenStore,
};
pub use api::jobs::{Job, JobResults, JobStatus, JobsClient, ResultName, ResultUrl, UploadTarget};
pub use api::transport::{ApiError, AuthenticatedTransport, HttpMethod};

pub use config::{AppConfig, ConfigManager};
pub use flow::{FlowState, LiftType, UploadFlowController, ValidationError};
pub use orchestrator::{JobOrchestrator, PollPolicy};
pub use upload::{BinaryUploader, ProgressListener, UploadError, VideoSource};
