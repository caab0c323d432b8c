//! Domain model (IDs, layers, analyses, states, outcomes, audit trail, ...).

pub mod analysis;
pub mod artifact;
pub mod audit;
pub mod errors;
pub mod ids;
pub mod job;
pub mod layer;
pub mod outcome;
pub mod state;
pub mod troubleshoot;

pub use analysis::{AnalysisRecord, AnalysisRequest, ExtentOption, Owner, default_title};
pub use artifact::{ArtifactRef, ReportKind};
pub use audit::AuditRecord;
pub use errors::{ErrorKind, ErrorReport, GeosafeError};
pub use ids::{AnalysisId, AttemptId, LayerId};
pub use job::{BrokerStatus, JobSpec, TaskHandle};
pub use layer::{BBox, LayerMetadata, LayerPurpose, LayerRecord};
pub use outcome::{FailureInfo, JobOutcome, JobOutput};
pub use state::TaskState;
pub use troubleshoot::Troubleshoot;
