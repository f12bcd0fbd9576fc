pub mod domain;
pub mod errors;
pub mod ports;
pub mod session;
pub mod upload;

pub use domain::{
    AnalysisRequest, AnalysisResult, Identity, ImageAsset, ImageKind, Profile, ProfilePatch,
    ProfileState, ResultSource, Session, Solution, SolutionReference, SubscriptionTier,
    TransportPayload, UserRole, ValidationOutcome,
};
pub use errors::{AuthCode, CoreError, CoreResult};
pub use ports::{
    AnalysisBackend, IdentityProvider, ObjectStore, PortResult, ProfileStore, ProfileStream,
};
pub use session::{reduce, SessionEvent, Synchronizer, VerificationOutcome};
pub use upload::{PipelineState, UploadPipeline};
