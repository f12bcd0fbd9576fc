//! crates/errlens_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the
//! core to be independent of the managed external services it orchestrates:
//! the identity platform, the profile document store, the object store, and
//! the backend analysis endpoint.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use uuid::Uuid;

use crate::domain::{AnalysisRequest, AnalysisResult, Identity, Profile, ProfilePatch};
use crate::errors::CoreError;

/// A convenience type alias for port operation results. All ports speak the
/// shared error taxonomy so typed failures survive the boundary intact.
pub type PortResult<T> = Result<T, CoreError>;

/// A live feed of remote changes to one profile document.
pub type ProfileStream = Pin<Box<dyn Stream<Item = Profile> + Send>>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// The identity platform: credential storage, token issuance, and the
/// verification / reset email machinery are all delegated to it.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> PortResult<Identity>;

    async fn sign_in(&self, email: &str, password: &str) -> PortResult<Identity>;

    /// Federated sign-in (provider-managed popup/redirect flow).
    async fn sign_in_federated(&self) -> PortResult<Identity>;

    async fn sign_out(&self) -> PortResult<()>;

    /// Requests a verification email for the given account.
    async fn send_verification(&self, uid: Uuid) -> PortResult<()>;

    /// Requests a password-reset email for the given address.
    async fn send_password_reset(&self, email: &str) -> PortResult<()>;
}

/// The document store holding per-user profile records, keyed by uid.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Point read. `Ok(None)` means the document does not exist (as opposed
    /// to a transient store failure, which is an `Err`).
    async fn get_profile(&self, uid: Uuid) -> PortResult<Option<Profile>>;

    async fn create_profile(&self, profile: &Profile) -> PortResult<()>;

    /// Merges the set fields of `patch` into the stored document.
    async fn patch_profile(&self, uid: Uuid, patch: &ProfilePatch) -> PortResult<()>;

    /// Atomic read-modify-write of the usage counter. Returns the new count.
    async fn increment_usage(&self, uid: Uuid) -> PortResult<u32>;

    /// Live subscription to remote changes of this document. The stream ends
    /// when the store drops the subscription; callers tear it down on
    /// sign-out or uid change.
    async fn subscribe(&self, uid: Uuid) -> PortResult<ProfileStream>;
}

/// The object store for uploaded blobs (avatars). Returns a retrieval URL.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, path: &str, bytes: Bytes, content_type: &str) -> PortResult<String>;
}

/// The backend analysis REST service.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Submits one analysis request. Implementations must map transport
    /// failures onto the taxonomy: a connectivity failure is
    /// `CoreError::Unreachable` (eligible for offline fallback), a timeout is
    /// `CoreError::Timeout`, and server-returned statuses map
    /// deterministically onto the remaining variants.
    async fn analyze(&self, request: &AnalysisRequest) -> PortResult<AnalysisResult>;

    /// Health probe. Implementations retry a bounded number of times before
    /// declaring the backend offline.
    async fn health(&self) -> PortResult<()>;
}
