//! crates/errlens_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any transport or serialization format;
//! the wire-facing record types live in the service adapters.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

//=========================================================================================
// Limits and Thresholds
//=========================================================================================

/// Smallest accepted screenshot, inclusive (1 KiB).
pub const MIN_IMAGE_BYTES: usize = 1024;
/// Largest accepted screenshot, inclusive (10 MiB).
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
/// Images above this byte size are recompressed before submission (2 MiB).
pub const COMPRESSION_THRESHOLD_BYTES: usize = 2 * 1024 * 1024;
/// Longest edge after recompression.
pub const COMPRESSION_MAX_EDGE: u32 = 1920;
/// Minimum width/height in pixels.
pub const MIN_DIMENSION: u32 = 50;
/// Maximum width/height in pixels.
pub const MAX_DIMENSION: u32 = 8000;
/// Maximum length of the free-text context attached to a submission.
pub const MAX_CONTEXT_CHARS: usize = 1000;
/// Analyses granted to free-tier and anonymous users.
pub const FREE_TIER_LIMIT: u32 = 5;

//=========================================================================================
// Image and Submission Types
//=========================================================================================

/// The accepted screenshot media types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl ImageKind {
    pub fn mime(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
            ImageKind::Gif => "image/gif",
            ImageKind::Webp => "image/webp",
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "image/jpeg" | "image/jpg" => Some(ImageKind::Jpeg),
            "image/png" => Some(ImageKind::Png),
            "image/gif" => Some(ImageKind::Gif),
            "image/webp" => Some(ImageKind::Webp),
            _ => None,
        }
    }
}

/// A user-selected candidate error screenshot. Held in memory only; never
/// persisted beyond the current pipeline lifecycle.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    pub bytes: Bytes,
    pub media_type: ImageKind,
}

impl ImageAsset {
    pub fn byte_size(&self) -> usize {
        self.bytes.len()
    }
}

/// The outcome of validating an [`ImageAsset`]: decoded dimensions plus the
/// derived compression flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub width: u32,
    pub height: u32,
    pub needs_compression: bool,
}

/// The text-safe encoding of the (possibly recompressed) image bytes,
/// suitable for embedding in a JSON request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportPayload {
    pub data_url: String,
    pub media_type: ImageKind,
}

impl TransportPayload {
    /// True when the payload carries the expected image data-URL prefix.
    pub fn is_image_data(&self) -> bool {
        self.data_url.starts_with("data:image/")
    }
}

/// The outbound submission unit, constructed from a valid asset at submit
/// time. Single-use; never retried automatically.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub image: String,
    pub context: Option<String>,
    /// Bearer credential; absent on the anonymous quota path.
    pub bearer: Option<String>,
}

//=========================================================================================
// Analysis Result Types
//=========================================================================================

/// Where an [`AnalysisResult`] came from. Offline-fallback results are
/// synthesized locally when the backend is unreachable and must never be
/// mistaken for real diagnoses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSource {
    Backend,
    OfflineFallback,
}

/// A cited source attached to a solution.
#[derive(Debug, Clone, PartialEq)]
pub struct SolutionReference {
    pub title: String,
    pub url: String,
    pub kind: Option<String>,
}

/// One candidate fix. Only `title` and `description` are required; a missing
/// field means "omit in rendering", never an error.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub title: String,
    pub description: String,
    pub steps: Vec<String>,
    pub difficulty: Option<String>,
    pub success_rate: Option<f32>,
    pub time_estimate: Option<String>,
    pub requirements: Option<Vec<String>>,
    pub warnings: Option<Vec<String>>,
    pub references: Option<Vec<SolutionReference>>,
}

/// The normalized diagnosis returned by the analysis backend (or synthesized
/// locally in degraded mode).
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub analysis_id: Option<String>,
    pub problem: Option<String>,
    pub category: Option<String>,
    pub confidence: Option<f32>,
    pub severity: Option<String>,
    pub solutions: Vec<Solution>,
    pub prevention_tips: Option<Vec<String>>,
    pub related_issues: Option<Vec<String>>,
    pub source: ResultSource,
}

//=========================================================================================
// Identity and Profile Types
//=========================================================================================

/// The identity half of a session, owned by the identity provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub uid: Uuid,
    pub email: String,
    pub email_verified: bool,
    /// Session token attached to outbound analysis requests.
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRole {
    User,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionTier {
    Free,
    Pro,
    Enterprise,
}

impl SubscriptionTier {
    pub fn is_pro(&self) -> bool {
        matches!(self, SubscriptionTier::Pro | SubscriptionTier::Enterprise)
    }
}

/// The per-user record in the document store, distinct from the identity
/// provider's credential record.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub uid: Uuid,
    pub display_name: String,
    pub role: UserRole,
    pub subscription: SubscriptionTier,
    pub analysis_count: u32,
    pub total_uploads: u32,
    pub email_verified: bool,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl Profile {
    /// The profile created at registration time, with zeroed usage counters.
    pub fn new_default(uid: Uuid, display_name: &str, email_verified: bool) -> Self {
        Self {
            uid,
            display_name: display_name.to_string(),
            role: UserRole::User,
            subscription: SubscriptionTier::Free,
            analysis_count: 0,
            total_uploads: 0,
            email_verified,
            bio: None,
            avatar_url: None,
            settings: serde_json::Value::Null,
            created_at: Utc::now(),
            last_login_at: None,
        }
    }
}

/// A partial profile update. `None` fields are stripped before merging;
/// validation rejects patches that would blank a required field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfilePatch {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub email_verified: Option<bool>,
    pub settings: Option<serde_json::Value>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.bio.is_none()
            && self.avatar_url.is_none()
            && self.email_verified.is_none()
            && self.settings.is_none()
            && self.last_login_at.is_none()
    }

    /// Merges the set fields into `profile`.
    pub fn apply_to(&self, profile: &mut Profile) {
        if let Some(name) = &self.display_name {
            profile.display_name = name.clone();
        }
        if let Some(bio) = &self.bio {
            profile.bio = Some(bio.clone());
        }
        if let Some(url) = &self.avatar_url {
            profile.avatar_url = Some(url.clone());
        }
        if let Some(verified) = self.email_verified {
            profile.email_verified = verified;
        }
        if let Some(settings) = &self.settings {
            profile.settings = settings.clone();
        }
        if let Some(ts) = self.last_login_at {
            profile.last_login_at = Some(ts);
        }
    }
}

//=========================================================================================
// Session Projection
//=========================================================================================

/// Sub-state of the profile half of an authenticated session.
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileState {
    /// No authenticated user, so no profile either.
    Absent,
    /// Identity resolved; profile fetch in flight.
    Loading,
    Ready(Profile),
    /// Profile fetch failed twice; a minimal synthetic profile stands in so
    /// the UI always has a renderable entitlement state.
    Degraded(Profile),
}

impl ProfileState {
    pub fn profile(&self) -> Option<&Profile> {
        match self {
            ProfileState::Ready(p) | ProfileState::Degraded(p) => Some(p),
            _ => None,
        }
    }
}

/// The reconciled authentication view-model: a read-only projection over the
/// identity provider's record and the profile document, rebuilt whenever
/// either source changes.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user: Option<Identity>,
    pub profile: ProfileState,
    /// Usage consumed on the anonymous quota path (no profile document).
    pub anonymous_count: u32,
}

impl Session {
    pub fn anonymous() -> Self {
        Self {
            user: None,
            profile: ProfileState::Absent,
            anonymous_count: 0,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn is_email_verified(&self) -> bool {
        self.user.as_ref().map(|u| u.email_verified).unwrap_or(false)
    }

    pub fn is_pro(&self) -> bool {
        self.profile
            .profile()
            .map(|p| p.subscription.is_pro())
            .unwrap_or(false)
    }

    pub fn is_admin(&self) -> bool {
        self.profile
            .profile()
            .map(|p| p.role == UserRole::Admin)
            .unwrap_or(false)
    }

    pub fn analysis_count(&self) -> u32 {
        if self.is_authenticated() {
            self.profile.profile().map(|p| p.analysis_count).unwrap_or(0)
        } else {
            self.anonymous_count
        }
    }

    /// `None` means unbounded (pro and enterprise tiers).
    pub fn analysis_limit(&self) -> Option<u32> {
        if self.is_pro() {
            None
        } else {
            Some(FREE_TIER_LIMIT)
        }
    }

    /// The derived entitlement: whether a submission may proceed right now.
    pub fn can_analyze(&self) -> bool {
        match self.analysis_limit() {
            None => true,
            Some(limit) => self.analysis_count() < limit,
        }
    }

    /// The bearer credential for outbound requests, when one is available.
    pub fn token(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.token.as_str())
    }
}
