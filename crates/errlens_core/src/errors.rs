//! crates/errlens_core/src/errors.rs
//!
//! The shared error taxonomy for the core subsystems, plus the static
//! provider-code-to-human-message table for authentication failures.
//! Raw provider codes are never shown to users.

use thiserror::Error;

/// Identity-provider error codes, normalized from whatever the provider
/// returned on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthCode {
    InvalidCredentials,
    UserNotFound,
    EmailAlreadyInUse,
    WeakPassword,
    TooManyRequests,
    PopupClosed,
    NetworkFailure,
    RequiresRecentLogin,
    NotAuthenticated,
    Unknown,
}

impl AuthCode {
    /// Normalizes a raw provider code string.
    pub fn from_provider(code: &str) -> Self {
        match code {
            "auth/invalid-credential" | "auth/wrong-password" => AuthCode::InvalidCredentials,
            "auth/user-not-found" => AuthCode::UserNotFound,
            "auth/email-already-in-use" => AuthCode::EmailAlreadyInUse,
            "auth/weak-password" => AuthCode::WeakPassword,
            "auth/too-many-requests" => AuthCode::TooManyRequests,
            "auth/popup-closed-by-user" => AuthCode::PopupClosed,
            "auth/network-request-failed" => AuthCode::NetworkFailure,
            "auth/requires-recent-login" => AuthCode::RequiresRecentLogin,
            _ => AuthCode::Unknown,
        }
    }

    /// The fixed human-readable message table.
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthCode::InvalidCredentials => "Incorrect email or password.",
            AuthCode::UserNotFound => "No account exists with this email.",
            AuthCode::EmailAlreadyInUse => "An account with this email already exists.",
            AuthCode::WeakPassword => "Password must be at least 6 characters.",
            AuthCode::TooManyRequests => {
                "Too many failed attempts. Please try again in a few minutes."
            }
            AuthCode::PopupClosed => "Sign-in was cancelled before it completed.",
            AuthCode::NetworkFailure => "Could not reach the sign-in service. Check your connection.",
            AuthCode::RequiresRecentLogin => "Please sign in again to complete this action.",
            AuthCode::NotAuthenticated => "You need to be signed in to do that.",
            AuthCode::Unknown => "Sign-in failed. Please try again.",
        }
    }
}

/// The error taxonomy shared by the upload pipeline and the session
/// synchronizer. Validation and processing errors are user-correctable and
/// surfaced inline; the network-shaped variants map from backend responses.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The selected file failed local validation (type, size, dimensions,
    /// or undecodable content).
    #[error("Invalid file: {0}")]
    InvalidFile(String),

    /// Bad input to an operation, user-correctable.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Credential or permission failure, carrying the normalized provider code.
    #[error("Authentication error: {}", .0.user_message())]
    Auth(AuthCode),

    /// The backend refused the request with HTTP 429.
    #[error("Rate limited")]
    RateLimited,

    /// The backend reported itself unavailable (HTTP 503).
    #[error("Service unavailable")]
    ServiceUnavailable,

    /// The request timed out before the backend responded.
    #[error("Request timed out")]
    Timeout,

    /// Local compression or encoding failed; the original asset is untouched.
    #[error("Processing error: {0}")]
    Processing(String),

    /// The service could not be reached at all (connectivity failure, as
    /// opposed to a server-returned error). May trigger offline fallback.
    #[error("Service unreachable: {0}")]
    Unreachable(String),

    /// A requested record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Catch-all for unexpected failures, including other 5xx responses.
    #[error("An unexpected error occurred: {0}")]
    Unknown(String),
}

impl CoreError {
    /// The message shown to the user for this failure. Auth errors go through
    /// the [`AuthCode`] table; everything else has a fixed string.
    pub fn user_message(&self) -> String {
        match self {
            CoreError::InvalidFile(msg) | CoreError::Validation(msg) => msg.clone(),
            CoreError::Auth(code) => code.user_message().to_string(),
            CoreError::RateLimited => {
                "You've made too many requests. Please wait a moment before trying again."
                    .to_string()
            }
            CoreError::ServiceUnavailable => {
                "The analysis service is temporarily unavailable. Please try again shortly."
                    .to_string()
            }
            CoreError::Timeout => {
                "The analysis took too long to respond. Please try again.".to_string()
            }
            CoreError::Processing(_) => {
                "We couldn't process this image. Please try a different file.".to_string()
            }
            CoreError::Unreachable(_) => {
                "Could not reach the analysis service. Check your connection.".to_string()
            }
            CoreError::NotFound(msg) => msg.clone(),
            CoreError::Unknown(_) => "Something went wrong. Please try again.".to_string(),
        }
    }
}

/// A convenience type alias for `Result<T, CoreError>`.
pub type CoreResult<T> = Result<T, CoreError>;
