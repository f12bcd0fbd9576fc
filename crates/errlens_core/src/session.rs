//! crates/errlens_core/src/session.rs
//!
//! The Session/Profile Synchronizer. Two independent event sources (identity
//! provider sign-in state and profile document changes) are merged into one
//! Session projection by a pure reducer, so the reconciliation logic is
//! testable without any real network. The `Synchronizer` owns the ports and
//! the imperative actions (register, login, logout, profile updates) that
//! mutate the upstream services.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{
    Identity, Profile, ProfilePatch, ProfileState, Session, MAX_IMAGE_BYTES,
};
use crate::errors::{AuthCode, CoreError, CoreResult};
use crate::ports::{IdentityProvider, ObjectStore, ProfileStore};

/// Fixed backoff before the single profile-fetch retry.
pub const PROFILE_RETRY_BACKOFF: Duration = Duration::from_millis(500);
const MIN_PASSWORD_LEN: usize = 6;

//=========================================================================================
// Events and Reducer
//=========================================================================================

/// Events merged from the two upstream sources into the Session projection.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The identity provider reported a signed-in user (startup resolution,
    /// fresh login, or registration).
    SignedIn(Identity),
    /// The identity provider reported sign-out.
    SignedOut,
    /// The profile document resolved after a sign-in event.
    ProfileLoaded(Profile),
    /// The live subscription (or a local optimistic write) delivered a newer
    /// profile. The subscription is the eventual source of truth, so this
    /// always overwrites, including an earlier degraded stand-in.
    ProfileChanged(Profile),
    /// The profile could not be fetched; a synthetic stand-in takes its place
    /// so entitlement stays renderable.
    ProfileDegraded(Profile),
    /// One unit of anonymous quota was consumed.
    AnonymousUsageRecorded,
}

/// Pure reducer: `(current, event) -> next`. Profile events against a uid
/// other than the currently signed-in user are dropped as stale.
pub fn reduce(current: &Session, event: SessionEvent) -> Session {
    let mut next = current.clone();
    match event {
        SessionEvent::SignedIn(identity) => {
            next.user = Some(identity);
            next.profile = ProfileState::Loading;
        }
        SessionEvent::SignedOut => {
            next.user = None;
            next.profile = ProfileState::Absent;
        }
        SessionEvent::ProfileLoaded(profile) | SessionEvent::ProfileChanged(profile) => {
            if current.user.as_ref().map(|u| u.uid) == Some(profile.uid) {
                next.profile = ProfileState::Ready(profile);
            }
        }
        SessionEvent::ProfileDegraded(profile) => {
            if current.user.as_ref().map(|u| u.uid) == Some(profile.uid) {
                next.profile = ProfileState::Degraded(profile);
            }
        }
        SessionEvent::AnonymousUsageRecorded => {
            if current.user.is_none() {
                next.anonymous_count = current.anonymous_count.saturating_add(1);
            }
        }
    }
    next
}

/// Outcome of a verification-email request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationOutcome {
    pub sent: bool,
    pub message: String,
}

//=========================================================================================
// Synchronizer
//=========================================================================================

struct SubscriptionGuard {
    uid: Uuid,
    handle: JoinHandle<()>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Owns the identity/profile/object ports and publishes Session snapshots
/// through a watch channel. Created once (`new`) and torn down explicitly;
/// there is no ambient global session.
pub struct Synchronizer {
    identity: Arc<dyn IdentityProvider>,
    profiles: Arc<dyn ProfileStore>,
    objects: Arc<dyn ObjectStore>,
    tx: watch::Sender<Session>,
    subscription: Mutex<Option<SubscriptionGuard>>,
}

impl Synchronizer {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        profiles: Arc<dyn ProfileStore>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        let (tx, _rx) = watch::channel(Session::anonymous());
        Self {
            identity,
            profiles,
            objects,
            tx,
            subscription: Mutex::new(None),
        }
    }

    /// The latest Session snapshot. Pipeline entitlement checks read this at
    /// the point of decision, never a cached copy.
    pub fn snapshot(&self) -> Session {
        self.tx.borrow().clone()
    }

    /// A receiver that observes every projection change, for the view layer.
    pub fn watch(&self) -> watch::Receiver<Session> {
        self.tx.subscribe()
    }

    fn apply(&self, event: SessionEvent) {
        self.tx.send_modify(|session| *session = reduce(session, event));
    }

    /// Tears down the live subscription and clears the projection. Safe to
    /// call repeatedly.
    pub async fn teardown(&self) {
        self.subscription.lock().await.take();
        self.apply(SessionEvent::SignedOut);
    }

    //-------------------------------------------------------------------------------------
    // Provider event handling
    //-------------------------------------------------------------------------------------

    /// Entry point for identity-provider state changes, including the app
    /// startup resolution. `None` clears the session entirely.
    pub async fn handle_provider_event(&self, identity: Option<Identity>) {
        match identity {
            None => {
                self.subscription.lock().await.take();
                self.apply(SessionEvent::SignedOut);
            }
            Some(identity) => {
                // Drop any subscription against a stale or foreign uid first.
                {
                    let mut guard = self.subscription.lock().await;
                    if guard.as_ref().map(|g| g.uid) != Some(identity.uid) {
                        guard.take();
                    }
                }

                // The identity half flips synchronously; the profile half
                // resolves asynchronously below.
                self.apply(SessionEvent::SignedIn(identity.clone()));
                self.resolve_profile(&identity).await;
                self.start_subscription(identity.uid).await;
            }
        }
    }

    async fn resolve_profile(&self, identity: &Identity) {
        match self.fetch_or_create_profile(identity).await {
            Ok(mut profile) => {
                // The identity provider is the authority on the verified
                // flag; reconcile the stored copy when they disagree.
                if profile.email_verified != identity.email_verified {
                    let patch = ProfilePatch {
                        email_verified: Some(identity.email_verified),
                        ..Default::default()
                    };
                    if let Err(err) = self.profiles.patch_profile(identity.uid, &patch).await {
                        warn!(uid = %identity.uid, %err, "failed to reconcile verified flag");
                    }
                    profile.email_verified = identity.email_verified;
                }
                self.apply(SessionEvent::ProfileLoaded(profile));
            }
            Err(err) => {
                warn!(uid = %identity.uid, %err, "profile unavailable, entering degraded mode");
                let stand_in = Profile::new_default(
                    identity.uid,
                    &display_name_from_email(&identity.email),
                    identity.email_verified,
                );
                self.apply(SessionEvent::ProfileDegraded(stand_in));
            }
        }
    }

    /// Fetches the profile document, retrying once after a fixed backoff on
    /// transient failure. A missing document (new federated user, or a race
    /// on first registration) is self-healed by creating the default.
    async fn fetch_or_create_profile(&self, identity: &Identity) -> CoreResult<Profile> {
        let fetched = match self.profiles.get_profile(identity.uid).await {
            Ok(found) => found,
            Err(err) => {
                debug!(uid = %identity.uid, %err, "profile fetch failed, retrying once");
                tokio::time::sleep(PROFILE_RETRY_BACKOFF).await;
                self.profiles.get_profile(identity.uid).await?
            }
        };

        match fetched {
            Some(profile) => Ok(profile),
            None => {
                let profile = Profile::new_default(
                    identity.uid,
                    &display_name_from_email(&identity.email),
                    identity.email_verified,
                );
                self.profiles.create_profile(&profile).await?;
                info!(uid = %identity.uid, "created default profile document");
                Ok(profile)
            }
        }
    }

    async fn start_subscription(&self, uid: Uuid) {
        let mut guard = self.subscription.lock().await;
        if guard.as_ref().map(|g| g.uid) == Some(uid) {
            return;
        }

        let mut stream = match self.profiles.subscribe(uid).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%uid, %err, "could not subscribe to profile changes");
                return;
            }
        };

        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            while let Some(profile) = stream.next().await {
                tx.send_modify(|session| {
                    *session = reduce(session, SessionEvent::ProfileChanged(profile.clone()));
                });
            }
        });

        *guard = Some(SubscriptionGuard { uid, handle });
    }

    //-------------------------------------------------------------------------------------
    // Imperative actions
    //-------------------------------------------------------------------------------------

    /// Registers a new account. Registration is not complete until the
    /// profile document exists; a profile-create failure fails the call.
    /// The verification email is best-effort only.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> CoreResult<Identity> {
        if email.trim().is_empty() {
            return Err(CoreError::Validation("Email is required.".to_string()));
        }
        if display_name.trim().is_empty() {
            return Err(CoreError::Validation("Display name is required.".to_string()));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(CoreError::Validation(
                "Password must be at least 6 characters.".to_string(),
            ));
        }

        let identity = self.identity.sign_up(email, password).await?;

        if let Err(err) = self.identity.send_verification(identity.uid).await {
            warn!(uid = %identity.uid, %err, "verification email not sent");
        }

        let profile = Profile::new_default(identity.uid, display_name.trim(), identity.email_verified);
        self.profiles.create_profile(&profile).await?;

        self.handle_provider_event(Some(identity.clone())).await;
        Ok(identity)
    }

    pub async fn login(&self, email: &str, password: &str) -> CoreResult<Identity> {
        let identity = self.identity.sign_in(email, password).await?;
        self.stamp_login(&identity).await;
        self.handle_provider_event(Some(identity.clone())).await;
        Ok(identity)
    }

    pub async fn login_federated(&self) -> CoreResult<Identity> {
        let identity = self.identity.sign_in_federated().await?;
        self.stamp_login(&identity).await;
        self.handle_provider_event(Some(identity.clone())).await;
        Ok(identity)
    }

    /// Best-effort login-timestamp patch. Idempotent; the provider event
    /// handler may repeat it harmlessly.
    async fn stamp_login(&self, identity: &Identity) {
        let patch = ProfilePatch {
            last_login_at: Some(Utc::now()),
            ..Default::default()
        };
        if let Err(err) = self.profiles.patch_profile(identity.uid, &patch).await {
            debug!(uid = %identity.uid, %err, "login timestamp patch skipped");
        }
    }

    /// Requests sign-out from the provider; the provider event is what
    /// actually clears the projection.
    pub async fn logout(&self) -> CoreResult<()> {
        self.identity.sign_out().await?;
        self.handle_provider_event(None).await;
        Ok(())
    }

    /// No-ops with `sent: false` when the address is already verified.
    pub async fn resend_verification(&self) -> CoreResult<VerificationOutcome> {
        let session = self.snapshot();
        let user = session
            .user
            .as_ref()
            .ok_or(CoreError::Auth(AuthCode::NotAuthenticated))?;

        if user.email_verified {
            return Ok(VerificationOutcome {
                sent: false,
                message: "Email is already verified.".to_string(),
            });
        }

        self.identity.send_verification(user.uid).await?;
        Ok(VerificationOutcome {
            sent: true,
            message: "Verification email sent.".to_string(),
        })
    }

    pub async fn request_password_reset(&self, email: &str) -> CoreResult<()> {
        if email.trim().is_empty() {
            return Err(CoreError::Validation("Email is required.".to_string()));
        }
        self.identity.send_password_reset(email).await
    }

    /// Validates and merges a profile patch. A patch that would blank the
    /// display name is rejected; an all-empty patch is a no-op.
    pub async fn update_profile(&self, patch: ProfilePatch) -> CoreResult<()> {
        let session = self.snapshot();
        let user = session
            .user
            .as_ref()
            .ok_or(CoreError::Auth(AuthCode::NotAuthenticated))?;

        if let Some(name) = &patch.display_name {
            if name.trim().is_empty() {
                return Err(CoreError::Validation(
                    "Display name cannot be empty.".to_string(),
                ));
            }
        }
        if patch.is_empty() {
            return Ok(());
        }

        self.profiles.patch_profile(user.uid, &patch).await?;

        // Optimistic local apply; a later subscription push for the same
        // document overwrites this, last-writer-via-subscription wins.
        if let Some(current) = session.profile.profile() {
            let mut updated = current.clone();
            patch.apply_to(&mut updated);
            self.apply(SessionEvent::ProfileChanged(updated));
        }
        Ok(())
    }

    /// Uploads a new avatar blob and patches its retrieval URL into the
    /// profile. Returns the URL. The blob goes through the same sniff and
    /// decode probe as a screenshot; the stored content type comes from the
    /// magic bytes, never from the caller.
    pub async fn update_avatar(&self, bytes: bytes::Bytes) -> CoreResult<String> {
        let session = self.snapshot();
        let user = session
            .user
            .as_ref()
            .ok_or(CoreError::Auth(AuthCode::NotAuthenticated))?;

        if bytes.is_empty() || bytes.len() > MAX_IMAGE_BYTES {
            return Err(CoreError::InvalidFile(
                "Avatar image must be between 1 byte and 10 MB.".to_string(),
            ));
        }
        let (kind, _, _) = crate::upload::sniff_and_decode(&bytes)?;

        let path = format!("avatars/{}", user.uid);
        let url = self.objects.put(&path, bytes, kind.mime()).await?;

        self.update_profile(ProfilePatch {
            avatar_url: Some(url.clone()),
            ..Default::default()
        })
        .await?;
        Ok(url)
    }

    /// The single authoritative place usage is debited. Authenticated users
    /// go through the profile store's atomic counter; anonymous users are
    /// tracked on the local projection. Returns the new count.
    pub async fn increment_usage(&self) -> CoreResult<u32> {
        let session = self.snapshot();
        match &session.user {
            Some(user) => {
                let new_count = self.profiles.increment_usage(user.uid).await?;
                if let Some(current) = session.profile.profile() {
                    let mut updated = current.clone();
                    updated.analysis_count = new_count;
                    updated.total_uploads = updated.total_uploads.saturating_add(1);
                    self.apply(SessionEvent::ProfileChanged(updated));
                }
                Ok(new_count)
            }
            None => {
                self.apply(SessionEvent::AnonymousUsageRecorded);
                Ok(self.snapshot().anonymous_count)
            }
        }
    }
}

fn display_name_from_email(email: &str) -> String {
    email
        .split('@')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("User")
        .to_string()
}
