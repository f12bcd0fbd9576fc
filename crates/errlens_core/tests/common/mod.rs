//! Shared stub ports for the integration tests. These record every call so
//! tests can assert on traffic, and expose knobs for scripted failures.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use errlens_core::domain::{
    AnalysisRequest, AnalysisResult, Identity, Profile, ProfilePatch, ResultSource, Solution,
};
use errlens_core::errors::{AuthCode, CoreError};
use errlens_core::ports::{
    AnalysisBackend, IdentityProvider, ObjectStore, PortResult, ProfileStore, ProfileStream,
};

//=========================================================================================
// Identity Stub
//=========================================================================================

pub struct StubIdentity {
    accounts: RwLock<HashMap<String, (Uuid, String)>>,
    verified: RwLock<HashSet<Uuid>>,
    pub verification_sends: AtomicU32,
    pub fail_verification_send: bool,
}

impl StubIdentity {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            verified: RwLock::new(HashSet::new()),
            verification_sends: AtomicU32::new(0),
            fail_verification_send: false,
        }
    }

    pub fn failing_verification() -> Self {
        Self {
            fail_verification_send: true,
            ..Self::new()
        }
    }

    pub fn mark_verified(&self, uid: Uuid) {
        self.verified.write().unwrap().insert(uid);
    }

    fn identity(&self, uid: Uuid, email: &str) -> Identity {
        Identity {
            uid,
            email: email.to_string(),
            email_verified: self.verified.read().unwrap().contains(&uid),
            token: format!("token-{uid}"),
        }
    }
}

#[async_trait]
impl IdentityProvider for StubIdentity {
    async fn sign_up(&self, email: &str, _password: &str) -> PortResult<Identity> {
        let mut accounts = self.accounts.write().unwrap();
        if accounts.contains_key(email) {
            return Err(CoreError::Auth(AuthCode::EmailAlreadyInUse));
        }
        let uid = Uuid::new_v4();
        accounts.insert(email.to_string(), (uid, _password.to_string()));
        Ok(self.identity(uid, email))
    }

    async fn sign_in(&self, email: &str, password: &str) -> PortResult<Identity> {
        let accounts = self.accounts.read().unwrap();
        let (uid, stored) = accounts
            .get(email)
            .ok_or(CoreError::Auth(AuthCode::UserNotFound))?;
        if stored != password {
            return Err(CoreError::Auth(AuthCode::InvalidCredentials));
        }
        Ok(self.identity(*uid, email))
    }

    async fn sign_in_federated(&self) -> PortResult<Identity> {
        let uid = Uuid::new_v4();
        self.verified.write().unwrap().insert(uid);
        Ok(self.identity(uid, "federated@example.com"))
    }

    async fn sign_out(&self) -> PortResult<()> {
        Ok(())
    }

    async fn send_verification(&self, _uid: Uuid) -> PortResult<()> {
        if self.fail_verification_send {
            return Err(CoreError::Unknown("mail service down".to_string()));
        }
        self.verification_sends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_password_reset(&self, _email: &str) -> PortResult<()> {
        Ok(())
    }
}

//=========================================================================================
// Profile Store Stub
//=========================================================================================

pub struct StubProfiles {
    profiles: RwLock<HashMap<Uuid, Profile>>,
    /// Number of upcoming `get_profile` calls that fail transiently.
    fail_next_gets: AtomicU32,
    /// Number of upcoming `create_profile` calls that fail.
    fail_next_creates: AtomicU32,
    pub patches: Mutex<Vec<(Uuid, ProfilePatch)>>,
    pub get_calls: AtomicU32,
    pub increment_calls: AtomicU32,
    subscribers: Mutex<Vec<(Uuid, mpsc::UnboundedSender<Profile>)>>,
}

impl StubProfiles {
    pub fn new() -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
            fail_next_gets: AtomicU32::new(0),
            fail_next_creates: AtomicU32::new(0),
            patches: Mutex::new(Vec::new()),
            get_calls: AtomicU32::new(0),
            increment_calls: AtomicU32::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_next_gets(&self, count: u32) {
        self.fail_next_gets.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_creates(&self, count: u32) {
        self.fail_next_creates.store(count, Ordering::SeqCst);
    }

    pub fn insert(&self, profile: Profile) {
        self.profiles.write().unwrap().insert(profile.uid, profile);
    }

    pub fn stored(&self, uid: Uuid) -> Option<Profile> {
        self.profiles.read().unwrap().get(&uid).cloned()
    }

    /// Simulates a remote writer pushing a document change.
    pub fn push(&self, profile: Profile) {
        self.profiles
            .write()
            .unwrap()
            .insert(profile.uid, profile.clone());
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|(uid, tx)| *uid != profile.uid || tx.send(profile.clone()).is_ok());
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ProfileStore for StubProfiles {
    async fn get_profile(&self, uid: Uuid) -> PortResult<Option<Profile>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.fail_next_gets) {
            return Err(CoreError::Unknown("transient store failure".to_string()));
        }
        Ok(self.profiles.read().unwrap().get(&uid).cloned())
    }

    async fn create_profile(&self, profile: &Profile) -> PortResult<()> {
        if Self::take_failure(&self.fail_next_creates) {
            return Err(CoreError::Unknown("transient store failure".to_string()));
        }
        self.profiles
            .write()
            .unwrap()
            .insert(profile.uid, profile.clone());
        Ok(())
    }

    async fn patch_profile(&self, uid: Uuid, patch: &ProfilePatch) -> PortResult<()> {
        self.patches.lock().unwrap().push((uid, patch.clone()));
        let mut profiles = self.profiles.write().unwrap();
        let profile = profiles
            .get_mut(&uid)
            .ok_or_else(|| CoreError::NotFound(format!("profile {uid}")))?;
        patch.apply_to(profile);
        Ok(())
    }

    async fn increment_usage(&self, uid: Uuid) -> PortResult<u32> {
        self.increment_calls.fetch_add(1, Ordering::SeqCst);
        let mut profiles = self.profiles.write().unwrap();
        let profile = profiles
            .get_mut(&uid)
            .ok_or_else(|| CoreError::NotFound(format!("profile {uid}")))?;
        profile.analysis_count += 1;
        Ok(profile.analysis_count)
    }

    async fn subscribe(&self, uid: Uuid) -> PortResult<ProfileStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push((uid, tx));
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|profile| (profile, rx))
        });
        Ok(Box::pin(stream))
    }
}

//=========================================================================================
// Object Store and Backend Stubs
//=========================================================================================

pub struct StubObjects;

#[async_trait]
impl ObjectStore for StubObjects {
    async fn put(&self, path: &str, _bytes: Bytes, _content_type: &str) -> PortResult<String> {
        Ok(format!("stub://{path}"))
    }
}

pub enum BackendMode {
    Succeed,
    SucceedWithoutId,
    Unreachable,
    RateLimited,
}

pub struct StubBackend {
    pub mode: BackendMode,
    pub calls: AtomicU32,
    pub last_bearer: Mutex<Option<String>>,
}

impl StubBackend {
    pub fn new(mode: BackendMode) -> Self {
        Self {
            mode,
            calls: AtomicU32::new(0),
            last_bearer: Mutex::new(None),
        }
    }
}

pub fn sample_result() -> AnalysisResult {
    AnalysisResult {
        analysis_id: Some("an-123".to_string()),
        problem: Some("Null pointer dereference in startup hook".to_string()),
        category: Some("runtime".to_string()),
        confidence: Some(0.92),
        severity: Some("high".to_string()),
        solutions: vec![Solution {
            title: "Guard the startup hook".to_string(),
            description: "Check the handle before dereferencing it.".to_string(),
            steps: vec!["Add a null check.".to_string()],
            difficulty: Some("medium".to_string()),
            success_rate: Some(0.8),
            time_estimate: None,
            requirements: None,
            warnings: None,
            references: None,
        }],
        prevention_tips: None,
        related_issues: None,
        source: ResultSource::Backend,
    }
}

#[async_trait]
impl AnalysisBackend for StubBackend {
    async fn analyze(&self, request: &AnalysisRequest) -> PortResult<AnalysisResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_bearer.lock().unwrap() = request.bearer.clone();
        match self.mode {
            BackendMode::Succeed => Ok(sample_result()),
            BackendMode::SucceedWithoutId => {
                let mut result = sample_result();
                result.analysis_id = None;
                Ok(result)
            }
            BackendMode::Unreachable => {
                Err(CoreError::Unreachable("connection refused".to_string()))
            }
            BackendMode::RateLimited => Err(CoreError::RateLimited),
        }
    }

    async fn health(&self) -> PortResult<()> {
        Ok(())
    }
}

//=========================================================================================
// Image Fixtures
//=========================================================================================

/// A PNG of uniform noise; noise defeats PNG's filters, so the byte size
/// tracks the raw pixel count closely. Deterministic via the seed.
pub fn noise_png(width: u32, height: u32) -> Bytes {
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    let raw: Vec<u8> = (0..(width * height * 3)).map(|_| rng.gen()).collect();
    let img = image::RgbImage::from_raw(width, height, raw).expect("raw buffer sized to fit");
    let mut out = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut out),
        image::ImageFormat::Png,
    )
    .expect("png encode");
    Bytes::from(out)
}

/// A JPEG of uniform noise, for exercising the lossy re-encoding path.
pub fn noise_jpeg(width: u32, height: u32) -> Bytes {
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let raw: Vec<u8> = (0..(width * height * 3)).map(|_| rng.gen()).collect();
    let img = image::RgbImage::from_raw(width, height, raw).expect("raw buffer sized to fit");
    let mut out = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut out),
        image::ImageFormat::Jpeg,
    )
    .expect("jpeg encode");
    Bytes::from(out)
}

/// A small uniform PNG padded with trailing zeros to an exact byte size.
/// Decoders stop at IEND, so the padding is never read.
pub fn padded_png(target_len: usize) -> Bytes {
    let img = image::RgbImage::from_pixel(64, 64, image::Rgb([40, 90, 200]));
    let mut out = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut out),
        image::ImageFormat::Png,
    )
    .expect("png encode");
    assert!(out.len() <= target_len, "base png larger than target");
    out.resize(target_len, 0);
    Bytes::from(out)
}
