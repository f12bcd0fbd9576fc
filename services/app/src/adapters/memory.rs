//! services/app/src/adapters/memory.rs
//!
//! In-memory implementations of the identity, profile and object-store
//! ports. These back the demo binary and the integration tests; a deployment
//! against the real managed services swaps these for thin HTTP adapters
//! without touching the core.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use errlens_core::domain::{Identity, Profile, ProfilePatch};
use errlens_core::errors::{AuthCode, CoreError};
use errlens_core::ports::{
    IdentityProvider, ObjectStore, PortResult, ProfileStore, ProfileStream,
};

const FEDERATED_DEMO_EMAIL: &str = "demo.federated@example.com";

//=========================================================================================
// Identity Provider
//=========================================================================================

struct AccountRecord {
    uid: Uuid,
    password_hash: String,
    email_verified: bool,
}

/// In-memory identity provider. Passwords are hashed with Argon2 even here,
/// so the demo path exercises the same credential handling a real provider
/// adapter would.
pub struct MemoryIdentityProvider {
    accounts: RwLock<HashMap<String, AccountRecord>>,
    verification_sends: RwLock<Vec<Uuid>>,
    reset_sends: RwLock<Vec<String>>,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            verification_sends: RwLock::new(Vec::new()),
            reset_sends: RwLock::new(Vec::new()),
        }
    }

    fn identity_for(email: &str, record: &AccountRecord) -> Identity {
        Identity {
            uid: record.uid,
            email: email.to_string(),
            email_verified: record.email_verified,
            token: Uuid::new_v4().to_string(),
        }
    }

    /// Marks an account verified, standing in for the user clicking the
    /// emailed link.
    pub fn mark_verified(&self, uid: Uuid) {
        let mut accounts = self.accounts.write().unwrap();
        if let Some(record) = accounts.values_mut().find(|r| r.uid == uid) {
            record.email_verified = true;
        }
    }

    /// Verification emails requested so far, newest last.
    pub fn verification_sends(&self) -> Vec<Uuid> {
        self.verification_sends.read().unwrap().clone()
    }

    pub fn reset_sends(&self) -> Vec<String> {
        self.reset_sends.read().unwrap().clone()
    }
}

impl Default for MemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn sign_up(&self, email: &str, password: &str) -> PortResult<Identity> {
        let normalized = email.trim().to_lowercase();
        let mut accounts = self.accounts.write().unwrap();
        if accounts.contains_key(&normalized) {
            return Err(CoreError::Auth(AuthCode::EmailAlreadyInUse));
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| CoreError::Unknown(format!("failed to hash password: {e}")))?
            .to_string();

        let record = AccountRecord {
            uid: Uuid::new_v4(),
            password_hash,
            email_verified: false,
        };
        let identity = Self::identity_for(&normalized, &record);
        accounts.insert(normalized, record);
        Ok(identity)
    }

    async fn sign_in(&self, email: &str, password: &str) -> PortResult<Identity> {
        let normalized = email.trim().to_lowercase();
        let accounts = self.accounts.read().unwrap();
        let record = accounts
            .get(&normalized)
            .ok_or(CoreError::Auth(AuthCode::UserNotFound))?;

        let parsed = PasswordHash::new(&record.password_hash)
            .map_err(|e| CoreError::Unknown(format!("stored hash unreadable: {e}")))?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| CoreError::Auth(AuthCode::InvalidCredentials))?;

        Ok(Self::identity_for(&normalized, record))
    }

    async fn sign_in_federated(&self) -> PortResult<Identity> {
        // The federated provider vouches for the address, so the account
        // arrives pre-verified.
        let mut accounts = self.accounts.write().unwrap();
        let record = accounts
            .entry(FEDERATED_DEMO_EMAIL.to_string())
            .or_insert_with(|| AccountRecord {
                uid: Uuid::new_v4(),
                password_hash: String::new(),
                email_verified: true,
            });
        record.email_verified = true;
        Ok(Self::identity_for(FEDERATED_DEMO_EMAIL, record))
    }

    async fn sign_out(&self) -> PortResult<()> {
        Ok(())
    }

    async fn send_verification(&self, uid: Uuid) -> PortResult<()> {
        let accounts = self.accounts.read().unwrap();
        if !accounts.values().any(|r| r.uid == uid) {
            return Err(CoreError::Auth(AuthCode::UserNotFound));
        }
        self.verification_sends.write().unwrap().push(uid);
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> PortResult<()> {
        let normalized = email.trim().to_lowercase();
        let accounts = self.accounts.read().unwrap();
        if !accounts.contains_key(&normalized) {
            return Err(CoreError::Auth(AuthCode::UserNotFound));
        }
        self.reset_sends.write().unwrap().push(normalized);
        Ok(())
    }
}

//=========================================================================================
// Profile Store
//=========================================================================================

/// In-memory profile document store with a per-subscriber change feed.
pub struct MemoryProfileStore {
    profiles: RwLock<HashMap<Uuid, Profile>>,
    subscribers: Mutex<Vec<(Uuid, mpsc::UnboundedSender<Profile>)>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn notify(&self, profile: &Profile) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|(uid, tx)| {
            if *uid != profile.uid {
                return true;
            }
            tx.send(profile.clone()).is_ok()
        });
    }

    /// Overwrites a document directly, simulating a remote writer (another
    /// tab or an admin tool). Subscribers are notified.
    pub fn remote_write(&self, profile: Profile) {
        self.profiles.write().unwrap().insert(profile.uid, profile.clone());
        self.notify(&profile);
    }
}

impl Default for MemoryProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get_profile(&self, uid: Uuid) -> PortResult<Option<Profile>> {
        Ok(self.profiles.read().unwrap().get(&uid).cloned())
    }

    async fn create_profile(&self, profile: &Profile) -> PortResult<()> {
        self.profiles
            .write()
            .unwrap()
            .insert(profile.uid, profile.clone());
        self.notify(profile);
        Ok(())
    }

    async fn patch_profile(&self, uid: Uuid, patch: &ProfilePatch) -> PortResult<()> {
        let updated = {
            let mut profiles = self.profiles.write().unwrap();
            let profile = profiles
                .get_mut(&uid)
                .ok_or_else(|| CoreError::NotFound(format!("profile {uid}")))?;
            patch.apply_to(profile);
            profile.clone()
        };
        self.notify(&updated);
        Ok(())
    }

    async fn increment_usage(&self, uid: Uuid) -> PortResult<u32> {
        let updated = {
            let mut profiles = self.profiles.write().unwrap();
            let profile = profiles
                .get_mut(&uid)
                .ok_or_else(|| CoreError::NotFound(format!("profile {uid}")))?;
            profile.analysis_count = profile.analysis_count.saturating_add(1);
            profile.total_uploads = profile.total_uploads.saturating_add(1);
            profile.clone()
        };
        let count = updated.analysis_count;
        self.notify(&updated);
        Ok(count)
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
// Object Store
//=========================================================================================

/// In-memory blob store; retrieval URLs use a `memory://` scheme.
pub struct MemoryObjectStore {
    blobs: RwLock<HashMap<String, (Bytes, String)>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, path: &str) -> Option<(Bytes, String)> {
        self.blobs.read().unwrap().get(path).cloned()
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, path: &str, bytes: Bytes, content_type: &str) -> PortResult<String> {
        self.blobs
            .write()
            .unwrap()
            .insert(path.to_string(), (bytes, content_type.to_string()));
        Ok(format!("memory://{path}"))
    }
}
