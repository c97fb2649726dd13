//! Durable storage for the credential and the last-known profile.
//!
//! Two keys, written together and cleared together. The store never judges staleness;
//! an unreadable store is reported as empty.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::warn;

use crate::error::AppResult;
use crate::model::UserProfile;

use super::session::Credential;

const TOKEN_FILE: &str = "access_token";
const PROFILE_FILE: &str = "user.json";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredSession {
    pub credential: Option<Credential>,
    pub profile: Option<UserProfile>,
}

pub trait SessionStore: Send + Sync {
    fn load(&self) -> StoredSession;
    fn save(&self, credential: &Credential, profile: &UserProfile) -> AppResult<()>;
    fn clear(&self) -> AppResult<()>;
}

/// File-backed store: `<dir>/access_token` and `<dir>/user.json`.
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self { Self { dir: dir.into() } }

    pub fn dir(&self) -> &Path { &self.dir }

    fn token_path(&self) -> PathBuf { self.dir.join(TOKEN_FILE) }
    fn profile_path(&self) -> PathBuf { self.dir.join(PROFILE_FILE) }
}

// Both files are readable by the owner only: one holds the bearer token, the other
// personal details.
fn write_atomic(path: &Path, bytes: &[u8]) -> AppResult<()> {
    let tmp = path.with_extension("tmp");
    let mut opts = OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts.open(&tmp)?;
    // mode only applies on creation; a leftover tmp file keeps its old bits
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(tmp, path)?;
    Ok(())
}

fn remove_if_present(path: &Path) -> AppResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> StoredSession {
        let credential = match std::fs::read_to_string(self.token_path()) {
            Ok(s) if !s.trim().is_empty() => Some(Credential::new(s.trim())),
            Ok(_) => None,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(target: "meterbill", "session store unreadable at {}: {}", self.dir.display(), e);
                }
                None
            }
        };
        let profile = std::fs::read(self.profile_path())
            .ok()
            .and_then(|bytes| match serde_json::from_slice::<UserProfile>(&bytes) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!(target: "meterbill", "cached profile ignored: {}", e);
                    None
                }
            });
        StoredSession { credential, profile }
    }

    fn save(&self, credential: &Credential, profile: &UserProfile) -> AppResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        write_atomic(&self.token_path(), credential.as_str().as_bytes())?;
        write_atomic(&self.profile_path(), &serde_json::to_vec_pretty(profile)?)?;
        Ok(())
    }

    fn clear(&self) -> AppResult<()> {
        remove_if_present(&self.token_path())?;
        remove_if_present(&self.profile_path())?;
        Ok(())
    }
}

/// Process-local store. Counts saves and clears so callers can observe how often the
/// session was persisted or wiped.
#[derive(Default)]
pub struct MemorySessionStore {
    inner: Mutex<StoredSession>,
    saves: AtomicUsize,
    clears: AtomicUsize,
}

impl MemorySessionStore {
    pub fn new() -> Self { Self::default() }

    pub fn with_session(credential: Credential, profile: Option<UserProfile>) -> Self {
        let s = Self::default();
        *s.inner.lock() = StoredSession { credential: Some(credential), profile };
        s
    }

    pub fn save_count(&self) -> usize { self.saves.load(Ordering::SeqCst) }
    pub fn clear_count(&self) -> usize { self.clears.load(Ordering::SeqCst) }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> StoredSession { self.inner.lock().clone() }

    fn save(&self, credential: &Credential, profile: &UserProfile) -> AppResult<()> {
        *self.inner.lock() = StoredSession { credential: Some(credential.clone()), profile: Some(profile.clone()) };
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&self) -> AppResult<()> {
        *self.inner.lock() = StoredSession::default();
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
