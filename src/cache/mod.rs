//! Encrypted on-disk token cache, one file per client identity

pub mod crypto;
pub mod state;

pub use crypto::MachineIdentity;
pub use state::{AccountRecord, CacheState};

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::auth::{AuthError, Result};
use crypto::KEY_LEN;

/// Persistent cache for the interactive provider.
///
/// [`load`](Self::load) and [`persist`](Self::persist) wrap each use of the
/// in-memory [`CacheState`].
pub struct TokenCache {
    path: PathBuf,
    identity: MachineIdentity,
    key: OnceLock<[u8; KEY_LEN]>,
}

impl TokenCache {
    /// Cache for `client_id` under `dir`, keyed to the current machine and user.
    pub fn new(dir: &Path, client_id: &str) -> Self {
        Self::with_identity(dir, client_id, MachineIdentity::current())
    }

    pub fn with_identity(dir: &Path, client_id: &str, identity: MachineIdentity) -> Self {
        Self {
            path: dir.join(cache_file_name(client_id)),
            identity,
            key: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn key(&self) -> Result<&[u8; KEY_LEN]> {
        if let Some(key) = self.key.get() {
            return Ok(key);
        }
        let key = crypto::derive_key(&self.identity)
            .map_err(|e| AuthError::CacheUnavailable(e.to_string()))?;
        Ok(self.key.get_or_init(|| key))
    }

    /// Read and decrypt the cache file.
    ///
    /// Never fails: a missing, truncated, foreign or corrupt file yields an
    /// empty state and the caller falls through to interactive sign-in.
    pub fn load(&self) -> CacheState {
        if !self.path.exists() {
            return CacheState::default();
        }

        match self.try_load() {
            Ok(state) => {
                tracing::debug!("Loaded token cache from {}", self.path.display());
                state
            }
            Err(e) => {
                tracing::warn!("{}; treating cache as empty", e);
                CacheState::default()
            }
        }
    }

    fn try_load(&self) -> Result<CacheState> {
        let record = fs::read(&self.path)
            .map_err(|e| AuthError::CacheUnavailable(format!("read failed: {}", e)))?;
        let plaintext = crypto::open(self.key()?, &record)
            .map_err(|e| AuthError::CacheUnavailable(format!("decryption failed: {}", e)))?;
        CacheState::from_slice(&plaintext)
            .map_err(|e| AuthError::CacheUnavailable(format!("invalid payload: {}", e)))
    }

    /// Encrypt and write `state` if it changed since it was loaded.
    pub fn persist(&self, state: &mut CacheState) -> Result<()> {
        if !state.has_changed() {
            return Ok(());
        }

        let payload = state
            .to_vec()
            .map_err(|e| AuthError::CacheWrite(std::io::Error::other(e)))?;
        let record = crypto::seal(self.key()?, &payload)
            .map_err(|e| AuthError::CacheWrite(std::io::Error::other(e)))?;

        if let Some(dir) = self.path.parent() {
            create_private_dir(dir)?;
        }

        // Write beside the target and rename, so a crash never leaves a partial file.
        let tmp = self.path.with_extension("enc.tmp");
        {
            let mut file = private_file(&tmp)?;
            file.write_all(&record)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        state.mark_clean();
        tracing::debug!(
            "Persisted token cache ({} bytes) to {}",
            record.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Delete the cache file. Succeeds when there is nothing to delete.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!("Removed token cache {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn cache_file_name(client_id: &str) -> String {
    let safe: String = client_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("token-cache-{}.enc", safe)
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}

fn private_file(path: &Path) -> std::io::Result<fs::File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AccessToken, Account};

    const CLIENT_ID: &str = "51f81489-12ee-4a9e-aaae-a2591f45987d";
    const RESOURCE: &str = "https://org.example.com";

    fn cache_in(dir: &Path, host: &str) -> TokenCache {
        TokenCache::with_identity(dir, CLIENT_ID, MachineIdentity::new(host, "alice"))
    }

    fn populated_state() -> CacheState {
        let mut state = CacheState::default();
        state.upsert(
            Account {
                home_account_id: "oid.tid".into(),
                username: "alice@contoso.com".into(),
                name: Some("Alice".into()),
                tenant_id: Some("tid".into()),
            },
            Some("rt".into()),
            RESOURCE,
            AccessToken::new("at".into(), Some(3600)),
        );
        state
    }

    #[test]
    fn test_file_named_after_client_id() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path(), "host");
        assert_eq!(
            cache.path().file_name().unwrap().to_string_lossy(),
            format!("token-cache-{}.enc", CLIENT_ID)
        );
        assert_eq!(cache_file_name("a/b\\c"), "token-cache-a_b_c.enc");
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path(), "host");
        assert!(!cache.exists());
        assert!(cache.load().is_empty());
    }

    #[test]
    fn test_persist_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path(), "host");

        let mut state = populated_state();
        cache.persist(&mut state).unwrap();
        assert!(cache.exists());
        assert!(!state.has_changed());

        let loaded = cache.load();
        let account = loaded.accounts().next().unwrap();
        assert_eq!(account.username, "alice@contoso.com");
        assert_eq!(
            loaded.valid_access_token("oid.tid", RESOURCE).unwrap().token,
            "at"
        );

        // The file on disk is not the plaintext payload
        let raw = fs::read(cache.path()).unwrap();
        assert!(!String::from_utf8_lossy(&raw).contains("alice@contoso.com"));
    }

    #[test]
    fn test_unchanged_state_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path(), "host");
        let mut state = CacheState::default();
        cache.persist(&mut state).unwrap();
        assert!(!cache.exists());
    }

    #[test]
    fn test_foreign_machine_cache_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = populated_state();
        cache_in(dir.path(), "workstation")
            .persist(&mut state)
            .unwrap();

        let elsewhere = cache_in(dir.path(), "laptop");
        assert!(elsewhere.exists());
        assert!(elsewhere.load().is_empty());
    }

    #[test]
    fn test_truncated_file_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path(), "host");
        fs::write(cache.path(), [0u8; 10]).unwrap();
        assert!(cache.load().is_empty());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path(), "host");
        cache.clear().unwrap();

        let mut state = populated_state();
        cache.persist(&mut state).unwrap();
        cache.clear().unwrap();
        assert!(!cache.exists());
        cache.clear().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_cache_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        let cache = cache_in(&nested, "host");
        let mut state = populated_state();
        cache.persist(&mut state).unwrap();

        let file_mode = fs::metadata(cache.path()).unwrap().permissions().mode();
        assert_eq!(file_mode & 0o777, 0o600);
        let dir_mode = fs::metadata(&nested).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700);
        assert!(!nested.join(format!("token-cache-{}.enc.tmp", CLIENT_ID)).exists());
    }
}
