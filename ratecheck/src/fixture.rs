//! Per-case filesystem fixture.
//!
//! Layout under `work_dir`:
//!
//! ```text
//! case-<kib>kib-<id>/
//!   room_files/test_<kib>.bin   payload of exactly `file_size` bytes
//!   users/<user>                shared public key
//!   users/<room>                shared public key
//!   host_key                    path handed to the entrypoint (created by it)
//! ```

use std::path::{Path, PathBuf};

use rand::RngCore;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use ratecheck_core::config::IdentityConfig;
use ratecheck_core::error::FixtureError;
use ratecheck_core::types::TestCase;

const PAYLOAD_CHUNK: usize = 64 * 1024;

/// An isolated directory tree owned by exactly one test case.
///
/// Removed by [`Fixture::remove`], or on drop if that was never reached.
#[derive(Debug)]
pub struct Fixture {
    root: PathBuf,
    payload: PathBuf,
    payload_name: String,
    removed: bool,
}

impl Fixture {
    /// Build a fresh fixture for `case` under `work_dir`.
    ///
    /// The credential template is read before anything is written, so a
    /// missing template leaves no directory behind.
    pub async fn provision(
        work_dir: &Path,
        case: &TestCase,
        identity: &IdentityConfig,
    ) -> Result<Self, FixtureError> {
        let pubkey = read_template(&identity.public_key).await?;

        let root = work_dir.join(fixture_name(case));
        if tokio::fs::try_exists(&root).await.unwrap_or(false) {
            warn!(path = %root.display(), "removing stale fixture");
            tokio::fs::remove_dir_all(&root)
                .await
                .map_err(|e| io_err(&root, e))?;
        }

        let room_files = root.join("room_files");
        let users = root.join("users");
        tokio::fs::create_dir_all(&room_files)
            .await
            .map_err(|e| io_err(&room_files, e))?;

        // From here on the tree exists; drop cleans it up on any error.
        let payload_name = case.payload_name();
        let fixture = Self {
            payload: room_files.join(&payload_name),
            payload_name,
            root,
            removed: false,
        };

        tokio::fs::create_dir_all(&users)
            .await
            .map_err(|e| io_err(&users, e))?;
        write_payload(&fixture.payload, case.file_size.bytes()).await?;

        for name in [&identity.user, &identity.room] {
            let path = users.join(name);
            tokio::fs::write(&path, &pubkey)
                .await
                .map_err(|e| io_err(&path, e))?;
        }

        info!(
            path = %fixture.root.display(),
            payload_bytes = case.file_size.bytes(),
            "fixture provisioned"
        );
        Ok(fixture)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn room_files(&self) -> PathBuf {
        self.root.join("room_files")
    }

    pub fn users(&self) -> PathBuf {
        self.root.join("users")
    }

    pub fn host_key(&self) -> PathBuf {
        self.root.join("host_key")
    }

    pub fn payload(&self) -> &Path {
        &self.payload
    }

    pub fn payload_name(&self) -> &str {
        &self.payload_name
    }

    /// Recursively delete the fixture tree. Idempotent.
    ///
    /// A failed removal leaves the fixture marked as present, so a later call
    /// or the drop fallback tries again.
    pub async fn remove(&mut self) -> Result<(), FixtureError> {
        if self.removed {
            return Ok(());
        }
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => debug!(path = %self.root.display(), "fixture removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(&self.root, e)),
        }
        self.removed = true;
        Ok(())
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => debug!(path = %self.root.display(), "fixture removed on drop"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.root.display(), error = %e, "failed to remove fixture"),
        }
    }
}

/// Unique directory name for one run of `case`.
fn fixture_name(case: &TestCase) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("case-{}kib-{}", case.file_size.kib(), &id[..8])
}

async fn read_template(path: &Path) -> Result<String, FixtureError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(content.trim().to_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(FixtureError::TemplateMissing {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(io_err(path, e)),
    }
}

/// Write `len` random bytes. Random content keeps transport compression
/// from shortening the transfer.
async fn write_payload(path: &Path, len: u64) -> Result<(), FixtureError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| io_err(path, e))?;
    let mut chunk = vec![0u8; PAYLOAD_CHUNK];
    let mut remaining = len;
    while remaining > 0 {
        let n = remaining.min(PAYLOAD_CHUNK as u64) as usize;
        rand::thread_rng().fill_bytes(&mut chunk[..n]);
        file.write_all(&chunk[..n])
            .await
            .map_err(|e| io_err(path, e))?;
        remaining -= n as u64;
    }
    file.flush().await.map_err(|e| io_err(path, e))?;
    Ok(())
}

fn io_err(path: &Path, source: std::io::Error) -> FixtureError {
    FixtureError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn identity_in(dir: &Path) -> IdentityConfig {
        let public_key = dir.join("test_user_key.pub");
        std::fs::write(&public_key, "ssh-ed25519 AAAAC3Nza test@host\n").unwrap();
        IdentityConfig {
            public_key,
            ..IdentityConfig::default()
        }
    }

    #[tokio::test]
    async fn provision_creates_exact_payload_and_credentials() {
        let keys = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let identity = identity_in(keys.path());
        let case = TestCase::parse_spec("50KB:10KB:5").unwrap();

        let mut fixture = Fixture::provision(work.path(), &case, &identity)
            .await
            .unwrap();

        let meta = std::fs::metadata(fixture.payload()).unwrap();
        assert_eq!(meta.len(), 51_200);
        assert_eq!(fixture.payload_name(), "test_50.bin");
        assert!(fixture.payload().starts_with(fixture.room_files()));

        let user = std::fs::read_to_string(fixture.users().join("maurits")).unwrap();
        let room = std::fs::read_to_string(fixture.users().join("myroom")).unwrap();
        assert_eq!(user, "ssh-ed25519 AAAAC3Nza test@host");
        assert_eq!(user, room);
        assert!(!fixture.host_key().exists(), "host key is created by the entrypoint");

        fixture.remove().await.unwrap();
        assert!(!fixture.root().exists());
        fixture.remove().await.unwrap();
    }

    #[tokio::test]
    async fn odd_sized_payload_is_exact() {
        let keys = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let identity = identity_in(keys.path());
        let case = TestCase::parse_spec("70001:10KB:5").unwrap();

        let fixture = Fixture::provision(work.path(), &case, &identity)
            .await
            .unwrap();
        assert_eq!(std::fs::metadata(fixture.payload()).unwrap().len(), 70_001);
    }

    #[tokio::test]
    async fn missing_template_leaves_nothing_behind() {
        let work = TempDir::new().unwrap();
        let identity = IdentityConfig {
            public_key: work.path().join("absent.pub"),
            ..IdentityConfig::default()
        };
        let case = TestCase::parse_spec("50KB:10KB:5").unwrap();

        let err = Fixture::provision(work.path(), &case, &identity)
            .await
            .unwrap_err();
        assert!(matches!(err, FixtureError::TemplateMissing { .. }));
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn drop_removes_fixture() {
        let keys = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let identity = identity_in(keys.path());
        let case = TestCase::parse_spec("1KB:1KB").unwrap();

        let root = {
            let fixture = Fixture::provision(work.path(), &case, &identity)
                .await
                .unwrap();
            fixture.root().to_path_buf()
        };
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn failed_removal_can_be_retried() {
        let keys = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let identity = identity_in(keys.path());
        let case = TestCase::parse_spec("1KB:1KB").unwrap();

        let mut fixture = Fixture::provision(work.path(), &case, &identity)
            .await
            .unwrap();
        let root = fixture.root().to_path_buf();

        // A plain file where the tree should be makes the removal fail.
        std::fs::remove_dir_all(&root).unwrap();
        std::fs::write(&root, "not a directory").unwrap();
        assert!(fixture.remove().await.is_err());
        assert!(fixture.remove().await.is_err(), "failure must not be remembered as success");

        std::fs::remove_file(&root).unwrap();
        std::fs::create_dir(&root).unwrap();
        fixture.remove().await.unwrap();
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn fixture_names_are_unique() {
        let case = TestCase::parse_spec("50KB:10KB").unwrap();
        let a = fixture_name(&case);
        let b = fixture_name(&case);
        assert!(a.starts_with("case-50kib-"));
        assert_ne!(a, b);
    }
}
