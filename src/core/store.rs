//! Durable storage of the last accepted credential set

use std::{
    fs::Permissions,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::{debug, info, warn};

use crate::core::{error::StoreResult, types::StoredCredentialRecord};

/// Mode of the persisted record; it holds a secret
pub const RECORD_FILE_MODE: u32 = 0o600;

const STAGING_SUFFIX: &str = "staging";

/// File-backed holder of the single current [`StoredCredentialRecord`]
///
/// `replace` writes a staging file next to the record, syncs it and renames
/// it over the canonical path, so a reader or a crash sees either the old or
/// the new record and never a partial one. Writers are serialized; readers
/// are not blocked.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".");
        name.push(STAGING_SUFFIX);
        PathBuf::from(name)
    }

    /// Make sure the store directory exists and any existing record is readable
    pub async fn prepare(&self) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        // Leftover from an interrupted replace; the canonical file is intact
        let staging = self.staging_path();
        if fs::try_exists(&staging).await? {
            warn!(path = %staging.display(), "Removing stale staging file");
            fs::remove_file(&staging).await?;
        }

        match self.load().await? {
            Some(record) => info!(
                network = %record.network_name,
                verified = record.verified,
                "Found stored credentials"
            ),
            None => debug!(path = %self.path.display(), "No stored credentials"),
        }
        Ok(())
    }

    /// Read the current record, `None` if nothing was ever stored
    pub async fn load(&self) -> StoreResult<Option<StoredCredentialRecord>> {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: StoredCredentialRecord = serde_json::from_slice(&data)?;
        record.credentials()?;
        Ok(Some(record))
    }

    /// Atomically replace the current record
    pub async fn replace(&self, record: &StoredCredentialRecord) -> StoreResult<()> {
        let data = serde_json::to_vec_pretty(record)?;
        let _guard = self.write_lock.lock().await;

        let staging = self.staging_path();
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(RECORD_FILE_MODE)
            .open(&staging)
            .await?;
        fs::set_permissions(&staging, Permissions::from_mode(RECORD_FILE_MODE)).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&staging, &self.path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(e.into());
        }

        // Persist the rename itself
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            match fs::File::open(parent).await {
                Ok(dir) => {
                    if let Err(e) = dir.sync_all().await {
                        warn!("Failed to sync store directory: {}", e);
                    }
                }
                Err(e) => warn!("Failed to open store directory: {}", e),
            }
        }

        debug!(
            network = %record.network_name,
            verified = record.verified,
            "Stored credential record replaced"
        );
        Ok(())
    }
}
