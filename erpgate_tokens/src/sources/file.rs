//! A credential store that keeps the refresh token in a local file

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::{fs::OpenOptions, io};

use super::CredentialStore;
use crate::{error::StoreError, RefreshToken, RefreshTokenRef};

/// The default location of the refresh token, relative to the base directory
pub const DEFAULT_REFRESH_TOKEN_PATH: &str = ".refresh-token";

/// A credential store that uses a local file
///
/// Writes go to a sibling temporary file which is then renamed over the
/// target, so a crash mid-write leaves the previous refresh token intact.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Constructs a new file credential store
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// The file backing this store
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_token(&self) -> Result<Option<RefreshToken>, io::Error> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };

        let token = data.trim();
        if token.is_empty() {
            Ok(None)
        } else {
            Ok(Some(RefreshToken::new(token.to_owned())))
        }
    }

    async fn write_token(&self, token: &RefreshTokenRef) -> Result<(), io::Error> {
        use tokio::io::AsyncWriteExt;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let staging = self.staging_path();

        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts.open(&staging).await?;
        file.write_all(token.as_str().as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&staging, &self.path).await
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(ToOwned::to_owned)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// Resolves `path` against `base_dir` unless it is already absolute
pub fn resolve_path(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_owned()
    } else {
        base_dir.join(path)
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&mut self) -> Result<Option<RefreshToken>, StoreError> {
        self.read_token()
            .await
            .map_err(|err| StoreError::new(&self.path, err))
    }

    async fn persist(&mut self, refresh_token: &RefreshTokenRef) -> Result<(), StoreError> {
        self.write_token(refresh_token)
            .await
            .map_err(|err| StoreError::new(&self.path, err))
    }
}
