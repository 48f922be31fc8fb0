use std::path::{Path, PathBuf};

use crate::errors::{AppError, Result};
use crate::utils::sha256_hex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub key: String,
    pub url: String,
    pub hash: String,
}

/// Blob bucket on the local filesystem. Files are addressed by key and
/// exposed under `<public_url>/files/<key>`.
pub struct BlobStorage {
    root: PathBuf,
    public_url: String,
}

impl BlobStorage {
    pub fn open(root: &Path, public_url: &str) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            public_url: public_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn store(&self, company_id: &str, file_name: &str, bytes: &[u8]) -> Result<StoredFile> {
        let hash = sha256_hex(bytes);
        let key = format!(
            "{}/{}-{}",
            sanitize(company_id),
            &hash[..16],
            sanitize(file_name)
        );
        let path = self.resolve(&key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(StoredFile {
            url: self.url_for(&key),
            key,
            hash,
        })
    }

    pub async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("file {} not found", key)))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Reads a file through the URL returned by [`BlobStorage::store`].
    pub async fn read_url(&self, url: &str) -> Result<Vec<u8>> {
        let key = self
            .key_for(url)
            .ok_or_else(|| AppError::BadRequest(format!("{} is not a stored file url", url)))?;
        self.read(key).await
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("{}/files/{}", self.public_url, key)
    }

    pub fn key_for<'a>(&self, url: &'a str) -> Option<&'a str> {
        url.strip_prefix(self.public_url.as_str())?.strip_prefix("/files/")
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || key.starts_with('/')
            || key.starts_with('\\')
            || key.split(|c: char| c == '/' || c == '\\').any(|part| part == "..")
        {
            return Err(AppError::BadRequest(format!("invalid file key: {:?}", key)));
        }
        Ok(self.root.join(key))
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}
