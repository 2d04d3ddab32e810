//! Local-disk asset store.
//!
//! Layout under the storage root:
//! - `generated/{owner}/{asset_id}.{ext}` holds the bytes
//! - `index/{asset_id}.json` holds the `AssetRef`, so lookups need only the id

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use genstream_domain::{AssetId, AssetRef, UserId};

use crate::infrastructure::config::AssetStoreConfig;
use crate::infrastructure::ports::{AssetError, AssetStorePort, ReferenceContent};

pub struct FileAssetStore {
    root: PathBuf,
    public_base_url: String,
}

impl FileAssetStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &AssetStoreConfig) -> Self {
        Self::new(&config.storage_dir, &config.public_base_url)
    }

    /// Directory served under `/assets`.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self, id: AssetId) -> PathBuf {
        self.root.join("index").join(format!("{id}.json"))
    }
}

fn extension_for(mime_type: &str) -> Result<&'static str, AssetError> {
    let normalized = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match normalized.as_str() {
        "image/png" => Ok("png"),
        "image/jpeg" | "image/jpg" => Ok("jpg"),
        "image/webp" => Ok("webp"),
        "image/gif" => Ok("gif"),
        other => match other.split_once('/') {
            Some((kind, sub)) if !kind.is_empty() && !sub.is_empty() => Ok("bin"),
            _ => Err(AssetError::UnsupportedMimeType(mime_type.to_string())),
        },
    }
}

#[async_trait]
impl AssetStorePort for FileAssetStore {
    async fn resolve_reference(
        &self,
        id: AssetId,
    ) -> Result<Option<ReferenceContent>, AssetError> {
        let raw = match fs::read(self.index_path(id)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AssetError::storage(e)),
        };
        let asset: AssetRef = serde_json::from_slice(&raw).map_err(AssetError::storage)?;

        match fs::read(self.root.join(&asset.key)).await {
            Ok(data) => Ok(Some(ReferenceContent {
                mime_type: asset.mime_type,
                data,
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(asset_id = %id, key = %asset.key, "Asset index points at a missing file");
                Ok(None)
            }
            Err(e) => Err(AssetError::storage(e)),
        }
    }

    async fn store(
        &self,
        data: Vec<u8>,
        mime_type: &str,
        owner: UserId,
    ) -> Result<AssetRef, AssetError> {
        let ext = extension_for(mime_type)?;
        let id = AssetId::new();
        let key = format!("generated/{owner}/{id}.{ext}");
        let path = self.root.join(&key);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(AssetError::storage)?;
        }
        fs::write(&path, &data).await.map_err(AssetError::storage)?;

        let asset = AssetRef {
            id,
            url: format!("{}/{}", self.public_base_url, key),
            key,
            mime_type: mime_type.to_string(),
            size: data.len() as u64,
            owner,
        };

        let index_path = self.index_path(id);
        if let Some(parent) = index_path.parent() {
            fs::create_dir_all(parent).await.map_err(AssetError::storage)?;
        }
        let record = serde_json::to_vec(&asset).map_err(AssetError::storage)?;
        fs::write(&index_path, record).await.map_err(AssetError::storage)?;

        tracing::debug!(asset_id = %id, size = asset.size, "Stored generated asset");
        Ok(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_then_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAssetStore::new(dir.path(), "http://localhost:3000/assets/");
        let owner = UserId::new();

        let asset = store.store(vec![7, 8, 9], "image/png", owner).await.unwrap();
        assert_eq!(asset.key, format!("generated/{owner}/{}.png", asset.id));
        assert_eq!(
            asset.url,
            format!("http://localhost:3000/assets/{}", asset.key)
        );
        assert_eq!(asset.size, 3);
        assert!(dir.path().join(&asset.key).exists());

        let resolved = store.resolve_reference(asset.id).await.unwrap().unwrap();
        assert_eq!(resolved.mime_type, "image/png");
        assert_eq!(resolved.data, vec![7, 8, 9]);
    }

    #[tokio::test]
    async fn unknown_reference_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAssetStore::new(dir.path(), "http://x");
        assert!(store
            .resolve_reference(AssetId::new())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn missing_file_behind_index_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAssetStore::new(dir.path(), "http://x");
        let asset = store.store(vec![1], "image/webp", UserId::new()).await.unwrap();
        std::fs::remove_file(dir.path().join(&asset.key)).unwrap();

        assert!(store.resolve_reference(asset.id).await.unwrap().is_none());
    }

    #[test]
    fn extension_mapping() {
        assert_eq!(extension_for("image/jpeg").unwrap(), "jpg");
        assert_eq!(extension_for("IMAGE/PNG; charset=binary").unwrap(), "png");
        assert_eq!(extension_for("application/pdf").unwrap(), "bin");
        assert!(matches!(
            extension_for("garbage"),
            Err(AssetError::UnsupportedMimeType(_))
        ));
    }
}
