//! Filesystem snapshot store.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

use crate::detect::{Detection, Frame};

use super::traits::{EnrichError, SnapshotStore};
use super::types::SnapshotRefs;

/// Writes frame images under a base directory, one subdirectory per device.
/// The returned references are filesystem paths.
pub struct FsSnapshotStore {
    base_dir: PathBuf,
}

impl FsSnapshotStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }
}

#[async_trait]
impl SnapshotStore for FsSnapshotStore {
    async fn store(
        &self,
        frame: &Frame,
        _detections: &[Detection],
    ) -> Result<SnapshotRefs, EnrichError> {
        let dir = self.base_dir.join(&frame.device_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| EnrichError::Snapshot(format!("create dir failed: {}", e)))?;

        let filename = format!(
            "{}-{}.jpg",
            frame.captured_at.timestamp_millis(),
            Uuid::new_v4().simple()
        );
        let path = dir.join(filename);

        tokio::fs::write(&path, &frame.data)
            .await
            .map_err(|e| EnrichError::Snapshot(format!("write failed: {}", e)))?;

        debug!(path = %path.display(), "Snapshot stored");
        Ok(SnapshotRefs {
            original: path.to_string_lossy().to_string(),
            annotated: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_store_writes_frame_bytes() {
        let temp = tempfile::tempdir().unwrap();
        let store = FsSnapshotStore::new(temp.path().to_path_buf());

        let frame = Frame {
            device_id: "cam1".to_string(),
            captured_at: Utc::now(),
            data: vec![1, 2, 3, 4],
            width: 2,
            height: 2,
        };

        let refs = store.store(&frame, &[]).await.unwrap();
        assert!(refs.annotated.is_none());
        let written = std::fs::read(&refs.original).unwrap();
        assert_eq!(written, vec![1, 2, 3, 4]);
        assert!(refs.original.contains("cam1"));
    }
}
