use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum OverlayStoreError {
    #[error("failed to encode overlay store: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to write overlay store {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Full overlay document for one stream, in the shape the player consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct OverlayDocument {
    #[serde(default)]
    pub stream_id: String,
    #[serde(default)]
    pub stream_url: String,
    #[serde(default)]
    pub overlays: OverlaySet,
    #[serde(default)]
    pub positions: PositionSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct OverlaySet {
    #[serde(default)]
    pub image: Vec<ImageOverlay>,
    #[serde(default)]
    pub text: Vec<TextOverlay>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PositionSet {
    #[serde(default)]
    pub image_position: Vec<OverlayPosition>,
    #[serde(default)]
    pub text_position: Vec<OverlayPosition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ImageOverlay {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub src: String,
    /// Free-form CSS-ish attributes, passed through untouched.
    #[serde(default)]
    pub styles: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TextOverlay {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub styles: Map<String, Value>,
}

/// Percent-based placement box; field names match the client payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OverlayPosition {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub x_pct: f64,
    #[serde(default)]
    pub y_pct: f64,
    #[serde(default)]
    pub w_pct: f64,
    #[serde(default)]
    pub h_pct: f64,
}

/// Overlay document store keyed by stream id, persisted as one JSON file.
pub struct OverlayStore {
    path: PathBuf,
    docs: Mutex<HashMap<String, OverlayDocument>>,
}

impl OverlayStore {
    /// Loads the store from disk. A missing file starts the store empty;
    /// a corrupt file is logged and replaced on the next write.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let docs = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(docs) => docs,
                Err(e) => {
                    warn!("Overlay store {:?} is corrupt, starting empty: {}", path, e);
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!("Failed to read overlay store {:?}, starting empty: {}", path, e);
                HashMap::new()
            }
        };
        Self {
            path,
            docs: Mutex::new(docs),
        }
    }

    /// Returns the stored document, or an empty skeleton carrying the id so
    /// clients always get a well-formed shape back.
    pub async fn fetch(&self, stream_id: &str) -> OverlayDocument {
        let docs = self.docs.lock().await;
        docs.get(stream_id).cloned().unwrap_or_else(|| OverlayDocument {
            stream_id: stream_id.to_string(),
            ..OverlayDocument::default()
        })
    }

    /// Replaces the document for `stream_id` and persists the store.
    /// The id from the path wins over whatever the body carried.
    pub async fn upsert(
        &self,
        stream_id: &str,
        mut doc: OverlayDocument,
    ) -> Result<OverlayDocument, OverlayStoreError> {
        doc.stream_id = stream_id.to_string();
        let mut docs = self.docs.lock().await;
        docs.insert(stream_id.to_string(), doc.clone());
        self.persist(&docs).await?;
        info!("Stored overlay document for [{}]", stream_id);
        Ok(doc)
    }

    // Write-then-rename so a crash mid-write never clobbers the last good copy.
    async fn persist(
        &self,
        docs: &HashMap<String, OverlayDocument>,
    ) -> Result<(), OverlayStoreError> {
        let encoded = serde_json::to_vec_pretty(docs).map_err(OverlayStoreError::Encode)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &encoded)
            .await
            .map_err(|e| OverlayStoreError::Write {
                path: tmp.clone(),
                source: e,
            })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| OverlayStoreError::Write {
                path: self.path.clone(),
                source: e,
            })?;
        Ok(())
    }
}
