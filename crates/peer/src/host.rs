//! Access to the paint application's documents and layers.

use cksync_imaging::RawImage;
use cksync_protocol::DocumentRef;

/// Opaque host-assigned layer reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerHandle(pub u64);

/// Errors reported by the host.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("layer {path} not found")]
    LayerNotFound { path: String },

    #[error("document {id} not found")]
    DocumentNotFound { id: String },

    #[error("host operation failed: {0}")]
    Failed(String),
}

/// Document tree of the paint application.
///
/// Layer paths are `/`-delimited from the document root, e.g.
/// `"gen/background"`.
pub trait DocumentHost: Send + Sync + 'static {
    /// Every open document as `(id, display name)`.
    fn list_documents(&self) -> Vec<DocumentRef>;

    fn find_layer(&self, document_id: &str, path: &str) -> Result<LayerHandle, HostError>;

    fn write_pixels(&self, layer: LayerHandle, image: &RawImage) -> Result<(), HostError>;

    fn read_pixels(&self, layer: LayerHandle) -> Result<RawImage, HostError>;

    /// Creates a layer (and any missing parent groups) at `path`.
    fn create_layer(&self, document_id: &str, path: &str) -> Result<LayerHandle, HostError>;

    fn delete_layer(&self, layer: LayerHandle) -> Result<(), HostError>;
}

#[cfg(test)]
pub(crate) mod memory {
    //! In-memory host for tests.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct State {
        documents: Vec<DocumentRef>,
        layers: HashMap<u64, (String, String, Option<RawImage>)>,
        next: u64,
    }

    #[derive(Default)]
    pub(crate) struct MemoryHost {
        state: Mutex<State>,
    }

    impl MemoryHost {
        pub(crate) fn with_document(id: &str, name: &str) -> Self {
            let host = Self::default();
            host.state
                .lock()
                .unwrap()
                .documents
                .push(DocumentRef::new(id, name));
            host
        }

        pub(crate) fn add_document(&self, id: &str, name: &str) {
            self.state
                .lock()
                .unwrap()
                .documents
                .push(DocumentRef::new(id, name));
        }

        pub(crate) fn put_layer(&self, document_id: &str, path: &str, image: RawImage) {
            let handle = self.create_layer(document_id, path).unwrap();
            self.write_pixels(handle, &image).unwrap();
        }

        pub(crate) fn layer_image(&self, document_id: &str, path: &str) -> Option<RawImage> {
            let state = self.state.lock().unwrap();
            state
                .layers
                .values()
                .find(|(d, p, _)| d == document_id && p == path)
                .and_then(|(_, _, img)| img.clone())
        }

        pub(crate) fn layer_paths(&self, document_id: &str) -> Vec<String> {
            let state = self.state.lock().unwrap();
            let mut paths: Vec<String> = state
                .layers
                .values()
                .filter(|(d, _, _)| d == document_id)
                .map(|(_, p, _)| p.clone())
                .collect();
            paths.sort();
            paths
        }
    }

    impl DocumentHost for MemoryHost {
        fn list_documents(&self) -> Vec<DocumentRef> {
            self.state.lock().unwrap().documents.clone()
        }

        fn find_layer(&self, document_id: &str, path: &str) -> Result<LayerHandle, HostError> {
            let state = self.state.lock().unwrap();
            if !state.documents.iter().any(|d| d.id() == document_id) {
                return Err(HostError::DocumentNotFound {
                    id: document_id.into(),
                });
            }
            state
                .layers
                .iter()
                .find(|(_, (d, p, _))| d == document_id && p == path)
                .map(|(k, _)| LayerHandle(*k))
                .ok_or_else(|| HostError::LayerNotFound { path: path.into() })
        }

        fn write_pixels(&self, layer: LayerHandle, image: &RawImage) -> Result<(), HostError> {
            let mut state = self.state.lock().unwrap();
            let entry = state
                .layers
                .get_mut(&layer.0)
                .ok_or_else(|| HostError::Failed("stale handle".into()))?;
            entry.2 = Some(image.clone());
            Ok(())
        }

        fn read_pixels(&self, layer: LayerHandle) -> Result<RawImage, HostError> {
            let state = self.state.lock().unwrap();
            state
                .layers
                .get(&layer.0)
                .and_then(|(_, _, img)| img.clone())
                .ok_or_else(|| HostError::Failed("empty layer".into()))
        }

        fn create_layer(&self, document_id: &str, path: &str) -> Result<LayerHandle, HostError> {
            let mut state = self.state.lock().unwrap();
            if !state.documents.iter().any(|d| d.id() == document_id) {
                return Err(HostError::DocumentNotFound {
                    id: document_id.into(),
                });
            }
            state.next += 1;
            let id = state.next;
            state
                .layers
                .insert(id, (document_id.into(), path.into(), None));
            Ok(LayerHandle(id))
        }

        fn delete_layer(&self, layer: LayerHandle) -> Result<(), HostError> {
            self.state
                .lock()
                .unwrap()
                .layers
                .remove(&layer.0)
                .map(|_| ())
                .ok_or_else(|| HostError::Failed("stale handle".into()))
        }
    }
}
