//! Applying and previewing history images on the canvas.

use tracing::debug;
use uuid::Uuid;

use crate::host::{HostError, LayerHandle};
use crate::index::StoredImage;
use crate::{PeerClient, PeerError};

const PREVIEW_PREFIX: &str = "[PREVIEW] ";

/// Path of the temporary preview layer shown next to `layer_path`.
///
/// ```
/// assert_eq!(cksync_peer::preview_layer_path("gen/bg"), "gen/[PREVIEW] bg");
/// assert_eq!(cksync_peer::preview_layer_path("bg"), "[PREVIEW] bg");
/// ```
pub fn preview_layer_path(layer_path: &str) -> String {
    match layer_path.rsplit_once('/') {
        Some((parent, name)) => format!("{parent}/{PREVIEW_PREFIX}{name}"),
        None => format!("{PREVIEW_PREFIX}{layer_path}"),
    }
}

impl PeerClient {
    /// Writes a history image into its target layer, creating the layer
    /// if it no longer exists. Any preview of it is removed first.
    pub fn apply_image(&self, image_id: Uuid) -> Result<(), PeerError> {
        let stored = self.stored(image_id)?;
        self.remove_preview(image_id)?;
        let layer = self.find_or_create(&stored.meta.document_id, &stored.meta.layer)?;
        self.inner.host.write_pixels(layer, &stored.image)?;
        debug!(image = %image_id, layer = %stored.meta.layer, "applied history image");
        Ok(())
    }

    /// Shows a history image in a preview layer beside its target.
    pub fn preview_image(&self, image_id: Uuid) -> Result<(), PeerError> {
        let stored = self.stored(image_id)?;
        let path = preview_layer_path(&stored.meta.layer);
        let layer = self.find_or_create(&stored.meta.document_id, &path)?;
        self.inner.host.write_pixels(layer, &stored.image)?;
        Ok(())
    }

    /// Deletes the preview layer of an image. Returns whether one existed.
    pub fn remove_preview(&self, image_id: Uuid) -> Result<bool, PeerError> {
        let stored = self.stored(image_id)?;
        let path = preview_layer_path(&stored.meta.layer);
        match self.inner.host.find_layer(&stored.meta.document_id, &path) {
            Ok(layer) => {
                self.inner.host.delete_layer(layer)?;
                Ok(true)
            }
            Err(HostError::LayerNotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn stored(&self, image_id: Uuid) -> Result<StoredImage, PeerError> {
        self.inner
            .index
            .lookup(image_id)
            .ok_or(PeerError::UnknownImage(image_id))
    }

    fn find_or_create(&self, document_id: &str, path: &str) -> Result<LayerHandle, PeerError> {
        let host = &self.inner.host;
        match host.find_layer(document_id, path) {
            Ok(layer) => Ok(layer),
            Err(HostError::LayerNotFound { .. }) => Ok(host.create_layer(document_id, path)?),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::MemoryHost;
    use crate::transport::TungsteniteDialer;
    use crate::types::PeerConfig;
    use cksync_imaging::{PngCodec, RawImage};
    use std::sync::Arc;

    fn setup() -> (PeerClient, Arc<MemoryHost>, Uuid) {
        let host = Arc::new(MemoryHost::with_document("D1", "Doc"));
        let peer = PeerClient::with_parts(
            PeerConfig::default(),
            host.clone(),
            Arc::new(PngCodec),
            Arc::new(TungsteniteDialer),
        );
        let (_, metas) = peer
            .index()
            .add_images("D1", "R1", "gen/bg", false, vec![RawImage::blank(4, 4)]);
        (peer, host, metas[0].image_id)
    }

    #[test]
    fn preview_path_prefixes_last_segment() {
        assert_eq!(preview_layer_path("a/b/c"), "a/b/[PREVIEW] c");
        assert_eq!(preview_layer_path("c"), "[PREVIEW] c");
    }

    #[test]
    fn apply_creates_missing_layer() {
        let (peer, host, id) = setup();
        peer.apply_image(id).unwrap();
        assert_eq!(host.layer_paths("D1"), vec!["gen/bg".to_string()]);
        assert_eq!(host.layer_image("D1", "gen/bg").unwrap().width(), 4);
    }

    #[test]
    fn apply_overwrites_existing_layer_and_drops_preview() {
        let (peer, host, id) = setup();
        host.put_layer("D1", "gen/bg", RawImage::blank(1, 1));

        peer.preview_image(id).unwrap();
        assert_eq!(
            host.layer_paths("D1"),
            vec!["gen/[PREVIEW] bg".to_string(), "gen/bg".to_string()]
        );

        peer.apply_image(id).unwrap();
        assert_eq!(host.layer_paths("D1"), vec!["gen/bg".to_string()]);
        assert_eq!(host.layer_image("D1", "gen/bg").unwrap().height(), 4);
    }

    #[test]
    fn remove_preview_reports_absence() {
        let (peer, _host, id) = setup();
        assert!(!peer.remove_preview(id).unwrap());
        peer.preview_image(id).unwrap();
        assert!(peer.remove_preview(id).unwrap());
    }

    #[test]
    fn unknown_image_and_closed_document_fail() {
        let (peer, _host, id) = setup();
        let missing = Uuid::new_v4();
        assert!(matches!(
            peer.apply_image(missing),
            Err(PeerError::UnknownImage(m)) if m == missing
        ));

        peer.index().add_images("gone", "R", "bg", false, vec![RawImage::blank(1, 1)]);
        let gone = peer.index().runs("gone")[0].1[0].image_id;
        assert!(matches!(
            peer.apply_image(gone),
            Err(PeerError::Host(HostError::DocumentNotFound { .. }))
        ));
        assert!(peer.apply_image(id).is_ok());
    }
}
