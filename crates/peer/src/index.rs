//! Generated-image history: document → run → images.
//!
//! Runs are kept per document in insertion order; the last one is the
//! "previous run" that appending frames join. Every mutation happens in
//! one critical section so a document close racing an incoming frame
//! never leaves a run pointing at purged images.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cksync_imaging::RawImage;
use uuid::Uuid;

/// Metadata of one stored image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMeta {
    pub image_id: Uuid,
    pub document_id: String,
    pub run_id: String,
    /// Layer the image was generated for.
    pub layer: String,
}

/// A stored image and its metadata.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub meta: ImageMeta,
    pub image: Arc<RawImage>,
}

#[derive(Debug)]
struct RunBucket {
    run_id: String,
    images: Vec<Uuid>,
}

#[derive(Debug, Default)]
struct IndexState {
    runs: HashMap<String, Vec<RunBucket>>,
    images: HashMap<Uuid, StoredImage>,
}

#[derive(Debug, Default)]
pub struct ImageIndex {
    state: Mutex<IndexState>,
}

impl ImageIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Files `images` under `run_id` for `document_id`.
    ///
    /// With `append` set and an existing run for the document, the images
    /// join the most recent run instead. Returns the run id used and the
    /// metadata of the new images in order. An empty batch reports the run
    /// it would have joined but leaves the history untouched.
    pub fn add_images(
        &self,
        document_id: &str,
        run_id: &str,
        layer: &str,
        append: bool,
        images: Vec<RawImage>,
    ) -> (String, Vec<ImageMeta>) {
        let mut state = self.lock();
        let IndexState { runs, images: map } = &mut *state;

        if images.is_empty() {
            let buckets = runs.get(document_id).map(Vec::as_slice).unwrap_or_default();
            let run = match buckets.last() {
                Some(last) if append => last.run_id.clone(),
                _ => run_id.to_string(),
            };
            return (run, Vec::new());
        }

        let buckets = runs.entry(document_id.to_string()).or_default();

        let existing = buckets.iter().position(|b| b.run_id == run_id);
        let bucket_idx = match existing {
            _ if append && !buckets.is_empty() => buckets.len() - 1,
            Some(idx) => idx,
            None => {
                buckets.push(RunBucket {
                    run_id: run_id.to_string(),
                    images: Vec::new(),
                });
                buckets.len() - 1
            }
        };
        let bucket = &mut buckets[bucket_idx];
        let effective_run = bucket.run_id.clone();

        let mut added = Vec::with_capacity(images.len());
        for image in images {
            let meta = ImageMeta {
                image_id: Uuid::new_v4(),
                document_id: document_id.to_string(),
                run_id: effective_run.clone(),
                layer: layer.to_string(),
            };
            bucket.images.push(meta.image_id);
            map.insert(
                meta.image_id,
                StoredImage {
                    meta: meta.clone(),
                    image: Arc::new(image),
                },
            );
            added.push(meta);
        }

        tracing::debug!(
            document = %document_id,
            run = %effective_run,
            count = added.len(),
            "indexed images"
        );
        (effective_run, added)
    }

    /// Removes one image. An emptied run is removed with it.
    pub fn discard(&self, document_id: &str, run_id: &str, image_id: Uuid) -> bool {
        let mut state = self.lock();
        let IndexState { runs, images } = &mut *state;

        let Some(buckets) = runs.get_mut(document_id) else {
            return false;
        };
        let Some(idx) = buckets.iter().position(|b| b.run_id == run_id) else {
            return false;
        };
        let bucket = &mut buckets[idx];
        let Some(pos) = bucket.images.iter().position(|id| *id == image_id) else {
            return false;
        };

        bucket.images.remove(pos);
        images.remove(&image_id);
        if bucket.images.is_empty() {
            buckets.remove(idx);
        }
        if buckets.is_empty() {
            runs.remove(document_id);
        }
        true
    }

    /// Drops every run and image of `document_id`. Returns the number of
    /// images removed.
    pub fn clear(&self, document_id: &str) -> usize {
        let mut state = self.lock();
        let IndexState { runs, images } = &mut *state;
        let Some(buckets) = runs.remove(document_id) else {
            return 0;
        };
        let mut removed = 0;
        for id in buckets.iter().flat_map(|b| b.images.iter()) {
            if images.remove(id).is_some() {
                removed += 1;
            }
        }
        removed
    }

    pub fn lookup(&self, image_id: Uuid) -> Option<StoredImage> {
        self.lock().images.get(&image_id).cloned()
    }

    /// Runs of `document_id`, oldest first, each with its images in order.
    pub fn runs(&self, document_id: &str) -> Vec<(String, Vec<ImageMeta>)> {
        let state = self.lock();
        let Some(buckets) = state.runs.get(document_id) else {
            return Vec::new();
        };
        buckets
            .iter()
            .map(|b| {
                let metas = b
                    .images
                    .iter()
                    .filter_map(|id| state.images.get(id).map(|s| s.meta.clone()))
                    .collect();
                (b.run_id.clone(), metas)
            })
            .collect()
    }

    /// Total number of stored images.
    pub fn len(&self) -> usize {
        self.lock().images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
