//! The ordered set of layers attached to a session.

use crate::error::{RedirectError, Result};
use crate::overlay::dispatch::ParentLayers;
use crate::overlay::layer::{FilesystemLayer, LayerError, LayerMode, LayerResult, LayerSpec};
use crate::overlay::merge::MergeLayer;
use crate::overlay::native::NativeFs;
use crate::overlay::redirect::RedirectLayer;
use crate::overlay::types::{ClientId, FsReply, FsRequest, LayerId};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_LAYER_ID: AtomicU64 = AtomicU64::new(1);

/// Client id used for requests the stack issues on its own behalf.
pub const SYSTEM_CLIENT: ClientId = 0;

/// A layer as it sits in a stack: identity, activation and the behaviour.
pub struct Layer {
    id: LayerId,
    active: AtomicBool,
    spec: Option<LayerSpec>,
    inner: Box<dyn FilesystemLayer>,
}

impl Layer {
    /// Build the standard layer for `spec`.
    pub fn from_spec(spec: LayerSpec) -> Result<Self> {
        let inner: Box<dyn FilesystemLayer> = match spec.mode {
            LayerMode::Replace => Box::new(RedirectLayer::new(&spec)?),
            LayerMode::Merge => Box::new(MergeLayer::new(&spec)?),
        };
        Ok(Self::build(Some(spec), inner))
    }

    /// Wrap a caller-provided layer implementation.
    pub fn custom(inner: Box<dyn FilesystemLayer>) -> Self {
        Self::build(None, inner)
    }

    fn build(spec: Option<LayerSpec>, inner: Box<dyn FilesystemLayer>) -> Self {
        Layer {
            id: LayerId(NEXT_LAYER_ID.fetch_add(1, Ordering::Relaxed)),
            active: AtomicBool::new(true),
            spec,
            inner,
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn fallback_on_error(&self) -> bool {
        self.inner.fallback_on_error()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn spec(&self) -> Option<&LayerSpec> {
        self.spec.as_ref()
    }

    pub fn inner(&self) -> &dyn FilesystemLayer {
        self.inner.as_ref()
    }

    pub fn info(&self) -> LayerInfo {
        LayerInfo {
            id: self.id,
            name: self.name().to_string(),
            active: self.is_active(),
            fallback_on_error: self.fallback_on_error(),
            spec: self.spec.clone(),
        }
    }

    /// Route one request to the matching layer operation.
    pub(crate) fn handle(
        &self,
        parent: &ParentLayers<'_>,
        request: &FsRequest,
    ) -> LayerResult<FsReply> {
        let layer = self.inner.as_ref();
        match request {
            FsRequest::OpenDir { path } => layer.open_dir(parent, path).map(FsReply::Handle),
            FsRequest::ReadDir { handle } => layer.read_dir(parent, *handle).map(FsReply::Entry),
            FsRequest::RewindDir { handle } => {
                layer.rewind_dir(parent, *handle).map(|_| FsReply::Done)
            }
            FsRequest::CloseDir { handle } => {
                layer.close_dir(parent, *handle).map(|_| FsReply::Done)
            }
            FsRequest::MakeDir { path } => layer.make_dir(path).map(|_| FsReply::Done),
            FsRequest::OpenFile { path, mode } => {
                layer.open_file(path, *mode).map(FsReply::Handle)
            }
            FsRequest::CloseFile { handle } => layer.close_file(*handle).map(|_| FsReply::Done),
            FsRequest::GetStat { path } => layer.get_stat(path).map(FsReply::Stat),
            FsRequest::GetStatFile { handle } => layer.get_stat_file(*handle).map(FsReply::Stat),
            FsRequest::ReadFile { handle, len, pos } => {
                layer.read_file(*handle, *len, *pos).map(FsReply::Data)
            }
            FsRequest::WriteFile { handle, data } => {
                layer.write_file(*handle, data).map(FsReply::Written)
            }
            FsRequest::SetPosFile { handle, pos } => {
                layer.set_pos_file(*handle, *pos).map(|_| FsReply::Done)
            }
            FsRequest::GetPosFile { handle } => {
                layer.get_pos_file(*handle).map(FsReply::Position)
            }
            FsRequest::IsEof { handle } => layer.is_eof(*handle).map(FsReply::Eof),
            FsRequest::TruncateFile { handle } => {
                layer.truncate_file(*handle).map(|_| FsReply::Done)
            }
            FsRequest::FlushFile { handle } => layer.flush_file(*handle).map(|_| FsReply::Done),
            FsRequest::Remove { path } => layer.remove(path).map(|_| FsReply::Done),
            FsRequest::Rename { from, to } => layer.rename(from, to).map(|_| FsReply::Done),
            // Working directories are tracked by the dispatcher
            FsRequest::ChangeDir { .. } => Err(LayerError::ForceParentLayer),
        }
    }
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Snapshot of one layer for listings.
#[derive(Debug, Clone, Serialize)]
pub struct LayerInfo {
    pub id: LayerId,
    pub name: String,
    pub active: bool,
    pub fallback_on_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<LayerSpec>,
}

/// Layers in priority order: index 0 is tried last, the newest layer first.
///
/// Dispatch works on a snapshot, so a layer consulting the layers below it
/// never takes the lock again.
#[derive(Default)]
pub struct LayerStack {
    layers: RwLock<Vec<Arc<Layer>>>,
}

impl LayerStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a layer on top. It takes priority over every existing layer.
    pub fn push(&self, layer: Layer) -> LayerId {
        let id = layer.id();
        tracing::debug!("Adding layer {} '{}'", id, layer.name());
        self.layers.write().push(Arc::new(layer));
        id
    }

    pub fn add(&self, spec: LayerSpec) -> Result<LayerId> {
        Ok(self.push(Layer::from_spec(spec)?))
    }

    /// Detach a layer and release every handle it still owns.
    ///
    /// Handles the layer opened below itself (merged directories) are closed
    /// through the layers that were beneath it.
    pub fn remove(&self, id: LayerId, native: &dyn NativeFs) -> Result<()> {
        let (layer, below) = {
            let mut layers = self.layers.write();
            let index = layers
                .iter()
                .position(|l| l.id() == id)
                .ok_or(RedirectError::LayerNotFound(id))?;
            let layer = layers.remove(index);
            let below: Vec<Arc<Layer>> = layers[..index].to_vec();
            (layer, below)
        };

        tracing::info!("Removing layer {} '{}'", id, layer.name());
        layer
            .inner()
            .close_all(&ParentLayers::new(&below, native, SYSTEM_CLIENT));
        Ok(())
    }

    pub fn set_active(&self, id: LayerId, active: bool) -> Result<()> {
        let layer = self.find(id).ok_or(RedirectError::LayerNotFound(id))?;
        tracing::debug!(
            "Layer {} '{}' is now {}",
            id,
            layer.name(),
            if active { "active" } else { "inactive" }
        );
        layer.set_active(active);
        Ok(())
    }

    pub fn find(&self, id: LayerId) -> Option<Arc<Layer>> {
        self.layers.read().iter().find(|l| l.id() == id).cloned()
    }

    pub fn snapshot(&self) -> Vec<Arc<Layer>> {
        self.layers.read().clone()
    }

    /// Layer infos, highest priority first.
    pub fn infos(&self) -> Vec<LayerInfo> {
        self.layers.read().iter().rev().map(|l| l.info()).collect()
    }

    pub fn len(&self) -> usize {
        self.layers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.read().is_empty()
    }

    /// Tear down every layer, newest first.
    pub fn clear(&self, native: &dyn NativeFs) {
        let mut layers = std::mem::take(&mut *self.layers.write());
        while let Some(layer) = layers.pop() {
            tracing::debug!("Tearing down layer {} '{}'", layer.id(), layer.name());
            layer
                .inner()
                .close_all(&ParentLayers::new(&layers, native, SYSTEM_CLIENT));
        }
    }
}
