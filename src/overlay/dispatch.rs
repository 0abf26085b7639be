//! Request dispatch across a layer stack.
//!
//! Layers are tried from the top (most recently added) down. A layer either
//! answers, defers with `ForceParentLayer`, or fails. Failures are final
//! unless the layer falls back on error and the failure is not flagged
//! `no_fallback`. When nobody answers, the native filesystem gets the
//! original request.

use crate::error::FsError;
use crate::overlay::layer::LayerError;
use crate::overlay::native::NativeFs;
use crate::overlay::path_resolver::WorkingDirs;
use crate::overlay::stack::Layer;
use crate::overlay::types::{ClientId, DirEntry, FsReply, FsRequest, Handle};
use std::sync::Arc;

/// Everything below a given layer: the lower part of the stack plus native.
pub struct ParentLayers<'a> {
    layers: &'a [Arc<Layer>],
    native: &'a dyn NativeFs,
    client: ClientId,
}

impl<'a> ParentLayers<'a> {
    pub fn new(layers: &'a [Arc<Layer>], native: &'a dyn NativeFs, client: ClientId) -> Self {
        ParentLayers {
            layers,
            native,
            client,
        }
    }

    /// Run `request` against the layers below, then native.
    pub fn dispatch(&self, request: &FsRequest) -> Result<FsReply, FsError> {
        dispatch_layers(self.layers, self.native, self.client, request, request)
    }

    pub fn open_dir(&self, path: &str) -> Result<Handle, FsError> {
        self.dispatch(&FsRequest::OpenDir {
            path: path.to_string(),
        })?
        .into_handle()
    }

    pub fn read_dir(&self, handle: Handle) -> Result<Option<DirEntry>, FsError> {
        self.dispatch(&FsRequest::ReadDir { handle })?.into_entry()
    }

    pub fn rewind_dir(&self, handle: Handle) -> Result<(), FsError> {
        self.dispatch(&FsRequest::RewindDir { handle })?.into_done()
    }

    pub fn close_dir(&self, handle: Handle) -> Result<(), FsError> {
        self.dispatch(&FsRequest::CloseDir { handle })?.into_done()
    }
}

/// Dispatch one caller request.
///
/// Relative paths are made absolute against the client's working directory
/// before any layer sees them. `ChangeDir` always updates the working
/// directory and then goes straight to native.
pub fn dispatch(
    layers: &[Arc<Layer>],
    native: &dyn NativeFs,
    working_dirs: &WorkingDirs,
    client: ClientId,
    request: &FsRequest,
) -> Result<FsReply, FsError> {
    if let FsRequest::ChangeDir { path } = request {
        working_dirs.set(client, path);
        return native.execute(client, request);
    }

    let resolved = request.map_paths(|p| working_dirs.full_path(client, p));
    dispatch_layers(layers, native, client, &resolved, request)
}

/// Walk `layers` top-down with `resolved`; native receives `original`.
pub(crate) fn dispatch_layers(
    layers: &[Arc<Layer>],
    native: &dyn NativeFs,
    client: ClientId,
    resolved: &FsRequest,
    original: &FsRequest,
) -> Result<FsReply, FsError> {
    for index in (0..layers.len()).rev() {
        let layer = &layers[index];
        if !layer.is_active() {
            continue;
        }

        let parent = ParentLayers::new(&layers[..index], native, client);
        match layer.handle(&parent, resolved) {
            Ok(reply) => return Ok(reply),
            Err(LayerError::ForceParentLayer) => continue,
            Err(LayerError::Failed { error, no_fallback }) => {
                if no_fallback || !layer.fallback_on_error() || !error.is_fallback_eligible() {
                    tracing::trace!(
                        "[{}] {} failed finally: {}",
                        layer.name(),
                        resolved.name(),
                        error
                    );
                    return Err(error);
                }
                tracing::debug!(
                    "[{}] {} failed with {}, trying the next layer",
                    layer.name(),
                    resolved.name(),
                    error
                );
            }
        }
    }

    native.execute(client, original)
}
