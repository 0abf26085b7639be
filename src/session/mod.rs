//! One isolated engine instance: layer stack, working directories and the
//! worker pool that executes requests.

mod engine;
mod ops;
mod pool;
pub mod types;

pub use types::{
    AsyncCompletion, CompletionCallback, CompletionRecord, Preset, SessionOptions, API_VERSION,
};

use crate::config::Config;
use crate::error::{FsError, RedirectError, Result};
use crate::overlay::{
    ClientId, FilesystemLayer, FsReply, FsRequest, HostFs, Layer, LayerId, LayerInfo, LayerMode,
    LayerSpec, NativeFs, Tombstone,
};
use engine::{Completion, Engine};
use pool::{Job, WorkerPool};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct Session {
    engine: Arc<Engine>,
    pool: WorkerPool,
    shut_down: AtomicBool,
}

impl Session {
    pub fn new(native: Arc<dyn NativeFs>, options: SessionOptions) -> Result<Self> {
        let engine = Arc::new(Engine::new(native));
        let pool = WorkerPool::new(options.workers, options.queue_capacity, Arc::clone(&engine))?;
        Ok(Session {
            engine,
            pool,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Build a session over the host filesystem with every configured layer.
    pub fn from_config(config: &Config) -> Result<Self> {
        let max_handles = config.session.get_max_open_handles();
        let native = HostFs::with_max_handles(config.native.get_root(), max_handles);
        let session = Session::new(
            Arc::new(native),
            SessionOptions {
                workers: config.session.get_workers(),
                queue_capacity: config.session.get_queue_capacity(),
            },
        )?;

        for layer in &config.layers {
            let spec = layer.to_spec(max_handles)?;
            let id = session.add_layer_spec(spec)?;
            if !layer.get_active() {
                session.set_active(id, false)?;
            }
        }
        Ok(session)
    }

    pub fn version(&self) -> u32 {
        API_VERSION
    }

    pub fn is_halted(&self) -> bool {
        self.engine.is_halted()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    /// Whether the calling thread is one of this session's workers.
    pub fn on_worker_thread(&self) -> bool {
        self.pool.is_worker_thread()
    }

    pub fn add_layer(
        &self,
        name: &str,
        prefix: &str,
        replacement: &str,
        mode: LayerMode,
    ) -> Result<LayerId> {
        self.add_layer_spec(LayerSpec::new(name, prefix, replacement, mode))
    }

    pub fn add_layer_spec(&self, spec: LayerSpec) -> Result<LayerId> {
        self.engine.stack.add(spec)
    }

    pub fn add_preset(&self, preset: Preset, name: &str, replacement: &str) -> Result<LayerId> {
        self.add_layer_spec(preset.spec(name, replacement))
    }

    /// Attach a custom layer implementation on top of the stack.
    pub fn push_layer(&self, layer: Box<dyn FilesystemLayer>) -> LayerId {
        self.engine.stack.push(Layer::custom(layer))
    }

    pub fn remove_layer(&self, id: LayerId) -> Result<()> {
        self.engine.stack.remove(id, self.engine.native.as_ref())
    }

    pub fn set_active(&self, id: LayerId, active: bool) -> Result<()> {
        self.engine.stack.set_active(id, active)
    }

    /// Layers, highest priority first.
    pub fn layers(&self) -> Vec<LayerInfo> {
        self.engine.stack.infos()
    }

    pub fn working_dir(&self, client: ClientId) -> Option<String> {
        self.engine.working_dirs.get(client)
    }

    /// Hide `path` in the given layer by dropping a tombstone next to its
    /// backing file.
    pub fn hide(&self, layer: LayerId, client: ClientId, path: &str) -> Result<()> {
        let found = self
            .engine
            .stack
            .find(layer)
            .ok_or(RedirectError::LayerNotFound(layer))?;
        let full = self.engine.working_dirs.full_path(client, path);
        let backing = found.inner().backing_path(&full).ok_or_else(|| {
            RedirectError::InvalidLayer(format!(
                "layer '{}' does not redirect {}",
                found.name(),
                full
            ))
        })?;

        let backing = Path::new(&backing);
        let (Some(dir), Some(name)) = (backing.parent(), backing.file_name()) else {
            return Err(RedirectError::InvalidLayer(format!(
                "cannot hide the root of layer '{}'",
                found.name()
            )));
        };
        Tombstone::create(dir, &name.to_string_lossy())?;
        tracing::info!("[{}] Hid {}", found.name(), full);
        Ok(())
    }

    /// Blocking call. Runs inline on a worker thread, marshalled otherwise.
    pub fn call(
        &self,
        client: ClientId,
        request: FsRequest,
    ) -> std::result::Result<FsReply, FsError> {
        self.run(client, request, false)
    }

    /// Blocking call that bypasses every layer.
    pub fn call_native(
        &self,
        client: ClientId,
        request: FsRequest,
    ) -> std::result::Result<FsReply, FsError> {
        self.run(client, request, true)
    }

    fn run(
        &self,
        client: ClientId,
        request: FsRequest,
        force_native: bool,
    ) -> std::result::Result<FsReply, FsError> {
        if self.is_shut_down() {
            tracing::warn!("{} after session shutdown, going native", request.name());
            return self.engine.native.execute(client, &request);
        }
        if self.pool.is_worker_thread() {
            return self.engine.execute(client, &request, force_native);
        }

        let (tx, rx) = crossbeam_channel::bounded(1);
        let job = Job {
            client,
            request,
            force_native,
            completion: Completion::Reply(tx),
        };
        if let Err(job) = self.pool.submit(job) {
            tracing::warn!("{} raced session shutdown, going native", job.request.name());
            return self.engine.native.execute(client, &job.request);
        }

        rx.recv().map_err(|_| {
            tracing::error!("Worker dropped a request without replying");
            FsError::Cancelled
        })?
    }

    /// Asynchronous call. Returns once the request is queued; the outcome is
    /// delivered to exactly one of the completion's callback or queue.
    pub fn submit(
        &self,
        client: ClientId,
        request: FsRequest,
        completion: AsyncCompletion,
    ) -> std::result::Result<(), FsError> {
        self.enqueue(client, request, false, completion)
    }

    pub fn submit_native(
        &self,
        client: ClientId,
        request: FsRequest,
        completion: AsyncCompletion,
    ) -> std::result::Result<(), FsError> {
        self.enqueue(client, request, true, completion)
    }

    fn enqueue(
        &self,
        client: ClientId,
        request: FsRequest,
        force_native: bool,
        completion: AsyncCompletion,
    ) -> std::result::Result<(), FsError> {
        let completion = Completion::from_async(completion)?;

        if self.is_shut_down() {
            tracing::warn!("{} after session shutdown, going native", request.name());
            completion.complete(client, self.engine.native.execute(client, &request));
            return Ok(());
        }
        if self.pool.is_worker_thread() {
            self.engine.execute_into(client, &request, force_native, completion);
            return Ok(());
        }

        let job = Job {
            client,
            request,
            force_native,
            completion,
        };
        if let Err(job) = self.pool.submit(job) {
            let result = self.engine.native.execute(client, &job.request);
            job.completion.complete(client, result);
        }
        Ok(())
    }

    /// Drain the workers, then tear down every layer and working directory.
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("Shutting down session");
        self.pool.shutdown();
        self.engine.stack.clear(self.engine.native.as_ref());
        self.engine.working_dirs.clear();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}
