use crate::error::FsError;
use crate::overlay::{dispatch, ClientId, FsReply, FsRequest, LayerStack, NativeFs, WorkingDirs};
use crate::session::types::{AsyncCompletion, CompletionCallback, CompletionRecord};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Session state shared with the worker threads.
pub(crate) struct Engine {
    pub stack: LayerStack,
    pub native: Arc<dyn NativeFs>,
    pub working_dirs: WorkingDirs,
    halted: AtomicBool,
}

impl Engine {
    pub fn new(native: Arc<dyn NativeFs>) -> Self {
        Engine {
            stack: LayerStack::new(),
            native,
            working_dirs: WorkingDirs::new(),
            halted: AtomicBool::new(false),
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Run one request on the current thread.
    pub fn execute(
        &self,
        client: ClientId,
        request: &FsRequest,
        force_native: bool,
    ) -> Result<FsReply, FsError> {
        if self.is_halted() {
            return Err(FsError::Fatal("session halted".to_string()));
        }

        let result = if force_native {
            self.native.execute(client, request)
        } else {
            let layers = self.stack.snapshot();
            dispatch(
                &layers,
                self.native.as_ref(),
                &self.working_dirs,
                client,
                request,
            )
        };

        if let Err(FsError::Fatal(reason)) = &result {
            tracing::error!(
                "{} for client {:08X} hit a fatal error, halting session: {}",
                request.name(),
                client,
                reason
            );
            self.halted.store(true, Ordering::Release);
        }
        result
    }

    /// Run one request and hand the outcome to `completion`.
    ///
    /// Native-only requests use the collaborator's callback form directly.
    pub fn execute_into(
        &self,
        client: ClientId,
        request: &FsRequest,
        force_native: bool,
        completion: Completion,
    ) {
        if force_native && !self.is_halted() {
            self.native.execute_with(
                client,
                request,
                Box::new(move |result| completion.complete(client, result)),
            );
            return;
        }
        completion.complete(client, self.execute(client, request, force_native));
    }
}

/// Where a finished request goes.
pub(crate) enum Completion {
    /// A blocked caller waiting on a reply slot.
    Reply(Sender<Result<FsReply, FsError>>),
    Callback(CompletionCallback),
    Queue {
        tx: UnboundedSender<CompletionRecord>,
        tag: u64,
    },
}

impl Completion {
    /// Validate an asynchronous completion: exactly one target.
    pub fn from_async(completion: AsyncCompletion) -> Result<Self, FsError> {
        match (completion.callback, completion.queue) {
            (Some(callback), None) => Ok(Completion::Callback(callback)),
            (None, Some((tx, tag))) => Ok(Completion::Queue { tx, tag }),
            (Some(_), Some(_)) => {
                tracing::error!("Async request has both a callback and a completion queue");
                Err(FsError::InvalidArgument)
            }
            (None, None) => {
                tracing::error!("Async request has neither a callback nor a completion queue");
                Err(FsError::InvalidArgument)
            }
        }
    }

    pub fn complete(self, client: ClientId, result: Result<FsReply, FsError>) {
        match self {
            Completion::Reply(tx) => {
                if tx.send(result).is_err() {
                    tracing::warn!("Caller for client {:08X} stopped waiting for its reply", client);
                }
            }
            Completion::Callback(callback) => callback(result),
            Completion::Queue { tx, tag } => {
                if tx.send(CompletionRecord { tag, client, result }).is_err() {
                    tracing::warn!("Completion queue for tag {} is closed", tag);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::{FilesystemLayer, Layer, LayerResult, FileStat};

    struct Broken;

    impl FilesystemLayer for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn fallback_on_error(&self) -> bool {
            true
        }

        fn get_stat(&self, _path: &str) -> LayerResult<FileStat> {
            Err(FsError::Fatal("handle from the wrong table".to_string()).into())
        }
    }

    struct Native;

    impl NativeFs for Native {
        fn execute(&self, _client: ClientId, _request: &FsRequest) -> Result<FsReply, FsError> {
            Ok(FsReply::Done)
        }
    }

    fn stat_request() -> FsRequest {
        FsRequest::GetStat {
            path: "/x".to_string(),
        }
    }

    #[test]
    fn test_fatal_halts_engine() {
        let engine = Engine::new(Arc::new(Native));
        engine.stack.push(Layer::custom(Box::new(Broken)));

        let err = engine.execute(1, &stat_request(), false).unwrap_err();
        assert!(err.is_fatal());
        assert!(engine.is_halted());

        // Even native-only requests are refused afterwards
        let err = engine.execute(1, &stat_request(), true).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_force_native_skips_layers() {
        let engine = Engine::new(Arc::new(Native));
        engine.stack.push(Layer::custom(Box::new(Broken)));
        assert_eq!(engine.execute(1, &stat_request(), true), Ok(FsReply::Done));
        assert!(!engine.is_halted());
    }

    #[test]
    fn test_async_completion_needs_exactly_one_target() {
        assert_eq!(
            Completion::from_async(AsyncCompletion::default()).err(),
            Some(FsError::InvalidArgument)
        );

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let both = AsyncCompletion {
            callback: Some(Box::new(|_| {})),
            queue: Some((tx, 1)),
        };
        assert_eq!(Completion::from_async(both).err(), Some(FsError::InvalidArgument));
    }

    #[test]
    fn test_queue_completion_posts_record() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let completion = Completion::from_async(AsyncCompletion::queue(tx, 42)).unwrap();
        completion.complete(7, Ok(FsReply::Done));

        let record = rx.try_recv().unwrap();
        assert_eq!(record.tag, 42);
        assert_eq!(record.client, 7);
        assert_eq!(record.result, Ok(FsReply::Done));
    }
}
