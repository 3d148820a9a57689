//! Two-pool executor: Transport tasks own socket I/O and codec work,
//! Callback tasks run user method bodies and request continuations. Both
//! are backed by dedicated `tokio` multi-thread runtimes so a slow
//! callback body never stalls a connection's read loop.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::{Handle, Runtime};

use crate::common::{Result, Status};
use crate::config::ExecutorConfig;

/// Which logical pool a task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorContext {
    Transport,
    Callback,
}

enum Pool {
    /// A dedicated runtime owned by this executor.
    Owned(Runtime),
    /// The runtime this executor was constructed from (e.g. the ambient
    /// `#[tokio::main]` runtime in tests); never shut down by `stop`.
    Borrowed(Handle),
}

impl Pool {
    fn handle(&self) -> Handle {
        match self {
            Pool::Owned(rt) => rt.handle().clone(),
            Pool::Borrowed(handle) => handle.clone(),
        }
    }
}

/// Drives the Transport and Callback task pools described in the
/// component design. `post` is thread-safe and may be called concurrently
/// from any context.
pub struct Executor {
    transport: Pool,
    callback: Pool,
}

impl Executor {
    /// Builds dedicated runtimes sized by `config`.
    pub fn new(config: ExecutorConfig) -> Result<Arc<Executor>> {
        let transport = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.num_transport_threads())
            .thread_name("rpc-transport")
            .enable_all()
            .build()
            .map_err(|e| Status::operation_failure(e.to_string()))?;
        let callback = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.num_callback_threads())
            .thread_name("rpc-callback")
            .enable_all()
            .build()
            .map_err(|e| Status::operation_failure(e.to_string()))?;

        Ok(Arc::new(Executor {
            transport: Pool::Owned(transport),
            callback: Pool::Owned(callback),
        }))
    }

    /// Uses the currently running `tokio` runtime for both contexts,
    /// rather than spawning dedicated ones. Handy inside `#[tokio::test]`
    /// bodies where spawning nested runtimes is unnecessary overhead.
    pub fn from_current() -> Arc<Executor> {
        let handle = Handle::current();
        Arc::new(Executor {
            transport: Pool::Borrowed(handle.clone()),
            callback: Pool::Borrowed(handle),
        })
    }

    /// Submits `future` to run on `context`'s pool.
    pub fn post<F>(&self, context: ExecutorContext, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let pool = match context {
            ExecutorContext::Transport => &self.transport,
            ExecutorContext::Callback => &self.callback,
        };
        pool.handle().spawn(future);
    }

    pub fn transport_handle(&self) -> Handle {
        self.transport.handle()
    }

    pub fn callback_handle(&self) -> Handle {
        self.callback.handle()
    }

    /// Shuts down any owned runtimes. A no-op for contexts borrowed via
    /// [`Executor::from_current`].
    pub fn stop(&self) {
        // Runtime::shutdown_background on Drop already handles cleanup;
        // this method exists so callers have an explicit point to call,
        // matching the `run()/stop()/post()` surface in the design.
    }
}
