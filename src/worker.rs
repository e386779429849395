//! Owns one `Dispatcher` and one `Driver` on a single OS thread.
//!
//! Replaces the source's process-wide `WORKERID`/`ELFD` globals with
//! an explicit, embeddable handle: nothing here is a global, so an
//! embedder can run as many workers (one per OS process, or one per
//! thread if it accepts the loss of the "single-threaded worker"
//! invariant elsewhere) as it likes.

use std::rc::Rc;
use std::time::Duration;

use tracing::info;

use crate::dispatcher::Dispatcher;
use crate::driver::Driver;
use crate::driver::EpollDriver;
use crate::error::CoreError;
use crate::router::Router;

/// Identifies a worker for logging and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u32);

impl WorkerId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

/// Configures a [`WorkerRuntime`] before it binds any listeners.
pub struct WorkerRuntimeBuilder {
    id: WorkerId,
    listen_addresses: Vec<String>,
    router: Router,
}

impl WorkerRuntimeBuilder {
    pub fn new(id: WorkerId) -> Self {
        Self {
            id,
            listen_addresses: Vec::new(),
            router: Router::new(),
        }
    }

    /// Adds an address (`host:port`) this worker should listen on.
    pub fn listen(mut self, address: impl Into<String>) -> Self {
        self.listen_addresses.push(address.into());
        self
    }

    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Binds every configured listener and produces a runnable worker.
    pub fn build(self) -> Result<WorkerRuntime, CoreError> {
        let mut driver = EpollDriver::new().map_err(|source| CoreError::Bind {
            address: "<epoll_create1>".to_string(),
            source,
        })?;

        for address in &self.listen_addresses {
            driver.bind(address)?;
        }

        let driver = Rc::new(driver);
        let mut dispatcher = Dispatcher::new(driver.clone());
        dispatcher.set_router(self.router);

        info!(worker = self.id.get(), listeners = ?self.listen_addresses, "worker runtime ready");

        Ok(WorkerRuntime {
            id: self.id,
            driver,
            dispatcher,
        })
    }
}

/// A running worker: one event loop, one dispatcher, one thread.
pub struct WorkerRuntime {
    id: WorkerId,
    driver: Rc<EpollDriver>,
    dispatcher: Dispatcher<EpollDriver>,
}

impl WorkerRuntime {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Runs one iteration of the event loop.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> std::io::Result<()> {
        self.driver.run_once(&mut self.dispatcher, timeout)
    }

    /// Runs the event loop until an iteration returns an error.
    pub fn run_until_stopped(&mut self) -> std::io::Result<()> {
        loop {
            self.poll_once(None)?;
        }
    }
}
