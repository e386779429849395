//! Embeddable single-threaded async I/O and HTTP framework.
//!
//! A worker owns exactly one [`driver::Driver`] and one
//! [`dispatcher::Dispatcher`] on one OS thread: sockets, the task
//! scheduler, and the promise primitive are all `Rc`/`Cell`-based and
//! never cross a thread boundary. Request handlers are plain `async
//! fn` bodies driven by the crate's own minimal scheduler rather than
//! a general-purpose executor.

mod combinators;
mod coroutine;
mod dispatcher;
mod driver;
mod http;
mod reader;
mod router;
mod socket;
mod task;
mod worker;

pub mod error;
pub mod promise;

pub use combinators::{chain, gather, ChainStep, ChainStepResult};
pub use coroutine::{bind_coroutine, ChunkStream};
pub use dispatcher::Dispatcher;
pub use driver::{Driver, LoopCallbacks};
pub use error::CoreError;
pub use http::{parse_query, serve_http};
pub use promise::{prepare_promise, Promise, Resolver};
pub use reader::BufferedReader;
pub use router::{Handler, Router};
pub use socket::Socket;
pub use worker::{WorkerId, WorkerRuntime, WorkerRuntimeBuilder};

#[cfg(target_os = "linux")]
pub use driver::EpollDriver;

pub mod testing {
    //! In-memory driver for exercising sockets, the dispatcher, and
    //! HTTP parsing without real file descriptors.
    pub use crate::driver::testing::FakeDriver;
}
