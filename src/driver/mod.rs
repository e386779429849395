//! The loop-driver boundary: a trait for the thing that actually owns
//! non-blocking descriptors and delivers readiness events, plus its
//! two implementations.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use crate::error::CoreError;

mod sys;

#[cfg(target_os = "linux")]
mod epoll;
#[cfg(target_os = "linux")]
pub use epoll::EpollDriver;

pub mod testing;

/// Everything a worker needs from the underlying OS event source.
pub trait Driver {
    /// Non-blocking write. Returns `(ok, bytes_written)`; `ok=false`
    /// means the descriptor failed terminally and should be closed.
    fn write(&self, fd: RawFd, data: &[u8]) -> (bool, usize);

    /// Requests that `fd` be closed. Returns whether the close
    /// succeeded at the OS level.
    fn close(&self, fd: RawFd) -> bool;

    /// Opens an outbound connection, returning its descriptor.
    fn connect(&self, host: &str, port: u16) -> Result<RawFd, CoreError>;

    /// Runs one iteration of the event loop, delivering any ready
    /// events to `callbacks` before returning. Takes `&self`, not
    /// `&mut self`, so a driver can be shared (via `Rc`) with the
    /// sockets whose writes and closes it also services.
    fn run_once(&self, callbacks: &mut dyn LoopCallbacks, timeout: Option<Duration>) -> io::Result<()>;
}

/// The four notifications a `Driver` delivers back into a worker.
pub trait LoopCallbacks {
    /// Called once, before the loop starts, with the listening
    /// descriptor if the worker bound one.
    fn on_init(&mut self, parent_fd: Option<RawFd>);
    fn on_data(&mut self, fd: RawFd, bytes: &[u8]);
    fn on_write(&mut self, fd: RawFd);
    fn on_close(&mut self, fd: RawFd);
}
