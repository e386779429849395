//! An in-memory, deterministic [`Driver`] used only by this crate's
//! own test suite: no real descriptors, scriptable write outcomes.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use super::{Driver, LoopCallbacks};
use crate::error::CoreError;

#[derive(Default)]
struct State {
    write_script: HashMap<RawFd, VecDeque<(bool, usize)>>,
    close_script: HashMap<RawFd, bool>,
    closed: Vec<RawFd>,
    written: Vec<(RawFd, Vec<u8>)>,
    next_connect_fd: RawFd,
}

/// A scriptable driver: tests enqueue exactly the `(ok, bytes_written)`
/// outcomes a call to `write` should observe, then drive events
/// through the `LoopCallbacks` trait directly.
pub struct FakeDriver {
    state: RefCell<State>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(State {
                next_connect_fd: 1000,
                ..Default::default()
            }),
        }
    }

    /// Queues one `write` outcome for `fd`.
    pub fn script_write(&self, fd: RawFd, ok: bool, bytes_written: usize) {
        self.state
            .borrow_mut()
            .write_script
            .entry(fd)
            .or_default()
            .push_back((ok, bytes_written));
    }

    /// Sets the outcome `close(fd)` should report.
    pub fn script_close(&self, fd: RawFd, ok: bool) {
        self.state.borrow_mut().close_script.insert(fd, ok);
    }

    pub fn closed_fds(&self) -> Vec<RawFd> {
        self.state.borrow().closed.clone()
    }

    pub fn written_bytes(&self, fd: RawFd) -> Vec<u8> {
        self.state
            .borrow()
            .written
            .iter()
            .filter(|(written_fd, _)| *written_fd == fd)
            .flat_map(|(_, bytes)| bytes.clone())
            .collect()
    }
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for FakeDriver {
    fn write(&self, fd: RawFd, data: &[u8]) -> (bool, usize) {
        let mut state = self.state.borrow_mut();
        let outcome = state
            .write_script
            .get_mut(&fd)
            .and_then(VecDeque::pop_front)
            .unwrap_or((true, data.len()));

        if outcome.0 {
            let written = outcome.1.min(data.len());
            state.written.push((fd, data[..written].to_vec()));
        }
        outcome
    }

    fn close(&self, fd: RawFd) -> bool {
        let mut state = self.state.borrow_mut();
        state.closed.push(fd);
        state.close_script.get(&fd).copied().unwrap_or(true)
    }

    fn connect(&self, host: &str, port: u16) -> Result<RawFd, CoreError> {
        if host.is_empty() {
            return Err(CoreError::Connect {
                host: host.to_string(),
                port,
                source: io::Error::new(io::ErrorKind::InvalidInput, "empty host"),
            });
        }
        let mut state = self.state.borrow_mut();
        let fd = state.next_connect_fd;
        state.next_connect_fd += 1;
        Ok(fd)
    }

    fn run_once(&self, _callbacks: &mut dyn LoopCallbacks, _timeout: Option<Duration>) -> io::Result<()> {
        // Tests drive events directly through `LoopCallbacks`; this
        // driver never produces events on its own.
        Ok(())
    }
}
