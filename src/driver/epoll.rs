//! Linux `epoll`-backed [`Driver`]. No poller crate is used: like the
//! teacher, descriptors and readiness are managed with hand-rolled
//! `libc` calls.

use std::cell::{Cell, RefCell};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use libc::{
    epoll_create1, epoll_ctl, epoll_event, epoll_wait, EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT,
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL,
};
use tracing::{debug, warn};

use super::sys::{
    domain_for, parse_listen_addr, sys_accept, sys_bind, sys_close, sys_connect, sys_listen,
    sys_read, sys_set_reuseaddr, sys_socket, sys_write,
};
use super::{Driver, LoopCallbacks};
use crate::error::CoreError;

/// A real, non-blocking `epoll` event loop over one listening socket
/// and however many accepted/outbound descriptors it spawns.
pub struct EpollDriver {
    epoll_fd: RawFd,
    listener: Option<RawFd>,
    events: RefCell<Vec<epoll_event>>,
    initialized: Cell<bool>,
}

impl EpollDriver {
    /// Creates a driver with no listener bound yet.
    pub fn new() -> io::Result<Self> {
        let epoll_fd = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            epoll_fd,
            listener: None,
            events: RefCell::new(Vec::with_capacity(256)),
            initialized: Cell::new(false),
        })
    }

    /// Binds and registers a listening socket at `address`.
    pub fn bind(&mut self, address: &str) -> Result<(), CoreError> {
        let addr = parse_listen_addr(address).map_err(|source| CoreError::InvalidAddress {
            address: address.to_string(),
            source,
        })?;

        let bind_err = |source: io::Error| CoreError::Bind {
            address: address.to_string(),
            source,
        };

        let fd = sys_socket(domain_for(&addr)).map_err(bind_err)?;
        sys_set_reuseaddr(fd).map_err(bind_err)?;
        sys_bind(fd, &addr).map_err(bind_err)?;
        sys_listen(fd).map_err(bind_err)?;
        self.register(fd, EPOLLIN as u32);
        self.listener = Some(fd);
        Ok(())
    }

    fn register(&self, fd: RawFd, flags: u32) {
        let mut event = epoll_event { events: flags, u64: fd as u64 };
        let rc = unsafe { epoll_ctl(self.epoll_fd, EPOLL_CTL_ADD, fd, &mut event) };
        debug_assert_eq!(rc, 0, "epoll_ctl(ADD) failed for fd {fd}");
    }

    fn deregister(&self, fd: RawFd) {
        unsafe {
            epoll_ctl(self.epoll_fd, EPOLL_CTL_DEL, fd, std::ptr::null_mut());
        }
    }

    fn accept_loop(&self, listener: RawFd, callbacks: &mut dyn LoopCallbacks) {
        loop {
            match sys_accept(listener) {
                Ok(client) => {
                    self.register(client, (EPOLLIN | EPOLLOUT) as u32);
                    callbacks.on_write(client);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!(%err, "accept failed");
                    break;
                }
            }
        }
    }
}

impl Driver for EpollDriver {
    fn write(&self, fd: RawFd, data: &[u8]) -> (bool, usize) {
        let n = sys_write(fd, data);
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return (true, 0);
            }
            return (false, 0);
        }
        (true, n as usize)
    }

    fn close(&self, fd: RawFd) -> bool {
        self.deregister(fd);
        sys_close(fd)
    }

    fn connect(&self, host: &str, port: u16) -> Result<RawFd, CoreError> {
        let address = format!("{host}:{port}");
        let addr = parse_listen_addr(&address).map_err(|source| CoreError::Connect {
            host: host.to_string(),
            port,
            source,
        })?;
        let fd = sys_socket(domain_for(&addr)).map_err(|source| CoreError::Connect {
            host: host.to_string(),
            port,
            source,
        })?;
        sys_connect(fd, &addr).map_err(|source| CoreError::Connect {
            host: host.to_string(),
            port,
            source,
        })?;
        self.register(fd, (EPOLLIN | EPOLLOUT) as u32);
        Ok(fd)
    }

    fn run_once(&self, callbacks: &mut dyn LoopCallbacks, timeout: Option<Duration>) -> io::Result<()> {
        if !self.initialized.replace(true) {
            callbacks.on_init(self.listener);
        }

        let timeout_ms = timeout.map(|t| t.as_millis() as i32).unwrap_or(-1);

        let mut events = self.events.borrow_mut();
        let capacity = events.capacity();
        unsafe {
            events.set_len(capacity);
        }
        let n = unsafe { epoll_wait(self.epoll_fd, events.as_mut_ptr(), capacity as i32, timeout_ms) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }
        unsafe {
            events.set_len(n as usize);
        }

        for i in 0..n as usize {
            let ev = events[i];
            let fd = ev.u64 as RawFd;

            if Some(fd) == self.listener {
                self.accept_loop(fd, callbacks);
                continue;
            }

            let readable = ev.events & ((EPOLLIN | EPOLLERR | EPOLLHUP) as u32) != 0;
            let writable = ev.events & (EPOLLOUT as u32) != 0;

            if writable {
                callbacks.on_write(fd);
            }

            if readable {
                let mut buf = [0u8; 8192];
                loop {
                    let n = sys_read(fd, &mut buf);
                    if n > 0 {
                        callbacks.on_data(fd, &buf[..n as usize]);
                        if (n as usize) < buf.len() {
                            break;
                        }
                    } else if n == 0 {
                        debug!(fd, "peer closed");
                        self.deregister(fd);
                        callbacks.on_close(fd);
                        break;
                    } else {
                        let err = io::Error::last_os_error();
                        if err.kind() != io::ErrorKind::WouldBlock {
                            self.deregister(fd);
                            callbacks.on_close(fd);
                        }
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}
