//! A single connection as seen from inside a worker: buffered writes,
//! four reinstallable event hooks, and the `http_response` convenience.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use tracing::debug;

use crate::driver::Driver;

struct PendingWrite {
    data: Vec<u8>,
    offset: usize,
}

/// Data/close hooks take the shared handle rather than `&mut Socket`:
/// they may resume a coroutine that reaches back into the same
/// `RefCell` (to write a response, close, and so on), which would
/// deadlock-by-panic against a borrow the dispatcher is still holding
/// if the hook only had a bare `&mut Socket` to work with.
type DataHandler = Box<dyn FnMut(&Rc<RefCell<Socket>>, &[u8])>;
type CloseHandler = Box<dyn FnMut(&Rc<RefCell<Socket>>)>;
type ConnectHandler = Box<dyn FnMut(&mut Socket)>;
type WriteHandler = Box<dyn FnMut(&mut Socket)>;

fn noop_data(_: &Rc<RefCell<Socket>>, _: &[u8]) {}
fn noop_close(_: &Rc<RefCell<Socket>>) {}
fn noop_connect(_: &mut Socket) {}
fn noop_write(_: &mut Socket) {}

/// One connection's state and buffered-write logic, independent of
/// whatever is currently consuming its events. Owns a handle to the
/// driver it was created on so callers never have to thread one
/// through every write call.
pub struct Socket {
    fd: RawFd,
    driver: Rc<dyn Driver>,
    connected: bool,
    writable: bool,
    close_after_write: bool,
    closed: bool,
    close_requested: bool,
    queue: VecDeque<PendingWrite>,

    on_connect: ConnectHandler,
    on_data: DataHandler,
    on_write: WriteHandler,
    on_close: CloseHandler,
}

impl Socket {
    /// Creates a socket for an accepted (already connected) or an
    /// outbound (not yet connected) descriptor.
    pub fn new(fd: RawFd, connected: bool, driver: Rc<dyn Driver>) -> Self {
        Self {
            fd,
            driver,
            connected,
            writable: connected,
            close_after_write: false,
            closed: false,
            close_requested: false,
            queue: VecDeque::new(),
            on_connect: Box::new(noop_connect),
            on_data: Box::new(noop_data),
            on_write: Box::new(noop_write),
            on_close: Box::new(noop_close),
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_close_after_write(&self) -> bool {
        self.close_after_write
    }

    pub fn set_close_after_write(&mut self, close: bool) {
        self.close_after_write = close;
    }

    pub fn set_connect_handler(&mut self, handler: impl FnMut(&mut Socket) + 'static) {
        self.on_connect = Box::new(handler);
    }

    pub fn set_data_handler(&mut self, handler: impl FnMut(&Rc<RefCell<Socket>>, &[u8]) + 'static) {
        self.on_data = Box::new(handler);
    }

    pub fn set_write_handler(&mut self, handler: impl FnMut(&mut Socket) + 'static) {
        self.on_write = Box::new(handler);
    }

    pub fn set_close_handler(&mut self, handler: impl FnMut(&Rc<RefCell<Socket>>) + 'static) {
        self.on_close = Box::new(handler);
    }

    /// Delivers inbound bytes to whichever data hook is currently
    /// installed. Takes the shared handle, not `&mut self`: the hook
    /// runs with no borrow of `socket` held, so it is free to borrow
    /// it again itself (for instance to resume a coroutine that ends
    /// up writing a response) without tripping a `BorrowMutError`.
    pub fn dispatch_data(socket: &Rc<RefCell<Socket>>, bytes: &[u8]) {
        let mut handler = {
            let mut this = socket.borrow_mut();
            std::mem::replace(&mut this.on_data, Box::new(noop_data))
        };

        handler(socket, bytes);

        let mut this = socket.borrow_mut();
        if !this.closed {
            this.on_data = handler;
        }
    }

    /// Delivers the close notification, same borrow discipline as
    /// [`Socket::dispatch_data`].
    pub fn dispatch_close(socket: &Rc<RefCell<Socket>>) {
        let mut handler = {
            let mut this = socket.borrow_mut();
            if this.closed {
                return;
            }
            this.closed = true;
            std::mem::replace(&mut this.on_close, Box::new(noop_close))
        };

        handler(socket);
    }

    /// Enqueues or sends `data`, driving the write state machine once
    /// if the socket is currently writable. `false` if the socket was
    /// already closed or the driver write failed terminally.
    pub fn write(&mut self, data: Vec<u8>, close: Option<bool>) -> bool {
        if self.closed {
            return false;
        }
        if let Some(close) = close {
            self.close_after_write = close;
        }

        if !self.writable {
            self.queue.push_back(PendingWrite { data, offset: 0 });
            return true;
        }

        let (ok, written) = self.driver.write(self.fd, &data);
        if !ok {
            self.close();
            return false;
        }

        if written < data.len() {
            self.writable = false;
            self.queue.push_back(PendingWrite { data, offset: written });
            return true;
        }

        if self.close_after_write {
            self.close();
        }
        true
    }

    /// Idempotent close: drops any buffered writes and asks the driver
    /// to close the descriptor. `on_close` fires separately once the
    /// driver reports the close back through the dispatcher.
    pub fn close(&mut self) {
        if self.close_requested {
            return;
        }
        self.close_requested = true;
        debug!(fd = self.fd, "closing socket");
        self.queue.clear();
        self.driver.close(self.fd);
    }

    /// Called by the dispatcher when the driver reports the fd is
    /// writable again: promotes `connected`/fires `on_connect` once,
    /// then drains the pending write queue.
    pub fn handle_writable(&mut self) {
        self.writable = true;
        if !self.connected {
            self.connected = true;
            let mut handler = std::mem::replace(&mut self.on_connect, Box::new(noop_connect));
            handler(self);
            if !self.closed {
                self.on_connect = handler;
            }
        }

        while let Some(pending) = self.queue.front() {
            let (ok, written) = self.driver.write(self.fd, &pending.data[pending.offset..]);
            if !ok {
                self.close();
                return;
            }

            let total_written = pending.offset + written;
            if total_written < pending.data.len() {
                self.writable = false;
                self.queue.front_mut().expect("front checked above").offset = total_written;
                return;
            }

            if self.close_after_write {
                self.close();
                return;
            }

            self.queue.pop_front();
        }

        let mut handler = std::mem::replace(&mut self.on_write, Box::new(noop_write));
        handler(self);
        if !self.closed {
            self.on_write = handler;
        }
    }

    /// Formats and writes an HTTP/1.1 response. `headers` lines must
    /// already include their trailing `\r\n`.
    pub fn http_response(&mut self, status: &str, headers: &str, body: &[u8]) -> bool {
        let connection = if self.close_after_write { "close" } else { "keep-alive" };
        let head = format!(
            "HTTP/1.1 {status}\r\nConnection: {connection}\r\n{headers}Content-length: {}\r\n\r\n",
            body.len()
        );
        let mut out = Vec::with_capacity(head.len() + body.len());
        out.extend_from_slice(head.as_bytes());
        out.extend_from_slice(body);
        self.write(out, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::FakeDriver;

    fn socket_on(driver: &Rc<FakeDriver>, fd: RawFd, connected: bool) -> Socket {
        Socket::new(fd, connected, driver.clone() as Rc<dyn Driver>)
    }

    #[test]
    fn write_when_writable_sends_immediately() {
        let driver = Rc::new(FakeDriver::new());
        driver.script_write(3, true, 5);
        let mut socket = socket_on(&driver, 3, true);
        assert!(socket.write(b"hello".to_vec(), None));
        assert!(socket.queue.is_empty());
    }

    #[test]
    fn partial_write_buffers_remainder() {
        let driver = Rc::new(FakeDriver::new());
        driver.script_write(3, true, 2);
        let mut socket = socket_on(&driver, 3, true);
        assert!(socket.write(b"hello".to_vec(), None));
        assert!(!socket.writable);
        assert_eq!(socket.queue.len(), 1);
        assert_eq!(socket.queue[0].offset, 2);
    }

    #[test]
    fn write_failure_asks_driver_to_close() {
        let driver = Rc::new(FakeDriver::new());
        driver.script_write(3, false, 0);
        driver.script_close(3, true);
        let mut socket = socket_on(&driver, 3, true);
        assert!(!socket.write(b"hi".to_vec(), None));
        assert_eq!(driver.closed_fds(), vec![3]);
    }
}
