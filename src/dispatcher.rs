//! Owns the fd→Socket registry and the active `Router`; implements
//! `LoopCallbacks` so a `Driver` can deliver events straight into it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use crate::driver::{Driver, LoopCallbacks};
use crate::error::CoreError;
use crate::router::Router;
use crate::socket::Socket;

pub struct Dispatcher<D: Driver + 'static> {
    driver: Rc<D>,
    sockets: HashMap<RawFd, Rc<RefCell<Socket>>>,
    router: Rc<RefCell<Router>>,
}

impl<D: Driver + 'static> Dispatcher<D> {
    pub fn new(driver: Rc<D>) -> Self {
        Self {
            driver,
            sockets: HashMap::new(),
            router: Rc::new(RefCell::new(Router::new())),
        }
    }

    /// Atomically replaces the routing table used by new default HTTP
    /// bindings. Live connections keep using the `Router` they
    /// captured when they started parsing their current request.
    pub fn set_router(&mut self, router: Router) {
        *self.router.borrow_mut() = router;
    }

    /// Opens an outbound connection and registers its socket.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<Rc<RefCell<Socket>>, CoreError> {
        let fd = self.driver.connect(host, port)?;
        let socket = Rc::new(RefCell::new(Socket::new(fd, false, self.driver.clone())));
        self.sockets.insert(fd, socket.clone());
        Ok(socket)
    }

    pub fn socket(&self, fd: RawFd) -> Option<Rc<RefCell<Socket>>> {
        self.sockets.get(&fd).cloned()
    }
}

impl<D: Driver + 'static> LoopCallbacks for Dispatcher<D> {
    fn on_init(&mut self, _parent_fd: Option<RawFd>) {}

    fn on_data(&mut self, fd: RawFd, bytes: &[u8]) {
        let driver = self.driver.clone();
        let router = self.router.clone();

        let socket = self.sockets.entry(fd).or_insert_with(|| {
            let socket = Rc::new(RefCell::new(Socket::new(fd, true, driver)));
            crate::http::install(&socket, router);
            socket
        });

        Socket::dispatch_data(&*socket, bytes);
    }

    fn on_write(&mut self, fd: RawFd) {
        if let Some(socket) = self.sockets.get(&fd) {
            socket.borrow_mut().handle_writable();
        }
    }

    fn on_close(&mut self, fd: RawFd) {
        if let Some(socket) = self.sockets.remove(&fd) {
            Socket::dispatch_close(&socket);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::FakeDriver;

    #[test]
    fn first_byte_on_unknown_fd_materializes_socket() {
        let mut dispatcher = Dispatcher::new(Rc::new(FakeDriver::new()));
        assert!(dispatcher.socket(5).is_none());
        dispatcher.on_data(5, b"GET / HTTP/1.1\r\n\r\n");
        assert!(dispatcher.socket(5).is_some());
    }

    #[test]
    fn close_removes_socket_before_firing_hook() {
        let mut dispatcher = Dispatcher::new(Rc::new(FakeDriver::new()));
        dispatcher.on_data(5, b"x");
        dispatcher.on_close(5);
        assert!(dispatcher.socket(5).is_none());
    }
}
