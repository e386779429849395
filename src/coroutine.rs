//! Binds a Socket's data/close events to a pull-style [`ChunkStream`],
//! driving a user `async fn` body with the local task scheduler.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use bytes::Bytes;

use crate::promise::{prepare_promise, Promise};
use crate::socket::Socket;
use crate::task::Task;

struct Slot {
    value: RefCell<Option<Option<Bytes>>>,
    waker: RefCell<Option<Waker>>,
}

/// A pull-style source of socket data, terminated by one `None`.
#[derive(Clone)]
pub struct ChunkStream(Rc<Slot>);

impl ChunkStream {
    fn push(&self, chunk: Option<Bytes>) {
        *self.0.value.borrow_mut() = Some(chunk);
        if let Some(waker) = self.0.waker.borrow_mut().take() {
            waker.wake();
        }
    }

    /// Awaits the next chunk, or `None` once the stream has ended.
    pub fn next(&self) -> Next<'_> {
        Next(self)
    }
}

pub struct Next<'a>(&'a ChunkStream);

impl Future for Next<'_> {
    type Output = Option<Bytes>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        let slot = &self.0 .0;
        if let Some(chunk) = slot.value.borrow_mut().take() {
            return Poll::Ready(chunk);
        }
        *slot.waker.borrow_mut() = Some(cx.waker().clone());
        Poll::Pending
    }
}

/// Installs `make`'s future as a coroutine driven by `socket`'s data
/// and close events, and returns a promise that resolves with its
/// final value.
///
/// Takes the shared handle, not `&mut Socket`: the data/close hooks
/// this installs only ever borrow `socket` for the instant they need
/// it, so a resume that reaches back into the socket (to write a
/// response, close it, and so on) never finds an outstanding borrow
/// in its way.
///
/// `running`/`ended` handle the reentrancy hazard documented in the
/// coroutine binding design: a close that arrives while the coroutine
/// is mid-resume (for instance because the resume itself wrote data
/// that triggered a synchronous close) is deferred until the current
/// resume unwinds, never delivered nested inside it.
pub fn bind_coroutine<F, R>(socket: &Rc<RefCell<Socket>>, make: impl FnOnce(ChunkStream) -> F) -> Promise<R>
where
    F: Future<Output = R> + 'static,
    R: 'static,
{
    let slot = Rc::new(Slot {
        value: RefCell::new(None),
        waker: RefCell::new(None),
    });
    let stream = ChunkStream(slot.clone());
    let body = make(stream);

    let (resolver, promise) = prepare_promise::<R>();
    let resolver = Rc::new(RefCell::new(Some(resolver)));

    let task = Task::new({
        let resolver = resolver.clone();
        async move {
            let value = body.await;
            if let Some(resolver) = resolver.borrow_mut().take() {
                resolver.resolve(value);
            }
        }
    });

    let running = Rc::new(Cell::new(false));
    let ended = Rc::new(Cell::new(false));

    {
        let stream = stream_handle(&slot);
        let task = task.clone();
        let running = running.clone();
        let ended = ended.clone();
        socket.borrow_mut().set_data_handler(move |socket, bytes| {
            stream.push(Some(Bytes::copy_from_slice(bytes)));
            resume(&task, &running);

            if ended.get() && !task.is_done() {
                ended.set(false);
                stream.push(None);
                resume(&task, &running);
            }

            if task.is_done() {
                let mut this = socket.borrow_mut();
                this.set_data_handler(|_, _| {});
                this.set_close_handler(|_| {});
            }
        });
    }

    {
        let stream = stream_handle(&slot);
        socket.borrow_mut().set_close_handler(move |socket| {
            if running.get() {
                ended.set(true);
            } else {
                stream.push(None);
                resume(&task, &running);
            }

            if task.is_done() {
                socket.borrow_mut().set_data_handler(|_, _| {});
            }
        });
    }

    promise
}

fn stream_handle(slot: &Rc<Slot>) -> ChunkStream {
    ChunkStream(slot.clone())
}

fn resume(task: &Rc<Task>, running: &Rc<Cell<bool>>) {
    running.set(true);
    task.poll_once();
    running.set(false);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_chunks_in_order_then_end_sentinel() {
        let driver = Rc::new(crate::driver::testing::FakeDriver::new());
        let socket = Rc::new(RefCell::new(Socket::new(1, true, driver)));
        let log: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));

        let log2 = log.clone();
        let _promise: Promise<()> = bind_coroutine(&socket, move |stream| async move {
            loop {
                match stream.next().await {
                    Some(chunk) => log2.borrow_mut().push(String::from_utf8(chunk.to_vec()).unwrap()),
                    None => {
                        log2.borrow_mut().push("<end>".to_string());
                        break;
                    }
                }
            }
        });

        Socket::dispatch_data(&socket, b"hello");
        Socket::dispatch_data(&socket, b"world");
        Socket::dispatch_close(&socket);

        assert_eq!(*log.borrow(), vec!["hello", "world", "<end>"]);
    }
}
