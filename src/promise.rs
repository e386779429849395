//! The promise primitive: a one-shot value-passing handle tolerant of
//! either subscribe/resolve order.
//!
//! [`Promise<T>`] implements [`Future`], so `promise.await` inside any
//! `async fn` is the idiomatic realization of the distilled design's
//! `await` primitive. It also exposes an explicit
//! [`Promise::subscribe`] callback form, used internally by
//! [`crate::combinators::gather`] and [`crate::combinators::chain`]
//! and directly covered by the promise-law tests below.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

enum Subscriber<T> {
    None,
    Waker(Waker),
    Callback(Box<dyn FnOnce(T)>),
}

struct Inner<T> {
    value: Option<T>,
    subscriber: Subscriber<T>,
}

/// The producer half of a promise. Resolving a second time is a no-op:
/// the stored value and any already-fired subscriber are left alone.
pub struct Resolver<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

/// The consumer half of a promise.
pub struct Promise<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Creates a linked `(Resolver, Promise)` pair.
pub fn prepare_promise<T>() -> (Resolver<T>, Promise<T>) {
    let inner = Rc::new(RefCell::new(Inner {
        value: None,
        subscriber: Subscriber::None,
    }));

    (
        Resolver {
            inner: inner.clone(),
        },
        Promise { inner },
    )
}

impl<T> Resolver<T> {
    /// Resolves the promise. A second call is ignored.
    pub fn resolve(self, value: T) {
        let mut inner = self.inner.borrow_mut();
        if inner.value.is_some() {
            return;
        }

        let subscriber = std::mem::replace(&mut inner.subscriber, Subscriber::None);
        match subscriber {
            Subscriber::None => {
                inner.value = Some(value);
            }
            Subscriber::Waker(waker) => {
                inner.value = Some(value);
                drop(inner);
                waker.wake();
            }
            Subscriber::Callback(sink) => {
                drop(inner);
                sink(value);
            }
        }
    }
}

impl<T: 'static> Promise<T> {
    /// Registers `sink` to be called with the resolved value. If the
    /// promise already resolved, `sink` runs immediately.
    pub fn subscribe(self, sink: impl FnOnce(T) + 'static) {
        let mut inner = self.inner.borrow_mut();
        if let Some(value) = inner.value.take() {
            drop(inner);
            sink(value);
            return;
        }

        inner.subscriber = Subscriber::Callback(Box::new(sink));
    }
}

impl<T> Future for Promise<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let mut inner = self.inner.borrow_mut();

        if let Some(value) = inner.value.take() {
            return Poll::Ready(value);
        }

        inner.subscriber = Subscriber::Waker(cx.waker().clone());
        Poll::Pending
    }
}
