//! A minimal single-threaded task scheduler.
//!
//! The design speaks of "coroutines" that suspend at a pull from a
//! socket's event stream or at an `await` on a promise. In Rust the
//! natural realization of that coroutine is a native `async fn`:
//! suspension points are ordinary `.await`s and "resuming a coroutine"
//! is the executor polling the future again. Something still has to
//! call that `poll`, though — this module is that something.
//!
//! Unlike the teacher runtime's work-stealing executor (atomically
//! shared across OS threads), every [`Task`] here lives on exactly one
//! worker's single thread, so the state machine uses a plain `Cell`
//! instead of an `AtomicUsize` with compare-exchange loops, and tasks
//! are reference counted with `Rc` rather than `Arc`.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskState {
    /// Not scheduled; nothing to do until woken.
    Idle,
    /// Currently inside `Task::poll_once`.
    Running,
    /// Woken while `Running`; must be polled again immediately after
    /// the in-flight poll returns, so no wakeup is lost.
    Notified,
    /// The future has returned `Poll::Ready`.
    Done,
}

/// A boxed, pinned future driven to completion by repeated polls.
pub(crate) struct Task {
    future: RefCell<Pin<Box<dyn Future<Output = ()>>>>,
    state: Cell<TaskState>,
}

impl Task {
    pub(crate) fn new(future: impl Future<Output = ()> + 'static) -> Rc<Self> {
        Rc::new(Self {
            future: RefCell::new(Box::pin(future)),
            state: Cell::new(TaskState::Idle),
        })
    }

    pub(crate) fn is_done(&self) -> bool {
        self.state.get() == TaskState::Done
    }

    /// Polls the future once, looping if it was notified while running
    /// (a wakeup fired re-entrantly during this very poll).
    pub(crate) fn poll_once(self: &Rc<Self>) {
        loop {
            match self.state.get() {
                TaskState::Done => return,
                TaskState::Running => return, // re-entrant call from within wake(); ignore.
                _ => {}
            }

            self.state.set(TaskState::Running);

            let waker = make_waker(self.clone());
            let mut cx = Context::from_waker(&waker);

            let poll = self.future.borrow_mut().as_mut().poll(&mut cx);

            match poll {
                Poll::Ready(()) => {
                    self.state.set(TaskState::Done);
                    return;
                }
                Poll::Pending => match self.state.get() {
                    TaskState::Notified => continue, // woken during the poll above; go again.
                    _ => {
                        self.state.set(TaskState::Idle);
                        return;
                    }
                },
            }
        }
    }

    /// Called from the waker. If the task is mid-poll, mark it
    /// notified so `poll_once` loops once more; otherwise poll it now.
    fn wake(self: Rc<Self>) {
        match self.state.get() {
            TaskState::Running => self.state.set(TaskState::Notified),
            TaskState::Done => {}
            TaskState::Idle | TaskState::Notified => self.poll_once(),
        }
    }
}

/// Spawns `future` and drives it to its first suspension point.
///
/// There is no separate run queue: a `Task` resumes itself the moment
/// its waker fires (see [`Task::wake`]), so a detached task stays
/// alive exactly as long as something (typically a `Promise`) holds
/// its waker.
pub(crate) fn spawn_detached(future: impl Future<Output = ()> + 'static) {
    Task::new(future).poll_once();
}

fn vtable() -> &'static RawWakerVTable {
    &RawWakerVTable::new(clone_raw, wake_raw, wake_by_ref_raw, drop_raw)
}

fn make_waker(task: Rc<Task>) -> Waker {
    unsafe { Waker::from_raw(RawWaker::new(Rc::into_raw(task) as *const (), vtable())) }
}

fn clone_raw(ptr: *const ()) -> RawWaker {
    let rc = unsafe { Rc::from_raw(ptr as *const Task) };
    let cloned = rc.clone();
    std::mem::forget(rc);
    RawWaker::new(Rc::into_raw(cloned) as *const (), vtable())
}

fn wake_raw(ptr: *const ()) {
    let rc = unsafe { Rc::from_raw(ptr as *const Task) };
    rc.wake();
}

fn wake_by_ref_raw(ptr: *const ()) {
    let rc = unsafe { Rc::from_raw(ptr as *const Task) };
    rc.clone().wake();
    std::mem::forget(rc);
}

fn drop_raw(ptr: *const ()) {
    unsafe {
        Rc::from_raw(ptr as *const Task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    #[test]
    fn runs_ready_future_to_completion() {
        let task = Task::new(async {});
        task.poll_once();
        assert!(task.is_done());
    }

    #[test]
    fn pending_future_resumes_after_external_wake() {
        let woke = Rc::new(Cell::new(false));
        let log: Rc<StdRefCell<Vec<&'static str>>> = Rc::new(StdRefCell::new(Vec::new()));

        struct Yield {
            polled: bool,
        }

        impl Future for Yield {
            type Output = ();

            fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
                if self.polled {
                    return Poll::Ready(());
                }
                self.polled = true;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }

        let _ = woke;
        let log2 = log.clone();
        let task = Task::new(async move {
            log2.borrow_mut().push("before");
            Yield { polled: false }.await;
            log2.borrow_mut().push("after");
        });

        task.poll_once();
        assert!(task.is_done());
        assert_eq!(*log.borrow(), vec!["before", "after"]);
    }
}
