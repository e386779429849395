//! Promise combinators: `gather` and `chain`.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tracing::error;

use crate::promise::{prepare_promise, Promise};

/// Waits for every promise in `promises` to resolve and yields their
/// values in input order.
///
/// If a subscribed sink panics (mirroring a task that throws
/// synchronously when subscribed to), the panic is caught and logged
/// and that slot is never filled — per the design's documented
/// limitation, `gather` then never completes.
pub fn gather<T: 'static>(promises: Vec<Promise<T>>) -> Promise<Vec<T>> {
    let (resolver, outer) = prepare_promise::<Vec<T>>();

    if promises.is_empty() {
        resolver.resolve(Vec::new());
        return outer;
    }

    let total = promises.len();
    let slots: Rc<RefCell<Vec<Option<T>>>> = Rc::new(RefCell::new((0..total).map(|_| None).collect()));
    let remaining = Rc::new(RefCell::new(total));
    let resolver = Rc::new(RefCell::new(Some(resolver)));

    for (index, promise) in promises.into_iter().enumerate() {
        let slots = slots.clone();
        let remaining = remaining.clone();
        let resolver = resolver.clone();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            promise.subscribe(move |value| {
                slots.borrow_mut()[index] = Some(value);
                *remaining.borrow_mut() -= 1;

                if *remaining.borrow() == 0 {
                    if let Some(resolver) = resolver.borrow_mut().take() {
                        let values = slots
                            .borrow_mut()
                            .iter_mut()
                            .map(|slot| slot.take().expect("all slots filled when remaining hits zero"))
                            .collect();
                        resolver.resolve(values);
                    }
                }
            });
        }));

        if outcome.is_err() {
            error!(task_index = index, "panic while subscribing task in gather; this call will never complete");
        }
    }

    outer
}

/// The outcome of one `chain` step: either the next input value
/// directly, or a promise to await before continuing.
pub enum ChainStepResult<T> {
    Value(T),
    Await(Promise<T>),
}

/// A single transformation applied to the running value of a `chain`.
pub type ChainStep<T> = Box<dyn FnOnce(T) -> ChainStepResult<T>>;

/// Pipes `first` through `steps` in order, awaiting any step that
/// returns `ChainStepResult::Await`.
///
/// All steps share the value type `T`: a typed simplification of the
/// dynamically-typed original, where a chain step could change the
/// payload's shape entirely.
pub fn chain<T: 'static>(first: T, steps: Vec<ChainStep<T>>) -> Promise<T> {
    let (resolver, promise) = prepare_promise::<T>();

    crate::task::spawn_detached(async move {
        let mut value = first;
        for step in steps {
            value = match step(value) {
                ChainStepResult::Value(v) => v,
                ChainStepResult::Await(p) => p.await,
            };
        }
        resolver.resolve(value);
    });

    promise
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn gather_empty_resolves_immediately() {
        let p = gather::<i32>(Vec::new());
        let seen = Rc::new(Cell::new(None));
        let seen2 = seen.clone();
        p.subscribe(move |v| seen2.set(Some(v)));
        assert_eq!(seen.take(), Some(Vec::new()));
    }

    #[test]
    fn gather_preserves_input_order() {
        let (r0, p0) = prepare_promise::<i32>();
        let (r1, p1) = prepare_promise::<i32>();
        let (r2, p2) = prepare_promise::<i32>();

        let out = gather(vec![p0, p1, p2]);
        let seen = Rc::new(RefCell::new(None));
        let seen2 = seen.clone();
        out.subscribe(move |v| *seen2.borrow_mut() = Some(v));

        r1.resolve(20);
        r2.resolve(30);
        r0.resolve(10);

        assert_eq!(*seen.borrow(), Some(vec![10, 20, 30]));
    }

    #[test]
    fn chain_pipes_values_and_awaits_promises() {
        let (resolver, inner) = prepare_promise::<i32>();

        let steps: Vec<ChainStep<i32>> = vec![
            Box::new(|v| ChainStepResult::Value(v + 1)),
            Box::new(move |v| {
                let _ = v;
                ChainStepResult::Await(inner)
            }),
            Box::new(|v| ChainStepResult::Value(v * 2)),
        ];

        let result = chain(1, steps);
        // Resolving wakes the chain's internal task synchronously, which
        // drives the remaining steps to completion before this call returns.
        resolver.resolve(100);

        let seen = Rc::new(Cell::new(None));
        let seen2 = seen.clone();
        result.subscribe(move |v| seen2.set(Some(v)));

        assert_eq!(seen.get(), Some(200));
    }
}
