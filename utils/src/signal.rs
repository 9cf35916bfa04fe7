//! Cooperative shutdown for long-running tasks.
//!
//! A [Signaler] is held by whoever owns a set of tasks; each task holds a clone of the
//! [Signal] and polls it at every blocking point (typically as one branch of a `select!`).
//! Once the signal fires, tasks exit and drop their clones. [Signaler::signal] returns a
//! receiver that resolves after every clone has been dropped, so the owner can wait for a
//! clean shutdown.

use futures::{channel::oneshot, future::Shared, FutureExt};
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

/// A future that resolves when the paired [Signaler] fires (or is dropped).
///
/// Resolves to `Ok(value)` when signalled and `Err(Canceled)` if the [Signaler] was dropped
/// without firing. Either outcome means "stop".
#[derive(Clone)]
pub struct Signal {
    inner: Shared<oneshot::Receiver<i32>>,
    _guard: Arc<Guard>,
}

impl Future for Signal {
    type Output = Result<i32, oneshot::Canceled>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

/// Reports completion once the last [Signal] clone is dropped.
struct Guard {
    tx: Option<oneshot::Sender<()>>,
}

impl Drop for Guard {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Fires a [Signal].
pub struct Signaler {
    tx: oneshot::Sender<i32>,
    completion: oneshot::Receiver<()>,
}

impl Signaler {
    /// Creates a new signaler and its paired signal.
    pub fn new() -> (Self, Signal) {
        let (tx, rx) = oneshot::channel();
        let (completion_tx, completion) = oneshot::channel();
        let signal = Signal {
            inner: rx.shared(),
            _guard: Arc::new(Guard {
                tx: Some(completion_tx),
            }),
        };
        (Self { tx, completion }, signal)
    }

    /// Fires the signal with `value`.
    ///
    /// The returned receiver resolves once every [Signal] clone has been dropped.
    pub fn signal(self, value: i32) -> oneshot::Receiver<()> {
        let _ = self.tx.send(value);
        self.completion
    }
}
