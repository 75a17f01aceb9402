//! Deadlines and cooperative cancellation.
//!
//! A [`Deadline`] is derived once from the pipeline's overall timeout and
//! narrowed by each gate and runner timeout on the way down. A
//! [`CancelSignal`] lets an external caller abort in-flight work.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Why a bounded wait ended early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    DeadlineExceeded,
    Cancelled,
}

/// Optional point in time after which work must stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// No deadline.
    pub fn none() -> Self {
        Self { at: None }
    }

    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Some(Instant::now() + timeout),
        }
    }

    pub fn at(instant: Instant) -> Self {
        Self { at: Some(instant) }
    }

    pub fn instant(&self) -> Option<Instant> {
        self.at
    }

    /// Time left; `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(d) if d.is_zero())
    }

    /// The earlier of this deadline and `now + timeout`.
    pub fn cap(&self, timeout: Duration) -> Deadline {
        let candidate = Instant::now() + timeout;
        match self.at {
            Some(at) if at <= candidate => *self,
            _ => Deadline::at(candidate),
        }
    }
}

/// Sender half used to request cancellation.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: std::sync::Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiver half observed by running work.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Create a connected handle/signal pair.
    pub fn pair() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (
            CancelHandle {
                tx: std::sync::Arc::new(tx),
            },
            CancelSignal { rx },
        )
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        CancelSignal { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested. Pending forever if the handle
    /// was dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::never()
    }
}

/// Drive `fut` until it completes, the deadline passes, or cancellation is
/// requested, whichever happens first.
pub async fn bounded<F>(
    deadline: Deadline,
    cancel: &CancelSignal,
    fut: F,
) -> Result<F::Output, Interrupted>
where
    F: Future,
{
    if cancel.is_cancelled() {
        return Err(Interrupted::Cancelled);
    }
    let sleep = async {
        match deadline.instant() {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        out = fut => Ok(out),
        _ = sleep => Err(Interrupted::DeadlineExceeded),
        _ = cancel.cancelled() => Err(Interrupted::Cancelled),
    }
}
