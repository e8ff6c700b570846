// ─── Cancellation ───
// One shared signal threaded through every phase. Built on a `watch`
// channel so any number of waiters observe the same flip.

use std::future::Future;

use tokio::sync::watch;

use crate::core::error::{ProvisionError, ProvisionResult};

/// Owning side; flips the signal.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Observing side; cheap to clone into every phase.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelSignal {
    /// A signal that never fires, for one-off calls outside a pipeline.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    pub fn check(&self) -> ProvisionResult<()> {
        if self.is_cancelled() {
            return Err(ProvisionError::Cancelled);
        }
        Ok(())
    }

    /// Resolves once cancellation is requested. Pends forever if the
    /// handle is dropped without cancelling.
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

    /// Races `fut` against cancellation; cancellation wins ties.
    pub async fn guard<T, F>(&self, fut: F) -> ProvisionResult<T>
    where
        F: Future<Output = ProvisionResult<T>>,
    {
        tokio::select! {
            biased;

            _ = self.cancelled() => Err(ProvisionError::Cancelled),
            result = fut => result,
        }
    }
}
