//! Lazily initialized, shared segmentation engine.
//!
//! A [`Session`] owns an [`EngineLoader`] and at most one ready engine. The
//! first [`Session::ensure_ready`] call runs the loader; callers arriving while
//! it runs wait for that same outcome instead of starting a second load.
//! A failed load leaves nothing cached, so the next call starts over.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::instrument;

use crate::error::{RemovalError, Result};
use crate::progress::{Monotonic, ProgressSink};
use crate::segmentation::EngineLoader;

type Outcome<E> = Result<Arc<E>>;

enum Slot<E> {
    Idle,
    Initializing(watch::Receiver<Option<Outcome<E>>>),
    Ready(Arc<E>),
}

enum Role<E> {
    Ready(Arc<E>),
    Lead(watch::Sender<Option<Outcome<E>>>),
    Wait(watch::Receiver<Option<Outcome<E>>>),
}

/// Returns the slot to `Idle` if the leading caller is dropped mid-load.
struct ResetOnDrop<'a, E> {
    slot: &'a Mutex<Slot<E>>,
    armed: bool,
}

impl<E> Drop for ResetOnDrop<'_, E> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!("Engine initialization abandoned before completion");
            *self.slot.lock() = Slot::Idle;
        }
    }
}

/// Explicit handle on the external segmentation capability.
pub struct Session<L: EngineLoader> {
    loader: L,
    slot: Mutex<Slot<L::Engine>>,
}

impl<L: EngineLoader> Session<L> {
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            slot: Mutex::new(Slot::Idle),
        }
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Ready(_))
    }

    /// Drop the cached engine. In-flight requests keep their own handle.
    pub fn release(&self) {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Ready(_)) {
            tracing::info!("Releasing segmentation engine");
            *slot = Slot::Idle;
        }
    }

    /// Return the ready engine, initializing it on first use.
    ///
    /// `progress` receives "Initializing model" at 0, whatever the loader
    /// reports, and "Model ready" at 100. Loader events that would move the
    /// percent backwards are dropped. Callers that join an in-flight
    /// initialization only see the final event.
    #[instrument(skip_all)]
    pub async fn ensure_ready(&self, progress: &dyn ProgressSink) -> Result<Arc<L::Engine>> {
        let progress = Monotonic::new(progress);
        let role = {
            let mut slot = self.slot.lock();
            match *slot {
                Slot::Ready(ref engine) => Role::Ready(Arc::clone(engine)),
                Slot::Initializing(ref rx) => Role::Wait(rx.clone()),
                Slot::Idle => {
                    let (tx, rx) = watch::channel(None);
                    *slot = Slot::Initializing(rx);
                    Role::Lead(tx)
                }
            }
        };

        let outcome = match role {
            Role::Ready(engine) => Ok(engine),
            Role::Lead(tx) => self.lead(tx, &progress).await,
            Role::Wait(mut rx) => {
                tracing::debug!("Joining in-flight engine initialization");
                let shared = rx
                    .wait_for(Option::is_some)
                    .await
                    .map(|outcome| outcome.clone())
                    .map_err(|_| RemovalError::ModelInit("initialization was abandoned".into()))?;
                shared.unwrap_or_else(|| {
                    Err(RemovalError::ModelInit("initialization was abandoned".into()))
                })
            }
        };

        match &outcome {
            Ok(_) => progress.emit("Model ready", 100),
            Err(err) => tracing::warn!(error = %err, "Engine initialization failed"),
        }
        outcome
    }

    async fn lead(
        &self,
        tx: watch::Sender<Option<Outcome<L::Engine>>>,
        progress: &dyn ProgressSink,
    ) -> Outcome<L::Engine> {
        let mut guard = ResetOnDrop {
            slot: &self.slot,
            armed: true,
        };

        tracing::info!("Initializing segmentation engine");
        progress.emit("Initializing model", 0);

        let outcome = self
            .loader
            .load(progress)
            .await
            .map(Arc::new)
            .map_err(|err| match err {
                RemovalError::ModelInit(_) => err,
                other => RemovalError::ModelInit(other.to_string()),
            });

        *self.slot.lock() = match &outcome {
            Ok(engine) => Slot::Ready(Arc::clone(engine)),
            Err(_) => Slot::Idle,
        };
        guard.armed = false;

        if outcome.is_ok() {
            tracing::info!("Segmentation engine ready");
        }
        tx.send_replace(Some(outcome.clone()));
        outcome
    }
}
