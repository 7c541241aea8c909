//! In-flight fallback registry
//!
//! Coalesces concurrent loads of the same missing key. The first caller to
//! claim a key leads: it runs the fallback and publishes the outcome on a
//! watch channel. Later callers follow by awaiting that channel. The
//! registry entry is removed when the leader's guard drops, whether it
//! published or was cancelled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::error::Result;

/// Serialized payload produced by a flight, `None` when the key does not exist.
pub(crate) type Outcome = Result<Option<String>>;

#[derive(Debug)]
struct Flight {
    id: u64,
    receiver: watch::Receiver<Option<Outcome>>,
}

#[derive(Debug, Default)]
pub(crate) struct FlightRegistry {
    next_id: AtomicU64,
    flights: Mutex<HashMap<String, Flight>>,
}

pub(crate) enum Claim {
    Leader(FlightGuard),
    Follower(Waiter),
}

impl FlightRegistry {
    /// Leads a new flight for `key`, or joins the one already running.
    pub(crate) fn claim(self: &Arc<Self>, key: &str) -> Claim {
        let mut flights = self.lock();
        if let Some(flight) = flights.get(key) {
            return Claim::Follower(Waiter {
                receiver: flight.receiver.clone(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = watch::channel(None);
        flights.insert(key.to_string(), Flight { id, receiver });

        Claim::Leader(FlightGuard {
            registry: Arc::clone(self),
            key: key.to_string(),
            id,
            sender,
        })
    }

    /// Number of keys with a fallback currently running.
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, key: &str, id: u64) {
        let mut flights = self.lock();
        if flights.get(key).is_some_and(|flight| flight.id == id) {
            flights.remove(key);
        }
    }

    // The map stays consistent even if a holder panicked
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Flight>> {
        self.flights.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// == Leader ==
/// Held by the caller running the fallback for one key.
///
/// Dropping it without calling [`FlightGuard::complete`] abandons the
/// flight; followers then retry and one of them leads instead.
pub(crate) struct FlightGuard {
    registry: Arc<FlightRegistry>,
    key: String,
    id: u64,
    sender: watch::Sender<Option<Outcome>>,
}

impl FlightGuard {
    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    /// Publishes the outcome to every follower and ends the flight.
    pub(crate) fn complete(self, outcome: Outcome) {
        self.sender.send_replace(Some(outcome));
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.registry.release(&self.key, self.id);
    }
}

// == Follower ==
pub(crate) struct Waiter {
    receiver: watch::Receiver<Option<Outcome>>,
}

impl Waiter {
    /// Waits for the leader's outcome. `None` means the leader gave up.
    pub(crate) async fn wait(mut self) -> Option<Outcome> {
        loop {
            let current = self.receiver.borrow_and_update().clone();
            if current.is_some() {
                return current;
            }
            if self.receiver.changed().await.is_err() {
                return self.receiver.borrow().clone();
            }
        }
    }
}
