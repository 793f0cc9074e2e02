//! Request Coalescing (singleflight)
//!
//! Collapses concurrent loads of the same key into one execution.
//!
//! # Design
//!
//! ```text
//!  caller A ──► run("k") ──► leader: registers record, runs future ──┐
//!  caller B ──► run("k") ──► waiter: clones receiver, suspends       │
//!  caller C ──► run("k") ──► waiter: clones receiver, suspends       │
//!                                                                    ▼
//!                  record removed, result published to A, B and C
//! ```
//!
//! - The key table has its own mutex, never held across an `.await`
//! - Records live only while a load is outstanding; nothing is cached
//! - A drop guard owns the record, so a panicking or cancelled leader
//!   still releases every waiter

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{Error, Result};

type Slot<T> = Option<Result<T>>;

/// Deduplicates in-flight work per key
pub struct Flight<T> {
    calls: Mutex<HashMap<String, watch::Receiver<Slot<T>>>>,
}

enum Role<T> {
    Leader(watch::Sender<Slot<T>>),
    Waiter(watch::Receiver<Slot<T>>),
}

impl<T: Clone> Flight<T> {
    /// Create an empty coalescer
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Run `work` for `key` unless a run for the same key is already in
    /// flight, in which case wait for and share its result.
    ///
    /// `work` is only polled when this caller becomes the leader.
    pub async fn run<F>(&self, key: &str, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let role = {
            let mut calls = self.calls.lock();
            match calls.get(key) {
                Some(rx) => Role::Waiter(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    calls.insert(key.to_owned(), rx);
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Waiter(rx) => Self::wait(key, rx).await,
            Role::Leader(tx) => {
                let guard = InFlight {
                    flight: self,
                    key,
                    tx: Some(tx),
                };
                let result = AssertUnwindSafe(work)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| {
                        Err(Error::LoadPanicked {
                            key: key.to_owned(),
                            message: panic_message(payload.as_ref()),
                        })
                    });
                guard.complete(result.clone());
                result
            }
        }
    }

    /// Number of keys with a load in flight
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }

    async fn wait(key: &str, mut rx: watch::Receiver<Slot<T>>) -> Result<T> {
        let published = match rx.wait_for(Option::is_some).await {
            Ok(slot) => (*slot).clone(),
            Err(_) => None,
        };
        published.unwrap_or_else(|| Err(Error::LoadAbandoned(key.to_owned())))
    }

    fn forget(&self, key: &str) {
        self.calls.lock().remove(key);
    }
}

impl<T: Clone> Default for Flight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Flight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flight")
            .field("in_flight", &self.calls.lock().len())
            .finish()
    }
}

/// Owns a leader's record. Dropping it without `complete` closes the
/// channel, which waiters observe as an abandoned load.
struct InFlight<'a, T: Clone> {
    flight: &'a Flight<T>,
    key: &'a str,
    tx: Option<watch::Sender<Slot<T>>>,
}

impl<T: Clone> InFlight<'_, T> {
    fn complete(mut self, result: Result<T>) {
        // Remove first so a caller arriving now starts a fresh load.
        self.flight.forget(self.key);
        if let Some(tx) = self.tx.take() {
            tx.send_replace(Some(result));
        }
    }
}

impl<T: Clone> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        if self.tx.take().is_some() {
            self.flight.forget(self.key);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================
