//! A stand-in for the server that persists list mutations.
//!
//! Every request waits for a configurable delay and then fails at a configurable rate,
//! which is enough to exercise both the commit and the rollback path of a [`Reconciler`](crate::Reconciler).

use std::{cell::RefCell, future::Future, rc::Rc, time::Duration};

use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    item::{Item, ItemId},
    queue::OperationFailure,
    utils::timer::{sleep, with_timeout_async},
};


#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockBackendConfig {
    /// Artificial latency of every request, in milliseconds.
    pub delay_ms: u64,
    /// Probability in `0.0..=1.0` that a request fails.
    pub failure_rate: f64,
    /// Requests taking longer than this fail with a timeout.
    pub timeout_ms: Option<u64>,
    /// First id handed out by [`MockBackend::save`].
    pub first_id: u64,
    pub seed: u64,
}

impl Default for MockBackendConfig {
    fn default() -> Self {
        Self {
            delay_ms: 1000,
            failure_rate: 0.1,
            timeout_ms: None,
            first_id: 1,
            seed: 0,
        }
    }
}

/// In-memory server with artificial latency and random failures.
///
/// Clones share the same id counter and random source.
#[derive(Clone)]
pub struct MockBackend(Rc<RefCell<BackendState>>);

struct BackendState {
    config: MockBackendConfig,
    rng: StdRng,
    next_id: u64,
}

impl MockBackend {
    pub fn new(config: MockBackendConfig) -> Self {
        Self(Rc::new(RefCell::new(BackendState {
            rng: StdRng::seed_from_u64(config.seed),
            next_id: config.first_id,
            config,
        })))
    }

    pub fn config(&self) -> MockBackendConfig {
        self.0.borrow().config.clone()
    }

    /// Stores a new item and returns it under a server-assigned id.
    pub fn save<T: 'static>(
        &self,
        item: Item<T>,
    ) -> impl Future<Output = Result<Item<T>, OperationFailure>> + 'static {
        let this = self.clone();
        async move {
            debug!(id = %item.id, "saving item");
            this.round_trip().await?;
            let id = this.allocate_id();
            debug!(id = %id, "item saved");
            Ok(item.with_id(id))
        }
    }

    /// Deletes an item and returns it.
    pub fn delete<T: 'static>(
        &self,
        item: Item<T>,
    ) -> impl Future<Output = Result<Item<T>, OperationFailure>> + 'static {
        let this = self.clone();
        async move {
            debug!(id = %item.id, "deleting item");
            this.round_trip().await?;
            Ok(item)
        }
    }

    /// Replaces an item and returns the stored version.
    pub fn update<T: 'static>(
        &self,
        item: Item<T>,
    ) -> impl Future<Output = Result<Item<T>, OperationFailure>> + 'static {
        let this = self.clone();
        async move {
            debug!(id = %item.id, "updating item");
            this.round_trip().await?;
            Ok(item)
        }
    }

    async fn round_trip(&self) -> Result<(), OperationFailure> {
        let config = self.config();
        let delay = sleep(Duration::from_millis(config.delay_ms));
        match config.timeout_ms {
            Some(ms) => with_timeout_async(delay, Duration::from_millis(ms)).await?,
            None => delay.await,
        }
        if self.roll_failure() {
            warn!("simulated server error");
            return Err(OperationFailure::new("server connection error"));
        }
        Ok(())
    }

    fn roll_failure(&self) -> bool {
        let s = &mut *self.0.borrow_mut();
        let p = s.config.failure_rate;
        if p.is_nan() || p <= 0.0 {
            return false;
        }
        s.rng.gen_bool(p.min(1.0))
    }

    fn allocate_id(&self) -> ItemId {
        let mut s = self.0.borrow_mut();
        let id = s.next_id;
        s.next_id += 1;
        ItemId(id)
    }
}
