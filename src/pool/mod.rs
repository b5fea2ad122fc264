//! Resource pool
//!
//! Lends a fixed set of expensive clients (HTTP sessions, browser instances)
//! to concurrent fetches. Clients are created once by a `ClientFactory`,
//! checked out with `acquire()` and returned automatically when the
//! `PoolGuard` is dropped, so a failing or panicking fetch can never leak
//! one. An exhausted pool is backpressure: `acquire()` simply waits.

use crate::crawler::build_http_client;
use crate::{ChintaiError, Result};
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::VecDeque;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Creates and disposes of pooled clients
#[async_trait]
pub trait ClientFactory: Send + Sync + 'static {
    type Client: Send + 'static;

    /// Creates the client for the given pool slot
    async fn create(&self, slot: usize) -> Result<Self::Client>;

    /// Releases whatever the client holds
    async fn shutdown(&self, client: Self::Client) {
        drop(client);
    }
}

/// Builds `reqwest` clients with the crawler's user agent and timeout
#[derive(Debug, Clone)]
pub struct HttpClientFactory {
    user_agent: String,
    timeout: Duration,
}

impl HttpClientFactory {
    pub fn new(user_agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            user_agent: user_agent.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ClientFactory for HttpClientFactory {
    type Client = reqwest::Client;

    async fn create(&self, _slot: usize) -> Result<reqwest::Client> {
        Ok(build_http_client(&self.user_agent, self.timeout)?)
    }
}

#[derive(Debug, Default)]
struct PoolState {
    initialized: bool,
    live: usize,
}

/// A fixed-size pool of reusable clients
pub struct ResourcePool<F: ClientFactory> {
    factory: F,
    size: usize,
    state: tokio::sync::Mutex<PoolState>,
    idle: Mutex<VecDeque<F::Client>>,
    available: Semaphore,
}

impl<F: ClientFactory> ResourcePool<F> {
    /// Creates an empty pool; clients are created on `initialize()`
    pub fn new(factory: F, size: usize) -> Self {
        Self {
            factory,
            size,
            state: tokio::sync::Mutex::new(PoolState::default()),
            idle: Mutex::new(VecDeque::with_capacity(size)),
            available: Semaphore::new(0),
        }
    }

    /// Configured number of clients
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of clients that actually started
    pub async fn live(&self) -> usize {
        self.state.lock().await.live
    }

    /// Number of clients currently idle
    pub fn idle(&self) -> usize {
        self.available.available_permits()
    }

    fn idle_queue(&self) -> MutexGuard<'_, VecDeque<F::Client>> {
        // the queue is always left consistent, so a poisoned lock is still usable
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Creates the pool's clients
    ///
    /// Only the first call does any work. A client that fails to start is
    /// logged and skipped, leaving the pool smaller.
    ///
    /// # Returns
    ///
    /// The number of live clients.
    pub async fn initialize(&self) -> usize {
        let mut state = self.state.lock().await;
        if state.initialized {
            return state.live;
        }

        for slot in 0..self.size {
            match self.factory.create(slot).await {
                Ok(client) => {
                    self.idle_queue().push_back(client);
                    self.available.add_permits(1);
                    state.live += 1;
                }
                Err(e) => warn!("Pool client {} failed to start: {}", slot, e),
            }
        }

        if state.live == 0 {
            error!("No pool clients could be started, acquire() will wait forever");
        } else {
            info!("Pool initialized with {}/{} clients", state.live, self.size);
        }

        state.initialized = true;
        state.live
    }

    /// Checks out a client, waiting until one is free
    ///
    /// Initializes the pool first if needed. The client goes back to the pool
    /// when the returned guard is dropped.
    pub async fn acquire(&self) -> Result<PoolGuard<'_, F>> {
        self.initialize().await;

        let permit = self
            .available
            .acquire()
            .await
            .map_err(|_| ChintaiError::Pool("pool semaphore closed".to_string()))?;
        permit.forget();

        match self.idle_queue().pop_front() {
            Some(client) => Ok(PoolGuard {
                pool: self,
                client: Some(client),
            }),
            None => Err(ChintaiError::Pool(
                "permit granted but no idle client".to_string(),
            )),
        }
    }

    /// Returns a client to the pool
    pub fn release(&self, client: F::Client) {
        self.idle_queue().push_back(client);
        self.available.add_permits(1);
    }

    /// Shuts down every client and resets the pool
    ///
    /// Waits for checked-out clients to come back first. The pool can be
    /// initialized again afterwards.
    pub async fn close(&self) -> usize {
        let mut state = self.state.lock().await;
        if !state.initialized {
            return 0;
        }

        match self.available.acquire_many(state.live as u32).await {
            Ok(permits) => permits.forget(),
            Err(_) => warn!("Pool semaphore closed while draining"),
        }

        let clients: Vec<F::Client> = self.idle_queue().drain(..).collect();
        let closed = clients.len();
        for client in clients {
            self.factory.shutdown(client).await;
        }

        debug!("Pool closed {} clients", closed);
        *state = PoolState::default();
        closed
    }

    /// Runs `op` with an initialized pool and closes the pool afterwards
    ///
    /// The pool is closed even if `op` panics; the panic is then resumed.
    pub async fn scoped<T, Fut, Op>(self: &Arc<Self>, op: Op) -> T
    where
        Op: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = T>,
    {
        self.initialize().await;
        let outcome = AssertUnwindSafe(op(Arc::clone(self))).catch_unwind().await;
        self.close().await;

        match outcome {
            Ok(value) => value,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

/// A checked-out client, returned to the pool on drop
pub struct PoolGuard<'a, F: ClientFactory> {
    pool: &'a ResourcePool<F>,
    client: Option<F::Client>,
}

impl<F: ClientFactory> Deref for PoolGuard<'_, F> {
    type Target = F::Client;

    fn deref(&self) -> &Self::Target {
        // only taken in drop
        self.client.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<F: ClientFactory> DerefMut for PoolGuard<'_, F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.client.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<F: ClientFactory> Drop for PoolGuard<'_, F> {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.release(client);
        }
    }
}
