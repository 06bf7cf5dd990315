//! Lazily established, memoized connection handle for senders.
//!
//! A sender owns one `LazyConnection`; the first send builds the connection,
//! later sends reuse it. Building happens at most once at a time: concurrent
//! first users serialize on a mutex and re-check before connecting.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let connection = LazyConnection::new("signalfx", Duration::from_secs(10), || async {
//!     reqwest::Client::builder().build().map_err(|e| SinkError::connection_failed(e.to_string()))
//! });
//!
//! // Connection happens here, not during construction
//! let client = connection.get().await?;
//! ```

use crate::SinkError;
use futures::future::BoxFuture;
use std::fmt::Debug;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

type ConnectFn<C> = dyn Fn() -> BoxFuture<'static, Result<C, SinkError>> + Send + Sync;

/// Connection states for a lazy handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LazyConnectionState {
    /// Not connected yet (initial state, or after invalidate/close)
    Disconnected,
    /// Currently attempting to connect
    Connecting,
    /// Successfully connected
    Connected,
    /// Last connection attempt failed
    Failed,
}

/// Attempt counters for a lazy handle
#[derive(Debug, Default)]
pub struct LazyMetrics {
    pub connection_attempts: AtomicU64,
    pub successful_connects: AtomicU64,
    pub failed_connects: AtomicU64,
    pub invalidations: AtomicU64,
}

/// A connection built on first use and reused afterwards
pub struct LazyConnection<C> {
    inner: RwLock<Option<Arc<C>>>,
    state: parking_lot::Mutex<LazyConnectionState>,
    connect: Box<ConnectFn<C>>,
    connect_timeout: Duration,
    connection_mutex: Mutex<()>,
    metrics: LazyMetrics,
    name: String,
}

impl<C> Debug for LazyConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyConnection")
            .field("name", &self.name)
            .field("state", &*self.state.lock())
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl<C: Send + Sync + 'static> LazyConnection<C> {
    pub fn new<F, Fut>(name: impl Into<String>, connect_timeout: Duration, connect: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<C, SinkError>> + Send + 'static,
    {
        Self {
            inner: RwLock::new(None),
            state: parking_lot::Mutex::new(LazyConnectionState::Disconnected),
            connect: Box::new(move || -> BoxFuture<'static, Result<C, SinkError>> {
                Box::pin(connect())
            }),
            connect_timeout,
            connection_mutex: Mutex::new(()),
            metrics: LazyMetrics::default(),
            name: name.into(),
        }
    }

    pub fn state(&self) -> LazyConnectionState {
        *self.state.lock()
    }

    pub fn metrics(&self) -> &LazyMetrics {
        &self.metrics
    }

    /// Return the memoized connection, building it if needed
    pub async fn get(&self) -> Result<Arc<C>, SinkError> {
        // Fast path: already connected
        if let Some(conn) = self.inner.read().await.as_ref() {
            return Ok(Arc::clone(conn));
        }

        // Slow path: only one caller connects at a time
        let _guard = self.connection_mutex.lock().await;

        // Double-check under mutex
        if let Some(conn) = self.inner.read().await.as_ref() {
            return Ok(Arc::clone(conn));
        }

        self.transition_to(LazyConnectionState::Connecting);
        self.metrics
            .connection_attempts
            .fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Lazy connection '{}' attempting connection", self.name);

        match tokio::time::timeout(self.connect_timeout, (self.connect)()).await {
            Ok(Ok(conn)) => {
                let conn = Arc::new(conn);
                *self.inner.write().await = Some(Arc::clone(&conn));
                self.transition_to(LazyConnectionState::Connected);
                self.metrics
                    .successful_connects
                    .fetch_add(1, Ordering::Relaxed);
                tracing::info!("Lazy connection '{}' established", self.name);
                Ok(conn)
            }
            Ok(Err(e)) => {
                self.connect_failed();
                tracing::warn!("Lazy connection '{}' failed: {}", self.name, e);
                Err(e)
            }
            Err(_) => {
                self.connect_failed();
                tracing::warn!(
                    "Lazy connection '{}' timed out after {:?}",
                    self.name,
                    self.connect_timeout
                );
                Err(SinkError::timeout(self.connect_timeout))
            }
        }
    }

    /// Forget a broken connection so the next `get` reconnects
    pub async fn invalidate(&self) {
        let _guard = self.connection_mutex.lock().await;
        if self.inner.write().await.take().is_some() {
            self.metrics.invalidations.fetch_add(1, Ordering::Relaxed);
            self.transition_to(LazyConnectionState::Disconnected);
            tracing::debug!("Lazy connection '{}' invalidated", self.name);
        }
    }

    /// Release the connection; a later `get` would connect again
    pub async fn close(&self) {
        let _guard = self.connection_mutex.lock().await;
        let released = self.inner.write().await.take().is_some();
        self.transition_to(LazyConnectionState::Disconnected);
        if released {
            tracing::info!("Lazy connection '{}' closed", self.name);
        }
    }

    fn connect_failed(&self) {
        self.transition_to(LazyConnectionState::Failed);
        self.metrics.failed_connects.fetch_add(1, Ordering::Relaxed);
    }

    fn transition_to(&self, new_state: LazyConnectionState) {
        let mut state = self.state.lock();
        if *state != new_state {
            tracing::debug!(
                "Lazy connection '{}' state transition: {:?} -> {:?}",
                self.name,
                *state,
                new_state
            );
            *state = new_state;
        }
    }
}
