// SPDX-License-Identifier: MIT OR Apache-2.0

//! De-duplicating store of live connections keyed by host identity.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connector::{Connection, ConnectionConfig, Dialer, Host, SudoPolicy};
use crate::error::Result;

/// Maps host identity to its live [`Connection`].
///
/// Two callers asking for the same host concurrently produce one retained
/// connection: the dial happens outside the lock, the map is re-checked
/// afterwards, and the losing dial closes its own connection in the
/// background.
pub struct ConnectorCache {
    connections: Mutex<HashMap<String, Arc<Connection>>>,
    policy: SudoPolicy,
    /// Root scope for every connection this cache creates.
    cancel: CancellationToken,
}

impl ConnectorCache {
    /// Create an empty cache. Connections inherit cancellation from `cancel`.
    #[must_use]
    pub fn new(policy: SudoPolicy, cancel: CancellationToken) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            policy,
            cancel,
        }
    }

    /// Get the connection for a host, dialing on a miss.
    ///
    /// # Errors
    ///
    /// Returns the dial error on a failed connection attempt.
    pub async fn get(&self, host: &Host) -> Result<Arc<Connection>> {
        let id = host.id();
        {
            let connections = self.connections.lock().await;
            if let Some(conn) = connections.get(&id) {
                return Ok(Arc::clone(conn));
            }
        }

        // Dial without the lock held; a slow handshake must not block other
        // hosts.
        let config = ConnectionConfig::from_host(host, &self.policy);
        let dialed = Arc::new(Dialer::dial(config, &self.cancel).await?);

        let mut connections = self.connections.lock().await;
        if let Some(winner) = connections.get(&id) {
            // Another caller won the race; this dial is surplus.
            let winner = Arc::clone(winner);
            drop(connections);
            debug!(host = %id, "discarding duplicate connection");
            tokio::spawn(async move {
                if let Err(e) = dialed.close().await {
                    warn!(error = %e, "failed to close duplicate connection");
                }
            });
            return Ok(winner);
        }
        connections.insert(id, Arc::clone(&dialed));
        Ok(dialed)
    }

    /// Detach and close the entry for one host, if present.
    pub async fn close(&self, host: &Host) {
        let detached = self.connections.lock().await.remove(&host.id());
        if let Some(conn) = detached {
            if let Err(e) = conn.close().await {
                warn!(host = %host.id(), error = %e, "failed to close connection");
            }
        }
    }

    /// Detach every entry under the lock, then close them without the lock
    /// held so a slow close does not block lookups.
    pub async fn close_all(&self) {
        let detached: Vec<(String, Arc<Connection>)> = {
            let mut connections = self.connections.lock().await;
            std::mem::take(&mut *connections).into_iter().collect()
        };
        for (id, conn) in detached {
            if let Err(e) = conn.close().await {
                warn!(host = %id, error = %e, "failed to close connection");
            }
        }
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Whether the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl std::fmt::Debug for ConnectorCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorCache").finish_non_exhaustive()
    }
}
