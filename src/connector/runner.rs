// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sudo-aware command helper bound to one connection.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::connector::escape::sudo_wrap;
use crate::connector::{CommandOutput, Connection};
use crate::error::Result;

/// Offers `run` and `sudo_run` on top of a [`Connection`], so steps can be
/// written without knowing whether elevation is in force.
#[derive(Debug, Clone)]
pub struct Runner {
    conn: Arc<Connection>,
}

impl Runner {
    /// Bind a runner to a connection.
    #[must_use]
    pub fn new(conn: Arc<Connection>) -> Self {
        Self { conn }
    }

    /// The underlying connection.
    #[must_use]
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Execute the command verbatim.
    ///
    /// # Errors
    ///
    /// Returns transport errors from [`Connection::exec`].
    pub async fn run(&self, cancel: &CancellationToken, cmd: &str) -> Result<CommandOutput> {
        self.conn.exec(cancel, cmd).await
    }

    /// Execute the command inside the canonical
    /// `sudo -E /bin/bash -c "…"` envelope.
    ///
    /// # Errors
    ///
    /// Returns transport errors from [`Connection::exec`].
    pub async fn sudo_run(&self, cancel: &CancellationToken, cmd: &str) -> Result<CommandOutput> {
        self.conn.exec(cancel, &sudo_wrap(cmd)).await
    }
}
