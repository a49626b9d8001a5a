// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test support: an env-described live SSH target.
//!
//! Integration tests that need a real host read it from the environment and
//! SKIP when `XM_TEST_SSH_ADDR` is not set, so the suite stays green on
//! machines without a disposable SSH server.

use std::collections::BTreeSet;

use crate::config::HostSpec;
use crate::connector::Host;

/// Address of a disposable SSH server, e.g. `127.0.0.1:2222`.
pub const ENV_TEST_ADDR: &str = "XM_TEST_SSH_ADDR";
/// Login user; defaults to `root`.
pub const ENV_TEST_USER: &str = "XM_TEST_SSH_USER";
/// Login password.
pub const ENV_TEST_PASSWORD: &str = "XM_TEST_SSH_PASSWORD";

/// A live SSH target described by the environment.
pub struct SshTarget {
    pub host: Host,
}

impl SshTarget {
    /// Build the target from the environment.
    /// Returns `None` (and the caller should skip) when unset.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let addr = match std::env::var(ENV_TEST_ADDR) {
            Ok(addr) if !addr.is_empty() => addr,
            _ => {
                println!("Skipping integration test: {ENV_TEST_ADDR} not set");
                return None;
            }
        };
        let (address, port) = match addr.rsplit_once(':') {
            Some((address, port)) => (address.to_string(), port.parse().ok()),
            None => (addr, None),
        };
        let spec = HostSpec {
            name: "it-target".to_string(),
            address,
            port,
            user: std::env::var(ENV_TEST_USER).unwrap_or_else(|_| "root".to_string()),
            password: std::env::var(ENV_TEST_PASSWORD).ok(),
            ..Default::default()
        };
        Some(Self {
            host: Host::from_spec(&spec, BTreeSet::new()),
        })
    }
}
