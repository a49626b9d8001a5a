// SPDX-License-Identifier: MIT OR Apache-2.0

//! Establishes SSH connections, optionally tunneled through a bastion.
//!
//! The auth-method list is built deterministically: password first, then the
//! private key (inline text, which the defaulting pass fills from the file
//! path), then SSH-agent identities. Host-key verification is
//! insecure-accept; a known-hosts policy would slot into [`ClientHandler`]
//! without changing the interface.

use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, AuthResult, Handle};
use russh::keys::agent::client::AgentClient;
use russh::keys::{decode_secret_key, HashAlg, PrivateKeyWithHashAlg, PublicKey};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connector::connection::Connection;
use crate::connector::{resolve_env_prefix, BastionConfig, ConnectionConfig, DEFAULT_PORT};
use crate::error::{Result, XmError};

/// Accepts any host key.
pub(crate) struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

/// One authentication attempt, tried in order until the server accepts one.
enum AuthMethod {
    Password(String),
    Key(String),
    Agent(String),
}

impl AuthMethod {
    fn describe(&self) -> &'static str {
        match self {
            AuthMethod::Password(_) => "password",
            AuthMethod::Key(_) => "private key",
            AuthMethod::Agent(_) => "ssh agent",
        }
    }
}

/// Creates [`Connection`]s from dial parameters.
pub struct Dialer;

impl Dialer {
    /// Dial a host and layer an SFTP session over the SSH client.
    ///
    /// Defaulting is applied here, exactly once. When a bastion is
    /// configured, the bastion is dialed with its own auth set (falling back
    /// to the target's), a direct-tcpip channel is opened to the target, and
    /// that channel is promoted to a full SSH client.
    ///
    /// # Errors
    ///
    /// Returns an error when validation fails, the auth set is empty, the
    /// TCP or SSH handshake fails, or every auth method is rejected.
    pub async fn dial(config: ConnectionConfig, parent: &CancellationToken) -> Result<Connection> {
        let config = config.defaults()?;
        config.validate()?;

        let port = config.port.unwrap_or(DEFAULT_PORT);
        let timeout = config.timeout.unwrap_or(crate::connector::DEFAULT_TIMEOUT);

        let mut bastion_handle = None;
        let mut handle = match &config.bastion {
            Some(bastion) => {
                let bastion_port = bastion.port.unwrap_or(DEFAULT_PORT);
                let bastion_user = bastion.user.clone().unwrap_or_else(|| config.user.clone());
                let mut jump =
                    connect_tcp(&bastion.address, bastion_port, timeout).await?;
                authenticate(
                    &mut jump,
                    &bastion_user,
                    &bastion.address,
                    bastion_auth_methods(bastion, &config)?,
                )
                .await?;
                debug!(bastion = %bastion.address, target = %config.address, "bastion hop established");

                let channel = jump
                    .channel_open_direct_tcpip(
                        config.address.clone(),
                        u32::from(port),
                        "127.0.0.1",
                        0,
                    )
                    .await?;
                let target = client::connect_stream(
                    client_config(),
                    channel.into_stream(),
                    ClientHandler,
                )
                .await?;
                bastion_handle = Some(jump);
                target
            }
            None => connect_tcp(&config.address, port, timeout).await?,
        };

        authenticate(
            &mut handle,
            &config.user,
            &config.address,
            target_auth_methods(&config)?,
        )
        .await?;

        let mut sftp_channel = handle.channel_open_session().await?;
        sftp_channel.request_subsystem(true, "sftp").await?;
        let sftp = russh_sftp::client::SftpSession::new(sftp_channel.into_stream())
            .await
            .map_err(XmError::Sftp)?;

        debug!(host = %config.address, port, user = %config.user, "connection established");
        Ok(Connection::new(config, handle, bastion_handle, sftp, parent))
    }
}

fn client_config() -> Arc<client::Config> {
    Arc::new(client::Config::default())
}

async fn connect_tcp(
    address: &str,
    port: u16,
    timeout: Duration,
) -> Result<Handle<ClientHandler>> {
    let fut = client::connect(client_config(), (address, port), ClientHandler);
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(XmError::from),
        Err(_) => Err(XmError::Connection(format!(
            "dial {address}:{port} timed out after {timeout:?}"
        ))),
    }
}

/// Auth methods for the target, in deterministic order.
fn target_auth_methods(config: &ConnectionConfig) -> Result<Vec<AuthMethod>> {
    let mut methods = Vec::new();
    if let Some(password) = &config.password {
        methods.push(AuthMethod::Password(password.clone()));
    }
    if let Some(key) = &config.private_key {
        methods.push(AuthMethod::Key(key.clone()));
    }
    if let Some(socket) = &config.agent_socket {
        methods.push(AuthMethod::Agent(resolve_env_prefix(socket)?));
    }
    if methods.is_empty() {
        return Err(XmError::Config(format!(
            "{}: empty authentication method list",
            config.address
        )));
    }
    Ok(methods)
}

/// Auth methods for the bastion: its own credentials when any are set,
/// otherwise the target set is reused.
fn bastion_auth_methods(
    bastion: &BastionConfig,
    config: &ConnectionConfig,
) -> Result<Vec<AuthMethod>> {
    let mut methods = Vec::new();
    if let Some(password) = &bastion.password {
        methods.push(AuthMethod::Password(password.clone()));
    }
    if let Some(key) = &bastion.private_key {
        methods.push(AuthMethod::Key(key.clone()));
    }
    if let Some(socket) = &bastion.agent_socket {
        methods.push(AuthMethod::Agent(resolve_env_prefix(socket)?));
    }
    if methods.is_empty() {
        return target_auth_methods(config);
    }
    Ok(methods)
}

async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    user: &str,
    address: &str,
    methods: Vec<AuthMethod>,
) -> Result<()> {
    let mut rejected = Vec::new();
    for method in methods {
        let label = method.describe();
        match try_method(handle, user, method).await {
            Ok(AuthResult::Success) => {
                debug!(host = %address, user, method = label, "authenticated");
                return Ok(());
            }
            Ok(AuthResult::Failure { .. }) => rejected.push(format!("{label}: rejected")),
            Err(e) => {
                warn!(host = %address, user, method = label, error = %e, "auth method errored");
                rejected.push(format!("{label}: {e}"));
            }
        }
    }
    Err(XmError::Connection(format!(
        "authentication failed for {user}@{address}: {}",
        rejected.join("; ")
    )))
}

async fn try_method(
    handle: &mut Handle<ClientHandler>,
    user: &str,
    method: AuthMethod,
) -> Result<AuthResult> {
    match method {
        AuthMethod::Password(password) => handle
            .authenticate_password(user, password)
            .await
            .map_err(XmError::from),
        AuthMethod::Key(text) => {
            let key = decode_secret_key(&text, None)
                .map_err(|e| XmError::Config(format!("invalid private key: {e}")))?;
            let hash_alg = rsa_hash(handle).await;
            handle
                .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
                .await
                .map_err(XmError::from)
        }
        AuthMethod::Agent(socket) => {
            let mut agent = AgentClient::connect_uds(&socket)
                .await
                .map_err(|e| XmError::Connection(format!("agent socket {socket}: {e}")))?;
            let identities = agent
                .request_identities()
                .await
                .map_err(|e| XmError::Connection(format!("agent identities: {e}")))?;
            if identities.is_empty() {
                return Err(XmError::Connection(format!(
                    "agent at {socket} offered no identities"
                )));
            }
            let hash_alg = rsa_hash(handle).await;
            for identity in identities {
                let result = handle
                    .authenticate_publickey_with(user, identity, hash_alg, &mut agent)
                    .await
                    .map_err(|e| XmError::Connection(format!("agent auth: {e}")))?;
                if matches!(result, AuthResult::Success) {
                    return Ok(result);
                }
            }
            Err(XmError::Connection(format!(
                "agent at {socket}: every identity was rejected"
            )))
        }
    }
}

async fn rsa_hash(handle: &mut Handle<ClientHandler>) -> Option<HashAlg> {
    handle
        .best_supported_rsa_hash()
        .await
        .ok()
        .flatten()
        .flatten()
}
