// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;

#[derive(Debug, Error)]
pub enum XmError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("SFTP error: {0}")]
    Sftp(#[from] russh_sftp::client::error::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("cancelled: {reason}")]
    Cancelled {
        reason: String,
        /// Output captured before the cancellation fired.
        output: String,
    },

    #[error("command `{cmd}` exited with status {exit_code}")]
    CommandFailed {
        cmd: String,
        exit_code: i32,
        output: String,
    },

    #[error("checksum mismatch for {path}: local {local}, remote {remote}")]
    ChecksumMismatch {
        path: String,
        local: String,
        remote: String,
    },

    #[error("unknown pipeline: {0}")]
    UnknownPipeline(String),

    #[error("Module error: {0}")]
    Module(String),

    #[error("{0} host(s) failed: {1}")]
    Hosts(usize, String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl XmError {
    /// Whether the error is a transport-level failure rather than a remote
    /// command reporting a non-zero status.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        !matches!(self, XmError::CommandFailed { .. })
    }
}

pub type Result<T> = std::result::Result<T, XmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_is_not_transport() {
        let err = XmError::CommandFailed {
            cmd: "exit 123".to_string(),
            exit_code: 123,
            output: String::new(),
        };
        assert!(!err.is_transport());
        assert!(err.to_string().contains("123"));
    }

    #[test]
    fn test_connection_closed_is_transport() {
        assert!(XmError::ConnectionClosed.is_transport());
        assert!(XmError::Cancelled {
            reason: "deadline".to_string(),
            output: String::new(),
        }
        .is_transport());
    }
}
