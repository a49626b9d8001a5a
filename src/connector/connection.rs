// SPDX-License-Identifier: MIT OR Apache-2.0

//! One live SSH+SFTP session to one host.
//!
//! Commands run in PTY sessions (so remote stderr is merged into stdout and
//! `stderr` comes back empty by design); a scanner on the merged stream
//! answers sudo password prompts. File operations prefer SFTP and fall back
//! to `sudo` shell commands when the global sudo policy routes them that way.
//!
//! A connection is exclusively owned by the [`ConnectorCache`] once
//! published. After [`Connection::close`] every operation fails with
//! "connection closed"; close is idempotent.
//!
//! [`ConnectorCache`]: crate::connector::ConnectorCache

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use md5::{Digest, Md5};
use russh::client::{Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect, Pty, Sig};
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{FileAttributes, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::connector::dialer::ClientHandler;
use crate::connector::escape::{shell_quote, sudo_wrap};
use crate::connector::prompt::PromptScanner;
use crate::connector::ConnectionConfig;
use crate::error::{Result, XmError};

const PTY_TERM: &str = "xterm-256color";
const PTY_ROWS: u32 = 40;
const PTY_COLS: u32 = 80;
const PTY_MODES: &[(Pty, u32)] = &[
    (Pty::ECHO, 0),
    (Pty::TTY_OP_ISPEED, 14400),
    (Pty::TTY_OP_OSPEED, 14400),
];

/// Grace period between SIGINT and force-closing a cancelled session.
const CANCEL_GRACE: Duration = Duration::from_millis(250);

/// Bytes of output retained for failure reports.
const OUTPUT_TAIL: usize = 256;

/// Result of a remote command.
///
/// A non-zero exit status is data, not a transport error; use
/// [`CommandOutput::check`] to turn it into one.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Merged PTY output.
    pub stdout: String,
    /// Empty for PTY sessions; stderr is merged into stdout.
    pub stderr: String,
    /// Remote exit status, `-1` when unknown.
    pub exit_code: i32,
}

impl CommandOutput {
    /// Whether the command exited zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Convert a non-zero exit into a [`XmError::CommandFailed`] carrying the
    /// last bytes of output.
    ///
    /// # Errors
    ///
    /// Returns `CommandFailed` when the exit status is non-zero.
    pub fn check(self, cmd: &str) -> Result<Self> {
        if self.exit_code == 0 {
            Ok(self)
        } else {
            Err(XmError::CommandFailed {
                cmd: cmd.to_string(),
                exit_code: self.exit_code,
                output: tail(&self.stdout),
            })
        }
    }
}

/// Remote file metadata.
#[derive(Debug, Clone, Copy)]
pub struct RemoteStat {
    pub size: u64,
    pub mode: Option<u32>,
    pub is_dir: bool,
}

impl From<FileAttributes> for RemoteStat {
    fn from(attrs: FileAttributes) -> Self {
        Self {
            size: attrs.size.unwrap_or(0),
            mode: attrs.permissions.map(|p| p & 0o7777),
            is_dir: attrs.is_dir(),
        }
    }
}

/// One live SSH client (possibly tunneled through a bastion) with an SFTP
/// session layered on it.
pub struct Connection {
    config: ConnectionConfig,
    target: Handle<ClientHandler>,
    bastion: Option<Handle<ClientHandler>>,
    sftp: RwLock<Option<SftpSession>>,
    /// Connection-wide scope; expiry tears down every child session.
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl Connection {
    pub(crate) fn new(
        config: ConnectionConfig,
        target: Handle<ClientHandler>,
        bastion: Option<Handle<ClientHandler>>,
        sftp: SftpSession,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            config,
            target,
            bastion,
            sftp: RwLock::new(Some(sftp)),
            cancel: parent.child_token(),
            closed: AtomicBool::new(false),
        }
    }

    /// The dial parameters this connection was created with.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(XmError::ConnectionClosed);
        }
        Ok(())
    }

    /// Run a command in a fresh PTY session and collect its merged output.
    ///
    /// # Errors
    ///
    /// Returns transport errors only; a non-zero remote exit comes back as
    /// `Ok` with the code in the output.
    pub async fn exec(&self, cancel: &CancellationToken, cmd: &str) -> Result<CommandOutput> {
        self.ensure_open()?;
        let mut channel = self.open_exec_channel(cmd).await?;

        let mut scanner = self
            .config
            .password
            .as_ref()
            .map(|_| PromptScanner::new(&self.config.user));
        let mut stdout: Vec<u8> = Vec::new();
        let mut stderr: Vec<u8> = Vec::new();
        let mut exit_code: Option<i32> = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(self.interrupt(&mut channel, &stdout, "call context cancelled").await);
                }
                _ = self.cancel.cancelled() => {
                    return Err(self.interrupt(&mut channel, &stdout, "connection cancelled").await);
                }
                msg = channel.wait() => match msg {
                    Some(ChannelMsg::Data { data }) => {
                        stdout.extend_from_slice(&data);
                        if let Some(scanner) = scanner.as_mut() {
                            if scanner.feed(&data) {
                                self.send_password(&mut channel).await?;
                                channel.eof().await?;
                            }
                        }
                    }
                    Some(ChannelMsg::ExtendedData { data, .. }) => {
                        stderr.extend_from_slice(&data);
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        exit_code = Some(exit_status as i32);
                    }
                    Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                        trace!(?signal_name, cmd, "remote command killed by signal");
                        exit_code.get_or_insert(-1);
                    }
                    Some(_) => {}
                    None => break,
                }
            }
        }

        let exit_code = exit_code.ok_or_else(|| {
            XmError::Connection(format!("session for `{cmd}` closed without exit status"))
        })?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
        })
    }

    /// Run a command wiring caller-supplied stdin/stdout/stderr.
    ///
    /// When the command elevates and the config carries a password, the
    /// caller's stdin is held back until the password has been written, so
    /// the caller's first byte is not consumed by the sudo prompt.
    ///
    /// # Errors
    ///
    /// Returns transport errors; the remote exit status is the `Ok` value.
    pub async fn pexec<I, O, E>(
        &self,
        cancel: &CancellationToken,
        cmd: &str,
        stdin: &mut I,
        stdout: &mut O,
        stderr: &mut E,
    ) -> Result<i32>
    where
        I: AsyncRead + Unpin + Send,
        O: AsyncWrite + Unpin + Send,
        E: AsyncWrite + Unpin + Send,
    {
        self.ensure_open()?;
        let mut channel = self.open_exec_channel(cmd).await?;

        let sudo_expected = self.config.password.is_some() && cmd.contains("sudo");
        let mut scanner = sudo_expected.then(|| PromptScanner::new(&self.config.user));
        let mut forward_stdin = !sudo_expected;
        let mut stdin_open = true;
        let mut exit_code: Option<i32> = None;
        let mut recent: Vec<u8> = Vec::new();
        let mut buf = [0u8; 8192];

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(self.interrupt(&mut channel, &recent, "call context cancelled").await);
                }
                _ = self.cancel.cancelled() => {
                    return Err(self.interrupt(&mut channel, &recent, "connection cancelled").await);
                }
                read = stdin.read(&mut buf), if forward_stdin && stdin_open => {
                    match read {
                        Ok(0) => {
                            stdin_open = false;
                            channel.eof().await?;
                        }
                        Ok(n) => channel.data(&buf[..n]).await?,
                        Err(e) => return Err(XmError::Io(e)),
                    }
                }
                msg = channel.wait() => match msg {
                    Some(ChannelMsg::Data { data }) => {
                        stdout.write_all(&data).await?;
                        keep_tail(&mut recent, &data);
                        if let Some(scanner) = scanner.as_mut() {
                            if scanner.feed(&data) {
                                self.send_password(&mut channel).await?;
                                forward_stdin = true;
                            }
                        }
                    }
                    Some(ChannelMsg::ExtendedData { data, .. }) => {
                        stderr.write_all(&data).await?;
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        exit_code = Some(exit_status as i32);
                    }
                    Some(ChannelMsg::ExitSignal { .. }) => {
                        exit_code.get_or_insert(-1);
                    }
                    Some(_) => {}
                    None => break,
                }
            }
        }

        stdout.flush().await?;
        stderr.flush().await?;
        exit_code.ok_or_else(|| {
            XmError::Connection(format!("session for `{cmd}` closed without exit status"))
        })
    }

    async fn open_exec_channel(&self, cmd: &str) -> Result<Channel<Msg>> {
        let mut channel = self.target.channel_open_session().await?;
        channel
            .request_pty(false, PTY_TERM, PTY_COLS, PTY_ROWS, 0, 0, PTY_MODES)
            .await?;
        for (name, value) in [("LANG", "en_US.UTF-8"), ("LC_ALL", "en_US.UTF-8")] {
            if let Err(e) = channel.set_env(false, name, value).await {
                debug!(name, error = %e, "failed to set session locale");
            }
        }
        channel.exec(true, cmd).await?;
        Ok(channel)
    }

    async fn send_password(&self, channel: &mut Channel<Msg>) -> Result<()> {
        let line = format!("{}\n", self.config.password.as_deref().unwrap_or_default());
        channel.data(line.as_bytes()).await?;
        Ok(())
    }

    /// Cancellation sequence: SIGINT, up to 250 ms for the session to wind
    /// down, then force close. Returns the wrapped context error carrying
    /// the partial output.
    async fn interrupt(
        &self,
        channel: &mut Channel<Msg>,
        partial: &[u8],
        reason: &str,
    ) -> XmError {
        let _ = channel.signal(Sig::INT).await;
        let _ = tokio::time::timeout(CANCEL_GRACE, async {
            while let Some(msg) = channel.wait().await {
                if matches!(msg, ChannelMsg::ExitStatus { .. } | ChannelMsg::Close) {
                    break;
                }
            }
        })
        .await;
        let _ = channel.close().await;
        XmError::Cancelled {
            reason: reason.to_string(),
            output: String::from_utf8_lossy(partial).into_owned(),
        }
    }

    /// Upload a local file, skipping the write when the remote MD5 already
    /// matches and verifying the remote MD5 afterwards.
    ///
    /// The remote file keeps the local file's permission bits. Under the
    /// sudo policy the payload goes through a generated `/tmp` name and a
    /// `sudo mv`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, a failed sudo move, or an MD5
    /// mismatch after the write.
    pub async fn upload_file(
        &self,
        cancel: &CancellationToken,
        local: &Path,
        remote: &str,
    ) -> Result<()> {
        self.ensure_open()?;
        let local_sum = local_md5(local).await?;
        if self.remote_file_exist(cancel, remote).await?
            && self.remote_md5(cancel, remote).await?.as_deref() == Some(local_sum.as_str())
        {
            debug!(remote, "remote checksum matches, skipping upload");
            return Ok(());
        }

        let metadata = tokio::fs::metadata(local).await?;
        let mode = file_mode(&metadata);

        if self.config.use_sudo_for_file_ops {
            let staging = format!("/tmp/xm_upload_sudo-{}", Uuid::new_v4());
            self.sftp_upload(local, &staging).await?;
            let mut cmd = format!(
                "mv -f {} {} && chmod {:o} {}",
                shell_quote(&staging),
                shell_quote(remote),
                mode,
                shell_quote(remote)
            );
            if let Some(owner) = &self.config.sudo_file_ops_user {
                cmd.push_str(&format!(" && chown {} {}", shell_quote(owner), shell_quote(remote)));
            }
            let moved = self.exec(cancel, &sudo_wrap(&cmd)).await?;
            if !moved.success() {
                let cleanup = sudo_wrap(&format!("rm -f {}", shell_quote(&staging)));
                let _ = self.exec(cancel, &cleanup).await;
                return Err(XmError::CommandFailed {
                    cmd,
                    exit_code: moved.exit_code,
                    output: tail(&moved.stdout),
                });
            }
        } else {
            if let Some(parent) = parent_dir(remote) {
                self.mkdir_all_sftp(&parent, None).await?;
            }
            self.sftp_upload(local, remote).await?;
            self.chmod_sftp(remote, mode).await?;
        }

        match self.remote_md5(cancel, remote).await? {
            Some(remote_sum) if remote_sum == local_sum => Ok(()),
            other => Err(XmError::ChecksumMismatch {
                path: remote.to_string(),
                local: local_sum,
                remote: other.unwrap_or_else(|| "<missing>".to_string()),
            }),
        }
    }

    /// Download a remote file. Under the sudo policy the content is pulled
    /// through `sudo cat | base64 --wrap=0` and decoded locally.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, a non-zero `cat`, or a corrupt
    /// base64 stream.
    pub async fn download_file(
        &self,
        cancel: &CancellationToken,
        remote: &str,
        local: &Path,
    ) -> Result<()> {
        self.ensure_open()?;
        if let Some(parent) = local.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        if self.config.use_sudo_for_file_ops {
            let bytes = self.sudo_read(cancel, remote).await?;
            tokio::fs::write(local, bytes).await?;
        } else {
            let guard = self.sftp.read().await;
            let sftp = guard.as_ref().ok_or(XmError::ConnectionClosed)?;
            let mut src = sftp.open(remote).await.map_err(XmError::Sftp)?;
            let mut dst = tokio::fs::File::create(local).await?;
            tokio::io::copy(&mut src, &mut dst).await?;
            dst.flush().await?;
        }
        Ok(())
    }

    /// Open a remote file for reading; the caller closes the stream by
    /// dropping it. Falls back to a buffered `sudo cat` read when SFTP is
    /// denied and the sudo policy is active.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be opened either way.
    pub async fn fetch(
        &self,
        cancel: &CancellationToken,
        remote: &str,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        self.ensure_open()?;
        {
            let guard = self.sftp.read().await;
            let sftp = guard.as_ref().ok_or(XmError::ConnectionClosed)?;
            match sftp.open(remote).await {
                Ok(file) => return Ok(Box::new(file)),
                Err(e) if is_permission_denied(&e) && self.config.use_sudo_for_file_ops => {}
                Err(e) => return Err(XmError::Sftp(e)),
            }
        }
        let bytes = self.sudo_read(cancel, remote).await?;
        Ok(Box::new(std::io::Cursor::new(bytes)))
    }

    /// Stream a reader to a remote path with the given permission bits.
    /// Under the sudo policy this is `sudo mkdir -p` + a streaming
    /// `sudo tee` + `sudo chmod`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-zero remote step.
    pub async fn scp<R>(
        &self,
        cancel: &CancellationToken,
        reader: &mut R,
        remote: &str,
        mode: u32,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.ensure_open()?;
        if self.config.use_sudo_for_file_ops {
            if let Some(parent) = parent_dir(remote) {
                let mkdir = format!("mkdir -p {}", shell_quote(&parent));
                self.exec(cancel, &sudo_wrap(&mkdir)).await?.check(&mkdir)?;
            }
            let tee = sudo_wrap(&format!("tee {} > /dev/null", shell_quote(remote)));
            let mut out_sink = tokio::io::sink();
            let mut err_sink = tokio::io::sink();
            let code = self
                .pexec(cancel, &tee, reader, &mut out_sink, &mut err_sink)
                .await?;
            if code != 0 {
                return Err(XmError::CommandFailed {
                    cmd: tee,
                    exit_code: code,
                    output: String::new(),
                });
            }
            let mut cmd = format!("chmod {:o} {}", mode, shell_quote(remote));
            if let Some(owner) = &self.config.sudo_file_ops_user {
                cmd.push_str(&format!(" && chown {} {}", shell_quote(owner), shell_quote(remote)));
            }
            self.exec(cancel, &sudo_wrap(&cmd)).await?.check(&cmd)?;
        } else {
            if let Some(parent) = parent_dir(remote) {
                self.mkdir_all_sftp(&parent, None).await?;
            }
            {
                let guard = self.sftp.read().await;
                let sftp = guard.as_ref().ok_or(XmError::ConnectionClosed)?;
                let mut dst = sftp.create(remote).await.map_err(XmError::Sftp)?;
                tokio::io::copy(reader, &mut dst).await?;
                dst.shutdown().await?;
            }
            self.chmod_sftp(remote, mode).await?;
        }
        Ok(())
    }

    /// Stat a remote path. `Ok(None)` means the path does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error for any SFTP failure other than "no such file".
    pub async fn stat_remote(&self, path: &str) -> Result<Option<RemoteStat>> {
        self.ensure_open()?;
        let guard = self.sftp.read().await;
        let sftp = guard.as_ref().ok_or(XmError::ConnectionClosed)?;
        match sftp.metadata(path).await {
            Ok(attrs) => Ok(Some(RemoteStat::from(attrs))),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(XmError::Sftp(e)),
        }
    }

    /// Whether a remote regular file exists. Falls back to `sudo test -f`
    /// when SFTP stat is denied.
    ///
    /// # Errors
    ///
    /// Returns transport errors.
    pub async fn remote_file_exist(&self, cancel: &CancellationToken, path: &str) -> Result<bool> {
        self.exists(cancel, path, false).await
    }

    /// Whether a remote directory exists. Falls back to `sudo test -d` when
    /// SFTP stat is denied.
    ///
    /// # Errors
    ///
    /// Returns transport errors.
    pub async fn remote_dir_exist(&self, cancel: &CancellationToken, path: &str) -> Result<bool> {
        self.exists(cancel, path, true).await
    }

    async fn exists(&self, cancel: &CancellationToken, path: &str, dir: bool) -> Result<bool> {
        self.ensure_open()?;
        let result = {
            let guard = self.sftp.read().await;
            let sftp = guard.as_ref().ok_or(XmError::ConnectionClosed)?;
            sftp.metadata(path).await
        };
        match result {
            Ok(attrs) => Ok(attrs.is_dir() == dir),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) if is_permission_denied(&e) => {
                let flag = if dir { "-d" } else { "-f" };
                let probe = sudo_wrap(&format!("test {flag} {}", shell_quote(path)));
                Ok(self.exec(cancel, &probe).await?.success())
            }
            Err(e) => Err(XmError::Sftp(e)),
        }
    }

    /// Create a directory and any missing parents, then apply the mode to
    /// the leaf. Calling it again on an existing tree changes nothing.
    ///
    /// # Errors
    ///
    /// Returns an error when a path component exists as a regular file or a
    /// remote step fails.
    pub async fn mkdir_all(&self, cancel: &CancellationToken, path: &str, mode: u32) -> Result<()> {
        self.ensure_open()?;
        if self.config.use_sudo_for_file_ops {
            let cmd = format!(
                "mkdir -p {} && chmod {:o} {}",
                shell_quote(path),
                mode,
                shell_quote(path)
            );
            self.exec(cancel, &sudo_wrap(&cmd)).await?.check(&cmd)?;
            return Ok(());
        }
        self.mkdir_all_sftp(path, Some(mode)).await
    }

    /// Change the permission bits of a remote path.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a failed `sudo chmod`.
    pub async fn chmod(&self, cancel: &CancellationToken, path: &str, mode: u32) -> Result<()> {
        self.ensure_open()?;
        if self.config.use_sudo_for_file_ops {
            let cmd = format!("chmod {:o} {}", mode, shell_quote(path));
            self.exec(cancel, &sudo_wrap(&cmd)).await?.check(&cmd)?;
            return Ok(());
        }
        self.chmod_sftp(path, mode).await
    }

    /// Release the SFTP session, the target SSH client and the bastion SSH
    /// client, in that order, accumulating errors. Idempotent; the second
    /// call returns `Ok` without doing anything.
    ///
    /// # Errors
    ///
    /// Returns the joined disconnect errors, if any.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel.cancel();
        let mut errors: Vec<String> = Vec::new();

        drop(self.sftp.write().await.take());
        if let Err(e) = self
            .target
            .disconnect(Disconnect::ByApplication, "closing", "en")
            .await
        {
            errors.push(format!("target: {e}"));
        }
        if let Some(bastion) = &self.bastion {
            if let Err(e) = bastion
                .disconnect(Disconnect::ByApplication, "closing", "en")
                .await
            {
                errors.push(format!("bastion: {e}"));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(XmError::Connection(errors.join("; ")))
        }
    }

    /// Whether [`Connection::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn sudo_read(&self, cancel: &CancellationToken, remote: &str) -> Result<Vec<u8>> {
        let cmd = sudo_wrap(&format!("cat {} | base64 --wrap=0", shell_quote(remote)));
        let out = self.exec(cancel, &cmd).await?.check(&cmd)?;
        let encoded: String = out.stdout.chars().filter(|c| !c.is_whitespace()).collect();
        BASE64
            .decode(encoded.as_bytes())
            .map_err(|e| XmError::Unknown(format!("corrupt base64 stream from {remote}: {e}")))
    }

    async fn sftp_upload(&self, local: &Path, remote: &str) -> Result<()> {
        let guard = self.sftp.read().await;
        let sftp = guard.as_ref().ok_or(XmError::ConnectionClosed)?;
        let mut src = tokio::fs::File::open(local).await?;
        let mut dst = sftp.create(remote).await.map_err(XmError::Sftp)?;
        tokio::io::copy(&mut src, &mut dst).await?;
        dst.shutdown().await?;
        Ok(())
    }

    async fn mkdir_all_sftp(&self, path: &str, mode: Option<u32>) -> Result<()> {
        let guard = self.sftp.read().await;
        let sftp = guard.as_ref().ok_or(XmError::ConnectionClosed)?;
        let mut prefix = String::new();
        if path.starts_with('/') {
            prefix.push('/');
        }
        for component in path.split('/').filter(|c| !c.is_empty()) {
            if !prefix.is_empty() && !prefix.ends_with('/') {
                prefix.push('/');
            }
            prefix.push_str(component);
            match sftp.metadata(&prefix).await {
                Ok(attrs) if attrs.is_dir() => continue,
                Ok(_) => {
                    return Err(XmError::Validation(format!(
                        "{prefix} exists and is not a directory"
                    )))
                }
                Err(e) if is_not_found(&e) => {
                    sftp.create_dir(&prefix).await.map_err(XmError::Sftp)?;
                }
                Err(e) => return Err(XmError::Sftp(e)),
            }
        }
        if let Some(mode) = mode {
            let attrs = FileAttributes {
                permissions: Some(mode),
                ..Default::default()
            };
            sftp.set_metadata(path, attrs).await.map_err(XmError::Sftp)?;
        }
        Ok(())
    }

    async fn chmod_sftp(&self, path: &str, mode: u32) -> Result<()> {
        let guard = self.sftp.read().await;
        let sftp = guard.as_ref().ok_or(XmError::ConnectionClosed)?;
        let attrs = FileAttributes {
            permissions: Some(mode),
            ..Default::default()
        };
        sftp.set_metadata(path, attrs).await.map_err(XmError::Sftp)
    }

    async fn remote_md5(&self, cancel: &CancellationToken, path: &str) -> Result<Option<String>> {
        let cmd = format!("md5sum {} | cut -d' ' -f1", shell_quote(path));
        let cmd = if self.config.use_sudo_for_file_ops {
            sudo_wrap(&cmd)
        } else {
            cmd
        };
        let out = self.exec(cancel, &cmd).await?;
        if !out.success() {
            return Ok(None);
        }
        Ok(parse_md5(&out.stdout))
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.config.address)
            .field("user", &self.config.user)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn local_md5(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Pick the MD5 digest out of `md5sum | cut` output. The PTY may prepend
/// noise (motd fragments, CR pairs), so the last 32-hex token wins.
fn parse_md5(s: &str) -> Option<String> {
    s.split_whitespace()
        .rev()
        .find(|t| t.len() == 32 && t.chars().all(|c| c.is_ascii_hexdigit()))
        .map(str::to_ascii_lowercase)
}

fn parent_dir(path: &str) -> Option<String> {
    let idx = path.rfind('/')?;
    if idx == 0 {
        None
    } else {
        Some(path[..idx].to_string())
    }
}

fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

fn tail(s: &str) -> String {
    if s.len() <= OUTPUT_TAIL {
        return s.to_string();
    }
    let mut start = s.len() - OUTPUT_TAIL;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}

fn keep_tail(recent: &mut Vec<u8>, data: &[u8]) {
    recent.extend_from_slice(data);
    if recent.len() > OUTPUT_TAIL {
        let cut = recent.len() - OUTPUT_TAIL;
        recent.drain(..cut);
    }
}

fn is_not_found(e: &SftpError) -> bool {
    matches!(e, SftpError::Status(status) if status.status_code == StatusCode::NoSuchFile)
}

fn is_permission_denied(e: &SftpError) -> bool {
    matches!(e, SftpError::Status(status) if status.status_code == StatusCode::PermissionDenied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_passes_zero_exit() {
        let out = CommandOutput {
            stdout: "hello".to_string(),
            stderr: String::new(),
            exit_code: 0,
        };
        assert!(out.check("echo hello").is_ok());
    }

    #[test]
    fn test_check_wraps_nonzero_exit() {
        let out = CommandOutput {
            stdout: "boom".to_string(),
            stderr: String::new(),
            exit_code: 123,
        };
        match out.check("exit 123") {
            Err(XmError::CommandFailed { exit_code, output, .. }) => {
                assert_eq!(exit_code, 123);
                assert_eq!(output, "boom");
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_md5_plain() {
        assert_eq!(
            parse_md5("900150983cd24fb0d6963f7d28e17f72\r\n").as_deref(),
            Some("900150983cd24fb0d6963f7d28e17f72")
        );
    }

    #[test]
    fn test_parse_md5_with_noise() {
        let noisy = "Last login: whatever\r\n900150983CD24FB0D6963F7D28E17F72\r\n";
        assert_eq!(
            parse_md5(noisy).as_deref(),
            Some("900150983cd24fb0d6963f7d28e17f72")
        );
    }

    #[test]
    fn test_parse_md5_rejects_short_tokens() {
        assert_eq!(parse_md5("deadbeef\n"), None);
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("/etc/kubernetes/admin.conf").as_deref(), Some("/etc/kubernetes"));
        assert_eq!(parent_dir("/tmp"), None);
        assert_eq!(parent_dir("relative.txt"), None);
    }

    #[test]
    fn test_tail_keeps_last_256_bytes() {
        let long = "x".repeat(300);
        let tailed = tail(&long);
        assert_eq!(tailed.len(), OUTPUT_TAIL);
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        let long = format!("{}é", "x".repeat(300));
        let tailed = tail(&long);
        assert!(tailed.ends_with('é'));
        assert!(tailed.len() <= OUTPUT_TAIL);
    }

    #[test]
    fn test_keep_tail_caps_buffer() {
        let mut recent = Vec::new();
        keep_tail(&mut recent, &[b'a'; 200]);
        keep_tail(&mut recent, &[b'b'; 200]);
        assert_eq!(recent.len(), OUTPUT_TAIL);
        assert!(recent.ends_with(&[b'b'; 200]));
    }
}
