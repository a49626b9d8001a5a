// SPDX-License-Identifier: MIT OR Apache-2.0

//! Live-SSH scenarios against a disposable server.
//!
//! Every test SKIPS unless `XM_TEST_SSH_ADDR` (plus user/password) points at
//! a throwaway SSH server, mirroring how a local `sshd` in a container is
//! wired up in CI.

use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use xmcores::connector::{ConnectionConfig, ConnectorCache, Dialer, SudoPolicy};
use xmcores::error::XmError;
use xmcores::testkit::SshTarget;

async fn dial(target: &SshTarget) -> xmcores::connector::Connection {
    let config = ConnectionConfig::from_host(&target.host, &SudoPolicy::default());
    Dialer::dial(config, &CancellationToken::new())
        .await
        .expect("dial test target")
}

#[tokio::test]
async fn exec_echo_returns_stdout_and_zero() {
    let Some(target) = SshTarget::from_env() else {
        return;
    };
    let conn = dial(&target).await;
    let out = conn
        .exec(&CancellationToken::new(), "echo hello")
        .await
        .unwrap();
    assert_eq!(out.exit_code, 0);
    assert!(out.stdout.contains("hello"));
    conn.close().await.unwrap();
}

#[tokio::test]
async fn nonzero_exit_is_data_not_transport() {
    let Some(target) = SshTarget::from_env() else {
        return;
    };
    let conn = dial(&target).await;
    let out = conn
        .exec(&CancellationToken::new(), "exit 123")
        .await
        .unwrap();
    assert_eq!(out.exit_code, 123);

    let err = out.check("exit 123").unwrap_err();
    assert!(matches!(err, XmError::CommandFailed { exit_code: 123, .. }));
    assert!(!err.is_transport());
    conn.close().await.unwrap();
}

#[tokio::test]
async fn pty_merges_stderr_into_stdout() {
    let Some(target) = SshTarget::from_env() else {
        return;
    };
    let conn = dial(&target).await;
    let out = conn
        .exec(&CancellationToken::new(), "echo A; echo B >&2")
        .await
        .unwrap();
    assert!(out.stdout.contains('A'));
    assert!(out.stdout.contains('B'));
    assert!(out.stderr.is_empty());
    conn.close().await.unwrap();
}

#[tokio::test]
async fn upload_download_round_trip() {
    let Some(target) = SshTarget::from_env() else {
        return;
    };
    let conn = dial(&target).await;
    let cancel = CancellationToken::new();

    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("x");
    std::fs::write(&src, b"abc").unwrap();
    let remote = format!("/tmp/xm_it_{}", std::process::id());

    conn.upload_file(&cancel, &src, &remote).await.unwrap();
    // a second upload with the same content is skipped by checksum
    conn.upload_file(&cancel, &src, &remote).await.unwrap();

    let dst = dir.path().join("z");
    conn.download_file(&cancel, &remote, &dst).await.unwrap();
    assert_eq!(std::fs::read(&dst).unwrap(), b"abc");

    let mut fetched = conn.fetch(&cancel, &remote).await.unwrap();
    let mut buf = Vec::new();
    fetched.read_to_end(&mut buf).await.unwrap();
    assert_eq!(buf, b"abc");

    let _ = conn.exec(&cancel, &format!("rm -f {remote}")).await;
    conn.close().await.unwrap();
}

#[tokio::test]
async fn scp_stream_and_mkdir_all() {
    let Some(target) = SshTarget::from_env() else {
        return;
    };
    let conn = dial(&target).await;
    let cancel = CancellationToken::new();
    let base = format!("/tmp/xm_it_scp_{}", std::process::id());

    conn.mkdir_all(&cancel, &base, 0o755).await.unwrap();
    // idempotent
    conn.mkdir_all(&cancel, &base, 0o755).await.unwrap();
    assert!(conn.remote_dir_exist(&cancel, &base).await.unwrap());

    let remote = format!("{base}/payload.sh");
    let mut reader = std::io::Cursor::new(b"#!/bin/sh\necho hi\n".to_vec());
    conn.scp(&cancel, &mut reader, &remote, 0o755).await.unwrap();

    let stat = conn.stat_remote(&remote).await.unwrap().unwrap();
    assert!(!stat.is_dir);
    assert_eq!(stat.mode, Some(0o755));

    let _ = conn.exec(&cancel, &format!("rm -rf {base}")).await;
    conn.close().await.unwrap();
}

#[tokio::test]
async fn cancellation_interrupts_and_session_survives() {
    let Some(target) = SshTarget::from_env() else {
        return;
    };
    let conn = dial(&target).await;

    let cancel = CancellationToken::new();
    let timer = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        timer.cancel();
    });

    let started = Instant::now();
    let err = conn.exec(&cancel, "sleep 30").await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(matches!(err, XmError::Cancelled { .. }));

    // the connection itself is still usable
    let out = conn
        .exec(&CancellationToken::new(), "echo survived")
        .await
        .unwrap();
    assert!(out.stdout.contains("survived"));
    conn.close().await.unwrap();
}

#[tokio::test]
async fn close_is_idempotent_and_final() {
    let Some(target) = SshTarget::from_env() else {
        return;
    };
    let conn = dial(&target).await;
    conn.close().await.unwrap();
    conn.close().await.unwrap();

    let err = conn
        .exec(&CancellationToken::new(), "echo nope")
        .await
        .unwrap_err();
    assert!(matches!(err, XmError::ConnectionClosed));
}

#[tokio::test]
async fn connector_cache_deduplicates_concurrent_gets() {
    let Some(target) = SshTarget::from_env() else {
        return;
    };
    let cache = std::sync::Arc::new(ConnectorCache::new(
        SudoPolicy::default(),
        CancellationToken::new(),
    ));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let cache = std::sync::Arc::clone(&cache);
        let host = target.host.clone();
        handles.push(tokio::spawn(async move { cache.get(&host).await.unwrap() }));
    }
    let mut connections = Vec::new();
    for handle in handles {
        connections.push(handle.await.unwrap());
    }
    // all callers got the same retained connection
    for conn in &connections[1..] {
        assert!(std::sync::Arc::ptr_eq(&connections[0], conn));
    }
    assert_eq!(cache.len().await, 1);
    cache.close_all().await;
    assert!(cache.is_empty().await);
}
