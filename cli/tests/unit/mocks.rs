//! Shared mock infrastructure for unit tests.
//!
//! Provides a scripted [`RemoteConnector`], a channel-fed [`EventSource`]
//! and canned runner, probe and filesystem ports so each test file doesn't
//! have to re-define the same boilerplate.

#![allow(clippy::expect_used, dead_code)]

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use tether_cli::application::ports::{
    CommandRunner, EventSource, LocalFs, NetworkProbe, ProgressReporter, RemoteConnector,
    RemoteOutput, SourceSignal,
};
use tether_cli::domain::{RemoteError, RemoteTarget, WatchError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::helpers::{err_output, exit_status, ok_output};

// ── Mock: scripted remote connector ──────────────────────────────────────────

/// What the next `exec` or `push` call returns.
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    Exit(i32),
    Dropped,
    TimedOut,
}

#[derive(Debug)]
pub struct FakeSession {
    pub id: usize,
}

/// Connector whose replies are queued up front. Unscripted calls exit 0.
#[derive(Default)]
pub struct FakeConnector {
    replies: Mutex<VecDeque<Reply>>,
    failing_connects: AtomicUsize,
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    dead: Mutex<HashSet<usize>>,
    delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
    pub commands: Mutex<Vec<String>>,
    pub pushes: Mutex<Vec<(PathBuf, String)>>,
    pub front_matter: Mutex<Vec<Option<String>>>,
    healthy: AtomicBool,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn with_replies(replies: impl IntoIterator<Item = Reply>) -> Self {
        let connector = Self::new();
        connector.replies.lock().expect("lock").extend(replies);
        connector
    }

    /// Fail the next `n` connect attempts.
    pub fn failing_connects(self, n: usize) -> Self {
        self.failing_connects.store(n, Ordering::SeqCst);
        self
    }

    /// Hold every `exec` and `push` for `delay`.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().expect("lock") = delay;
        self
    }

    /// Make health checks fail for every session.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().expect("lock").clone()
    }

    pub fn pushes(&self) -> Vec<(PathBuf, String)> {
        self.pushes.lock().expect("lock").clone()
    }

    /// Front matter sent with each push, in call order.
    pub fn front_matters(&self) -> Vec<Option<String>> {
        self.front_matter.lock().expect("lock").clone()
    }

    async fn reply(&self, target: &str) -> Result<RemoteOutput, RemoteError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.delay.lock().expect("lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let reply = self
            .replies
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or(Reply::Exit(0));
        match reply {
            Reply::Exit(code) => Ok(RemoteOutput {
                exit_code: code,
                stdout: String::new(),
                stderr: if code == 0 {
                    String::new()
                } else {
                    "remote said no\n".to_string()
                },
            }),
            Reply::Dropped => Err(RemoteError::Disconnected {
                target: target.to_string(),
                message: "broken pipe".to_string(),
            }),
            Reply::TimedOut => Err(RemoteError::Timeout {
                target: target.to_string(),
                seconds: 1,
            }),
        }
    }
}

impl RemoteConnector for FakeConnector {
    type Session = FakeSession;

    async fn connect(&self, target: &RemoteTarget) -> Result<FakeSession, RemoteError> {
        let failing = self.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_connects.store(failing - 1, Ordering::SeqCst);
            return Err(RemoteError::Connect {
                target: target.key().to_string(),
                message: "connection refused".to_string(),
            });
        }
        let id = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(FakeSession { id })
    }

    async fn exec(&self, session: &FakeSession, command: &str) -> Result<RemoteOutput, RemoteError> {
        self.commands.lock().expect("lock").push(command.to_string());
        let result = self.reply("fake").await;
        if matches!(result, Err(RemoteError::Disconnected { .. })) {
            self.dead.lock().expect("lock").insert(session.id);
        }
        result
    }

    async fn push(
        &self,
        _session: &FakeSession,
        local: &Path,
        front_matter: Option<&str>,
        remote_path: &str,
    ) -> Result<RemoteOutput, RemoteError> {
        self.pushes
            .lock()
            .expect("lock")
            .push((local.to_path_buf(), remote_path.to_string()));
        self.front_matter
            .lock()
            .expect("lock")
            .push(front_matter.map(str::to_string));
        self.reply("fake").await
    }

    async fn check(&self, session: &FakeSession) -> bool {
        self.healthy.load(Ordering::SeqCst) && !self.dead.lock().expect("lock").contains(&session.id)
    }

    async fn close(&self, _session: &FakeSession) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Mock: channel-fed event source ───────────────────────────────────────────

/// Forwards signals pushed by the test; ends when the test drops its sender.
pub struct ChannelSource {
    rx: mpsc::UnboundedReceiver<SourceSignal>,
    failure: Option<WatchError>,
}

impl ChannelSource {
    pub fn new() -> (mpsc::UnboundedSender<SourceSignal>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx, failure: None })
    }

    /// Fail with `error` once the test's sender is dropped.
    pub fn failing_with(mut self, error: WatchError) -> Self {
        self.failure = Some(error);
        self
    }
}

impl EventSource for ChannelSource {
    async fn run(
        mut self,
        tx: mpsc::Sender<SourceSignal>,
        cancel: CancellationToken,
    ) -> Result<(), WatchError> {
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                signal = self.rx.recv() => {
                    let Some(signal) = signal else { break };
                    if tx.send(signal).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
        match self.failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

// ── Mock: command runner ─────────────────────────────────────────────────────

/// Answers every call with the same exit code.
pub struct StubRunner {
    pub code: i32,
}

impl StubRunner {
    fn output(&self) -> Output {
        if self.code == 0 {
            ok_output(b"OpenSSH_9.6p1")
        } else {
            err_output(self.code, b"not found")
        }
    }
}

impl CommandRunner for StubRunner {
    async fn run(&self, _: &str, _: &[&str]) -> Result<Output> {
        if self.code == 127 {
            anyhow::bail!("No such file or directory");
        }
        Ok(self.output())
    }

    async fn run_with_timeout(&self, program: &str, args: &[&str], _: Duration) -> Result<Output> {
        self.run(program, args).await
    }

    async fn run_with_stdin(
        &self,
        program: &str,
        args: &[&str],
        _: &[u8],
        _: Duration,
    ) -> Result<Output> {
        self.run(program, args).await
    }

    async fn run_status(&self, _: &str, _: &[&str], _: Duration) -> Result<ExitStatus> {
        Ok(exit_status(self.code))
    }
}

// ── Mock: network probe ──────────────────────────────────────────────────────

pub struct StubProbe {
    pub dns: bool,
    pub tcp: bool,
}

impl NetworkProbe for StubProbe {
    async fn check_tcp_connectivity(&self, _: &str, _: u16, _: Duration) -> Result<bool> {
        Ok(self.tcp)
    }

    async fn check_dns_resolution(&self, _: &str) -> Result<bool> {
        Ok(self.dns)
    }
}

// ── Mock: filesystem ─────────────────────────────────────────────────────────

/// Paths in `dirs` are directories, paths in `files` are files.
#[derive(Default)]
pub struct FakeFs {
    pub dirs: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
}

impl FakeFs {
    pub fn with_dirs(dirs: &[&str]) -> Self {
        Self {
            dirs: dirs.iter().map(PathBuf::from).collect(),
            files: Vec::new(),
        }
    }

    pub fn file(mut self, path: &str) -> Self {
        self.files.push(PathBuf::from(path));
        self
    }
}

impl LocalFs for FakeFs {
    fn exists(&self, path: &Path) -> bool {
        self.is_dir(path) || self.files.iter().any(|f| f == path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.dirs.iter().any(|d| d == path)
    }
}

// ── Mock: no-op progress reporter ────────────────────────────────────────────

pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn step(&self, _: &str) {}
    fn success(&self, _: &str) {}
    fn warn(&self, _: &str) {}
}
