//! OpenSSH implementation of the `RemoteConnector` port.
//!
//! Each session is an OpenSSH ControlMaster: `connect` starts a backgrounded
//! master on a private control socket, and every command or upload is a
//! short-lived `ssh -S <socket>` client multiplexed over it. Credentials are
//! passed to ssh as arguments and never logged.

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use tracing::debug;

use crate::application::ports::{CommandRunner, NetworkProbe, RemoteConnector, RemoteOutput};
use crate::domain::{RemoteError, RemoteTarget};
use crate::infra::command_runner::CommandTimeout;

/// ssh's own exit code for connection-level failures.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Upper bound for `-O check` / `-O exit` control commands.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeouts used by [`OpenSshConnector`].
#[derive(Debug, Clone, Copy)]
pub struct SshTimeouts {
    pub connect: Duration,
    pub command: Duration,
    pub preflight: Duration,
}

/// A live ControlMaster.
#[derive(Debug)]
pub struct OpenSshSession {
    target: RemoteTarget,
    control_path: PathBuf,
}

impl OpenSshSession {
    #[must_use]
    pub fn control_path(&self) -> &Path {
        &self.control_path
    }
}

/// Drives the system `ssh` binary through a [`CommandRunner`].
pub struct OpenSshConnector<R, P> {
    runner: R,
    probe: P,
    control_dir: PathBuf,
    timeouts: SshTimeouts,
    next_socket: AtomicU64,
}

impl<R: CommandRunner, P: NetworkProbe> OpenSshConnector<R, P> {
    #[must_use]
    pub fn new(runner: R, probe: P, control_dir: PathBuf, timeouts: SshTimeouts) -> Self {
        Self {
            runner,
            probe,
            control_dir,
            timeouts,
            next_socket: AtomicU64::new(1),
        }
    }

    fn next_control_path(&self) -> PathBuf {
        // Unix socket paths are short; keep the file name compact.
        let n = self.next_socket.fetch_add(1, Ordering::SeqCst);
        self.control_dir
            .join(format!("{}-{n}.sock", std::process::id()))
    }

    fn master_args(&self, target: &RemoteTarget, control_path: &Path) -> Vec<String> {
        let mut args = vec![
            "-M".to_string(),
            "-S".to_string(),
            control_path.to_string_lossy().into_owned(),
            "-o".to_string(),
            "ControlPersist=yes".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.timeouts.connect.as_secs().max(1)),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
            "-p".to_string(),
            target.port.to_string(),
        ];
        if let Some(identity) = target.auth_ref.identity_file() {
            args.push("-i".to_string());
            args.push(identity.to_string_lossy().into_owned());
            args.push("-o".to_string());
            args.push("IdentitiesOnly=yes".to_string());
        }
        args.extend(["-f".to_string(), "-N".to_string(), target.destination()]);
        args
    }

    fn client_args(session: &OpenSshSession, remote_command: &str) -> Vec<String> {
        vec![
            "-S".to_string(),
            session.control_path.to_string_lossy().into_owned(),
            "-o".to_string(),
            "ControlMaster=no".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-p".to_string(),
            session.target.port.to_string(),
            session.target.destination(),
            "--".to_string(),
            remote_command.to_string(),
        ]
    }

    fn control_args<'a>(session: &'a OpenSshSession, op: &'a str) -> Vec<Cow<'a, str>> {
        vec![
            Cow::Borrowed("-S"),
            session.control_path.to_string_lossy(),
            Cow::Borrowed("-O"),
            Cow::Borrowed(op),
            Cow::Owned(session.target.destination()),
        ]
    }

    fn map_run_error(target: &RemoteTarget, err: &anyhow::Error) -> RemoteError {
        match err.downcast_ref::<CommandTimeout>() {
            Some(timeout) => RemoteError::Timeout {
                target: target.key().to_string(),
                seconds: timeout.timeout.as_secs(),
            },
            None => RemoteError::Spawn {
                program: "ssh".to_string(),
                message: format!("{err:#}"),
            },
        }
    }

    fn into_remote_output(
        target: &RemoteTarget,
        output: &std::process::Output,
    ) -> Result<RemoteOutput, RemoteError> {
        let exit_code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if exit_code == SSH_CONNECTION_FAILURE {
            let message = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("connection lost")
                .trim()
                .to_string();
            return Err(RemoteError::Disconnected {
                target: target.key().to_string(),
                message,
            });
        }
        Ok(RemoteOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
        })
    }

    async fn run_client(
        &self,
        session: &OpenSshSession,
        remote_command: &str,
        stdin: Option<&[u8]>,
    ) -> Result<RemoteOutput, RemoteError> {
        let owned = Self::client_args(session, remote_command);
        let args: Vec<&str> = owned.iter().map(String::as_str).collect();
        let result = match stdin {
            Some(input) => {
                self.runner
                    .run_with_stdin("ssh", &args, input, self.timeouts.command)
                    .await
            }
            None => {
                self.runner
                    .run_with_timeout("ssh", &args, self.timeouts.command)
                    .await
            }
        };
        match result {
            Ok(output) => Self::into_remote_output(&session.target, &output),
            Err(e) => Err(Self::map_run_error(&session.target, &e)),
        }
    }
}

/// `mkdir -p <dir> && cat > <tmp> && mv -f <tmp> <path>`, every path quoted.
#[must_use]
pub fn upload_script(remote_path: &str) -> String {
    let quote = |s: &str| shell_escape::unix::escape(Cow::Borrowed(s)).into_owned();
    let tmp = format!("{remote_path}.tether-part");
    let mut script = String::new();
    if let Some((dir, _)) = remote_path.rsplit_once('/') {
        if !dir.is_empty() {
            script.push_str(&format!("mkdir -p {} && ", quote(dir)));
        }
    }
    script.push_str(&format!(
        "cat > {tmp} && mv -f {tmp} {path}",
        tmp = quote(&tmp),
        path = quote(remote_path)
    ));
    script
}

fn ensure_private_dir(dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("cannot set permissions on {}", dir.display()))?;
    }
    Ok(())
}

impl<R, P> RemoteConnector for OpenSshConnector<R, P>
where
    R: CommandRunner + 'static,
    P: NetworkProbe + 'static,
{
    type Session = OpenSshSession;

    async fn connect(&self, target: &RemoteTarget) -> Result<OpenSshSession, RemoteError> {
        let key = target.key().to_string();
        let reachable = self
            .probe
            .check_tcp_connectivity(&target.host, target.port, self.timeouts.preflight)
            .await
            .unwrap_or(false);
        if !reachable {
            return Err(RemoteError::Connect {
                target: key,
                message: format!("{}:{} is unreachable", target.host, target.port),
            });
        }
        if let Some(identity) = target.auth_ref.identity_file() {
            if !identity.exists() {
                return Err(RemoteError::Connect {
                    target: key,
                    message: "identity file is missing".to_string(),
                });
            }
        }
        ensure_private_dir(&self.control_dir).map_err(|e| RemoteError::Spawn {
            program: "ssh".to_string(),
            message: format!("{e:#}"),
        })?;

        let control_path = self.next_control_path();
        let owned = self.master_args(target, &control_path);
        let args: Vec<&str> = owned.iter().map(String::as_str).collect();
        debug!(remote = %key, "starting ssh control master");

        let status = self
            .runner
            .run_status("ssh", &args, self.timeouts.connect + Duration::from_secs(5))
            .await
            .map_err(|e| Self::map_run_error(target, &e))?;
        if !status.success() {
            return Err(RemoteError::Connect {
                target: key,
                message: match status.code() {
                    Some(code) => format!("ssh exited with status {code}"),
                    None => "ssh terminated by signal".to_string(),
                },
            });
        }
        Ok(OpenSshSession {
            target: target.clone(),
            control_path,
        })
    }

    async fn exec(
        &self,
        session: &OpenSshSession,
        command: &str,
    ) -> Result<RemoteOutput, RemoteError> {
        self.run_client(session, command, None).await
    }

    async fn push(
        &self,
        session: &OpenSshSession,
        local: &Path,
        front_matter: Option<&str>,
        remote_path: &str,
    ) -> Result<RemoteOutput, RemoteError> {
        let body = tokio::fs::read(local)
            .await
            .map_err(|e| RemoteError::LocalFile {
                path: local.to_path_buf(),
                message: e.to_string(),
            })?;
        let bytes = match front_matter {
            Some(header) => [header.as_bytes(), body.as_slice()].concat(),
            None => body,
        };
        debug!(remote = %session.target.key(), bytes = bytes.len(), "uploading file");
        self.run_client(session, &upload_script(remote_path), Some(&bytes))
            .await
    }

    async fn check(&self, session: &OpenSshSession) -> bool {
        let args = Self::control_args(session, "check");
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        self.runner
            .run_with_timeout("ssh", &args, CONTROL_TIMEOUT)
            .await
            .is_ok_and(|out| out.status.success())
    }

    async fn close(&self, session: &OpenSshSession) {
        let args = Self::control_args(session, "exit");
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        if let Err(e) = self
            .runner
            .run_with_timeout("ssh", &args, CONTROL_TIMEOUT)
            .await
        {
            debug!(remote = %session.target.key(), error = %e, "ssh control exit failed");
        }
    }
}
