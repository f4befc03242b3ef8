use crate::database::models::ServerProfile;
use crate::error::{GatewayError, GatewayResult};
use crate::server::model::{Completed, ExecOutput};
use crate::server::remote_cmd::{with_sudo, RemoteCommand, RemoteShell};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub command_timeout: Duration,
    pub use_sudo: bool,
}

/// One authenticated connection to the active server.
///
/// Commands are serialized: only one remote execution runs at a time. Each
/// completed execution is stamped with a gateway-wide completion sequence
/// while the execution lock is still held, so sequence order equals the order
/// in which the remote host answered.
pub struct Session {
    epoch: u64,
    profile: ServerProfile,
    shell: Arc<dyn RemoteShell>,
    exec_lock: Mutex<()>,
    target_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    completion_seq: Arc<AtomicU64>,
    cancel: CancellationToken,
    options: SessionOptions,
}

impl Session {
    pub fn new(
        epoch: u64,
        profile: ServerProfile,
        shell: Arc<dyn RemoteShell>,
        completion_seq: Arc<AtomicU64>,
        options: SessionOptions,
    ) -> Self {
        Self {
            epoch,
            profile,
            shell,
            exec_lock: Mutex::new(()),
            target_locks: std::sync::Mutex::new(HashMap::new()),
            completion_seq,
            cancel: CancellationToken::new(),
            options,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn profile(&self) -> &ServerProfile {
        &self.profile
    }

    pub fn use_sudo(&self) -> bool {
        self.options.use_sudo
    }

    /// Token cancelled when this session is torn down.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && !self.shell.is_closed()
    }

    pub(crate) async fn shutdown(&self) {
        self.cancel.cancel();
        self.shell.close().await;
    }

    /// Runs a command exactly as given (after optional sudo wrapping).
    pub async fn exec_raw(&self, command: &str) -> GatewayResult<Completed<ExecOutput>> {
        let command = with_sudo(command, self.options.use_sudo);
        self.exec_prepared(&command, None).await
    }

    /// Like `exec_checked`, with `input` fed to the command's stdin. The input
    /// is never logged.
    pub async fn exec_checked_with_input(
        &self,
        command: &str,
        input: &str,
    ) -> GatewayResult<Completed<String>> {
        let command = with_sudo(command, self.options.use_sudo);
        check_exit(self.exec_prepared(&command, Some(input)).await?)
    }

    /// Runs a command and turns a non-zero exit into `RemoteCommandFailed`.
    pub async fn exec_checked(&self, command: &str) -> GatewayResult<Completed<String>> {
        let completed = self.exec_raw(command).await?;
        check_exit(completed)
    }

    pub async fn run<C: RemoteCommand>(&self, cmd: &C) -> GatewayResult<C::Output> {
        Ok(self.run_completed(cmd).await?.value)
    }

    pub async fn run_completed<C: RemoteCommand>(
        &self,
        cmd: &C,
    ) -> GatewayResult<Completed<C::Output>> {
        let command = cmd.build_shell_string(self.options.use_sudo);
        let completed = check_exit(self.exec_prepared(&command, None).await?)?;
        let value = cmd.parse_output(&completed.value)?;
        Ok(Completed {
            seq: completed.seq,
            value,
        })
    }

    /// Holds exclusive access to one remote target (a file or rule list) for a
    /// whole read-modify-write sequence.
    pub async fn lock_target(&self, target: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .target_locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks
                .entry(target.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    async fn exec_prepared(
        &self,
        command: &str,
        input: Option<&str>,
    ) -> GatewayResult<Completed<ExecOutput>> {
        if self.cancel.is_cancelled() {
            return Err(GatewayError::NotConnected);
        }

        let guard = tokio::select! {
            _ = self.cancel.cancelled() => return Err(GatewayError::NotConnected),
            guard = self.exec_lock.lock() => guard,
        };

        debug!(
            "exec [{}]: {}{}",
            self.profile.name,
            command,
            if input.is_some() { " <stdin>" } else { "" }
        );
        let limit = self.options.command_timeout;
        let exec = async {
            match input {
                Some(input) => self.shell.exec_with_input(command, input).await,
                None => self.shell.exec(command).await,
            }
        };
        let output = tokio::select! {
            _ = self.cancel.cancelled() => return Err(GatewayError::NotConnected),
            res = timeout(limit, exec) => match res {
                Ok(output) => output?,
                Err(_) => {
                    warn!("Command timed out after {:?}: {}", limit, command);
                    return Err(GatewayError::Timeout(format!(
                        "command did not finish within {}s",
                        limit.as_secs()
                    )));
                }
            },
        };
        let seq = self.completion_seq.fetch_add(1, Ordering::SeqCst) + 1;
        drop(guard);

        // A disconnect that raced with this command wins; its output is discarded.
        if self.cancel.is_cancelled() {
            return Err(GatewayError::NotConnected);
        }

        Ok(Completed { seq, value: output })
    }
}

fn check_exit(completed: Completed<ExecOutput>) -> GatewayResult<Completed<String>> {
    if !completed.value.success() {
        return Err(GatewayError::RemoteCommandFailed {
            code: completed.value.exit_code,
            stderr: completed.value.error_text(),
        });
    }
    Ok(completed.map(|output| output.stdout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::testing::{test_profile, ScriptedShell};

    fn session(shell: Arc<ScriptedShell>, timeout_ms: u64) -> Session {
        Session::new(
            1,
            test_profile(),
            shell,
            Arc::new(AtomicU64::new(0)),
            SessionOptions {
                command_timeout: Duration::from_millis(timeout_ms),
                use_sudo: false,
            },
        )
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported_with_stderr() {
        let shell = Arc::new(ScriptedShell::new());
        shell.respond_full("false", "", "boom", 2);
        let session = session(shell, 1_000);

        let err = session.exec_checked("false").await.unwrap_err();
        match err {
            GatewayError::RemoteCommandFailed { code, stderr } => {
                assert_eq!(code, 2);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn completion_sequence_increases() {
        let shell = Arc::new(ScriptedShell::new());
        shell.respond("echo a", "a\n");
        shell.respond("echo b", "b\n");
        let session = session(shell, 1_000);

        let a = session.exec_checked("echo a").await.unwrap();
        let b = session.exec_checked("echo b").await.unwrap();
        assert!(b.seq > a.seq);
        assert_eq!(a.value, "a\n");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_command_times_out() {
        let shell = Arc::new(ScriptedShell::new());
        shell.respond_after("sleep 60", "", Duration::from_secs(60));
        let session = session(shell, 500);

        let err = session.exec_raw("sleep 60").await.unwrap_err();
        assert!(matches!(err, GatewayError::Timeout(_)));
    }

    #[tokio::test]
    async fn cancelled_session_refuses_commands() {
        let shell = Arc::new(ScriptedShell::new());
        shell.respond("uptime", "up\n");
        let session = session(shell.clone(), 1_000);
        session.shutdown().await;

        assert!(matches!(
            session.exec_raw("uptime").await,
            Err(GatewayError::NotConnected)
        ));
        assert!(shell.executed().is_empty());
    }

    #[tokio::test]
    async fn stdin_input_stays_out_of_the_command_line() {
        let shell = Arc::new(ScriptedShell::new());
        shell.respond("chpasswd", "");
        let session = session(shell.clone(), 1_000);

        session
            .exec_checked_with_input("chpasswd", "deploy:hunter2\n")
            .await
            .unwrap();
        assert_eq!(shell.executed(), vec!["chpasswd"]);
        assert_eq!(shell.inputs(), vec!["deploy:hunter2\n"]);
    }

    #[tokio::test]
    async fn sudo_option_wraps_commands() {
        let shell = Arc::new(ScriptedShell::new());
        shell.respond("sudo -n sh -c 'cat /etc/shadow'", "root:!:1::::::\n");
        let session = Session::new(
            1,
            test_profile(),
            shell.clone(),
            Arc::new(AtomicU64::new(0)),
            SessionOptions {
                command_timeout: Duration::from_secs(1),
                use_sudo: true,
            },
        );

        session.exec_checked("cat /etc/shadow").await.unwrap();
        assert_eq!(shell.executed(), vec!["sudo -n sh -c 'cat /etc/shadow'"]);
    }
}
