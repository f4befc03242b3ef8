//! In-memory transport used by unit tests.

use crate::database::models::{AuthMethod, ServerProfile};
use crate::error::{GatewayError, GatewayResult};
use crate::server::model::{ExecOutput, SshConnectConfig};
use crate::server::remote_cmd::{Connector, RemoteShell};
use crate::server::session::{Session, SessionOptions};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
struct Reply {
    output: ExecOutput,
    delay: Option<Duration>,
}

struct Rule {
    pattern: String,
    replies: VecDeque<Reply>,
}

/// Answers commands from a script. The first rule whose pattern is contained
/// in the command wins; a rule with several replies hands them out in order
/// and keeps repeating the last one.
#[derive(Default)]
pub struct ScriptedShell {
    rules: Mutex<Vec<Rule>>,
    executed: Mutex<Vec<String>>,
    inputs: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl ScriptedShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, pattern: &str, stdout: &str) {
        self.respond_full(pattern, stdout, "", 0);
    }

    pub fn respond_full(&self, pattern: &str, stdout: &str, stderr: &str, exit_code: u32) {
        self.push(
            pattern,
            Reply {
                output: ExecOutput {
                    stdout: stdout.to_string(),
                    stderr: stderr.to_string(),
                    exit_code,
                },
                delay: None,
            },
        );
    }

    pub fn respond_after(&self, pattern: &str, stdout: &str, delay: Duration) {
        self.push(
            pattern,
            Reply {
                output: ExecOutput {
                    stdout: stdout.to_string(),
                    ..Default::default()
                },
                delay: Some(delay),
            },
        );
    }

    fn push(&self, pattern: &str, reply: Reply) {
        let mut rules = self.rules.lock().unwrap();
        if let Some(rule) = rules.iter_mut().find(|r| r.pattern == pattern) {
            rule.replies.push_back(reply);
        } else {
            rules.push(Rule {
                pattern: pattern.to_string(),
                replies: VecDeque::from([reply]),
            });
        }
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn executed_matching(&self, pattern: &str) -> Vec<String> {
        self.executed()
            .into_iter()
            .filter(|c| c.contains(pattern))
            .collect()
    }

    /// Everything written to stdin, one entry per command.
    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn set_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn next_reply(&self, command: &str) -> Option<Reply> {
        let mut rules = self.rules.lock().unwrap();
        let rule = rules.iter_mut().find(|r| command.contains(&r.pattern))?;
        if rule.replies.len() > 1 {
            rule.replies.pop_front()
        } else {
            rule.replies.front().cloned()
        }
    }
}

#[async_trait]
impl RemoteShell for ScriptedShell {
    async fn exec(&self, command: &str) -> GatewayResult<ExecOutput> {
        self.executed.lock().unwrap().push(command.to_string());
        match self.next_reply(command) {
            Some(reply) => {
                if let Some(delay) = reply.delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(reply.output)
            }
            None => Ok(ExecOutput {
                stdout: String::new(),
                stderr: format!("unscripted command: {}", command),
                exit_code: 127,
            }),
        }
    }

    async fn exec_with_input(&self, command: &str, input: &str) -> GatewayResult<ExecOutput> {
        self.inputs.lock().unwrap().push(input.to_string());
        self.exec(command).await
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Hands out a shared scripted shell, or fails with a fixed error.
pub struct ScriptedConnector {
    pub shell: Arc<ScriptedShell>,
    failure: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
    attempts: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new(shell: Arc<ScriptedShell>) -> Self {
        Self {
            shell,
            failure: Mutex::new(None),
            delay: Mutex::new(None),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn delay_by(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _config: &SshConnectConfig) -> GatewayResult<Arc<dyn RemoteShell>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure = self.failure.lock().unwrap().clone();
        if let Some(message) = failure {
            return Err(GatewayError::AuthenticationFailed(message));
        }
        let shell: Arc<dyn RemoteShell> = self.shell.clone();
        Ok(shell)
    }
}

pub fn test_profile() -> ServerProfile {
    ServerProfile {
        id: "vps1".to_string(),
        name: "VPS1".to_string(),
        host: "10.0.0.5".to_string(),
        port: 22,
        username: "root".to_string(),
        auth_method: AuthMethod::PrivateKey {
            key_path: "~/.ssh/id_ed25519".to_string(),
            passphrase: None,
        },
    }
}

/// A connected session over a scripted shell.
pub fn scripted_session(shell: Arc<ScriptedShell>) -> Arc<Session> {
    Arc::new(Session::new(
        1,
        test_profile(),
        shell,
        Arc::new(AtomicU64::new(0)),
        SessionOptions {
            command_timeout: Duration::from_secs(5),
            use_sudo: false,
        },
    ))
}
