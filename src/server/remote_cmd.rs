use crate::error::{GatewayError, GatewayResult};
use crate::server::model::{ExecOutput, SshConnectConfig};
use async_trait::async_trait;
use shell_escape::escape;
use std::borrow::Cow;
use std::sync::Arc;

/// Executes one shell command on the remote host and collects its output.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn exec(&self, command: &str) -> GatewayResult<ExecOutput>;

    /// Runs `command` with `input` written to its stdin. Secrets travel this
    /// way so they never appear in a command line.
    async fn exec_with_input(&self, command: &str, _input: &str) -> GatewayResult<ExecOutput> {
        Err(GatewayError::Internal(anyhow::anyhow!(
            "This shell cannot feed stdin to `{}`",
            command
        )))
    }

    async fn close(&self);

    fn is_closed(&self) -> bool {
        false
    }
}

/// Opens authenticated remote shells.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &SshConnectConfig) -> GatewayResult<Arc<dyn RemoteShell>>;
}

pub trait RemoteCommand {
    type Output;

    fn to_shell_string(&self) -> String;

    fn build_shell_string(&self, use_sudo: bool) -> String {
        with_sudo(&self.to_shell_string(), use_sudo)
    }

    fn parse_output(&self, output: &str) -> GatewayResult<Self::Output>;
}

pub fn with_sudo(command: &str, use_sudo: bool) -> String {
    if use_sudo {
        format!("sudo -n sh -c {}", quote(command))
    } else {
        command.to_string()
    }
}

/// Quotes a single argument for a POSIX shell.
pub fn quote(arg: &str) -> String {
    escape(Cow::from(arg)).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(String);

    impl RemoteCommand for Echo {
        type Output = String;

        fn to_shell_string(&self) -> String {
            format!("echo {}", quote(&self.0))
        }

        fn parse_output(&self, output: &str) -> GatewayResult<String> {
            Ok(output.trim().to_string())
        }
    }

    #[test]
    fn sudo_wraps_the_whole_pipeline() {
        let cmd = Echo("it's".into());
        assert_eq!(cmd.build_shell_string(false), "echo 'it'\\''s'");
        assert_eq!(
            cmd.build_shell_string(true),
            format!("sudo -n sh -c {}", quote("echo 'it'\\''s'"))
        );
    }

    #[test]
    fn plain_words_are_left_unquoted() {
        assert_eq!(quote("nginx"), "nginx");
        assert_eq!(quote("a b"), "'a b'");
    }
}
