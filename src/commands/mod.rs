//! Named commands invoked by the UI with flat JSON parameters.

mod cron;
mod docker;
mod firewall;
mod nginx;
mod profiles;
mod services;
mod settings;
mod system;
mod users;

use crate::error::{CommandResult, GatewayError, GatewayResult};
use crate::server::Session;
use crate::state::AppState;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Routes a command name to its handler.
#[derive(Clone)]
pub struct Dispatcher {
    state: Arc<AppState>,
}

impl Dispatcher {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn dispatch(&self, command: &str, params: Value) -> CommandResult<Value> {
        debug!("Dispatching {}", command);
        let params = Params::from_value(params)?;
        let state = self.state.as_ref();

        let result = match command {
            "get_server_profiles" => profiles::get_server_profiles(state).await,
            "save_server_profile" => profiles::save_server_profile(state, &params).await,
            "delete_server_profile" => profiles::delete_server_profile(state, &params).await,
            "set_connect_on_startup" => profiles::set_connect_on_startup(state, &params).await,
            "connect_to_server" => profiles::connect_to_server(state, &params).await,
            "connect_saved_server" => profiles::connect_saved_server(state, &params).await,
            "test_connection" => profiles::test_connection(state, &params).await,
            "disconnect_server" => profiles::disconnect_server(state).await,
            "get_connection_status" => profiles::get_connection_status(state),

            "get_settings" => settings::get_settings(state),
            "save_settings" => settings::save_settings(state, &params).await,

            "get_system_metrics" => system::get_system_metrics(state, &params).await,
            "get_cpu_cores" => system::get_cpu_cores(state).await,
            "start_view_polling" => system::start_view_polling(state, &params).await,
            "stop_view_polling" => system::stop_view_polling(state, &params),
            "get_cached_resource" => system::get_cached_resource(state, &params).await,
            "get_security_info" => system::get_security_info(state).await,
            "get_system_logs" => system::get_system_logs(state, &params).await,
            "get_infrastructure_graph" => system::get_infrastructure_graph(state).await,

            "get_docker_containers" => docker::get_docker_containers(state).await,
            "get_container_details" => docker::get_container_details(state, &params).await,
            "docker_container_action" => docker::docker_container_action(state, &params).await,
            "get_container_logs" => docker::get_container_logs(state, &params).await,
            "get_docker_images" => docker::get_docker_images(state).await,
            "get_docker_volumes" => docker::get_docker_volumes(state).await,
            "get_docker_networks" => docker::get_docker_networks(state).await,
            "get_compose_projects" => docker::get_compose_projects(state).await,
            "rescan_compose_projects" => docker::rescan_compose_projects(state).await,

            "get_services" => services::get_services(state).await,
            "service_action" => services::service_action(state, &params).await,
            "get_service_logs" => services::get_service_logs(state, &params).await,

            "get_nginx_status" => nginx::get_nginx_status(state).await,
            "get_nginx_vhosts" => nginx::get_nginx_vhosts(state).await,
            "get_vhost_config" => nginx::get_vhost_config(state, &params).await,
            "save_vhost_config" => nginx::save_vhost_config(state, &params).await,
            "create_vhost" => nginx::create_vhost(state, &params).await,
            "delete_vhost" => nginx::delete_vhost(state, &params).await,
            "toggle_vhost" => nginx::toggle_vhost(state, &params).await,
            "nginx_test_config" => nginx::nginx_test_config(state).await,
            "nginx_reload" => nginx::nginx_reload(state).await,

            "get_ufw_overview" => firewall::get_ufw_overview(state).await,
            "ufw_add_rule" => firewall::ufw_add_rule(state, &params).await,
            "ufw_delete_rule" => firewall::ufw_delete_rule(state, &params).await,
            "ufw_allow_listening_port" => firewall::ufw_allow_listening_port(state, &params).await,
            "ufw_set_enabled" => firewall::ufw_set_enabled(state, &params).await,

            "get_cron_overview" => cron::get_cron_overview(state).await,
            "save_user_crontab" => cron::save_user_crontab(state, &params).await,
            "toggle_cron_line" => cron::toggle_cron_line(state, &params).await,
            "delete_cron_line" => cron::delete_cron_line(state, &params).await,

            "get_system_users" => users::get_system_users(state).await,
            "get_system_groups" => users::get_system_groups(state).await,
            "get_user_detail" => users::get_user_detail(state, &params).await,
            "create_user" => users::create_user(state, &params).await,
            "modify_user" => users::modify_user(state, &params).await,
            "delete_user" => users::delete_user(state, &params).await,
            "lock_user" => users::set_user_locked(state, &params, true).await,
            "unlock_user" => users::set_user_locked(state, &params, false).await,

            other => Err(GatewayError::InvalidParams(format!("Unknown command: {}", other))),
        };

        if let Err(e) = &result {
            warn!("Command {} failed: {}", command, e);
        }
        Ok(result?)
    }
}

/// The flat parameter object of one command.
pub(crate) struct Params(Map<String, Value>);

impl Params {
    fn from_value(value: Value) -> GatewayResult<Self> {
        match value {
            Value::Null => Ok(Self(Map::new())),
            Value::Object(map) => Ok(Self(map)),
            other => Err(GatewayError::InvalidParams(format!(
                "Parameters must be an object, got {}",
                other
            ))),
        }
    }

    pub(crate) fn required<T: DeserializeOwned>(&self, key: &str) -> GatewayResult<T> {
        self.optional(key)?
            .ok_or_else(|| GatewayError::InvalidParams(format!("Missing parameter: {}", key)))
    }

    /// Absent and `null` both read as `None`.
    pub(crate) fn optional<T: DeserializeOwned>(&self, key: &str) -> GatewayResult<Option<T>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| GatewayError::InvalidParams(format!("{}: {}", key, e))),
        }
    }

    pub(crate) fn flag(&self, key: &str) -> GatewayResult<bool> {
        Ok(self.optional(key)?.unwrap_or(false))
    }

    /// The whole object as one request struct.
    pub(crate) fn parse<T: DeserializeOwned>(&self) -> GatewayResult<T> {
        Ok(serde_json::from_value(Value::Object(self.0.clone()))?)
    }

    /// Destructive commands need an explicit `confirm: true`.
    pub(crate) fn require_confirm(&self, action: &str) -> GatewayResult<()> {
        if self.flag("confirm")? {
            Ok(())
        } else {
            Err(GatewayError::ValidationFailed(format!(
                "{} requires confirm: true",
                action
            )))
        }
    }
}

pub(crate) fn reply<T: Serialize>(value: T) -> GatewayResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| GatewayError::Internal(anyhow::anyhow!("Failed to serialize result: {}", e)))
}

pub(crate) async fn session(state: &AppState) -> GatewayResult<Arc<Session>> {
    state.connections.session().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LoadState;
    use crate::error::CommandError;
    use crate::server::testing::{ScriptedConnector, ScriptedShell};
    use serde_json::json;

    struct Harness {
        dispatcher: Dispatcher,
        shell: Arc<ScriptedShell>,
        _dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let shell = Arc::new(ScriptedShell::new());
        let connector = Arc::new(ScriptedConnector::new(shell.clone()));
        let state = AppState::with_connector(dir.path(), connector).await.unwrap();
        Harness {
            dispatcher: Dispatcher::new(Arc::new(state)),
            shell,
            _dir: dir,
        }
    }

    fn profile() -> Value {
        json!({
            "name": "VPS1",
            "host": "10.0.0.5",
            "port": 22,
            "username": "root",
            "auth_method": {"type": "PrivateKey", "key_path": "~/.ssh/id_ed25519", "passphrase": null}
        })
    }

    async fn connected() -> Harness {
        let h = harness().await;
        let result = h
            .dispatcher
            .dispatch("connect_to_server", json!({ "profile": profile() }))
            .await
            .unwrap();
        assert_eq!(result["success"], true);
        h
    }

    fn kind(err: CommandError) -> &'static str {
        err.inner().kind()
    }

    #[tokio::test]
    async fn unknown_command_is_invalid_params() {
        let h = harness().await;
        let err = h.dispatcher.dispatch("format_disk", Value::Null).await.unwrap_err();
        assert_eq!(kind(err), "InvalidParams");
    }

    #[tokio::test]
    async fn remote_commands_need_a_connection() {
        let h = harness().await;
        for command in ["get_docker_containers", "get_ufw_overview", "get_system_metrics"] {
            let err = h.dispatcher.dispatch(command, json!({})).await.unwrap_err();
            assert_eq!(kind(err), "NotConnected", "{}", command);
        }
        assert!(h.shell.executed().is_empty());
    }

    #[tokio::test]
    async fn saved_profile_connects_and_reports_status() {
        let h = harness().await;
        let saved = h
            .dispatcher
            .dispatch("save_server_profile", profile())
            .await
            .unwrap();
        let id = saved["id"].as_str().unwrap().to_string();

        let result = h
            .dispatcher
            .dispatch("connect_saved_server", json!({ "id": id }))
            .await
            .unwrap();
        assert_eq!(result["success"], true);

        let status = h
            .dispatcher
            .dispatch("get_connection_status", Value::Null)
            .await
            .unwrap();
        assert_eq!(status["state"], "connected");
        assert_eq!(status["profile_name"], "VPS1");
    }

    #[tokio::test]
    async fn unknown_auth_type_is_rejected() {
        let h = harness().await;
        let mut bad = profile();
        bad["auth_method"] = json!({"type": "Kerberos"});
        let err = h
            .dispatcher
            .dispatch("save_server_profile", bad)
            .await
            .unwrap_err();
        assert_eq!(kind(err), "InvalidAuthMethod");
    }

    #[tokio::test]
    async fn unconfirmed_rule_delete_runs_nothing() {
        let h = connected().await;
        let err = h
            .dispatcher
            .dispatch("ufw_delete_rule", json!({"position": 1, "rule": "22/tcp ALLOW IN Anywhere"}))
            .await
            .unwrap_err();
        assert_eq!(kind(err), "ValidationFailed");
        assert!(h.shell.executed().is_empty());
    }

    #[tokio::test]
    async fn container_action_refreshes_cached_list() {
        let h = connected().await;
        h.shell.respond("docker stop web", "web\n");
        h.shell.respond("docker stats", "");
        h.shell.respond("docker ps", "abc|web|nginx|Exited (0)|exited|\n");

        let list = h
            .dispatcher
            .dispatch("docker_container_action", json!({"container": "web", "action": "stop"}))
            .await
            .unwrap();
        assert_eq!(list[0]["state"], "exited");

        let cached = h
            .dispatcher
            .dispatch("get_cached_resource", json!({"kind": "containers"}))
            .await
            .unwrap();
        assert_eq!(cached["state"], json!(LoadState::Loaded));
        assert_eq!(cached["data"][0]["name"], "web");
    }

    #[tokio::test]
    async fn disconnect_invalidates_cached_resources() {
        let h = connected().await;
        h.dispatcher.dispatch("disconnect_server", Value::Null).await.unwrap();
        let err = h
            .dispatcher
            .dispatch("get_cached_resource", json!({"kind": "users"}))
            .await
            .unwrap_err();
        assert_eq!(kind(err), "NotConnected");
    }

    #[tokio::test]
    async fn log_tail_length_is_clamped() {
        let h = connected().await;
        h.shell.respond("journalctl -u nginx", "line\n");
        h.dispatcher
            .dispatch("get_service_logs", json!({"name": "nginx", "lines": 999999}))
            .await
            .unwrap();
        assert_eq!(
            h.shell.executed_matching("journalctl -u nginx -n 5000").len(),
            1
        );
    }

    #[test]
    fn params_must_be_an_object() {
        assert!(Params::from_value(Value::Null).is_ok());
        assert!(matches!(
            Params::from_value(json!([1, 2])),
            Err(GatewayError::InvalidParams(_))
        ));
    }

    #[test]
    fn missing_and_malformed_params_are_invalid() {
        let params = Params::from_value(json!({"lines": "many", "name": null})).unwrap();
        assert!(matches!(
            params.required::<String>("name"),
            Err(GatewayError::InvalidParams(_))
        ));
        assert!(matches!(
            params.optional::<u32>("lines"),
            Err(GatewayError::InvalidParams(_))
        ));
        assert!(!params.flag("confirm").unwrap());
    }

    #[test]
    fn confirm_flag_gates_destructive_actions() {
        let unconfirmed = Params::from_value(json!({"username": "bob"})).unwrap();
        assert!(matches!(
            unconfirmed.require_confirm("delete_user"),
            Err(GatewayError::ValidationFailed(_))
        ));
        let confirmed = Params::from_value(json!({"username": "bob", "confirm": true})).unwrap();
        assert!(confirmed.require_confirm("delete_user").is_ok());
    }
}
