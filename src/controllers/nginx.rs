use crate::controllers::{not_found_on, validate_name};
use crate::error::{GatewayError, GatewayResult};
use crate::server::model::Completed;
use crate::server::remote_cmd::{quote, RemoteCommand};
use crate::server::session::Session;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

pub const SITES_AVAILABLE: &str = "/etc/nginx/sites-available";
pub const SITES_ENABLED: &str = "/etc/nginx/sites-enabled";

/// All nginx mutations share one lock: a config test covers every enabled file.
const LOCK_TARGET: &str = "nginx";

const VHOST_MARKER: &str = "@@vhost ";
const ENABLED_MARKER: &str = "@@enabled";
const SECTION_MARKER: &str = "@@section";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigTest {
    pub success: bool,
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NginxStatus {
    pub running: bool,
    pub version: String,
    pub worker_processes: String,
    pub config_test: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NginxVhost {
    pub name: String,
    pub enabled: bool,
    pub server_name: String,
    pub listen_port: String,
    pub ssl_enabled: bool,
    pub root_path: String,
    pub proxy_pass: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CreateVhostRequest {
    pub name: String,
    pub server_name: Option<String>,
    pub listen_port: Option<u16>,
    pub root_path: Option<String>,
    pub proxy_pass: Option<String>,
    pub content: Option<String>,
}

fn available_path(name: &str) -> String {
    format!("{}/{}", SITES_AVAILABLE, name)
}

fn enabled_path(name: &str) -> String {
    format!("{}/{}", SITES_ENABLED, name)
}

fn backup_path(name: &str) -> String {
    format!("{}/.{}.bak", SITES_AVAILABLE, name)
}

/// Value of the first uncommented `directive` line, without the trailing `;`.
fn directive<'a>(content: &'a str, name: &str) -> Option<&'a str> {
    content.lines().map(str::trim).find_map(|line| {
        if line.starts_with('#') {
            return None;
        }
        let rest = line.strip_prefix(name)?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        Some(rest.trim().trim_end_matches(';').trim())
    })
}

pub fn parse_vhost(name: &str, content: &str, enabled: bool) -> NginxVhost {
    let listen = directive(content, "listen");
    NginxVhost {
        name: name.to_string(),
        enabled,
        server_name: directive(content, "server_name")
            .and_then(|v| v.split_whitespace().next())
            .unwrap_or(name)
            .to_string(),
        listen_port: listen
            .and_then(|v| v.split_whitespace().next())
            .map(|addr| addr.rsplit(':').next().unwrap_or(addr).to_string())
            .unwrap_or_else(|| "80".to_string()),
        ssl_enabled: content.contains("ssl_certificate")
            || listen.is_some_and(|v| v.split_whitespace().any(|t| t == "ssl")),
        root_path: directive(content, "root").unwrap_or_default().to_string(),
        proxy_pass: directive(content, "proxy_pass").map(String::from),
    }
}

pub struct NginxStatusCmd;

impl RemoteCommand for NginxStatusCmd {
    type Output = (bool, String, String);

    fn to_shell_string(&self) -> String {
        format!(
            "systemctl is-active nginx 2>/dev/null; echo {m}; nginx -v 2>&1; echo {m}; \
             grep -m1 -E '^\\s*worker_processes' /etc/nginx/nginx.conf 2>/dev/null; true",
            m = SECTION_MARKER
        )
    }

    fn parse_output(&self, output: &str) -> GatewayResult<Self::Output> {
        let sections: Vec<&str> = output.split(SECTION_MARKER).map(str::trim).collect();
        let running = sections.first().is_some_and(|s| *s == "active");
        let version = sections
            .get(1)
            .and_then(|s| s.split_once('/'))
            .map(|(_, v)| v.split_whitespace().next().unwrap_or(v).to_string())
            .unwrap_or_default();
        let worker_processes = sections
            .get(2)
            .and_then(|s| directive(s, "worker_processes"))
            .unwrap_or("auto")
            .to_string();
        Ok((running, version, worker_processes))
    }
}

pub struct ListVhostsCmd;

impl RemoteCommand for ListVhostsCmd {
    type Output = Vec<NginxVhost>;

    fn to_shell_string(&self) -> String {
        format!(
            "for f in {avail}/*; do [ -f \"$f\" ] || continue; echo \"{vm}$(basename \"$f\")\"; cat \"$f\"; echo; done; \
             echo {em}; ls -1 {enabled} 2>/dev/null; true",
            avail = SITES_AVAILABLE,
            vm = VHOST_MARKER,
            em = ENABLED_MARKER,
            enabled = SITES_ENABLED
        )
    }

    fn parse_output(&self, output: &str) -> GatewayResult<Self::Output> {
        let (files, enabled) = output.split_once(ENABLED_MARKER).unwrap_or((output, ""));
        let enabled: Vec<&str> = enabled.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

        let mut vhosts = Vec::new();
        let mut current: Option<(&str, Vec<&str>)> = None;
        for line in files.lines() {
            if let Some(name) = line.strip_prefix(VHOST_MARKER) {
                if let Some((name, body)) = current.take() {
                    vhosts.push(parse_vhost(name, &body.join("\n"), enabled.contains(&name)));
                }
                current = Some((name.trim(), Vec::new()));
            } else if let Some((_, body)) = current.as_mut() {
                body.push(line);
            }
        }
        if let Some((name, body)) = current.take() {
            vhosts.push(parse_vhost(name, &body.join("\n"), enabled.contains(&name)));
        }
        Ok(vhosts)
    }
}

pub struct ReadFileCmd {
    pub path: String,
}

impl RemoteCommand for ReadFileCmd {
    type Output = String;

    fn to_shell_string(&self) -> String {
        format!("cat {}", quote(&self.path))
    }

    fn parse_output(&self, output: &str) -> GatewayResult<String> {
        Ok(output.to_string())
    }
}

/// Replaces a file's content in one command.
pub struct WriteFileCmd {
    pub path: String,
    pub content: String,
}

impl RemoteCommand for WriteFileCmd {
    type Output = ();

    fn to_shell_string(&self) -> String {
        format!(
            "printf '%s' {} > {}",
            quote(&self.content),
            quote(&self.path)
        )
    }

    fn parse_output(&self, _output: &str) -> GatewayResult<()> {
        Ok(())
    }
}

pub async fn status(session: &Session) -> GatewayResult<NginxStatus> {
    let (running, version, worker_processes) = session.run(&NginxStatusCmd).await?;
    let test = test_config(session).await?;
    Ok(NginxStatus {
        running,
        version,
        worker_processes,
        config_test: test.output,
    })
}

pub async fn list_vhosts(session: &Session) -> GatewayResult<Completed<Vec<NginxVhost>>> {
    session.run_completed(&ListVhostsCmd).await
}

pub async fn vhost_config(session: &Session, name: &str) -> GatewayResult<String> {
    validate_name("vhost", name)?;
    session
        .run(&ReadFileCmd {
            path: available_path(name),
        })
        .await
        .map_err(|e| not_found_on(e, &["no such file"], &format!("Vhost {}", name)))
}

/// `nginx -t`. A failing test is a result, not an error.
pub async fn run_config_test(session: &Session) -> GatewayResult<Completed<ConfigTest>> {
    let completed = session.exec_raw("nginx -t 2>&1").await?;
    debug!("nginx -t exited with {}", completed.value.exit_code);
    Ok(completed.map(|output| ConfigTest {
        success: output.success(),
        output: format!("{}{}", output.stdout, output.stderr).trim().to_string(),
    }))
}

pub async fn test_config(session: &Session) -> GatewayResult<ConfigTest> {
    Ok(run_config_test(session).await?.value)
}

/// Backs up the vhost, writes the new content and runs a config test. A
/// failing test restores the backup and reports the test output.
pub async fn save_vhost_config(session: &Session, name: &str, content: &str) -> GatewayResult<ConfigTest> {
    validate_name("vhost", name)?;
    let _target = session.lock_target(LOCK_TARGET).await;

    let path = available_path(name);
    let backup = backup_path(name);
    session
        .exec_checked(&format!("cp -p {} {}", quote(&path), quote(&backup)))
        .await
        .map_err(|e| not_found_on(e, &["no such file"], &format!("Vhost {}", name)))?;

    let written = session
        .run(&WriteFileCmd {
            path: path.clone(),
            content: content.to_string(),
        })
        .await;
    let test = match written {
        Ok(()) => test_config(session).await,
        Err(e) => Err(e),
    };

    match test {
        Ok(test) if test.success => {
            session.exec_checked(&format!("rm -f {}", quote(&backup))).await?;
            info!("Saved nginx vhost {}", name);
            Ok(test)
        }
        Ok(test) => {
            warn!("nginx rejected new config for {}, restoring backup", name);
            session
                .exec_checked(&format!("mv -f {} {}", quote(&backup), quote(&path)))
                .await?;
            Err(GatewayError::ValidationFailed(test.output))
        }
        Err(e) => {
            warn!("Saving vhost {} failed, restoring backup: {}", name, e);
            if let Err(restore) = session
                .exec_checked(&format!("mv -f {} {}", quote(&backup), quote(&path)))
                .await
            {
                warn!("Restoring backup of {} failed: {}", name, restore);
            }
            Err(e)
        }
    }
}

pub fn render_vhost(request: &CreateVhostRequest) -> String {
    let server_name = request.server_name.as_deref().unwrap_or(&request.name);
    let port = request.listen_port.unwrap_or(80);
    let location = match &request.proxy_pass {
        Some(backend) => format!(
            "    location / {{\n        proxy_pass {};\n        proxy_set_header Host $host;\n        proxy_set_header X-Real-IP $remote_addr;\n    }}\n",
            backend
        ),
        None => "    location / {\n        try_files $uri $uri/ =404;\n    }\n".to_string(),
    };
    let root = request
        .root_path
        .clone()
        .unwrap_or_else(|| format!("/var/www/{}", request.name));
    format!(
        "server {{\n    listen {};\n    server_name {};\n    root {};\n    index index.html;\n\n{}}}\n",
        port, server_name, root, location
    )
}

pub async fn create_vhost(session: &Session, request: &CreateVhostRequest) -> GatewayResult<()> {
    validate_name("vhost", &request.name)?;
    let _target = session.lock_target(LOCK_TARGET).await;

    let path = available_path(&request.name);
    let exists = session.exec_raw(&format!("test -e {}", quote(&path))).await?.value;
    if exists.success() {
        return Err(GatewayError::ValidationFailed(format!(
            "Vhost {} already exists",
            request.name
        )));
    }

    let content = match &request.content {
        Some(content) => content.clone(),
        None => render_vhost(request),
    };
    session.run(&WriteFileCmd { path, content }).await?;
    info!("Created nginx vhost {}", request.name);
    Ok(())
}

/// Removes the config file and its enable-symlink in one command.
pub async fn delete_vhost(session: &Session, name: &str) -> GatewayResult<()> {
    validate_name("vhost", name)?;
    let _target = session.lock_target(LOCK_TARGET).await;

    session
        .exec_checked(&format!(
            "rm -f {} && rm {}",
            quote(&enabled_path(name)),
            quote(&available_path(name))
        ))
        .await
        .map_err(|e| not_found_on(e, &["no such file"], &format!("Vhost {}", name)))?;
    info!("Deleted nginx vhost {}", name);
    Ok(())
}

pub async fn toggle_vhost(session: &Session, name: &str, enabled: bool) -> GatewayResult<()> {
    validate_name("vhost", name)?;
    let _target = session.lock_target(LOCK_TARGET).await;

    let command = if enabled {
        let available = quote(&available_path(name));
        format!(
            "[ -f {a} ] || {{ echo 'No such file' >&2; exit 1; }}; ln -sfn {a} {e}",
            a = available,
            e = quote(&enabled_path(name))
        )
    } else {
        format!("rm -f {}", quote(&enabled_path(name)))
    };
    session
        .exec_checked(&command)
        .await
        .map_err(|e| not_found_on(e, &["no such file"], &format!("Vhost {}", name)))?;
    info!("{} nginx vhost {}", if enabled { "Enabled" } else { "Disabled" }, name);
    Ok(())
}

/// Reloads only after a clean config test.
pub async fn reload(session: &Session) -> GatewayResult<ConfigTest> {
    let _target = session.lock_target(LOCK_TARGET).await;
    let test = test_config(session).await?;
    if !test.success {
        warn!("Refusing nginx reload, config test failed");
        return Err(GatewayError::ValidationFailed(test.output));
    }
    session.exec_checked("systemctl reload nginx").await?;
    info!("Reloaded nginx");
    Ok(test)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::testing::{scripted_session, ScriptedShell};
    use std::sync::Arc;

    const SITE: &str = "\
server {
    listen 443 ssl;
    # server_name commented.example;
    server_name shop.example.com www.shop.example.com;
    location / {
        proxy_pass http://127.0.0.1:3000;
    }
}
";

    #[test]
    fn vhost_directives_are_extracted() {
        let vhost = parse_vhost("shop", SITE, true);
        assert_eq!(vhost.server_name, "shop.example.com");
        assert_eq!(vhost.listen_port, "443");
        assert!(vhost.ssl_enabled);
        assert_eq!(vhost.proxy_pass.as_deref(), Some("http://127.0.0.1:3000"));
        assert_eq!(vhost.root_path, "");
    }

    #[test]
    fn listing_marks_enabled_sites() {
        let output = format!(
            "{vm}blog\nserver {{ listen 80; }}\n{vm}shop\n{site}\n{em}\nshop\n",
            vm = VHOST_MARKER,
            em = ENABLED_MARKER,
            site = SITE
        );
        let vhosts = ListVhostsCmd.parse_output(&output).unwrap();
        assert_eq!(vhosts.len(), 2);
        assert!(!vhosts[0].enabled);
        assert_eq!(vhosts[0].server_name, "blog");
        assert!(vhosts[1].enabled);
    }

    #[test]
    fn status_sections_are_parsed() {
        let output = format!(
            "active\n{m}\nnginx version: nginx/1.24.0 (Ubuntu)\n{m}\nworker_processes auto;\n",
            m = SECTION_MARKER
        );
        let (running, version, workers) = NginxStatusCmd.parse_output(&output).unwrap();
        assert!(running);
        assert_eq!(version, "1.24.0");
        assert_eq!(workers, "auto");
    }

    #[tokio::test]
    async fn failed_save_restores_backup() {
        let shell = Arc::new(ScriptedShell::new());
        shell.respond("cp -p", "");
        shell.respond("printf", "");
        shell.respond_full("nginx -t", "", "nginx: [emerg] unexpected \"}\"", 1);
        shell.respond("mv -f", "");
        let session = scripted_session(shell.clone());

        let err = save_vhost_config(&session, "shop", "server {")
            .await
            .unwrap_err();
        match err {
            GatewayError::ValidationFailed(output) => assert!(output.contains("emerg")),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(
            shell.executed_matching("mv -f"),
            vec![format!(
                "mv -f {} {}",
                backup_path("shop"),
                available_path("shop")
            )]
        );
    }

    #[tokio::test]
    async fn successful_save_drops_backup() {
        let shell = Arc::new(ScriptedShell::new());
        shell.respond("cp -p", "");
        shell.respond("printf", "");
        shell.respond("nginx -t", "syntax is ok\ntest is successful\n");
        shell.respond("rm -f", "");
        let session = scripted_session(shell.clone());

        let test = save_vhost_config(&session, "shop", SITE).await.unwrap();
        assert!(test.success);
        assert!(shell.executed_matching("mv -f").is_empty());
        assert_eq!(shell.executed_matching("rm -f").len(), 1);
    }

    #[tokio::test]
    async fn reload_refused_on_failed_test() {
        let shell = Arc::new(ScriptedShell::new());
        shell.respond_full("nginx -t", "", "nginx: configuration file test failed", 1);
        shell.respond("systemctl reload nginx", "");
        let session = scripted_session(shell.clone());

        assert!(matches!(
            reload(&session).await,
            Err(GatewayError::ValidationFailed(_))
        ));
        assert!(shell.executed_matching("systemctl reload").is_empty());
    }

    #[tokio::test]
    async fn reload_after_clean_test() {
        let shell = Arc::new(ScriptedShell::new());
        shell.respond("nginx -t", "test is successful\n");
        shell.respond("systemctl reload nginx", "");
        let session = scripted_session(shell.clone());

        let test = reload(&session).await.unwrap();
        assert!(test.success);
        assert_eq!(shell.executed_matching("systemctl reload").len(), 1);
    }

    #[tokio::test]
    async fn create_refuses_existing_vhost() {
        let shell = Arc::new(ScriptedShell::new());
        shell.respond("test -e", "");
        let session = scripted_session(shell.clone());

        let request = CreateVhostRequest {
            name: "shop".into(),
            ..Default::default()
        };
        assert!(matches!(
            create_vhost(&session, &request).await,
            Err(GatewayError::ValidationFailed(_))
        ));
        assert!(shell.executed_matching("printf").is_empty());
    }

    #[test]
    fn rendered_proxy_vhost_parses_back() {
        let request = CreateVhostRequest {
            name: "api".into(),
            server_name: Some("api.example.com".into()),
            proxy_pass: Some("http://127.0.0.1:8080".into()),
            ..Default::default()
        };
        let vhost = parse_vhost("api", &render_vhost(&request), false);
        assert_eq!(vhost.server_name, "api.example.com");
        assert_eq!(vhost.listen_port, "80");
        assert_eq!(vhost.root_path, "/var/www/api");
        assert_eq!(vhost.proxy_pass.as_deref(), Some("http://127.0.0.1:8080"));
    }

    #[tokio::test]
    async fn traversal_name_is_rejected() {
        let shell = Arc::new(ScriptedShell::new());
        let session = scripted_session(shell.clone());
        assert!(vhost_config(&session, "../nginx.conf").await.is_err());
        assert!(shell.executed().is_empty());
    }
}
