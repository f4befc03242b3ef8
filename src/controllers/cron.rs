use crate::error::{GatewayError, GatewayResult};
use crate::server::model::Completed;
use crate::server::remote_cmd::{quote, RemoteCommand};
use crate::server::session::Session;
use log::{debug, info};
use serde::{Deserialize, Serialize};

const LOCK_TARGET: &str = "crontab";

const USER_MARKER: &str = "@@user";
const SYSTEM_MARKER: &str = "@@system";
const CROND_MARKER: &str = "@@crond ";
const FOLDER_MARKER: &str = "@@folder ";

pub const CRON_FOLDERS: [&str; 4] = ["hourly", "daily", "weekly", "monthly"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronJob {
    /// 1-based line number within its source file.
    pub id: usize,
    pub schedule: String,
    pub command: String,
    pub user: String,
    pub enabled: bool,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronFolder {
    pub name: String,
    pub path: String,
    pub scripts: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CronOverview {
    pub user_crontab: String,
    pub user_jobs: Vec<CronJob>,
    pub system_crontab: String,
    pub system_jobs: Vec<CronJob>,
    pub cron_d_jobs: Vec<CronJob>,
    pub folders: Vec<CronFolder>,
}

fn is_schedule_field(field: &str) -> bool {
    field.starts_with(|c: char| c.is_ascii_digit() || c == '*')
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '*' | '/' | ',' | '-'))
}

/// Parses one crontab line. Commented-out jobs come back disabled; prose
/// comments, blanks and variable assignments are skipped.
pub fn parse_cron_line(line: &str, id: usize, source: &str, default_user: &str, has_user_field: bool) -> Option<CronJob> {
    let trimmed = line.trim();
    let (body, enabled) = match trimmed.strip_prefix('#') {
        Some(rest) => (rest.trim(), false),
        None => (trimmed, true),
    };
    if body.is_empty() {
        return None;
    }
    let first = body.split_whitespace().next()?;
    if first.contains('=') {
        return None;
    }

    let mut fields = body.split_whitespace();
    let schedule = if first.starts_with('@') {
        fields.next()?.to_string()
    } else {
        let parts: Vec<&str> = fields.by_ref().take(5).collect();
        if parts.len() < 5 || !parts.iter().all(|f| is_schedule_field(f)) {
            return None;
        }
        parts.join(" ")
    };
    let user = if has_user_field {
        fields.next()?.to_string()
    } else {
        default_user.to_string()
    };
    let command = fields.collect::<Vec<_>>().join(" ");
    if command.is_empty() {
        return None;
    }

    Some(CronJob {
        id,
        schedule,
        command,
        user,
        enabled,
        source: source.to_string(),
    })
}

pub fn parse_crontab(content: &str, source: &str, default_user: &str, has_user_field: bool) -> Vec<CronJob> {
    content
        .lines()
        .enumerate()
        .filter_map(|(i, line)| parse_cron_line(line, i + 1, source, default_user, has_user_field))
        .collect()
}

fn uncommented(line: &str) -> String {
    let body = line.trim_start();
    let body = body.strip_prefix('#').unwrap_or(body);
    body.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Enables or disables line `line` (1-based) of `content`, after checking
/// that it still reads `expected` once the comment marker is ignored.
pub fn toggle_line(content: &str, line: usize, expected: &str, enabled: bool) -> GatewayResult<String> {
    let mut lines: Vec<String> = content.lines().map(String::from).collect();
    let Some(index) = line.checked_sub(1).filter(|i| *i < lines.len()) else {
        return Err(GatewayError::StaleIndex(format!(
            "Crontab has no line {}",
            line
        )));
    };
    let current = &mut lines[index];
    if uncommented(current) != uncommented(expected) {
        return Err(GatewayError::StaleIndex(format!(
            "Crontab line {} changed since it was listed",
            line
        )));
    }
    if parse_cron_line(current.as_str(), line, "", "", false).is_none() {
        return Err(GatewayError::ValidationFailed(format!(
            "Crontab line {} is not a job",
            line
        )));
    }

    let is_enabled = !current.trim_start().starts_with('#');
    if enabled && !is_enabled {
        let body = current.trim_start();
        *current = body.strip_prefix('#').unwrap_or(body).trim_start().to_string();
    } else if !enabled && is_enabled {
        *current = format!("#{}", current);
    }

    let mut result = lines.join("\n");
    result.push('\n');
    Ok(result)
}

/// Removes line `line` (1-based) of `content` if it still reads `expected`.
pub fn delete_line(content: &str, line: usize, expected: &str) -> GatewayResult<String> {
    let mut lines: Vec<&str> = content.lines().collect();
    let Some(index) = line.checked_sub(1).filter(|i| *i < lines.len()) else {
        return Err(GatewayError::StaleIndex(format!(
            "Crontab has no line {}",
            line
        )));
    };
    if uncommented(lines[index]) != uncommented(expected) {
        return Err(GatewayError::StaleIndex(format!(
            "Crontab line {} changed since it was listed",
            line
        )));
    }
    lines.remove(index);

    let mut result = lines.join("\n");
    if !result.is_empty() {
        result.push('\n');
    }
    Ok(result)
}

pub struct CronOverviewCmd {
    pub user: String,
}

impl RemoteCommand for CronOverviewCmd {
    type Output = CronOverview;

    fn to_shell_string(&self) -> String {
        format!(
            "echo {um}; crontab -l 2>/dev/null; echo {sm}; cat /etc/crontab 2>/dev/null; \
             for f in /etc/cron.d/*; do [ -f \"$f\" ] || continue; echo \"{cm}$f\"; cat \"$f\"; done; \
             for d in {folders}; do echo \"{fm}$d\"; ls -1 /etc/cron.$d 2>/dev/null; done; true",
            um = USER_MARKER,
            sm = SYSTEM_MARKER,
            cm = CROND_MARKER,
            fm = FOLDER_MARKER,
            folders = CRON_FOLDERS.join(" ")
        )
    }

    fn parse_output(&self, output: &str) -> GatewayResult<Self::Output> {
        enum Section {
            None,
            User,
            System,
            CronD,
            Folder,
        }

        let mut overview = CronOverview::default();
        let mut section = Section::None;
        let mut user_lines = Vec::new();
        let mut system_lines = Vec::new();
        let mut crond_lines: Vec<(String, Vec<&str>)> = Vec::new();

        for line in output.lines() {
            if line == USER_MARKER {
                section = Section::User;
            } else if line == SYSTEM_MARKER {
                section = Section::System;
            } else if let Some(path) = line.strip_prefix(CROND_MARKER) {
                crond_lines.push((path.to_string(), Vec::new()));
                section = Section::CronD;
            } else if let Some(name) = line.strip_prefix(FOLDER_MARKER) {
                overview.folders.push(CronFolder {
                    name: format!("cron.{}", name),
                    path: format!("/etc/cron.{}", name),
                    scripts: Vec::new(),
                });
                section = Section::Folder;
            } else {
                match &section {
                    Section::None => {}
                    Section::User => user_lines.push(line),
                    Section::System => system_lines.push(line),
                    Section::CronD => {
                        if let Some((_, lines)) = crond_lines.last_mut() {
                            lines.push(line);
                        }
                    }
                    Section::Folder => {
                        let script = line.trim();
                        if !script.is_empty() && script != "placeholder" && !script.starts_with('.') {
                            if let Some(folder) = overview.folders.last_mut() {
                                folder.scripts.push(script.to_string());
                            }
                        }
                    }
                }
            }
        }

        overview.user_crontab = join_lines(&user_lines);
        overview.user_jobs = parse_crontab(&overview.user_crontab, "user", &self.user, false);
        overview.system_crontab = join_lines(&system_lines);
        overview.system_jobs = parse_crontab(&overview.system_crontab, "/etc/crontab", "root", true);
        for (path, lines) in crond_lines {
            overview
                .cron_d_jobs
                .extend(parse_crontab(&join_lines(&lines), &path, "root", true));
        }
        Ok(overview)
    }
}

fn join_lines(lines: &[&str]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

/// Whole-file replacement of the connecting user's crontab.
pub struct WriteCrontabCmd {
    pub content: String,
}

impl RemoteCommand for WriteCrontabCmd {
    type Output = ();

    fn to_shell_string(&self) -> String {
        format!("printf '%s' {} | crontab -", quote(&self.content))
    }

    fn parse_output(&self, _output: &str) -> GatewayResult<()> {
        Ok(())
    }
}

/// User whose crontab `crontab -l` reads on this session.
pub fn crontab_user(session: &Session) -> String {
    if session.use_sudo() {
        "root".to_string()
    } else {
        session.profile().username.clone()
    }
}

pub async fn overview(session: &Session) -> GatewayResult<Completed<CronOverview>> {
    session
        .run_completed(&CronOverviewCmd {
            user: crontab_user(session),
        })
        .await
}

async fn read_user_crontab(session: &Session) -> GatewayResult<String> {
    let output = session.exec_raw("crontab -l").await?.value;
    if output.success() {
        return Ok(output.stdout);
    }
    if output.stderr.contains("no crontab") {
        debug!("No crontab installed yet");
        return Ok(String::new());
    }
    Err(GatewayError::RemoteCommandFailed {
        code: output.exit_code,
        stderr: output.error_text(),
    })
}

async fn write_user_crontab(session: &Session, content: &str) -> GatewayResult<()> {
    let mut content = content.to_string();
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    session.run(&WriteCrontabCmd { content }).await
}

pub async fn save_user_crontab(session: &Session, content: &str) -> GatewayResult<()> {
    let _target = session.lock_target(LOCK_TARGET).await;
    write_user_crontab(session, content).await?;
    info!("Replaced crontab of {}", crontab_user(session));
    Ok(())
}

pub async fn toggle_cron_line(session: &Session, line: usize, expected: &str, enabled: bool) -> GatewayResult<()> {
    let _target = session.lock_target(LOCK_TARGET).await;
    let current = read_user_crontab(session).await?;
    let updated = toggle_line(&current, line, expected, enabled)?;
    write_user_crontab(session, &updated).await?;
    info!(
        "{} crontab line {}",
        if enabled { "Enabled" } else { "Disabled" },
        line
    );
    Ok(())
}

pub async fn delete_cron_line(session: &Session, line: usize, expected: &str) -> GatewayResult<()> {
    let _target = session.lock_target(LOCK_TARGET).await;
    let current = read_user_crontab(session).await?;
    let updated = delete_line(&current, line, expected)?;
    write_user_crontab(session, &updated).await?;
    info!("Deleted crontab line {}", line);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::testing::{scripted_session, ScriptedShell};
    use std::sync::Arc;

    const CRONTAB: &str = "\
# m h  dom mon dow   command
MAILTO=ops@example.com
*/5 * * * * /usr/local/bin/backup.sh --quick
#0 3 * * 0 /usr/local/bin/rotate.sh
@reboot /opt/app/start.sh
";

    #[test]
    fn jobs_and_disabled_jobs_are_parsed() {
        let jobs = parse_crontab(CRONTAB, "user", "deploy", false);
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0].id, 3);
        assert_eq!(jobs[0].schedule, "*/5 * * * *");
        assert_eq!(jobs[0].command, "/usr/local/bin/backup.sh --quick");
        assert_eq!(jobs[0].user, "deploy");
        assert!(!jobs[1].enabled);
        assert_eq!(jobs[2].schedule, "@reboot");
    }

    #[test]
    fn system_crontab_has_user_column() {
        let jobs = parse_crontab("17 * * * * root cd / && run-parts --report /etc/cron.hourly\n", "/etc/crontab", "root", true);
        assert_eq!(jobs[0].user, "root");
        assert_eq!(jobs[0].command, "cd / && run-parts --report /etc/cron.hourly");
    }

    #[test]
    fn toggling_checks_expected_text() {
        let disabled = toggle_line(CRONTAB, 3, "*/5 * * * * /usr/local/bin/backup.sh --quick", false).unwrap();
        assert_eq!(disabled.lines().nth(2), Some("#*/5 * * * * /usr/local/bin/backup.sh --quick"));

        let enabled = toggle_line(CRONTAB, 4, "0 3 * * 0 /usr/local/bin/rotate.sh", true).unwrap();
        assert_eq!(enabled.lines().nth(3), Some("0 3 * * 0 /usr/local/bin/rotate.sh"));

        assert!(matches!(
            toggle_line(CRONTAB, 3, "@reboot /opt/app/start.sh", false),
            Err(GatewayError::StaleIndex(_))
        ));
        assert!(matches!(
            toggle_line(CRONTAB, 42, "x", false),
            Err(GatewayError::StaleIndex(_))
        ));
        assert!(matches!(
            toggle_line(CRONTAB, 0, "x", false),
            Err(GatewayError::StaleIndex(_))
        ));
        assert!(matches!(
            toggle_line(CRONTAB, 1, "# m h  dom mon dow   command", true),
            Err(GatewayError::ValidationFailed(_))
        ));
        assert!(matches!(
            toggle_line(CRONTAB, 2, "MAILTO=ops@example.com", false),
            Err(GatewayError::ValidationFailed(_))
        ));
    }

    #[test]
    fn overview_sections_are_separated() {
        let output = format!(
            "{um}\n{tab}{sm}\nSHELL=/bin/sh\n17 * * * * root run-parts /etc/cron.hourly\n\
             {cm}/etc/cron.d/certbot\n0 */12 * * * root certbot -q renew\n\
             {fm}hourly\n{fm}daily\nlogrotate\n.placeholder\n{fm}weekly\n{fm}monthly\n",
            um = USER_MARKER,
            sm = SYSTEM_MARKER,
            cm = CROND_MARKER,
            fm = FOLDER_MARKER,
            tab = CRONTAB
        );
        let overview = CronOverviewCmd { user: "deploy".into() }
            .parse_output(&output)
            .unwrap();
        assert_eq!(overview.user_crontab, CRONTAB);
        assert_eq!(overview.user_jobs.len(), 3);
        assert_eq!(overview.system_jobs.len(), 1);
        assert_eq!(overview.cron_d_jobs[0].source, "/etc/cron.d/certbot");
        assert_eq!(overview.folders.len(), 4);
        assert_eq!(overview.folders[1].scripts, vec!["logrotate"]);
        assert!(overview.folders[0].scripts.is_empty());
    }

    #[test]
    fn deleting_removes_only_the_checked_line() {
        let updated = delete_line(CRONTAB, 4, "0 3 * * 0 /usr/local/bin/rotate.sh").unwrap();
        assert_eq!(updated.lines().count(), 4);
        assert!(!updated.contains("rotate.sh"));
        assert!(updated.ends_with("@reboot /opt/app/start.sh\n"));

        assert!(matches!(
            delete_line(CRONTAB, 4, "@reboot /opt/app/start.sh"),
            Err(GatewayError::StaleIndex(_))
        ));
        assert_eq!(delete_line("@daily x\n", 1, "@daily x").unwrap(), "");
    }

    #[tokio::test]
    async fn stale_toggle_writes_nothing() {
        let shell = Arc::new(ScriptedShell::new());
        shell.respond("crontab -l", CRONTAB);
        shell.respond("crontab -", "");
        let session = scripted_session(shell.clone());

        let err = toggle_cron_line(&session, 5, "*/5 * * * * /usr/local/bin/backup.sh --quick", false)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::StaleIndex(_)));
        assert!(shell.executed_matching("printf").is_empty());
    }

    #[tokio::test]
    async fn toggle_rewrites_whole_file() {
        let shell = Arc::new(ScriptedShell::new());
        shell.respond("crontab -l", CRONTAB);
        shell.respond("| crontab -", "");
        let session = scripted_session(shell.clone());

        toggle_cron_line(&session, 5, "@reboot /opt/app/start.sh", false)
            .await
            .unwrap();
        let writes = shell.executed_matching("| crontab -");
        assert_eq!(writes.len(), 1);
        assert!(writes[0].contains("#@reboot /opt/app/start.sh"));
        assert!(writes[0].contains("*/5 * * * *"));
    }
}
