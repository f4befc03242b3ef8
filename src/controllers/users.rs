use crate::error::{GatewayError, GatewayResult};
use crate::server::model::Completed;
use crate::server::remote_cmd::{quote, RemoteCommand};
use crate::server::session::Session;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const GROUP_MARKER: &str = "@@group";
const SHADOW_MARKER: &str = "@@shadow";
const LASTLOG_MARKER: &str = "@@lastlog";
const KEYS_MARKER: &str = "@@keys";
const FINGERPRINT_MARKER: &str = "@@fingerprints";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemUser {
    pub username: String,
    pub uid: u32,
    pub gid: u32,
    pub groups: Vec<String>,
    pub home: String,
    pub shell: String,
    pub gecos: String,
    pub locked: bool,
    pub has_password: bool,
    pub is_system: bool,
    pub last_login: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemGroup {
    pub name: String,
    pub gid: u32,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshKey {
    pub key_type: String,
    pub key_data: String,
    pub comment: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDetail {
    #[serde(flatten)]
    pub user: SystemUser,
    pub password_expiry: Option<String>,
    pub ssh_keys: Vec<SshKey>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: Option<String>,
    pub home: Option<String>,
    pub shell: Option<String>,
    pub groups: Vec<String>,
    pub create_home: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModifyUserRequest {
    pub username: String,
    pub new_username: Option<String>,
    pub home: Option<String>,
    pub shell: Option<String>,
    pub groups: Option<Vec<String>>,
}

/// `[a-z_][a-z0-9_-]{0,31}`
pub fn validate_username(name: &str) -> GatewayResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_lowercase() || first == '_')
                && name.len() <= 32
                && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(GatewayError::ValidationFailed(format!(
            "Invalid user name: {:?}",
            name
        )))
    }
}

fn validate_path(kind: &str, path: &str) -> GatewayResult<()> {
    if path.starts_with('/') && !path.contains(|c: char| c.is_whitespace() || c == ':') {
        Ok(())
    } else {
        Err(GatewayError::ValidationFailed(format!(
            "Invalid {}: {:?}",
            kind, path
        )))
    }
}

fn validate_groups(groups: &[String]) -> GatewayResult<()> {
    groups.iter().try_for_each(|g| validate_username(g))
}

pub fn parse_groups(output: &str) -> Vec<SystemGroup> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split(':').collect();
            if parts.len() < 4 {
                return None;
            }
            Some(SystemGroup {
                name: parts[0].to_string(),
                gid: parts[2].parse().ok()?,
                members: parts[3]
                    .split(',')
                    .filter(|m| !m.is_empty())
                    .map(String::from)
                    .collect(),
            })
        })
        .collect()
}

/// Returns (locked, has_password) from a shadow password field.
fn password_state(field: &str) -> (bool, bool) {
    let locked = field.starts_with('!');
    let hash = field.trim_start_matches('!');
    let has_password = !(hash.is_empty() || hash == "*");
    (locked, has_password)
}

pub struct ListUsersCmd;

impl RemoteCommand for ListUsersCmd {
    type Output = (Vec<SystemUser>, Vec<SystemGroup>);

    fn to_shell_string(&self) -> String {
        format!(
            "getent passwd; echo {}; getent group; echo {}; getent shadow 2>/dev/null; true",
            GROUP_MARKER, SHADOW_MARKER
        )
    }

    fn parse_output(&self, output: &str) -> GatewayResult<Self::Output> {
        let (passwd, rest) = output.split_once(GROUP_MARKER).unwrap_or((output, ""));
        let (group, shadow) = rest.split_once(SHADOW_MARKER).unwrap_or((rest, ""));

        let groups = parse_groups(group);
        let gid_names: HashMap<u32, &str> = groups.iter().map(|g| (g.gid, g.name.as_str())).collect();
        let shadow: HashMap<&str, (bool, bool)> = shadow
            .lines()
            .filter_map(|line| {
                let mut parts = line.split(':');
                let name = parts.next()?;
                let field = parts.next()?;
                Some((name, password_state(field)))
            })
            .collect();

        let users = passwd
            .lines()
            .filter_map(|line| {
                let parts: Vec<&str> = line.split(':').collect();
                if parts.len() < 7 {
                    return None;
                }
                let username = parts[0].to_string();
                let uid: u32 = parts[2].parse().ok()?;
                let gid: u32 = parts[3].parse().ok()?;

                let mut member_of: Vec<String> = gid_names
                    .get(&gid)
                    .map(|g| vec![g.to_string()])
                    .unwrap_or_default();
                for g in &groups {
                    if g.members.contains(&username) && !member_of.contains(&g.name) {
                        member_of.push(g.name.clone());
                    }
                }
                let (locked, has_password) = shadow.get(parts[0]).copied().unwrap_or((false, false));

                Some(SystemUser {
                    uid,
                    gid,
                    groups: member_of,
                    home: parts[5].to_string(),
                    shell: parts[6].to_string(),
                    gecos: parts[4].to_string(),
                    locked,
                    has_password,
                    is_system: uid != 0 && (uid < 1000 || uid == 65534),
                    last_login: None,
                    username,
                })
            })
            .collect();
        Ok((users, groups))
    }
}

pub fn parse_ssh_keys(content: &str, fingerprints: &str) -> Vec<SshKey> {
    let mut keys: Vec<SshKey> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let start = tokens.iter().position(|t| {
                t.starts_with("ssh-") || t.starts_with("ecdsa-") || t.starts_with("sk-")
            })?;
            Some(SshKey {
                key_type: tokens[start].to_string(),
                key_data: tokens.get(start + 1)?.to_string(),
                comment: tokens[start + 2..].join(" "),
                fingerprint: String::new(),
            })
        })
        .collect();

    // ssh-keygen lists valid keys in file order: "256 SHA256:... comment (ED25519)"
    let prints: Vec<&str> = fingerprints
        .lines()
        .filter_map(|l| l.split_whitespace().nth(1))
        .collect();
    if prints.len() == keys.len() {
        for (key, print) in keys.iter_mut().zip(prints) {
            key.fingerprint = print.to_string();
        }
    }
    keys
}

fn parse_password_expiry(chage: &str) -> Option<String> {
    chage.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        (key.trim() == "Password expires").then(|| value.trim().to_string())
    })
}

fn parse_last_login(lastlog: &str) -> Option<String> {
    let line = lastlog.lines().map(str::trim).filter(|l| !l.is_empty()).nth(1)?;
    if line.contains("Never logged in") {
        return None;
    }
    // Username  Port  From  Latest
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let latest = tokens
        .iter()
        .position(|t| matches!(*t, "Mon" | "Tue" | "Wed" | "Thu" | "Fri" | "Sat" | "Sun"))
        .map(|i| tokens[i..].join(" "))
        .unwrap_or_else(|| tokens.iter().skip(1).copied().collect::<Vec<_>>().join(" "));
    Some(latest)
}

pub struct UserExtrasCmd {
    pub username: String,
    pub home: String,
}

impl RemoteCommand for UserExtrasCmd {
    type Output = (Option<String>, Option<String>, Vec<SshKey>);

    fn to_shell_string(&self) -> String {
        let name = quote(&self.username);
        let keys = quote(&format!("{}/.ssh/authorized_keys", self.home.trim_end_matches('/')));
        format!(
            "chage -l {name} 2>/dev/null; echo {lm}; lastlog -u {name} 2>/dev/null; echo {km}; \
             cat {keys} 2>/dev/null; echo {fm}; ssh-keygen -lf {keys} 2>/dev/null; true",
            name = name,
            keys = keys,
            lm = LASTLOG_MARKER,
            km = KEYS_MARKER,
            fm = FINGERPRINT_MARKER
        )
    }

    fn parse_output(&self, output: &str) -> GatewayResult<Self::Output> {
        let (chage, rest) = output.split_once(LASTLOG_MARKER).unwrap_or((output, ""));
        let (lastlog, rest) = rest.split_once(KEYS_MARKER).unwrap_or((rest, ""));
        let (keys, prints) = rest.split_once(FINGERPRINT_MARKER).unwrap_or((rest, ""));
        Ok((
            parse_password_expiry(chage),
            parse_last_login(lastlog),
            parse_ssh_keys(keys, prints),
        ))
    }
}

pub async fn list_users(session: &Session) -> GatewayResult<Completed<Vec<SystemUser>>> {
    Ok(session.run_completed(&ListUsersCmd).await?.map(|(users, _)| users))
}

pub async fn list_groups(session: &Session) -> GatewayResult<Vec<SystemGroup>> {
    Ok(session.run(&ListUsersCmd).await?.1)
}

pub async fn user_detail(session: &Session, username: &str) -> GatewayResult<UserDetail> {
    validate_username(username)?;
    let (users, _) = session.run(&ListUsersCmd).await?;
    let mut user = users
        .into_iter()
        .find(|u| u.username == username)
        .ok_or_else(|| GatewayError::NotFound(format!("User {}", username)))?;

    let (password_expiry, last_login, ssh_keys) = session
        .run(&UserExtrasCmd {
            username: username.to_string(),
            home: user.home.clone(),
        })
        .await?;
    user.last_login = last_login;

    Ok(UserDetail {
        user,
        password_expiry,
        ssh_keys,
    })
}

/// Refuses to touch unknown accounts and uid 0.
async fn guard_account(session: &Session, username: &str) -> GatewayResult<()> {
    validate_username(username)?;
    let output = session
        .exec_raw(&format!("id -u {}", quote(username)))
        .await?
        .value;
    if !output.success() {
        return Err(GatewayError::NotFound(format!("User {}", username)));
    }
    let uid: u32 = output
        .stdout
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Unexpected id output: {:?}", output.stdout))?;
    if uid == 0 {
        return Err(GatewayError::PermissionDenied(format!(
            "Refusing to modify {} (uid 0)",
            username
        )));
    }
    Ok(())
}

fn map_exists(err: GatewayError) -> GatewayError {
    match err {
        GatewayError::RemoteCommandFailed { ref stderr, .. } if stderr.contains("already exists") => {
            GatewayError::ValidationFailed(stderr.clone())
        }
        other => other,
    }
}

fn validate_password(password: &str) -> GatewayResult<()> {
    if password.contains(['\n', '\r', '\0']) {
        return Err(GatewayError::ValidationFailed(
            "Password must be a single line".to_string(),
        ));
    }
    Ok(())
}

/// Sets a password through `chpasswd`, reading `user:password` from stdin.
async fn set_password(session: &Session, username: &str, password: &str) -> GatewayResult<()> {
    validate_password(password)?;
    session
        .exec_checked_with_input("chpasswd", &format!("{}:{}\n", username, password))
        .await?;
    Ok(())
}

pub async fn create_user(session: &Session, request: &CreateUserRequest) -> GatewayResult<()> {
    validate_username(&request.username)?;
    validate_groups(&request.groups)?;
    let password = request.password.as_deref().filter(|p| !p.is_empty());
    if let Some(password) = password {
        validate_password(password)?;
    }

    let mut command = String::from("useradd");
    command.push_str(if request.create_home { " -m" } else { " -M" });
    if let Some(home) = &request.home {
        validate_path("home directory", home)?;
        command.push_str(&format!(" -d {}", quote(home)));
    }
    if let Some(shell) = &request.shell {
        validate_path("shell", shell)?;
        command.push_str(&format!(" -s {}", quote(shell)));
    }
    if !request.groups.is_empty() {
        command.push_str(&format!(" -G {}", quote(&request.groups.join(","))));
    }
    command.push_str(&format!(" {}", quote(&request.username)));

    info!("Creating user {}", request.username);
    session.exec_checked(&command).await.map_err(map_exists)?;

    if let Some(password) = password {
        if let Err(err) = set_password(session, &request.username, password).await {
            warn!(
                "Setting the password of {} failed, removing the new account",
                request.username
            );
            // -r only for a home useradd created itself
            let flag = if request.create_home { " -r" } else { "" };
            let rollback = format!("userdel{} {}", flag, quote(&request.username));
            if let Err(rollback_err) = session.exec_checked(&rollback).await {
                error!("Could not remove {}: {}", request.username, rollback_err);
                return Err(GatewayError::Internal(anyhow::anyhow!(
                    "User {} was created without a password ({}) and could not be removed ({})",
                    request.username,
                    err,
                    rollback_err
                )));
            }
            return Err(err);
        }
        debug!("Password set for {}", request.username);
    }
    Ok(())
}

pub async fn modify_user(session: &Session, request: &ModifyUserRequest) -> GatewayResult<()> {
    guard_account(session, &request.username).await?;

    let mut args = Vec::new();
    if let Some(new_name) = &request.new_username {
        validate_username(new_name)?;
        args.push(format!("-l {}", quote(new_name)));
    }
    if let Some(home) = &request.home {
        validate_path("home directory", home)?;
        args.push(format!("-d {} -m", quote(home)));
    }
    if let Some(shell) = &request.shell {
        validate_path("shell", shell)?;
        args.push(format!("-s {}", quote(shell)));
    }
    if let Some(groups) = &request.groups {
        validate_groups(groups)?;
        args.push(format!("-G {}", quote(&groups.join(","))));
    }
    if args.is_empty() {
        return Err(GatewayError::ValidationFailed(
            "Nothing to modify".to_string(),
        ));
    }

    info!("Modifying user {}", request.username);
    session
        .exec_checked(&format!("usermod {} {}", args.join(" "), quote(&request.username)))
        .await
        .map_err(map_exists)?;
    Ok(())
}

pub async fn delete_user(session: &Session, username: &str, remove_home: bool) -> GatewayResult<()> {
    guard_account(session, username).await?;
    info!("Deleting user {} (remove home: {})", username, remove_home);
    let flag = if remove_home { " -r" } else { "" };
    session
        .exec_checked(&format!("userdel{} {}", flag, quote(username)))
        .await?;
    Ok(())
}

pub async fn set_locked(session: &Session, username: &str, locked: bool) -> GatewayResult<()> {
    guard_account(session, username).await?;
    info!("{} user {}", if locked { "Locking" } else { "Unlocking" }, username);
    let flag = if locked { "-L" } else { "-U" };
    session
        .exec_checked(&format!("usermod {} {}", flag, quote(username)))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::testing::{scripted_session, ScriptedShell};
    use std::sync::Arc;

    const LISTING: &str = "\
root:x:0:0:root:/root:/bin/bash
www-data:x:33:33:www-data:/var/www:/usr/sbin/nologin
alice:x:1000:1000:Alice,,,:/home/alice:/bin/bash
@@group
root:x:0:
sudo:x:27:alice
docker:x:999:alice,bob
alice:x:1000:
@@shadow
root:*:19000:0:99999:7:::
www-data:*:19000:0:99999:7:::
alice:!$6$abc$def:19000:0:99999:7:::
";

    #[test]
    fn usernames_follow_useradd_rules() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("_svc-1").is_ok());
        assert!(validate_username("Alice").is_err());
        assert!(validate_username("1alice").is_err());
        assert!(validate_username("").is_err());
        assert!(validate_username(&"a".repeat(33)).is_err());
        assert!(validate_username("a;rm").is_err());
    }

    #[test]
    fn users_are_joined_with_groups_and_shadow() {
        let (users, groups) = ListUsersCmd.parse_output(LISTING).unwrap();
        assert_eq!(users.len(), 3);
        assert_eq!(groups.len(), 4);

        let alice = &users[2];
        assert_eq!(alice.groups, vec!["alice", "sudo", "docker"]);
        assert!(alice.locked);
        assert!(alice.has_password);
        assert!(!alice.is_system);
        assert_eq!(alice.gecos, "Alice,,,");

        assert!(!users[0].has_password);
        assert!(users[1].is_system);
    }

    #[test]
    fn authorized_keys_are_matched_to_fingerprints() {
        let keys = "\
# deploy keys
ssh-ed25519 AAAAC3Nza alice@laptop
from=\"10.0.0.0/8\" ssh-rsa AAAAB3Nza ci runner
";
        let prints = "\
256 SHA256:abc alice@laptop (ED25519)
3072 SHA256:def ci runner (RSA)
";
        let parsed = parse_ssh_keys(keys, prints);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].fingerprint, "SHA256:abc");
        assert_eq!(parsed[1].key_type, "ssh-rsa");
        assert_eq!(parsed[1].comment, "ci runner");
    }

    #[test]
    fn lastlog_and_chage_are_read() {
        let lastlog = "Username         Port     From             Latest\n\
                       alice            pts/0    203.0.113.9      Tue Mar  5 10:00:00 +0000 2024\n";
        assert_eq!(
            parse_last_login(lastlog).as_deref(),
            Some("Tue Mar 5 10:00:00 +0000 2024")
        );
        assert_eq!(
            parse_last_login("Username Port Latest\nbob **Never logged in**\n"),
            None
        );
        assert_eq!(
            parse_password_expiry("Last password change : Jan 01, 2024\nPassword expires : never\n").as_deref(),
            Some("never")
        );
    }

    #[tokio::test]
    async fn root_account_is_protected() {
        let shell = Arc::new(ScriptedShell::new());
        shell.respond("id -u root", "0\n");
        let session = scripted_session(shell.clone());

        for result in [
            delete_user(&session, "root", true).await,
            set_locked(&session, "root", true).await,
            modify_user(
                &session,
                &ModifyUserRequest {
                    username: "root".into(),
                    shell: Some("/bin/sh".into()),
                    ..Default::default()
                },
            )
            .await,
        ] {
            assert!(matches!(result, Err(GatewayError::PermissionDenied(_))));
        }
        assert!(shell.executed_matching("userdel").is_empty());
        assert!(shell.executed_matching("usermod").is_empty());
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let shell = Arc::new(ScriptedShell::new());
        shell.respond_full("id -u ghost", "", "id: 'ghost': no such user", 1);
        let session = scripted_session(shell);

        assert!(matches!(
            set_locked(&session, "ghost", false).await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn create_user_sends_password_on_stdin() {
        let shell = Arc::new(ScriptedShell::new());
        shell.respond("useradd", "");
        shell.respond("chpasswd", "");
        let session = scripted_session(shell.clone());

        let request = CreateUserRequest {
            username: "deploy".into(),
            password: Some("s3cret pass".into()),
            shell: Some("/bin/bash".into()),
            groups: vec!["docker".into(), "sudo".into()],
            create_home: true,
            ..Default::default()
        };
        create_user(&session, &request).await.unwrap();

        assert_eq!(
            shell.executed_matching("useradd"),
            vec!["useradd -m -s /bin/bash -G docker,sudo deploy"]
        );
        assert_eq!(shell.executed_matching("chpasswd"), vec!["chpasswd"]);
        assert!(shell.executed().iter().all(|c| !c.contains("s3cret")));
        assert_eq!(shell.inputs(), vec!["deploy:s3cret pass\n"]);
    }

    #[tokio::test]
    async fn failed_password_removes_the_new_account() {
        let shell = Arc::new(ScriptedShell::new());
        shell.respond("useradd", "");
        shell.respond_full("chpasswd", "", "chpasswd: (user deploy) pam_chauthtok() failed", 1);
        shell.respond("userdel", "");
        let session = scripted_session(shell.clone());

        let request = CreateUserRequest {
            username: "deploy".into(),
            password: Some("weak".into()),
            create_home: true,
            ..Default::default()
        };
        let err = create_user(&session, &request).await.unwrap_err();
        assert!(matches!(err, GatewayError::RemoteCommandFailed { code: 1, .. }));
        assert_eq!(shell.executed_matching("userdel"), vec!["userdel -r deploy"]);
    }

    #[tokio::test]
    async fn multi_line_password_is_refused_before_useradd() {
        let shell = Arc::new(ScriptedShell::new());
        shell.respond("useradd", "");
        let session = scripted_session(shell.clone());

        let request = CreateUserRequest {
            username: "deploy".into(),
            password: Some("a\nroot:x".into()),
            ..Default::default()
        };
        assert!(matches!(
            create_user(&session, &request).await,
            Err(GatewayError::ValidationFailed(_))
        ));
        assert!(shell.executed().is_empty());
    }

    #[tokio::test]
    async fn duplicate_user_is_a_validation_error() {
        let shell = Arc::new(ScriptedShell::new());
        shell.respond_full("useradd", "", "useradd: user 'alice' already exists", 9);
        let session = scripted_session(shell);

        let request = CreateUserRequest {
            username: "alice".into(),
            ..Default::default()
        };
        assert!(matches!(
            create_user(&session, &request).await,
            Err(GatewayError::ValidationFailed(_))
        ));
    }
}
