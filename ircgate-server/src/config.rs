//! Server configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use crate::settings::{Settings, TomlSettings};

#[derive(Parser, Debug, Clone)]
#[command(name = "ircgate-server", about = "IRC gateway to instant-messaging backends")]
pub struct ServerConfig {
    /// Address to listen on for plain connections.
    #[arg(long, env = "IRCGATE_LISTEN_ADDR", default_value = "127.0.0.1:6667")]
    pub listen_addr: String,

    /// Server hostname. Blank means the local address of each connection.
    #[arg(long, env = "IRCGATE_HOSTNAME", default_value = "")]
    pub hostname: String,

    /// Nickname of the gateway's service user.
    #[arg(long, env = "IRCGATE_ROOT_NICK", default_value = "ircgate")]
    pub root_nick: String,

    /// Name of the administrative channel (must start with `&`).
    #[arg(long, env = "IRCGATE_STATUS_CHANNEL", default_value = "&gateway")]
    pub status_channel: String,

    /// Message of the day.
    #[arg(long, env = "IRCGATE_MOTD")]
    pub motd: Option<String>,

    /// Read the message of the day from a file (re-read on REHASH).
    #[arg(long, env = "IRCGATE_MOTD_FILE")]
    pub motd_file: Option<PathBuf>,

    /// Seconds of client silence before a liveness probe.
    #[arg(long, env = "IRCGATE_PING_INTERVAL", default_value_t = 60)]
    pub ping_interval: u64,

    /// Password a new identity must present to be created.
    #[arg(long, env = "IRCGATE_SERVER_PASSWORD")]
    pub server_password: Option<String>,

    /// Operator credentials as `name:password`. Repeatable.
    #[arg(long = "oper", value_parser = OperEntry::parse_arg)]
    pub opers: Vec<OperEntry>,

    /// Backend accounts as `id:protocol:username`. Repeatable.
    #[arg(long = "account", value_parser = AccountSpec::parse_arg)]
    pub accounts: Vec<AccountSpec>,

    /// TOML settings file used by ADMIN and friends.
    #[arg(long, env = "IRCGATE_SETTINGS")]
    pub settings_file: Option<PathBuf>,

    /// Directory holding the credential store. Credentials are kept in
    /// memory only when unset.
    #[arg(long, env = "IRCGATE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:6667".to_string(),
            hostname: String::new(),
            root_nick: "ircgate".to_string(),
            status_channel: "&gateway".to_string(),
            motd: None,
            motd_file: None,
            ping_interval: 60,
            server_password: None,
            opers: Vec::new(),
            accounts: Vec::new(),
            settings_file: None,
            data_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperEntry {
    pub name: String,
    pub password: String,
}

impl OperEntry {
    pub fn parse_arg(s: &str) -> Result<Self, String> {
        match s.split_once(':') {
            Some((name, password)) if !name.is_empty() && !password.is_empty() => Ok(Self {
                name: name.to_string(),
                password: password.to_string(),
            }),
            _ => Err(format!("expected name:password, got '{s}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSpec {
    pub id: String,
    pub protocol: String,
    pub username: String,
}

impl AccountSpec {
    pub fn parse_arg(s: &str) -> Result<Self, String> {
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(id), Some(protocol), Some(username))
                if !id.is_empty() && !protocol.is_empty() && !username.is_empty() =>
            {
                Ok(Self {
                    id: id.to_string(),
                    protocol: protocol.to_string(),
                    username: username.to_string(),
                })
            }
            _ => Err(format!("expected id:protocol:username, got '{s}'")),
        }
    }
}

/// Read-only configuration handed to every session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub hostname: String,
    pub root_nick: String,
    pub status_channel: String,
    pub motd: Option<String>,
    pub ping_interval: Duration,
    pub server_password: Option<String>,
    pub opers: Vec<OperEntry>,
    pub settings: Arc<dyn Settings>,
    /// Reported by RPL_CREATED.
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl SessionConfig {
    /// Resolve file-backed parts of `config`. A missing MOTD file is
    /// logged and ignored; a broken settings file is an error.
    pub fn load(config: &ServerConfig) -> Result<Self> {
        let mut motd = config.motd.clone();
        if let Some(ref path) = config.motd_file {
            match std::fs::read_to_string(path) {
                Ok(content) => {
                    tracing::info!("Loaded MOTD from {}", path.display());
                    motd = Some(content);
                }
                Err(e) => tracing::warn!("Failed to read MOTD file {}: {e}", path.display()),
            }
        }
        let settings: Arc<dyn Settings> = match config.settings_file {
            Some(ref path) => Arc::new(TomlSettings::load(path)?),
            None => Arc::new(TomlSettings::empty()),
        };
        Ok(Self {
            hostname: config.hostname.clone(),
            root_nick: config.root_nick.clone(),
            status_channel: config.status_channel.clone(),
            motd,
            ping_interval: Duration::from_secs(config.ping_interval.max(1)),
            server_password: config.server_password.clone(),
            opers: config.opers.clone(),
            settings,
            started_at: chrono::Utc::now(),
        })
    }

    /// Keep the start time of `self` across a reload.
    pub fn reloaded(&self, config: &ServerConfig) -> Result<Self> {
        let mut fresh = Self::load(config)?;
        fresh.started_at = self.started_at;
        Ok(fresh)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            hostname: "irc.gateway.test".to_string(),
            root_nick: "ircgate".to_string(),
            status_channel: "&gateway".to_string(),
            motd: None,
            ping_interval: Duration::from_secs(60),
            server_password: None,
            opers: Vec::new(),
            settings: Arc::new(TomlSettings::empty()),
            started_at: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn oper_and_account_arguments() {
        assert_eq!(
            OperEntry::parse_arg("admin:s3cr3t:x"),
            Ok(OperEntry { name: "admin".into(), password: "s3cr3t:x".into() })
        );
        assert!(OperEntry::parse_arg("admin").is_err());
        assert!(OperEntry::parse_arg(":pw").is_err());

        let spec = AccountSpec::parse_arg("jabber0:jabber:me@example.org").unwrap();
        assert_eq!(spec.username, "me@example.org");
        assert!(AccountSpec::parse_arg("jabber0:jabber").is_err());
    }

    #[test]
    fn cli_parsing() {
        let config = ServerConfig::parse_from([
            "ircgate-server",
            "--status-channel",
            "&ctl",
            "--oper",
            "root:toor",
            "--oper",
            "alice:pw",
            "--ping-interval",
            "5",
        ]);
        assert_eq!(config.status_channel, "&ctl");
        assert_eq!(config.opers.len(), 2);
        assert_eq!(config.ping_interval, 5);
    }

    #[test]
    fn load_reads_motd_and_settings_files() {
        let mut motd = tempfile::NamedTempFile::new().unwrap();
        write!(motd, "hello\nworld").unwrap();
        let mut settings = tempfile::NamedTempFile::new().unwrap();
        writeln!(settings, "[admin]\nname = \"Ops\"").unwrap();

        let config = ServerConfig {
            motd_file: Some(motd.path().to_path_buf()),
            settings_file: Some(settings.path().to_path_buf()),
            ..Default::default()
        };
        let loaded = SessionConfig::load(&config).unwrap();
        assert_eq!(loaded.motd.as_deref(), Some("hello\nworld"));
        assert_eq!(loaded.settings.get_or("admin/name", "?"), "Ops");
    }
}
