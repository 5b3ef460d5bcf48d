//! Descriptor and top-level configuration loading.
//!
//! Both file formats are INI. Parsing itself sits at the boundary of this
//! crate's concerns (the supervisor just needs a `TunnelDescriptor` /
//! `TopLevelConfig` in hand), so we lean entirely on the `config` crate's
//! `FileFormat::Ini` support rather than hand-rolling a parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config as RawConfig, File, FileFormat, Value};
use serde::Deserialize;

use crate::error::{StunError, StunResult};

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_SERVER_PORT_TO_FORWARD: u16 = 4000;
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 30;
pub const DESCRIPTOR_SUFFIX: &str = ".ini";

/// One tunnel descriptor, immutable once constructed.
#[derive(Debug, Clone)]
pub struct TunnelDescriptor {
    pub name: String,
    pub server_host: String,
    pub server_port: u16,
    /// Known-hosts-style file containing the rendezvous server's expected
    /// public key. `None` means connect must fail on an unknown host key
    /// (no trust-on-first-use).
    pub server_key: Option<PathBuf>,
    pub username: String,
    pub client_key_path: PathBuf,
    pub server_port_to_forward: u16,
    pub local_host: String,
    pub local_port: u16,
    pub keep_alive_interval: Duration,
    pub log_level: String,
    pub log_to_console: bool,
    pub log_path: Option<PathBuf>,
    /// Absolute path of the descriptor file this was loaded from.
    pub source_path: PathBuf,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawDescriptor {
    server_host: Option<String>,
    server_port: Option<u16>,
    port: Option<u16>,
    server_key: Option<String>,
    username: Option<String>,
    keyfile: Option<String>,
    remote_host: Option<String>,
    remote_port: Option<u16>,
    connector_name: Option<String>,
    tunnel_name: Option<String>,
    keep_alive_time: Option<u64>,
    log_level: Option<String>,
    log_to_console: Option<bool>,
    log_path: Option<String>,
}

fn resolve_relative(directory: &Path, value: &str) -> PathBuf {
    let candidate = Path::new(value);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        directory.join(candidate)
    }
}

impl TunnelDescriptor {
    /// Load and validate one descriptor file. Section header may be either
    /// `[connector]` (preferred) or the legacy `[tunnel]` alias.
    pub fn from_ini_file(path: &Path) -> StunResult<Self> {
        let path = path
            .canonicalize()
            .map_err(|e| StunError::Config(format!("cannot resolve {}: {e}", path.display())))?;

        let raw = RawConfig::builder()
            .add_source(File::from(path.clone()).format(FileFormat::Ini))
            .build()?;

        let section = raw
            .get_table("connector")
            .or_else(|_| raw.get_table("tunnel"))
            .map_err(|_| {
                StunError::Config(format!(
                    "{} has neither a [connector] nor a [tunnel] section",
                    path.display()
                ))
            })?;

        let descriptor: RawDescriptor = Value::from(section)
            .try_deserialize()
            .map_err(|e| StunError::Config(format!("{}: {e}", path.display())))?;

        let directory = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let server_host = descriptor
            .server_host
            .ok_or_else(|| StunError::Config(format!("{}: missing server_host", path.display())))?;

        let username = descriptor
            .username
            .ok_or_else(|| StunError::Config(format!("{}: missing username", path.display())))?;

        let keyfile = descriptor
            .keyfile
            .ok_or_else(|| StunError::Config(format!("{}: missing keyfile", path.display())))?;
        let client_key_path = resolve_relative(&directory, &keyfile);
        if !client_key_path.is_file() {
            return Err(StunError::Config(format!(
                "{}: client_key_path {} does not exist or is not readable",
                path.display(),
                client_key_path.display()
            )));
        }

        let remote_host = descriptor
            .remote_host
            .ok_or_else(|| StunError::Config(format!("{}: missing remote_host", path.display())))?;

        let server_key = descriptor
            .server_key
            .map(|s| resolve_relative(&directory, &s));

        let name = descriptor
            .connector_name
            .or(descriptor.tunnel_name)
            .unwrap_or_else(|| path.display().to_string());

        Ok(TunnelDescriptor {
            name,
            server_host,
            server_port: descriptor.server_port.unwrap_or(DEFAULT_SSH_PORT),
            server_key,
            username,
            client_key_path,
            server_port_to_forward: descriptor.port.unwrap_or(DEFAULT_SERVER_PORT_TO_FORWARD),
            local_host: remote_host,
            local_port: descriptor.remote_port.unwrap_or(DEFAULT_SSH_PORT),
            keep_alive_interval: Duration::from_secs(
                descriptor.keep_alive_time.unwrap_or(DEFAULT_KEEP_ALIVE_SECS),
            ),
            log_level: descriptor.log_level.unwrap_or_else(|| "info".to_string()),
            log_to_console: descriptor.log_to_console.unwrap_or(false),
            log_path: descriptor.log_path.map(PathBuf::from),
            source_path: path,
        })
    }

    /// Enumerate descriptor files (those ending in `.ini`) directly under `dir`.
    pub fn discover(dir: &Path) -> StunResult<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|e| StunError::Config(format!("cannot read {}: {e}", dir.display())))?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "ini"))
            .collect();
        files.sort();
        Ok(files)
    }
}

/// SMTP security policy for the `[pytun]` alert configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpSecurity {
    None,
    Tls,
    Ssl,
}

impl std::str::FromStr for SmtpSecurity {
    type Err = StunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(SmtpSecurity::None),
            "tls" => Ok(SmtpSecurity::Tls),
            "ssl" => Ok(SmtpSecurity::Ssl),
            other => Err(StunError::Config(format!(
                "security can only be none, tls or ssl but {other} was received"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SmtpAlertConfig {
    pub host: String,
    pub port: u16,
    pub login: String,
    pub password: String,
    pub to: String,
    pub from: Option<String>,
    pub security: Option<SmtpSecurity>,
}

#[derive(Debug, Clone, Default)]
pub struct HttpAlertConfig {
    pub url: String,
    pub user: String,
    pub password: String,
}

/// The `[pytun]` top-level configuration section.
#[derive(Debug, Clone)]
pub struct TopLevelConfig {
    pub tunnel_manager_id: String,
    pub tunnel_dirs: PathBuf,
    pub log_path: PathBuf,
    pub log_level: String,
    pub log_to_console: bool,
    pub inspection_port: u16,
    pub inspection_localhost_only: bool,
    pub mac_address_signature: Option<String>,
    pub smtp: Option<SmtpAlertConfig>,
    pub http: Option<HttpAlertConfig>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawTopLevel {
    tunnel_manager_id: Option<String>,
    tunnel_dirs: Option<String>,
    log_path: Option<String>,
    log_level: Option<String>,
    log_to_console: Option<bool>,
    inspection_port: Option<u16>,
    inspection_localhost_only: Option<bool>,
    mac_address_signature: Option<String>,
    smtp_hostname: Option<String>,
    smtp_port: Option<u16>,
    smtp_login: Option<String>,
    smtp_password: Option<String>,
    smtp_to: Option<String>,
    smtp_from: Option<String>,
    smtp_security: Option<String>,
    http_url: Option<String>,
    http_user: Option<String>,
    http_password: Option<String>,
}

impl TopLevelConfig {
    pub fn from_ini_file(path: &Path) -> StunResult<Self> {
        let raw = RawConfig::builder()
            .add_source(File::from(path).format(FileFormat::Ini))
            .build()?;

        let section = raw.get_table("pytun").map_err(|_| {
            StunError::Config(format!("{} has no [pytun] section", path.display()))
        })?;

        let top: RawTopLevel = Value::from(section)
            .try_deserialize()
            .map_err(|e| StunError::Config(format!("{}: {e}", path.display())))?;

        let tunnel_manager_id = top
            .tunnel_manager_id
            .ok_or_else(|| StunError::Config("tunnel_manager_id is required".to_string()))?;

        let smtp = top.smtp_hostname.as_ref().map(|host| {
            let security = top
                .smtp_security
                .as_deref()
                .map(str::parse)
                .transpose()
                .unwrap_or(None);
            SmtpAlertConfig {
                host: host.clone(),
                port: top.smtp_port.unwrap_or(25),
                login: top.smtp_login.clone().unwrap_or_default(),
                password: top.smtp_password.clone().unwrap_or_default(),
                to: top.smtp_to.clone().unwrap_or_default(),
                from: top.smtp_from.clone(),
                security,
            }
        });

        let http = top.http_url.as_ref().map(|url| HttpAlertConfig {
            url: url.clone(),
            user: top.http_user.clone().unwrap_or_default(),
            password: top.http_password.clone().unwrap_or_default(),
        });

        Ok(TopLevelConfig {
            tunnel_manager_id,
            tunnel_dirs: PathBuf::from(top.tunnel_dirs.unwrap_or_else(|| "configs".to_string())),
            log_path: PathBuf::from(top.log_path.unwrap_or_else(|| "./logs".to_string())),
            log_level: top.log_level.unwrap_or_else(|| "info".to_string()),
            log_to_console: top.log_to_console.unwrap_or(false),
            inspection_port: top.inspection_port.unwrap_or(8080),
            inspection_localhost_only: top.inspection_localhost_only.unwrap_or(true),
            mac_address_signature: top.mac_address_signature,
            smtp,
            http,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn missing_keyfile_is_a_config_error() {
        let descriptor = write_tmp(
            "[connector]\nserver_host = example.com\nusername = bob\nremote_host = 127.0.0.1\n",
        );
        let err = TunnelDescriptor::from_ini_file(descriptor.path()).unwrap_err();
        assert!(matches!(err, StunError::Config(_)));
    }

    #[test]
    fn accepts_tunnel_section_alias_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("id_rsa");
        std::fs::write(&key_path, "fake key material").unwrap();

        let ini_path = dir.path().join("my.ini");
        std::fs::write(
            &ini_path,
            format!(
                "[tunnel]\nserver_host = example.com\nusername = bob\nkeyfile = {}\nremote_host = 127.0.0.1\nport = 5000\n",
                key_path.display()
            ),
        )
        .unwrap();

        let descriptor = TunnelDescriptor::from_ini_file(&ini_path).unwrap();
        assert_eq!(descriptor.server_port, DEFAULT_SSH_PORT);
        assert_eq!(descriptor.server_port_to_forward, 5000);
        assert_eq!(descriptor.local_port, DEFAULT_SSH_PORT);
        assert_eq!(descriptor.keep_alive_interval, Duration::from_secs(30));
        assert_eq!(
            descriptor.name,
            ini_path.canonicalize().unwrap().display().to_string()
        );
    }

    #[test]
    fn connector_name_overrides_path_default() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("id_rsa");
        std::fs::write(&key_path, "fake key material").unwrap();

        let ini_path = dir.path().join("my.ini");
        std::fs::write(
            &ini_path,
            format!(
                "[connector]\nconnector_name = prod-db\nserver_host = example.com\nusername = bob\nkeyfile = {}\nremote_host = 127.0.0.1\n",
                key_path.display()
            ),
        )
        .unwrap();

        let descriptor = TunnelDescriptor::from_ini_file(&ini_path).unwrap();
        assert_eq!(descriptor.name, "prod-db");
    }

    #[test]
    fn smtp_security_parses_known_values_only() {
        assert_eq!("none".parse::<SmtpSecurity>().unwrap(), SmtpSecurity::None);
        assert_eq!("tls".parse::<SmtpSecurity>().unwrap(), SmtpSecurity::Tls);
        assert_eq!("ssl".parse::<SmtpSecurity>().unwrap(), SmtpSecurity::Ssl);
        assert!("starttls".parse::<SmtpSecurity>().is_err());
    }

    #[test]
    fn top_level_requires_tunnel_manager_id() {
        let cfg = write_tmp("[pytun]\ntunnel_dirs = configs\n");
        let err = TopLevelConfig::from_ini_file(cfg.path()).unwrap_err();
        assert!(matches!(err, StunError::Config(_)));
    }

    #[test]
    fn top_level_loads_smtp_block() {
        let cfg = write_tmp(
            "[pytun]\ntunnel_manager_id = fleet-1\nsmtp_hostname = mail.example.com\nsmtp_login = a@example.com\nsmtp_password = secret\nsmtp_to = ops@example.com\nsmtp_security = tls\n",
        );
        let top = TopLevelConfig::from_ini_file(cfg.path()).unwrap();
        let smtp = top.smtp.unwrap();
        assert_eq!(smtp.host, "mail.example.com");
        assert_eq!(smtp.security, Some(SmtpSecurity::Tls));
    }
}
