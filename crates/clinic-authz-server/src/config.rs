use std::{net::SocketAddr, time::Duration};

use clinic_authz::AuthzConfig;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Clinic membership service used to resolve clinician roles
    #[serde(default)]
    pub membership: MembershipConfig,
    /// Rule source and evaluation limits
    #[serde(default)]
    pub authz: AuthzConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        if let Some(base_url) = &self.membership.base_url {
            let url = Url::parse(base_url)
                .map_err(|e| format!("membership.base_url is not a valid URL: {e}"))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err("membership.base_url must use http or https".into());
            }
        }
        if self.membership.request_timeout.is_zero() {
            return Err("membership.request_timeout must be > 0".into());
        }
        self.authz
            .validate()
            .map_err(|e| format!("authz config error: {e}"))?;
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipConfig {
    /// Base URL of the membership service.
    /// When unset, lookups go to an empty in-memory table and every
    /// role-based rule denies.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Per-request timeout on the HTTP client
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}
fn default_request_timeout() -> Duration {
    Duration::from_millis(1500)
}
impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout: default_request_timeout(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Default configuration file looked up in the working directory.
    pub const DEFAULT_CONFIG_FILE: &str = "clinic-authz.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., CLINIC_AUTHZ__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("CLINIC_AUTHZ")
                .prefix_separator("__")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
