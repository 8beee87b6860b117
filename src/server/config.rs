use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::dns::cloudflare::DEFAULT_API_BASE;
use crate::dns::provider::ProviderTimeouts;
use crate::passthrough::PassthroughSettings;

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub listen_addr: String,
    pub log_dir: String,
    pub credential_key: String,

    pub rotation_sweep_seconds: u64,
    pub health_freshness_seconds: u64,

    pub dns_validation_timeout_seconds: u64,
    pub dns_list_timeout_seconds: u64,
    pub dns_bootstrap_timeout_seconds: u64,
    pub directory_timeout_seconds: u64,
    pub cloudflare_api_base: String,

    pub passthrough_config_path: String,
    pub passthrough_reload_command: String,
    pub passthrough_tls_listen_port: u16,
    pub passthrough_http_listen_port: u16,
    pub passthrough_reject_port: u16,
    pub job_step_timeout_seconds: u64,
    pub apply_wait_cap_seconds: u64,

    pub auto_create_schema: bool,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
pub struct PartialServerConfig {
    database_url: Option<String>,
    listen_addr: Option<String>,
    log_dir: Option<String>,
    credential_key: Option<String>,
    rotation_sweep_seconds: Option<u64>,
    health_freshness_seconds: Option<u64>,
    dns_validation_timeout_seconds: Option<u64>,
    dns_list_timeout_seconds: Option<u64>,
    dns_bootstrap_timeout_seconds: Option<u64>,
    directory_timeout_seconds: Option<u64>,
    cloudflare_api_base: Option<String>,
    passthrough_config_path: Option<String>,
    passthrough_reload_command: Option<String>,
    passthrough_tls_listen_port: Option<u16>,
    passthrough_http_listen_port: Option<u16>,
    passthrough_reject_port: Option<u16>,
    job_step_timeout_seconds: Option<u64>,
    apply_wait_cap_seconds: Option<u64>,
    auto_create_schema: Option<bool>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_credential_key() -> String {
    // This key is for development convenience.
    // It's crucial to override this in production via environment variables.
    "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f".to_string()
}

fn default_passthrough_config_path() -> String {
    "/etc/nginx/stream.d/nodenexus-passthrough.conf".to_string()
}

fn default_passthrough_reload_command() -> String {
    "nginx -t && nginx -s reload".to_string()
}

impl ServerConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, String> {
        dotenv::dotenv().ok();

        // 1. Load from file (optional)
        let file_config = match config_path {
            Some(path_str) => Self::read_file_layer(Path::new(path_str))?,
            None => PartialServerConfig::default(),
        };

        // 2. Load from environment variables
        let env_config: PartialServerConfig = envy::from_env::<PartialServerConfig>()
            .map_err(|e| format!("Failed to load config from environment: {e}"))?;

        // 3. Merge: environment overrides file
        Self::merge(env_config, file_config)
    }

    /// A missing file is an empty layer.
    pub fn read_file_layer(path: &Path) -> Result<PartialServerConfig, String> {
        if !path.exists() {
            return Ok(PartialServerConfig::default());
        }
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file at {path:?}: {e}"))?;
        toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse TOML from config file at {path:?}: {e}"))
    }

    pub fn merge(env: PartialServerConfig, file: PartialServerConfig) -> Result<Self, String> {
        let config = ServerConfig {
            database_url: env
                .database_url
                .or(file.database_url)
                .ok_or("DATABASE_URL is required")?,
            listen_addr: env
                .listen_addr
                .or(file.listen_addr)
                .unwrap_or_else(default_listen_addr),
            log_dir: env.log_dir.or(file.log_dir).unwrap_or_else(default_log_dir),
            credential_key: env
                .credential_key
                .or(file.credential_key)
                .unwrap_or_else(default_credential_key),
            rotation_sweep_seconds: env
                .rotation_sweep_seconds
                .or(file.rotation_sweep_seconds)
                .unwrap_or(60),
            health_freshness_seconds: env
                .health_freshness_seconds
                .or(file.health_freshness_seconds)
                .unwrap_or(300),
            dns_validation_timeout_seconds: env
                .dns_validation_timeout_seconds
                .or(file.dns_validation_timeout_seconds)
                .unwrap_or(10),
            dns_list_timeout_seconds: env
                .dns_list_timeout_seconds
                .or(file.dns_list_timeout_seconds)
                .unwrap_or(30),
            dns_bootstrap_timeout_seconds: env
                .dns_bootstrap_timeout_seconds
                .or(file.dns_bootstrap_timeout_seconds)
                .unwrap_or(60),
            directory_timeout_seconds: env
                .directory_timeout_seconds
                .or(file.directory_timeout_seconds)
                .unwrap_or(5),
            cloudflare_api_base: env
                .cloudflare_api_base
                .or(file.cloudflare_api_base)
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            passthrough_config_path: env
                .passthrough_config_path
                .or(file.passthrough_config_path)
                .unwrap_or_else(default_passthrough_config_path),
            passthrough_reload_command: env
                .passthrough_reload_command
                .or(file.passthrough_reload_command)
                .unwrap_or_else(default_passthrough_reload_command),
            passthrough_tls_listen_port: env
                .passthrough_tls_listen_port
                .or(file.passthrough_tls_listen_port)
                .unwrap_or(443),
            passthrough_http_listen_port: env
                .passthrough_http_listen_port
                .or(file.passthrough_http_listen_port)
                .unwrap_or(80),
            passthrough_reject_port: env
                .passthrough_reject_port
                .or(file.passthrough_reject_port)
                .unwrap_or(9443),
            job_step_timeout_seconds: env
                .job_step_timeout_seconds
                .or(file.job_step_timeout_seconds)
                .unwrap_or(120),
            apply_wait_cap_seconds: env
                .apply_wait_cap_seconds
                .or(file.apply_wait_cap_seconds)
                .unwrap_or(60),
            auto_create_schema: env
                .auto_create_schema
                .or(file.auto_create_schema)
                .unwrap_or(false),
        };

        if config.rotation_sweep_seconds == 0 {
            return Err("ROTATION_SWEEP_SECONDS must be greater than zero".to_string());
        }
        Ok(config)
    }

    pub fn provider_timeouts(&self) -> ProviderTimeouts {
        ProviderTimeouts {
            validation: Duration::from_secs(self.dns_validation_timeout_seconds),
            list: Duration::from_secs(self.dns_list_timeout_seconds),
            bootstrap: Duration::from_secs(self.dns_bootstrap_timeout_seconds),
        }
    }

    pub fn passthrough_settings(&self) -> PassthroughSettings {
        PassthroughSettings {
            tls_listen_port: self.passthrough_tls_listen_port,
            http_listen_port: self.passthrough_http_listen_port,
            reject_port: self.passthrough_reject_port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_apply_when_only_database_url_is_set() {
        let env = PartialServerConfig {
            database_url: Some("postgres://localhost/nodenexus".into()),
            ..Default::default()
        };
        let config = ServerConfig::merge(env, PartialServerConfig::default()).unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.rotation_sweep_seconds, 60);
        assert_eq!(config.health_freshness_seconds, 300);
        assert_eq!(config.passthrough_reject_port, 9443);
        assert_eq!(config.cloudflare_api_base, DEFAULT_API_BASE);
        assert!(!config.auto_create_schema);
    }

    #[test]
    fn test_database_url_is_required() {
        let err = ServerConfig::merge(PartialServerConfig::default(), PartialServerConfig::default())
            .unwrap_err();
        assert!(err.contains("DATABASE_URL"));
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "database_url = \"sqlite::memory:\"\nlisten_addr = \"127.0.0.1:9000\"\nrotation_sweep_seconds = 15"
        )
        .unwrap();

        let file_layer = ServerConfig::read_file_layer(file.path()).unwrap();
        let env_layer = PartialServerConfig {
            rotation_sweep_seconds: Some(30),
            ..Default::default()
        };
        let config = ServerConfig::merge(env_layer, file_layer).unwrap();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.rotation_sweep_seconds, 30);
    }

    #[test]
    fn test_missing_file_is_an_empty_layer() {
        let dir = tempfile::tempdir().unwrap();
        let layer = ServerConfig::read_file_layer(&dir.path().join("absent.toml")).unwrap();
        assert!(layer.database_url.is_none());
    }

    #[test]
    fn test_malformed_file_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "listen_addr = ").unwrap();
        assert!(ServerConfig::read_file_layer(file.path()).is_err());
    }
}
