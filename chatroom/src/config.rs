use std::{fs, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

/// Command line options for the chat server.
#[derive(Parser, Debug, Default)]
#[command(name = "chatroom", about = "Multi-room chat server with LLM replies")]
pub struct Cli {
    /// Override bind address (host:port).
    #[arg(long)]
    pub bind: Option<String>,
    /// Override server port.
    #[arg(long)]
    pub port: Option<u16>,
    /// Enable or disable logging (true/false).
    #[arg(long)]
    pub logging: Option<bool>,
    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Path to the SQLite database file.
    #[arg(long)]
    pub database: Option<PathBuf>,
}

/// Settings for the external chat-completion API.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletionConfig {
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key, read on every call.
    pub api_key_env: String,
    pub timeout: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout: Duration::from_secs(default_timeout_secs()),
        }
    }
}

/// Runtime configuration for the server resolved from file, env and CLI.
#[derive(Clone, Debug)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind: String,
    /// SQLite database location; `:memory:` for a throwaway database.
    pub database: PathBuf,
    /// Maximum upload size in megabytes.
    pub max_upload_mb: u64,
    /// Whether verbose logging is enabled.
    pub logging_enabled: bool,
    pub completion: CompletionConfig,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    logging: FileLogging,
    #[serde(default)]
    database: FileDatabase,
    #[serde(default)]
    completion: FileCompletion,
}

#[derive(Deserialize)]
struct FileServer {
    #[serde(default = "default_port")]
    port: u16,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

#[derive(Deserialize, Default)]
struct FileDatabase {
    path: Option<PathBuf>,
}

#[derive(Deserialize)]
struct FileCompletion {
    #[serde(default = "default_endpoint")]
    endpoint: String,
    #[serde(default = "default_model")]
    model: String,
    #[serde(default = "default_api_key_env")]
    api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

fn default_port() -> u16 {
    8080
}

fn default_logging() -> bool {
    true
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".into()
}

fn default_model() -> String {
    "gpt-4-vision-preview".into()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for FileServer {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_logging(),
        }
    }
}

impl Default for FileCompletion {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        // config file path precedence: CLI -> ENV -> default
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("CHATROOM_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/chatroom.toml"));

        let file_cfg = match fs::read(&config_path) {
            Ok(bytes) => {
                let contents = String::from_utf8_lossy(&bytes);
                toml::from_str::<FileConfig>(&contents).context("invalid config file")?
            }
            Err(_) => FileConfig::default(),
        };
        let mut port = file_cfg.server.port;
        let mut logging = file_cfg.logging.enabled;
        let mut database = file_cfg.database.path;

        // environment overrides
        if let Ok(p) = std::env::var("CHATROOM_PORT") {
            if let Ok(p) = p.parse::<u16>() {
                port = p;
            }
        }
        if let Ok(l) = std::env::var("CHATROOM_LOGGING") {
            if let Ok(l) = l.parse::<bool>() {
                logging = l;
            }
        }
        if let Ok(d) = std::env::var("CHATROOM_DATABASE") {
            database = Some(PathBuf::from(d));
        }

        // CLI overrides
        if let Some(p) = cli.port {
            port = p;
        }
        if let Some(l) = cli.logging {
            logging = l;
        }
        if let Some(d) = &cli.database {
            database = Some(d.clone());
        }

        // validate port range
        if !(1024..=65535).contains(&port) {
            anyhow::bail!("invalid_port");
        }

        // bind address precedence for host override
        let bind = if let Some(b) = &cli.bind {
            b.clone()
        } else if let Ok(b) = std::env::var("BIND") {
            b
        } else {
            format!("127.0.0.1:{}", port)
        };

        let database = database.unwrap_or_else(|| default_data_dir().join("chatroom.db"));
        let max_upload_mb = std::env::var("MAX_UPLOAD_MB")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        let completion = file_cfg.completion;
        url::Url::parse(&completion.endpoint).context("invalid completion endpoint")?;
        if completion.timeout_secs == 0 {
            anyhow::bail!("invalid_completion_timeout");
        }

        Ok(Self {
            bind,
            database,
            max_upload_mb,
            logging_enabled: logging,
            completion: CompletionConfig {
                endpoint: completion.endpoint,
                model: completion.model,
                api_key_env: completion.api_key_env,
                timeout: Duration::from_secs(completion.timeout_secs),
            },
        })
    }

    /// Helper to return the upload limit in bytes.
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

/// Determine the default data directory for the server.
pub fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("DATA_DIR") {
        PathBuf::from(dir)
    } else if let Ok(home) = std::env::var("HOME") {
        let mut p = PathBuf::from(home);
        p.push(".local/share/chatroom");
        p
    } else {
        PathBuf::from("./chatroom_data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    fn clear_env() {
        for key in [
            "CHATROOM_PORT",
            "CHATROOM_LOGGING",
            "CHATROOM_DATABASE",
            "CHATROOM_CONFIG",
            "BIND",
            "DATA_DIR",
            "MAX_UPLOAD_MB",
        ] {
            std::env::remove_var(key);
        }
    }

    fn load_with(contents: &str) -> Result<Config> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(&path, contents).unwrap();
        let cli = Cli {
            config: Some(path),
            ..Default::default()
        };
        Config::load(&cli)
    }

    #[test]
    #[serial]
    fn valid_config_parses() {
        clear_env();
        let cfg = load_with(
            "[server]\nport=5555\n[logging]\nenabled=false\n[database]\npath=\"/tmp/x.db\"\n",
        )
        .unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:5555");
        assert!(!cfg.logging_enabled);
        assert_eq!(cfg.database, PathBuf::from("/tmp/x.db"));
    }

    #[test]
    #[serial]
    fn invalid_port_fails() {
        clear_env();
        assert!(load_with("[server]\nport=80\n").is_err());
    }

    #[test]
    #[serial]
    fn missing_keys_defaults() {
        clear_env();
        let cfg = load_with("").unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:8080");
        assert!(cfg.logging_enabled);
        assert_eq!(cfg.completion, CompletionConfig::default());
        assert_eq!(cfg.completion.model, "gpt-4-vision-preview");
    }

    #[test]
    #[serial]
    fn precedence_cli_env_file() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(&path, "[server]\nport=1111\n").unwrap();
        std::env::set_var("CHATROOM_PORT", "2222");
        let cli = Cli {
            config: Some(path),
            port: Some(3333),
            ..Default::default()
        };
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:3333");
        std::env::remove_var("CHATROOM_PORT");
    }

    #[test]
    #[serial]
    fn completion_section_parses() {
        clear_env();
        let cfg = load_with(
            "[completion]\nendpoint=\"http://127.0.0.1:9000/v1/chat/completions\"\nmodel=\"gpt-4o\"\napi_key_env=\"MY_KEY\"\ntimeout_secs=5\n",
        )
        .unwrap();
        assert_eq!(cfg.completion.model, "gpt-4o");
        assert_eq!(cfg.completion.api_key_env, "MY_KEY");
        assert_eq!(cfg.completion.timeout, Duration::from_secs(5));
    }

    #[test]
    #[serial]
    fn bad_completion_endpoint_fails() {
        clear_env();
        assert!(load_with("[completion]\nendpoint=\"not a url\"\n").is_err());
        assert!(load_with("[completion]\ntimeout_secs=0\n").is_err());
    }

    #[test]
    #[serial]
    fn huge_upload_limit_saturates() {
        clear_env();
        std::env::set_var("MAX_UPLOAD_MB", u64::MAX.to_string());
        let cfg = load_with("").unwrap();
        assert_eq!(cfg.max_upload_mb, u64::MAX);
        assert_eq!(cfg.max_upload_bytes(), u64::MAX);
        std::env::remove_var("MAX_UPLOAD_MB");

        let cfg = load_with("").unwrap();
        assert_eq!(cfg.max_upload_bytes(), 5 * 1024 * 1024);
    }

    #[test]
    #[serial]
    fn database_env_and_cli_override() {
        clear_env();
        std::env::set_var("CHATROOM_DATABASE", "/tmp/env.db");
        let cfg = load_with("").unwrap();
        assert_eq!(cfg.database, PathBuf::from("/tmp/env.db"));
        let cli = Cli {
            config: Some(PathBuf::from("/nonexistent/chatroom.toml")),
            database: Some(PathBuf::from(":memory:")),
            ..Default::default()
        };
        let cfg = Config::load(&cli).unwrap();
        assert_eq!(cfg.database, PathBuf::from(":memory:"));
        std::env::remove_var("CHATROOM_DATABASE");
    }
}
