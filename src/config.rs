use crate::error::{Result, RotaError};
use crate::models::Proxy;
use crate::proxy::{ProbeConfig, RetrySettings, StrategyKind};
use crate::upstream::youtube::DEFAULT_BASE_URL;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Proxy list and retry tuning
    pub fetch: FetchConfig,
    /// Upstream configuration
    pub youtube: YoutubeConfig,
    /// Batch runner configuration
    pub batch: BatchConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Proxies from `FETCH_PROXIES` followed by those from `FETCH_PROXY_FILE`
    pub proxies: Vec<Proxy>,
    /// Retry strategy (sequential, racing)
    pub strategy: StrategyKind,
    /// Per-attempt timeout in seconds
    pub attempt_timeout: u64,
    /// Delay after a transient failure in milliseconds
    pub retry_delay_ms: u64,
    pub max_consecutive_failures: u32,
    pub max_racing_proxies: usize,
    /// Seconds added to the attempt timeout for a racing batch
    pub batch_margin: u64,
    pub max_batches: u32,
    /// Rate-limit cooldown in seconds
    pub rate_limit_cooldown: u64,
    /// Probe every proxy before the run
    pub probe_on_start: bool,
    pub probe_workers: usize,
}

#[derive(Debug, Clone)]
pub struct YoutubeConfig {
    pub base_url: String,
    /// Caption language code
    pub lang: String,
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Directory scanned for target URLs
    pub links_dir: PathBuf,
    /// Directory holding the result store
    pub output_dir: PathBuf,
    /// Seconds between items
    pub item_delay: u64,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut proxies = parse_proxy_list(&get_env_or("FETCH_PROXIES", ""))?;
        let proxy_file = get_env_or("FETCH_PROXY_FILE", "");
        if !proxy_file.trim().is_empty() {
            proxies.extend(load_proxy_file(Path::new(proxy_file.trim()))?);
        }

        Ok(Config {
            fetch: FetchConfig {
                proxies,
                strategy: StrategyKind::from_str(&get_env_or("FETCH_STRATEGY", "sequential")),
                attempt_timeout: parse_env("FETCH_ATTEMPT_TIMEOUT", 20)?,
                retry_delay_ms: parse_env("FETCH_RETRY_DELAY_MS", 1000)?,
                max_consecutive_failures: parse_env("FETCH_MAX_CONSECUTIVE_FAILURES", 3)?,
                max_racing_proxies: parse_env("FETCH_MAX_RACING_PROXIES", 10)?,
                batch_margin: parse_env("FETCH_BATCH_MARGIN", 10)?,
                max_batches: parse_env("FETCH_MAX_BATCHES", 30)?,
                rate_limit_cooldown: parse_env("FETCH_RATE_LIMIT_COOLDOWN", 600)?,
                probe_on_start: get_env_or("FETCH_PROBE_ON_START", "false")
                    .parse()
                    .unwrap_or(false),
                probe_workers: parse_env("FETCH_PROBE_WORKERS", 20)?,
            },
            youtube: YoutubeConfig {
                base_url: get_env_or("YOUTUBE_BASE_URL", DEFAULT_BASE_URL),
                lang: get_env_or("TRANSCRIPT_LANG", "en"),
            },
            batch: BatchConfig {
                links_dir: PathBuf::from(get_env_or("LINKS_DIR", "links")),
                output_dir: PathBuf::from(get_env_or("OUTPUT_DIR", "transcripts")),
                item_delay: parse_env("ITEM_DELAY", 2)?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }
}

impl FetchConfig {
    pub fn retry_settings(&self) -> RetrySettings {
        RetrySettings {
            attempt_timeout: self.attempt_timeout(),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            max_consecutive_failures: self.max_consecutive_failures.max(1),
            max_racing_proxies: self.max_racing_proxies.max(1),
            batch_margin: Duration::from_secs(self.batch_margin),
            max_batches: self.max_batches.max(1),
            ..Default::default()
        }
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout.max(1))
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown)
    }

    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            workers: self.probe_workers.max(1),
            timeout: self.attempt_timeout(),
            ..Default::default()
        }
    }
}

/// Parse a comma or whitespace separated list of proxy entries
pub fn parse_proxy_list(raw: &str) -> Result<Vec<Proxy>> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(Proxy::parse)
        .collect()
}

/// Proxy file contents: one account object, or a list mixing accounts and
/// plain entries
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProxyFile {
    List(Vec<ProxyFileItem>),
    Account(ProxyAccount),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProxyFileItem {
    Entry(String),
    Account(ProxyAccount),
}

/// Shared credentials for a list of `[ip, port]` pairs
#[derive(Debug, Deserialize)]
struct ProxyAccount {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    proxies: Vec<(String, PortValue)>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u16),
    Text(String),
}

impl PortValue {
    fn port(&self) -> Result<u16> {
        match self {
            PortValue::Number(port) => Ok(*port),
            PortValue::Text(text) => text.trim().parse().map_err(|_| {
                RotaError::InvalidProxyAddress(format!("invalid port: {}", text))
            }),
        }
    }
}

impl ProxyAccount {
    fn into_proxies(self) -> Result<Vec<Proxy>> {
        let (Some(username), Some(password)) = (self.username, self.password) else {
            warn!("Skipping proxy account without credentials");
            return Ok(Vec::new());
        };
        if username.is_empty() || password.is_empty() || self.proxies.is_empty() {
            warn!("Skipping incomplete proxy account for {}", username);
            return Ok(Vec::new());
        }

        self.proxies
            .iter()
            .map(|(host, port)| {
                Ok(Proxy::new(host.trim(), port.port()?)
                    .with_credentials(username.clone(), password.clone()))
            })
            .collect()
    }
}

/// Load proxies from a JSON file
pub fn load_proxy_file(path: &Path) -> Result<Vec<Proxy>> {
    let raw = std::fs::read_to_string(path)?;
    parse_proxy_file(&raw)
}

fn parse_proxy_file(raw: &str) -> Result<Vec<Proxy>> {
    let file: ProxyFile = serde_json::from_str(raw)?;
    let items = match file {
        ProxyFile::List(items) => items,
        ProxyFile::Account(account) => vec![ProxyFileItem::Account(account)],
    };

    let mut proxies = Vec::new();
    for item in items {
        match item {
            ProxyFileItem::Entry(entry) => proxies.push(Proxy::parse(&entry)?),
            ProxyFileItem::Account(account) => proxies.extend(account.into_proxies()?),
        }
    }
    Ok(proxies)
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse a numeric environment variable, falling back to `default` when unset
fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| RotaError::InvalidConfig(format!("{} must be a valid number", key))),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProxyProtocol;
    use std::env;
    use std::io::Write;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const CONFIG_ENV_KEYS: &[&str] = &[
        "FETCH_PROXIES",
        "FETCH_PROXY_FILE",
        "FETCH_STRATEGY",
        "FETCH_ATTEMPT_TIMEOUT",
        "FETCH_RETRY_DELAY_MS",
        "FETCH_MAX_CONSECUTIVE_FAILURES",
        "FETCH_MAX_RACING_PROXIES",
        "FETCH_BATCH_MARGIN",
        "FETCH_MAX_BATCHES",
        "FETCH_RATE_LIMIT_COOLDOWN",
        "FETCH_PROBE_ON_START",
        "FETCH_PROBE_WORKERS",
        "YOUTUBE_BASE_URL",
        "TRANSCRIPT_LANG",
        "LINKS_DIR",
        "OUTPUT_DIR",
        "ITEM_DELAY",
        "LOG_LEVEL",
        "LOG_FORMAT",
    ];

    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(keys: &[&str]) -> Self {
            let saved = keys
                .iter()
                .map(|&key| {
                    let old = env::var(key).ok();
                    env::remove_var(key);
                    (key.to_string(), old)
                })
                .collect();

            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        let config = Config::from_env().unwrap();

        assert!(config.fetch.proxies.is_empty());
        assert_eq!(config.fetch.strategy, StrategyKind::Sequential);
        assert_eq!(config.fetch.attempt_timeout, 20);
        assert_eq!(config.fetch.rate_limit_cooldown, 600);
        assert!(!config.fetch.probe_on_start);

        let settings = config.fetch.retry_settings();
        assert_eq!(settings.attempt_timeout, Duration::from_secs(20));
        assert_eq!(settings.retry_delay, Duration::from_secs(1));
        assert_eq!(settings.batch_timeout(), Duration::from_secs(30));
        assert_eq!(settings.max_batches, 30);

        assert_eq!(config.youtube.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.youtube.lang, "en");
        assert_eq!(config.batch.links_dir, PathBuf::from("links"));
        assert_eq!(config.batch.output_dir, PathBuf::from("transcripts"));
        assert_eq!(config.batch.item_delay, 2);
        assert_eq!(config.log.format, "pretty");
    }

    #[test]
    fn test_config_from_env_overrides() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var(
            "FETCH_PROXIES",
            "10.0.0.1:3128, socks5://u:p@10.0.0.2:1080\n10.0.0.3",
        );
        env::set_var("FETCH_STRATEGY", "racing");
        env::set_var("FETCH_ATTEMPT_TIMEOUT", "5");
        env::set_var("FETCH_MAX_RACING_PROXIES", "4");
        env::set_var("FETCH_PROBE_ON_START", "true");
        env::set_var("TRANSCRIPT_LANG", "de");
        env::set_var("OUTPUT_DIR", "/tmp/out");

        let config = Config::from_env().unwrap();

        let proxies = &config.fetch.proxies;
        assert_eq!(proxies.len(), 3);
        assert_eq!(proxies[0].address(), "10.0.0.1:3128");
        assert_eq!(proxies[1].protocol(), ProxyProtocol::Socks5);
        assert_eq!(proxies[2].port(), 8080);

        assert_eq!(config.fetch.strategy, StrategyKind::Racing);
        assert_eq!(
            config.fetch.retry_settings().batch_timeout(),
            Duration::from_secs(15)
        );
        assert_eq!(config.fetch.retry_settings().max_racing_proxies, 4);
        assert!(config.fetch.probe_on_start);
        assert_eq!(config.fetch.probe_config().timeout, Duration::from_secs(5));
        assert_eq!(config.youtube.lang, "de");
        assert_eq!(config.batch.output_dir, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn test_config_from_env_invalid_number() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("FETCH_ATTEMPT_TIMEOUT", "soon");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, RotaError::InvalidConfig(_)));
    }

    #[test]
    fn test_config_from_env_unsupported_scheme() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        env::set_var("FETCH_PROXIES", "ftp://10.0.0.1:21");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, RotaError::UnsupportedProtocol(_)));
    }

    #[test]
    fn test_config_from_env_appends_proxy_file() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _guard = EnvGuard::new(CONFIG_ENV_KEYS);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"["10.0.0.9:8000"]"#).unwrap();

        env::set_var("FETCH_PROXIES", "10.0.0.1:3128");
        env::set_var("FETCH_PROXY_FILE", file.path());

        let config = Config::from_env().unwrap();
        let addresses: Vec<String> = config.fetch.proxies.iter().map(|p| p.address()).collect();
        assert_eq!(addresses, vec!["10.0.0.1:3128", "10.0.0.9:8000"]);
    }

    #[test]
    fn test_parse_proxy_file_accounts() {
        let raw = r#"[
            {"username": "alice", "password": "s3cret", "proxies": [["10.0.0.1", 8000], ["10.0.0.2", "8001"]]},
            {"username": "", "password": "x", "proxies": [["10.0.0.3", 8000]]},
            "http://10.0.0.4:3128"
        ]"#;

        let proxies = parse_proxy_file(raw).unwrap();
        assert_eq!(proxies.len(), 3);
        assert_eq!(proxies[0].credentials().unwrap().username, "alice");
        assert_eq!(proxies[1].port(), 8001);
        assert!(proxies[2].credentials().is_none());
    }

    #[test]
    fn test_parse_proxy_file_single_account() {
        let raw = r#"{"username": "bob", "password": "pw", "proxies": [["10.1.1.1", 9000]]}"#;
        let proxies = parse_proxy_file(raw).unwrap();
        assert_eq!(proxies.len(), 1);
        assert_eq!(proxies[0].url(), "http://bob:pw@10.1.1.1:9000");
    }

    #[test]
    fn test_parse_proxy_file_rejects_bad_port() {
        let raw = r#"[{"username": "u", "password": "p", "proxies": [["10.0.0.1", "http"]]}]"#;
        assert!(matches!(
            parse_proxy_file(raw),
            Err(RotaError::InvalidProxyAddress(_))
        ));
        assert!(matches!(parse_proxy_file("{not json"), Err(RotaError::Json(_))));
    }
}
