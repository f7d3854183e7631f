use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::Path};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub solar: EndpointConfig,
    /// Absent disables the meter pipeline.
    #[serde(default)]
    pub meter: Option<EndpointConfig>,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub database: DbConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Full connection URL; takes precedence over the individual fields.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default = "default_db_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_db_name")]
    pub name: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    /// Create missing tables before the cycle runs.
    #[serde(default)]
    pub ensure_schema: bool,
    /// Turn readings tables into TimescaleDB hypertables (with `ensure_schema`).
    #[serde(default)]
    pub timescale: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: default_db_host(),
            port: default_db_port(),
            user: default_db_user(),
            password: String::new(),
            name: default_db_name(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            ensure_schema: false,
            timescale: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_db_host() -> String {
    "localhost".into()
}
fn default_db_port() -> u16 {
    5432
}
fn default_db_user() -> String {
    "solar_user".into()
}
fn default_db_name() -> String {
    "solar_inverter".into()
}
fn default_max_connections() -> u32 {
    2
}
fn default_acquire_timeout_secs() -> u64 {
    10
}

impl Config {
    /// Load YAML from disk, substitute $(VAR)/${VAR} with env vars, then parse.
    /// Environment variables (see [`Config::apply_env`]), including those from
    /// a `.env` file, override the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        use anyhow::Context;

        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let expanded = expand_env_placeholders(&raw)?;
        let mut cfg: Self = serde_yaml::from_str(&expanded)?;
        dotenvy::dotenv().ok();
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build the configuration from environment variables only, reading a
    /// `.env` file first when one exists.
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let mut cfg = Self {
            solar: EndpointConfig { url: String::new() },
            meter: None,
            http: HttpConfig::default(),
            database: DbConfig::default(),
            log_level: default_log_level(),
        };
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Overlay the collector's environment variables. Empty values are ignored.
    fn apply_env(&mut self) {
        if let Some(url) = env_value("SOLAR_XML_ENDPOINT") {
            self.solar.url = url;
        }
        if let Some(url) = env_value("P1_ENDPOINT") {
            self.meter = Some(EndpointConfig { url });
        }
        if let Some(secs) = env_value("REQUEST_TIMEOUT").and_then(|s| s.parse().ok()) {
            self.http.timeout_secs = secs;
        }
        if let Some(url) = env_value("DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(host) = env_value("DB_HOST") {
            self.database.host = host;
        }
        if let Some(port) = env_value("DB_PORT").and_then(|s| s.parse().ok()) {
            self.database.port = port;
        }
        if let Some(user) = env_value("DB_USER") {
            self.database.user = user;
        }
        if let Some(password) = env_value("DB_PASSWORD") {
            self.database.password = password;
        }
        if let Some(name) = env_value("DB_NAME") {
            self.database.name = name;
        }
        if let Some(level) = env_value("LOG_LEVEL") {
            self.log_level = level;
        }
    }

    fn validate(&mut self) -> Result<(), anyhow::Error> {
        anyhow::ensure!(
            !self.solar.url.trim().is_empty(),
            "solar endpoint URL is required (solar.url or SOLAR_XML_ENDPOINT)"
        );
        check_http_url("solar.url", &self.solar.url)?;

        // A blank meter URL in the file means "no meter", same as leaving it out.
        if self
            .meter
            .as_ref()
            .is_some_and(|m| m.url.trim().is_empty())
        {
            self.meter = None;
        }
        if let Some(meter) = &self.meter {
            check_http_url("meter.url", &meter.url)?;
        }

        anyhow::ensure!(
            self.http.timeout_secs > 0,
            "http.timeout_secs must be greater than zero"
        );
        anyhow::ensure!(
            self.database.max_connections > 0,
            "database.max_connections must be greater than zero"
        );
        Ok(())
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn check_http_url(field: &str, raw: &str) -> Result<(), anyhow::Error> {
    let url = reqwest::Url::parse(raw.trim())
        .map_err(|e| anyhow::anyhow!("{} is not a valid URL ({}): {}", field, raw, e))?;
    anyhow::ensure!(
        url.scheme() == "http" || url.scheme() == "https",
        "{} must use http or https, got {}",
        field,
        url.scheme()
    );
    Ok(())
}

/// Expand $(VAR) and ${VAR} placeholders using environment variables.
/// "$$" becomes a literal "$" (escape); any other "$" is kept as-is.
fn expand_env_placeholders(input: &str) -> Result<String, anyhow::Error> {
    use anyhow::Context;

    let mut out = String::with_capacity(input.len());
    let mut it = input.chars().peekable();

    while let Some(c) = it.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let close = match it.peek().copied() {
            Some('$') => {
                it.next();
                out.push('$');
                continue;
            }
            Some('(') => ')',
            Some('{') => '}',
            _ => {
                out.push('$');
                continue;
            }
        };
        it.next();
        let var = read_until(&mut it, close)
            .with_context(|| format!("unterminated env placeholder: missing '{}'", close))?;
        let val = std::env::var(&var)
            .with_context(|| format!("missing environment variable: {}", var))?;
        out.push_str(&val);
    }

    Ok(out)
}

/// Read characters until `end`, consuming the delimiter.
fn read_until<I>(it: &mut std::iter::Peekable<I>, end: char) -> Option<String>
where
    I: Iterator<Item = char>,
{
    let mut buf = String::new();
    for ch in it.by_ref() {
        if ch == end {
            return Some(buf);
        }
        buf.push(ch);
    }
    None
}
