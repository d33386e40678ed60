use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SCAN_COUNT: usize = 100;
pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// Connection settings for a single Redis node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RedisConfigDef")]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl: bool,
    pub ssl_certfile: Option<String>,
    pub ssl_keyfile: Option<String>,
    pub ssl_ca_certs: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_REDIS_PORT,
            db: 0,
            username: None,
            password: None,
            ssl: false,
            ssl_certfile: None,
            ssl_keyfile: None,
            ssl_ca_certs: None,
        }
    }
}

impl RedisConfig {
    pub fn new(host: impl Into<String>, port: u16, db: i64) -> Self {
        Self {
            host: host.into(),
            port,
            db,
            ..Default::default()
        }
    }

    /// Parses `host:port[,db=N][,username=..][,password=..][,ssl=true][,ssl_certfile=..][,ssl_keyfile=..][,ssl_ca_certs=..]`.
    pub fn from_connection_string(connection_string: &str) -> Result<Self> {
        let mut result = RedisConfig::default();
        let mut host_seen = false;
        for (i, part) in connection_string.split(',').map(str::trim).enumerate() {
            if part.matches(':').count() == 1 && !part.contains('=') {
                if host_seen {
                    return Err(anyhow!(
                        "Only a single Redis host is supported, got another one at index {}",
                        i
                    ));
                }
                let (host, port_str) = part
                    .split_once(':')
                    .ok_or_else(|| anyhow!("Invalid connection URL of host at index {}", i))?;
                result.host = host.to_string();
                result.port = port_str
                    .parse::<u16>()
                    .map_err(|e| anyhow!("Failed to parse port '{}': {}", port_str, e))?;
                host_seen = true;
            } else if part.matches('=').count() == 1 {
                let (key, value) = part
                    .split_once('=')
                    .ok_or_else(|| anyhow!("Invalid connection option at index {}", i))?;
                result.apply_option(i, key, value)?;
            } else {
                return Err(anyhow!(
                    "Invalid connection URL part at index {}: {}",
                    i,
                    part
                ));
            }
        }
        if !host_seen {
            return Err(anyhow!(
                "Connection string '{}' has no host:port part",
                connection_string
            ));
        }
        Ok(result)
    }

    fn apply_option(&mut self, i: usize, key: &str, value: &str) -> Result<()> {
        match key.to_ascii_lowercase().as_str() {
            "password" => self.password = Some(value.to_string()),
            "username" => self.username = Some(value.to_string()),
            "db" => {
                self.db = value
                    .parse::<i64>()
                    .map_err(|e| anyhow!("Invalid db value at index {}: {}", i, e))?
            }
            "ssl" => {
                self.ssl = match value.to_ascii_lowercase().as_str() {
                    "true" | "1" | "yes" => true,
                    "false" | "0" | "no" => false,
                    _ => {
                        return Err(anyhow!(
                            "Invalid ssl value at index {}: {}, supported values are 'true', 'false', '1', '0', 'yes', 'no'",
                            i,
                            value
                        ));
                    }
                }
            }
            "ssl_certfile" => self.ssl_certfile = Some(value.to_string()),
            "ssl_keyfile" => self.ssl_keyfile = Some(value.to_string()),
            "ssl_ca_certs" => self.ssl_ca_certs = Some(value.to_string()),
            other => {
                return Err(anyhow!(
                    "Invalid connection option at index {}: {}",
                    i,
                    other
                ));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum RedisConfigDef {
    ConnectionString {
        connection_string: String,
    },
    Detailed {
        #[serde(default)]
        host: Option<String>,
        #[serde(default)]
        port: Option<u16>,
        #[serde(default)]
        db: Option<i64>,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        ssl: Option<bool>,
        #[serde(default)]
        ssl_certfile: Option<String>,
        #[serde(default)]
        ssl_keyfile: Option<String>,
        #[serde(default)]
        ssl_ca_certs: Option<String>,
    },
}

impl TryFrom<RedisConfigDef> for RedisConfig {
    type Error = String;

    fn try_from(value: RedisConfigDef) -> Result<Self, Self::Error> {
        match value {
            RedisConfigDef::ConnectionString { connection_string } => {
                RedisConfig::from_connection_string(&connection_string).map_err(|e| e.to_string())
            }
            RedisConfigDef::Detailed {
                host,
                port,
                db,
                username,
                password,
                ssl,
                ssl_certfile,
                ssl_keyfile,
                ssl_ca_certs,
            } => {
                let defaults = RedisConfig::default();
                Ok(RedisConfig {
                    host: host.unwrap_or(defaults.host),
                    port: port.unwrap_or(defaults.port),
                    db: db.unwrap_or(defaults.db),
                    username,
                    password,
                    ssl: ssl.unwrap_or(false),
                    ssl_certfile,
                    ssl_keyfile,
                    ssl_ca_certs,
                })
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OnlineStoreConfig {
    Redis(RedisConfig),
    InMemory,
}

impl Default for OnlineStoreConfig {
    fn default() -> Self {
        OnlineStoreConfig::Redis(RedisConfig::default())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub online_store: OnlineStoreConfig,
    /// `COUNT` hint sent with every `SCAN` page.
    #[serde(default = "default_scan_count")]
    pub scan_count: usize,
}

fn default_scan_count() -> usize {
    DEFAULT_SCAN_COUNT
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            online_store: OnlineStoreConfig::default(),
            scan_count: DEFAULT_SCAN_COUNT,
        }
    }
}

impl StoreConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Err(anyhow!("Empty configuration file"));
        }
        let config: StoreConfig = serde_saphyr::from_str(yaml).map_err(|err| anyhow!(err))?;
        if config.scan_count == 0 {
            return Err(anyhow!("scan_count must be positive"));
        }
        Ok(config)
    }
}
