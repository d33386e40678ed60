use crate::config::RedisConfig;
use crate::model::StoredFeatures;
use crate::onlinestore::{OnlineStore, ScanPage, WriteBatch, WriteCommand};
use crate::util::read_file_to_bytes;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{
    Client, ClientTlsConfig, ConnectionAddr, ConnectionInfo, IntoConnectionInfo,
    RedisConnectionInfo, RedisResult, TlsCertificates,
};
use tracing::{debug, info};

/// Online store backed by a single Redis node.
///
/// Holds one multiplexed connection for the lifetime of the store. The
/// connection manager reconnects on its own; nothing here retries a failed
/// command.
pub struct RedisOnlineStore {
    connection: ConnectionManager,
}

impl TryFrom<&RedisConfig> for TlsCertificates {
    type Error = anyhow::Error;

    fn try_from(value: &RedisConfig) -> Result<Self> {
        match (value.ssl_keyfile.as_ref(), value.ssl_certfile.as_ref()) {
            (Some(_), None) | (None, Some(_)) => {
                return Err(anyhow!(
                    "Both ssl_keyfile and ssl_certfile must be provided together or neither"
                ));
            }
            _ => {}
        }
        let client_tls: Option<ClientTlsConfig> = if let (Some(cert), Some(key)) =
            (value.ssl_certfile.as_ref(), value.ssl_keyfile.as_ref())
        {
            Some(ClientTlsConfig {
                client_cert: read_file_to_bytes(cert)?,
                client_key: read_file_to_bytes(key)?,
            })
        } else {
            None
        };
        Ok(TlsCertificates {
            client_tls,
            root_cert: value
                .ssl_ca_certs
                .as_ref()
                .map(|cert_path| read_file_to_bytes(cert_path))
                .transpose()?,
        })
    }
}

struct RedisNode<'a>(&'a RedisConfig);

impl IntoConnectionInfo for RedisNode<'_> {
    fn into_connection_info(self) -> RedisResult<ConnectionInfo> {
        let config = self.0;
        let mut redis = RedisConnectionInfo::default();
        redis.username = config.username.clone();
        redis.password = config.password.clone();
        redis.db = config.db;
        let addr = if config.ssl {
            ConnectionAddr::TcpTls {
                host: config.host.clone(),
                port: config.port,
                insecure: false,
                tls_params: None,
            }
        } else {
            ConnectionAddr::Tcp(config.host.clone(), config.port)
        };
        Ok(ConnectionInfo { addr, redis })
    }
}

async fn check_redis_connection(client: &Client) -> Result<()> {
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .with_context(|| anyhow!("Cannot establish redis connection"))?;
    ping(&mut conn).await
}

async fn ping<C>(connection: &mut C) -> Result<()>
where
    C: redis::aio::ConnectionLike + Send,
{
    let ping_response: String = redis::cmd("PING").query_async(connection).await?;
    if ping_response.to_uppercase() != "PONG" {
        return Err(anyhow!(
            "Unexpected PING response from Redis online store: {}",
            ping_response
        ));
    }
    Ok(())
}

impl RedisOnlineStore {
    /// Opens the connection described by `config` and checks it with `PING`.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let client = if config.ssl {
            let certificates = TlsCertificates::try_from(config)?;
            Client::build_with_tls(RedisNode(config), certificates)?
        } else {
            Client::open(RedisNode(config))?
        };
        check_redis_connection(&client).await?;
        let connection = ConnectionManager::new(client)
            .await
            .with_context(|| anyhow!("Cannot create redis connection manager"))?;
        info!(
            "Connected to Redis online store at {}:{}/{}",
            config.host, config.port, config.db
        );
        Ok(Self { connection })
    }

    pub fn from_connection_manager(connection: ConnectionManager) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl OnlineStore for RedisOnlineStore {
    async fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut pipeline = redis::pipe();
        for command in batch.commands() {
            match command {
                WriteCommand::MergeFields { key, fields } => {
                    pipeline.hset_multiple(key, fields).ignore();
                }
                WriteCommand::Expire { key, ttl_seconds } => {
                    pipeline.expire(key, *ttl_seconds).ignore();
                }
            }
        }
        debug!("Sending pipeline of {} write commands", batch.len());
        let mut connection = self.connection.clone();
        pipeline
            .query_async::<()>(&mut connection)
            .await
            .with_context(|| format!("Pipeline of {} write commands failed", batch.len()))
    }

    async fn read_batch(&self, keys: &[String]) -> Result<Vec<StoredFeatures>> {
        if keys.is_empty() {
            return Ok(vec![]);
        }
        let mut pipeline = redis::pipe();
        for key in keys {
            pipeline.hgetall(key);
        }
        debug!("Sending pipeline of {} HGETALL commands", keys.len());
        let mut connection = self.connection.clone();
        let results: Vec<StoredFeatures> = pipeline
            .query_async(&mut connection)
            .await
            .with_context(|| format!("Pipeline of {} HGETALL commands failed", keys.len()))?;
        if results.len() != keys.len() {
            return Err(anyhow!(
                "Mismatched number of results: expected {}, got {}",
                keys.len(),
                results.len()
            ));
        }
        Ok(results)
    }

    async fn scan_page(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage> {
        let mut connection = self.connection.clone();
        let (cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut connection)
            .await
            .with_context(|| format!("SCAN {} MATCH {} failed", cursor, pattern))?;
        Ok(ScanPage { cursor, keys })
    }

    async fn ping(&self) -> Result<()> {
        let mut connection = self.connection.clone();
        ping(&mut connection).await
    }
}
