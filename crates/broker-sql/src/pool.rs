//! A per-worker MSSQL connection pool.
//!
//! The Python original opened one global MSSQL connection shared by
//! every request, which serializes unrelated jobs behind a single
//! socket. This pool gives each worker process its own small set of
//! connections instead, shaped after the generic connection pool used
//! elsewhere in this workspace (`max_size`/`idle_timeout`/
//! `acquire_timeout`) but specialized to tiberius clients.

use std::sync::Arc;
use std::time::Duration;

use broker_core::config::MssqlConfig;
use tiberius::{AuthMethod, Client, Config};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::error::SqlError;

pub type MssqlClient = Client<Compat<TcpStream>>;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: usize,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 4,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

pub struct MssqlPool {
    mssql: MssqlConfig,
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<MssqlClient>>,
    acquire_timeout: Duration,
}

impl MssqlPool {
    pub fn new(mssql: MssqlConfig, config: PoolConfig) -> Self {
        Self {
            mssql,
            semaphore: Arc::new(Semaphore::new(config.max_size)),
            idle: Mutex::new(Vec::new()),
            acquire_timeout: config.acquire_timeout,
        }
    }

    async fn connect(&self) -> Result<MssqlClient, SqlError> {
        let mut config = Config::new();
        config.host(&self.mssql.host);
        config.database(&self.mssql.database);
        config.authentication(AuthMethod::sql_server(&self.mssql.user, &self.mssql.password));
        config.trust_cert();

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(SqlError::Connect)?;
        tcp.set_nodelay(true).map_err(SqlError::Connect)?;

        let client = Client::connect(config, tcp.compat_write()).await?;
        Ok(client)
    }

    /// Acquire a connection, reusing an idle one if available.
    pub async fn acquire(&self) -> Result<PooledConnection<'_>, SqlError> {
        let permit = tokio::time::timeout(self.acquire_timeout, self.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| SqlError::PoolExhausted)?
            .expect("semaphore never closed");

        let client = {
            let mut idle = self.idle.lock().await;
            idle.pop()
        };
        let client = match client {
            Some(c) => c,
            None => self.connect().await?,
        };

        Ok(PooledConnection {
            pool: self,
            client: Some(client),
            _permit: permit,
        })
    }
}

pub struct PooledConnection<'a> {
    pool: &'a MssqlPool,
    client: Option<MssqlClient>,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl<'a> std::ops::Deref for PooledConnection<'a> {
    type Target = MssqlClient;
    fn deref(&self) -> &Self::Target {
        self.client.as_ref().expect("client taken before drop")
    }
}

impl<'a> std::ops::DerefMut for PooledConnection<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.client.as_mut().expect("client taken before drop")
    }
}

impl<'a> Drop for PooledConnection<'a> {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            // Best-effort return to the idle list; a blocking lock here
            // would deadlock in async context, so push via try_lock and
            // drop the connection outright if another holder is busy.
            if let Ok(mut idle) = self.pool.idle.try_lock() {
                idle.push(client);
            }
        }
    }
}
