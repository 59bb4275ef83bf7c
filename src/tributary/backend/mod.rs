//! The seam between the cluster logic and a node's database.
//!
//! Everything the router, failover coordinator and write path do to a node goes
//! through these traits, so the same logic runs against MySQL in production and
//! against simulated nodes in tests.

mod isolation;
mod mysql;

pub use self::isolation::IsolationLevel;
pub use self::mysql::{MySqlPool, MySqlConn};

use std::fmt::{self, Display, Formatter};

use async_trait::async_trait;
use tokio::time::{timeout, Duration};

use crate::tributary::users::{User, UserPatch};
use crate::tributary::Result;


/// A bounded pool of connections to one node.
#[async_trait]
pub trait NodePool: Send + Sync + 'static {
    type Conn: NodeConn + ReplicationControl;

    /// Reserve a connection, waiting for a free slot if the pool is at capacity.
    /// The connection goes back to the pool when dropped.
    async fn get(&self) -> Result<Self::Conn>;

    /// Check the node answers, on a connection of its own outside the pool.
    /// Never waits for a pool slot: a node busy serving a full pool is alive.
    async fn ping(&self) -> Result<()>;

    /// Close the pool. Later calls to get fail.
    async fn close(&self) -> Result<()>;
}

/// Row-level primitives on the Users table of one node.
/// Statements outside begin/commit are autocommitted.
#[async_trait]
pub trait NodeConn: Send {
    async fn begin(&mut self, isolation: Option<IsolationLevel>) -> Result<()>;
    async fn commit(&mut self) -> Result<()>;
    async fn rollback(&mut self) -> Result<()>;

    /// Insert a row, using user.id if set, and return the row id.
    async fn insert_user(&mut self, user: &User) -> Result<u64>;
    /// Insert a row with its id, or update every column of the existing row with that id.
    async fn upsert_user(&mut self, user: &User) -> Result<()>;
    async fn select_users(&mut self) -> Result<Vec<User>>;
    async fn select_user(&mut self, id: u64) -> Result<Option<User>>;
    /// Select the row and lock it until the end of the transaction.
    async fn lock_user(&mut self, id: u64) -> Result<Option<User>>;
    /// Returns the number of rows changed.
    async fn update_user(&mut self, id: u64, patch: &UserPatch) -> Result<u64>;
    /// Returns the number of rows deleted.
    async fn delete_user(&mut self, id: u64) -> Result<u64>;
}

/// Replication control commands for a node.
#[async_trait]
pub trait ReplicationControl: Send {
    async fn stop_replication(&mut self) -> Result<()>;
    async fn start_replication(&mut self) -> Result<()>;
    /// Forget the replication source configuration entirely.
    async fn reset_replica(&mut self) -> Result<()>;
    /// Discard the binary log and start a new one.
    async fn reset_log(&mut self) -> Result<()>;
    async fn set_read_only(&mut self, read_only: bool) -> Result<()>;
    /// The node's current binary log coordinates.
    async fn log_position(&mut self) -> Result<LogPosition>;
    /// Point replication at a new source, resuming from source.position.
    async fn change_source(&mut self, source: &ReplicationSource) -> Result<()>;
}

/// A position in a node's binary log.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LogPosition {
    pub file: String,
    pub position: u64,
}

impl Display for LogPosition {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.position)
    }
}

/// Where a replica streams changes from.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ReplicationSource {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub position: LogPosition,
}

/// Liveness probe bounded by a timeout. Only the connect and ping round trip
/// is timed, see NodePool::ping.
pub async fn probe<P: NodePool>(pool: &P, limit: Duration) -> Result<()> {
    timeout(limit, pool.ping()).await?
}
