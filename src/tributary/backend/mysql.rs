use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Params, Pool, PoolConstraints, PoolOpts, Row, Value};
use tracing::{debug};

use crate::sql;
use crate::tributary::backend::{IsolationLevel, LogPosition, NodeConn, NodePool, ReplicationControl, ReplicationSource};
use crate::tributary::common::quote_ident;
use crate::tributary::config::{NodeSettings, Settings};
use crate::tributary::users::{User, UserPatch, parse_birth_date};
use crate::tributary::{Error, Result};


const USER_COLUMNS: [&str; 11] = [
    "id", "firstName", "lastName", "address1", "address2", "city",
    "country", "zipCode", "phoneNumber", "gender", "dateOfBirth",
];

// dateOfBirth is a DATE, read it back as text so we don't depend on driver date support
const SELECT_USERS: &str = "SELECT id, firstName, lastName, address1, address2, city, country, \
    zipCode, phoneNumber, gender, DATE_FORMAT(dateOfBirth, '%Y-%m-%d') FROM Users";

type UserRow = (u64, Option<String>, Option<String>, Option<String>, Option<String>, Option<String>,
    Option<String>, Option<String>, Option<String>, Option<String>, Option<String>);

/// A mysql_async pool for one cluster node.
pub struct MySqlPool {
    host: String,
    opts: Opts,
    pool: Pool,
    closed: AtomicBool,
}

impl MySqlPool {
    pub fn new(node: &NodeSettings) -> Result<Self> {
        let constraints = PoolConstraints::new(0, node.max_connections as usize)
            .ok_or_else(|| Error::new(format!("invalid max_connections {} for node {}", node.max_connections, node.id)))?;
        let opts = OptsBuilder::default()
            .ip_or_hostname(node.host.clone())
            .tcp_port(node.port)
            .user(non_empty(&node.user))
            .pass(non_empty(&node.password))
            .db_name(non_empty(&node.database))
            .pool_opts(PoolOpts::default().with_constraints(constraints));
        let opts = Opts::from(opts);
        Ok(Self{
            host: node.address(),
            pool: Pool::new(opts.clone()),
            opts,
            closed: AtomicBool::new(false),
        })
    }

    /// A factory for Registry that creates a MySqlPool per configured node.
    pub fn factory() -> impl Fn(&'static Settings, &NodeSettings) -> Result<Self> + Send + Sync + 'static {
        |_conf, node| MySqlPool::new(node)
    }
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() { None } else { Some(s.to_string()) }
}

impl Debug for MySqlPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("MySqlPool(host={})", self.host))
    }
}

#[async_trait]
impl NodePool for MySqlPool {
    type Conn = MySqlConn;

    async fn get(&self) -> Result<MySqlConn> {
        let conn = self.pool.get_conn().await?;
        Ok(MySqlConn{ conn })
    }

    async fn ping(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::closed());
        }
        // A fresh connection, the pool may be fully checked out by transactions
        let mut conn = Conn::new(self.opts.clone()).await?;
        conn.ping().await?;
        conn.disconnect().await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.pool.clone().disconnect().await?;
        Ok(())
    }
}

/// A connection reserved from a MySqlPool. Returned to the pool on drop.
pub struct MySqlConn {
    conn: Conn,
}

fn user_from_row(row: UserRow) -> Result<User> {
    let (id, first_name, last_name, address1, address2, city, country, zip_code, phone_number, gender, dob) = row;
    let date_of_birth: Option<NaiveDate> = match dob {
        Some(s) => Some(parse_birth_date(&s)?),
        None => None,
    };
    Ok(User{
        id: Some(id),
        first_name,
        last_name,
        address1,
        address2,
        city,
        country,
        zip_code,
        phone_number,
        gender,
        date_of_birth,
    })
}

fn user_values(user: &User) -> Vec<Value> {
    let mut values: Vec<Value> = Vec::with_capacity(USER_COLUMNS.len());
    values.push(user.id.into());
    for column in &USER_COLUMNS[1..] {
        values.push(user.column(column).into());
    }
    values
}

#[async_trait]
impl NodeConn for MySqlConn {
    async fn begin(&mut self, isolation: Option<IsolationLevel>) -> Result<()> {
        if let Some(level) = isolation {
            self.conn.query_drop(level.set_statement()).await?;
        }
        self.conn.query_drop("START TRANSACTION").await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.conn.query_drop("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.conn.query_drop("ROLLBACK").await?;
        Ok(())
    }

    async fn insert_user(&mut self, user: &User) -> Result<u64> {
        let columns: Vec<String> = USER_COLUMNS.iter().map(|c| quote_ident(c)).collect();
        let placeholders = vec!["?"; USER_COLUMNS.len()].join(", ");
        let stmt = format!("INSERT INTO Users ({}) VALUES ({})", columns.join(", "), placeholders);
        self.conn.exec_drop(stmt, Params::Positional(user_values(user))).await?;
        match user.id {
            Some(id) => Ok(id),
            None => self.conn.last_insert_id().ok_or_else(|| Error::new("insert did not generate an id")),
        }
    }

    async fn upsert_user(&mut self, user: &User) -> Result<()> {
        if user.id.is_none() {
            return Err(Error::new("upsert requires a user id"));
        }
        let columns: Vec<String> = USER_COLUMNS.iter().map(|c| quote_ident(c)).collect();
        let placeholders = vec!["?"; USER_COLUMNS.len()].join(", ");
        let updates: Vec<String> = columns[1..].iter().map(|c| format!("{} = VALUES({})", c, c)).collect();
        let stmt = format!("INSERT INTO Users ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
            columns.join(", "), placeholders, updates.join(", "));
        self.conn.exec_drop(stmt, Params::Positional(user_values(user))).await?;
        Ok(())
    }

    async fn select_users(&mut self) -> Result<Vec<User>> {
        let rows: Vec<UserRow> = self.conn.query(SELECT_USERS).await?;
        rows.into_iter().map(user_from_row).collect()
    }

    async fn select_user(&mut self, id: u64) -> Result<Option<User>> {
        let stmt = format!("{} WHERE id = ?", SELECT_USERS);
        let row: Option<UserRow> = self.conn.exec_first(stmt, (id,)).await?;
        row.map(user_from_row).transpose()
    }

    async fn lock_user(&mut self, id: u64) -> Result<Option<User>> {
        let stmt = format!("{} WHERE id = ? FOR UPDATE", SELECT_USERS);
        let row: Option<UserRow> = self.conn.exec_first(stmt, (id,)).await?;
        row.map(user_from_row).transpose()
    }

    async fn update_user(&mut self, id: u64, patch: &UserPatch) -> Result<u64> {
        // Column names are checked against the allow-list before we get here
        let mut set_parts = Vec::with_capacity(patch.len());
        let mut values: Vec<Value> = Vec::with_capacity(patch.len() + 1);
        for (column, value) in patch.iter() {
            set_parts.push(format!("{} = ?", quote_ident(column)));
            values.push(value.clone().into());
        }
        values.push(id.into());
        let stmt = format!("UPDATE Users SET {} WHERE id = ?", set_parts.join(", "));
        self.conn.exec_drop(stmt, Params::Positional(values)).await?;
        Ok(self.conn.affected_rows())
    }

    async fn delete_user(&mut self, id: u64) -> Result<u64> {
        self.conn.exec_drop("DELETE FROM Users WHERE id = ?", (id,)).await?;
        Ok(self.conn.affected_rows())
    }
}

#[async_trait]
impl ReplicationControl for MySqlConn {
    async fn stop_replication(&mut self) -> Result<()> {
        self.conn.query_drop("STOP SLAVE").await?;
        Ok(())
    }

    async fn start_replication(&mut self) -> Result<()> {
        self.conn.query_drop("START SLAVE").await?;
        Ok(())
    }

    async fn reset_replica(&mut self) -> Result<()> {
        self.conn.query_drop("RESET SLAVE ALL").await?;
        Ok(())
    }

    async fn reset_log(&mut self) -> Result<()> {
        self.conn.query_drop("RESET MASTER").await?;
        Ok(())
    }

    async fn set_read_only(&mut self, read_only: bool) -> Result<()> {
        let stmt = if read_only { "SET PERSIST read_only = ON" } else { "SET PERSIST read_only = OFF" };
        self.conn.query_drop(stmt).await?;
        Ok(())
    }

    async fn log_position(&mut self) -> Result<LogPosition> {
        let row: Option<Row> = self.conn.query_first("SHOW MASTER STATUS").await?;
        let row = row.ok_or_else(|| Error::new("SHOW MASTER STATUS returned nothing, is binary logging enabled?"))?;
        let file: Option<String> = row.get("File");
        let position: Option<u64> = row.get("Position");
        match (file, position) {
            (Some(file), Some(position)) => Ok(LogPosition{ file, position }),
            _ => Err(Error::new("SHOW MASTER STATUS is missing File or Position")),
        }
    }

    async fn change_source(&mut self, source: &ReplicationSource) -> Result<()> {
        let stmt = sql!("CHANGE MASTER TO MASTER_HOST = {}, MASTER_PORT = {}, MASTER_USER = {}, MASTER_PASSWORD = {}, MASTER_LOG_FILE = {}, MASTER_LOG_POS = {}",
            source.host.as_str(), source.port as u64, source.user.as_str(), source.password.as_str(), source.position.file.as_str(), source.position.position);
        debug!(host = %source.host, position = %source.position, "changing replication source");
        self.conn.query_drop(stmt).await?;
        Ok(())
    }
}
