use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::tributary::backend::{IsolationLevel, LogPosition, NodeConn, NodePool, ReplicationControl, ReplicationSource};
use crate::tributary::cluster::{Cluster, NodeId, Partition, Role, Status, Topology};
use crate::tributary::config::{parse_config, Settings};
use crate::tributary::users::{PendingRepairs, User, UserPatch, UserService};
use crate::tributary::{Error, Result};


pub const TEST_CONFIG: &str = r#"
database: users
user: app
password: secret
replication_user: repl
replication_password: repl-secret
max_connections: 4
connect_attempts: 3
connect_backoff_millis: 1
probe_timeout_millis: 200
health_check_interval_seconds: 1
reconcile_interval_seconds: 0
nodes:
  - id: 1
    host: node1
    role: replica-2006
  - id: 2
    host: node2
    role: master
  - id: 3
    host: node3
    role: replica-2007
"#;

pub fn settings() -> &'static Settings {
    let conf = parse_config(TEST_CONFIG, PathBuf::from("tributary.yaml")).expect("test config is valid");
    Box::leak(Box::new(conf))
}

pub fn user(first_name: &str, date_of_birth: &str) -> User {
    User{
        first_name: Some(first_name.to_string()),
        last_name: Some("Santos".to_string()),
        city: Some("Manila".to_string()),
        date_of_birth: Some(NaiveDate::parse_from_str(date_of_birth, "%Y-%m-%d").unwrap()),
        ..Default::default()
    }
}

pub fn user_with_id(id: u64, first_name: &str, date_of_birth: &str) -> User {
    User{
        id: Some(id),
        ..user(first_name, date_of_birth)
    }
}

/// Exactly one master and one replica label per partition.
pub fn assert_roles_valid<P>(topology: &Topology<P>) {
    assert_eq!(topology.iter().filter(|n| n.is_master()).count(), 1, "{:?}", topology);
    for partition in Partition::ALL.iter() {
        let labelled = topology.iter().filter(|n| n.role == Role::Replica(*partition)).count();
        assert_eq!(labelled, 1, "partition {} in {:?}", partition, topology);
    }
}

struct SimState {
    reachable: bool,
    fail_next_connects: u32,
    fail_writes: bool,
    fail_replication: bool,
    closed: bool,
    connects: u32,
    rows: BTreeMap<u64, User>,
    next_id: u64,
    log: LogPosition,
    read_only: bool,
    commands: Vec<String>,
}

/// An in-memory MySQL node. Rows live in a map, replication commands are recorded
/// but nothing is actually replicated.
pub struct SimNode {
    pub id: NodeId,
    state: Mutex<SimState>,
    close_log: Arc<Mutex<Vec<NodeId>>>,
}

impl SimNode {
    fn new(id: NodeId, close_log: Arc<Mutex<Vec<NodeId>>>) -> Self {
        Self{
            id,
            state: Mutex::new(SimState{
                reachable: true,
                fail_next_connects: 0,
                fail_writes: false,
                fail_replication: false,
                closed: false,
                connects: 0,
                rows: BTreeMap::new(),
                next_id: 1,
                log: LogPosition{ file: "binlog.000001".to_string(), position: 157 },
                read_only: id != 2,
                commands: Vec::new(),
            }),
            close_log,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
    }

    pub fn fail_next_connects(&self, n: u32) {
        self.state().fail_next_connects = n;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    pub fn fail_replication(&self, fail: bool) {
        self.state().fail_replication = fail;
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn connects(&self) -> u32 {
        self.state().connects
    }

    pub fn is_read_only(&self) -> bool {
        self.state().read_only
    }

    pub fn seed(&self, user: User) {
        let mut state = self.state();
        let id = user.id.expect("seeded users need an id");
        state.next_id = state.next_id.max(id + 1);
        state.rows.insert(id, user);
    }

    pub fn row(&self, id: u64) -> Option<User> {
        self.state().rows.get(&id).cloned()
    }

    pub fn ids(&self) -> Vec<u64> {
        self.state().rows.keys().copied().collect()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    pub fn count_commands(&self, prefix: &str) -> usize {
        self.state().commands.iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn check_reachable(&self) -> Result<()> {
        if self.state().reachable {
            Ok(())
        } else {
            Err(Error::connection(format!("node{}: connect ECONNREFUSED", self.id)))
        }
    }

    fn run_command(&self, command: String) -> Result<()> {
        self.check_reachable()?;
        let mut state = self.state();
        if state.fail_replication {
            return Err(Error::new(format!("node{}: {} failed", self.id, command)));
        }
        state.commands.push(command);
        Ok(())
    }
}

pub struct SimPool {
    node: Arc<SimNode>,
    permits: Arc<Semaphore>,
}

impl SimPool {
    fn connect(&self) -> Result<()> {
        {
            let mut state = self.node.state();
            if state.closed {
                return Err(Error::closed());
            }
            state.connects += 1;
            if state.fail_next_connects > 0 {
                state.fail_next_connects -= 1;
                return Err(Error::connection(format!("node{}: connect ETIMEDOUT", self.node.id)));
            }
        }
        self.node.check_reachable()
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[async_trait]
impl NodePool for SimPool {
    type Conn = SimConn;

    async fn get(&self) -> Result<SimConn> {
        self.connect()?;
        let permit = self.permits.clone().acquire_owned().await.map_err(|_| Error::closed())?;
        Ok(SimConn{
            node: self.node.clone(),
            staged: None,
            _permit: permit,
        })
    }

    async fn ping(&self) -> Result<()> {
        self.connect()
    }

    async fn close(&self) -> Result<()> {
        self.node.state().closed = true;
        self.permits.close();
        self.node.close_log.lock().unwrap().push(self.node.id);
        Ok(())
    }
}

pub struct SimConn {
    node: Arc<SimNode>,
    /// A copy of the rows while a transaction is open, written back on commit.
    staged: Option<BTreeMap<u64, User>>,
    _permit: OwnedSemaphorePermit,
}

impl SimConn {
    fn read<T, F: FnOnce(&BTreeMap<u64, User>) -> T>(&self, f: F) -> Result<T> {
        self.node.check_reachable()?;
        match &self.staged {
            Some(rows) => Ok(f(rows)),
            None => Ok(f(&self.node.state().rows)),
        }
    }

    fn write<T, F: FnOnce(&mut BTreeMap<u64, User>, &mut u64) -> Result<T>>(&mut self, f: F) -> Result<T> {
        self.node.check_reachable()?;
        let mut state = self.node.state();
        if state.fail_writes {
            return Err(Error::new(format!("node{}: ER_LOCK_WAIT_TIMEOUT", self.node.id)));
        }
        let SimState{ rows, next_id, log, .. } = &mut *state;
        log.position += 100;
        match &mut self.staged {
            Some(staged) => f(staged, next_id),
            None => f(rows, next_id),
        }
    }
}

#[async_trait]
impl NodeConn for SimConn {
    async fn begin(&mut self, isolation: Option<IsolationLevel>) -> Result<()> {
        self.node.check_reachable()?;
        let mut state = self.node.state();
        if let Some(level) = isolation {
            state.commands.push(level.set_statement());
        }
        self.staged = Some(state.rows.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.node.check_reachable()?;
        if let Some(rows) = self.staged.take() {
            self.node.state().rows = rows;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.staged = None;
        self.node.check_reachable()
    }

    async fn insert_user(&mut self, user: &User) -> Result<u64> {
        let user = user.clone();
        self.write(move |rows, next_id| {
            let id = user.id.unwrap_or(*next_id);
            if rows.contains_key(&id) {
                return Err(Error::new(format!("ER_DUP_ENTRY: Duplicate entry '{}' for key 'PRIMARY'", id)));
            }
            *next_id = (*next_id).max(id + 1);
            rows.insert(id, User{ id: Some(id), ..user });
            Ok(id)
        })
    }

    async fn upsert_user(&mut self, user: &User) -> Result<()> {
        let user = user.clone();
        self.write(move |rows, next_id| {
            let id = user.id.ok_or_else(|| Error::new("upsert requires a user id"))?;
            *next_id = (*next_id).max(id + 1);
            rows.insert(id, user);
            Ok(())
        })
    }

    async fn select_users(&mut self) -> Result<Vec<User>> {
        self.read(|rows| rows.values().cloned().collect())
    }

    async fn select_user(&mut self, id: u64) -> Result<Option<User>> {
        self.read(|rows| rows.get(&id).cloned())
    }

    async fn lock_user(&mut self, id: u64) -> Result<Option<User>> {
        self.read(|rows| rows.get(&id).cloned())
    }

    async fn update_user(&mut self, id: u64, patch: &UserPatch) -> Result<u64> {
        let patch = patch.clone();
        self.write(move |rows, _| {
            match rows.get_mut(&id) {
                Some(row) => {
                    row.apply(&patch)?;
                    Ok(1)
                },
                None => Ok(0),
            }
        })
    }

    async fn delete_user(&mut self, id: u64) -> Result<u64> {
        self.write(move |rows, _| Ok(rows.remove(&id).map(|_| 1).unwrap_or(0)))
    }
}

#[async_trait]
impl ReplicationControl for SimConn {
    async fn stop_replication(&mut self) -> Result<()> {
        self.node.run_command("STOP SLAVE".to_string())
    }

    async fn start_replication(&mut self) -> Result<()> {
        self.node.run_command("START SLAVE".to_string())
    }

    async fn reset_replica(&mut self) -> Result<()> {
        self.node.run_command("RESET SLAVE ALL".to_string())
    }

    async fn reset_log(&mut self) -> Result<()> {
        self.node.run_command("RESET MASTER".to_string())?;
        self.node.state().log = LogPosition{ file: "binlog.000001".to_string(), position: 157 };
        Ok(())
    }

    async fn set_read_only(&mut self, read_only: bool) -> Result<()> {
        self.node.run_command(format!("SET PERSIST read_only = {}", if read_only { "ON" } else { "OFF" }))?;
        self.node.state().read_only = read_only;
        Ok(())
    }

    async fn log_position(&mut self) -> Result<LogPosition> {
        self.node.check_reachable()?;
        Ok(self.node.state().log.clone())
    }

    async fn change_source(&mut self, source: &ReplicationSource) -> Result<()> {
        self.node.run_command(format!("CHANGE MASTER TO {}:{} {} as {}", source.host, source.port, source.position, source.user))
    }
}

/// A cluster of three simulated nodes wired to the real registry, coordinator and router.
pub struct SimCluster {
    pub nodes: Vec<Arc<SimNode>>,
    pub cluster: Cluster<SimPool>,
    pub pending: Arc<PendingRepairs>,
    pub users: UserService<SimPool>,
    pub close_log: Arc<Mutex<Vec<NodeId>>>,
}

impl SimCluster {
    pub fn new() -> Self {
        Self::with_settings(settings())
    }

    pub fn with_settings(conf: &'static Settings) -> Self {
        let close_log = Arc::new(Mutex::new(Vec::new()));
        let nodes: Vec<Arc<SimNode>> = conf.nodes.iter()
            .map(|n| Arc::new(SimNode::new(n.id, close_log.clone())))
            .collect();
        let sim_nodes = nodes.clone();
        let cluster = Cluster::new(conf, move |_conf, settings| {
            let node = sim_nodes.iter().find(|n| n.id == settings.id)
                .ok_or_else(|| Error::unknown_node(settings.id))?;
            Ok(SimPool{
                node: node.clone(),
                permits: Arc::new(Semaphore::new(settings.max_connections as usize)),
            })
        });
        let pending = cluster.pending.clone();
        let users = cluster.users();
        Self{ nodes, cluster, pending, users, close_log }
    }

    /// A cluster that has completed initialize.
    pub async fn started() -> Self {
        let sim = Self::new();
        sim.cluster.registry.initialize().await.unwrap();
        sim
    }

    pub fn node(&self, id: NodeId) -> &Arc<SimNode> {
        self.nodes.iter().find(|n| n.id == id).unwrap()
    }

    pub fn role(&self, id: NodeId) -> Role {
        self.cluster.registry.find(|n| n.id == id).unwrap().role
    }

    pub fn status(&self, id: NodeId) -> Status {
        self.cluster.registry.find(|n| n.id == id).unwrap().status
    }

    pub fn topology(&self) -> Arc<Topology<SimPool>> {
        self.cluster.registry.snapshot().unwrap()
    }

    pub fn closed_in_order(&self) -> Vec<NodeId> {
        self.close_log.lock().unwrap().clone()
    }
}
