use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tracing::{debug, error, info, instrument, warn};

use crate::tributary::backend::NodePool;
use crate::tributary::cluster::{Node, NodeId, Status, Topology};
use crate::tributary::common::Backoff;
use crate::tributary::config::{NodeSettings, Settings, NODE_COUNT};
use crate::tributary::{Error, Result};


/// Creates the pool for a configured node. Called once per node for the process lifetime.
pub type PoolFactory<P> = Box<dyn Fn(&'static Settings, &NodeSettings) -> Result<P> + Send + Sync>;

/// Registry owns the cluster nodes and their pools.
///
/// The current Topology is an immutable snapshot. Readers clone the Arc and never
/// observe a partial transition: every change builds a new node list and swaps it in.
pub struct Registry<P: NodePool> {
    conf: &'static Settings,
    factory: PoolFactory<P>,
    topology: Mutex<Option<Arc<Topology<P>>>>,
    init_lock: tokio::sync::Mutex<()>,
}

impl<P: NodePool> Registry<P> {
    pub fn new<F>(conf: &'static Settings, factory: F) -> Self
        where F: Fn(&'static Settings, &NodeSettings) -> Result<P> + Send + Sync + 'static
    {
        Self{
            conf,
            factory: Box::new(factory),
            topology: Mutex::new(None),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &'static Settings {
        self.conf
    }

    fn current(&self) -> Result<Option<Arc<Topology<P>>>> {
        Ok(self.topology.lock()?.clone())
    }

    /// The current topology. Fails if initialize has not completed.
    pub fn snapshot(&self) -> Result<Arc<Topology<P>>> {
        self.current()?.ok_or_else(|| Error::new("cluster is not initialized"))
    }

    /// Create the node pools and connect to every node, retrying with exponential backoff.
    /// Idempotent: once initialized this returns the current topology.
    pub async fn initialize(&self) -> Result<Arc<Topology<P>>> {
        if let Some(topology) = self.current()? {
            return Ok(topology);
        }
        let _guard = self.init_lock.lock().await;
        // Another task may have finished initializing while we waited
        if let Some(topology) = self.current()? {
            return Ok(topology);
        }
        let topology = Arc::new(self.connect_all().await?);
        *self.topology.lock()? = Some(topology.clone());
        Ok(topology)
    }

    #[instrument(skip(self))]
    async fn connect_all(&self) -> Result<Topology<P>> {
        info!("initializing nodes 1, 2 and 3");
        let backoff = Backoff::new(self.conf.connect_attempts, self.conf.connect_backoff());
        let connects = self.conf.nodes.iter().map(|settings| async move {
            let pool = Arc::new((self.factory)(self.conf, settings)?);
            let node = Node::new(settings, pool);
            let label = format!("node {} ({})", node.id, node.role);
            backoff.retry(&label, || node.pool.ping()).await?;
            Ok::<_, Error>(node)
        });

        // Every node gets its full retry budget, even if another has already failed
        let mut nodes = Vec::with_capacity(NODE_COUNT);
        let mut last_error = None;
        for result in join_all(connects).await {
            match result {
                Ok(node) => nodes.push(node),
                Err(e) => last_error = Some(e),
            }
        }
        if let Some(e) = last_error {
            for node in &nodes {
                if let Err(e) = node.pool.close().await {
                    warn!(node = node.id, %e, "error closing pool after failed initialization");
                }
            }
            return Err(e);
        }

        info!("connected to all nodes successfully");
        Ok(Topology::new(nodes))
    }

    /// Synchronous lookup over the current snapshot.
    pub fn find<F: Fn(&Node<P>) -> bool>(&self, predicate: F) -> Option<Node<P>> {
        match self.current() {
            Ok(Some(topology)) => topology.find(predicate).cloned(),
            _ => None,
        }
    }

    /// Replace the topology with a modified copy of the latest snapshot.
    pub(crate) fn update<F: FnOnce(&mut Vec<Node<P>>)>(&self, f: F) -> Result<Arc<Topology<P>>> {
        let mut current = self.topology.lock()?;
        let previous = match current.as_ref() {
            Some(topology) => topology.clone(),
            None => return Err(Error::new("cluster is not initialized")),
        };
        let mut nodes = previous.to_vec();
        f(&mut nodes);
        debug_assert_eq!(nodes.len(), NODE_COUNT);
        debug_assert!(nodes.iter().filter(|n| n.is_master()).count() <= 1, "more than one master");
        let topology = Arc::new(previous.succeed(nodes));
        *current = Some(topology.clone());
        Ok(topology)
    }

    pub(crate) fn set_status(&self, id: NodeId, status: Status) -> Result<Arc<Topology<P>>> {
        if self.find(|n| n.id == id).is_none() {
            return Err(Error::unknown_node(id));
        }
        let topology = self.update(|nodes| {
            for node in nodes.iter_mut().filter(|n| n.id == id) {
                node.status = status;
            }
        })?;
        debug!(node = id, %status, "node status changed");
        Ok(topology)
    }

    /// Close the pool of a node and mark it down.
    /// Returns false without doing anything if the node is already down.
    pub async fn close_node(&self, id: NodeId) -> Result<bool> {
        let node = self.find(|n| n.id == id).ok_or_else(|| Error::unknown_node(id))?;
        if !node.is_up() {
            info!(node = id, "node is already down");
            return Ok(false);
        }
        node.pool.close().await?;
        self.set_status(id, Status::Down)?;
        info!(node = id, "node pool closed");
        Ok(true)
    }

    /// Close the master, then every up replica concurrently.
    /// Errors are logged, the shutdown carries on.
    pub async fn close_all(&self) {
        let topology = match self.current() {
            Ok(Some(topology)) => topology,
            _ => return,
        };

        let mut closed = Vec::with_capacity(NODE_COUNT);
        if let Some(master) = topology.master().filter(|m| m.is_up()) {
            close_quietly(master).await;
            closed.push(master.id);
        }
        let replicas: Vec<&Node<P>> = topology.iter().filter(|n| n.is_replica() && n.is_up()).collect();
        join_all(replicas.iter().map(|n| close_quietly(n))).await;
        closed.extend(replicas.iter().map(|n| n.id));

        if let Err(e) = self.update(|nodes| {
            for node in nodes.iter_mut().filter(|n| closed.contains(&n.id)) {
                node.status = Status::Down;
            }
        }) {
            error!(%e, "could not mark closed nodes down");
        }
        info!("all node pools closed");
    }
}

async fn close_quietly<P: NodePool>(node: &Node<P>) {
    match node.pool.close().await {
        Ok(()) => debug!(node = node.id, "closed node pool"),
        Err(e) => error!(node = node.id, %e, "error closing node pool"),
    }
}

impl<P: NodePool> Debug for Registry<P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.current() {
            Ok(Some(topology)) => f.write_fmt(format_args!("Registry({:?})", topology)),
            _ => f.write_str("Registry(uninitialized)"),
        }
    }
}
