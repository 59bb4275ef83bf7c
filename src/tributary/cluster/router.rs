use std::sync::Arc;

use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::tributary::backend::{probe, NodePool};
use crate::tributary::cluster::{Coordinator, Node, NodeId, Partition, Registry, Role, Status};
use crate::tributary::{Error, Result};


/// Router resolves which node serves a write or a read, failing over
/// when the master stops answering.
pub struct Router<P: NodePool> {
    registry: Arc<Registry<P>>,
    coordinator: Arc<Coordinator<P>>,
    probe_timeout: Duration,
}

impl<P: NodePool> Router<P> {
    pub fn new(registry: Arc<Registry<P>>, coordinator: Arc<Coordinator<P>>) -> Self {
        let probe_timeout = registry.settings().probe_timeout();
        Self{
            registry,
            coordinator,
            probe_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<Registry<P>> {
        &self.registry
    }

    /// The live master. If the master doesn't pass a liveness probe, a new master is
    /// elected and returned instead; the stale master is never returned.
    pub async fn write_pool(&self) -> Result<Node<P>> {
        let topology = self.registry.initialize().await?;
        let master = topology.master().ok_or_else(Error::no_master)?;
        match probe(&*master.pool, self.probe_timeout).await {
            Ok(()) => Ok(master.clone()),
            Err(e) => {
                error!(node = master.id, %e, "error connecting to master node");
                match self.fail_over(master.id).await {
                    Ok(node) => Ok(node),
                    Err(e) => {
                        error!(%e, "system is completely down, failover failed");
                        Err(Error::failover(e))
                    }
                }
            }
        }
    }

    async fn fail_over(&self, down_id: NodeId) -> Result<Node<P>> {
        let topology = self.coordinator.elect_new_master(down_id).await?;
        let master = topology.find(|n| n.is_master() && n.is_up())
            .ok_or_else(|| Error::new("failover failed: no new master found"))?;
        probe(&*master.pool, self.probe_timeout).await?;
        info!(node = master.id, "failover complete");
        Ok(master.clone())
    }

    /// A live replica, preferably the one labelled for partition_hint.
    /// Any other live replica is substituted if that one is unreachable.
    /// Replicas that fail their probe are marked down.
    pub async fn read_pool(&self, partition_hint: Partition) -> Result<Node<P>> {
        let topology = self.registry.initialize().await?;
        let preferred = Role::Replica(partition_hint);

        if let Some(node) = topology.find(|n| n.role == preferred && n.is_up()) {
            if self.check_node(node).await {
                return Ok(node.clone());
            }
        }

        for node in topology.iter().filter(|n| n.is_replica() && n.role != preferred && n.is_up()) {
            if self.check_node(node).await {
                warn!(node = node.id, "read pool {} not available, using {} on node {} instead", preferred, node.role, node.id);
                return Ok(node.clone());
            }
        }

        Err(Error::no_read_replica())
    }

    /// The live node labelled as the fragment for partition. There's no substitution:
    /// a fragment write must never land on the other partition's node.
    pub fn fragment_for(&self, partition: Partition) -> Option<Node<P>> {
        self.registry.find(|n| n.role == Role::Replica(partition) && n.is_up())
    }

    /// Probe node, marking it down if it doesn't answer.
    async fn check_node(&self, node: &Node<P>) -> bool {
        match probe(&*node.pool, self.probe_timeout).await {
            Ok(()) => true,
            Err(e) => {
                error!(node = node.id, role = %node.role, %e, "read node unreachable");
                if let Err(e) = self.registry.set_status(node.id, Status::Down) {
                    error!(node = node.id, %e, "could not mark node down");
                }
                false
            }
        }
    }
}
