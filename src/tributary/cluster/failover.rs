use std::sync::{Arc, Mutex};

use rand::seq::SliceRandom;
use tracing::{error, info, instrument};

use crate::tributary::backend::{LogPosition, NodePool, ReplicationControl, ReplicationSource};
use crate::tributary::cluster::{Node, NodeId, Registry, Role, Status, Topology, PRIMARY_SEAT, PRIMARY_SEAT_SUCCESSOR};
use crate::tributary::{Error, Result};


/// Coordinator performs every role transition in the cluster: master election,
/// pointing replicas at a new master, and bringing recovered nodes back as replicas.
///
/// Transitions are serialized. The registry is only updated once all the replication
/// commands for a transition have succeeded, so a failed election leaves the visible
/// topology as it was (though some nodes may already have been repointed).
pub struct Coordinator<P: NodePool> {
    registry: Arc<Registry<P>>,
    transition_lock: tokio::sync::Mutex<()>,
    /// Down node and resulting topology generation of the last completed election
    last_election: Mutex<Option<(NodeId, u64)>>,
}

impl<P: NodePool> Coordinator<P> {
    pub fn new(registry: Arc<Registry<P>>) -> Self {
        Self{
            registry,
            transition_lock: tokio::sync::Mutex::new(()),
            last_election: Mutex::new(None),
        }
    }

    fn replication_source(&self, master: &Node<P>, position: LogPosition) -> ReplicationSource {
        let conf = self.registry.settings();
        ReplicationSource{
            host: master.host.clone(),
            port: master.port,
            user: conf.replication_user.clone(),
            password: conf.replication_password.clone(),
            position,
        }
    }

    /// Make node writable and detach it from any previous master.
    #[instrument(skip(self, node), fields(node = node.id))]
    pub async fn promote_to_master(&self, node: &Node<P>) -> Result<()> {
        let mut conn = node.pool.get().await?;
        conn.stop_replication().await?;
        conn.reset_replica().await?;
        conn.reset_log().await?;
        conn.set_read_only(false).await?;
        info!(node = node.id, "replica promoted");
        Ok(())
    }

    /// Point replica at master, resuming from master's current binary log position.
    #[instrument(skip(self, replica, master), fields(replica = replica.id, master = master.id))]
    pub async fn reattach_replica(&self, replica: &Node<P>, master: &Node<P>) -> Result<()> {
        let position = {
            let mut conn = master.pool.get().await?;
            conn.log_position().await?
        };
        let source = self.replication_source(master, position);

        let mut conn = replica.pool.get().await?;
        conn.stop_replication().await?;
        conn.change_source(&source).await?;
        conn.start_replication().await?;
        info!(replica = replica.id, master = master.id, position = %source.position, "replica redirected");
        Ok(())
    }

    /// Elect a new master to replace down_id, repoint the other live nodes at it,
    /// and publish the new topology.
    #[instrument(skip(self))]
    pub async fn elect_new_master(&self, down_id: NodeId) -> Result<Arc<Topology<P>>> {
        let _guard = self.transition_lock.lock().await;
        let topology = self.registry.initialize().await?;
        let down = topology.node(down_id).ok_or_else(|| Error::unknown_node(down_id))?;

        // An election for this node may have completed while we waited for the lock.
        // Any later update to the topology means the caller saw something newer.
        let last_election = *self.last_election.lock()?;
        if last_election == Some((down_id, topology.generation())) {
            if let Some(master) = topology.master().filter(|m| m.is_up()) {
                info!(master = master.id, "failover already handled");
                return Ok(topology);
            }
        }

        let candidates: Vec<&Node<P>> = topology.iter().filter(|n| n.id != down_id && n.is_up()).collect();
        let winner = choose_new_master(down_id, &candidates).ok_or_else(Error::no_candidates)?.clone();
        info!(node = winner.id, "elected as the new master");

        if let Err(e) = self.promote_to_master(&winner).await {
            error!(node = winner.id, %e, "error promoting replica");
            return Err(e);
        }
        let mut reattached = Vec::with_capacity(2);
        for node in topology.iter().filter(|n| n.id != winner.id && n.id != down_id && n.is_up()) {
            if let Err(e) = self.reattach_replica(node, &winner).await {
                error!(node = node.id, %e, "master switch was unsuccessful");
                return Err(e);
            }
            reattached.push(node.id);
        }

        // The old master takes over the partition label the winner held, so every
        // partition keeps exactly one replica label.
        let winner_role = winner.role;
        let previous_master = topology.master().map(|n| n.id).filter(|id| *id != winner.id);
        let updated = self.registry.update(|nodes| {
            for node in nodes.iter_mut() {
                if node.id == winner.id {
                    node.role = Role::Master;
                    node.status = Status::Up;
                    continue;
                }
                if Some(node.id) == previous_master {
                    node.role = winner_role;
                }
                if node.id == down_id {
                    node.status = Status::Down;
                } else if reattached.contains(&node.id) {
                    node.status = Status::Up;
                }
            }
        })?;
        *self.last_election.lock()? = Some((down_id, updated.generation()));
        info!(master = winner.id, topology = ?updated, "roles updated and master node is now online");
        Ok(updated)
    }

    /// Bring a node that went down back as a replica of the current master.
    /// The node keeps the role label it had before it went down.
    #[instrument(skip(self))]
    pub async fn recover_down_node(&self, id: NodeId) -> Result<()> {
        let _guard = self.transition_lock.lock().await;
        let topology = self.registry.initialize().await?;
        let node = topology.node(id).ok_or_else(|| Error::unknown_node(id))?;
        let master = topology.find(|n| n.is_master() && n.is_up()).ok_or_else(Error::no_master)?;
        if node.id == master.id {
            return Err(Error::new(format!("node {} is the master, it cannot follow itself", id)));
        }

        {
            let mut conn = node.pool.get().await?;
            conn.stop_replication().await?;
            conn.reset_log().await?;
        }
        self.reattach_replica(node, master).await?;
        self.registry.set_status(id, Status::Up)?;
        info!(node = id, role = %node.role, master = master.id, "node recovered as replica");
        Ok(())
    }
}

/// Pick the new master among candidates. If the primary seat went down, its usual successor
/// is preferred. Otherwise the choice is uniformly random.
pub(crate) fn choose_new_master<'a, P>(down_id: NodeId, candidates: &[&'a Node<P>]) -> Option<&'a Node<P>> {
    if down_id == PRIMARY_SEAT {
        if let Some(successor) = candidates.iter().find(|n| n.id == PRIMARY_SEAT_SUCCESSOR) {
            return Some(*successor);
        }
    }
    candidates.choose(&mut rand::thread_rng()).copied()
}
