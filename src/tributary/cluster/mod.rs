mod node;
mod registry;
mod failover;
mod router;
mod monitor;

pub use self::node::{Node, NodeId, Partition, Role, Status, Topology, PRIMARY_SEAT, PRIMARY_SEAT_SUCCESSOR};
pub use self::registry::{Registry, PoolFactory};
pub use self::failover::Coordinator;
pub use self::router::Router;
pub use self::monitor::HealthMonitor;

#[cfg(test)]
pub(crate) use self::failover::choose_new_master;

use std::sync::Arc;

use crate::tributary::backend::NodePool;
use crate::tributary::config::{NodeSettings, Settings};
use crate::tributary::users::{PendingRepairs, Reconciler, UserService};
use crate::tributary::Result;


/// The shared cluster context: one registry, the components acting on it, and the
/// record of fragment writes still to be repaired.
/// Cheap to clone, every clone refers to the same nodes.
pub struct Cluster<P: NodePool> {
    pub registry: Arc<Registry<P>>,
    pub coordinator: Arc<Coordinator<P>>,
    pub router: Arc<Router<P>>,
    pub pending: Arc<PendingRepairs>,
}

impl<P: NodePool> Cluster<P> {
    pub fn new<F>(conf: &'static Settings, factory: F) -> Self
        where F: Fn(&'static Settings, &NodeSettings) -> Result<P> + Send + Sync + 'static
    {
        let registry = Arc::new(Registry::new(conf, factory));
        let coordinator = Arc::new(Coordinator::new(registry.clone()));
        let router = Arc::new(Router::new(registry.clone(), coordinator.clone()));
        Self{
            registry,
            coordinator,
            router,
            pending: Arc::new(PendingRepairs::new()),
        }
    }

    pub fn health_monitor(&self) -> HealthMonitor<P> {
        HealthMonitor::new(self.registry.clone(), self.coordinator.clone())
    }

    /// The user operations, recording missed fragment writes in self.pending.
    pub fn users(&self) -> UserService<P> {
        UserService::for_cluster(self)
    }

    /// Repairs the fragment writes recorded in self.pending.
    pub fn reconciler(&self) -> Reconciler<P> {
        Reconciler::new(self.registry.clone(), self.pending.clone())
    }
}

impl<P: NodePool> Clone for Cluster<P> {
    fn clone(&self) -> Self {
        Self{
            registry: self.registry.clone(),
            coordinator: self.coordinator.clone(),
            router: self.router.clone(),
            pending: self.pending.clone(),
        }
    }
}
