use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::tributary::backend::{probe, NodePool};
use crate::tributary::cluster::{Coordinator, NodeId, Registry, Status};


/// HealthMonitor periodically probes the nodes marked down and brings the
/// ones that answer back into the cluster.
pub struct HealthMonitor<P: NodePool> {
    registry: Arc<Registry<P>>,
    coordinator: Arc<Coordinator<P>>,
    period: Duration,
    probe_timeout: Duration,
}

impl<P: NodePool> HealthMonitor<P> {
    pub fn new(registry: Arc<Registry<P>>, coordinator: Arc<Coordinator<P>>) -> Self {
        let conf = registry.settings();
        Self{
            period: conf.health_check_interval(),
            probe_timeout: conf.probe_timeout(),
            registry,
            coordinator,
        }
    }

    /// Run the monitor on its own task until token is cancelled.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(token).instrument(info_span!("health_monitor")))
    }

    pub async fn run(self, token: CancellationToken) {
        let mut ticks = interval(self.period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately, the first check happens one period after start
        ticks.tick().await;
        info!(period_seconds = self.period.as_secs(), "health monitor started");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticks.tick() => {
                    self.check().await;
                }
            }
        }
        info!("health monitor stopped");
    }

    /// One pass over the down nodes. Returns the ids of the nodes brought back up.
    pub async fn check(&self) -> Vec<NodeId> {
        let topology = match self.registry.snapshot() {
            Ok(topology) => topology,
            Err(e) => {
                debug!(%e, "skipping health check");
                return Vec::new();
            }
        };

        let mut recovered = Vec::new();
        for node in topology.iter().filter(|n| !n.is_up()) {
            if let Err(e) = probe(&*node.pool, self.probe_timeout).await {
                debug!(node = node.id, %e, "node is still down");
                continue;
            }
            info!(node = node.id, "down node is answering again");

            // A master that was marked down without an election never stopped being the
            // master, there's nothing to follow
            if node.is_master() && self.registry.find(|n| n.is_master() && n.is_up()).is_none() {
                match self.registry.set_status(node.id, Status::Up) {
                    Ok(_) => {
                        warn!(node = node.id, "master is back up without a failover");
                        recovered.push(node.id);
                    },
                    Err(e) => error!(node = node.id, %e, "could not mark master up"),
                }
                continue;
            }

            match self.coordinator.recover_down_node(node.id).await {
                Ok(()) => recovered.push(node.id),
                Err(e) => error!(node = node.id, %e, "recovery failed"),
            }
        }
        recovered
    }
}
