pub mod tributary;
#[cfg(test)]
mod tests;

pub use crate::tributary::*;

use std::io;

use tokio::runtime::{Runtime, Builder};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::FmtSubscriber;
use tracing::{error, info, Level};

use crate::tributary::backend::MySqlPool;
use crate::tributary::cluster::Cluster;
use crate::tributary::config::{Settings, load_config};


pub fn init_tracing(max_level: Level) {
    let subscriber = FmtSubscriber::builder()
        // all spans/events with a level higher than max_level will be written to stdout.
        .with_max_level(max_level)
        // completes the builder.
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");
}

/// Load the configuration settings from tributary.yaml
/// See tributary::config::load_config for more info.
pub fn init_settings() -> Result<&'static Settings> {
    load_config("tributary.yaml")
}

/// Everything runs on one thread: the coordinator is I/O bound
/// and the cluster state is small.
pub fn init_runtime() -> io::Result<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .build()
}

/// Connect to the cluster, run the background tasks until Ctrl-C, then close every node.
pub fn run_coordinator(conf: &'static Settings, tokio: &Runtime) -> Result<()> {
    tokio.block_on(async move {
        let cluster = Cluster::new(conf, MySqlPool::factory());
        let topology = cluster.registry.initialize().await?;
        info!(?topology, "cluster initialized");

        let shutdown = CancellationToken::new();
        let mut handles = Vec::new();
        handles.push(cluster.health_monitor().spawn(shutdown.child_token()));

        // Repairs the misses of every UserService built with cluster.users()
        if let Some(period) = conf.reconcile_interval() {
            handles.push(cluster.reconciler().spawn(period, shutdown.child_token()));
        }

        tokio::signal::ctrl_c().await?;
        info!("shutting down");
        shutdown.cancel();
        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                error!(%e, "background task failed");
            }
        }
        cluster.registry.close_all().await;
        Ok::<_, Error>(())
    })
}

/// Copy every user on the master to its fragment, then close the cluster.
pub fn run_hard_sync(conf: &'static Settings, tokio: &Runtime) -> Result<()> {
    tokio.block_on(async move {
        let cluster = Cluster::new(conf, MySqlPool::factory());
        cluster.registry.initialize().await?;
        let result = cluster.reconciler().hard_sync().await;
        cluster.registry.close_all().await;
        let counts = result?;
        info!(node_2006 = counts.rows_2006, node_2007 = counts.rows_2007, "synced");
        Ok::<_, Error>(())
    })
}
