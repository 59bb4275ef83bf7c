use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::tributary::backend::{NodeConn, NodePool};
use crate::tributary::cluster::{Node, Partition, Registry};
use crate::tributary::users::service::finish;
use crate::tributary::users::{PendingRepairs, User};
use crate::tributary::{Error, Result};


/// Counts of rows copied to each fragment by a hard sync.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct SyncCounts {
    pub rows_2006: usize,
    pub rows_2007: usize,
}

impl SyncCounts {
    fn add(&mut self, partition: Partition, n: usize) {
        match partition {
            Partition::Y2006 => self.rows_2006 += n,
            Partition::Y2007 => self.rows_2007 += n,
        }
    }
}

/// Reconciler copies rows from the master to the fragments that fell behind.
pub struct Reconciler<P: NodePool> {
    registry: Arc<Registry<P>>,
    pending: Arc<PendingRepairs>,
}

impl<P: NodePool> Reconciler<P> {
    pub fn new(registry: Arc<Registry<P>>, pending: Arc<PendingRepairs>) -> Self {
        Self{ registry, pending }
    }

    /// Run reconcile_pending every period on its own task until token is cancelled.
    pub fn spawn(self, period: Duration, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(period, token).instrument(info_span!("reconciler")))
    }

    async fn run(self, period: Duration, token: CancellationToken) {
        let mut ticks = interval(period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticks.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticks.tick() => {
                    if let Err(e) = self.reconcile_pending().await {
                        error!(%e, "reconciling pending repairs failed");
                    }
                }
            }
        }
        info!("reconciler stopped");
    }

    fn master(&self) -> Result<Node<P>> {
        self.registry.find(|n| n.is_master() && n.is_up()).ok_or_else(Error::no_master)
    }

    fn fragment(&self, partition: Partition) -> Option<Node<P>> {
        self.registry.find(|n| n.role.partition() == Some(partition) && n.is_up())
    }

    /// Repair the rows marked pending. Rows that still can't be repaired are
    /// marked again. Returns the number of rows repaired.
    pub async fn reconcile_pending(&self) -> Result<usize> {
        let marked = self.pending.take();
        if marked.is_empty() {
            return Ok(0);
        }
        let master = match self.master() {
            Ok(master) => master,
            Err(e) => {
                for (id, partition) in marked {
                    self.pending.mark(id, partition);
                }
                return Err(e);
            }
        };

        let mut repaired = 0;
        for (id, partition) in marked {
            match self.repair(&master, id, partition).await {
                Ok(true) => repaired += 1,
                Ok(false) => info!(id, "user no longer exists on the master, dropping repair"),
                Err(e) => {
                    warn!(id, %partition, %e, "repair failed, will retry");
                    self.pending.mark(id, partition);
                }
            }
        }
        info!(repaired, remaining = self.pending.len(), "pending repairs reconciled");
        Ok(repaired)
    }

    async fn repair(&self, master: &Node<P>, id: u64, partition: Partition) -> Result<bool> {
        let user = {
            let mut conn = master.pool.get().await?;
            conn.select_user(id).await?
        };
        let user = match user {
            Some(user) => user,
            None => return Ok(false),
        };
        if user.partition().ok() != Some(partition) {
            // The marker predates a change we don't mirror, nothing to copy
            return Ok(false);
        }
        let fragment = self.fragment(partition)
            .ok_or_else(|| Error::new(format!("fragment for {} is down", partition)))?;
        if fragment.id == master.id {
            return Ok(false);
        }
        upsert_all(&fragment, std::slice::from_ref(&user)).await?;
        Ok(true)
    }

    /// Copy every user on the master to the fragment for its birth year.
    /// Rows without a birth date or outside 2006 and 2007 are skipped.
    pub async fn hard_sync(&self) -> Result<SyncCounts> {
        let master = self.master()?;
        let rows = {
            let mut conn = master.pool.get().await?;
            conn.select_users().await?
        };

        let total = rows.len();
        let mut by_partition: Vec<(Partition, Vec<User>)> = Partition::ALL.iter().map(|p| (*p, Vec::new())).collect();
        for user in rows {
            if let Ok(partition) = user.partition() {
                if let Some((_, users)) = by_partition.iter_mut().find(|(p, _)| *p == partition) {
                    users.push(user);
                }
            }
        }
        info!(master = master.id, total, rows_2006 = by_partition[0].1.len(), rows_2007 = by_partition[1].1.len(), "read users from master");

        let mut counts = SyncCounts::default();
        for (partition, users) in by_partition {
            let fragment = match self.fragment(partition) {
                Some(fragment) if fragment.id != master.id => fragment,
                Some(_) => continue,
                None => {
                    error!(%partition, "fragment is down, cannot sync");
                    return Err(Error::new(format!("fragment for {} is down", partition)));
                }
            };
            upsert_all(&fragment, &users).await?;
            self.pending.clear_partition(partition);
            counts.add(partition, users.len());
        }
        info!(rows_2006 = counts.rows_2006, rows_2007 = counts.rows_2007, "hard sync complete");
        Ok(counts)
    }
}

/// Upsert users into node in a single transaction.
async fn upsert_all<P: NodePool>(node: &Node<P>, users: &[User]) -> Result<()> {
    if users.is_empty() {
        return Ok(());
    }
    let mut conn = node.pool.get().await?;
    conn.begin(None).await?;
    let mut result = Ok(());
    for user in users {
        result = conn.upsert_user(user).await;
        if result.is_err() {
            break;
        }
    }
    finish(&mut conn, result).await
}
