use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::tributary::backend::{IsolationLevel, NodeConn, NodePool};
use crate::tributary::cluster::{Cluster, Node, Partition, Router};
use crate::tributary::users::{PendingRepairs, User, UserPatch};
use crate::tributary::{Error, ErrorKind, Result};


/// Options for update_user_by_id.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Applied to the primary transaction and to the fragment transaction.
    pub isolation: Option<IsolationLevel>,
}

/// The user operations over the sharded Users table.
///
/// Writes commit on the master first, then are mirrored best-effort to the fragment
/// for the row's birth year in a separate transaction. A mirror that could not be
/// applied leaves a marker in PendingRepairs. Reads go to the fragments.
pub struct UserService<P: NodePool> {
    router: Arc<Router<P>>,
    pending: Arc<PendingRepairs>,
}

impl<P: NodePool> UserService<P> {
    pub fn new(router: Arc<Router<P>>, pending: Arc<PendingRepairs>) -> Self {
        Self{ router, pending }
    }

    /// Shares the cluster's pending repairs, so its Reconciler sees every miss.
    pub fn for_cluster(cluster: &Cluster<P>) -> Self {
        Self::new(cluster.router.clone(), cluster.pending.clone())
    }

    pub fn pending(&self) -> &Arc<PendingRepairs> {
        &self.pending
    }

    /// Insert user on the master and mirror it to its fragment. Returns the new row id.
    #[instrument(skip(self, user))]
    pub async fn create_user(&self, mut user: User) -> Result<u64> {
        let partition = user.partition()?;
        let master = self.router.write_pool().await?;

        let id = {
            let mut conn = master.pool.get().await.map_err(primary_failure)?;
            conn.begin(None).await.map_err(primary_failure)?;
            let result = conn.insert_user(&user).await;
            finish(&mut conn, result).await.map_err(|e| {
                error!(%e, "insert failed, rolled back");
                primary_failure(e)
            })?
        };
        user.id = Some(id);
        info!(id, %partition, node = master.id, "user created on primary");

        if let Some(fragment) = self.mirror_target(&master, partition, id) {
            let result = async {
                let mut conn = fragment.pool.get().await?;
                conn.begin(None).await?;
                let result = conn.upsert_user(&user).await;
                finish(&mut conn, result).await
            }.await;
            match result {
                Ok(()) => debug!(id, node = fragment.id, "user mirrored to fragment"),
                Err(e) => {
                    let e = Error::fragment_transaction(e);
                    warn!(id, node = fragment.id, %e, "fragment insert failed, primary is ahead");
                    self.pending.mark(id, partition);
                }
            }
        }
        Ok(id)
    }

    /// Every user from both fragments, ordered by id.
    /// Fails only if neither fragment could be read.
    pub async fn get_all_users(&self) -> Result<Vec<User>> {
        let (rows06, rows07) = futures::join!(
            self.read_all(Partition::Y2006),
            self.read_all(Partition::Y2007),
        );
        let mut merged = BTreeMap::new();
        let mut failures = Vec::new();
        for result in vec![rows06, rows07] {
            match result {
                Ok(rows) => {
                    for user in rows {
                        if let Some(id) = user.id {
                            merged.entry(id).or_insert(user);
                        }
                    }
                },
                Err(e) => {
                    warn!(%e, "could not read a fragment");
                    failures.push(e);
                }
            }
        }
        if failures.len() == Partition::ALL.len() {
            return Err(failures.remove(0));
        }
        Ok(merged.into_values().collect())
    }

    /// Look a user up on both fragments. Falls back to the master only when
    /// neither fragment could be read.
    pub async fn get_user_by_id(&self, id: u64) -> Result<Option<User>> {
        let (r06, r07) = futures::join!(
            self.read_one(Partition::Y2006, id),
            self.read_one(Partition::Y2007, id),
        );
        match (r06, r07) {
            (Ok(Some(user)), _) | (_, Ok(Some(user))) => Ok(Some(user)),
            (Err(e06), Err(e07)) => {
                warn!(id, %e06, %e07, "read from fragments failed, trying the master");
                let master = self.router.write_pool().await?;
                let mut conn = master.pool.get().await?;
                conn.select_user(id).await
            },
            _ => Ok(None),
        }
    }

    /// The users born in year, read from that year's fragment.
    pub async fn get_all_users_by_date(&self, year: i32) -> Result<Vec<User>> {
        let partition = Partition::from_year(year)?;
        let rows = self.read_all(partition).await?;
        Ok(rows.into_iter().filter(|u| u.birth_year() == Some(year)).collect())
    }

    /// Apply patch to a user on the master, then to its fragment.
    /// Returns the number of rows changed on the master.
    #[instrument(skip(self, patch, options), fields(columns = patch.len()))]
    pub async fn update_user_by_id(&self, id: u64, patch: &UserPatch, options: UpdateOptions) -> Result<u64> {
        let master = self.router.write_pool().await?;

        let (affected, partition) = {
            let mut conn = master.pool.get().await.map_err(primary_failure)?;
            conn.begin(options.isolation).await.map_err(primary_failure)?;
            let result = update_locked(&mut conn, id, patch).await;
            finish(&mut conn, result).await.map_err(primary_failure)?
        };
        info!(id, affected, node = master.id, "user updated on primary");

        if let Some(fragment) = self.mirror_target(&master, partition, id) {
            let result = async {
                let mut conn = fragment.pool.get().await?;
                conn.begin(options.isolation).await?;
                let result = match conn.lock_user(id).await {
                    Ok(Some(_)) => conn.update_user(id, patch).await.map(Some),
                    Ok(None) => Ok(None),
                    Err(e) => Err(e),
                };
                finish(&mut conn, result).await
            }.await;
            match result {
                Ok(Some(_)) => debug!(id, node = fragment.id, "update mirrored to fragment"),
                Ok(None) => {
                    warn!(id, node = fragment.id, "fragment is missing the updated user");
                    self.pending.mark(id, partition);
                },
                Err(e) => {
                    let e = Error::fragment_transaction(e);
                    warn!(id, node = fragment.id, %e, "fragment update failed, primary is ahead");
                    self.pending.mark(id, partition);
                }
            }
        }
        Ok(affected)
    }

    /// Delete a user on the master. Fragments catch up through replication.
    /// Returns the number of rows deleted.
    #[instrument(skip(self))]
    pub async fn delete_user_by_id(&self, id: u64) -> Result<u64> {
        let master = self.router.write_pool().await?;
        let mut conn = master.pool.get().await.map_err(primary_failure)?;
        conn.begin(None).await.map_err(primary_failure)?;
        let result = delete_locked(&mut conn, id).await;
        let deleted = finish(&mut conn, result).await.map_err(|e| {
            error!(id, %e, "delete failed, rolled back");
            primary_failure(e)
        })?;
        info!(id, deleted, node = master.id, "user deleted on primary");
        Ok(deleted)
    }

    /// The fragment a write for partition should be mirrored to, or None if the
    /// mirror has to be skipped. A skip because the fragment is unavailable is
    /// recorded as pending.
    fn mirror_target(&self, master: &Node<P>, partition: Partition, id: u64) -> Option<Node<P>> {
        match self.router.fragment_for(partition) {
            Some(fragment) if fragment.id == master.id => {
                debug!(id, %partition, "fragment is the master, nothing to mirror");
                None
            },
            Some(fragment) => Some(fragment),
            None => {
                warn!(id, %partition, "fragment is down, skipping mirror");
                self.pending.mark(id, partition);
                None
            }
        }
    }

    async fn read_all(&self, partition: Partition) -> Result<Vec<User>> {
        let node = self.router.read_pool(partition).await?;
        let mut conn = node.pool.get().await?;
        conn.select_users().await
    }

    async fn read_one(&self, partition: Partition, id: u64) -> Result<Option<User>> {
        let node = self.router.read_pool(partition).await?;
        let mut conn = node.pool.get().await?;
        conn.select_user(id).await
    }
}

/// The body of the update transaction: lock, validate, update.
/// Returns the rows changed and the row's partition.
async fn update_locked<C: NodeConn>(conn: &mut C, id: u64, patch: &UserPatch) -> Result<(u64, Partition)> {
    let current = conn.lock_user(id).await?.ok_or_else(|| Error::not_found(id))?;
    let partition = current.partition()
        .map_err(|_| Error::validation("Only users with DOB 2006 or 2007 can be updated."))?;
    if let Some(target) = patch.target_partition()? {
        if target != partition {
            return Err(Error::validation("Changing DOB year across shards is not supported in this operation."));
        }
    }
    patch.check_columns()?;
    let affected = conn.update_user(id, patch).await?;
    Ok((affected, partition))
}

async fn delete_locked<C: NodeConn>(conn: &mut C, id: u64) -> Result<u64> {
    let current = conn.lock_user(id).await?.ok_or_else(|| Error::not_found(id))?;
    current.partition()
        .map_err(|_| Error::validation("Only users with DOB 2006 or 2007 can be deleted."))?;
    conn.delete_user(id).await
}

/// Commit if result is Ok, otherwise roll back. The connection is released by the caller.
pub(crate) async fn finish<C: NodeConn, T>(conn: &mut C, result: Result<T>) -> Result<T> {
    match result {
        Ok(v) => match conn.commit().await {
            Ok(()) => Ok(v),
            Err(e) => {
                rollback_quietly(conn).await;
                Err(e)
            }
        },
        Err(e) => {
            rollback_quietly(conn).await;
            Err(e)
        }
    }
}

async fn rollback_quietly<C: NodeConn>(conn: &mut C) {
    if let Err(e) = conn.rollback().await {
        warn!(%e, "rollback failed");
    }
}

/// Wrap a failure of the primary transaction. Errors the caller can act on pass through.
fn primary_failure(e: Error) -> Error {
    if e.is_client_error() || matches!(e.kind(), ErrorKind::NotFound(_) | ErrorKind::PrimaryTransactionFailure(_)) {
        e
    } else {
        Error::primary_transaction(e)
    }
}
