use test_env_log::test;
use tokio::time::{sleep, Duration};

use crate::tests::common::{SimCluster, user, user_with_id};
use crate::tributary::backend::{IsolationLevel, NodePool};
use crate::tributary::cluster::{Partition, Role, Status};
use crate::tributary::users::{UpdateOptions, User, UserPatch};
use crate::tributary::{Error, ErrorKind};


fn ids(users: &[User]) -> Vec<u64> {
    users.iter().filter_map(|u| u.id).collect()
}

#[test(tokio::test)]
async fn test_create_user_writes_primary_then_fragment() {
    let sim = SimCluster::started().await;

    let id06 = sim.users.create_user(user("Ana", "2006-05-01")).await.unwrap();
    let id07 = sim.users.create_user(user("Ben", "2007-12-31")).await.unwrap();
    assert_ne!(id06, id07);

    assert_eq!(sim.node(2).ids(), vec![id06, id07]);
    assert_eq!(sim.node(1).ids(), vec![id06]);
    assert_eq!(sim.node(3).ids(), vec![id07]);
    // The fragment gets the id generated by the primary
    assert_eq!(sim.node(1).row(id06), sim.node(2).row(id06));
    assert!(sim.pending.is_empty());

    let rows = sim.users.get_all_users_by_date(2007).await.unwrap();
    assert_eq!(ids(&rows), vec![id07]);
    assert_eq!(rows[0].first_name.as_deref(), Some("Ben"));
}

#[test(tokio::test)]
async fn test_create_user_rejects_birth_years_outside_partitions() {
    let sim = SimCluster::started().await;

    let err = sim.users.create_user(user("Cy", "2008-01-01")).await.unwrap_err();
    assert_eq!(err, Error::validation(""));
    assert_eq!(err.status_code(), 400);

    let no_date = User{ date_of_birth: None, ..user("Di", "2006-01-01") };
    assert_eq!(sim.users.create_user(no_date).await, Err(Error::validation("")));

    assert!(sim.node(2).ids().is_empty());
}

#[test(tokio::test)]
async fn test_create_user_primary_failure_rolls_back() {
    let sim = SimCluster::started().await;
    sim.node(2).fail_writes(true);

    let err = sim.users.create_user(user("Ana", "2006-05-01")).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::PrimaryTransactionFailure(_)));
    assert!(sim.node(2).ids().is_empty());
    assert!(sim.node(1).ids().is_empty());
}

#[test(tokio::test)]
async fn test_create_user_fragment_failure_is_swallowed() {
    let sim = SimCluster::started().await;
    sim.node(1).fail_writes(true);

    let id = sim.users.create_user(user("Ana", "2006-05-01")).await.unwrap();
    assert_eq!(sim.node(2).ids(), vec![id]);
    assert!(sim.node(1).ids().is_empty());
    assert!(sim.pending.contains(id));
}

#[test(tokio::test)]
async fn test_create_user_skips_down_fragment() {
    let sim = SimCluster::started().await;
    sim.cluster.registry.close_node(3).await.unwrap();

    let id = sim.users.create_user(user("Ben", "2007-02-02")).await.unwrap();
    assert_eq!(sim.node(2).ids(), vec![id]);
    assert!(sim.pending.contains(id));
    assert_eq!(sim.pending.take(), vec![(id, Partition::Y2007)]);
}

#[test(tokio::test)]
async fn test_create_user_waits_for_a_pool_slot() {
    let sim = SimCluster::started().await;
    let master = sim.cluster.registry.find(|n| n.id == 2).unwrap();
    let mut held = Vec::new();
    for _ in 0..4 {
        held.push(master.pool.get().await.unwrap());
    }
    let release = async move {
        sleep(Duration::from_millis(50)).await;
        drop(held);
    };

    let (created, ()) = futures::join!(sim.users.create_user(user("Ana", "2006-05-01")), release);
    let id = created.unwrap();
    assert_eq!(sim.node(2).ids(), vec![id]);
    assert_eq!(sim.role(2), Role::Master);
    assert!(sim.node(1).row(id).is_some());
}

#[test(tokio::test)]
async fn test_get_all_users_merges_fragments() {
    let sim = SimCluster::started().await;
    sim.node(1).seed(user_with_id(1, "Ana", "2006-05-01"));
    sim.node(1).seed(user_with_id(4, "Dee", "2006-07-01"));
    sim.node(3).seed(user_with_id(2, "Ben", "2007-02-02"));
    // Replicated rows show up on both fragments
    sim.node(3).seed(user_with_id(1, "Ana", "2006-05-01"));

    let users = sim.users.get_all_users().await.unwrap();
    assert_eq!(ids(&users), vec![1, 2, 4]);
}

#[test(tokio::test)]
async fn test_get_all_users_with_one_fragment_down() {
    let sim = SimCluster::started().await;
    sim.node(1).seed(user_with_id(1, "Ana", "2006-05-01"));
    sim.node(3).seed(user_with_id(2, "Ben", "2007-02-02"));
    sim.node(1).set_reachable(false);

    // Both reads are served by node 3
    let users = sim.users.get_all_users().await.unwrap();
    assert_eq!(ids(&users), vec![2]);
    assert_eq!(sim.status(1), Status::Down);
}

#[test(tokio::test)]
async fn test_get_all_users_fails_when_no_fragment_is_readable() {
    let sim = SimCluster::started().await;
    sim.node(1).set_reachable(false);
    sim.node(3).set_reachable(false);

    assert_eq!(sim.users.get_all_users().await, Err(Error::no_read_replica()));
}

#[test(tokio::test)]
async fn test_get_user_by_id() {
    let sim = SimCluster::started().await;
    sim.node(2).seed(user_with_id(9, "Ana", "2006-05-01"));
    sim.node(3).seed(user_with_id(9, "Ana", "2006-05-01"));

    let found = sim.users.get_user_by_id(9).await.unwrap().unwrap();
    assert_eq!(found.first_name.as_deref(), Some("Ana"));
    assert_eq!(sim.users.get_user_by_id(10).await, Ok(None));
}

#[test(tokio::test)]
async fn test_get_user_by_id_reads_master_when_fragments_fail() {
    let sim = SimCluster::started().await;
    sim.node(2).seed(user_with_id(9, "Ana", "2006-05-01"));
    sim.node(1).set_reachable(false);
    sim.node(3).set_reachable(false);

    let found = sim.users.get_user_by_id(9).await.unwrap();
    assert_eq!(found.and_then(|u| u.id), Some(9));
}

#[test(tokio::test)]
async fn test_get_all_users_by_date_filters_rows() {
    let sim = SimCluster::started().await;
    sim.node(1).seed(user_with_id(1, "Ana", "2006-05-01"));
    sim.node(1).seed(user_with_id(2, "Ben", "2007-02-02"));

    let users = sim.users.get_all_users_by_date(2006).await.unwrap();
    assert_eq!(ids(&users), vec![1]);
    assert_eq!(sim.users.get_all_users_by_date(2005).await, Err(Error::validation("")));
}

#[test(tokio::test)]
async fn test_update_user_applies_to_primary_and_fragment() {
    let sim = SimCluster::started().await;
    let id = sim.users.create_user(user("Ana", "2006-05-01")).await.unwrap();

    let patch = UserPatch::new().set("city", "Cebu").set("dateOfBirth", "06/30/2006");
    let affected = sim.users.update_user_by_id(id, &patch, UpdateOptions::default()).await.unwrap();
    assert_eq!(affected, 1);

    for node in [2, 1].iter() {
        let row = sim.node(*node).row(id).unwrap();
        assert_eq!(row.city.as_deref(), Some("Cebu"), "node {}", node);
        assert_eq!(row.column("dateOfBirth").as_deref(), Some("2006-06-30"));
    }
    assert!(sim.pending.is_empty());
}

#[test(tokio::test)]
async fn test_update_user_isolation_level() {
    let sim = SimCluster::started().await;
    let id = sim.users.create_user(user("Ana", "2006-05-01")).await.unwrap();

    let options = UpdateOptions{ isolation: Some(IsolationLevel::Serializable) };
    let patch = UserPatch::new().set("gender", "F");
    sim.users.update_user_by_id(id, &patch, options).await.unwrap();
    assert_eq!(sim.node(2).count_commands("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"), 1);
    assert_eq!(sim.node(1).count_commands("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"), 1);
}

#[test(tokio::test)]
async fn test_update_user_rejects_cross_partition_change() {
    let sim = SimCluster::started().await;
    let id = sim.users.create_user(user("Ana", "2006-05-01")).await.unwrap();
    let before = sim.node(2).row(id);

    let patch = UserPatch::new().set("city", "Davao").set("dateOfBirth", "2007-01-01");
    let err = sim.users.update_user_by_id(id, &patch, UpdateOptions::default()).await.unwrap_err();
    assert_eq!(err, Error::validation(""));
    assert_eq!(err.to_string(), "Changing DOB year across shards is not supported in this operation.");
    assert_eq!(sim.node(2).row(id), before);
    assert_eq!(sim.node(1).row(id), before);

    let patch = UserPatch::new().set("dateOfBirth", "2009-01-01");
    let err = sim.users.update_user_by_id(id, &patch, UpdateOptions::default()).await.unwrap_err();
    assert_eq!(err.to_string(), "DOB must remain 2006 or 2007.");

    let patch = UserPatch::new().clear("dateOfBirth");
    assert_eq!(sim.users.update_user_by_id(id, &patch, UpdateOptions::default()).await, Err(Error::validation("")));
    assert_eq!(sim.node(2).row(id), before);
}

#[test(tokio::test)]
async fn test_update_user_rejects_bad_patches() {
    let sim = SimCluster::started().await;
    let id = sim.users.create_user(user("Ana", "2006-05-01")).await.unwrap();
    let options = UpdateOptions::default();

    let err = sim.users.update_user_by_id(id, &UserPatch::new().set("id", "77"), options).await.unwrap_err();
    assert_eq!(err, Error::authorization(""));
    assert_eq!(err.to_string(), "Unauthorized column: id");
    assert_eq!(err.status_code(), 400);

    let err = sim.users.update_user_by_id(id, &UserPatch::new(), options).await.unwrap_err();
    assert_eq!(err.to_string(), "No valid columns provided.");

    let err = sim.users.update_user_by_id(404, &UserPatch::new().set("city", "Iloilo"), options).await.unwrap_err();
    assert_eq!(err, Error::not_found(404));
    assert_eq!(err.status_code(), 404);
}

#[test(tokio::test)]
async fn test_update_user_outside_partitions() {
    let sim = SimCluster::started().await;
    sim.node(2).seed(user_with_id(3, "Old", "1999-01-01"));

    let patch = UserPatch::new().set("city", "Iloilo");
    let err = sim.users.update_user_by_id(3, &patch, UpdateOptions::default()).await.unwrap_err();
    assert_eq!(err.to_string(), "Only users with DOB 2006 or 2007 can be updated.");
}

#[test(tokio::test)]
async fn test_update_user_missing_from_fragment_is_marked() {
    let sim = SimCluster::started().await;
    sim.node(2).seed(user_with_id(5, "Eve", "2007-03-03"));

    let patch = UserPatch::new().set("city", "Baguio");
    assert_eq!(sim.users.update_user_by_id(5, &patch, UpdateOptions::default()).await, Ok(1));
    assert!(sim.node(3).row(5).is_none());
    assert!(sim.pending.contains(5));
}

#[test(tokio::test)]
async fn test_delete_user_is_not_mirrored() {
    let sim = SimCluster::started().await;
    let id = sim.users.create_user(user("Ana", "2006-05-01")).await.unwrap();

    assert_eq!(sim.users.delete_user_by_id(id).await, Ok(1));
    assert!(sim.node(2).row(id).is_none());
    // The fragment catches up through replication
    assert!(sim.node(1).row(id).is_some());

    assert_eq!(sim.users.delete_user_by_id(id).await, Err(Error::not_found(id)));
}

#[test(tokio::test)]
async fn test_delete_user_outside_partitions() {
    let sim = SimCluster::started().await;
    sim.node(2).seed(user_with_id(3, "Old", "1999-01-01"));

    let err = sim.users.delete_user_by_id(3).await.unwrap_err();
    assert_eq!(err.to_string(), "Only users with DOB 2006 or 2007 can be deleted.");
    assert!(sim.node(2).row(3).is_some());
}
