use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::time::Duration;

use test_env_log::test;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::pgrelay::cluster::{Cluster, KeyRegistry};
use crate::pgrelay::pg::protocol::{MessageBuilder, Tag, CANCEL_REQUEST};
use crate::tests::common::{
    self, BackendOptions, TestClient, TestCluster, TestDatabase, TestDirectory, TEST_DATABASE,
    TEST_PASSWORD,
};

const SECRET_KEY: i32 = 0xDEADBEEFu32 as i32;

/// Relay one byte through the echoing backend; once it comes back, the
/// registry insert (which happens before the first relayed byte) is visible.
async fn relay_roundtrip(client: &mut TestClient) {
    client.stream.write_all(b"x").await.unwrap();
    let mut buf = [0u8; 1];
    client.stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"x");
}

#[test(tokio::test)]
async fn test_cancel_is_routed_to_the_owning_cluster() {
    let backend = common::spawn_backend(BackendOptions {
        process_id: 4321,
        first_secret_key: SECRET_KEY,
        ..BackendOptions::default()
    })
    .await;
    let cluster = TestCluster::new("b", TEST_PASSWORD, &backend.host());
    cluster.add_db(TEST_DATABASE, TestDatabase::new_ready());
    let (addr, proxy) = common::spawn_proxy(
        TestDirectory {
            clusters: vec![cluster],
        },
        true,
    )
    .await;

    let (mut client, (process_id, secret_key)) =
        TestClient::handshake(addr, "alice", TEST_DATABASE, TEST_PASSWORD).await;
    assert_eq!((process_id, secret_key), (4321, SECRET_KEY));

    relay_roundtrip(&mut client).await;
    assert_eq!(proxy.registry().len(), 1);
    assert!(proxy.registry().get(SECRET_KEY).is_some());

    // a fresh, unauthenticated connection carrying the key
    let mut canceller = TestClient::connect(addr).await;
    canceller.send_cancel(4321, SECRET_KEY).await;
    common::wait_until(
        || backend.cancels.lock().unwrap().len() == 1,
        "the cancel frame reaches the backend",
    )
    .await;
    canceller.expect_eof().await;

    // exactly one extra dial, and the frame arrived verbatim
    assert_eq!(backend.accepted.load(Relaxed), 2);
    let mut mb = MessageBuilder::new(Tag::UNTAGGED);
    mb.write_i32(CANCEL_REQUEST);
    mb.write_i32(4321);
    mb.write_i32(SECRET_KEY);
    let expected = mb.finish();
    assert_eq!(&backend.cancels.lock().unwrap()[0][..], expected.as_slice());

    // the original session is untouched by the cancel path
    relay_roundtrip(&mut client).await;
}

#[test(tokio::test)]
async fn test_cancel_with_unknown_key_is_dropped_silently() {
    let backend = common::spawn_backend(BackendOptions::default()).await;
    let cluster = TestCluster::new("b", TEST_PASSWORD, &backend.host());
    cluster.add_db(TEST_DATABASE, TestDatabase::new_ready());
    let (addr, proxy) = common::spawn_proxy(
        TestDirectory {
            clusters: vec![cluster],
        },
        true,
    )
    .await;

    let mut canceller = TestClient::connect(addr).await;
    canceller.send_cancel(0, 0).await;
    // no reply, no dial
    canceller.expect_eof().await;
    assert_eq!(backend.accepted.load(Relaxed), 0);
    assert!(backend.cancels.lock().unwrap().is_empty());
    assert!(proxy.registry().is_empty());
}

#[test(tokio::test)]
async fn test_registry_entry_does_not_survive_its_session() {
    let backend = common::spawn_backend(BackendOptions::default()).await;
    let cluster = TestCluster::new("b", TEST_PASSWORD, &backend.host());
    cluster.add_db(TEST_DATABASE, TestDatabase::new_ready());
    let (addr, proxy) = common::spawn_proxy(
        TestDirectory {
            clusters: vec![cluster],
        },
        true,
    )
    .await;

    let (mut client, _) = TestClient::handshake(addr, "alice", TEST_DATABASE, TEST_PASSWORD).await;
    relay_roundtrip(&mut client).await;
    assert_eq!(proxy.registry().len(), 1);

    drop(client);
    common::wait_until(
        || proxy.registry().is_empty(),
        "the registry entry is removed when the session ends",
    )
    .await;
}

#[test(tokio::test)]
async fn test_concurrent_sessions_keep_the_registry_consistent() {
    let backend = common::spawn_backend(BackendOptions::default()).await;
    let cluster = TestCluster::new("b", TEST_PASSWORD, &backend.host());
    cluster.add_db(TEST_DATABASE, TestDatabase::new_ready());
    let (addr, proxy) = common::spawn_proxy(
        TestDirectory {
            clusters: vec![cluster],
        },
        true,
    )
    .await;

    let mut clients = Vec::new();
    for _ in 0..8 {
        let (mut client, (_, secret_key)) =
            TestClient::handshake(addr, "alice", TEST_DATABASE, TEST_PASSWORD).await;
        relay_roundtrip(&mut client).await;
        clients.push((client, secret_key));
    }
    assert_eq!(proxy.registry().len(), 8);

    // every live session's key routes
    for (_, secret_key) in &clients {
        assert!(proxy.registry().get(*secret_key).is_some());
    }

    // closing half the sessions removes exactly their entries
    let keep = clients.split_off(4);
    drop(clients);
    common::wait_until(
        || proxy.registry().len() == 4,
        "half the registry entries are removed",
    )
    .await;
    for (_, secret_key) in &keep {
        assert!(proxy.registry().get(*secret_key).is_some());
    }

    drop(keep);
    common::wait_until(|| proxy.registry().is_empty(), "the registry drains").await;
    // give the session tasks a moment; no stragglers should reappear
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(proxy.registry().is_empty());
}

#[test]
fn test_registry_survives_concurrent_register_unregister() {
    let registry = KeyRegistry::new();
    let cluster = TestCluster::new("x", "t", "127.0.0.1:1");
    std::thread::scope(|s| {
        for t in 0..8i32 {
            let registry = &registry;
            let cluster = cluster.clone();
            s.spawn(move || {
                for i in 0..200 {
                    let key = t * 1000 + i;
                    let guard = registry.register(key, cluster.clone() as Arc<dyn Cluster>);
                    assert!(registry.get(key).is_some());
                    drop(guard);
                    assert!(registry.get(key).is_none());
                }
            });
        }
    });
    assert!(registry.is_empty());
}

#[test]
fn test_registry_last_insert_wins_on_key_collision() {
    let registry = KeyRegistry::new();
    let first = TestCluster::new("first", "t1", "127.0.0.1:1");
    let second = TestCluster::new("second", "t2", "127.0.0.1:2");

    let guard_a = registry.register(7, first as Arc<dyn Cluster>);
    let guard_b = registry.register(7, second as Arc<dyn Cluster>);
    assert_eq!(registry.get(7).unwrap().id(), "second");

    // a prior session deletes its entry on exit either way
    drop(guard_a);
    drop(guard_b);
    assert!(registry.is_empty());
}
