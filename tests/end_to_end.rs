//! End-to-end tests: a coordinator, real replicas and the client library

use minifs::common::{CoordinatorConfig, ReplicaConfig};
use minifs::coordinator::OperationCoordinator;
use minifs::replica::FileStore;
use minifs::{Client, Coordinator, Error, ReplicaServer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const ACK_TIMEOUT_MS: u64 = 500;
const CLIENT_TIMEOUT: Duration = Duration::from_secs(3);

struct Cluster {
    addr: SocketAddr,
    ops: Arc<OperationCoordinator>,
    stores: Vec<Arc<FileStore>>,
    _dirs: Vec<TempDir>,
}

async fn wait_for_replicas(ops: &OperationCoordinator, n: usize) {
    for _ in 0..300 {
        if ops.registry().len().unwrap() == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("replicas did not register in time");
}

async fn start_cluster(replication_factor: usize, replicas: usize) -> Cluster {
    let coordinator = Coordinator::bind(CoordinatorConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        replication_factor,
        timeout_ms: ACK_TIMEOUT_MS,
        ..Default::default()
    })
    .await
    .unwrap();
    let addr = coordinator.local_addr().unwrap();
    let ops = coordinator.operations();
    tokio::spawn(coordinator.serve());

    let mut stores = Vec::new();
    let mut dirs = Vec::new();
    for _ in 0..replicas {
        let dir = TempDir::new().unwrap();
        let server = ReplicaServer::bind(ReplicaConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            coordinator_addr: addr,
            timeout_ms: ACK_TIMEOUT_MS,
            data_dir: dir.path().to_path_buf(),
            clean_on_start: true,
        })
        .await
        .unwrap();
        stores.push(server.store());
        dirs.push(dir);
        tokio::spawn(server.serve());
    }
    wait_for_replicas(&ops, replicas).await;

    Cluster {
        addr,
        ops,
        stores,
        _dirs: dirs,
    }
}

#[tokio::test]
async fn test_store_list_load_remove() {
    let cluster = start_cluster(2, 2).await;
    let mut client = Client::connect(cluster.addr, CLIENT_TIMEOUT).await.unwrap();

    client.store("hello.txt", b"hello world").await.unwrap();
    assert_eq!(client.list().await.unwrap(), vec!["hello.txt"]);
    for store in &cluster.stores {
        assert_eq!(store.list().unwrap(), vec!["hello.txt"]);
    }

    assert_eq!(client.load("hello.txt").await.unwrap(), b"hello world");

    assert!(matches!(
        client.store("hello.txt", b"again").await,
        Err(Error::AlreadyExists(_))
    ));

    client.remove("hello.txt").await.unwrap();
    assert!(client.list().await.unwrap().is_empty());
    for store in &cluster.stores {
        assert!(store.list().unwrap().is_empty());
    }
    assert!(matches!(
        client.load("hello.txt").await,
        Err(Error::NotFound(_))
    ));

    // The name is free again after a remove
    client.store("hello.txt", b"v2").await.unwrap();
    assert_eq!(client.load("hello.txt").await.unwrap(), b"v2");
}

#[tokio::test]
async fn test_not_enough_replicas() {
    let cluster = start_cluster(3, 2).await;
    let mut client = Client::connect(cluster.addr, CLIENT_TIMEOUT).await.unwrap();

    assert!(matches!(
        client.store("big.bin", &[0u8; 64]).await,
        Err(Error::InsufficientReplicas { .. })
    ));
    assert!(client.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_load_fails_over_then_exhausts() {
    let cluster = start_cluster(2, 2).await;
    let mut client = Client::connect(cluster.addr, CLIENT_TIMEOUT).await.unwrap();
    client.store("data.bin", b"0123456789").await.unwrap();

    // Lose the copy on one replica behind the coordinator's back
    assert!(cluster.stores[0].remove("data.bin").await.unwrap());
    assert_eq!(client.load("data.bin").await.unwrap(), b"0123456789");

    assert!(cluster.stores[1].remove("data.bin").await.unwrap());
    assert!(matches!(
        client.load("data.bin").await,
        Err(Error::LoadExhausted(_))
    ));

    // Still listed: only the coordinator decides what exists
    assert_eq!(client.list().await.unwrap(), vec!["data.bin"]);
}

#[tokio::test]
async fn test_placement_spreads_files() {
    let cluster = start_cluster(1, 2).await;
    let mut client = Client::connect(cluster.addr, CLIENT_TIMEOUT).await.unwrap();

    for name in ["a", "b", "c", "d"] {
        client.store(name, name.as_bytes()).await.unwrap();
    }

    let counts: Vec<usize> = cluster
        .ops
        .registry()
        .file_counts()
        .unwrap()
        .into_iter()
        .map(|(_, n)| n)
        .collect();
    assert_eq!(counts, vec![2, 2]);
    for store in &cluster.stores {
        assert_eq!(store.list().unwrap().len(), 2);
    }
}

#[tokio::test]
async fn test_concurrent_clients_store_same_name() {
    let cluster = start_cluster(2, 2).await;

    let mut tasks = Vec::new();
    for i in 0..4u8 {
        let addr = cluster.addr;
        tasks.push(tokio::spawn(async move {
            let mut client = Client::connect(addr, CLIENT_TIMEOUT).await.unwrap();
            client.store("shared", &[i; 16]).await
        }));
    }

    let mut successes = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => successes += 1,
            Err(Error::AlreadyExists(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(successes, 1);

    let mut client = Client::connect(cluster.addr, CLIENT_TIMEOUT).await.unwrap();
    assert_eq!(client.list().await.unwrap(), vec!["shared"]);
    assert_eq!(client.load("shared").await.unwrap().len(), 16);
}
