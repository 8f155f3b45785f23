use async_trait::async_trait;
use pci::capture::Packet;
use pci::classifier::{Address, AddressClassifier, Category};
use pci::enrichment::{EnrichmentResolver, GeoLookup, GeoRecord, HostnameLookup, UNKNOWN};
use pci::error::{PciError, Result};
use pci::graph::{EntityKind, EntityRepository, GraphStore, RelationshipMerger};
use pci::ingest::Pipeline;
use pci::storage::Database;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn open_store(temp_dir: &TempDir) -> Arc<Database> {
    Arc::new(Database::new(&temp_dir.path().join("graph.sqlite")).unwrap())
}

struct GoogleDns {
    calls: AtomicUsize,
}

#[async_trait]
impl HostnameLookup for GoogleDns {
    async fn reverse_lookup(&self, ip: Ipv4Addr) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if ip == Ipv4Addr::new(8, 8, 8, 8) {
            Ok("dns.google".to_string())
        } else {
            Err(PciError::Enrichment("no PTR record".to_string()))
        }
    }
}

/// Reverse lookups that take a while to answer
struct SlowDns;

#[async_trait]
impl HostnameLookup for SlowDns {
    async fn reverse_lookup(&self, _ip: Ipv4Addr) -> Result<String> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok("dns.google".to_string())
    }
}

struct UsOnly;

impl GeoLookup for UsOnly {
    fn lookup(&self, ip: Ipv4Addr) -> Result<GeoRecord> {
        if ip.octets()[0] == 8 {
            Ok(GeoRecord {
                country_code: Some("US".to_string()),
                subdivision_code: None,
                city_name: None,
            })
        } else {
            Err(PciError::Enrichment("address not found".to_string()))
        }
    }
}

#[test]
fn test_upsert_idempotence() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir);
    let repository = EntityRepository::new(store.clone());
    let address = AddressClassifier::new().unwrap().classify("192.168.1.5");

    let first = repository.upsert(&address, None).unwrap();
    assert_eq!(first.count, 1);
    assert_eq!(first.created_at, first.last_update);

    let mut last = first.clone();
    for _ in 1..10 {
        last = repository.upsert(&address, None).unwrap();
    }

    assert_eq!(last.id, first.id);
    assert_eq!(last.count, 10);
    assert_eq!(last.created_at, first.created_at);
    assert!(last.last_update >= first.last_update);
    assert_eq!(store.stats().unwrap().local_machines, 1);
    assert_eq!(store.stats().unwrap().node_count(), 1);
}

#[test]
fn test_same_key_in_different_categories() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir);
    let repository = EntityRepository::new(store.clone());

    let local = repository
        .upsert(&Address::new(Category::LocalMachine, "10.0.0.1"), None)
        .unwrap();
    let public = repository
        .upsert(&Address::new(Category::Machine, "10.0.0.1"), None)
        .unwrap();

    assert_ne!(local.id, public.id);
    assert_eq!(store.stats().unwrap().node_count(), 2);
}

#[test]
fn test_merge_idempotence() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir);
    let classifier = AddressClassifier::new().unwrap();
    let repository = EntityRepository::new(store.clone());
    let merger = RelationshipMerger::new(store.clone());

    let a = repository
        .upsert(&classifier.classify("192.168.1.5"), None)
        .unwrap();
    let b = repository
        .upsert(&classifier.classify("08:00:27:12:34:56"), None)
        .unwrap();

    assert!(merger.merge_edge(&a, &b, "TCP").unwrap());
    for _ in 0..5 {
        assert!(!merger.merge_edge(&a, &b, "TCP").unwrap());
    }

    let edges = store.find_edges(a.id, b.id).unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].rel_type, "TCP");

    // Direction and protocol are part of the edge identity
    assert!(merger.merge_edge(&b, &a, "TCP").unwrap());
    assert!(merger.merge_edge(&a, &b, "UDP").unwrap());
    assert_eq!(store.stats().unwrap().relationships, 3);
}

#[test]
fn test_concurrent_upserts_lose_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir);
    let repository = EntityRepository::new(store.clone());
    let address = AddressClassifier::new().unwrap().classify("fe80::1");

    const THREADS: usize = 8;
    const PER_THREAD: usize = 25;

    std::thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                for _ in 0..PER_THREAD {
                    repository.upsert(&address, None).unwrap();
                }
            });
        }
    });

    let entity = repository.find(&address).unwrap().unwrap();
    assert_eq!(entity.count, (THREADS * PER_THREAD) as u64);
    assert_eq!(store.stats().unwrap().ipv6_machines, 1);
}

#[test]
fn test_concurrent_merges_create_one_edge() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir);
    let classifier = AddressClassifier::new().unwrap();
    let repository = EntityRepository::new(store.clone());
    let merger = RelationshipMerger::new(store.clone());

    let a = repository.upsert(&classifier.classify("10.0.0.1"), None).unwrap();
    let b = repository.upsert(&classifier.classify("10.0.0.2"), None).unwrap();

    let created = AtomicUsize::new(0);
    std::thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                if merger.merge_edge(&a, &b, "DNS").unwrap() {
                    created.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });

    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(store.find_edges(a.id, b.id).unwrap().len(), 1);
}

#[tokio::test]
async fn test_public_machine_enriched_once() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir);
    let hostnames = Arc::new(GoogleDns {
        calls: AtomicUsize::new(0),
    });
    let resolver = Arc::new(EnrichmentResolver::new(
        Some(hostnames.clone()),
        Some(Arc::new(UsOnly)),
    ));
    let pipeline = Pipeline::new(store.clone(), resolver).unwrap();

    let packet = Packet::new("192.168.1.5", "8.8.8.8", "DNS", 74, "Standard query");
    let outcome = pipeline.process(&packet).await.unwrap();

    assert_eq!(outcome.destination.count, 1);
    match &outcome.destination.kind {
        EntityKind::Machine { ipv4, enrichment } => {
            assert_eq!(ipv4, "8.8.8.8");
            assert_eq!(enrichment.domain, "dns.google");
            assert_eq!(enrichment.country, "US");
            assert_eq!(enrichment.subdivision, UNKNOWN);
            assert_eq!(enrichment.city, UNKNOWN);
        }
        other => panic!("expected a machine, got {:?}", other),
    }
    assert_eq!(outcome.source.category(), Category::LocalMachine);

    // Already stored: counted again, not looked up again
    let outcome = pipeline.process(&packet).await.unwrap();
    assert_eq!(outcome.destination.count, 2);
    assert_eq!(hostnames.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_enrichment_stores_unknowns() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir);
    let resolver = Arc::new(EnrichmentResolver::new(
        Some(Arc::new(GoogleDns {
            calls: AtomicUsize::new(0),
        })),
        Some(Arc::new(UsOnly)),
    ));
    let pipeline = Pipeline::new(store.clone(), resolver).unwrap();

    let outcome = pipeline
        .process(&Packet::new("192.168.1.5", "93.184.216.34", "TCP", 60, "SYN"))
        .await
        .unwrap();

    match outcome.destination.kind {
        EntityKind::Machine { enrichment, .. } => {
            assert_eq!(enrichment.domain, UNKNOWN);
            assert_eq!(enrichment.country, UNKNOWN);
        }
        other => panic!("expected a machine, got {:?}", other),
    }
}

#[tokio::test]
async fn test_repeated_packets_share_one_edge() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir);
    let pipeline = Pipeline::new(store.clone(), Arc::new(EnrichmentResolver::disabled())).unwrap();

    let packet = Packet::new("192.168.1.10", "192.168.1.20", "UDP", 120, "Len=78");
    let first = pipeline.process(&packet).await.unwrap();
    let second = pipeline.process(&packet).await.unwrap();

    assert!(first.edge_created);
    assert!(!second.edge_created);
    assert_eq!(second.source.count, 2);
    assert_eq!(second.destination.count, 2);

    let stats = store.stats().unwrap();
    assert_eq!(stats.local_machines, 2);
    assert_eq!(stats.relationships, 1);
    assert_eq!(
        store
            .find_edges(second.source.id, second.destination.id)
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_self_traffic_counts_twice() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir);
    let pipeline = Pipeline::new(store.clone(), Arc::new(EnrichmentResolver::disabled())).unwrap();

    let outcome = pipeline
        .process(&Packet::new("::1", "::1", "ICMPv6", 64, "Echo"))
        .await
        .unwrap();

    assert_eq!(outcome.source.id, outcome.destination.id);
    assert_eq!(outcome.destination.count, 2);
    assert_eq!(store.find_edges(outcome.source.id, outcome.source.id).unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_packets_to_new_public_machine() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir);
    let resolver = Arc::new(EnrichmentResolver::new(
        Some(Arc::new(SlowDns)),
        Some(Arc::new(UsOnly)),
    ));
    let pipeline = Arc::new(Pipeline::new(store.clone(), resolver).unwrap());

    const PACKETS: usize = 16;

    let tasks: Vec<_> = (0..PACKETS)
        .map(|_| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                let packet = Packet::new("192.168.1.5", "8.8.8.8", "DNS", 74, "Standard query");
                pipeline.process(&packet).await.unwrap()
            })
        })
        .collect();

    let mut created = 0;
    for task in tasks {
        if task.await.unwrap().edge_created {
            created += 1;
        }
    }
    assert_eq!(created, 1);

    let stats = store.stats().unwrap();
    assert_eq!(stats.machines, 1);
    assert_eq!(stats.local_machines, 1);
    assert_eq!(stats.relationships, 1);

    let repository = EntityRepository::new(store.clone());
    let source = repository
        .find(&Address::new(Category::LocalMachine, "192.168.1.5"))
        .unwrap()
        .unwrap();
    let machine = repository
        .find(&Address::new(Category::Machine, "8.8.8.8"))
        .unwrap()
        .unwrap();
    assert_eq!(source.count, PACKETS as u64);
    assert_eq!(machine.count, PACKETS as u64);
    match machine.kind {
        EntityKind::Machine { enrichment, .. } => {
            assert_eq!(enrichment.domain, "dns.google");
            assert_eq!(enrichment.country, "US");
        }
        other => panic!("expected a machine, got {:?}", other),
    }
    assert_eq!(store.find_edges(source.id, machine.id).unwrap().len(), 1);
}
