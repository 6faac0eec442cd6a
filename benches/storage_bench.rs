//! Benchmarks for dirpart storage operations

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use dirpart::partition::{Dn, Entry};
use dirpart::{ActionRecordManager, Config, Partition, PartitionConfig};
use tempfile::TempDir;

fn open_partition(dir: &std::path::Path) -> Partition {
    let config = Config::builder().data_dir(dir).build();
    let arm = Arc::new(ActionRecordManager::open(&config).unwrap());
    Partition::open(arm, config, PartitionConfig::new(["cn"])).unwrap()
}

fn person(i: u64) -> Entry {
    let mut entry = Entry::new(Dn::new(format!("cn=user{},ou=people,dc=example", i)));
    entry.add("cn", format!("user{}", i).into_bytes());
    entry
}

fn storage_benchmarks(c: &mut Criterion) {
    c.bench_function("insert_entry", |b| {
        let temp_dir = TempDir::new().unwrap();
        let partition = open_partition(temp_dir.path());
        let mut i = 0u64;
        b.iter(|| {
            let guard = partition.arm().guarded_action(false, "bench").unwrap();
            partition.insert(guard.context(), &person(i)).unwrap();
            guard.commit().unwrap();
            i += 1;
        });
    });

    c.bench_function("lookup_by_dn", |b| {
        let temp_dir = TempDir::new().unwrap();
        let partition = open_partition(temp_dir.path());
        let guard = partition.arm().guarded_action(false, "seed").unwrap();
        for i in 0..1000 {
            partition.insert(guard.context(), &person(i)).unwrap();
        }
        guard.commit().unwrap();

        let dn = Dn::new("cn=user500,ou=people,dc=example");
        let guard = partition.arm().guarded_action(true, "bench").unwrap();
        b.iter(|| partition.lookup(guard.context(), &dn, None).unwrap());
    });

    c.bench_function("lookup_ids_indexed", |b| {
        let temp_dir = TempDir::new().unwrap();
        let partition = open_partition(temp_dir.path());
        let guard = partition.arm().guarded_action(false, "seed").unwrap();
        for i in 0..1000 {
            partition.insert(guard.context(), &person(i)).unwrap();
        }
        guard.commit().unwrap();

        let guard = partition.arm().guarded_action(true, "bench").unwrap();
        b.iter(|| {
            partition
                .lookup_ids(guard.context(), "cn", b"user500")
                .unwrap()
        });
    });
}

criterion_group!(benches, storage_benchmarks);
criterion_main!(benches);
