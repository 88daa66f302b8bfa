//! Concurrent catalog and store behavior

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use fragstore_rs::{
    Fingerprint, FragmentCatalog, FragmentFilter, FragmentOrder, FragmentStoreBuilder,
    LocalBackend, NewFragment, StoreError,
};
use tempfile::TempDir;

#[test]
fn test_concurrent_get_or_create_yields_one_row() {
    let catalog = Arc::new(FragmentCatalog::open_in_memory().unwrap());
    let new = NewFragment {
        fingerprint: Fingerprint::of(b"contended payload"),
        raw_size: 17,
        stored_size: 32,
    };

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let catalog = catalog.clone();
            let new = new.clone();
            thread::spawn(move || catalog.get_or_create(&new).unwrap().id)
        })
        .collect();

    let ids: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(catalog.count(&FragmentFilter::All).unwrap(), 1);
}

#[test]
fn test_concurrent_create_loses_cleanly() {
    let catalog = Arc::new(FragmentCatalog::open_in_memory().unwrap());
    let winners = Arc::new(AtomicUsize::new(0));
    let losers = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let catalog = catalog.clone();
            let winners = winners.clone();
            let losers = losers.clone();
            thread::spawn(move || {
                let new = NewFragment {
                    fingerprint: Fingerprint::of(b"raced payload"),
                    raw_size: 13,
                    stored_size: 16,
                };
                match catalog.create(&new) {
                    Ok(_) => winners.fetch_add(1, Ordering::Relaxed),
                    Err(StoreError::AlreadyExists(_)) => losers.fetch_add(1, Ordering::Relaxed),
                    Err(e) => panic!("unexpected error: {}", e),
                };
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(winners.load(Ordering::Relaxed), 1);
    assert_eq!(losers.load(Ordering::Relaxed), 7);
    assert_eq!(catalog.count(&FragmentFilter::All).unwrap(), 1);
}

#[test]
fn test_concurrent_puts_of_same_payload() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("tree");
    let backend = LocalBackend::new(&base).unwrap();
    let store = Arc::new(
        FragmentStoreBuilder::new(backend, &base)
            .catalog_path(dir.path().join("catalog.db"))
            .max_items(16)
            .max_depth(1)
            .block_len(16)
            .build()
            .unwrap(),
    );

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let store = store.clone();
            thread::spawn(move || store.put(b"same bytes everywhere").unwrap().id)
        })
        .collect();
    let ids: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(
        store
            .fragments(FragmentFilter::All, FragmentOrder::Id)
            .unwrap()
            .total(),
        1
    );
}

#[test]
fn test_concurrent_puts_of_distinct_payloads() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("tree");
    let backend = LocalBackend::new(&base).unwrap();
    let store = Arc::new(
        FragmentStoreBuilder::new(backend, &base)
            .catalog_path(dir.path().join("catalog.db"))
            .max_items(32)
            .max_depth(1)
            .block_len(16)
            .build()
            .unwrap(),
    );

    let handles: Vec<_> = (0..8u8)
        .map(|i| {
            let store = store.clone();
            thread::spawn(move || {
                let payload = vec![i; 64];
                let fragment = store.put(&payload).unwrap();
                assert_eq!(store.get(&fragment.fingerprint).unwrap(), payload);
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(
        store
            .fragments(FragmentFilter::All, FragmentOrder::Id)
            .unwrap()
            .total(),
        8
    );
}
