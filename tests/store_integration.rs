//! End-to-end fragment store tests over a local backend

use fragstore_rs::{
    FragmentCatalog, FragmentFilter, FragmentOrder, FragmentStore, FragmentStoreBuilder,
    LocalBackend, PadScheme, StoreConfig, StoreError,
};
use tempfile::TempDir;

fn small_store(dir: &TempDir) -> FragmentStore<LocalBackend> {
    let base = dir.path().join("tree");
    let backend = LocalBackend::new(&base).unwrap();
    FragmentStoreBuilder::new(backend, &base)
        .catalog_path(dir.path().join("catalog.db"))
        .max_items(3)
        .max_depth(1)
        .block_len(16)
        .build()
        .unwrap()
}

#[test]
fn test_put_then_get_round_trips() {
    let dir = TempDir::new().unwrap();
    let store = small_store(&dir);

    let fragment = store.put(b"hello fragment world").unwrap();
    assert_eq!(fragment.raw_size, 20);
    assert!(fragment.stored_size > fragment.raw_size);

    let payload = store.get(&fragment.fingerprint).unwrap();
    assert_eq!(payload, b"hello fragment world");
}

#[test]
fn test_identical_payloads_stored_once() {
    let dir = TempDir::new().unwrap();
    let store = small_store(&dir);

    let first = store.put(b"duplicate me").unwrap();
    let second = store.put(b"duplicate me").unwrap();
    assert_eq!(first, second);

    let stream = store
        .fragments(FragmentFilter::All, FragmentOrder::Id)
        .unwrap();
    assert_eq!(stream.total(), 1);

    // Exactly one payload file on the backend (plus the manifest)
    let entries = store.catalog().count(&FragmentFilter::All).unwrap();
    assert_eq!(entries, 1);
}

#[test]
fn test_distinct_payloads_fill_slots_densely() {
    let dir = TempDir::new().unwrap();
    let store = small_store(&dir);

    for i in 0..6u8 {
        store.put(&[i; 10]).unwrap();
    }
    // max_items=3, max_depth=1: nine slots total, six in use
    let seventh = store.put(&[7u8; 10]).unwrap();
    let eighth = store.put(&[8u8; 10]).unwrap();
    let ninth = store.put(&[9u8; 10]).unwrap();
    assert_ne!(seventh.id, eighth.id);
    assert_ne!(eighth.id, ninth.id);

    let result = store.put(&[10u8; 10]);
    assert!(matches!(result, Err(StoreError::DirFull)));
}

#[test]
fn test_remove_frees_slot_for_reuse() {
    let dir = TempDir::new().unwrap();
    let store = small_store(&dir);

    // Saturate the tree
    let mut fragments = Vec::new();
    for i in 0..9u8 {
        fragments.push(store.put(&[i; 10]).unwrap());
    }
    assert!(matches!(store.put(&[99u8; 10]), Err(StoreError::DirFull)));

    store.remove(&fragments[4].fingerprint).unwrap();
    assert!(!store.contains(&fragments[4].fingerprint).unwrap());
    assert!(matches!(
        store.get(&fragments[4].fingerprint),
        Err(StoreError::NotFound)
    ));

    // The freed slot is reusable; the tree is full again afterwards
    store.put(&[99u8; 10]).unwrap();
    assert!(matches!(store.put(&[100u8; 10]), Err(StoreError::DirFull)));
}

#[test]
fn test_reopen_replays_locations() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("tree");
    let catalog_path = dir.path().join("catalog.db");

    let stored = {
        let backend = LocalBackend::new(&base).unwrap();
        let store = FragmentStoreBuilder::new(backend, &base)
            .catalog_path(&catalog_path)
            .max_items(4)
            .max_depth(1)
            .block_len(16)
            .build()
            .unwrap();
        let a = store.put(b"first payload").unwrap();
        let b = store.put(b"second payload").unwrap();
        vec![a, b]
    };

    let backend = LocalBackend::new(&base).unwrap();
    let store = FragmentStoreBuilder::new(backend, &base)
        .catalog_path(&catalog_path)
        .max_items(4)
        .max_depth(1)
        .block_len(16)
        .build()
        .unwrap();

    // Stored payloads survive the restart
    assert_eq!(store.get(&stored[0].fingerprint).unwrap(), b"first payload");
    assert_eq!(
        store.get(&stored[1].fingerprint).unwrap(),
        b"second payload"
    );

    // Fresh allocations never collide with replayed addresses
    let c = store.put(b"third payload").unwrap();
    assert_eq!(store.get(&c.fingerprint).unwrap(), b"third payload");
    assert_eq!(
        store
            .fragments(FragmentFilter::All, FragmentOrder::Id)
            .unwrap()
            .total(),
        3
    );
}

#[test]
fn test_reopen_with_changed_geometry_is_rejected() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("tree");
    let catalog_path = dir.path().join("catalog.db");

    {
        let backend = LocalBackend::new(&base).unwrap();
        FragmentStoreBuilder::new(backend, &base)
            .catalog_path(&catalog_path)
            .max_items(4)
            .max_depth(1)
            .build()
            .unwrap();
    }

    let backend = LocalBackend::new(&base).unwrap();
    let catalog = FragmentCatalog::open(&catalog_path).unwrap();
    let result = FragmentStore::open(
        backend,
        catalog,
        StoreConfig {
            base_path: base.clone(),
            max_items: 8, // different fanout than the manifest records
            max_depth: 1,
            block_len: 4096,
            scheme: PadScheme::Pkcs7,
        },
    );
    assert!(matches!(result, Err(StoreError::Manifest(_))));
}

#[test]
fn test_all_padding_schemes_round_trip_through_store() {
    for scheme in [PadScheme::Pkcs7, PadScheme::AnsiX923, PadScheme::Iso7816] {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("tree");
        let backend = LocalBackend::new(&base).unwrap();
        let store = FragmentStoreBuilder::new(backend, &base)
            .catalog_path(dir.path().join("catalog.db"))
            .scheme(scheme)
            .block_len(32)
            .build()
            .unwrap();

        let payload = b"scheme round trip \x00\x80\xff";
        let fragment = store.put(payload).unwrap();
        assert_eq!(store.get(&fragment.fingerprint).unwrap(), payload);
    }
}

#[test]
fn test_remaining_decreases_as_payloads_land() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("tree");
    let backend = LocalBackend::with_quota(&base, 10_000).unwrap();
    let store = FragmentStoreBuilder::new(backend, &base)
        .catalog_path(dir.path().join("catalog.db"))
        .block_len(16)
        .build()
        .unwrap();

    let before = store.remaining().unwrap();
    store.put(&[1u8; 100]).unwrap();
    let after = store.remaining().unwrap();
    assert!(after < before);
}

#[test]
fn test_get_unknown_fingerprint() {
    let dir = TempDir::new().unwrap();
    let store = small_store(&dir);
    let absent = fragstore_rs::Fingerprint::of(b"never stored");
    assert!(matches!(store.get(&absent), Err(StoreError::NotFound)));
    assert!(!store.contains(&absent).unwrap());
}
