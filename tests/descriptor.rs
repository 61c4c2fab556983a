//! Descriptor table open/close round trips.

use global_cell::DescriptorTable;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Counted {
    value: u32,
    drops: Arc<AtomicUsize>,
}

impl Drop for Counted {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn ten_thousand_open_close_round_trips() {
    let drops = Arc::new(AtomicUsize::new(0));
    let table = DescriptorTable::new();

    let mut handles = Vec::with_capacity(10_000);
    for i in 0..10_000u32 {
        let handle = table
            .open(Counted {
                value: i,
                drops: drops.clone(),
            })
            .unwrap();
        handles.push(handle);
    }

    let mut indices: Vec<_> = handles.iter().map(|(idx, _)| *idx).collect();
    indices.sort_unstable();
    assert_eq!(indices, (0..10_000).collect::<Vec<_>>());

    for (i, (idx, verifier)) in handles.iter().enumerate() {
        assert_eq!(table.get(*idx, *verifier).unwrap().value, i as u32);
    }

    for (idx, verifier) in &handles {
        table.close(*idx, *verifier).unwrap();
    }

    assert_eq!(drops.load(Ordering::SeqCst), 10_000);
}

#[test]
fn closed_handle_is_rejected() {
    let table = DescriptorTable::new();
    let (idx, verifier) = table.open(1u32).unwrap();
    table.close(idx, verifier).unwrap();
    assert!(table.get(idx, verifier).is_err());
    assert!(table.close(idx, verifier).is_err());
}

#[test]
fn unknown_index_is_rejected() {
    let table: DescriptorTable<u32> = DescriptorTable::new();
    assert!(table.get(0, 1).is_err());
}

#[test]
fn reader_delays_destructor_until_released() {
    let drops = Arc::new(AtomicUsize::new(0));
    let table = DescriptorTable::new();
    let (idx, verifier) = table
        .open(Counted {
            value: 9,
            drops: drops.clone(),
        })
        .unwrap();

    let held = table.get(idx, verifier).unwrap();
    table.close(idx, verifier).unwrap();
    assert_eq!(held.value, 9);
    drop(held);
}
