//! Throughput benchmarks for `Cell::get`/`Cell::set` under read/write
//! contention: one writer publishes `n` values while `m` readers spin
//! until they observe the last one.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use global_cell::Cell;

fn send_x_from_1_to_m(base: u32, n: u32, m: usize) {
    let cell: Cell<u32> = Cell::new();

    let rx_t: Vec<_> = (0..m)
        .map(|_| {
            let cell = cell.clone();
            std::thread::spawn(move || {
                let mut prev = 0;
                loop {
                    if let Some(r) = cell.get().unwrap() {
                        let i = *r;
                        if prev > i {
                            panic!("{prev} > {i}");
                        }
                        if i == base + n {
                            break;
                        }
                        prev = i;
                    }
                }
            })
        })
        .collect();

    let tx = {
        let cell = cell.clone();
        std::thread::spawn(move || {
            for i in (base + 1)..=(base + n) {
                cell.set(i).unwrap();
            }
        })
    };

    tx.join().unwrap();
    for rx in rx_t {
        rx.join().unwrap();
    }
}

fn n100_m10(c: &mut Criterion) {
    c.bench_function("n100_m10", |b| {
        b.iter(|| send_x_from_1_to_m(black_box(1), 100, 10))
    });
}

fn n1000_m10(c: &mut Criterion) {
    c.bench_function("n1000_m10", |b| {
        b.iter(|| send_x_from_1_to_m(black_box(1), 1000, 10))
    });
}

criterion_group!(benches, n100_m10, n1000_m10);
criterion_main!(benches);
