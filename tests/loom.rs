//! `loom`-model variants of the single/multi writer-reader cell scenarios,
//! bounded down to sizes loom can exhaustively explore.

#![cfg(loom)]

use global_cell::Cell;
use loom::thread;

#[test]
fn loom_send_from_1_to_1() {
    loom::model(|| {
        let n = 2u32;
        let cell: Cell<u32> = Cell::new();

        let rx = {
            let cell = cell.clone();
            thread::spawn(move || {
                let mut prev = 0;
                loop {
                    if let Some(r) = cell.get().unwrap() {
                        let i = *r;
                        assert!(i >= prev, "{i} < {prev}");
                        if i == n {
                            break;
                        }
                        prev = i;
                    }
                    loom::thread::yield_now();
                }
            })
        };

        let tx = thread::spawn(move || {
            for i in 1..=n {
                cell.set(i).unwrap();
                loom::thread::yield_now();
            }
        });

        tx.join().unwrap();
        rx.join().unwrap();
    });
}

#[test]
fn loom_send_from_1_to_m() {
    loom::model(|| {
        let n = 2u32;
        let m = 2usize;
        let cell: Cell<u32> = Cell::new();

        let rx_t: Vec<_> = (0..m)
            .map(|_| {
                let cell = cell.clone();
                thread::spawn(move || {
                    let mut prev = 0;
                    loop {
                        if let Some(r) = cell.get().unwrap() {
                            let i = *r;
                            assert!(i >= prev, "{i} < {prev}");
                            if i == n {
                                break;
                            }
                            prev = i;
                        }
                        loom::thread::yield_now();
                    }
                })
            })
            .collect();

        let tx = thread::spawn(move || {
            for i in 1..=n {
                cell.set(i).unwrap();
                loom::thread::yield_now();
            }
        });

        tx.join().unwrap();
        for rx in rx_t {
            rx.join().unwrap();
        }
    });
}

#[test]
fn loom_versions_never_regress_across_two_writers() {
    loom::model(|| {
        let cell: Cell<u32> = Cell::new();

        let reader = {
            let cell = cell.clone();
            thread::spawn(move || {
                let mut prev_version = 0;
                for _ in 0..4 {
                    if let Some(r) = cell.get().unwrap() {
                        let v = r.version();
                        assert!(v >= prev_version, "version went backwards: {v} < {prev_version}");
                        prev_version = v;
                    }
                    loom::thread::yield_now();
                }
            })
        };

        let w1 = {
            let cell = cell.clone();
            thread::spawn(move || {
                cell.set(1).unwrap();
            })
        };
        let w2 = thread::spawn(move || {
            cell.set(2).unwrap();
        });

        w1.join().unwrap();
        w2.join().unwrap();
        reader.join().unwrap();
    });
}
