use global_cell::Cell;
use std::sync::Arc;

#[test]
fn no_leak() {
    let vals = [Arc::new(1), Arc::new(2), Arc::new(3)];

    {
        let cell = Cell::new();
        cell.set(vals[0].clone()).unwrap();

        let g1 = cell.get().unwrap().unwrap();
        cell.set(vals[1].clone()).unwrap();
        assert_eq!(
            vals.iter()
                .map(|v| Arc::strong_count(v))
                .collect::<Vec<_>>(),
            [2, 2, 1]
        );
        assert_eq!(**g1, 1);

        let g2 = cell.get().unwrap().unwrap();
        cell.set(vals[2].clone()).unwrap();
        assert_eq!(
            vals.iter()
                .map(|v| Arc::strong_count(v))
                .collect::<Vec<_>>(),
            [2, 2, 2]
        );
        assert_eq!(**g2, 2);

        // Without this, the per-thread cache would keep the last-read
        // value's wrapper alive past the cell itself.
        cell.release();
    }

    assert_eq!(
        vals.iter()
            .map(|v| Arc::strong_count(v))
            .collect::<Vec<_>>(),
        [1, 1, 1]
    );
}
