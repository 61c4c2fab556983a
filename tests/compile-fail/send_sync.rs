// Check that a cell over a non-Sync payload can't be shared between threads.
// edition:2021

use global_cell::Cell;
use std::cell::RefCell;
use std::thread;

// NOTE: included so the error points at local source, for reliable trybuild output.
fn spawn<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    thread::spawn(f).join().unwrap();
}

fn main() {
    let cell: Cell<RefCell<i32>> = Cell::new();
    cell.set(RefCell::new(0)).unwrap();

    let other = cell.clone();
    spawn(move || {
        *other.get().unwrap().unwrap().borrow_mut() = 1;
    });
    //~^ ERROR: `RefCell<i32>` cannot be shared between threads safely

    assert_eq!(*cell.get().unwrap().unwrap().borrow(), 0);
}
