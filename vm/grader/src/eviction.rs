use crate::va;
use std::collections::BTreeSet;
use vm::{
    PageKey, Pid,
    eviction::{Clock, EvictionPolicy, Fifo},
};

fn key(n: usize) -> PageKey {
    PageKey::new(Pid(1), va(0x1000 * (n + 1)))
}

fn no_probe(_: PageKey) -> bool {
    panic!("FIFO does not look at accessed bits")
}

pub fn fifo_order() {
    let mut fifo = Fifo::new();
    for n in 0..3 {
        fifo.on_resident(key(n));
    }
    assert_eq!(fifo.order(), vec![key(0), key(1), key(2)]);
    assert_eq!(fifo.select_victim(&mut no_probe), Some(key(0)));
    assert_eq!(fifo.select_victim(&mut no_probe), Some(key(1)));
    assert_eq!(fifo.len(), 1, "Selecting a victim removes it");
    assert_eq!(fifo.select_victim(&mut no_probe), Some(key(2)));
    assert_eq!(fifo.select_victim(&mut no_probe), None);
}

pub fn fifo_reinsert() {
    let mut fifo = Fifo::new();
    for n in 0..3 {
        fifo.on_resident(key(n));
    }
    // Coming back from swap makes a page the newest.
    fifo.on_resident(key(0));
    assert_eq!(fifo.len(), 3);
    assert_eq!(fifo.select_victim(&mut no_probe), Some(key(1)));
}

pub fn fifo_release() {
    let mut fifo = Fifo::new();
    for n in 0..3 {
        fifo.on_resident(key(n));
    }
    fifo.on_release(key(0));
    fifo.on_release(key(7));
    assert_eq!(fifo.order(), vec![key(1), key(2)]);
}

pub fn fifo_reinstate() {
    let mut fifo = Fifo::new();
    for n in 0..3 {
        fifo.on_resident(key(n));
    }
    let victim = fifo.select_victim(&mut no_probe).unwrap();
    fifo.reinstate(victim);
    assert_eq!(
        fifo.order(),
        vec![key(0), key(1), key(2)],
        "A victim whose eviction failed goes back to the front"
    );
}

pub fn clock_second_chance() {
    let mut clock = Clock::new();
    for n in 0..3 {
        clock.on_resident(key(n));
    }
    let mut accessed: BTreeSet<PageKey> = [key(0), key(2)].into_iter().collect();
    let mut probe = |k: PageKey| accessed.remove(&k);

    assert_eq!(clock.select_victim(&mut probe), Some(key(1)));
    assert_eq!(
        clock.order(),
        vec![key(2), key(0)],
        "Skipped pages move behind the hand"
    );
}

pub fn clock_all_accessed() {
    let mut clock = Clock::new();
    for n in 0..3 {
        clock.on_resident(key(n));
    }
    let mut accessed: BTreeSet<PageKey> = (0..3).map(key).collect();
    let mut probe = |k: PageKey| accessed.remove(&k);

    // One sweep clears every bit; the oldest page then loses.
    assert_eq!(clock.select_victim(&mut probe), Some(key(0)));
    assert_eq!(clock.len(), 2);
}
