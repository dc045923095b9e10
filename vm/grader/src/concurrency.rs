//! Several processes faulting at the same time.

use crate::{Bench, DATA_BASE, STACK_TOP, pattern};
use crossbeam_utils::thread;
use machine::addressing::PAGE_SIZE;
use vm::Pid;

const PAGES: usize = 8;
const ROUNDS: usize = 4;

fn churn(bench: &Bench, pid: Pid, seed: u8) {
    for round in 0..ROUNDS {
        for n in 0..PAGES {
            let data = pattern(seed.wrapping_add((round * PAGES + n) as u8), PAGE_SIZE);
            bench
                .vm
                .write_user(pid, DATA_BASE + n * PAGE_SIZE, &data, STACK_TOP)
                .unwrap();
        }
        for n in 0..PAGES {
            let data = pattern(seed.wrapping_add((round * PAGES + n) as u8), PAGE_SIZE);
            assert_eq!(bench.page(pid, n), data, "{pid} lost page {n} in round {round}");
        }
    }
}

/// Two processes thrash a small memory on disjoint pages.
pub fn disjoint_processes() {
    let bench = Bench::new(4, 4 * PAGES);
    let a = bench.spawn(1);
    let b = bench.spawn(2);
    bench.anon(a, PAGES);
    bench.anon(b, PAGES);

    thread::scope(|s| {
        s.spawn(|_| churn(&bench, a, 0x10));
        s.spawn(|_| churn(&bench, b, 0x90));
    })
    .unwrap();

    assert!(bench.vm.stats().evictions > 0);
    assert_eq!(bench.vm.resident_pages(), 4);
    bench.check();
}

/// One process exits while another keeps faulting.
pub fn exit_while_faulting() {
    let bench = Bench::new(3, 4 * PAGES);
    let a = bench.spawn(1);
    let b = bench.spawn(2);
    bench.anon(a, PAGES);
    bench.anon(b, PAGES);

    thread::scope(|s| {
        s.spawn(|_| churn(&bench, a, 0x33));
        s.spawn(|_| {
            for n in 0..PAGES {
                bench.fill(b, n, n as u8);
            }
            bench.vm.exit_process(b, 7).unwrap();
        });
    })
    .unwrap();

    assert_eq!(bench.vm.exit_status(b), Some(7));
    assert!(
        bench.vm.eviction_order().iter().all(|key| key.pid == a),
        "An exited process keeps no frames"
    );
    assert!(bench.vm.free_swap_slots() >= 3 * PAGES);
    bench.check();
}
