//! Property tests over random workloads.

use machine::{addressing::PAGE_SIZE, dev::RamDisk};
use proptest::prelude::*;
use std::collections::BTreeMap;
use vm::{
    MappingId, Pid, PolicyKind, VmConfigBuilder,
    fault::{FaultError, Resolution},
    swap::SECTORS_PER_SLOT,
};
use vm_grader::{Bench, DATA_BASE, STACK_TOP, va};

const PROCS: u32 = 2;
const PAGES: usize = 6;
const FRAMES: usize = 3;

#[derive(Clone, Debug)]
enum Op {
    Write { proc: u32, page: usize, byte: u8 },
    Read { proc: u32, page: usize },
    Unmap { proc: u32 },
    Exit { proc: u32 },
}

fn declare(bench: &Bench, proc: u32) {
    let pid = bench.spawn(proc + 1);
    bench
        .vm
        .register_mapping(pid, va(DATA_BASE), None, 0, PAGES * PAGE_SIZE, true, Some(MappingId(proc)))
        .unwrap();
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0..PROCS, 0..PAGES, any::<u8>())
            .prop_map(|(proc, page, byte)| Op::Write { proc, page, byte }),
        3 => (0..PROCS, 0..PAGES).prop_map(|(proc, page)| Op::Read { proc, page }),
        1 => (0..PROCS).prop_map(|proc| Op::Unmap { proc }),
        1 => (0..PROCS).prop_map(|proc| Op::Exit { proc }),
    ]
}

fn arb_policy() -> impl Strategy<Value = PolicyKind> {
    prop_oneof![Just(PolicyKind::Fifo), Just(PolicyKind::Clock)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn memory_matches_model(policy in arb_policy(), ops in prop::collection::vec(arb_op(), 1..80)) {
        let config = VmConfigBuilder::new().policy(policy).build();
        let bench = Bench::with(
            config,
            FRAMES,
            RamDisk::new(PROCS as usize * PAGES * SECTORS_PER_SLOT),
        );
        let mut model = BTreeMap::new();
        for proc in 0..PROCS {
            declare(&bench, proc);
        }

        for op in ops {
            match op {
                Op::Write { proc, page, byte } => {
                    bench.fill(Pid(proc + 1), page, byte);
                    model.insert((proc, page), byte);
                }
                Op::Read { proc, page } => {
                    let expected = model.get(&(proc, page)).copied().unwrap_or(0);
                    prop_assert_eq!(bench.page(Pid(proc + 1), page), vec![expected; PAGE_SIZE]);
                }
                Op::Unmap { proc } => {
                    let pid = Pid(proc + 1);
                    prop_assert_eq!(bench.vm.unregister_mapping(pid, MappingId(proc)), Ok(PAGES));
                    model.retain(|(p, _), _| *p != proc);
                    bench
                        .vm
                        .register_mapping(pid, va(DATA_BASE), None, 0, PAGES * PAGE_SIZE, true, Some(MappingId(proc)))
                        .unwrap();
                }
                Op::Exit { proc } => {
                    bench.vm.exit_process(Pid(proc + 1), 0).unwrap();
                    model.retain(|(p, _), _| *p != proc);
                    declare(&bench, proc);
                }
            }
            prop_assert!(bench.vm.resident_pages() <= FRAMES);
            prop_assert!(bench.vm.verify().is_ok());
        }
    }

    #[test]
    fn stack_grows_within_margin(offset in 0usize..=32) {
        let bench = Bench::new(2, 2);
        let pid = bench.spawn(1);
        let sp = STACK_TOP - 0x800;
        prop_assert_eq!(
            bench.vm.handle_page_fault(pid, sp - offset, true, true, sp),
            Ok(Resolution::StackGrowth)
        );
        prop_assert!(bench.vm.frame_of(pid, va(sp - offset)).is_some());
    }

    #[test]
    fn stack_rejects_below_margin(offset in 33usize..PAGE_SIZE) {
        let bench = Bench::new(2, 2);
        let pid = bench.spawn(1);
        let sp = STACK_TOP - 0x800;
        let r = bench.vm.handle_page_fault(pid, sp - offset, true, true, sp);
        prop_assert_eq!(r.map_err(|t| t.cause), Err(FaultError::Unbacked));
        prop_assert_eq!(bench.vm.exit_status(pid), Some(-1));
    }

    #[test]
    fn data_outside_mapping_is_fatal(page in PAGES..64) {
        let bench = Bench::new(2, 2);
        let pid = bench.spawn(1);
        bench.anon(pid, PAGES);
        let r = bench.vm.handle_page_fault(pid, DATA_BASE + page * PAGE_SIZE, false, true, STACK_TOP);
        prop_assert_eq!(r.map_err(|t| t.cause), Err(FaultError::Unbacked));
    }
}
