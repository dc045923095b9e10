use crate::{Bench, CODE_BASE, DATA_BASE, MemFile, STACK_TOP, pattern, va};
use machine::{
    addressing::PAGE_SIZE,
    dev::RamDisk,
    interrupt::PFErrorCode,
    mm::PageAllocator,
};
use vm::{
    MappingId, Pid, VmConfigBuilder, VmError,
    fault::{FaultError, Resolution, Terminated},
    loader::{FileBackedLoader, MmLoader},
};

const SP: usize = STACK_TOP - 0x800;

#[track_caller]
fn assert_killed(r: Result<Resolution, Terminated>, pid: Pid, cause: FaultError) {
    match r {
        Err(t) => {
            assert_eq!(t.pid, pid);
            assert_eq!(t.status, -1, "A fatal fault exits with -1");
            assert_eq!(t.cause, cause);
        }
        Ok(r) => panic!("Expected {cause:?}, but the fault was resolved by {r:?}"),
    }
}

pub fn null_address() {
    let bench = Bench::new(4, 4);
    let pid = bench.spawn(1);
    assert_killed(
        bench.vm.handle_page_fault(pid, 0, false, true, SP),
        pid,
        FaultError::KernelAddress,
    );
    assert_eq!(bench.vm.exit_status(pid), Some(-1));

    let pid = bench.spawn(2);
    assert_killed(
        bench.vm.handle_page_fault(pid, 0x10, true, true, SP),
        pid,
        FaultError::KernelAddress,
    );
}

pub fn kernel_address() {
    let bench = Bench::new(4, 4);
    for (n, addr) in [0xffff_8000_0000_1000usize, 0xffff_ffff_ffff_f000, 0x0000_8000_0000_0000]
        .into_iter()
        .enumerate()
    {
        let pid = bench.spawn(n as u32 + 1);
        assert_killed(
            bench.vm.handle_page_fault(pid, addr, false, true, SP),
            pid,
            FaultError::KernelAddress,
        );
    }
    assert_eq!(bench.vm.stats().killed, 3);
}

pub fn guard_page() {
    let bench = Bench::new(4, 4);
    let pid = bench.spawn(1);
    assert_killed(
        bench.vm.handle_page_fault(pid, SP - PAGE_SIZE, true, true, SP),
        pid,
        FaultError::StackGuard,
    );
}

pub fn stack_margin() {
    let bench = Bench::new(4, 4);

    let pid = bench.spawn(1);
    assert_eq!(
        bench.vm.handle_page_fault(pid, SP - 32, true, true, SP),
        Ok(Resolution::StackGrowth),
        "32 bytes below the stack pointer is a stack access (PUSHA)"
    );
    assert!(bench.vm.frame_of(pid, va(SP)).is_some());

    let pid = bench.spawn(2);
    assert_killed(
        bench.vm.handle_page_fault(pid, SP - 33, true, true, SP),
        pid,
        FaultError::Unbacked,
    );
    bench.check();
}

pub fn stack_above_sp() {
    let bench = Bench::new(4, 4);
    let pid = bench.spawn(1);
    assert_eq!(
        bench.vm.handle_page_fault(pid, SP + 0x10, false, true, SP),
        Ok(Resolution::StackGrowth)
    );
    assert_killed(
        bench.vm.handle_page_fault(pid, STACK_TOP, false, true, SP),
        pid,
        FaultError::Unbacked,
    );
}

pub fn stack_grows_down() {
    let bench = Bench::new(8, 4);
    let pid = bench.spawn(1);
    assert_eq!(bench.vm.stack_end(pid), Some(va(STACK_TOP)));

    for i in 1..=4 {
        let sp = STACK_TOP - i * PAGE_SIZE + 8;
        assert_eq!(
            bench.vm.handle_page_fault(pid, sp - 8, true, true, sp),
            Ok(Resolution::StackGrowth)
        );
        assert_eq!(bench.vm.stack_end(pid), Some(va(STACK_TOP - i * PAGE_SIZE)));
    }
    let info = bench.vm.lookup_page(pid, va(STACK_TOP - PAGE_SIZE)).unwrap();
    assert!(info.writable);
    assert_eq!(info.mapping, None);
    assert_eq!(bench.vm.stats().stack_growths, 4);

    // Stack pages are zero-filled.
    let mut buf = vec![0xff; PAGE_SIZE];
    bench
        .vm
        .read_user(pid, STACK_TOP - 3 * PAGE_SIZE, &mut buf, STACK_TOP - 4 * PAGE_SIZE)
        .unwrap();
    assert!(buf.iter().all(|b| *b == 0));
    bench.check();
}

pub fn stack_limit() {
    let config = VmConfigBuilder::new().max_stack_size(4 * PAGE_SIZE).build();
    let bench = Bench::with(config, 8, RamDisk::new(32));
    let pid = bench.spawn(1);

    let sp = STACK_TOP - 4 * PAGE_SIZE;
    assert_eq!(
        bench.vm.handle_page_fault(pid, sp, true, true, sp),
        Ok(Resolution::StackGrowth)
    );
    let sp = sp - 16;
    assert_killed(
        bench.vm.handle_page_fault(pid, sp, true, true, sp),
        pid,
        FaultError::Unbacked,
    );
}

pub fn guard_page_allowed() {
    let config = VmConfigBuilder::new()
        .reject_guard_page(false)
        .stack_growth_margin(PAGE_SIZE)
        .build();
    let bench = Bench::with(config, 4, RamDisk::new(32));
    let pid = bench.spawn(1);
    assert_eq!(
        bench.vm.handle_page_fault(pid, SP - PAGE_SIZE, true, true, SP),
        Ok(Resolution::StackGrowth)
    );
}

pub fn unbacked() {
    let bench = Bench::new(4, 4);
    let pid = bench.spawn(1);
    assert_killed(
        bench.vm.handle_page_fault(pid, DATA_BASE + 0x123, false, true, SP),
        pid,
        FaultError::Unbacked,
    );
}

pub fn mapped_page_faults_again() {
    let bench = Bench::new(4, 4);
    let pid = bench.spawn(1);
    bench.anon(pid, 1);
    assert_eq!(
        bench.vm.handle_page_fault(pid, DATA_BASE, false, true, SP),
        Ok(Resolution::LazyLoad)
    );
    assert_killed(
        bench.vm.handle_page_fault(pid, DATA_BASE, false, true, SP),
        pid,
        FaultError::Protection,
    );
}

pub fn write_to_read_only() {
    let bench = Bench::new(4, 4);
    let file = MemFile::new(pattern(7, PAGE_SIZE));

    let pid = bench.spawn(1);
    bench
        .vm
        .register_mapping(pid, va(CODE_BASE), file.source(), 0, PAGE_SIZE, false, None)
        .unwrap();
    let mut buf = [0; 16];
    bench.vm.read_user(pid, CODE_BASE, &mut buf, SP).unwrap();
    match bench.vm.write_user(pid, CODE_BASE, &[1, 2, 3], SP) {
        Err(t) => assert_eq!(t.cause, FaultError::Protection),
        Ok(()) => panic!("Writing a read-only page must kill the process"),
    }

    // Not resident yet: rejected without loading the page.
    let pid = bench.spawn(2);
    bench
        .vm
        .register_mapping(pid, va(CODE_BASE), file.source(), 0, PAGE_SIZE, false, None)
        .unwrap();
    let loads = bench.vm.stats().lazy_loads;
    assert_killed(
        bench.vm.handle_page_fault(pid, CODE_BASE, true, true, SP),
        pid,
        FaultError::Protection,
    );
    assert_eq!(bench.vm.stats().lazy_loads, loads);
    bench.check();
}

pub fn error_code() {
    let bench = Bench::new(4, 4);
    let pid = bench.spawn(1);
    bench.anon(pid, 2);
    assert_eq!(
        bench.vm.page_fault(
            pid,
            PFErrorCode::USER | PFErrorCode::WRITE_ACCESS,
            DATA_BASE + PAGE_SIZE + 8,
            SP
        ),
        Ok(Resolution::LazyLoad)
    );
    assert!(bench.vm.frame_of(pid, va(DATA_BASE + PAGE_SIZE)).is_some());
    assert!(bench.vm.frame_of(pid, va(DATA_BASE)).is_none());
    assert_eq!(bench.vm.stats().page_faults, 1);
}

pub fn kill_releases_memory() {
    let bench = Bench::new(3, 8);
    let pid = bench.spawn(1);
    bench.anon(pid, 6);
    for n in 0..6 {
        bench.fill(pid, n, n as u8);
    }
    assert!(bench.vm.free_swap_slots() < 8);

    assert!(bench.vm.handle_page_fault(pid, 0, false, true, SP).is_err());
    assert_eq!(bench.vm.resident_pages(), 0);
    assert_eq!(bench.ram.free_pages(), 3);
    assert_eq!(bench.vm.free_swap_slots(), 8);
    assert!(bench.vm.lookup_page(pid, va(DATA_BASE)).is_none());
    bench.check();
}

pub fn swap_exhaustion_kills() {
    let bench = Bench::new(1, 0);
    let a = bench.spawn(1);
    bench.anon(a, 1);
    bench.fill(a, 0, 0xaa);

    let b = bench.spawn(2);
    bench.anon(b, 1);
    assert_killed(
        bench.vm.handle_page_fault(b, DATA_BASE, true, true, SP),
        b,
        FaultError::Resource(VmError::NoSpace),
    );

    // The would-be victim is untouched.
    assert!(bench.vm.frame_of(a, va(DATA_BASE)).is_some());
    assert_eq!(bench.page(a, 0), vec![0xaa; PAGE_SIZE]);
    assert_eq!(bench.vm.exit_status(a), None);
    bench.check();
}

pub fn register_errors() {
    let bench = Bench::new(4, 4);
    let pid = bench.spawn(1);
    let vm = &bench.vm;

    for (addr, len) in [
        (0, PAGE_SIZE),
        (DATA_BASE + 0x10, PAGE_SIZE),
        (0xffff_8000_0000_0000, PAGE_SIZE),
        (DATA_BASE, 0),
        (0x0000_7fff_ffff_f000, 2 * PAGE_SIZE),
    ] {
        assert_eq!(
            vm.register_mapping(pid, va(addr), None, 0, len, true, None),
            Err(VmError::InvalidArgument),
            "register_mapping({addr:#x}, {len:#x}) must fail"
        );
    }
    vm.register_mapping(pid, va(DATA_BASE), None, 0, 3 * PAGE_SIZE, true, Some(MappingId(1)))
        .unwrap();
    assert_eq!(
        vm.register_mapping(pid, va(DATA_BASE + 2 * PAGE_SIZE), None, 0, PAGE_SIZE, true, None),
        Err(VmError::AlreadyExists)
    );
    assert_eq!(
        vm.register_mapping(Pid(9), va(DATA_BASE), None, 0, PAGE_SIZE, true, None),
        Err(VmError::NoSuchEntry)
    );
    // The file range must be addressable.
    let file = MemFile::new(pattern(2, PAGE_SIZE));
    assert_eq!(
        vm.register_mapping(pid, va(DATA_BASE + 8 * PAGE_SIZE), file.source(), usize::MAX - 10, 2 * PAGE_SIZE, false, None),
        Err(VmError::InvalidArgument)
    );
    assert!(vm.lookup_page(pid, va(DATA_BASE + 9 * PAGE_SIZE)).is_none());
    let loader = FileBackedLoader::private(file.clone(), va(DATA_BASE), usize::MAX - 10, 2 * PAGE_SIZE);
    let mut page = [0; PAGE_SIZE];
    assert_eq!(
        loader.load(va(DATA_BASE + PAGE_SIZE), &mut page),
        Err(VmError::InvalidArgument)
    );
    // The tail of a partial page is still mapped.
    vm.register_mapping(pid, va(CODE_BASE), None, 0, PAGE_SIZE + 1, false, None)
        .unwrap();
    assert!(vm.lookup_page(pid, va(CODE_BASE + PAGE_SIZE)).is_some());
    assert!(vm.lookup_page(pid, va(CODE_BASE + 2 * PAGE_SIZE)).is_none());
}

pub fn process_errors() {
    let bench = Bench::new(4, 4);
    let pid = bench.spawn(1);
    assert_eq!(
        bench.vm.create_process(pid, va(STACK_TOP)),
        Err(VmError::AlreadyExists)
    );
    assert_eq!(
        bench.vm.create_process(Pid(2), va(STACK_TOP + 1)),
        Err(VmError::InvalidArgument)
    );
    assert_eq!(bench.vm.exit_process(Pid(3), 0), Err(VmError::NoSuchEntry));
    bench.vm.exit_process(pid, 7).unwrap();
    assert_eq!(bench.vm.exit_status(pid), Some(7));
    assert_eq!(bench.vm.exit_process(pid, 0), Err(VmError::NoSuchEntry));
    // A pid is reusable once its owner is gone.
    bench.vm.create_process(pid, va(STACK_TOP)).unwrap();
    assert_eq!(bench.vm.exit_status(pid), None);
}

/// Another thread of a killed process faults after the kill.
pub fn fault_after_exit() {
    let bench = Bench::new(4, 4);
    let pid = bench.spawn(1);
    bench.anon(pid, 2);
    assert_killed(
        bench.vm.handle_page_fault(pid, 0, false, true, SP),
        pid,
        FaultError::KernelAddress,
    );
    let stats = bench.vm.stats();

    match bench.vm.handle_page_fault(pid, DATA_BASE, true, true, SP) {
        Err(t) => {
            assert_eq!(t.pid, pid);
            assert_eq!(t.status, -1, "The recorded exit status is reported");
            assert_eq!(t.cause, FaultError::Exited);
        }
        Ok(r) => panic!("A fault of an exited process was resolved by {r:?}"),
    }
    let mut buf = [0; 4];
    assert_eq!(
        bench.vm.read_user(pid, DATA_BASE, &mut buf, SP).map_err(|t| t.cause),
        Err(FaultError::Exited)
    );
    assert_eq!(bench.vm.stats().killed, stats.killed, "Nothing is killed twice");
    assert_eq!(bench.vm.resident_pages(), 0);
    bench.check();

    let other = bench.spawn(2);
    bench.vm.exit_process(other, 5).unwrap();
    assert_eq!(
        bench
            .vm
            .page_fault(other, PFErrorCode::USER, DATA_BASE, SP)
            .map_err(|t| (t.status, t.cause)),
        Err((5, FaultError::Exited))
    );
}
