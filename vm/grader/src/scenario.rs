//! End-to-end scenarios over a whole context.

use crate::{Bench, CODE_BASE, DATA_BASE, MemFile, STACK_TOP, pattern, va};
use machine::{
    addressing::PAGE_SIZE,
    dev::{BlockOps, RamDisk, SECTOR_SIZE, Sector},
    mm::PageAllocator,
};
use vm::{
    MappingId, PageKey, VmConfig, VmError,
    fault::{FaultError, Resolution},
    swap::{SECTORS_PER_SLOT, SlotState, SwapSlot},
};

const SP: usize = STACK_TOP - 0x800;

fn page_addr(n: usize) -> usize {
    DATA_BASE + n * PAGE_SIZE
}

fn slot_contents(bench: &Bench, slot: SwapSlot) -> Vec<u8> {
    let mut out = Vec::with_capacity(PAGE_SIZE);
    for i in 0..SECTORS_PER_SLOT {
        let mut sector = [0; SECTOR_SIZE];
        bench
            .disk
            .read(Sector(slot.first_sector().into_usize() + i), &mut sector)
            .unwrap();
        out.extend_from_slice(&sector);
    }
    out
}

/// A fresh process faults on its first code page.
pub fn lazy_load_code() {
    let bench = Bench::new(4, 4);
    let image = pattern(3, 2 * PAGE_SIZE + 100);
    let file = MemFile::new(image.clone());
    let pid = bench.spawn(1);
    bench
        .vm
        .register_mapping(pid, va(CODE_BASE), file.source(), 0, image.len(), false, None)
        .unwrap();
    assert!(bench.vm.lookup_page(pid, va(CODE_BASE)).unwrap().frame.is_none());
    assert_eq!(bench.vm.resident_pages(), 0, "Nothing is loaded before a fault");

    assert_eq!(
        bench.vm.handle_page_fault(pid, CODE_BASE + 0x10, false, true, SP),
        Ok(Resolution::LazyLoad)
    );
    let info = bench.vm.lookup_page(pid, va(CODE_BASE)).unwrap();
    let frame = info.frame.expect("the page must be resident");
    assert!(!info.writable, "Code is mapped read-only");
    assert_eq!(bench.vm.frame_owner(frame), Some(PageKey::new(pid, va(CODE_BASE))));
    assert_eq!(bench.vm.translate(pid, va(CODE_BASE + 0x10)), Some(frame + 0x10));
    assert_eq!(bench.vm.resident_pages(), 1);

    let mut buf = vec![0xff; 3 * PAGE_SIZE];
    bench.vm.read_user(pid, CODE_BASE, &mut buf, SP).unwrap();
    assert_eq!(&buf[..image.len()], &image[..]);
    assert!(
        buf[image.len()..].iter().all(|b| *b == 0),
        "Bytes past the image are zero"
    );
    assert_eq!(bench.vm.stats().lazy_loads, 3);
    bench.check();
}

/// Memory is full and a new page is needed.
pub fn evict_oldest() {
    let bench = Bench::new(2, 4);
    let pid = bench.spawn(1);
    bench.anon(pid, 3);
    bench.fill(pid, 0, 0x11);
    bench.fill(pid, 1, 0x22);
    let frame0 = bench.vm.frame_of(pid, va(page_addr(0))).unwrap();
    assert_eq!(bench.ram.free_pages(), 0);

    bench.fill(pid, 2, 0x33);
    assert_eq!(bench.vm.stats().evictions, 1);
    assert_eq!(
        bench.vm.swap_slot_of(pid, va(page_addr(0))),
        Some(SwapSlot(0)),
        "The oldest page goes to the first swap slot"
    );
    let info = bench.vm.lookup_page(pid, va(page_addr(0))).unwrap();
    assert_eq!(info.frame, None);
    assert_eq!(info.swap_slot, Some(SwapSlot(0)));
    assert_eq!(
        bench.vm.frame_of(pid, va(page_addr(2))),
        Some(frame0),
        "The new page takes the freed frame"
    );
    assert_eq!(
        bench.vm.frame_owner(frame0),
        Some(PageKey::new(pid, va(page_addr(2))))
    );
    assert_eq!(bench.vm.translate(pid, va(page_addr(0))), None);
    assert_eq!(slot_contents(&bench, SwapSlot(0)), vec![0x11; PAGE_SIZE]);
    assert_eq!(
        bench.vm.eviction_order(),
        vec![
            PageKey::new(pid, va(page_addr(1))),
            PageKey::new(pid, va(page_addr(2)))
        ]
    );
    bench.check();
}

/// An evicted page is faulted back in.
pub fn swap_in() {
    let bench = Bench::new(2, 4);
    let pid = bench.spawn(1);
    bench.anon(pid, 3);
    let data = pattern(0x42, PAGE_SIZE);
    bench
        .vm
        .write_user(pid, page_addr(0), &data, SP)
        .unwrap();
    bench.fill(pid, 1, 0x22);
    bench.fill(pid, 2, 0x33);
    assert_eq!(bench.vm.swap_slot_of(pid, va(page_addr(0))), Some(SwapSlot(0)));

    assert_eq!(
        bench.vm.handle_page_fault(pid, page_addr(0) + 4, false, true, SP),
        Ok(Resolution::SwapIn)
    );
    assert_eq!(bench.vm.slot_state(SwapSlot(0)), Some(SlotState::Free));
    let info = bench.vm.lookup_page(pid, va(page_addr(0))).unwrap();
    assert!(info.frame.is_some());
    assert_eq!(info.swap_slot, None);
    assert_eq!(bench.page(pid, 0), data, "Swap-in restores the bytes exactly");

    // Page 1 made room, into a slot never used before.
    assert_eq!(bench.vm.swap_slot_of(pid, va(page_addr(1))), Some(SwapSlot(1)));
    assert_eq!(bench.page(pid, 1), vec![0x22; PAGE_SIZE]);
    assert_eq!(bench.page(pid, 2), vec![0x33; PAGE_SIZE]);
    assert!(bench.vm.stats().swap_ins >= 2);
    bench.check();
}

/// A process holding swapped pages exits and another process reuses its
/// slots.
pub fn exit_frees_swap() {
    let bench = Bench::new(2, 2);
    let a = bench.spawn(1);
    bench.anon(a, 4);
    for n in 0..4 {
        bench.fill(a, n, n as u8 + 1);
    }
    assert_eq!(bench.vm.swap_slot_of(a, va(page_addr(0))), Some(SwapSlot(0)));
    assert_eq!(bench.vm.swap_slot_of(a, va(page_addr(1))), Some(SwapSlot(1)));
    assert_eq!(bench.vm.free_swap_slots(), 0);

    bench.vm.exit_process(a, 0).unwrap();
    assert_eq!(bench.vm.slot_state(SwapSlot(0)), Some(SlotState::Free));
    assert_eq!(bench.vm.slot_state(SwapSlot(1)), Some(SlotState::Free));
    assert_eq!(bench.vm.free_swap_slots(), 2);
    assert_eq!(bench.vm.resident_pages(), 0);
    assert_eq!(bench.ram.free_pages(), 2);
    bench.check();

    let b = bench.spawn(2);
    bench.anon(b, 3);
    for n in 0..3 {
        bench.fill(b, n, 0x80 + n as u8);
    }
    assert_eq!(
        bench.vm.swap_slot_of(b, va(page_addr(0))),
        Some(SwapSlot(0)),
        "Freed slots are reused by other processes"
    );
    assert_eq!(bench.page(b, 0), vec![0x80; PAGE_SIZE]);
    bench.check();
}

pub fn cross_page_access() {
    let bench = Bench::new(2, 8);
    let pid = bench.spawn(1);
    bench.anon(pid, 4);
    let data = pattern(9, 3 * PAGE_SIZE);
    bench
        .vm
        .write_user(pid, DATA_BASE + 0x800, &data, SP)
        .unwrap();
    let mut back = vec![0; data.len()];
    bench
        .vm
        .read_user(pid, DATA_BASE + 0x800, &mut back, SP)
        .unwrap();
    assert_eq!(back, data);
    assert_eq!(bench.vm.resident_pages(), 2);
    bench.check();
}

pub fn mmap_write_back() {
    let bench = Bench::new(4, 4);
    let before = pattern(5, 2 * PAGE_SIZE);
    let file = MemFile::new(before.clone());
    let pid = bench.spawn(1);
    bench
        .vm
        .register_mapping(pid, va(DATA_BASE), file.source(), 0, before.len(), true, Some(MappingId(1)))
        .unwrap();

    bench
        .vm
        .write_user(pid, DATA_BASE + PAGE_SIZE + 10, &[9; 4], SP)
        .unwrap();
    assert_eq!(file.contents(), before, "Nothing is written until unmap");
    assert_eq!(bench.vm.unregister_mapping(pid, MappingId(1)), Ok(2));

    let mut expected = before;
    expected[PAGE_SIZE + 10..PAGE_SIZE + 14].copy_from_slice(&[9; 4]);
    assert_eq!(file.contents(), expected);
    assert!(bench.vm.lookup_page(pid, va(DATA_BASE)).is_none());
    assert_eq!(bench.vm.resident_pages(), 0);
    assert_eq!(bench.ram.free_pages(), 4);
    assert_eq!(
        bench.vm.unregister_mapping(pid, MappingId(1)),
        Err(VmError::NoSuchEntry)
    );
    bench.check();
}

pub fn mmap_write_back_swapped() {
    let bench = Bench::new(1, 4);
    let before = pattern(6, 2 * PAGE_SIZE);
    let file = MemFile::new(before.clone());
    let pid = bench.spawn(1);
    bench
        .vm
        .register_mapping(pid, va(DATA_BASE), file.source(), 0, before.len(), true, Some(MappingId(3)))
        .unwrap();

    bench.vm.write_user(pid, DATA_BASE, &[0xee; 8], SP).unwrap();
    let mut buf = [0; 8];
    bench
        .vm
        .read_user(pid, DATA_BASE + PAGE_SIZE, &mut buf, SP)
        .unwrap();
    assert!(bench.vm.swap_slot_of(pid, va(DATA_BASE)).is_some());

    bench.vm.unregister_mapping(pid, MappingId(3)).unwrap();
    let mut expected = before;
    expected[..8].copy_from_slice(&[0xee; 8]);
    assert_eq!(file.contents(), expected);
    assert_eq!(bench.vm.free_swap_slots(), 4);
    bench.check();
}

pub fn mmap_clean_pages() {
    let bench = Bench::new(4, 4);
    let file = MemFile::new(pattern(1, 100));
    let pid = bench.spawn(1);
    bench
        .vm
        .register_mapping(pid, va(DATA_BASE), file.source(), 0, 100, true, Some(MappingId(1)))
        .unwrap();

    let page = bench.page(pid, 0);
    assert_eq!(&page[..100], &pattern(1, 100)[..]);
    assert!(page[100..].iter().all(|b| *b == 0));
    bench.vm.unregister_mapping(pid, MappingId(1)).unwrap();
    assert_eq!(file.writes(), 0, "Clean pages are not written back");

    bench
        .vm
        .register_mapping(pid, va(DATA_BASE), file.source(), 0, 100, true, Some(MappingId(2)))
        .unwrap();
    bench.vm.write_user(pid, DATA_BASE + 200, &[1; 8], SP).unwrap();
    bench.vm.unregister_mapping(pid, MappingId(2)).unwrap();
    assert_eq!(file.contents().len(), 100, "Write-back never extends the file");
}

pub fn exit_writes_back() {
    let bench = Bench::new(4, 4);
    let shared = MemFile::new(vec![0; PAGE_SIZE]);
    let private = MemFile::new(vec![0; PAGE_SIZE]);
    let pid = bench.spawn(1);
    bench
        .vm
        .register_mapping(pid, va(DATA_BASE), shared.source(), 0, PAGE_SIZE, true, Some(MappingId(1)))
        .unwrap();
    bench
        .vm
        .register_mapping(pid, va(CODE_BASE), private.source(), 0, PAGE_SIZE, true, None)
        .unwrap();
    bench.vm.write_user(pid, DATA_BASE, &[7; 16], SP).unwrap();
    bench.vm.write_user(pid, CODE_BASE, &[7; 16], SP).unwrap();

    bench.vm.exit_process(pid, 0).unwrap();
    assert_eq!(&shared.contents()[..16], &[7; 16]);
    assert_eq!(private.writes(), 0, "Private segments are never written back");
    bench.check();
}

/// The swap device refuses writes, so the page that needs a frame cannot
/// get one.
pub fn read_only_swap() {
    let bench = Bench::with(VmConfig::default(), 1, RamDisk::new(4 * SECTORS_PER_SLOT).ro());
    let pid = bench.spawn(1);
    bench.anon(pid, 2);
    bench.fill(pid, 0, 0x5a);

    let r = bench
        .vm
        .write_user(pid, page_addr(1), &[1; 8], SP);
    match r {
        Err(t) => assert_eq!(t.cause, FaultError::Resource(VmError::IOError)),
        Ok(()) => panic!("A page was evicted to a read-only disk"),
    }
    assert_eq!(bench.vm.exit_status(pid), Some(-1));
    assert_eq!(bench.vm.stats().evictions, 0);
    assert_eq!(bench.vm.free_swap_slots(), 4);
    assert_eq!(bench.ram.free_pages(), 1);
    bench.check();
}

pub fn mmap_lost_write_back() {
    let bench = Bench::new(4, 4);
    let before = pattern(8, 2 * PAGE_SIZE);
    let file = MemFile::read_only(before.clone());
    let pid = bench.spawn(1);
    bench
        .vm
        .register_mapping(pid, va(DATA_BASE), file.source(), 0, before.len(), true, Some(MappingId(4)))
        .unwrap();
    bench.vm.write_user(pid, DATA_BASE, &[3; 8], SP).unwrap();
    let mut buf = [0; 8];
    bench
        .vm
        .read_user(pid, DATA_BASE + PAGE_SIZE, &mut buf, SP)
        .unwrap();

    assert_eq!(
        bench.vm.unregister_mapping(pid, MappingId(4)),
        Err(VmError::IOError),
        "A modified page that cannot be written back is reported"
    );
    assert_eq!(file.writes(), 1, "Only the modified page is written back");
    assert_eq!(file.contents(), before);
    assert!(bench.vm.lookup_page(pid, va(DATA_BASE)).is_none());
    assert!(bench.vm.lookup_page(pid, va(DATA_BASE + PAGE_SIZE)).is_none());
    assert_eq!(bench.ram.free_pages(), 4);
    assert_eq!(
        bench.vm.unregister_mapping(pid, MappingId(4)),
        Err(VmError::NoSuchEntry)
    );
    bench.check();
}
