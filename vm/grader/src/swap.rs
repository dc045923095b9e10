use crate::{pattern, va};
use machine::{
    addressing::PAGE_SIZE,
    dev::{BlockOps, DeviceError, RamDisk, SECTOR_SIZE, Sector},
};
use std::sync::{Arc, Mutex};
use vm::{
    PageKey, Pid, VmError,
    swap::{SECTORS_PER_SLOT, SlotState, SwapManager, SwapSlot},
};

fn key(pid: u32, addr: usize) -> PageKey {
    PageKey::new(Pid(pid), va(addr))
}

fn page(seed: u8) -> [u8; PAGE_SIZE] {
    pattern(seed, PAGE_SIZE).try_into().unwrap()
}

fn manager(slots: usize) -> (SwapManager, Arc<RamDisk>) {
    let disk = Arc::new(RamDisk::new(slots * SECTORS_PER_SLOT));
    (SwapManager::new(disk.clone()), disk)
}

pub fn geometry() {
    assert_eq!(SECTORS_PER_SLOT, 8);
    assert_eq!(SwapSlot(3).first_sector(), Sector(24));

    // A trailing partial slot is never used.
    let swap = SwapManager::new(Arc::new(RamDisk::new(20)));
    assert_eq!(swap.capacity(), 2);
    assert_eq!(swap.free_slots(), 2);
    assert_eq!(swap.slot_state(SwapSlot(1)), Some(SlotState::Free));
    assert_eq!(swap.slot_state(SwapSlot(2)), None);
}

pub fn write_out_layout() {
    let written = Arc::new(Mutex::new(Vec::new()));
    let log = written.clone();
    let disk = Arc::new(RamDisk::new(4 * SECTORS_PER_SLOT).hook(Arc::new(
        move |sector: Sector, is_write: bool| -> Result<(), DeviceError> {
            if is_write {
                log.lock().unwrap().push(sector.into_usize());
            }
            Ok(())
        },
    )));
    let mut swap = SwapManager::new(disk.clone());

    assert_eq!(swap.write_out(key(1, 0x1000), &page(1)), Ok(SwapSlot(0)));
    assert_eq!(swap.write_out(key(1, 0x2000), &page(2)), Ok(SwapSlot(1)));
    assert_eq!(
        *written.lock().unwrap(),
        (0..16).collect::<Vec<_>>(),
        "Slot n occupies sectors 8n..8n+8"
    );

    // Raw bytes, no header.
    let expected = page(2);
    for i in 0..SECTORS_PER_SLOT {
        let mut sector = [0; SECTOR_SIZE];
        disk.read(Sector(8 + i), &mut sector).unwrap();
        assert_eq!(&sector[..], &expected[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE]);
    }
    assert_eq!(
        swap.slot_state(SwapSlot(1)),
        Some(SlotState::Owned(key(1, 0x2000)))
    );
}

pub fn round_trip() {
    let (mut swap, _) = manager(4);
    let before = page(0x5a);
    let slot = swap.write_out(key(3, 0x7000), &before).unwrap();
    assert_eq!(swap.lookup_by_owner(key(3, 0x7000)), Some(slot));
    assert_eq!(swap.free_slots(), 3);

    let mut back = [0; PAGE_SIZE];
    assert_eq!(swap.read_in(key(3, 0x7000), &mut back), Ok(slot));
    assert_eq!(back, before);
    assert_eq!(swap.slot_state(slot), Some(SlotState::Free));
    assert_eq!(swap.lookup_by_owner(key(3, 0x7000)), None);
    assert_eq!(swap.free_slots(), 4);

    assert_eq!(
        swap.read_in(key(3, 0x7000), &mut back),
        Err(VmError::NoSuchEntry),
        "A slot is read back exactly once"
    );
}

pub fn unused_slots_first() {
    let (mut swap, _) = manager(3);
    assert_eq!(swap.write_out(key(1, 0x1000), &page(1)), Ok(SwapSlot(0)));
    swap.release(key(1, 0x1000));

    // Slot 0 is free, but slots never used come first.
    assert_eq!(swap.write_out(key(1, 0x2000), &page(2)), Ok(SwapSlot(1)));
    assert_eq!(swap.write_out(key(1, 0x3000), &page(3)), Ok(SwapSlot(2)));
    // Exhausted: reuse the free one.
    assert_eq!(swap.write_out(key(1, 0x4000), &page(4)), Ok(SwapSlot(0)));
}

pub fn reuse_lowest_free() {
    let (mut swap, _) = manager(4);
    for i in 0..4 {
        swap.write_out(key(1, 0x1000 * (i + 1)), &page(i as u8)).unwrap();
    }
    swap.release(key(1, 0x4000));
    swap.release(key(1, 0x2000));

    assert_eq!(swap.write_out(key(2, 0x1000), &page(9)), Ok(SwapSlot(1)));
    assert_eq!(swap.write_out(key(2, 0x2000), &page(9)), Ok(SwapSlot(3)));
}

pub fn exhaustion() {
    let (mut swap, _) = manager(2);
    swap.write_out(key(1, 0x1000), &page(1)).unwrap();
    swap.write_out(key(1, 0x2000), &page(2)).unwrap();

    assert_eq!(
        swap.write_out(key(1, 0x3000), &page(3)),
        Err(VmError::NoSpace),
        "A full swap device must report exhaustion, not panic"
    );
    assert_eq!(swap.lookup_by_owner(key(1, 0x3000)), None);
    assert_eq!(swap.free_slots(), 0);
}

pub fn write_error_consumes_nothing() {
    let disk = Arc::new(
        RamDisk::new(2 * SECTORS_PER_SLOT)
            .hook(Arc::new(|sector: Sector, is_write: bool| {
                if is_write && sector.into_usize() == 3 {
                    Err(DeviceError("injected"))
                } else {
                    Ok(())
                }
            })),
    );
    let mut swap = SwapManager::new(disk);

    assert_eq!(
        swap.write_out(key(1, 0x1000), &page(1)),
        Err(VmError::IOError)
    );
    assert_eq!(swap.free_slots(), 2);
    assert_eq!(swap.lookup_by_owner(key(1, 0x1000)), None);
    assert_eq!(swap.slot_state(SwapSlot(0)), Some(SlotState::Free));
}

pub fn read_error_keeps_slot() {
    let fail = Arc::new(Mutex::new(false));
    let flag = fail.clone();
    let disk = Arc::new(RamDisk::new(2 * SECTORS_PER_SLOT).hook(Arc::new(
        move |_: Sector, is_write: bool| {
            if !is_write && *flag.lock().unwrap() {
                Err(DeviceError("injected"))
            } else {
                Ok(())
            }
        },
    )));
    let mut swap = SwapManager::new(disk);
    let slot = swap.write_out(key(1, 0x1000), &page(1)).unwrap();

    *fail.lock().unwrap() = true;
    let mut back = [0; PAGE_SIZE];
    assert_eq!(swap.read_in(key(1, 0x1000), &mut back), Err(VmError::IOError));
    assert_eq!(swap.slot_state(slot), Some(SlotState::Owned(key(1, 0x1000))));

    *fail.lock().unwrap() = false;
    assert_eq!(swap.read_in(key(1, 0x1000), &mut back), Ok(slot));
    assert_eq!(back, page(1));
}

pub fn release_all() {
    let (mut swap, _) = manager(4);
    swap.write_out(key(1, 0x1000), &page(1)).unwrap();
    swap.write_out(key(2, 0x1000), &page(2)).unwrap();
    swap.write_out(key(1, 0x9000), &page(3)).unwrap();

    assert_eq!(swap.release_all(Pid(1)), 2);
    assert_eq!(swap.slot_state(SwapSlot(0)), Some(SlotState::Free));
    assert_eq!(swap.slot_state(SwapSlot(2)), Some(SlotState::Free));
    assert_eq!(
        swap.slot_state(SwapSlot(1)),
        Some(SlotState::Owned(key(2, 0x1000))),
        "Other processes keep their slots"
    );
    assert_eq!(swap.release_all(Pid(1)), 0);
}

pub fn duplicate_owner_panics() {
    let (mut swap, _) = manager(4);
    swap.write_out(key(1, 0x1000), &page(1)).unwrap();
    let r = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        swap.write_out(key(1, 0x1000), &page(1))
    }));
    assert!(r.is_err(), "A page owns at most one slot");
}
