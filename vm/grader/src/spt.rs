use crate::va;
use machine::{addressing::Pa, mm::Ram};
use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};
use vm::{
    MappingId, PageKey, Pid,
    frame_table::FrameTable,
    loader::AnonLoader,
    page_dir::Permission,
    spt::{PageEntry, SupplementalPageTable},
};

fn key(pid: u32, addr: usize) -> PageKey {
    PageKey::new(Pid(pid), va(addr))
}

fn entry(frame: Option<Pa>, mapping: Option<MappingId>) -> PageEntry {
    PageEntry {
        frame,
        ..PageEntry::lazy(
            Arc::new(AnonLoader {}),
            Permission::READ | Permission::USER,
            mapping,
        )
    }
}

pub fn insert_lazy() {
    let (mut spt, mut frames) = (SupplementalPageTable::new(), FrameTable::new());
    assert!(spt.insert(&mut frames, key(1, 0x1000), entry(None, None)).is_none());

    let e = spt.lookup(key(1, 0x1000)).expect("record must exist");
    assert!(!e.is_resident());
    assert!(
        frames.is_empty(),
        "A record without a frame must not create a frame record"
    );
    assert!(spt.lookup(key(2, 0x1000)).is_none());
}

pub fn insert_resident() {
    let (mut spt, mut frames) = (SupplementalPageTable::new(), FrameTable::new());
    spt.insert(&mut frames, key(1, 0x1000), entry(Some(Ram::BASE), None));

    assert_eq!(spt.lookup(key(1, 0x1000)).unwrap().frame, Some(Ram::BASE));
    assert_eq!(frames.lookup_by_frame(Ram::BASE), Some(key(1, 0x1000)));
}

pub fn insert_overwrites() {
    let (mut spt, mut frames) = (SupplementalPageTable::new(), FrameTable::new());
    spt.insert(&mut frames, key(1, 0x1000), entry(None, None));
    let prev = spt.insert(
        &mut frames,
        key(1, 0x1000),
        entry(None, Some(MappingId(4))),
    );

    assert!(prev.is_some_and(|p| p.mapping.is_none()));
    assert_eq!(spt.len(), 1);
    assert_eq!(spt.lookup(key(1, 0x1000)).unwrap().mapping, Some(MappingId(4)));
}

pub fn lookup_unaligned() {
    let (mut spt, mut frames) = (SupplementalPageTable::new(), FrameTable::new());
    spt.insert(&mut frames, key(1, 0x1000), entry(None, None));
    assert!(
        spt.lookup(key(1, 0x1fff)).is_some(),
        "Keys are page granular"
    );
}

pub fn clear() {
    let (mut spt, mut frames) = (SupplementalPageTable::new(), FrameTable::new());
    spt.insert(&mut frames, key(1, 0x1000), entry(Some(Ram::BASE), None));

    assert_eq!(spt.clear(&mut frames, key(1, 0x1000)), Ram::BASE);
    assert!(
        !spt.lookup(key(1, 0x1000)).unwrap().is_resident(),
        "Clearing keeps the record but drops the frame"
    );
    assert_eq!(frames.lookup_by_frame(Ram::BASE), None);
    assert!(frames.is_empty());
}

pub fn clear_missing_panics() {
    let (mut spt, mut frames) = (SupplementalPageTable::new(), FrameTable::new());
    let r = catch_unwind(AssertUnwindSafe(|| spt.clear(&mut frames, key(1, 0x1000))));
    assert!(r.is_err(), "Clearing a page without a record must panic");

    spt.insert(&mut frames, key(1, 0x1000), entry(None, None));
    let r = catch_unwind(AssertUnwindSafe(|| spt.clear(&mut frames, key(1, 0x1000))));
    assert!(r.is_err(), "Clearing a non-resident page must panic");
}

pub fn remove() {
    let (mut spt, mut frames) = (SupplementalPageTable::new(), FrameTable::new());
    spt.insert(&mut frames, key(1, 0x1000), entry(Some(Ram::BASE), None));
    spt.insert(&mut frames, key(1, 0x2000), entry(None, None));

    assert!(spt.remove(&mut frames, key(1, 0x1000)).is_some());
    assert!(frames.is_empty(), "Removing a resident record drops its frame record");
    assert!(spt.remove(&mut frames, key(1, 0x2000)).is_some());
    assert!(spt.remove(&mut frames, key(1, 0x2000)).is_none());
    assert!(spt.is_empty());
}

pub fn per_process_keys() {
    let (mut spt, mut frames) = (SupplementalPageTable::new(), FrameTable::new());
    spt.insert(&mut frames, key(2, 0x1000), entry(None, None));
    spt.insert(&mut frames, key(1, 0x3000), entry(None, Some(MappingId(1))));
    spt.insert(&mut frames, key(1, 0x1000), entry(None, Some(MappingId(1))));
    spt.insert(&mut frames, key(1, 0x2000), entry(None, Some(MappingId(2))));

    assert_eq!(
        spt.keys_of(Pid(1)),
        vec![key(1, 0x1000), key(1, 0x2000), key(1, 0x3000)]
    );
    assert_eq!(
        spt.keys_of_mapping(Pid(1), MappingId(1)),
        vec![key(1, 0x1000), key(1, 0x3000)]
    );
    assert!(spt.keys_of_mapping(Pid(2), MappingId(1)).is_empty());
    assert!(spt.overlaps(key(1, 0x2000), key(1, 0x3000)));
    assert!(!spt.overlaps(key(1, 0x4000), key(1, 0x9000)));
}
