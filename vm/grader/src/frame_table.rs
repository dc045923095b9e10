use crate::va;
use machine::{addressing::Pa, mm::Ram};
use std::panic::{AssertUnwindSafe, catch_unwind};
use vm::{PageKey, Pid, frame_table::FrameTable};

fn frame(n: usize) -> Pa {
    Ram::BASE + n * 0x1000
}

fn key(pid: u32, addr: usize) -> PageKey {
    PageKey::new(Pid(pid), va(addr))
}

pub fn record_and_lookup() {
    let mut frames = FrameTable::new();
    frames.record(frame(0), key(1, 0x1000));
    frames.record(frame(1), key(2, 0x1000));

    assert_eq!(frames.lookup_by_frame(frame(0)), Some(key(1, 0x1000)));
    assert_eq!(frames.lookup_by_frame(frame(1)), Some(key(2, 0x1000)));
    assert_eq!(frames.lookup_by_owner(key(1, 0x1000)), Some(frame(0)));
    assert_eq!(frames.lookup_by_owner(key(2, 0x1000)), Some(frame(1)));
    assert_eq!(
        frames.lookup_by_owner(key(1, 0x2000)),
        None,
        "Same process, different page must not match"
    );
    assert_eq!(frames.len(), 2);
}

pub fn record_replaces() {
    let mut frames = FrameTable::new();
    frames.record(frame(0), key(1, 0x1000));
    frames.record(frame(0), key(1, 0x5000));

    assert_eq!(frames.len(), 1, "A frame has at most one record");
    assert_eq!(frames.lookup_by_frame(frame(0)), Some(key(1, 0x5000)));
    assert_eq!(
        frames.lookup_by_owner(key(1, 0x1000)),
        None,
        "The replaced owner must not keep the frame"
    );

    // An owner moving to another frame leaves the old frame unowned.
    frames.record(frame(3), key(1, 0x5000));
    assert_eq!(frames.len(), 1);
    assert_eq!(frames.lookup_by_frame(frame(0)), None);
    assert_eq!(frames.lookup_by_frame(frame(3)), Some(key(1, 0x5000)));
}

pub fn release() {
    let mut frames = FrameTable::new();
    frames.record(frame(0), key(1, 0x1000));
    frames.record(frame(1), key(1, 0x2000));

    assert_eq!(frames.release(key(1, 0x1000)), frame(0));
    assert_eq!(frames.lookup_by_frame(frame(0)), None);
    assert_eq!(frames.lookup_by_owner(key(1, 0x1000)), None);
    assert_eq!(frames.lookup_by_owner(key(1, 0x2000)), Some(frame(1)));
}

pub fn release_unowned_panics() {
    let mut frames = FrameTable::new();
    frames.record(frame(0), key(1, 0x1000));

    let r = catch_unwind(AssertUnwindSafe(|| frames.release(key(2, 0x1000))));
    assert!(
        r.is_err(),
        "Releasing a page that owns no frame is an internal inconsistency"
    );
}

pub fn lookups_are_read_only() {
    let mut frames = FrameTable::new();
    frames.record(frame(0), key(1, 0x1000));
    let before: Vec<_> = frames.iter().collect();

    for _ in 0..3 {
        let _ = frames.lookup_by_frame(frame(0));
        let _ = frames.lookup_by_frame(frame(9));
        let _ = frames.lookup_by_owner(key(1, 0x1000));
        let _ = frames.lookup_by_owner(key(7, 0x1000));
    }
    assert_eq!(frames.iter().collect::<Vec<_>>(), before);
}

pub fn frames_of_process() {
    let mut frames = FrameTable::new();
    frames.record(frame(0), key(1, 0x3000));
    frames.record(frame(1), key(2, 0x1000));
    frames.record(frame(2), key(1, 0x1000));

    let mine: Vec<_> = frames.frames_of(Pid(1)).collect();
    assert_eq!(
        mine,
        vec![(key(1, 0x1000), frame(2)), (key(1, 0x3000), frame(0))]
    );
    assert_eq!(frames.frames_of(Pid(3)).count(), 0);
}
