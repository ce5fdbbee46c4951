//! Integration tests for the LRU-K replacer

use quarry::buffer::LruKReplacer;
use quarry::common::{AccessType, FrameId};

fn touch(replacer: &LruKReplacer, frame: u32) {
    replacer.record_access(FrameId::new(frame), AccessType::Unknown);
}

#[test]
fn test_lru_k_scan_victim_first() {
    // k = 2, three frames, access sequence 0,1,2,0,1,0. Frame 2 is the only
    // one with a single access, so it alone has infinite backward
    // k-distance and must be the victim.
    let replacer = LruKReplacer::new(2, 3);

    for frame in [0, 1, 2, 0, 1, 0] {
        touch(&replacer, frame);
    }
    for frame in 0..3 {
        replacer.set_evictable(FrameId::new(frame), true);
    }

    assert_eq!(replacer.evict(), Some(FrameId::new(2)));
}

#[test]
fn test_lru_k_eviction_order() {
    let replacer = LruKReplacer::new(2, 10);

    for i in 0..5 {
        touch(&replacer, i);
        replacer.set_evictable(FrameId::new(i), true);
    }

    assert_eq!(replacer.size(), 5);

    // All frames have a single access (< k), hence +inf distance; they
    // leave in order of their first access.
    for i in 0..5 {
        assert_eq!(replacer.evict(), Some(FrameId::new(i)));
    }

    assert_eq!(replacer.size(), 0);
    assert_eq!(replacer.evict(), None);
}

#[test]
fn test_lru_k_respects_k_distance() {
    let replacer = LruKReplacer::new(2, 10);

    // Frame 0: one access (+inf). Frames 1 and 2: two accesses each.
    touch(&replacer, 0);
    touch(&replacer, 1);
    touch(&replacer, 1);
    touch(&replacer, 2);
    touch(&replacer, 2);

    for i in 0..3 {
        replacer.set_evictable(FrameId::new(i), true);
    }

    assert_eq!(replacer.evict(), Some(FrameId::new(0)));
    // Frame 1's 2nd-previous access is older than frame 2's.
    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    assert_eq!(replacer.evict(), Some(FrameId::new(2)));
}

#[test]
fn test_lru_k_pinned_frames_not_evicted() {
    let replacer = LruKReplacer::new(2, 10);

    touch(&replacer, 0);
    touch(&replacer, 1);
    touch(&replacer, 2);

    replacer.set_evictable(FrameId::new(1), true);
    replacer.set_evictable(FrameId::new(2), true);

    assert_eq!(replacer.size(), 2);

    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    assert_eq!(replacer.evict(), Some(FrameId::new(2)));
    assert_eq!(replacer.evict(), None);
}

#[test]
fn test_lru_k_toggle_evictable() {
    let replacer = LruKReplacer::new(2, 10);

    touch(&replacer, 0);
    replacer.set_evictable(FrameId::new(0), true);
    assert_eq!(replacer.size(), 1);

    replacer.set_evictable(FrameId::new(0), false);
    assert_eq!(replacer.size(), 0);
    assert_eq!(replacer.evict(), None);

    replacer.set_evictable(FrameId::new(0), true);
    assert_eq!(replacer.size(), 1);
    assert_eq!(replacer.evict(), Some(FrameId::new(0)));
}

#[test]
fn test_lru_k_remove() {
    let replacer = LruKReplacer::new(2, 10);

    touch(&replacer, 0);
    touch(&replacer, 1);
    replacer.set_evictable(FrameId::new(0), true);
    replacer.set_evictable(FrameId::new(1), true);

    replacer.remove(FrameId::new(0));
    assert_eq!(replacer.size(), 1);

    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    assert_eq!(replacer.evict(), None);
}

#[test]
fn test_lru_k_history_trimmed_to_k() {
    let replacer = LruKReplacer::new(2, 10);

    // Frame 0 is touched often but early; frame 1 rarely but late.
    for _ in 0..10 {
        touch(&replacer, 0);
    }
    touch(&replacer, 1);
    touch(&replacer, 1);

    replacer.set_evictable(FrameId::new(0), true);
    replacer.set_evictable(FrameId::new(1), true);

    // Only the last k accesses count, so frame 0's distance is larger.
    assert_eq!(replacer.evict(), Some(FrameId::new(0)));
    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
}

#[test]
fn test_lru_k_one_is_plain_lru() {
    let replacer = LruKReplacer::new(1, 10);

    touch(&replacer, 0);
    touch(&replacer, 1);
    touch(&replacer, 2);
    touch(&replacer, 0);

    for i in 0..3 {
        replacer.set_evictable(FrameId::new(i), true);
    }

    assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    assert_eq!(replacer.evict(), Some(FrameId::new(2)));
    assert_eq!(replacer.evict(), Some(FrameId::new(0)));
}

#[test]
#[should_panic(expected = "out of range")]
fn test_lru_k_out_of_range_frame_raises() {
    let replacer = LruKReplacer::new(2, 4);
    touch(&replacer, 4);
}

#[test]
fn test_lru_k_concurrent_access() {
    use std::sync::Arc;
    use std::thread;

    let replacer = Arc::new(LruKReplacer::new(2, 100));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let replacer = Arc::clone(&replacer);
            thread::spawn(move || {
                for i in 0..25 {
                    let frame_id = FrameId::new((t * 25 + i) as u32);
                    replacer.record_access(frame_id, AccessType::Unknown);
                    replacer.set_evictable(frame_id, true);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(replacer.size(), 100);

    for _ in 0..100 {
        assert!(replacer.evict().is_some());
    }
    assert_eq!(replacer.size(), 0);
}
