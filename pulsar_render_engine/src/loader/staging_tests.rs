use super::*;
use crate::device::mock_device::{FenceMode, MockDevice};
use crate::error::Error;

// ============================================================================
// Helpers
// ============================================================================

fn arena(buffer_size: u64, buffer_count: u32) -> StagingArena {
    let device = MockDevice::new(FenceMode::Immediate);
    StagingArena::new(device.as_ref(), buffer_size, buffer_count).unwrap()
}

fn buffer_id(allocation: &StagingAllocation) -> usize {
    Arc::as_ptr(&allocation.buffer) as *const () as usize
}

// ============================================================================
// Creation tests
// ============================================================================

#[test]
fn test_capacity_accounting() {
    let arena = arena(1024, 3);
    assert_eq!(arena.buffer_size(), 1024);
    assert_eq!(arena.capacity(), 3072);
    assert_eq!(arena.in_use_bytes(), 0);
    assert_eq!(arena.live_reservations(), 0);
}

#[test]
fn test_zero_budget_rejected() {
    let device = MockDevice::new(FenceMode::Immediate);
    assert!(StagingArena::new(device.as_ref(), 0, 1).is_err());
    assert!(StagingArena::new(device.as_ref(), 1024, 0).is_err());
}

// ============================================================================
// Reservation tests
// ============================================================================

#[test]
fn test_sequential_reservations_are_aligned() {
    // Mock device requires 4-byte copy offsets.
    let mut arena = arena(1024, 1);
    let first = arena.try_reserve(10, SyncToken(1)).unwrap().unwrap();
    assert_eq!(first.offset, 0);
    assert_eq!(first.size, 10);

    let second = arena.try_reserve(10, SyncToken(1)).unwrap().unwrap();
    assert_eq!(second.offset, 12);
    assert_eq!(arena.in_use_bytes(), 20);
    assert_eq!(arena.live_reservations(), 2);
}

#[test]
fn test_reserve_larger_than_buffer_fails_permanently() {
    let mut arena = arena(1024, 2);
    // Exceeds one ring buffer even though total capacity is 2048.
    match arena.try_reserve(1025, SyncToken(1)) {
        Err(Error::Configuration(_)) => {}
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_zero_reserve_rejected() {
    let mut arena = arena(1024, 1);
    assert!(matches!(
        arena.try_reserve(0, SyncToken(1)),
        Err(Error::InvalidResource(_))
    ));
}

#[test]
fn test_blocks_behind_incomplete_token() {
    let mut arena = arena(1 << 20, 1);
    let size = 600 * 1024;
    assert!(arena.try_reserve(size, SyncToken(1)).unwrap().is_some());
    // 400 KB of tail remain, but a second 600 KB range has to wrap over
    // the first reservation, whose token is still incomplete.
    assert!(arena.try_reserve(size, SyncToken(2)).unwrap().is_none());
}

#[test]
fn test_release_allows_wrap() {
    let mut arena = arena(1 << 20, 1);
    let size = 600 * 1024;
    arena.try_reserve(size, SyncToken(1)).unwrap().unwrap();
    assert!(arena.try_reserve(size, SyncToken(2)).unwrap().is_none());

    arena.release_through(SyncToken(1));
    let wrapped = arena.try_reserve(size, SyncToken(2)).unwrap().unwrap();
    assert_eq!(wrapped.offset, 0);
    assert_eq!(arena.live_reservations(), 1);
}

#[test]
fn test_wrap_advances_to_next_ring_buffer() {
    let mut arena = arena(100, 2);
    let first = arena.try_reserve(60, SyncToken(1)).unwrap().unwrap();
    // 40-byte tail is too small; the cursor moves to the second buffer.
    let second = arena.try_reserve(60, SyncToken(1)).unwrap().unwrap();
    assert_eq!(second.offset, 0);
    assert_ne!(buffer_id(&first), buffer_id(&second));
}

#[test]
fn test_release_is_selective_by_token() {
    let mut arena = arena(100, 1);
    arena.try_reserve(40, SyncToken(1)).unwrap().unwrap();
    arena.try_reserve(40, SyncToken(2)).unwrap().unwrap();
    assert_eq!(arena.live_reservations(), 2);

    arena.release_through(SyncToken(1));
    assert_eq!(arena.live_reservations(), 1);
    assert_eq!(arena.in_use_bytes(), 40);

    arena.release_through(SyncToken(2));
    assert_eq!(arena.live_reservations(), 0);
}

// ============================================================================
// No-aliasing property
// ============================================================================

/// Tiny deterministic PRNG so the fuzz run is reproducible
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}

#[test]
fn test_randomized_reservations_never_alias() {
    let mut arena = arena(4096, 2);
    let mut rng = XorShift(0x9e3779b97f4a7c15);
    let mut token = 1u64;
    let mut oldest_live = 1u64;
    // (token, buffer id, offset, size) of every incomplete reservation
    let mut live: Vec<(u64, usize, u64, u64)> = Vec::new();

    for _ in 0..2000 {
        let size = rng.next() % 1024 + 1;
        match arena.try_reserve(size, SyncToken(token)).unwrap() {
            Some(allocation) => {
                let id = buffer_id(&allocation);
                for (_, other_id, other_offset, other_size) in &live {
                    let overlap = *other_id == id
                        && allocation.offset < other_offset + other_size
                        && *other_offset < allocation.offset + allocation.size;
                    assert!(!overlap,
                        "aliased range: offset {} size {} against offset {} size {}",
                        allocation.offset, allocation.size, other_offset, other_size);
                }
                live.push((token, id, allocation.offset, allocation.size));
                // Occasionally start a new batch.
                if rng.next() % 4 == 0 {
                    token += 1;
                }
            }
            None => {
                // A blocked reservation with nothing in flight would be a
                // livelock.
                assert!(!live.is_empty(), "blocked with nothing in flight");
                // Simulate the worker completing the oldest batch.
                arena.release_through(SyncToken(oldest_live));
                live.retain(|(t, ..)| *t > oldest_live);
                oldest_live += 1;
                if oldest_live > token {
                    token = oldest_live;
                }
            }
        }
    }
    assert_eq!(arena.in_use_bytes(), live.iter().map(|(.., size)| *size).sum::<u64>());
}
