//! First-fit range allocation inside fixed-capacity buffers
//!
//! The allocator keeps no state of its own. Callers pass the capacity and the
//! ranges currently in use; the allocator subtracts those from `[0, capacity)`
//! and returns the lowest free start that fits. Pools are small enough that
//! recomputing the free list per request is cheaper than maintaining one.

/// A run of `count` elements starting at `start`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AllocationRange {
    /// First element
    pub start: u32,
    /// Number of elements
    pub count: u32,
}

impl AllocationRange {
    /// Create a new range
    pub fn new(start: u32, count: u32) -> Self {
        Self { start, count }
    }

    /// One past the last element (widened so `start + count` never overflows)
    pub fn end(&self) -> u64 {
        u64::from(self.start) + u64::from(self.count)
    }

    /// Whether two ranges share at least one element
    pub fn overlaps(&self, other: &Self) -> bool {
        u64::from(self.start) < other.end() && u64::from(other.start) < self.end()
    }
}

/// Half-open free interval, widened to avoid overflow at the capacity edge
#[derive(Debug, Clone, Copy)]
struct FreeInterval {
    start: u64,
    end: u64,
}

/// Find the lowest start address of a free run of at least `requested` elements
///
/// Returns `None` when no free interval is large enough. Zero-length occupied
/// ranges are ignored. A zero-length request succeeds at the lowest free
/// address (or `0` when the buffer is full).
pub fn find_range(capacity: u32, occupied: &[AllocationRange], requested: u32) -> Option<u32> {
    if requested > capacity {
        return None;
    }

    let mut free = vec![FreeInterval { start: 0, end: u64::from(capacity) }];

    for range in occupied.iter().filter(|r| r.count > 0) {
        let taken_start = u64::from(range.start);
        let taken_end = range.end();
        let mut remaining = Vec::with_capacity(free.len() + 1);

        for interval in free {
            if taken_end <= interval.start || taken_start >= interval.end {
                // Disjoint
                remaining.push(interval);
            } else if taken_start <= interval.start && taken_end >= interval.end {
                // Fully covered: interval disappears
            } else if taken_start <= interval.start {
                // Overlaps the front edge
                remaining.push(FreeInterval { start: taken_end, end: interval.end });
            } else if taken_end >= interval.end {
                // Overlaps the back edge
                remaining.push(FreeInterval { start: interval.start, end: taken_start });
            } else {
                // Strictly inside: split
                remaining.push(FreeInterval { start: interval.start, end: taken_start });
                remaining.push(FreeInterval { start: taken_end, end: interval.end });
            }
        }

        free = remaining;
    }

    if requested == 0 {
        return Some(free.iter().map(|i| i.start).min().map_or(0, narrow));
    }

    free.iter()
        .filter(|interval| interval.end - interval.start >= u64::from(requested))
        .map(|interval| interval.start)
        .min()
        .map(narrow)
}

// Free interval starts never exceed the u32 capacity they were carved from
#[allow(clippy::cast_possible_truncation)]
const fn narrow(value: u64) -> u32 {
    value as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_buffer_allocates_at_zero() {
        assert_eq!(find_range(100, &[], 24), Some(0));
        assert_eq!(find_range(100, &[], 100), Some(0));
        assert_eq!(find_range(100, &[], 101), None);
    }

    #[test]
    fn test_allocates_after_occupied_prefix() {
        let occupied = [AllocationRange::new(0, 24)];
        assert_eq!(find_range(100, &occupied, 10), Some(24));
    }

    #[test]
    fn test_first_fit_prefers_lowest_gap() {
        // Gaps: [10, 20) size 10, [50, 100) size 50
        let occupied = [AllocationRange::new(20, 30), AllocationRange::new(0, 10)];
        assert_eq!(find_range(100, &occupied, 5), Some(10));
        assert_eq!(find_range(100, &occupied, 10), Some(10));
        assert_eq!(find_range(100, &occupied, 11), Some(50));
    }

    #[test]
    fn test_split_when_occupied_is_strictly_inside() {
        let occupied = [AllocationRange::new(40, 20)];
        assert_eq!(find_range(100, &occupied, 40), Some(0));
        assert_eq!(find_range(100, &occupied, 41), None);
    }

    #[test]
    fn test_full_buffer_fails() {
        let occupied = [AllocationRange::new(0, 50), AllocationRange::new(50, 50)];
        assert_eq!(find_range(100, &occupied, 1), None);
        assert_eq!(find_range(100, &occupied, 0), Some(0));
    }

    #[test]
    fn test_range_touching_capacity_edge() {
        let occupied = [AllocationRange::new(u32::MAX - 10, 10)];
        assert_eq!(find_range(u32::MAX, &occupied, 5), Some(0));
        let tail = [AllocationRange::new(0, u32::MAX - 10)];
        assert_eq!(find_range(u32::MAX, &tail, 10), Some(u32::MAX - 10));
        assert_eq!(find_range(u32::MAX, &tail, 11), None);
    }

    #[test]
    fn test_does_not_mutate_inputs() {
        let occupied = vec![AllocationRange::new(5, 5), AllocationRange::new(30, 10)];
        let before = occupied.clone();
        let _ = find_range(64, &occupied, 8);
        assert_eq!(occupied, before);
    }

    #[test]
    fn test_round_trip_packing_restores_full_capacity() {
        let capacity = 1000;
        let sizes = [24, 100, 7, 300, 1, 64, 200, 13];
        let mut live: Vec<AllocationRange> = Vec::new();

        for &size in &sizes {
            let start = find_range(capacity, &live, size).expect("should fit");
            let range = AllocationRange::new(start, size);
            assert!(live.iter().all(|other| !other.overlaps(&range)));
            live.push(range);
        }

        // Free every other allocation, then refill the holes
        let freed: Vec<_> = live.iter().copied().step_by(2).collect();
        live.retain(|r| !freed.contains(r));
        for range in &freed {
            let start = find_range(capacity, &live, range.count).expect("hole should refit");
            let refill = AllocationRange::new(start, range.count);
            assert!(live.iter().all(|other| !other.overlaps(&refill)));
            live.push(refill);
        }

        live.clear();
        assert_eq!(find_range(capacity, &live, capacity), Some(0));
    }

    #[test]
    fn test_overlap_predicate() {
        let a = AllocationRange::new(0, 10);
        assert!(a.overlaps(&AllocationRange::new(9, 1)));
        assert!(!a.overlaps(&AllocationRange::new(10, 5)));
        assert!(!a.overlaps(&AllocationRange::new(0, 0)));
    }
}
