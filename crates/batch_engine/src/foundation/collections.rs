//! Generation-checked handle types
//!
//! Every identity handed out by the batching system is a slot-map key: an
//! index plus a generation counter. Removing an entry bumps the generation,
//! so a stale handle can never alias a newer entry that reuses its slot.

pub use slotmap::{Key, SecondaryMap, SlotMap};

slotmap::new_key_type! {
    /// Pool-local key of an uploaded geometry record
    pub struct GeometryKey;

    /// Pool-local key of a live draw
    pub struct DrawKey;

    /// Caller-facing draw identity minted by the command queue
    pub struct DrawHandle;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_key_is_rejected() {
        let mut map: SlotMap<DrawKey, u32> = SlotMap::with_key();
        let first = map.insert(1);
        map.remove(first);
        let second = map.insert(2);

        assert!(map.get(first).is_none());
        assert_eq!(map.get(second), Some(&2));
        assert_ne!(first, second);
    }
}
