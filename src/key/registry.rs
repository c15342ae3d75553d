/*!
 * Key Registry
 * Process-shared key descriptor table with generational identity
 */

use crate::core::errors::{Result, StoreError};
use crate::core::id::{Generation, GenerationCounter, SlotAllocator};
use crate::core::types::{Constructor, Context, Destructor, Size};
use dashmap::DashMap;
use log::debug;

/// Handle naming one key: a recyclable slot id plus the generation assigned
/// at creation
///
/// The pair is the key's identity. Slot ids are recycled after `destroy`, but
/// generations never are, so a handle left over from a destroyed key can
/// always be told apart from the slot's current tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyHandle {
    pub(crate) slot: u32,
    pub(crate) generation: Generation,
}

impl KeyHandle {
    /// Generation assigned when this key was created
    #[inline]
    pub fn generation(&self) -> Generation {
        self.generation
    }
}

/// Descriptor fields stored verbatim at key creation, immutable afterwards
#[derive(Debug, Clone, Copy)]
pub(crate) struct KeyDescriptor {
    pub generation: Generation,
    pub size: Size,
    pub constructor: Option<Constructor>,
    pub destructor: Option<Destructor>,
    pub context: Context,
}

/// Process-shared registry of key descriptors
///
/// The only shared state in the subsystem: thread registries are owned by
/// their threads, but every thread resolves key handles against this table.
pub struct KeyRegistry {
    keys: DashMap<u32, KeyDescriptor>,
    slots: SlotAllocator,
    generations: GenerationCounter,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self {
            keys: DashMap::new(),
            slots: SlotAllocator::new(),
            generations: GenerationCounter::new(),
        }
    }

    /// Create a key describing one per-thread storage slot
    ///
    /// The constructor/destructor pair is fixed for the key's lifetime. Fails
    /// with `OutOfMemory` once the slot id space is exhausted.
    pub fn create(
        &self,
        size: Size,
        constructor: Option<Constructor>,
        destructor: Option<Destructor>,
        context: Context,
    ) -> Result<KeyHandle> {
        let slot = self
            .slots
            .allocate()
            .ok_or(StoreError::OutOfMemory { requested: size })?;
        let generation = self.generations.next();

        self.keys.insert(
            slot,
            KeyDescriptor {
                generation,
                size,
                constructor,
                destructor,
                context,
            },
        );

        debug!(
            "Created key slot {} generation {} ({} bytes per thread)",
            slot, generation, size
        );
        Ok(KeyHandle { slot, generation })
    }

    /// Destroy a key, releasing its slot for reuse
    ///
    /// Live cells in other threads that reference this key are not touched;
    /// they are reclaimed by stale-cell eviction on the next lookup or at
    /// their thread's teardown. The handle must not be used afterwards.
    pub fn destroy(&self, key: KeyHandle) -> Result<()> {
        match self
            .keys
            .remove_if(&key.slot, |_, desc| desc.generation == key.generation)
        {
            Some(_) => {
                self.slots.release(key.slot);
                debug!("Destroyed key slot {} generation {}", key.slot, key.generation);
                Ok(())
            }
            None => Err(StoreError::InvalidHandle(format!(
                "key slot {} generation {} already destroyed or never created",
                key.slot, key.generation
            ))),
        }
    }

    /// Storage size the key was created with
    pub fn size_of(&self, key: KeyHandle) -> Result<Size> {
        self.descriptor(key)
            .map(|desc| desc.size)
            .ok_or_else(|| stale_handle(key))
    }

    /// Context value the key was created with
    pub fn context_of(&self, key: KeyHandle) -> Result<Context> {
        self.descriptor(key)
            .map(|desc| desc.context)
            .ok_or_else(|| stale_handle(key))
    }

    /// Whether the handle still names a live key
    #[inline]
    pub fn contains(&self, key: KeyHandle) -> bool {
        self.descriptor(key).is_some()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Resolve a handle to its descriptor, rejecting stale generations
    pub(crate) fn descriptor(&self, key: KeyHandle) -> Option<KeyDescriptor> {
        self.keys
            .get(&key.slot)
            .filter(|desc| desc.generation == key.generation)
            .map(|desc| *desc)
    }
}

impl Default for KeyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn stale_handle(key: KeyHandle) -> StoreError {
    StoreError::InvalidHandle(format!(
        "key slot {} generation {} is not live",
        key.slot, key.generation
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_destroy() {
        let keys = KeyRegistry::new();
        let key = keys.create(64, None, None, 7).unwrap();

        assert!(keys.contains(key));
        assert_eq!(keys.size_of(key).unwrap(), 64);
        assert_eq!(keys.context_of(key).unwrap(), 7);
        assert_eq!(keys.len(), 1);

        keys.destroy(key).unwrap();
        assert!(!keys.contains(key));
        assert!(keys.is_empty());
    }

    #[test]
    fn test_double_destroy_is_invalid() {
        let keys = KeyRegistry::new();
        let key = keys.create(8, None, None, 0).unwrap();

        keys.destroy(key).unwrap();
        assert!(matches!(
            keys.destroy(key),
            Err(StoreError::InvalidHandle(_))
        ));
    }

    #[test]
    fn test_stale_handle_does_not_alias_recycled_slot() {
        let keys = KeyRegistry::new();
        let old = keys.create(8, None, None, 1).unwrap();
        keys.destroy(old).unwrap();

        // The new key reuses the slot, but under a fresh generation.
        let new = keys.create(16, None, None, 2).unwrap();
        assert_eq!(old.slot, new.slot);
        assert_ne!(old.generation, new.generation);

        assert!(!keys.contains(old));
        assert!(keys.contains(new));
        assert!(matches!(
            keys.size_of(old),
            Err(StoreError::InvalidHandle(_))
        ));
        assert_eq!(keys.size_of(new).unwrap(), 16);
    }

    #[test]
    fn test_descriptor_stored_verbatim() {
        fn ctor(_context: usize, _storage: &mut [u8]) -> std::result::Result<(), std::num::NonZeroU32> {
            Ok(())
        }
        fn dtor(_context: usize, _storage: &mut [u8]) {}

        let keys = KeyRegistry::new();
        let key = keys.create(32, Some(ctor), Some(dtor), 99).unwrap();

        let desc = keys.descriptor(key).unwrap();
        assert_eq!(desc.size, 32);
        assert_eq!(desc.context, 99);
        assert!(desc.constructor.is_some());
        assert!(desc.destructor.is_some());
    }
}
