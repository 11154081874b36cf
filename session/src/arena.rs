//! Generational slab arena.
//!
//! Objects live in fixed-capacity slabs of slots; each slot carries a
//! generation counter bumped on removal. A [`SlotId`] names a slot together
//! with the generation it was issued for, so liveness is a single compare
//! rather than a free-list walk, and a recycled slot can never satisfy a
//! stale handle.

/// Slots per slab.
pub const SLAB_CAPACITY: usize = 256;

/// Generation-stamped handle to an arena slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    slab: u32,
    index: u32,
    generation: u32,
}

#[derive(Debug)]
enum Slot<T> {
    Vacant { next_free: Option<u32> },
    Occupied(T),
}

#[derive(Debug)]
struct Slab<T> {
    slots: Vec<(u32, Slot<T>)>,
    free_head: Option<u32>,
    live: usize,
}

impl<T> Slab<T> {
    fn new() -> Self {
        let mut slots = Vec::with_capacity(SLAB_CAPACITY);
        for i in 0..SLAB_CAPACITY {
            let next = if i + 1 < SLAB_CAPACITY {
                Some(i as u32 + 1)
            } else {
                None
            };
            slots.push((0, Slot::Vacant { next_free: next }));
        }
        Self {
            slots,
            free_head: Some(0),
            live: 0,
        }
    }

    fn insert(&mut self, value: T) -> Option<(u32, u32)> {
        let index = self.free_head?;
        let (generation, slot) = &mut self.slots[index as usize];
        let next_free = match slot {
            Slot::Vacant { next_free } => *next_free,
            Slot::Occupied(_) => unreachable!("free list points at an occupied slot"),
        };
        self.free_head = next_free;
        *slot = Slot::Occupied(value);
        self.live += 1;
        Some((index, *generation))
    }

    fn remove(&mut self, index: u32, generation: u32) -> Option<T> {
        let next_free = self.free_head;
        let (slot_gen, slot) = self.slots.get_mut(index as usize)?;
        if *slot_gen != generation || matches!(slot, Slot::Vacant { .. }) {
            return None;
        }
        let old = std::mem::replace(slot, Slot::Vacant { next_free });
        *slot_gen = slot_gen.wrapping_add(1);
        self.free_head = Some(index);
        self.live -= 1;
        match old {
            Slot::Occupied(value) => Some(value),
            Slot::Vacant { .. } => unreachable!(),
        }
    }

    fn get(&self, index: u32, generation: u32) -> Option<&T> {
        match self.slots.get(index as usize)? {
            (slot_gen, Slot::Occupied(value)) if *slot_gen == generation => Some(value),
            _ => None,
        }
    }

    fn get_mut(&mut self, index: u32, generation: u32) -> Option<&mut T> {
        match self.slots.get_mut(index as usize)? {
            (slot_gen, Slot::Occupied(value)) if *slot_gen == generation => Some(value),
            _ => None,
        }
    }
}

/// Growable arena of generational slabs.
#[derive(Debug)]
pub struct Arena<T> {
    slabs: Vec<Slab<T>>,
}

impl<T> Arena<T> {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self { slabs: Vec::new() }
    }

    /// Insert a value, growing by one slab when every slot is taken.
    pub fn insert(&mut self, value: T) -> SlotId {
        let mut value = Some(value);
        for (slab_index, slab) in self.slabs.iter_mut().enumerate() {
            if slab.free_head.is_some() {
                let (index, generation) = slab
                    .insert(value.take().expect("value consumed twice"))
                    .expect("slab with a free head rejected an insert");
                return SlotId {
                    slab: slab_index as u32,
                    index,
                    generation,
                };
            }
        }

        let slab_index = self.slabs.len() as u32;
        self.slabs.push(Slab::new());
        let (index, generation) = self.slabs[slab_index as usize]
            .insert(value.take().expect("value consumed twice"))
            .expect("fresh slab rejected an insert");
        SlotId {
            slab: slab_index,
            index,
            generation,
        }
    }

    /// Remove and return the value behind `id`, if it is still live.
    pub fn remove(&mut self, id: SlotId) -> Option<T> {
        self.slabs
            .get_mut(id.slab as usize)?
            .remove(id.index, id.generation)
    }

    /// True when `id` names a live value.
    pub fn contains(&self, id: SlotId) -> bool {
        self.get(id).is_some()
    }

    /// Borrow the value behind `id`.
    pub fn get(&self, id: SlotId) -> Option<&T> {
        self.slabs.get(id.slab as usize)?.get(id.index, id.generation)
    }

    /// Mutably borrow the value behind `id`.
    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        self.slabs
            .get_mut(id.slab as usize)?
            .get_mut(id.index, id.generation)
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.slabs.iter().map(|slab| slab.live).sum()
    }

    /// True when no values are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate the live values with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &T)> {
        self.slabs.iter().enumerate().flat_map(|(slab_index, slab)| {
            slab.slots
                .iter()
                .enumerate()
                .filter_map(move |(index, (generation, slot))| match slot {
                    Slot::Occupied(value) => Some((
                        SlotId {
                            slab: slab_index as u32,
                            index: index as u32,
                            generation: *generation,
                        },
                        value,
                    )),
                    Slot::Vacant { .. } => None,
                })
        })
    }

    /// Collect the ids of every live value.
    pub fn live_ids(&self) -> Vec<SlotId> {
        self.iter().map(|(id, _)| id).collect()
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}
