//! Chunked slot pools with per-allocator ownership.
//!
//! A [`Pool`] hands out slots from a list of fixed-size chunks. Allocation
//! pops the lowest free slot from the first chunk that has one and only adds
//! a chunk when every existing one is full. Released slots keep their value
//! (reset through [`Recycle`]) so heap capacity inside them survives.
//!
//! Every pool gets a process-unique [`AllocatorId`]. Handles remember which
//! allocator issued them, and returning a handle to any other allocator fails
//! with [`PoolError::AllocatorNotFound`] without touching either pool.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::PoolError;

/// Slots per chunk.
pub const CHUNK_SIZE: usize = 64;

static NEXT_ALLOCATOR: AtomicU32 = AtomicU32::new(1);

/// Identity of one pool instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocatorId(u32);

impl AllocatorId {
    fn next() -> Self {
        Self(NEXT_ALLOCATOR.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id.
    pub fn get(self) -> u32 {
        self.0
    }
}

/// Handle to a pooled slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolHandle {
    allocator: AllocatorId,
    index: u32,
}

impl PoolHandle {
    /// Allocator that issued the handle.
    pub fn allocator(self) -> AllocatorId {
        self.allocator
    }

    /// Slot index within that allocator.
    pub fn index(self) -> u32 {
        self.index
    }
}

/// Values that can be reset in place when their slot is released.
pub trait Recycle {
    /// Restores the default state, keeping any heap capacity.
    fn recycle(&mut self);
}

#[derive(Debug)]
struct Chunk<T> {
    slots: Vec<T>,
    live: Vec<bool>,
    /// Free slot offsets, taken from the end.
    free: Vec<u16>,
}

impl<T: Default> Chunk<T> {
    /// New chunk whose slot 0 is about to be handed out.
    fn with_first_claimed() -> Self {
        Self {
            slots: (0..CHUNK_SIZE).map(|_| T::default()).collect(),
            live: vec![false; CHUNK_SIZE],
            free: (1..CHUNK_SIZE as u16).rev().collect(),
        }
    }
}

/// Chunked pool of reusable `T` slots.
#[derive(Debug)]
pub struct Pool<T> {
    id: AllocatorId,
    chunks: Vec<Chunk<T>>,
    live: usize,
}

impl<T: Default + Recycle> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Default + Recycle> Pool<T> {
    /// Empty pool with a fresh allocator id.
    pub fn new() -> Self {
        Self {
            id: AllocatorId::next(),
            chunks: Vec::new(),
            live: 0,
        }
    }

    /// This pool's allocator id.
    pub fn id(&self) -> AllocatorId {
        self.id
    }

    /// Takes a free slot, growing by one chunk if none is left.
    pub fn allocate(&mut self) -> (PoolHandle, &mut T) {
        let found = self
            .chunks
            .iter_mut()
            .enumerate()
            .find_map(|(i, c)| c.free.pop().map(|offset| (i, offset as usize)));
        let (chunk_index, offset) = match found {
            Some(slot) => slot,
            None => {
                self.chunks.push(Chunk::with_first_claimed());
                (self.chunks.len() - 1, 0)
            }
        };
        let chunk = &mut self.chunks[chunk_index];
        chunk.live[offset] = true;
        self.live += 1;
        let handle = PoolHandle {
            allocator: self.id,
            index: (chunk_index * CHUNK_SIZE + offset) as u32,
        };
        (handle, &mut chunk.slots[offset])
    }

    /// Returns a slot to this pool.
    pub fn delete(&mut self, handle: PoolHandle) -> Result<(), PoolError> {
        let (chunk, offset) = self.locate(handle).map_err(|e| {
            tracing::error!(allocator = self.id.0, error = %e, "pool delete rejected");
            e
        })?;
        let chunk = &mut self.chunks[chunk];
        if !chunk.live[offset] {
            let e = PoolError::DoubleFree(handle.index);
            tracing::error!(allocator = self.id.0, error = %e, "pool delete rejected");
            return Err(e);
        }
        chunk.slots[offset].recycle();
        chunk.live[offset] = false;
        chunk.free.push(offset as u16);
        self.live -= 1;
        Ok(())
    }

    /// Reads a live slot.
    pub fn get(&self, handle: PoolHandle) -> Option<&T> {
        let (chunk, offset) = self.locate(handle).ok()?;
        let chunk = &self.chunks[chunk];
        chunk.live[offset].then(|| &chunk.slots[offset])
    }

    /// Mutably reads a live slot.
    pub fn get_mut(&mut self, handle: PoolHandle) -> Option<&mut T> {
        let (chunk, offset) = self.locate(handle).ok()?;
        let chunk = &mut self.chunks[chunk];
        if chunk.live[offset] {
            Some(&mut chunk.slots[offset])
        } else {
            None
        }
    }

    /// Live slots in slot order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (PoolHandle, &mut T)> + '_ {
        let allocator = self.id;
        self.chunks.iter_mut().enumerate().flat_map(move |(c, chunk)| {
            chunk
                .slots
                .iter_mut()
                .zip(chunk.live.iter())
                .enumerate()
                .filter(|(_, (_, live))| **live)
                .map(move |(offset, (slot, _))| {
                    let handle = PoolHandle {
                        allocator,
                        index: (c * CHUNK_SIZE + offset) as u32,
                    };
                    (handle, slot)
                })
        })
    }

    /// Whether `handle` names a live slot of this pool.
    pub fn owns(&self, handle: PoolHandle) -> bool {
        self.get(handle).is_some()
    }

    fn locate(&self, handle: PoolHandle) -> Result<(usize, usize), PoolError> {
        if handle.allocator != self.id {
            return Err(PoolError::AllocatorNotFound {
                handle: handle.allocator.0,
                allocator: self.id.0,
            });
        }
        let index = handle.index as usize;
        if index >= self.capacity() {
            return Err(PoolError::OutOfRange {
                index: handle.index,
                capacity: self.capacity() as u32,
            });
        }
        Ok((index / CHUNK_SIZE, index % CHUNK_SIZE))
    }

    /// Number of chunks allocated so far.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Total slots across all chunks.
    pub fn capacity(&self) -> usize {
        self.chunks.len() * CHUNK_SIZE
    }

    /// Slots currently handed out.
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Free slots available without growing.
    pub fn free_count(&self) -> usize {
        self.capacity() - self.live
    }
}
