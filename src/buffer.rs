//! Buffers: the allocation unit
//!
//! Every buffer has a header slot in the kernel's arena, addressed by a
//! [`BufferId`]. The header records the owning pool, FREE/IN_USE status and
//! intrusive queue links. The payload bytes travel with ownership: a
//! [`Buffer`] handle carries them while the caller owns the buffer, and they
//! are parked back in the header while it sits in a free list or a queue.

use core::fmt;
use core::ops::{Deref, DerefMut};

use tracing::warn;

use crate::pool::ArenaId;
use crate::queue::QueueTag;

/// Stable index of a buffer header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub(crate) u32);

impl BufferId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Pool identity (index into the pool table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(pub u8);

impl PoolId {
    /// General pool reachable by best-fit allocation
    pub const PUBLIC: PoolId = PoolId(0);
    /// Pool reserved for explicit pool-id requests
    pub const RESTRICTED: PoolId = PoolId(1);

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where a buffer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Pool(PoolId),
    /// Caller-supplied bytes wrapped for queueing
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferStatus {
    Free,
    InUse,
}

/// Per-buffer bookkeeping, never handed out
#[derive(Debug)]
pub(crate) struct Header {
    /// Fixed at creation
    pub(crate) origin: Origin,
    pub(crate) status: BufferStatus,
    /// Queue currently holding the buffer
    pub(crate) queue: Option<QueueTag>,
    pub(crate) prev: Option<BufferId>,
    /// Queue successor, or free-list successor while FREE
    pub(crate) next: Option<BufferId>,
    /// Payload while not owned by a caller
    pub(crate) payload: Option<Box<[u8]>>,
}

impl Header {
    pub(crate) fn pooled(pool: PoolId, size: usize) -> Self {
        Self {
            origin: Origin::Pool(pool),
            status: BufferStatus::Free,
            queue: None,
            prev: None,
            next: None,
            payload: Some(vec![0u8; size].into_boxed_slice()),
        }
    }

    pub(crate) fn raw() -> Self {
        Self {
            origin: Origin::Raw,
            status: BufferStatus::Free,
            queue: None,
            prev: None,
            next: None,
            payload: None,
        }
    }

    pub(crate) fn is_queued(&self) -> bool {
        self.queue.is_some()
    }
}

/// An owned buffer
///
/// Not `Clone`: exactly one owner exists at a time (the caller, a queue, or
/// the pool's free list). Return it with [`crate::Kernel::release`].
///
/// A buffer that goes out of scope without being released leaks its slot for
/// the life of the kernel. `#[must_use]` only catches a discarded temporary,
/// so dropping a bound handle is additionally logged at `warn` level.
#[must_use = "buffers must be released back to their pool"]
pub struct Buffer {
    pub(crate) id: BufferId,
    /// Arena that handed the buffer out
    pub(crate) arena: ArenaId,
    pub(crate) data: Box<[u8]>,
    /// Cleared once the payload has moved back into an arena
    live: bool,
}

impl Buffer {
    pub(crate) fn new(id: BufferId, arena: ArenaId, data: Box<[u8]>) -> Self {
        Self {
            id,
            arena,
            data,
            live: true,
        }
    }

    /// Hand the payload back to an arena
    pub(crate) fn into_parts(mut self) -> (BufferId, ArenaId, Box<[u8]>) {
        self.live = false;
        let data = core::mem::take(&mut self.data);
        (self.id, self.arena, data)
    }

    /// Header id, usable with queue lookups
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Payload capacity in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if self.live && !std::thread::panicking() {
            warn!(buffer = %self.id, "buffer dropped without release, slot leaked");
        }
    }
}

impl Deref for Buffer {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .finish()
    }
}
