//! Buffer pool allocator
//!
//! A fixed table of pools, each pre-allocating `buffer_count` buffers of
//! `buffer_size` bytes at construction. Free buffers form an intrusive
//! singly-linked list through their headers. Pools never grow, shrink or
//! hand memory back until the arena is dropped.
//!
//! [`BufferArena`] itself is single-threaded; the kernel serializes access to
//! it with the global critical section.

use core::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::buffer::{Buffer, BufferId, BufferStatus, Header, Origin, PoolId};
use crate::config::{validate_pools, PoolConfig};
use crate::error::{KernelError, Result, Violation};

static NEXT_ARENA: AtomicU64 = AtomicU64::new(1);

/// Identity of an arena, stamped into every buffer it hands out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaId(u64);

/// One size class
#[derive(Debug)]
pub(crate) struct Pool {
    buffer_size: usize,
    total: usize,
    free: usize,
    restricted: bool,
    free_head: Option<BufferId>,
    peak_in_use: usize,
    failed_allocations: u64,
}

/// Read-only pool introspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub pool_id: PoolId,
    pub buffer_size: usize,
    pub total: usize,
    pub free: usize,
    /// `(total - free) * 100 / total`
    pub utilization_percent: usize,
    /// Highest number of buffers simultaneously in use
    pub peak_in_use: usize,
    /// Requests that found this pool empty
    pub failed_allocations: u64,
}

/// Header arena plus the pool table
#[derive(Debug)]
pub struct BufferArena {
    id: ArenaId,
    pools: Vec<Pool>,
    pub(crate) headers: Vec<Header>,
    /// Recycled raw header slots
    raw_free: Vec<BufferId>,
}

impl BufferArena {
    /// Pre-allocate every pool in `table`
    ///
    /// The table is checked the same way [`crate::KernelConfig::validate`]
    /// checks its pool rows.
    pub fn new(table: &[PoolConfig]) -> Result<Self> {
        validate_pools(table)?;
        let total: usize = table.iter().map(|p| p.buffer_count).sum();
        let mut headers = Vec::with_capacity(total);
        let mut pools = Vec::with_capacity(table.len());

        for (idx, cfg) in table.iter().enumerate() {
            let pool_id = PoolId(idx as u8);
            let first = headers.len();
            for i in 0..cfg.buffer_count {
                let mut header = Header::pooled(pool_id, cfg.buffer_size);
                // Thread the free list in index order
                header.next = (i + 1 < cfg.buffer_count).then(|| BufferId((first + i + 1) as u32));
                headers.push(header);
            }
            pools.push(Pool {
                buffer_size: cfg.buffer_size,
                total: cfg.buffer_count,
                free: cfg.buffer_count,
                restricted: cfg.restricted,
                free_head: Some(BufferId(first as u32)),
                peak_in_use: 0,
                failed_allocations: 0,
            });
            debug!(
                pool = idx,
                size = cfg.buffer_size,
                count = cfg.buffer_count,
                restricted = cfg.restricted,
                "pool created"
            );
        }

        Ok(Self {
            id: ArenaId(NEXT_ARENA.fetch_add(1, Ordering::Relaxed)),
            pools,
            headers,
            raw_free: Vec::new(),
        })
    }

    pub fn id(&self) -> ArenaId {
        self.id
    }

    /// Header index of `buf` if this arena handed it out
    pub(crate) fn owned_index(&self, buf: &Buffer) -> core::result::Result<usize, Violation> {
        if buf.arena != self.id || buf.id.index() >= self.headers.len() {
            return Err(Violation::ForeignBuffer(buf.id));
        }
        Ok(buf.id.index())
    }

    /// Best-fit allocation from the public pools
    ///
    /// Picks the smallest non-restricted pool whose buffers hold `size`
    /// bytes. Returns `None` if that pool is empty; never falls back to a
    /// larger pool.
    pub fn allocate(&mut self, size: usize) -> Option<Buffer> {
        let Some(idx) = self
            .pools
            .iter()
            .position(|p| !p.restricted && p.buffer_size >= size)
        else {
            warn!(size, "no public pool large enough");
            return None;
        };
        self.pop_free(idx)
    }

    /// Allocate from a specific pool, restricted pools included
    pub fn allocate_from_pool(&mut self, pool: PoolId) -> Result<Buffer> {
        if pool.index() >= self.pools.len() {
            return Err(KernelError::InvalidPool(pool.0));
        }
        self.pop_free(pool.index())
            .ok_or(KernelError::PoolExhausted(pool.0))
    }

    fn pop_free(&mut self, idx: usize) -> Option<Buffer> {
        let pool = &mut self.pools[idx];
        let Some(id) = pool.free_head else {
            pool.failed_allocations += 1;
            warn!(pool = idx, total = pool.total, "pool exhausted");
            return None;
        };

        let header = &mut self.headers[id.index()];
        debug_assert_eq!(header.status, BufferStatus::Free);
        pool.free_head = header.next.take();
        header.status = BufferStatus::InUse;
        let data = header
            .payload
            .take()
            .unwrap_or_else(|| vec![0u8; pool.buffer_size].into_boxed_slice());

        pool.free -= 1;
        pool.peak_in_use = pool.peak_in_use.max(pool.total - pool.free);
        Some(Buffer::new(id, self.id, data))
    }

    /// Return a buffer to its pool
    pub fn release(&mut self, buf: Buffer) -> core::result::Result<(), Violation> {
        let owned = self.owned_index(&buf);
        let (id, _, data) = buf.into_parts();
        let header = &mut self.headers[owned?];
        if header.status != BufferStatus::InUse {
            return Err(Violation::DoubleRelease(id));
        }
        if header.is_queued() {
            return Err(Violation::ReleaseWhileQueued(id));
        }

        match header.origin {
            Origin::Pool(pool_id) => {
                let pool = &mut self.pools[pool_id.index()];
                if data.len() != pool.buffer_size {
                    return Err(Violation::ForeignBuffer(id));
                }
                header.status = BufferStatus::Free;
                header.payload = Some(data);
                header.prev = None;
                header.next = pool.free_head;
                pool.free_head = Some(id);
                pool.free += 1;
                debug_assert!(pool.free <= pool.total);
            }
            Origin::Raw => {
                header.status = BufferStatus::Free;
                header.prev = None;
                header.next = None;
                self.raw_free.push(id);
            }
        }
        Ok(())
    }

    /// Wrap caller bytes as an unpooled buffer so it can travel through queues
    pub fn wrap_raw(&mut self, data: Box<[u8]>) -> Buffer {
        let id = match self.raw_free.pop() {
            Some(id) => id,
            None => {
                self.headers.push(Header::raw());
                BufferId((self.headers.len() - 1) as u32)
            }
        };
        self.headers[id.index()].status = BufferStatus::InUse;
        Buffer::new(id, self.id, data)
    }

    /// Payload size of the buffer's pool (or its own length when raw)
    pub fn buffer_size_of(&self, buf: &Buffer) -> core::result::Result<usize, Violation> {
        let idx = self.owned_index(buf)?;
        Ok(match self.headers[idx].origin {
            Origin::Pool(pool) => self.pools[pool.index()].buffer_size,
            Origin::Raw => buf.data.len(),
        })
    }

    /// Pool that owns a buffer; `None` for raw buffers
    pub fn pool_of(&self, id: BufferId) -> Option<PoolId> {
        match self.headers.get(id.index())?.origin {
            Origin::Pool(pool) => Some(pool),
            Origin::Raw => None,
        }
    }

    /// Configured payload size of a pool
    pub fn pool_buffer_size(&self, pool: PoolId) -> Result<usize> {
        self.pools
            .get(pool.index())
            .map(|p| p.buffer_size)
            .ok_or(KernelError::InvalidPool(pool.0))
    }

    pub fn pool_stats(&self, pool: PoolId) -> Result<PoolStats> {
        let p = self
            .pools
            .get(pool.index())
            .ok_or(KernelError::InvalidPool(pool.0))?;
        Ok(PoolStats {
            pool_id: pool,
            buffer_size: p.buffer_size,
            total: p.total,
            free: p.free,
            utilization_percent: (p.total - p.free) * 100 / p.total,
            peak_in_use: p.peak_in_use,
            failed_allocations: p.failed_allocations,
        })
    }

    /// Number of configured pools
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub(crate) fn header(&self, id: BufferId) -> Option<&Header> {
        self.headers.get(id.index())
    }
}
