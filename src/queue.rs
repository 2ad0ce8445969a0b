//! Buffer queue: ordered, owner-transferring list of buffers
//!
//! A [`BufferQueue`] holds only head/tail ids and a count; the links live in
//! the buffer headers, so every operation is O(1) including removal of an
//! interior element. Enqueueing moves the [`Buffer`] into the queue;
//! dequeueing moves it back out to the caller.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::buffer::{Buffer, BufferId, BufferStatus};
use crate::error::Violation;
use crate::pool::BufferArena;

static NEXT_TAG: AtomicU64 = AtomicU64::new(1);

/// Identity of a queue, recorded in member headers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueTag(u64);

/// FIFO/LIFO list of buffers
#[derive(Debug)]
pub struct BufferQueue {
    tag: QueueTag,
    head: Option<BufferId>,
    tail: Option<BufferId>,
    count: usize,
}

impl BufferQueue {
    /// Empty queue
    pub fn new() -> Self {
        Self {
            tag: QueueTag(NEXT_TAG.fetch_add(1, Ordering::Relaxed)),
            head: None,
            tail: None,
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// First element without removing it
    pub fn peek_first(&self) -> Option<BufferId> {
        self.head
    }

    /// Last element without removing it
    pub fn peek_last(&self) -> Option<BufferId> {
        self.tail
    }

    pub fn tag(&self) -> QueueTag {
        self.tag
    }
}

impl Default for BufferQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferArena {
    /// Reset `queue` to empty
    ///
    /// Call only on a drained queue; members of a non-empty queue would be
    /// orphaned.
    pub fn init_queue(&mut self, queue: &mut BufferQueue) {
        debug_assert!(queue.is_empty(), "init_queue on a non-empty queue");
        *queue = BufferQueue::new();
    }

    /// Link `buf` at the tail
    ///
    /// Fails with [`Violation::ForeignBuffer`] if another arena handed `buf`
    /// out; the handle is consumed either way.
    pub fn enqueue(&mut self, queue: &mut BufferQueue, buf: Buffer) -> Result<(), Violation> {
        let id = self.park(queue, buf)?;
        self.headers[id.index()].prev = queue.tail;
        match queue.tail {
            Some(tail) => self.headers[tail.index()].next = Some(id),
            None => queue.head = Some(id),
        }
        queue.tail = Some(id);
        queue.count += 1;
        Ok(())
    }

    /// Link `buf` at the head (urgent delivery)
    pub fn enqueue_head(&mut self, queue: &mut BufferQueue, buf: Buffer) -> Result<(), Violation> {
        let id = self.park(queue, buf)?;
        self.headers[id.index()].next = queue.head;
        match queue.head {
            Some(head) => self.headers[head.index()].prev = Some(id),
            None => queue.tail = Some(id),
        }
        queue.head = Some(id);
        queue.count += 1;
        Ok(())
    }

    /// Remove and return the head
    pub fn dequeue(&mut self, queue: &mut BufferQueue) -> Option<Buffer> {
        let head = queue.head?;
        self.unlink(queue, head)
    }

    /// Remove an arbitrary member; `None` if `id` is not in this queue
    pub fn remove(&mut self, queue: &mut BufferQueue, id: BufferId) -> Option<Buffer> {
        let header = self.headers.get(id.index())?;
        if header.queue != Some(queue.tag) {
            return None;
        }
        self.unlink(queue, id)
    }

    /// Successor of a queued buffer
    pub fn next(&self, id: BufferId) -> Option<BufferId> {
        let header = self.header(id)?;
        if header.is_queued() {
            header.next
        } else {
            None
        }
    }

    /// Payload of a queued buffer
    pub fn queued_payload(&self, id: BufferId) -> Option<&[u8]> {
        let header = self.header(id)?;
        if header.is_queued() {
            header.payload.as_deref()
        } else {
            None
        }
    }

    fn park(&mut self, queue: &BufferQueue, buf: Buffer) -> Result<BufferId, Violation> {
        let owned = self.owned_index(&buf);
        let (id, _, data) = buf.into_parts();
        let header = &mut self.headers[owned?];
        debug_assert_eq!(header.status, BufferStatus::InUse);
        debug_assert!(!header.is_queued(), "buffer already enqueued");
        header.queue = Some(queue.tag);
        header.payload = Some(data);
        header.prev = None;
        header.next = None;
        Ok(id)
    }

    fn unlink(&mut self, queue: &mut BufferQueue, id: BufferId) -> Option<Buffer> {
        let header = &mut self.headers[id.index()];
        let (prev, next) = (header.prev.take(), header.next.take());
        header.queue = None;
        let data = header.payload.take().unwrap_or_default();

        match prev {
            Some(p) => self.headers[p.index()].next = next,
            None => queue.head = next,
        }
        match next {
            Some(n) => self.headers[n.index()].prev = prev,
            None => queue.tail = prev,
        }
        queue.count -= 1;
        Some(Buffer::new(id, self.id(), data))
    }
}
