//! Kernel: the context object every task shares
//!
//! Combines the buffer arena, per-task mailboxes, the task table, a tick
//! source and a fatal hook into one explicitly constructed instance. Share
//! it across task threads behind an `Arc`.
//!
//! Pool, queue and mailbox state sits behind one process-wide re-entrant
//! lock, the critical section. A task can hold it across several calls with
//! [`Kernel::enter_critical`]; each call also takes it internally. Event
//! signaling uses per-task locks and never touches the critical section.

use core::cell::{Cell, RefCell};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tracing::{debug, warn};

use crate::buffer::{Buffer, BufferId, PoolId};
use crate::clock::{Clock, SystemClock};
use crate::config::KernelConfig;
use crate::error::{FatalError, KernelError, Result, Violation};
use crate::event::{EventMask, Mailbox, NUM_MAILBOXES};
use crate::fatal::{FatalHook, LogHook};
use crate::pool::{BufferArena, PoolStats};
use crate::queue::BufferQueue;
use crate::task::{TaskId, TaskSnapshot, TaskTable};
use crate::timer::EventSink;

struct CoreState {
    arena: BufferArena,
    /// Per task, indexed by [`Mailbox::index`]
    mailboxes: Vec<[BufferQueue; NUM_MAILBOXES]>,
}

struct Core {
    /// Open [`CriticalSection`]s on the owning thread
    nesting: Cell<u32>,
    state: RefCell<CoreState>,
}

/// Held critical section; released on drop
///
/// Re-entrant: the holder may call any kernel operation, including ones that
/// take the critical section themselves.
pub struct CriticalSection<'a> {
    guard: ReentrantMutexGuard<'a, Core>,
}

impl Drop for CriticalSection<'_> {
    fn drop(&mut self) {
        let n = self.guard.nesting.get();
        self.guard.nesting.set(n.saturating_sub(1));
    }
}

/// Kernel execution statistics
#[derive(Debug, Clone)]
pub struct KernelStats {
    /// Clock reading when the stats were taken
    pub ticks: u64,
    pub pools: Vec<PoolStats>,
    pub tasks: Vec<TaskSnapshot>,
}

/// Kernel context
pub struct Kernel {
    config: KernelConfig,
    core: ReentrantMutex<Core>,
    tasks: TaskTable,
    clock: Arc<dyn Clock>,
    hook: Arc<dyn FatalHook>,
}

impl Kernel {
    /// Build pools and task slots from `config`
    ///
    /// Uses [`SystemClock`] and [`LogHook`]; replace them with
    /// [`Self::with_clock`] and [`Self::with_fatal_hook`].
    pub fn new(config: KernelConfig) -> Result<Self> {
        config.validate()?;
        let arena = BufferArena::new(&config.pools)?;
        let mailboxes = (0..config.max_tasks)
            .map(|_| core::array::from_fn(|_| BufferQueue::new()))
            .collect();
        debug!(
            tasks = config.max_tasks,
            pools = config.pools.len(),
            "kernel initialized"
        );

        Ok(Self {
            tasks: TaskTable::new(config.max_tasks),
            core: ReentrantMutex::new(Core {
                nesting: Cell::new(0),
                state: RefCell::new(CoreState { arena, mailboxes }),
            }),
            config,
            clock: Arc::new(SystemClock::new()),
            hook: Arc::new(LogHook),
        })
    }

    /// Replace the tick source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the fatal-error consumer
    pub fn with_fatal_hook(mut self, hook: Arc<dyn FatalHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    // --- critical section ---

    /// Take the process-wide critical section until the guard drops
    pub fn enter_critical(&self) -> CriticalSection<'_> {
        let guard = self.core.lock();
        guard.nesting.set(guard.nesting.get() + 1);
        CriticalSection { guard }
    }

    /// Whether the calling thread holds a [`CriticalSection`]
    pub fn holds_critical(&self) -> bool {
        // try_lock only succeeds when the lock is free or already ours
        self.core
            .try_lock()
            .is_some_and(|core| core.nesting.get() > 0)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut CoreState) -> R) -> R {
        let core = self.core.lock();
        let mut state = core.state.borrow_mut();
        f(&mut state)
    }

    // --- buffer pools ---

    /// Best-fit allocation from the public pools
    pub fn allocate(&self, size: usize) -> Option<Buffer> {
        self.with_state(|st| st.arena.allocate(size))
    }

    /// Allocate from a specific pool, restricted pools included
    pub fn allocate_from_pool(&self, pool: PoolId) -> Result<Buffer> {
        self.with_state(|st| st.arena.allocate_from_pool(pool))
    }

    /// Return a buffer to its pool
    ///
    /// # Panics
    ///
    /// On a double release or a buffer foreign to this kernel, after
    /// reporting it to the fatal hook.
    pub fn release(&self, buf: Buffer) {
        if let Err(v) = self.with_state(|st| st.arena.release(buf)) {
            self.report_violation(v);
        }
    }

    /// Wrap caller bytes as an unpooled buffer
    pub fn wrap_raw(&self, data: impl Into<Box<[u8]>>) -> Buffer {
        let data = data.into();
        self.with_state(|st| st.arena.wrap_raw(data))
    }

    /// Payload size of the buffer's pool
    ///
    /// # Panics
    ///
    /// If `buf` came from another kernel, after reporting it to the fatal
    /// hook.
    pub fn buffer_size_of(&self, buf: &Buffer) -> usize {
        match self.with_state(|st| st.arena.buffer_size_of(buf)) {
            Ok(size) => size,
            Err(v) => self.report_violation(v),
        }
    }

    pub fn pool_buffer_size(&self, pool: PoolId) -> Result<usize> {
        self.with_state(|st| st.arena.pool_buffer_size(pool))
    }

    pub fn pool_stats(&self, pool: PoolId) -> Result<PoolStats> {
        self.with_state(|st| st.arena.pool_stats(pool))
    }

    pub fn pool_count(&self) -> usize {
        self.config.pools.len()
    }

    // --- buffer queues ---

    /// Reset a drained queue
    pub fn init_queue(&self, queue: &mut BufferQueue) {
        self.with_state(|st| st.arena.init_queue(queue));
    }

    /// Link `buf` at the tail of `queue`
    ///
    /// # Panics
    ///
    /// If `buf` came from another kernel, after reporting it to the fatal
    /// hook.
    pub fn enqueue(&self, queue: &mut BufferQueue, buf: Buffer) {
        if let Err(v) = self.with_state(|st| st.arena.enqueue(queue, buf)) {
            self.report_violation(v);
        }
    }

    /// Link `buf` at the head of `queue`; panics like [`Self::enqueue`]
    pub fn enqueue_head(&self, queue: &mut BufferQueue, buf: Buffer) {
        if let Err(v) = self.with_state(|st| st.arena.enqueue_head(queue, buf)) {
            self.report_violation(v);
        }
    }

    pub fn dequeue(&self, queue: &mut BufferQueue) -> Option<Buffer> {
        self.with_state(|st| st.arena.dequeue(queue))
    }

    /// Remove `id` from `queue`; `None` if it is not a member
    pub fn remove_from_queue(&self, queue: &mut BufferQueue, id: BufferId) -> Option<Buffer> {
        self.with_state(|st| st.arena.remove(queue, id))
    }

    /// Successor of a queued buffer
    pub fn next(&self, id: BufferId) -> Option<BufferId> {
        self.with_state(|st| st.arena.next(id))
    }

    /// Read a queued buffer's payload in place
    ///
    /// `f` runs inside the critical section and must not call back into the
    /// kernel.
    pub fn inspect<R>(&self, id: BufferId, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        self.with_state(|st| st.arena.queued_payload(id).map(f))
    }

    // --- tasks and events ---

    /// Bind the calling thread to task slot `id`
    pub fn register_task(&self, id: TaskId, name: &str) -> Result<()> {
        self.tasks.register(id, name)
    }

    /// Task id of the calling thread, `None` if it is not registered
    pub fn current_task_id(&self) -> Option<TaskId> {
        self.tasks.current()
    }

    /// OR `mask` into a task's pending events and wake it
    ///
    /// Signaling a task that is not waiting is not an error; the bits wait
    /// for its next [`Self::wait`].
    pub fn send_event(&self, task: TaskId, mask: EventMask) -> Result<()> {
        self.tasks.send_event(task, mask)
    }

    /// Block the calling task until a bit of `flag` is pending
    ///
    /// `timeout_ms == 0` blocks indefinitely. Returns the matched bits,
    /// [`EventMask::EMPTY`] on timeout, or [`EventMask::SHUTDOWN`] once the
    /// task has been marked dead.
    ///
    /// # Panics
    ///
    /// If the caller holds the critical section, after reporting it to the
    /// fatal hook.
    pub fn wait(&self, flag: EventMask, timeout_ms: u32) -> Result<EventMask> {
        if self.holds_critical() {
            self.report_violation(Violation::WaitInCritical);
        }
        let me = self.current_task_id().ok_or(KernelError::NotATask)?;
        self.tasks.wait(me, flag, timeout_ms)
    }

    /// Suspend the calling thread for `duration_ms`
    ///
    /// Early wakeups resume for the remaining time.
    ///
    /// # Panics
    ///
    /// If the caller holds the critical section, after reporting it to the
    /// fatal hook.
    pub fn sleep(&self, duration_ms: u32) {
        if self.holds_critical() {
            self.report_violation(Violation::SleepInCritical);
        }
        let deadline = Instant::now() + Duration::from_millis(duration_ms.into());
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(deadline - now);
        }
    }

    /// Mark a task DEAD; its current and future waits return shutdown
    pub fn mark_dead(&self, task: TaskId) -> Result<()> {
        self.tasks.mark_dead(task)
    }

    pub fn task_snapshot(&self, task: TaskId) -> Result<TaskSnapshot> {
        self.tasks.snapshot(task)
    }

    /// Snapshot of every task slot
    pub fn tasks(&self) -> Vec<TaskSnapshot> {
        self.tasks.snapshots()
    }

    // --- mailboxes ---

    /// Queue `buf` on a task's mailbox and signal the mailbox event
    ///
    /// On an invalid task the buffer goes back to its pool.
    pub fn send_msg(&self, task: TaskId, mailbox: Mailbox, buf: Buffer) -> Result<()> {
        if task.index() >= self.config.max_tasks {
            warn!(task = task.0, "send_msg to invalid task, buffer released");
            self.release(buf);
            return Err(KernelError::InvalidTask(task.0));
        }
        if let Err(v) = self.with_state(|st| {
            let queue = &mut st.mailboxes[task.index()][mailbox.index()];
            st.arena.enqueue(queue, buf)
        }) {
            self.report_violation(v);
        }
        self.send_event(task, mailbox.event_mask())
    }

    /// Dequeue from one of the calling task's mailboxes
    pub fn read_mbox(&self, mailbox: Mailbox) -> Result<Option<Buffer>> {
        let me = self.current_task_id().ok_or(KernelError::NotATask)?;
        Ok(self.with_state(|st| {
            let queue = &mut st.mailboxes[me.index()][mailbox.index()];
            st.arena.dequeue(queue)
        }))
    }

    /// Number of buffers waiting in a task's mailbox
    pub fn mailbox_len(&self, task: TaskId, mailbox: Mailbox) -> Result<usize> {
        self.with_state(|st| {
            st.mailboxes
                .get(task.index())
                .map(|m| m[mailbox.index()].len())
                .ok_or(KernelError::InvalidTask(task.0))
        })
    }

    // --- clock, stats, teardown ---

    /// Current platform tick count
    pub fn tick_count(&self) -> u64 {
        self.clock.now_ticks()
    }

    pub fn stats(&self) -> KernelStats {
        let pools = self.with_state(|st| {
            (0..st.arena.pool_count())
                .filter_map(|p| st.arena.pool_stats(PoolId(p as u8)).ok())
                .collect()
        });
        KernelStats {
            ticks: self.tick_count(),
            pools,
            tasks: self.tasks(),
        }
    }

    /// Mark every task DEAD and return mailbox contents to their pools
    pub fn shutdown(&self) {
        for id in 0..self.tasks.len() {
            // Ids come from the table itself
            let _ = self.tasks.mark_dead(TaskId(id as u8));
        }
        let violations: Vec<Violation> = self.with_state(|st| {
            let CoreState { arena, mailboxes } = st;
            let mut violations = Vec::new();
            for queue in mailboxes.iter_mut().flatten() {
                while let Some(buf) = arena.dequeue(queue) {
                    if let Err(v) = arena.release(buf) {
                        violations.push(v);
                    }
                }
            }
            violations
        });
        for v in violations {
            self.exception(v.code(), &v.to_string());
        }
        debug!("kernel shut down");
    }

    /// Report an unrecoverable condition and continue
    pub fn exception(&self, code: u16, message: &str) {
        let err = FatalError::new(code, message);
        self.hook.report(&err, &self.tasks.snapshots());
    }

    /// Report a protocol violation to the fatal hook, then panic
    ///
    /// For owners of standalone structures such as a
    /// [`crate::timer::TimerList`] that hand violations back as errors.
    pub fn report_violation(&self, v: Violation) -> ! {
        let err = FatalError::from(v);
        self.hook.report(&err, &self.tasks.snapshots());
        panic!("{err}");
    }
}

impl EventSink for Kernel {
    fn post(&self, task: TaskId, event: EventMask) {
        if let Err(e) = self.send_event(task, event) {
            warn!(task = task.0, event = %event, error = %e, "timer event dropped");
        }
    }
}

impl EventSink for TaskTable {
    fn post(&self, task: TaskId, event: EventMask) {
        if let Err(e) = self.send_event(task, event) {
            warn!(task = task.0, event = %event, error = %e, "timer event dropped");
        }
    }
}
