//! Task table: per-task wait/signal state
//!
//! Each slot pairs a mutex-protected event word with a condition variable.
//! Signaled bits accumulate in `pending` until a wait consumes them, so a
//! signal sent before the wait starts is never lost.

use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, trace};

use crate::error::{KernelError, Result};
use crate::event::EventMask;

/// Task names are truncated to this many characters
pub const TASK_NAME_LEN: usize = 8;

/// Task slot index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u8);

impl TaskId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Task execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Not blocked in a wait
    Running,
    /// Blocked in a wait
    Blocked,
    /// Terminal; every wait returns [`EventMask::SHUTDOWN`]
    Dead,
}

#[derive(Debug)]
struct WaitState {
    /// Bits the task is blocked on
    wait_mask: EventMask,
    /// Signaled, not yet consumed
    pending: EventMask,
    state: TaskState,
}

#[derive(Debug)]
struct TaskSlot {
    wait: Mutex<WaitState>,
    signal: Condvar,
}

#[derive(Debug, Clone)]
struct Binding {
    thread: ThreadId,
    name: String,
}

/// Point-in-time view of a task slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub id: TaskId,
    /// `None` while no thread is bound
    pub name: Option<String>,
    pub state: TaskState,
    pub wait_mask: EventMask,
    pub pending: EventMask,
}

/// Fixed table of task slots
#[derive(Debug)]
pub struct TaskTable {
    slots: Box<[TaskSlot]>,
    bindings: RwLock<Vec<Option<Binding>>>,
}

impl TaskTable {
    /// Table with `max_tasks` slots, all RUNNING with nothing pending
    pub fn new(max_tasks: usize) -> Self {
        let slots = (0..max_tasks)
            .map(|_| TaskSlot {
                wait: Mutex::new(WaitState {
                    wait_mask: EventMask::EMPTY,
                    pending: EventMask::EMPTY,
                    state: TaskState::Running,
                }),
                signal: Condvar::new(),
            })
            .collect();
        Self {
            slots,
            bindings: RwLock::new(vec![None; max_tasks]),
        }
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, id: TaskId) -> Result<&TaskSlot> {
        self.slots.get(id.index()).ok_or(KernelError::InvalidTask(id.0))
    }

    /// Bind the calling thread to slot `id`
    pub fn register(&self, id: TaskId, name: &str) -> Result<()> {
        self.slot(id)?;
        let me = thread::current().id();
        let mut bindings = self.bindings.write();

        if let Some(existing) = bindings
            .iter()
            .position(|b| b.as_ref().is_some_and(|b| b.thread == me))
        {
            return Err(KernelError::AlreadyRegistered(existing as u8));
        }
        if bindings[id.index()].is_some() {
            return Err(KernelError::TaskSlotBusy(id.0));
        }

        let name: String = name.chars().take(TASK_NAME_LEN).collect();
        debug!(task = id.0, name = %name, "task registered");
        bindings[id.index()] = Some(Binding { thread: me, name });
        Ok(())
    }

    /// Slot bound to the calling thread
    pub fn current(&self) -> Option<TaskId> {
        let me = thread::current().id();
        self.bindings
            .read()
            .iter()
            .position(|b| b.as_ref().is_some_and(|b| b.thread == me))
            .map(|idx| TaskId(idx as u8))
    }

    /// OR `mask` into the task's pending bits and wake its waiter
    pub fn send_event(&self, id: TaskId, mask: EventMask) -> Result<()> {
        let Ok(slot) = self.slot(id) else {
            trace!(task = id.0, mask = %mask, "send_event to invalid task");
            return Err(KernelError::InvalidTask(id.0));
        };
        let mut st = slot.wait.lock();
        st.pending |= mask;
        slot.signal.notify_one();
        trace!(task = id.0, mask = %mask, pending = %st.pending, "event sent");
        Ok(())
    }

    /// Block task `id` until a bit of `flag` is pending
    ///
    /// `timeout_ms == 0` waits indefinitely. Returns the matched bits (which
    /// are cleared from `pending`), `EMPTY` on timeout, or
    /// [`EventMask::SHUTDOWN`] once the task is dead and nothing matched.
    pub fn wait(&self, id: TaskId, flag: EventMask, timeout_ms: u32) -> Result<EventMask> {
        let slot = self.slot(id)?;
        trace!(task = id.0, flag = %flag, timeout_ms, "wait");

        let mut st = slot.wait.lock();
        st.wait_mask = flag;

        if !st.pending.intersects(flag) {
            if st.state != TaskState::Dead {
                st.state = TaskState::Blocked;
                let deadline =
                    (timeout_ms != 0).then(|| Instant::now() + Duration::from_millis(timeout_ms.into()));
                // Spurious wakeups loop back; only a match, death or the deadline end the wait
                while !st.pending.intersects(flag) && st.state != TaskState::Dead {
                    match deadline {
                        Some(deadline) => {
                            if slot.signal.wait_until(&mut st, deadline).timed_out() {
                                break;
                            }
                        }
                        None => slot.signal.wait(&mut st),
                    }
                }
            }

            if st.state == TaskState::Dead {
                st.pending = EventMask::EMPTY;
                st.wait_mask = EventMask::EMPTY;
                trace!(task = id.0, "wait returned shutdown");
                return Ok(EventMask::SHUTDOWN);
            }
            st.state = TaskState::Running;
        }

        st.wait_mask = EventMask::EMPTY;
        let matched = st.pending & flag;
        st.pending &= !flag;
        trace!(task = id.0, flag = %flag, matched = %matched, "wait done");
        Ok(matched)
    }

    /// Transition to DEAD and wake any waiter
    pub fn mark_dead(&self, id: TaskId) -> Result<()> {
        let slot = self.slot(id)?;
        let mut st = slot.wait.lock();
        st.state = TaskState::Dead;
        slot.signal.notify_all();
        debug!(task = id.0, "task marked dead");
        Ok(())
    }

    pub fn snapshot(&self, id: TaskId) -> Result<TaskSnapshot> {
        let slot = self.slot(id)?;
        let name = self.bindings.read()[id.index()]
            .as_ref()
            .map(|b| b.name.clone());
        let st = slot.wait.lock();
        Ok(TaskSnapshot {
            id,
            name,
            state: st.state,
            wait_mask: st.wait_mask,
            pending: st.pending,
        })
    }

    /// Snapshot of every slot
    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        (0..self.slots.len())
            .filter_map(|i| self.snapshot(TaskId(i as u8)).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_table_creation() {
        let table = TaskTable::new(4);
        assert_eq!(table.len(), 4);
        let snap = table.snapshot(TaskId(3)).unwrap();
        assert_eq!(snap.state, TaskState::Running);
        assert_eq!(snap.name, None);
        assert_eq!(table.snapshot(TaskId(4)), Err(KernelError::InvalidTask(4)));
    }

    #[test]
    fn test_register_and_lookup() {
        let table = TaskTable::new(4);
        assert_eq!(table.current(), None);
        table.register(TaskId(2), "btu_task_long").unwrap();
        assert_eq!(table.current(), Some(TaskId(2)));
        assert_eq!(table.snapshot(TaskId(2)).unwrap().name.as_deref(), Some("btu_task"));

        assert_eq!(table.register(TaskId(3), "x"), Err(KernelError::AlreadyRegistered(2)));
        assert_eq!(table.register(TaskId(9), "x"), Err(KernelError::InvalidTask(9)));
    }

    #[test]
    fn test_slot_busy() {
        let table = Arc::new(TaskTable::new(2));
        table.register(TaskId(0), "main").unwrap();
        let t = Arc::clone(&table);
        let res = std::thread::spawn(move || t.register(TaskId(0), "other"))
            .join()
            .unwrap();
        assert_eq!(res, Err(KernelError::TaskSlotBusy(0)));
    }

    #[test]
    fn test_send_event_invalid_task() {
        let table = TaskTable::new(2);
        assert_eq!(
            table.send_event(TaskId(2), EventMask::MBOX_0),
            Err(KernelError::InvalidTask(2))
        );
    }

    #[test]
    fn test_pending_before_wait_is_not_lost() {
        let table = TaskTable::new(2);
        table.send_event(TaskId(1), EventMask::MBOX_0 | EventMask::appl(1)).unwrap();

        let got = table.wait(TaskId(1), EventMask::MBOX_0, 0).unwrap();
        assert_eq!(got, EventMask::MBOX_0);
        // Unrelated bit stays for a later wait
        assert_eq!(table.snapshot(TaskId(1)).unwrap().pending, EventMask::appl(1));
        assert_eq!(table.snapshot(TaskId(1)).unwrap().wait_mask, EventMask::EMPTY);
    }

    #[test]
    fn test_signals_accumulate() {
        let table = TaskTable::new(1);
        table.send_event(TaskId(0), EventMask::MBOX_1).unwrap();
        table.send_event(TaskId(0), EventMask::MBOX_2).unwrap();
        let got = table.wait(TaskId(0), EventMask::ANY_MBOX, 0).unwrap();
        assert_eq!(got, EventMask::MBOX_1 | EventMask::MBOX_2);
    }

    #[test]
    fn test_wait_timeout_returns_empty() {
        let table = TaskTable::new(1);
        let start = Instant::now();
        let got = table.wait(TaskId(0), EventMask::MBOX_0, 50).unwrap();
        assert_eq!(got, EventMask::EMPTY);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(table.snapshot(TaskId(0)).unwrap().state, TaskState::Running);
    }

    #[test]
    fn test_wait_wakes_on_signal() {
        let table = Arc::new(TaskTable::new(2));
        let t = Arc::clone(&table);
        let waiter = std::thread::spawn(move || t.wait(TaskId(1), EventMask::appl(2), 0).unwrap());

        std::thread::sleep(Duration::from_millis(20));
        // A bit outside the flag does not end the wait
        table.send_event(TaskId(1), EventMask::MBOX_3).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        table.send_event(TaskId(1), EventMask::appl(2)).unwrap();

        assert_eq!(waiter.join().unwrap(), EventMask::appl(2));
        assert_eq!(table.snapshot(TaskId(1)).unwrap().pending, EventMask::MBOX_3);
    }

    #[test]
    fn test_dead_task_wait_returns_shutdown() {
        let table = TaskTable::new(1);
        table.mark_dead(TaskId(0)).unwrap();
        table.send_event(TaskId(0), EventMask::appl(1)).unwrap();

        let got = table.wait(TaskId(0), EventMask::MBOX_0, 0).unwrap();
        assert_eq!(got, EventMask::SHUTDOWN);
        assert_eq!(table.snapshot(TaskId(0)).unwrap().pending, EventMask::EMPTY);
        assert_eq!(table.snapshot(TaskId(0)).unwrap().state, TaskState::Dead);
    }

    #[test]
    fn test_mark_dead_wakes_blocked_waiter() {
        let table = Arc::new(TaskTable::new(1));
        let t = Arc::clone(&table);
        let waiter = std::thread::spawn(move || t.wait(TaskId(0), EventMask::MBOX_0, 0).unwrap());

        while table.snapshot(TaskId(0)).unwrap().state != TaskState::Blocked {
            std::thread::yield_now();
        }
        table.mark_dead(TaskId(0)).unwrap();
        assert_eq!(waiter.join().unwrap(), EventMask::SHUTDOWN);
    }
}
