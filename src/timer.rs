//! Timer list: delta-ordered timeouts
//!
//! Each armed entry stores its ticks relative to the entry before it, so
//! summing `ticks` from the head up to an entry gives that entry's remaining
//! time. A tick only touches the head; the work done by [`TimerList::advance`]
//! is bounded by the number of timers that expire, not by the list length.
//!
//! Entries are created once with [`TimerList::create_entry`] and then armed,
//! disarmed and re-armed any number of times through their [`TimerId`].

use core::fmt;

use tracing::{trace, warn};

use crate::error::Violation;
use crate::event::EventMask;
use crate::task::TaskId;

/// Expiry callback
pub type TimerCallback = Box<dyn FnMut(&TimerEvent) + Send>;

/// Destination for expiry events
pub trait EventSink {
    fn post(&self, task: TaskId, event: EventMask);
}

/// Handle to a timer entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(usize);

impl TimerId {
    pub const fn index(self) -> usize {
        self.0
    }
}

/// What an expiring entry hands its callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvent {
    pub id: TimerId,
    pub owner: Option<TaskId>,
    pub event: EventMask,
    pub param: u32,
    pub data: u32,
    pub ticks_initial: i32,
}

struct Entry {
    allocated: bool,
    in_use: bool,
    /// Delta to the previous armed entry
    ticks: i32,
    ticks_initial: i32,
    callback: Option<TimerCallback>,
    param: u32,
    data: u32,
    event: EventMask,
    owner: Option<TaskId>,
    prev: Option<usize>,
    next: Option<usize>,
}

impl Entry {
    fn new(owner: Option<TaskId>) -> Self {
        Self {
            allocated: true,
            in_use: false,
            ticks: 0,
            ticks_initial: 0,
            callback: None,
            param: 0,
            data: 0,
            event: EventMask::EMPTY,
            owner,
            prev: None,
            next: None,
        }
    }
}

/// Delta-encoded timer list
#[derive(Default)]
pub struct TimerList {
    entries: Vec<Entry>,
    free: Vec<usize>,
    first: Option<usize>,
    last: Option<usize>,
    armed: usize,
    /// Tick count seen by the previous `update`
    last_update: Option<u64>,
}

impl TimerList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an entry whose expiry events go to `owner`
    pub fn create_entry(&mut self, owner: Option<TaskId>) -> TimerId {
        match self.free.pop() {
            Some(idx) => {
                self.entries[idx] = Entry::new(owner);
                TimerId(idx)
            }
            None => {
                self.entries.push(Entry::new(owner));
                TimerId(self.entries.len() - 1)
            }
        }
    }

    /// Disarm (if armed) and free an entry
    pub fn destroy_entry(&mut self, id: TimerId) -> Result<(), Violation> {
        self.remove(id)?;
        let entry = &mut self.entries[id.0];
        entry.allocated = false;
        entry.callback = None;
        self.free.push(id.0);
        Ok(())
    }

    fn check(&self, id: TimerId) -> Result<usize, Violation> {
        match self.entries.get(id.0) {
            Some(e) if e.allocated => Ok(id.0),
            _ => Err(Violation::UnknownTimer(id.0)),
        }
    }

    /// Arm `id` to expire after `ticks`
    ///
    /// On expiry `callback` runs (if given) and `event` is posted to the
    /// entry's owner (if non-empty). Negative `ticks` are treated as 0.
    pub fn insert(
        &mut self,
        id: TimerId,
        ticks: i32,
        event: EventMask,
        callback: Option<TimerCallback>,
        param: u32,
    ) -> Result<(), Violation> {
        let idx = self.check(id)?;
        if self.entries[idx].in_use {
            return Err(Violation::TimerAlreadyArmed(idx));
        }
        let entry = &mut self.entries[idx];
        entry.event = event;
        entry.callback = callback;
        entry.param = param;
        entry.ticks_initial = ticks;
        self.link(idx, ticks.max(0));
        Ok(())
    }

    /// Disarm `id`; no-op if it is not armed
    pub fn remove(&mut self, id: TimerId) -> Result<(), Violation> {
        let idx = self.check(id)?;
        if !self.entries[idx].in_use {
            return Ok(());
        }
        // The successor's delta becomes relative to our predecessor
        if let Some(next) = self.entries[idx].next {
            let ticks = self.entries[idx].ticks;
            self.entries[next].ticks += ticks;
        }
        self.unlink(idx);
        Ok(())
    }

    /// Re-arm with the entry's original duration, callback and event
    pub fn restart(&mut self, id: TimerId) -> Result<(), Violation> {
        self.remove(id)?;
        let ticks = self.entries[id.0].ticks_initial;
        self.link(id.0, ticks.max(0));
        Ok(())
    }

    /// Consume `elapsed` ticks and fire everything that expired
    ///
    /// Returns the number of entries fired.
    pub fn advance<S: EventSink + ?Sized>(&mut self, elapsed: i32, sink: &S) -> usize {
        let Some(first) = self.first else {
            return 0;
        };
        let head = &mut self.entries[first];
        head.ticks = head.ticks.saturating_sub(elapsed);

        let mut fired = 0;
        while let Some(idx) = self.first {
            let overdue = self.entries[idx].ticks;
            if overdue > 0 {
                break;
            }
            self.unlink(idx);
            // Carry the overshoot into the new head
            if let Some(next) = self.first {
                self.entries[next].ticks = self.entries[next].ticks.saturating_add(overdue);
            }
            self.fire(idx, sink);
            fired += 1;
        }
        fired
    }

    /// Advance by the ticks elapsed since the previous call
    ///
    /// The first call only records `now`.
    pub fn update<S: EventSink + ?Sized>(&mut self, now: u64, sink: &S) -> usize {
        let Some(prev) = self.last_update.replace(now) else {
            return 0;
        };
        let elapsed = now.wrapping_sub(prev).min(i32::MAX as u64) as i32;
        self.advance(elapsed, sink)
    }

    fn fire<S: EventSink + ?Sized>(&mut self, idx: usize, sink: &S) {
        let entry = &mut self.entries[idx];
        let ev = TimerEvent {
            id: TimerId(idx),
            owner: entry.owner,
            event: entry.event,
            param: entry.param,
            data: entry.data,
            ticks_initial: entry.ticks_initial,
        };
        trace!(timer = idx, event = %ev.event, "timer fired");

        if let Some(cb) = entry.callback.as_mut() {
            cb(&ev);
        }
        if !ev.event.is_empty() {
            match ev.owner {
                Some(task) => sink.post(task, ev.event),
                None => warn!(timer = idx, event = %ev.event, "expired timer has no owner task"),
            }
        }
    }

    fn link(&mut self, idx: usize, ticks: i32) {
        let mut remaining = ticks;
        let mut prev = None;
        let mut cur = self.first;
        while let Some(c) = cur {
            let delta = self.entries[c].ticks;
            if remaining < delta {
                break;
            }
            remaining -= delta;
            prev = Some(c);
            cur = self.entries[c].next;
        }

        let entry = &mut self.entries[idx];
        entry.ticks = remaining;
        entry.prev = prev;
        entry.next = cur;
        entry.in_use = true;

        match prev {
            Some(p) => self.entries[p].next = Some(idx),
            None => self.first = Some(idx),
        }
        match cur {
            Some(c) => {
                self.entries[c].prev = Some(idx);
                self.entries[c].ticks -= remaining;
            }
            None => self.last = Some(idx),
        }
        self.armed += 1;
    }

    /// Detach without touching neighbour deltas
    fn unlink(&mut self, idx: usize) {
        let entry = &mut self.entries[idx];
        let (prev, next) = (entry.prev.take(), entry.next.take());
        entry.in_use = false;
        entry.ticks = 0;

        match prev {
            Some(p) => self.entries[p].next = next,
            None => self.first = next,
        }
        match next {
            Some(n) => self.entries[n].prev = prev,
            None => self.last = prev,
        }
        self.armed -= 1;
    }

    pub fn is_armed(&self, id: TimerId) -> bool {
        self.check(id).is_ok_and(|idx| self.entries[idx].in_use)
    }

    /// Absolute ticks until `id` expires
    pub fn remaining_ticks(&self, id: TimerId) -> Option<i32> {
        if !self.is_armed(id) {
            return None;
        }
        self.iter()
            .scan(0i32, |sum, (tid, delta)| {
                *sum += delta;
                Some((tid, *sum))
            })
            .find(|(tid, _)| *tid == id)
            .map(|(_, sum)| sum)
    }

    /// Duration `id` was last armed with
    pub fn ticks_initial(&self, id: TimerId) -> Option<i32> {
        self.check(id).ok().map(|idx| self.entries[idx].ticks_initial)
    }

    /// Attach caller data handed back in [`TimerEvent::data`]
    pub fn set_data(&mut self, id: TimerId, data: u32) -> Result<(), Violation> {
        let idx = self.check(id)?;
        self.entries[idx].data = data;
        Ok(())
    }

    /// Ticks until the head expires
    pub fn next_expiry(&self) -> Option<i32> {
        self.first.map(|f| self.entries[f].ticks)
    }

    /// Armed entries in expiry order with their deltas
    pub fn iter(&self) -> impl Iterator<Item = (TimerId, i32)> + '_ {
        core::iter::successors(self.first, move |&idx| self.entries[idx].next)
            .map(move |idx| (TimerId(idx), self.entries[idx].ticks))
    }

    /// Number of armed entries
    pub fn len(&self) -> usize {
        self.armed
    }

    pub fn is_empty(&self) -> bool {
        self.armed == 0
    }

    /// Last armed entry
    pub fn last(&self) -> Option<TimerId> {
        self.last.map(TimerId)
    }
}

impl fmt::Debug for TimerList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerList")
            .field("armed", &self.iter().collect::<Vec<_>>())
            .field("entries", &self.entries.len())
            .finish()
    }
}
