//! Event masks: 16 bits a task can be signaled with and wait on
//!
//! Bit layout:
//! - bits 0..=3: mailbox-has-data (one per task mailbox)
//! - bits 4..=5: timer expired
//! - bits 6..=7: unassigned
//! - bits 8..=15: application defined, bit 15 doubles as the shutdown event

use core::fmt;
use core::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

use crate::error::KernelError;

/// Number of event bits per task
pub const MAX_EVENTS: u8 = 16;

/// Number of mailboxes per task
pub const NUM_MAILBOXES: usize = 4;

/// Event set (bitmask over [`MAX_EVENTS`] bits)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EventMask(pub u16);

impl EventMask {
    /// No events
    pub const EMPTY: EventMask = EventMask(0);
    /// Every event bit
    pub const ALL: EventMask = EventMask(0xFFFF);

    /// Mailbox 0 has data
    pub const MBOX_0: EventMask = EventMask(0x0001);
    /// Mailbox 1 has data
    pub const MBOX_1: EventMask = EventMask(0x0002);
    /// Mailbox 2 has data
    pub const MBOX_2: EventMask = EventMask(0x0004);
    /// Mailbox 3 has data
    pub const MBOX_3: EventMask = EventMask(0x0008);
    /// Any mailbox has data
    pub const ANY_MBOX: EventMask = EventMask(0x000F);

    /// Timer 0 expired
    pub const TIMER_0: EventMask = EventMask(0x0010);
    /// Timer 1 expired
    pub const TIMER_1: EventMask = EventMask(0x0020);

    /// Returned from a wait once the task has been marked dead
    pub const SHUTDOWN: EventMask = EventMask::appl(7);

    /// Mask for a single event bit (0..16)
    pub const fn bit(evt: u8) -> EventMask {
        EventMask(1u16 << (evt % MAX_EVENTS))
    }

    /// Mask for application event `n` (0..8), i.e. bit `8 + n`
    pub const fn appl(n: u8) -> EventMask {
        EventMask::bit(8 + (n % 8))
    }

    /// Raw bits
    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if any bit is shared with `other`
    pub const fn intersects(self, other: EventMask) -> bool {
        self.0 & other.0 != 0
    }

    /// True if every bit of `other` is set in `self`
    pub const fn contains(self, other: EventMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for EventMask {
    type Output = EventMask;
    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: EventMask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EventMask {
    type Output = EventMask;
    fn bitand(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 & rhs.0)
    }
}

impl BitAndAssign for EventMask {
    fn bitand_assign(&mut self, rhs: EventMask) {
        self.0 &= rhs.0;
    }
}

impl Not for EventMask {
    type Output = EventMask;
    fn not(self) -> EventMask {
        EventMask(!self.0)
    }
}

impl fmt::Debug for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventMask({:#06x})", self.0)
    }
}

impl fmt::Display for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// One of a task's mailboxes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mailbox {
    Mbox0,
    Mbox1,
    Mbox2,
    Mbox3,
}

impl Mailbox {
    /// All mailboxes, in index order
    pub const ALL: [Mailbox; NUM_MAILBOXES] =
        [Mailbox::Mbox0, Mailbox::Mbox1, Mailbox::Mbox2, Mailbox::Mbox3];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Event bit signaled when a buffer lands in this mailbox
    pub const fn event_mask(self) -> EventMask {
        EventMask::bit(self as u8)
    }
}

impl TryFrom<usize> for Mailbox {
    type Error = KernelError;

    fn try_from(idx: usize) -> Result<Self, Self::Error> {
        Mailbox::ALL
            .get(idx)
            .copied()
            .ok_or(KernelError::InvalidMailbox(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_layout() {
        assert_eq!(EventMask::MBOX_0 | EventMask::MBOX_1 | EventMask::MBOX_2 | EventMask::MBOX_3, EventMask::ANY_MBOX);
        assert!(!EventMask::ANY_MBOX.intersects(EventMask::TIMER_0 | EventMask::TIMER_1));
        assert_eq!(EventMask::SHUTDOWN.bits(), 0x8000);
        assert_eq!(EventMask::appl(0).bits(), 0x0100);
    }

    #[test]
    fn test_mailbox_masks() {
        for (i, mbox) in Mailbox::ALL.iter().enumerate() {
            assert_eq!(mbox.index(), i);
            assert_eq!(mbox.event_mask(), EventMask::bit(i as u8));
        }
        assert_eq!(Mailbox::try_from(2), Ok(Mailbox::Mbox2));
        assert_eq!(Mailbox::try_from(4), Err(KernelError::InvalidMailbox(4)));
    }

    #[test]
    fn test_mask_ops() {
        let m = EventMask::MBOX_0 | EventMask::appl(3);
        assert!(m.contains(EventMask::MBOX_0));
        assert!(!m.contains(EventMask::MBOX_0 | EventMask::MBOX_1));
        assert_eq!(m & !EventMask::MBOX_0, EventMask::appl(3));
        assert!(EventMask::EMPTY.is_empty());
    }
}
