//! Error types
//!
//! Range and availability failures are ordinary `KernelError`s. Misuse that
//! would corrupt a free list or the timer list is a [`Violation`]; the kernel
//! reports those through its fatal hook and then panics.

use thiserror::Error;

use crate::buffer::BufferId;

/// Exception codes handed to the fatal hook
pub mod code {
    pub const DOUBLE_RELEASE: u16 = 0xFFF0;
    pub const RELEASE_QUEUED: u16 = 0xFFF1;
    pub const FOREIGN_BUFFER: u16 = 0xFFF2;
    pub const TIMER_ARMED: u16 = 0xFFF3;
    pub const UNKNOWN_TIMER: u16 = 0xFFF4;
    pub const SLEEP_IN_CRITICAL: u16 = 0xFFF5;
    pub const WAIT_IN_CRITICAL: u16 = 0xFFF6;
}

/// Errors returned by kernel operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("invalid task id: {0}")]
    InvalidTask(u8),
    #[error("invalid pool id: {0}")]
    InvalidPool(u8),
    #[error("pool {0} exhausted")]
    PoolExhausted(u8),
    #[error("invalid mailbox index: {0}")]
    InvalidMailbox(usize),
    #[error("task slot {0} is already bound to a thread")]
    TaskSlotBusy(u8),
    #[error("calling thread is already registered as task {0}")]
    AlreadyRegistered(u8),
    #[error("calling thread is not a registered task")]
    NotATask,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("protocol violation: {0}")]
    Violation(#[from] Violation),
}

/// Programmer errors that break allocator or timer invariants
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    #[error("buffer {0} released twice")]
    DoubleRelease(BufferId),
    #[error("buffer {0} released while still enqueued")]
    ReleaseWhileQueued(BufferId),
    #[error("buffer {0} does not belong to this kernel")]
    ForeignBuffer(BufferId),
    #[error("timer entry {0} is already armed")]
    TimerAlreadyArmed(usize),
    #[error("unknown timer entry {0}")]
    UnknownTimer(usize),
    #[error("sleep requested while holding the critical section")]
    SleepInCritical,
    #[error("event wait requested while holding the critical section")]
    WaitInCritical,
}

impl Violation {
    /// Exception code reported to the fatal hook
    pub fn code(&self) -> u16 {
        match self {
            Violation::DoubleRelease(_) => code::DOUBLE_RELEASE,
            Violation::ReleaseWhileQueued(_) => code::RELEASE_QUEUED,
            Violation::ForeignBuffer(_) => code::FOREIGN_BUFFER,
            Violation::TimerAlreadyArmed(_) => code::TIMER_ARMED,
            Violation::UnknownTimer(_) => code::UNKNOWN_TIMER,
            Violation::SleepInCritical => code::SLEEP_IN_CRITICAL,
            Violation::WaitInCritical => code::WAIT_IN_CRITICAL,
        }
    }
}

/// Unrecoverable condition handed to a [`crate::fatal::FatalHook`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("kernel exception {code:#06x}: {message}")]
pub struct FatalError {
    pub code: u16,
    pub message: String,
}

impl FatalError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<Violation> for FatalError {
    fn from(v: Violation) -> Self {
        FatalError::new(v.code(), v.to_string())
    }
}

pub type Result<T> = core::result::Result<T, KernelError>;
