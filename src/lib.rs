//! coopkern: cooperative kernel services for task-per-thread systems
//!
//! Memory and messaging primitives for a set of cooperating tasks:
//! - Fixed-size buffer pools with best-fit allocation and restricted pools
//! - Intrusive FIFO buffer queues with O(1) remove
//! - Per-task 16-bit event masks with blocking wait and timeout
//! - Per-task mailboxes that signal an event on delivery
//! - Delta-encoded software timer lists driven by a pluggable clock
//!
//! Everything hangs off one explicitly constructed [`Kernel`]; there is no
//! global state.

pub mod buffer;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod fatal;
pub mod kernel;
pub mod pool;
pub mod queue;
pub mod task;
pub mod timer;

pub use buffer::{Buffer, BufferId, PoolId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{KernelConfig, PoolConfig, MAX_POOLS, MAX_TASKS};
pub use error::{FatalError, KernelError, Result, Violation};
pub use event::{EventMask, Mailbox, MAX_EVENTS, NUM_MAILBOXES};
pub use fatal::{FatalHook, LogHook};
pub use kernel::{CriticalSection, Kernel, KernelStats};
pub use pool::{ArenaId, BufferArena, PoolStats};
pub use queue::BufferQueue;
pub use task::{TaskId, TaskSnapshot, TaskState, TaskTable};
pub use timer::{EventSink, TimerCallback, TimerEvent, TimerId, TimerList};
