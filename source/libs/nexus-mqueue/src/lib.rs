// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Priority-ordered, bounded, blocking message queues (POSIX mqueue core)
//! OWNERS: @kernel-ipc-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module, proptest ordering suite, threaded integration tests
//!
//! PUBLIC API:
//!   - MqSubsystem: process-wide state (message pool + kernel collaborators)
//!   - MessageQueue: one bounded channel, created through MqSubsystem::create_queue()
//!   - MqDescriptor: caller handle (send/timed_send/receive/timed_receive/notify/attr)
//!   - MessagePool / IsrPool: node allocation for task and interrupt context
//!   - kernel::{Scheduler, IrqControl, NotificationSink, NodeAllocator}: collaborator seams
//!
//! DEPENDS_ON: spin (critical sections), bitflags (open flags), log, thiserror
//! INVARIANTS:
//!   - queued messages never exceed the queue's max_msgs
//!   - delivery order is descending priority, FIFO among equal priorities
//!   - a message node is owned by exactly one of {pool, queue, caller}
//!   - waiting counters are decremented exactly once per registered waiter
//!   - no lock is held across notification delivery or while blocked
//! ADR: docs/adr/0001-mqueue-wait-protocol.md

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

extern crate alloc;

pub mod config;
pub mod descriptor;
pub mod error;
pub mod kernel;
pub mod notify;
pub mod pool;
pub mod queue;
pub mod receive;
pub mod send;
pub mod store;
pub mod sync;
pub mod types;
pub mod wait;

#[cfg(feature = "std")]
pub mod host;

#[cfg(all(test, feature = "std"))]
mod tests_prop;

pub use config::{PoolConfig, QueueAttr, MQ_PRIO_MAX};
pub use descriptor::{MqAttr, MqDescriptor, OpenFlags};
pub use error::{MqError, Result};
pub use kernel::{
    BlockReason, IrqControl, KernelServices, NodeAllocator, NotificationSink, Scheduler,
    WaitOutcome,
};
pub use notify::Notification;
pub use pool::{IsrNode, IsrPool, MessageNode, MessagePool, NodeOrigin, PoolStats};
pub use queue::{MessageQueue, MqSubsystem};
pub use receive::Received;
pub use types::{NotifyValue, Priority, SignalId, TaskId, Timespec, Timestamp};
