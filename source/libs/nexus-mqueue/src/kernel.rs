// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Collaborator seams between the queue core and the rest of the kernel
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: Scheduler, IrqControl, NotificationSink, NodeAllocator, KernelServices
//! DEPENDS_ON: nothing; implemented by the scheduler, trap and heap subsystems (and `host`)
//! INVARIANTS:
//!   - Scheduler::unblock() issued before the target blocks is remembered, not lost
//!   - IrqControl::restore() receives exactly the state returned by save_and_disable()
//!   - NodeAllocator is never reached from interrupt context

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::types::{NotifyValue, SignalId, TaskId, Timestamp};

/// Why the current task is being blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockReason {
    /// Sender waiting for a free slot.
    MqNotFull,
    /// Receiver waiting for a message.
    MqNotEmpty,
}

/// How a blocked task came back from `Scheduler::block_current`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Made runnable through `Scheduler::unblock`.
    Woken,
    /// The deadline passed first.
    TimedOut,
    /// A signal was delivered to the task.
    Interrupted,
}

/// Task scheduler as seen by the queue core.
pub trait Scheduler: Send + Sync {
    /// The task on whose behalf the caller runs.
    fn current_task(&self) -> TaskId;

    /// Monotonic clock shared with `Timespec` deadlines.
    fn now(&self) -> Timestamp;

    /// Suspends the current task until it is unblocked, interrupted, or
    /// `deadline` passes.
    ///
    /// The caller holds no queue lock. A wake for this task that arrived after
    /// the caller released the lock but before this call must make it return
    /// `Woken` immediately.
    fn block_current(&self, reason: BlockReason, deadline: Option<Timestamp>) -> WaitOutcome;

    /// Makes `task` runnable with outcome `Woken`.
    fn unblock(&self, task: TaskId);

    /// Enters a cancellation point; returns `true` if a cancellation is pending.
    fn enter_cancellation_point(&self) -> bool;

    fn leave_cancellation_point(&self);

    /// Disables preemption (`sched_lock`). Nests.
    fn lock(&self);

    fn unlock(&self);
}

/// Saved interrupt mask, opaque to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqState(pub usize);

/// Interrupt masking used to bracket every structural mutation.
pub trait IrqControl: Send + Sync {
    fn save_and_disable(&self) -> IrqState;
    fn restore(&self, state: IrqState);
}

/// Delivery could not be queued to the target task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryFailed;

/// Signal subsystem: delivers one event to one recipient.
pub trait NotificationSink: Send + Sync {
    fn deliver(
        &self,
        pid: TaskId,
        signo: SignalId,
        value: NotifyValue,
    ) -> core::result::Result<(), DeliveryFailed>;
}

/// Kernel heap, used only for overflow nodes from task context.
pub trait NodeAllocator: Send + Sync {
    /// Returns an empty buffer with capacity for at least `bytes`, or `None`
    /// when the heap is exhausted.
    fn allocate(&self, bytes: usize) -> Option<Vec<u8>>;

    /// Returns a block obtained from `allocate`.
    fn free(&self, block: Vec<u8>);
}

/// The set of collaborators one queue subsystem runs against.
#[derive(Clone)]
pub struct KernelServices {
    pub scheduler: Arc<dyn Scheduler>,
    pub irq: Arc<dyn IrqControl>,
    pub notifier: Arc<dyn NotificationSink>,
    pub allocator: Arc<dyn NodeAllocator>,
}

impl KernelServices {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        irq: Arc<dyn IrqControl>,
        notifier: Arc<dyn NotificationSink>,
        allocator: Arc<dyn NodeAllocator>,
    ) -> Self {
        Self { scheduler, irq, notifier, allocator }
    }
}

impl core::fmt::Debug for KernelServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KernelServices").finish_non_exhaustive()
    }
}
