// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Blocking/waking protocol for senders (queue full) and receivers (queue empty)
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: WaitList, WaitDeadline; crate-internal wait_until_*/wake_one_*
//! DEPENDS_ON: kernel::Scheduler, sync::{IrqLock, CancellationPoint}, queue::QueueState
//! INVARIANTS:
//!   - WaitList count equals the number of registered tasks; a positive count with no
//!     registered task aborts the kernel
//!   - only the party that removes a wait entry decrements the count (exactly once)
//!   - waiters are woken in the order they registered
//!   - the queue lock is released before blocking and re-taken on resumption
//!
//! States per caller: Admissible -> Blocked -> {Resumed, Cancelled, TimedOut, Interrupted}.
//! A resumed waiter always re-checks the queue: another task may have taken the
//! slot (or message) between the wake and the re-lock.

use alloc::collections::VecDeque;

use log::trace;

use crate::error::{MqError, Result};
use crate::kernel::{BlockReason, WaitOutcome};
use crate::queue::{MessageQueue, QueueState};
use crate::sync::{CancellationPoint, IrqGuard};
use crate::types::{TaskId, Timespec};

/// FIFO of tasks blocked on one condition of one queue.
#[derive(Debug, Default)]
pub struct WaitList {
    waiting: usize,
    tasks: VecDeque<TaskId>,
}

impl WaitList {
    /// Number of tasks currently waiting.
    pub fn len(&self) -> usize {
        self.waiting
    }

    pub fn is_empty(&self) -> bool {
        self.waiting == 0
    }

    fn register(&mut self, task: TaskId) {
        self.tasks.push_back(task);
        self.waiting += 1;
    }

    /// Removes `task` if it is still registered. Returns `false` when a waker
    /// already took it off the list (and accounted for it).
    fn withdraw(&mut self, task: TaskId) -> bool {
        match self.tasks.iter().position(|&t| t == task) {
            Some(at) => {
                self.tasks.remove(at);
                self.waiting -= 1;
                true
            }
            None => false,
        }
    }

    /// Takes the longest-waiting task off the list.
    fn take_first(&mut self) -> Option<TaskId> {
        if self.waiting == 0 {
            return None;
        }
        let Some(task) = self.tasks.pop_front() else {
            panic!("mqueue: wait count {} with no registered waiter", self.waiting);
        };
        self.waiting -= 1;
        Some(task)
    }
}

/// How long a blocking call may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitDeadline {
    Infinite,
    /// Absolute time on the scheduler clock. Validated only if the call blocks.
    At(Timespec),
}

#[derive(Clone, Copy)]
enum Side {
    Send,
    Receive,
}

impl Side {
    fn reason(self) -> BlockReason {
        match self {
            Side::Send => BlockReason::MqNotFull,
            Side::Receive => BlockReason::MqNotEmpty,
        }
    }

    fn must_wait(self, state: &QueueState) -> bool {
        match self {
            Side::Send => state.is_full(),
            Side::Receive => state.messages.is_empty(),
        }
    }

    fn waiters(self, state: &mut QueueState) -> &mut WaitList {
        match self {
            Side::Send => &mut state.senders,
            Side::Receive => &mut state.receivers,
        }
    }
}

/// Returns with the queue locked and at least one free slot.
pub(crate) fn wait_until_sendable(
    queue: &MessageQueue,
    nonblocking: bool,
    deadline: WaitDeadline,
) -> Result<IrqGuard<'_, QueueState>> {
    wait_until(queue, Side::Send, nonblocking, deadline)
}

/// Returns with the queue locked and at least one queued message.
pub(crate) fn wait_until_receivable(
    queue: &MessageQueue,
    nonblocking: bool,
    deadline: WaitDeadline,
) -> Result<IrqGuard<'_, QueueState>> {
    wait_until(queue, Side::Receive, nonblocking, deadline)
}

fn wait_until(
    queue: &MessageQueue,
    side: Side,
    nonblocking: bool,
    deadline: WaitDeadline,
) -> Result<IrqGuard<'_, QueueState>> {
    let sched = queue.scheduler();
    let _point = CancellationPoint::enter(sched)?;

    let mut state = queue.lock();
    loop {
        if !side.must_wait(&state) {
            return Ok(state);
        }

        let deadline = match deadline {
            WaitDeadline::Infinite => None,
            WaitDeadline::At(ts) => {
                let at = ts.to_timestamp()?;
                if at.has_passed(sched.now()) {
                    return Err(MqError::TimedOut);
                }
                Some(at)
            }
        };
        if nonblocking {
            return Err(MqError::WouldBlock);
        }

        let me = sched.current_task();
        side.waiters(&mut state).register(me);
        drop(state);

        trace!("mqueue: {me} blocking ({:?})", side.reason());
        let outcome = sched.block_current(side.reason(), deadline);

        state = queue.lock();
        let chosen = !side.waiters(&mut state).withdraw(me);

        if outcome != WaitOutcome::Woken {
            // Chosen by a waker but leaving anyway: pass the wake on.
            let next = if chosen && !side.must_wait(&state) {
                side.waiters(&mut state).take_first()
            } else {
                None
            };
            drop(state);
            if let Some(next) = next {
                trace!("mqueue: {me} passes its wake to {next}");
                sched.unblock(next);
            }
            trace!("mqueue: {me} wait ended {outcome:?}");
            return Err(outcome.into());
        }
    }
}

/// Wakes the longest-blocked receiver of `queue`, if any.
pub(crate) fn wake_one_receiver(queue: &MessageQueue) {
    wake_one(queue, Side::Receive);
}

/// Wakes the longest-blocked sender of `queue`, if any.
pub(crate) fn wake_one_sender(queue: &MessageQueue) {
    wake_one(queue, Side::Send);
}

fn wake_one(queue: &MessageQueue, side: Side) {
    let task = side.waiters(&mut queue.lock()).take_first();
    if let Some(task) = task {
        trace!("mqueue: waking {task} ({:?})", side.reason());
        queue.scheduler().unblock(task);
    }
}
