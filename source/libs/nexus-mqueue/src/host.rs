// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host (std) implementations of the kernel collaborators for tests and tooling
//!
//! OWNERS: @kernel-ipc-team
//!
//! PUBLIC API:
//!   - HostScheduler: OS threads as tasks; block/unblock over parking_lot Condvar
//!   - HostIrq: no-op interrupt control (threads never run in interrupt context)
//!   - RecordingNotifier: records deliveries, can be switched to fail
//!   - HeapAllocator / CountingAllocator: kernel heap stand-ins
//!   - HostKernel: one bundle of the above, convertible to KernelServices
//!
//! INVARIANTS:
//!   - an unblock issued before the target blocks is kept and consumed by its next block
//!   - block_current never reports TimedOut before the deadline
//!   - interrupt() only affects a task that is currently blocked
//!   - a spawned task's slot lives exactly as long as its thread
//!
//! DEPENDENCIES:
//!   - parking_lot::{Mutex, Condvar}: per-task wakeup slots
//!
//! ADR: docs/adr/0001-mqueue-wait-protocol.md

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use std::vec::Vec;

use parking_lot::{Condvar, Mutex};

use crate::kernel::{
    BlockReason, DeliveryFailed, IrqControl, IrqState, KernelServices, NodeAllocator,
    NotificationSink, Scheduler, WaitOutcome,
};
use crate::types::{NotifyValue, SignalId, TaskId, Timespec, Timestamp};

static NEXT_INSTANCE: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    // (scheduler instance, task) the calling thread runs as.
    static CURRENT: Cell<Option<(usize, TaskId)>> = const { Cell::new(None) };
    static PREEMPT_DEPTH: Cell<usize> = const { Cell::new(0) };
}

#[derive(Default)]
struct TaskSlot {
    state: Mutex<SlotState>,
    wakeup: Condvar,
}

#[derive(Default)]
struct SlotState {
    pending: Option<WaitOutcome>,
    blocked: Option<BlockReason>,
    cancel_requested: bool,
    cancel_depth: usize,
}

type SlotMap = Mutex<HashMap<TaskId, Arc<TaskSlot>>>;

/// Scheduler backed by OS threads. Each thread is a task; a thread that was
/// not started through [`spawn`](Self::spawn) is given a task id on first use.
///
/// A spawned task's slot is removed when its closure returns. Threads adopted
/// through [`current`](Self::current) keep theirs for the scheduler's lifetime.
pub struct HostScheduler {
    instance: usize,
    epoch: Instant,
    next_task: AtomicU32,
    tasks: Arc<SlotMap>,
}

/// Removes a spawned task's slot when its thread finishes, panicking or not.
struct TaskExit {
    tasks: Arc<SlotMap>,
    task: TaskId,
}

impl Drop for TaskExit {
    fn drop(&mut self) {
        self.tasks.lock().remove(&self.task);
    }
}

impl HostScheduler {
    pub fn new() -> Self {
        Self {
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            epoch: Instant::now(),
            next_task: AtomicU32::new(1),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Task id of the calling thread.
    pub fn current(&self) -> TaskId {
        CURRENT.with(|current| match current.get() {
            Some((instance, task)) if instance == self.instance => task,
            _ => {
                let task = self.allocate_task();
                current.set(Some((self.instance, task)));
                task
            }
        })
    }

    /// Runs `f` on a new thread that acts as a fresh task of this scheduler.
    pub fn spawn<F, T>(&self, f: F) -> (TaskId, JoinHandle<T>)
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let task = self.allocate_task();
        let instance = self.instance;
        let exit = TaskExit { tasks: self.tasks.clone(), task };
        let handle = thread::spawn(move || {
            let _exit = exit;
            CURRENT.with(|current| current.set(Some((instance, task))));
            f()
        });
        (task, handle)
    }

    /// Delivers a signal to `task`: if blocked, it resumes with `Interrupted`.
    pub fn interrupt(&self, task: TaskId) {
        let Some(slot) = self.slot(task) else { return };
        let mut state = slot.state.lock();
        if state.blocked.is_some() && state.pending.is_none() {
            state.pending = Some(WaitOutcome::Interrupted);
            slot.wakeup.notify_all();
        }
    }

    /// Marks `task` as cancelled; its next cancellation point observes it.
    /// No effect on a task that has exited.
    pub fn cancel(&self, task: TaskId) {
        if let Some(slot) = self.slot(task) {
            slot.state.lock().cancel_requested = true;
        }
    }

    pub fn blocked_on(&self, task: TaskId) -> Option<BlockReason> {
        self.slot(task)?.state.lock().blocked
    }

    /// Polls until `task` is blocked or `timeout` elapses.
    pub fn wait_until_blocked(&self, task: TaskId, timeout: Duration) -> bool {
        let start = Instant::now();
        while self.blocked_on(task).is_none() {
            if start.elapsed() >= timeout {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    /// Absolute deadline `after` from now on this scheduler's clock.
    pub fn deadline_after(&self, after: Duration) -> Timespec {
        self.now().saturating_add(after).into()
    }

    fn allocate_task(&self) -> TaskId {
        let task = TaskId::from_raw(self.next_task.fetch_add(1, Ordering::Relaxed));
        self.tasks.lock().insert(task, Arc::default());
        task
    }

    fn slot(&self, task: TaskId) -> Option<Arc<TaskSlot>> {
        self.tasks.lock().get(&task).cloned()
    }

    fn own_slot(&self) -> Arc<TaskSlot> {
        let task = self.current();
        self.tasks.lock().entry(task).or_default().clone()
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.tasks.lock().len()
    }
}

impl Default for HostScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for HostScheduler {
    fn current_task(&self) -> TaskId {
        self.current()
    }

    fn now(&self) -> Timestamp {
        let nanos = u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX);
        Timestamp::from_nanos(nanos)
    }

    fn block_current(&self, reason: BlockReason, deadline: Option<Timestamp>) -> WaitOutcome {
        debug_assert_eq!(PREEMPT_DEPTH.with(Cell::get), 0, "blocking with preemption disabled");
        let slot = self.own_slot();
        let mut state = slot.state.lock();
        state.blocked = Some(reason);
        let outcome = loop {
            if let Some(outcome) = state.pending.take() {
                break outcome;
            }
            match deadline {
                None => slot.wakeup.wait(&mut state),
                Some(at) => {
                    let now = self.now();
                    if at.has_passed(now) {
                        break WaitOutcome::TimedOut;
                    }
                    let _ = slot.wakeup.wait_for(&mut state, at.remaining_from(now));
                }
            }
        };
        state.blocked = None;
        outcome
    }

    fn unblock(&self, task: TaskId) {
        let Some(slot) = self.slot(task) else { return };
        let mut state = slot.state.lock();
        if state.pending.is_none() {
            state.pending = Some(WaitOutcome::Woken);
        }
        slot.wakeup.notify_all();
    }

    fn enter_cancellation_point(&self) -> bool {
        let slot = self.own_slot();
        let mut state = slot.state.lock();
        state.cancel_depth += 1;
        state.cancel_requested
    }

    fn leave_cancellation_point(&self) {
        let slot = self.own_slot();
        let mut state = slot.state.lock();
        state.cancel_depth = state.cancel_depth.saturating_sub(1);
    }

    fn lock(&self) {
        PREEMPT_DEPTH.with(|depth| depth.set(depth.get() + 1));
    }

    fn unlock(&self) {
        PREEMPT_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Threads never run in interrupt context; the spin lock alone serializes.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostIrq;

impl IrqControl for HostIrq {
    fn save_and_disable(&self) -> IrqState {
        IrqState(0)
    }

    fn restore(&self, _state: IrqState) {}
}

/// One notification handed to the signal subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub pid: TaskId,
    pub signo: SignalId,
    pub value: NotifyValue,
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<Delivery>>,
    attempts: AtomicUsize,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.delivered.lock().clone()
    }

    /// Delivery attempts, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Makes subsequent deliveries fail with `DeliveryFailed`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl NotificationSink for RecordingNotifier {
    fn deliver(&self, pid: TaskId, signo: SignalId, value: NotifyValue) -> Result<(), DeliveryFailed> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryFailed);
        }
        self.delivered.lock().push(Delivery { pid, signo, value });
        Ok(())
    }
}

/// Process heap as the kernel heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl NodeAllocator for HeapAllocator {
    fn allocate(&self, bytes: usize) -> Option<Vec<u8>> {
        let mut block = Vec::new();
        block.try_reserve_exact(bytes).ok()?;
        Some(block)
    }

    fn free(&self, block: Vec<u8>) {
        drop(block);
    }
}

/// Heap with a fixed block budget that counts allocate/free calls.
#[derive(Debug)]
pub struct CountingAllocator {
    remaining: AtomicUsize,
    allocations: AtomicUsize,
    frees: AtomicUsize,
}

impl CountingAllocator {
    /// At most `blocks` successful allocations.
    pub fn with_budget(blocks: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(blocks),
            allocations: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
        }
    }

    pub fn unlimited() -> Self {
        Self::with_budget(usize::MAX)
    }

    /// Number of `allocate` calls, including failed ones.
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::SeqCst)
    }
}

impl NodeAllocator for CountingAllocator {
    fn allocate(&self, bytes: usize) -> Option<Vec<u8>> {
        self.allocations.fetch_add(1, Ordering::SeqCst);
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .ok()?;
        HeapAllocator.allocate(bytes)
    }

    fn free(&self, block: Vec<u8>) {
        self.frees.fetch_add(1, Ordering::SeqCst);
        drop(block);
    }
}

/// A complete set of host collaborators.
pub struct HostKernel {
    pub scheduler: Arc<HostScheduler>,
    pub irq: Arc<HostIrq>,
    pub notifier: Arc<RecordingNotifier>,
    pub allocator: Arc<CountingAllocator>,
}

impl HostKernel {
    pub fn new() -> Self {
        Self::with_allocator(CountingAllocator::unlimited())
    }

    pub fn with_allocator(allocator: CountingAllocator) -> Self {
        Self {
            scheduler: Arc::new(HostScheduler::new()),
            irq: Arc::new(HostIrq),
            notifier: Arc::new(RecordingNotifier::default()),
            allocator: Arc::new(allocator),
        }
    }

    pub fn services(&self) -> KernelServices {
        KernelServices::new(
            self.scheduler.clone(),
            self.irq.clone(),
            self.notifier.clone(),
            self.allocator.clone(),
        )
    }
}

impl Default for HostKernel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unblock_before_block_is_not_lost() {
        let sched = HostScheduler::new();
        let me = sched.current();
        sched.unblock(me);
        assert_eq!(sched.block_current(BlockReason::MqNotEmpty, None), WaitOutcome::Woken);
    }

    #[test]
    fn timed_block_never_returns_early() {
        let sched = HostScheduler::new();
        let deadline = sched.now().saturating_add(Duration::from_millis(20));
        let outcome = sched.block_current(BlockReason::MqNotFull, Some(deadline));
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(sched.now() >= deadline);
    }

    #[test]
    fn interrupt_wakes_blocked_task() {
        let sched = Arc::new(HostScheduler::new());
        let inner = sched.clone();
        let (task, handle) = sched.spawn(move || inner.block_current(BlockReason::MqNotEmpty, None));
        assert!(sched.wait_until_blocked(task, Duration::from_secs(5)));
        assert_eq!(sched.blocked_on(task), Some(BlockReason::MqNotEmpty));
        sched.interrupt(task);
        assert_eq!(handle.join().unwrap(), WaitOutcome::Interrupted);
        assert_eq!(sched.blocked_on(task), None);
    }

    #[test]
    fn spawned_task_slot_is_dropped_on_exit() {
        let sched = Arc::new(HostScheduler::new());
        let inner = sched.clone();
        let (first, handle) = sched.spawn(move || {
            assert!(!inner.enter_cancellation_point());
            inner.leave_cancellation_point();
            inner.current()
        });
        assert_eq!(handle.join().unwrap(), first);
        let (second, handle) = sched.spawn(|| ());
        handle.join().unwrap();
        assert_eq!(second.as_raw(), first.as_raw() + 1);
        assert_eq!(sched.slot_count(), 0);

        // Signals to a finished task are dropped rather than re-creating its slot.
        sched.unblock(first);
        sched.interrupt(first);
        sched.cancel(second);
        assert_eq!(sched.blocked_on(first), None);
        assert_eq!(sched.slot_count(), 0);
    }

    #[test]
    fn cancellation_is_seen_at_next_point() {
        let sched = HostScheduler::new();
        let me = sched.current();
        assert!(!sched.enter_cancellation_point());
        sched.leave_cancellation_point();
        sched.cancel(me);
        assert!(sched.enter_cancellation_point());
        sched.leave_cancellation_point();
    }

    #[test]
    fn counting_allocator_enforces_budget() {
        let alloc = CountingAllocator::with_budget(1);
        let block = alloc.allocate(16).unwrap();
        assert!(block.capacity() >= 16);
        assert!(alloc.allocate(16).is_none());
        assert_eq!(alloc.allocations(), 2);
        alloc.free(block);
        assert_eq!(alloc.frees(), 1);
    }

    #[test]
    fn failing_notifier_records_attempt_only() {
        let notifier = RecordingNotifier::default();
        notifier.set_failing(true);
        let signo = SignalId::new(5).unwrap();
        assert_eq!(notifier.deliver(TaskId::from_raw(1), signo, NotifyValue(0)), Err(DeliveryFailed));
        assert_eq!(notifier.attempts(), 1);
        assert!(notifier.deliveries().is_empty());
    }
}
