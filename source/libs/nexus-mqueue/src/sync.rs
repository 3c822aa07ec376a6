// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Critical-section lock and RAII guards over the kernel collaborators
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: IrqLock::new()/lock(), IrqGuard, SchedLock::new(), CancellationPoint::enter()
//! DEPENDS_ON: spin::Mutex, kernel::{IrqControl, Scheduler}
//! INVARIANTS: Interrupts are masked before the spin lock is taken and restored only after it
//!             is released; every enter_cancellation_point() is paired with a leave

use core::ops::{Deref, DerefMut};

use crate::error::{MqError, Result};
use crate::kernel::{IrqControl, IrqState, Scheduler};

/// Spin lock taken with interrupts masked (`enter_critical_section`).
///
/// An interrupt handler running on the same CPU can therefore never spin on a
/// lock its own CPU already holds.
pub struct IrqLock<T> {
    inner: spin::Mutex<T>,
}

impl<T> IrqLock<T> {
    pub const fn new(value: T) -> Self {
        Self { inner: spin::Mutex::new(value) }
    }

    /// Masks interrupts through `irq`, then takes the lock.
    pub fn lock<'a>(&'a self, irq: &'a dyn IrqControl) -> IrqGuard<'a, T> {
        let state = irq.save_and_disable();
        let guard = self.inner.lock();
        IrqGuard { guard, _restore: IrqRestore { irq, state } }
    }

    /// Exclusive access without locking; `&mut self` proves no one else holds it.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

/// Guard returned by [`IrqLock::lock`].
// Field order matters: the spin guard drops (unlocks) before the mask is restored.
pub struct IrqGuard<'a, T> {
    guard: spin::MutexGuard<'a, T>,
    _restore: IrqRestore<'a>,
}

struct IrqRestore<'a> {
    irq: &'a dyn IrqControl,
    state: IrqState,
}

impl Drop for IrqRestore<'_> {
    fn drop(&mut self) {
        self.irq.restore(self.state);
    }
}

impl<T> Deref for IrqGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// Preemption lock held for the lifetime of the guard (`sched_lock`).
pub struct SchedLock<'a> {
    sched: &'a dyn Scheduler,
}

impl<'a> SchedLock<'a> {
    pub fn new(sched: &'a dyn Scheduler) -> Self {
        sched.lock();
        Self { sched }
    }
}

impl Drop for SchedLock<'_> {
    fn drop(&mut self) {
        self.sched.unlock();
    }
}

/// Cancellation point spanning one wait; left on drop.
pub struct CancellationPoint<'a> {
    sched: &'a dyn Scheduler,
}

impl<'a> CancellationPoint<'a> {
    /// Enters the cancellation point, failing with `Cancelled` (after leaving
    /// it again) if a cancellation is already pending.
    pub fn enter(sched: &'a dyn Scheduler) -> Result<Self> {
        let pending = sched.enter_cancellation_point();
        let point = Self { sched };
        if pending {
            return Err(MqError::Cancelled);
        }
        Ok(point)
    }
}

impl Drop for CancellationPoint<'_> {
    fn drop(&mut self) {
        self.sched.leave_cancellation_point();
    }
}
