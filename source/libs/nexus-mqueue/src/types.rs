// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Newtypes shared by the queue core and its collaborators
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: TaskId, Priority, SignalId, NotifyValue, Timestamp, Timespec, DescriptorId
//! INVARIANTS: Priority <= MQ_PRIO_MAX; SignalId <= MAX_SIGNO; Timespec nsec in 0..1e9

use core::fmt;
use core::time::Duration;

use crate::config::{MAX_SIGNO, MQ_PRIO_MAX};
use crate::error::{MqError, Result};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Identifier of a schedulable task, as handed out by the scheduler.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TaskId(u32);

impl TaskId {
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Message priority; larger values are delivered first.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Priority(u8);

impl Priority {
    pub const MIN: Self = Self(0);
    pub const MAX: Self = Self(MQ_PRIO_MAX as u8);

    /// Validates a caller-supplied priority against `MQ_PRIO_MAX`.
    #[inline]
    pub fn new(raw: u32) -> Result<Self> {
        if raw > MQ_PRIO_MAX {
            return Err(MqError::InvalidArgument);
        }
        Ok(Self(raw as u8))
    }

    #[inline]
    pub const fn as_raw(self) -> u32 {
        self.0 as u32
    }
}

/// Signal number carried by a queue notification.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SignalId(u8);

impl SignalId {
    pub fn new(raw: u8) -> Result<Self> {
        if raw > MAX_SIGNO {
            return Err(MqError::InvalidArgument);
        }
        Ok(Self(raw))
    }

    #[inline]
    pub const fn as_raw(self) -> u8 {
        self.0
    }
}

/// Opaque payload delivered along with a notification (`sigval`).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct NotifyValue(pub usize);

/// Identity of one open descriptor; used to detach notifications on close.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct DescriptorId(u32);

impl DescriptorId {
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

/// Point on the scheduler's monotonic clock, in nanoseconds.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn saturating_add(self, delta: Duration) -> Self {
        let delta = u64::try_from(delta.as_nanos()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(delta))
    }

    /// Time left until `self` when observed at `now`; zero once passed.
    pub fn remaining_from(self, now: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(now.0))
    }

    #[inline]
    pub fn has_passed(self, now: Timestamp) -> bool {
        now >= self
    }
}

/// Absolute deadline as passed to the timed operations (`struct timespec`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

impl Timespec {
    pub const fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec }
    }

    /// Converts to a clock timestamp, rejecting malformed values.
    pub fn to_timestamp(self) -> Result<Timestamp> {
        if self.sec < 0 || self.nsec < 0 || self.nsec >= NANOS_PER_SEC as i64 {
            return Err(MqError::InvalidArgument);
        }
        let nanos = (self.sec as u64)
            .saturating_mul(NANOS_PER_SEC)
            .saturating_add(self.nsec as u64);
        Ok(Timestamp(nanos))
    }
}

impl From<Timestamp> for Timespec {
    fn from(ts: Timestamp) -> Self {
        Self { sec: (ts.0 / NANOS_PER_SEC) as i64, nsec: (ts.0 % NANOS_PER_SEC) as i64 }
    }
}
