// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: One-shot "message arrived" notification per queue (mq_notify)
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: Notification; crate-internal register/detach_descriptor/deliver_if_registered
//! DEPENDS_ON: kernel::NotificationSink, queue::MessageQueue
//! INVARIANTS:
//!   - at most one registration per queue
//!   - a registration is consumed by the first delivery attempt, even a failed one
//!   - the sink is called with no queue lock held

use log::{debug, warn};

use crate::error::{MqError, Result};
use crate::queue::MessageQueue;
use crate::types::{DescriptorId, NotifyValue, SignalId, TaskId};

/// What a registering task asks to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    pub signo: SignalId,
    pub value: NotifyValue,
}

impl Notification {
    pub const fn new(signo: SignalId, value: NotifyValue) -> Self {
        Self { signo, value }
    }
}

/// Registration stored in the queue state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Registration {
    pid: TaskId,
    descriptor: DescriptorId,
    notification: Notification,
}

/// Registers (`Some`) or removes (`None`) the notification of `pid` made
/// through `descriptor`.
pub(crate) fn register(
    queue: &MessageQueue,
    pid: TaskId,
    descriptor: DescriptorId,
    request: Option<Notification>,
) -> Result<()> {
    let mut state = queue.lock();
    match (request, state.notification) {
        (Some(_), Some(_)) => Err(MqError::ResourceBusy),
        (Some(notification), None) => {
            state.notification = Some(Registration { pid, descriptor, notification });
            drop(state);
            debug!("mqueue: {pid} registered for signal {}", notification.signo.as_raw());
            Ok(())
        }
        (None, Some(current)) if current.pid == pid => {
            state.notification = None;
            Ok(())
        }
        (None, Some(_)) => Err(MqError::ResourceBusy),
        (None, None) => Ok(()),
    }
}

/// Drops the registration made through `descriptor`, if any (descriptor close).
pub(crate) fn detach_descriptor(queue: &MessageQueue, descriptor: DescriptorId) {
    let mut state = queue.lock();
    if state.notification.is_some_and(|r| r.descriptor == descriptor) {
        state.notification = None;
    }
}

/// Consumes the registration and delivers it. Returns `true` if a
/// registration existed.
pub(crate) fn deliver_if_registered(queue: &MessageQueue) -> bool {
    let Some(reg) = queue.lock().notification.take() else {
        return false;
    };
    let Notification { signo, value } = reg.notification;
    if queue.notifier().deliver(reg.pid, signo, value).is_err() {
        warn!("mqueue: notification to {} (signal {}) not delivered", reg.pid, signo.as_raw());
    }
    true
}
