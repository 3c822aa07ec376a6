// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Open queue descriptors: access mode, blocking mode and the caller-facing
//! send/receive/notify entry points.

use alloc::sync::Arc;

use bitflags::bitflags;

use crate::error::Result;
use crate::notify::{self, Notification};
use crate::queue::MessageQueue;
use crate::receive::{self, Received};
use crate::send;
use crate::types::{DescriptorId, Timespec};
use crate::wait::WaitDeadline;

bitflags! {
    /// Open mode of a descriptor (`O_RDONLY`/`O_WRONLY`/`O_RDWR`/`O_NONBLOCK`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const NONBLOCK = 1 << 2;
        const RDWR = Self::READ.bits() | Self::WRITE.bits();
    }
}

/// Queue attributes as reported to a descriptor holder (`struct mq_attr`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MqAttr {
    pub flags: OpenFlags,
    pub max_msgs: usize,
    pub max_msg_size: usize,
    pub cur_msgs: usize,
}

/// A task's handle on a queue.
///
/// Closing the descriptor (dropping it) removes any notification registered
/// through it.
#[derive(Debug)]
pub struct MqDescriptor {
    id: DescriptorId,
    flags: OpenFlags,
    queue: Arc<MessageQueue>,
}

impl MqDescriptor {
    pub fn open(queue: Arc<MessageQueue>, flags: OpenFlags) -> Self {
        let id = queue.subsystem().next_descriptor_id();
        Self { id, flags, queue }
    }

    pub fn id(&self) -> DescriptorId {
        self.id
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }

    pub(crate) fn is_nonblocking(&self) -> bool {
        self.flags.contains(OpenFlags::NONBLOCK)
    }

    /// `mq_send`: copies `payload` into the queue at `priority`, blocking while
    /// the queue is full unless the descriptor is non-blocking.
    pub fn send(&self, payload: &[u8], priority: u32) -> Result<()> {
        send::send(self, payload, priority, WaitDeadline::Infinite)
    }

    /// `mq_timedsend`: like [`send`](Self::send) but gives up at `deadline`.
    pub fn timed_send(&self, payload: &[u8], priority: u32, deadline: Timespec) -> Result<()> {
        send::send(self, payload, priority, WaitDeadline::At(deadline))
    }

    /// `mq_receive`: removes the highest-priority message into `buf`.
    /// `buf` must hold at least `max_msg_size` bytes.
    pub fn receive(&self, buf: &mut [u8]) -> Result<Received> {
        receive::receive(self, buf, WaitDeadline::Infinite)
    }

    pub fn timed_receive(&self, buf: &mut [u8], deadline: Timespec) -> Result<Received> {
        receive::receive(self, buf, WaitDeadline::At(deadline))
    }

    /// `mq_notify`: `Some` registers the calling task, `None` removes its registration.
    pub fn notify(&self, request: Option<Notification>) -> Result<()> {
        let pid = self.queue.scheduler().current_task();
        notify::register(&self.queue, pid, self.id, request)
    }

    /// `mq_getattr`
    pub fn attr(&self) -> MqAttr {
        let attr = self.queue.attr();
        MqAttr {
            flags: self.flags,
            max_msgs: attr.max_msgs,
            max_msg_size: attr.max_msg_size,
            cur_msgs: self.queue.len(),
        }
    }

    /// `mq_setattr`: only `NONBLOCK` is taken from `flags`. Returns the
    /// attributes in effect before the change.
    pub fn set_attr(&mut self, flags: OpenFlags) -> MqAttr {
        let old = self.attr();
        self.flags.set(OpenFlags::NONBLOCK, flags.contains(OpenFlags::NONBLOCK));
        old
    }
}

impl Drop for MqDescriptor {
    fn drop(&mut self) {
        notify::detach_descriptor(&self.queue, self.id);
    }
}
