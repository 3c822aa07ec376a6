// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Send path: verify, acquire a node, wait for space, enqueue, notify, wake
//! OWNERS: @kernel-ipc-team
//! DEPENDS_ON: pool, wait, notify, store
//! INVARIANTS:
//!   - argument errors are reported before any node is acquired
//!   - a node acquired for a send that fails is returned to the pool
//!   - the copy and the insert happen under the queue lock with preemption disabled

use log::trace;

use crate::descriptor::{MqDescriptor, OpenFlags};
use crate::error::{MqError, Result};
use crate::notify;
use crate::sync::SchedLock;
use crate::types::Priority;
use crate::wait::{self, WaitDeadline};

/// Argument checks, in the order callers observe them.
pub(crate) fn verify(desc: &MqDescriptor, payload: &[u8], priority: u32) -> Result<Priority> {
    let priority = Priority::new(priority)?;
    if !desc.flags().contains(OpenFlags::WRITE) {
        return Err(MqError::PermissionDenied);
    }
    if payload.len() > desc.queue().attr().max_msg_size {
        return Err(MqError::MessageTooLarge);
    }
    Ok(priority)
}

pub(crate) fn send(
    desc: &MqDescriptor,
    payload: &[u8],
    priority: u32,
    deadline: WaitDeadline,
) -> Result<()> {
    let priority = verify(desc, payload, priority)?;
    let queue = desc.queue();
    let pool = queue.pool();

    let mut node = pool.acquire()?;
    let mut state = match wait::wait_until_sendable(queue, desc.is_nonblocking(), deadline) {
        Ok(state) => state,
        Err(err) => {
            pool.release(node);
            return Err(err);
        }
    };

    let _preempt = SchedLock::new(queue.scheduler());
    node.fill(priority, payload);
    state.messages.insert(node);
    let queued = state.messages.len();
    drop(state);
    trace!("mqueue: queue {} enqueued {} bytes prio {} ({queued} queued)", queue.id(), payload.len(), priority.as_raw());

    notify::deliver_if_registered(queue);
    wait::wake_one_receiver(queue);
    Ok(())
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::config::{PoolConfig, QueueAttr};
    use crate::host::HostKernel;
    use crate::queue::MqSubsystem;

    fn descriptor(flags: OpenFlags) -> MqDescriptor {
        let kernel = HostKernel::new();
        let sub = MqSubsystem::new(PoolConfig::new().with_general(4), kernel.services()).unwrap();
        let queue = sub.create_queue(QueueAttr::new(2, 8)).unwrap();
        MqDescriptor::open(queue, flags)
    }

    #[test]
    fn priority_checked_before_access_mode() {
        let desc = descriptor(OpenFlags::READ);
        assert_eq!(verify(&desc, b"x", 33), Err(MqError::InvalidArgument));
        assert_eq!(verify(&desc, b"x", 1), Err(MqError::PermissionDenied));
    }

    #[test]
    fn size_limit_is_inclusive() {
        let desc = descriptor(OpenFlags::WRITE);
        assert!(verify(&desc, &[0; 8], 0).is_ok());
        assert_eq!(verify(&desc, &[0; 9], 0), Err(MqError::MessageTooLarge));
        assert!(verify(&desc, &[], 0).is_ok());
    }

    #[test]
    fn failed_nonblocking_send_returns_node() {
        let desc = descriptor(OpenFlags::WRITE | OpenFlags::NONBLOCK);
        desc.send(b"a", 0).unwrap();
        desc.send(b"b", 0).unwrap();
        let pool = desc.queue().pool();
        let before = pool.stats();
        assert_eq!(desc.send(b"c", 0), Err(MqError::WouldBlock));
        assert_eq!(pool.stats(), before);
        assert_eq!(desc.queue().len(), 2);
    }
}
