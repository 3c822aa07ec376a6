// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Receive path: wait for a message, unlink the head of the queue, copy it
//! out, return the node to the pool and wake one blocked sender.

use log::trace;

use crate::descriptor::{MqDescriptor, OpenFlags};
use crate::error::{MqError, Result};
use crate::sync::SchedLock;
use crate::types::Priority;
use crate::wait::{self, WaitDeadline};

/// Result of a successful receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    /// Bytes written to the start of the caller's buffer.
    pub len: usize,
    pub priority: Priority,
}

pub(crate) fn verify(desc: &MqDescriptor, buf: &[u8]) -> Result<()> {
    if !desc.flags().contains(OpenFlags::READ) {
        return Err(MqError::PermissionDenied);
    }
    if buf.len() < desc.queue().attr().max_msg_size {
        return Err(MqError::MessageTooLarge);
    }
    Ok(())
}

pub(crate) fn receive(desc: &MqDescriptor, buf: &mut [u8], deadline: WaitDeadline) -> Result<Received> {
    verify(desc, buf)?;
    let queue = desc.queue();

    let mut state = wait::wait_until_receivable(queue, desc.is_nonblocking(), deadline)?;
    let _preempt = SchedLock::new(queue.scheduler());
    let Some(node) = state.messages.remove_highest() else {
        panic!("mqueue: queue {} admitted a receiver while empty", queue.id());
    };
    drop(state);

    let len = node.len();
    buf[..len].copy_from_slice(node.payload());
    let priority = node.priority();
    queue.pool().release(node);
    trace!("mqueue: queue {} dequeued {len} bytes prio {}", queue.id(), priority.as_raw());

    wait::wake_one_sender(queue);
    Ok(Received { len, priority })
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::config::{PoolConfig, QueueAttr};
    use crate::host::HostKernel;
    use crate::queue::MqSubsystem;

    fn queue_pair() -> (MqDescriptor, MqDescriptor) {
        let kernel = HostKernel::new();
        let sub = MqSubsystem::new(PoolConfig::new().with_general(4), kernel.services()).unwrap();
        let queue = sub.create_queue(QueueAttr::new(4, 8)).unwrap();
        let tx = MqDescriptor::open(queue.clone(), OpenFlags::WRITE);
        let rx = MqDescriptor::open(queue, OpenFlags::READ | OpenFlags::NONBLOCK);
        (tx, rx)
    }

    #[test]
    fn short_buffer_rejected() {
        let (tx, rx) = queue_pair();
        tx.send(b"abc", 1).unwrap();
        let mut small = [0_u8; 7];
        assert_eq!(rx.receive(&mut small), Err(MqError::MessageTooLarge));
        assert_eq!(rx.queue().len(), 1);
    }

    #[test]
    fn write_only_descriptor_cannot_receive() {
        let (tx, _rx) = queue_pair();
        let mut buf = [0_u8; 8];
        assert_eq!(tx.receive(&mut buf), Err(MqError::PermissionDenied));
    }

    #[test]
    fn receive_copies_payload_and_priority() {
        let (tx, rx) = queue_pair();
        tx.send(b"low", 1).unwrap();
        tx.send(b"high", 9).unwrap();
        let mut buf = [0_u8; 8];
        let got = rx.receive(&mut buf).unwrap();
        assert_eq!(got, Received { len: 4, priority: Priority::new(9).unwrap() });
        assert_eq!(&buf[..got.len], b"high");
        let got = rx.receive(&mut buf).unwrap();
        assert_eq!(&buf[..got.len], b"low");
        assert_eq!(rx.receive(&mut buf), Err(MqError::WouldBlock));
    }

    #[test]
    fn received_nodes_return_to_pool() {
        let (tx, rx) = queue_pair();
        let pool = tx.queue().pool();
        let before = pool.stats();
        tx.send(b"m", 0).unwrap();
        assert_eq!(pool.stats().general_free, before.general_free - 1);
        rx.receive(&mut [0_u8; 8]).unwrap();
        assert_eq!(pool.stats(), before);
    }
}
