// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Queue objects and the subsystem that owns the shared message pool
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: MqSubsystem::new()/create_queue()/pool(), MessageQueue (attr/len/waiting_*)
//! DEPENDS_ON: pool::MessagePool, store::MessageList, wait::WaitList, notify::Registration
//! INVARIANTS:
//!   - messages.len() <= max_msgs at every lock release
//!   - all QueueState mutation happens under the queue's IrqLock
//!   - dropping a queue returns every queued node to the pool

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use log::debug;

use crate::config::{PoolConfig, QueueAttr};
use crate::error::Result;
use crate::kernel::{KernelServices, NotificationSink, Scheduler};
use crate::notify::Registration;
use crate::pool::MessagePool;
use crate::store::MessageList;
use crate::sync::{IrqGuard, IrqLock};
use crate::types::DescriptorId;
use crate::wait::WaitList;

/// Process-wide queue state: the message pool plus the kernel collaborators
/// every queue runs against.
pub struct MqSubsystem {
    pool: MessagePool,
    services: KernelServices,
    next_queue: AtomicU32,
    next_descriptor: AtomicU32,
}

impl MqSubsystem {
    /// Preallocates the pool. Fails with `OutOfMemory` if the allocator cannot
    /// supply the configured nodes.
    pub fn new(config: PoolConfig, services: KernelServices) -> Result<Arc<Self>> {
        let pool = MessagePool::new(config, services.irq.clone(), services.allocator.clone())?;
        Ok(Arc::new(Self {
            pool,
            services,
            next_queue: AtomicU32::new(1),
            next_descriptor: AtomicU32::new(1),
        }))
    }

    /// Creates an empty queue. `max_msg_size` may not exceed the node size.
    pub fn create_queue(self: &Arc<Self>, attr: QueueAttr) -> Result<Arc<MessageQueue>> {
        attr.validate(self.pool.config())?;
        let messages = MessageList::try_with_capacity(attr.max_msgs)?;
        let id = self.next_queue.fetch_add(1, Ordering::Relaxed);
        debug!("mqueue: queue {id} created max_msgs={} max_msg_size={}", attr.max_msgs, attr.max_msg_size);
        Ok(Arc::new(MessageQueue {
            id,
            attr,
            state: IrqLock::new(QueueState {
                messages,
                max_msgs: attr.max_msgs,
                senders: WaitList::default(),
                receivers: WaitList::default(),
                notification: None,
            }),
            subsystem: Arc::clone(self),
        }))
    }

    pub fn pool(&self) -> &MessagePool {
        &self.pool
    }

    pub fn services(&self) -> &KernelServices {
        &self.services
    }

    pub(crate) fn next_descriptor_id(&self) -> DescriptorId {
        DescriptorId::from_raw(self.next_descriptor.fetch_add(1, Ordering::Relaxed))
    }
}

impl core::fmt::Debug for MqSubsystem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MqSubsystem").field("pool", &self.pool.stats()).finish_non_exhaustive()
    }
}

/// Mutable state of one queue; only reachable through the queue lock.
#[derive(Debug)]
pub(crate) struct QueueState {
    pub(crate) messages: MessageList,
    pub(crate) max_msgs: usize,
    pub(crate) senders: WaitList,
    pub(crate) receivers: WaitList,
    pub(crate) notification: Option<Registration>,
}

impl QueueState {
    pub(crate) fn is_full(&self) -> bool {
        self.messages.len() >= self.max_msgs
    }
}

/// A bounded, priority-ordered message queue.
pub struct MessageQueue {
    id: u32,
    attr: QueueAttr,
    state: IrqLock<QueueState>,
    subsystem: Arc<MqSubsystem>,
}

static_assertions::assert_impl_all!(MessageQueue: Send, Sync);
static_assertions::assert_impl_all!(MqSubsystem: Send, Sync);

impl MessageQueue {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn attr(&self) -> QueueAttr {
        self.attr
    }

    /// Messages currently queued.
    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.lock().is_full()
    }

    /// Tasks blocked waiting for a free slot (`nwaitnotfull`).
    pub fn waiting_to_send(&self) -> usize {
        self.lock().senders.len()
    }

    /// Tasks blocked waiting for a message (`nwaitnotempty`).
    pub fn waiting_to_receive(&self) -> usize {
        self.lock().receivers.len()
    }

    pub fn has_notification(&self) -> bool {
        self.lock().notification.is_some()
    }

    pub fn subsystem(&self) -> &Arc<MqSubsystem> {
        &self.subsystem
    }

    pub(crate) fn lock(&self) -> IrqGuard<'_, QueueState> {
        self.state.lock(&*self.subsystem.services.irq)
    }

    pub(crate) fn scheduler(&self) -> &dyn Scheduler {
        &*self.subsystem.services.scheduler
    }

    pub(crate) fn notifier(&self) -> &dyn NotificationSink {
        &*self.subsystem.services.notifier
    }

    pub(crate) fn pool(&self) -> &MessagePool {
        &self.subsystem.pool
    }
}

impl Drop for MessageQueue {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let drained = state.messages.len();
        for node in state.messages.drain() {
            self.subsystem.pool.release(node);
        }
        if drained > 0 {
            debug!("mqueue: queue {} dropped, {drained} queued messages released", self.id);
        }
    }
}

impl core::fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MessageQueue").field("id", &self.id).field("attr", &self.attr).finish_non_exhaustive()
    }
}
