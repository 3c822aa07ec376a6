// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Message node pool with task-context and interrupt-context entry points
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: MessagePool (new/acquire/release/isr/stats), IsrPool, IsrNode, MessageNode
//! DEPENDS_ON: sync::IrqLock, kernel::{IrqControl, NodeAllocator}
//! INVARIANTS:
//!   - MessageNode is move-only: a node sits on a free list, in one queue, or with one caller
//!   - IsrPool never reaches the allocator and never blocks
//!   - pooled nodes go back to the list they came from; dynamic nodes go back to the allocator
//!
//! The free lists are stacks of nodes preallocated once at subsystem start.
//! Because a node is moved rather than linked, the type system rules out a
//! node being reachable from a free list and a queue at the same time.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, warn};

use crate::config::PoolConfig;
use crate::error::{MqError, Result};
use crate::kernel::{IrqControl, NodeAllocator};
use crate::sync::IrqLock;
use crate::types::Priority;

/// Where a node was obtained from; decides where `release` sends it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOrigin {
    /// Preallocated, general free list.
    General,
    /// Preallocated, reserved for interrupt handlers.
    IrqReserve,
    /// Obtained from the kernel heap because the general list was empty.
    Dynamic,
}

/// One buffered message.
#[derive(Debug)]
pub struct MessageNode {
    priority: Priority,
    origin: NodeOrigin,
    mail: Vec<u8>,
}

impl MessageNode {
    fn new(origin: NodeOrigin, mut mail: Vec<u8>) -> Self {
        mail.clear();
        Self { priority: Priority::MIN, origin, mail }
    }

    #[inline]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    #[inline]
    pub fn origin(&self) -> NodeOrigin {
        self.origin
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mail.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mail.is_empty()
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.mail
    }

    /// Stamps priority and copies `payload` in. The caller has already bounded
    /// the length by the queue's message size, which never exceeds the node size.
    pub(crate) fn fill(&mut self, priority: Priority, payload: &[u8]) {
        debug_assert!(payload.len() <= self.mail.capacity());
        self.priority = priority;
        self.mail.clear();
        self.mail.extend_from_slice(payload);
    }

    #[cfg(test)]
    pub(crate) fn detached(priority: Priority, payload: &[u8]) -> Self {
        let mut node = Self::new(NodeOrigin::Dynamic, Vec::with_capacity(payload.len()));
        node.fill(priority, payload);
        node
    }

    fn recycle(mut self) -> Self {
        self.mail.clear();
        self.priority = Priority::MIN;
        self
    }
}

/// A node handed out in interrupt context. It is never dynamic, so returning
/// it through [`IsrPool::release`] cannot reach the allocator.
#[derive(Debug)]
pub struct IsrNode(MessageNode);

impl IsrNode {
    pub fn origin(&self) -> NodeOrigin {
        self.0.origin
    }

    /// Hands the node over to task context.
    pub fn into_node(self) -> MessageNode {
        self.0
    }
}

struct FreeLists {
    general: Vec<MessageNode>,
    irq: Vec<MessageNode>,
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub general_free: usize,
    pub irq_free: usize,
    pub dynamic_live: usize,
}

/// Process-wide message node pool.
pub struct MessagePool {
    lists: IrqLock<FreeLists>,
    irq: Arc<dyn IrqControl>,
    allocator: Arc<dyn NodeAllocator>,
    config: PoolConfig,
    dynamic_live: AtomicUsize,
}

impl MessagePool {
    /// Preallocates both free lists. Runs once at subsystem start.
    pub fn new(
        config: PoolConfig,
        irq: Arc<dyn IrqControl>,
        allocator: Arc<dyn NodeAllocator>,
    ) -> Result<Self> {
        config.validate()?;
        let general = Self::preallocate(&*allocator, config.general(), NodeOrigin::General, &config)?;
        let irq_nodes =
            match Self::preallocate(&*allocator, config.irq_reserve(), NodeOrigin::IrqReserve, &config) {
                Ok(nodes) => nodes,
                Err(err) => {
                    Self::free_all(&*allocator, general);
                    return Err(err);
                }
            };
        debug!(
            "mqueue: pool ready general={} irq={} node_bytes={}",
            general.len(),
            irq_nodes.len(),
            config.node_bytes()
        );
        Ok(Self {
            lists: IrqLock::new(FreeLists { general, irq: irq_nodes }),
            irq,
            allocator,
            config,
            dynamic_live: AtomicUsize::new(0),
        })
    }

    /// Allocates `count` nodes. On failure every block obtained so far,
    /// including an undersized one, has been handed back to `allocator`.
    fn preallocate(
        allocator: &dyn NodeAllocator,
        count: usize,
        origin: NodeOrigin,
        config: &PoolConfig,
    ) -> Result<Vec<MessageNode>> {
        let mut nodes = Vec::new();
        nodes.try_reserve_exact(count).map_err(|_| MqError::OutOfMemory)?;
        let bytes = config.node_bytes();
        for _ in 0..count {
            match allocator.allocate(bytes) {
                Some(block) if block.capacity() >= bytes => nodes.push(MessageNode::new(origin, block)),
                short => {
                    if let Some(block) = short {
                        allocator.free(block);
                    }
                    warn!("mqueue: preallocation stopped after {} of {count} nodes", nodes.len());
                    Self::free_all(allocator, nodes);
                    return Err(MqError::OutOfMemory);
                }
            }
        }
        Ok(nodes)
    }

    fn free_all(allocator: &dyn NodeAllocator, nodes: Vec<MessageNode>) {
        for node in nodes {
            allocator.free(node.mail);
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Task-context allocation: general free list first, then the kernel heap.
    pub fn acquire(&self) -> Result<MessageNode> {
        if let Some(node) = self.lists.lock(&*self.irq).general.pop() {
            return Ok(node);
        }

        let bytes = self.config.node_bytes();
        match self.allocator.allocate(bytes) {
            Some(block) if block.capacity() >= bytes => {
                let live = self.dynamic_live.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("mqueue: general pool empty, dynamic node allocated (live={live})");
                Ok(MessageNode::new(NodeOrigin::Dynamic, block))
            }
            Some(block) => {
                self.allocator.free(block);
                warn!("mqueue: allocator returned undersized block ({bytes} bytes requested)");
                Err(MqError::OutOfMemory)
            }
            None => {
                warn!("mqueue: general pool empty and kernel heap exhausted");
                Err(MqError::OutOfMemory)
            }
        }
    }

    /// Returns a node to where it came from.
    pub fn release(&self, node: MessageNode) {
        match node.origin {
            NodeOrigin::Dynamic => {
                self.dynamic_live.fetch_sub(1, Ordering::Relaxed);
                self.allocator.free(node.mail);
            }
            NodeOrigin::General => self.lists.lock(&*self.irq).general.push(node.recycle()),
            NodeOrigin::IrqReserve => self.lists.lock(&*self.irq).irq.push(node.recycle()),
        }
    }

    /// Interrupt-context view of the pool.
    pub fn isr(&self) -> IsrPool<'_> {
        IsrPool { lists: &self.lists, irq: &*self.irq }
    }

    pub fn stats(&self) -> PoolStats {
        let lists = self.lists.lock(&*self.irq);
        PoolStats {
            general_free: lists.general.len(),
            irq_free: lists.irq.len(),
            dynamic_live: self.dynamic_live.load(Ordering::Relaxed),
        }
    }
}

/// Interrupt-safe pool entry point: free lists only, no allocator, no blocking.
pub struct IsrPool<'a> {
    lists: &'a IrqLock<FreeLists>,
    irq: &'a dyn IrqControl,
}

impl IsrPool<'_> {
    /// General free list first, then the interrupt reserve.
    pub fn acquire(&self) -> Result<IsrNode> {
        let mut lists = self.lists.lock(self.irq);
        match lists.general.pop().or_else(|| lists.irq.pop()) {
            Some(node) => Ok(IsrNode(node)),
            None => Err(MqError::ResourceBusy),
        }
    }

    pub fn release(&self, node: IsrNode) {
        let node = node.0.recycle();
        let mut lists = self.lists.lock(self.irq);
        match node.origin {
            NodeOrigin::IrqReserve => lists.irq.push(node),
            _ => lists.general.push(node),
        }
    }
}
