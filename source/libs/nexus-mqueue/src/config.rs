// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Build-time defaults and runtime sizing for the message queue core
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: PoolConfig, QueueAttr, MQ_PRIO_MAX, MAX_SIGNO, CONFIG_* defaults
//! INVARIANTS: Node payload capacity bounds every queue's max_msg_size; 0 < max_msgs <= CONFIG_MQ_MAXMSGS

use crate::error::{MqError, Result};

/// Highest accepted message priority (inclusive).
pub const MQ_PRIO_MAX: u32 = 32;

/// Highest signal number a notification may carry.
pub const MAX_SIGNO: u8 = 31;

/// Nodes preallocated on the general free list at subsystem start.
pub const CONFIG_PREALLOC_MQ_MSGS: usize = 32;

/// Nodes reserved for interrupt-context allocation.
pub const CONFIG_PREALLOC_MQ_IRQ_MSGS: usize = 8;

/// Payload capacity of one message node, in bytes.
pub const CONFIG_MQ_MAXMSGSIZE: usize = 32;

/// Default queue depth used by `QueueAttr::default()`.
pub const CONFIG_MQ_DEFAULT_MAXMSGS: usize = 8;

/// Deepest queue `create_queue` accepts.
pub const CONFIG_MQ_MAXMSGS: usize = 256;

static_assertions::const_assert!(CONFIG_MQ_MAXMSGSIZE > 0);
static_assertions::const_assert!(MQ_PRIO_MAX <= u8::MAX as u32);
static_assertions::const_assert!(CONFIG_MQ_DEFAULT_MAXMSGS <= CONFIG_MQ_MAXMSGS);

/// Sizing of the process-wide message pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    general: usize,
    irq_reserve: usize,
    node_bytes: usize,
}

impl PoolConfig {
    pub const fn new() -> Self {
        Self {
            general: CONFIG_PREALLOC_MQ_MSGS,
            irq_reserve: CONFIG_PREALLOC_MQ_IRQ_MSGS,
            node_bytes: CONFIG_MQ_MAXMSGSIZE,
        }
    }

    /// Number of nodes on the general free list.
    pub const fn with_general(mut self, count: usize) -> Self {
        self.general = count;
        self
    }

    /// Number of nodes held back for interrupt handlers.
    pub const fn with_irq_reserve(mut self, count: usize) -> Self {
        self.irq_reserve = count;
        self
    }

    /// Payload capacity of every node (pooled and dynamic).
    pub const fn with_node_bytes(mut self, bytes: usize) -> Self {
        self.node_bytes = bytes;
        self
    }

    pub const fn general(&self) -> usize {
        self.general
    }

    pub const fn irq_reserve(&self) -> usize {
        self.irq_reserve
    }

    pub const fn node_bytes(&self) -> usize {
        self.node_bytes
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.node_bytes == 0 {
            return Err(MqError::InvalidArgument);
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Creation attributes of a queue (`mq_attr` minus the flags).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueAttr {
    pub max_msgs: usize,
    pub max_msg_size: usize,
}

impl QueueAttr {
    pub const fn new(max_msgs: usize, max_msg_size: usize) -> Self {
        Self { max_msgs, max_msg_size }
    }

    /// Rejects empty or over-deep queues and message sizes the pool nodes
    /// cannot hold.
    pub(crate) fn validate(&self, pool: &PoolConfig) -> Result<()> {
        if self.max_msgs == 0 || self.max_msgs > CONFIG_MQ_MAXMSGS {
            return Err(MqError::InvalidArgument);
        }
        if self.max_msg_size == 0 || self.max_msg_size > pool.node_bytes {
            return Err(MqError::InvalidArgument);
        }
        Ok(())
    }
}

impl Default for QueueAttr {
    fn default() -> Self {
        Self::new(CONFIG_MQ_DEFAULT_MAXMSGS, CONFIG_MQ_MAXMSGSIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_kernel_config() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.general(), CONFIG_PREALLOC_MQ_MSGS);
        assert_eq!(cfg.irq_reserve(), CONFIG_PREALLOC_MQ_IRQ_MSGS);
        assert_eq!(cfg.node_bytes(), CONFIG_MQ_MAXMSGSIZE);
        assert!(QueueAttr::default().validate(&cfg).is_ok());
    }

    #[test]
    fn queue_attr_rejects_oversized_messages() {
        let cfg = PoolConfig::new().with_node_bytes(16);
        assert_eq!(QueueAttr::new(4, 17).validate(&cfg), Err(MqError::InvalidArgument));
        assert_eq!(QueueAttr::new(0, 8).validate(&cfg), Err(MqError::InvalidArgument));
        assert!(QueueAttr::new(4, 16).validate(&cfg).is_ok());
    }

    #[test]
    fn queue_attr_bounds_depth() {
        let cfg = PoolConfig::new();
        assert!(QueueAttr::new(CONFIG_MQ_MAXMSGS, 8).validate(&cfg).is_ok());
        assert_eq!(QueueAttr::new(CONFIG_MQ_MAXMSGS + 1, 8).validate(&cfg), Err(MqError::InvalidArgument));
        assert_eq!(QueueAttr::new(usize::MAX, 8).validate(&cfg), Err(MqError::InvalidArgument));
    }

    #[test]
    fn zero_byte_nodes_rejected() {
        assert_eq!(PoolConfig::new().with_node_bytes(0).validate(), Err(MqError::InvalidArgument));
    }
}
