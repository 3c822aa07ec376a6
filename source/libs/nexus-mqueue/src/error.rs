// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Failure kinds returned by every queue operation.
//!
//! Callers translate these into their own reporting convention (errno,
//! syscall return codes). A corrupted wait protocol is not representable
//! here: it aborts the kernel instead of returning.

use thiserror::Error;

use crate::kernel::WaitOutcome;

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, MqError>;

/// Discriminated failure kinds of the message queue core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MqError {
    /// Bad priority, signal number, deadline or queue attributes.
    #[error("invalid argument")]
    InvalidArgument,
    /// Descriptor not opened with the access mode the operation needs.
    #[error("descriptor not opened for this operation")]
    PermissionDenied,
    /// Payload exceeds the queue's message size, or receive buffer is too small.
    #[error("message too large for queue")]
    MessageTooLarge,
    /// Non-blocking descriptor and the queue is full (send) or empty (receive).
    #[error("operation would block")]
    WouldBlock,
    /// A cancellation request was pending at the wait boundary.
    #[error("operation cancelled")]
    Cancelled,
    /// The absolute deadline elapsed while waiting.
    #[error("operation timed out")]
    TimedOut,
    /// A signal ended the wait before the queue became available.
    #[error("wait interrupted by signal")]
    Interrupted,
    /// Free list empty and the kernel allocator could not provide a node.
    #[error("out of memory")]
    OutOfMemory,
    /// Free lists empty in interrupt context, or a notification is already registered.
    #[error("resource busy")]
    ResourceBusy,
}

impl From<WaitOutcome> for MqError {
    /// Maps a failed wait onto the error returned to the caller. `Woken` is
    /// never converted on a success path; it maps to `Interrupted`.
    fn from(outcome: WaitOutcome) -> Self {
        match outcome {
            WaitOutcome::TimedOut => Self::TimedOut,
            WaitOutcome::Interrupted | WaitOutcome::Woken => Self::Interrupted,
        }
    }
}
