// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error types for the bridge layer. The shared memory primitives below it
// return plain `io::Result`.

use std::io;

use thiserror::Error;

use crate::shm_name::SegmentKind;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),

    #[error("invalid {name} token: {reason}")]
    InvalidToken { name: &'static str, reason: String },

    #[error("failed to {action} {segment} shared memory: {source}")]
    SharedMemory {
        segment: SegmentKind,
        action: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{segment} data size mismatch: host declared {declared}, expected {expected}")]
    SizeMismatch {
        segment: SegmentKind,
        declared: u32,
        expected: u32,
    },

    #[error("unexpected handshake opcode {found}, expected {expected}")]
    UnexpectedOpcode { expected: &'static str, found: u32 },

    #[error("invalid initial state: buffer size {buffer_size}, sample rate {sample_rate}")]
    InvalidState { buffer_size: u32, sample_rate: f64 },

    #[error("unknown or stale client handle")]
    UnknownClient,

    #[error("failed to spawn {name} thread: {source}")]
    Thread {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl BridgeError {
    pub(crate) fn shm(segment: SegmentKind, action: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| BridgeError::SharedMemory {
            segment,
            action,
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
