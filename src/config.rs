// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Startup configuration: the two environment tokens the host sets before it
// launches the application, plus timing tunables.

use std::env;
use std::time::Duration;

use crate::error::{BridgeError, Result};
use crate::shm_name::{segment_name, SegmentKind};

/// Four 6-character segment ids, concatenated.
pub const SHM_IDS_ENV: &str = "CARLA_SHM_IDS";
/// Port counts and flags, one character each.
pub const SETUP_ENV: &str = "CARLA_LIBJACK_SETUP";

pub const SEGMENT_ID_LEN: usize = 6;
const SHM_IDS_LEN: usize = SEGMENT_ID_LEN * 4;
const SETUP_LEN: usize = 5;

/// Highest value of a port count character (`'0' + 64`).
pub const MAX_PORTS: u32 = 64;
/// Flags character is `'0'..'0' + 0x4f` (exclusive).
pub const FLAGS_LIMIT: u8 = 0x4f;

/// Host-supplied ids of the four segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentIds {
    pub audio_pool: String,
    pub rt_client: String,
    pub nonrt_client: String,
    pub nonrt_server: String,
}

impl SegmentIds {
    /// Parse the 24-character `CARLA_SHM_IDS` token.
    pub fn parse(token: &str) -> Result<Self> {
        let invalid = |reason: String| BridgeError::InvalidToken {
            name: SHM_IDS_ENV,
            reason,
        };
        if !token.is_ascii() {
            return Err(invalid("not ASCII".into()));
        }
        if token.len() != SHM_IDS_LEN {
            return Err(invalid(format!(
                "expected {SHM_IDS_LEN} characters, got {}",
                token.len()
            )));
        }
        let id = |i: usize| token[i * SEGMENT_ID_LEN..(i + 1) * SEGMENT_ID_LEN].to_string();
        Ok(Self {
            audio_pool: id(0),
            rt_client: id(1),
            nonrt_client: id(2),
            nonrt_server: id(3),
        })
    }

    pub fn id(&self, kind: SegmentKind) -> &str {
        match kind {
            SegmentKind::AudioPool => &self.audio_pool,
            SegmentKind::RtClient => &self.rt_client,
            SegmentKind::NonRtClient => &self.nonrt_client,
            SegmentKind::NonRtServer => &self.nonrt_server,
        }
    }

    /// Shared memory name of one segment.
    pub fn segment_name(&self, kind: SegmentKind) -> String {
        segment_name(kind, self.id(kind))
    }

    pub fn to_token(&self) -> String {
        format!(
            "{}{}{}{}",
            self.audio_pool, self.rt_client, self.nonrt_client, self.nonrt_server
        )
    }
}

/// Static port counts negotiated with the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortCounts {
    pub audio_ins: u32,
    pub audio_outs: u32,
    pub midi_ins: u32,
    pub midi_outs: u32,
}

/// Parsed `CARLA_LIBJACK_SETUP` token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Setup {
    pub ports: PortCounts,
    pub flags: u8,
}

impl Setup {
    /// Parse the 5-character `CARLA_LIBJACK_SETUP` token.
    pub fn parse(token: &str) -> Result<Self> {
        let invalid = |reason: String| BridgeError::InvalidToken {
            name: SETUP_ENV,
            reason,
        };
        let bytes = token.as_bytes();
        if bytes.len() != SETUP_LEN {
            return Err(invalid(format!(
                "expected {SETUP_LEN} characters, got {}",
                bytes.len()
            )));
        }

        let mut counts = [0u32; 4];
        for (i, count) in counts.iter_mut().enumerate() {
            let c = bytes[i];
            if !(b'0'..=b'0' + MAX_PORTS as u8).contains(&c) {
                return Err(invalid(format!("port count {i} out of range: {c:#x}")));
            }
            *count = u32::from(c - b'0');
        }
        let f = bytes[4];
        if !(b'0'..b'0' + FLAGS_LIMIT).contains(&f) {
            return Err(invalid(format!("flags out of range: {f:#x}")));
        }

        Ok(Self {
            ports: PortCounts {
                audio_ins: counts[0],
                audio_outs: counts[1],
                midi_ins: counts[2],
                midi_outs: counts[3],
            },
            flags: f - b'0',
        })
    }

    pub fn to_token(&self) -> String {
        let p = &self.ports;
        [p.audio_ins, p.audio_outs, p.midi_ins, p.midi_outs]
            .iter()
            .map(|&n| char::from(b'0' + n as u8))
            .chain(std::iter::once(char::from(b'0' + self.flags)))
            .collect()
    }
}

/// Timing tunables of the two engine threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Sleep between non-realtime channel polls.
    pub nonrt_poll: Duration,
    /// Deadline of one realtime wait for the host.
    pub rt_wait: Duration,
    /// Host silence after which the bridge stops on its own.
    pub liveness_timeout: Duration,
    /// Bounded wait when joining an engine thread.
    pub join_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            nonrt_poll: Duration::from_millis(50),
            rt_wait: Duration::from_secs(1),
            liveness_timeout: Duration::from_secs(30),
            join_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub segments: SegmentIds,
    pub setup: Setup,
    pub timing: Timing,
}

impl BridgeConfig {
    pub fn new(segments: SegmentIds, setup: Setup) -> Self {
        Self {
            segments,
            setup,
            timing: Timing::default(),
        }
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Parse both tokens from the environment.
    pub fn from_tokens(shm_ids: &str, setup: &str) -> Result<Self> {
        Ok(Self::new(SegmentIds::parse(shm_ids)?, Setup::parse(setup)?))
    }

    /// Read and validate both tokens, then remove `CARLA_SHM_IDS` so child
    /// processes of the application do not attach to the same segments.
    pub fn from_env() -> Result<Self> {
        let shm_ids = env::var(SHM_IDS_ENV).map_err(|_| BridgeError::MissingEnv(SHM_IDS_ENV))?;
        let setup = env::var(SETUP_ENV).map_err(|_| BridgeError::MissingEnv(SETUP_ENV))?;
        let config = Self::from_tokens(&shm_ids, &setup)?;
        env::remove_var(SHM_IDS_ENV);
        Ok(config)
    }
}
