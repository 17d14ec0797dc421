// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Names of the four bridge segments. The host publishes a 6-character id per
// segment; the POSIX name is a fixed prefix followed by that id.

use std::fmt;

/// The four shared memory segments the host authors for one bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    AudioPool,
    RtClient,
    NonRtClient,
    NonRtServer,
}

impl SegmentKind {
    pub const ALL: [SegmentKind; 4] = [
        SegmentKind::AudioPool,
        SegmentKind::RtClient,
        SegmentKind::NonRtClient,
        SegmentKind::NonRtServer,
    ];

    /// Prefix placed in front of the host-supplied id.
    pub fn prefix(self) -> &'static str {
        match self {
            SegmentKind::AudioPool => "crlbrdg_shm_ap_",
            SegmentKind::RtClient => "crlbrdg_shm_rtC_",
            SegmentKind::NonRtClient => "crlbrdg_shm_nonrtC_",
            SegmentKind::NonRtServer => "crlbrdg_shm_nonrtS_",
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentKind::AudioPool => write!(f, "audio pool"),
            SegmentKind::RtClient => write!(f, "rt client control"),
            SegmentKind::NonRtClient => write!(f, "non-rt client control"),
            SegmentKind::NonRtServer => write!(f, "non-rt server control"),
        }
    }
}

/// Produce a POSIX shm-safe name (with leading '/').
pub fn make_shm_name(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    }
}

/// Segment name (without the leading '/') for `kind` and a host id.
pub fn segment_name(kind: SegmentKind, id: &str) -> String {
    format!("{}{id}", kind.prefix())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_shm_name_prepends_slash() {
        let name = make_shm_name("foo");
        assert_eq!(name, "/foo");
    }

    #[test]
    fn make_shm_name_keeps_existing_slash() {
        assert_eq!(make_shm_name("/bar"), "/bar");
    }

    #[test]
    fn segment_names_fit_macos_limit() {
        // PSHMNAMLEN is 31 on macOS, including the leading '/'.
        for kind in SegmentKind::ALL {
            let name = make_shm_name(&segment_name(kind, "abcdef"));
            assert!(name.len() <= 31, "{name} too long");
        }
    }

    #[test]
    fn segment_name_uses_prefix() {
        assert_eq!(segment_name(SegmentKind::RtClient, "Xy12Zq"), "crlbrdg_shm_rtC_Xy12Zq");
    }
}
