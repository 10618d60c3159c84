//! Format registry: archive identities and the ordered signature table.
//!
//! # Priority rules
//! [`SIGNATURES`] is evaluated top to bottom and the first match wins. Exact
//! magic numbers at offset 0 come first, shortest and most specific before
//! longer ones; content-shape heuristics that need a full 512-byte block come
//! last. The table is a `static` and is never mutated.
//!
//! Zip and jar share the local-file-header magic. Zip is registered first,
//! so a jar stream auto-detects as zip; jar is reachable by name only.

use serde::Serialize;

use crate::tar::header::{self as tar_header, BLOCK_SIZE};

// ── Frozen magic numbers ─────────────────────────────────────────────────────

/// Zip local file header.
pub const ZIP_LOCAL_HEADER:  &[u8] = &[0x50, 0x4b, 0x03, 0x04];
/// Zip end-of-central-directory record (empty archive).
pub const ZIP_EMPTY_ARCHIVE: &[u8] = &[0x50, 0x4b, 0x05, 0x06];
/// Zip data descriptor, leading a spanned archive.
pub const ZIP_SPANNED:       &[u8] = &[0x50, 0x4b, 0x07, 0x08];
/// Zip single-segment split marker.
pub const ZIP_SINGLE_SEGMENT: &[u8] = &[0x50, 0x4b, 0x30, 0x30];
pub const AR_MAGIC:          &[u8] = b"!<arch>\n";
pub const CPIO_NEW_ASCII:    &[u8] = b"070701";
pub const CPIO_NEW_CRC:      &[u8] = b"070702";
pub const CPIO_OLD_ASCII:    &[u8] = b"070707";
/// Old binary cpio (octal 070707) as written by a little-endian host.
pub const CPIO_BINARY_LE:    &[u8] = &[0xc7, 0x71];
pub const CPIO_BINARY_BE:    &[u8] = &[0x71, 0xc7];
pub const ARJ_MAGIC:         &[u8] = &[0x60, 0xea];
pub const SEVEN_Z_MAGIC:     &[u8] = &[0x37, 0x7a, 0xbc, 0xaf, 0x27, 0x1c];
/// Offset of the dump record magic (NFS_MAGIC, 60012 little-endian).
pub const DUMP_MAGIC_OFFSET: usize = 24;
pub const DUMP_MAGIC:        &[u8] = &[0x6c, 0xea, 0x00, 0x00];
/// Offset of the ustar magic+version pair inside a tar header.
pub const TAR_MAGIC_OFFSET:  usize = 257;
pub const TAR_USTAR_POSIX:   &[u8] = b"ustar\x0000";
pub const TAR_USTAR_GNU:     &[u8] = b"ustar  \0";
pub const TAR_USTAR_GNU_ZERO: &[u8] = b"ustar 0\0";
pub const TAR_USTAR_ANT:     &[u8] = b"ustar\0\0\0";

// ── ArchiveFormat ────────────────────────────────────────────────────────────

/// Every archive format the registry knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    Zip,
    Jar,
    Ar,
    Cpio,
    Arj,
    #[serde(rename = "7z")]
    SevenZ,
    Dump,
    Tar,
}

impl ArchiveFormat {
    pub const ALL: [ArchiveFormat; 8] = [
        ArchiveFormat::Zip,
        ArchiveFormat::Jar,
        ArchiveFormat::Ar,
        ArchiveFormat::Cpio,
        ArchiveFormat::Arj,
        ArchiveFormat::SevenZ,
        ArchiveFormat::Dump,
        ArchiveFormat::Tar,
    ];

    /// Canonical identifier, used for explicit selection.
    pub fn name(self) -> &'static str {
        match self {
            ArchiveFormat::Zip    => "zip",
            ArchiveFormat::Jar    => "jar",
            ArchiveFormat::Ar     => "ar",
            ArchiveFormat::Cpio   => "cpio",
            ArchiveFormat::Arj    => "arj",
            ArchiveFormat::SevenZ => "7z",
            ArchiveFormat::Dump   => "dump",
            ArchiveFormat::Tar    => "tar",
        }
    }

    /// Case-sensitive lookup of a canonical identifier.
    pub fn from_name(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == s)
    }

    /// Whether the format can be read from a sequential stream.
    /// 7z keeps its header at the end and needs random access.
    pub fn can_stream_read(self) -> bool {
        !matches!(self, ArchiveFormat::SevenZ)
    }

    /// Whether the format can be written to a sequential stream.
    pub fn can_stream_write(self) -> bool {
        !matches!(self, ArchiveFormat::SevenZ)
    }

    /// Whether a writer exists at all; arj and dump are read-only formats.
    pub fn has_writer(self) -> bool {
        !matches!(self, ArchiveFormat::Arj | ArchiveFormat::Dump)
    }
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Signature rules ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureRule {
    /// Exact bytes at a fixed offset.
    Magic { offset: usize, bytes: &'static [u8] },
    /// A whole non-zero tar header block whose stored checksum verifies.
    TarChecksum,
}

impl SignatureRule {
    /// Number of leading bytes the rule needs to see.
    pub fn span(&self) -> usize {
        match *self {
            SignatureRule::Magic { offset, bytes } => offset + bytes.len(),
            SignatureRule::TarChecksum             => BLOCK_SIZE,
        }
    }

    pub fn matches(&self, lookahead: &[u8]) -> bool {
        match *self {
            SignatureRule::Magic { offset, bytes } => lookahead.get(offset..offset + bytes.len()) == Some(bytes),
            SignatureRule::TarChecksum => match lookahead.get(..BLOCK_SIZE) {
                Some(block) => !tar_header::is_zero_block(block) && tar_header::verify_checksum(block),
                None        => false,
            },
        }
    }
}

/// One row of the detection table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatSignature {
    pub format: ArchiveFormat,
    pub rule:   SignatureRule,
}

const fn magic(format: ArchiveFormat, offset: usize, bytes: &'static [u8]) -> FormatSignature {
    FormatSignature { format, rule: SignatureRule::Magic { offset, bytes } }
}

/// The detection table, in priority order.
pub static SIGNATURES: &[FormatSignature] = &[
    magic(ArchiveFormat::Zip,    0, ZIP_LOCAL_HEADER),
    magic(ArchiveFormat::Zip,    0, ZIP_EMPTY_ARCHIVE),
    magic(ArchiveFormat::Zip,    0, ZIP_SPANNED),
    magic(ArchiveFormat::Zip,    0, ZIP_SINGLE_SEGMENT),
    magic(ArchiveFormat::Jar,    0, ZIP_LOCAL_HEADER),
    magic(ArchiveFormat::Ar,     0, AR_MAGIC),
    magic(ArchiveFormat::Cpio,   0, CPIO_NEW_ASCII),
    magic(ArchiveFormat::Cpio,   0, CPIO_NEW_CRC),
    magic(ArchiveFormat::Cpio,   0, CPIO_OLD_ASCII),
    magic(ArchiveFormat::Cpio,   0, CPIO_BINARY_LE),
    magic(ArchiveFormat::Cpio,   0, CPIO_BINARY_BE),
    magic(ArchiveFormat::Arj,    0, ARJ_MAGIC),
    magic(ArchiveFormat::SevenZ, 0, SEVEN_Z_MAGIC),
    magic(ArchiveFormat::Dump,   DUMP_MAGIC_OFFSET, DUMP_MAGIC),
    magic(ArchiveFormat::Tar,    TAR_MAGIC_OFFSET, TAR_USTAR_POSIX),
    magic(ArchiveFormat::Tar,    TAR_MAGIC_OFFSET, TAR_USTAR_GNU),
    magic(ArchiveFormat::Tar,    TAR_MAGIC_OFFSET, TAR_USTAR_GNU_ZERO),
    magic(ArchiveFormat::Tar,    TAR_MAGIC_OFFSET, TAR_USTAR_ANT),
    FormatSignature { format: ArchiveFormat::Tar, rule: SignatureRule::TarChecksum },
];

/// Bytes of lookahead needed to evaluate every rule.
pub fn max_signature_len() -> usize {
    SIGNATURES.iter().map(|s| s.rule.span()).max().unwrap_or(0)
}

/// First signature matching `lookahead`, in table order.
pub fn match_signature(lookahead: &[u8]) -> Option<&'static FormatSignature> {
    SIGNATURES.iter().find(|sig| {
        let hit = sig.rule.matches(lookahead);
        log::trace!("signature {:?} for {}: {}", sig.rule, sig.format, if hit { "match" } else { "no match" });
        hit
    })
}

/// Signatures registered for one format, in priority order.
pub fn signatures_for(format: ArchiveFormat) -> impl Iterator<Item = &'static FormatSignature> {
    SIGNATURES.iter().filter(move |s| s.format == format)
}
