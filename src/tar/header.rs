//! The 512-byte ustar header and its checksum.
//!
//! | Offset | Size | Field    | Encoding                      |
//! |--------|------|----------|-------------------------------|
//! | 0      | 100  | name     | name field                    |
//! | 100    | 8    | mode     | octal                         |
//! | 108    | 8    | uid      | octal or base-256             |
//! | 116    | 8    | gid      | octal or base-256             |
//! | 124    | 12   | size     | octal or base-256             |
//! | 136    | 12   | mtime    | octal or base-256             |
//! | 148    | 8    | chksum   | 6 digits, NUL, space          |
//! | 156    | 1    | typeflag | ASCII                         |
//! | 157    | 100  | linkname | name field                    |
//! | 257    | 6    | magic    | `ustar\0`                     |
//! | 263    | 2    | version  | `00`                          |
//! | 265    | 32   | uname    | name field                    |
//! | 297    | 32   | gname    | name field                    |
//! | 329    | 8    | devmajor | octal                         |
//! | 337    | 8    | devminor | octal                         |
//! | 345    | 155  | prefix   | name field (ustar only)       |

use serde::Serialize;

use crate::field::{self, EntryEncoding, FieldError};

pub const BLOCK_SIZE: usize = 512;

pub const NAME:     (usize, usize) = (0, 100);
pub const MODE:     (usize, usize) = (100, 8);
pub const UID:      (usize, usize) = (108, 8);
pub const GID:      (usize, usize) = (116, 8);
pub const SIZE:     (usize, usize) = (124, 12);
pub const MTIME:    (usize, usize) = (136, 12);
pub const CHKSUM:   (usize, usize) = (148, 8);
pub const TYPEFLAG: usize          = 156;
pub const LINKNAME: (usize, usize) = (157, 100);
pub const MAGIC:    (usize, usize) = (257, 6);
pub const VERSION:  (usize, usize) = (263, 2);
pub const UNAME:    (usize, usize) = (265, 32);
pub const GNAME:    (usize, usize) = (297, 32);
pub const DEVMAJOR: (usize, usize) = (329, 8);
pub const DEVMINOR: (usize, usize) = (337, 8);
pub const PREFIX:   (usize, usize) = (345, 155);

/// Name used by GNU tar for long-name pseudo-entries.
pub const GNU_LONGLINK: &str = "././@LongLink";

// ── EntryType ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Regular,
    HardLink,
    Symlink,
    CharDevice,
    BlockDevice,
    Directory,
    Fifo,
    /// GNU: the content is the name of the next entry.
    GnuLongName,
    /// GNU: the content is the link target of the next entry.
    GnuLongLink,
    Other(u8),
}

impl EntryType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            b'0' | 0 => EntryType::Regular,
            b'1'     => EntryType::HardLink,
            b'2'     => EntryType::Symlink,
            b'3'     => EntryType::CharDevice,
            b'4'     => EntryType::BlockDevice,
            b'5'     => EntryType::Directory,
            b'6'     => EntryType::Fifo,
            b'L'     => EntryType::GnuLongName,
            b'K'     => EntryType::GnuLongLink,
            other    => EntryType::Other(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            EntryType::Regular     => b'0',
            EntryType::HardLink    => b'1',
            EntryType::Symlink     => b'2',
            EntryType::CharDevice  => b'3',
            EntryType::BlockDevice => b'4',
            EntryType::Directory   => b'5',
            EntryType::Fifo        => b'6',
            EntryType::GnuLongName => b'L',
            EntryType::GnuLongLink => b'K',
            EntryType::Other(b)    => b,
        }
    }

    /// Entry types whose size field describes stored content.
    pub fn has_content(self) -> bool {
        !matches!(
            self,
            EntryType::HardLink | EntryType::Symlink | EntryType::CharDevice
                | EntryType::BlockDevice | EntryType::Directory | EntryType::Fifo
        )
    }
}

// ── TarHeader ────────────────────────────────────────────────────────────────

/// Decoded view of one header block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TarHeader {
    pub name:       String,
    pub mode:       u32,
    pub uid:        u64,
    pub gid:        u64,
    pub size:       u64,
    pub mtime:      u64,
    pub entry_type: EntryType,
    pub link_name:  String,
    pub user_name:  String,
    pub group_name: String,
    pub dev_major:  u64,
    pub dev_minor:  u64,
}

impl TarHeader {
    /// A regular file entry with mode `0644`.
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name:       name.into(),
            mode:       0o644,
            uid:        0,
            gid:        0,
            size,
            mtime:      0,
            entry_type: EntryType::Regular,
            link_name:  String::new(),
            user_name:  String::new(),
            group_name: String::new(),
            dev_major:  0,
            dev_minor:  0,
        }
    }

    /// A directory entry with mode `0755`. A trailing `/` is added if missing.
    pub fn directory(name: impl Into<String>) -> Self {
        let mut name = name.into();
        if !name.ends_with('/') {
            name.push('/');
        }
        Self { mode: 0o755, entry_type: EntryType::Directory, ..Self::new(name, 0) }
    }

    /// Decode a header block.
    ///
    /// Does not verify the checksum; see [`verify_checksum`].
    pub fn parse(block: &[u8], encoding: EntryEncoding) -> Result<Self, FieldError> {
        if block.len() < BLOCK_SIZE {
            return Err(FieldError::PreconditionViolation(format!(
                "header block of {} bytes, expected {BLOCK_SIZE}",
                block.len()
            )));
        }
        let name_at = |(off, len): (usize, usize)| field::parse_name_with(block, off, len, encoding);
        let num_at = |(off, len): (usize, usize)| field::parse_octal_or_binary(block, off, len);

        let ustar = is_ustar(block);
        let mut name = name_at(NAME)?;
        // Old GNU headers keep atime/ctime where POSIX has the prefix.
        if is_posix_ustar(block) {
            let prefix = name_at(PREFIX)?;
            if !prefix.is_empty() {
                name = format!("{prefix}/{name}");
            }
        }

        let mode = num_at(MODE)?;
        let mode = u32::try_from(mode).map_err(|_| FieldError::MalformedField {
            offset: MODE.0,
            reason: format!("mode {mode:o} exceeds 32 bits"),
        })?;

        let (user_name, group_name, dev_major, dev_minor) = if ustar {
            (name_at(UNAME)?, name_at(GNAME)?, num_at(DEVMAJOR)?, num_at(DEVMINOR)?)
        } else {
            (String::new(), String::new(), 0, 0)
        };

        Ok(Self {
            name,
            mode,
            uid: num_at(UID)?,
            gid: num_at(GID)?,
            size: num_at(SIZE)?,
            mtime: num_at(MTIME)?,
            entry_type: EntryType::from_byte(block[TYPEFLAG]),
            link_name: name_at(LINKNAME)?,
            user_name,
            group_name,
            dev_major,
            dev_minor,
        })
    }

    /// Encode into a zeroed ustar block and seal it with the checksum.
    ///
    /// Names longer than their field are truncated; callers that care split
    /// or pre-announce long names first (see [`split_ustar_path`]).
    pub fn write(&self, block: &mut [u8; BLOCK_SIZE], encoding: EntryEncoding) -> Result<(), FieldError> {
        let mut staged = [0u8; BLOCK_SIZE];
        let buf = &mut staged[..];

        match split_ustar_path(&self.name, encoding)? {
            Some((prefix, name)) => {
                field::format_name_with(prefix, buf, PREFIX.0, PREFIX.1, encoding)?;
                field::format_name_with(name, buf, NAME.0, NAME.1, encoding)?;
            }
            None => {
                field::format_name_with(&self.name, buf, NAME.0, NAME.1, encoding)?;
            }
        }
        field::format_octal(u64::from(self.mode), buf, MODE.0, MODE.1)?;
        field::format_octal_or_binary(self.uid, buf, UID.0, UID.1)?;
        field::format_octal_or_binary(self.gid, buf, GID.0, GID.1)?;
        field::format_octal_or_binary(self.size, buf, SIZE.0, SIZE.1)?;
        field::format_octal_or_binary(self.mtime, buf, MTIME.0, MTIME.1)?;
        buf[TYPEFLAG] = self.entry_type.as_byte();
        field::format_name_with(&self.link_name, buf, LINKNAME.0, LINKNAME.1, encoding)?;
        buf[MAGIC.0..MAGIC.0 + MAGIC.1].copy_from_slice(b"ustar\0");
        buf[VERSION.0..VERSION.0 + VERSION.1].copy_from_slice(b"00");
        field::format_name_with(&self.user_name, buf, UNAME.0, UNAME.1, encoding)?;
        field::format_name_with(&self.group_name, buf, GNAME.0, GNAME.1, encoding)?;
        field::format_octal(self.dev_major, buf, DEVMAJOR.0, DEVMAJOR.1)?;
        field::format_octal(self.dev_minor, buf, DEVMINOR.0, DEVMINOR.1)?;

        field::format_checksum(header_checksum(buf), buf, CHKSUM.0, CHKSUM.1)?;
        *block = staged;
        Ok(())
    }
}

/// Split `path` into a ustar `(prefix, name)` pair when it is too long for
/// the name field alone. Returns `None` when the path fits as is, or when no
/// `/` splits it into a prefix of at most 155 bytes and a name of at most 100.
pub fn split_ustar_path(path: &str, encoding: EntryEncoding) -> Result<Option<(&str, &str)>, FieldError> {
    if encoding.encode(path)?.len() <= NAME.1 {
        return Ok(None);
    }
    for (idx, _) in path.match_indices('/').rev() {
        let (prefix, name) = (&path[..idx], &path[idx + 1..]);
        if name.is_empty() {
            continue;
        }
        if encoding.encode(name)?.len() > NAME.1 {
            break;
        }
        if encoding.encode(prefix)?.len() <= PREFIX.1 {
            return Ok(Some((prefix, name)));
        }
    }
    Ok(None)
}

// ── Block helpers ────────────────────────────────────────────────────────────

pub fn is_zero_block(block: &[u8]) -> bool {
    block.iter().all(|&b| b == 0)
}

/// Whether the block carries a ustar (POSIX or GNU) magic.
pub fn is_ustar(block: &[u8]) -> bool {
    block.get(MAGIC.0..MAGIC.0 + 5) == Some(b"ustar".as_slice())
}

/// Whether the block carries the POSIX `ustar\0` magic, the only layout
/// with a name prefix field.
pub fn is_posix_ustar(block: &[u8]) -> bool {
    block.get(MAGIC.0..MAGIC.0 + MAGIC.1) == Some(b"ustar\0".as_slice())
}

/// Unsigned byte sum of a header with the checksum field counted as spaces.
pub fn header_checksum(block: &[u8]) -> u64 {
    let (off, len) = CHKSUM;
    field::compute_checksum(&block[..off])
        + u64::from(b' ') * len as u64
        + field::compute_checksum(&block[off + len..])
}

/// Signed byte sum, as computed by some historic tar implementations.
fn signed_header_checksum(block: &[u8]) -> i64 {
    let (off, len) = CHKSUM;
    block
        .iter()
        .enumerate()
        .map(|(i, &b)| if (off..off + len).contains(&i) { i64::from(b' ') } else { i64::from(b as i8) })
        .sum()
}

/// Check the stored checksum against both the unsigned and signed sums.
pub fn verify_checksum(block: &[u8]) -> bool {
    if block.len() < BLOCK_SIZE {
        return false;
    }
    let stored = match field::parse_octal(block, CHKSUM.0, CHKSUM.1) {
        Ok(v)  => v,
        Err(_) => return false,
    };
    stored == header_checksum(block) || i64::try_from(stored).ok() == Some(signed_header_checksum(block))
}
