//! Header-level tar reader and writer.
//!
//! # Reader
//! [`TarReader`] walks the archive one header block at a time. Between
//! entries it skips any content the caller did not read plus the padding to
//! the next 512-byte boundary. A zero block, or a clean EOF on a block
//! boundary, ends the archive. GNU long-name (`L`) and long-link (`K`)
//! pseudo-entries are folded into the header that follows them.
//!
//! # Writer
//! [`TarWriter`] emits ustar headers, entry content and padding. `finish()`
//! appends the two zero blocks that terminate the archive and pads the
//! output to a whole record.

pub mod header;

use std::io::{self, Read, Write};

use log::{trace, warn};
use thiserror::Error;

use crate::field::{self, EntryEncoding, FieldError};
use crate::io_stream::read_up_to;
use header::{EntryType, TarHeader, BLOCK_SIZE, GNU_LONGLINK, NAME, LINKNAME};

/// Default record size: 20 blocks.
pub const DEFAULT_RECORD_SIZE: usize = 20 * BLOCK_SIZE;

/// Upper bound for a GNU long-name payload.
const MAX_LONG_NAME: u64 = 64 * 1024;

const ZERO_BLOCK: [u8; BLOCK_SIZE] = [0u8; BLOCK_SIZE];

#[derive(Error, Debug)]
pub enum TarError {
    #[error("Header field error: {0}")]
    Field(#[from] FieldError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Header checksum mismatch: stored {stored}, computed {computed}")]
    ChecksumMismatch { stored: u64, computed: u64 },
    #[error("Name of {len} bytes does not fit a {limit}-byte header field: {name}")]
    NameTooLong { name: String, len: usize, limit: usize },
    #[error("Entry declares {declared} bytes but {actual} were supplied")]
    SizeMismatch { declared: u64, actual: u64 },
    #[error("Archive truncated inside {0}")]
    Truncated(&'static str),
    #[error("Record size {0} is not a positive multiple of {BLOCK_SIZE}")]
    InvalidRecordSize(usize),
}

/// How the writer treats names longer than the 100-byte name field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LongNameMode {
    /// Reject names that the ustar prefix split cannot hold.
    #[default]
    Error,
    /// Truncate silently to the field width.
    Truncate,
    /// Emit a GNU `././@LongLink` pseudo-entry before the real header.
    Gnu,
}

#[inline]
fn padding_for(size: u64) -> u64 {
    let rem = size % BLOCK_SIZE as u64;
    if rem == 0 { 0 } else { BLOCK_SIZE as u64 - rem }
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct TarReader<R: Read> {
    inner:     R,
    encoding:  EntryEncoding,
    /// Unread content bytes of the current entry.
    remaining: u64,
    /// Padding after the current entry's content.
    padding:   u64,
    done:      bool,
}

impl<R: Read> TarReader<R> {
    pub fn new(inner: R, encoding: EntryEncoding) -> Self {
        Self { inner, encoding, remaining: 0, padding: 0, done: false }
    }

    pub fn entry_encoding(&self) -> EntryEncoding {
        self.encoding
    }

    /// Release the underlying stream.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Advance to the next entry, skipping what is left of the current one.
    pub fn next_entry(&mut self) -> Result<Option<TarHeader>, TarError> {
        if self.done {
            return Ok(None);
        }
        self.skip_rest()?;

        let mut long_name: Option<String> = None;
        let mut long_link: Option<String> = None;
        loop {
            let block = match self.read_header_block()? {
                Some(b) => b,
                None    => {
                    self.done = true;
                    if long_name.is_some() || long_link.is_some() {
                        return Err(TarError::Truncated("GNU long name"));
                    }
                    return Ok(None);
                }
            };

            if !header::verify_checksum(&block) {
                let stored = field::parse_octal(&block, header::CHKSUM.0, header::CHKSUM.1).unwrap_or(0);
                return Err(TarError::ChecksumMismatch { stored, computed: header::header_checksum(&block) });
            }

            let mut entry = TarHeader::parse(&block, self.encoding)?;
            self.begin_content(&entry);

            match entry.entry_type {
                EntryType::GnuLongName => {
                    long_name = Some(self.read_long_name(entry.size)?);
                    continue;
                }
                EntryType::GnuLongLink => {
                    long_link = Some(self.read_long_name(entry.size)?);
                    continue;
                }
                _ => {}
            }

            if let Some(name) = long_name.take() {
                entry.name = name;
            }
            if let Some(link) = long_link.take() {
                entry.link_name = link;
            }
            trace!("tar entry {:?} ({} bytes, {:?})", entry.name, entry.size, entry.entry_type);
            return Ok(Some(entry));
        }
    }

    fn begin_content(&mut self, entry: &TarHeader) {
        self.remaining = if entry.entry_type.has_content() { entry.size } else { 0 };
        self.padding = padding_for(self.remaining);
    }

    /// `None` at a zero block or a clean EOF on a block boundary.
    fn read_header_block(&mut self) -> Result<Option<[u8; BLOCK_SIZE]>, TarError> {
        let mut block = [0u8; BLOCK_SIZE];
        match read_up_to(&mut self.inner, &mut block)? {
            0 => Ok(None),
            BLOCK_SIZE if header::is_zero_block(&block) => Ok(None),
            BLOCK_SIZE => Ok(Some(block)),
            _ => Err(TarError::Truncated("header block")),
        }
    }

    fn read_long_name(&mut self, size: u64) -> Result<String, TarError> {
        if size > MAX_LONG_NAME {
            return Err(TarError::NameTooLong { name: GNU_LONGLINK.into(), len: size as usize, limit: MAX_LONG_NAME as usize });
        }
        let mut payload = vec![0u8; size as usize];
        self.read_exact(&mut payload).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => TarError::Truncated("GNU long name"),
            _ => TarError::Io(e),
        })?;
        self.skip_rest()?;
        let name = self.encoding.decode(field::truncate_nul(&payload))?;
        if name.is_empty() {
            warn!("GNU long-name entry with an empty payload");
        }
        Ok(name)
    }

    fn skip_rest(&mut self) -> Result<(), TarError> {
        let skip = self.remaining + self.padding;
        if skip > 0 {
            let copied = io::copy(&mut (&mut self.inner).take(skip), &mut io::sink())?;
            if copied < skip {
                return Err(TarError::Truncated("entry content"));
            }
        }
        self.remaining = 0;
        self.padding = 0;
        Ok(())
    }
}

/// Reads the content of the current entry.
impl<R: Read> Read for TarReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || out.is_empty() {
            return Ok(0);
        }
        let max = out.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut out[..max])?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "tar entry content truncated"));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct TarWriter<W: Write> {
    inner:       W,
    encoding:    EntryEncoding,
    long_names:  LongNameMode,
    record_size: usize,
    written:     u64,
}

impl<W: Write> TarWriter<W> {
    pub fn new(inner: W, encoding: EntryEncoding) -> Self {
        Self {
            inner,
            encoding,
            long_names:  LongNameMode::default(),
            record_size: DEFAULT_RECORD_SIZE,
            written:     0,
        }
    }

    pub fn long_names(mut self, mode: LongNameMode) -> Self {
        self.long_names = mode;
        self
    }

    pub fn record_size(mut self, size: usize) -> Result<Self, TarError> {
        if size == 0 || size % BLOCK_SIZE != 0 {
            return Err(TarError::InvalidRecordSize(size));
        }
        self.record_size = size;
        Ok(self)
    }

    pub fn entry_encoding(&self) -> EntryEncoding {
        self.encoding
    }

    /// Append one entry. `data` must yield exactly `header.size` bytes for
    /// entry types with content; it is ignored for the others.
    pub fn append<D: Read>(&mut self, header: &TarHeader, data: D) -> Result<(), TarError> {
        let mut header = header.clone();
        self.announce_long(&mut header.name, NAME.1, EntryType::GnuLongName)?;
        self.announce_long(&mut header.link_name, LINKNAME.1, EntryType::GnuLongLink)?;

        let mut block = [0u8; BLOCK_SIZE];
        header.write(&mut block, self.encoding)?;
        self.put(&block)?;

        if header.entry_type.has_content() {
            let copied = io::copy(&mut data.take(header.size), &mut self.inner)?;
            self.written += copied;
            if copied != header.size {
                return Err(TarError::SizeMismatch { declared: header.size, actual: copied });
            }
            self.pad(header.size)?;
        }
        trace!("tar append {:?} ({} bytes)", header.name, header.size);
        Ok(())
    }

    /// Apply the long-name policy to a name or link field.
    fn announce_long(&mut self, name: &mut String, limit: usize, kind: EntryType) -> Result<(), TarError> {
        let len = self.encoding.encode(name)?.len();
        if len <= limit {
            return Ok(());
        }
        if kind == EntryType::GnuLongName && header::split_ustar_path(name, self.encoding)?.is_some() {
            return Ok(());
        }
        match self.long_names {
            LongNameMode::Truncate => Ok(()),
            LongNameMode::Error => Err(TarError::NameTooLong { name: name.clone(), len, limit }),
            LongNameMode::Gnu => {
                let mut payload = self.encoding.encode(name)?.into_owned();
                payload.push(0);
                let mut pseudo = TarHeader::new(GNU_LONGLINK, payload.len() as u64);
                pseudo.entry_type = kind;
                let mut block = [0u8; BLOCK_SIZE];
                pseudo.write(&mut block, self.encoding)?;
                self.put(&block)?;
                self.put(&payload)?;
                self.pad(payload.len() as u64)?;
                Ok(())
            }
        }
    }

    fn put(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    fn pad(&mut self, size: u64) -> io::Result<()> {
        let pad = padding_for(size) as usize;
        self.put(&ZERO_BLOCK[..pad])
    }

    /// Write the end-of-archive marker, pad to the record size and return
    /// the stream.
    pub fn finish(mut self) -> Result<W, TarError> {
        self.put(&ZERO_BLOCK)?;
        self.put(&ZERO_BLOCK)?;
        let record = self.record_size as u64;
        let tail = (record - self.written % record) % record;
        for _ in 0..tail / BLOCK_SIZE as u64 {
            self.put(&ZERO_BLOCK)?;
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut w = TarWriter::new(Vec::new(), EntryEncoding::default());
        for (name, data) in entries {
            w.append(&TarHeader::new(*name, data.len() as u64), *data).unwrap();
        }
        w.finish().unwrap()
    }

    #[test]
    fn test_roundtrip_entries() {
        let bytes = archive(&[("a.txt", b"alpha".as_slice()), ("b.bin", &[7u8; 700]), ("empty", b"")]);
        assert_eq!(bytes.len(), DEFAULT_RECORD_SIZE);

        let mut r = TarReader::new(Cursor::new(bytes), EntryEncoding::default());
        let a = r.next_entry().unwrap().unwrap();
        assert_eq!(a.name, "a.txt");
        let mut content = String::new();
        r.read_to_string(&mut content).unwrap();
        assert_eq!(content, "alpha");

        // Content of b.bin is skipped without being read.
        let b = r.next_entry().unwrap().unwrap();
        assert_eq!((b.name.as_str(), b.size), ("b.bin", 700));
        let e = r.next_entry().unwrap().unwrap();
        assert_eq!(e.size, 0);
        assert!(r.next_entry().unwrap().is_none());
        assert!(r.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_eof_without_trailer() {
        let mut w = TarWriter::new(Vec::new(), EntryEncoding::default());
        w.append(&TarHeader::new("x", 3), &b"abc"[..]).unwrap();
        let mut bytes = w.finish().unwrap();
        bytes.truncate(2 * BLOCK_SIZE);
        let mut r = TarReader::new(&bytes[..], EntryEncoding::default());
        assert!(r.next_entry().unwrap().is_some());
        assert!(r.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_truncated_content() {
        let bytes = archive(&[("x", [1u8; 600].as_slice())]);
        let mut r = TarReader::new(&bytes[..BLOCK_SIZE + 100], EntryEncoding::default());
        r.next_entry().unwrap();
        assert!(matches!(r.next_entry(), Err(TarError::Truncated(_))));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut bytes = archive(&[("x", b"1".as_slice())]);
        bytes[0] = b'z';
        let mut r = TarReader::new(&bytes[..], EntryEncoding::default());
        assert!(matches!(r.next_entry(), Err(TarError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_size_mismatch() {
        let mut w = TarWriter::new(Vec::new(), EntryEncoding::default());
        let err = w.append(&TarHeader::new("x", 10), &b"short"[..]).unwrap_err();
        assert!(matches!(err, TarError::SizeMismatch { declared: 10, actual: 5 }));
    }

    #[test]
    fn test_long_name_policies() {
        let name = "n".repeat(130);

        let mut strict = TarWriter::new(Vec::new(), EntryEncoding::default());
        assert!(matches!(
            strict.append(&TarHeader::new(name.clone(), 0), io::empty()),
            Err(TarError::NameTooLong { len: 130, limit: 100, .. })
        ));

        let mut gnu = TarWriter::new(Vec::new(), EntryEncoding::default()).long_names(LongNameMode::Gnu);
        gnu.append(&TarHeader::new(name.clone(), 2), &b"hi"[..]).unwrap();
        let bytes = gnu.finish().unwrap();
        assert_eq!(bytes[156], b'L');
        let mut r = TarReader::new(&bytes[..], EntryEncoding::default());
        let entry = r.next_entry().unwrap().unwrap();
        assert_eq!(entry.name, name);
        let mut content = Vec::new();
        r.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"hi");

        let mut lossy = TarWriter::new(Vec::new(), EntryEncoding::default()).long_names(LongNameMode::Truncate);
        lossy.append(&TarHeader::new(name.clone(), 0), io::empty()).unwrap();
        let bytes = lossy.finish().unwrap();
        let entry = TarReader::new(&bytes[..], EntryEncoding::default()).next_entry().unwrap().unwrap();
        assert_eq!(entry.name, name[..100]);
    }

    /// Serves `data`, then fails every read with `ErrorKind::Other`.
    struct FailingTail<'a>(&'a [u8]);

    impl Read for FailingTail<'_> {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            if self.0.is_empty() {
                return Err(io::Error::new(io::ErrorKind::Other, "device gone"));
            }
            let n = out.len().min(self.0.len());
            out[..n].copy_from_slice(&self.0[..n]);
            self.0 = &self.0[n..];
            Ok(n)
        }
    }

    fn gnu_long_name_archive() -> Vec<u8> {
        let mut w = TarWriter::new(Vec::new(), EntryEncoding::default()).long_names(LongNameMode::Gnu);
        w.append(&TarHeader::new("n".repeat(130), 0), io::empty()).unwrap();
        w.finish().unwrap()
    }

    #[test]
    fn test_long_name_without_following_header() {
        let bytes = gnu_long_name_archive();
        // pseudo header and its one payload block, then EOF
        let mut r = TarReader::new(&bytes[..2 * BLOCK_SIZE], EntryEncoding::default());
        assert!(matches!(r.next_entry(), Err(TarError::Truncated("GNU long name"))));

        // same, but ended by a zero block
        let mut ended = bytes[..2 * BLOCK_SIZE].to_vec();
        ended.extend_from_slice(&ZERO_BLOCK);
        let mut r = TarReader::new(&ended[..], EntryEncoding::default());
        assert!(matches!(r.next_entry(), Err(TarError::Truncated(_))));
    }

    #[test]
    fn test_long_name_payload_errors() {
        let bytes = gnu_long_name_archive();

        let mut short = TarReader::new(&bytes[..BLOCK_SIZE + 10], EntryEncoding::default());
        assert!(matches!(short.next_entry(), Err(TarError::Truncated("GNU long name"))));

        let mut failing = TarReader::new(FailingTail(&bytes[..BLOCK_SIZE]), EntryEncoding::default());
        match failing.next_entry() {
            Err(TarError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::Other),
            other => panic!("expected an IO error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_long_link_gnu() {
        let target = format!("/{}", "t".repeat(140));
        let mut link = TarHeader::new("link", 0);
        link.entry_type = EntryType::Symlink;
        link.link_name = target.clone();

        let mut w = TarWriter::new(Vec::new(), EntryEncoding::default()).long_names(LongNameMode::Gnu);
        w.append(&link, io::empty()).unwrap();
        let bytes = w.finish().unwrap();
        let entry = TarReader::new(&bytes[..], EntryEncoding::default()).next_entry().unwrap().unwrap();
        assert_eq!(entry.link_name, target);
        assert_eq!(entry.entry_type, EntryType::Symlink);
    }

    #[test]
    fn test_directory_has_no_content() {
        let mut w = TarWriter::new(Vec::new(), EntryEncoding::default());
        w.append(&TarHeader::directory("etc"), &b"ignored"[..]).unwrap();
        w.append(&TarHeader::new("etc/hosts", 4), &b"host"[..]).unwrap();
        let bytes = w.finish().unwrap();

        let mut r = TarReader::new(&bytes[..], EntryEncoding::default());
        assert_eq!(r.next_entry().unwrap().unwrap().entry_type, EntryType::Directory);
        assert_eq!(r.next_entry().unwrap().unwrap().name, "etc/hosts");
    }

    #[test]
    fn test_record_size() {
        assert!(matches!(
            TarWriter::new(Vec::new(), EntryEncoding::default()).record_size(700),
            Err(TarError::InvalidRecordSize(700))
        ));
        let w = TarWriter::new(Vec::new(), EntryEncoding::default()).record_size(BLOCK_SIZE).unwrap();
        assert_eq!(w.finish().unwrap().len(), 2 * BLOCK_SIZE);
    }

    #[test]
    fn test_utf8_names() {
        let mut w = TarWriter::new(Vec::new(), EntryEncoding::Utf8);
        w.append(&TarHeader::new("\u{65e5}\u{672c}.txt", 0), io::empty()).unwrap();
        let bytes = w.finish().unwrap();
        let mut r = TarReader::new(&bytes[..], EntryEncoding::Utf8);
        assert_eq!(r.next_entry().unwrap().unwrap().name, "\u{65e5}\u{672c}.txt");

        let mut latin = TarWriter::new(Vec::new(), EntryEncoding::Latin1);
        assert!(matches!(
            latin.append(&TarHeader::new("\u{65e5}", 0), io::empty()),
            Err(TarError::Field(FieldError::EncodingError { .. }))
        ));
    }
}
