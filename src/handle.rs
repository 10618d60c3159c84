//! Opened archive handles: what the dispatcher hands back.
//!
//! ```no_run
//! use std::fs::File;
//! use archiveprobe::dispatch::{FormatDispatcher, Selector};
//! use archiveprobe::io_stream::MarkReader;
//!
//! let stream = MarkReader::new(File::open("backup.tar")?);
//! let mut reader = FormatDispatcher::new().open_reader(Selector::AutoDetect, stream)?;
//! if let Some(tar) = reader.as_tar_mut() {
//!     while let Some(entry) = tar.next_entry()? {
//!         println!("{} {}", entry.size, entry.name);
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::io::{self, Read, Write};

use crate::field::EntryEncoding;
use crate::signature::ArchiveFormat;
use crate::tar::{LongNameMode, TarError, TarReader, TarWriter, DEFAULT_RECORD_SIZE};

// ── OpenOptions ──────────────────────────────────────────────────────────────

/// Settings applied to every handle a dispatcher opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOptions {
    pub entry_encoding: EntryEncoding,
    /// Tar writers only.
    pub long_names:     LongNameMode,
    /// Tar writers only; a positive multiple of 512.
    pub record_size:    usize,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            entry_encoding: EntryEncoding::default(),
            long_names:     LongNameMode::default(),
            record_size:    DEFAULT_RECORD_SIZE,
        }
    }
}

// ── Readers ──────────────────────────────────────────────────────────────────

/// A stream bound to a format whose entry parsing lives outside this crate.
/// Bytes pass through untouched.
#[derive(Debug)]
pub struct OpaqueReader<R> {
    format:   ArchiveFormat,
    stream:   R,
    encoding: EntryEncoding,
}

impl<R: Read> Read for OpaqueReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

pub enum ArchiveReader<R: Read> {
    Tar(TarReader<R>),
    Opaque(OpaqueReader<R>),
}

impl<R: Read> ArchiveReader<R> {
    pub(crate) fn open(format: ArchiveFormat, stream: R, options: &OpenOptions) -> Self {
        let encoding = options.entry_encoding;
        match format {
            ArchiveFormat::Tar => ArchiveReader::Tar(TarReader::new(stream, encoding)),
            ArchiveFormat::Zip
            | ArchiveFormat::Jar
            | ArchiveFormat::Ar
            | ArchiveFormat::Cpio
            | ArchiveFormat::Arj
            | ArchiveFormat::SevenZ
            | ArchiveFormat::Dump => ArchiveReader::Opaque(OpaqueReader { format, stream, encoding }),
        }
    }

    pub fn format(&self) -> ArchiveFormat {
        match self {
            ArchiveReader::Tar(_)    => ArchiveFormat::Tar,
            ArchiveReader::Opaque(o) => o.format,
        }
    }

    pub fn entry_encoding(&self) -> EntryEncoding {
        match self {
            ArchiveReader::Tar(t)    => t.entry_encoding(),
            ArchiveReader::Opaque(o) => o.encoding,
        }
    }

    pub fn as_tar_mut(&mut self) -> Option<&mut TarReader<R>> {
        match self {
            ArchiveReader::Tar(t) => Some(t),
            ArchiveReader::Opaque(_) => None,
        }
    }

    /// Give the stream back to the caller.
    pub fn into_inner(self) -> R {
        match self {
            ArchiveReader::Tar(t)    => t.into_inner(),
            ArchiveReader::Opaque(o) => o.stream,
        }
    }
}

/// Tar: the current entry's content. Other formats: the raw stream.
impl<R: Read> Read for ArchiveReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ArchiveReader::Tar(t)    => t.read(buf),
            ArchiveReader::Opaque(o) => o.read(buf),
        }
    }
}

// ── Writers ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct OpaqueWriter<W> {
    format:   ArchiveFormat,
    stream:   W,
    encoding: EntryEncoding,
}

impl<W: Write> Write for OpaqueWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

pub enum ArchiveWriter<W: Write> {
    Tar(TarWriter<W>),
    Opaque(OpaqueWriter<W>),
}

impl<W: Write> ArchiveWriter<W> {
    /// Callers must have rejected formats without a streaming writer.
    pub(crate) fn open(format: ArchiveFormat, stream: W, options: &OpenOptions) -> Result<Self, TarError> {
        let encoding = options.entry_encoding;
        Ok(match format {
            ArchiveFormat::Tar => ArchiveWriter::Tar(
                TarWriter::new(stream, encoding)
                    .long_names(options.long_names)
                    .record_size(options.record_size)?,
            ),
            ArchiveFormat::Zip
            | ArchiveFormat::Jar
            | ArchiveFormat::Ar
            | ArchiveFormat::Cpio
            | ArchiveFormat::Arj
            | ArchiveFormat::SevenZ
            | ArchiveFormat::Dump => ArchiveWriter::Opaque(OpaqueWriter { format, stream, encoding }),
        })
    }

    pub fn format(&self) -> ArchiveFormat {
        match self {
            ArchiveWriter::Tar(_)    => ArchiveFormat::Tar,
            ArchiveWriter::Opaque(o) => o.format,
        }
    }

    pub fn entry_encoding(&self) -> EntryEncoding {
        match self {
            ArchiveWriter::Tar(t)    => t.entry_encoding(),
            ArchiveWriter::Opaque(o) => o.encoding,
        }
    }

    pub fn as_tar_mut(&mut self) -> Option<&mut TarWriter<W>> {
        match self {
            ArchiveWriter::Tar(t) => Some(t),
            ArchiveWriter::Opaque(_) => None,
        }
    }

    /// Complete the archive (tar trailer and record padding) and return the
    /// stream. Opaque writers are only flushed.
    pub fn finish(self) -> Result<W, TarError> {
        match self {
            ArchiveWriter::Tar(t) => t.finish(),
            ArchiveWriter::Opaque(mut o) => {
                o.flush()?;
                Ok(o.stream)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tar::header::{TarHeader, BLOCK_SIZE};

    #[test]
    fn test_default_options() {
        let opts = OpenOptions::default();
        assert_eq!(opts.entry_encoding, EntryEncoding::Latin1);
        assert_eq!(opts.long_names, LongNameMode::Error);
        assert_eq!(opts.record_size, 20 * BLOCK_SIZE);
    }

    #[test]
    fn test_opaque_reader_passes_bytes_through() {
        let mut r = ArchiveReader::open(ArchiveFormat::Ar, &b"!<arch>\nrest"[..], &OpenOptions::default());
        assert_eq!(r.format(), ArchiveFormat::Ar);
        assert!(r.as_tar_mut().is_none());
        let mut all = Vec::new();
        r.read_to_end(&mut all).unwrap();
        assert_eq!(all, b"!<arch>\nrest");
    }

    #[test]
    fn test_tar_writer_uses_options() {
        let opts = OpenOptions { record_size: BLOCK_SIZE, entry_encoding: EntryEncoding::Utf8, ..Default::default() };
        let mut w = ArchiveWriter::open(ArchiveFormat::Tar, Vec::new(), &opts).unwrap();
        assert_eq!(w.entry_encoding(), EntryEncoding::Utf8);
        w.as_tar_mut().unwrap().append(&TarHeader::new("\u{e9}t\u{e9}", 2), &b"ok"[..]).unwrap();
        let bytes = w.finish().unwrap();
        // header + one content block + two zero blocks, no record padding
        assert_eq!(bytes.len(), 4 * BLOCK_SIZE);
        assert_eq!(&bytes[..5], "\u{e9}t\u{e9}".as_bytes());
    }

    #[test]
    fn test_invalid_record_size() {
        let opts = OpenOptions { record_size: 1000, ..Default::default() };
        assert!(matches!(
            ArchiveWriter::open(ArchiveFormat::Tar, Vec::new(), &opts),
            Err(TarError::InvalidRecordSize(1000))
        ));
    }

    #[test]
    fn test_opaque_writer_finish_returns_stream() {
        let mut w = ArchiveWriter::open(ArchiveFormat::Cpio, Vec::new(), &OpenOptions::default()).unwrap();
        assert_eq!(w.format(), ArchiveFormat::Cpio);
        if let ArchiveWriter::Opaque(o) = &mut w {
            o.write_all(b"070701").unwrap();
        }
        assert_eq!(w.finish().unwrap(), b"070701");
    }
}
