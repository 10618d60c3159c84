//! FormatDispatcher: turns a stream plus a [`Selector`] into an opened handle.
//!
//! Per call the dispatcher moves through
//! `Start → NameGiven | AutoDetect → Resolved | Rejected`. A rejected call
//! returns an error and never a partial handle. The dispatcher keeps no
//! reference to the stream once it returns.
//!
//! Auto-detection marks the stream, reads up to [`max_signature_len`] bytes,
//! resets, then walks [`SIGNATURES`](crate::signature::SIGNATURES) in order.
//! The stream's logical position is the same afterwards whether detection
//! succeeded or not.

use std::io::{self, Write};

use log::debug;
use thiserror::Error;

use crate::field::EntryEncoding;
use crate::handle::{ArchiveReader, ArchiveWriter, OpenOptions};
use crate::io_stream::{read_up_to, MarkRead};
use crate::signature::{match_signature, max_signature_len, ArchiveFormat};
use crate::tar::TarError;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),
    #[error("Unknown archive format: {0:?}")]
    UnknownFormat(String),
    #[error("Format {0} cannot be used on a sequential stream")]
    StreamingUnsupported(ArchiveFormat),
    #[error("No archive signature matched the stream")]
    UnrecognizedFormat,
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Tar error: {0}")]
    Tar(#[from] TarError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, DispatchError>;

/// How the caller picks the format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Canonical, case-sensitive format name.
    ByName(String),
    AutoDetect,
}

impl Selector {
    pub fn by_name(name: impl Into<String>) -> Self {
        Selector::ByName(name.into())
    }
}

/// Identify the format of `stream` from its leading bytes without consuming
/// them.
pub fn detect<R: MarkRead + ?Sized>(stream: &mut R) -> Result<ArchiveFormat> {
    if !stream.mark_supported() {
        return Err(DispatchError::PreconditionViolation(
            "auto-detection needs a stream with mark/reset support".into(),
        ));
    }

    let mut lookahead = vec![0u8; max_signature_len()];
    stream.mark(lookahead.len());
    let read = read_up_to(stream, &mut lookahead);
    stream.reset()?;
    let n = read?;
    debug!("auto-detect: {} lookahead bytes", n);

    let sig = match_signature(&lookahead[..n]).ok_or(DispatchError::UnrecognizedFormat)?;
    if !sig.format.can_stream_read() {
        return Err(DispatchError::StreamingUnsupported(sig.format));
    }
    Ok(sig.format)
}

fn resolve_name(name: &str) -> Result<ArchiveFormat> {
    if name.is_empty() {
        return Err(DispatchError::PreconditionViolation("format name is empty".into()));
    }
    ArchiveFormat::from_name(name).ok_or_else(|| DispatchError::UnknownFormat(name.to_owned()))
}

// ── FormatDispatcher ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct FormatDispatcher {
    options:        OpenOptions,
    /// Explicitly chosen encoding; `None` falls back to `options`.
    encoding:       Option<EntryEncoding>,
    /// Set when the encoding was given at construction.
    encoding_fixed: bool,
}

impl FormatDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatcher whose entry encoding can no longer be changed.
    pub fn with_entry_encoding(encoding: EntryEncoding) -> Self {
        Self { encoding: Some(encoding), encoding_fixed: true, ..Self::default() }
    }

    /// Replace the options template. A fixed entry encoding still wins over
    /// `options.entry_encoding`.
    pub fn with_options(mut self, options: OpenOptions) -> Self {
        self.options = options;
        self
    }

    /// The encoding chosen explicitly, if any.
    pub fn entry_encoding(&self) -> Option<EntryEncoding> {
        self.encoding
    }

    pub fn set_entry_encoding(&mut self, encoding: EntryEncoding) -> Result<()> {
        if self.encoding_fixed {
            return Err(DispatchError::InvalidState(format!(
                "entry encoding was fixed to {} at construction",
                self.effective_encoding()
            )));
        }
        self.encoding = Some(encoding);
        Ok(())
    }

    pub fn effective_encoding(&self) -> EntryEncoding {
        self.encoding.unwrap_or(self.options.entry_encoding)
    }

    fn handle_options(&self) -> OpenOptions {
        OpenOptions { entry_encoding: self.effective_encoding(), ..self.options.clone() }
    }

    /// Resolve `selector` to a format without opening anything.
    pub fn resolve<R: MarkRead + ?Sized>(&self, selector: &Selector, stream: &mut R) -> Result<ArchiveFormat> {
        match selector {
            Selector::ByName(name) => {
                debug!("dispatch: name given ({:?})", name);
                let format = resolve_name(name)?;
                if !format.can_stream_read() {
                    return Err(DispatchError::StreamingUnsupported(format));
                }
                Ok(format)
            }
            Selector::AutoDetect => {
                debug!("dispatch: auto-detect");
                detect(stream)
            }
        }
    }

    /// Open a reader bound to `stream`.
    pub fn open_reader<R: MarkRead>(&self, selector: Selector, mut stream: R) -> Result<ArchiveReader<R>> {
        let format = self.resolve(&selector, &mut stream).map_err(|e| {
            debug!("dispatch: rejected ({})", e);
            e
        })?;
        debug!("dispatch: resolved reader {} ({})", format, self.effective_encoding());
        Ok(ArchiveReader::open(format, stream, &self.handle_options()))
    }

    /// Open a writer for the named format bound to `stream`.
    pub fn open_writer<W: Write>(&self, name: &str, stream: W) -> Result<ArchiveWriter<W>> {
        let format = resolve_name(name)?;
        if !format.has_writer() {
            debug!("dispatch: {} has no writer", format);
            return Err(DispatchError::UnknownFormat(name.to_owned()));
        }
        if !format.can_stream_write() {
            return Err(DispatchError::StreamingUnsupported(format));
        }
        debug!("dispatch: resolved writer {} ({})", format, self.effective_encoding());
        Ok(ArchiveWriter::open(format, stream, &self.handle_options())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    use crate::io_stream::MarkReader;
    use crate::tar::header::{TarHeader, BLOCK_SIZE};
    use crate::tar::TarWriter;

    fn marked(bytes: &[u8]) -> MarkReader<Cursor<Vec<u8>>> {
        MarkReader::new(Cursor::new(bytes.to_vec()))
    }

    fn tar_bytes() -> Vec<u8> {
        let mut w = TarWriter::new(Vec::new(), EntryEncoding::default());
        w.append(&TarHeader::new("hello.txt", 5), &b"hello"[..]).unwrap();
        w.finish().unwrap()
    }

    fn rest(mut stream: impl Read) -> Vec<u8> {
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_zip_by_name_on_empty_stream() {
        let reader = FormatDispatcher::new().open_reader(Selector::by_name("zip"), Cursor::new(Vec::new())).unwrap();
        assert_eq!(reader.format(), ArchiveFormat::Zip);
        assert_eq!(reader.entry_encoding(), EntryEncoding::Latin1);
    }

    #[test]
    fn test_local_header_detects_zip_before_tar() {
        let mut data = vec![0x50, 0x4b, 0x03, 0x04];
        data.resize(BLOCK_SIZE, 0);
        let reader = FormatDispatcher::new().open_reader(Selector::AutoDetect, marked(&data)).unwrap();
        assert_eq!(reader.format(), ArchiveFormat::Zip);
    }

    #[test]
    fn test_auto_detect_requires_mark() {
        let err = FormatDispatcher::new()
            .open_reader(Selector::AutoDetect, Cursor::new(tar_bytes()))
            .err()
            .unwrap();
        assert!(matches!(err, DispatchError::PreconditionViolation(_)));
    }

    #[test]
    fn test_priority_is_deterministic() {
        let dispatcher = FormatDispatcher::new();
        for _ in 0..10 {
            let mut s = marked(b"PK\x03\x04rest-of-jar");
            assert_eq!(dispatcher.resolve(&Selector::AutoDetect, &mut s).unwrap(), ArchiveFormat::Zip);
        }
        // jar stays reachable by name
        let reader = dispatcher.open_reader(Selector::by_name("jar"), marked(b"PK\x03\x04")).unwrap();
        assert_eq!(reader.format(), ArchiveFormat::Jar);
    }

    #[test]
    fn test_detection_does_not_consume() {
        let data = tar_bytes();
        let reader = FormatDispatcher::new().open_reader(Selector::AutoDetect, marked(&data)).unwrap();
        assert_eq!(reader.format(), ArchiveFormat::Tar);
        assert_eq!(rest(reader.into_inner()), data);
    }

    #[test]
    fn test_failed_detection_does_not_consume() {
        let data = b"certainly not an archive".to_vec();
        let mut stream = marked(&data);
        assert!(matches!(detect(&mut stream), Err(DispatchError::UnrecognizedFormat)));
        assert_eq!(rest(stream), data);
    }

    #[test]
    fn test_detect_each_format() {
        let mut dump = vec![0u8; 32];
        dump[24..28].copy_from_slice(&[0x6c, 0xea, 0x00, 0x00]);
        let cases: Vec<(Vec<u8>, ArchiveFormat)> = vec![
            (b"!<arch>\nfoo".to_vec(), ArchiveFormat::Ar),
            (b"070707".to_vec(), ArchiveFormat::Cpio),
            (vec![0x60, 0xea, 0x10], ArchiveFormat::Arj),
            (dump, ArchiveFormat::Dump),
            (tar_bytes(), ArchiveFormat::Tar),
        ];
        for (bytes, expected) in cases {
            assert_eq!(detect(&mut marked(&bytes)).unwrap(), expected);
        }
    }

    #[test]
    fn test_seven_z_is_not_streamable() {
        let magic = [0x37, 0x7a, 0xbc, 0xaf, 0x27, 0x1c, 0, 4];
        assert!(matches!(
            detect(&mut marked(&magic)),
            Err(DispatchError::StreamingUnsupported(ArchiveFormat::SevenZ))
        ));
        let d = FormatDispatcher::new();
        assert!(matches!(
            d.open_reader(Selector::by_name("7z"), Cursor::new(magic.to_vec())),
            Err(DispatchError::StreamingUnsupported(ArchiveFormat::SevenZ))
        ));
        assert!(matches!(
            d.open_writer("7z", Vec::new()),
            Err(DispatchError::StreamingUnsupported(ArchiveFormat::SevenZ))
        ));
    }

    #[test]
    fn test_name_rejections() {
        let d = FormatDispatcher::new();
        assert!(matches!(
            d.open_reader(Selector::by_name(""), Cursor::new(Vec::new())),
            Err(DispatchError::PreconditionViolation(_))
        ));
        assert!(matches!(
            d.open_reader(Selector::by_name("rar"), Cursor::new(Vec::new())),
            Err(DispatchError::UnknownFormat(name)) if name == "rar"
        ));
        assert!(matches!(
            d.open_reader(Selector::by_name("ZIP"), Cursor::new(Vec::new())),
            Err(DispatchError::UnknownFormat(_))
        ));
        assert!(matches!(d.open_writer("arj", Vec::new()), Err(DispatchError::UnknownFormat(_))));
        assert!(matches!(d.open_writer("dump", Vec::new()), Err(DispatchError::UnknownFormat(_))));
        assert!(matches!(d.open_writer("", Vec::new()), Err(DispatchError::PreconditionViolation(_))));
    }

    #[test]
    fn test_entry_encoding_write_once() {
        let mut open = FormatDispatcher::new();
        assert_eq!(open.entry_encoding(), None);
        open.set_entry_encoding(EntryEncoding::Utf8).unwrap();
        open.set_entry_encoding(EntryEncoding::Ascii).unwrap();
        assert_eq!(open.entry_encoding(), Some(EntryEncoding::Ascii));

        let mut fixed = FormatDispatcher::with_entry_encoding(EntryEncoding::Utf8);
        assert!(matches!(fixed.set_entry_encoding(EntryEncoding::Latin1), Err(DispatchError::InvalidState(_))));
        assert_eq!(fixed.entry_encoding(), Some(EntryEncoding::Utf8));
    }

    #[test]
    fn test_encoding_forwarded_to_handles() {
        let d = FormatDispatcher::with_entry_encoding(EntryEncoding::Utf8)
            .with_options(OpenOptions { entry_encoding: EntryEncoding::Ascii, ..Default::default() });
        assert_eq!(d.effective_encoding(), EntryEncoding::Utf8);

        let reader = d.open_reader(Selector::AutoDetect, marked(&tar_bytes())).unwrap();
        assert_eq!(reader.entry_encoding(), EntryEncoding::Utf8);
        let writer = d.open_writer("ar", Vec::new()).unwrap();
        assert_eq!(writer.entry_encoding(), EntryEncoding::Utf8);

        let defaulted = FormatDispatcher::new()
            .with_options(OpenOptions { entry_encoding: EntryEncoding::Ascii, ..Default::default() });
        assert_eq!(defaulted.open_writer("tar", Vec::new()).unwrap().entry_encoding(), EntryEncoding::Ascii);
    }

    #[test]
    fn test_tar_through_dispatcher() {
        let d = FormatDispatcher::new();
        let mut writer = d.open_writer("tar", Vec::new()).unwrap();
        writer.as_tar_mut().unwrap().append(&TarHeader::new("a", 3), &b"abc"[..]).unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = d.open_reader(Selector::AutoDetect, marked(&bytes)).unwrap();
        let tar = reader.as_tar_mut().unwrap();
        let entry = tar.next_entry().unwrap().unwrap();
        assert_eq!(entry.name, "a");
        assert_eq!(rest(&mut *tar), b"abc");
        assert!(tar.next_entry().unwrap().is_none());
    }

    /// An old-style (pre-POSIX) header: no magic, only a valid checksum.
    fn v7_block() -> Vec<u8> {
        use crate::field;
        use crate::tar::header::{header_checksum, CHKSUM, MAGIC};

        let mut block = [0u8; BLOCK_SIZE];
        TarHeader::new("v7.txt", 3).write(&mut block, EntryEncoding::default()).unwrap();
        block[MAGIC.0..MAGIC.0 + 8].fill(0);
        let sum = header_checksum(&block);
        field::format_checksum(sum, &mut block, CHKSUM.0, CHKSUM.1).unwrap();
        block.to_vec()
    }

    #[test]
    fn test_checksum_heuristic_detects_v7_tar() {
        let block = v7_block();
        let mut stream = marked(&block);
        assert_eq!(detect(&mut stream).unwrap(), ArchiveFormat::Tar);
        assert_eq!(rest(stream), block);
    }

    #[test]
    fn test_checksum_heuristic_rejects_corrupt_block() {
        let mut block = v7_block();
        block[0] ^= 0x01;
        assert!(matches!(detect(&mut marked(&block)), Err(DispatchError::UnrecognizedFormat)));

        // a partial block never reaches the heuristic
        assert!(matches!(detect(&mut marked(&v7_block()[..BLOCK_SIZE - 1])), Err(DispatchError::UnrecognizedFormat)));
    }

    #[test]
    fn test_writer_setup_error_is_tar_error() {
        let d = FormatDispatcher::new().with_options(OpenOptions { record_size: 100, ..Default::default() });
        assert!(matches!(
            d.open_writer("tar", Vec::new()),
            Err(DispatchError::Tar(TarError::InvalidRecordSize(100)))
        ));
    }
}
