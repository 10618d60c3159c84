pub mod field;
pub mod io_stream;
pub mod signature;
pub mod tar;
pub mod handle;
pub mod dispatch;

pub use field::{EntryEncoding, FieldError};
pub use io_stream::{MarkRead, MarkReader};
pub use signature::{ArchiveFormat, FormatSignature, SIGNATURES};
pub use tar::{LongNameMode, TarError, TarReader, TarWriter};
pub use tar::header::{EntryType, TarHeader};
pub use handle::{ArchiveReader, ArchiveWriter, OpenOptions};
pub use dispatch::{detect, DispatchError, FormatDispatcher, Selector};
