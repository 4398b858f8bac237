use std::fmt::Display;
use std::fmt::Formatter;
use std::path::Path;
use std::path::PathBuf;
use thiserror::Error;

/// Identifies the sheet a caller asked for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SheetId {
    /// Zero-based position in workbook order
    Index(usize),
    /// Sheet name as shown on the tab
    Name(String),
}

impl Display for SheetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SheetId::Index(index) => write!(f, "at index {index}"),
            SheetId::Name(name) => write!(f, "'{name}'"),
        }
    }
}

/// Errors returned by the public conversion API.
#[derive(Error, Debug)]
pub enum Error {
    /// File extension is neither `xls` nor `xlsx`
    #[error("Unsupported format '{extension}' for '{}': expected 'xls' or 'xlsx'", path.display())]
    UnsupportedFormat { path: PathBuf, extension: String },

    /// Requested sheet index or name does not exist
    #[error("Sheet {sheet} not found in '{}'", path.display())]
    SheetNotFound { path: PathBuf, sheet: SheetId },

    /// File is missing, unreadable or not a valid container
    #[error("Unreadable source '{}': {source}", path.display())]
    UnreadableSource {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },

    /// A data row holds a value outside the columns established by the header row
    #[error("Malformed sheet '{sheet}': cell {reference} lies outside the {width} header column(s)")]
    MalformedSheet {
        sheet: String,
        reference: String,
        width: usize,
    },
}

/// Aggregates every failure the container decoders can raise.
/// Only ever reaches callers as the source of [`Error::UnreadableSource`].
#[derive(Error, Debug)]
pub enum DecodeError {
    // Standard library errors
    #[error("{0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    ParseIntError(#[from] std::num::ParseIntError),

    #[error("{0}")]
    ParseFloatError(#[from] std::num::ParseFloatError),

    // Third-party library errors
    #[error("{0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("{0}")]
    XmlError(#[from] quick_xml::Error),

    #[error("{0}")]
    XmlEncodingError(#[from] quick_xml::encoding::EncodingError),

    #[error("{0}")]
    XmlAttributeError(#[from] quick_xml::events::attributes::AttrError),

    // Helper module errors
    #[error("{0}")]
    CfbHelperError(#[from] crate::helpers::cfb::CfbError),

    #[error("{0}")]
    XmlHelperError(#[from] crate::helpers::xml::XmlError),

    #[error("{0}")]
    Biff8HelperError(#[from] crate::helpers::biff8::Biff8Error),

    // Spreadsheet module errors
    #[error("{0}")]
    SpreadsheetError(#[from] crate::spreadsheet::SpreadsheetError),

    #[error("{0}")]
    XlsError(#[from] crate::spreadsheet::xls::XlsError),
}

/// Falls back to another lookup when a fallible lookup finds nothing.
pub(crate) trait ResultOptionChain {
    fn ok_none_else<F>(self, f: F) -> Self
    where
        F: FnOnce() -> Self;
}

impl<T, E> ResultOptionChain for Result<Option<T>, E> {
    fn ok_none_else<F>(self, f: F) -> Self
    where
        F: FnOnce() -> Self,
    {
        match self {
            Ok(None) => f(),
            _ => self,
        }
    }
}

pub(crate) trait ResultSource<T> {
    /// Attributes a decoder failure to the file it was reading.
    fn with_source(self, path: &Path) -> Result<T, Error>;
}

impl<T> ResultSource<T> for Result<T, DecodeError> {
    fn with_source(self, path: &Path) -> Result<T, Error> {
        self.map_err(|source| Error::UnreadableSource {
            path: path.to_path_buf(),
            source,
        })
    }
}
