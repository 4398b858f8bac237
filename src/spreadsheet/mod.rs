//! # Workbook Loading
//!
//! Opens Excel workbooks in the legacy binary format (`.xls`, BIFF8 inside an
//! OLE compound file) and the Office Open XML format (`.xlsx`, SpreadsheetML
//! inside a ZIP package) behind one [`Workbook`] handle. The format is chosen
//! from the file extension alone; sheets are decoded on demand into sparse
//! [`Sheet`] grids.

pub mod cell;
pub(crate) mod reference;
pub mod sheet;
pub(crate) mod styles;
pub(crate) mod xls;
pub(crate) mod xlsx;

use crate::error::DecodeError;
use crate::error::Error;
use crate::error::ResultSource;
use crate::error::SheetId;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::xls::XlsSpreadsheet;
use crate::spreadsheet::xlsx::XlsxSpreadsheet;
use std::fmt::Display;
use std::fmt::Formatter;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Structural failures found while decoding a workbook
#[derive(Error, Debug)]
pub enum SpreadsheetError {
    #[error("Missing part '{0}'")]
    FileError(String),

    #[error("Workbook is password protected: {0}")]
    SpreadsheetPasswordProtectedError(String),

    #[error("Sheet index {0} out of range")]
    SheetIndexError(usize),

    #[error("Invalid cell value '{0}'")]
    CellValueError(String),

    #[error("Shared string index {0} out of range")]
    SharedStringIndexError(usize),

    #[error("Unsupported workbook extension '{0}'")]
    FormatError(String),
}

/// Supported workbook container formats
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Format {
    /// Excel 97-2003 binary workbook
    Xls,
    /// Excel 2007+ XML workbook
    Xlsx,
}

impl Format {
    /// Determines the format from the text after the last `.` of the file name.
    /// Matching ignores case and surrounding whitespace.
    pub fn from_path(path: &Path) -> Result<Format, Error> {
        let file_name = path.file_name().unwrap_or_default().to_string_lossy();
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, extension)| extension)
            .unwrap_or_default();
        extension.parse().map_err(|_: SpreadsheetError| Error::UnsupportedFormat {
            path: path.to_path_buf(),
            extension: extension.trim().to_owned(),
        })
    }
}

impl FromStr for Format {
    type Err = SpreadsheetError;

    /// Parses a bare extension such as `xlsx`, ignoring case and surrounding whitespace.
    fn from_str(extension: &str) -> Result<Self, Self::Err> {
        match extension.trim().to_ascii_lowercase().as_str() {
            "xls" => Ok(Format::Xls),
            "xlsx" => Ok(Format::Xlsx),
            _ => Err(SpreadsheetError::FormatError(extension.trim().to_owned())),
        }
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Xls => write!(f, "xls"),
            Format::Xlsx => write!(f, "xlsx"),
        }
    }
}

/// Common interface of the format decoders
pub(crate) trait Spreadsheet {
    /// Worksheet names in workbook order
    fn sheet_names(&self) -> Vec<String>;

    /// Decodes the worksheet at `index` (0-based)
    fn read_sheet(&mut self, index: usize) -> Result<Sheet, DecodeError>;
}

/// An open workbook.
///
/// Holds the decoder for its format and, for `.xlsx`, the open file handle.
/// Everything is released when the value is dropped.
pub struct Workbook {
    path: PathBuf,
    format: Format,
    spreadsheet: Box<dyn Spreadsheet>,
}

impl Workbook {
    /// Opens a workbook, choosing the decoder from the file extension.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Workbook, Error> {
        let path = path.as_ref();
        let format = Format::from_path(path)?;
        let spreadsheet: Box<dyn Spreadsheet> = match format {
            Format::Xls => Box::new(XlsSpreadsheet::open(path).with_source(path)?),
            Format::Xlsx => Box::new(XlsxSpreadsheet::open(path).with_source(path)?),
        };
        log::debug!("Opened {} workbook '{}'", format, path.display());
        Ok(Workbook {
            path: path.to_path_buf(),
            format,
            spreadsheet,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Number of worksheets.
    pub fn sheet_count(&self) -> usize {
        self.spreadsheet.sheet_names().len()
    }

    /// Worksheet names in workbook order.
    pub fn sheet_names(&self) -> Vec<String> {
        self.spreadsheet.sheet_names()
    }

    /// Decodes the worksheet at a 0-based position.
    pub fn sheet_at(&mut self, index: usize) -> Result<Sheet, Error> {
        if index >= self.sheet_count() {
            return Err(Error::SheetNotFound {
                path: self.path.to_owned(),
                sheet: SheetId::Index(index),
            });
        }
        self.spreadsheet.read_sheet(index).with_source(&self.path)
    }

    /// Decodes the worksheet with the given name.
    /// An exact match wins; otherwise names are compared ignoring ASCII case.
    pub fn sheet_by_name(&mut self, name: &str) -> Result<Sheet, Error> {
        let names = self.sheet_names();
        let index = names
            .iter()
            .position(|sheet_name| sheet_name == name)
            .or_else(|| names.iter().position(|sheet_name| sheet_name.eq_ignore_ascii_case(name)))
            .ok_or_else(|| Error::SheetNotFound {
                path: self.path.to_owned(),
                sheet: SheetId::Name(name.to_owned()),
            })?;
        self.sheet_at(index)
    }
}
