//! # Spreadsheet Table Import
//!
//! Reads Excel workbooks and turns their sheets into plain tables of text, the
//! way a data-table import utility would.
//!
//! ## Features
//!
//! - **Two container formats**: Excel 97-2003 (`.xls`) and Excel 2007+ (`.xlsx`),
//!   chosen by file extension
//! - **Pure Rust decoding**: OLE compound files, BIFF8 records and SpreadsheetML
//!   are parsed in-tree
//! - **Header handling**: the first populated row either names the columns or is
//!   data under `Column1`, `Column2`, ...
//! - **Text output**: numbers, booleans, dates, times and error codes are all
//!   rendered as text
//!
//! ## Entry Points
//!
//! - [`read_dataset`]: every sheet of a workbook
//! - [`read_table_by_index`]: one sheet by 0-based position
//! - [`read_table_by_name`]: one sheet by name
//!
//! ```no_run
//! let dataset = sheet_table::read_dataset("report.xlsx", true)?;
//! for table in &dataset.tables {
//!     println!("{}: {} column(s), {} row(s)", table.name, table.columns.len(), table.rows.len());
//! }
//! # Ok::<(), sheet_table::Error>(())
//! ```

mod error;
mod helpers;
pub mod spreadsheet;
pub mod table;

pub use crate::error::DecodeError;
pub use crate::error::Error;
pub use crate::error::SheetId;
pub use crate::spreadsheet::cell::Cell;
pub use crate::spreadsheet::cell::CellType;
pub use crate::spreadsheet::sheet::Row;
pub use crate::spreadsheet::sheet::Sheet;
pub use crate::spreadsheet::Format;
pub use crate::spreadsheet::Workbook;
pub use crate::table::projection::project;
pub use crate::table::Dataset;
pub use crate::table::Table;

use std::path::Path;

/// Reads every sheet of a workbook into a dataset.
///
/// Tables come in sheet order. Sheets that project to nothing (no columns and
/// no rows) are left out; a workbook without sheets gives an empty dataset.
pub fn read_dataset<P: AsRef<Path>>(path: P, header: bool) -> Result<Dataset, Error> {
    let mut workbook = Workbook::open(path)?;
    let mut dataset = Dataset::default();
    for index in 0..workbook.sheet_count() {
        let sheet = workbook.sheet_at(index)?;
        dataset.push(project(&sheet, header)?);
    }
    log::debug!("Read {} table(s) from '{}'", dataset.len(), workbook.path().display());
    Ok(dataset)
}

/// Reads the sheet at a 0-based position into a table.
pub fn read_table_by_index<P: AsRef<Path>>(path: P, index: usize, header: bool) -> Result<Table, Error> {
    let mut workbook = Workbook::open(path)?;
    let sheet = workbook.sheet_at(index)?;
    project(&sheet, header)
}

/// Reads the named sheet into a table.
///
/// An exact name match is preferred; otherwise names are compared ignoring
/// ASCII case.
pub fn read_table_by_name<P: AsRef<Path>>(path: P, name: &str, header: bool) -> Result<Table, Error> {
    let mut workbook = Workbook::open(path)?;
    let sheet = workbook.sheet_by_name(name)?;
    project(&sheet, header)
}
