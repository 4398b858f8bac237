//! BIFF8 (`.xls`) decoding.
//!
//! The workbook stream sits in an OLE compound file and starts with a globals
//! substream: code page, date system, formats, shared strings and the offset
//! of each sheet's own substream. Sheet substreams are decoded on demand.

use crate::error::DecodeError;
use crate::error::ResultOptionChain;
use crate::helpers::biff8::Biff8Reader;
use crate::helpers::cfb::Cfb;
use crate::match_biff8_record;
use crate::spreadsheet::cell::format_number;
use crate::spreadsheet::cell::to_error_value;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::styles::NumberFormats;
use crate::spreadsheet::Spreadsheet;
use crate::spreadsheet::SpreadsheetError;
use either::Either;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::io::Read;
use std::io::Seek;
use std::path::Path;
use thiserror::Error;

// Substream boundaries
const BOF: u16 = 2057;
const EOF: u16 = 10;

// Globals
const FILE_PASS: u16 = 47;
const CODE_PAGE: u16 = 66;
const DATE1904: u16 = 34;
const FORMAT: u16 = 1054;
const XF: u16 = 224;
const SST: u16 = 252;
const BOUND_SHEET8: u16 = 133;

// Cells
const BLANK: u16 = 513;
const MUL_BLANK: u16 = 190;
const NUMBER: u16 = 515;
const RK: u16 = 638;
const MUL_RK: u16 = 189;
const BOOL_ERR: u16 = 517;
const LABEL: u16 = 516;
const LABEL_SST: u16 = 253;
const FORMULA: u16 = 6;
/// Cached string result of the preceding FORMULA
const STRING: u16 = 519;
// May sit between a FORMULA and its STRING
const SHR_FMLA: u16 = 1212;
const ARRAY: u16 = 545;
const TABLE: u16 = 566;

/// BOUNDSHEET8 type of worksheets; charts, macro sheets and VB modules use other values
const WORKSHEET: u8 = 0;

/// Mask selecting the marker bytes of a non-numeric formula result
const FORMULA_RESULT_MARKER: u64 = 0xFFFF_0000_0000_0000;

#[derive(Error, Debug)]
pub enum XlsError {
    #[error("Unknown code page {0}")]
    CodePageError(u16),

    #[error("Unreadable formula result {0:#018x}")]
    FormulaValueError(u64),
}

/// A decoded cell record: its type, or the XF index that decides it, and the raw value
type CellRecord = (Either<CellType, usize>, String);

/// Workbook-wide state collected from the globals substream
#[derive(Default)]
struct Globals {
    is_1904: bool,
    shared_strings: Vec<String>,
    custom_formats: HashMap<u16, String>,
    xf_formats: Vec<u16>,
    /// Worksheets in workbook order: (name, offset of the BOF record)
    sheets: Vec<(String, usize)>,
}

/// The workbook stream is held in memory; no file handle stays open.
pub(crate) struct XlsSpreadsheet {
    reader: Biff8Reader,
    shared_strings: Vec<String>,
    number_formats: NumberFormats,
    sheets: Vec<(String, usize)>,
}

impl XlsSpreadsheet {
    pub(crate) fn open(path: &Path) -> Result<XlsSpreadsheet, DecodeError> {
        Self::from_reader(&mut BufReader::new(File::open(path)?))
    }

    /// Pulls the workbook stream out of a compound file.
    /// Files written by Excel 5 name the stream `Book`.
    pub(crate) fn from_reader<RS: Read + Seek>(reader: &mut RS) -> Result<XlsSpreadsheet, DecodeError> {
        let cfb = Cfb::new(reader)?;
        let stream = cfb.read("Workbook")
            .ok_none_else(|| cfb.read("Book"))?
            .ok_or_else(|| SpreadsheetError::FileError("Workbook".to_owned()))?;
        Self::from_stream(stream)
    }

    pub(crate) fn from_stream(stream: Vec<u8>) -> Result<XlsSpreadsheet, DecodeError> {
        let mut reader = Biff8Reader::new(stream);
        let globals = read_globals(&mut reader)?;
        // DATE1904 may come after the FORMAT records, so formats are classified once all globals are read
        let number_formats = NumberFormats::new(&globals.xf_formats, &globals.custom_formats, globals.is_1904);
        log::trace!("Workbook stream lists {} worksheet(s)", globals.sheets.len());
        Ok(XlsSpreadsheet {
            reader,
            shared_strings: globals.shared_strings,
            number_formats,
            sheets: globals.sheets,
        })
    }

    /// Decodes the cell record of type `tag` whose row and column were just read.
    fn read_cell_record(&mut self, tag: u16) -> Result<CellRecord, DecodeError> {
        let reader = &mut self.reader;
        match tag {
            BLANK => Ok((Either::Left(CellType::Empty), String::new())),
            NUMBER => {
                let xf = reader.read_u16()? as usize;
                Ok((Either::Right(xf), format_number(reader.read_f64()?)))
            }
            RK => {
                let xf = reader.read_u16()? as usize;
                Ok((Either::Right(xf), format_number(reader.read_rk_number()?)))
            }
            BOOL_ERR => {
                reader.skip(2)?;
                let value = reader.read_u8()?;
                match reader.read_u8()? {
                    0 => Ok((Either::Left(CellType::Boolean), value.to_string())),
                    _ => Ok((Either::Left(CellType::Error), to_error_value(value).to_owned())),
                }
            }
            LABEL => {
                reader.skip(2)?;
                Ok((Either::Left(CellType::InlineString), reader.read_string()?))
            }
            LABEL_SST => {
                reader.skip(2)?;
                let index = reader.read_usize()?;
                let value = self.shared_strings
                    .get(index)
                    .ok_or(SpreadsheetError::SharedStringIndexError(index))?;
                Ok((Either::Left(CellType::InlineString), value.to_owned()))
            }
            _ => read_formula_result(reader),
        }
    }
}

impl Spreadsheet for XlsSpreadsheet {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.to_owned()).collect()
    }

    /// Decodes the substream that starts at the sheet's BOF record.
    ///
    /// Styled blanks and empty formula results become empty cells.
    /// Other records are skipped.
    fn read_sheet(&mut self, index: usize) -> Result<Sheet, DecodeError> {
        let (name, offset) = self.sheets
            .get(index)
            .cloned()
            .ok_or(SpreadsheetError::SheetIndexError(index))?;
        let mut sheet = Sheet::new(&name);
        self.reader.goto(offset);
        self.reader.next()?;
        while let Some(tag) = self.reader.next()? {
            match tag {
                BOF | EOF => break,
                MUL_RK | MUL_BLANK => {
                    let row = self.reader.read_u16()? as usize;
                    let first_col = self.reader.read_u16()? as usize;
                    let last_col = self.reader.u16_before_end(2)? as usize;
                    for col in first_col..=last_col {
                        let cell = if tag == MUL_RK {
                            let xf = self.reader.read_u16()? as usize;
                            let value = format_number(self.reader.read_rk_number()?);
                            Cell::new(row, col, self.number_formats.kind(xf), value)
                        } else {
                            Cell::new(row, col, CellType::Empty, "")
                        };
                        sheet.push(cell);
                    }
                }
                BLANK | NUMBER | RK | BOOL_ERR | LABEL | LABEL_SST | FORMULA => {
                    let row = self.reader.read_u16()? as usize;
                    let col = self.reader.read_u16()? as usize;
                    let (kind, value) = self.read_cell_record(tag)?;
                    let kind = kind.left_or_else(|xf| self.number_formats.kind(xf));
                    sheet.push(Cell::new(row, col, kind, value));
                }
                _ => (),
            }
        }
        sheet.finish();
        log::debug!("Decoded sheet '{}' with {} row(s)", name, sheet.row_count());
        Ok(sheet)
    }
}

/// Reads the globals substream up to its EOF record.
fn read_globals(reader: &mut Biff8Reader) -> Result<Globals, DecodeError> {
    let mut globals = Globals::default();
    match_biff8_record!(reader => {
        EOF => break,
        FILE_PASS => Err(SpreadsheetError::SpreadsheetPasswordProtectedError("FILEPASS".to_owned()))?,
        CODE_PAGE => {
            let code_page = reader.read_u16()?;
            reader.encoding = codepage::to_encoding(code_page).ok_or(XlsError::CodePageError(code_page))?;
        }
        DATE1904 => globals.is_1904 = reader.read_u16()? == 1,
        FORMAT => {
            let id = reader.read_u16()?;
            globals.custom_formats.insert(id, reader.read_string()?);
        }
        XF => {
            reader.skip(2)?; // font index
            globals.xf_formats.push(reader.read_u16()?);
        }
        SST => {
            reader.skip(4)?; // total references
            let count = reader.read_usize()?;
            globals.shared_strings = (0..count)
                .map(|_| reader.read_rich_string())
                .collect::<Result<_, _>>()?;
        }
        BOUND_SHEET8 => {
            let offset = reader.read_usize()?;
            reader.skip(1)?; // visibility
            let sheet_type = reader.read_u8()?;
            let name = reader.read_short_string()?;
            if sheet_type == WORKSHEET {
                globals.sheets.push((name, offset));
            } else {
                log::debug!("Skip sheet '{name}' of type {sheet_type}");
            }
        }
    });
    Ok(globals)
}

/// Reads the cached result of a FORMULA record.
///
/// The 8-byte result is a double unless its top two bytes are `0xFFFF`;
/// then the first byte says what it holds:
///
/// | Byte | Result                                        |
/// |------|-----------------------------------------------|
/// | 0    | string, stored in the following STRING record |
/// | 1    | boolean in the third byte                     |
/// | 2    | error code in the third byte                  |
/// | 3    | empty string                                  |
fn read_formula_result(reader: &mut Biff8Reader) -> Result<CellRecord, DecodeError> {
    let xf = reader.read_u16()? as usize;
    let result = reader.read_u64()?;
    if result & FORMULA_RESULT_MARKER != FORMULA_RESULT_MARKER {
        return Ok((Either::Right(xf), format_number(f64::from_bits(result))));
    }
    let payload = ((result >> 16) & 0xFF) as u8;
    match result & 0xFF {
        0 => loop {
            match reader.next()? {
                Some(STRING) => return Ok((Either::Left(CellType::InlineString), reader.read_string()?)),
                Some(SHR_FMLA | ARRAY | TABLE) => continue,
                _ => return Err(XlsError::FormulaValueError(result).into()),
            }
        },
        1 => Ok((Either::Left(CellType::Boolean), if payload > 0 { "1" } else { "0" }.to_owned())),
        2 => Ok((Either::Left(CellType::Error), to_error_value(payload).to_owned())),
        3 => Ok((Either::Left(CellType::Empty), String::new())),
        _ => Err(XlsError::FormulaValueError(result).into()),
    }
}
