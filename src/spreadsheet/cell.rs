use crate::error::DecodeError;
use crate::spreadsheet::reference::index_to_reference;
use crate::spreadsheet::SpreadsheetError;
use chrono::Duration;
use chrono::NaiveDate;
use std::fmt::Display;

const MILLISECONDS_PER_DAY: f64 = 86_400_000.0;

/// How the raw value of a cell is to be read.
///
/// Dates and times are stored as day serials; the suffix names the epoch of
/// the workbook's date system.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CellType {
    /// Present but valueless: a styled blank or an empty formula result
    #[default]
    Empty,
    /// `1` or `0`
    Boolean,
    Number,
    NumberDateTime1900,
    NumberDate1900,
    NumberTime1900,
    NumberDateTime1904,
    NumberDate1904,
    NumberTime1904,
    /// `t="d"` cells holding ISO 8601 text
    IsoDateTime,
    /// Text held by the cell itself
    InlineString,
    /// Index into the shared string table. Decoders resolve it before storing the cell.
    SharedString,
    /// Error literal such as `#DIV/0!`
    Error,
}

impl CellType {
    fn is_1904(self) -> bool {
        matches!(self, CellType::NumberDateTime1904 | CellType::NumberDate1904 | CellType::NumberTime1904)
    }
}

/// Error literal for a BIFF8 error code
pub(crate) fn to_error_value(code: u8) -> &'static str {
    match code {
        0x00 => "#NULL!",
        0x07 => "#DIV/0!",
        0x0F => "#VALUE!",
        0x17 => "#REF!",
        0x1D => "#NAME?",
        0x24 => "#NUM!",
        0x2A => "#N/A",
        0x2B => "#GETTING_DATA",
        _ => "#ERROR!",
    }
}

/// A present cell.
#[derive(Clone, Debug, PartialEq)]
pub struct Cell {
    pub(crate) row: usize,
    pub(crate) col: usize,
    pub(crate) kind: CellType,
    /// As stored in the file
    pub(crate) value: String,
}

impl Cell {
    pub(crate) fn new(row: usize, col: usize, kind: CellType, value: impl Into<String>) -> Cell {
        Cell { row, col, kind, value: value.into() }
    }

    /// Zero-based row
    pub fn row(&self) -> usize {
        self.row
    }

    /// Zero-based column
    pub fn col(&self) -> usize {
        self.col
    }

    pub fn kind(&self) -> CellType {
        self.kind
    }

    pub fn raw_value(&self) -> &str {
        &self.value
    }

    /// A1-style position, e.g. `C7`
    pub fn reference(&self) -> String {
        index_to_reference(self.row, self.col)
    }

    /// The value as text, whatever its type.
    ///
    /// Numbers print in their shortest form, dates as `YYYY-MM-DD`, times as
    /// `hh:mm:ss[.mmm]` and booleans as `TRUE`/`FALSE`. A value that does not
    /// parse as its type is returned as stored.
    pub fn text(&self) -> String {
        let value = self.value.as_str();
        let text = match self.kind {
            CellType::Empty => Ok(String::new()),
            CellType::Boolean => Ok(to_boolean_string(value).to_owned()),
            CellType::Number => parse_serial(value).map(format_number),
            CellType::NumberDate1900 | CellType::NumberDate1904 => to_date_string(value, self.kind.is_1904()),
            CellType::NumberTime1900 | CellType::NumberTime1904 => parse_serial(value).map(to_time_string),
            CellType::NumberDateTime1900 | CellType::NumberDateTime1904 => to_datetime_string(value, self.kind.is_1904()),
            CellType::IsoDateTime => Ok(value.replacen('T', " ", 1)),
            CellType::InlineString | CellType::SharedString | CellType::Error => Ok(value.to_owned()),
        };
        text.unwrap_or_else(|error| {
            log::debug!("Keep raw value '{}' at {}: {}", value, self.reference(), error);
            value.to_owned()
        })
    }
}

impl Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text())
    }
}

/// Shortest text that reads back as the same number.
/// Integral values print without a fraction; magnitudes from 1e15 up or below 1e-5 use exponent form.
pub(crate) fn format_number(number: f64) -> String {
    let magnitude = number.abs();
    if number.fract() == 0.0 && magnitude < 1e15 {
        (number as i64).to_string()
    } else if magnitude >= 1e15 || magnitude < 1e-5 {
        format!("{number:e}")
    } else {
        number.to_string()
    }
}

fn to_boolean_string(value: &str) -> &'static str {
    if value == "1" || value.eq_ignore_ascii_case("true") {
        "TRUE"
    } else {
        "FALSE"
    }
}

fn parse_serial(value: &str) -> Result<f64, DecodeError> {
    Ok(value.trim().parse::<f64>()?)
}

/// Calendar date of a day serial.
fn to_date_string(value: &str, is_1904: bool) -> Result<String, DecodeError> {
    let days = parse_serial(value)?.trunc() as i64;
    to_date(days, is_1904)
        .map(|date| date.format("%Y-%m-%d").to_string())
        .ok_or_else(|| SpreadsheetError::CellValueError(value.to_owned()).into())
}

/// The 1900 system counts the nonexistent 1900-02-29 as day 60, so earlier serials count from one day later.
fn to_date(days: i64, is_1904: bool) -> Option<NaiveDate> {
    let epoch = if is_1904 {
        NaiveDate::from_ymd_opt(1904, 1, 1)
    } else if days < 60 {
        NaiveDate::from_ymd_opt(1899, 12, 31)
    } else {
        NaiveDate::from_ymd_opt(1899, 12, 30)
    };
    epoch
        .zip(Duration::try_days(days))
        .and_then(|(epoch, offset)| epoch.checked_add_signed(offset))
}

/// Clock time of a day serial, rounded to the millisecond.
/// Serials of a day or more keep their whole hours, so durations read as `36:00:00`.
fn to_time_string(serial: f64) -> String {
    to_clock_string((serial.abs() * MILLISECONDS_PER_DAY).round() as i64)
}

fn to_clock_string(total: i64) -> String {
    let (seconds, milliseconds) = (total / 1_000, total % 1_000);
    let (minutes, seconds) = (seconds / 60, seconds % 60);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    if milliseconds == 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}.{milliseconds:03}")
    }
}

/// Rounds the whole serial before splitting it, so a time that rounds up to
/// midnight moves the date to the next day.
fn to_datetime_string(value: &str, is_1904: bool) -> Result<String, DecodeError> {
    let total = (parse_serial(value)? * MILLISECONDS_PER_DAY).round() as i64;
    let day_length = MILLISECONDS_PER_DAY as i64;
    let (days, time) = (total.div_euclid(day_length), total.rem_euclid(day_length));
    let date = to_date(days, is_1904).ok_or_else(|| SpreadsheetError::CellValueError(value.to_owned()))?;
    Ok(format!("{} {}", date.format("%Y-%m-%d"), to_clock_string(time)))
}
