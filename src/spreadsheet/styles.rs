//! Number format classification shared by both decoders.
//!
//! A numeric cell only says which cell format (XF) it uses. The XF names a
//! number format, built in or defined by the workbook, and that format decides
//! whether the number is shown as a date, a time, both or a plain number.

use crate::spreadsheet::cell::CellType;
use std::collections::HashMap;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Family {
    Number,
    Date,
    Time,
    DateTime,
}

impl Family {
    /// Built-in formats that display dates or times
    fn builtin(id: u16) -> Family {
        match id {
            14..=17 => Family::Date,
            18..=21 | 45..=47 => Family::Time,
            22 => Family::DateTime,
            _ => Family::Number,
        }
    }

    /// Looks for date (`y`, `d`) and time (`h`, `s`) tokens in a format code.
    /// Quoted literals, bracketed sections and escaped characters are skipped.
    /// `m` alone says nothing since it means both month and minute.
    fn of_code(code: &str) -> Family {
        let mut has_date = false;
        let mut has_time = false;
        let mut chars = code.chars();
        while let Some(character) = chars.next() {
            match character {
                '\\' | '_' | '*' => {
                    chars.next();
                }
                '"' => {
                    chars.by_ref().find(|&c| c == '"');
                }
                '[' => {
                    chars.by_ref().find(|&c| c == ']');
                }
                'y' | 'Y' | 'd' | 'D' => has_date = true,
                'h' | 'H' | 's' | 'S' => has_time = true,
                _ => (),
            }
        }
        match (has_date, has_time) {
            (true, true) => Family::DateTime,
            (true, false) => Family::Date,
            (false, true) => Family::Time,
            (false, false) => Family::Number,
        }
    }

    fn cell_type(self, is_1904: bool) -> CellType {
        match (self, is_1904) {
            (Family::Number, _) => CellType::Number,
            (Family::Date, false) => CellType::NumberDate1900,
            (Family::Date, true) => CellType::NumberDate1904,
            (Family::Time, false) => CellType::NumberTime1900,
            (Family::Time, true) => CellType::NumberTime1904,
            (Family::DateTime, false) => CellType::NumberDateTime1900,
            (Family::DateTime, true) => CellType::NumberDateTime1904,
        }
    }
}

/// Cell type of numeric values, by XF index
#[derive(Clone, Debug, Default)]
pub(crate) struct NumberFormats {
    kinds: Vec<CellType>,
}

impl NumberFormats {
    /// `xf_formats` holds the number format id of each XF in order.
    /// A workbook-defined code in `custom` takes precedence over the built-in format with the same id.
    pub(crate) fn new(xf_formats: &[u16], custom: &HashMap<u16, String>, is_1904: bool) -> NumberFormats {
        let kinds = xf_formats
            .iter()
            .map(|id| match custom.get(id) {
                Some(code) => Family::of_code(code),
                None => Family::builtin(*id),
            })
            .map(|family| family.cell_type(is_1904))
            .collect();
        NumberFormats { kinds }
    }

    /// Unknown XF indexes are plain numbers.
    pub(crate) fn kind(&self, xf: usize) -> CellType {
        self.kinds.get(xf).copied().unwrap_or(CellType::Number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_codes() {
        assert_eq!(Family::of_code("yyyy-mm-dd"), Family::Date);
        assert_eq!(Family::of_code("hh:mm:ss"), Family::Time);
        assert_eq!(Family::of_code("yyyy-mm-dd hh:mm"), Family::DateTime);
        assert_eq!(Family::of_code("#,##0.00"), Family::Number);
        assert_eq!(Family::of_code("[Red]0.00\"days\""), Family::Number);
        assert_eq!(Family::of_code("0\\d"), Family::Number);
        assert_eq!(Family::of_code("[h]:mm:ss"), Family::Time);
        assert_eq!(Family::of_code("General"), Family::Number);
    }

    #[test]
    fn builtin_formats() {
        assert_eq!(Family::builtin(14), Family::Date);
        assert_eq!(Family::builtin(22), Family::DateTime);
        assert_eq!(Family::builtin(46), Family::Time);
        assert_eq!(Family::builtin(2), Family::Number);
    }

    #[test]
    fn kinds_by_xf() {
        let custom = HashMap::from([(164, "yyyy\\-mm\\-dd".to_owned()), (14, "0.00".to_owned())]);
        let formats = NumberFormats::new(&[0, 164, 22, 14], &custom, false);
        assert_eq!(formats.kind(0), CellType::Number);
        assert_eq!(formats.kind(1), CellType::NumberDate1900);
        assert_eq!(formats.kind(2), CellType::NumberDateTime1900);
        assert_eq!(formats.kind(3), CellType::Number);
        assert_eq!(formats.kind(9), CellType::Number);

        let formats = NumberFormats::new(&[14, 20], &HashMap::new(), true);
        assert_eq!(formats.kind(0), CellType::NumberDate1904);
        assert_eq!(formats.kind(1), CellType::NumberTime1904);
    }
}
