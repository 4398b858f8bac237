//! SpreadsheetML (`.xlsx`) decoding.
//!
//! The package is a ZIP archive. `xl/workbook.xml` lists the sheets and its
//! relationships part maps each sheet to a worksheet part. Styles and shared
//! strings are loaded once when the package is opened; worksheet parts are
//! streamed on demand.

use crate::error::DecodeError;
use crate::helpers::cfb::Cfb;
use crate::helpers::xml::XmlElement;
use crate::helpers::xml::XmlReader;
use crate::helpers::xml::XmlText;
use crate::helpers::zip::ZipPackage;
use crate::match_xml_events;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::cell::CellType;
use crate::spreadsheet::reference::reference_to_index;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::styles::NumberFormats;
use crate::spreadsheet::Spreadsheet;
use crate::spreadsheet::SpreadsheetError;
use quick_xml::events::Event;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::path::Path;
use zip::ZipArchive;

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELATIONSHIPS_PART: &str = "xl/_rels/workbook.xml.rels";
const STYLES_PART: &str = "xl/styles.xml";
const SHARED_STRINGS_PART: &str = "xl/sharedStrings.xml";
/// Stream holding the real package inside an encrypted OLE container
const ENCRYPTED_PACKAGE: &str = "EncryptedPackage";

const TAG_RELATIONSHIP: &[u8] = b"Relationship";
const TAG_WORKBOOK_PROPERTIES: &[u8] = b"workbookPr";
const TAG_SHEET: &[u8] = b"sheet";
const TAG_NUMBER_FORMATS: &[u8] = b"numFmts";
const TAG_NUMBER_FORMAT: &[u8] = b"numFmt";
const TAG_CELL_FORMATS: &[u8] = b"cellXfs";
const TAG_CELL_FORMAT: &[u8] = b"xf";
const TAG_STRING_ITEM: &[u8] = b"si";
const TAG_PHONETIC_RUN: &[u8] = b"rPh";
const TAG_TEXT: &[u8] = b"t";
const TAG_ROW: &[u8] = b"row";
const TAG_CELL: &[u8] = b"c";
const TAG_INLINE_STRING: &[u8] = b"is";
const TAG_VALUE: &[u8] = b"v";

pub(crate) type FileReader = BufReader<File>;

pub(crate) struct XlsxSpreadsheet<RS: Read + Seek = FileReader> {
    zip: ZipArchive<RS>,
    shared_strings: Vec<String>,
    number_formats: NumberFormats,
    /// Worksheets in workbook order: (name, part name)
    sheets: Vec<(String, String)>,
}

impl XlsxSpreadsheet<FileReader> {
    /// The file stays open until the spreadsheet is dropped.
    pub(crate) fn open(path: &Path) -> Result<Self, DecodeError> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }
}

impl<RS: Read + Seek> XlsxSpreadsheet<RS> {
    pub(crate) fn from_reader(mut reader: RS) -> Result<Self, DecodeError> {
        if is_encrypted_package(&mut reader)? {
            Err(SpreadsheetError::SpreadsheetPasswordProtectedError(ENCRYPTED_PACKAGE.to_owned()))?;
        }

        let mut zip = ZipArchive::new(reader)?;
        let worksheet_parts = read_worksheet_parts(&mut zip)?;
        let (sheets, is_1904) = read_workbook(&mut zip, &worksheet_parts)?;
        let number_formats = read_number_formats(&mut zip, is_1904)?;
        let shared_strings = read_shared_strings(&mut zip)?;
        log::trace!("Package lists {} worksheet(s) and {} shared string(s)", sheets.len(), shared_strings.len());

        Ok(XlsxSpreadsheet { zip, shared_strings, number_formats, sheets })
    }
}

impl<RS: Read + Seek> Spreadsheet for XlsxSpreadsheet<RS> {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.to_owned()).collect()
    }

    /// Streams one worksheet part into a sparse sheet.
    ///
    /// A cell without an `r` attribute goes right after the previous cell of its
    /// row; a row without one goes right after the previous row.
    fn read_sheet(&mut self, index: usize) -> Result<Sheet, DecodeError> {
        let (name, part) = self.sheets
            .get(index)
            .cloned()
            .ok_or(SpreadsheetError::SheetIndexError(index))?;
        let mut reader = self.zip
            .xml_part(&part)?
            .ok_or_else(|| SpreadsheetError::FileError(part.to_owned()))?;

        let mut sheet = Sheet::new(&name);
        let mut next_row = 0usize;
        let mut next_col = 0usize;
        let mut pending = PendingCell::default();
        match_xml_events!(reader => {
            Event::Start(event) if event.local_name().as_ref() == TAG_ROW => {
                next_row = event.parsed_attribute::<usize>("r")?
                    .and_then(|r| r.checked_sub(1))
                    .unwrap_or(next_row);
                next_col = 0;
            }
            Event::End(event) if event.local_name().as_ref() == TAG_ROW => next_row += 1,
            Event::Start(event) if event.local_name().as_ref() == TAG_CELL => {
                let (row, col) = event.attribute("r")?
                    .and_then(|reference| reference_to_index(&reference))
                    .unwrap_or((next_row, next_col));
                next_col = col + 1;
                let mut kind = value_kind(event.attribute("t")?.as_deref());
                if kind == CellType::Number {
                    if let Some(xf) = event.attribute("s")?.and_then(|s| s.trim().parse::<usize>().ok()) {
                        kind = self.number_formats.kind(xf);
                    }
                }
                pending = PendingCell { row, col, kind, value: String::new() };
            }
            Event::Start(event) if event.local_name().as_ref() == TAG_INLINE_STRING => {
                pending.value = read_text(&mut reader, TAG_INLINE_STRING, false)?;
            }
            Event::Start(event) if event.local_name().as_ref() == TAG_VALUE => {
                pending.value = read_text(&mut reader, TAG_VALUE, true)?;
            }
            Event::End(event) if event.local_name().as_ref() == TAG_CELL => {
                sheet.push(std::mem::take(&mut pending).into_cell(&self.shared_strings)?);
            }
        });
        sheet.finish();
        log::debug!("Decoded sheet '{}' with {} row(s)", name, sheet.row_count());
        Ok(sheet)
    }
}

/// Cell collected between `<c>` and `</c>`
#[derive(Default)]
struct PendingCell {
    row: usize,
    col: usize,
    kind: CellType,
    value: String,
}

impl PendingCell {
    /// Resolves shared strings. Valueless cells stay present as empty cells.
    fn into_cell(self, shared_strings: &[String]) -> Result<Cell, DecodeError> {
        let PendingCell { row, col, kind, value } = self;
        let cell = match kind {
            CellType::InlineString | CellType::Error => Cell::new(row, col, kind, value),
            _ if value.trim().is_empty() => Cell::new(row, col, CellType::Empty, ""),
            CellType::SharedString => {
                let index = value.trim().parse::<usize>()?;
                let string = shared_strings
                    .get(index)
                    .ok_or(SpreadsheetError::SharedStringIndexError(index))?;
                Cell::new(row, col, CellType::InlineString, string.as_str())
            }
            _ => Cell::new(row, col, kind, value),
        };
        Ok(cell)
    }
}

/// Cell type named by the `t` attribute of `<c>`
fn value_kind(t: Option<&str>) -> CellType {
    match t {
        Some("s") => CellType::SharedString,
        Some("inlineStr" | "str") => CellType::InlineString,
        Some("b") => CellType::Boolean,
        Some("e") => CellType::Error,
        Some("d") => CellType::IsoDateTime,
        _ => CellType::Number,
    }
}

/// An encrypted package is an OLE container with an `EncryptedPackage` stream instead of a ZIP archive.
/// The reader is rewound either way.
fn is_encrypted_package<RS: Read + Seek>(reader: &mut RS) -> Result<bool, DecodeError> {
    let encrypted = Cfb::is_cfb(reader)?
        && Cfb::new(reader).is_ok_and(|cfb| cfb.exists(ENCRYPTED_PACKAGE));
    reader.seek(SeekFrom::Start(0))?;
    Ok(encrypted)
}

/// Maps relationship ids of the workbook part to worksheet part names.
/// Chartsheets, dialog sheets and macro sheets use other relationship types and are left out.
fn read_worksheet_parts<RS: Read + Seek>(zip: &mut ZipArchive<RS>) -> Result<HashMap<String, String>, DecodeError> {
    let mut reader = zip
        .xml_part(WORKBOOK_RELATIONSHIPS_PART)?
        .ok_or_else(|| SpreadsheetError::FileError(WORKBOOK_RELATIONSHIPS_PART.to_owned()))?;
    let mut parts = HashMap::new();
    match_xml_events!(reader => {
        Event::Start(event) if event.local_name().as_ref() == TAG_RELATIONSHIP => {
            let is_worksheet = event.attribute("Type")?.map_or(true, |kind| kind.ends_with("/worksheet"));
            if let (true, Some(id), Some(target)) = (is_worksheet, event.attribute("Id")?, event.attribute("Target")?) {
                parts.insert(id, part_name(&target));
            }
        }
    });
    Ok(parts)
}

/// Resolves a relationship target of the workbook part to a part name.
fn part_name(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_owned(),
        None if target.starts_with("xl/") => target.to_owned(),
        None => format!("xl/{target}"),
    }
}

/// Reads the worksheet list and the date system.
fn read_workbook<RS: Read + Seek>(
    zip: &mut ZipArchive<RS>,
    worksheet_parts: &HashMap<String, String>,
) -> Result<(Vec<(String, String)>, bool), DecodeError> {
    let mut reader = zip
        .xml_part(WORKBOOK_PART)?
        .ok_or_else(|| SpreadsheetError::FileError(WORKBOOK_PART.to_owned()))?;
    let mut sheets = Vec::new();
    let mut is_1904 = false;
    match_xml_events!(reader => {
        Event::Start(event) if event.local_name().as_ref() == TAG_SHEET => {
            let name = event.attribute("name")?;
            let part = event.attribute("id")?.and_then(|id| worksheet_parts.get(&id));
            match name.zip(part) {
                Some((name, part)) => sheets.push((name, part.to_owned())),
                None => log::debug!("Skip sheet entry without a worksheet part"),
            }
        }
        Event::Start(event) if event.local_name().as_ref() == TAG_WORKBOOK_PROPERTIES => {
            is_1904 = matches!(event.attribute("date1904")?.as_deref(), Some("1" | "true"));
        }
    });
    Ok((sheets, is_1904))
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum StylesSection {
    NumberFormats,
    CellFormats,
    Other,
}

/// Reads custom number formats and the number format of each cell format.
/// Without a styles part every number is plain.
fn read_number_formats<RS: Read + Seek>(zip: &mut ZipArchive<RS>, is_1904: bool) -> Result<NumberFormats, DecodeError> {
    let mut reader = match zip.xml_part(STYLES_PART)? {
        Some(reader) => reader,
        None => return Ok(NumberFormats::default()),
    };
    let mut section = StylesSection::Other;
    let mut custom = HashMap::<u16, String>::new();
    let mut xf_formats = Vec::<u16>::new();
    match_xml_events!(reader => {
        Event::Start(event) if event.local_name().as_ref() == TAG_NUMBER_FORMATS => section = StylesSection::NumberFormats,
        Event::Start(event) if event.local_name().as_ref() == TAG_CELL_FORMATS => section = StylesSection::CellFormats,
        Event::End(event) if event.local_name().as_ref() == TAG_NUMBER_FORMATS || event.local_name().as_ref() == TAG_CELL_FORMATS => {
            section = StylesSection::Other;
        }
        Event::Start(event) if section == StylesSection::NumberFormats && event.local_name().as_ref() == TAG_NUMBER_FORMAT => {
            if let Some((id, code)) = event.parsed_attribute::<u16>("numFmtId")?.zip(event.attribute("formatCode")?) {
                custom.insert(id, code);
            }
        }
        // Cell style XFs live under cellStyleXfs and are not referenced by cells
        Event::Start(event) if section == StylesSection::CellFormats && event.local_name().as_ref() == TAG_CELL_FORMAT => {
            xf_formats.push(event.parsed_attribute::<u16>("numFmtId")?.unwrap_or(0));
        }
    });
    Ok(NumberFormats::new(&xf_formats, &custom, is_1904))
}

/// A package without a shared strings part has none.
fn read_shared_strings<RS: Read + Seek>(zip: &mut ZipArchive<RS>) -> Result<Vec<String>, DecodeError> {
    let mut shared_strings = Vec::new();
    let mut reader = match zip.xml_part(SHARED_STRINGS_PART)? {
        Some(reader) => reader,
        None => return Ok(shared_strings),
    };
    match_xml_events!(reader => {
        Event::Start(event) if event.local_name().as_ref() == TAG_STRING_ITEM => {
            shared_strings.push(read_text(&mut reader, TAG_STRING_ITEM, false)?);
        }
    });
    Ok(shared_strings)
}

/// Collects the text up to the `end` tag, leaving out phonetic runs.
/// Rich text is the concatenation of its `<t>` runs; with `bare` set the content is taken as is, as in `<v>`.
fn read_text<R: BufRead>(reader: &mut XmlReader<R>, end: &[u8], bare: bool) -> Result<String, DecodeError> {
    let mut text = String::new();
    let mut in_phonetic = false;
    let mut in_run = bare;
    match_xml_events!(reader => {
        Event::End(event) if event.local_name().as_ref() == end => break,
        Event::Start(event) if event.local_name().as_ref() == TAG_PHONETIC_RUN => in_phonetic = true,
        Event::End(event) if event.local_name().as_ref() == TAG_PHONETIC_RUN => in_phonetic = false,
        Event::Start(event) if event.local_name().as_ref() == TAG_TEXT => in_run = !in_phonetic,
        Event::End(event) if event.local_name().as_ref() == TAG_TEXT => in_run = false,
        Event::Text(event) if in_run => text.push_text(&event)?,
        Event::CData(event) if in_run => text.push_cdata(&event)?,
        Event::GeneralRef(event) if in_run => text.push_reference(&event)?,
    });
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    const WORKBOOK_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/chartsheet" Target="chartsheets/sheet1.xml"/>
<Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="/xl/worksheets/sheet2.xml"/>
</Relationships>"#;

    const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<sheets>
<sheet name="Data" sheetId="1" r:id="rId1"/>
<sheet name="Chart" sheetId="2" r:id="rId2"/>
<sheet name="Sparse" sheetId="3" r:id="rId3"/>
</sheets>
</workbook>"#;

    const STYLES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
<numFmts count="1"><numFmt numFmtId="164" formatCode="yyyy\-mm\-dd"/></numFmts>
<cellStyleXfs count="1"><xf numFmtId="22"/></cellStyleXfs>
<cellXfs count="3"><xf numFmtId="0"/><xf numFmtId="164"/><xf numFmtId="20"/></cellXfs>
</styleSheet>"#;

    const SHARED_STRINGS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="3" uniqueCount="3">
<si><t>Name</t></si>
<si><r><t>Rich </t></r><r><t>text</t></r></si>
<si><t>Tom &amp; Jerry</t><rPh><t>ignored</t></rPh></si>
</sst>"#;

    const SHEET1: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>
<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="inlineStr"><is><t>When</t></is></c><c r="C1" t="str"><v>Flag</v></c></row>
<row r="2"><c r="A2" t="s"><v>1</v></c><c r="B2" s="1"><v>45292</v></c><c r="C2" t="b"><v>1</v></c><c r="D2" t="e"><v>#DIV/0!</v></c></row>
<row r="3"><c r="A3" t="s"><v>2</v></c><c r="B3" s="2"><v>0.5</v></c><c r="C3" s="1"/></row>
</sheetData></worksheet>"#;

    const SHEET2: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>
<row r="3"><c><v>1</v></c><c><v>2.5</v></c></row>
<row><c r="C5"><v>3</v></c></row>
</sheetData></worksheet>"#;

    fn package(parts: &[(&str, &str)]) -> Cursor<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in parts {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        let mut cursor = writer.finish().unwrap();
        cursor.set_position(0);
        cursor
    }

    fn spreadsheet() -> XlsxSpreadsheet<Cursor<Vec<u8>>> {
        XlsxSpreadsheet::from_reader(package(&[
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
            ("xl/workbook.xml", WORKBOOK),
            ("xl/styles.xml", STYLES),
            ("xl/sharedStrings.xml", SHARED_STRINGS),
            ("xl/worksheets/sheet1.xml", SHEET1),
            ("xl/worksheets/sheet2.xml", SHEET2),
        ])).unwrap()
    }

    fn texts(sheet: &Sheet) -> Vec<Vec<String>> {
        sheet.rows().map(|row| row.cells().iter().map(Cell::text).collect()).collect()
    }

    #[test]
    fn lists_worksheets_only() {
        assert_eq!(spreadsheet().sheet_names(), vec!["Data", "Sparse"]);
    }

    #[test]
    fn decodes_cell_types() {
        let sheet = spreadsheet().read_sheet(0).unwrap();
        assert_eq!(sheet.name(), "Data");
        assert_eq!(texts(&sheet), vec![
            vec!["Name", "When", "Flag"],
            vec!["Rich text", "2024-01-01", "TRUE", "#DIV/0!"],
            vec!["Tom & Jerry", "12:00:00", ""],
        ]);
        assert_eq!(sheet.cell(2, 2).map(Cell::kind), Some(CellType::Empty));
    }

    #[test]
    fn positions_cells_without_references() {
        let sheet = spreadsheet().read_sheet(1).unwrap();
        assert_eq!(sheet.first_row_num(), Some(2));
        assert_eq!(sheet.cell(2, 0).map(Cell::text), Some("1".to_owned()));
        assert_eq!(sheet.cell(2, 1).map(Cell::text), Some("2.5".to_owned()));
        assert_eq!(sheet.cell(4, 2).map(Cell::text), Some("3".to_owned()));
        assert!(sheet.row(3).is_none());
    }

    #[test]
    fn rejects_sheet_index_out_of_range() {
        assert!(matches!(
            spreadsheet().read_sheet(2),
            Err(DecodeError::SpreadsheetError(SpreadsheetError::SheetIndexError(2)))
        ));
    }

    #[test]
    fn workbook_without_sheets() {
        let rels = r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"></Relationships>"#;
        let workbook = r#"<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheets/></workbook>"#;
        let spreadsheet = XlsxSpreadsheet::from_reader(package(&[
            ("xl/_rels/workbook.xml.rels", rels),
            ("xl/workbook.xml", workbook),
        ])).unwrap();
        assert!(spreadsheet.sheet_names().is_empty());
    }

    #[test]
    fn reads_prefixed_parts() {
        let main = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
        let relationships = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
        let workbook = format!(
            r#"<x:workbook xmlns:x="{main}" xmlns:r="{relationships}"><x:workbookPr date1904="1"/><x:sheets><x:sheet name="Data" sheetId="1" r:id="rId1"/></x:sheets></x:workbook>"#
        );
        let styles = format!(
            r#"<x:styleSheet xmlns:x="{main}"><x:cellXfs count="2"><x:xf numFmtId="0"/><x:xf numFmtId="14"/></x:cellXfs></x:styleSheet>"#
        );
        let shared_strings = format!(r#"<x:sst xmlns:x="{main}"><x:si><x:t>Name</x:t></x:si></x:sst>"#);
        let sheet = format!(
            r#"<x:worksheet xmlns:x="{main}"><x:sheetData><x:row r="1"><x:c r="A1" t="s"><x:v>0</x:v></x:c><x:c r="B1" s="1"><x:v>0</x:v></x:c><x:c r="C1" t="inlineStr"><x:is><x:t>Inline</x:t></x:is></x:c></x:row></x:sheetData></x:worksheet>"#
        );
        let mut spreadsheet = XlsxSpreadsheet::from_reader(package(&[
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS),
            ("xl/workbook.xml", &workbook),
            ("xl/styles.xml", &styles),
            ("xl/sharedStrings.xml", &shared_strings),
            ("xl/worksheets/sheet1.xml", &sheet),
        ])).unwrap();
        assert_eq!(spreadsheet.sheet_names(), vec!["Data"]);
        let sheet = spreadsheet.read_sheet(0).unwrap();
        assert_eq!(texts(&sheet), vec![vec!["Name", "1904-01-01", "Inline"]]);
    }

    #[test]
    fn rejects_non_zip_content() {
        assert!(XlsxSpreadsheet::from_reader(Cursor::new(b"plain text".to_vec())).is_err());
    }

    #[test]
    fn plain_zip_is_not_encrypted() {
        let mut reader = Cursor::new(b"PK\x03\x04 not an OLE file".to_vec());
        assert!(!is_encrypted_package(&mut reader).unwrap());
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn part_names() {
        assert_eq!(part_name("worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(part_name("/xl/worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(part_name("xl/worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
    }

    #[test]
    fn cell_kinds() {
        assert_eq!(value_kind(Some("s")), CellType::SharedString);
        assert_eq!(value_kind(Some("str")), CellType::InlineString);
        assert_eq!(value_kind(Some("n")), CellType::Number);
        assert_eq!(value_kind(None), CellType::Number);
    }
}
