//! Fixture writers for the integration tests.
//!
//! Workbooks are assembled byte by byte: `.xlsx` packages with the `zip`
//! writer, `.xls` files as BIFF8 record streams inside a compound file written
//! by the `cfb` crate.

#![allow(dead_code)]

use std::fs::File;
use std::io::Cursor;
use std::io::Write;
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;
use zip::ZipWriter;

/// Cell content for fixtures
#[derive(Clone, Copy, Debug)]
pub enum Value<'a> {
    Text(&'a str),
    Number(f64),
    /// Present cell without a value
    Blank,
}

/// Sheet content for fixtures: (row, col, value) with 0-based indexes
pub type Cells<'a> = Vec<(u16, u16, Value<'a>)>;

fn reference(row: u16, col: u16) -> String {
    let mut letters = Vec::new();
    let mut column = col as usize + 1;
    while column > 0 {
        column -= 1;
        letters.push((b'A' + (column % 26) as u8) as char);
        column /= 26;
    }
    letters.iter().rev().collect::<String>() + &(row + 1).to_string()
}

fn escape_xml(value: &str) -> String {
    value.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Renders cells as a SpreadsheetML `<sheetData>` element
pub fn sheet_data(cells: &Cells) -> String {
    let mut sorted = cells.clone();
    sorted.sort_by_key(|(row, col, _)| (*row, *col));
    let mut xml = String::from("<sheetData>");
    let mut current = None;
    for (row, col, value) in sorted {
        if current != Some(row) {
            if current.is_some() {
                xml.push_str("</row>");
            }
            xml.push_str(&format!(r#"<row r="{}">"#, row + 1));
            current = Some(row);
        }
        let reference = reference(row, col);
        match value {
            Value::Text(text) => xml.push_str(&format!(
                r#"<c r="{reference}" t="inlineStr"><is><t>{}</t></is></c>"#,
                escape_xml(text)
            )),
            Value::Number(number) => xml.push_str(&format!(r#"<c r="{reference}"><v>{number}</v></c>"#)),
            Value::Blank => xml.push_str(&format!(r#"<c r="{reference}" s="0"/>"#)),
        }
    }
    if current.is_some() {
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData>");
    xml
}

/// Writes an `.xlsx` package whose sheets hold the given cells
pub fn write_xlsx(path: &Path, sheets: &[(&str, Cells)]) {
    let sheets: Vec<(&str, String)> = sheets.iter().map(|(name, cells)| (*name, sheet_data(cells))).collect();
    write_xlsx_parts(path, &sheets, &[]);
}

/// Writes an `.xlsx` package from raw `<sheetData>` markup and extra parts
pub fn write_xlsx_parts(path: &Path, sheets: &[(&str, String)], extra_parts: &[(&str, &str)]) {
    let mut relationships = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    );
    let mut workbook = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>"#,
    );
    for (position, (name, _)) in sheets.iter().enumerate() {
        let number = position + 1;
        relationships.push_str(&format!(
            r#"<Relationship Id="rId{number}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{number}.xml"/>"#
        ));
        workbook.push_str(&format!(
            r#"<sheet name="{}" sheetId="{number}" r:id="rId{number}"/>"#,
            escape_xml(name)
        ));
    }
    relationships.push_str("</Relationships>");
    workbook.push_str("</sheets></workbook>");

    let mut writer = ZipWriter::new(File::create(path).unwrap());
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut write_part = |name: &str, content: &str| {
        writer.start_file(name, options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    };
    write_part("[Content_Types].xml", r#"<?xml version="1.0" encoding="UTF-8"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"/>"#);
    write_part("xl/workbook.xml", &workbook);
    write_part("xl/_rels/workbook.xml.rels", &relationships);
    for (position, (_, data)) in sheets.iter().enumerate() {
        let content = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">{data}</worksheet>"#
        );
        write_part(&format!("xl/worksheets/sheet{}.xml", position + 1), &content);
    }
    for (name, content) in extra_parts {
        write_part(name, content);
    }
    writer.finish().unwrap();
}

// BIFF8 record identifiers used by the fixtures
const EOF: u16 = 10;
const BOUND_SHEET8: u16 = 133;
const XF: u16 = 224;
const BLANK: u16 = 513;
const NUMBER: u16 = 515;
const LABEL: u16 = 516;
const BOF: u16 = 2057;

fn record(kind: u16, payload: &[u8]) -> Vec<u8> {
    let mut bytes = kind.to_le_bytes().to_vec();
    bytes.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

fn bof(substream_type: u16) -> Vec<u8> {
    let mut payload = vec![0u8; 16];
    payload[0..2].copy_from_slice(&0x0600u16.to_le_bytes());
    payload[2..4].copy_from_slice(&substream_type.to_le_bytes());
    record(BOF, &payload)
}

fn bound_sheet(pointer: usize, name: &str) -> Vec<u8> {
    let mut payload = (pointer as u32).to_le_bytes().to_vec();
    payload.extend_from_slice(&[0, 0]);
    payload.push(name.encode_utf16().count() as u8);
    // High-byte strings keep every name representable
    payload.push(1);
    name.encode_utf16().for_each(|unit| payload.extend_from_slice(&unit.to_le_bytes()));
    record(BOUND_SHEET8, &payload)
}

fn cell_record(row: u16, col: u16, value: Value) -> Vec<u8> {
    let mut payload = [row.to_le_bytes(), col.to_le_bytes(), 0u16.to_le_bytes()].concat();
    match value {
        Value::Text(text) => {
            payload.extend_from_slice(&(text.encode_utf16().count() as u16).to_le_bytes());
            payload.push(1);
            text.encode_utf16().for_each(|unit| payload.extend_from_slice(&unit.to_le_bytes()));
            record(LABEL, &payload)
        }
        Value::Number(number) => {
            payload.extend_from_slice(&number.to_le_bytes());
            record(NUMBER, &payload)
        }
        Value::Blank => record(BLANK, &payload),
    }
}

/// Lays out a BIFF8 workbook stream: globals, then one substream per sheet
pub fn biff8_stream(sheets: &[(&str, Cells)]) -> Vec<u8> {
    let eof = record(EOF, &[]);
    let xf = record(XF, &[0u8; 20]);
    let globals_size = bof(5).len()
        + xf.len()
        + sheets.iter().map(|(name, _)| bound_sheet(0, name).len()).sum::<usize>()
        + eof.len();

    let mut globals = bof(5);
    globals.extend_from_slice(&xf);
    let mut substreams = Vec::new();
    let mut pointer = globals_size;
    for (name, cells) in sheets {
        globals.extend(bound_sheet(pointer, name));
        let mut substream = bof(0x10);
        cells.iter().for_each(|(row, col, value)| substream.extend(cell_record(*row, *col, *value)));
        substream.extend_from_slice(&eof);
        pointer += substream.len();
        substreams.extend(substream);
    }
    globals.extend_from_slice(&eof);
    globals.extend(substreams);
    globals
}

/// Stores streams in a compound file
pub fn write_compound_file(path: &Path, streams: &[(&str, Vec<u8>)]) {
    let mut compound = cfb::CompoundFile::create(Cursor::new(Vec::new())).unwrap();
    for (name, data) in streams {
        let mut stream = compound.create_stream(name).unwrap();
        stream.write_all(data).unwrap();
    }
    compound.flush().unwrap();
    std::fs::write(path, compound.into_inner().into_inner()).unwrap();
}

/// Writes an `.xls` workbook whose sheets hold the given cells.
/// The stream is padded to 4096 bytes, as Excel does, so that it lives in
/// regular sectors rather than the mini stream.
pub fn write_xls(path: &Path, sheets: &[(&str, Cells)]) {
    let mut stream = biff8_stream(sheets);
    if stream.len() < 4096 {
        stream.resize(4096, 0);
    }
    write_compound_file(path, &[("/Workbook", stream)]);
}

/// Writes an `.xls` workbook without padding; small streams land in the mini stream.
pub fn write_small_xls(path: &Path, sheets: &[(&str, Cells)]) {
    write_compound_file(path, &[("/Workbook", biff8_stream(sheets))]);
}

/// Builds the expected rows of a table
pub fn rows(values: &[&[&str]]) -> Vec<Vec<String>> {
    values
        .iter()
        .map(|row| row.iter().map(|value| value.to_string()).collect())
        .collect()
}
