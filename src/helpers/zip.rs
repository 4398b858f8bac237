//! Part lookup inside the ZIP container of an `.xlsx` package

use crate::error::DecodeError;
use crate::helpers::xml::XmlReader;
use std::io::BufReader;
use std::io::Read;
use std::io::Seek;
use zip::read::ZipFile;
use zip::ZipArchive;

pub(crate) trait ZipPackage<RS: Read + Seek> {
    /// Opens a part by name.
    /// Names match ignoring ASCII case, a leading `/` and the kind of path separator.
    fn part(&mut self, name: &str) -> Result<Option<ZipFile<'_, RS>>, DecodeError>;

    /// Opens a part for event-level XML reading.
    fn xml_part(&mut self, name: &str) -> Result<Option<XmlReader<BufReader<ZipFile<'_, RS>>>>, DecodeError> {
        Ok(self.part(name)?.map(|file| XmlReader::new(BufReader::new(file))))
    }
}

impl<RS: Read + Seek> ZipPackage<RS> for ZipArchive<RS> {
    fn part(&mut self, name: &str) -> Result<Option<ZipFile<'_, RS>>, DecodeError> {
        let wanted = normalize(name);
        let index = (0..self.len()).find(|index| {
            self.name_for_index(*index)
                .is_some_and(|entry| normalize(entry).eq_ignore_ascii_case(&wanted))
        });
        match index {
            Some(index) => Ok(Some(self.by_index(index)?)),
            None => Ok(None),
        }
    }
}

fn normalize(name: &str) -> String {
    name.replace('\\', "/").trim_start_matches('/').to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::CompressionMethod;
    use zip::ZipWriter;

    fn archive(parts: &[(&str, &str)]) -> ZipArchive<Cursor<Vec<u8>>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, content) in parts {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        ZipArchive::new(writer.finish().unwrap()).unwrap()
    }

    #[test]
    fn finds_parts_loosely() {
        let mut zip = archive(&[("xl/Workbook.xml", "<workbook/>")]);
        let mut content = String::new();
        zip.part("/XL/workbook.xml").unwrap().unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "<workbook/>");
        assert!(zip.part("xl/styles.xml").unwrap().is_none());
        assert!(zip.xml_part("xl\\workbook.xml").unwrap().is_some());
    }
}
