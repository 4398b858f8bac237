//! Event-level XML reading for the SpreadsheetML parts of an .xlsx package

use crate::error::DecodeError;
use quick_xml::escape::resolve_xml_entity;
use quick_xml::events::BytesCData;
use quick_xml::events::BytesRef;
use quick_xml::events::BytesStart;
use quick_xml::events::BytesText;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::BufRead;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum XmlError {
    #[error("Unknown entity '&{0};'")]
    EntityError(String),

    #[error("Invalid value '{value}' for attribute '{name}'")]
    AttributeValueError { name: String, value: String },
}

/// Pull reader that reuses one event buffer.
/// Empty elements are reported as a start and an end event.
pub(crate) struct XmlReader<R: BufRead> {
    inner: Reader<R>,
    buffer: Vec<u8>,
}

impl<R: BufRead> XmlReader<R> {
    pub(crate) fn new(source: R) -> XmlReader<R> {
        let mut inner = Reader::from_reader(source);
        let config = inner.config_mut();
        config.check_comments = false;
        config.check_end_names = false;
        config.expand_empty_elements = true;
        config.trim_text(false);

        XmlReader { inner, buffer: Vec::with_capacity(1024) }
    }

    /// Next event, or `None` at the end of the document.
    pub(crate) fn next(&'_ mut self) -> Result<Option<Event<'_>>, DecodeError> {
        self.buffer.clear();
        match self.inner.read_event_into(&mut self.buffer)? {
            Event::Eof => Ok(None),
            event => Ok(Some(event)),
        }
    }
}

/// Attribute lookup on start tags
pub(crate) trait XmlElement {
    /// Unescaped value of the attribute with this local name; any namespace prefix is ignored.
    fn attribute(&self, name: &str) -> Result<Option<String>, DecodeError>;

    /// Attribute value parsed into `T`; surrounding whitespace is ignored.
    fn parsed_attribute<T: FromStr>(&self, name: &str) -> Result<Option<T>, DecodeError>;
}

impl XmlElement for BytesStart<'_> {
    fn attribute(&self, name: &str) -> Result<Option<String>, DecodeError> {
        for attribute in self.attributes() {
            let attribute = attribute?;
            if attribute.key.local_name().as_ref() == name.as_bytes() {
                return Ok(Some(attribute.unescape_value()?.into_owned()));
            }
        }
        Ok(None)
    }

    fn parsed_attribute<T: FromStr>(&self, name: &str) -> Result<Option<T>, DecodeError> {
        match self.attribute(name)? {
            Some(value) => match value.trim().parse() {
                Ok(parsed) => Ok(Some(parsed)),
                Err(_) => Err(XmlError::AttributeValueError { name: name.to_owned(), value })?,
            },
            None => Ok(None),
        }
    }
}

/// Accumulates character data split over text, CDATA and reference events
pub(crate) trait XmlText {
    fn push_text(&mut self, text: &BytesText) -> Result<(), DecodeError>;

    fn push_cdata(&mut self, cdata: &BytesCData) -> Result<(), DecodeError>;

    /// Appends a predefined entity (`&amp;`) or a character reference (`&#65;`, `&#x41;`).
    fn push_reference(&mut self, reference: &BytesRef) -> Result<(), DecodeError>;
}

impl XmlText for String {
    fn push_text(&mut self, text: &BytesText) -> Result<(), DecodeError> {
        self.push_str(&text.xml_content()?);
        Ok(())
    }

    fn push_cdata(&mut self, cdata: &BytesCData) -> Result<(), DecodeError> {
        self.push_str(&cdata.xml_content()?);
        Ok(())
    }

    fn push_reference(&mut self, reference: &BytesRef) -> Result<(), DecodeError> {
        let name = reference.xml_content()?;
        let code = match name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
            Some(hex) => Some(u32::from_str_radix(hex, 16)?),
            None => name.strip_prefix('#').map(str::parse::<u32>).transpose()?,
        };
        match code {
            // Invalid code points are dropped
            Some(code) => self.extend(char::from_u32(code)),
            None => self.push_str(resolve_xml_entity(&name).ok_or_else(|| XmlError::EntityError(name.to_string()))?),
        }
        Ok(())
    }
}

/// Runs the given arms over every event of a reader until the end of the document.
/// Events without a matching arm are ignored; `break` stops early.
#[macro_export]
macro_rules! match_xml_events {
    ($reader:expr => { $($arms:tt)* }) => {
        while let Some(event) = $reader.next()? {
            match event {
                $($arms)*
                _ => (),
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use quick_xml::name::QName;

    fn collect_text(xml: &str) -> Result<String, DecodeError> {
        let mut reader = XmlReader::new(xml.as_bytes());
        let mut text = String::new();
        let mut inside = false;
        match_xml_events!(reader => {
            Event::Start(event) if event.name() == QName(b"t") => inside = true,
            Event::End(event) if event.name() == QName(b"t") => inside = false,
            Event::Text(event) if inside => text.push_text(&event)?,
            Event::CData(event) if inside => text.push_cdata(&event)?,
            Event::GeneralRef(event) if inside => text.push_reference(&event)?,
        });
        Ok(text)
    }

    #[test]
    fn resolves_entities_and_character_references() {
        assert_eq!(collect_text("<t>a &amp; b &lt;c&gt; &#65;&#x42;</t>").unwrap(), "a & b <c> AB");
        assert_eq!(collect_text("<t><![CDATA[<raw>]]></t>").unwrap(), "<raw>");
        assert!(collect_text("<t>&nbsp;</t>").is_err());
    }

    #[test]
    fn reads_attributes() {
        let mut reader = XmlReader::new(r#"<sheet name="Q&amp;A" r:id="rId3" s=" 3 " t="s"/>"#.as_bytes());
        match reader.next().unwrap() {
            Some(Event::Start(event)) => {
                assert_eq!(event.attribute("name").unwrap().as_deref(), Some("Q&A"));
                assert_eq!(event.attribute("id").unwrap().as_deref(), Some("rId3"));
                assert_eq!(event.parsed_attribute::<usize>("s").unwrap(), Some(3));
                assert_eq!(event.attribute("missing").unwrap(), None);
                assert!(event.parsed_attribute::<usize>("t").is_err());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn expands_empty_elements() {
        let mut reader = XmlReader::new("<c/>".as_bytes());
        assert!(matches!(reader.next().unwrap(), Some(Event::Start(_))));
        assert!(matches!(reader.next().unwrap(), Some(Event::End(_))));
        assert!(reader.next().unwrap().is_none());
    }
}
