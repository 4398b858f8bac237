//! Record reader for BIFF8, the binary stream inside Excel 97-2003 workbooks.
//!
//! A record is a 2-byte type, a 2-byte payload length and the payload.
//! Payloads longer than 8224 bytes spill into CONTINUE records; the reader
//! treats a record and its CONTINUE records as consecutive segments of one payload.

use crate::error::DecodeError;
use crate::helpers::string::to_f64;
use crate::helpers::string::to_u16;
use crate::helpers::string::to_u32;
use crate::helpers::string::to_u64;
use crate::helpers::string::to_usize;
use encoding_rs::Encoding;
use encoding_rs::UTF_16LE;
use std::ops::Range;
use thiserror::Error;

const CONTINUE: u16 = 60;
const RECORD_HEADER_LEN: usize = 4;

#[derive(Error, Debug)]
pub enum Biff8Error {
    #[error("Record ends before {0} more byte(s) could be read")]
    ShortRecordError(usize),
}

pub(crate) struct Biff8Reader {
    /// Code page of 8-bit strings, replaced when a CODEPAGE record is seen
    pub(crate) encoding: &'static Encoding,
    stream: Vec<u8>,
    /// Offset of the next record header
    next_record: usize,
    /// Payload of the current record followed by its CONTINUE records
    segments: Vec<Range<usize>>,
    segment: usize,
    position: usize,
}

impl Biff8Reader {
    pub(crate) fn new(stream: Vec<u8>) -> Biff8Reader {
        Biff8Reader {
            encoding: UTF_16LE,
            stream,
            next_record: 0,
            segments: Vec::new(),
            segment: 0,
            position: 0,
        }
    }

    /// Moves to the next record and returns its type; `None` at the end of the stream.
    pub(crate) fn next(&mut self) -> Result<Option<u16>, DecodeError> {
        if !self.has_record_header() {
            return Ok(None);
        }
        let kind = self.u16_at(self.next_record)?;
        self.segments.clear();
        self.segment = 0;
        self.position = 0;
        loop {
            let len = self.u16_at(self.next_record + 2)? as usize;
            let start = self.next_record + RECORD_HEADER_LEN;
            let end = self.stream.len().min(start + len);
            self.segments.push(start..end);
            self.next_record = end;
            if !self.has_record_header() || self.u16_at(self.next_record)? != CONTINUE {
                break;
            }
        }
        Ok(Some(kind))
    }

    fn has_record_header(&self) -> bool {
        self.next_record + RECORD_HEADER_LEN <= self.stream.len()
    }

    /// Positions the reader so that the next record starts at `offset`.
    pub(crate) fn goto(&mut self, offset: usize) {
        self.next_record = offset;
    }

    /// Up to `len` bytes of the current segment. A read never crosses into the next segment.
    fn take_partial(&mut self, len: usize) -> &[u8] {
        let range = match self.segments.get(self.segment) {
            Some(range) if len > 0 => range.clone(),
            _ => return &[],
        };
        let lower = range.end.min(range.start + self.position);
        let upper = range.end.min(lower + len);
        if upper == range.end {
            self.segment += 1;
            self.position = 0;
        } else {
            self.position += upper - lower;
        }
        &self.stream[lower..upper]
    }

    fn take(&mut self, len: usize) -> Result<&[u8], DecodeError> {
        let bytes = self.take_partial(len);
        if bytes.len() == len {
            Ok(bytes)
        } else {
            Err(Biff8Error::ShortRecordError(len).into())
        }
    }

    pub(crate) fn skip(&mut self, len: usize) -> Result<(), DecodeError> {
        self.take(len).map(|_| ())
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, DecodeError> {
        self.take(1).map(|bytes| bytes[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, DecodeError> {
        self.take(2).map(to_u16)
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.take(4).map(to_u32)
    }

    /// Reads a 32-bit count or offset
    pub(crate) fn read_usize(&mut self) -> Result<usize, DecodeError> {
        self.take(4).map(to_usize)
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64, DecodeError> {
        self.take(8).map(to_u64)
    }

    pub(crate) fn read_f64(&mut self) -> Result<f64, DecodeError> {
        self.take(8).map(to_f64)
    }

    /// Reads the 16-bit value that ends `distance` bytes before the end of the payload.
    /// MULRK and MULBLANK keep their last column there.
    pub(crate) fn u16_before_end(&self, distance: usize) -> Result<u16, DecodeError> {
        let mut distance = distance;
        for segment in self.segments.iter().rev() {
            if distance <= segment.len() {
                return self.u16_at(segment.end - distance);
            }
            distance -= segment.len();
        }
        Err(Biff8Error::ShortRecordError(2).into())
    }

    fn u16_at(&self, offset: usize) -> Result<u16, DecodeError> {
        match self.stream.get(offset..offset + 2) {
            Some(bytes) => Ok(to_u16(bytes)),
            None => Err(Biff8Error::ShortRecordError(2).into()),
        }
    }

    /// Reads an RK value: bit 1 selects a 30-bit integer over the top bits of a double,
    /// bit 0 divides the result by 100.
    pub(crate) fn read_rk_number(&mut self) -> Result<f64, DecodeError> {
        let rk = self.read_u32()?;
        let number = if rk & 0x02 != 0 {
            ((rk as i32) >> 2) as f64
        } else {
            f64::from_bits(((rk & 0xFFFF_FFFC) as u64) << 32)
        };
        Ok(if rk & 0x01 != 0 { number / 100.0 } else { number })
    }

    /// ShortXLUnicodeString: 1-byte character count
    pub(crate) fn read_short_string(&mut self) -> Result<String, DecodeError> {
        let count = self.read_u8()? as usize;
        let mut text = String::with_capacity(count);
        self.read_characters(count, false, &mut text)?;
        Ok(text)
    }

    /// XLUnicodeString: 2-byte character count
    pub(crate) fn read_string(&mut self) -> Result<String, DecodeError> {
        let count = self.read_u16()? as usize;
        let mut text = String::with_capacity(count);
        self.read_characters(count, false, &mut text)?;
        Ok(text)
    }

    /// XLUnicodeRichExtendedString, as stored in the shared string table.
    /// When the characters run into a CONTINUE record, that record starts with a fresh option byte.
    pub(crate) fn read_rich_string(&mut self) -> Result<String, DecodeError> {
        let mut remaining = self.read_u16()? as usize;
        let mut text = String::with_capacity(remaining);
        remaining -= self.read_characters(remaining, true, &mut text)?;
        while remaining > 0 {
            match self.read_characters(remaining, false, &mut text)? {
                0 => return Err(Biff8Error::ShortRecordError(remaining).into()),
                read => remaining -= read,
            }
        }
        Ok(text)
    }

    /// Decodes up to `count` characters from the current segment into `text` and returns how many were read.
    /// Formatting runs and phonetic data of extended strings are skipped.
    fn read_characters(&mut self, count: usize, extended: bool, text: &mut String) -> Result<usize, DecodeError> {
        let options = self.read_u8()?;
        let wide = options & 0x01 != 0;
        let runs = if extended && options & 0x08 != 0 { self.read_u16()? as usize } else { 0 };
        let phonetic_len = if extended && options & 0x04 != 0 { self.read_usize()? } else { 0 };

        let encoding = self.encoding;
        let bytes = self.take_partial(if wide { count * 2 } else { count });
        let read = if wide { bytes.len() / 2 } else { bytes.len() };
        if wide {
            text.push_str(&UTF_16LE.decode_without_bom_handling(bytes).0);
        } else if encoding == UTF_16LE {
            // Compressed UTF-16: each byte is a code point below U+0100
            text.extend(bytes.iter().map(|byte| char::from(*byte)));
        } else {
            text.push_str(&encoding.decode_without_bom_handling(bytes).0);
        }

        self.skip(runs * 4)?;
        self.skip(phonetic_len)?;
        Ok(read)
    }
}

/// Runs the given arms over every remaining record type until the end of the stream.
#[macro_export]
macro_rules! match_biff8_record {
    ($reader:expr => { $($arms:tt)* }) => {
        while let Some(kind) = $reader.next()? {
            match kind {
                $($arms)*
                _ => (),
            }
        }
    };
}
