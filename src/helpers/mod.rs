//! Low-level container and record readers shared by the spreadsheet decoders

pub(crate) mod biff8;
pub(crate) mod cfb;
pub(crate) mod string;
pub(crate) mod xml;
pub(crate) mod zip;
