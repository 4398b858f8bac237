//! Reader for OLE compound files, the container of `.xls` workbooks.
//! Encrypted `.xlsx` packages are wrapped in the same container.

use crate::error::DecodeError;
use crate::helpers::string::to_u16;
use crate::helpers::string::to_u64;
use crate::helpers::string::to_usize;
use crate::helpers::string::to_usize_iter;
use encoding_rs::UTF_16LE;
use std::collections::HashMap;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::ops::Range;
use thiserror::Error;

const SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const HEADER_LEN: usize = 512;
const ENTRY_LEN: usize = 128;
const MINI_SECTOR_LEN: usize = 64;
const MINI_STREAM_CUTOFF: u64 = 4096;
const ROOT_ENTRY: &str = "Root Entry";
/// The first 109 FAT sector ids live in the header
const HEADER_DIFAT: Range<usize> = 76..HEADER_LEN;
/// Ids from here up are markers: DIFAT, FAT, end of chain, free
const FIRST_MARKER: usize = 0xFFFF_FFFB;

#[derive(Error, Debug)]
pub enum CfbError {
    #[error("Not a compound file: signature mismatch")]
    SignatureError,

    #[error("Compound file is truncated or corrupted")]
    StructureError,

    #[error("Unsupported sector shift {1} for major version {0}")]
    SectorShiftError(u16, u16),

    #[error("Header declares {expected} {table} sector(s) but {actual} were found")]
    SectorCountError { table: &'static str, expected: usize, actual: usize },

    #[error("Sector {0} lies outside the file")]
    SectorIndexError(usize),

    #[error("Sector chain starting at {0} loops")]
    ChainLoopError(usize),

    #[error("Compound file has no directory entries")]
    EmptyDirectoryError,
}

/// A compound file held in memory with its directory resolved.
pub(crate) struct Cfb {
    entries: HashMap<String, Entry>,
    fat: Vec<usize>,
    sectors: SectorPool,
    mini_fat: Vec<usize>,
    mini_sectors: SectorPool,
}

impl Cfb {
    /// Tells whether the reader starts with the compound file signature.
    /// The reader is rewound either way.
    pub(crate) fn is_cfb<RS: Read + Seek>(reader: &mut RS) -> Result<bool, DecodeError> {
        reader.seek(SeekFrom::Start(0))?;
        let mut signature = Vec::with_capacity(SIGNATURE.len());
        reader.by_ref().take(SIGNATURE.len() as u64).read_to_end(&mut signature)?;
        reader.seek(SeekFrom::Start(0))?;
        Ok(signature == SIGNATURE)
    }

    /// Loads the whole file and resolves its allocation tables and directory.
    pub(crate) fn new<RS: Read + Seek>(reader: &mut RS) -> Result<Cfb, DecodeError> {
        reader.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        if bytes.len() < HEADER_LEN {
            return Err(CfbError::StructureError.into());
        }

        let header = Header::parse(&bytes[..HEADER_LEN])?;
        let difat: Vec<usize> = to_usize_iter(&bytes[HEADER_DIFAT]).collect();
        // Sector 0 starts right after the slot taken by the header
        let sectors = SectorPool { bytes, sector_len: header.sector_len, start: header.sector_len };
        let fat = read_fat(&sectors, &header, difat)?;
        let entries = read_directory(&sectors.read_chain(&fat, header.first_directory_sector)?)?;

        let mini_fat = if header.mini_fat_sectors > 0 {
            to_usize_iter(&sectors.read_chain(&fat, header.first_mini_fat_sector)?).collect()
        } else {
            Vec::new()
        };
        // The mini stream is the root entry's own stream
        let mini_stream = match entries.get(ROOT_ENTRY) {
            Some(root) => {
                let mut stream = sectors.read_chain(&fat, root.first_sector)?;
                stream.truncate(root.len());
                stream
            }
            None => Vec::new(),
        };
        log::trace!("Compound file with {} entries and {} FAT ids", entries.len(), fat.len());

        Ok(Cfb {
            entries,
            fat,
            sectors,
            mini_fat,
            mini_sectors: SectorPool { bytes: mini_stream, sector_len: MINI_SECTOR_LEN, start: 0 },
        })
    }

    /// Looks up an entry by exact name, then ignoring ASCII case.
    fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name).or_else(|| {
            self.entries
                .iter()
                .find(|(entry_name, _)| entry_name.eq_ignore_ascii_case(name))
                .map(|(_, entry)| entry)
        })
    }

    pub(crate) fn exists(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    /// Reads a whole stream; `None` if there is no entry with that name.
    pub(crate) fn read(&self, name: &str) -> Result<Option<Vec<u8>>, DecodeError> {
        let entry = match self.entry(name) {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let mut bytes = if entry.size < MINI_STREAM_CUTOFF {
            self.mini_sectors.read_chain(&self.mini_fat, entry.first_sector)?
        } else {
            self.sectors.read_chain(&self.fat, entry.first_sector)?
        };
        bytes.truncate(entry.len());
        Ok(Some(bytes))
    }
}

/// Collects the FAT from the sector ids listed in the DIFAT.
/// The DIFAT starts in the header and continues in chained sectors whose last id links to the next one.
fn read_fat(sectors: &SectorPool, header: &Header, mut difat: Vec<usize>) -> Result<Vec<usize>, CfbError> {
    let mut next = header.first_difat_sector;
    let mut difat_sectors = 0usize;
    while next < FIRST_MARKER && difat_sectors <= header.difat_sectors {
        let mut ids: Vec<usize> = to_usize_iter(sectors.sector(next)?).collect();
        next = ids.pop().ok_or(CfbError::StructureError)?;
        difat.extend(ids);
        difat_sectors += 1;
    }
    if difat_sectors != header.difat_sectors {
        return Err(CfbError::SectorCountError { table: "DIFAT", expected: header.difat_sectors, actual: difat_sectors });
    }

    let fat_sectors: Vec<usize> = difat.into_iter().filter(|id| *id < FIRST_MARKER).collect();
    if fat_sectors.len() != header.fat_sectors {
        return Err(CfbError::SectorCountError { table: "FAT", expected: header.fat_sectors, actual: fat_sectors.len() });
    }
    let mut fat = Vec::with_capacity(fat_sectors.len() * sectors.sector_len / 4);
    for id in fat_sectors {
        fat.extend(to_usize_iter(sectors.sector(id)?));
    }
    Ok(fat)
}

fn read_directory(bytes: &[u8]) -> Result<HashMap<String, Entry>, CfbError> {
    let entries: HashMap<String, Entry> = bytes.chunks_exact(ENTRY_LEN).filter_map(Entry::parse).collect();
    if entries.is_empty() {
        return Err(CfbError::EmptyDirectoryError);
    }
    Ok(entries)
}

/// Fixed-size sectors laid over one byte buffer
struct SectorPool {
    bytes: Vec<u8>,
    sector_len: usize,
    /// Byte offset of sector 0
    start: usize,
}

impl SectorPool {
    /// The sector with this id; the last sector of the file may be short.
    fn sector(&self, id: usize) -> Result<&[u8], CfbError> {
        let lower = id
            .checked_mul(self.sector_len)
            .and_then(|offset| offset.checked_add(self.start))
            .filter(|lower| *lower < self.bytes.len())
            .ok_or(CfbError::SectorIndexError(id))?;
        let upper = self.bytes.len().min(lower + self.sector_len);
        Ok(&self.bytes[lower..upper])
    }

    /// Concatenates the sectors of the chain starting at `first`, following `table` links up to a marker.
    fn read_chain(&self, table: &[usize], first: usize) -> Result<Vec<u8>, CfbError> {
        let mut content = Vec::new();
        let mut id = first;
        // A chain cannot visit more sectors than the table describes
        for _ in 0..=table.len() {
            if id >= FIRST_MARKER {
                return Ok(content);
            }
            content.extend_from_slice(self.sector(id)?);
            id = *table.get(id).ok_or(CfbError::SectorIndexError(id))?;
        }
        Err(CfbError::ChainLoopError(first))
    }
}

struct Header {
    sector_len: usize,
    fat_sectors: usize,
    first_directory_sector: usize,
    first_mini_fat_sector: usize,
    mini_fat_sectors: usize,
    first_difat_sector: usize,
    difat_sectors: usize,
}

impl Header {
    fn parse(bytes: &[u8]) -> Result<Header, CfbError> {
        if bytes[..SIGNATURE.len()] != SIGNATURE {
            return Err(CfbError::SignatureError);
        }
        let major_version = to_u16(&bytes[26..28]);
        let sector_shift = to_u16(&bytes[30..32]);
        let sector_len = match (major_version, sector_shift) {
            (3, 9) => 512,
            (4, 12) => 4096,
            _ => return Err(CfbError::SectorShiftError(major_version, sector_shift)),
        };
        Ok(Header {
            sector_len,
            fat_sectors: to_usize(&bytes[44..48]),
            first_directory_sector: to_usize(&bytes[48..52]),
            first_mini_fat_sector: to_usize(&bytes[60..64]),
            mini_fat_sectors: to_usize(&bytes[64..68]),
            first_difat_sector: to_usize(&bytes[68..72]),
            difat_sectors: to_usize(&bytes[72..76]),
        })
    }
}

/// Location of a stream
struct Entry {
    first_sector: usize,
    size: u64,
}

impl Entry {
    /// Parses one directory slot; unused slots have an empty name and yield `None`.
    fn parse(bytes: &[u8]) -> Option<(String, Entry)> {
        let name_len = (to_u16(&bytes[64..66]) as usize).min(64);
        let (name, _) = UTF_16LE.decode_without_bom_handling(&bytes[..name_len]);
        let name = name.split('\0').next().unwrap_or_default();
        if name.is_empty() {
            return None;
        }
        let entry = Entry { first_sector: to_usize(&bytes[116..120]), size: to_u64(&bytes[120..128]) };
        Some((name.to_owned(), entry))
    }

    fn len(&self) -> usize {
        usize::try_from(self.size).unwrap_or(usize::MAX)
    }
}
