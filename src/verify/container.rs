//! Zip central-directory parsing and per-member CRC checks.
//!
//! Only the trailer and the central directory are read up front. Member data
//! is streamed through the CRC one member at a time, straight from the file.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};

use flate2::read::DeflateDecoder;

use super::{MemberResult, TorrentZipCheck};

const EOCD_SIGNATURE: u32 = 0x0605_4b50;
const EOCD_LEN: usize = 22;
const EOCD64_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;
const EOCD64_LOCATOR_LEN: u64 = 20;
const EOCD64_SIGNATURE: u32 = 0x0606_4b50;
const EOCD64_LEN: usize = 56;
const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
const CENTRAL_HEADER_LEN: usize = 46;
const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const LOCAL_HEADER_LEN: usize = 30;
const ZIP64_EXTRA_ID: u16 = 0x0001;
const MAX_COMMENT_LEN: usize = u16::MAX as usize;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;
const FLAG_ENCRYPTED: u16 = 0x0001;

const TORRENTZIP_PREFIX: &[u8] = b"TORRENTZIPPED-";

/// Trailer or directory structure could not be read.
#[derive(Debug)]
pub(super) struct ContainerError(pub String);

impl From<io::Error> for ContainerError {
    fn from(e: io::Error) -> Self {
        Self(format!("read failed: {e}"))
    }
}

fn malformed(reason: impl Into<String>) -> ContainerError {
    ContainerError(reason.into())
}

/// Parsed directory of one archive.
#[derive(Debug)]
pub(super) struct CentralDirectory {
    pub members: Vec<CentralEntry>,
    pub torrentzip: TorrentZipCheck,
}

#[derive(Debug, Clone)]
pub(super) struct CentralEntry {
    pub name: String,
    pub flags: u16,
    pub method: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub local_header_offset: u64,
}

impl CentralEntry {
    fn is_directory(&self) -> bool {
        self.name.ends_with('/') && self.uncompressed_size == 0
    }
}

struct Trailer {
    entry_count: u64,
    cd_size: u64,
    cd_offset: u64,
    /// Where the directory must end: the EOCD64 record or the EOCD itself.
    cd_limit: u64,
    comment: Vec<u8>,
}

/// Reads the trailer and the full central directory.
pub(super) fn read_central_directory(file: &mut File) -> Result<CentralDirectory, ContainerError> {
    let file_len = file.seek(SeekFrom::End(0))?;
    let trailer = read_trailer(file, file_len)?;

    if trailer
        .cd_offset
        .checked_add(trailer.cd_size)
        .is_none_or(|end| end > trailer.cd_limit)
    {
        return Err(malformed("central directory extends past its trailer"));
    }
    let cd_len = usize::try_from(trailer.cd_size)
        .map_err(|_| malformed("central directory too large"))?;
    let mut raw = vec![0u8; cd_len];
    file.seek(SeekFrom::Start(trailer.cd_offset))?;
    file.read_exact(&mut raw)?;

    let members = parse_central_entries(&raw, trailer.entry_count)?;
    let torrentzip = check_torrentzip(&trailer.comment, &raw);
    Ok(CentralDirectory {
        members,
        torrentzip,
    })
}

fn read_trailer(file: &mut File, file_len: u64) -> Result<Trailer, ContainerError> {
    if file_len < EOCD_LEN as u64 {
        return Err(malformed("file too short for an end of central directory record"));
    }
    let tail_len = file_len.min((EOCD_LEN + MAX_COMMENT_LEN) as u64);
    let tail_start = file_len - tail_len;
    let mut tail = vec![0u8; usize::try_from(tail_len).unwrap_or(EOCD_LEN)];
    file.seek(SeekFrom::Start(tail_start))?;
    file.read_exact(&mut tail)?;

    let eocd_pos = (0..=tail.len() - EOCD_LEN)
        .rev()
        .find(|&pos| {
            le_u32(&tail, pos) == EOCD_SIGNATURE
                && pos + EOCD_LEN + usize::from(le_u16(&tail, pos + 20)) == tail.len()
        })
        .ok_or_else(|| malformed("no end of central directory record"))?;
    let eocd = &tail[eocd_pos..];
    let eocd_offset = tail_start + eocd_pos as u64;

    let disk = le_u16(eocd, 4);
    let cd_disk = le_u16(eocd, 6);
    let entries_on_disk = le_u16(eocd, 8);
    let total_entries = le_u16(eocd, 10);
    let cd_size = le_u32(eocd, 12);
    let cd_offset = le_u32(eocd, 16);
    let comment = eocd[EOCD_LEN..].to_vec();

    let needs_zip64 = total_entries == u16::MAX || cd_size == u32::MAX || cd_offset == u32::MAX;
    if !needs_zip64 {
        if disk != 0 || cd_disk != 0 || entries_on_disk != total_entries {
            return Err(malformed("multi-disk archives are not supported"));
        }
        return Ok(Trailer {
            entry_count: u64::from(total_entries),
            cd_size: u64::from(cd_size),
            cd_offset: u64::from(cd_offset),
            cd_limit: eocd_offset,
            comment,
        });
    }

    let locator_offset = eocd_offset
        .checked_sub(EOCD64_LOCATOR_LEN)
        .ok_or_else(|| malformed("zip64 locator missing"))?;
    let mut locator = [0u8; EOCD64_LOCATOR_LEN as usize];
    file.seek(SeekFrom::Start(locator_offset))?;
    file.read_exact(&mut locator)?;
    if le_u32(&locator, 0) != EOCD64_LOCATOR_SIGNATURE {
        return Err(malformed("zip64 locator missing"));
    }
    let eocd64_offset = le_u64(&locator, 8);
    if eocd64_offset
        .checked_add(EOCD64_LEN as u64)
        .is_none_or(|end| end > locator_offset)
    {
        return Err(malformed("zip64 end record out of bounds"));
    }

    let mut eocd64 = [0u8; EOCD64_LEN];
    file.seek(SeekFrom::Start(eocd64_offset))?;
    file.read_exact(&mut eocd64)?;
    if le_u32(&eocd64, 0) != EOCD64_SIGNATURE {
        return Err(malformed("zip64 end record signature mismatch"));
    }
    let entries_on_disk = le_u64(&eocd64, 24);
    let total_entries = le_u64(&eocd64, 32);
    if le_u32(&eocd64, 16) != 0 || le_u32(&eocd64, 20) != 0 || entries_on_disk != total_entries {
        return Err(malformed("multi-disk archives are not supported"));
    }
    Ok(Trailer {
        entry_count: total_entries,
        cd_size: le_u64(&eocd64, 40),
        cd_offset: le_u64(&eocd64, 48),
        cd_limit: eocd64_offset,
        comment,
    })
}

fn parse_central_entries(raw: &[u8], expected: u64) -> Result<Vec<CentralEntry>, ContainerError> {
    let mut entries = Vec::new();
    let mut pos = 0usize;

    while pos < raw.len() {
        if raw.len() - pos < CENTRAL_HEADER_LEN {
            return Err(malformed(format!("truncated central header at byte {pos}")));
        }
        if le_u32(raw, pos) != CENTRAL_HEADER_SIGNATURE {
            return Err(malformed(format!("bad central header signature at byte {pos}")));
        }
        let header = &raw[pos..];
        let name_len = usize::from(le_u16(header, 28));
        let extra_len = usize::from(le_u16(header, 30));
        let comment_len = usize::from(le_u16(header, 32));
        let record_len = CENTRAL_HEADER_LEN + name_len + extra_len + comment_len;
        if header.len() < record_len {
            return Err(malformed(format!("central header at byte {pos} overruns directory")));
        }

        let name_bytes = &header[CENTRAL_HEADER_LEN..CENTRAL_HEADER_LEN + name_len];
        let extra = &header[CENTRAL_HEADER_LEN + name_len..CENTRAL_HEADER_LEN + name_len + extra_len];

        let mut entry = CentralEntry {
            name: String::from_utf8_lossy(name_bytes).into_owned(),
            flags: le_u16(header, 8),
            method: le_u16(header, 10),
            crc32: le_u32(header, 16),
            compressed_size: u64::from(le_u32(header, 20)),
            uncompressed_size: u64::from(le_u32(header, 24)),
            local_header_offset: u64::from(le_u32(header, 42)),
        };
        apply_zip64_extra(&mut entry, extra)?;
        entries.push(entry);
        pos += record_len;
    }

    if entries.len() as u64 != expected {
        return Err(malformed(format!(
            "directory lists {} members, trailer declares {expected}",
            entries.len()
        )));
    }
    Ok(entries)
}

/// Replaces saturated 32-bit fields with their zip64 values, in spec order.
fn apply_zip64_extra(entry: &mut CentralEntry, extra: &[u8]) -> Result<(), ContainerError> {
    let saturated = u64::from(u32::MAX);
    let needs = [
        entry.uncompressed_size == saturated,
        entry.compressed_size == saturated,
        entry.local_header_offset == saturated,
    ];
    if !needs.iter().any(|&n| n) {
        return Ok(());
    }

    let mut pos = 0usize;
    while pos + 4 <= extra.len() {
        let id = le_u16(extra, pos);
        let size = usize::from(le_u16(extra, pos + 2));
        let body_start = pos + 4;
        let body_end = body_start + size;
        if body_end > extra.len() {
            break;
        }
        if id == ZIP64_EXTRA_ID {
            let body = &extra[body_start..body_end];
            let mut cursor = 0usize;
            let mut next = || -> Result<u64, ContainerError> {
                if cursor + 8 > body.len() {
                    return Err(malformed(format!("short zip64 field for {}", entry.name)));
                }
                let value = le_u64(body, cursor);
                cursor += 8;
                Ok(value)
            };
            let uncompressed = if needs[0] { Some(next()?) } else { None };
            let compressed = if needs[1] { Some(next()?) } else { None };
            let offset = if needs[2] { Some(next()?) } else { None };
            if let Some(v) = uncompressed {
                entry.uncompressed_size = v;
            }
            if let Some(v) = compressed {
                entry.compressed_size = v;
            }
            if let Some(v) = offset {
                entry.local_header_offset = v;
            }
            return Ok(());
        }
        pos = body_end;
    }
    Err(malformed(format!("missing zip64 field for {}", entry.name)))
}

fn check_torrentzip(comment: &[u8], central_directory: &[u8]) -> TorrentZipCheck {
    let Some(hex) = comment.strip_prefix(TORRENTZIP_PREFIX) else {
        return TorrentZipCheck::NotTorrentZip;
    };
    let declared = std::str::from_utf8(hex)
        .ok()
        .filter(|h| h.len() == 8)
        .and_then(|h| u32::from_str_radix(h, 16).ok());
    let actual = crc32fast::hash(central_directory);
    match declared {
        Some(expected) if expected == actual => TorrentZipCheck::Valid,
        Some(expected) => TorrentZipCheck::Invalid { expected, actual },
        None => TorrentZipCheck::Invalid {
            expected: 0,
            actual,
        },
    }
}

/// Streams one member through the CRC and compares against its directory entry.
pub(super) fn check_member(file: &mut File, entry: &CentralEntry) -> MemberResult {
    let mut result = MemberResult {
        name: entry.name.clone(),
        stored_crc32: entry.crc32,
        computed_crc32: None,
        compressed_size: entry.compressed_size,
        uncompressed_size: entry.uncompressed_size,
        passed: false,
        problem: None,
    };

    if entry.is_directory() {
        result.computed_crc32 = Some(0);
        result.passed = entry.crc32 == 0;
        return result;
    }
    if entry.flags & FLAG_ENCRYPTED != 0 {
        result.problem = Some("encrypted member".to_string());
        return result;
    }

    match compute_member_crc(file, entry) {
        Ok((crc, len)) => {
            result.computed_crc32 = Some(crc);
            if len != entry.uncompressed_size {
                result.problem = Some(format!(
                    "size mismatch: directory declares {} bytes, data holds {len}",
                    entry.uncompressed_size
                ));
            } else if crc != entry.crc32 {
                result.problem = Some(format!(
                    "crc mismatch: stored {:08X}, computed {crc:08X}",
                    entry.crc32
                ));
            } else {
                result.passed = true;
            }
        }
        Err(e) => result.problem = Some(e.0),
    }
    result
}

fn compute_member_crc(file: &mut File, entry: &CentralEntry) -> Result<(u32, u64), ContainerError> {
    file.seek(SeekFrom::Start(entry.local_header_offset))?;
    let mut local = [0u8; LOCAL_HEADER_LEN];
    file.read_exact(&mut local)
        .map_err(|_| malformed("local header out of bounds"))?;
    if le_u32(&local, 0) != LOCAL_HEADER_SIGNATURE {
        return Err(malformed("bad local header signature"));
    }
    let skip = i64::from(le_u16(&local, 26)) + i64::from(le_u16(&local, 28));
    file.seek(SeekFrom::Current(skip))?;

    let data = BufReader::new(&mut *file).take(entry.compressed_size);
    let mut sink = CrcWriter::default();
    match entry.method {
        METHOD_STORED => {
            let mut data = data;
            io::copy(&mut data, &mut sink)?;
            if sink.len != entry.compressed_size {
                return Err(malformed("member data truncated"));
            }
        }
        METHOD_DEFLATED => {
            let mut decoder = DeflateDecoder::new(data);
            io::copy(&mut decoder, &mut sink)
                .map_err(|e| malformed(format!("deflate stream corrupt: {e}")))?;
        }
        other => return Err(malformed(format!("unsupported compression method {other}"))),
    }
    Ok((sink.hasher.finalize(), sink.len))
}

#[derive(Default)]
struct CrcWriter {
    hasher: crc32fast::Hasher,
    len: u64,
}

impl Write for CrcWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher.update(buf);
        self.len += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn le_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn le_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}
