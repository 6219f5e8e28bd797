//! Streaming decoder that turns a trace stream into a [`ProfileData`] model.
//!
//! The reader is strict where the runtime hooks are lenient: any record it
//! cannot parse is fatal, with the failing byte offset in the error. The one
//! tolerated defect is truncation — a stream that ends cleanly between
//! records but still has live pids yields a partial profile plus a warning.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use thiserror::Error;

use crate::fid_table::Fid;
use crate::profile::{FidInfo, ProfileData, SubLocation};
use crate::varint;
use crate::writer::{
    FILE_MAGIC, FORMAT_MAJOR, TAG_ATTRIBUTE, TAG_COMMENT, TAG_FID_DECL, TAG_PID_BEGIN,
    TAG_PID_END, TAG_STMT, TAG_STMT_BLOCK, TAG_SUB_CALLER, TAG_SUB_RANGE,
};

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("error reading profile stream: {0}")]
    Io(#[from] io::Error),
    #[error("not a profile stream (bad magic)")]
    BadMagic,
    #[error("unsupported profile format version {major}.{minor}")]
    UnsupportedVersion { major: u32, minor: u32 },
    #[error("unknown record tag {tag:#04x} at byte offset {offset}")]
    UnknownTag { tag: u8, offset: u64 },
    #[error("profile stream truncated inside a record at byte offset {offset}")]
    TruncatedRecord { offset: u64 },
    #[error("malformed {what} record at byte offset {offset}")]
    Malformed { what: &'static str, offset: u64 },
    #[error("invalid utf-8 in record at byte offset {offset}")]
    InvalidUtf8 { offset: u64 },
}

struct CountingReader<R> {
    inner: R,
    offset: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}

pub struct TraceReader<R> {
    input: CountingReader<R>,
    ticks_per_sec: f64,
}

impl TraceReader<BufReader<File>> {
    /// Decode a whole trace file.
    pub fn open(path: &Path) -> Result<ProfileData, TraceError> {
        let file = File::open(path)?;
        TraceReader::new(BufReader::new(file)).read()
    }
}

impl<R: Read> TraceReader<R> {
    pub fn new(input: R) -> Self {
        TraceReader {
            input: CountingReader { inner: input, offset: 0 },
            ticks_per_sec: 1_000_000.0,
        }
    }

    /// Single pass over the stream, building the aggregated model.
    pub fn read(mut self) -> Result<ProfileData, TraceError> {
        self.header()?;

        let mut profile = ProfileData::default();
        loop {
            let record_offset = self.input.offset;
            let tag = match self.next_tag()? {
                Some(tag) => tag,
                None => break,
            };
            match tag {
                TAG_STMT => {
                    let ticks = self.int()?;
                    let fid = self.int()?;
                    let line = self.int()?;
                    self.record_time(&mut profile, ticks, fid, line, None);
                }
                TAG_STMT_BLOCK => {
                    let ticks = self.int()?;
                    let fid = self.int()?;
                    let line = self.int()?;
                    let block_line = self.int()?;
                    let sub_line = self.int()?;
                    self.record_time(&mut profile, ticks, fid, line, Some((block_line, sub_line)));
                }
                TAG_FID_DECL => {
                    let fid = self.int()?;
                    let eval_fid = self.int()?;
                    let eval_line = self.int()?;
                    let name = self.line_string()?;
                    match profile.fid_info.get(&fid) {
                        Some(existing) if existing.name != name => {
                            log::warn!(
                                "fid {} redeclared as '{}'; keeping '{}'",
                                fid,
                                name,
                                existing.name
                            );
                        }
                        Some(_) => {}
                        None => {
                            profile.fid_info.insert(
                                fid,
                                FidInfo {
                                    name,
                                    eval_fid,
                                    eval_line,
                                },
                            );
                        }
                    }
                }
                TAG_SUB_RANGE => {
                    let fid = self.int()?;
                    let first_line = self.int()?;
                    let last_line = self.int()?;
                    let name = self.line_string()?;
                    profile.sub_fid_line.insert(
                        name,
                        SubLocation {
                            fid,
                            first_line,
                            last_line,
                        },
                    );
                }
                TAG_SUB_CALLER => {
                    let fid = self.int()?;
                    let line = self.int()?;
                    let count = self.int()?;
                    let name = self.line_string()?;
                    *profile
                        .sub_caller
                        .entry(name)
                        .or_default()
                        .entry(fid)
                        .or_default()
                        .entry(line)
                        .or_default() += u64::from(count);
                }
                TAG_PID_BEGIN => {
                    let pid = self.int()?;
                    let ppid = self.int()?;
                    profile.live_pids.insert(pid, ppid);
                }
                TAG_PID_END => {
                    let pid = self.int()?;
                    if profile.live_pids.remove(&pid).is_none() {
                        log::warn!("pid {} ended without a matching begin record", pid);
                    }
                }
                TAG_ATTRIBUTE => {
                    let entry = self.line_string()?;
                    let (name, value) = entry.split_once('=').ok_or(TraceError::Malformed {
                        what: "attribute",
                        offset: record_offset,
                    })?;
                    if name == "ticks_per_sec" {
                        self.ticks_per_sec =
                            value.parse().map_err(|_| TraceError::Malformed {
                                what: "ticks_per_sec attribute",
                                offset: record_offset,
                            })?;
                    }
                    profile
                        .attributes
                        .insert(name.to_owned(), value.to_owned());
                }
                TAG_COMMENT => {
                    self.line_string()?;
                }
                tag => {
                    return Err(TraceError::UnknownTag {
                        tag,
                        offset: record_offset,
                    });
                }
            }
        }

        if !profile.live_pids.is_empty() {
            log::warn!(
                "profile stream ended with {} live pid(s); the run did not terminate cleanly",
                profile.live_pids.len()
            );
        }
        Ok(profile)
    }

    // `<magic> <major> <minor>\n`, text. Comment and attribute lines that
    // follow are ordinary tagged records.
    fn header(&mut self) -> Result<(), TraceError> {
        let line = self.line_string().map_err(|_| TraceError::BadMagic)?;
        let mut words = line.split_whitespace();
        if words.next() != Some(FILE_MAGIC) {
            return Err(TraceError::BadMagic);
        }
        let major: u32 = words
            .next()
            .and_then(|w| w.parse().ok())
            .ok_or(TraceError::BadMagic)?;
        let minor: u32 = words
            .next()
            .and_then(|w| w.parse().ok())
            .ok_or(TraceError::BadMagic)?;
        if major != FORMAT_MAJOR {
            return Err(TraceError::UnsupportedVersion { major, minor });
        }
        Ok(())
    }

    fn record_time(
        &mut self,
        profile: &mut ProfileData,
        ticks: u32,
        fid: Fid,
        line: u32,
        block: Option<(u32, u32)>,
    ) {
        let seconds = f64::from(ticks) / self.ticks_per_sec;

        // Statements inside a string eval accumulate under the line that
        // compiled the eval; the outer slot's own time stays untouched.
        let redirect = profile.fid_info.get(&fid).and_then(|info| {
            (info.eval_fid != 0).then_some((info.eval_fid, info.eval_line))
        });
        match redirect {
            Some((outer_fid, outer_line)) => {
                let outer = profile
                    .fid_line_time
                    .entry(outer_fid)
                    .or_default()
                    .entry(outer_line)
                    .or_default();
                let inner = outer.eval_lines.entry(line).or_default();
                inner.time += seconds;
                inner.calls += 1;
            }
            None => {
                let slot = profile
                    .fid_line_time
                    .entry(fid)
                    .or_default()
                    .entry(line)
                    .or_default();
                slot.time += seconds;
                slot.calls += 1;
            }
        }

        if let Some((block_line, sub_line)) = block {
            let slot = profile
                .fid_block_time
                .entry(fid)
                .or_default()
                .entry(block_line)
                .or_default();
            slot.time += seconds;
            slot.calls += 1;
            let slot = profile
                .fid_sub_time
                .entry(fid)
                .or_default()
                .entry(sub_line)
                .or_default();
            slot.time += seconds;
            slot.calls += 1;
        }
    }

    // None on a clean end-of-stream at a record boundary.
    fn next_tag(&mut self) -> Result<Option<u8>, TraceError> {
        let mut byte = [0u8; 1];
        loop {
            match self.input.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn int(&mut self) -> Result<u32, TraceError> {
        varint::decode(&mut self.input).map_err(|err| {
            if err.kind() == io::ErrorKind::UnexpectedEof {
                TraceError::TruncatedRecord {
                    offset: self.input.offset,
                }
            } else {
                TraceError::Io(err)
            }
        })
    }

    fn line_string(&mut self) -> Result<String, TraceError> {
        let mut bytes = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.input.read(&mut byte) {
                Ok(0) => {
                    return Err(TraceError::TruncatedRecord {
                        offset: self.input.offset,
                    });
                }
                Ok(_) => {
                    if byte[0] == b'\n' {
                        break;
                    }
                    bytes.push(byte[0]);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        String::from_utf8(bytes).map_err(|_| TraceError::InvalidUtf8 {
            offset: self.input.offset,
        })
    }
}
