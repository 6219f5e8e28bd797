//! Append-only emitter for the binary trace stream.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::fid_table::{Fid, FidEntry};
use crate::varint;

pub const FILE_MAGIC: &str = "NYTProf";
pub const FORMAT_MAJOR: u32 = 5;
pub const FORMAT_MINOR: u32 = 0;

pub const TAG_FID_DECL: u8 = b'@';
pub const TAG_STMT: u8 = b'+';
pub const TAG_STMT_BLOCK: u8 = b'*';
pub const TAG_SUB_RANGE: u8 = b's';
pub const TAG_SUB_CALLER: u8 = b'c';
pub const TAG_PID_BEGIN: u8 = b'P';
pub const TAG_PID_END: u8 = b'p';
pub const TAG_ATTRIBUTE: u8 = b':';
pub const TAG_COMMENT: u8 = b'#';

/// Buffered writer owning the trace file for its process. After a fork the
/// child calls [`TraceWriter::discard`] on the inherited instance and opens
/// its own.
pub struct TraceWriter {
    out: BufWriter<File>,
    path: PathBuf,
}

impl TraceWriter {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(TraceWriter {
            out: BufWriter::new(file),
            path: path.to_owned(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stream opens with a textual prologue: magic/version line, a
    /// comment, one `:name=value` line per attribute, then the binary
    /// PID_BEGIN record that starts the record stream.
    pub fn header(&mut self, attributes: &[(&str, String)], pid: u32, ppid: u32) -> io::Result<()> {
        writeln!(self.out, "{} {} {}", FILE_MAGIC, FORMAT_MAJOR, FORMAT_MINOR)?;
        writeln!(
            self.out,
            "# Profile data generated by lineprof {}",
            env!("CARGO_PKG_VERSION")
        )?;
        for (name, value) in attributes {
            writeln!(self.out, ":{}={}", name, value)?;
        }
        self.pid_begin(pid, ppid)
    }

    pub fn fid_decl(&mut self, fid: Fid, entry: &FidEntry) -> io::Result<()> {
        let mut record = Vec::with_capacity(16 + entry.key.len());
        record.push(TAG_FID_DECL);
        varint::encode(fid, &mut record);
        varint::encode(entry.eval_fid, &mut record);
        varint::encode(entry.eval_line, &mut record);
        record.extend_from_slice(entry.key.as_bytes());
        record.push(b'\n');
        self.out.write_all(&record)
    }

    pub fn stmt(&mut self, ticks: u32, fid: Fid, line: u32) -> io::Result<()> {
        let mut record = Vec::with_capacity(16);
        record.push(TAG_STMT);
        varint::encode(ticks, &mut record);
        varint::encode(fid, &mut record);
        varint::encode(line, &mut record);
        self.out.write_all(&record)
    }

    pub fn stmt_block(
        &mut self,
        ticks: u32,
        fid: Fid,
        line: u32,
        block_line: u32,
        sub_line: u32,
    ) -> io::Result<()> {
        let mut record = Vec::with_capacity(24);
        record.push(TAG_STMT_BLOCK);
        varint::encode(ticks, &mut record);
        varint::encode(fid, &mut record);
        varint::encode(line, &mut record);
        varint::encode(block_line, &mut record);
        varint::encode(sub_line, &mut record);
        self.out.write_all(&record)
    }

    pub fn sub_range(
        &mut self,
        fid: Fid,
        first_line: u32,
        last_line: u32,
        name: &str,
    ) -> io::Result<()> {
        let mut record = Vec::with_capacity(16 + name.len());
        record.push(TAG_SUB_RANGE);
        varint::encode(fid, &mut record);
        varint::encode(first_line, &mut record);
        varint::encode(last_line, &mut record);
        record.extend_from_slice(name.as_bytes());
        record.push(b'\n');
        self.out.write_all(&record)
    }

    pub fn sub_caller(
        &mut self,
        caller_fid: Fid,
        caller_line: u32,
        count: u32,
        name: &str,
    ) -> io::Result<()> {
        let mut record = Vec::with_capacity(16 + name.len());
        record.push(TAG_SUB_CALLER);
        varint::encode(caller_fid, &mut record);
        varint::encode(caller_line, &mut record);
        varint::encode(count, &mut record);
        record.extend_from_slice(name.as_bytes());
        record.push(b'\n');
        self.out.write_all(&record)
    }

    pub fn pid_begin(&mut self, pid: u32, ppid: u32) -> io::Result<()> {
        let mut record = Vec::with_capacity(12);
        record.push(TAG_PID_BEGIN);
        varint::encode(pid, &mut record);
        varint::encode(ppid, &mut record);
        self.out.write_all(&record)
    }

    pub fn pid_end(&mut self, pid: u32) -> io::Result<()> {
        let mut record = Vec::with_capacity(8);
        record.push(TAG_PID_END);
        varint::encode(pid, &mut record);
        self.out.write_all(&record)?;
        self.out.flush()
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    /// Drop the buffered bytes and the fd without flushing either. Used by
    /// a forked child: the inherited buffer holds a copy of parent data the
    /// parent will write itself.
    pub fn discard(self) {
        let (file, _buffered) = self.out.into_parts();
        drop(file);
    }

    pub fn close(mut self) -> io::Result<()> {
        self.out.flush()
    }
}
