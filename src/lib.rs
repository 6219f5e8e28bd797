//! Deterministic line-and-subroutine profiler core for dynamic language
//! runtimes.
//!
//! The host interpreter drives the engine through the traits in [`host`]:
//! it routes every statement dispatch to [`Profiler::statement`], wraps its
//! call dispatch around [`Profiler::sub_call`], and calls
//! [`Session::finish`] at interpreter end. The engine appends a compact
//! binary trace; [`TraceReader`] turns such a trace back into an aggregated
//! [`ProfileData`] model for reports.

extern crate serde;
#[macro_use]
extern crate serde_derive;

pub mod clock;
pub mod context_walker;
pub mod fid_table;
pub mod host;
pub mod profile;
pub mod profiler;
pub mod reader;
pub mod session;
pub mod varint;
pub mod writer;

pub use crate::clock::{Clock, TimeMode};
pub use crate::fid_table::{Fid, FidTable};
pub use crate::host::{CallDispatch, Callee, FrameInfo, FrameKind, Interpreter, OpCursor};
pub use crate::profile::ProfileData;
pub use crate::profiler::Profiler;
pub use crate::reader::{TraceError, TraceReader};
pub use crate::session::configuration::Configuration;
pub use crate::session::{ProfileError, Session};
pub use crate::writer::TraceWriter;
