//! The runtime profiling engine: statement and call hooks, fork guard, and
//! end-of-run finalization.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::clock::Clock;
use crate::context_walker;
use crate::fid_table::{Fid, FidTable};
use crate::host::{CallDispatch, Callee, Interpreter};
use crate::session::configuration::Configuration;
use crate::writer::TraceWriter;

/// Per-call-site statistics for one callee. Only the count is serialized
/// today; inclusive/exclusive times are compatible extensions of this slot.
#[derive(Clone, Debug, Default)]
pub struct CallStats {
    pub count: u64,
}

/// Owns all profiling state for one process. Everything runs on the host's
/// single interpreter thread, so there are no locks anywhere on the hot
/// paths; after a fork the child re-establishes its own output stream and
/// the processes share nothing mutable.
pub struct Profiler {
    config: Configuration,
    clock: Clock,
    fids: FidTable,
    out: Option<TraceWriter>,
    is_profiling: bool,
    application: String,

    last_pid: u32,
    last_executed_fid: Fid,
    last_executed_line: u32,
    last_block_line: u32,
    last_sub_line: u32,
    last_sample_time: u64,
    // Most statements stay within one file; comparing the name beats an
    // intern per dispatch.
    cached_file: String,

    // Callee name -> (caller fid, caller line) -> stats. Serialized once by
    // the finalizer; the call hook never touches the trace.
    sub_callers: HashMap<String, HashMap<(Fid, u32), CallStats>>,

    own_package: String,
    finished_pid: Option<u32>,
    warned_zero_line: bool,

    #[cfg(test)]
    forced_pid: Option<u32>,
}

impl Profiler {
    pub fn new(
        config: Configuration,
        clock: Clock,
        out: TraceWriter,
        application: &str,
    ) -> Self {
        let last_sample_time = clock.now();
        Profiler {
            config,
            clock,
            fids: FidTable::new(),
            out: Some(out),
            is_profiling: false,
            application: application.to_owned(),
            last_pid: unsafe { libc::getpid() } as u32,
            last_executed_fid: 0,
            last_executed_line: 0,
            last_block_line: 0,
            last_sub_line: 0,
            last_sample_time,
            cached_file: String::new(),
            sub_callers: HashMap::new(),
            own_package: String::new(),
            finished_pid: None,
            warned_zero_line: false,
            #[cfg(test)]
            forced_pid: None,
        }
    }

    /// Package name of the profiler's host-side module; the context walker
    /// skips frames belonging to it.
    pub fn register_own_package(&mut self, package: &str) {
        self.own_package = package.to_owned();
    }

    pub fn enable_profile(&mut self) {
        self.is_profiling = true;
        // Restart the sample origin so disabled wall time is not charged to
        // the statement that was executing when profiling stopped.
        self.last_sample_time = self.clock.now();
    }

    pub fn disable_profile(&mut self) {
        self.is_profiling = false;
    }

    pub fn is_profiling(&self) -> bool {
        self.is_profiling
    }

    /// The statement hook. The host registers this single handler at each of
    /// its statement-dispatch variants; they all route here.
    ///
    /// Between two dispatches the elapsed time belongs to the *earlier*
    /// statement, so the hook first closes the previous sample and only then
    /// records where execution is about to go.
    pub fn statement(&mut self, interp: &dyn Interpreter) {
        let now = self.clock.now();
        let elapsed = now.saturating_sub(self.last_sample_time);

        if !self.is_profiling || self.out.is_none() {
            return;
        }

        // The very first statement of a process has nothing to charge.
        if self.last_executed_fid != 0 {
            self.guard_fork();
            self.emit_sample(elapsed);
        }

        let Some(mut cur) = interp.statement_op() else {
            return;
        };
        let file = cur.file().to_owned();
        let mut line = cur.line();
        if line == 0 {
            // The op was optimized away; borrow a line from the nearest
            // reachable sibling.
            while cur.advance() {
                if cur.line() != 0 {
                    line = cur.line();
                    break;
                }
            }
            if line == 0 {
                if !self.warned_zero_line {
                    log::warn!("no line number for statement in {}; using line 1", file);
                    self.warned_zero_line = true;
                }
                line = 1;
            }
        }

        if file != self.cached_file {
            let fid = self.fids.intern(&file);
            self.flush_fid_decls();
            self.last_executed_fid = fid;
            self.cached_file = file;
        }
        self.last_executed_line = line;

        if self.config.blocks {
            let scopes =
                context_walker::scope_lines(interp, &self.cached_file, line, &self.own_package);
            self.last_block_line = scopes.block_line;
            self.last_sub_line = scopes.sub_line;
        }

        if self.config.trace_level >= 3 {
            log::trace!("statement {}:{}", self.last_executed_fid, line);
        }

        // Second clock read: the hook's own overhead is charged to the
        // profiler, not to whichever statement happens to run next.
        self.last_sample_time = self.clock.now();
    }

    /// The call hook, wrapped around the host's "enter subroutine" dispatch.
    /// Updates the in-memory caller aggregate only; nothing is written to
    /// the trace until the finalizer runs.
    pub fn sub_call(
        &mut self,
        interp: &dyn Interpreter,
        callee: &Callee<'_>,
        dispatch: &mut CallDispatch<'_>,
    ) {
        if !self.is_profiling {
            (dispatch.run)();
            return;
        }

        // Call site, captured before the original op runs.
        let site = match interp.statement_op() {
            Some(cur) => {
                let file = cur.file().to_owned();
                let line = cur.line();
                let fid = self.fids.intern(&file);
                self.flush_fid_decls();
                (fid, line)
            }
            None => (0, 0),
        };

        let next = (dispatch.run)();
        let entered = next != dispatch.next_op;
        if self.config.trace_level >= 2 {
            log::trace!(
                "call from {}:{} {}",
                site.0,
                site.1,
                if entered {
                    "entered an interpreted body"
                } else {
                    "completed within the call op"
                }
            );
        }

        let name = resolve_sub_name(callee);
        self.sub_callers
            .entry(name)
            .or_default()
            .entry(site)
            .or_default()
            .count += 1;
    }

    /// Finalize the trace for the current pid: account the still-open last
    /// statement, emit the sub-range and sub-caller tails, close the stream.
    /// Idempotent per pid; a forked child finalizes its own stream.
    pub fn finish(&mut self, interp: &dyn Interpreter) {
        let pid = self.current_pid();
        if self.finished_pid == Some(pid) {
            return;
        }

        let now = self.clock.now();
        let elapsed = now.saturating_sub(self.last_sample_time);
        if self.is_profiling && self.out.is_some() && self.last_executed_fid != 0 {
            self.guard_fork();
            self.emit_sample(elapsed);
            self.last_executed_fid = 0;
        }
        self.disable_profile();

        // Sub line ranges from the host's symbol information. Files that
        // never produced a sample have no fid and are skipped, as are
        // native subs (their values don't parse as a line range).
        let mut subs: Vec<(Fid, u32, u32, String)> = Vec::new();
        {
            let fids = &self.fids;
            interp.each_known_sub(&mut |name, value| {
                if let Some((file, first_line, last_line)) = parse_sub_range(value) {
                    let fid = fids.lookup(file);
                    if fid != 0 {
                        subs.push((fid, first_line, last_line, name.to_owned()));
                    }
                }
            });
        }

        if let Some(out) = self.out.as_mut() {
            let mut result = Ok(());
            for (fid, first_line, last_line, name) in &subs {
                result = out.sub_range(*fid, *first_line, *last_line, name);
                if result.is_err() {
                    break;
                }
            }
            if result.is_ok() {
                'callers: for (name, sites) in &self.sub_callers {
                    for (&(fid, line), stats) in sites {
                        let count = stats.count.min(u64::from(u32::MAX)) as u32;
                        result = out.sub_caller(fid, line, count, name);
                        if result.is_err() {
                            break 'callers;
                        }
                    }
                }
            }
            if let Err(err) = result {
                log::error!("profile write failed during finalization: {}", err);
            }
        }

        if let Some(mut out) = self.out.take() {
            let result = out.pid_end(pid).and_then(|_| out.close());
            if let Err(err) = result {
                log::error!("failed to close profile stream: {}", err);
            }
        }
        self.finished_pid = Some(pid);
    }

    /// Write the header (and any already-interned fids) to a fresh stream.
    pub(crate) fn start_stream(&mut self) -> io::Result<()> {
        let pid = self.current_pid();
        let ppid = unsafe { libc::getppid() } as u32;
        self.open_stream(pid, ppid)
    }

    fn open_stream(&mut self, pid: u32, ppid: u32) -> io::Result<()> {
        let basetime = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let attributes = [
            ("basetime", basetime.to_string()),
            ("application", self.application.clone()),
            ("ticks_per_sec", self.clock.ticks_per_sec().to_string()),
            ("clock_mode", self.config.time_mode.as_str().to_owned()),
        ];
        let Some(out) = self.out.as_mut() else {
            return Ok(());
        };
        out.header(&attributes, pid, ppid)?;
        for (fid, entry) in self.fids.iter() {
            out.fid_decl(fid, entry)?;
        }
        Ok(())
    }

    // Runs at each sample emission. A pid change means we are a forked
    // child: the inherited output buffer may hold a copy of parent data, so
    // it is discarded *without* flushing (the parent writes its own copy)
    // and a fresh pid-suffixed stream is opened with the full header and
    // the inherited fid table re-declared.
    fn guard_fork(&mut self) {
        if !self.config.allow_fork {
            return;
        }
        let pid = self.current_pid();
        if pid == self.last_pid {
            return;
        }

        if let Some(out) = self.out.take() {
            out.discard();
        }
        let parent_pid = self.last_pid;
        self.last_pid = pid;
        self.finished_pid = None;

        let path = PathBuf::from(format!("{}.{}", self.config.file.display(), pid));
        match TraceWriter::create(&path) {
            Ok(out) => {
                self.out = Some(out);
                if let Err(err) = self.open_stream(pid, parent_pid) {
                    log::error!(
                        "cannot restart profile stream in child {}: {}; disabling profiling",
                        pid,
                        err
                    );
                    self.is_profiling = false;
                    self.out = None;
                }
            }
            Err(err) => {
                log::error!(
                    "cannot open child profile stream {}: {}; disabling profiling",
                    path.display(),
                    err
                );
                self.is_profiling = false;
            }
        }
    }

    fn emit_sample(&mut self, elapsed: u64) {
        let ticks = elapsed.min(u64::from(u32::MAX)) as u32;
        let Some(out) = self.out.as_mut() else {
            return;
        };
        let result = if self.config.blocks {
            out.stmt_block(
                ticks,
                self.last_executed_fid,
                self.last_executed_line,
                self.last_block_line,
                self.last_sub_line,
            )
        } else {
            out.stmt(ticks, self.last_executed_fid, self.last_executed_line)
        };
        if let Err(err) = result {
            log::error!("profile write failed: {}; disabling profiling", err);
            self.is_profiling = false;
            self.out = None;
        }
    }

    // Declarations must reach the stream before any record references the
    // fid, so this runs immediately after every intern.
    fn flush_fid_decls(&mut self) {
        let pending = self.fids.take_pending();
        let mut failed = None;
        if let Some(out) = self.out.as_mut() {
            for fid in pending {
                if let Some(entry) = self.fids.entry(fid) {
                    if let Err(err) = out.fid_decl(fid, entry) {
                        failed = Some(err);
                        break;
                    }
                }
            }
        }
        if let Some(err) = failed {
            log::error!("profile write failed: {}; disabling profiling", err);
            self.is_profiling = false;
            self.out = None;
        }
    }

    fn current_pid(&self) -> u32 {
        #[cfg(test)]
        if let Some(pid) = self.forced_pid {
            return pid;
        }
        unsafe { libc::getpid() as u32 }
    }

    #[cfg(test)]
    fn force_pid(&mut self, pid: u32) {
        self.forced_pid = Some(pid);
    }
}

/// Canonical fully-qualified name for a callee, preferring the *defining*
/// package over whatever symbol the call went through.
fn resolve_sub_name(callee: &Callee<'_>) -> String {
    match callee {
        Callee::Code {
            stash: Some(stash),
            name: Some(name),
            ..
        } => format!("{}::{}", stash, name),
        Callee::Code {
            glob: Some(glob), ..
        } => (*glob).to_owned(),
        Callee::Code { .. } | Callee::Anonymous => "__ANON__".to_owned(),
        Callee::Name(name) => (*name).to_owned(),
        Callee::Other(repr) => {
            log::warn!("could not resolve called sub ({})", repr);
            format!("(unknown sub {})", repr)
        }
    }
}

// `<file>:<first>-<last>`; anything else (native subs) yields None.
fn parse_sub_range(value: &str) -> Option<(&str, u32, u32)> {
    let (file, range) = value.rsplit_once(':')?;
    let (first, last) = range.split_once('-')?;
    Some((file, first.parse().ok()?, last.parse().ok()?))
}
