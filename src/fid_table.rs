//! Interning table mapping source-unit names to dense file ids.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

/// Dense id for a source unit. `0` is the reserved "unknown" sentinel.
pub type Fid = u32;

pub const FID_IS_EVAL: u32 = 1 << 0;
pub const FID_IS_FAKE: u32 = 1 << 1;
pub const FID_IS_PMC: u32 = 1 << 2;
pub const FID_HAS_SRC: u32 = 1 << 3;
pub const FID_SAVE_SRC: u32 = 1 << 4;

#[derive(Debug, Clone)]
pub struct FidEntry {
    /// The name exactly as the interpreter reported it (minus any autosplit
    /// annotation).
    pub key: String,
    /// Absolute path computed at first sight; symlinks are not followed and
    /// later chdirs do not re-resolve it.
    pub abs_key: Option<PathBuf>,
    /// For `(eval N)[<outer>:<line>]` names, the fid of `<outer>`.
    pub eval_fid: Fid,
    /// For eval names, the line in the outer file that compiled the string.
    pub eval_line: u32,
    pub flags: u32,
}

/// Fids are assigned in first-sight order and never reused within a process;
/// after a fork the child re-emits the inherited assignments unchanged.
#[derive(Debug, Default)]
pub struct FidTable {
    by_key: HashMap<String, Fid>,
    // Arena in insertion order; fid = index + 1.
    entries: Vec<FidEntry>,
    // Fids created since the last drain, oldest first.
    pending_decls: Vec<Fid>,
}

impl FidTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fid for `key` if it has one, else 0. Used by the finalizer so files
    /// with no recorded samples never get declared.
    pub fn lookup(&self, key: &str) -> Fid {
        self.by_key.get(strip_autosplit(key)).copied().unwrap_or(0)
    }

    /// Fid for `key`, interning it (and, for eval names, its outer file)
    /// on first sight.
    pub fn intern(&mut self, key: &str) -> Fid {
        let key = strip_autosplit(key);
        if let Some(&fid) = self.by_key.get(key) {
            return fid;
        }

        let (eval_fid, eval_line, flags) = match parse_eval_key(key) {
            Some((outer, line)) => {
                let outer = outer.to_owned();
                let outer_fid = self.intern(&outer);
                (outer_fid, line, FID_IS_EVAL)
            }
            None if key.starts_with('(') => (0, 0, FID_IS_FAKE),
            None => (0, 0, 0),
        };

        let abs_key = if flags == 0 {
            let path = Path::new(key);
            if path.is_absolute() {
                Some(path.to_owned())
            } else {
                // First-sight cwd; deliberately not refreshed on later chdir.
                env::current_dir().ok().map(|cwd| cwd.join(path))
            }
        } else {
            None
        };

        let fid = (self.entries.len() + 1) as Fid;
        self.entries.push(FidEntry {
            key: key.to_owned(),
            abs_key,
            eval_fid,
            eval_line,
            flags,
        });
        self.by_key.insert(key.to_owned(), fid);
        self.pending_decls.push(fid);
        fid
    }

    pub fn entry(&self, fid: Fid) -> Option<&FidEntry> {
        fid.checked_sub(1).and_then(|i| self.entries.get(i as usize))
    }

    /// Drain the fids interned since the last drain, in creation order, so
    /// their declarations can be written before any record references them.
    pub fn take_pending(&mut self) -> Vec<Fid> {
        std::mem::take(&mut self.pending_decls)
    }

    /// All fids in insertion order, for re-emission after a fork.
    pub fn iter(&self) -> impl Iterator<Item = (Fid, &FidEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, entry)| ((i + 1) as Fid, entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn strip_autosplit(key: &str) -> &str {
    match key.find(" (autosplit into ") {
        Some(i) => &key[..i],
        None => key,
    }
}

// `(eval N)[<outer>:<line>]`
fn parse_eval_key(key: &str) -> Option<(&str, u32)> {
    if !key.starts_with("(eval ") || !key.ends_with(']') {
        return None;
    }
    let open = key.find('[')?;
    let inner = &key[open + 1..key.len() - 1];
    let colon = inner.rfind(':')?;
    let line = inner[colon + 1..].parse().ok()?;
    Some((&inner[..colon], line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fids_are_dense_and_stable() {
        let mut table = FidTable::new();
        let a = table.intern("a.src");
        let b = table.intern("b.src");
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(table.intern("a.src"), a);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_lookup_does_not_create() {
        let mut table = FidTable::new();
        assert_eq!(table.lookup("missing.src"), 0);
        let fid = table.intern("present.src");
        assert_eq!(table.lookup("present.src"), fid);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_eval_key_interns_outer_first() {
        let mut table = FidTable::new();
        let eval_fid = table.intern("(eval 1)[t2.src:5]");
        let outer_fid = table.lookup("t2.src");
        assert_eq!(outer_fid, 1);
        assert_eq!(eval_fid, 2);

        let entry = table.entry(eval_fid).unwrap();
        assert_eq!(entry.eval_fid, outer_fid);
        assert_eq!(entry.eval_line, 5);
        assert_eq!(entry.flags & FID_IS_EVAL, FID_IS_EVAL);
        assert!(entry.abs_key.is_none());

        // Declaration order must put the outer file first.
        assert_eq!(table.take_pending(), vec![outer_fid, eval_fid]);
    }

    #[test]
    fn test_nested_eval_references_inner_eval() {
        let mut table = FidTable::new();
        let outer_eval = table.intern("(eval 1)[t.src:3]");
        let inner_eval = table.intern("(eval 2)[(eval 1)[t.src:3]:1]");
        let entry = table.entry(inner_eval).unwrap();
        assert_eq!(entry.eval_fid, outer_eval);
        assert_eq!(entry.eval_line, 1);
    }

    #[test]
    fn test_autosplit_annotation_is_stripped() {
        let mut table = FidTable::new();
        let fid = table.intern("Loader.pm (autosplit into auto/Loader/load.al)");
        assert_eq!(table.entry(fid).unwrap().key, "Loader.pm");
        assert_eq!(table.lookup("Loader.pm"), fid);
    }

    #[test]
    fn test_relative_key_gets_first_sight_abs_key() {
        let mut table = FidTable::new();
        let fid = table.intern("rel/path.src");
        let abs = table.entry(fid).unwrap().abs_key.clone().unwrap();
        assert!(abs.is_absolute());
        assert!(abs.ends_with("rel/path.src"));
    }

    #[test]
    fn test_absolute_key_is_its_own_abs_key() {
        let mut table = FidTable::new();
        let fid = table.intern("/abs/path.src");
        assert_eq!(
            table.entry(fid).unwrap().abs_key.as_deref(),
            Some(Path::new("/abs/path.src"))
        );
    }

    #[test]
    fn test_paren_key_is_fake() {
        let mut table = FidTable::new();
        let fid = table.intern("(unknown)");
        let entry = table.entry(fid).unwrap();
        assert_eq!(entry.flags & FID_IS_FAKE, FID_IS_FAKE);
        assert_eq!(entry.eval_fid, 0);
        assert!(entry.abs_key.is_none());
    }

    #[test]
    fn test_insertion_order_iteration() {
        let mut table = FidTable::new();
        table.intern("one.src");
        table.intern("two.src");
        table.intern("three.src");
        let keys: Vec<_> = table.iter().map(|(_, e)| e.key.as_str()).collect();
        assert_eq!(keys, ["one.src", "two.src", "three.src"]);
    }
}
