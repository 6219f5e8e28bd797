//! Aggregated profile model built from a trace stream.

use std::collections::HashMap;

use crate::fid_table::Fid;

/// Accumulated time and call count for one source line. When the line
/// compiled a string eval, `eval_lines` holds the inner lines' times keyed
/// by their line number inside the eval.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct LineTime {
    pub time: f64,
    pub calls: u64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub eval_lines: HashMap<u32, LineTime>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct FidInfo {
    pub name: String,
    /// For string evals, the fid of the file that compiled the string.
    pub eval_fid: Fid,
    pub eval_line: u32,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SubLocation {
    pub fid: Fid,
    pub first_line: u32,
    pub last_line: u32,
}

#[derive(Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct ProfileData {
    pub attributes: HashMap<String, String>,
    pub fid_info: HashMap<Fid, FidInfo>,
    pub fid_line_time: HashMap<Fid, HashMap<u32, LineTime>>,
    /// Populated only when the trace carries block-level samples.
    pub fid_block_time: HashMap<Fid, HashMap<u32, LineTime>>,
    pub fid_sub_time: HashMap<Fid, HashMap<u32, LineTime>>,
    pub sub_fid_line: HashMap<String, SubLocation>,
    /// Callee name -> caller fid -> caller line -> call count.
    pub sub_caller: HashMap<String, HashMap<Fid, HashMap<u32, u64>>>,
    /// Pids whose `P` record has no matching `p` yet. Non-empty after a full
    /// read means the trace was truncated.
    pub live_pids: HashMap<u32, u32>,
}

impl ProfileData {
    /// Total recorded time for one source unit, nested eval lines included.
    pub fn fid_total_time(&self, fid: Fid) -> f64 {
        self.fid_line_time
            .get(&fid)
            .map(|lines| lines.values().map(line_total).sum())
            .unwrap_or(0.0)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap()
    }
}

fn line_total(line: &LineTime) -> f64 {
    line.time + line.eval_lines.values().map(line_total).sum::<f64>()
}
