//! `pipeline_report.json`: per-run record of stage states and outputs.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use metakmer_shared::{BranchMode, MetakmerError, Result};

use crate::assembler::write_atomic;
use crate::pipeline::{PipelineOutcome, Stage, StageState};

/// Final state of one stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub stage: u8,
    pub name: &'static str,
    pub state: StageState,
    /// External calls issued by the stage.
    pub invocations: usize,
}

/// The assembled table, as recorded in the report.
#[derive(Debug, Clone, Serialize)]
pub struct TableRecord {
    pub path: PathBuf,
    pub sha256: String,
    pub rows: usize,
    pub columns: usize,
}

/// Everything worth knowing about a finished (or aborted) run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub tool_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub work_dir: PathBuf,
    pub kmer_size: u8,
    pub num_kmers: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<BranchMode>,
    pub units: Vec<String>,
    pub stages: Vec<StageRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<PipelineOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_table: Option<TableRecord>,
}

impl RunReport {
    /// Fresh report with every stage pending.
    pub fn new(work_dir: &Path, kmer_size: u8, num_kmers: u32) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Utc::now(),
            finished_at: None,
            work_dir: work_dir.to_path_buf(),
            kmer_size,
            num_kmers,
            mode: None,
            units: Vec::new(),
            stages: Stage::ALL
                .iter()
                .map(|s| StageRecord {
                    stage: s.number(),
                    name: s.name(),
                    state: StageState::Pending,
                    invocations: 0,
                })
                .collect(),
            outcome: None,
            error: None,
            feature_table: None,
        }
    }

    pub fn stage(&self, stage: Stage) -> &StageRecord {
        &self.stages[stage.index()]
    }

    pub fn stage_mut(&mut self, stage: Stage) -> &mut StageRecord {
        &mut self.stages[stage.index()]
    }

    /// Stamp the outcome and finish time.
    pub fn finish(&mut self, outcome: PipelineOutcome, error: Option<&MetakmerError>) {
        self.outcome = Some(outcome);
        self.error = error.map(|e| e.to_string());
        self.finished_at = Some(Utc::now());
    }

    /// Write the report as pretty JSON.
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| MetakmerError::io(path, e.into()))?;
        write_atomic(path, &json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_report_has_five_pending_stages() {
        let report = RunReport::new(Path::new("/w"), 21, 50);
        assert_eq!(report.stages.len(), 5);
        assert!(report.stages.iter().all(|s| s.state == StageState::Pending));
        assert_eq!(report.stage(Stage::Features).name, "features");
    }

    #[test]
    fn report_serializes_states_in_snake_case() {
        let mut report = RunReport::new(Path::new("/w"), 21, 50);
        report.mode = Some(BranchMode::OneVsRest);
        report.stage_mut(Stage::Count).state = StageState::Skipped;
        report.finish(
            PipelineOutcome::Aborted,
            Some(&MetakmerError::InsufficientCategories { found: 1 }),
        );

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["mode"], "one-vs-rest");
        assert_eq!(json["stages"][0]["state"], "skipped");
        assert_eq!(json["outcome"], "aborted");
        assert!(json["error"].as_str().unwrap().contains("found 1"));
        assert!(json.get("feature_table").is_none());
    }

    #[test]
    fn write_creates_json_file() {
        let dir = std::env::temp_dir().join(format!("mk-report-test-{}", Uuid::now_v7()));
        let path = dir.join("pipeline_report.json");
        let mut report = RunReport::new(&dir, 21, 50);
        report.finish(PipelineOutcome::Completed, None);

        report.write(&path).unwrap();
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["outcome"], "completed");
        assert_eq!(parsed["kmer_size"], 21);
    }

    #[test]
    fn write_failure_is_an_io_error() {
        let dir = std::env::temp_dir().join(format!("mk-report-test-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let blocker = dir.join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let report = RunReport::new(&dir, 21, 50);
        let err = report.write(&blocker.join("pipeline_report.json")).unwrap_err();

        assert!(matches!(err, MetakmerError::Io { .. }));
        assert!(!err.is_input_validation());
    }
}
