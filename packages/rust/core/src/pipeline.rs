//! End-to-end pipeline: manifest → count → select → components → features → export.
//!
//! Stages run strictly in order. Every external call must exit zero; the first
//! failure marks its stage failed, aborts the run, and nothing after it starts.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use metakmer_shared::{
    BranchMode, CategorySet, ComparisonUnit, MetakmerError, Result, RunConfig,
};

use crate::assembler::{self, AssembleResult};
use crate::builder::{CommandBuilder, comparison_units};
use crate::classifier;
use crate::report::{RunReport, TableRecord};
use crate::runner::{Invocation, ToolRunner};

// ---------------------------------------------------------------------------
// Stage model
// ---------------------------------------------------------------------------

/// The five pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// K-mer counting.
    Count,
    /// Significant k-mer selection.
    Select,
    /// Component extraction.
    Components,
    /// Feature computation and table assembly.
    Features,
    /// Graph and contig export.
    Export,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Count,
        Stage::Select,
        Stage::Components,
        Stage::Features,
        Stage::Export,
    ];

    /// 1-based stage number.
    pub fn number(self) -> u8 {
        self.index() as u8 + 1
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Select => "select",
            Self::Components => "components",
            Self::Features => "features",
            Self::Export => "export",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Count => 0,
            Self::Select => 1,
            Self::Components => 2,
            Self::Features => 3,
            Self::Export => 4,
        }
    }

    /// Tag an error with this stage and, optionally, the unit it concerns.
    pub fn wrap(self, err: MetakmerError, unit: Option<&str>) -> MetakmerError {
        err.in_stage(self.number(), self.name(), unit)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stage {} ({})", self.number(), self.name())
    }
}

/// Lifecycle of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Pending,
    Running,
    Skipped,
    Done,
    Failed,
}

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineOutcome {
    Completed,
    Aborted,
}

// ---------------------------------------------------------------------------
// Results & progress
// ---------------------------------------------------------------------------

/// Result of a completed run.
#[derive(Debug)]
pub struct RunResult {
    pub mode: BranchMode,
    /// Comparison unit labels, in processing order.
    pub units: Vec<String>,
    /// Path to `feature_table.tsv`.
    pub feature_table: PathBuf,
    pub rows: usize,
    pub columns: usize,
    /// The run record, also written to the working directory when possible.
    pub report: RunReport,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a stage starts running.
    fn stage_started(&self, stage: Stage);
    /// Called when a stage reaches done, skipped or failed.
    fn stage_finished(&self, stage: Stage, state: StageState);
    /// Called before each external call within a stage.
    fn invocation_started(&self, invocation: &Invocation, current: usize, total: usize);
    /// Called when the pipeline completes.
    fn done(&self, result: &RunResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage_started(&self, _stage: Stage) {}
    fn stage_finished(&self, _stage: Stage, _state: StageState) {}
    fn invocation_started(&self, _invocation: &Invocation, _current: usize, _total: usize) {}
    fn done(&self, _result: &RunResult) {}
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Run all five stages.
///
/// `pipeline_report.json` is written to the working directory whether the run
/// completes or aborts. Failing to write it is logged and never changes the
/// outcome. Input validation failures return before anything is written.
#[instrument(skip_all, fields(manifest = %config.manifest.display(), work_dir = %config.work_dir.display()))]
pub async fn run_pipeline(
    config: &RunConfig,
    runner: &dyn ToolRunner,
    progress: &dyn ProgressReporter,
) -> Result<RunResult> {
    config.validate()?;
    let start = Instant::now();

    std::fs::create_dir_all(&config.work_dir)
        .map_err(|e| MetakmerError::io(&config.work_dir, e))?;

    info!(k = config.kmer_size, top = config.num_kmers, "starting pipeline");

    let mut ctx = RunContext {
        config,
        builder: CommandBuilder::new(config),
        runner,
        progress,
        report: RunReport::new(&config.work_dir, config.kmer_size, config.num_kmers),
    };
    let report_path = ctx.builder.layout().report_file();

    match ctx.execute().await {
        Ok(done) => {
            ctx.report.feature_table = Some(TableRecord {
                path: done.assembled.path.clone(),
                sha256: done.assembled.sha256.clone(),
                rows: done.assembled.table.n_rows(),
                columns: done.assembled.table.n_cols(),
            });
            ctx.report.finish(PipelineOutcome::Completed, None);
            if let Err(write_err) = ctx.report.write(&report_path) {
                warn!(error = %write_err, "could not write pipeline report");
            }

            let result = RunResult {
                mode: done.mode,
                units: done.units,
                feature_table: done.assembled.path,
                rows: done.assembled.table.n_rows(),
                columns: done.assembled.table.n_cols(),
                report: ctx.report,
                elapsed: start.elapsed(),
            };
            progress.done(&result);

            info!(
                mode = %result.mode,
                units = result.units.len(),
                rows = result.rows,
                columns = result.columns,
                elapsed_ms = result.elapsed.as_millis(),
                "pipeline complete"
            );
            Ok(result)
        }
        Err(err) => {
            error!(error = %err, "pipeline aborted");
            ctx.report.finish(PipelineOutcome::Aborted, Some(&err));
            if let Err(write_err) = ctx.report.write(&report_path) {
                warn!(error = %write_err, "could not write pipeline report");
            }
            Err(err)
        }
    }
}

/// What the stages hand back on success.
struct Completed {
    mode: BranchMode,
    units: Vec<String>,
    assembled: AssembleResult,
}

struct RunContext<'a> {
    config: &'a RunConfig,
    builder: CommandBuilder<'a>,
    runner: &'a dyn ToolRunner,
    progress: &'a dyn ProgressReporter,
    report: RunReport,
}

impl RunContext<'_> {
    async fn execute(&mut self) -> Result<Completed> {
        // --- Stage 1: count ---
        if self.config.kmers_dir.is_some() {
            self.skip(Stage::Count);
        } else {
            self.begin(Stage::Count);
            let r = self.stage_count().await;
            self.settle(Stage::Count, r)?;
        }

        // --- Stage 2: select ---
        self.begin(Stage::Select);
        let r = self.stage_select().await;
        let (categories, mode, units) = self.settle(Stage::Select, r)?;

        // --- Stage 3: components ---
        self.begin(Stage::Components);
        let r = self.stage_components(&units).await;
        self.settle(Stage::Components, r)?;

        // --- Stage 4: features + assembly ---
        self.begin(Stage::Features);
        let r = self.stage_features(&categories, &units, mode).await;
        let assembled = self.settle(Stage::Features, r)?;

        // --- Stage 5: export ---
        if self.config.skip_graph {
            self.skip(Stage::Export);
        } else {
            self.begin(Stage::Export);
            let r = self.stage_export(&units).await;
            self.settle(Stage::Export, r)?;
        }

        Ok(Completed {
            mode,
            units: units.into_iter().map(|u| u.label).collect(),
            assembled,
        })
    }

    async fn stage_count(&mut self) -> Result<()> {
        let entries = classifier::read_entries(&self.config.manifest)?;
        let samples: Vec<PathBuf> = entries.into_iter().map(|e| e.sample_path).collect();
        let invocation = self.builder.count(&samples);
        self.invoke(invocation, 1, 1).await
    }

    async fn stage_select(&mut self) -> Result<(CategorySet, BranchMode, Vec<ComparisonUnit>)> {
        let (categories, mode) = classifier::classify(&self.config.manifest)?;
        classifier::write_grouping(&categories, &self.builder.layout().grouping_file())?;

        let units = comparison_units(&categories, mode);
        self.report.mode = Some(mode);
        self.report.units = units.iter().map(|u| u.label.clone()).collect();
        info!(%mode, units = units.len(), "comparison strategy selected");

        let total = units.len();
        for (i, unit) in units.iter().enumerate() {
            let invocation = self
                .builder
                .select(unit)
                .map_err(|e| Stage::Select.wrap(e, Some(unit.label.as_str())))?;
            self.invoke(invocation, i + 1, total).await?;
        }

        Ok((categories, mode, units))
    }

    async fn stage_components(&mut self, units: &[ComparisonUnit]) -> Result<()> {
        let total = units.len();
        for (i, unit) in units.iter().enumerate() {
            let invocation = self
                .builder
                .components(unit)
                .map_err(|e| Stage::Components.wrap(e, Some(unit.label.as_str())))?;
            self.invoke(invocation, i + 1, total).await?;
        }
        Ok(())
    }

    async fn stage_features(
        &mut self,
        categories: &CategorySet,
        units: &[ComparisonUnit],
        mode: BranchMode,
    ) -> Result<AssembleResult> {
        let total = units.len();
        for (i, unit) in units.iter().enumerate() {
            let invocation = self
                .builder
                .features(unit, categories.samples())
                .map_err(|e| Stage::Features.wrap(e, Some(unit.label.as_str())))?;
            self.invoke(invocation, i + 1, total).await?;
        }

        assembler::assemble(self.builder.layout(), categories, units, mode)
    }

    async fn stage_export(&mut self, units: &[ComparisonUnit]) -> Result<()> {
        let total = units.len() * 2;
        for (i, unit) in units.iter().enumerate() {
            let wrap = |e: MetakmerError| Stage::Export.wrap(e, Some(unit.label.as_str()));

            let graph = self.builder.export_graph(unit).map_err(wrap)?;
            self.invoke(graph, 2 * i + 1, total).await?;

            let contigs = self.builder.export_contigs(unit).map_err(wrap)?;
            self.invoke(contigs, 2 * i + 2, total).await?;
        }
        Ok(())
    }

    // -- state transitions --------------------------------------------------

    fn begin(&mut self, stage: Stage) {
        info!(%stage, "stage started");
        self.report.stage_mut(stage).state = StageState::Running;
        self.progress.stage_started(stage);
    }

    fn skip(&mut self, stage: Stage) {
        info!(%stage, "stage skipped");
        self.report.stage_mut(stage).state = StageState::Skipped;
        self.progress.stage_finished(stage, StageState::Skipped);
    }

    /// Mark `stage` done or failed according to `result`.
    fn settle<T>(&mut self, stage: Stage, result: Result<T>) -> Result<T> {
        let state = if result.is_ok() {
            StageState::Done
        } else {
            StageState::Failed
        };
        self.report.stage_mut(stage).state = state;
        self.progress.stage_finished(stage, state);

        match result {
            Ok(value) => {
                info!(%stage, "stage done");
                Ok(value)
            }
            Err(e) => Err(stage.wrap(e, None)),
        }
    }

    /// Run one external call and require a zero exit status.
    async fn invoke(&mut self, invocation: Invocation, current: usize, total: usize) -> Result<()> {
        let stage = invocation.stage;
        let unit = invocation.unit.clone();

        for output in &invocation.outputs {
            if let Some(parent) = output.parent() {
                std::fs::create_dir_all(parent).map_err(|e| MetakmerError::io(parent, e))?;
            }
        }

        debug!(%stage, unit = unit.as_deref().unwrap_or("-"), command = %invocation.command_line(), "invoking");
        self.progress.invocation_started(&invocation, current, total);
        self.report.stage_mut(stage).invocations += 1;

        self.runner
            .run(&invocation)
            .await
            .and_then(|output| output.check(&invocation.program))
            .map(|_| ())
            .map_err(|e| stage.wrap(e, unit.as_deref()))
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// The invocations a run would perform, computed without executing anything.
#[derive(Debug, Clone)]
pub struct Plan {
    pub mode: BranchMode,
    pub units: Vec<String>,
    pub skipped: Vec<Stage>,
    pub invocations: Vec<Invocation>,
}

/// Classify the manifest and derive every invocation of a run, in order.
///
/// Prerequisite artifacts are not checked, since they would only be
/// produced by earlier stages.
pub fn plan_pipeline(config: &RunConfig) -> Result<Plan> {
    config.validate()?;

    let (categories, mode) = classifier::classify(&config.manifest)?;
    let units = comparison_units(&categories, mode);
    let builder = CommandBuilder::unchecked(config);

    let mut skipped = Vec::new();
    let mut invocations = Vec::new();

    if config.kmers_dir.is_some() {
        skipped.push(Stage::Count);
    } else {
        invocations.push(builder.count(categories.samples()));
    }
    for unit in &units {
        invocations.push(builder.select(unit)?);
    }
    for unit in &units {
        invocations.push(builder.components(unit)?);
    }
    for unit in &units {
        invocations.push(builder.features(unit, categories.samples())?);
    }
    if config.skip_graph {
        skipped.push(Stage::Export);
    } else {
        for unit in &units {
            invocations.push(builder.export_graph(unit)?);
            invocations.push(builder.export_contigs(unit)?);
        }
    }

    Ok(Plan {
        mode,
        units: units.into_iter().map(|u| u.label).collect(),
        skipped,
        invocations,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
