//! Artifact path derivation and engine command construction.
//!
//! Everything here is a pure function of the [`RunConfig`], the category
//! grouping and the [`BranchMode`], apart from the optional existence checks
//! on prerequisite artifacts.

use std::path::{Path, PathBuf};

use metakmer_shared::{
    ALL_UNIT_LABEL, BranchMode, CategorySet, ComparisonGroup, ComparisonUnit, MetakmerError,
    Result, RunConfig, sample_basename,
};

use crate::pipeline::Stage;
use crate::runner::Invocation;

/// Extension of every per-sample k-mer artifact.
pub const KMER_FILE_SUFFIX: &str = ".kmers.bin";

/// Name of the outgroup in one-vs-rest comparisons.
const REST_GROUP: &str = "rest";

// ---------------------------------------------------------------------------
// Comparison units
// ---------------------------------------------------------------------------

/// Derive the comparison units for `mode`.
///
/// Paired mode yields a single `all` unit comparing every category; one-vs-rest
/// yields one unit per category, in manifest order, comparing the category's
/// samples with everyone else's.
pub fn comparison_units(categories: &CategorySet, mode: BranchMode) -> Vec<ComparisonUnit> {
    match mode {
        BranchMode::Paired => vec![ComparisonUnit {
            label: ALL_UNIT_LABEL.to_string(),
            groups: categories
                .groups()
                .iter()
                .map(|g| ComparisonGroup {
                    name: g.label.clone(),
                    samples: g.samples.clone(),
                })
                .collect(),
            traversal_samples: categories.samples().to_vec(),
        }],
        BranchMode::OneVsRest => categories
            .groups()
            .iter()
            .map(|g| {
                let rest_name = if g.label == REST_GROUP { "others" } else { REST_GROUP };
                ComparisonUnit {
                    label: g.label.clone(),
                    groups: vec![
                        ComparisonGroup {
                            name: g.label.clone(),
                            samples: g.samples.clone(),
                        },
                        ComparisonGroup {
                            name: rest_name.to_string(),
                            samples: categories.rest_of(&g.label),
                        },
                    ],
                    traversal_samples: g.samples.clone(),
                }
            })
            .collect(),
    }
}

// ---------------------------------------------------------------------------
// Artifact layout
// ---------------------------------------------------------------------------

/// Where every artifact of a run lives under the working directory.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactLayout<'a> {
    config: &'a RunConfig,
}

impl<'a> ArtifactLayout<'a> {
    pub fn new(config: &'a RunConfig) -> Self {
        Self { config }
    }

    pub fn work_dir(&self) -> &Path {
        &self.config.work_dir
    }

    /// Output root handed to the counting step.
    pub fn count_output_dir(&self) -> PathBuf {
        self.work_dir().join("kmers")
    }

    /// Directory holding per-sample k-mer files. A user-supplied directory is used verbatim.
    pub fn kmers_dir(&self) -> PathBuf {
        match &self.config.kmers_dir {
            Some(dir) => dir.clone(),
            None => self.count_output_dir().join("kmers"),
        }
    }

    pub fn kmer_file(&self, sample: &Path) -> PathBuf {
        self.kmers_dir()
            .join(format!("{}{KMER_FILE_SUFFIX}", sample_basename(sample)))
    }

    pub fn kmer_files(&self, samples: &[PathBuf]) -> Vec<PathBuf> {
        samples.iter().map(|s| self.kmer_file(s)).collect()
    }

    pub fn grouping_file(&self) -> PathBuf {
        self.work_dir().join("categories_samples.tsv")
    }

    pub fn stats_dir(&self, unit: &str) -> PathBuf {
        self.work_dir().join(format!("statistic_kmers_{unit}"))
    }

    pub fn pivot_file(&self, unit: &str) -> PathBuf {
        self.stats_dir(unit).join("kmers").join(format!(
            "top_{}_chi_squared_specific{KMER_FILE_SUFFIX}",
            self.config.num_kmers
        ))
    }

    pub fn components_dir(&self, unit: &str) -> PathBuf {
        self.work_dir().join(format!("components_{unit}"))
    }

    pub fn components_file(&self, unit: &str) -> PathBuf {
        self.components_dir(unit).join("components.bin")
    }

    pub fn features_dir(&self, unit: &str) -> PathBuf {
        self.work_dir().join(format!("features_{unit}"))
    }

    pub fn features_file(&self, unit: &str) -> PathBuf {
        self.features_dir(unit).join("features.tsv")
    }

    pub fn contigs_dir(&self, unit: &str) -> PathBuf {
        self.work_dir().join(format!("contigs_{unit}"))
    }

    pub fn graph_file(&self, unit: &str) -> PathBuf {
        self.contigs_dir(unit).join("graph.gfa")
    }

    pub fn contigs_file(&self, unit: &str) -> PathBuf {
        self.contigs_dir(unit).join("contigs.fasta")
    }

    pub fn feature_table_file(&self) -> PathBuf {
        self.work_dir().join("feature_table.tsv")
    }

    pub fn report_file(&self) -> PathBuf {
        self.work_dir().join("pipeline_report.json")
    }
}

// ---------------------------------------------------------------------------
// Command builder
// ---------------------------------------------------------------------------

/// Builds the engine and helper invocations for each stage.
#[derive(Debug, Clone, Copy)]
pub struct CommandBuilder<'a> {
    config: &'a RunConfig,
    layout: ArtifactLayout<'a>,
    check_prerequisites: bool,
}

impl<'a> CommandBuilder<'a> {
    /// Builder that verifies prerequisite artifacts exist.
    pub fn new(config: &'a RunConfig) -> Self {
        Self {
            config,
            layout: ArtifactLayout::new(config),
            check_prerequisites: true,
        }
    }

    /// Builder that skips existence checks, for planning a run ahead of time.
    pub fn unchecked(config: &'a RunConfig) -> Self {
        Self {
            check_prerequisites: false,
            ..Self::new(config)
        }
    }

    pub fn layout(&self) -> &ArtifactLayout<'a> {
        &self.layout
    }

    /// Stage 1: count k-mers of every sample.
    pub fn count(&self, samples: &[PathBuf]) -> Invocation {
        let mut args = self.engine_args("count");
        args.push("--min-abundance".into());
        args.push(self.config.bad_freq.to_string());
        args.push("--output".into());
        args.push(path_arg(&self.layout.count_output_dir()));
        self.push_resources(&mut args);
        args.extend(samples.iter().map(|s| path_arg(s)));

        Invocation {
            stage: Stage::Count,
            unit: None,
            program: self.config.engine.clone(),
            args,
            outputs: self.layout.kmer_files(samples),
        }
    }

    /// Stage 2: chi-squared selection of the top k-mers for one unit.
    pub fn select(&self, unit: &ComparisonUnit) -> Result<Invocation> {
        let stats_dir = self.layout.stats_dir(&unit.label);

        let mut args = self.engine_args("stats");
        args.push("--error-threshold".into());
        args.push(self.config.bad_freq.to_string());
        args.push("--top".into());
        args.push(self.config.num_kmers.to_string());
        args.push("--output".into());
        args.push(path_arg(&stats_dir));
        for group in &unit.groups {
            let files = self.existing_kmer_files(&group.samples)?;
            args.push("--group".into());
            args.push(format!(
                "{}={}",
                group.name,
                files.iter().map(|f| path_arg(f)).collect::<Vec<_>>().join(",")
            ));
        }
        self.push_resources(&mut args);

        Ok(self.per_unit(Stage::Select, unit, args, vec![self.layout.pivot_file(&unit.label)]))
    }

    /// Stage 3: extract graph components around the unit's pivot k-mers.
    pub fn components(&self, unit: &ComparisonUnit) -> Result<Invocation> {
        let pivot = self.require("pivot k-mers", self.layout.pivot_file(&unit.label))?;
        let inputs = self.existing_kmer_files(&unit.traversal_samples)?;

        let mut args = self.engine_args("components");
        args.push("--depth".into());
        args.push(self.config.depth.to_string());
        args.push("--pivot".into());
        args.push(path_arg(&pivot));
        args.push("--output".into());
        args.push(path_arg(&self.layout.components_dir(&unit.label)));
        self.push_resources(&mut args);
        args.extend(inputs.iter().map(|f| path_arg(f)));

        Ok(self.per_unit(
            Stage::Components,
            unit,
            args,
            vec![self.layout.components_file(&unit.label)],
        ))
    }

    /// Stage 4: per-sample coverage features over every sample's k-mers.
    pub fn features(&self, unit: &ComparisonUnit, all_samples: &[PathBuf]) -> Result<Invocation> {
        let components =
            self.require("components", self.layout.components_file(&unit.label))?;
        let inputs = self.existing_kmer_files(all_samples)?;

        let mut args = self.engine_args("features");
        args.push("--components".into());
        args.push(path_arg(&components));
        args.push("--output".into());
        args.push(path_arg(&self.layout.features_dir(&unit.label)));
        self.push_resources(&mut args);
        args.extend(inputs.iter().map(|f| path_arg(f)));

        Ok(self.per_unit(
            Stage::Features,
            unit,
            args,
            vec![self.layout.features_file(&unit.label)],
        ))
    }

    /// Stage 5, first half: coverage-annotated graph of the unit's components.
    pub fn export_graph(&self, unit: &ComparisonUnit) -> Result<Invocation> {
        let components =
            self.require("components", self.layout.components_file(&unit.label))?;
        let inputs = self.existing_kmer_files(&unit.traversal_samples)?;
        let graph = self.layout.graph_file(&unit.label);

        let mut args = self.engine_args("graph");
        args.push("--components".into());
        args.push(path_arg(&components));
        args.push("--output".into());
        args.push(path_arg(&graph));
        self.push_resources(&mut args);
        args.extend(inputs.iter().map(|f| path_arg(f)));

        Ok(self.per_unit(Stage::Export, unit, args, vec![graph]))
    }

    /// Stage 5, second half: contig sequences from the exported graph.
    pub fn export_contigs(&self, unit: &ComparisonUnit) -> Result<Invocation> {
        let graph = self.require("exported graph", self.layout.graph_file(&unit.label))?;
        let contigs = self.layout.contigs_file(&unit.label);

        Ok(Invocation {
            stage: Stage::Export,
            unit: Some(unit.label.clone()),
            program: self.config.contig_helper.clone(),
            args: vec![path_arg(&graph), path_arg(&contigs)],
            outputs: vec![contigs],
        })
    }

    // -- helpers ------------------------------------------------------------

    fn engine_args(&self, subcommand: &str) -> Vec<String> {
        vec![
            subcommand.to_string(),
            "-k".into(),
            self.config.kmer_size.to_string(),
        ]
    }

    fn push_resources(&self, args: &mut Vec<String>) {
        if let Some(threads) = self.config.threads {
            args.push("--threads".into());
            args.push(threads.to_string());
        }
        if let Some(memory) = &self.config.memory {
            args.push("--memory".into());
            args.push(memory.clone());
        }
    }

    fn per_unit(
        &self,
        stage: Stage,
        unit: &ComparisonUnit,
        args: Vec<String>,
        outputs: Vec<PathBuf>,
    ) -> Invocation {
        Invocation {
            stage,
            unit: Some(unit.label.clone()),
            program: self.config.engine.clone(),
            args,
            outputs,
        }
    }

    fn require(&self, what: &str, path: PathBuf) -> Result<PathBuf> {
        if self.check_prerequisites && !path.is_file() {
            return Err(MetakmerError::missing(what, path));
        }
        Ok(path)
    }

    fn existing_kmer_files(&self, samples: &[PathBuf]) -> Result<Vec<PathBuf>> {
        samples
            .iter()
            .map(|s| self.require("k-mer file", self.layout.kmer_file(s)))
            .collect()
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
