//! Core domain types for metakmer runs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MetakmerError, Result};

/// Label used for the single comparison unit in paired mode.
pub const ALL_UNIT_LABEL: &str = "all";

/// Compression suffixes stripped before the sequence suffix.
const COMPRESSION_SUFFIXES: &[&str] = &[".gz", ".bz2", ".xz", ".zst"];

/// Sequence file suffixes stripped from sample file names.
const SEQUENCE_SUFFIXES: &[&str] = &[".fastq", ".fq", ".fasta", ".fa", ".fna"];

// ---------------------------------------------------------------------------
// Manifest model
// ---------------------------------------------------------------------------

/// One manifest row: a sample file and the category it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleEntry {
    pub sample_path: PathBuf,
    pub category_label: String,
}

/// All samples sharing a category label, in manifest order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryGroup {
    pub label: String,
    pub samples: Vec<PathBuf>,
}

/// The grouping of every manifest sample by category.
///
/// Labels keep their first-seen order, and so do samples within a label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySet {
    groups: Vec<CategoryGroup>,
    samples: Vec<PathBuf>,
}

impl CategorySet {
    /// Group entries by label. Entry order is preserved.
    pub fn from_entries(entries: &[SampleEntry]) -> Self {
        let mut groups: Vec<CategoryGroup> = Vec::new();
        let mut samples = Vec::with_capacity(entries.len());

        for entry in entries {
            samples.push(entry.sample_path.clone());
            match groups.iter_mut().find(|g| g.label == entry.category_label) {
                Some(group) => group.samples.push(entry.sample_path.clone()),
                None => groups.push(CategoryGroup {
                    label: entry.category_label.clone(),
                    samples: vec![entry.sample_path.clone()],
                }),
            }
        }

        Self { groups, samples }
    }

    /// Number of distinct categories.
    pub fn n_cat(&self) -> usize {
        self.groups.len()
    }

    pub fn groups(&self) -> &[CategoryGroup] {
        &self.groups
    }

    /// Every sample in manifest row order.
    pub fn samples(&self) -> &[PathBuf] {
        &self.samples
    }

    pub fn get(&self, label: &str) -> Option<&CategoryGroup> {
        self.groups.iter().find(|g| g.label == label)
    }

    /// Samples of every category except `label`, in manifest row order.
    pub fn rest_of(&self, label: &str) -> Vec<PathBuf> {
        let own = self.get(label).map(|g| g.samples.as_slice()).unwrap_or(&[]);
        self.samples
            .iter()
            .filter(|s| !own.contains(s))
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// BranchMode
// ---------------------------------------------------------------------------

/// Comparison strategy, chosen once from the category count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BranchMode {
    /// 2 or 3 categories compared directly in one unit.
    Paired,
    /// 4+ categories, each compared against the rest.
    OneVsRest,
}

impl BranchMode {
    /// Select the mode for `n_cat` categories.
    pub fn for_category_count(n_cat: usize) -> Result<Self> {
        match n_cat {
            0 | 1 => Err(MetakmerError::InsufficientCategories { found: n_cat }),
            2 | 3 => Ok(Self::Paired),
            _ => Ok(Self::OneVsRest),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paired => "paired",
            Self::OneVsRest => "one-vs-rest",
        }
    }
}

impl std::fmt::Display for BranchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ComparisonUnit
// ---------------------------------------------------------------------------

/// A named group of samples handed to the engine's statistics step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonGroup {
    pub name: String,
    pub samples: Vec<PathBuf>,
}

/// One comparison carried through stages 2 to 5.
///
/// In paired mode there is exactly one unit labelled [`ALL_UNIT_LABEL`];
/// in one-vs-rest mode there is one unit per category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonUnit {
    /// Directory suffix and report key.
    pub label: String,
    /// Groups compared against each other for k-mer selection.
    pub groups: Vec<ComparisonGroup>,
    /// Samples whose k-mers feed graph traversal and export.
    pub traversal_samples: Vec<PathBuf>,
}

// ---------------------------------------------------------------------------
// Sample identity
// ---------------------------------------------------------------------------

/// Sample identifier used for k-mer file names and feature-table rows.
///
/// `reads/s1.fastq.gz` becomes `s1`; unknown suffixes are kept.
pub fn sample_basename(path: &Path) -> String {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if let Some(stripped) = strip_any_suffix(&name, COMPRESSION_SUFFIXES) {
        name = stripped;
    }
    if let Some(stripped) = strip_any_suffix(&name, SEQUENCE_SUFFIXES) {
        name = stripped;
    }
    name
}

fn strip_any_suffix(name: &str, suffixes: &[&str]) -> Option<String> {
    suffixes.iter().find_map(|suffix| {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(suffix) && name.len() > suffix.len() {
            Some(name[..name.len() - suffix.len()].to_string())
        } else {
            None
        }
    })
}
