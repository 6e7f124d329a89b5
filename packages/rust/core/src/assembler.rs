//! Feature table assembler.
//!
//! Merges the per-unit `features.tsv` outputs of stage 4 into the single
//! `feature_table.tsv`, one row per manifest sample.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use metakmer_shared::{BranchMode, CategorySet, ComparisonUnit, MetakmerError, Result, sample_basename};

use crate::builder::ArtifactLayout;

/// Header of the sample-identifier column.
const SAMPLE_COLUMN: &str = "sample";

/// Value used when a unit reports nothing for a sample.
const MISSING_VALUE: &str = "0";

/// Features computed for one comparison unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitFeatures {
    /// Component identifiers, in file order.
    pub columns: Vec<String>,
    /// Values keyed by sample identifier.
    pub rows: HashMap<String, Vec<String>>,
}

/// The merged sample-by-component table.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    pub columns: Vec<String>,
    /// `(sample id, values)` in manifest order.
    pub rows: Vec<(String, Vec<String>)>,
}

impl FeatureTable {
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// Render as TSV with a `sample` header column.
    pub fn to_tsv(&self) -> String {
        let mut out = String::new();
        out.push_str(SAMPLE_COLUMN);
        for col in &self.columns {
            out.push('\t');
            out.push_str(col);
        }
        out.push('\n');
        for (sample, values) in &self.rows {
            out.push_str(sample);
            for v in values {
                out.push('\t');
                out.push_str(v);
            }
            out.push('\n');
        }
        out
    }
}

/// Output of a successful assembly.
#[derive(Debug, Clone)]
pub struct AssembleResult {
    pub table: FeatureTable,
    /// Where the table was written.
    pub path: PathBuf,
    /// SHA-256 of the written file.
    pub sha256: String,
}

/// Parse one unit's `features.tsv`.
pub fn read_unit_features(path: &Path) -> Result<UnitFeatures> {
    if !path.is_file() {
        return Err(MetakmerError::assembly(format!(
            "missing feature output {}",
            path.display()
        )));
    }
    let content = std::fs::read_to_string(path).map_err(|e| MetakmerError::io(path, e))?;
    let mut lines = content.lines().filter(|l| !l.trim().is_empty());

    let header = lines.next().ok_or_else(|| {
        MetakmerError::assembly(format!("empty feature output {}", path.display()))
    })?;
    let mut header_fields = header.split('\t');
    if header_fields.next() != Some(SAMPLE_COLUMN) {
        return Err(MetakmerError::assembly(format!(
            "{}: header must start with '{SAMPLE_COLUMN}'",
            path.display()
        )));
    }
    let columns: Vec<String> = header_fields.map(String::from).collect();

    let mut rows = HashMap::new();
    for (idx, line) in lines.enumerate() {
        let mut fields = line.split('\t');
        let sample = fields.next().unwrap_or_default().to_string();
        let values: Vec<String> = fields.map(String::from).collect();
        if values.len() != columns.len() {
            return Err(MetakmerError::assembly(format!(
                "{}: row {} has {} values, header has {}",
                path.display(),
                idx + 2,
                values.len(),
                columns.len()
            )));
        }
        if rows.insert(sample.clone(), values).is_some() {
            return Err(MetakmerError::assembly(format!(
                "{}: sample '{sample}' appears twice",
                path.display()
            )));
        }
    }

    debug!(path = %path.display(), columns = columns.len(), rows = rows.len(), "read unit features");
    Ok(UnitFeatures { columns, rows })
}

/// Merge per-unit features in unit order.
///
/// Paired mode keeps the single unit's component names; one-vs-rest prefixes
/// each column with `<label>:` so component sets from different categories
/// never collide.
pub fn merge(
    categories: &CategorySet,
    units: &[(String, UnitFeatures)],
    mode: BranchMode,
) -> FeatureTable {
    let sample_ids: Vec<String> = categories.samples().iter().map(|s| sample_basename(s)).collect();

    let mut columns = Vec::new();
    for (label, features) in units {
        for col in &features.columns {
            columns.push(match mode {
                BranchMode::Paired => col.clone(),
                BranchMode::OneVsRest => format!("{label}:{col}"),
            });
        }
        for extra in features.rows.keys().filter(|k| !sample_ids.contains(k)) {
            warn!(unit = %label, sample = %extra, "feature row for unknown sample ignored");
        }
    }

    let rows = sample_ids
        .into_iter()
        .map(|id| {
            let mut values = Vec::with_capacity(columns.len());
            for (label, features) in units {
                match features.rows.get(&id) {
                    Some(v) => values.extend(v.iter().cloned()),
                    None => {
                        warn!(unit = %label, sample = %id, "no features for sample, filling with {MISSING_VALUE}");
                        values.extend(
                            std::iter::repeat_n(MISSING_VALUE.to_string(), features.columns.len()),
                        );
                    }
                }
            }
            (id, values)
        })
        .collect();

    FeatureTable { columns, rows }
}

/// Read every unit's output, merge, and write `feature_table.tsv`.
#[instrument(skip_all, fields(mode = %mode, units = units.len()))]
pub fn assemble(
    layout: &ArtifactLayout<'_>,
    categories: &CategorySet,
    units: &[ComparisonUnit],
    mode: BranchMode,
) -> Result<AssembleResult> {
    let mut unit_features = Vec::with_capacity(units.len());
    for unit in units {
        let features = read_unit_features(&layout.features_file(&unit.label))?;
        unit_features.push((unit.label.clone(), features));
    }

    let table = merge(categories, &unit_features, mode);
    let path = layout.feature_table_file();
    let sha256 = write_atomic(&path, &table.to_tsv())?;

    info!(
        rows = table.n_rows(),
        columns = table.n_cols(),
        path = %path.display(),
        "feature table assembled"
    );

    Ok(AssembleResult { table, path, sha256 })
}

/// Write to a temp file then rename over the target. Returns the SHA-256.
pub(crate) fn write_atomic(target: &Path, content: &str) -> Result<String> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| MetakmerError::io(dir, e))?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = dir.join(format!(".{file_name}.tmp"));

    std::fs::write(&temp, content).map_err(|e| MetakmerError::io(&temp, e))?;
    std::fs::rename(&temp, target).map_err(|e| MetakmerError::io(target, e))?;

    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use metakmer_shared::{AppConfig, RunConfig, SampleEntry};

    use super::*;
    use crate::builder::comparison_units;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "mk-assembler-test-{}",
            uuid::Uuid::now_v7()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn categories(rows: &[(&str, &str)]) -> CategorySet {
        let entries: Vec<SampleEntry> = rows
            .iter()
            .map(|(p, l)| SampleEntry {
                sample_path: PathBuf::from(p),
                category_label: l.to_string(),
            })
            .collect();
        CategorySet::from_entries(&entries)
    }

    fn write_features(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn unit(columns: &[&str], rows: &[(&str, &[&str])]) -> UnitFeatures {
        UnitFeatures {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|(s, v)| (s.to_string(), v.iter().map(|x| x.to_string()).collect()))
                .collect(),
        }
    }

    #[test]
    fn read_unit_features_parses_header_and_rows() {
        let path = temp_dir().join("features.tsv");
        write_features(&path, "sample\tc1\tc2\ns1\t0.5\t1\ns2\t0\t2\n");

        let features = read_unit_features(&path).unwrap();
        assert_eq!(features.columns, ["c1", "c2"]);
        assert_eq!(features.rows["s2"], ["0", "2"]);
    }

    #[test]
    fn read_unit_features_rejects_bad_input() {
        let dir = temp_dir();

        let missing = dir.join("nope.tsv");
        assert!(matches!(
            read_unit_features(&missing).unwrap_err(),
            MetakmerError::Assembly { .. }
        ));

        let bad_header = dir.join("bad_header.tsv");
        write_features(&bad_header, "id\tc1\ns1\t1\n");
        assert!(read_unit_features(&bad_header).unwrap_err().to_string().contains("header"));

        let ragged = dir.join("ragged.tsv");
        write_features(&ragged, "sample\tc1\tc2\ns1\t1\n");
        assert!(read_unit_features(&ragged).unwrap_err().to_string().contains("row 2"));
    }

    #[test]
    fn paired_merge_keeps_columns_and_manifest_order() {
        let set = categories(&[("b.fq", "y"), ("a.fq", "x")]);
        let table = merge(
            &set,
            &[("all".into(), unit(&["c1"], &[("a", &["1"]), ("b", &["2"])]))],
            BranchMode::Paired,
        );

        assert_eq!(table.columns, ["c1"]);
        assert_eq!(table.rows[0], ("b".to_string(), vec!["2".to_string()]));
        assert_eq!(table.to_tsv(), "sample\tc1\nb\t2\na\t1\n");
    }

    #[test]
    fn one_vs_rest_merge_tolerates_disjoint_components_and_gaps() {
        let set = categories(&[("s1.fq", "x"), ("s2.fq", "y"), ("s3.fq", "z"), ("s4.fq", "w")]);
        let units = vec![
            ("x".to_string(), unit(&["c1", "c2"], &[("s1", &["1", "2"]), ("s2", &["3", "4"]), ("s3", &["5", "6"]), ("s4", &["7", "8"])])),
            ("y".to_string(), unit(&["c9"], &[("s1", &["9"]), ("s3", &["9"]), ("ghost", &["1"])])),
        ];

        let table = merge(&set, &units, BranchMode::OneVsRest);

        assert_eq!(table.columns, ["x:c1", "x:c2", "y:c9"]);
        assert_eq!(table.n_rows(), 4);
        assert_eq!(table.rows[1].1, ["3", "4", "0"]);
        assert!(table.rows.iter().all(|(id, _)| id != "ghost"));
    }

    #[test]
    fn assemble_writes_table_for_every_unit() {
        let mut config = RunConfig::new(21, "m.tsv", 50, &AppConfig::default());
        config.work_dir = temp_dir();
        let layout = ArtifactLayout::new(&config);
        let set = categories(&[("a.fq", "w"), ("b.fq", "x"), ("c.fq", "y"), ("d.fq", "z")]);
        let units = comparison_units(&set, BranchMode::OneVsRest);

        for u in &units {
            write_features(
                &layout.features_file(&u.label),
                "sample\tcomp\na\t1\nb\t2\nc\t3\nd\t4\n",
            );
        }

        let result = assemble(&layout, &set, &units, BranchMode::OneVsRest).unwrap();
        assert_eq!(result.table.n_rows(), 4);
        assert_eq!(result.table.n_cols(), 4);
        assert_eq!(result.path, config.work_dir.join("feature_table.tsv"));
        assert_eq!(result.sha256.len(), 64);

        let written = std::fs::read_to_string(&result.path).unwrap();
        assert!(written.starts_with("sample\tw:comp\tx:comp\ty:comp\tz:comp\n"));
        assert!(!config.work_dir.join(".feature_table.tsv.tmp").exists());
    }

    #[test]
    fn assemble_fails_when_a_unit_output_is_missing() {
        let mut config = RunConfig::new(21, "m.tsv", 50, &AppConfig::default());
        config.work_dir = temp_dir();
        let layout = ArtifactLayout::new(&config);
        let set = categories(&[("a.fq", "w"), ("b.fq", "x"), ("c.fq", "y"), ("d.fq", "z")]);
        let units = comparison_units(&set, BranchMode::OneVsRest);

        write_features(&layout.features_file("w"), "sample\tcomp\na\t1\n");

        let err = assemble(&layout, &set, &units, BranchMode::OneVsRest).unwrap_err();
        assert!(err.to_string().contains("features_x"));
        assert!(!layout.feature_table_file().exists());
    }
}
