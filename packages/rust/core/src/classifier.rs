//! Category classifier: reads the sample manifest and groups samples by label.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, instrument};

use metakmer_shared::{BranchMode, CategorySet, MetakmerError, Result, SampleEntry, sample_basename};

/// Characters a label may not contain: it becomes a directory suffix and the
/// name half of a `name=files` engine argument.
static UNSAFE_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[/\\\x00=]").expect("valid label regex"));

/// Parse every manifest row into a [`SampleEntry`].
///
/// Rows are `<sample_path>\t<category_label>`. Blank lines and `#` comments
/// are ignored. Any other row must hold exactly two non-empty fields.
pub fn read_entries(manifest: &Path) -> Result<Vec<SampleEntry>> {
    let content =
        std::fs::read_to_string(manifest).map_err(|e| MetakmerError::io(manifest, e))?;

    let format_err = |line: usize, message: String| MetakmerError::ManifestFormat {
        path: manifest.to_path_buf(),
        line,
        message,
    };

    let mut entries = Vec::new();
    let mut seen_paths: HashSet<PathBuf> = HashSet::new();
    let mut seen_ids: HashSet<String> = HashSet::new();

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
        if fields.len() != 2 || fields.iter().any(|f| f.is_empty()) {
            return Err(format_err(
                line_no,
                format!(
                    "expected 2 non-empty tab-separated fields, found {}",
                    fields.iter().filter(|f| !f.is_empty()).count()
                ),
            ));
        }

        let (sample, label) = (fields[0], fields[1]);
        if UNSAFE_LABEL_RE.is_match(label) || label == "." || label == ".." {
            return Err(format_err(
                line_no,
                format!("category label '{label}' may not be '.' or '..' or contain '/', '\\', '=' or NUL"),
            ));
        }

        let sample_path = PathBuf::from(sample);
        let sample_id = sample_basename(&sample_path);
        if !seen_paths.insert(sample_path.clone()) {
            return Err(format_err(line_no, format!("sample '{sample}' listed twice")));
        }
        if !seen_ids.insert(sample_id.clone()) {
            return Err(format_err(
                line_no,
                format!("sample name '{sample_id}' is shared by two sample files"),
            ));
        }

        entries.push(SampleEntry {
            sample_path,
            category_label: label.to_string(),
        });
    }

    if entries.is_empty() {
        return Err(format_err(0, "manifest contains no samples".into()));
    }

    debug!(rows = entries.len(), path = %manifest.display(), "manifest parsed");
    Ok(entries)
}

/// Read the manifest, group its samples into categories and pick the branch mode.
///
/// Fails with `InsufficientCategories` when fewer than two labels are present.
#[instrument(skip_all, fields(manifest = %manifest.display()))]
pub fn classify(manifest: &Path) -> Result<(CategorySet, BranchMode)> {
    let entries = read_entries(manifest)?;
    let categories = CategorySet::from_entries(&entries);
    let mode = BranchMode::for_category_count(categories.n_cat())?;

    info!(
        samples = categories.samples().len(),
        categories = categories.n_cat(),
        %mode,
        "samples classified"
    );

    Ok((categories, mode))
}

/// Persist the grouping as `<label>\t<own samples>\t<rest samples>` rows.
pub fn write_grouping(categories: &CategorySet, path: &Path) -> Result<()> {
    let join = |samples: &[PathBuf]| {
        samples
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(",")
    };

    let mut out = String::new();
    for group in categories.groups() {
        let rest = categories.rest_of(&group.label);
        out.push_str(&format!(
            "{}\t{}\t{}\n",
            group.label,
            join(&group.samples),
            join(&rest)
        ));
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| MetakmerError::io(parent, e))?;
    }
    std::fs::write(path, out).map_err(|e| MetakmerError::io(path, e))?;
    debug!(path = %path.display(), "wrote category grouping");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "mk-classifier-test-{}",
            uuid::Uuid::now_v7()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_manifest(content: &str) -> PathBuf {
        let path = temp_dir().join("manifest.tsv");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn classify_two_categories() {
        let manifest = write_manifest(
            "h1.fq\thealthy\nd1.fq\tdisease\nh2.fq\thealthy\nd2.fq\tdisease\n",
        );
        let (set, mode) = classify(&manifest).unwrap();

        assert_eq!(mode, BranchMode::Paired);
        assert_eq!(set.n_cat(), 2);
        assert_eq!(set.groups()[0].label, "healthy");
        assert_eq!(set.groups()[1].label, "disease");
        assert_eq!(set.get("disease").unwrap().samples.len(), 2);
    }

    #[test]
    fn comments_blank_lines_and_crlf_are_ignored() {
        let manifest = write_manifest("# sample\tlabel\r\n\r\na.fq\tx\r\nb.fq\ty\r\n");
        let (set, _) = classify(&manifest).unwrap();
        assert_eq!(set.samples().len(), 2);
        assert_eq!(set.groups()[1].label, "y");
    }

    #[test]
    fn single_category_is_insufficient() {
        let manifest = write_manifest("a.fq\tonly\nb.fq\tonly\n");
        let err = classify(&manifest).unwrap_err();
        assert!(matches!(err, MetakmerError::InsufficientCategories { found: 1 }));
    }

    #[test]
    fn row_with_wrong_field_count_names_line() {
        let manifest = write_manifest("a.fq\tx\nb.fq\ty\textra\n");
        match classify(&manifest).unwrap_err() {
            MetakmerError::ManifestFormat { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }

        let manifest = write_manifest("a.fq\tx\nb.fq\t \n");
        assert!(matches!(
            classify(&manifest).unwrap_err(),
            MetakmerError::ManifestFormat { line: 2, .. }
        ));
    }

    #[test]
    fn empty_manifest_is_rejected() {
        let manifest = write_manifest("# nothing here\n\n");
        assert!(matches!(
            read_entries(&manifest).unwrap_err(),
            MetakmerError::ManifestFormat { line: 0, .. }
        ));
    }

    #[test]
    fn free_text_labels_are_accepted() {
        let manifest = write_manifest(
            "a.fq\thealthy control\nb.fq\tCrohn's disease\nc.fq\tcolite ulcéreuse\nd.fq\tIBS\n",
        );
        let (set, mode) = classify(&manifest).unwrap();

        assert_eq!(mode, BranchMode::OneVsRest);
        let labels: Vec<&str> = set.groups().iter().map(|g| g.label.as_str()).collect();
        assert_eq!(labels, ["healthy control", "Crohn's disease", "colite ulcéreuse", "IBS"]);
    }

    #[test]
    fn unsafe_labels_and_duplicate_samples_are_rejected() {
        for label in ["../up", "a/b", "a\\b", "..", ".", "x=y", "nul\0byte"] {
            let manifest = write_manifest(&format!("a.fq\tx\nb.fq\t{label}\n"));
            let err = classify(&manifest).unwrap_err();
            assert!(
                matches!(err, MetakmerError::ManifestFormat { line: 2, .. }),
                "label {label:?} accepted: {err}"
            );
        }

        let manifest = write_manifest("a.fq\tx\na.fq\ty\n");
        assert!(classify(&manifest).unwrap_err().to_string().contains("listed twice"));

        let manifest = write_manifest("run1/a.fq\tx\nrun2/a.fastq.gz\ty\n");
        assert!(classify(&manifest).unwrap_err().to_string().contains("shared by two"));
    }

    #[test]
    fn grouping_file_lists_own_and_rest() {
        let manifest = write_manifest("a.fq\tx\nb.fq\ty\nc.fq\tx\nd.fq\tz\n");
        let (set, mode) = classify(&manifest).unwrap();
        assert_eq!(mode, BranchMode::Paired);
        let out = temp_dir().join("work").join("categories_samples.tsv");

        write_grouping(&set, &out).unwrap();
        let content = std::fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "x\ta.fq,c.fq\tb.fq,d.fq");
        assert_eq!(lines[2], "z\td.fq\ta.fq,b.fq,c.fq");
    }
}
