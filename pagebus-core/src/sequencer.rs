//! File Sequencer: turns a directory of loosely-named page files into an ordered batch.
//!
//! A valid file name has the shape `<prefix>_<digits>.<rest>` with exactly one
//! underscore. Valid files are ordered by the integer after the underscore, with
//! the full file name as a secondary key so duplicate sequence numbers still give
//! a total, deterministic order. Everything else is moved to the quarantine
//! directory; nothing is ever deleted here.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::retry::RetryPolicy;

/// One page file that passed the naming contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Text before the underscore.
    pub prefix: String,
    pub sequence: u64,
    /// Last extension of the file, without the dot. May be empty.
    pub extension: String,
}

impl SourceFile {
    /// Parses a path against the naming contract.
    pub fn parse(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let (prefix, sequence) = parse_name(name)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_string();
        Some(SourceFile {
            path: path.to_path_buf(),
            prefix: prefix.to_string(),
            sequence,
            extension,
        })
    }

    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([^_]*)_(\d+)\.([^_]*)$").expect("static regex is valid"))
}

/// Splits `name` into prefix and sequence number, or `None` if it breaks the contract.
pub fn parse_name(name: &str) -> Option<(&str, u64)> {
    if name.split('_').count() != 2 {
        return None;
    }
    let caps = name_pattern().captures(name)?;
    let prefix = caps.get(1)?.as_str();
    let sequence = caps.get(2)?.as_str().parse::<u64>().ok()?;
    Some((prefix, sequence))
}

fn batch_order(a: &SourceFile, b: &SourceFile) -> Ordering {
    a.sequence
        .cmp(&b.sequence)
        .then_with(|| a.file_name().cmp(b.file_name()))
}

/// Result of one directory pass.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Valid files, in batch order.
    pub valid: Vec<SourceFile>,
    /// Files that failed the naming contract.
    pub invalid: Vec<PathBuf>,
    /// How many of the invalid files were moved to quarantine.
    pub quarantined: usize,
}

/// Reads `dir` and partitions its regular files, without touching any of them.
pub fn partition(dir: &Path) -> std::io::Result<ScanOutcome> {
    let mut outcome = ScanOutcome::default();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() {
            continue;
        }
        match SourceFile::parse(&path) {
            Some(file) => outcome.valid.push(file),
            None => outcome.invalid.push(path),
        }
    }
    outcome.valid.sort_by(batch_order);
    outcome.invalid.sort();
    Ok(outcome)
}

/// Scans the inbound directory and quarantines files with invalid names.
#[derive(Debug, Clone)]
pub struct FileSequencer {
    inbound: PathBuf,
    quarantine: PathBuf,
    retry: RetryPolicy,
}

impl FileSequencer {
    pub fn new(inbound: impl Into<PathBuf>, quarantine: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            inbound: inbound.into(),
            quarantine: quarantine.into(),
            retry,
        }
    }

    pub fn inbound(&self) -> &Path {
        &self.inbound
    }

    /// One ingestion pass: partition the inbound directory and move invalid files away.
    ///
    /// An invalid file that stays locked for every retry attempt is left where it is
    /// and picked up again on the next pass.
    pub async fn scan(&self) -> std::io::Result<ScanOutcome> {
        let mut outcome = partition(&self.inbound)?;
        debug!(
            dir = %self.inbound.display(),
            valid = outcome.valid.len(),
            invalid = outcome.invalid.len(),
            "[SCAN] Partitioned inbound directory"
        );
        for path in &outcome.invalid {
            if self.quarantine_file(path).await {
                outcome.quarantined += 1;
            }
        }
        Ok(outcome)
    }

    async fn quarantine_file(&self, path: &Path) -> bool {
        if !self.retry.try_open(path).await {
            warn!(path = %path.display(), "[SCAN] Invalid file still locked, leaving it for the next pass");
            return false;
        }
        let target = quarantine_target(&self.quarantine, path);
        match fs::rename(path, &target) {
            Ok(()) => {
                info!(from = %path.display(), to = %target.display(), "[SCAN] Quarantined file with invalid name");
                true
            }
            Err(e) => {
                error!(path = %path.display(), error = ?e, "[SCAN] Failed to move invalid file to quarantine");
                false
            }
        }
    }
}

/// Destination inside `quarantine` that does not overwrite an earlier arrival.
fn quarantine_target(quarantine: &Path, path: &Path) -> PathBuf {
    let name = path.file_name().unwrap_or_default();
    let target = quarantine.join(name);
    if !target.exists() {
        return target;
    }
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let unique = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}-{}.{ext}", uuid::Uuid::new_v4()),
        None => format!("{stem}-{}", uuid::Uuid::new_v4()),
    };
    quarantine.join(unique)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prefix_and_sequence() {
        assert_eq!(parse_name("scan_12.jpg"), Some(("scan", 12)));
        assert_eq!(parse_name("_3.png"), Some(("", 3)));
        assert_eq!(parse_name("page_007.tar.gz"), Some(("page", 7)));
    }

    #[test]
    fn rejects_names_outside_the_contract() {
        assert_eq!(parse_name("report.jpg"), None);
        assert_eq!(parse_name("a_1_x.jpg"), None);
        assert_eq!(parse_name("a_x.jpg"), None);
        assert_eq!(parse_name("a_12"), None);
        assert_eq!(parse_name("a_99999999999999999999999.jpg"), None);
    }

    #[test]
    fn extension_is_the_last_one() {
        let file = SourceFile::parse(Path::new("/in/page_4.tar.gz")).unwrap();
        assert_eq!(file.extension, "gz");
        assert_eq!(file.prefix, "page");
        assert_eq!(file.sequence, 4);
    }

    #[test]
    fn duplicate_sequence_numbers_fall_back_to_file_name() {
        let mut files = vec![
            SourceFile::parse(Path::new("b_1.jpg")).unwrap(),
            SourceFile::parse(Path::new("a_1.jpg")).unwrap(),
            SourceFile::parse(Path::new("a_0.jpg")).unwrap(),
        ];
        files.sort_by(batch_order);
        let names: Vec<_> = files.iter().map(|f| f.file_name()).collect();
        assert_eq!(names, vec!["a_0.jpg", "a_1.jpg", "b_1.jpg"]);
    }

    #[test]
    fn quarantine_target_avoids_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("report.jpg"), b"old").unwrap();
        let target = quarantine_target(dir.path(), Path::new("/in/report.jpg"));
        assert_ne!(target, dir.path().join("report.jpg"));
        let name = target.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("report-") && name.ends_with(".jpg"));
    }
}
