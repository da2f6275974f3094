//! Running cases, one at a time or as a parallel batch.

use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use sapling::{ActionCounts, DiffWarning, Tree, apply_edit_script, diff_trees};

use crate::case::OracleCase;
use crate::error::OracleError;
use crate::fixture::FixtureId;
use crate::notation::render;
use crate::{debug, warning};

/// File extension of case files.
pub const CASE_EXTENSION: &str = "tree";

/// Outcome of a passing case.
#[derive(Debug, Clone)]
pub struct CaseReport {
    /// Which fixture this was
    pub id: FixtureId,
    /// Actions in the generated script
    pub counts: ActionCounts,
    /// Number of mapped node pairs
    pub matched: usize,
    /// Degradations reported by the engine
    pub warnings: Vec<DiffWarning>,
}

/// Results of a batch, in input order.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    /// One entry per case
    pub results: Vec<Result<CaseReport, OracleError>>,
}

impl BatchSummary {
    /// Number of passing cases.
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    /// The failures.
    pub fn failures(&self) -> impl Iterator<Item = &OracleError> {
        self.results.iter().filter_map(|r| r.as_ref().err())
    }

    /// Action totals over the passing cases.
    pub fn total_counts(&self) -> ActionCounts {
        let mut total = ActionCounts::default();
        for report in self.results.iter().flatten() {
            total.inserts += report.counts.inserts;
            total.deletes += report.counts.deletes;
            total.updates += report.counts.updates;
            total.moves += report.counts.moves;
        }
        total
    }
}

/// Diff one case and check the result.
///
/// The mapping must be valid, the script must replay to the destination, and
/// every count the case pins must agree.
pub fn run_case(id: &FixtureId, case: &OracleCase) -> Result<CaseReport, OracleError> {
    let fixture = id.to_string();
    let src = Tree::from_syntax(&case.source);
    let dst = Tree::from_syntax(&case.destination);

    let diff = diff_trees(&src, &dst, &case.config).map_err(|e| OracleError::Diff {
        fixture: fixture.clone(),
        reason: e.to_string(),
    })?;
    diff.matching
        .validate(&src, &dst)
        .map_err(|e| OracleError::Diff {
            fixture: fixture.clone(),
            reason: e.to_string(),
        })?;

    let replayed = apply_edit_script(&src, &diff.matching, &diff.actions).map_err(|e| {
        OracleError::RoundTrip {
            fixture: fixture.clone(),
            reason: e.to_string(),
        }
    })?;
    if !replayed.structurally_eq(&dst) {
        return Err(OracleError::RoundTrip {
            fixture,
            reason: format!("got {}, expected {}", render(&replayed), render(&dst)),
        });
    }

    let counts = diff.counts();
    if !case.expected.matches(&counts) {
        return Err(OracleError::Expectation {
            fixture,
            expected: case.expected.to_string(),
            actual: counts.to_string(),
        });
    }

    for warning in &diff.warnings {
        warning!(%fixture, %warning, "degraded diff");
    }
    debug!(%fixture, %counts, matched = diff.matching.len(), "case passed");
    Ok(CaseReport {
        id: id.clone(),
        counts,
        matched: diff.matching.len(),
        warnings: diff.warnings,
    })
}

/// Run independent cases in parallel. Results keep the input order.
pub fn run_batch(cases: &[(FixtureId, OracleCase)]) -> BatchSummary {
    let results: Vec<_> = cases
        .par_iter()
        .map(|(id, case)| run_case(id, case))
        .collect();
    let summary = BatchSummary { results };
    debug!(
        cases = cases.len(),
        passed = summary.passed(),
        "batch done"
    );
    summary
}

/// Load every `.tree` case below `root`, sorted by path.
pub fn load_cases(root: &Path) -> Result<Vec<(FixtureId, OracleCase)>, OracleError> {
    let mut files = Vec::new();
    collect_case_files(root, &mut files)?;
    files.sort();

    files
        .iter()
        .map(|file| {
            let id = FixtureId::from_case_path(root, file)?;
            let text = fs::read_to_string(file).map_err(|e| io_error(file, e))?;
            let case = OracleCase::parse(&text).map_err(|e| OracleError::MalformedCase {
                reason: format!("{id}: {e}"),
            })?;
            Ok((id, case))
        })
        .collect()
}

fn collect_case_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), OracleError> {
    for entry in fs::read_dir(dir).map_err(|e| io_error(dir, e))? {
        let path = entry.map_err(|e| io_error(dir, e))?.path();
        if path.is_dir() {
            collect_case_files(&path, files)?;
        } else if path.extension().is_some_and(|ext| ext == CASE_EXTENSION) {
            files.push(path);
        }
    }
    Ok(())
}

fn io_error(path: &Path, e: std::io::Error) -> OracleError {
    OracleError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}
