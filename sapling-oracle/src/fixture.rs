//! Oracle corpus identifiers.
//!
//! Fixtures are named after the commit they were taken from:
//! `oracle/commits/<project>-<commit-hash>/<original-path>`. The
//! `oracle/commits/` prefix is optional, project names may themselves contain
//! `-`, and the hash is the run of hex digits after the last `-`.

use std::path::Path;

use compact_str::CompactString;

use crate::error::OracleError;

const PREFIX: &str = "oracle/commits/";
const MIN_HASH_LEN: usize = 7;
const MAX_HASH_LEN: usize = 40;

/// A parsed fixture identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FixtureId {
    /// Project the commit belongs to
    pub project: CompactString,
    /// Abbreviated or full commit hash, lowercase hex
    pub commit: CompactString,
    /// Path of the file inside the project at that commit
    pub path: String,
}

impl FixtureId {
    /// Parse an id, with or without the `oracle/commits/` prefix.
    pub fn parse(id: &str) -> Result<Self, OracleError> {
        let invalid = || OracleError::InvalidFixtureId { id: id.to_string() };

        let rest = id.strip_prefix(PREFIX).unwrap_or(id);
        let (head, path) = rest.split_once('/').ok_or_else(invalid)?;
        if path.is_empty() || path.split('/').any(str::is_empty) {
            return Err(invalid());
        }
        let (project, commit) = head.rsplit_once('-').ok_or_else(invalid)?;
        if project.is_empty()
            || !(MIN_HASH_LEN..=MAX_HASH_LEN).contains(&commit.len())
            || !commit.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(invalid());
        }

        Ok(Self {
            project: CompactString::new(project),
            commit: CompactString::new(commit.to_ascii_lowercase()),
            path: path.to_string(),
        })
    }

    /// Id of a case file stored under `root` as `<project>-<hash>/<path>`.
    pub fn from_case_path(root: &Path, file: &Path) -> Result<Self, OracleError> {
        let invalid = || OracleError::InvalidFixtureId {
            id: file.display().to_string(),
        };
        let relative = file.strip_prefix(root).map_err(|_| invalid())?;
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str().ok_or_else(invalid))
            .collect::<Result<_, _>>()?;
        Self::parse(&parts.join("/"))
    }
}

impl core::fmt::Display for FixtureId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{PREFIX}{}-{}/{}", self.project, self.commit, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facet_testhelpers::test;

    #[test]
    fn parses_full_and_short_ids() {
        let full = FixtureId::parse("oracle/commits/tree-sitter-2f1c9ab/lib/src/parser.c").unwrap();
        assert_eq!(full.project, "tree-sitter");
        assert_eq!(full.commit, "2f1c9ab");
        assert_eq!(full.path, "lib/src/parser.c");

        let short = FixtureId::parse("tree-sitter-2f1c9ab/lib/src/parser.c").unwrap();
        assert_eq!(full, short);
        assert_eq!(
            short.to_string(),
            "oracle/commits/tree-sitter-2f1c9ab/lib/src/parser.c"
        );
    }

    #[test]
    fn normalizes_hash_case() {
        let id = FixtureId::parse("serde-ABCDEF0123/src/de.rs").unwrap();
        assert_eq!(id.commit, "abcdef0123");
    }

    #[test]
    fn rejects_malformed_ids() {
        for id in [
            "",
            "serde/src/lib.rs",
            "serde-abc12/src/lib.rs",
            "serde-zzzzzzz/src/lib.rs",
            "-abcdef0/src/lib.rs",
            "serde-abcdef0",
            "serde-abcdef0/",
            "serde-abcdef0//lib.rs",
            "serde-0123456789012345678901234567890123456789a/src/lib.rs",
        ] {
            assert!(
                matches!(
                    FixtureId::parse(id),
                    Err(OracleError::InvalidFixtureId { .. })
                ),
                "{id:?} should be rejected"
            );
        }
    }

    #[test]
    fn case_paths_are_relative_to_the_root() {
        let root = Path::new("/cases");
        let id =
            FixtureId::from_case_path(root, Path::new("/cases/sapling-abcdef0/src/lib.rs.tree"))
                .unwrap();
        assert_eq!(id.project, "sapling");
        assert_eq!(id.path, "src/lib.rs.tree");
        assert!(FixtureId::from_case_path(root, Path::new("/elsewhere/x-abcdef0/a")).is_err());
    }
}
