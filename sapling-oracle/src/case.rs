//! Case files.
//!
//! ```text
//! Block[A, B, C]
//! ===
//! Block[A, C]
//! ===
//! deletes: 1
//! inserts: 0
//! ```
//!
//! The optional third section holds `key: value` lines: expected action
//! counts and matching config overrides. Blank lines and `#` comments are
//! ignored there.

use sapling::{ActionCounts, MatchingConfig, SyntaxNode};

use crate::error::OracleError;
use crate::notation::{FrontEnd, Notation};

const SEPARATOR: &str = "\n===\n";

/// Action counts a case pins down. Unset fields are not checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExpectedCounts {
    /// Expected Insert actions
    pub inserts: Option<usize>,
    /// Expected Delete actions
    pub deletes: Option<usize>,
    /// Expected Update actions
    pub updates: Option<usize>,
    /// Expected Move actions
    pub moves: Option<usize>,
}

impl ExpectedCounts {
    /// Whether any count is pinned.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether `actual` agrees with every pinned count.
    pub fn matches(&self, actual: &ActionCounts) -> bool {
        [
            (self.inserts, actual.inserts),
            (self.deletes, actual.deletes),
            (self.updates, actual.updates),
            (self.moves, actual.moves),
        ]
        .into_iter()
        .all(|(expected, actual)| expected.is_none_or(|expected| expected == actual))
    }
}

impl core::fmt::Display for ExpectedCounts {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut first = true;
        for (name, count) in [
            ("inserts", self.inserts),
            ("deletes", self.deletes),
            ("updates", self.updates),
            ("moves", self.moves),
        ] {
            if let Some(count) = count {
                if !first {
                    f.write_str(", ")?;
                }
                write!(f, "{count} {name}")?;
                first = false;
            }
        }
        if first {
            f.write_str("anything")?;
        }
        Ok(())
    }
}

/// One parsed case file.
#[derive(Debug, Clone)]
pub struct OracleCase {
    /// Tree before the change
    pub source: SyntaxNode,
    /// Tree after the change
    pub destination: SyntaxNode,
    /// Pinned action counts
    pub expected: ExpectedCounts,
    /// Matching config with the case's overrides applied
    pub config: MatchingConfig,
}

impl OracleCase {
    /// Parse a case file written in bracket notation.
    pub fn parse(text: &str) -> Result<Self, OracleError> {
        Self::parse_with(&Notation, text)
    }

    /// Parse a case file whose trees are read by `front_end`.
    pub fn parse_with(front_end: &dyn FrontEnd, text: &str) -> Result<Self, OracleError> {
        let sections: Vec<&str> = text.split(SEPARATOR).collect();
        let (source, destination, meta) = match sections.as_slice() {
            [source, destination] => (*source, *destination, None),
            [source, destination, meta] => (*source, *destination, Some(*meta)),
            _ => {
                return Err(OracleError::malformed(format!(
                    "expected 2 or 3 sections separated by `===`, found {}",
                    sections.len()
                )));
            }
        };

        let mut case = OracleCase {
            source: front_end.parse(source)?,
            destination: front_end.parse(destination)?,
            expected: ExpectedCounts::default(),
            config: MatchingConfig::default(),
        };
        if let Some(meta) = meta {
            case.apply_meta(meta)?;
        }
        Ok(case)
    }

    fn apply_meta(&mut self, meta: &str) -> Result<(), OracleError> {
        for (index, line) in meta.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line_no = index + 1;
            let (key, value) = line.split_once(':').ok_or_else(|| {
                OracleError::malformed(format!("metadata line {line_no}: expected `key: value`"))
            })?;
            let (key, value) = (key.trim(), value.trim());

            match key {
                "inserts" => self.expected.inserts = Some(number(line_no, key, value)?),
                "deletes" => self.expected.deletes = Some(number(line_no, key, value)?),
                "updates" => self.expected.updates = Some(number(line_no, key, value)?),
                "moves" => self.expected.moves = Some(number(line_no, key, value)?),
                "min_height" => self.config.min_height_for_top_down = number(line_no, key, value)?,
                "dice_threshold" => self.config.dice_threshold = number(line_no, key, value)?,
                "recovery_threshold" => {
                    self.config.recovery_similarity_threshold = number(line_no, key, value)?
                }
                "max_tree_size" => {
                    self.config.max_tree_size_for_full_matching = number(line_no, key, value)?
                }
                _ => {
                    return Err(OracleError::malformed(format!(
                        "metadata line {line_no}: unknown key `{key}`"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn number<T: core::str::FromStr>(line_no: usize, key: &str, value: &str) -> Result<T, OracleError> {
    value.parse().map_err(|_| {
        OracleError::malformed(format!(
            "metadata line {line_no}: `{value}` is not a valid value for `{key}`"
        ))
    })
}
