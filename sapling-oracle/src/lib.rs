//! Fixture harness for [`sapling`].
//!
//! Cases live in files named after the commit they were taken from
//! (`<project>-<commit-hash>/<original-path>.tree`), hold a source and a
//! destination tree in bracket notation, and may pin action counts or
//! override matching thresholds. Each case is diffed, its script replayed
//! on the source, and the replay compared with the destination.
//!
//! ```
//! use sapling_oracle::{FixtureId, OracleCase, run_case};
//!
//! let id = FixtureId::parse("demo-abcdef0/block.tree").unwrap();
//! let case = OracleCase::parse("Block[A, B, C]\n===\nBlock[A, C]\n===\ndeletes: 1").unwrap();
//! let report = run_case(&id, &case).unwrap();
//! assert_eq!(report.counts.total(), 1);
//! ```

#![warn(missing_docs)]

mod tracing_macros;
pub(crate) use tracing_macros::{debug, trace, warning};

pub mod batch;
pub mod case;
mod error;
pub mod fixture;
pub mod notation;

pub use batch::{BatchSummary, CaseReport, load_cases, run_batch, run_case};
pub use case::{ExpectedCounts, OracleCase};
pub use error::OracleError;
pub use fixture::FixtureId;
pub use notation::{FrontEnd, Notation, render};
