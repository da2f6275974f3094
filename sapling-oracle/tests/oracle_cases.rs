//! Oracle corpus tests using datatest-stable.
//!
//! Each case is a file under `tests/oracle-cases/<project>-<hash>/` holding a
//! source tree and a destination tree in bracket notation:
//! ```text
//! <source>
//! ===
//! <destination>
//! ===
//! <optional key: value lines>
//! ```
//!
//! The test diffs the pair, replays the script on the source, and checks the
//! replay against the destination and any pinned action counts.

use std::path::Path;

use sapling_oracle::{FixtureId, OracleCase, run_case};

const ROOT: &str = "tests/oracle-cases";

fn run_oracle_case(path: &Path) -> datatest_stable::Result<()> {
    facet_testhelpers::setup();

    let root = if path.is_absolute() {
        Path::new(env!("CARGO_MANIFEST_DIR")).join(ROOT)
    } else {
        Path::new(ROOT).to_path_buf()
    };
    let id = FixtureId::from_case_path(&root, path)?;
    let text = std::fs::read_to_string(path)?;
    let case = OracleCase::parse(&text)?;
    let report = run_case(&id, &case)?;

    println!("{id}: {}", report.counts);
    Ok(())
}

datatest_stable::harness! {
    { test = run_oracle_case, root = ROOT, pattern = r".*\.tree$" },
}
