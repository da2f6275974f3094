use facet::Facet;

/// Errors raised while loading or checking fixtures.
#[derive(Facet, Debug, Clone, PartialEq, Eq)]
#[facet(derive(Error))]
#[repr(u8)]
pub enum OracleError {
    /// not an oracle fixture id: {id}
    InvalidFixtureId { id: String },

    /// notation error at byte {offset}: {reason}
    Notation { offset: usize, reason: String },

    /// cannot read {path}: {reason}
    Io { path: String, reason: String },

    /// malformed case file: {reason}
    MalformedCase { reason: String },

    /// {fixture}: diff failed: {reason}
    Diff { fixture: String, reason: String },

    /// {fixture}: script does not reproduce the destination: {reason}
    RoundTrip { fixture: String, reason: String },

    /// {fixture}: expected {expected}, got {actual}
    Expectation {
        fixture: String,
        expected: String,
        actual: String,
    },
}

impl OracleError {
    pub(crate) fn notation(offset: usize, reason: impl Into<String>) -> Self {
        OracleError::Notation {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        OracleError::MalformedCase {
            reason: reason.into(),
        }
    }
}
