/// All errors surfaced by the astrodata-core crate.
///
/// Resolution and tag evaluation are deterministic, so every variant here
/// describes a reproducible configuration or data problem. Nothing is
/// retried internally.
#[derive(Debug)]
pub enum Error {
    /// No registered candidate class claims the source.
    NoMatch,
    /// Two or more unrelated maximally-specific classes claim the source.
    AmbiguousMatch(Vec<String>),
    /// A tag rule failed during evaluation; the whole pass is aborted.
    TagRule {
        /// The resolved class owning the rule.
        class: String,
        /// The identifier of the offending rule.
        rule: String,
        /// Human-readable failure description.
        reason: String,
    },
    /// Append was given a payload it cannot place.
    UnsupportedPayload(&'static str),
    /// A subunit index or table name was not found.
    KeyNotFound(String),
    /// Attribute-style access collides with a reserved name, or a new
    /// table would shadow an existing one at another scope.
    StructuralConflict(String),
    /// A structural operation was attempted in an illegal state
    /// (e.g. appending through a slice).
    InvalidOperation(&'static str),
    /// A registry operation referenced an unregistered class name.
    UnknownClass(String),
    /// Malformed FITS header block.
    InvalidHeader(&'static str),
    /// Unrecognized BITPIX value.
    InvalidBitpix(i64),
    /// Premature end of data while reading.
    UnexpectedEof,
    /// An I/O error from the standard library.
    Io(std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NoMatch => write!(f, "no class matches this dataset"),
            Error::AmbiguousMatch(names) => write!(
                f,
                "more than one class is a candidate for this dataset: {}",
                names.join(", ")
            ),
            Error::TagRule { class, rule, reason } => {
                write!(f, "tag rule '{rule}' on class '{class}' failed: {reason}")
            }
            Error::UnsupportedPayload(what) => write!(f, "unsupported payload: {what}"),
            Error::KeyNotFound(key) => write!(f, "no such subunit or table: {key}"),
            Error::StructuralConflict(name) => {
                write!(f, "name '{name}' conflicts with an existing or reserved name")
            }
            Error::InvalidOperation(what) => write!(f, "invalid operation: {what}"),
            Error::UnknownClass(name) => write!(f, "class '{name}' is not registered"),
            Error::InvalidHeader(what) => write!(f, "invalid FITS header: {what}"),
            Error::InvalidBitpix(v) => write!(f, "invalid BITPIX value: {v}"),
            Error::UnexpectedEof => write!(f, "unexpected end of file"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_no_match() {
        let e = Error::NoMatch;
        assert_eq!(e.to_string(), "no class matches this dataset");
    }

    #[test]
    fn display_ambiguous_match_names_all_finalists() {
        let e = Error::AmbiguousMatch(vec!["Gmos".into(), "Niri".into()]);
        let msg = e.to_string();
        assert!(msg.contains("Gmos"));
        assert!(msg.contains("Niri"));
    }

    #[test]
    fn display_tag_rule_names_rule_and_class() {
        let e = Error::TagRule {
            class: "GmosScience".into(),
            rule: "rule_dark".into(),
            reason: "missing OBSTYPE".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("rule_dark"));
        assert!(msg.contains("GmosScience"));
        assert!(msg.contains("missing OBSTYPE"));
    }

    #[test]
    fn display_key_not_found() {
        let e = Error::KeyNotFound("OBJCAT".into());
        assert_eq!(e.to_string(), "no such subunit or table: OBJCAT");
    }

    #[test]
    fn display_structural_conflict() {
        let e = Error::StructuralConflict("MASK".into());
        assert!(e.to_string().contains("MASK"));
    }

    #[test]
    fn display_invalid_bitpix() {
        let e = Error::InvalidBitpix(-99);
        assert_eq!(e.to_string(), "invalid BITPIX value: -99");
    }

    #[test]
    fn io_error_from_conversion() {
        let io_err = std::io::Error::other("oops");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
    }

    #[test]
    fn std_error_source() {
        use std::error::Error as StdError;

        let e = Error::NoMatch;
        assert!(e.source().is_none());

        let e = Error::Io(std::io::Error::other("inner"));
        assert!(e.source().is_some());
    }

    #[test]
    fn result_type_alias() {
        let ok: Result<u32> = Ok(42);
        assert!(ok.is_ok());

        let err: Result<u32> = Err(Error::NoMatch);
        assert!(err.is_err());
    }
}
