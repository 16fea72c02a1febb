//! Stage identifiers.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::errors::EnvelopeError;

static STAGE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_-]{0,63}$").expect("stage name pattern is valid"));

/// Identifier of a pipeline stage.
///
/// The set of stages is open: new stages are added by registering an
/// executor under a new identifier. Identifiers are lowercase, start with a
/// letter and may contain digits, `_` and `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StageId(String);

impl StageId {
    /// Name of the speech-to-text stage.
    pub const STT: &'static str = "stt";
    /// Name of the smart analysis stage.
    pub const SMART: &'static str = "smart";

    /// Parses and validates a stage identifier.
    ///
    /// Surrounding whitespace is trimmed and the name is lowercased, so
    /// `"STT"` and `"stt"` name the same stage.
    pub fn parse(raw: &str) -> Result<Self, EnvelopeError> {
        let normalized = raw.trim().to_ascii_lowercase();
        if STAGE_NAME.is_match(&normalized) {
            Ok(Self(normalized))
        } else {
            Err(EnvelopeError::malformed(format!("invalid stage name '{raw}'")))
        }
    }

    /// The speech-to-text stage.
    #[must_use]
    pub fn stt() -> Self {
        Self(Self::STT.to_string())
    }

    /// The smart analysis stage.
    #[must_use]
    pub fn smart() -> Self {
        Self(Self::SMART.to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StageId {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StageId {
    type Error = EnvelopeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StageId> for String {
    fn from(id: StageId) -> Self {
        id.0
    }
}

impl AsRef<str> for StageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes_case() {
        let id = StageId::parse(" STT ").unwrap();
        assert_eq!(id, StageId::stt());
        assert_eq!(id.to_string(), "stt");
    }

    #[test]
    fn test_parse_rejects_bad_names() {
        assert!(StageId::parse("").is_err());
        assert!(StageId::parse("9lives").is_err());
        assert!(StageId::parse("stt/../smart").is_err());
        assert!(StageId::parse("has space").is_err());
    }

    #[test]
    fn test_extensible_names() {
        let id: StageId = "noteback-v2".parse().unwrap();
        assert_eq!(id.as_str(), "noteback-v2");
    }

    #[test]
    fn test_serde_validates() {
        let id: StageId = serde_json::from_str(r#""smart""#).unwrap();
        assert_eq!(id, StageId::smart());

        let bad: Result<StageId, _> = serde_json::from_str(r#""Not A Stage!""#);
        assert!(bad.is_err());
    }
}
