use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// Chip-platform identifier. Registry documents write platforms either as a
/// bare name or as a `[name, description]` pair; only the name identifies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlatformKey {
    Simple(String),
    Tagged(String, String),
}

impl PlatformKey {
    /// The name used for lookups, ignoring any description.
    pub fn discriminant(&self) -> &str {
        match self {
            PlatformKey::Simple(name) => name,
            PlatformKey::Tagged(name, _) => name,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            PlatformKey::Simple(_) => None,
            PlatformKey::Tagged(_, desc) => Some(desc),
        }
    }
}

impl From<&str> for PlatformKey {
    fn from(name: &str) -> Self {
        PlatformKey::Simple(name.to_string())
    }
}

impl fmt::Display for PlatformKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.discriminant())
    }
}

/// Placeholder written for fields missing from a short result line.
pub const MISSING_FIELD: &str = "N/A";

/// A numeric field from a result line. Keeps the original text when it does
/// not parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reading {
    Value(f64),
    Raw(String),
}

impl Reading {
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        match trimmed.parse::<f64>() {
            Ok(v) if v.is_finite() => Reading::Value(v),
            _ => Reading::Raw(trimmed.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Reading::Value(v) => Some(*v),
            Reading::Raw(_) => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Reading::Raw(s) if s == MISSING_FIELD)
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Value(v) => write!(f, "{v}"),
            Reading::Raw(s) => write!(f, "{s}"),
        }
    }
}

/// Outcome reported by the station for a test item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TestState {
    Passed,
    Failed,
    Other(String),
}

impl TestState {
    pub fn as_str(&self) -> &str {
        match self {
            TestState::Passed => "PASSED",
            TestState::Failed => "FAILED",
            TestState::Other(s) => s,
        }
    }
}

impl From<String> for TestState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "PASSED" => TestState::Passed,
            "FAILED" => TestState::Failed,
            _ => TestState::Other(s),
        }
    }
}

impl From<TestState> for String {
    fn from(state: TestState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One result line turned into typed fields, plus the narrative columns that
/// are filled in later by report assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRecord {
    pub test_item: String,
    pub low_limit: Reading,
    pub up_limit: Reading,
    pub test_data: Reading,
    pub unit: String,
    pub state: TestState,
    pub meaning: String,
    pub indicator: String,
    pub trend_analysis: String,
    pub implied_problem_possibility: String,
    pub chart_name: String,
    pub chart_content: String,
    pub source_fields: Vec<String>,
}

/// Where a reading falls relative to its limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Zone {
    BelowRange,
    LowerWithinRange,
    MiddleOfRange,
    UpperWithinRange,
    AboveRange,
    Invalid,
}

impl Zone {
    /// Fixed order used to break frequency ties.
    pub const ORDER: [Zone; 6] = [
        Zone::BelowRange,
        Zone::LowerWithinRange,
        Zone::MiddleOfRange,
        Zone::UpperWithinRange,
        Zone::AboveRange,
        Zone::Invalid,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Zone::BelowRange => "BelowRange",
            Zone::LowerWithinRange => "LowerWithinRange",
            Zone::MiddleOfRange => "MiddleOfRange",
            Zone::UpperWithinRange => "UpperWithinRange",
            Zone::AboveRange => "AboveRange",
            Zone::Invalid => "Invalid",
        }
    }

    pub fn rank(self) -> usize {
        Zone::ORDER.iter().position(|z| *z == self).unwrap_or(Zone::ORDER.len())
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate label for a set of readings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Zone(Zone),
    /// No zone dominated; zones listed most frequent first.
    Compound(Vec<Zone>),
    NoValidData,
}

impl Classification {
    pub fn zones(&self) -> Vec<Zone> {
        match self {
            Classification::Zone(z) => vec![*z],
            Classification::Compound(zs) => zs.clone(),
            Classification::NoValidData => Vec::new(),
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Zone(z) => write!(f, "{z}"),
            Classification::Compound(zs) => {
                let names: Vec<&str> = zs.iter().map(|z| z.as_str()).collect();
                f.write_str(&names.join(", "))
            }
            Classification::NoValidData => f.write_str("NoValidData"),
        }
    }
}

impl Serialize for Classification {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stability {
    Stable,
    Unstable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Low,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StabilityAssessment {
    pub stability: Stability,
    pub severity: Severity,
}

/// A single keyed reading from the test-process section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub key: String,
    pub value: f64,
}

impl TimeSeriesPoint {
    pub fn new(key: impl Into<String>, value: f64) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// A rendered chart, carried as base64 text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartArtifact {
    pub name: String,
    pub extension: String,
    pub content_base64: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Zh,
}

/// Final merged output for one test item within one group.
#[derive(Debug, Clone, Serialize)]
pub struct ReportUnit {
    pub group_key: String,
    pub record: TestRecord,
    pub classification: Classification,
    pub stability: Option<StabilityAssessment>,
    pub chart: Option<ChartArtifact>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_key_discriminant_ignores_description() {
        let tagged = PlatformKey::Tagged("MTK".into(), "MediaTek platform".into());
        let simple = PlatformKey::from("MTK");
        assert_eq!(tagged.discriminant(), simple.discriminant());
        assert_ne!(tagged, simple);
        assert_eq!(tagged.description(), Some("MediaTek platform"));
    }

    #[test]
    fn test_platform_key_deserializes_both_shapes() {
        let keys: Vec<PlatformKey> =
            serde_json::from_str(r#"["Generic", ["MTK", "MediaTek"]]"#).unwrap();
        assert_eq!(keys[0], PlatformKey::Simple("Generic".into()));
        assert_eq!(keys[1], PlatformKey::Tagged("MTK".into(), "MediaTek".into()));
    }

    #[test]
    fn test_reading_parse() {
        assert_eq!(Reading::parse(" 3.5 "), Reading::Value(3.5));
        assert_eq!(Reading::parse("-12"), Reading::Value(-12.0));
        assert_eq!(Reading::parse("N/A"), Reading::Raw("N/A".into()));
        assert!(Reading::parse("N/A").is_missing());
        assert_eq!(Reading::parse("NaN"), Reading::Raw("NaN".into()));
    }

    #[test]
    fn test_state_serializes_as_plain_string() {
        let json = serde_json::to_string(&TestState::Failed).unwrap();
        assert_eq!(json, r#""FAILED""#);
        let other: TestState = serde_json::from_str(r#""SKIPPED""#).unwrap();
        assert_eq!(other, TestState::Other("SKIPPED".into()));
    }

    #[test]
    fn test_classification_display() {
        assert_eq!(
            Classification::Zone(Zone::MiddleOfRange).to_string(),
            "MiddleOfRange"
        );
        assert_eq!(
            Classification::Compound(vec![Zone::BelowRange, Zone::AboveRange]).to_string(),
            "BelowRange, AboveRange"
        );
        assert_eq!(Classification::NoValidData.to_string(), "NoValidData");
    }

    #[test]
    fn test_zone_rank_follows_order() {
        assert!(Zone::BelowRange.rank() < Zone::LowerWithinRange.rank());
        assert!(Zone::UpperWithinRange.rank() < Zone::AboveRange.rank());
        assert_eq!(Zone::Invalid.rank(), 5);
    }
}
