use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use encoding_rs::{Encoding, GB18030, UTF_8};
use regex::Regex;

use crate::config::InputLimits;
use crate::error::{AnalysisError, Diagnostic};

// ---------------------------------------------------------------------------
// Line prefix
// ---------------------------------------------------------------------------

/// `2024-05-01 10:00:00,123 [] Module Thread<TAB>10:00:00.123<TAB>`
static LINE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2},\d+)\s+\[\]\s+\w+\s+[^\t]+\t(\d{2}:\d{2}:\d{2}\.\d+)\t",
    )
    .unwrap()
});

/// Strip the station's timestamp/log-level prefix from a raw line.
///
/// Returns `None` when nothing is left. Stripping repeats while the prefix is
/// still present, so `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(line: &str) -> Option<String> {
    let mut rest = line.trim_start();
    while let Some(m) = LINE_PREFIX.find(rest) {
        rest = rest[m.end()..].trim_start();
    }
    let rest = rest.trim_end();
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}

/// Primary timestamp of a raw (not yet normalized) line.
pub fn prefix_timestamp(line: &str) -> Option<NaiveDateTime> {
    let caps = LINE_PREFIX.captures(line.trim_start())?;
    let stamp = caps.get(1)?.as_str().replacen(',', ".", 1);
    NaiveDateTime::parse_from_str(&stamp, "%Y-%m-%d %H:%M:%S%.f").ok()
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Ordered list of encodings to try on a file's bytes.
#[derive(Debug, Clone)]
pub struct EncodingPolicy {
    encodings: Vec<&'static Encoding>,
}

impl Default for EncodingPolicy {
    fn default() -> Self {
        Self {
            encodings: vec![UTF_8, GB18030],
        }
    }
}

/// Text of a whole file and how it was obtained.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub text: String,
    pub encoding: &'static str,
    /// A later entry in the policy was needed.
    pub fallback: bool,
    /// No entry decoded cleanly; malformed sequences were replaced.
    pub lossy: bool,
}

impl EncodingPolicy {
    /// Build from WHATWG labels such as `"utf-8"` or `"gb18030"`.
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Result<Self, AnalysisError> {
        if labels.is_empty() {
            return Err(AnalysisError::InvalidConfig(
                "at least one encoding is required".into(),
            ));
        }
        let mut encodings = Vec::with_capacity(labels.len());
        for label in labels {
            let label = label.as_ref();
            let enc = Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| {
                AnalysisError::InvalidConfig(format!("unknown encoding label: {label}"))
            })?;
            encodings.push(enc);
        }
        Ok(Self { encodings })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.encodings.iter().map(|e| e.name()).collect()
    }

    /// Try each encoding strictly, in order. If none is clean, decode with the
    /// first one and replace malformed sequences.
    pub fn decode(&self, bytes: &[u8]) -> Decoded {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        for (idx, enc) in self.encodings.iter().enumerate() {
            if let Some(text) = enc.decode_without_bom_handling_and_without_replacement(bytes) {
                return Decoded {
                    text: text.into_owned(),
                    encoding: enc.name(),
                    fallback: idx > 0,
                    lossy: false,
                };
            }
        }
        let first = self.encodings.first().copied().unwrap_or(UTF_8);
        let (text, _) = first.decode_without_bom_handling(bytes);
        Decoded {
            text: text.into_owned(),
            encoding: first.name(),
            fallback: false,
            lossy: true,
        }
    }
}

// ---------------------------------------------------------------------------
// File reading
// ---------------------------------------------------------------------------

/// A decoded, normalized log file.
#[derive(Debug, Clone)]
pub struct LogText {
    pub lines: Vec<String>,
    pub encoding: &'static str,
    pub lossy: bool,
    pub truncated: bool,
    pub session_start: Option<NaiveDateTime>,
    pub session_end: Option<NaiveDateTime>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Read, decode and normalize a log file, enforcing the size ceilings.
pub fn read_log_file(
    path: &Path,
    limits: &InputLimits,
    policy: &EncodingPolicy,
) -> Result<LogText, AnalysisError> {
    let meta = fs::metadata(path).map_err(|e| AnalysisError::io(path, e))?;
    if meta.len() > limits.max_file_bytes {
        return Err(AnalysisError::InputTooLarge {
            path: path.to_path_buf(),
            size: meta.len(),
            limit: limits.max_file_bytes,
        });
    }
    let bytes = fs::read(path).map_err(|e| AnalysisError::io(path, e))?;
    let decoded = policy.decode(&bytes);

    let mut diagnostics = Vec::new();
    if decoded.fallback || decoded.lossy {
        tracing::warn!(
            path = %path.display(),
            encoding = decoded.encoding,
            lossy = decoded.lossy,
            "log file is not in the preferred encoding"
        );
        diagnostics.push(Diagnostic::EncodingFallback {
            encoding: decoded.encoding.to_string(),
            lossy: decoded.lossy,
        });
    }

    let mut lines = Vec::new();
    let mut session_start = None;
    let mut session_end = None;
    let mut truncated = false;

    for raw in decoded.text.lines() {
        if let Some(ts) = prefix_timestamp(raw) {
            session_start.get_or_insert(ts);
            session_end = Some(ts);
        }
        let Some(line) = normalize(raw) else {
            continue;
        };
        if lines.len() >= limits.max_lines {
            truncated = true;
            break;
        }
        lines.push(line);
    }

    if truncated {
        tracing::warn!(
            path = %path.display(),
            limit = limits.max_lines,
            "line limit reached, remaining input ignored"
        );
        diagnostics.push(Diagnostic::LinesTruncated {
            kept: lines.len(),
            limit: limits.max_lines,
        });
    }

    tracing::debug!(
        path = %path.display(),
        lines = lines.len(),
        encoding = decoded.encoding,
        "read log file"
    );

    Ok(LogText {
        lines,
        encoding: decoded.encoding,
        lossy: decoded.lossy,
        truncated,
        session_start,
        session_end,
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const PREFIXED: &str =
        "2024-05-01 10:00:00,123 [] INFO TestExec\t10:00:00.123\tMTK_GPS_RX_V1\tMeasure Process";

    #[test]
    fn test_normalize_strips_prefix() {
        assert_eq!(
            normalize(PREFIXED).as_deref(),
            Some("MTK_GPS_RX_V1\tMeasure Process")
        );
    }

    #[test]
    fn test_normalize_leaves_unprefixed_lines() {
        assert_eq!(normalize("  plain text  ").as_deref(), Some("plain text"));
        assert_eq!(normalize("EvalAndLogResults\ta\tb").as_deref(), Some("EvalAndLogResults\ta\tb"));
    }

    #[test]
    fn test_normalize_drops_empty_lines() {
        assert_eq!(normalize(""), None);
        assert_eq!(normalize("   \t "), None);
        assert_eq!(
            normalize("2024-05-01 10:00:00,123 [] INFO TestExec\t10:00:00.123\t   "),
            None
        );
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let doubled = format!(
            "2024-05-01 10:00:00,123 [] INFO TestExec\t10:00:00.123\t{PREFIXED}"
        );
        let inputs = [
            PREFIXED,
            doubled.as_str(),
            "  plain  ",
            "GROUP\t",
            "\tleading tab",
            "2024-05-01 10:00:00,123 [] INFO",
        ];
        for input in inputs {
            let once = normalize(input);
            let twice = once.as_deref().and_then(normalize);
            assert_eq!(once, twice, "not idempotent for {input:?}");
        }
        assert_eq!(
            normalize(&doubled).as_deref(),
            Some("MTK_GPS_RX_V1\tMeasure Process")
        );
    }

    #[test]
    fn test_prefix_timestamp() {
        let ts = prefix_timestamp(PREFIXED).unwrap();
        assert_eq!(ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string(), "2024-05-01 10:00:00.123");
        assert!(prefix_timestamp("no timestamp here").is_none());
    }

    #[test]
    fn test_decode_prefers_utf8() {
        let policy = EncodingPolicy::default();
        let decoded = policy.decode("测试 PASSED".as_bytes());
        assert_eq!(decoded.text, "测试 PASSED");
        assert_eq!(decoded.encoding, "UTF-8");
        assert!(!decoded.fallback && !decoded.lossy);
    }

    #[test]
    fn test_decode_falls_back_to_gb18030() {
        let (bytes, _, had_errors) = GB18030.encode("测试通过\tPASSED");
        assert!(!had_errors);
        let decoded = EncodingPolicy::default().decode(&bytes);
        assert_eq!(decoded.text, "测试通过\tPASSED");
        assert_eq!(decoded.encoding, "gb18030");
        assert!(decoded.fallback);
        assert!(!decoded.lossy);
    }

    #[test]
    fn test_decode_lossy_when_nothing_fits() {
        let policy = EncodingPolicy::from_labels(&["utf-8"]).unwrap();
        let decoded = policy.decode(b"ok \xFF\xFE end");
        assert!(decoded.lossy);
        assert!(decoded.text.starts_with("ok "));
        assert!(decoded.text.contains('\u{FFFD}'));
    }

    #[test]
    fn test_unknown_encoding_label() {
        let err = EncodingPolicy::from_labels(&["klingon"]).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidConfig(_)));
    }

    #[test]
    fn test_read_log_file_normalizes_and_tracks_session() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{PREFIXED}").unwrap();
        writeln!(file).unwrap();
        writeln!(
            file,
            "2024-05-01 10:05:00,001 [] INFO TestExec\t10:05:00.001\tMTK_GPS_RX_V1\tEvalAndLogResults"
        )
        .unwrap();
        file.flush().unwrap();

        let text = read_log_file(file.path(), &InputLimits::default(), &EncodingPolicy::default())
            .unwrap();
        assert_eq!(text.lines.len(), 2);
        assert!(!text.truncated);
        assert!(text.diagnostics.is_empty());
        let start = text.session_start.unwrap();
        let end = text.session_end.unwrap();
        assert!(start < end);
    }

    #[test]
    fn test_read_log_file_truncates_at_line_limit() {
        let mut file = NamedTempFile::new().unwrap();
        for i in 0..10 {
            writeln!(file, "line {i}").unwrap();
        }
        file.flush().unwrap();
        let limits = InputLimits {
            max_lines: 4,
            ..InputLimits::default()
        };
        let text = read_log_file(file.path(), &limits, &EncodingPolicy::default()).unwrap();
        assert_eq!(text.lines.len(), 4);
        assert!(text.truncated);
        assert!(text
            .diagnostics
            .contains(&Diagnostic::LinesTruncated { kept: 4, limit: 4 }));
    }

    #[test]
    fn test_read_log_file_rejects_oversized_input() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", "x".repeat(200)).unwrap();
        file.flush().unwrap();
        let limits = InputLimits {
            max_file_bytes: 100,
            ..InputLimits::default()
        };
        let err = read_log_file(file.path(), &limits, &EncodingPolicy::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::InputTooLarge { limit: 100, .. }));
    }

    #[test]
    fn test_read_log_file_missing_is_io_error() {
        let err = read_log_file(
            Path::new("/nonexistent/station.log"),
            &InputLimits::default(),
            &EncodingPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::Io { .. }));
    }
}
