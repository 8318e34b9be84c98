use std::sync::LazyLock;

use regex::Regex;

use crate::error::Diagnostic;
use crate::model::{MISSING_FIELD, Reading, TestRecord, TestState, TimeSeriesPoint};

// ---------------------------------------------------------------------------
// Result-line schema
// ---------------------------------------------------------------------------

pub const TEST_ITEM_FIELD: usize = 3;
pub const LOW_LIMIT_FIELD: usize = 4;
pub const UP_LIMIT_FIELD: usize = 5;
pub const TEST_DATA_FIELD: usize = 6;
pub const UNIT_FIELD: usize = 7;
pub const STATE_FIELD: usize = 10;

/// Field count needed to read every column without padding.
pub const REQUIRED_FIELDS: usize = STATE_FIELD + 1;

/// Leading token of a result line.
pub const RESULT_MARKER: &str = "EvalAndLogResults";
/// Lines closing one measurement round.
pub const ROUND_MARKER: &str = "Final measurement";

const MIN_RESULT_FIELDS: usize = 8;

static PROCESS_READING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\t)Measure Process\t(.+) Reading \d+: (-*\d+\.*\d*)").unwrap()
});

/// Normalize the state column. Any text containing `FAILED` loses its `*`
/// decorations and whitespace; everything else is only trimmed.
pub fn normalize_state(raw: &str) -> TestState {
    let trimmed = raw.trim();
    if trimmed.contains("FAILED") {
        let cleaned: String = trimmed
            .chars()
            .filter(|c| *c != '*' && !c.is_whitespace())
            .collect();
        TestState::from(cleaned)
    } else {
        TestState::from(trimmed.to_string())
    }
}

/// Extract a record from one tab-delimited result line. Never fails: missing
/// columns read as `N/A`, unparsable numbers stay raw.
pub fn extract(raw_line: &str) -> TestRecord {
    extract_with_diagnostics(raw_line, &mut Vec::new())
}

/// [`extract`], recording shortfalls and parse failures in `diagnostics`.
pub fn extract_with_diagnostics(raw_line: &str, diagnostics: &mut Vec<Diagnostic>) -> TestRecord {
    let fields: Vec<&str> = raw_line.split('\t').collect();
    let field = |idx: usize| fields.get(idx).map(|f| f.trim()).unwrap_or(MISSING_FIELD);

    let test_item = field(TEST_ITEM_FIELD).to_string();

    if fields.len() < REQUIRED_FIELDS {
        tracing::debug!(
            test_item = %test_item,
            found = fields.len(),
            "result line is short, padding with N/A"
        );
        diagnostics.push(Diagnostic::FieldCountShortfall {
            test_item: test_item.clone(),
            found: fields.len(),
            required: REQUIRED_FIELDS,
        });
    }

    let mut numeric = |name: &str, idx: usize| {
        let text = field(idx);
        let reading = Reading::parse(text);
        if let Reading::Raw(raw) = &reading
            && raw != MISSING_FIELD
        {
            tracing::debug!(test_item = %test_item, field = name, raw = %raw, "non-numeric field");
            diagnostics.push(Diagnostic::NumericParseFailure {
                test_item: test_item.clone(),
                field: name.to_string(),
                raw: raw.clone(),
            });
        }
        reading
    };

    let low_limit = numeric("low_limit", LOW_LIMIT_FIELD);
    let up_limit = numeric("up_limit", UP_LIMIT_FIELD);
    let test_data = numeric("test_data", TEST_DATA_FIELD);

    TestRecord {
        unit: field(UNIT_FIELD).to_string(),
        state: normalize_state(field(STATE_FIELD)),
        low_limit,
        up_limit,
        test_data,
        meaning: String::new(),
        indicator: String::new(),
        trend_analysis: String::new(),
        implied_problem_possibility: String::new(),
        chart_name: String::new(),
        chart_content: String::new(),
        source_fields: fields.iter().map(|f| f.to_string()).collect(),
        test_item,
    }
}

// ---------------------------------------------------------------------------
// Section splitting and de-duplication
// ---------------------------------------------------------------------------

/// A group's lines partitioned by role.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sections {
    pub process: Vec<String>,
    pub results: Vec<String>,
    pub other: Vec<String>,
}

pub fn is_result_line(line: &str) -> bool {
    line.starts_with(RESULT_MARKER)
}

pub fn split_sections<S: AsRef<str>>(lines: &[S]) -> Sections {
    let mut sections = Sections::default();
    for line in lines {
        let line = line.as_ref();
        if is_result_line(line) {
            sections.results.push(line.to_string());
        } else if line.contains("Measure Process") {
            sections.process.push(line.to_string());
        } else {
            sections.other.push(line.to_string());
        }
    }
    sections
}

/// Keep one result line per test item: the last one seen, at the position the
/// item first appeared. Lines with fewer than 8 fields or no item are dropped.
pub fn dedup_results<S: AsRef<str>>(lines: &[S]) -> Vec<String> {
    let mut order: Vec<String> = Vec::new();
    let mut latest: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    for line in lines {
        let line = line.as_ref();
        if !is_result_line(line) {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < MIN_RESULT_FIELDS || fields[TEST_ITEM_FIELD].trim().is_empty() {
            continue;
        }
        let item = fields[TEST_ITEM_FIELD].to_string();
        if latest.insert(item.clone(), line.to_string()).is_none() {
            order.push(item);
        }
    }
    order
        .into_iter()
        .filter_map(|item| latest.remove(&item))
        .collect()
}

// ---------------------------------------------------------------------------
// Measurement rounds
// ---------------------------------------------------------------------------

/// Tracks `{round}_{sequence}` suffixes across repeated measurement rounds.
#[derive(Debug, Clone)]
pub struct RoundCounter {
    round: u32,
    seq: u32,
}

impl Default for RoundCounter {
    fn default() -> Self {
        Self { round: 1, seq: 1 }
    }
}

impl RoundCounter {
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Advance to the next round if `line` is a round marker.
    pub fn observe(&mut self, line: &str) -> bool {
        if line.contains(ROUND_MARKER) {
            self.round += 1;
            self.seq = 1;
            true
        } else {
            false
        }
    }

    /// `{base}_{round}_{seq}`, then bump the sequence.
    pub fn next_key(&mut self, base: &str) -> String {
        let key = format!("{base}_{}_{}", self.round, self.seq);
        self.seq += 1;
        key
    }
}

/// Records from every result line, keyed by test item plus round and sequence.
pub fn extract_rounds<S: AsRef<str>>(lines: &[S]) -> Vec<(String, TestRecord)> {
    let mut counter = RoundCounter::default();
    let mut out = Vec::new();
    for line in lines {
        let line = line.as_ref();
        if counter.observe(line) || !is_result_line(line) {
            continue;
        }
        let record = extract(line);
        let key = counter.next_key(&record.test_item);
        out.push((key, record));
    }
    out
}

/// `Measure Process<TAB>NAME Reading n: value` lines as a keyed series.
pub fn extract_process_series<S: AsRef<str>>(lines: &[S]) -> Vec<TimeSeriesPoint> {
    let mut counter = RoundCounter::default();
    let mut series = Vec::new();
    for line in lines {
        let line = line.as_ref();
        if counter.observe(line) {
            continue;
        }
        let Some(caps) = PROCESS_READING.captures(line) else {
            continue;
        };
        let name = caps[1].trim();
        match caps[2].parse::<f64>() {
            Ok(value) => series.push(TimeSeriesPoint::new(counter.next_key(name), value)),
            Err(_) => tracing::debug!(line, "unparsable process reading"),
        }
    }
    series
}
