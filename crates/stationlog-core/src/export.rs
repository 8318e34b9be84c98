use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::ReportConfig;
use crate::engine::{FileAnalysis, GroupOutput};
use crate::error::AnalysisError;
use crate::extract::is_result_line;
use crate::model::ReportUnit;
use crate::report::{Report, ReportBook, ShowState, build_report};

// ---- Export options ----

/// Controls which artifacts `write_outputs` produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportOptions {
    pub group_text: bool,
    pub parsed_data: bool,
    pub charts: bool,
    pub report_json: bool,
    pub summary_csv: bool,
    pub theme: String,
    pub show_state: ShowState,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            group_text: true,
            parsed_data: true,
            charts: true,
            report_json: true,
            summary_csv: true,
            theme: ReportConfig::default().theme,
            show_state: ShowState::Failed,
        }
    }
}

impl From<&ReportConfig> for ExportOptions {
    fn from(report: &ReportConfig) -> Self {
        Self {
            charts: report.write_charts,
            theme: report.theme.clone(),
            show_state: report.show_state,
            ..Self::default()
        }
    }
}

// ---- File names ----

/// Replace path separators, reserved and control characters with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

// ---- Public API ----

/// Serialize a report as pretty-printed JSON.
pub fn to_json(report: &Report) -> Result<String, AnalysisError> {
    serde_json::to_string_pretty(report).map_err(|e| AnalysisError::Export(e.to_string()))
}

/// One row per report unit.
///
/// Output includes a UTF-8 BOM, CRLF line endings, and all-quoted fields
/// for Excel compatibility.
pub fn to_csv(book: &ReportBook) -> Result<String, AnalysisError> {
    let mut wtr = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .terminator(csv::Terminator::CRLF)
        .from_writer(vec![]);

    write_units_csv(&mut wtr, book).map_err(|e| AnalysisError::Export(e.to_string()))?;

    let data = wtr
        .into_inner()
        .map_err(|e| AnalysisError::Export(e.to_string()))?;
    let body = String::from_utf8(data).map_err(|e| AnalysisError::Export(e.to_string()))?;
    // UTF-8 BOM required for Excel to recognize CSV encoding
    let mut out = String::from("\u{FEFF}");
    out.push_str(&body);
    Ok(out)
}

/// `# test_process` then `# test_result`, each followed by its lines.
pub fn group_text<S: AsRef<str>>(lines: &[S]) -> String {
    let mut out = String::from("# test_process\n");
    for line in lines.iter().map(|l| l.as_ref()).filter(|l| !is_result_line(l)) {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str("# test_result\n");
    for line in lines.iter().map(|l| l.as_ref()).filter(|l| is_result_line(l)) {
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Record fields and the charted series as `key: value` lines.
pub fn parsed_data_text(unit: &ReportUnit, group: Option<&GroupOutput>) -> String {
    let r = &unit.record;
    let mut out = String::new();
    for (key, value) in [
        ("test_item", r.test_item.clone()),
        ("low_limit", r.low_limit.to_string()),
        ("up_limit", r.up_limit.to_string()),
        ("test_data", r.test_data.to_string()),
        ("unit", r.unit.clone()),
        ("state", r.state.to_string()),
        ("classification", unit.classification.to_string()),
    ] {
        out.push_str(&format!("{key}: {value}\n"));
    }
    if let Some(group) = group {
        for point in &group.series {
            out.push_str(&format!("{}: {}\n", point.key, point.value));
        }
    }
    out
}

/// Write every artifact for one analyzed file under
/// `out_dir/<sanitized file stem>/`. Returns the paths written.
pub fn write_outputs(
    analysis: &FileAnalysis,
    out_dir: &Path,
    options: &ExportOptions,
) -> Result<Vec<PathBuf>, AnalysisError> {
    let stem = analysis
        .path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "log".to_string());
    let dir = out_dir.join(sanitize_file_name(&stem));
    fs::create_dir_all(&dir).map_err(|e| AnalysisError::io(&dir, e))?;

    let mut written = Vec::new();
    let mut write = |name: &str, contents: &[u8]| -> Result<(), AnalysisError> {
        let path = dir.join(name);
        fs::write(&path, contents).map_err(|e| AnalysisError::io(&path, e))?;
        written.push(path);
        Ok(())
    };

    if options.group_text {
        for (key, lines) in merge_groups(&analysis.groups) {
            let name = format!("{}.txt", sanitize_file_name(key));
            write(&name, group_text(&lines).as_bytes())?;
        }
    }

    let stems = unit_file_stems(&analysis.book);
    for (unit, item) in analysis.book.iter().zip(&stems) {
        if options.parsed_data {
            let text = parsed_data_text(unit, analysis.group(&unit.group_key));
            write(&format!("{item}_parsed_data.txt"), text.as_bytes())?;
        }
        if options.charts
            && let Some(chart) = &unit.chart
        {
            let bytes = chart.decode()?;
            write(&format!("{item}.{}", chart.extension), &bytes)?;
            write(&format!("{item}_base64.txt"), chart.content_base64.as_bytes())?;
        }
    }

    if options.report_json {
        let report = build_report(&analysis.book, &options.theme, options.show_state);
        write("report.json", to_json(&report)?.as_bytes())?;
    }
    if options.summary_csv {
        write("summary.csv", to_csv(&analysis.book)?.as_bytes())?;
    }

    tracing::info!(
        path = %analysis.path.display(),
        out = %dir.display(),
        files = written.len(),
        "wrote outputs"
    );
    Ok(written)
}

// ---- Helpers ----

/// File stem per report unit, in book order. An item name shared by more than
/// one group key is prefixed with the sanitized group key.
fn unit_file_stems(book: &ReportBook) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for unit in book.iter() {
        *counts
            .entry(sanitize_file_name(&unit.record.test_item))
            .or_default() += 1;
    }
    book.iter()
        .map(|unit| {
            let item = sanitize_file_name(&unit.record.test_item);
            if counts.get(&item).copied().unwrap_or(0) > 1 {
                format!("{}_{item}", sanitize_file_name(&unit.group_key))
            } else {
                item
            }
        })
        .collect()
}

/// Lines of groups sharing a key under different patterns, concatenated in
/// first-seen key order.
fn merge_groups(groups: &[GroupOutput]) -> Vec<(&str, Vec<&str>)> {
    let mut merged: Vec<(&str, Vec<&str>)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for group in groups {
        let idx = *index.entry(group.key.as_str()).or_insert_with(|| {
            merged.push((group.key.as_str(), Vec::new()));
            merged.len() - 1
        });
        merged[idx].1.extend(group.lines.iter().map(String::as_str));
    }
    merged
}

fn write_units_csv(wtr: &mut csv::Writer<Vec<u8>>, book: &ReportBook) -> Result<(), csv::Error> {
    wtr.write_record([
        "group_key",
        "test_item",
        "low_limit",
        "up_limit",
        "test_data",
        "unit",
        "state",
        "classification",
        "stability",
        "severity",
        "implied_problem_possibility",
        "chart_name",
    ])?;
    for unit in book.iter() {
        let r = &unit.record;
        let (stability, severity) = match unit.stability {
            Some(s) => (format!("{:?}", s.stability), format!("{:?}", s.severity)),
            None => (String::new(), String::new()),
        };
        wtr.write_record([
            unit.group_key.as_str(),
            &r.test_item,
            &r.low_limit.to_string(),
            &r.up_limit.to_string(),
            &r.test_data.to_string(),
            &r.unit,
            r.state.as_str(),
            &unit.classification.to_string(),
            &stability,
            &severity,
            &r.implied_problem_possibility,
            &r.chart_name,
        ])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract;
    use crate::model::{
        ChartArtifact, Classification, Severity, Stability, StabilityAssessment, TimeSeriesPoint, Zone,
    };
    use crate::report::assemble;
    use tempfile::TempDir;

    fn unit(group: &str, item: &str, state: &str, chart: bool) -> ReportUnit {
        let record = extract(&format!(
            "EvalAndLogResults\ta\tb\t{item}\t1\t5\t3\tdB\tx\ty\t{state}"
        ));
        assemble(
            group,
            record,
            Classification::Zone(Zone::MiddleOfRange),
            Some(StabilityAssessment {
                stability: Stability::Stable,
                severity: Severity::Low,
            }),
            chart.then(|| ChartArtifact::encode(item, "svg", b"<svg/>")),
            None,
            Some("note, with \"quotes\"".to_string()),
        )
    }

    fn analysis(dir: &Path) -> FileAnalysis {
        let mut book = ReportBook::new();
        book.insert(unit("G1", "ITEM/A", "PASSED", true));
        book.insert(unit("G1", "ITEM_B", "FAILED", false));
        FileAnalysis {
            path: dir.join("station 01.log"),
            encoding: "UTF-8",
            lossy: false,
            truncated: false,
            total_lines: 4,
            session_start: None,
            session_end: None,
            test_type: Some("COMPREHENSIVE_TEST".to_string()),
            groups: vec![
                GroupOutput {
                    pattern: "G1".to_string(),
                    key: "G1".to_string(),
                    lines: vec![
                        "Measure Process\tP Reading 1: 3".to_string(),
                        "EvalAndLogResults\ta\tb\tITEM/A".to_string(),
                    ],
                    series: vec![TimeSeriesPoint::new("P_1_1", 3.0)],
                },
                GroupOutput {
                    pattern: "G\\d".to_string(),
                    key: "G1".to_string(),
                    lines: vec!["other".to_string()],
                    series: Vec::new(),
                },
            ],
            book,
            diagnostics: Vec::new(),
        }
    }

    /// Strip the UTF-8 BOM from the beginning of CSV output for easier test assertions.
    fn strip_bom(s: &str) -> &str {
        s.strip_prefix('\u{FEFF}').unwrap_or(s)
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("a/b\\c:d*e?f\"g<h>i|j"), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_file_name("tab\there"), "tab_here");
        assert_eq!(sanitize_file_name(" .. "), "_");
        assert_eq!(sanitize_file_name("MTK_GPS_RX_V1_L1_-130DB"), "MTK_GPS_RX_V1_L1_-130DB");
    }

    #[test]
    fn test_csv_starts_with_bom_and_is_all_quoted() {
        let mut book = ReportBook::new();
        book.insert(unit("G", "A", "PASSED", false));
        let csv = to_csv(&book).unwrap();
        assert!(csv.starts_with('\u{FEFF}'), "CSV must start with UTF-8 BOM");
        let csv = strip_bom(&csv);
        assert!(csv.contains("\r\n"), "must use CRLF line endings");
        for line in csv.lines() {
            if !line.is_empty() {
                assert!(line.starts_with('"'), "all fields must be quoted: {line}");
            }
        }
    }

    #[test]
    fn test_csv_round_trips_through_reader() {
        let mut book = ReportBook::new();
        book.insert(unit("G", "A", "* FAILED *", false));
        let csv_out = to_csv(&book).unwrap();
        let mut rdr = csv::ReaderBuilder::new().from_reader(strip_bom(&csv_out).as_bytes());
        let headers = rdr.headers().unwrap().clone();
        assert_eq!(&headers[0], "group_key");
        let record = rdr.records().next().unwrap().unwrap();
        assert_eq!(&record[1], "A");
        assert_eq!(&record[6], "FAILED");
        assert_eq!(&record[7], "MiddleOfRange");
        assert_eq!(&record[8], "Stable");
        assert_eq!(&record[10], "note, with \"quotes\"");
    }

    #[test]
    fn test_csv_empty_book_is_header_only() {
        let csv = to_csv(&ReportBook::new()).unwrap();
        assert_eq!(strip_bom(&csv).lines().count(), 1);
    }

    #[test]
    fn test_group_text_sections() {
        let text = group_text(&["Measure Process\tx", "EvalAndLogResults\ty", "other"]);
        assert_eq!(
            text,
            "# test_process\nMeasure Process\tx\nother\n# test_result\nEvalAndLogResults\ty\n"
        );
    }

    #[test]
    fn test_write_outputs_creates_all_artifacts() {
        let tmp = TempDir::new().unwrap();
        let analysis = analysis(tmp.path());
        let options = ExportOptions {
            show_state: ShowState::All,
            ..ExportOptions::default()
        };
        let written = write_outputs(&analysis, tmp.path(), &options).unwrap();

        let dir = tmp.path().join("station 01");
        for name in [
            "G1.txt",
            "ITEM_A_parsed_data.txt",
            "ITEM_B_parsed_data.txt",
            "ITEM_A.svg",
            "ITEM_A_base64.txt",
            "report.json",
            "summary.csv",
        ] {
            assert!(dir.join(name).exists(), "missing {name}");
        }
        assert_eq!(written.len(), 7);
        assert!(!dir.join("ITEM_B.svg").exists());

        let group = fs::read_to_string(dir.join("G1.txt")).unwrap();
        assert!(group.contains("other\n# test_result"), "merged groups share one file");

        let parsed = fs::read_to_string(dir.join("ITEM_A_parsed_data.txt")).unwrap();
        assert!(parsed.starts_with("test_item: ITEM/A\n"));
        assert!(parsed.contains("P_1_1: 3\n"));

        assert_eq!(fs::read(dir.join("ITEM_A.svg")).unwrap(), b"<svg/>");

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.join("report.json")).unwrap()).unwrap();
        assert_eq!(
            json["Global_Overview"]["Status_Indicators"].as_array().unwrap().len(),
            2
        );
    }

    #[test]
    fn test_shared_item_name_across_groups_gets_distinct_files() {
        let tmp = TempDir::new().unwrap();
        let mut analysis = analysis(tmp.path());
        let mut book = ReportBook::new();
        book.insert(unit("G1", "ITEM", "PASSED", true));
        book.insert(unit("G2", "ITEM", "FAILED", true));
        book.insert(unit("G2", "SOLO", "PASSED", false));
        assert_eq!(book.len(), 3);
        analysis.book = book;

        let options = ExportOptions {
            group_text: false,
            report_json: false,
            summary_csv: false,
            ..ExportOptions::default()
        };
        let written = write_outputs(&analysis, tmp.path(), &options).unwrap();
        let names: Vec<String> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "G1_ITEM_parsed_data.txt",
                "G1_ITEM.svg",
                "G1_ITEM_base64.txt",
                "G2_ITEM_parsed_data.txt",
                "G2_ITEM.svg",
                "G2_ITEM_base64.txt",
                "SOLO_parsed_data.txt",
            ]
        );

        let dir = tmp.path().join("station 01");
        let first = fs::read_to_string(dir.join("G1_ITEM_parsed_data.txt")).unwrap();
        let second = fs::read_to_string(dir.join("G2_ITEM_parsed_data.txt")).unwrap();
        assert!(first.contains("state: PASSED\n"));
        assert!(second.contains("state: FAILED\n"));
    }

    #[test]
    fn test_export_options_skip_artifacts() {
        let tmp = TempDir::new().unwrap();
        let analysis = analysis(tmp.path());
        let options = ExportOptions {
            group_text: false,
            parsed_data: false,
            charts: false,
            ..ExportOptions::default()
        };
        let written = write_outputs(&analysis, tmp.path(), &options).unwrap();
        let names: Vec<String> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["report.json", "summary.csv"]);
    }
}
