use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDateTime;
use rayon::prelude::*;

use crate::chart::{ChartRenderer, ChartRequest, SvgChartRenderer, render_artifact};
use crate::classify::{assess_stability, classify, classify_numbers};
use crate::config::PipelineConfig;
use crate::downsample::downsample_with;
use crate::error::{AnalysisError, Diagnostic};
use crate::extract::{
    dedup_results, extract_process_series, extract_rounds, extract_with_diagnostics, is_result_line,
};
use crate::model::{Classification, TestRecord, TimeSeriesPoint};
use crate::narrative::{GenericNarrative, NarrativeProvider};
use crate::normalize::{EncodingPolicy, read_log_file};
use crate::registry::{Pattern, PatternRegistry};
use crate::report::{ReportBook, assemble};

/// Lines between cancel-flag checks during a grouping scan.
const CANCEL_CHECK_INTERVAL: usize = 4096;

/// Test types whose groups repeat measurement rounds. Their result lines are
/// keyed per round instead of collapsing to the last one.
pub fn is_round_keyed(test_type: &str) -> bool {
    test_type.to_ascii_uppercase().starts_with("CAL")
}

// ---------------------------------------------------------------------------
// Grouping
// ---------------------------------------------------------------------------

/// Lines matched by one pattern, bucketed by group key in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct PatternGroups {
    pub pattern: String,
    groups: Vec<(String, Vec<String>)>,
    index: HashMap<String, usize>,
}

impl PatternGroups {
    fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            ..Self::default()
        }
    }

    fn push(&mut self, key: &str, content: &str) {
        let idx = match self.index.get(key) {
            Some(&idx) => idx,
            None => {
                self.index.insert(key.to_string(), self.groups.len());
                self.groups.push((key.to_string(), Vec::new()));
                self.groups.len() - 1
            }
        };
        self.groups[idx].1.push(content.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.index.get(key).map(|&idx| self.groups[idx].1.as_slice())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.groups.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Result of one grouping pass: a [`PatternGroups`] per pattern, in pattern
/// order, plus any lines that were skipped.
#[derive(Debug, Clone, Default)]
pub struct GroupedBucket {
    pub patterns: Vec<PatternGroups>,
    pub diagnostics: Vec<Diagnostic>,
}

impl GroupedBucket {
    /// Every (pattern, group key, lines) triple, pattern order first.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &[String])> {
        self.patterns.iter().flat_map(|p| {
            p.iter()
                .map(move |(key, lines)| (p.pattern.as_str(), key, lines))
        })
    }

    pub fn group_count(&self) -> usize {
        self.patterns.iter().map(PatternGroups::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.group_count() == 0
    }
}

/// Bucket `lines` by the text before their first tab, once per pattern.
pub fn group<S: AsRef<str>>(lines: &[S], patterns: &[Pattern]) -> GroupedBucket {
    let never = AtomicBool::new(false);
    match group_with_cancel(lines, patterns, usize::MAX, &never) {
        Ok(bucket) => bucket,
        Err(_) => GroupedBucket::default(),
    }
}

/// [`group`] with a per-line byte ceiling and a cancel flag checked between
/// patterns and every few thousand lines.
pub fn group_with_cancel<S: AsRef<str>>(
    lines: &[S],
    patterns: &[Pattern],
    max_line_bytes: usize,
    cancel: &AtomicBool,
) -> Result<GroupedBucket, AnalysisError> {
    let mut bucket = GroupedBucket::default();

    let usable: Vec<bool> = lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let len = line.as_ref().len();
            if len > max_line_bytes {
                tracing::warn!(line_number = i + 1, len, max_line_bytes, "skipping oversized line");
                bucket.diagnostics.push(Diagnostic::LineSkipped {
                    line_number: i + 1,
                    reason: format!("{len} bytes exceeds {max_line_bytes} byte limit"),
                });
                false
            } else {
                true
            }
        })
        .collect();

    for pattern in patterns {
        if cancel.load(Ordering::Relaxed) {
            return Err(AnalysisError::Cancelled);
        }
        let mut groups = PatternGroups::new(pattern.as_str());
        for (i, line) in lines.iter().enumerate() {
            if i % CANCEL_CHECK_INTERVAL == 0 && i > 0 && cancel.load(Ordering::Relaxed) {
                return Err(AnalysisError::Cancelled);
            }
            let line = line.as_ref();
            if !usable[i] || !pattern.is_match(line) {
                continue;
            }
            let (key, content) = line.split_once('\t').unwrap_or((line, ""));
            groups.push(key, content);
        }
        bucket.patterns.push(groups);
    }

    Ok(bucket)
}

// ---------------------------------------------------------------------------
// Analysis context
// ---------------------------------------------------------------------------

/// Shared, read-only inputs for analyzing any number of files.
pub struct AnalysisContext<'a> {
    pub registry: &'a PatternRegistry,
    pub config: &'a PipelineConfig,
    pub policy: EncodingPolicy,
    pub renderer: Box<dyn ChartRenderer>,
    pub narrative: Box<dyn NarrativeProvider>,
    cancel: Arc<AtomicBool>,
}

impl<'a> AnalysisContext<'a> {
    pub fn new(registry: &'a PatternRegistry, config: &'a PipelineConfig) -> Result<Self, AnalysisError> {
        Ok(Self {
            registry,
            config,
            policy: config.encoding_policy()?,
            renderer: Box::new(SvgChartRenderer::default()),
            narrative: Box::new(GenericNarrative),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_renderer(mut self, renderer: Box<dyn ChartRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_narrative(mut self, narrative: Box<dyn NarrativeProvider>) -> Self {
        self.narrative = narrative;
        self
    }

    /// Setting the returned flag stops in-flight grouping scans.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Test types to try, in order.
    fn test_types(&self) -> Vec<String> {
        let request = &self.config.request;
        if request.test_types.is_empty() {
            self.registry
                .test_types_for(&request.platform)
                .into_iter()
                .map(str::to_string)
                .collect()
        } else {
            request.test_types.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Per-file result
// ---------------------------------------------------------------------------

/// One group's lines and the reduced series drawn for it.
#[derive(Debug, Clone)]
pub struct GroupOutput {
    pub pattern: String,
    pub key: String,
    pub lines: Vec<String>,
    pub series: Vec<TimeSeriesPoint>,
}

#[derive(Debug)]
pub struct FileAnalysis {
    pub path: PathBuf,
    pub encoding: &'static str,
    pub lossy: bool,
    pub truncated: bool,
    pub total_lines: usize,
    pub session_start: Option<NaiveDateTime>,
    pub session_end: Option<NaiveDateTime>,
    /// Test type whose patterns produced the records, if any did.
    pub test_type: Option<String>,
    pub groups: Vec<GroupOutput>,
    pub book: ReportBook,
    pub diagnostics: Vec<Diagnostic>,
}

impl FileAnalysis {
    pub fn group(&self, key: &str) -> Option<&GroupOutput> {
        self.groups.iter().find(|g| g.key == key)
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Read, group, classify and assemble report units for one log file.
pub fn analyze_file(path: &Path, ctx: &AnalysisContext<'_>) -> Result<FileAnalysis, AnalysisError> {
    let config = ctx.config;
    let log = read_log_file(path, &config.limits, &ctx.policy)?;
    let mut diagnostics = log.diagnostics;

    let mut chosen = None;
    let mut groups = Vec::new();
    let mut book = ReportBook::new();

    for test_type in ctx.test_types() {
        let patterns = ctx
            .registry
            .lookup(&config.request.site, &config.request.platform, &test_type);
        if patterns.is_empty() {
            diagnostics.push(Diagnostic::PatternLookupMiss {
                site: config.request.site.clone(),
                platform: config.request.platform.to_string(),
                test_type: test_type.clone(),
            });
            continue;
        }

        let bucket = group_with_cancel(
            &log.lines,
            patterns,
            config.limits.max_line_bytes,
            &ctx.cancel,
        )?;
        let mut pass_diagnostics = bucket.diagnostics.clone();
        let mut pass_groups = Vec::new();
        let mut pass_book = ReportBook::new();
        let round_keyed = is_round_keyed(&test_type);

        for (pattern, key, lines) in bucket.iter() {
            let group = GroupInput { pattern, key, lines, round_keyed };
            let output = analyze_group(&group, ctx, &mut pass_book, &mut pass_diagnostics);
            pass_groups.push(output);
        }

        if pass_book.is_empty() {
            tracing::debug!(test_type = %test_type, "no records for test type");
            continue;
        }

        diagnostics.extend(pass_diagnostics);
        groups = pass_groups;
        book = pass_book;
        chosen = Some(test_type);
        break;
    }

    tracing::info!(
        path = %path.display(),
        test_type = chosen.as_deref().unwrap_or("-"),
        groups = groups.len(),
        units = book.len(),
        diagnostics = diagnostics.len(),
        "analyzed log file"
    );

    Ok(FileAnalysis {
        path: path.to_path_buf(),
        encoding: log.encoding,
        lossy: log.lossy,
        truncated: log.truncated,
        total_lines: log.lines.len(),
        session_start: log.session_start,
        session_end: log.session_end,
        test_type: chosen,
        groups,
        book,
        diagnostics,
    })
}

struct GroupInput<'g> {
    pattern: &'g str,
    key: &'g str,
    lines: &'g [String],
    round_keyed: bool,
}

fn analyze_group(
    group: &GroupInput<'_>,
    ctx: &AnalysisContext<'_>,
    book: &mut ReportBook,
    diagnostics: &mut Vec<Diagnostic>,
) -> GroupOutput {
    let config = ctx.config;
    let lang = config.report.language;
    let GroupInput { pattern, key, lines, .. } = *group;

    let results: Vec<&String> = lines.iter().filter(|l| is_result_line(l)).collect();
    let context_lines: Vec<&String> = lines.iter().filter(|l| !is_result_line(l)).collect();

    let series = extract_process_series(&context_lines);
    let reduced = downsample_with(&series, &config.downsample);

    let records: Vec<TestRecord> = if group.round_keyed {
        extract_rounds(lines)
            .into_iter()
            .map(|(round_key, mut record)| {
                record.test_item = round_key;
                record
            })
            .collect()
    } else {
        dedup_results(&results)
            .iter()
            .map(|line| extract_with_diagnostics(line, diagnostics))
            .collect()
    };

    for record in records {
        let item = record.test_item.clone();

        let classification = match (record.low_limit.as_f64(), record.up_limit.as_f64()) {
            (Some(low), Some(high)) if !series.is_empty() => {
                let values: Vec<f64> = series.iter().map(|p| p.value).collect();
                classify_numbers(&values, low, high, config.classifier.majority_threshold)
            }
            (Some(low), Some(high)) => classify(
                &[record.test_data.to_string()],
                low,
                high,
                config.classifier.majority_threshold,
            ),
            _ => {
                tracing::debug!(test_item = %item, "limits are not numeric, nothing to classify");
                diagnostics.push(Diagnostic::EmptyClassifierInput {
                    test_item: item.clone(),
                });
                Classification::NoValidData
            }
        };

        let stability = if context_lines.is_empty() {
            None
        } else {
            Some(assess_stability(&context_lines, &record.state))
        };

        if !reduced.is_empty() && reduced.len() < config.downsample.min_count {
            diagnostics.push(Diagnostic::BelowMinCount {
                test_item: item.clone(),
                count: reduced.len(),
                min_count: config.downsample.min_count,
            });
        }

        let chart = if config.report.write_charts && !reduced.is_empty() {
            let request = ChartRequest {
                title: &item,
                series: &reduced,
                low_limit: record.low_limit.as_f64(),
                up_limit: record.up_limit.as_f64(),
            };
            match render_artifact(ctx.renderer.as_ref(), &item, &request) {
                Ok(artifact) => Some(artifact),
                Err(e) => {
                    tracing::warn!(test_item = %item, error = %e, "chart rendering failed");
                    diagnostics.push(Diagnostic::ChartFailed {
                        test_item: item.clone(),
                        message: e.to_string(),
                    });
                    None
                }
            }
        } else {
            None
        };

        let purpose = ctx.narrative.purpose(&record, lang);
        let suggestion = ctx
            .narrative
            .suggestion(&record, &classification, stability.as_ref(), lang);

        let unit = assemble(key, record, classification, stability, chart, purpose, suggestion);
        if book.insert(unit).is_some() {
            tracing::debug!(group = key, test_item = %item, "replaced earlier unit");
        }
    }

    GroupOutput {
        pattern: pattern.to_string(),
        key: key.to_string(),
        lines: lines.to_vec(),
        series: reduced,
    }
}

/// Analyze files in parallel. Each file succeeds or fails on its own.
pub fn analyze_files<P>(
    paths: &[P],
    ctx: &AnalysisContext<'_>,
) -> Vec<(PathBuf, Result<FileAnalysis, AnalysisError>)>
where
    P: AsRef<Path> + Sync,
{
    paths
        .par_iter()
        .map(|path| {
            let path = path.as_ref();
            let result = analyze_file(path, ctx);
            if let Err(e) = &result {
                tracing::error!(path = %path.display(), error = %e, "analysis failed");
            }
            (path.to_path_buf(), result)
        })
        .collect()
}
