use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{
    ChartArtifact, Classification, ReportUnit, StabilityAssessment, TestRecord, TestState,
};
use crate::narrative::Purpose;

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// Merge a record with its classification, chart and narrative text.
/// Missing text becomes an empty string.
pub fn assemble(
    group_key: &str,
    mut record: TestRecord,
    classification: Classification,
    stability: Option<StabilityAssessment>,
    chart: Option<ChartArtifact>,
    purpose: Option<Purpose>,
    suggestion: Option<String>,
) -> ReportUnit {
    let Purpose { meaning, indicator } = purpose.unwrap_or(Purpose {
        meaning: String::new(),
        indicator: String::new(),
    });
    record.meaning = meaning;
    record.indicator = indicator;
    record.trend_analysis = classification.to_string();
    record.implied_problem_possibility = suggestion.unwrap_or_default();
    record.chart_name = chart.as_ref().map(|c| c.file_name()).unwrap_or_default();
    record.chart_content = chart
        .as_ref()
        .map(|c| c.content_base64.clone())
        .unwrap_or_default();

    ReportUnit {
        group_key: group_key.to_string(),
        record,
        classification,
        stability,
        chart,
    }
}

// ---------------------------------------------------------------------------
// Report book
// ---------------------------------------------------------------------------

/// Report units keyed by (group key, test item), in first-insertion order.
#[derive(Debug, Clone, Default)]
pub struct ReportBook {
    units: Vec<ReportUnit>,
    index: HashMap<(String, String), usize>,
}

impl ReportBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a unit. A unit with the same group key and test item is
    /// replaced in place and returned.
    pub fn insert(&mut self, unit: ReportUnit) -> Option<ReportUnit> {
        let key = (unit.group_key.clone(), unit.record.test_item.clone());
        match self.index.get(&key) {
            Some(&idx) => Some(std::mem::replace(&mut self.units[idx], unit)),
            None => {
                self.index.insert(key, self.units.len());
                self.units.push(unit);
                None
            }
        }
    }

    pub fn get(&self, group_key: &str, test_item: &str) -> Option<&ReportUnit> {
        self.index
            .get(&(group_key.to_string(), test_item.to_string()))
            .map(|&idx| &self.units[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReportUnit> {
        self.units.iter()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn into_units(self) -> Vec<ReportUnit> {
        self.units
    }
}

impl Serialize for ReportBook {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.units.serialize(serializer)
    }
}

// ---------------------------------------------------------------------------
// Report document
// ---------------------------------------------------------------------------

/// Which units make it into the report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShowState {
    All,
    #[default]
    Failed,
    Passed,
}

impl ShowState {
    pub fn includes(self, state: &TestState) -> bool {
        match self {
            ShowState::All => true,
            ShowState::Failed => *state == TestState::Failed,
            ShowState::Passed => *state == TestState::Passed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusIndicator {
    pub item: String,
    pub state: String,
    pub color: String,
    pub show: bool,
}

impl StatusIndicator {
    pub fn for_state(item: &str, state: &TestState) -> Self {
        let color = match state {
            TestState::Passed => "blue",
            TestState::Failed => "red",
            TestState::Other(_) => "",
        };
        Self {
            item: item.to_string(),
            state: state.to_string(),
            color: color.to_string(),
            show: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestProjectResult {
    #[serde(rename = "Test_Project")]
    pub test_project: String,
    #[serde(rename = "Meaning")]
    pub meaning: String,
    #[serde(rename = "Indicator")]
    pub indicator: String,
    #[serde(rename = "Test_Value")]
    pub test_value: String,
    #[serde(rename = "Range")]
    pub range: String,
    #[serde(rename = "Test_Result")]
    pub test_result: String,
    #[serde(rename = "Trend_Analysis")]
    pub trend_analysis: String,
    #[serde(rename = "Implied_Problem_Possibility")]
    pub implied_problem_possibility: String,
    #[serde(rename = "Chart_Name")]
    pub chart_name: String,
    #[serde(rename = "Chart_Content")]
    pub chart_content: String,
}

impl From<&ReportUnit> for TestProjectResult {
    fn from(unit: &ReportUnit) -> Self {
        let r = &unit.record;
        Self {
            test_project: r.test_item.clone(),
            meaning: r.meaning.clone(),
            indicator: r.indicator.clone(),
            test_value: r.test_data.to_string(),
            range: format!("{},{}", r.low_limit, r.up_limit),
            test_result: r.state.to_string(),
            trend_analysis: r.trend_analysis.clone(),
            implied_problem_possibility: r.implied_problem_possibility.clone(),
            chart_name: r.chart_name.clone(),
            chart_content: r.chart_content.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalOverview {
    #[serde(rename = "Status_Indicators")]
    pub status_indicators: Vec<StatusIndicator>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestAnalysis {
    #[serde(rename = "Test_Project_Results")]
    pub test_project_results: Vec<TestProjectResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModularResults {
    #[serde(rename = "Test_Analysis")]
    pub test_analysis: TestAnalysis,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(rename = "Report_Theme")]
    pub theme: String,
    #[serde(rename = "Global_Overview")]
    pub overview: GlobalOverview,
    #[serde(rename = "Modular_Test_Results_Display")]
    pub results: ModularResults,
}

pub fn build_report(book: &ReportBook, theme: &str, show: ShowState) -> Report {
    let mut report = Report {
        theme: theme.to_string(),
        ..Report::default()
    };
    for unit in book.iter().filter(|u| show.includes(&u.record.state)) {
        report
            .overview
            .status_indicators
            .push(StatusIndicator::for_state(&unit.record.test_item, &unit.record.state));
        report
            .results
            .test_analysis
            .test_project_results
            .push(TestProjectResult::from(unit));
    }
    report
}
