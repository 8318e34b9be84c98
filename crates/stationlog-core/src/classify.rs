use std::sync::LazyLock;

use regex::Regex;

use crate::model::{
    Classification, Language, Severity, Stability, StabilityAssessment, TestState, Zone,
};

pub const DEFAULT_MAJORITY_THRESHOLD: f64 = 0.5;

static NUMBER_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-+]?\d*\.\d+|[-+]?\d+").unwrap());

// ---------------------------------------------------------------------------
// Zones
// ---------------------------------------------------------------------------

pub fn zone_of(value: f64, low: f64, high: f64) -> Zone {
    if value.is_nan() {
        return Zone::Invalid;
    }
    if value < low {
        return Zone::BelowRange;
    }
    if value > high {
        return Zone::AboveRange;
    }
    let mid = (low + high) / 2.0;
    if value < mid {
        Zone::LowerWithinRange
    } else if value > mid {
        Zone::UpperWithinRange
    } else {
        Zone::MiddleOfRange
    }
}

/// Zone of the first number found in `text`, or `Invalid` if there is none.
pub fn zone_of_text(text: &str, low: f64, high: f64) -> Zone {
    NUMBER_TOKEN
        .find(text)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|v| zone_of(v, low, high))
        .unwrap_or(Zone::Invalid)
}

/// Classify a set of readings against `[low, high]`.
///
/// A zone holding more than `majority_threshold` of all readings wins
/// outright. Otherwise every valid zone present is listed, most frequent
/// first, ties in [`Zone::ORDER`]. The result does not depend on input order.
pub fn classify<S: AsRef<str>>(
    values: &[S],
    low: f64,
    high: f64,
    majority_threshold: f64,
) -> Classification {
    let zones: Vec<Zone> = values
        .iter()
        .map(|v| zone_of_text(v.as_ref(), low, high))
        .collect();
    aggregate(&zones, majority_threshold)
}

pub fn classify_numbers(
    values: &[f64],
    low: f64,
    high: f64,
    majority_threshold: f64,
) -> Classification {
    let zones: Vec<Zone> = values.iter().map(|v| zone_of(*v, low, high)).collect();
    aggregate(&zones, majority_threshold)
}

fn aggregate(zones: &[Zone], majority_threshold: f64) -> Classification {
    if zones.is_empty() {
        return Classification::NoValidData;
    }
    let mut counts = [0usize; Zone::ORDER.len()];
    for zone in zones {
        counts[zone.rank()] += 1;
    }
    let mut ranked: Vec<(Zone, usize)> = Zone::ORDER
        .iter()
        .map(|z| (*z, counts[z.rank()]))
        .filter(|(_, count)| *count > 0)
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.rank().cmp(&b.0.rank())));

    let (top, top_count) = ranked[0];
    if top_count as f64 / zones.len() as f64 > majority_threshold {
        return Classification::Zone(top);
    }

    let compound: Vec<Zone> = ranked
        .into_iter()
        .map(|(zone, _)| zone)
        .filter(|zone| *zone != Zone::Invalid)
        .collect();
    match compound.len() {
        0 => Classification::NoValidData,
        _ => Classification::Compound(compound),
    }
}

// ---------------------------------------------------------------------------
// Stability
// ---------------------------------------------------------------------------

/// `satisifed` is spelled the way the station software writes it.
const STABILITY_MARKERS: [&str; 2] = ["complete", "satisifed"];

/// Stable when any line reports that the measurement criteria were met.
pub fn detect_stability<S: AsRef<str>>(lines: &[S]) -> Stability {
    let stable = lines.iter().any(|line| {
        let lower = line.as_ref().to_lowercase();
        STABILITY_MARKERS.iter().any(|m| lower.contains(m))
    });
    if stable {
        Stability::Stable
    } else {
        Stability::Unstable
    }
}

pub fn assess_stability<S: AsRef<str>>(lines: &[S], state: &TestState) -> StabilityAssessment {
    StabilityAssessment {
        stability: detect_stability(lines),
        severity: match state {
            TestState::Passed => Severity::Low,
            _ => Severity::High,
        },
    }
}

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

pub fn zone_label(zone: Zone, lang: Language) -> &'static str {
    match lang {
        Language::En => match zone {
            Zone::BelowRange => "below the lower limit",
            Zone::LowerWithinRange => "within range, near the lower limit",
            Zone::MiddleOfRange => "at the middle of the range",
            Zone::UpperWithinRange => "within range, near the upper limit",
            Zone::AboveRange => "above the upper limit",
            Zone::Invalid => "invalid reading",
        },
        Language::Zh => match zone {
            Zone::BelowRange => "低于下限",
            Zone::LowerWithinRange => "在范围内，偏向下限",
            Zone::MiddleOfRange => "位于范围中间",
            Zone::UpperWithinRange => "在范围内，偏向上限",
            Zone::AboveRange => "高于上限",
            Zone::Invalid => "无效读值",
        },
    }
}

pub fn classification_label(classification: &Classification, lang: Language) -> String {
    match classification {
        Classification::Zone(zone) => zone_label(*zone, lang).to_string(),
        Classification::Compound(zones) => {
            let sep = match lang {
                Language::En => "; ",
                Language::Zh => "；",
            };
            zones
                .iter()
                .map(|z| zone_label(*z, lang))
                .collect::<Vec<_>>()
                .join(sep)
        }
        Classification::NoValidData => match lang {
            Language::En => "no valid data".to_string(),
            Language::Zh => "无有效数据".to_string(),
        },
    }
}

pub fn stability_label(stability: Stability, lang: Language) -> &'static str {
    match (stability, lang) {
        (Stability::Stable, Language::En) => "readings stable",
        (Stability::Unstable, Language::En) => "readings unstable",
        (Stability::Stable, Language::Zh) => "读值稳定",
        (Stability::Unstable, Language::Zh) => "读值不稳定",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify_strs(values: &[&str], low: f64, high: f64) -> Classification {
        classify(values, low, high, DEFAULT_MAJORITY_THRESHOLD)
    }

    #[test]
    fn test_empty_input_is_no_valid_data() {
        let empty: [&str; 0] = [];
        assert_eq!(classify_strs(&empty, 0.0, 10.0), Classification::NoValidData);
        assert_eq!(
            classify_numbers(&[], 0.0, 10.0, 0.5),
            Classification::NoValidData
        );
    }

    #[test]
    fn test_single_midpoint_value() {
        assert_eq!(
            classify_strs(&["5"], 0.0, 10.0),
            Classification::Zone(Zone::MiddleOfRange)
        );
    }

    #[test]
    fn test_zone_boundaries() {
        assert_eq!(zone_of(-0.1, 0.0, 10.0), Zone::BelowRange);
        assert_eq!(zone_of(0.0, 0.0, 10.0), Zone::LowerWithinRange);
        assert_eq!(zone_of(4.9, 0.0, 10.0), Zone::LowerWithinRange);
        assert_eq!(zone_of(5.1, 0.0, 10.0), Zone::UpperWithinRange);
        assert_eq!(zone_of(10.0, 0.0, 10.0), Zone::UpperWithinRange);
        assert_eq!(zone_of(10.5, 0.0, 10.0), Zone::AboveRange);
    }

    #[test]
    fn test_split_outliers_give_compound_label() {
        let c = classify_strs(&["-5", "-3", "50", "52"], 0.0, 10.0);
        assert_eq!(c.to_string(), "BelowRange, AboveRange");
    }

    #[test]
    fn test_majority_wins() {
        let c = classify_strs(&["1", "2", "3", "12"], 0.0, 10.0);
        assert_eq!(c, Classification::Zone(Zone::LowerWithinRange));
    }

    #[test]
    fn test_compound_orders_by_frequency() {
        let c = classify_strs(&["12", "1", "15", "6", "11", "2"], 0.0, 10.0);
        assert_eq!(
            c,
            Classification::Compound(vec![
                Zone::AboveRange,
                Zone::LowerWithinRange,
                Zone::UpperWithinRange
            ])
        );
    }

    #[test]
    fn test_threshold_is_configurable() {
        let values = ["1", "2", "12"];
        assert_eq!(
            classify(&values, 0.0, 10.0, 0.5),
            Classification::Zone(Zone::LowerWithinRange)
        );
        assert_eq!(
            classify(&values, 0.0, 10.0, 0.7),
            Classification::Compound(vec![Zone::LowerWithinRange, Zone::AboveRange])
        );
    }

    #[test]
    fn test_number_token_extraction() {
        assert_eq!(zone_of_text("-3.5 dBm", 0.0, 10.0), Zone::BelowRange);
        assert_eq!(zone_of_text("value=.5", 0.0, 10.0), Zone::LowerWithinRange);
        assert_eq!(zone_of_text("+7", 0.0, 10.0), Zone::UpperWithinRange);
        assert_eq!(zone_of_text("N/A", 0.0, 10.0), Zone::Invalid);
    }

    #[test]
    fn test_invalid_values_count_against_majority() {
        // 2 of 4 in one zone is not a majority once invalid readings are counted
        let c = classify_strs(&["1", "2", "x", "y"], 0.0, 10.0);
        assert_eq!(c, Classification::Compound(vec![Zone::LowerWithinRange]));
    }

    #[test]
    fn test_unparsable_majority_is_invalid_zone() {
        assert_eq!(
            classify_strs(&["abc"], 0.0, 10.0),
            Classification::Zone(Zone::Invalid)
        );
        assert_eq!(
            classify_strs(&["x", "y"], 0.0, 10.0),
            Classification::Zone(Zone::Invalid)
        );
        assert_eq!(
            classify_strs(&["abc", "x", "5"], 0.0, 10.0),
            Classification::Zone(Zone::Invalid)
        );
        assert_eq!(
            classify_numbers(&[f64::NAN], 0.0, 10.0, 0.5),
            Classification::Zone(Zone::Invalid)
        );
    }

    #[test]
    fn test_split_invalid_without_valid_zone_is_no_valid_data() {
        // a share of 1.0 does not exceed a threshold of 1.0, and Invalid is never listed
        assert_eq!(
            classify(&["abc"], 0.0, 10.0, 1.0),
            Classification::NoValidData
        );
    }

    #[test]
    fn test_classify_is_order_invariant() {
        let values = ["-5", "1", "9", "9", "-5", "12", "5", "oops"];
        let expected = classify_strs(&values, 0.0, 10.0);
        let mut rotated = values.to_vec();
        for _ in 0..values.len() {
            rotated.rotate_left(1);
            assert_eq!(classify_strs(&rotated, 0.0, 10.0), expected);
        }
        let mut reversed = values.to_vec();
        reversed.reverse();
        assert_eq!(classify_strs(&reversed, 0.0, 10.0), expected);
    }

    #[test]
    fn test_detect_stability() {
        assert_eq!(
            detect_stability(&["measure process is complete because measurement criteria has been satisifed"]),
            Stability::Stable
        );
        assert_eq!(detect_stability(&["Measurement COMPLETE"]), Stability::Stable);
        assert_eq!(detect_stability(&["Reading 1: 3.0", "retrying"]), Stability::Unstable);
        let none: [&str; 0] = [];
        assert_eq!(detect_stability(&none), Stability::Unstable);
    }

    #[test]
    fn test_assess_stability_severity() {
        let lines = ["criteria satisifed"];
        assert_eq!(
            assess_stability(&lines, &TestState::Passed),
            StabilityAssessment {
                stability: Stability::Stable,
                severity: Severity::Low
            }
        );
        assert_eq!(
            assess_stability(&lines, &TestState::Failed).severity,
            Severity::High
        );
    }

    #[test]
    fn test_labels() {
        let c = Classification::Compound(vec![Zone::BelowRange, Zone::AboveRange]);
        assert_eq!(
            classification_label(&c, Language::En),
            "below the lower limit; above the upper limit"
        );
        assert_eq!(classification_label(&c, Language::Zh), "低于下限；高于上限");
        assert_eq!(stability_label(Stability::Unstable, Language::Zh), "读值不稳定");
    }
}
