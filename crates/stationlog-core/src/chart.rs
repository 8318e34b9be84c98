use std::fmt::Write as _;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::error::AnalysisError;
use crate::model::{ChartArtifact, TimeSeriesPoint};

/// What to draw for one test item.
#[derive(Debug, Clone, Copy)]
pub struct ChartRequest<'a> {
    pub title: &'a str,
    pub series: &'a [TimeSeriesPoint],
    pub low_limit: Option<f64>,
    pub up_limit: Option<f64>,
}

/// Turns a series into image bytes.
pub trait ChartRenderer: Send + Sync {
    fn render(&self, request: &ChartRequest<'_>) -> Result<Vec<u8>, AnalysisError>;

    /// File extension of the produced image, without the dot.
    fn extension(&self) -> &'static str;
}

impl ChartArtifact {
    pub fn encode(name: impl Into<String>, extension: &str, bytes: &[u8]) -> Self {
        Self {
            name: name.into(),
            extension: extension.to_string(),
            content_base64: STANDARD.encode(bytes),
        }
    }

    pub fn decode(&self) -> Result<Vec<u8>, AnalysisError> {
        STANDARD
            .decode(&self.content_base64)
            .map_err(|e| AnalysisError::Chart(format!("{}: {e}", self.name)))
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.name, self.extension)
    }
}

/// Render a request and wrap the bytes as an artifact named `name`.
pub fn render_artifact(
    renderer: &dyn ChartRenderer,
    name: &str,
    request: &ChartRequest<'_>,
) -> Result<ChartArtifact, AnalysisError> {
    let bytes = renderer.render(request)?;
    Ok(ChartArtifact::encode(name, renderer.extension(), &bytes))
}

// ---------------------------------------------------------------------------
// SVG line chart
// ---------------------------------------------------------------------------

/// Plain SVG line chart with dashed limit lines.
#[derive(Debug, Clone)]
pub struct SvgChartRenderer {
    pub width: u32,
    pub height: u32,
}

impl Default for SvgChartRenderer {
    fn default() -> Self {
        Self {
            width: 800,
            height: 400,
        }
    }
}

const MARGIN: f64 = 48.0;

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

impl ChartRenderer for SvgChartRenderer {
    fn render(&self, request: &ChartRequest<'_>) -> Result<Vec<u8>, AnalysisError> {
        if request.series.is_empty() {
            return Err(AnalysisError::Chart(format!(
                "{}: no points to draw",
                request.title
            )));
        }

        let values = request.series.iter().map(|p| p.value);
        let limits = request.low_limit.into_iter().chain(request.up_limit);
        let (mut y_min, mut y_max) = values
            .chain(limits)
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });
        if (y_max - y_min).abs() < f64::EPSILON {
            y_min -= 1.0;
            y_max += 1.0;
        }

        let w = f64::from(self.width);
        let h = f64::from(self.height);
        let plot_w = w - 2.0 * MARGIN;
        let plot_h = h - 2.0 * MARGIN;
        let steps = (request.series.len().max(2) - 1) as f64;
        let x_at = |i: usize| MARGIN + plot_w * i as f64 / steps;
        let y_at = |v: f64| MARGIN + plot_h * (y_max - v) / (y_max - y_min);

        let mut svg = String::new();
        let result: std::fmt::Result = (|| {
            writeln!(
                svg,
                r#"<svg xmlns="http://www.w3.org/2000/svg" width="{}" height="{}" viewBox="0 0 {} {}">"#,
                self.width, self.height, self.width, self.height
            )?;
            writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#)?;
            writeln!(
                svg,
                r#"<text x="{}" y="{}" font-size="14" text-anchor="middle">{}</text>"#,
                w / 2.0,
                MARGIN / 2.0,
                escape_xml(request.title)
            )?;
            writeln!(
                svg,
                r#"<line x1="{m}" y1="{m}" x2="{m}" y2="{b}" stroke="black"/><line x1="{m}" y1="{b}" x2="{r}" y2="{b}" stroke="black"/>"#,
                m = MARGIN,
                b = h - MARGIN,
                r = w - MARGIN
            )?;
            for (label, limit) in [("low", request.low_limit), ("up", request.up_limit)] {
                if let Some(v) = limit {
                    let y = y_at(v);
                    writeln!(
                        svg,
                        r#"<line class="limit-{label}" x1="{}" y1="{y:.2}" x2="{}" y2="{y:.2}" stroke="red" stroke-dasharray="6,4"/>"#,
                        MARGIN,
                        w - MARGIN
                    )?;
                    writeln!(
                        svg,
                        r#"<text x="{}" y="{:.2}" font-size="10" fill="red">{label} {v}</text>"#,
                        w - MARGIN + 4.0,
                        y + 3.0
                    )?;
                }
            }
            let points: Vec<String> = request
                .series
                .iter()
                .enumerate()
                .map(|(i, p)| format!("{:.2},{:.2}", x_at(i), y_at(p.value)))
                .collect();
            writeln!(
                svg,
                r#"<polyline fill="none" stroke="steelblue" stroke-width="1.5" points="{}"/>"#,
                points.join(" ")
            )?;
            for (i, p) in request.series.iter().enumerate() {
                writeln!(
                    svg,
                    r#"<circle cx="{:.2}" cy="{:.2}" r="2.5" fill="steelblue"><title>{}: {}</title></circle>"#,
                    x_at(i),
                    y_at(p.value),
                    escape_xml(&p.key),
                    p.value
                )?;
            }
            writeln!(svg, "</svg>")
        })();
        result.map_err(|e| AnalysisError::Chart(e.to_string()))?;

        Ok(svg.into_bytes())
    }

    fn extension(&self) -> &'static str {
        "svg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points() -> Vec<TimeSeriesPoint> {
        vec![
            TimeSeriesPoint::new("TX_1_1", 17.5),
            TimeSeriesPoint::new("TX_1_2", 18.0),
            TimeSeriesPoint::new("TX<&>_1_3", 16.0),
        ]
    }

    #[test]
    fn test_svg_contains_series_and_limits() {
        let series = points();
        let req = ChartRequest {
            title: "MTK_GPS \"RX\"",
            series: &series,
            low_limit: Some(15.0),
            up_limit: Some(20.0),
        };
        let svg = String::from_utf8(SvgChartRenderer::default().render(&req).unwrap()).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert!(svg.contains("<polyline"));
        assert!(svg.contains("limit-low"));
        assert!(svg.contains("limit-up"));
        assert_eq!(svg.matches("<circle").count(), 3);
        assert!(svg.contains("MTK_GPS &quot;RX&quot;"));
        assert!(svg.contains("TX&lt;&amp;&gt;_1_3"));
    }

    #[test]
    fn test_flat_series_without_limits() {
        let series = vec![TimeSeriesPoint::new("A_1_1", 3.0)];
        let req = ChartRequest {
            title: "flat",
            series: &series,
            low_limit: None,
            up_limit: None,
        };
        let svg = String::from_utf8(SvgChartRenderer::default().render(&req).unwrap()).unwrap();
        assert!(!svg.contains("NaN"));
        assert!(!svg.contains("limit-"));
    }

    #[test]
    fn test_empty_series_is_chart_error() {
        let req = ChartRequest {
            title: "empty",
            series: &[],
            low_limit: None,
            up_limit: None,
        };
        let err = SvgChartRenderer::default().render(&req).unwrap_err();
        assert!(matches!(err, AnalysisError::Chart(_)));
    }

    #[test]
    fn test_artifact_base64_round_trip() {
        let series = points();
        let req = ChartRequest {
            title: "t",
            series: &series,
            low_limit: None,
            up_limit: None,
        };
        let renderer = SvgChartRenderer::default();
        let artifact = render_artifact(&renderer, "ITEM", &req).unwrap();
        assert_eq!(artifact.file_name(), "ITEM.svg");
        assert_eq!(artifact.decode().unwrap(), renderer.render(&req).unwrap());
    }
}
