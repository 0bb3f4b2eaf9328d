//! Static SVG charts for the report
//!
//! Charts are plain SVG strings so they can be written as files and
//! inlined into the HTML report without any rendering backend. Output
//! depends only on the input rows.

use crate::pipeline::{AnalysisResult, ResultRow};
use chrono::Timelike;
use std::fmt::Write;

const WIDTH: f64 = 900.0;
const MARGIN_LEFT: f64 = 60.0;
const MARGIN_RIGHT: f64 = 20.0;
const MARGIN_TOP: f64 = 36.0;
const MARGIN_BOTTOM: f64 = 32.0;
const PANEL_HEIGHT: f64 = 160.0;

const NORMAL_COLOR: &str = "#2c7fb8";
const ANOMALY_COLOR: &str = "#d7301f";
const AXIS_COLOR: &str = "#7f8c8d";

const SCORE_BINS: usize = 30;

struct Canvas {
    width: f64,
    height: f64,
    body: String,
}

impl Canvas {
    fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            body: String::new(),
        }
    }

    fn text(&mut self, x: f64, y: f64, size: u32, anchor: &str, content: &str) {
        let _ = writeln!(
            self.body,
            r##"<text x="{:.1}" y="{:.1}" font-size="{}" text-anchor="{}" fill="#2c3e50">{}</text>"##,
            x,
            y,
            size,
            anchor,
            escape(content)
        );
    }

    fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, color: &str, dashed: bool) {
        let dash = if dashed { r#" stroke-dasharray="4 3""# } else { "" };
        let _ = writeln!(
            self.body,
            r#"<line x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="{}" stroke-width="1"{}/>"#,
            x1, y1, x2, y2, color, dash
        );
    }

    fn rect(&mut self, x: f64, y: f64, w: f64, h: f64, color: &str, opacity: f64) {
        let _ = writeln!(
            self.body,
            r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}" fill-opacity="{:.2}"/>"#,
            x,
            y,
            w.max(0.0),
            h.max(0.0),
            color,
            opacity
        );
    }

    fn circle(&mut self, x: f64, y: f64, r: f64, color: &str) {
        let _ = writeln!(
            self.body,
            r#"<circle cx="{:.1}" cy="{:.1}" r="{:.1}" fill="{}"/>"#,
            x, y, r, color
        );
    }

    fn polyline(&mut self, points: &[(f64, f64)], color: &str) {
        let coords: Vec<String> = points
            .iter()
            .map(|(x, y)| format!("{:.1},{:.1}", x, y))
            .collect();
        let _ = writeln!(
            self.body,
            r#"<polyline points="{}" fill="none" stroke="{}" stroke-width="1.2"/>"#,
            coords.join(" "),
            color
        );
    }

    fn finish(self) -> String {
        format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{w:.0}\" height=\"{h:.0}\" viewBox=\"0 0 {w:.0} {h:.0}\" font-family=\"Arial, sans-serif\">\n<rect width=\"100%\" height=\"100%\" fill=\"#ffffff\"/>\n{body}</svg>\n",
            w = self.width,
            h = self.height,
            body = self.body
        )
    }
}

/// Plot area of one panel
struct Frame {
    left: f64,
    top: f64,
    width: f64,
    height: f64,
}

impl Frame {
    fn x(&self, idx: usize, count: usize) -> f64 {
        if count <= 1 {
            return self.left + self.width / 2.0;
        }
        self.left + self.width * idx as f64 / (count - 1) as f64
    }

    fn y(&self, value: f64, min: f64, max: f64) -> f64 {
        let range = max - min;
        let t = if range > f64::EPSILON {
            (value - min) / range
        } else {
            0.5
        };
        self.top + self.height * (1.0 - t)
    }

    fn bottom(&self) -> f64 {
        self.top + self.height
    }

    fn right(&self) -> f64 {
        self.left + self.width
    }

    fn axes(&self, canvas: &mut Canvas) {
        canvas.line(self.left, self.bottom(), self.right(), self.bottom(), AXIS_COLOR, false);
        canvas.line(self.left, self.top, self.left, self.bottom(), AXIS_COLOR, false);
    }
}

/// One panel per metric with anomalous points marked
pub fn timeline(result: &AnalysisResult) -> String {
    let panels = result.metric_names.len().max(1);
    let panel_gap = 28.0;
    let height = MARGIN_TOP + panels as f64 * (PANEL_HEIGHT + panel_gap) + MARGIN_BOTTOM;
    let mut canvas = Canvas::new(WIDTH, height);
    canvas.text(WIDTH / 2.0, 22.0, 16, "middle", "Metric timeline with detected anomalies");

    let count = result.rows.len();
    for (panel, name) in result.metric_names.iter().enumerate() {
        let frame = Frame {
            left: MARGIN_LEFT,
            top: MARGIN_TOP + panel as f64 * (PANEL_HEIGHT + panel_gap) + 14.0,
            width: WIDTH - MARGIN_LEFT - MARGIN_RIGHT,
            height: PANEL_HEIGHT - 14.0,
        };
        let values: Vec<f64> = result
            .rows
            .iter()
            .map(|row| row.readings.get(name).copied().unwrap_or(0.0))
            .collect();
        let (min, max) = bounds(&values);

        canvas.text(frame.left, frame.top - 4.0, 12, "start", name);
        canvas.text(frame.left - 6.0, frame.top + 4.0, 10, "end", &format!("{:.2}", max));
        canvas.text(frame.left - 6.0, frame.bottom(), 10, "end", &format!("{:.2}", min));
        frame.axes(&mut canvas);

        let points: Vec<(f64, f64)> = values
            .iter()
            .enumerate()
            .map(|(i, v)| (frame.x(i, count), frame.y(*v, min, max)))
            .collect();
        canvas.polyline(&points, NORMAL_COLOR);

        for ((x, y), row) in points.iter().zip(&result.rows) {
            if row.is_anomaly {
                canvas.circle(*x, *y, 3.5, ANOMALY_COLOR);
            }
        }
    }

    if let (Some(first), Some(last)) = (result.rows.first(), result.rows.last()) {
        let y = height - 10.0;
        canvas.text(MARGIN_LEFT, y, 10, "start", &first.timestamp.format("%Y-%m-%d %H:%M").to_string());
        canvas.text(WIDTH - MARGIN_RIGHT, y, 10, "end", &last.timestamp.format("%Y-%m-%d %H:%M").to_string());
    }

    canvas.finish()
}

/// Histogram of decision scores, normal and anomalous rows overlaid
pub fn score_distribution(result: &AnalysisResult) -> String {
    let height = 360.0;
    let mut canvas = Canvas::new(WIDTH, height);
    canvas.text(WIDTH / 2.0, 22.0, 16, "middle", "Distribution of anomaly scores");

    let frame = Frame {
        left: MARGIN_LEFT,
        top: MARGIN_TOP + 10.0,
        width: WIDTH - MARGIN_LEFT - MARGIN_RIGHT,
        height: height - MARGIN_TOP - MARGIN_BOTTOM - 30.0,
    };
    frame.axes(&mut canvas);

    let scores: Vec<f64> = result.rows.iter().map(|r| r.score).collect();
    let (min, max) = bounds(&scores);
    let normal = histogram(result.rows.iter().filter(|r| !r.is_anomaly), min, max);
    let anomalous = histogram(result.rows.iter().filter(|r| r.is_anomaly), min, max);
    let peak = normal.iter().chain(&anomalous).copied().max().unwrap_or(0).max(1);

    let bar_width = frame.width / SCORE_BINS as f64;
    for (bins, color) in [(&normal, NORMAL_COLOR), (&anomalous, ANOMALY_COLOR)] {
        for (i, count) in bins.iter().enumerate() {
            if *count == 0 {
                continue;
            }
            let h = frame.height * *count as f64 / peak as f64;
            canvas.rect(
                frame.left + i as f64 * bar_width,
                frame.bottom() - h,
                bar_width - 1.0,
                h,
                color,
                0.7,
            );
        }
    }

    // Decision boundary
    if min < 0.0 && max > 0.0 {
        let x = frame.left + frame.width * (0.0 - min) / (max - min);
        canvas.line(x, frame.top, x, frame.bottom(), AXIS_COLOR, true);
    }

    canvas.text(frame.left, frame.bottom() + 16.0, 10, "start", &format!("{:.3}", min));
    canvas.text(frame.right(), frame.bottom() + 16.0, 10, "end", &format!("{:.3}", max));
    canvas.text(frame.left - 6.0, frame.top + 4.0, 10, "end", &peak.to_string());
    legend(&mut canvas, frame.right() - 150.0, height - 12.0);

    canvas.finish()
}

/// Flagged rows per hour of day
pub fn hourly_distribution(result: &AnalysisResult) -> String {
    let height = 320.0;
    let mut canvas = Canvas::new(WIDTH, height);
    canvas.text(WIDTH / 2.0, 22.0, 16, "middle", "Anomalies by hour of day");

    let frame = Frame {
        left: MARGIN_LEFT,
        top: MARGIN_TOP + 10.0,
        width: WIDTH - MARGIN_LEFT - MARGIN_RIGHT,
        height: height - MARGIN_TOP - MARGIN_BOTTOM - 30.0,
    };
    frame.axes(&mut canvas);

    let mut counts = [0usize; 24];
    for row in result.anomalies() {
        counts[row.timestamp.hour() as usize] += 1;
    }
    let peak = counts.iter().copied().max().unwrap_or(0).max(1);

    let bar_width = frame.width / 24.0;
    for (hour, count) in counts.iter().enumerate() {
        let x = frame.left + hour as f64 * bar_width;
        if *count > 0 {
            let h = frame.height * *count as f64 / peak as f64;
            canvas.rect(x + 2.0, frame.bottom() - h, bar_width - 4.0, h, ANOMALY_COLOR, 0.8);
        }
        if hour % 3 == 0 {
            canvas.text(x + bar_width / 2.0, frame.bottom() + 16.0, 10, "middle", &format!("{:02}:00", hour));
        }
    }
    canvas.text(frame.left - 6.0, frame.top + 4.0, 10, "end", &peak.to_string());

    canvas.finish()
}

fn legend(canvas: &mut Canvas, x: f64, y: f64) {
    canvas.rect(x, y - 9.0, 10.0, 10.0, NORMAL_COLOR, 0.7);
    canvas.text(x + 14.0, y, 11, "start", "Normal");
    canvas.rect(x + 70.0, y - 9.0, 10.0, 10.0, ANOMALY_COLOR, 0.7);
    canvas.text(x + 84.0, y, 11, "start", "Anomaly");
}

fn histogram<'a>(rows: impl Iterator<Item = &'a ResultRow>, min: f64, max: f64) -> Vec<usize> {
    let mut bins = vec![0usize; SCORE_BINS];
    let range = max - min;
    for row in rows {
        let idx = if range > f64::EPSILON {
            (((row.score - min) / range) * SCORE_BINS as f64) as usize
        } else {
            0
        };
        bins[idx.min(SCORE_BINS - 1)] += 1;
    }
    bins
}

fn bounds(values: &[f64]) -> (f64, f64) {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if min.is_finite() && max.is_finite() {
        (min, max)
    } else {
        (0.0, 1.0)
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn result(flags: &[bool]) -> AnalysisResult {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        AnalysisResult {
            metric_names: vec!["cpu_usage".to_string(), "a<b".to_string()],
            rows: flags
                .iter()
                .enumerate()
                .map(|(i, &is_anomaly)| ResultRow {
                    timestamp: start + Duration::hours(i as i64),
                    readings: [("cpu_usage".to_string(), i as f64), ("a<b".to_string(), 1.0)]
                        .into_iter()
                        .collect(),
                    is_anomaly,
                    score: if is_anomaly { -0.1 } else { 0.05 + i as f64 * 0.001 },
                })
                .collect(),
            evaluation: None,
            filled_gaps: 0,
        }
    }

    #[test]
    fn test_timeline_marks_anomalies() {
        let svg = timeline(&result(&[false, true, false, true]));
        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert_eq!(svg.matches("<circle").count(), 4);
        assert!(svg.contains("a&lt;b"));
    }

    #[test]
    fn test_charts_are_deterministic() {
        let input = result(&[false, true, false, false, true]);
        assert_eq!(timeline(&input), timeline(&input));
        assert_eq!(score_distribution(&input), score_distribution(&input));
        assert_eq!(hourly_distribution(&input), hourly_distribution(&input));
    }

    #[test]
    fn test_hourly_distribution_counts() {
        let svg = hourly_distribution(&result(&[true, false, true]));
        // Two hours with one anomaly each
        assert_eq!(svg.matches(ANOMALY_COLOR).count(), 2);
    }

    #[test]
    fn test_histogram_bins_extremes() {
        let input = result(&[true, false, false]);
        let bins = histogram(input.rows.iter(), -0.1, 0.052);
        assert_eq!(bins.iter().sum::<usize>(), 3);
        assert_eq!(bins[0], 1);
        assert_eq!(bins[SCORE_BINS - 1], 2);
    }

    #[test]
    fn test_empty_result_renders() {
        let svg = score_distribution(&result(&[]));
        assert!(svg.contains("Distribution of anomaly scores"));
    }
}
