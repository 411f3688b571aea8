//! Accumulation and serialization of classified result rows.

use std::io::Write;
use std::time::Duration;

use crate::driver::EvalMode;
use crate::error::Result;

/// Leading columns shared by every evaluation mode.
const BASE_COLUMNS: [&str; 4] = ["Index", "Commit", "Variant", "config_t"];

/// One value in a result row.
///
/// Timings render with fixed 3-decimal precision; everything else renders as
/// literal text.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Index(usize),
    Time(f64),
    Text(String),
}

impl Cell {
    pub fn seconds(duration: Duration) -> Self {
        Cell::Time(duration.as_secs_f64())
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Cell::Text(s)
    }
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cell::Index(i) => write!(f, "{i}"),
            Cell::Time(t) => write!(f, "{t:.3}"),
            Cell::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Accumulates one header-typed row per (commit, variant) transition and
/// serializes the table to a delimited sink.
pub struct ResultRecorder {
    header: Vec<String>,
    rows: Vec<Vec<Cell>>,
    separator: char,
}

impl ResultRecorder {
    /// Recorder with the header shape of `mode`.
    pub fn for_mode(mode: EvalMode) -> Self {
        let header = BASE_COLUMNS
            .iter()
            .copied()
            .chain(mode.columns().iter().copied())
            .map(str::to_string)
            .collect();
        Self {
            header,
            rows: Vec::new(),
            separator: ',',
        }
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn push(&mut self, row: Vec<Cell>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    /// Write the header line followed by every accumulated row.
    pub fn write_to(&self, sink: &mut dyn Write) -> Result<()> {
        writeln!(sink, "{}", self.header.join(&self.separator.to_string()))?;
        for row in &self.rows {
            let line: Vec<String> = row.iter().map(Cell::to_string).collect();
            writeln!(sink, "{}", line.join(&self.separator.to_string()))?;
        }
        sink.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timing_cells_use_three_decimals() {
        assert_eq!(Cell::Time(1.0).to_string(), "1.000");
        assert_eq!(Cell::Time(0.12345).to_string(), "0.123");
        assert_eq!(Cell::seconds(Duration::from_millis(2500)).to_string(), "2.500");
    }

    #[test]
    fn text_cells_render_verbatim() {
        assert_eq!(Cell::Text("v1|v2".to_string()).to_string(), "v1|v2");
        assert_eq!(Cell::Index(7).to_string(), "7");
    }

    #[test]
    fn check_mode_header() {
        let recorder = ResultRecorder::for_mode(EvalMode::Check);
        assert_eq!(
            recorder.header(),
            &[
                "Index",
                "Commit",
                "Variant",
                "config_t",
                "check_t",
                "affected",
                "gt_equal",
                "gt_changed",
                "gt_build_fail",
                "notes"
            ]
        );
    }

    #[test]
    fn ground_truth_header_is_timing_only() {
        let recorder = ResultRecorder::for_mode(EvalMode::GroundTruth);
        assert_eq!(
            recorder.header(),
            &["Index", "Commit", "Variant", "config_t", "build_t"]
        );
    }

    #[test]
    fn serializes_delimited_table() {
        let mut recorder = ResultRecorder::for_mode(EvalMode::GroundTruth);
        recorder.push(vec![
            Cell::Index(0),
            Cell::from("abc123"),
            Cell::from("00e1ab2c"),
            Cell::Time(0.5),
            Cell::Time(12.3456),
        ]);

        let mut buf = Vec::new();
        recorder.write_to(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), "Index,Commit,Variant,config_t,build_t");
        assert_eq!(lines.next().unwrap(), "0,abc123,00e1ab2c,0.500,12.346");
        assert!(lines.next().is_none());
    }

    #[test]
    fn short_failure_rows_serialize() {
        let mut recorder = ResultRecorder::for_mode(EvalMode::Check);
        recorder.push(vec![
            Cell::Index(3),
            Cell::from("abc123"),
            Cell::from("00e1ab2c"),
            Cell::Time(0.0),
            Cell::from("build of abc123 failed"),
        ]);

        let mut buf = Vec::new();
        recorder.write_to(&mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("build of abc123 failed"));
    }
}
