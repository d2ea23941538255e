//! Progress state of a background job, as shown by a progress bar.
//!
//! Rules:
//! - `progress` never goes backwards (a current value of 0 can be replaced
//!   by anything valid).
//! - `valuemin` / `valuemax` are set once and never updated afterwards.
//! - `percent` is derived once all three are known. A percent outside
//!   `0..=100` resets progress and bounds, and the percent becomes 0.

use serde::Serialize;

use super::message::ProgressReport;

pub const DEFAULT_TITLE: &str = "Working";
pub const DEFAULT_MESSAGE: &str =
    "Your request is being processed (or about to be processed.)  Please wait.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressState {
    title: String,
    message: Option<String>,
    progress: Option<f64>,
    valuemin: Option<f64>,
    valuemax: Option<f64>,
    percent: Option<u8>,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            message: Some(DEFAULT_MESSAGE.to_string()),
            progress: None,
            valuemin: None,
            valuemax: None,
            percent: None,
        }
    }
}

impl ProgressState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(
        &mut self,
        progress: Option<f64>,
        valuemin: Option<f64>,
        valuemax: Option<f64>,
        message: Option<String>,
    ) {
        if let Some(p) = progress.filter(|p| p.is_finite()) {
            match self.progress {
                Some(current) if current != 0.0 && current >= p => {}
                _ => self.progress = Some(p),
            }
        }
        if self.valuemin.is_none() {
            self.valuemin = valuemin.filter(|v| v.is_finite());
        }
        if self.valuemax.is_none() {
            self.valuemax = valuemax.filter(|v| v.is_finite());
        }
        if let (Some(p), Some(min), Some(max)) = (self.progress, self.valuemin, self.valuemax) {
            let raw = round_half_up(p / (max - min) * 100.0);
            if raw.is_finite() && (0.0..=100.0).contains(&raw) {
                self.percent = Some(raw as u8);
            } else {
                self.progress = None;
                self.valuemin = None;
                self.valuemax = None;
                self.percent = Some(0);
            }
        }
        self.message = message;
    }

    pub fn apply(&mut self, report: &ProgressReport) {
        self.update(
            report.progress,
            report.valuemin,
            report.valuemax,
            report.message.clone(),
        );
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn progress(&self) -> Option<f64> {
        self.progress
    }

    pub fn bounds(&self) -> Option<(f64, f64)> {
        self.valuemin.zip(self.valuemax)
    }

    pub fn percent(&self) -> Option<u8> {
        self.percent
    }

    /// One-line textual bar, e.g. `Working [#####.....]  50% Importing`.
    ///
    /// The bar is only drawn when there is a progress value.
    pub fn render_line(&self) -> String {
        let mut line = self.title.clone();
        if let (Some(percent), Some(_)) = (self.percent, self.progress) {
            let filled = usize::from(percent) / 10;
            line.push_str(&format!(
                " [{}{}] {:>3}%",
                "#".repeat(filled),
                ".".repeat(10 - filled),
                percent
            ));
        }
        if let Some(message) = &self.message {
            line.push(' ');
            line.push_str(message);
        }
        line
    }
}

fn round_half_up(x: f64) -> f64 {
    (x + 0.5).floor()
}
