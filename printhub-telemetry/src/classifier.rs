//! Per-printer state machine and event classification.
//!
//! ```text
//! Disconnected -> Connected -> {Idle, Printing, Paused, Error} -> Disconnected
//! ```
//!
//! Vendor error codes are never translated: the code space is not stable
//! across firmware versions, so errors travel through verbatim.

use crate::config::EventThresholds;
use crate::snapshot::{NormalizedSnapshot, Temperatures, VendorError};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrinterState {
    Disconnected,
    Connected,
    Idle,
    Printing,
    Paused,
    Error,
}

/// What the latest merged readings say about the current job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Idle,
    Printing,
    Paused,
    Finished,
    Failed,
    Unknown,
}

impl JobPhase {
    pub fn from_vendor_state(state: &str) -> Self {
        match state.trim().to_ascii_uppercase().as_str() {
            "RUNNING" | "PREPARE" | "SLICING" | "PRINTING" => Self::Printing,
            "PAUSE" | "PAUSED" => Self::Paused,
            "FINISH" | "FINISHED" | "COMPLETED" => Self::Finished,
            "FAILED" | "FAILURE" => Self::Failed,
            "IDLE" => Self::Idle,
            _ => Self::Unknown,
        }
    }

    /// Vendor state first; without one, a named job below 100% is printing.
    ///
    /// A retained 100% only finishes a job when the current message reports
    /// it; a freshly reported `RUNNING` next to a retained 100% is a new job.
    pub fn derive(inputs: &PhaseInputs<'_>) -> Self {
        let at_end = inputs.progress.is_some_and(|p| p >= 100.0);
        let finished_now = at_end && inputs.progress_fresh;
        match inputs.vendor_state.map(Self::from_vendor_state) {
            Some(Self::Printing) if finished_now => Self::Finished,
            Some(Self::Printing) if at_end && !inputs.vendor_state_fresh => Self::Unknown,
            Some(phase) if phase != Self::Unknown => phase,
            _ => {
                let has_job = inputs.job_name.is_some() || inputs.filename.is_some();
                match inputs.progress {
                    Some(_) if has_job && finished_now => Self::Finished,
                    Some(_) if has_job && at_end => Self::Unknown,
                    Some(_) if has_job => Self::Printing,
                    _ => Self::Unknown,
                }
            }
        }
    }
}

/// Merged readings behind a phase decision. The `*_fresh` flags mark values
/// carried by the current message rather than retained from earlier ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseInputs<'a> {
    pub vendor_state: Option<&'a str>,
    pub vendor_state_fresh: bool,
    pub job_name: Option<&'a str>,
    pub filename: Option<&'a str>,
    pub progress: Option<f64>,
    pub progress_fresh: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emit {
    ProgressUpdate,
    PrintCompleted,
    PrintFailed,
    Error,
}

#[derive(Debug, Clone)]
struct ProgressMark {
    at: OffsetDateTime,
    percentage: Option<f64>,
    temperatures: Temperatures,
}

#[derive(Debug, Clone)]
pub struct Classifier {
    state: PrinterState,
    active_error: Option<VendorError>,
    /// Printing or Paused while a job is running, kept through `Error` and
    /// disconnects so the job can still complete or fail.
    job: Option<PrinterState>,
    last_progress: Option<ProgressMark>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    pub fn new() -> Self {
        Self {
            state: PrinterState::Disconnected,
            active_error: None,
            job: None,
            last_progress: None,
        }
    }

    pub fn state(&self) -> PrinterState {
        self.state
    }

    pub fn job_active(&self) -> bool {
        self.job.is_some()
    }

    /// Returns true when the printer was disconnected (a connect event is due).
    pub fn connect(&mut self) -> bool {
        if self.state != PrinterState::Disconnected {
            return false;
        }
        self.state = PrinterState::Connected;
        self.last_progress = None;
        true
    }

    /// Returns true when the printer was connected (a disconnect event is due).
    pub fn disconnect(&mut self) -> bool {
        if self.state == PrinterState::Disconnected {
            return false;
        }
        self.state = PrinterState::Disconnected;
        self.active_error = None;
        true
    }

    /// Advances the job with one message worth of readings, emitting job-end events.
    fn track_job(&mut self, phase: JobPhase, emits: &mut Vec<Emit>) {
        match phase {
            JobPhase::Printing => self.job = Some(PrinterState::Printing),
            JobPhase::Paused => self.job = Some(PrinterState::Paused),
            JobPhase::Finished => {
                if self.job.take().is_some() {
                    emits.push(Emit::PrintCompleted);
                }
            }
            JobPhase::Failed => {
                if self.job.take().is_some() {
                    emits.push(Emit::PrintFailed);
                }
            }
            JobPhase::Idle => self.job = None,
            JobPhase::Unknown => {}
        }
    }

    /// Advances the state machine with one message worth of readings.
    pub fn observe(&mut self, phase: JobPhase, error: Option<&VendorError>) -> Vec<Emit> {
        let prev = self.state;
        let resuming = prev == PrinterState::Error && self.job.is_some();
        let mut emits = Vec::new();

        if let Some(err) = error {
            let repeated = self.active_error.as_ref() == Some(err) && prev == PrinterState::Error;
            self.active_error = Some(err.clone());
            self.state = PrinterState::Error;
            let mut job_end = Vec::new();
            self.track_job(phase, &mut job_end);
            if !repeated && !job_end.contains(&Emit::PrintFailed) {
                emits.push(Emit::Error);
            }
            emits.extend(job_end);
            return emits;
        }
        self.active_error = None;

        self.track_job(phase, &mut emits);
        self.state = match phase {
            JobPhase::Printing => {
                if prev != PrinterState::Printing && !resuming {
                    emits.push(Emit::ProgressUpdate);
                }
                PrinterState::Printing
            }
            JobPhase::Paused => PrinterState::Paused,
            JobPhase::Finished | JobPhase::Idle => PrinterState::Idle,
            JobPhase::Failed => PrinterState::Error,
            // Error cleared without a recognizable job phase.
            JobPhase::Unknown if prev == PrinterState::Error => self.job.unwrap_or(PrinterState::Idle),
            JobPhase::Unknown => prev,
        };
        emits
    }

    /// Whether an in-job update is significant enough to report.
    pub fn progress_due(
        &self,
        previous: Option<&NormalizedSnapshot>,
        current: &NormalizedSnapshot,
        thresholds: &EventThresholds,
    ) -> bool {
        if previous.is_some_and(|p| p.same_readings(current)) {
            return false;
        }
        let Some(mark) = &self.last_progress else {
            return true;
        };

        let progress_moved = match (mark.percentage, current.progress.percentage) {
            (Some(a), Some(b)) => (b - a).abs() >= thresholds.min_progress_delta,
            (None, None) => false,
            _ => true,
        };
        let temperature_moved =
            mark.temperatures.max_delta(&current.temperatures) >= thresholds.min_temperature_delta;
        let interval_elapsed = current.timestamp - mark.at >= thresholds.min_interval();

        progress_moved || temperature_moved || interval_elapsed
    }

    pub fn record_progress(&mut self, snapshot: &NormalizedSnapshot) {
        self.last_progress = Some(ProgressMark {
            at: snapshot.timestamp,
            percentage: snapshot.progress.percentage,
            temperatures: snapshot.temperatures.clone(),
        });
    }
}
