//! Progress arithmetic and the single-line status display.

use std::io::Write;

/// Parses an `HH:MM:SS.ss` timemark into milliseconds.
///
/// Returns `None` for anything that does not have exactly three fields.
pub fn timemark_to_millis(timemark: &str) -> Option<u64> {
    let mut parts = timemark.trim().split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes >= 60 || !(0.0..60.0).contains(&seconds) {
        return None;
    }
    let whole_ms = (hours * 3600 + minutes * 60) * 1000;
    Some(whole_ms + (seconds * 1000.0).round() as u64)
}

/// Percentage of `reference_ms` reached at `elapsed_ms`, in `[0, 100]`.
///
/// Multi-input operations divide by the input count.
pub fn percent_complete(elapsed_ms: u64, reference_ms: u64, input_count: usize) -> f32 {
    if reference_ms == 0 {
        return 0.0;
    }
    let divisor = input_count.max(1) as f64;
    let percent = elapsed_ms as f64 / reference_ms as f64 * 100.0 / divisor;
    percent.clamp(0.0, 100.0) as f32
}

/// Renders the status line for the given per-job percentages.
pub fn status_line(percents: &[f32]) -> String {
    let cells: Vec<String> = percents
        .iter()
        .map(|p| format!("{}%", p.floor() as u32))
        .collect();
    format!("Processing: {}", cells.join("    "))
}

/// Rewrites one terminal line in place.
pub struct ProgressTracker {
    out: Box<dyn Write + Send>,
    last_len: usize,
    enabled: bool,
}

impl ProgressTracker {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out,
            last_len: 0,
            enabled: true,
        }
    }

    /// Tracker writing to stdout.
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Tracker that renders nothing.
    pub fn disabled() -> Self {
        Self {
            out: Box::new(std::io::sink()),
            last_len: 0,
            enabled: false,
        }
    }

    /// Overwrites the current line with the given percentages.
    pub fn render(&mut self, percents: &[f32]) {
        if !self.enabled {
            return;
        }
        let line = status_line(percents);
        let pad = self.last_len.saturating_sub(line.len());
        // Display output only; a broken terminal must not fail the run
        let _ = write!(self.out, "\r{}{}", line, " ".repeat(pad));
        let _ = self.out.flush();
        self.last_len = line.len();
    }

    /// Ends the status line so later output starts on a fresh line.
    pub fn finish(&mut self) {
        if self.enabled && self.last_len > 0 {
            let _ = writeln!(self.out);
            let _ = self.out.flush();
            self.last_len = 0;
        }
    }
}
