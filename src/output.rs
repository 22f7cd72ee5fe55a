// ABOUTME: Output formatting for CLI feedback, including live remote output echo.
// ABOUTME: Supports normal, quiet (CI), and JSON output modes.

use parking_lot::Mutex;
use serde::Serialize;
use std::io::Write;
use std::time::Instant;

use crate::pipeline::PipelineObserver;
use crate::ssh::OutputObserver;

/// Output mode for CLI feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-friendly output with progress messages
    Normal,
    /// Minimal output for CI (only final result)
    Quiet,
    /// JSON lines for scripting
    Json,
}

/// Handles CLI output based on the configured mode.
pub struct Output {
    mode: OutputMode,
    start_time: Option<Instant>,
}

impl Output {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            start_time: None,
        }
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Start timing an operation.
    pub fn start_timer(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// Get elapsed time since timer started.
    pub fn elapsed_secs(&self) -> f64 {
        self.start_time
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn duration(&self) -> Option<f64> {
        self.start_time.map(|_| self.elapsed_secs())
    }

    /// Print a progress message (suppressed in quiet mode, an event in json mode).
    pub fn progress(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => println!("{message}"),
            OutputMode::Quiet => {}
            OutputMode::Json => self.emit("progress", message, None),
        }
    }

    /// Print a non-fatal warning.
    pub fn warning(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => eprintln!("Warning: {message}"),
            OutputMode::Json => self.emit_err("warning", message),
        }
    }

    /// Print a success message with optional timing.
    pub fn success(&self, message: &str) {
        match self.mode {
            OutputMode::Normal => {
                let elapsed = self.elapsed_secs();
                if elapsed > 0.0 {
                    println!("{message} ({:.1}s)", elapsed);
                } else {
                    println!("{message}");
                }
            }
            OutputMode::Quiet => {
                // Print only the essential result
                println!("{message}");
            }
            OutputMode::Json => self.emit("success", message, None),
        }
    }

    /// Print an error message.
    pub fn error(&self, message: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => {
                eprintln!("Error: {message}");
            }
            OutputMode::Json => self.emit_err("error", message),
        }
    }

    fn emit(&self, event: &str, message: &str, step: Option<&str>) {
        let event = JsonEvent {
            event,
            message,
            step,
            duration_secs: self.duration(),
        };
        if let Ok(json) = serde_json::to_string(&event) {
            println!("{json}");
        }
    }

    fn emit_err(&self, event: &str, message: &str) {
        let event = JsonEvent {
            event,
            message,
            step: None,
            duration_secs: self.duration(),
        };
        if let Ok(json) = serde_json::to_string(&event) {
            eprintln!("{json}");
        }
    }
}

impl PipelineObserver for Output {
    fn step_started(&self, step: &str) {
        match self.mode {
            OutputMode::Normal => println!("  → {step}"),
            OutputMode::Quiet => {}
            OutputMode::Json => self.emit("step_started", step, Some(step)),
        }
    }

    fn step_failed(&self, step: &str, error: &str) {
        match self.mode {
            OutputMode::Normal | OutputMode::Quiet => eprintln!("  ✗ {step}: {error}"),
            OutputMode::Json => self.emit_err("step_failed", &format!("{step}: {error}")),
        }
    }

    fn rollback_started(&self, step: &str) {
        match self.mode {
            OutputMode::Normal => println!("  ↺ rolling back {step}"),
            OutputMode::Quiet => {}
            OutputMode::Json => self.emit("rollback_started", step, Some(step)),
        }
    }
}

/// Fans pipeline events out to several observers.
pub struct Observers<'a>(pub Vec<&'a dyn PipelineObserver>);

impl PipelineObserver for Observers<'_> {
    fn step_started(&self, step: &str) {
        self.0.iter().for_each(|o| o.step_started(step));
    }

    fn step_completed(&self, step: &str) {
        self.0.iter().for_each(|o| o.step_completed(step));
    }

    fn step_failed(&self, step: &str, error: &str) {
        self.0.iter().for_each(|o| o.step_failed(step, error));
    }

    fn rollback_started(&self, step: &str) {
        self.0.iter().for_each(|o| o.rollback_started(step));
    }

    fn rollback_failed(&self, step: &str, reason: &str) {
        self.0.iter().for_each(|o| o.rollback_failed(step, reason));
    }
}

/// Echoes remote output to the terminal line by line behind a prefix.
pub struct ConsoleObserver {
    prefix: String,
    pending: Mutex<Vec<u8>>,
}

impl ConsoleObserver {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Print whatever partial line is still buffered.
    pub fn flush(&self) {
        let mut pending = self.pending.lock();
        if !pending.is_empty() {
            let line = String::from_utf8_lossy(&pending).into_owned();
            pending.clear();
            println!("{} | {}", self.prefix, line);
        }
    }
}

impl OutputObserver for ConsoleObserver {
    fn on_output(&self, chunk: &[u8]) {
        let mut pending = self.pending.lock();
        pending.extend_from_slice(chunk);
        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            println!("{} | {}", self.prefix, text.trim_end_matches('\r'));
        }
    }
}

/// Passes remote output straight through to stdout, for `run` and `logs`.
pub struct PassthroughObserver;

impl OutputObserver for PassthroughObserver {
    fn on_output(&self, chunk: &[u8]) {
        let mut stdout = std::io::stdout().lock();
        // Ignore a closed stdout, e.g. when piped into head.
        let _ = stdout.write_all(chunk).and_then(|_| stdout.flush());
    }
}

#[derive(Serialize)]
struct JsonEvent<'a> {
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_secs: Option<f64>,
}
