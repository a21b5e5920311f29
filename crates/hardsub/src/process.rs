//! External process runner shared by the probing and encoding stages.
//!
//! Every external tool (mkvmerge, ffprobe, ffmpeg, fc-cache, hooks) runs as an
//! independent OS process. Long encodes stream their diagnostic output so the
//! `frame=` counter can drive a progress bar; short probes are captured whole.

use indicatif::{ProgressBar, ProgressStyle};
use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read};
use std::process::{Command, ExitStatus, Stdio};
use thiserror::Error;
use tracing::debug;

/// Token the encoder prints in front of the current frame number
pub const FRAME_TOKEN: &str = "frame=";

/// Number of diagnostic lines kept for error reports
const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// Error type for external process execution
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The program could not be started at all
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The program exited with a non-zero code
    #[error("`{command}` failed with exit code {code}: {output}")]
    Failed {
        command: String,
        code: i32,
        output: String,
    },

    /// The program was killed by a signal
    #[error("`{command}` was terminated by a signal")]
    Terminated { command: String },

    /// Reading the program's output failed
    #[error("IO error while running `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },
}

impl ProcessError {
    /// Exit code of a failed process, if it exited normally
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProcessError::Failed { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Render a command as a single shell-like line for logs and errors
pub fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    for arg in cmd.get_args() {
        let arg = arg.to_string_lossy();
        if arg.is_empty() || arg.contains(char::is_whitespace) {
            parts.push(format!("\"{}\"", arg));
        } else {
            parts.push(arg.into_owned());
        }
    }
    parts.join(" ")
}

/// Seam between the pipeline stages and the operating system.
///
/// [`SystemRunner`] is the real implementation; tests substitute a scripted one.
pub trait ProcessRunner: Send + Sync {
    /// Run to completion and return standard output.
    fn capture(&self, cmd: &mut Command) -> Result<Vec<u8>, ProcessError>;

    /// Run a long encode, feeding `frame=` markers into a progress bar scaled
    /// against `expected_frames` (0 when unknown).
    fn run_with_progress(
        &self,
        cmd: &mut Command,
        expected_frames: u64,
        label: &str,
    ) -> Result<(), ProcessError>;

    /// Stream the diagnostic output until `matcher` accepts a line, then kill
    /// the process. Returns `None` when the process ends without a match.
    fn first_matching_line(
        &self,
        cmd: &mut Command,
        matcher: &mut dyn FnMut(&str) -> bool,
    ) -> Result<Option<String>, ProcessError>;

    /// Run a user-supplied command line through `bash -c`.
    fn run_shell(&self, script: &str) -> Result<(), ProcessError>;
}

/// Extracts a monotonically increasing frame count from encoder diagnostics.
///
/// Handles both `frame=123` and `frame= 123` (number as the following word).
#[derive(Debug, Default, Clone)]
pub struct FrameCounter {
    awaiting_number: bool,
    current: u64,
}

impl FrameCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one whitespace-separated word. Returns the new count when it advanced.
    pub fn observe(&mut self, word: &str) -> Option<u64> {
        if self.awaiting_number {
            self.awaiting_number = false;
            if let Ok(frame) = word.parse::<u64>() {
                return self.advance(frame);
            }
        }

        let rest = word.strip_prefix(FRAME_TOKEN)?;
        if rest.is_empty() {
            self.awaiting_number = true;
            return None;
        }
        rest.parse::<u64>().ok().and_then(|frame| self.advance(frame))
    }

    /// Feed a whole diagnostic line.
    pub fn observe_line(&mut self, line: &str) -> Option<u64> {
        let mut latest = None;
        for word in line.split_whitespace() {
            if let Some(frame) = self.observe(word) {
                latest = Some(frame);
            }
        }
        latest
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    fn advance(&mut self, frame: u64) -> Option<u64> {
        if frame > self.current {
            self.current = frame;
            Some(frame)
        } else {
            None
        }
    }
}

/// Call `on_record` for every line of `reader`, treating `\r` as a line break
/// too (the encoder rewrites its stats line in place).
pub fn read_records<R: Read>(reader: R, mut on_record: impl FnMut(&str)) -> io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut record = Vec::new();
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            break;
        }
        let len = buf.len();
        for &byte in buf {
            if byte == b'\n' || byte == b'\r' {
                if !record.is_empty() {
                    on_record(&String::from_utf8_lossy(&record));
                    record.clear();
                }
            } else {
                record.push(byte);
            }
        }
        reader.consume(len);
    }
    if !record.is_empty() {
        on_record(&String::from_utf8_lossy(&record));
    }
    Ok(())
}

/// Bounded buffer of the most recent diagnostic lines
#[derive(Debug, Default)]
struct DiagnosticTail {
    lines: VecDeque<String>,
}

impl DiagnosticTail {
    fn push(&mut self, line: &str) {
        // stats lines are noise in an error report
        if line.trim_start().starts_with(FRAME_TOKEN) {
            return;
        }
        if self.lines.len() == DIAGNOSTIC_TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    fn render(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

fn check_status(command: String, status: ExitStatus, output: String) -> Result<(), ProcessError> {
    if status.success() {
        return Ok(());
    }
    match status.code() {
        Some(code) => Err(ProcessError::Failed {
            command,
            code,
            output,
        }),
        None => Err(ProcessError::Terminated { command }),
    }
}

fn progress_bar(expected_frames: u64, label: &str) -> ProgressBar {
    let bar = if expected_frames > 0 {
        let bar = ProgressBar::new(expected_frames);
        let style = ProgressStyle::with_template(
            "[{elapsed_precise}] {wide_bar} {pos}/{len} frames (eta {eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar
    } else {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("[{elapsed_precise}] {spinner} frame {pos} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(style);
        bar
    };
    bar.set_message(label.to_string());
    bar
}

/// Runs programs as child processes of this one
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn capture(&self, cmd: &mut Command) -> Result<Vec<u8>, ProcessError> {
        let command = describe(cmd);
        debug!(command = %command, "capturing command output");

        let output = cmd
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ProcessError::Spawn {
                command: command.clone(),
                source,
            })?;

        let captured = if output.stderr.is_empty() {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            String::from_utf8_lossy(&output.stderr).trim().to_string()
        };
        check_status(command, output.status, captured)?;
        Ok(output.stdout)
    }

    fn run_with_progress(
        &self,
        cmd: &mut Command,
        expected_frames: u64,
        label: &str,
    ) -> Result<(), ProcessError> {
        let command = describe(cmd);
        debug!(command = %command, expected_frames, "running encoder");

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                command: command.clone(),
                source,
            })?;

        let bar = progress_bar(expected_frames, label);
        let mut counter = FrameCounter::new();
        let mut tail = DiagnosticTail::default();

        if let Some(stderr) = child.stderr.take() {
            let read = read_records(stderr, |line| {
                if let Some(frame) = counter.observe_line(line) {
                    bar.set_position(frame);
                }
                tail.push(line);
            });
            if let Err(source) = read {
                let _ = child.kill();
                let _ = child.wait();
                bar.abandon();
                return Err(ProcessError::Io { command, source });
            }
        }

        let status = child.wait().map_err(|source| ProcessError::Io {
            command: command.clone(),
            source,
        })?;
        bar.finish_and_clear();
        check_status(command, status, tail.render())
    }

    fn first_matching_line(
        &self,
        cmd: &mut Command,
        matcher: &mut dyn FnMut(&str) -> bool,
    ) -> Result<Option<String>, ProcessError> {
        let command = describe(cmd);
        debug!(command = %command, "scanning diagnostic output");

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                command: command.clone(),
                source,
            })?;

        let mut tail = DiagnosticTail::default();
        let mut found = None;

        if let Some(stderr) = child.stderr.take() {
            let mut reader = BufReader::new(stderr);
            let mut raw = Vec::new();
            loop {
                raw.clear();
                let read = reader.read_until(b'\n', &mut raw).map_err(|source| ProcessError::Io {
                    command: command.clone(),
                    source,
                });
                match read {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&raw);
                        let trimmed = line.trim_end();
                        if matcher(trimmed) {
                            found = Some(trimmed.to_string());
                            break;
                        }
                        tail.push(trimmed);
                    }
                    Err(e) => {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(e);
                    }
                }
            }
        }

        if found.is_some() {
            // the answer is in; no need to let the search run to the end
            let _ = child.kill();
            let _ = child.wait();
            return Ok(found);
        }

        let status = child.wait().map_err(|source| ProcessError::Io {
            command: command.clone(),
            source,
        })?;
        check_status(command, status, tail.render())?;
        Ok(None)
    }

    fn run_shell(&self, script: &str) -> Result<(), ProcessError> {
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(script);
        let command = describe(&cmd);
        debug!(command = %command, "running hook");

        let status = cmd
            .stdin(Stdio::null())
            .status()
            .map_err(|source| ProcessError::Spawn {
                command: command.clone(),
                source,
            })?;
        check_status(command, status, String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_frame_counter_joined_token() {
        let mut counter = FrameCounter::new();
        assert_eq!(counter.observe("frame=42"), Some(42));
        assert_eq!(counter.current(), 42);
    }

    #[test]
    fn test_frame_counter_separated_token() {
        let mut counter = FrameCounter::new();
        assert_eq!(counter.observe("frame="), None);
        assert_eq!(counter.observe("117"), Some(117));
    }

    #[test]
    fn test_frame_counter_ignores_garbage() {
        let mut counter = FrameCounter::new();
        assert_eq!(counter.observe("frame=abc"), None);
        assert_eq!(counter.observe("frame="), None);
        assert_eq!(counter.observe("fps=23.9"), None);
        assert_eq!(counter.observe("12"), None);
        assert_eq!(counter.current(), 0);
    }

    #[test]
    fn test_frame_counter_never_goes_back() {
        let mut counter = FrameCounter::new();
        assert_eq!(counter.observe("frame=500"), Some(500));
        assert_eq!(counter.observe("frame=20"), None);
        assert_eq!(counter.current(), 500);
    }

    #[test]
    fn test_frame_counter_stats_line() {
        let mut counter = FrameCounter::new();
        let line = "frame=  351 fps= 87 q=28.0 size=    1024kB time=00:00:14.62 bitrate= 573.6kbits/s speed=3.64x";
        assert_eq!(counter.observe_line(line), Some(351));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_frame_counter_is_monotonic(frames in proptest::collection::vec(0u64..100_000, 1..50)) {
            let mut counter = FrameCounter::new();
            let mut last = 0;
            for frame in &frames {
                let word = format!("frame={}", frame);
                counter.observe(&word);
                prop_assert!(counter.current() >= last);
                last = counter.current();
            }
            prop_assert_eq!(counter.current(), frames.iter().copied().max().unwrap_or(0));
        }
    }

    #[test]
    fn test_read_records_splits_on_carriage_return() {
        let input = b"first\rsecond\nthird\r\nfourth".to_vec();
        let mut records = Vec::new();
        read_records(&input[..], |r| records.push(r.to_string())).unwrap();
        assert_eq!(records, vec!["first", "second", "third", "fourth"]);
    }

    #[test]
    fn test_describe_quotes_arguments_with_spaces() {
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-i", "my file.mkv", "-dump_attachment:t", ""]);
        assert_eq!(describe(&cmd), "ffmpeg -i \"my file.mkv\" -dump_attachment:t \"\"");
    }

    #[test]
    fn test_diagnostic_tail_is_bounded_and_skips_stats() {
        let mut tail = DiagnosticTail::default();
        for i in 0..50 {
            tail.push(&format!("line {}", i));
        }
        tail.push("frame=  12 fps=3");
        assert_eq!(tail.lines.len(), DIAGNOSTIC_TAIL_LINES);
        assert_eq!(tail.lines.front().map(String::as_str), Some("line 30"));
        assert!(!tail.render().contains("frame="));
    }

    #[cfg(unix)]
    #[test]
    fn test_capture_surfaces_exit_code() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo broken >&2; exit 3"]);
        let err = SystemRunner.capture(&mut cmd).unwrap_err();
        assert_eq!(err.exit_code(), Some(3));
        assert!(err.to_string().contains("broken"));
    }

    #[cfg(unix)]
    #[test]
    fn test_capture_returns_stdout() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "printf hello"]);
        assert_eq!(SystemRunner.capture(&mut cmd).unwrap(), b"hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_with_progress_drains_then_checks_exit() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "printf 'frame=1\\rframe= 2\\n' >&2; exit 1"]);
        let err = SystemRunner.run_with_progress(&mut cmd, 2, "test").unwrap_err();
        assert_eq!(err.exit_code(), Some(1));
    }

    #[cfg(unix)]
    #[test]
    fn test_first_matching_line_kills_after_match() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo noise >&2; echo 'pblack:99 t:5.13' >&2; sleep 30"]);
        let start = std::time::Instant::now();
        let line = SystemRunner
            .first_matching_line(&mut cmd, &mut |l| l.contains("pblack"))
            .unwrap();
        assert_eq!(line.as_deref(), Some("pblack:99 t:5.13"));
        assert!(start.elapsed() < std::time::Duration::from_secs(20));
    }
}
