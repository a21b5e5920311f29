//! Scripted process runner for tests.
//!
//! Commands are matched by substring against their rendered command line.
//! Unless told otherwise, ffmpeg invocations "succeed" by creating their
//! last argument as a small file so later stages find real outputs.

use crate::process::{describe, ProcessError, ProcessRunner};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

#[derive(Debug, Clone)]
enum Rule {
    Fail(String),
    Output(String, Vec<u8>),
    Match(String, String),
    Creates(String, PathBuf),
}

#[derive(Debug, Default)]
pub struct FakeRunner {
    rules: Vec<Rule>,
    commands: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every command whose command line contains `pattern`.
    pub fn fail_when(mut self, pattern: &str) -> Self {
        self.rules.push(Rule::Fail(pattern.to_string()));
        self
    }

    /// Answer `capture` calls containing `pattern` with `stdout`.
    pub fn with_output(mut self, pattern: &str, stdout: impl Into<Vec<u8>>) -> Self {
        self.rules.push(Rule::Output(pattern.to_string(), stdout.into()));
        self
    }

    /// Report `line` from `first_matching_line` calls containing `pattern`.
    pub fn with_match(mut self, pattern: &str, line: &str) -> Self {
        self.rules.push(Rule::Match(pattern.to_string(), line.to_string()));
        self
    }

    /// Create `path` (relative to the command's working directory) when a
    /// command containing `pattern` runs.
    pub fn creates(mut self, pattern: &str, path: impl Into<PathBuf>) -> Self {
        self.rules.push(Rule::Creates(pattern.to_string(), path.into()));
        self
    }

    /// Every command line run so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.commands().iter().any(|c| c.contains(pattern))
    }

    fn record(&self, line: &str) {
        self.commands
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(line.to_string());
    }

    fn execute(&self, cmd: &Command) -> Result<String, ProcessError> {
        let line = describe(cmd);
        self.record(&line);

        for rule in &self.rules {
            if let Rule::Fail(pattern) = rule {
                if line.contains(pattern.as_str()) {
                    return Err(ProcessError::Failed {
                        command: line,
                        code: 1,
                        output: "scripted failure".to_string(),
                    });
                }
            }
        }

        let cwd = cmd.get_current_dir().map(Path::to_path_buf);
        for rule in &self.rules {
            if let Rule::Creates(pattern, path) = rule {
                if line.contains(pattern.as_str()) {
                    let target = match &cwd {
                        Some(dir) if path.is_relative() => dir.join(path),
                        _ => path.clone(),
                    };
                    write_placeholder(&target);
                }
            }
        }

        if cmd.get_program() == "ffmpeg" {
            if let Some(last) = cmd.get_args().last() {
                if last != "-" {
                    write_placeholder(Path::new(last));
                }
            }
        }
        Ok(line)
    }
}

fn write_placeholder(path: &Path) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(path, b"fake media");
}

impl ProcessRunner for FakeRunner {
    fn capture(&self, cmd: &mut Command) -> Result<Vec<u8>, ProcessError> {
        let line = self.execute(cmd)?;
        for rule in &self.rules {
            if let Rule::Output(pattern, stdout) = rule {
                if line.contains(pattern.as_str()) {
                    return Ok(stdout.clone());
                }
            }
        }
        Ok(Vec::new())
    }

    fn run_with_progress(
        &self,
        cmd: &mut Command,
        _expected_frames: u64,
        _label: &str,
    ) -> Result<(), ProcessError> {
        self.execute(cmd).map(|_| ())
    }

    fn first_matching_line(
        &self,
        cmd: &mut Command,
        matcher: &mut dyn FnMut(&str) -> bool,
    ) -> Result<Option<String>, ProcessError> {
        let line = self.execute(cmd)?;
        for rule in &self.rules {
            if let Rule::Match(pattern, reported) = rule {
                if line.contains(pattern.as_str()) && matcher(reported) {
                    return Ok(Some(reported.clone()));
                }
            }
        }
        Ok(None)
    }

    fn run_shell(&self, script: &str) -> Result<(), ProcessError> {
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(script);
        self.execute(&cmd).map(|_| ())
    }
}
