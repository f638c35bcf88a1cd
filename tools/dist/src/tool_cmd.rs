//! Typed builder for toolchain subprocess invocations.
//!
//! A [`Job`] is one run of the compiler, assembler, linker, or the `go`
//! command: a program, its argument vector, a working directory, the
//! variables it needs, and optionally the file it must produce. Children
//! inherit the parent environment plus the job's explicit variables.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Mutex;

use anyhow::{Context, Result, bail};

use crate::shutdown::lock;
use crate::verbose::vprintln;

/// Serializes job output on stdout so concurrent jobs never interleave.
static OUTPUT: Mutex<()> = Mutex::new(());

/// Write `text` to stdout while holding the output lock.
pub fn echo(text: &str) {
    let _guard = lock(&OUTPUT);
    let mut out = std::io::stdout().lock();
    let _ = out.write_all(text.as_bytes());
    let _ = out.flush();
}

/// A job that ran and exited unsuccessfully.
///
/// Carries the combined output. Whoever sees the failure first echoes it
/// and sets `echoed`, so it reaches the terminal exactly once.
#[derive(Debug)]
pub struct JobFailed {
    pub command: String,
    pub status: ExitStatus,
    pub output: String,
    pub echoed: bool,
}

impl JobFailed {
    /// Echo the captured output unless that already happened.
    pub fn echo_output(&mut self) {
        if !self.echoed && !self.output.is_empty() {
            echo(&format!("{}\n", self.output.trim_end()));
        }
        self.echoed = true;
    }
}

impl fmt::Display for JobFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FAILED: {}: {}", self.command, self.status)
    }
}

impl std::error::Error for JobFailed {}

/// What to do with a job's output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputMode {
    /// Capture it and hand it back to the caller.
    Capture,
    /// Capture it and echo it once the job succeeds.
    Show,
    /// Let the child write straight to the terminal.
    Inherit,
}

/// One subprocess invocation.
#[derive(Clone, Debug)]
pub struct Job {
    program: PathBuf,
    args: Vec<OsString>,
    dir: Option<PathBuf>,
    env: Vec<(String, String)>,
    expected: Option<PathBuf>,
    mode: OutputMode,
}

impl Job {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            dir: None,
            env: Vec::new(),
            expected: None,
            mode: OutputMode::Capture,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Run in `dir` instead of the current directory.
    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn envs(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(vars);
        self
    }

    /// Fail the job if a zero exit leaves `path` missing.
    pub fn expect_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.expected = Some(path.into());
        self
    }

    pub fn mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn output_mode(&self) -> OutputMode {
        self.mode
    }

    /// The command line as a single space-separated string.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(OsStr::to_string_lossy)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run to completion.
    ///
    /// Returns the combined stdout and stderr (empty in
    /// [`OutputMode::Inherit`]). A non-zero exit is a [`JobFailed`] error.
    /// Echoing output is left to the caller; see [`echo`].
    pub fn run(&self) -> Result<String> {
        vprintln!(2, "run: {}", self.command_line());

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).envs(self.env.iter().map(|(k, v)| (k, v)));
        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }

        let (status, output) = if self.mode == OutputMode::Inherit {
            let status = cmd
                .status()
                .with_context(|| format!("cannot run {}", self.program.display()))?;
            (status, String::new())
        } else {
            let out = cmd
                .stdin(Stdio::null())
                .output()
                .with_context(|| format!("cannot run {}", self.program.display()))?;
            let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&out.stderr));
            (out.status, combined)
        };

        if !status.success() {
            return Err(JobFailed {
                command: self.command_line(),
                status,
                output,
                echoed: false,
            }
            .into());
        }
        if let Some(path) = &self.expected {
            if !path.exists() {
                bail!("{}: did not produce {}", self.command_line(), path.display());
            }
        }

        vprintln!(3, "run: {} DONE", self.command_line());
        Ok(output)
    }
}
