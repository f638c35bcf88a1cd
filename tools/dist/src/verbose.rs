//! Verbosity-gated diagnostics and phase timing.
//!
//! The level is numeric and set once at startup:
//! - **0** (default): phase banners, fatal diagnostics
//! - **1** (`-v`): one line per installed target
//! - **2**: generated files, skipped cross builds, every command line
//! - **3**: file removals and command completion

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Global verbosity level, set once at startup.
static VERBOSITY: AtomicU8 = AtomicU8::new(0);

/// Initialize the verbosity level for the current process.
pub fn init(level: u8) {
    VERBOSITY.store(level, Ordering::Relaxed);
}

/// Returns the current verbosity level.
pub fn level() -> u8 {
    VERBOSITY.load(Ordering::Relaxed)
}

/// Returns `true` if the verbosity level is at least `n`.
pub fn at_least(n: u8) -> bool {
    level() >= n
}

/// Print to stderr when the verbosity level is at least `$lvl`.
///
/// ```ignore
/// vprintln!(2, "generate {}", path.display());
/// ```
macro_rules! vprintln {
    ($lvl:expr, $($arg:tt)*) => {
        if $crate::verbose::at_least($lvl) {
            eprintln!($($arg)*);
        }
    };
}

pub(crate) use vprintln;

/// A single `-v` style argument, folded left-to-right into a level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerboseArg {
    /// `-v` or `--v=true`.
    Increment,
    /// `--v=false`.
    Reset,
    /// `--v=N`.
    Set(u8),
}

/// Parse the value of a `--v=` flag. Accepts `true`, `false`, or a number.
pub fn parse_verbose_arg(s: &str) -> Result<VerboseArg, String> {
    match s {
        "true" => Ok(VerboseArg::Increment),
        "false" => Ok(VerboseArg::Reset),
        n => n
            .parse::<u8>()
            .map(VerboseArg::Set)
            .map_err(|_| format!("invalid count {n:?}")),
    }
}

/// Fold a sequence of verbosity arguments into a level.
pub fn fold(args: &[VerboseArg]) -> u8 {
    args.iter().fold(0u8, |level, arg| match arg {
        VerboseArg::Increment => level.saturating_add(1),
        VerboseArg::Reset => 0,
        VerboseArg::Set(n) => *n,
    })
}

// ---------------------------------------------------------------------------
// Phase timing
// ---------------------------------------------------------------------------

struct TimeLog {
    file: File,
    start: Instant,
}

static TIME_LOG: OnceLock<Option<Mutex<TimeLog>>> = OnceLock::new();

/// Append a `<op> <name>` record to `$GOBUILDTIMELOGFILE`, if set.
///
/// The first record opens the file; later records carry the elapsed time
/// since then.
pub fn timelog(op: &str, name: &str) {
    let log = TIME_LOG.get_or_init(|| {
        let path = std::env::var_os("GOBUILDTIMELOGFILE")?;
        let file = OpenOptions::new().create(true).append(true).open(path).ok()?;
        Some(Mutex::new(TimeLog {
            file,
            start: Instant::now(),
        }))
    });
    let Some(log) = log else { return };
    let Ok(mut log) = log.lock() else { return };

    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let elapsed = log.start.elapsed();
    let _ = writeln!(log.file, "{secs} +{:.1}s {op} {name}", elapsed.as_secs_f64());
}

/// RAII timer that prints elapsed duration on drop at verbosity >= 2.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    /// Begin timing a labeled operation.
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if at_least(2) {
            eprintln!("  {}: {:.1?}", self.label, self.start.elapsed());
        }
    }
}
