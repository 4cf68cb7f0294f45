//! Command-line configuration and the output-sink abstraction that lets the
//! same `print` native feed immediate stdout, a FIFO buffer flushed at exit,
//! or nowhere at all (used while the prelude loads).

use std::collections::VecDeque;
use std::io::Write;
use std::path::PathBuf;

use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "loon",
    about = "A small dynamically-typed, class-based scripting language."
)]
pub struct Cli {
    /// Disassemble each chunk as it is compiled, instead of running it.
    #[structopt(short = "c")]
    pub disassemble: bool,

    /// Log every heap allocation and collection to stderr.
    #[structopt(short = "g")]
    pub trace_gc: bool,

    /// Buffer `print` output and flush it, in order, at exit.
    #[structopt(short = "l")]
    pub buffered_output: bool,

    /// Report unreclaimed bytes still on the heap at exit.
    #[structopt(short = "m")]
    pub report_memory: bool,

    /// Trace every instruction executed, with a stack dump before each.
    #[structopt(short = "x")]
    pub trace_exec: bool,

    /// Script to run. Omit to start a REPL.
    pub path: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct VmConfig {
    pub disassemble: bool,
    pub trace_gc: bool,
    pub trace_exec: bool,
}

impl From<&Cli> for VmConfig {
    fn from(cli: &Cli) -> Self {
        VmConfig {
            disassemble: cli.disassemble,
            trace_gc: cli.trace_gc,
            trace_exec: cli.trace_exec,
        }
    }
}

enum OutputMode {
    Immediate,
    Buffered,
    /// Collects everything written into an in-memory string instead of
    /// touching stdout. Used by integration tests to assert on `print`
    /// output without capturing the real process streams.
    Captured(String),
}

/// Where `print` output goes. Swapped to a suppressed state around prelude
/// loading so the standard library's own bookkeeping never leaks onto a
/// user's console.
pub struct OutputSink {
    mode: OutputMode,
    buffer: VecDeque<String>,
    suppressed: bool,
}

impl OutputSink {
    pub fn new() -> Self {
        OutputSink {
            mode: OutputMode::Immediate,
            buffer: VecDeque::new(),
            suppressed: false,
        }
    }

    pub fn set_buffered(&mut self, buffered: bool) {
        self.mode = if buffered {
            OutputMode::Buffered
        } else {
            OutputMode::Immediate
        };
    }

    pub fn suppress(&mut self, yes: bool) {
        self.suppressed = yes;
    }

    /// Switches to capture mode and clears any previously captured text.
    pub fn start_capture(&mut self) {
        self.mode = OutputMode::Captured(String::new());
    }

    /// Returns everything written since the last `start_capture`. Panics if
    /// capture mode was never entered; this is a test-harness helper, not a
    /// general-purpose output mode query.
    pub fn take_captured(&mut self) -> String {
        match &mut self.mode {
            OutputMode::Captured(s) => std::mem::take(s),
            _ => panic!("take_captured called without start_capture"),
        }
    }

    pub fn print(&mut self, s: &str) {
        if self.suppressed {
            return;
        }
        match &mut self.mode {
            OutputMode::Immediate => {
                print!("{}", s);
                let _ = std::io::stdout().flush();
            }
            OutputMode::Buffered => self.buffer.push_back(s.to_string()),
            OutputMode::Captured(buf) => buf.push_str(s),
        }
    }

    /// Flushes any buffered output, in FIFO order. A no-op in immediate mode.
    pub fn flush(&mut self) {
        let mut stdout = std::io::stdout();
        while let Some(s) = self.buffer.pop_front() {
            let _ = write!(stdout, "{}", s);
        }
        let _ = stdout.flush();
    }
}

impl Default for OutputSink {
    fn default() -> Self {
        Self::new()
    }
}
