//! Terminal and JSON output for the CLI
//!
//! Human mode prints leveled status lines (colored on a terminal) and bold
//! section titles. JSON mode serializes command results straight to stdout
//! with nothing wrapped around them, so output can be piped into other
//! tools; diagnostics go to stderr in both modes and carry a
//! machine-readable kind plus an optional hint.

use is_terminal::IsTerminal;
use serde::Serialize;

/// Severity of a status line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Warn,
    Error,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Info => "info",
            Level::Success => "ok",
            Level::Warn => "warning",
            Level::Error => "error",
        }
    }

    fn color(self) -> &'static str {
        match self {
            Level::Info => "\x1b[0;36m",
            Level::Success => "\x1b[0;32m",
            Level::Warn => "\x1b[1;33m",
            Level::Error => "\x1b[0;31m",
        }
    }
}

const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Print a status line; warnings and errors go to stderr
pub fn report(level: Level, msg: &str) {
    match level {
        Level::Warn | Level::Error => {
            let (color, reset) = paint(std::io::stderr().is_terminal(), level.color());
            eprintln!("{}{}:{} {}", color, level.tag(), reset, msg);
        }
        Level::Info | Level::Success => {
            let (color, reset) = paint(std::io::stdout().is_terminal(), level.color());
            println!("{}{}:{} {}", color, level.tag(), reset, msg);
        }
    }
}

fn paint(tty: bool, color: &'static str) -> (&'static str, &'static str) {
    if tty {
        (color, RESET)
    } else {
        ("", "")
    }
}

/// Print a bold section title followed by a blank line
pub fn headline(title: &str) {
    if std::io::stdout().is_terminal() {
        println!("{}{}{}", BOLD, title, RESET);
    } else {
        println!("{}", title);
    }
    println!();
}

/// Serialize a command result straight to stdout
pub fn print_json<T: Serialize>(value: &T, pretty: bool) {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    match rendered {
        Ok(text) => println!("{}", text),
        Err(e) => report(Level::Error, &format!("failed to encode output: {}", e)),
    }
}

/// What went wrong, as the exit code and JSON output see it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    MissingInput,
    InputNotFound,
    FunctionNotFound,
    MalformedFunction,
}

impl DiagnosticKind {
    /// Process exit code used when the failure is fatal
    pub fn exit_code(self) -> i32 {
        match self {
            DiagnosticKind::MissingInput => 2,
            DiagnosticKind::InputNotFound => 3,
            DiagnosticKind::FunctionNotFound => 4,
            DiagnosticKind::MalformedFunction => 5,
        }
    }
}

/// A reportable failure
///
/// Per-function failures are emitted and processing continues with the
/// next function; failures of the whole invocation terminate the process
/// with the kind's exit code.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl Diagnostic {
    pub fn missing_input() -> Self {
        Self {
            kind: DiagnosticKind::MissingInput,
            message: "no module file given".to_string(),
            hint: Some("pass --input <module.json> or set TRACEFORGE_INPUT".to_string()),
        }
    }

    pub fn input_not_found(path: &str) -> Self {
        Self {
            kind: DiagnosticKind::InputNotFound,
            message: format!("module file not found: {}", path),
            hint: None,
        }
    }

    pub fn function_not_found(name: &str) -> Self {
        Self {
            kind: DiagnosticKind::FunctionNotFound,
            message: format!("function `{}` is not in the module", name),
            hint: Some("drop the --function filter to list what the module contains".to_string()),
        }
    }

    pub fn malformed_function(name: &str, detail: &str) -> Self {
        Self {
            kind: DiagnosticKind::MalformedFunction,
            message: format!("function `{}`: {}", name, detail),
            hint: None,
        }
    }

    /// Report on stderr and keep going
    pub fn emit(&self, as_json: bool) {
        if as_json {
            match serde_json::to_string(self) {
                Ok(text) => eprintln!("{}", text),
                Err(_) => eprintln!("{}", self.message),
            }
        } else {
            report(Level::Error, &self.message);
            if let Some(hint) = &self.hint {
                report(Level::Info, hint);
            }
        }
    }

    /// Report on stderr and terminate the process
    pub fn fail(self, as_json: bool) -> ! {
        self.emit(as_json);
        std::process::exit(self.kind.exit_code());
    }
}
