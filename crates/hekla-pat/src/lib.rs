//   Copyright (c) 2024-2026 Anton Kundenko <singaraiona@gmail.com>
//   All rights reserved.
//
//   Permission is hereby granted, free of charge, to any person obtaining a copy
//   of this software and associated documentation files (the "Software"), to deal
//   in the Software without restriction, including without limitation the rights
//   to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
//   copies of the Software, and to permit persons to whom the Software is
//   furnished to do so, subject to the following conditions:
//
//   The above copyright notice and this permission notice shall be included in all
//   copies or substantial portions of the Software.
//
//   THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
//   IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
//   FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
//   AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
//   LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
//   OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
//   SOFTWARE.

// hekla-pat: the pattern language runtime.
//
// A script declares types, fields, arrays and placements; the evaluator reads
// bytes from a data source and materializes a tree of typed patterns over
// them. Pipeline: preprocessor → lexer → parser → evaluator, driven either
// synchronously or as a job on the core task manager.

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod preprocessor;
pub mod runtime;
pub mod token;
pub mod value;

pub use eval::{EvalOptions, Limits, Section};
pub use runtime::{LimitKind, PatternRun, RunHandle, Runtime};
pub use value::Value;

/// Severity of a diagnostic or console record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Debug => f.write_str("debug"),
            Level::Info => f.write_str("info"),
            Level::Warn => f.write_str("warn"),
            Level::Error => f.write_str("error"),
        }
    }
}

/// What went wrong, across all pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    // Lexer
    UnknownToken,
    InvalidLiteral,
    // Parser
    UnexpectedToken,
    MissingToken,
    MalformedDeclaration,
    // Semantic
    UnknownIdentifier,
    UnknownType,
    TypeMismatch,
    CyclicType,
    CyclicInclude,
    // Runtime
    OutOfBounds,
    DivisionByZero,
    InvalidOperation,
    LimitExceeded,
    InvalidPointer,
    InvalidAttribute,
    // Cooperative cancel
    Interrupted,
    // Bug guard; must not occur in shipping code
    Internal,
}

/// A single diagnostic record. Fatal diagnostics abort the run; `Warn` and
/// below accumulate in the console log.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub level: Level,
    pub line: u32,
    pub column: Option<u32>,
    pub message: String,
    pub source_file: Option<String>,
}

impl Diagnostic {
    pub fn error(kind: ErrorKind, line: u32, message: impl Into<String>) -> Self {
        Diagnostic {
            kind,
            level: Level::Error,
            line,
            column: None,
            message: message.into(),
            source_file: None,
        }
    }

    pub fn interrupted() -> Self {
        Diagnostic::error(ErrorKind::Interrupted, 0, "evaluation interrupted")
    }

    pub fn in_file(mut self, file: impl Into<String>) -> Self {
        self.source_file = Some(file.into());
        self
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(file) = &self.source_file {
            write!(f, "{file}:")?;
        }
        if self.line > 0 {
            write!(f, "{}: ", self.line)?;
        }
        write!(f, "{}: {}", self.level, self.message)
    }
}

impl std::error::Error for Diagnostic {}

impl From<hekla::Error> for Diagnostic {
    fn from(err: hekla::Error) -> Self {
        let kind = match err {
            hekla::Error::OutOfBounds { .. } => ErrorKind::OutOfBounds,
            _ => ErrorKind::Internal,
        };
        Diagnostic::error(kind, 0, err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Diagnostic>;
