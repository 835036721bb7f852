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

// Runtime facade: the single entry point of the pattern language. A
// constructed `Runtime` owns its task manager, data source and settings;
// tests can instantiate isolated runtimes side by side.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use hekla::pattern::{DecodedValue, Pattern, PatternArena, PatternId};
use hekla::source::{DataSource, MemorySource};
use hekla::task::{TaskError, TaskHandle, TaskManager};
use hekla::Endian;
use tracing::debug;

use crate::eval::{self, EvalOptions, Evaluated, Limits, Section};
use crate::preprocessor::{PragmaHandler, Preprocessor};
use crate::value::Value;
use crate::{lexer, parser, Diagnostic, ErrorKind, Level, Result};

/// Which evaluator guard `set_limit` adjusts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    MaxPatterns,
    MaxRecursion,
}

/// The finished product of one evaluation: the pattern tree plus everything
/// that accumulated around it. Structure is immutable; value caches and
/// lazily resolved display hooks mutate on demand.
pub struct PatternRun {
    out: Evaluated,
    source: Arc<dyn DataSource>,
    pragmas: HashMap<String, Vec<String>>,
    base_address: u64,
    options: EvalOptions,
}

impl std::fmt::Debug for PatternRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternRun").field("base_address", &self.base_address).finish_non_exhaustive()
    }
}

impl PatternRun {
    pub fn arena(&self) -> &PatternArena {
        &self.out.arena
    }

    pub fn pattern(&self, id: PatternId) -> &Pattern {
        self.out.arena.get(id)
    }

    /// Root patterns over the primary data source.
    pub fn roots(&self) -> &[PatternId] {
        &self.out.roots
    }

    /// Named sections materialized by the run (ids start at 1; id 0 is the
    /// primary data source).
    pub fn sections(&self) -> &[Section] {
        &self.out.sections
    }

    pub fn console(&self) -> &[(Level, String)] {
        &self.out.console
    }

    pub fn out_vars(&self) -> &[(String, Value)] {
        &self.out.out_vars
    }

    /// Pragma side-channel: tag → values in source order.
    pub fn pragmas(&self) -> &HashMap<String, Vec<String>> {
        &self.pragmas
    }

    /// Logical base address, as overridden by `#pragma base_address`.
    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    fn source_of(&self, id: PatternId) -> &dyn DataSource {
        let section = self.pattern(id).section;
        if section == 0 {
            self.source.as_ref()
        } else {
            self.out.sections[section as usize - 1].data.as_ref()
        }
    }

    /// Decode the raw value of a pattern (cached after the first read).
    pub fn decode(&self, id: PatternId) -> Result<DecodedValue> {
        self.out.arena.decode(id, self.source_of(id)).map_err(Diagnostic::from)
    }

    /// Extract every named field of a bitfield pattern.
    pub fn bitfield_fields(&self, id: PatternId) -> Result<Vec<(String, u128)>> {
        let hekla::pattern::PatternKind::Bitfield { ref fields, .. } = self.pattern(id).kind
        else {
            return Ok(Vec::new());
        };
        let fields = fields.clone();
        let mut out = Vec::with_capacity(fields.len());
        for field in &fields {
            let value = self
                .out
                .arena
                .bitfield_field(id, field, self.source_of(id))
                .map_err(Diagnostic::from)?;
            out.push((field.name.clone(), value));
        }
        Ok(out)
    }

    /// Display string of a pattern, running its `transform` and `format`
    /// hooks on first demand.
    pub fn render(&mut self, id: PatternId) -> Result<String> {
        let decoded = self.decode(id)?;
        let transform = self.pattern(id).transform_fn.clone();
        let format = self.pattern(id).format_fn.clone();
        if transform.is_none() && format.is_none() {
            return Ok(decoded.to_string());
        }

        let mut value = match decoded {
            DecodedValue::Unsigned(v) => Value::Unsigned(v),
            DecodedValue::Signed(v) => Value::Signed(v),
            DecodedValue::Float(v) => Value::Float(v),
            DecodedValue::Bool(v) => Value::Bool(v),
            DecodedValue::Char(v) => Value::Char(v),
            DecodedValue::String(v) => Value::Str(v),
            DecodedValue::Enum(v, _) => Value::Unsigned(v),
            DecodedValue::None => Value::Pattern(id),
        };
        let source = Arc::clone(&self.source);
        if let Some(name) = transform {
            value = eval::invoke_function(
                &mut self.out,
                source.as_ref(),
                &self.options,
                &name,
                Some(id),
                vec![value],
            )?;
        }
        if let Some(name) = format {
            value = eval::invoke_function(
                &mut self.out,
                source.as_ref(),
                &self.options,
                &name,
                Some(id),
                vec![value],
            )?;
        }
        Ok(value.to_string())
    }
}

/// Handle to an evaluation job submitted through the task manager.
pub struct RunHandle {
    handle: TaskHandle,
    slot: Arc<Mutex<Option<Result<PatternRun>>>>,
}

impl RunHandle {
    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    pub fn interrupt(&self) {
        self.handle.interrupt();
    }

    pub fn progress(&self) -> u32 {
        self.handle.progress()
    }

    pub fn task(&self) -> &TaskHandle {
        &self.handle
    }

    /// Block until the job finishes and take its result. A job dropped
    /// during shutdown reports `Interrupted`.
    pub fn wait(self) -> Result<PatternRun> {
        self.handle.wait();
        let result = self.slot.lock().expect("result slot poisoned").take();
        result.unwrap_or_else(|| Err(Diagnostic::interrupted()))
    }
}

/// Public surface of the pattern language: submit source text, receive a
/// pattern tree or a diagnostic.
pub struct Runtime {
    tasks: TaskManager,
    source: Arc<dyn DataSource>,
    default_endian: Endian,
    limits: Limits,
    include_paths: Vec<PathBuf>,
    pragma_handlers: Arc<Mutex<HashMap<String, PragmaHandler>>>,
    last_handle: Mutex<Option<TaskHandle>>,
}

impl Runtime {
    pub fn new() -> Self {
        Runtime {
            tasks: TaskManager::new(),
            source: Arc::new(MemorySource::new(Vec::new())),
            default_endian: Endian::Little,
            limits: Limits::default(),
            include_paths: Vec::new(),
            pragma_handlers: Arc::new(Mutex::new(HashMap::new())),
            last_handle: Mutex::new(None),
        }
    }

    pub fn set_data_source(&mut self, source: Arc<dyn DataSource>) {
        self.source = source;
    }

    /// Convenience wrapper for in-memory data.
    pub fn set_data_bytes(&mut self, bytes: Vec<u8>) {
        self.source = Arc::new(MemorySource::new(bytes));
    }

    pub fn set_default_endianness(&mut self, endian: Endian) {
        self.default_endian = endian;
    }

    pub fn set_limit(&mut self, kind: LimitKind, value: usize) {
        match kind {
            LimitKind::MaxPatterns => self.limits.max_patterns = value,
            LimitKind::MaxRecursion => self.limits.max_recursion = value,
        }
    }

    pub fn add_include_path(&mut self, path: impl Into<PathBuf>) {
        self.include_paths.push(path.into());
    }

    pub fn register_pragma_handler(
        &mut self,
        tag: impl Into<String>,
        handler: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) {
        self.pragma_handlers
            .lock()
            .expect("pragma handler lock poisoned")
            .insert(tag.into(), Box::new(handler));
    }

    /// Synchronous evaluation; intended for small scripts and tests.
    pub fn execute(&self, text: &str, in_vars: &HashMap<String, Value>) -> Result<PatternRun> {
        let handlers = self.pragma_handlers.lock().expect("pragma handler lock poisoned");
        run_pipeline(
            text,
            None,
            &self.include_paths,
            &handlers,
            Arc::clone(&self.source),
            self.default_endian,
            self.limits,
            in_vars,
            Arc::new(hekla::task::InterruptFlag::new()),
        )
    }

    /// Read a pattern file and evaluate it; quoted includes resolve against
    /// the file's directory first.
    pub fn execute_file(
        &self,
        path: impl AsRef<Path>,
        in_vars: &HashMap<String, Value>,
    ) -> Result<PatternRun> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            Diagnostic::error(
                ErrorKind::UnknownToken,
                0,
                format!("failed to read '{}': {err}", path.display()),
            )
        })?;
        let handlers = self.pragma_handlers.lock().expect("pragma handler lock poisoned");
        run_pipeline(
            &text,
            path.parent(),
            &self.include_paths,
            &handlers,
            Arc::clone(&self.source),
            self.default_endian,
            self.limits,
            in_vars,
            Arc::new(hekla::task::InterruptFlag::new()),
        )
        .map_err(|diag| diag.in_file(path.display().to_string()))
    }

    /// Enqueue an evaluation job; the handle yields the tree when done.
    pub fn submit(&self, text: impl Into<String>, in_vars: &HashMap<String, Value>) -> RunHandle {
        let text = text.into();
        let in_vars = in_vars.clone();
        let include_paths = self.include_paths.clone();
        let handlers = Arc::clone(&self.pragma_handlers);
        let source = Arc::clone(&self.source);
        let endian = self.default_endian;
        let limits = self.limits;

        let slot: Arc<Mutex<Option<Result<PatternRun>>>> = Arc::new(Mutex::new(None));
        let job_slot = Arc::clone(&slot);

        let handle = self.tasks.submit("pattern evaluation", 0, move |task| {
            let handlers = handlers.lock().expect("pragma handler lock poisoned");
            let result = run_pipeline(
                &text,
                None,
                &include_paths,
                &handlers,
                source,
                endian,
                limits,
                &in_vars,
                task.interrupt_flag(),
            );
            let outcome = match &result {
                Ok(_) => Ok(()),
                Err(diag) if diag.kind == ErrorKind::Interrupted => Err(TaskError::Interrupted),
                Err(diag) => Err(TaskError::Failed(diag.to_string())),
            };
            // A fatal error voids the partial tree; only the diagnostic
            // crosses the job boundary.
            *job_slot.lock().expect("result slot poisoned") = Some(result);
            outcome
        });

        *self.last_handle.lock().expect("handle lock poisoned") = Some(handle.clone());
        RunHandle { handle, slot }
    }

    /// Interrupt the most recently submitted job.
    pub fn abort(&self) {
        if let Some(handle) = &*self.last_handle.lock().expect("handle lock poisoned") {
            handle.interrupt();
        }
    }

    /// The task manager driving submitted jobs, for deferred-call pumping.
    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::too_many_arguments)]
fn run_pipeline(
    text: &str,
    origin: Option<&Path>,
    include_paths: &[PathBuf],
    handlers: &HashMap<String, PragmaHandler>,
    source: Arc<dyn DataSource>,
    mut default_endian: Endian,
    limits: Limits,
    in_vars: &HashMap<String, Value>,
    interrupt: Arc<hekla::task::InterruptFlag>,
) -> Result<PatternRun> {
    let mut preprocessor = Preprocessor::new();
    for path in include_paths {
        preprocessor.add_include_path(path.clone());
    }
    let expanded = preprocessor.process(text, origin, handlers)?;

    // Built-in pragma interpretation; the last occurrence wins.
    if let Some(values) = expanded.pragmas.get("endian") {
        if let Some(value) = values.last() {
            default_endian = match value.as_str() {
                "big" => Endian::Big,
                "little" => Endian::Little,
                other => {
                    return Err(Diagnostic::error(
                        ErrorKind::UnknownToken,
                        0,
                        format!("invalid endian pragma '{other}'"),
                    ))
                }
            };
        }
    }
    let mut base_address = source.base_address();
    if let Some(values) = expanded.pragmas.get("base_address") {
        if let Some(value) = values.last() {
            let parsed = match value.strip_prefix("0x") {
                Some(hex) => u64::from_str_radix(hex, 16),
                None => value.parse(),
            };
            base_address = parsed.map_err(|_| {
                Diagnostic::error(
                    ErrorKind::UnknownToken,
                    0,
                    format!("invalid base_address pragma '{value}'"),
                )
            })?;
        }
    }

    let tokens = lexer::lex(&expanded.text)?;
    let decls = parser::parse(&tokens)?;

    let options = EvalOptions { default_endian, limits };
    debug!(endian = %default_endian, "pipeline ready, evaluating");
    let out = eval::evaluate(&decls, source.as_ref(), &options, in_vars, interrupt)?;

    Ok(PatternRun { out, source, pragmas: expanded.pragmas, base_address, options })
}
