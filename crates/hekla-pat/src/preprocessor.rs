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

// Preprocessor: resolves `#include`, `#define` and `#pragma` on the raw
// source text before lexing. Directive lines are replaced by blank lines so
// line numbers of the including file survive; included content is inlined.
// Running the preprocessor on fully expanded output is a fixed point.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::{Diagnostic, ErrorKind, Result};

/// Host pragma handler. Returns true when the pragma was consumed.
pub type PragmaHandler = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Result of preprocessing: the expanded text plus the pragma side-channel.
#[derive(Debug, Default)]
pub struct Preprocessed {
    pub text: String,
    pub pragmas: HashMap<String, Vec<String>>,
}

#[derive(Default)]
pub struct Preprocessor {
    include_paths: Vec<PathBuf>,
}

impl Preprocessor {
    pub fn new() -> Self {
        Preprocessor { include_paths: Vec::new() }
    }

    pub fn add_include_path(&mut self, path: impl Into<PathBuf>) {
        self.include_paths.push(path.into());
    }

    /// Expand `source`. `origin` is the directory quoted includes resolve
    /// against first; `handlers` receive matching pragma values.
    pub fn process(
        &self,
        source: &str,
        origin: Option<&Path>,
        handlers: &HashMap<String, PragmaHandler>,
    ) -> Result<Preprocessed> {
        let mut state = Expansion {
            preprocessor: self,
            handlers,
            defines: Vec::new(),
            pragmas: HashMap::new(),
            include_stack: Vec::new(),
            file_cache: HashMap::new(),
        };
        let mut text = state.expand(source, origin, 1)?;
        substitute_defines(&mut text, &state.defines);
        Ok(Preprocessed { text, pragmas: state.pragmas })
    }
}

struct Expansion<'a> {
    preprocessor: &'a Preprocessor,
    handlers: &'a HashMap<String, PragmaHandler>,
    defines: Vec<(String, String)>,
    pragmas: HashMap<String, Vec<String>>,
    include_stack: Vec<PathBuf>,
    file_cache: HashMap<PathBuf, String>,
}

impl Expansion<'_> {
    fn expand(&mut self, source: &str, origin: Option<&Path>, base_line: u32) -> Result<String> {
        let mut out = String::with_capacity(source.len());
        for (idx, line) in source.lines().enumerate() {
            let line_no = base_line + idx as u32;
            let trimmed = line.trim_start();
            if let Some(directive) = trimmed.strip_prefix('#') {
                self.directive(directive, origin, line_no, &mut out)?;
                // Keep the line count of the enclosing file stable.
                out.push('\n');
            } else {
                out.push_str(line);
                out.push('\n');
            }
        }
        Ok(out)
    }

    fn directive(
        &mut self,
        directive: &str,
        origin: Option<&Path>,
        line: u32,
        out: &mut String,
    ) -> Result<()> {
        let directive = directive.trim();
        if let Some(rest) = directive.strip_prefix("include") {
            self.include(rest.trim(), origin, line, out)
        } else if let Some(rest) = directive.strip_prefix("define") {
            self.define(rest.trim(), line)
        } else if let Some(rest) = directive.strip_prefix("pragma") {
            self.pragma(rest.trim(), line)
        } else {
            Err(Diagnostic::error(
                ErrorKind::UnknownToken,
                line,
                format!("unknown preprocessor directive '#{directive}'"),
            ))
        }
    }

    fn include(
        &mut self,
        spec: &str,
        origin: Option<&Path>,
        line: u32,
        out: &mut String,
    ) -> Result<()> {
        let (name, local) = if spec.starts_with('"') && spec.ends_with('"') && spec.len() >= 2 {
            (&spec[1..spec.len() - 1], true)
        } else if spec.starts_with('<') && spec.ends_with('>') && spec.len() >= 2 {
            (&spec[1..spec.len() - 1], false)
        } else {
            return Err(Diagnostic::error(
                ErrorKind::UnknownToken,
                line,
                format!("malformed include '{spec}'"),
            ));
        };

        let path = self.resolve(name, if local { origin } else { None }).ok_or_else(|| {
            Diagnostic::error(ErrorKind::UnknownToken, line, format!("include '{name}' not found"))
        })?;

        let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
        if self.include_stack.contains(&canonical) {
            return Err(Diagnostic::error(
                ErrorKind::CyclicInclude,
                line,
                format!("cyclic include of '{name}'"),
            ));
        }

        let content = match self.file_cache.get(&canonical) {
            Some(cached) => cached.clone(),
            None => {
                let content = std::fs::read_to_string(&path).map_err(|err| {
                    Diagnostic::error(
                        ErrorKind::UnknownToken,
                        line,
                        format!("failed to read include '{name}': {err}"),
                    )
                })?;
                self.file_cache.insert(canonical.clone(), content.clone());
                content
            }
        };

        self.include_stack.push(canonical);
        let parent = path.parent().map(|p| p.to_path_buf());
        let expanded = self.expand(&content, parent.as_deref(), 1)?;
        self.include_stack.pop();
        out.push_str(&expanded);
        Ok(())
    }

    fn resolve(&self, name: &str, origin: Option<&Path>) -> Option<PathBuf> {
        if let Some(dir) = origin {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        for dir in &self.preprocessor.include_paths {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    fn define(&mut self, rest: &str, line: u32) -> Result<()> {
        let mut parts = rest.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or("");
        if name.is_empty()
            || !name.chars().next().map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
            || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(Diagnostic::error(
                ErrorKind::UnknownToken,
                line,
                format!("malformed define '{rest}'"),
            ));
        }
        let value = parts.next().unwrap_or("").trim().to_string();
        self.defines.push((name.to_string(), value));
        Ok(())
    }

    fn pragma(&mut self, rest: &str, line: u32) -> Result<()> {
        let mut parts = rest.splitn(2, char::is_whitespace);
        let tag = parts.next().unwrap_or("");
        if tag.is_empty() {
            return Err(Diagnostic::error(ErrorKind::UnknownToken, line, "empty pragma"));
        }
        let value = parts.next().unwrap_or("").trim().to_string();

        if let Some(handler) = self.handlers.get(tag) {
            handler(&value);
        }
        // The side-channel always records the pragma; unknown tags are
        // recorded and otherwise ignored.
        self.pragmas.entry(tag.to_string()).or_default().push(value);
        Ok(())
    }
}

/// Whole-token text substitution: identifiers matching a define are replaced,
/// skipping string literals, character literals and comments. No recursive
/// expansion and no parameterized macros.
fn substitute_defines(text: &mut String, defines: &[(String, String)]) {
    if defines.is_empty() {
        return;
    }
    let map: HashMap<&str, &str> =
        defines.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

    let src = std::mem::take(text);
    let bytes = src.as_bytes();
    let mut out = String::with_capacity(src.len());
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'"' | b'\'' => {
                // Copy the literal verbatim, honoring escapes. The scan is
                // byte-wise but can only stop on ASCII quote bytes, so the
                // final slice stays on char boundaries.
                let quote = b;
                let start = i;
                i += 1;
                while i < bytes.len() {
                    let c = bytes[i];
                    i += 1;
                    if c == b'\\' && i < bytes.len() {
                        i += 1;
                    } else if c == quote {
                        break;
                    }
                }
                out.push_str(&src[start..i]);
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                let end = src[i..].find('\n').map(|p| i + p).unwrap_or(bytes.len());
                out.push_str(&src[i..end]);
                i = end;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let end = src[i + 2..].find("*/").map(|p| i + p + 4).unwrap_or(bytes.len());
                out.push_str(&src[i..end]);
                i = end;
            }
            _ if b.is_ascii_alphabetic() || b == b'_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                let word = &src[start..i];
                match map.get(word) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(word),
                }
            }
            _ => {
                let c = src[i..].chars().next().expect("scan stays on char boundaries");
                out.push(c);
                i += c.len_utf8();
            }
        }
    }
    *text = out;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn process(source: &str) -> Preprocessed {
        Preprocessor::new().process(source, None, &HashMap::new()).unwrap()
    }

    #[test]
    fn defines_substitute_whole_tokens() {
        let result = process("#define SIZE 16\nu8 data[SIZE];\nu8 SIZEX;\n");
        assert!(result.text.contains("data[16]"));
        // SIZEX is a different token and must stay untouched.
        assert!(result.text.contains("SIZEX"));
    }

    #[test]
    fn defines_skip_string_literals() {
        let result = process("#define NAME xs\nstr NAME; // NAME\nchar c[3] @ 0; str s2 = \"NAME\";");
        assert!(result.text.contains("str xs;"));
        assert!(result.text.contains("\"NAME\""));
    }

    #[test]
    fn pragmas_land_in_side_channel() {
        let result = process("#pragma MIME application/x-test\n#pragma MIME image/png\nu8 x @ 0;");
        assert_eq!(
            result.pragmas.get("MIME").unwrap(),
            &vec!["application/x-test".to_string(), "image/png".to_string()]
        );
    }

    #[test]
    fn pragma_handlers_are_invoked() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let hit = Arc::new(AtomicBool::new(false));
        let hit2 = Arc::clone(&hit);
        let mut handlers: HashMap<String, PragmaHandler> = HashMap::new();
        handlers.insert(
            "endian".to_string(),
            Box::new(move |value| {
                assert_eq!(value, "big");
                hit2.store(true, Ordering::SeqCst);
                true
            }),
        );
        Preprocessor::new().process("#pragma endian big\n", None, &handlers).unwrap();
        assert!(hit.load(Ordering::SeqCst));
    }

    #[test]
    fn include_inlines_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let inc = dir.path().join("types.pat");
        std::fs::File::create(&inc).unwrap().write_all(b"using Word = u16;\n").unwrap();

        let mut pre = Preprocessor::new();
        pre.add_include_path(dir.path());
        let result = pre
            .process("#include <types.pat>\n#include <types.pat>\nWord w @ 0;\n", None, &HashMap::new())
            .unwrap();
        assert_eq!(result.text.matches("using Word").count(), 2);
    }

    #[test]
    fn include_cycle_fails() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.pat");
        let b = dir.path().join("b.pat");
        std::fs::write(&a, "#include \"b.pat\"\n").unwrap();
        std::fs::write(&b, "#include \"a.pat\"\n").unwrap();

        let mut pre = Preprocessor::new();
        pre.add_include_path(dir.path());
        let err = pre.process("#include <a.pat>\n", None, &HashMap::new()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CyclicInclude);
    }

    #[test]
    fn missing_include_fails_with_line() {
        let err = process_err("u8 a;\n#include <nope.pat>\n");
        assert_eq!(err.line, 2);
    }

    fn process_err(source: &str) -> Diagnostic {
        Preprocessor::new().process(source, None, &HashMap::new()).unwrap_err()
    }

    #[test]
    fn expansion_is_a_fixed_point() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("t.pat"), "u8 tail @ 4;\n").unwrap();

        let mut pre = Preprocessor::new();
        pre.add_include_path(dir.path());
        let source = "#define N 4\n#include <t.pat>\nu8 head[N] @ 0;\n#pragma endian little\n";
        let once = pre.process(source, None, &HashMap::new()).unwrap();
        let twice = pre.process(&once.text, None, &HashMap::new()).unwrap();
        assert_eq!(once.text, twice.text);
        assert!(twice.pragmas.is_empty());
    }
}
