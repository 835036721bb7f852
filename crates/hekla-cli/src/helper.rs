use std::borrow::Cow::{self, Owned};

use rustyline::completion::{Completer, Pair};
use rustyline::highlight::{CmdKind, Highlighter};
use rustyline::hint::{Hinter, HistoryHinter};
use rustyline::validate::{ValidationContext, ValidationResult, Validator};
use rustyline::{Context, Helper, Result};

use crate::theme;

// ---------------------------------------------------------------------------
// Pattern language word lists
// ---------------------------------------------------------------------------

const KEYWORDS: &[&str] = &[
    "struct", "union", "enum", "bitfield", "using", "fn", "return", "namespace", "if", "else",
    "while", "for", "break", "continue", "in", "out", "be", "le", "parent", "this", "section",
    "sizeof", "addressof", "true", "false",
];

const TYPES: &[&str] = &[
    "u8", "s8", "u16", "s16", "u32", "s32", "u64", "s64", "u128", "s128", "float", "double",
    "char", "char16", "bool", "str", "padding", "auto",
];

const ATTRIBUTES: &[&str] = &[
    "color", "name", "comment", "hidden", "highlight", "format", "transform", "editor_export",
];

const DOT_COMMANDS: &[&str] =
    &[".help", ".data", ".open", ".endian", ".sections", ".console", ".quit", ".exit"];

// ---------------------------------------------------------------------------
// PatHelper
// ---------------------------------------------------------------------------

pub struct PatHelper {
    hinter: HistoryHinter,
}

impl PatHelper {
    pub fn new() -> Self {
        PatHelper { hinter: HistoryHinter::new() }
    }
}

// ---------------------------------------------------------------------------
// Highlighter — regex-free token scan
// ---------------------------------------------------------------------------

impl Highlighter for PatHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        use theme::*;
        if line.trim_start().starts_with('.') {
            return Owned(format!("{DOT_CMD}{line}{R}"));
        }

        let mut out = String::with_capacity(line.len() + 128);
        let bytes = line.as_bytes();
        let len = bytes.len();
        let mut i = 0;

        while i < len {
            let b = bytes[i];

            // Line comment swallows the rest.
            if b == b'/' && i + 1 < len && bytes[i + 1] == b'/' {
                out.push_str(COMMENT);
                out.push_str(&line[i..]);
                out.push_str(R);
                break;
            }

            // String and char literals.
            if b == b'"' || b == b'\'' {
                let quote = b;
                let start = i;
                i += 1;
                while i < len {
                    if bytes[i] == b'\\' {
                        i += 2;
                        continue;
                    }
                    if bytes[i] == quote {
                        i += 1;
                        break;
                    }
                    i += 1;
                }
                out.push_str(STR);
                out.push_str(&line[start..i.min(len)]);
                out.push_str(R);
                continue;
            }

            // Numeric literal (decimal, hex, octal, binary, separators).
            if b.is_ascii_digit() {
                let start = i;
                while i < len
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'\'' || bytes[i] == b'.')
                {
                    i += 1;
                }
                out.push_str(NUM);
                out.push_str(&line[start..i]);
                out.push_str(R);
                continue;
            }

            // Word: keyword, type, attribute or identifier.
            if b.is_ascii_alphabetic() || b == b'_' {
                let start = i;
                while i < len && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                let word = &line[start..i];
                if TYPES.contains(&word) {
                    out.push_str(TYPE);
                    out.push_str(word);
                    out.push_str(R);
                } else if KEYWORDS.contains(&word) {
                    out.push_str(BOLD);
                    out.push_str(KW);
                    out.push_str(word);
                    out.push_str(R);
                } else {
                    out.push_str(word);
                }
                continue;
            }

            // Placement and cursor markers stand out.
            if b == b'@' || b == b'$' {
                out.push_str(theme::BOLD);
                out.push_str(OP);
                out.push(b as char);
                out.push_str(R);
                i += 1;
                continue;
            }

            out.push(b as char);
            i += 1;
        }

        Owned(out)
    }

    fn highlight_prompt<'b, 's: 'b, 'p: 'b>(
        &'s self,
        _prompt: &'p str,
        default: bool,
    ) -> Cow<'b, str> {
        if default {
            Owned(format!("{}{}▸{} ", theme::BOLD, theme::PROMPT, theme::R))
        } else {
            Owned(format!("{}  ...  {} ", theme::PROMPT_CONT, theme::R))
        }
    }

    fn highlight_hint<'h>(&self, hint: &'h str) -> Cow<'h, str> {
        Owned(format!("{}{hint}{}", theme::HINT, theme::R))
    }

    fn highlight_char(&self, _line: &str, _pos: usize, kind: CmdKind) -> bool {
        kind != CmdKind::MoveCursor
    }
}

// ---------------------------------------------------------------------------
// Completer
// ---------------------------------------------------------------------------

impl Completer for PatHelper {
    type Candidate = Pair;

    fn complete(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Result<(usize, Vec<Pair>)> {
        let before = &line[..pos];

        // File path completion after `.data` / `.open`.
        let trimmed = before.trim_start();
        if trimmed.starts_with(".data ") || trimmed.starts_with(".open ") {
            let word_start = before.rfind(char::is_whitespace).map(|i| i + 1).unwrap_or(0);
            let prefix = &before[word_start..];
            let mut candidates = Vec::new();
            for entry in std::fs::read_dir(".").into_iter().flatten().flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with(prefix) {
                    candidates.push(Pair { display: name.clone(), replacement: name });
                }
            }
            return Ok((word_start, candidates));
        }

        // Dot command completion at line start.
        if trimmed.starts_with('.') && !trimmed.contains(char::is_whitespace) {
            let dot_start = before.rfind('.').unwrap_or(0);
            let prefix = &before[dot_start..];
            let candidates = DOT_COMMANDS
                .iter()
                .filter(|cmd| cmd.starts_with(prefix))
                .map(|cmd| Pair { display: cmd.to_string(), replacement: cmd.to_string() })
                .collect();
            return Ok((dot_start, candidates));
        }

        // Otherwise: keywords, types, attribute names.
        let word_start = before
            .rfind(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .map(|i| i + 1)
            .unwrap_or(0);
        let prefix = &before[word_start..];
        if prefix.is_empty() {
            return Ok((word_start, Vec::new()));
        }

        let mut candidates = Vec::new();
        for list in [TYPES, KEYWORDS, ATTRIBUTES] {
            for word in list {
                if word.starts_with(prefix) {
                    candidates.push(Pair { display: word.to_string(), replacement: word.to_string() });
                }
            }
        }
        Ok((word_start, candidates))
    }
}

// ---------------------------------------------------------------------------
// Hinter — delegates to HistoryHinter
// ---------------------------------------------------------------------------

impl Hinter for PatHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, ctx: &Context<'_>) -> Option<String> {
        self.hinter.hint(line, pos, ctx)
    }
}

// ---------------------------------------------------------------------------
// Validator — multi-line pattern accumulation
// ---------------------------------------------------------------------------

impl Validator for PatHelper {
    fn validate(&self, ctx: &mut ValidationContext) -> Result<ValidationResult> {
        let input = ctx.input();
        let trimmed = input.trim();

        if trimmed.is_empty() || trimmed.starts_with('.') {
            return Ok(ValidationResult::Valid(None));
        }

        // Count brace/paren/bracket depth outside literals and comments.
        let mut depth: i32 = 0;
        let mut chars = trimmed.chars().peekable();
        let mut in_string = false;
        let mut in_char = false;
        while let Some(c) = chars.next() {
            if in_string {
                match c {
                    '\\' => {
                        chars.next();
                    }
                    '"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            if in_char {
                match c {
                    '\\' => {
                        chars.next();
                    }
                    '\'' => in_char = false,
                    _ => {}
                }
                continue;
            }
            match c {
                '"' => in_string = true,
                '\'' => in_char = true,
                '/' if chars.peek() == Some(&'/') => {
                    for c in chars.by_ref() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                '{' | '(' | '[' => depth += 1,
                '}' | ')' | ']' => depth -= 1,
                _ => {}
            }
        }
        if depth > 0 {
            return Ok(ValidationResult::Incomplete);
        }

        // A program ends with ';' (or a closing brace followed by ';').
        if !trimmed.ends_with(';') && !trimmed.ends_with('}') {
            return Ok(ValidationResult::Incomplete);
        }

        Ok(ValidationResult::Valid(None))
    }
}

impl Helper for PatHelper {}
