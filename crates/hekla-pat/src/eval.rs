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

// The evaluator: walks the declaration list, computes expressions and lays
// typed patterns over data-source bytes. All run state lives in the explicit
// `Evaluator` context threaded through every call; the interrupt flag is
// observed at every loop back-edge and every pattern creation.

use std::collections::HashMap;
use std::sync::Arc;

use hekla::pattern::{
    path_color, BitfieldField, DecodedValue, Pattern, PatternArena, PatternId, PatternKind,
    Visibility,
};
use hekla::source::{DataSource, MemorySource};
use hekla::task::InterruptFlag;
use hekla::Endian;
use tracing::debug;

use crate::ast::*;
use crate::token::ValueType;
use crate::value::{self, Value};
use crate::{Diagnostic, ErrorKind, Level, Result};

/// Guards against runaway programs. Exceeding either limit aborts the run
/// with `LimitExceeded`.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_patterns: usize,
    pub max_recursion: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits { max_patterns: 0x10_0000, max_recursion: 64 }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EvalOptions {
    pub default_endian: Endian,
    pub limits: Limits,
}

impl Default for EvalOptions {
    fn default() -> Self {
        EvalOptions { default_endian: Endian::Little, limits: Limits::default() }
    }
}

/// An auxiliary named byte buffer built during evaluation, addressable
/// independently of the primary data source.
pub struct Section {
    pub id: u32,
    pub name: String,
    pub data: Arc<MemorySource>,
    pub roots: Vec<PatternId>,
}

/// Everything a finished run produces.
pub struct Evaluated {
    pub arena: PatternArena,
    /// Root patterns over the primary data source (section 0).
    pub roots: Vec<PatternId>,
    pub sections: Vec<Section>,
    pub console: Vec<(Level, String)>,
    pub out_vars: Vec<(String, Value)>,
    /// Function declarations kept alive for lazy attribute hooks.
    pub functions: HashMap<String, FnDecl>,
}

/// Run a parsed program against a data source.
pub fn evaluate(
    decls: &[Decl],
    source: &dyn DataSource,
    options: &EvalOptions,
    in_vars: &HashMap<String, Value>,
    interrupt: Arc<InterruptFlag>,
) -> Result<Evaluated> {
    let mut ev = Evaluator {
        source,
        options,
        in_vars,
        interrupt,
        arena: PatternArena::new(),
        types: HashMap::new(),
        functions: HashMap::new(),
        scopes: vec![HashMap::new()],
        siblings: Vec::new(),
        construction: Vec::new(),
        cursor: 0,
        cur_section: 0,
        sections: Vec::new(),
        console: Vec::new(),
        out_var_names: Vec::new(),
        recursion: 0,
        this_pattern: None,
    };
    ev.run(decls)
}

enum TypeDef {
    Struct(StructDecl),
    Union(UnionDecl),
    Enum(EnumDecl),
    Bitfield(BitfieldDecl),
    Alias { endian: Option<Endian>, target: TypeRef },
}

/// A user type resolved through its alias chain.
enum Resolved {
    Builtin { vt: ValueType, endian: Option<Endian> },
    Struct { decl: StructDecl, ns: String, endian: Option<Endian> },
    Union { decl: UnionDecl, ns: String, endian: Option<Endian> },
    Enum { decl: EnumDecl, ns: String, endian: Option<Endian> },
    Bitfield { decl: BitfieldDecl, ns: String, endian: Option<Endian> },
}

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

struct Evaluator<'a> {
    source: &'a dyn DataSource,
    options: &'a EvalOptions,
    in_vars: &'a HashMap<String, Value>,
    interrupt: Arc<InterruptFlag>,
    arena: PatternArena,
    /// Qualified type name → (declaring namespace, definition).
    types: HashMap<String, (String, TypeDef)>,
    functions: HashMap<String, FnDecl>,
    /// Value scopes; index 0 is the global scope.
    scopes: Vec<HashMap<String, Value>>,
    /// Already-built members of the compound currently under construction,
    /// innermost last. Array sizes resolve against direct siblings only.
    siblings: Vec<Vec<PatternId>>,
    /// Compound patterns currently being built, innermost last.
    construction: Vec<PatternId>,
    cursor: u64,
    cur_section: u32,
    sections: Vec<Section>,
    console: Vec<(Level, String)>,
    out_var_names: Vec<String>,
    recursion: usize,
    /// Binding for `this` while an attribute hook runs.
    this_pattern: Option<PatternId>,
}

impl<'a> Evaluator<'a> {
    // ------------------------------------------------------------------
    // Driver
    // ------------------------------------------------------------------

    fn run(mut self, decls: &[Decl]) -> Result<Evaluated> {
        debug!(source_size = self.source.size(), "starting evaluation");
        let variables = collect_variables(decls, "");

        // Program inputs bind before anything else so section sizes and
        // placements may reference them.
        for (decl, _) in &variables {
            if decl.in_var {
                let value = self.in_vars.get(&decl.name).cloned().ok_or_else(|| {
                    Diagnostic::error(
                        ErrorKind::UnknownIdentifier,
                        decl.line,
                        format!("no in-variable named '{}' was provided", decl.name),
                    )
                })?;
                self.scopes[0].insert(decl.name.clone(), value);
            } else if decl.out_var {
                self.scopes[0].insert(decl.name.clone(), Value::Unsigned(0));
                self.out_var_names.push(decl.name.clone());
            }
        }

        self.register(decls, "")?;

        let mut roots = Vec::new();
        for (decl, ns) in &variables {
            if decl.in_var || decl.out_var {
                continue;
            }
            self.tick(decl.line)?;
            let placement = decl.placement.as_ref().expect("parser enforces placement");
            let offset = self.eval_u64(placement)?;
            self.cur_section = match &decl.section {
                Some(name) => self.section_id(name, decl.line)?,
                None => 0,
            };
            self.cursor = offset;
            let id = self.create_variable(decl, ns, None)?;
            if self.cur_section == 0 {
                roots.push(id);
            } else {
                let idx = self.cur_section as usize - 1;
                self.sections[idx].roots.push(id);
            }
            self.cur_section = 0;
            self.scopes[0].insert(decl.name.clone(), Value::Pattern(id));
        }

        self.color_roots(&roots);
        let section_roots: Vec<Vec<PatternId>> =
            self.sections.iter().map(|s| s.roots.clone()).collect();
        for roots in &section_roots {
            self.color_roots(roots);
        }

        let mut out_vars = Vec::new();
        for name in std::mem::take(&mut self.out_var_names) {
            if let Some(value) = self.scopes[0].get(&name) {
                out_vars.push((name, value.clone()));
            }
        }

        debug!(patterns = self.arena.len(), "evaluation finished");
        Ok(Evaluated {
            arena: self.arena,
            roots,
            sections: self.sections,
            console: self.console,
            out_vars,
            functions: self.functions,
        })
    }

    /// Register type, function and section declarations, qualifying names
    /// with their namespace chain.
    fn register(&mut self, decls: &[Decl], ns: &str) -> Result<()> {
        for decl in decls {
            match decl {
                Decl::Struct(d) => self.register_type(ns, &d.name, d.line, TypeDef::Struct(d.clone()))?,
                Decl::Union(d) => self.register_type(ns, &d.name, d.line, TypeDef::Union(d.clone()))?,
                Decl::Enum(d) => self.register_type(ns, &d.name, d.line, TypeDef::Enum(d.clone()))?,
                Decl::Bitfield(d) => {
                    self.register_type(ns, &d.name, d.line, TypeDef::Bitfield(d.clone()))?
                }
                Decl::Using(d) => self.register_type(
                    ns,
                    &d.name,
                    d.line,
                    TypeDef::Alias { endian: d.endian, target: d.target.clone() },
                )?,
                Decl::Fn(d) => {
                    let name = qualify(ns, &d.name);
                    self.functions.insert(name, d.clone());
                }
                Decl::Namespace { name, decls, .. } => {
                    let inner = qualify(ns, name);
                    self.register(decls, &inner)?;
                }
                Decl::Section(d) => {
                    let size = self.eval_u64(&d.size)?;
                    let id = self.sections.len() as u32 + 1;
                    self.sections.push(Section {
                        id,
                        name: d.name.clone(),
                        data: Arc::new(MemorySource::writable(vec![0; size as usize])),
                        roots: Vec::new(),
                    });
                }
                Decl::Var(_) => {}
            }
        }
        Ok(())
    }

    fn register_type(&mut self, ns: &str, name: &str, line: u32, def: TypeDef) -> Result<()> {
        let qualified = qualify(ns, name);
        if self.types.contains_key(&qualified) {
            return Err(Diagnostic::error(
                ErrorKind::MalformedDeclaration,
                line,
                format!("type '{qualified}' is defined twice"),
            ));
        }
        self.types.insert(qualified, (ns.to_string(), def));
        Ok(())
    }

    fn section_id(&self, name: &str, line: u32) -> Result<u32> {
        self.sections
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.id)
            .ok_or_else(|| {
                Diagnostic::error(
                    ErrorKind::UnknownIdentifier,
                    line,
                    format!("no section named '{name}'"),
                )
            })
    }

    // ------------------------------------------------------------------
    // Cooperative interruption and guards
    // ------------------------------------------------------------------

    fn tick(&self, line: u32) -> Result<()> {
        if self.interrupt.is_raised() {
            let mut diag = Diagnostic::interrupted();
            diag.line = line;
            return Err(diag);
        }
        Ok(())
    }

    fn enter_recursion(&mut self, line: u32) -> Result<()> {
        self.recursion += 1;
        if self.recursion > self.options.limits.max_recursion {
            return Err(Diagnostic::error(
                ErrorKind::LimitExceeded,
                line,
                format!("recursion limit of {} exceeded", self.options.limits.max_recursion),
            ));
        }
        Ok(())
    }

    fn leave_recursion(&mut self) {
        self.recursion -= 1;
    }

    fn alloc_pattern(&mut self, line: u32, pattern: Pattern) -> Result<PatternId> {
        self.tick(line)?;
        if self.arena.len() >= self.options.limits.max_patterns {
            return Err(Diagnostic::error(
                ErrorKind::LimitExceeded,
                line,
                format!("pattern limit of {} exceeded", self.options.limits.max_patterns),
            ));
        }
        Ok(self.arena.alloc(pattern))
    }

    /// The data source a given section id reads from.
    fn section_source(&self, section: u32) -> &dyn DataSource {
        if section == 0 {
            self.source
        } else {
            self.sections[section as usize - 1].data.as_ref()
        }
    }

    fn check_bounds(&self, offset: u64, size: u64, section: u32, line: u32) -> Result<()> {
        let total = self.section_source(section).size();
        if offset.checked_add(size).map_or(true, |end| end > total) {
            return Err(Diagnostic::error(
                ErrorKind::OutOfBounds,
                line,
                format!("range {offset:#x}+{size:#x} exceeds source size {total:#x}"),
            ));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Type resolution
    // ------------------------------------------------------------------

    /// Resolve a possibly-qualified type name from the given namespace,
    /// walking the enclosing namespace chain outward.
    fn lookup_type(&self, name: &str, ns: &str, line: u32) -> Result<(String, &TypeDef)> {
        let mut prefix = ns;
        loop {
            let candidate = qualify(prefix, name);
            if let Some((decl_ns, def)) = self.types.get(&candidate) {
                return Ok((decl_ns.clone(), def));
            }
            match prefix.rfind("::") {
                Some(pos) => prefix = &prefix[..pos],
                None if !prefix.is_empty() => prefix = "",
                None => {
                    return Err(Diagnostic::error(
                        ErrorKind::UnknownType,
                        line,
                        format!("'{name}' does not name a type"),
                    ))
                }
            }
        }
    }

    /// Follow the alias chain of a type reference down to its definition,
    /// accumulating endian overrides along the way.
    fn resolve_type(&self, ty: &TypeRef, ns: &str, line: u32) -> Result<Resolved> {
        let mut ty = ty.clone();
        let mut ns = ns.to_string();
        let mut endian: Option<Endian> = None;
        for _ in 0..64 {
            let name = match &ty {
                TypeRef::Builtin(vt) => return Ok(Resolved::Builtin { vt: *vt, endian }),
                TypeRef::Named(name) => name.clone(),
            };
            let (decl_ns, def) = self.lookup_type(&name, &ns, line)?;
            match def {
                TypeDef::Struct(d) => {
                    return Ok(Resolved::Struct { decl: d.clone(), ns: decl_ns, endian })
                }
                TypeDef::Union(d) => {
                    return Ok(Resolved::Union { decl: d.clone(), ns: decl_ns, endian })
                }
                TypeDef::Enum(d) => {
                    return Ok(Resolved::Enum { decl: d.clone(), ns: decl_ns, endian })
                }
                TypeDef::Bitfield(d) => {
                    return Ok(Resolved::Bitfield { decl: d.clone(), ns: decl_ns, endian })
                }
                TypeDef::Alias { endian: e, target } => {
                    endian = endian.or(*e);
                    ty = target.clone();
                    ns = decl_ns;
                }
            }
        }
        Err(Diagnostic::error(ErrorKind::CyclicType, line, "cyclic type alias chain"))
    }

    /// Endianness of a declaration: explicit override, then alias-chain
    /// endian, then inherited, then the run default.
    fn resolve_endian(
        &self,
        decl: &VarDecl,
        type_endian: Option<Endian>,
        inherited: Option<Endian>,
    ) -> Endian {
        decl.endian.or(type_endian).or(inherited).unwrap_or(self.options.default_endian)
    }

    // ------------------------------------------------------------------
    // Pattern construction
    // ------------------------------------------------------------------

    /// Build the pattern for one variable declaration at the current cursor.
    /// Advances the cursor past the consumed bytes.
    fn create_variable(
        &mut self,
        decl: &VarDecl,
        ns: &str,
        inherited: Option<Endian>,
    ) -> Result<PatternId> {
        self.tick(decl.line)?;

        let resolved = self.resolve_type(&decl.ty, ns, decl.line)?;

        // `auto` survives parsing as a `using` alias target; any declaration
        // whose alias chain resolves to it cannot be laid over bytes.
        if let Resolved::Builtin { vt: ValueType::Auto, .. } = resolved {
            return Err(Diagnostic::error(
                ErrorKind::TypeMismatch,
                decl.line,
                format!("'{}' resolves to auto and cannot be placed over bytes", decl.ty.display()),
            ));
        }

        // `T *name[N]` is an array of pointers: the array wins, each element
        // keeps the pointer clause.
        if let Some(array) = &decl.array {
            return self.create_sized(decl, ns, inherited, &resolved, array);
        }

        if let Some(width) = decl.pointer_width {
            return self.create_pointer(decl, ns, inherited, width);
        }

        match resolved {
            Resolved::Builtin { vt, endian } => {
                let endian = self.resolve_endian(decl, endian, inherited);
                self.create_builtin(decl, ns, vt, endian)
            }
            Resolved::Struct { decl: sdecl, ns: sns, endian } => {
                let endian = self.resolve_endian(decl, endian, inherited);
                self.create_struct(decl, &sdecl, &sns, endian)
            }
            Resolved::Union { decl: udecl, ns: uns, endian } => {
                let endian = self.resolve_endian(decl, endian, inherited);
                self.create_union(decl, &udecl, &uns, endian)
            }
            Resolved::Enum { decl: edecl, ns: ens, endian } => {
                let endian = self.resolve_endian(decl, endian, inherited);
                self.create_enum(decl, &edecl, &ens, endian)
            }
            Resolved::Bitfield { decl: bdecl, ns: bns, endian } => {
                let endian = self.resolve_endian(decl, endian, inherited);
                self.create_bitfield(decl, &bdecl, &bns, endian)
            }
        }
    }

    fn create_builtin(
        &mut self,
        decl: &VarDecl,
        ns: &str,
        vt: ValueType,
        endian: Endian,
    ) -> Result<PatternId> {
        let kind = match vt {
            ValueType::Padding => {
                // Bare `padding;` consumes a single byte.
                PatternKind::Padding { length: 1 }
            }
            ValueType::Str | ValueType::Auto => {
                return Err(Diagnostic::error(
                    ErrorKind::TypeMismatch,
                    decl.line,
                    format!("'{}' cannot be placed over bytes", vt.name()),
                ))
            }
            ValueType::Bool => PatternKind::Boolean,
            ValueType::Char => PatternKind::Character { width: 1 },
            ValueType::Char16 => PatternKind::Character { width: 2 },
            ValueType::Float => PatternKind::Float { width: 4 },
            ValueType::Double => PatternKind::Float { width: 8 },
            vt if vt.is_unsigned() => PatternKind::Unsigned { width: vt.width().unwrap() },
            vt => PatternKind::Signed { width: vt.width().unwrap() },
        };
        let size = match &kind {
            PatternKind::Padding { length } => *length,
            PatternKind::Unsigned { width }
            | PatternKind::Signed { width }
            | PatternKind::Float { width }
            | PatternKind::Character { width } => *width as u64,
            PatternKind::Boolean => 1,
            _ => unreachable!(),
        };
        let offset = self.cursor;
        let oob = self.bounds_for(&kind, offset, size, decl.line)?;
        let mut pattern = Pattern::new(kind, offset, size, decl.name.clone(), endian);
        pattern.section = self.cur_section;
        pattern.out_of_bounds = oob;
        let id = self.alloc_pattern(decl.line, pattern)?;
        self.apply_attributes(id, decl, ns)?;
        self.cursor = offset + size;
        Ok(id)
    }

    /// Bounds policy: padding past the end is marked, anything else fails.
    fn bounds_for(&self, kind: &PatternKind, offset: u64, size: u64, line: u32) -> Result<bool> {
        match kind {
            PatternKind::Padding { .. } => {
                let total = self.section_source(self.cur_section).size();
                Ok(offset.checked_add(size).map_or(true, |end| end > total))
            }
            _ => {
                self.check_bounds(offset, size, self.cur_section, line)?;
                Ok(false)
            }
        }
    }

    /// Array-typed declarations: padding runs, fused strings, or real arrays.
    fn create_sized(
        &mut self,
        decl: &VarDecl,
        ns: &str,
        inherited: Option<Endian>,
        resolved: &Resolved,
        array: &Expr,
    ) -> Result<PatternId> {
        let count = self.eval_u64(array)?;

        if let Resolved::Builtin { vt: ValueType::Padding, .. } = resolved {
            let offset = self.cursor;
            let kind = PatternKind::Padding { length: count };
            let oob = self.bounds_for(&kind, offset, count, decl.line)?;
            let endian = self.resolve_endian(decl, None, inherited);
            let mut pattern = Pattern::new(kind, offset, count, decl.name.clone(), endian);
            pattern.section = self.cur_section;
            pattern.out_of_bounds = oob;
            let id = self.alloc_pattern(decl.line, pattern)?;
            self.cursor = offset + count;
            return Ok(id);
        }

        // An array of s8 (through any alias chain) is a string; an array of
        // char is a character array.
        if let Resolved::Builtin { vt: ValueType::S8, endian } = resolved {
            if count > 1 && decl.pointer_width.is_none() {
                let endian = self.resolve_endian(decl, *endian, inherited);
                let offset = self.cursor;
                self.check_bounds(offset, count, self.cur_section, decl.line)?;
                let mut pattern = Pattern::new(
                    PatternKind::String { length: count },
                    offset,
                    count,
                    decl.name.clone(),
                    endian,
                );
                pattern.section = self.cur_section;
                let id = self.alloc_pattern(decl.line, pattern)?;
                self.apply_attributes(id, decl, ns)?;
                self.cursor = offset + count;
                return Ok(id);
            }
        }

        self.create_array(decl, ns, inherited, count)
    }

    fn create_array(
        &mut self,
        decl: &VarDecl,
        ns: &str,
        inherited: Option<Endian>,
        count: u64,
    ) -> Result<PatternId> {
        let offset = self.cursor;
        let endian = self.resolve_endian(decl, None, inherited);
        let mut header = Pattern::new(
            PatternKind::Array { children: Vec::new(), stride: 0 },
            offset,
            0,
            decl.name.clone(),
            endian,
        );
        header.section = self.cur_section;
        let id = self.alloc_pattern(decl.line, header)?;

        // Elements reuse the declaration with the array clause stripped.
        let mut element_decl = decl.clone();
        element_decl.array = None;
        element_decl.attributes = Vec::new();

        self.construction.push(id);
        let mut children = Vec::new();
        let mut stride = 0u64;
        let result = (|| -> Result<()> {
            for index in 0..count {
                self.tick(decl.line)?;
                element_decl.name = format!("[{index}]");
                self.cursor = offset + index * stride;
                let child = self.create_variable(&element_decl, ns, Some(endian))?;
                self.arena.get_mut(child).parent = Some(id);
                if index == 0 {
                    stride = self.arena.get(child).size;
                }
                children.push(child);
            }
            Ok(())
        })();
        self.construction.pop();
        result?;

        let total = stride * count;
        let pattern = self.arena.get_mut(id);
        pattern.size = total;
        pattern.kind = PatternKind::Array { children, stride };
        self.apply_attributes(id, decl, ns)?;
        self.cursor = offset + total;
        Ok(id)
    }

    fn create_struct(
        &mut self,
        decl: &VarDecl,
        sdecl: &StructDecl,
        sns: &str,
        endian: Endian,
    ) -> Result<PatternId> {
        self.enter_recursion(decl.line)?;
        let offset = self.cursor;
        let mut header = Pattern::new(
            PatternKind::Struct { type_name: sdecl.name.clone(), children: Vec::new() },
            offset,
            0,
            decl.name.clone(),
            endian,
        );
        header.section = self.cur_section;
        let id = self.alloc_pattern(decl.line, header)?;

        let members = self.inherited_members(sdecl, sns, decl.line)?;

        self.construction.push(id);
        self.siblings.push(Vec::new());
        let result = (|| -> Result<Vec<PatternId>> {
            let mut children = Vec::new();
            for member in &members {
                self.tick(member.line)?;
                let child = self.create_variable(member, sns, Some(endian))?;
                self.arena.get_mut(child).parent = Some(id);
                children.push(child);
                self.siblings.last_mut().expect("sibling scope").push(child);
            }
            Ok(children)
        })();
        self.siblings.pop();
        self.construction.pop();
        self.leave_recursion();
        let children = result?;

        let size = self.cursor - offset;
        let pattern = self.arena.get_mut(id);
        pattern.size = size;
        pattern.kind = PatternKind::Struct { type_name: sdecl.name.clone(), children };
        self.apply_attributes(id, decl, sns)?;
        Ok(id)
    }

    /// Member list of a struct with its inheritance chain flattened:
    /// inherited members come first, in base-to-derived order.
    fn inherited_members(&self, sdecl: &StructDecl, sns: &str, line: u32) -> Result<Vec<VarDecl>> {
        let mut chain = vec![sdecl.clone()];
        let mut current = sdecl.clone();
        while let Some(parent_name) = current.parent.clone() {
            if chain.len() > self.options.limits.max_recursion {
                return Err(Diagnostic::error(ErrorKind::CyclicType, line, "cyclic struct inheritance"));
            }
            let parent = match self.resolve_type(&TypeRef::Named(parent_name.clone()), sns, line)? {
                Resolved::Struct { decl, .. } => decl,
                _ => {
                    return Err(Diagnostic::error(
                        ErrorKind::TypeMismatch,
                        line,
                        format!("'{parent_name}' is not a struct and cannot be inherited"),
                    ))
                }
            };
            chain.push(parent.clone());
            current = parent;
        }
        Ok(chain.into_iter().rev().flat_map(|s| s.members).collect())
    }

    fn create_union(
        &mut self,
        decl: &VarDecl,
        udecl: &UnionDecl,
        uns: &str,
        endian: Endian,
    ) -> Result<PatternId> {
        self.enter_recursion(decl.line)?;
        let offset = self.cursor;
        let mut header = Pattern::new(
            PatternKind::Union { type_name: udecl.name.clone(), children: Vec::new() },
            offset,
            0,
            decl.name.clone(),
            endian,
        );
        header.section = self.cur_section;
        let id = self.alloc_pattern(decl.line, header)?;

        self.construction.push(id);
        self.siblings.push(Vec::new());
        let result = (|| -> Result<(Vec<PatternId>, u64)> {
            let mut children = Vec::new();
            let mut size = 0u64;
            for member in &udecl.members {
                self.tick(member.line)?;
                // Every union member starts over at the union base.
                self.cursor = offset;
                let child = self.create_variable(member, uns, Some(endian))?;
                self.arena.get_mut(child).parent = Some(id);
                size = size.max(self.arena.get(child).size);
                children.push(child);
                self.siblings.last_mut().expect("sibling scope").push(child);
            }
            Ok((children, size))
        })();
        self.siblings.pop();
        self.construction.pop();
        self.leave_recursion();
        let (children, size) = result?;

        let pattern = self.arena.get_mut(id);
        pattern.size = size;
        pattern.kind = PatternKind::Union { type_name: udecl.name.clone(), children };
        self.apply_attributes(id, decl, uns)?;
        self.cursor = offset + size;
        Ok(id)
    }

    fn create_enum(
        &mut self,
        decl: &VarDecl,
        edecl: &EnumDecl,
        ens: &str,
        endian: Endian,
    ) -> Result<PatternId> {
        let width = edecl.underlying.width().expect("parser enforces integral underlying type");
        let values = self.enum_values(edecl, width)?;
        let offset = self.cursor;
        let size = width as u64;
        self.check_bounds(offset, size, self.cur_section, decl.line)?;
        let mut pattern = Pattern::new(
            PatternKind::Enum { type_name: edecl.name.clone(), width, values },
            offset,
            size,
            decl.name.clone(),
            endian,
        );
        pattern.section = self.cur_section;
        let id = self.alloc_pattern(decl.line, pattern)?;
        self.apply_attributes(id, decl, ens)?;
        self.cursor = offset + size;
        Ok(id)
    }

    /// Entry values with auto-increment from the previous entry. Keys are
    /// truncated to the underlying type's bit width so negative constants
    /// land in the same value space as the zero-extended raw reads used for
    /// name lookup.
    fn enum_values(&mut self, edecl: &EnumDecl, width: u8) -> Result<Vec<(u128, String)>> {
        let bits = width as u32 * 8;
        let mask = if bits >= 128 { u128::MAX } else { (1u128 << bits) - 1 };
        let mut values = Vec::new();
        let mut next = 0u128;
        for (name, expr) in &edecl.entries {
            let value = match expr {
                Some(expr) => {
                    let v = self.eval_expr(expr)?;
                    match self.deref(v, expr.line)? {
                        Value::Unsigned(v) => v,
                        Value::Signed(v) => v as u128,
                        other => {
                            return Err(Diagnostic::error(
                                ErrorKind::TypeMismatch,
                                expr.line,
                                format!("enum value must be integral, got {}", other.type_name()),
                            ))
                        }
                    }
                }
                None => next,
            } & mask;
            next = value.wrapping_add(1);
            values.push((value, name.clone()));
        }
        Ok(values)
    }

    fn create_bitfield(
        &mut self,
        decl: &VarDecl,
        bdecl: &BitfieldDecl,
        bns: &str,
        endian: Endian,
    ) -> Result<PatternId> {
        let mut fields = Vec::new();
        let mut bit_offset = 0u32;
        for (name, width_expr) in &bdecl.fields {
            self.tick(width_expr.line)?;
            let width = self.eval_u64(width_expr)?;
            if width == 0 || width > 128 {
                return Err(Diagnostic::error(
                    ErrorKind::InvalidOperation,
                    width_expr.line,
                    format!("bitfield field width {width} is out of range"),
                ));
            }
            if !name.is_empty() {
                fields.push(BitfieldField {
                    name: name.clone(),
                    bit_offset,
                    bit_width: width as u32,
                });
            }
            bit_offset += width as u32;
        }

        // Window: whole bytes, rounded up to a power of two below 9 bytes.
        let mut size = (bit_offset as u64 + 7) / 8;
        if size > 0 && size < 9 {
            size = size.next_power_of_two();
        }
        if size > 16 {
            return Err(Diagnostic::error(
                ErrorKind::InvalidOperation,
                decl.line,
                format!("bitfield '{}' spans more than 128 bits", bdecl.name),
            ));
        }

        let offset = self.cursor;
        self.check_bounds(offset, size, self.cur_section, decl.line)?;
        let mut pattern = Pattern::new(
            PatternKind::Bitfield { type_name: bdecl.name.clone(), fields },
            offset,
            size,
            decl.name.clone(),
            endian,
        );
        pattern.section = self.cur_section;
        let id = self.alloc_pattern(decl.line, pattern)?;
        self.apply_attributes(id, decl, bns)?;
        self.cursor = offset + size;
        Ok(id)
    }

    fn create_pointer(
        &mut self,
        decl: &VarDecl,
        ns: &str,
        inherited: Option<Endian>,
        width: ValueType,
    ) -> Result<PatternId> {
        let size = width.width().expect("parser enforces integral pointer size") as u64;
        let offset = self.cursor;
        let endian = self.resolve_endian(decl, None, inherited);
        self.check_bounds(offset, size, self.cur_section, decl.line)?;

        let mut raw = vec![0u8; size as usize];
        self.section_source(self.cur_section)
            .read(offset, &mut raw)
            .map_err(|e| Diagnostic::error(ErrorKind::OutOfBounds, decl.line, e.to_string()))?;
        let target = hekla::endian::read_unsigned(&raw, endian) as u64;

        if target >= self.section_source(self.cur_section).size() {
            return Err(Diagnostic::error(
                ErrorKind::InvalidPointer,
                decl.line,
                format!("pointer target {target:#x} lies outside the data source"),
            ));
        }

        let mut header = Pattern::new(
            // The pointee id is patched below; self-reference marks "unset".
            PatternKind::Pointer { pointee: PatternId(u32::MAX) },
            offset,
            size,
            decl.name.clone(),
            endian,
        );
        header.section = self.cur_section;
        let id = self.alloc_pattern(decl.line, header)?;

        // Build the pointee at the target offset, then restore the cursor to
        // just past the pointer storage.
        self.enter_recursion(decl.line)?;
        let mut pointee_decl = decl.clone();
        pointee_decl.pointer_width = None;
        pointee_decl.array = None;
        pointee_decl.attributes = Vec::new();
        pointee_decl.name = format!("*{}", decl.name);
        self.cursor = target;
        self.construction.push(id);
        let pointee = self.create_variable(&pointee_decl, ns, Some(endian));
        self.construction.pop();
        self.leave_recursion();
        let pointee = pointee?;
        self.arena.get_mut(pointee).parent = Some(id);

        let pattern = self.arena.get_mut(id);
        pattern.kind = PatternKind::Pointer { pointee };
        self.apply_attributes(id, decl, ns)?;
        self.cursor = offset + size;
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    fn apply_attributes(&mut self, id: PatternId, decl: &VarDecl, ns: &str) -> Result<()> {
        for attr in &decl.attributes {
            let arg = |this: &mut Self| -> Result<String> {
                let expr = attr.value.as_ref().ok_or_else(|| {
                    Diagnostic::error(
                        ErrorKind::InvalidAttribute,
                        attr.line,
                        format!("attribute '{}' needs a value", attr.name),
                    )
                })?;
                let value = this.eval_expr(expr)?;
                match this.deref(value, attr.line)? {
                    Value::Str(s) => Ok(s),
                    other => Err(Diagnostic::error(
                        ErrorKind::InvalidAttribute,
                        attr.line,
                        format!("attribute '{}' needs a string, got {}", attr.name, other.type_name()),
                    )),
                }
            };

            match attr.name.as_str() {
                "color" => {
                    let text = arg(self)?;
                    let rgb = u32::from_str_radix(&text, 16).map_err(|_| {
                        Diagnostic::error(
                            ErrorKind::InvalidAttribute,
                            attr.line,
                            format!("'{text}' is not a RRGGBB color"),
                        )
                    })?;
                    self.arena.get_mut(id).color = 0xC000_0000 | (rgb & 0x00FF_FFFF);
                }
                "name" => {
                    let text = arg(self)?;
                    self.arena.get_mut(id).name = text;
                }
                "comment" => {
                    let text = arg(self)?;
                    self.arena.get_mut(id).comment = Some(text);
                }
                "hidden" => self.arena.get_mut(id).visibility = Visibility::Hidden,
                "highlight" => self.arena.get_mut(id).visibility = Visibility::Highlighted,
                "format" | "transform" | "editor_export" => {
                    let name = arg(self)?;
                    let qualified = self.resolve_function(&name, ns, attr.line)?;
                    let pattern = self.arena.get_mut(id);
                    match attr.name.as_str() {
                        "format" => pattern.format_fn = Some(qualified),
                        "transform" => pattern.transform_fn = Some(qualified),
                        _ => pattern.editor_fn = Some(qualified),
                    }
                }
                other => {
                    return Err(Diagnostic::error(
                        ErrorKind::InvalidAttribute,
                        attr.line,
                        format!("unknown attribute '{other}'"),
                    ))
                }
            }
        }
        Ok(())
    }

    fn resolve_function(&self, name: &str, ns: &str, line: u32) -> Result<String> {
        let mut prefix = ns;
        loop {
            let candidate = qualify(prefix, name);
            if self.functions.contains_key(&candidate) {
                return Ok(candidate);
            }
            match prefix.rfind("::") {
                Some(pos) => prefix = &prefix[..pos],
                None if !prefix.is_empty() => prefix = "",
                None => {
                    return Err(Diagnostic::error(
                        ErrorKind::UnknownIdentifier,
                        line,
                        format!("'{name}' does not name a function"),
                    ))
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Colors
    // ------------------------------------------------------------------

    /// Deterministic path colors; array elements inherit the array's color
    /// uniformly.
    fn color_roots(&mut self, roots: &[PatternId]) {
        for &root in roots {
            self.color_pattern(root, None);
        }
    }

    fn color_pattern(&mut self, id: PatternId, inherited: Option<u32>) {
        let color = match (inherited, self.arena.get(id).color) {
            // An explicit [[color]] attribute wins.
            (_, set) if set != 0 => set,
            (Some(color), _) => color,
            (None, _) => path_color(&self.arena.path(id)),
        };
        self.arena.get_mut(id).color = color;

        let children: Vec<PatternId> = self.arena.get(id).kind.children().to_vec();
        let is_array = matches!(self.arena.get(id).kind, PatternKind::Array { .. });
        for child in children {
            self.color_pattern(child, if is_array { Some(color) } else { None });
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn eval_expr(&mut self, expr: &Expr) -> Result<Value> {
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(Value::from(lit.clone())),
            ExprKind::Dollar => Ok(Value::Unsigned(self.cursor as u128)),
            ExprKind::Parent => self
                .construction
                .last()
                .copied()
                .map(Value::Pattern)
                .ok_or_else(|| {
                    Diagnostic::error(
                        ErrorKind::UnknownIdentifier,
                        expr.line,
                        "'parent' is only valid inside a compound type",
                    )
                }),
            ExprKind::This => self
                .this_pattern
                .or_else(|| self.construction.last().copied())
                .map(Value::Pattern)
                .ok_or_else(|| {
                    Diagnostic::error(
                        ErrorKind::UnknownIdentifier,
                        expr.line,
                        "'this' is only valid while a pattern is being built",
                    )
                }),
            ExprKind::Ident(name) => self.lookup_value(name, expr.line),
            ExprKind::Unary { op, operand } => {
                let v = self.eval_expr(operand)?;
                let v = self.deref(v, expr.line)?;
                value::unary(*op, &v, expr.line)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                // Logical && and || short-circuit.
                if matches!(op, BinaryOp::BoolAnd | BinaryOp::BoolOr) {
                    let l = self.eval_expr(lhs)?;
                    let l = self.deref(l, expr.line)?.truthy(expr.line)?;
                    return match (op, l) {
                        (BinaryOp::BoolAnd, false) => Ok(Value::Bool(false)),
                        (BinaryOp::BoolOr, true) => Ok(Value::Bool(true)),
                        _ => {
                            let r = self.eval_expr(rhs)?;
                            Ok(Value::Bool(self.deref(r, expr.line)?.truthy(expr.line)?))
                        }
                    };
                }
                let l = self.eval_expr(lhs)?;
                let l = self.deref(l, expr.line)?;
                let r = self.eval_expr(rhs)?;
                let r = self.deref(r, expr.line)?;
                value::binary(*op, &l, &r, expr.line)
            }
            ExprKind::Ternary { cond, then_expr, else_expr } => {
                let c = self.eval_expr(cond)?;
                if self.deref(c, expr.line)?.truthy(expr.line)? {
                    self.eval_expr(then_expr)
                } else {
                    self.eval_expr(else_expr)
                }
            }
            ExprKind::Member { base, member } => {
                let base_value = self.eval_expr(base)?;
                self.member_of(base_value, member, expr.line)
            }
            ExprKind::Index { base, index } => {
                let base_value = self.eval_expr(base)?;
                let idx = self.eval_u64(index)?;
                match base_value {
                    Value::Pattern(id) => {
                        let children = self.arena.get(id).kind.children();
                        children.get(idx as usize).copied().map(Value::Pattern).ok_or_else(|| {
                            Diagnostic::error(
                                ErrorKind::OutOfBounds,
                                expr.line,
                                format!("index {idx} is out of range"),
                            )
                        })
                    }
                    other => Err(Diagnostic::error(
                        ErrorKind::TypeMismatch,
                        expr.line,
                        format!("{} cannot be indexed", other.type_name()),
                    )),
                }
            }
            ExprKind::Call { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval_expr(arg)?);
                }
                self.call_function(name, values, expr.line)
            }
            ExprKind::SizeOf(target) => self.eval_sizeof(target, expr.line),
            ExprKind::AddressOf(path) => {
                let v = self.eval_expr(path)?;
                match v {
                    Value::Pattern(id) => Ok(Value::Unsigned(self.arena.get(id).offset as u128)),
                    other => Err(Diagnostic::error(
                        ErrorKind::TypeMismatch,
                        expr.line,
                        format!("addressof needs a pattern, got {}", other.type_name()),
                    )),
                }
            }
        }
    }

    fn eval_sizeof(&mut self, target: &SizeOfTarget, line: u32) -> Result<Value> {
        match target {
            SizeOfTarget::Type(TypeRef::Builtin(vt)) => match vt.width() {
                Some(width) => Ok(Value::Unsigned(width as u128)),
                None => Err(Diagnostic::error(
                    ErrorKind::InvalidOperation,
                    line,
                    format!("'{}' has no fixed size", vt.name()),
                )),
            },
            SizeOfTarget::Type(TypeRef::Named(name)) => self.sizeof_named(name, line),
            SizeOfTarget::Expr(path) => {
                // An identifier may name a type before it names a value.
                if let ExprKind::Ident(name) = &path.kind {
                    if let Ok(size) = self.sizeof_named(name, line) {
                        return Ok(size);
                    }
                }
                let v = self.eval_expr(path)?;
                match v {
                    Value::Pattern(id) => Ok(Value::Unsigned(self.arena.get(id).size as u128)),
                    other => Err(Diagnostic::error(
                        ErrorKind::TypeMismatch,
                        line,
                        format!("sizeof needs a pattern or type, got {}", other.type_name()),
                    )),
                }
            }
        }
    }

    /// sizeof for named types that have a size independent of any byte
    /// layout: enums and aliases of fixed-width builtins.
    fn sizeof_named(&self, name: &str, line: u32) -> Result<Value> {
        match self.resolve_type(&TypeRef::Named(name.to_string()), "", line)? {
            Resolved::Builtin { vt, .. } => match vt.width() {
                Some(width) => Ok(Value::Unsigned(width as u128)),
                None => Err(Diagnostic::error(
                    ErrorKind::InvalidOperation,
                    line,
                    format!("'{}' has no fixed size", vt.name()),
                )),
            },
            Resolved::Enum { decl, .. } => {
                Ok(Value::Unsigned(decl.underlying.width().unwrap_or(0) as u128))
            }
            _ => Err(Diagnostic::error(
                ErrorKind::InvalidOperation,
                line,
                format!("sizeof of compound type '{name}' requires a placed pattern"),
            )),
        }
    }

    /// Identifier resolution: function scopes innermost first, then the
    /// direct siblings of the compound being built, then the global scope,
    /// then qualified enum entries.
    fn lookup_value(&mut self, name: &str, line: u32) -> Result<Value> {
        for scope in self.scopes.iter().rev() {
            if let Some(value) = scope.get(name) {
                return Ok(value.clone());
            }
        }

        if let Some(siblings) = self.siblings.last() {
            for &id in siblings.iter().rev() {
                if self.arena.get(id).name == name {
                    return Ok(Value::Pattern(id));
                }
            }
        }

        // `Enum::Entry` scope-resolved constants.
        if let Some((type_name, entry)) = name.rsplit_once("::") {
            if let Ok(Resolved::Enum { decl, .. }) =
                self.resolve_type(&TypeRef::Named(type_name.to_string()), "", line)
            {
                let width =
                    decl.underlying.width().expect("parser enforces integral underlying type");
                let values = self.enum_values(&decl, width)?;
                if let Some((value, _)) = values.iter().find(|(_, n)| n == entry) {
                    return Ok(Value::Unsigned(*value));
                }
                return Err(Diagnostic::error(
                    ErrorKind::UnknownIdentifier,
                    line,
                    format!("enum '{type_name}' has no entry '{entry}'"),
                ));
            }
        }

        Err(Diagnostic::error(
            ErrorKind::UnknownIdentifier,
            line,
            format!("unknown identifier '{name}'"),
        ))
    }

    fn member_of(&mut self, base: Value, member: &str, line: u32) -> Result<Value> {
        let Value::Pattern(id) = base else {
            return Err(Diagnostic::error(
                ErrorKind::TypeMismatch,
                line,
                format!("{} has no members", base.type_name()),
            ));
        };
        // Bitfield member access extracts the field value directly.
        if let PatternKind::Bitfield { fields, .. } = &self.arena.get(id).kind {
            if let Some(field) = fields.iter().find(|f| f.name == member).cloned() {
                let section = self.arena.get(id).section;
                let value = self
                    .arena
                    .bitfield_field(id, &field, self.section_source(section))
                    .map_err(|e| Diagnostic::error(ErrorKind::OutOfBounds, line, e.to_string()))?;
                return Ok(Value::Unsigned(value));
            }
        }
        // Pointers dereference transparently on member access.
        if let PatternKind::Pointer { pointee } = self.arena.get(id).kind {
            return self.member_of(Value::Pattern(pointee), member, line);
        }
        self.arena.child_by_name(id, member).map(Value::Pattern).ok_or_else(|| {
            Diagnostic::error(
                ErrorKind::UnknownIdentifier,
                line,
                format!("'{}' has no member '{member}'", self.arena.get(id).name),
            )
        })
    }

    /// Evaluate an expression down to a non-negative integer, dereferencing
    /// pattern references along the way.
    fn eval_u64(&mut self, expr: &Expr) -> Result<u64> {
        let value = self.eval_expr(expr)?;
        self.deref(value, expr.line)?.to_u64(expr.line)
    }

    /// Collapse a pattern reference into the value decoded from its bytes.
    fn deref(&mut self, value: Value, line: u32) -> Result<Value> {
        let Value::Pattern(id) = value else { return Ok(value) };
        let section = self.arena.get(id).section;
        let decoded = self
            .arena
            .decode(id, self.section_source(section))
            .map_err(|e| Diagnostic::error(ErrorKind::OutOfBounds, line, e.to_string()))?;
        match decoded {
            DecodedValue::Unsigned(v) => Ok(Value::Unsigned(v)),
            DecodedValue::Signed(v) => Ok(Value::Signed(v)),
            DecodedValue::Float(v) => Ok(Value::Float(v)),
            DecodedValue::Bool(v) => Ok(Value::Bool(v)),
            DecodedValue::Char(v) => Ok(Value::Char(v)),
            DecodedValue::String(v) => Ok(Value::Str(v)),
            DecodedValue::Enum(v, _) => Ok(Value::Unsigned(v)),
            DecodedValue::None => Err(Diagnostic::error(
                ErrorKind::TypeMismatch,
                line,
                format!("'{}' is a compound pattern and has no scalar value", self.arena.get(id).name),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Statements and functions
    // ------------------------------------------------------------------

    fn exec_block(&mut self, stmts: &[Stmt]) -> Result<Flow> {
        for stmt in stmts {
            match self.exec_stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow> {
        match stmt {
            Stmt::Decl(decl) => {
                let value = match &decl.init {
                    Some(expr) => {
                        let v = self.eval_expr(expr)?;
                        self.deref(v, decl.line)?
                    }
                    None => Value::Unsigned(0),
                };
                self.scopes
                    .last_mut()
                    .expect("scope stack is never empty")
                    .insert(decl.name.clone(), value);
                Ok(Flow::Normal)
            }
            Stmt::Assign { target, value, line } => {
                let v = self.eval_expr(value)?;
                let v = self.deref(v, *line)?;
                match target {
                    AssignTarget::Dollar => {
                        self.cursor = v.to_u64(*line)?;
                    }
                    AssignTarget::Ident(name) => {
                        let scope = self
                            .scopes
                            .iter_mut()
                            .rev()
                            .find(|scope| scope.contains_key(name))
                            .ok_or_else(|| {
                                Diagnostic::error(
                                    ErrorKind::UnknownIdentifier,
                                    *line,
                                    format!("assignment to undeclared variable '{name}'"),
                                )
                            })?;
                        scope.insert(name.clone(), v);
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::If { cond, then_body, else_body, line } => {
                let c = self.eval_expr(cond)?;
                if self.deref(c, *line)?.truthy(*line)? {
                    self.exec_block(then_body)
                } else {
                    self.exec_block(else_body)
                }
            }
            Stmt::While { cond, body, line } => {
                loop {
                    self.tick(*line)?;
                    let c = self.eval_expr(cond)?;
                    if !self.deref(c, *line)?.truthy(*line)? {
                        break;
                    }
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                        flow => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For { init, cond, step, body, line } => {
                self.exec_stmt(init)?;
                loop {
                    self.tick(*line)?;
                    let c = self.eval_expr(cond)?;
                    if !self.deref(c, *line)?.truthy(*line)? {
                        break;
                    }
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                        flow => return Ok(flow),
                    }
                    self.exec_stmt(step)?;
                }
                Ok(Flow::Normal)
            }
            Stmt::Return { value, .. } => {
                let v = match value {
                    Some(expr) => {
                        let v = self.eval_expr(expr)?;
                        self.deref(v, expr.line)?
                    }
                    None => Value::Unsigned(0),
                };
                Ok(Flow::Return(v))
            }
            Stmt::Break { .. } => Ok(Flow::Break),
            Stmt::Continue { .. } => Ok(Flow::Continue),
            Stmt::Expr(expr) => {
                self.eval_expr(expr)?;
                Ok(Flow::Normal)
            }
        }
    }

    fn call_function(&mut self, name: &str, args: Vec<Value>, line: u32) -> Result<Value> {
        match name {
            "print" | "warn" => {
                let mut text = String::new();
                for arg in args {
                    let v = self.deref(arg, line)?;
                    text.push_str(&v.to_string());
                }
                let level = if name == "print" { Level::Info } else { Level::Warn };
                self.console.push((level, text));
                return Ok(Value::Unsigned(0));
            }
            "error" => {
                let mut text = String::new();
                for arg in args {
                    let v = self.deref(arg, line)?;
                    text.push_str(&v.to_string());
                }
                self.console.push((Level::Error, text.clone()));
                return Err(Diagnostic::error(ErrorKind::InvalidOperation, line, text));
            }
            "section_copy" => return self.builtin_section_copy(args, line),
            _ => {}
        }

        let qualified = self.resolve_function(name, "", line)?;
        let decl = self.functions.get(&qualified).cloned().expect("resolved above");
        if decl.params.len() != args.len() {
            return Err(Diagnostic::error(
                ErrorKind::TypeMismatch,
                line,
                format!("'{name}' takes {} arguments, got {}", decl.params.len(), args.len()),
            ));
        }

        self.enter_recursion(line)?;
        let mut scope = HashMap::new();
        for (param, arg) in decl.params.iter().zip(args) {
            let value = self.deref(arg, line)?;
            scope.insert(param.name.clone(), value);
        }
        self.scopes.push(scope);
        let result = self.exec_block(&decl.body);
        self.scopes.pop();
        self.leave_recursion();

        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::Unsigned(0)),
        }
    }

    /// `section_copy(name, src_offset, dst_offset, count)` — copy bytes from
    /// the primary data source into a declared section.
    fn builtin_section_copy(&mut self, args: Vec<Value>, line: u32) -> Result<Value> {
        if args.len() != 4 {
            return Err(Diagnostic::error(
                ErrorKind::TypeMismatch,
                line,
                format!("section_copy takes 4 arguments, got {}", args.len()),
            ));
        }
        let name = match self.deref(args[0].clone(), line)? {
            Value::Str(s) => s,
            other => {
                return Err(Diagnostic::error(
                    ErrorKind::TypeMismatch,
                    line,
                    format!("section_copy needs a section name, got {}", other.type_name()),
                ))
            }
        };
        let src = self.deref(args[1].clone(), line)?.to_u64(line)?;
        let dst = self.deref(args[2].clone(), line)?.to_u64(line)?;
        let count = self.deref(args[3].clone(), line)?.to_u64(line)?;

        let id = self.section_id(&name, line)?;
        let mut buf = vec![0u8; count as usize];
        self.source
            .read(src, &mut buf)
            .map_err(|e| Diagnostic::error(ErrorKind::OutOfBounds, line, e.to_string()))?;
        self.sections[id as usize - 1]
            .data
            .write(dst, &buf)
            .map_err(|e| Diagnostic::error(ErrorKind::OutOfBounds, line, e.to_string()))?;
        Ok(Value::Unsigned(count as u128))
    }
}

/// Invoke a language function against a finished run, with `this` bound to a
/// pattern. Used by the facade to resolve attribute hooks at the moment a
/// consumer first demands a display value. Console output of the hook is
/// appended to the run's console log.
pub(crate) fn invoke_function(
    out: &mut Evaluated,
    source: &dyn DataSource,
    options: &EvalOptions,
    name: &str,
    this: Option<PatternId>,
    args: Vec<Value>,
) -> Result<Value> {
    let in_vars = HashMap::new();
    let mut ev = Evaluator {
        source,
        options,
        in_vars: &in_vars,
        interrupt: Arc::new(InterruptFlag::new()),
        arena: std::mem::take(&mut out.arena),
        types: HashMap::new(),
        functions: std::mem::take(&mut out.functions),
        scopes: vec![HashMap::new()],
        siblings: Vec::new(),
        construction: Vec::new(),
        cursor: 0,
        cur_section: 0,
        sections: std::mem::take(&mut out.sections),
        console: Vec::new(),
        out_var_names: Vec::new(),
        recursion: 0,
        this_pattern: this,
    };
    let result = ev.call_function(name, args, 0);
    out.arena = ev.arena;
    out.functions = ev.functions;
    out.sections = ev.sections;
    out.console.extend(ev.console);
    result
}

fn qualify(ns: &str, name: &str) -> String {
    if ns.is_empty() {
        name.to_string()
    } else {
        format!("{ns}::{name}")
    }
}

/// Flatten the program's variable declarations in document order, tagging
/// each with its enclosing namespace.
fn collect_variables<'d>(decls: &'d [Decl], ns: &str) -> Vec<(&'d VarDecl, String)> {
    let mut out = Vec::new();
    for decl in decls {
        match decl {
            Decl::Var(v) => out.push((v, ns.to_string())),
            Decl::Namespace { name, decls, .. } => {
                let inner = qualify(ns, name);
                out.extend(collect_variables(decls, &inner));
            }
            _ => {}
        }
    }
    out
}
