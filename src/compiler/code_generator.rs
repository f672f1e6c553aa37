use std::collections::HashSet;
use std::sync::Arc;

use super::bytecode::{Instr, Opcode, FUNCS, MAX_OPERAND};
use super::formal_argument::FormalArgument;
use super::string_table::StringTable;
use super::{CompiledTemplate, RegionType, TemplateCompiler, TemplateOrigin};
use crate::ast::{Args, Chunk, Element, Expr, ExprKind, ExprTag, IfStat, Region, Subtemplate, TemplateRef};
use crate::error::{ErrorManager, ErrorType};
use crate::group::mangled_region_name;
use crate::misc::{line_char_position, Interval};

/// Implicit arguments every anonymous subtemplate declares after its own.
pub const IMPLICIT_SUBTEMPLATE_ARGS: [&str; 2] = ["i", "i0"];

/// Bytecode being emitted for one template body.
pub struct CompilationState {
    template: CompiledTemplate,
    strings: StringTable,
}

impl CompilationState {
    pub fn new(name: &str, args: Option<Vec<FormalArgument>>) -> Self {
        let mut template = CompiledTemplate::new(name);
        template.define_formal_arguments(args);
        Self {
            template,
            strings: StringTable::new(),
        }
    }

    pub fn address(&self) -> usize {
        self.template.code.len()
    }

    pub fn define_string(&mut self, s: &str) -> usize {
        self.strings.allocate(s)
    }

    fn push(&mut self, at: Option<Interval>, instr: Instr) -> usize {
        let addr = self.address();
        self.template.code.push(instr);
        self.template.source_intervals.push(at);
        addr
    }

    pub fn emit(&mut self, at: Option<Interval>, op: Opcode) -> usize {
        self.push(at, Instr::new(op))
    }

    pub fn emit1(&mut self, at: Option<Interval>, op: Opcode, a: usize) -> usize {
        self.push(at, Instr::with1(op, a))
    }

    pub fn emit1_str(&mut self, at: Option<Interval>, op: Opcode, s: &str) -> usize {
        let index = self.define_string(s);
        self.push(at, Instr::with1(op, index))
    }

    pub fn emit2_str(&mut self, at: Option<Interval>, op: Opcode, s: &str, b: usize) -> usize {
        let index = self.define_string(s);
        self.push(at, Instr::with2(op, index, b))
    }

    /// Inserts an instruction at `addr`, moving everything after it down one
    /// slot. Branches into the moved code follow it; a branch to `addr` from
    /// earlier code now lands on the inserted instruction.
    pub fn insert(&mut self, addr: usize, at: Option<Interval>, op: Opcode, s: &str) {
        let index = self.define_string(s);
        for (i, instr) in self.template.code.iter_mut().enumerate() {
            if !instr.op.is_branch() {
                continue;
            }
            let target = instr.a as usize;
            let moved = if i < addr { target > addr } else { target >= addr };
            if moved {
                instr.a += 1;
            }
        }
        self.template.code.insert(addr, Instr::with1(op, index));
        self.template.source_intervals.insert(addr, at);
    }

    /// Points the branch at `addr` to `target`.
    pub fn patch(&mut self, addr: usize, target: usize) {
        if let Some(instr) = self.template.code.get_mut(addr) {
            instr.a = target as u16;
        }
    }

    fn formal_index(&self, name: &str) -> Option<usize> {
        self.template.formal_argument(name).map(|a| a.index)
    }
}

/// Walks a parsed body and emits its bytecode, string pool and source map.
pub struct CodeGenerator<'c, 'g> {
    compiler: &'c TemplateCompiler<'g>,
    outermost_name: String,
    prefix: String,
    template: &'c str,
    origin: &'c TemplateOrigin,
    errors: ErrorManager,
    implicit: Vec<Arc<CompiledTemplate>>,
    regions: HashSet<String>,
}

impl<'c, 'g> CodeGenerator<'c, 'g> {
    pub fn new(compiler: &'c TemplateCompiler<'g>, name: &str, template: &'c str, origin: &'c TemplateOrigin) -> Self {
        Self {
            errors: compiler.group().error_manager(),
            compiler,
            outermost_name: name.to_string(),
            prefix: crate::misc::get_prefix(name),
            template,
            origin,
            implicit: Vec::new(),
            regions: HashSet::new(),
        }
    }

    /// `None` when the result does not fit the operand range.
    pub fn generate(mut self, chunk: &Chunk, args: Option<Vec<FormalArgument>>) -> Option<CompiledTemplate> {
        let mut state = CompilationState::new(&self.outermost_name, args);
        self.chunk(&mut state, chunk);
        let mut code = self.seal(state)?;
        code.implicit_templates = std::mem::take(&mut self.implicit);
        Some(code)
    }

    fn seal(&self, state: CompilationState) -> Option<CompiledTemplate> {
        let CompilationState { mut template, strings } = state;
        if template.code_size() > MAX_OPERAND || strings.len() > MAX_OPERAND {
            self.errors
                .internal_error(format!("template {} too large to encode", template.name));
            return None;
        }
        template.string_table = strings.into_strings();
        Some(template)
    }

    /// Finishes a subtemplate or region body.
    fn seal_nested(&self, state: CompilationState) -> CompiledTemplate {
        let name = state.template.name.clone();
        let anon = state.template.is_anon_subtemplate;
        let args = state.template.formal_arguments.clone();
        let mut code = self.seal(state).unwrap_or_else(|| {
            let mut blank = CompiledTemplate::new(name);
            blank.formal_arguments = args;
            blank.has_formal_args = anon;
            blank.is_anon_subtemplate = anon;
            blank
        });
        code.prefix = self.prefix.clone();
        code.template = self.template.to_string();
        code.origin = self.origin.clone();
        code.native_group = self.compiler.group().downgrade();
        code
    }

    fn qualify(&self, name: &str) -> String {
        if name.starts_with('/') {
            name.to_string()
        } else {
            format!("{}{}", self.prefix, name)
        }
    }

    fn report(&self, error: ErrorType, at: Interval, args: Vec<String>) {
        let pos = line_char_position(self.template, at.start);
        self.errors.compile_time_error(
            error,
            self.origin.source_name.as_deref(),
            Some(self.origin.locate(pos.line, pos.char_position)),
            args,
        );
    }

    fn chunk(&mut self, st: &mut CompilationState, chunk: &[Element]) {
        for e in chunk {
            self.element(st, e);
        }
    }

    fn element(&mut self, st: &mut CompilationState, e: &Element) {
        match e {
            Element::Text { text, interval } => {
                if !text.is_empty() {
                    st.emit1_str(Some(*interval), Opcode::WriteStr, text);
                }
            }
            Element::Newline { interval } => {
                st.emit(Some(*interval), Opcode::Newline);
            }
            Element::Expr(tag) => self.expr_tag(st, tag),
            Element::If(stat) => self.ifstat(st, stat),
            Element::Region(region) => self.region(st, region),
            Element::Indented {
                indent,
                interval,
                element,
            } => {
                if element.is_compound() {
                    // the indent covers the whole block; added once its extent is known
                    let start = st.address();
                    self.element(st, element);
                    st.insert(start, Some(*interval), Opcode::Indent, indent);
                } else {
                    st.emit1_str(Some(*interval), Opcode::Indent, indent);
                    self.element(st, element);
                }
                st.emit(None, Opcode::Dedent);
            }
        }
    }

    fn expr_tag(&mut self, st: &mut CompilationState, tag: &ExprTag) {
        let at = Some(tag.expr.interval);
        if let (ExprKind::Attr(name), None) = (&tag.expr.kind, &tag.options) {
            if let Some(index) = st.formal_index(name) {
                st.emit1(at, Opcode::WriteLocal, index);
                return;
            }
        }
        self.expr(st, &tag.expr);
        match &tag.options {
            Some(options) => {
                st.emit(Some(tag.interval), Opcode::Options);
                for o in options {
                    self.expr(st, &o.value);
                    match o.option {
                        Some(option) => st.emit1(Some(o.interval), Opcode::StoreOption, option.index()),
                        None => st.emit(Some(o.interval), Opcode::Pop),
                    };
                }
                st.emit(at, Opcode::WriteOpt);
            }
            None => {
                st.emit(at, Opcode::Write);
            }
        }
    }

    fn ifstat(&mut self, st: &mut CompilationState, stat: &IfStat) {
        let mut end_refs = Vec::new();
        let mut prev_branch: Option<usize> = None;
        for (i, branch) in stat.branches.iter().enumerate() {
            if i > 0 {
                end_refs.push(st.emit1(Some(branch.keyword), Opcode::Br, 0));
                if let Some(b) = prev_branch {
                    let here = st.address();
                    st.patch(b, here);
                }
            }
            self.expr(st, &branch.condition);
            prev_branch = Some(st.emit1(Some(branch.keyword), Opcode::Brf, 0));
            self.chunk(st, &branch.body);
        }
        if let Some(body) = &stat.else_branch {
            end_refs.push(st.emit1(stat.else_interval, Opcode::Br, 0));
            if let Some(b) = prev_branch.take() {
                let here = st.address();
                st.patch(b, here);
            }
            self.chunk(st, body);
        }
        let end = st.address();
        if let Some(b) = prev_branch {
            st.patch(b, end);
        }
        for r in end_refs {
            st.patch(r, end);
        }
    }

    fn region(&mut self, st: &mut CompilationState, region: &Region) {
        let mangled = mangled_region_name(&self.outermost_name, &region.name);
        let mut body = CompilationState::new(&mangled, None);
        self.chunk(&mut body, &region.body);
        let mut code = self.seal_nested(body);
        code.is_region = true;
        code.region_def_type = Some(RegionType::Embedded);
        self.regions.insert(mangled.clone());
        self.implicit.push(Arc::new(code));

        st.emit2_str(Some(region.interval), Opcode::New, &mangled, 0);
        st.emit(Some(region.interval), Opcode::Write);
    }

    /// Compiles `{args | body}` as its own template and returns its name.
    fn subtemplate(&mut self, sub: &Subtemplate) -> String {
        let name = self.compiler.next_subtemplate_name();
        let mut args: Vec<FormalArgument> = sub.args.iter().map(FormalArgument::new).collect();
        args.extend(IMPLICIT_SUBTEMPLATE_ARGS.iter().map(|a| FormalArgument::new(*a)));
        let mut body = CompilationState::new(&name, Some(args));
        body.template.is_anon_subtemplate = true;
        self.chunk(&mut body, &sub.body);
        let code = self.seal_nested(body);
        self.implicit.push(Arc::new(code));
        name
    }

    fn ref_attr(&mut self, st: &mut CompilationState, name: &str, at: Interval) {
        if let Some(index) = st.formal_index(name) {
            st.emit1(Some(at), Opcode::LoadLocal, index);
        } else if IMPLICIT_SUBTEMPLATE_ARGS.contains(&name) {
            self.report(ErrorType::RefToImplicitAttributeOutOfScope, at, vec![name.to_string()]);
            st.emit(Some(at), Opcode::Null);
        } else {
            st.emit1_str(Some(at), Opcode::LoadAttr, name);
        }
    }

    fn expr(&mut self, st: &mut CompilationState, e: &Expr) {
        let at = Some(e.interval);
        match &e.kind {
            ExprKind::Attr(name) => self.ref_attr(st, name, e.interval),
            ExprKind::Str(s) => {
                st.emit1_str(at, Opcode::LoadStr, s);
            }
            ExprKind::Bool(true) => {
                st.emit(at, Opcode::True);
            }
            ExprKind::Bool(false) => {
                st.emit(at, Opcode::False);
            }
            ExprKind::List(items) => {
                st.emit(at, Opcode::List);
                for item in items {
                    match item {
                        Some(x) => self.expr(st, x),
                        None => {
                            st.emit(at, Opcode::Null);
                        }
                    }
                    st.emit(at, Opcode::Add);
                }
            }
            ExprKind::Subtemplate(sub) => {
                let name = self.subtemplate(sub);
                st.emit2_str(at, Opcode::New, &name, 0);
            }
            ExprKind::Prop { target, name } => {
                self.expr(st, target);
                st.emit1_str(at, Opcode::LoadProp, name);
            }
            ExprKind::PropInd { target, property } => {
                self.expr(st, target);
                self.expr(st, property);
                st.emit(at, Opcode::LoadPropInd);
            }
            ExprKind::Include { name, args } => {
                let name = self.qualify(name);
                self.include(st, e.interval, &name, args, false);
            }
            ExprKind::IncludeSuper { name, args } => {
                let name = self.qualify(name);
                self.include(st, e.interval, &name, args, true);
            }
            ExprKind::IncludeRegion(name) => {
                let mangled = mangled_region_name(&self.outermost_name, name);
                if self.regions.insert(mangled.clone()) {
                    let mut blank = self.seal_nested(CompilationState::new(&mangled, None));
                    blank.is_region = true;
                    blank.region_def_type = Some(RegionType::Implicit);
                    self.implicit.push(Arc::new(blank));
                }
                st.emit2_str(at, Opcode::New, &mangled, 0);
            }
            ExprKind::IncludeSuperRegion(name) => {
                let mangled = mangled_region_name(&self.outermost_name, name);
                st.emit2_str(at, Opcode::SuperNew, &mangled, 0);
            }
            ExprKind::IncludeInd { name, args } => {
                self.expr(st, name);
                st.emit(at, Opcode::ToStr);
                for a in args {
                    self.expr(st, a);
                }
                st.emit1(at, Opcode::NewInd, args.len());
            }
            ExprKind::Func { name, arg } => {
                match arg {
                    Some(a) => self.expr(st, a),
                    None => {
                        st.emit(at, Opcode::Null);
                    }
                }
                match FUNCS.get(name.as_str()) {
                    Some(op) => {
                        st.emit(at, *op);
                    }
                    None => {
                        self.report(ErrorType::NoSuchFunction, e.interval, vec![name.clone()]);
                        st.emit(at, Opcode::Pop);
                        st.emit(at, Opcode::Null);
                    }
                }
            }
            ExprKind::ToStr(inner) => {
                self.expr(st, inner);
                st.emit(at, Opcode::ToStr);
            }
            ExprKind::Map { target, templates } => {
                self.expr(st, target);
                for t in templates {
                    self.map_template_ref(st, t, 1);
                }
                if templates.len() > 1 {
                    st.emit1(at, Opcode::RotMap, templates.len());
                } else {
                    st.emit(at, Opcode::Map);
                }
            }
            ExprKind::Zip { exprs, template } => {
                for x in exprs {
                    self.expr(st, x);
                }
                self.map_template_ref(st, template, exprs.len());
                st.emit1(at, Opcode::ZipMap, exprs.len());
            }
            ExprKind::Or(left, right) | ExprKind::And(left, right) => {
                let op = if matches!(e.kind, ExprKind::Or(..)) { Opcode::Or } else { Opcode::And };
                self.expr(st, left);
                let branch = st.emit1(at, op, 0);
                self.expr(st, right);
                let end = st.address();
                st.patch(branch, end);
            }
            ExprKind::Not(inner) => {
                self.expr(st, inner);
                st.emit(at, Opcode::Not);
            }
        }
    }

    /// Emits argument setup; returns the positional count.
    fn args(&mut self, st: &mut CompilationState, args: &Args, at: Interval) -> usize {
        match args {
            Args::None => 0,
            Args::Positional(exprs) => {
                for x in exprs {
                    self.expr(st, x);
                }
                exprs.len()
            }
            Args::Named { args, .. } => {
                st.emit(Some(at), Opcode::Args);
                for (name, interval, value) in args {
                    self.expr(st, value);
                    st.emit1_str(Some(*interval), Opcode::StoreArg, name);
                }
                args.len()
            }
            Args::PassThrough => {
                st.emit(Some(at), Opcode::Args);
                0
            }
        }
    }

    fn include(&mut self, st: &mut CompilationState, at: Interval, name: &str, args: &Args, is_super: bool) {
        let n = self.args(st, args, at);
        self.finish_include(st, at, name, args, n, is_super);
    }

    fn finish_include(&mut self, st: &mut CompilationState, at: Interval, name: &str, args: &Args, n: usize, is_super: bool) {
        let pass_through = matches!(args, Args::PassThrough | Args::Named { pass_through: true, .. });
        if pass_through {
            st.emit1_str(Some(at), Opcode::Passthru, name);
        }
        if matches!(args, Args::Named { .. } | Args::PassThrough) {
            let op = if is_super { Opcode::SuperNewBoxArgs } else { Opcode::NewBoxArgs };
            st.emit1_str(Some(at), op, name);
        } else {
            let op = if is_super { Opcode::SuperNew } else { Opcode::New };
            st.emit2_str(Some(at), op, name, n);
        }
    }

    /// Pushes a prototype instance whose first `num_exprs` arguments are left
    /// empty for the map instruction to fill.
    fn map_template_ref(&mut self, st: &mut CompilationState, t: &TemplateRef, num_exprs: usize) {
        match t {
            TemplateRef::Include { name, args, interval } => {
                let name = self.qualify(name);
                let positional = !matches!(args, Args::Named { .. } | Args::PassThrough);
                if positional {
                    for _ in 0..num_exprs {
                        st.emit(Some(*interval), Opcode::Null);
                    }
                }
                let n = self.args(st, args, *interval);
                let n = if positional { n + num_exprs } else { n };
                self.finish_include(st, *interval, &name, args, n, false);
            }
            TemplateRef::Subtemplate(sub) => {
                if sub.args.len() != num_exprs {
                    self.report(
                        ErrorType::AnonArgumentMismatch,
                        sub.interval,
                        vec![sub.args.len().to_string(), num_exprs.to_string()],
                    );
                }
                let name = self.subtemplate(sub);
                for _ in 0..num_exprs {
                    st.emit(Some(sub.interval), Opcode::Null);
                }
                st.emit2_str(Some(sub.interval), Opcode::New, &name, num_exprs);
            }
            TemplateRef::Indirect { name, args, interval } => {
                self.expr(st, name);
                st.emit(Some(*interval), Opcode::ToStr);
                for _ in 0..num_exprs {
                    st.emit(Some(*interval), Opcode::Null);
                }
                for a in args {
                    self.expr(st, a);
                }
                st.emit1(Some(*interval), Opcode::NewInd, args.len() + num_exprs);
            }
        }
    }
}
