//! Bytecode interpreter. Executes a template's code against a chain of
//! [`Frame`]s, writing through a [`TemplateWriter`].
//!
//! Nothing here fails hard: missing attributes, templates and properties are
//! reported to the group's error listener and evaluate to null.

pub mod frame;
pub mod functions;

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::trace;

pub use self::frame::Frame;

use crate::compiler::bytecode::{Opcode, RenderOption};
use crate::compiler::code_generator::IMPLICIT_SUBTEMPLATE_ARGS;
use crate::compiler::{CompiledTemplate, DefaultValue, TemplateCompiler, TemplateOrigin};
use crate::error::{ErrorManager, ErrorType};
use crate::group::TemplateGroup;
use crate::model::NoSuchProperty;
use crate::renderer::Culture;
use crate::template::Template;
use crate::value::{Dictionary, Value};
use crate::writer::{AutoIndentWriter, TemplateWriter};

/// Option values after evaluation to strings, indexed by [`RenderOption`].
type RenderOptions = [Option<String>; RenderOption::COUNT];

enum Operand {
    Value(Value),
    Options(Vec<Option<Value>>),
    Args(IndexMap<String, Value>),
}

impl Operand {
    fn kind(&self) -> &'static str {
        match self {
            Operand::Value(_) => "value",
            Operand::Options(_) => "options",
            Operand::Args(_) => "argument map",
        }
    }
}

struct OperandStack<'e> {
    items: Vec<Operand>,
    errors: &'e ErrorManager,
}

impl<'e> OperandStack<'e> {
    fn new(errors: &'e ErrorManager) -> Self {
        Self {
            items: Vec::new(),
            errors,
        }
    }

    fn push(&mut self, value: Value) {
        self.items.push(Operand::Value(value));
    }

    fn pop(&mut self) -> Value {
        match self.items.pop() {
            Some(Operand::Value(v)) => v,
            other => {
                self.mismatch("value", other.as_ref());
                Value::Null
            }
        }
    }

    /// The top `n` values, in the order they were pushed.
    fn pop_n(&mut self, n: usize) -> Vec<Value> {
        let mut values: Vec<Value> = (0..n).map(|_| self.pop()).collect();
        values.reverse();
        values
    }

    fn pop_options(&mut self) -> Vec<Option<Value>> {
        match self.items.pop() {
            Some(Operand::Options(o)) => o,
            other => {
                self.mismatch("options", other.as_ref());
                vec![None; RenderOption::COUNT]
            }
        }
    }

    fn pop_args(&mut self) -> IndexMap<String, Value> {
        match self.items.pop() {
            Some(Operand::Args(a)) => a,
            other => {
                self.mismatch("argument map", other.as_ref());
                IndexMap::new()
            }
        }
    }

    fn top_args(&mut self) -> Option<&mut IndexMap<String, Value>> {
        match self.items.last_mut() {
            Some(Operand::Args(a)) => Some(a),
            _ => None,
        }
    }

    fn mismatch(&self, wanted: &str, found: Option<&Operand>) {
        let found = found.map_or("empty stack", Operand::kind);
        self.errors
            .internal_error(format!("expected {} on the operand stack but found {}", wanted, found));
    }
}

/// Executes compiled templates for one render.
#[derive(Debug)]
pub struct Interpreter {
    errors: ErrorManager,
    culture: Culture,
    /// Configured tag that named no known culture; renderers get the
    /// invariant culture and each use is reported.
    unknown_culture: Option<String>,
    newline: String,
    line_width: Option<usize>,
    max_depth: usize,
}

impl Interpreter {
    pub fn new(group: &TemplateGroup) -> Self {
        let config = group.config();
        let (culture, unknown_culture) = match Culture::from_tag(&config.culture) {
            Some(culture) => (culture, None),
            None => (Culture::invariant(), Some(config.culture)),
        };
        Self {
            errors: group.error_manager(),
            culture,
            unknown_culture,
            newline: config.newline,
            line_width: config.line_width,
            max_depth: config.max_depth,
        }
    }

    /// Line width for values rendered to strings mid-render (options, `(expr)`).
    pub fn with_line_width(mut self, width: Option<usize>) -> Self {
        self.line_width = width;
        self
    }

    pub fn error_manager(&self) -> &ErrorManager {
        &self.errors
    }

    pub fn culture(&self) -> &Culture {
        &self.culture
    }

    /// Renders `template` as the outermost template; returns chars written.
    pub fn render(&self, out: &mut dyn TemplateWriter, template: &Template) -> usize {
        let frame = Frame::root(template);
        self.exec(out, &frame)
    }

    pub fn exec(&self, out: &mut dyn TemplateWriter, frame: &Frame<'_>) -> usize {
        if frame.depth() > self.max_depth {
            self.runtime_error(
                frame,
                ErrorType::RecursionDepthExceeded,
                vec![frame.template().name().to_string(), self.max_depth.to_string()],
            );
            return 0;
        }
        self.set_default_arguments(frame);
        self.exec_code(out, frame)
    }

    fn exec_code(&self, out: &mut dyn TemplateWriter, frame: &Frame<'_>) -> usize {
        let code: &CompiledTemplate = frame.template().compiled();
        let string = |i: u16| code.string_table.get(i as usize).map_or("", String::as_str);

        let mut stack = OperandStack::new(&self.errors);
        let mut n = 0;
        // chars written on the current line; a newline after an empty line is dropped
        let mut nwline = 0;
        let mut prev: Option<Opcode> = None;
        let mut ip = 0;

        while let Some(&instr) = code.code.get(ip) {
            frame.set_ip(ip);
            trace!(target: "stemplate::interpreter", template = %code.name, ip, op = instr.op.name());
            ip += 1;
            match instr.op {
                Opcode::LoadStr => stack.push(Value::from(string(instr.a))),
                Opcode::LoadAttr => {
                    let value = self.attribute(frame, string(instr.a));
                    stack.push(value);
                }
                Opcode::LoadLocal => stack.push(frame.local_at(instr.a as usize).unwrap_or_default()),
                Opcode::LoadProp => {
                    let target = stack.pop();
                    let value = self.property(frame, &target, &Value::from(string(instr.a)));
                    stack.push(value);
                }
                Opcode::LoadPropInd => {
                    let property = stack.pop();
                    let target = stack.pop();
                    let value = self.property(frame, &target, &property);
                    stack.push(value);
                }
                Opcode::StoreOption => {
                    let value = stack.pop();
                    match stack.items.last_mut() {
                        Some(Operand::Options(options)) => {
                            if let Some(slot) = options.get_mut(instr.a as usize) {
                                *slot = Some(value);
                            }
                        }
                        _ => self.errors.internal_error("store_option without an options map"),
                    }
                }
                Opcode::StoreArg => {
                    let value = stack.pop();
                    match stack.top_args() {
                        Some(args) => {
                            args.insert(string(instr.a).to_string(), value);
                        }
                        None => self.errors.internal_error("store_arg without an argument map"),
                    }
                }
                Opcode::New => {
                    let args = stack.pop_n(instr.b as usize);
                    let mut st = self.embedded_instance(frame, string(instr.a));
                    self.store_positional_args(frame, &mut st, args);
                    stack.push(st.into());
                }
                Opcode::NewInd => {
                    let args = stack.pop_n(instr.a as usize);
                    let name = stack.pop().to_string();
                    let mut st = self.embedded_instance(frame, &name);
                    self.store_positional_args(frame, &mut st, args);
                    stack.push(st.into());
                }
                Opcode::NewBoxArgs => {
                    let args = stack.pop_args();
                    let mut st = self.embedded_instance(frame, string(instr.a));
                    self.store_named_args(frame, &mut st, args);
                    stack.push(st.into());
                }
                Opcode::SuperNew => {
                    let args = stack.pop_n(instr.b as usize);
                    let mut st = self.super_instance(frame, string(instr.a));
                    self.store_positional_args(frame, &mut st, args);
                    stack.push(st.into());
                }
                Opcode::SuperNewBoxArgs => {
                    let args = stack.pop_args();
                    let mut st = self.super_instance(frame, string(instr.a));
                    self.store_named_args(frame, &mut st, args);
                    stack.push(st.into());
                }
                Opcode::Passthru => {
                    let name = string(instr.a);
                    match stack.top_args() {
                        Some(args) => self.pass_through(frame, name, args),
                        None => self.errors.internal_error("passthru without an argument map"),
                    }
                }
                Opcode::Write => {
                    let value = stack.pop();
                    let n1 = self.write_object(out, frame, &value, None);
                    n += n1;
                    nwline += n1;
                }
                Opcode::WriteOpt => {
                    let options = stack.pop_options();
                    let value = stack.pop();
                    let n1 = self.write_with_options(out, frame, &value, &options);
                    n += n1;
                    nwline += n1;
                }
                Opcode::WriteLocal => {
                    let value = frame.local_at(instr.a as usize).unwrap_or_default();
                    let n1 = self.write_object(out, frame, &value, None);
                    n += n1;
                    nwline += n1;
                }
                Opcode::WriteStr => {
                    let n1 = self.checked(frame, out.write(string(instr.a)));
                    n += n1;
                    nwline += n1;
                }
                Opcode::Map => {
                    let prototype = stack.pop();
                    let attr = stack.pop();
                    let mapped = self.rot_map(frame, attr, vec![prototype]);
                    stack.push(mapped);
                }
                Opcode::RotMap => {
                    let prototypes = stack.pop_n(instr.a as usize);
                    let attr = stack.pop();
                    let mapped = self.rot_map(frame, attr, prototypes);
                    stack.push(mapped);
                }
                Opcode::ZipMap => {
                    let prototype = stack.pop();
                    let exprs = stack.pop_n(instr.a as usize);
                    let zipped = self.zip_map(frame, exprs, prototype);
                    stack.push(zipped);
                }
                Opcode::Br => ip = instr.a as usize,
                Opcode::Brf => {
                    if !is_true(&stack.pop()) {
                        ip = instr.a as usize;
                    }
                }
                Opcode::Or | Opcode::And => {
                    let left = stack.pop();
                    let short_circuit = is_true(&left) == (instr.op == Opcode::Or);
                    if short_circuit {
                        stack.push(Value::Bool(instr.op == Opcode::Or));
                        ip = instr.a as usize;
                    }
                }
                Opcode::Not => {
                    let value = stack.pop();
                    stack.push(Value::Bool(!is_true(&value)));
                }
                Opcode::Options => stack.items.push(Operand::Options(vec![None; RenderOption::COUNT])),
                Opcode::Args => stack.items.push(Operand::Args(IndexMap::new())),
                Opcode::List => stack.push(Value::List(Vec::new())),
                Opcode::Add => {
                    let value = stack.pop();
                    match stack.items.last_mut() {
                        Some(Operand::Value(Value::List(list))) => match value.iter_values() {
                            Some(items) => list.extend(items),
                            None => list.push(value),
                        },
                        _ => self.errors.internal_error("add without a list"),
                    }
                }
                Opcode::ToStr => {
                    let value = stack.pop();
                    // Booleans keep their truth value for `<if((flag))>`.
                    if let Value::Bool(_) = value {
                        stack.push(value);
                    } else {
                        let text = self.to_string(frame, &value);
                        stack.push(text.map_or(Value::Null, Value::Str));
                    }
                }
                Opcode::First
                | Opcode::Last
                | Opcode::Rest
                | Opcode::Trunc
                | Opcode::Strip
                | Opcode::Trim
                | Opcode::Length
                | Opcode::Strlen
                | Opcode::Reverse => {
                    let value = stack.pop();
                    let result = functions::apply(instr.op, value).unwrap_or_else(|e| {
                        self.runtime_error(
                            frame,
                            ErrorType::ExpectingString,
                            vec![e.function.to_string(), e.found.to_string()],
                        );
                        Value::Null
                    });
                    stack.push(result);
                }
                Opcode::Indent => out.push_indentation(string(instr.a)),
                Opcode::Dedent => {
                    out.pop_indentation();
                }
                Opcode::Newline => {
                    if matches!(prev, Some(Opcode::Newline | Opcode::Indent)) || nwline > 0 {
                        let newline = out.newline().to_string();
                        n += self.checked(frame, out.write(&newline));
                    }
                    nwline = 0;
                }
                Opcode::Noop => {}
                Opcode::Pop => {
                    stack.pop();
                }
                Opcode::Null => stack.push(Value::Null),
                Opcode::True => stack.push(Value::Bool(true)),
                Opcode::False => stack.push(Value::Bool(false)),
            }
            prev = Some(instr.op);
        }
        n
    }

    fn runtime_error(&self, frame: &Frame<'_>, error: ErrorType, args: Vec<String>) {
        let location = frame.template().compiled().location_of(frame.ip());
        self.errors.runtime_error(error, frame.enclosing_names(), location, args);
    }

    fn checked(&self, frame: &Frame<'_>, written: Result<usize, fmt::Error>) -> usize {
        written.unwrap_or_else(|e| {
            self.errors
                .io_error(ErrorType::WriteIoError, e, vec![frame.template().name().to_string()]);
            0
        })
    }

    /// Group the executing template was compiled in; renderers and
    /// dictionaries come from here.
    fn native_group(&self, frame: &Frame<'_>) -> TemplateGroup {
        let template = frame.template();
        template
            .compiled()
            .native_group()
            .unwrap_or_else(|| template.group().clone())
    }

    fn dictionary(&self, frame: &Frame<'_>, name: &str) -> Option<Arc<Dictionary>> {
        self.native_group(frame).lookup_dictionary(name)
    }

    /// Dynamic scope, then dictionaries visible from the native group.
    fn resolve(&self, frame: &Frame<'_>, name: &str) -> Option<Option<Value>> {
        frame
            .lookup(name)
            .or_else(|| self.dictionary(frame, name).map(|d| Some(Value::Map(d))))
    }

    fn attribute(&self, frame: &Frame<'_>, name: &str) -> Value {
        match self.resolve(frame, name) {
            Some(value) => value.unwrap_or_default(),
            None => {
                self.runtime_error(frame, ErrorType::NoSuchAttribute, vec![name.to_string()]);
                Value::Null
            }
        }
    }

    fn property(&self, frame: &Frame<'_>, target: &Value, property: &Value) -> Value {
        let name = property.to_string();
        if target.is_null() {
            self.runtime_error(frame, ErrorType::NoSuchProperty, vec![format!("null.{}", name)]);
            return Value::Null;
        }
        let adaptor = frame.template().group().adaptors().lookup(target);
        let found = match adaptor {
            Some(adaptor) => adaptor.get_property(self, frame, target, property, &name),
            None => Err(NoSuchProperty(format!("{}.{}", target.type_name(), name))),
        };
        found.unwrap_or_else(|NoSuchProperty(what)| {
            self.runtime_error(frame, ErrorType::NoSuchProperty, vec![what]);
            Value::Null
        })
    }

    fn qualify(frame: &Frame<'_>, name: &str) -> String {
        if name.starts_with('/') {
            name.to_string()
        } else {
            format!("{}{}", frame.template().compiled().prefix, name)
        }
    }

    fn embedded_instance(&self, frame: &Frame<'_>, name: &str) -> Template {
        let group = frame.template().group();
        let name = Self::qualify(frame, name);
        group.get_instance_of(&name).unwrap_or_else(|| {
            self.runtime_error(frame, ErrorType::NoSuchTemplate, vec![name.clone()]);
            Template::blank(&name, group.clone())
        })
    }

    fn super_instance(&self, frame: &Frame<'_>, name: &str) -> Template {
        let group = frame.template().group();
        match self.native_group(frame).lookup_imported_template(name) {
            Some(code) => Template::from_compiled(code, group.clone()),
            None => {
                self.runtime_error(frame, ErrorType::NoImportedTemplate, vec![name.to_string()]);
                Template::blank(name, group.clone())
            }
        }
    }

    fn argument_count_mismatch(&self, frame: &Frame<'_>, nargs: usize, target: &str, nformal: usize) {
        self.runtime_error(
            frame,
            ErrorType::ArgumentCountMismatch,
            vec![nargs.to_string(), target.to_string(), nformal.to_string()],
        );
    }

    fn store_positional_args(&self, frame: &Frame<'_>, st: &mut Template, args: Vec<Value>) {
        let code = Arc::clone(st.compiled());
        let nargs = args.len();
        if !code.has_formal_args {
            // ad hoc templates take a single argument as `it`
            if let Some(first) = args.into_iter().next() {
                st.raw_set("it", first);
            }
            if nargs > 1 {
                self.argument_count_mismatch(frame, nargs, &code.name, 1);
            }
            return;
        }
        let mut nformal = code.num_formal_arguments();
        let to_store = nargs.min(nformal);
        if code.is_anon_subtemplate {
            nformal = nformal.saturating_sub(IMPLICIT_SUBTEMPLATE_ARGS.len());
        }
        let required = nformal.saturating_sub(code.number_of_args_with_default_values());
        if nargs < required || nargs > nformal {
            self.argument_count_mismatch(frame, nargs, &code.name, nformal);
        }
        let names = code.formal_arguments.iter().flat_map(|f| f.keys());
        for (name, value) in names.zip(args).take(to_store) {
            st.raw_set(name, value);
        }
    }

    fn store_named_args(&self, frame: &Frame<'_>, st: &mut Template, args: IndexMap<String, Value>) {
        let code = Arc::clone(st.compiled());
        let mut reported = false;
        for (name, value) in &args {
            if code.has_formal_args && code.formal_argument(name).is_none() {
                self.runtime_error(frame, ErrorType::NoSuchAttribute, vec![name.clone()]);
                reported = true;
                continue;
            }
            st.raw_set(name, value.clone());
        }
        if !code.has_formal_args {
            return;
        }
        let nformal = code.num_formal_arguments();
        let missing = !reported
            && code
                .formal_arguments
                .iter()
                .flat_map(|f| f.values())
                .any(|f| !f.has_default() && !args.contains_key(&f.name));
        if missing || args.len() > nformal {
            self.argument_count_mismatch(frame, args.len(), &code.name, nformal);
        }
    }

    /// `...` in an argument list: every unset formal of the target takes the
    /// caller's value of the same name.
    fn pass_through(&self, frame: &Frame<'_>, name: &str, args: &mut IndexMap<String, Value>) {
        let group = frame.template().group();
        let Some(code) = group.lookup_template(&Self::qualify(frame, name)) else {
            return;
        };
        let Some(formals) = code.formal_arguments.as_ref() else {
            return;
        };
        for arg in formals.values() {
            if args.contains_key(&arg.name) {
                continue;
            }
            match self.resolve(frame, &arg.name) {
                Some(Some(value)) => {
                    args.insert(arg.name.clone(), value);
                }
                Some(None) => {
                    if !arg.has_default() {
                        args.insert(arg.name.clone(), Value::Null);
                    }
                }
                None => {
                    if !arg.has_default() {
                        self.runtime_error(frame, ErrorType::NoSuchAttributePassThrough, vec![arg.name.clone()]);
                        args.insert(arg.name.clone(), Value::Null);
                    }
                }
            }
        }
    }

    fn set_default_arguments(&self, frame: &Frame<'_>) {
        let template = frame.template();
        let code = template.compiled();
        let Some(formals) = code.formal_arguments.as_ref() else {
            return;
        };
        for arg in formals.values() {
            let Some(default) = &arg.default else {
                continue;
            };
            if frame.is_set(&arg.name) {
                continue;
            }
            let value = match default {
                DefaultValue::Str(s) => Value::Str(s.clone()),
                DefaultValue::Bool(b) => Value::Bool(*b),
                DefaultValue::EmptyList => Value::List(Vec::new()),
                DefaultValue::Template { .. } => {
                    let group = self.native_group(frame);
                    let Some(compiled) = arg.compiled_default(|text| compile_default(&group, code, &arg.name, text))
                    else {
                        continue;
                    };
                    let instance = Value::from(Template::from_compiled(compiled, template.group().clone()));
                    if arg.is_eager_default(group.delimiters()) {
                        self.to_string(frame, &instance).map_or(Value::Null, Value::Str)
                    } else {
                        instance
                    }
                }
            };
            frame.set_local(&arg.name, value);
        }
    }

    /// Renders a value on its own, as option values and `(expr)` need.
    pub fn to_string(&self, frame: &Frame<'_>, value: &Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::Str(s) => Some(s.clone()),
            v => {
                let mut writer = AutoIndentWriter::with_newline(String::new(), &self.newline);
                writer.set_line_width(self.line_width);
                self.write_object(&mut writer, frame, v, None);
                Some(writer.into_inner())
            }
        }
    }

    fn write_with_options(
        &self,
        out: &mut dyn TemplateWriter,
        frame: &Frame<'_>,
        value: &Value,
        options: &[Option<Value>],
    ) -> usize {
        let mut rendered: RenderOptions = Default::default();
        for (slot, option) in rendered.iter_mut().zip(options) {
            *slot = option.as_ref().and_then(|v| self.to_string(frame, v));
        }
        let anchored = matches!(options.get(RenderOption::Anchor.index()), Some(Some(_)));
        if anchored {
            out.push_anchor_point();
        }
        let n = self.write_object(out, frame, value, Some(&rendered));
        if anchored {
            out.pop_anchor_point();
        }
        n
    }

    fn write_object(
        &self,
        out: &mut dyn TemplateWriter,
        frame: &Frame<'_>,
        value: &Value,
        options: Option<&RenderOptions>,
    ) -> usize {
        let option = |o: RenderOption| options.and_then(|opts| opts[o.index()].as_deref());
        let substitute;
        let value = match value {
            Value::Null => match option(RenderOption::Null) {
                Some(s) => {
                    substitute = Value::from(s);
                    &substitute
                }
                None => return 0,
            },
            v => v,
        };
        match value {
            Value::Template(t) => {
                if let Some(wrap) = option(RenderOption::Wrap) {
                    self.checked(frame, out.write_wrap(wrap));
                }
                let child = Frame::child(t, frame);
                self.exec(out, &child)
            }
            v => match v.iter_values() {
                Some(items) => self.write_iterator(out, frame, &items, options),
                None => self.write_plain(out, frame, v, options),
            },
        }
    }

    fn write_iterator(
        &self,
        out: &mut dyn TemplateWriter,
        frame: &Frame<'_>,
        items: &[Value],
        options: Option<&RenderOptions>,
    ) -> usize {
        let separator = options.and_then(|o| o[RenderOption::Separator.index()].as_deref());
        let has_null_option = options.is_some_and(|o| o[RenderOption::Null.index()].is_some());
        let mut seen_value = false;
        let mut n = 0;
        for item in items {
            if let Some(sep) = separator {
                if seen_value && (!item.is_null() || has_null_option) {
                    n += self.checked(frame, out.write_separator(sep));
                }
            }
            let written = self.write_object(out, frame, item, options);
            if written > 0 {
                seen_value = true;
            }
            n += written;
        }
        n
    }

    fn write_plain(
        &self,
        out: &mut dyn TemplateWriter,
        frame: &Frame<'_>,
        value: &Value,
        options: Option<&RenderOptions>,
    ) -> usize {
        let format = options.and_then(|o| o[RenderOption::Format.index()].as_deref());
        let text = match self.native_group(frame).renderer(value.type_name()) {
            Some(renderer) => {
                if let Some(tag) = &self.unknown_culture {
                    self.runtime_error(frame, ErrorType::NoSuchCulture, vec![tag.clone()]);
                }
                renderer.render(value, format, &self.culture)
            }
            None => value.to_string(),
        };
        match options.and_then(|o| o[RenderOption::Wrap.index()].as_deref()) {
            Some(wrap) => self.checked(frame, out.write_with_wrap(&text, wrap)),
            None => self.checked(frame, out.write(&text)),
        }
    }

    /// Applies prototypes round-robin across `attr`. Null elements stay null
    /// and don't advance the iteration index.
    fn rot_map(&self, frame: &Frame<'_>, attr: Value, prototypes: Vec<Value>) -> Value {
        let prototypes: Vec<Arc<Template>> = prototypes
            .into_iter()
            .filter_map(|p| p.as_template().cloned())
            .collect();
        if attr.is_null() || prototypes.is_empty() {
            return Value::Null;
        }
        match attr.iter_values() {
            Some(items) => {
                let mut mapped = Vec::with_capacity(items.len());
                let mut i0 = 0;
                for item in items {
                    if item.is_null() {
                        mapped.push(Value::Null);
                        continue;
                    }
                    let prototype = &prototypes[i0 % prototypes.len()];
                    mapped.push(self.bind_iteration(frame, prototype, item, i0).into());
                    i0 += 1;
                }
                Value::List(mapped)
            }
            None => self.bind_iteration(frame, &prototypes[0], attr, 0).into(),
        }
    }

    fn bind_iteration(&self, frame: &Frame<'_>, prototype: &Template, item: Value, i0: usize) -> Template {
        let mut st = prototype.clone();
        self.set_first_argument(frame, &mut st, item);
        if st.compiled().is_anon_subtemplate {
            st.raw_set("i0", Value::from(i0));
            st.raw_set("i", Value::from(i0 + 1));
        }
        st
    }

    fn set_first_argument(&self, frame: &Frame<'_>, st: &mut Template, value: Value) {
        let code = Arc::clone(st.compiled());
        if !code.has_formal_args {
            st.raw_set("it", value);
            return;
        }
        match code.formal_arguments.as_ref().and_then(|f| f.get_index(0)) {
            Some((name, _)) => st.raw_set(name, value),
            None => self.argument_count_mismatch(frame, 1, &code.name, 0),
        }
    }

    /// Walks the lists in parallel, one template instance per position, until
    /// every list is exhausted.
    fn zip_map(&self, frame: &Frame<'_>, exprs: Vec<Value>, prototype: Value) -> Value {
        let Some(prototype) = prototype.as_template().cloned() else {
            return Value::Null;
        };
        if exprs.is_empty() {
            return Value::Null;
        }
        let code = Arc::clone(prototype.compiled());
        let formals = match code.formal_arguments.as_ref() {
            Some(f) if code.has_formal_args => f,
            _ => {
                self.runtime_error(frame, ErrorType::MissingFormalArguments, Vec::new());
                return Value::Null;
            }
        };
        let mut nformal = formals.len();
        if code.is_anon_subtemplate {
            nformal = nformal.saturating_sub(IMPLICIT_SUBTEMPLATE_ARGS.len());
        }
        let mut count = exprs.len();
        if nformal != count {
            self.runtime_error(
                frame,
                ErrorType::MapArgumentCountMismatch,
                vec![count.to_string(), nformal.to_string()],
            );
            count = count.min(nformal);
        }
        let names: Vec<&String> = formals.keys().take(count).collect();
        let mut lists: Vec<std::vec::IntoIter<Value>> = exprs
            .into_iter()
            .take(count)
            .map(|v| match v {
                Value::Null => Vec::new().into_iter(),
                v => v.iter_values().unwrap_or_else(|| vec![v]).into_iter(),
            })
            .collect();

        let mut results = Vec::new();
        let mut i = 0;
        loop {
            let mut st = (*prototype).clone();
            st.raw_set("i0", Value::from(i));
            st.raw_set("i", Value::from(i + 1));
            let mut exhausted = 0;
            for (name, list) in names.iter().zip(lists.iter_mut()) {
                match list.next() {
                    Some(v) => st.raw_set(name, v),
                    None => exhausted += 1,
                }
            }
            if exhausted == count {
                break;
            }
            results.push(st.into());
            i += 1;
        }
        Value::List(results)
    }
}

/// Conditional truth: null, false, "" and empty collections are false.
pub fn is_true(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Str(s) => !s.is_empty(),
        Value::List(items) => !items.is_empty(),
        Value::Map(d) => !d.is_empty(),
        _ => true,
    }
}

fn compile_default(group: &TemplateGroup, owner: &CompiledTemplate, arg: &str, text: &str) -> Arc<CompiledTemplate> {
    let body = text
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .unwrap_or(text);
    let origin = TemplateOrigin {
        source_name: owner.origin.source_name.clone(),
        ..TemplateOrigin::default()
    };
    let mut compiled = TemplateCompiler::new(group).compile(&format!("{}_default_value", arg), None, body, origin);
    compiled.prefix = owner.prefix.clone();
    group.define_implicit_templates(&compiled);
    Arc::new(compiled)
}
