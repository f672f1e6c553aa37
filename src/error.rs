use std::fmt;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{error, warn};

use crate::misc::Coordinate;

/// Failures that prevent producing a template at all. Everything that can be
/// recovered from while compiling or rendering is a [`TemplateMessage`] instead.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("no such template: {0}")]
    NoSuchTemplate(String),

    #[error("no such attribute: {name} in template {template}")]
    NoSuchAttribute { template: String, name: String },

    #[error("cannot have '.' in attribute names: {0}")]
    InvalidAttributeName(String),

    #[error("invalid aggregate attribute format: {0}")]
    InvalidAggregate(String),

    #[error("compilation failed: {0}")]
    Compile(String),

    #[error("can't load group file {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Every diagnostic the engine can emit, with its message pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    // runtime
    NoSuchTemplate,
    NoImportedTemplate,
    NoSuchAttribute,
    NoSuchAttributePassThrough,
    RefToImplicitAttributeOutOfScope,
    MissingFormalArguments,
    NoSuchProperty,
    MapArgumentCountMismatch,
    ArgumentCountMismatch,
    ExpectingString,
    CantImport,
    NoSuchCulture,
    RecursionDepthExceeded,

    // compile time
    SyntaxError,
    TemplateRedefinition,
    EmbeddedRegionRedefinition,
    RegionRedefinition,
    MapRedefinition,
    AliasTargetUndefined,
    TemplateRedefinitionAsMap,
    LexerError,
    NoDefaultValue,
    NoSuchFunction,
    NoSuchRegion,
    NoSuchOption,
    InvalidTemplateName,
    AnonArgumentMismatch,
    RequiredParameterAfterOptional,
    InvalidDelimiter,

    // internal, io
    InternalError,
    WriteIoError,
    CantLoadGroupFile,
}

impl ErrorType {
    pub fn message(self) -> &'static str {
        match self {
            ErrorType::NoSuchTemplate => "no such template: {0}",
            ErrorType::NoImportedTemplate => "no such template: super.{0}",
            ErrorType::NoSuchAttribute => "attribute {0} isn't defined",
            ErrorType::NoSuchAttributePassThrough => "could not pass through undefined attribute {0}",
            ErrorType::RefToImplicitAttributeOutOfScope => "implicitly-defined attribute {0} not visible",
            ErrorType::MissingFormalArguments => "missing argument definitions",
            ErrorType::NoSuchProperty => "no such property or can't access: {0}",
            ErrorType::MapArgumentCountMismatch => {
                "iterating through {0} values in zip map but template has {1} declared arguments"
            }
            ErrorType::ArgumentCountMismatch => "passed {0} arg(s) to template {1} with {2} declared arg(s)",
            ErrorType::ExpectingString => "function {0} expects a string not {1}",
            ErrorType::CantImport => "can't find template(s) in import \"{0}\"",
            ErrorType::NoSuchCulture => "no such culture: {0}",
            ErrorType::RecursionDepthExceeded => "template {0} exceeded the maximum nesting depth of {1}",
            ErrorType::SyntaxError => "{0}",
            ErrorType::TemplateRedefinition => "redefinition of template {0}",
            ErrorType::EmbeddedRegionRedefinition => {
                "region {0} is embedded and thus already implicitly defined"
            }
            ErrorType::RegionRedefinition => "redefinition of region {0}",
            ErrorType::MapRedefinition => "redefinition of dictionary {0}",
            ErrorType::AliasTargetUndefined => "cannot alias {0} to undefined template: {1}",
            ErrorType::TemplateRedefinitionAsMap => "redefinition of template {0} as a map",
            ErrorType::LexerError => "{0}",
            ErrorType::NoDefaultValue => "missing dictionary default value",
            ErrorType::NoSuchFunction => "no such function: {0}",
            ErrorType::NoSuchRegion => "template {0} doesn't have a region called {1}",
            ErrorType::NoSuchOption => "no such option: {0}",
            ErrorType::InvalidTemplateName => "invalid template name or path: {0}",
            ErrorType::AnonArgumentMismatch => {
                "anonymous template has {0} arg(s) but mapped across {1} value(s)"
            }
            ErrorType::RequiredParameterAfterOptional => {
                "Optional parameters must appear after all required parameters"
            }
            ErrorType::InvalidDelimiter => "Invalid template delimiter: \"{0}\"",
            ErrorType::InternalError => "{0}",
            ErrorType::WriteIoError => "error writing output caused by {0}",
            ErrorType::CantLoadGroupFile => "can't Load group file {0}",
        }
    }

    /// Renders the message pattern with positional `{n}` arguments.
    pub fn format(self, args: &[String]) -> String {
        let pattern = self.message();
        let mut out = String::with_capacity(pattern.len());
        let mut chars = pattern.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '{' {
                if let Some(d) = chars.peek().and_then(|d| d.to_digit(10)) {
                    chars.next();
                    if chars.peek() == Some(&'}') {
                        chars.next();
                        if let Some(arg) = args.get(d as usize) {
                            out.push_str(arg);
                        }
                        continue;
                    }
                    out.push('{');
                    out.push(std::char::from_digit(d, 10).unwrap_or('0'));
                    continue;
                }
            }
            out.push(c);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    CompileTime,
    Lexer,
    GroupCompileTime,
    Runtime,
    Io,
    Internal,
}

/// A positioned diagnostic produced while compiling or rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateMessage {
    pub kind: MessageKind,
    pub error: ErrorType,
    pub args: Vec<String>,
    pub source_name: Option<String>,
    pub location: Option<Coordinate>,
    /// Names of the enclosing template instances, outermost first.
    pub context: Vec<String>,
    pub cause: Option<String>,
}

impl TemplateMessage {
    pub fn new(kind: MessageKind, error: ErrorType, args: Vec<String>) -> Self {
        Self {
            kind,
            error,
            args,
            source_name: None,
            location: None,
            context: Vec::new(),
            cause: None,
        }
    }

    pub fn with_source(mut self, source_name: Option<String>) -> Self {
        self.source_name = source_name;
        self
    }

    pub fn with_location(mut self, location: Option<Coordinate>) -> Self {
        self.location = location;
        self
    }

    pub fn with_context(mut self, context: Vec<String>) -> Self {
        self.context = context;
        self
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn text(&self) -> String {
        self.error.format(&self.args)
    }
}

impl fmt::Display for TemplateMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MessageKind::CompileTime | MessageKind::Lexer | MessageKind::GroupCompileTime => {
                let filepos = match self.location {
                    Some(loc) => loc.to_string(),
                    None => "0:-1".to_string(),
                };
                match &self.source_name {
                    Some(src) => write!(f, "{} {}: {}", src, filepos, self.text()),
                    None => write!(f, "{}: {}", filepos, self.text()),
                }
            }
            MessageKind::Runtime => {
                write!(f, "context [{}]", self.context.join(" "))?;
                if let Some(loc) = self.location {
                    write!(f, " {}", loc)?;
                }
                write!(f, " {}", self.text())
            }
            MessageKind::Io | MessageKind::Internal => {
                write!(f, "{}", self.text())?;
                if let Some(cause) = &self.cause {
                    write!(f, "\nCaused by: {}", cause)?;
                }
                Ok(())
            }
        }
    }
}

/// Receives the diagnostics the engine produces. Listeners decide what to keep.
pub trait ErrorListener: Send + Sync {
    fn compile_time_error(&self, msg: &TemplateMessage);
    fn runtime_error(&self, msg: &TemplateMessage);
    fn io_error(&self, msg: &TemplateMessage);
    fn internal_error(&self, msg: &TemplateMessage);
}

/// Default listener: reports through `tracing`. Missing properties are not reported.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleErrorListener;

impl ErrorListener for ConsoleErrorListener {
    fn compile_time_error(&self, msg: &TemplateMessage) {
        warn!(target: "stemplate", "{}", msg);
    }

    fn runtime_error(&self, msg: &TemplateMessage) {
        if msg.error != ErrorType::NoSuchProperty {
            warn!(target: "stemplate", "{}", msg);
        }
    }

    fn io_error(&self, msg: &TemplateMessage) {
        error!(target: "stemplate", "{}", msg);
    }

    fn internal_error(&self, msg: &TemplateMessage) {
        error!(target: "stemplate", "{}", msg);
    }
}

/// Collects messages in memory. `new` skips missing-property runtime errors the
/// same way the console listener does; `all_errors` keeps everything.
#[derive(Debug, Default)]
pub struct ErrorBuffer {
    errors: Mutex<Vec<TemplateMessage>>,
    keep_all: bool,
}

impl ErrorBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all_errors() -> Self {
        Self {
            errors: Mutex::new(Vec::new()),
            keep_all: true,
        }
    }

    pub fn errors(&self) -> Vec<TemplateMessage> {
        self.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TemplateMessage>> {
        self.errors.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, msg: &TemplateMessage) {
        self.lock().push(msg.clone());
    }
}

impl ErrorListener for ErrorBuffer {
    fn compile_time_error(&self, msg: &TemplateMessage) {
        self.push(msg);
    }

    fn runtime_error(&self, msg: &TemplateMessage) {
        if self.keep_all || msg.error != ErrorType::NoSuchProperty {
            self.push(msg);
        }
    }

    fn io_error(&self, msg: &TemplateMessage) {
        self.push(msg);
    }

    fn internal_error(&self, msg: &TemplateMessage) {
        self.push(msg);
    }
}

impl fmt::Display for ErrorBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for msg in self.lock().iter() {
            writeln!(f, "{}", msg)?;
        }
        Ok(())
    }
}

/// Single funnel for diagnostics; forwards each message to the current listener.
#[derive(Clone)]
pub struct ErrorManager {
    listener: Arc<dyn ErrorListener>,
}

impl fmt::Debug for ErrorManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorManager").finish_non_exhaustive()
    }
}

impl Default for ErrorManager {
    fn default() -> Self {
        Self::new(Arc::new(ConsoleErrorListener))
    }
}

impl ErrorManager {
    pub fn new(listener: Arc<dyn ErrorListener>) -> Self {
        Self { listener }
    }

    pub fn listener(&self) -> Arc<dyn ErrorListener> {
        Arc::clone(&self.listener)
    }

    pub fn compile_time_error(
        &self,
        error: ErrorType,
        source_name: Option<&str>,
        location: Option<Coordinate>,
        args: Vec<String>,
    ) {
        let msg = TemplateMessage::new(MessageKind::CompileTime, error, args)
            .with_source(source_name.map(str::to_string))
            .with_location(location);
        self.listener.compile_time_error(&msg);
    }

    pub fn lexer_error(&self, source_name: Option<&str>, text: String, location: Coordinate) {
        let msg = TemplateMessage::new(MessageKind::Lexer, ErrorType::LexerError, vec![text])
            .with_source(source_name.map(str::to_string))
            .with_location(Some(location));
        self.listener.compile_time_error(&msg);
    }

    pub fn group_syntax_error(
        &self,
        error: ErrorType,
        source_name: Option<&str>,
        location: Option<Coordinate>,
        args: Vec<String>,
    ) {
        let msg = TemplateMessage::new(MessageKind::GroupCompileTime, error, args)
            .with_source(source_name.map(str::to_string))
            .with_location(location);
        self.listener.compile_time_error(&msg);
    }

    pub fn runtime_error(
        &self,
        error: ErrorType,
        context: Vec<String>,
        location: Option<Coordinate>,
        args: Vec<String>,
    ) {
        let msg = TemplateMessage::new(MessageKind::Runtime, error, args)
            .with_context(context)
            .with_location(location);
        self.listener.runtime_error(&msg);
    }

    pub fn io_error(&self, error: ErrorType, cause: impl fmt::Display, args: Vec<String>) {
        let msg = TemplateMessage::new(MessageKind::Io, error, args).with_cause(cause.to_string());
        self.listener.io_error(&msg);
    }

    pub fn internal_error(&self, text: impl Into<String>) {
        let msg = TemplateMessage::new(MessageKind::Internal, ErrorType::InternalError, vec![text.into()]);
        self.listener.internal_error(&msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_formatting() {
        assert_eq!(
            ErrorType::ArgumentCountMismatch.format(&["0".into(), "/u".into(), "1".into()]),
            "passed 0 arg(s) to template /u with 1 declared arg(s)"
        );
        assert_eq!(ErrorType::NoSuchOption.format(&["bad".into()]), "no such option: bad");
        assert_eq!(ErrorType::MissingFormalArguments.format(&[]), "missing argument definitions");
    }

    #[test]
    fn test_runtime_message_display() {
        let msg = TemplateMessage::new(MessageKind::Runtime, ErrorType::NoSuchAttribute, vec!["x".into()])
            .with_context(vec!["/t".into(), "/u".into()])
            .with_location(Some(Coordinate::new(1, 1)));
        assert_eq!(msg.to_string(), "context [/t /u] 1:1 attribute x isn't defined");
    }

    #[test]
    fn test_compile_message_display() {
        let msg = TemplateMessage::new(MessageKind::CompileTime, ErrorType::NoSuchOption, vec!["bad".into()])
            .with_source(Some("test".into()))
            .with_location(Some(Coordinate::new(1, 7)));
        assert_eq!(msg.to_string(), "test 1:7: no such option: bad");

        let anon = TemplateMessage::new(MessageKind::CompileTime, ErrorType::SyntaxError, vec!["premature EOF".into()])
            .with_location(Some(Coordinate::new(1, 4)));
        assert_eq!(anon.to_string(), "1:4: premature EOF");
    }

    #[test]
    fn test_error_buffer_filters_missing_properties() {
        let buffer = ErrorBuffer::new();
        let all = ErrorBuffer::all_errors();
        let msg = TemplateMessage::new(MessageKind::Runtime, ErrorType::NoSuchProperty, vec!["p".into()]);
        buffer.runtime_error(&msg);
        all.runtime_error(&msg);
        assert!(buffer.is_empty());
        assert_eq!(all.errors().len(), 1);
        assert_eq!(all.to_string(), "context [] no such property or can't access: p\n");
    }
}
