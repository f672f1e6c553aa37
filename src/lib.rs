pub mod ast;
pub mod compiler;
pub mod config;
pub mod error;
pub mod group;
pub mod interpreter;
pub mod lexer;
pub mod misc;
pub mod model;
pub mod parser;
pub mod renderer;
pub mod template;
pub mod value;
pub mod writer;

pub use config::EngineConfig;
pub use error::{ConsoleErrorListener, ErrorBuffer, ErrorListener, ErrorType, TemplateError, TemplateMessage};
pub use group::TemplateGroup;
pub use model::{AdaptorRegistry, ModelAdaptor, NoSuchProperty};
pub use renderer::{AttributeRenderer, Culture, DateRenderer, NumberRenderer, StringRenderer};
pub use template::Template;
pub use value::{Aggregate, DictEntry, Dictionary, HostObject, MapKey, Value};
pub use writer::{AutoIndentWriter, NoIndentWriter, TemplateWriter};
