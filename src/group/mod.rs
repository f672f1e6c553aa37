//! Template groups: named templates, dictionaries, imports, renderers and
//! model adaptors that render together.

pub mod parser;

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use indexmap::IndexMap;
use tracing::debug;

use crate::compiler::{CompiledTemplate, FormalArgument, RegionType, TemplateCompiler, TemplateOrigin, ANONYMOUS_NAME};
use crate::config::EngineConfig;
use crate::error::{ErrorListener, ErrorManager, ErrorType, TemplateError};
use crate::misc::{fully_qualified, trim_one_starting_newline, trim_one_trailing_newline, Coordinate};
use crate::model::{AdaptorRegistry, ModelAdaptor};
use crate::renderer::AttributeRenderer;
use crate::template::Template;
use crate::value::Dictionary;

/// Name under which region `name` of template `enclosing` is compiled.
pub fn mangled_region_name(enclosing: &str, name: &str) -> String {
    format!("/region__{}__{}", fully_qualified(enclosing), name)
}

/// `/region__/t__r` back to `/t.r` for messages; other names unchanged.
/// Each `/`-separated segment is an identifier: a letter or `_`, then
/// letters, digits, `_` or `-`.
fn is_valid_template_name(name: &str) -> bool {
    name.trim_start_matches('/').split('/').all(|segment| {
        let mut chars = segment.chars();
        matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
            && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    })
}

pub fn unmangled_region_name(mangled: &str) -> String {
    match mangled
        .strip_prefix("/region__")
        .and_then(|rest| rest.rsplit_once("__"))
    {
        Some((enclosing, name)) => format!("{}.{}", enclosing, name),
        None => mangled.to_string(),
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Shared state behind a [`TemplateGroup`] handle. Compiled templates keep a
/// weak reference to the group they were compiled in.
pub struct GroupInner {
    name: String,
    config: RwLock<EngineConfig>,
    templates: RwLock<IndexMap<String, Arc<CompiledTemplate>>>,
    dictionaries: RwLock<IndexMap<String, Arc<Dictionary>>>,
    imports: RwLock<Vec<TemplateGroup>>,
    import_names: RwLock<Vec<String>>,
    renderers: RwLock<IndexMap<String, Arc<dyn AttributeRenderer>>>,
    errors: RwLock<ErrorManager>,
    adaptors: AdaptorRegistry,
    subtemplate_count: AtomicUsize,
}

/// Handle to a group; clones share the same templates and registries.
#[derive(Clone)]
pub struct TemplateGroup {
    inner: Arc<GroupInner>,
}

impl fmt::Debug for TemplateGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateGroup")
            .field("name", &self.inner.name)
            .field("templates", &self.template_names())
            .field("dictionaries", &read(&self.inner.dictionaries).keys().collect::<Vec<_>>())
            .field("imports", &read(&self.inner.imports).len())
            .finish()
    }
}

impl Default for TemplateGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateGroup {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::named("group", config)
    }

    pub fn named(name: impl Into<String>, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                name: name.into(),
                config: RwLock::new(config),
                templates: RwLock::new(IndexMap::new()),
                dictionaries: RwLock::new(IndexMap::new()),
                imports: RwLock::new(Vec::new()),
                import_names: RwLock::new(Vec::new()),
                renderers: RwLock::new(IndexMap::new()),
                errors: RwLock::new(ErrorManager::default()),
                adaptors: AdaptorRegistry::new(),
                subtemplate_count: AtomicUsize::new(0),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<GroupInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<GroupInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> EngineConfig {
        read(&self.inner.config).clone()
    }

    pub fn delimiters(&self) -> (char, char) {
        let config = read(&self.inner.config);
        (config.delimiter_start, config.delimiter_stop)
    }

    pub(crate) fn set_delimiters(&self, start: char, stop: char) {
        let mut config = write(&self.inner.config);
        config.delimiter_start = start;
        config.delimiter_stop = stop;
    }

    pub fn error_manager(&self) -> ErrorManager {
        read(&self.inner.errors).clone()
    }

    pub fn listener(&self) -> Arc<dyn ErrorListener> {
        read(&self.inner.errors).listener()
    }

    pub fn set_listener(&self, listener: Arc<dyn ErrorListener>) {
        *write(&self.inner.errors) = ErrorManager::new(listener);
    }

    /// Next anonymous subtemplate name: `/_sub1`, `/_sub2`, ...
    pub(crate) fn next_subtemplate_name(&self) -> String {
        let n = self.inner.subtemplate_count.fetch_add(1, Ordering::SeqCst) + 1;
        format!("/_sub{}", n)
    }

    /// Restarts subtemplate numbering, so recompiling a source names its
    /// subtemplates the same way.
    pub fn reset_subtemplate_counter(&self) {
        self.inner.subtemplate_count.store(0, Ordering::SeqCst);
    }

    /// Names of the templates defined directly in this group.
    pub fn template_names(&self) -> Vec<String> {
        read(&self.inner.templates).keys().cloned().collect()
    }

    pub fn import_names(&self) -> Vec<String> {
        read(&self.inner.import_names).clone()
    }

    pub(crate) fn record_import(&self, name: &str) {
        write(&self.inner.import_names).push(name.to_string());
    }

    /// Defines a template that takes whatever attributes callers add.
    pub fn define_template(&self, name: &str, source: &str) -> Option<Arc<CompiledTemplate>> {
        self.define(name, None, source, TemplateOrigin::default(), None)
    }

    pub fn define_template_with_args(&self, name: &str, source: &str, args: &[&str]) -> Option<Arc<CompiledTemplate>> {
        let args = args.iter().map(|a| FormalArgument::new(*a)).collect();
        self.define(name, Some(args), source, TemplateOrigin::default(), None)
    }

    /// Compiles and registers a template. `location` positions redefinition
    /// errors in the group source.
    pub fn define(
        &self,
        name: &str,
        args: Option<Vec<FormalArgument>>,
        source: &str,
        origin: TemplateOrigin,
        location: Option<Coordinate>,
    ) -> Option<Arc<CompiledTemplate>> {
        let name = fully_qualified(name);
        let source_name = origin.source_name.clone();
        if !is_valid_template_name(&name) {
            self.error_manager().compile_time_error(
                ErrorType::InvalidTemplateName,
                source_name.as_deref(),
                location,
                vec![name],
            );
            return None;
        }
        if read(&self.inner.dictionaries).contains_key(name.trim_start_matches('/')) {
            self.error_manager().compile_time_error(
                ErrorType::MapRedefinition,
                source_name.as_deref(),
                location,
                vec![name.trim_start_matches('/').to_string()],
            );
            return None;
        }
        let code = TemplateCompiler::new(self).compile(&name, args, source, origin);
        self.define_implicit_templates(&code);
        self.raw_define(&name, Arc::new(code), source_name.as_deref(), location)
    }

    /// Registers `@enclosing.name()`, overriding the region of that name.
    pub fn define_region(
        &self,
        enclosing: &str,
        name: &str,
        source: &str,
        origin: TemplateOrigin,
        location: Option<Coordinate>,
    ) -> Option<Arc<CompiledTemplate>> {
        let enclosing = fully_qualified(enclosing);
        let mangled = mangled_region_name(&enclosing, name);
        let mut origin = origin;
        let trimmed = trim_one_starting_newline(source);
        if trimmed.len() != source.len() {
            if let Some((at, _)) = origin.anchor {
                origin.anchor = Some((Coordinate::new(at.line + 1, 0), 0));
            }
        }
        let source = trim_one_trailing_newline(trimmed);
        let source_name = origin.source_name.clone();
        let mut code = TemplateCompiler::new(self).compile(&enclosing, None, source, origin);
        if self.lookup_template(&mangled).is_none() {
            self.error_manager().compile_time_error(
                ErrorType::NoSuchRegion,
                source_name.as_deref(),
                location,
                vec![enclosing, name.to_string()],
            );
            return None;
        }
        code.rename(mangled.clone());
        code.is_region = true;
        code.region_def_type = Some(RegionType::Explicit);
        let code = self.raw_define(&mangled, Arc::new(code), source_name.as_deref(), location)?;
        self.define_implicit_templates(&code);
        Some(code)
    }

    /// `alias ::= target`: both names share one compiled template.
    pub fn define_alias(&self, alias: &str, target: &str, source_name: Option<&str>, location: Option<Coordinate>) {
        let target_code = read(&self.inner.templates).get(&fully_qualified(target)).cloned();
        match target_code {
            Some(code) => {
                self.raw_define(&fully_qualified(alias), code, source_name, location);
            }
            None => self.error_manager().compile_time_error(
                ErrorType::AliasTargetUndefined,
                source_name,
                location,
                vec![alias.to_string(), target.to_string()],
            ),
        }
    }

    pub fn define_dictionary(&self, name: &str, dictionary: Dictionary) {
        self.define_dictionary_at(name, dictionary, None, None);
    }

    pub(crate) fn define_dictionary_at(
        &self,
        name: &str,
        dictionary: Dictionary,
        source_name: Option<&str>,
        location: Option<Coordinate>,
    ) {
        let error = if read(&self.inner.dictionaries).contains_key(name) {
            Some(ErrorType::MapRedefinition)
        } else if read(&self.inner.templates).contains_key(&fully_qualified(name)) {
            Some(ErrorType::TemplateRedefinitionAsMap)
        } else {
            None
        };
        match error {
            Some(error) => {
                self.error_manager()
                    .compile_time_error(error, source_name, location, vec![name.to_string()])
            }
            None => {
                write(&self.inner.dictionaries).insert(name.to_string(), Arc::new(dictionary));
                debug!(target: "stemplate", group = %self.inner.name, name, "defined dictionary");
            }
        }
    }

    /// Registers the subtemplates and regions found while compiling `code`.
    pub(crate) fn define_implicit_templates(&self, code: &CompiledTemplate) {
        for sub in &code.implicit_templates {
            self.raw_define(&sub.name, Arc::clone(sub), code.origin.source_name.as_deref(), None);
        }
    }

    fn raw_define(
        &self,
        name: &str,
        code: Arc<CompiledTemplate>,
        source_name: Option<&str>,
        location: Option<Coordinate>,
    ) -> Option<Arc<CompiledTemplate>> {
        let mut templates = write(&self.inner.templates);
        if let Some(prev) = templates.get(name) {
            let rejected = if !prev.is_region {
                Some((ErrorType::TemplateRedefinition, name.to_string()))
            } else if code.region_def_type != Some(RegionType::Implicit)
                && prev.region_def_type == Some(RegionType::Embedded)
            {
                Some((ErrorType::EmbeddedRegionRedefinition, unmangled_region_name(name)))
            } else if code.region_def_type == Some(RegionType::Implicit)
                || prev.region_def_type == Some(RegionType::Explicit)
            {
                Some((ErrorType::RegionRedefinition, unmangled_region_name(name)))
            } else {
                None
            };
            if let Some((error, arg)) = rejected {
                drop(templates);
                self.error_manager()
                    .compile_time_error(error, source_name, location, vec![arg]);
                return None;
            }
        }
        templates.insert(name.to_string(), Arc::clone(&code));
        debug!(target: "stemplate", group = %self.inner.name, name, "defined template");
        Some(code)
    }

    /// Templates and dictionaries of `group` become visible here after this
    /// group's own definitions.
    pub fn import_templates(&self, group: &TemplateGroup) {
        debug!(target: "stemplate", group = %self.inner.name, import = %group.inner.name, "imported group");
        write(&self.inner.imports).push(group.clone());
    }

    /// This group's definition of `name`, then each import's, depth first.
    pub fn lookup_template(&self, name: &str) -> Option<Arc<CompiledTemplate>> {
        let name = fully_qualified(name);
        if let Some(code) = read(&self.inner.templates).get(&name) {
            return Some(Arc::clone(code));
        }
        self.lookup_imported_template(&name)
    }

    /// `name` as defined by the imported groups only, as `super.name()` sees it.
    pub fn lookup_imported_template(&self, name: &str) -> Option<Arc<CompiledTemplate>> {
        read(&self.inner.imports)
            .iter()
            .find_map(|g| g.lookup_template(name))
    }

    pub fn lookup_dictionary(&self, name: &str) -> Option<Arc<Dictionary>> {
        if let Some(dict) = read(&self.inner.dictionaries).get(name) {
            return Some(Arc::clone(dict));
        }
        read(&self.inner.imports)
            .iter()
            .find_map(|g| g.lookup_dictionary(name))
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.lookup_template(name).is_some()
    }

    pub fn is_dictionary(&self, name: &str) -> bool {
        self.lookup_dictionary(name).is_some()
    }

    /// A fresh instance of `name` with no attributes bound.
    pub fn get_instance_of(&self, name: &str) -> Option<Template> {
        self.lookup_template(name)
            .map(|code| Template::from_compiled(code, self.clone()))
    }

    /// [`get_instance_of`](Self::get_instance_of) for callers that treat a
    /// missing template as an error.
    pub fn instance_of(&self, name: &str) -> Result<Template, TemplateError> {
        self.get_instance_of(name)
            .ok_or_else(|| TemplateError::NoSuchTemplate(fully_qualified(name)))
    }

    /// Compiles `source` as an unnamed template whose attributes are
    /// whatever callers add.
    pub fn create_string_template(&self, source: &str) -> Template {
        let code = TemplateCompiler::new(self).compile_ad_hoc(ANONYMOUS_NAME, source);
        self.define_implicit_templates(&code);
        Template::from_compiled(Arc::new(code), self.clone())
    }

    /// Renderer for values whose type name is exactly `type_name`.
    pub fn register_renderer(&self, type_name: &str, renderer: Arc<dyn AttributeRenderer>) {
        write(&self.inner.renderers).insert(type_name.to_string(), renderer);
        debug!(target: "stemplate", group = %self.inner.name, type_name, "registered renderer");
    }

    pub fn renderer(&self, type_name: &str) -> Option<Arc<dyn AttributeRenderer>> {
        read(&self.inner.renderers).get(type_name).cloned()
    }

    pub fn register_model_adaptor(&self, type_name: &str, adaptor: Arc<dyn ModelAdaptor>) {
        self.inner.adaptors.register(type_name, adaptor);
    }

    pub fn adaptors(&self) -> &AdaptorRegistry {
        &self.inner.adaptors
    }

    /// Loads `import` (a path relative to `dir`) as a group of its own and
    /// imports it. Problems are reported against `source_name`.
    pub(crate) fn import_file(&self, dir: &Path, import: &str, source_name: &str, location: Option<Coordinate>) {
        let path = dir.join(import);
        if !path.is_file() {
            self.error_manager().compile_time_error(
                ErrorType::CantImport,
                Some(source_name),
                location,
                vec![import.to_string()],
            );
            return;
        }
        let name = path
            .file_stem()
            .map_or_else(|| import.to_string(), |s| s.to_string_lossy().into_owned());
        let imported = Self::named(name, self.config());
        imported.set_listener(self.listener());
        if imported.load_group_file(&path).is_ok() {
            self.import_templates(&imported);
        }
    }

    /// Parses group-file syntax into a new group.
    pub fn from_group_string(source: &str) -> Self {
        let group = Self::new();
        group.load_group_string("<string>", source);
        group
    }

    /// Parses group-file syntax into this group. Problems go to the listener.
    pub fn load_group_string(&self, source_name: &str, source: &str) {
        parser::GroupParser::new(self, source_name, source).parse();
    }

    /// Reads a group file into a new group named after the file.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map_or_else(|| "group".to_string(), |s| s.to_string_lossy().into_owned());
        let group = Self::named(name, EngineConfig::default());
        group.load_group_file(path)?;
        Ok(group)
    }

    /// Reads a group file into this group. Each `import` names a group file
    /// relative to this one; it is loaded and imported where it appears.
    pub fn load_group_file(&self, path: impl AsRef<Path>) -> Result<(), TemplateError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| {
            self.error_manager().io_error(
                ErrorType::CantLoadGroupFile,
                &source,
                vec![path.display().to_string()],
            );
            TemplateError::Io {
                path: path.display().to_string(),
                source,
            }
        })?;
        let source_name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |s| s.to_string_lossy().into_owned());
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        parser::GroupParser::new(self, &source_name, &source)
            .resolving_imports_from(dir)
            .parse();
        debug!(target: "stemplate", path = %path.display(), templates = self.template_names().len(), "loaded group file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorBuffer;
    use crate::value::Value;

    fn group_with_errors() -> (TemplateGroup, Arc<ErrorBuffer>) {
        let group = TemplateGroup::new();
        let errors = Arc::new(ErrorBuffer::new());
        group.set_listener(errors.clone());
        (group, errors)
    }

    #[test]
    fn test_region_names() {
        assert_eq!(mangled_region_name("t", "r"), "/region__/t__r");
        assert_eq!(unmangled_region_name("/region__/t__r"), "/t.r");
        assert_eq!(unmangled_region_name("/t"), "/t");
    }

    #[test]
    fn test_subtemplates_are_registered() {
        let group = TemplateGroup::new();
        group.define_template_with_args("t", "<xs:{x | [<x>]}>", &["xs"]);
        assert!(group.is_defined("/_sub1"));
        let mut t = group.get_instance_of("t").unwrap();
        t.add("xs", vec!["a", "b"]).unwrap();
        assert_eq!(t.render(), "[a][b]");
    }

    #[test]
    fn test_invalid_template_names_are_rejected() {
        let (group, errors) = group_with_errors();
        assert!(group.define_template("bad name", "x").is_none());
        assert!(group.define_template("a//b", "x").is_none());
        assert!(group.define_template("9lives", "x").is_none());
        assert!(group.define_template("pkg/ok-name_2", "x").is_some());
        assert_eq!(
            errors.to_string(),
            "0:-1: invalid template name or path: /bad name\n\
             0:-1: invalid template name or path: /a//b\n\
             0:-1: invalid template name or path: /9lives\n"
        );
    }

    #[test]
    fn test_instance_of_reports_missing_template() {
        let group = TemplateGroup::new();
        group.define_template("t", "x");
        assert_eq!(group.instance_of("t").map(|t| t.render()).ok(), Some("x".to_string()));
        match group.instance_of("nope") {
            Err(err) => assert_eq!(err.to_string(), "no such template: /nope"),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[test]
    fn test_redefinition_is_reported() {
        let (group, errors) = group_with_errors();
        group.define_template("t", "a");
        assert!(group.define_template("t", "b").is_none());
        assert_eq!(errors.to_string(), "0:-1: redefinition of template /t\n");
        assert_eq!(group.get_instance_of("t").unwrap().render(), "a");
    }

    #[test]
    fn test_dictionary_and_template_names_clash() {
        let (group, errors) = group_with_errors();
        group.define_dictionary("d", Dictionary::new());
        group.define_dictionary("d", Dictionary::new());
        group.define_template("t", "");
        group.define_dictionary("t", Dictionary::new());
        group.define_template("d", "");
        assert_eq!(
            errors.to_string(),
            "0:-1: redefinition of dictionary d\n\
             0:-1: redefinition of template t as a map\n\
             0:-1: redefinition of dictionary d\n"
        );
    }

    #[test]
    fn test_imports_resolve_after_own_templates() {
        let base = TemplateGroup::new();
        base.define_template("a", "base a");
        base.define_template("b", "base b");
        let sub = TemplateGroup::new();
        sub.define_template("a", "sub a, <super.a()>, <b()>");
        sub.import_templates(&base);
        assert_eq!(sub.get_instance_of("a").unwrap().render(), "sub a, base a, base b");
        assert!(base.lookup_imported_template("a").is_none());
    }

    #[test]
    fn test_region_override() {
        let (group, errors) = group_with_errors();
        group.define_template("t", "[<@r()>]");
        group.define_region("t", "r", "\nfoo\n", TemplateOrigin::default(), None);
        assert_eq!(group.get_instance_of("t").unwrap().render(), "[foo]");
        group.define_region("u", "r", "x", TemplateOrigin::default(), None);
        assert_eq!(errors.to_string(), "0:-1: template /u doesn't have a region called r\n");
    }

    #[test]
    fn test_explicit_region_cannot_hide_embedded_one() {
        let (group, errors) = group_with_errors();
        group.define_template("t", "[<@r>x<@end>]");
        group.define_region("t", "r", "y", TemplateOrigin::default(), None);
        assert_eq!(
            errors.to_string(),
            "0:-1: region /t.r is embedded and thus already implicitly defined\n"
        );
        assert_eq!(group.get_instance_of("t").unwrap().render(), "[x]");
    }

    #[test]
    fn test_alias() {
        let (group, errors) = group_with_errors();
        group.define_template("a", "hi");
        group.define_alias("b", "a", None, None);
        group.define_alias("c", "nope", None, None);
        assert_eq!(group.get_instance_of("b").unwrap().render(), "hi");
        assert_eq!(errors.to_string(), "0:-1: cannot alias c to undefined template: nope\n");
    }

    #[test]
    fn test_dictionary_visible_to_templates() {
        let group = TemplateGroup::new();
        let mut d = Dictionary::new();
        d.insert("int", "0");
        group.define_dictionary("typeInit", d);
        group.define_template_with_args("var", "<type> <name> = <typeInit.(type)>;", &["type", "name"]);
        let mut t = group.get_instance_of("var").unwrap();
        t.add("type", "int").unwrap().add("name", "x").unwrap();
        assert_eq!(t.render(), "int x = 0;");
        assert!(group.is_dictionary("typeInit"));
        assert!(matches!(group.lookup_dictionary("typeInit").map(Value::Map), Some(Value::Map(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let (group, errors) = group_with_errors();
        let result = group.load_group_file("/nonexistent/dir/t.stg");
        assert!(matches!(result, Err(TemplateError::Io { .. })));
        assert!(errors.to_string().starts_with("can't Load group file /nonexistent/dir/t.stg"));
    }
}
