use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use stemplate::{DateRenderer, EngineConfig, NumberRenderer, StringRenderer, TemplateGroup, Value};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Renders one template of a group file to stdout
    Render(RenderArgs),
    /// Prints the bytecode listing of a template
    Disasm(DisasmArgs),
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// The group file (.stg)
    group: PathBuf,

    /// Name of the template to render
    template: String,

    /// JSON object whose fields become the template's attributes
    #[arg(short, long)]
    attrs: Option<PathBuf>,

    /// TOML engine configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Wrap column, overriding the configuration
    #[arg(short, long)]
    width: Option<usize>,
}

#[derive(Parser, Debug)]
struct DisasmArgs {
    /// The group file (.stg)
    group: PathBuf,

    /// Name of the template to list
    template: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Render(args) => render(args),
        Commands::Disasm(args) => disasm(args),
    }
}

fn load_group(path: &Path, config: EngineConfig) -> Result<TemplateGroup> {
    let name = path
        .file_stem()
        .map_or_else(|| "group".to_string(), |s| s.to_string_lossy().into_owned());
    let group = TemplateGroup::named(name, config);
    group.register_renderer("string", Arc::new(StringRenderer));
    group.register_renderer("int", Arc::new(NumberRenderer));
    group.register_renderer("float", Arc::new(NumberRenderer));
    group.register_renderer("date", Arc::new(DateRenderer));
    group
        .load_group_file(path)
        .with_context(|| format!("failed to load group file '{}'", path.display()))?;
    Ok(group)
}

fn read_attributes(path: &Path) -> Result<serde_json::Map<String, serde_json::Value>> {
    let text = fs::read_to_string(path).with_context(|| format!("failed to read '{}'", path.display()))?;
    match serde_json::from_str(&text).with_context(|| format!("'{}' is not valid JSON", path.display()))? {
        serde_json::Value::Object(fields) => Ok(fields),
        _ => bail!("'{}' must hold a JSON object", path.display()),
    }
}

fn render(args: RenderArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => EngineConfig::load(path).with_context(|| format!("failed to load config '{}'", path.display()))?,
        None => EngineConfig::default(),
    };
    let group = load_group(&args.group, config)?;
    let mut template = group
        .instance_of(&args.template)
        .with_context(|| format!("cannot render from '{}'", args.group.display()))?;

    if let Some(path) = &args.attrs {
        for (name, value) in read_attributes(path)? {
            template
                .add(&name, Value::from(value))
                .with_context(|| format!("cannot bind attribute '{}'", name))?;
        }
    }

    let output = match args.width {
        Some(width) => template.render_with_width(width),
        None => template.render(),
    };
    println!("{}", output);
    Ok(())
}

fn disasm(args: DisasmArgs) -> Result<()> {
    let group = load_group(&args.group, EngineConfig::default())?;
    let template = group
        .instance_of(&args.template)
        .with_context(|| format!("cannot list from '{}'", args.group.display()))?;
    print!("{}", template.compiled().dump());
    Ok(())
}
