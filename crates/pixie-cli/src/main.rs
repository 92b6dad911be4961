//! `pixie` — command-line interface for the Pixie register-synchronization engine.
//!
//! ```text
//! USAGE:
//!   pixie list [scope]                          List fields of a scope
//!   pixie describe <scope> <field>              Storage, limits, dependents of a field
//!   pixie get <scope> <field> [-u N] [-c N]     Read a field or aggregate
//!   pixie set <scope> <field> <value> [-u N] [-c N]
//!                                               Write a field or aggregate
//!   pixie run <script>                          Run a transfer script in one session
//! ```
//!
//! Each invocation boots a fresh simulated crate from the configuration
//! (`--config`, or four Pixie-4e units). `run` keeps one engine for the
//! whole script.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pixie_regs::BoardVariant;
use pixie_sync::descriptor::Storage;
use pixie_sync::{
    EngineConfig, EngineeringValue, Record, Scope, SoftwareBackend, SyncEngine, TransferRequest,
};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pixie", about = "Pixie-4/4e/500e register synchronization", version)]
struct Cli {
    /// Engine configuration (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Print values as JSON
    #[arg(long, global = true)]
    json: bool,
    /// Debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List the fields of one scope, or of all scopes.
    List {
        /// SYSTEM, MODULE or CHANNEL.
        scope: Option<String>,
    },
    /// Show how a field is stored, limited and propagated.
    Describe {
        /// SYSTEM, MODULE or CHANNEL.
        scope: String,
        /// Exact field name.
        field: String,
    },
    /// Read a field or aggregate.
    Get {
        /// SYSTEM, MODULE or CHANNEL.
        scope: String,
        /// Exact field or aggregate name.
        field: String,
        /// Unit index.
        #[arg(short, long, default_value_t = 0)]
        unit: usize,
        /// Channel index.
        #[arg(short, long, default_value_t = 0)]
        channel: usize,
    },
    /// Write a field or aggregate and print the effective value.
    Set {
        /// SYSTEM, MODULE or CHANNEL.
        scope: String,
        /// Exact field or aggregate name.
        field: String,
        /// Number, JSON array of words, or JSON object for aggregates.
        value: String,
        /// Unit index.
        #[arg(short, long, default_value_t = 0)]
        unit: usize,
        /// Channel index.
        #[arg(short, long, default_value_t = 0)]
        channel: usize,
    },
    /// Run a script of `get|set <scope> <field> <unit> <channel> [value]` lines.
    Run {
        /// Script path.
        script: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()),
        )
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Cmd::List { scope } => cmd_list(scope.as_deref())?,
        Cmd::Describe { scope, field } => cmd_describe(&scope, &field)?,
        Cmd::Get {
            scope,
            field,
            unit,
            channel,
        } => {
            let mut engine = boot(&config)?;
            let request = TransferRequest::parse("get", &scope, &field, unit, channel, None)?;
            print_value(&engine.read_through(request)?, cli.json)?;
        }
        Cmd::Set {
            scope,
            field,
            value,
            unit,
            channel,
        } => {
            let mut engine = boot(&config)?;
            let value = parse_value(&value)?;
            let request = TransferRequest::parse("set", &scope, &field, unit, channel, Some(value))?;
            print_value(&engine.transfer(request)?, cli.json)?;
        }
        Cmd::Run { script } => cmd_run(&config, &script, cli.json)?,
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading configuration {}", path.display())),
        None => Ok(EngineConfig::uniform(4, BoardVariant::Pixie4e16x125)),
    }
}

fn boot(config: &EngineConfig) -> Result<SyncEngine<SoftwareBackend>> {
    let backend = SoftwareBackend::from_config(config);
    let engine = SyncEngine::new(backend, config).context("booting engine")?;
    info!("engine up: {} present unit(s)", engine.topology().present());
    Ok(engine)
}

fn scope_arg(token: &str) -> Result<Scope> {
    Scope::from_token(token)
        .with_context(|| format!("invalid scope {token:?} (expected SYSTEM, MODULE or CHANNEL)"))
}

/// Number, JSON word array, or JSON object of field values
fn parse_value(text: &str) -> Result<EngineeringValue> {
    if let Ok(v) = text.trim().parse::<f64>() {
        return Ok(v.into());
    }
    let json: serde_json::Value =
        serde_json::from_str(text).with_context(|| format!("cannot parse value {text:?}"))?;
    json_value(&json)
}

fn json_value(json: &serde_json::Value) -> Result<EngineeringValue> {
    match json {
        serde_json::Value::Number(n) => n
            .as_f64()
            .map(EngineeringValue::from)
            .with_context(|| format!("number {n} out of range")),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| item.as_f64().with_context(|| format!("word {item} is not a number")))
            .collect::<Result<Vec<_>>>()
            .map(EngineeringValue::from),
        serde_json::Value::Object(fields) => {
            let mut record = Record::new();
            for (name, value) in fields {
                record = record.with(name.as_str(), json_value(value)?);
            }
            Ok(record.into())
        }
        other => bail!("unsupported value {other}"),
    }
}

fn print_value(value: &EngineeringValue, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print!("{value}");
        if !matches!(value, EngineeringValue::Record(_)) {
            println!();
        }
    }
    Ok(())
}

fn cmd_list(scope: Option<&str>) -> Result<()> {
    let catalog = pixie_sync::Catalog::standard();
    let scopes = match scope {
        Some(token) => vec![scope_arg(token)?],
        None => vec![Scope::System, Scope::Unit, Scope::Channel],
    };
    for scope in scopes {
        println!("{scope} ({} fields)", catalog.len(scope));
        for desc in catalog.iter(scope) {
            println!("  {:<24} {}", desc.name, desc.access);
        }
        println!();
    }
    Ok(())
}

fn cmd_describe(scope: &str, field: &str) -> Result<()> {
    let catalog = pixie_sync::Catalog::standard();
    let desc = catalog.lookup(scope_arg(scope)?, field)?;

    println!("Field        : {}/{}", desc.scope, desc.name);
    println!("Access       : {}", desc.access);
    match desc.storage {
        Storage::Host { len } => println!("Storage      : host, {len} value(s)"),
        Storage::Dsp { .. } => match desc.span(Some(0)) {
            Some(span) => println!(
                "Storage      : DSP words {:#05x}..{:#05x} (channel 0)",
                span.start, span.end
            ),
            None => println!("Storage      : DSP"),
        },
        Storage::Derived(d) => println!("Storage      : derived ({d:?})"),
    }
    println!("Conversion   : {:?}", desc.conversion);
    println!("Limit        : {:?}", desc.limit);
    println!("Propagation  : {:?}", desc.propagation);
    println!("Category     : {:?}", desc.category);
    if !desc.dependents.is_empty() {
        let names: Vec<String> = desc
            .dependents
            .iter()
            .map(|d| format!("{} ({:?})", d.name, d.target))
            .collect();
        println!("Dependents   : {}", names.join(", "));
    }
    if !desc.apply.is_empty() {
        let tasks: Vec<String> = desc.apply.iter().map(ToString::to_string).collect();
        println!("Apply tasks  : {}", tasks.join(", "));
    }
    Ok(())
}

fn cmd_run(config: &EngineConfig, script: &Path, json: bool) -> Result<()> {
    let text = std::fs::read_to_string(script)
        .with_context(|| format!("reading script {}", script.display()))?;
    let mut engine = boot(config)?;

    for (n, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        let request = script_request(line).with_context(|| format!("line {}: {line}", n + 1))?;
        let target = request.target;
        let field = request.field.clone();
        let value = engine
            .read_through(request)
            .with_context(|| format!("line {}: {line}", n + 1))?;
        if json {
            println!("{}", serde_json::to_string(&value)?);
        } else {
            println!("{target} {field} = {value}");
        }
    }
    Ok(())
}

/// `get|set <scope> <field> <unit> <channel> [value]`
fn script_request(line: &str) -> Result<TransferRequest> {
    let mut rest = line;
    let mut token = || {
        let trimmed = rest.trim_start();
        let end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        let (head, tail) = trimmed.split_at(end);
        rest = tail;
        (!head.is_empty()).then_some(head)
    };
    let (Some(direction), Some(scope), Some(field)) = (token(), token(), token()) else {
        bail!("expected `get|set <scope> <field> <unit> <channel> [value]`");
    };
    let unit = token().map_or(Ok(0), str::parse).context("unit index")?;
    let channel = token().map_or(Ok(0), str::parse).context("channel index")?;
    let value = match rest.trim() {
        "" => None,
        text => Some(parse_value(text)?),
    };
    Ok(TransferRequest::parse(direction, scope, field, unit, channel, value)?)
}
