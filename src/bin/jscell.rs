//! CLI tool: parse JSON strictly and print it back out
//!
//! Usage: jscell [options] [FILE]
//!
//! Options:
//!   --indent <n>      Indent output by n spaces (clamped to 10)
//!   --stats           Print GC statistics to stderr
//!   --config <file>   Load a RuntimeConfig from a JSON file
//!
//! Reads from stdin when no file is given.

use std::env;
use std::fs;
use std::io::Read;
use std::path::PathBuf;

use jscell::{JsValue, Runtime, RuntimeConfig};

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// CLI configuration
struct Options {
    input: Option<PathBuf>,
    indent: Option<i32>,
    stats: bool,
    config: Option<PathBuf>,
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();
    let program_name = args.first().map_or("jscell", |s| s.as_str());

    let mut options = Options {
        input: None,
        indent: None,
        stats: false,
        config: None,
    };

    let mut i = 1;
    while i < args.len() {
        let Some(arg) = args.get(i) else {
            break;
        };
        if arg == "--indent" {
            i += 1;
            options.indent = Some(
                args.get(i)
                    .ok_or_else(|| "--indent requires a value".to_string())?
                    .parse::<i32>()
                    .map_err(|_| "--indent must be an integer".to_string())?,
            );
        } else if arg == "--config" {
            i += 1;
            options.config = Some(PathBuf::from(
                args.get(i)
                    .ok_or_else(|| "--config requires a value".to_string())?,
            ));
        } else if arg == "--stats" {
            options.stats = true;
        } else if arg == "--help" || arg == "-h" {
            return Err(format!(
                "Usage: {} [--indent <n>] [--stats] [--config <file>] [FILE]",
                program_name
            ));
        } else if arg.starts_with('-') && arg != "-" {
            return Err(format!("Unknown option: {}", arg));
        } else if arg != "-" {
            options.input = Some(PathBuf::from(arg));
        }
        i += 1;
    }

    Ok(options)
}

fn load_config(path: Option<&PathBuf>) -> Result<RuntimeConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
            let config = serde_json::from_str(&text)
                .map_err(|e| format!("Invalid config {}: {}", path.display(), e))?;
            Ok(config)
        }
        // Allow overriding GC threshold via environment variable for stress testing
        None => Ok(RuntimeConfig::from_env()),
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let options = parse_args()?;
    let config = load_config(options.config.as_ref())?;

    let source = match &options.input {
        Some(path) => fs::read_to_string(path)
            .map_err(|e| format!("Cannot read {}: {}", path.display(), e))?,
        None => {
            let mut source = String::new();
            std::io::stdin().read_to_string(&mut source)?;
            source
        }
    };

    let mut runtime = Runtime::with_config(config);
    let value = runtime.json_parse(&source, None)?;
    let space = options.indent.map_or(JsValue::Undefined, JsValue::Int32);
    let text = runtime.json_stringify(&value, &JsValue::Undefined, &space)?;
    println!("{}", text.to_js_string());

    if options.stats {
        let stats = runtime.gc_stats();
        eprintln!(
            "GC: {} live, {} pooled, {} total, {} collections, {} extra bytes",
            stats.live_objects,
            stats.pooled_objects,
            stats.total_objects,
            stats.collections,
            stats.extra_memory_bytes
        );
    }
    Ok(())
}
