/// CLI: normalizes schemas and validates values against them.
///
/// Usage:
///   schemaform normalize schema.json [--required a,b.c]        > normalized.json
///   schemaform validate  schema.json [value.json] [--required a,b.c] [--options opts.json]
///
/// `validate` reads the value from stdin when no value file is given, prints
/// the error list as JSON and exits 1 when it is not empty.
use schemaform::context::FormOptions;
use schemaform::validate::{CustomValidators, Validator};
use serde_json::Value;
use std::io::Read;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn fail(message: String) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn read_json(path: Option<&str>) -> Value {
    let text = match path {
        Some(path) => std::fs::read_to_string(path)
            .unwrap_or_else(|e| fail(format!("Cannot read {path}: {e}"))),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .unwrap_or_else(|e| fail(format!("Cannot read stdin: {e}")));
            buf
        }
    };
    serde_json::from_str(&text).unwrap_or_else(|e| {
        fail(format!(
            "Invalid JSON in {}: {e}",
            path.unwrap_or("stdin")
        ))
    })
}

fn usage() {
    eprintln!("Usage: schemaform normalize <schema.json> [--required a,b]");
    eprintln!("       schemaform validate <schema.json> [value.json] [--required a,b] [--options opts.json]");
    eprintln!("  validate reads the value from stdin when no value file is given.");
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut command: Option<&str> = None;
    let mut positional: Vec<&str> = Vec::new();
    let mut required: Vec<String> = Vec::new();
    let mut options_path: Option<&str> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--required" | "-r" => {
                i += 1;
                if i < args.len() {
                    required.extend(
                        args[i]
                            .split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(String::from),
                    );
                }
            }
            "--options" | "-o" => {
                i += 1;
                if i < args.len() {
                    options_path = Some(args[i].as_str());
                }
            }
            "--help" | "-h" => {
                usage();
                std::process::exit(0);
            }
            arg if command.is_none() => command = Some(arg),
            arg => positional.push(arg),
        }
        i += 1;
    }

    let mut options = match options_path {
        Some(path) => FormOptions::from_value(read_json(Some(path)))
            .unwrap_or_else(|e| fail(format!("{path}: {e}"))),
        None => FormOptions::default(),
    };
    options.required.extend(required);

    let Some(schema_path) = positional.first().copied() else {
        usage();
        std::process::exit(1);
    };
    let raw_schema = read_json(Some(schema_path));
    let compiled = schemaform::compiler::compile(&raw_schema)
        .unwrap_or_else(|e| fail(format!("Invalid schema: {e}")));
    let schema = schemaform::normalize::normalize(&compiled, &options.required);

    match command {
        Some("normalize") => {
            let text = serde_json::to_string_pretty(&schema.to_json())
                .unwrap_or_else(|e| fail(format!("Cannot serialize schema: {e}")));
            println!("{text}");
        }
        Some("validate") => {
            let value = read_json(positional.get(1).copied());
            let validator = Validator::new(Arc::new(schema), CustomValidators::new());
            let errors = validator
                .validate(&value)
                .await
                .unwrap_or_else(|e| fail(format!("Validation failed: {e}")));
            let text = serde_json::to_string_pretty(&errors)
                .unwrap_or_else(|e| fail(format!("Cannot serialize errors: {e}")));
            println!("{text}");
            if !errors.is_empty() {
                std::process::exit(1);
            }
        }
        Some(other) => {
            eprintln!("Unknown command: {other}. Use 'normalize' or 'validate'.");
            std::process::exit(1);
        }
        None => {
            usage();
            std::process::exit(1);
        }
    }
}
