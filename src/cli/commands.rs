//! CLI command definitions

use clap::Args;
use serde_json::{Map, Value};

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Print events and the final result as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Pipeline inputs (key=value; values are parsed as JSON when possible)
    #[arg(long, value_parser = parse_key_value)]
    pub input: Vec<(String, String)>,

    /// Override the configured concurrency limit
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// Stop dispatching new steps after the first failure
    #[arg(long)]
    pub stop_on_error: bool,
}

impl RunCommand {
    /// Collect `--input` pairs into the run's input object
    pub fn inputs(&self) -> Value {
        let mut inputs = Map::new();
        for (key, raw) in &self.input {
            let value =
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()));
            inputs.insert(key.clone(), value);
        }
        Value::Object(inputs)
    }
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
