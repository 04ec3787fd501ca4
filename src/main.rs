use anyhow::{Context, Result};
use pipeline_engine::cli::commands::{RunCommand, ValidateCommand};
use pipeline_engine::cli::output::*;
use pipeline_engine::cli::{Cli, Command};
use pipeline_engine::core::PipelineConfig;
use pipeline_engine::execution::EventType;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Logs go to stderr so `--json` output on stdout stays machine readable
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
    }

    Ok(())
}

async fn run_pipeline(cmd: &RunCommand) -> Result<()> {
    let config = PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline config")?;
    let mut pipeline = config.to_pipeline();

    if let Some(max) = cmd.max_concurrency {
        pipeline.options.max_concurrency = max;
    }
    if cmd.stop_on_error {
        pipeline.options.stop_on_error = true;
    }

    if !cmd.json {
        println!(
            "{} Loaded pipeline: {} ({} steps)",
            INFO,
            style(&pipeline.id).bold(),
            style(pipeline.len()).cyan()
        );
    }

    let mut run = pipeline
        .execute(cmd.inputs())
        .context("Pipeline failed validation")?;

    let progress = (!cmd.json).then(create_progress_bar);
    while let Some(event) = run.next_event().await {
        match &progress {
            Some(bar) => {
                if let Some(pos) = event.progress {
                    bar.set_position(pos as u64);
                }
                if event.kind == EventType::StepStarted {
                    bar.set_message(event.step_name.clone().unwrap_or_default());
                }
                bar.println(format_event(&event));
            }
            None => println!("{}", serde_json::to_string(&event)?),
        }
    }
    if let Some(bar) = &progress {
        bar.finish_and_clear();
    }

    let result = match run.finish().await {
        Ok(result) => result,
        Err(e) => {
            error!("{}", e);
            println!("{} {}", CROSS, style(e).red());
            std::process::exit(1);
        }
    };

    if cmd.json {
        println!("{}", serde_json::to_string(&result)?);
    } else {
        println!("\n{}", format_result(&result));
    }

    if !result.success {
        std::process::exit(1);
    }

    Ok(())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    let config = match PipelineConfig::from_file(&cmd.file) {
        Ok(config) => config,
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    };

    let pipeline = config.to_pipeline();
    let report = pipeline.validate();

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.valid {
        println!("{} Pipeline configuration is valid!", CHECK);
        println!("  Name: {}", style(&config.name).bold());
        println!("  Steps: {}", style(config.steps.len()).cyan());
        println!(
            "  Order: {}",
            style(pipeline.execution_order().join(" -> ")).dim()
        );
    } else {
        println!("{} Validation failed:", CROSS);
        for err in &report.errors {
            println!("  {}", style(err).red());
        }
    }

    if !report.valid {
        std::process::exit(1);
    }

    Ok(())
}
