//! `validate` command: check the configuration without running.

use anyhow::{Context, Result};

use crate::cli::ValidateArgs;
use crate::commands::load_experiment;
use crate::pipeline::PipelineContext;

pub async fn run_validate(args: &ValidateArgs) -> Result<()> {
    let (blueprint, subject, finder) = load_experiment(&args.experiment)?;

    // Building the context exercises component resolution, argument
    // schemas, and buffer wiring without opening any reader for data.
    let context = PipelineContext::from_blueprint(&blueprint, subject, finder, false)
        .context("configuration is invalid")?;

    println!("\n=== Configuration Summary ===\n");
    println!("Readers ({}):", context.routers.len());
    for router in &context.routers {
        let sync = match router.sync_reader_name() {
            Some(name) if router.is_reference() => format!(" [sync reference: {name}]"),
            Some(name) => format!(" [sync: {name}]"),
            None => String::new(),
        };
        println!("  - {}{}", router.name(), sync);
        for buffer in router.buffer_names() {
            println!("      -> {}", buffer);
        }
    }
    println!("\nTrials:");
    println!("  start buffer: {}", context.delimiter.start_buffer());
    println!("  wrt buffer:   {}", context.extractor.wrt_buffer());
    println!("\nConfiguration is valid.");
    Ok(())
}
