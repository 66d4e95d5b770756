//! `quill parse` -- parse text with a persisted model.

use std::path::PathBuf;

use clap::Args;

use quill_core::Model;

use super::registry;

/// Arguments for the `quill parse` subcommand.
#[derive(Args)]
pub struct ParseArgs {
    /// Model directory (containing `metadata.json`).
    #[arg(short, long)]
    pub model: PathBuf,

    /// Text to parse.
    pub text: String,
}

/// Parse and print the result as JSON.
pub fn run(args: ParseArgs) -> anyhow::Result<()> {
    let model = Model::load(&args.model, &registry())?;
    let result = model.parse(&args.text, None)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
