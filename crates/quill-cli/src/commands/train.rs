//! `quill train` -- train a model and persist it.
//!
//! # Example
//!
//! ```text
//! quill train --config pipeline.yml --data data/ --path models --project p1
//! ```

use std::path::{Path, PathBuf};

use clap::Args;

use quill_core::train::do_train;
use quill_core::training_data::{load_data, load_data_from_value};
use quill_types::config::{ModelConfig, make_path_absolute};
use quill_types::training::TrainingData;

use super::registry;

/// Arguments for the `quill train` subcommand.
#[derive(Args)]
pub struct TrainArgs {
    /// Model config (YAML or JSON).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Pipeline template, used when no config file is given.
    #[arg(long, default_value = "bag_of_words")]
    pub template: String,

    /// Training data file or directory. Defaults to the config's `data`.
    #[arg(short, long)]
    pub data: Option<PathBuf>,

    /// Model root directory.
    #[arg(long, default_value = "models")]
    pub path: PathBuf,

    /// Project to train the model for.
    #[arg(long, default_value = "default")]
    pub project: String,

    /// Use this name instead of a timestamped one.
    #[arg(long)]
    pub fixed_model_name: Option<String>,
}

fn training_data(data: Option<&Path>, config: &mut ModelConfig) -> anyhow::Result<TrainingData> {
    if let Some(path) = data {
        return Ok(load_data(path)?);
    }
    match config.data.take() {
        Some(inline) => Ok(load_data_from_value(&inline)?),
        None => anyhow::bail!("no training data: pass --data or set 'data' in the model config"),
    }
}

/// Train once and print the model directory.
pub fn run(args: TrainArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => ModelConfig::load(path)?,
        None => ModelConfig::from_template(&args.template)?,
    };
    let data = training_data(args.data.as_deref(), &mut config)?;

    let root = make_path_absolute(&args.path);
    let (_, dir) = do_train(
        &config,
        &data,
        &registry(),
        Some(&root),
        &args.project,
        args.fixed_model_name.as_deref(),
    )?;
    if let Some(dir) = dir {
        println!("{}", dir.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trains_from_inline_data() {
        let root = tempfile::tempdir().unwrap();
        let config_path = root.path().join("pipeline.yml");
        std::fs::write(
            &config_path,
            "pipeline: keyword\ndata: |\n  ## intent:greet\n  - hello\n",
        )
        .unwrap();
        run(TrainArgs {
            config: Some(config_path),
            template: "bag_of_words".into(),
            data: None,
            path: root.path().join("models"),
            project: "p1".into(),
            fixed_model_name: Some("m1".into()),
        })
        .unwrap();
        assert!(root.path().join("models/p1/m1/metadata.json").is_file());
    }

    #[test]
    fn missing_data_is_an_error() {
        let mut config = ModelConfig::from_template("keyword").unwrap();
        assert!(training_data(None, &mut config).is_err());
    }
}
