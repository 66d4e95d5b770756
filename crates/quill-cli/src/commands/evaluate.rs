//! `quill evaluate` -- score a persisted model against labelled data.

use std::path::PathBuf;

use clap::Args;

use quill_core::Model;
use quill_core::evaluate::{EvaluationResult, IntentPrediction, clean_intent_label};
use quill_core::training_data::load_data;
use quill_types::training::TrainingData;

use super::registry;

/// Arguments for the `quill evaluate` subcommand.
#[derive(Args)]
pub struct EvaluateArgs {
    /// Model directory (containing `metadata.json`).
    #[arg(short, long)]
    pub model: PathBuf,

    /// Labelled data file or directory.
    #[arg(short, long)]
    pub data: PathBuf,
}

fn evaluate(model: &Model, data: &TrainingData) -> anyhow::Result<EvaluationResult> {
    let mut predictions = Vec::new();
    for example in data.intent_examples() {
        let result = model.parse(example.text(), None)?;
        predictions.push(IntentPrediction {
            text: example.text().to_string(),
            intent: clean_intent_label(example.intent_name()),
            predicted: clean_intent_label(Some(result.intent.name.as_str())),
            confidence: result.intent.confidence,
        });
    }
    Ok(EvaluationResult::from_predictions(predictions))
}

/// Evaluate and print the report as JSON.
pub fn run(args: EvaluateArgs) -> anyhow::Result<()> {
    let model = Model::load(&args.model, &registry())?;
    let data = load_data(&args.data)?;
    let report = evaluate(&model, &data)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_model_scores_keyword_examples() {
        let model = Model::fallback(&registry()).unwrap();
        let data = quill_core::training_data::load_data_from_str(
            "## intent:greet\n- hello\n- what now\n",
            "test.md",
        )
        .unwrap();
        let report = evaluate(&model, &data).unwrap();
        let eval = report.intent_evaluation;
        assert_eq!(eval.predictions.len(), 2);
        assert_eq!(eval.predictions[1].predicted, "");
        assert_eq!(eval.accuracy, 0.5);
    }
}
