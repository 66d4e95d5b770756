//! `quill convert` -- convert training data between formats.
//!
//! # Example
//!
//! ```text
//! quill convert --data data.md --out data.json --format json
//! ```

use std::path::PathBuf;

use clap::Args;

use quill_core::training_data::{DataFormat, load_data, to_string};

/// Arguments for the `quill convert` subcommand.
#[derive(Args)]
pub struct ConvertArgs {
    /// Input file or directory.
    #[arg(short, long)]
    pub data: PathBuf,

    /// Output file.
    #[arg(short, long)]
    pub out: PathBuf,

    /// Output format (json, md).
    #[arg(short, long, default_value = "json")]
    pub format: String,
}

/// Read, convert, write.
pub fn run(args: ConvertArgs) -> anyhow::Result<()> {
    let format = DataFormat::from_name(&args.format)?;
    let data = load_data(&args.data)?;
    std::fs::write(&args.out, to_string(&data, format)?)?;
    tracing::info!(
        examples = data.training_examples.len(),
        out = %args.out.display(),
        "converted training data"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_to_json_and_back() {
        let dir = tempfile::tempdir().unwrap();
        let md = dir.path().join("in.md");
        std::fs::write(&md, "## intent:greet\n- hello [berlin](city)\n").unwrap();

        let json = dir.path().join("out.json");
        run(ConvertArgs {
            data: md.clone(),
            out: json.clone(),
            format: "json".into(),
        })
        .unwrap();
        let back = dir.path().join("back.md");
        run(ConvertArgs {
            data: json,
            out: back.clone(),
            format: "md".into(),
        })
        .unwrap();

        assert_eq!(load_data(&back).unwrap(), load_data(&md).unwrap());
    }
}
