use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use redline_pdf::{AnnotateRequest, DiffPayload, Error, annotate, reconstruct};

#[derive(Parser)]
#[command(name = "redline-pdf")]
#[command(version)]
#[command(about = "Render visual diff annotations onto paired PDFs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild plain text from a positioned-word markup file
    Reconstruct {
        /// Positioned-word markup (XHTML) input
        #[arg(long, value_name = "FILE")]
        input_xhtml: PathBuf,

        /// Where to write the reconstruction JSON
        #[arg(long, value_name = "FILE")]
        output_json: PathBuf,
    },

    /// Render annotated copies of both source documents plus the comment document
    Annotate {
        /// Source PDF for the "before" side
        #[arg(long, value_name = "FILE")]
        source_a: PathBuf,

        /// Source PDF for the "after" side
        #[arg(long, value_name = "FILE")]
        source_b: PathBuf,

        /// Diff payload JSON
        #[arg(long, value_name = "FILE")]
        input_json: PathBuf,

        /// Annotated "before" document (deletion strikes)
        #[arg(long, value_name = "FILE")]
        output_ann_a: PathBuf,

        /// Annotated "after" document (insertion marks)
        #[arg(long, value_name = "FILE")]
        output_ann_b: PathBuf,

        /// Comment document (strikes plus margin comments)
        #[arg(long, value_name = "FILE")]
        output_ann_comment: PathBuf,

        /// Where to write the run summary JSON
        #[arg(long, value_name = "FILE")]
        summary_json: PathBuf,

        /// Annotation font family, looked up in the system font directories
        #[arg(long, value_name = "NAME")]
        font: Option<String>,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    match cli.command {
        Commands::Reconstruct {
            input_xhtml,
            output_json,
        } => {
            let out = reconstruct(&input_xhtml)?;
            std::fs::write(&output_json, serde_json::to_string(&out)?)?;
            Ok(())
        }
        Commands::Annotate {
            source_a,
            source_b,
            input_json,
            output_ann_a,
            output_ann_b,
            output_ann_comment,
            summary_json,
            font,
        } => {
            let payload = DiffPayload::from_path(&input_json)?;
            let request = AnnotateRequest {
                source_a: &source_a,
                source_b: &source_b,
                output_a: &output_ann_a,
                output_b: &output_ann_b,
                output_comment: &output_ann_comment,
                font_family: font.as_deref(),
            };
            let summary = annotate(&payload, &request)?;
            std::fs::write(&summary_json, serde_json::to_string(&summary)?)?;
            Ok(())
        }
    }
}
