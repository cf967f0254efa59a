use std::path::PathBuf;

use clap::{Parser, Subcommand};
use leafdoc::batch::classify_files;
use leafdoc_core::{classifier::Classifier, label::class_info, model::ModelBundle};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_MODEL_PATH: &str = "./train-data/model.bin";

/// Offline plant disease classification
#[derive(Parser, Debug)]
#[command(name = "leafdoc", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Classify images and print one JSON line per image
    Predict {
        #[arg(long, env = "MODEL_PATH", default_value = DEFAULT_MODEL_PATH)]
        model: PathBuf,
        #[arg(long, default_value_t = 3)]
        top_k: usize,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// List the classes the model can detect
    Classes {
        #[arg(long, env = "MODEL_PATH", default_value = DEFAULT_MODEL_PATH)]
        model: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let indicatif_layer = IndicatifLayer::new();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .init();

    match Cli::parse().command {
        Command::Predict {
            model,
            top_k,
            images,
        } => {
            let model = ModelBundle::from_pretrained().path(model).call()?;
            let reports = classify_files(&model, &images, top_k);
            let mut failures = 0;
            for report in reports {
                match report {
                    Ok(report) => println!("{}", serde_json::to_string(&report)?),
                    Err(err) => {
                        failures += 1;
                        tracing::error!("{err:#}");
                    }
                }
            }
            if failures > 0 {
                tracing::warn!("{failures} of {} images could not be classified", images.len());
            }
        }
        Command::Classes { model } => {
            let model = ModelBundle::from_pretrained().path(model).call()?;
            for info in model.classes().iter().map(class_info) {
                println!("{}\t{}\t{}", info.crop, info.disease, info.class);
            }
        }
    }
    Ok(())
}
