//! The `train`, `predict` and `demo` commands.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use evaluation::analyze_model_performance;
use log::{info, warn};
use preprocessing::{create_sample_data, discover_images};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    config::{ArchConfig, ModelKind, parse_shape},
    error::{IqErr, Result},
    predictor::IqPredictor,
    trainer::{IqTrainer, MODEL_FILE},
};

/// Seeds the train/test split of the `train` command.
const TEST_SPLIT_SEED: u64 = 42;
const SYNTHETIC_SAMPLES: usize = 200;
const DEMO_SAMPLES: usize = 50;
const DEMO_EPOCHS: usize = 20;
const DEMO_BATCH_SIZE: usize = 8;
const DEMO_PREDICTIONS: usize = 3;
const HISTORY_JSON: &str = "training_history.json";
const HISTORY_PLOT: &str = "training_history.png";
const ANALYSIS_DIR: &str = "analysis";

#[derive(Debug, Parser)]
#[command(name = "iq-predictor", version, about = "Predict IQ scores from brain MRI scans")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Train a model on a directory of labeled scans.
    Train(TrainArgs),
    /// Predict the IQ score of a scan or of every scan in a directory.
    Predict(PredictArgs),
    /// Generate sample data, train a quick model if needed and predict a few samples.
    Demo(DemoArgs),
}

#[derive(Debug, Clone, Args)]
pub struct TrainArgs {
    /// Directory holding the scans.
    #[arg(long, default_value = "data/sample")]
    pub data_dir: PathBuf,
    /// `filename,score` label file, `<data-dir>/iq_labels.txt` by default.
    #[arg(long)]
    pub labels: Option<PathBuf>,
    #[arg(long, default_value_t = ModelKind::Planar)]
    pub model_type: ModelKind,
    /// Sample shape as `h,w,1` or `h,w,d,1`.
    #[arg(long)]
    pub input_shape: Option<String>,
    #[arg(long, default_value_t = 50)]
    pub epochs: usize,
    #[arg(long, default_value_t = 16)]
    pub batch_size: usize,
    /// Fraction of the training data held out for validation.
    #[arg(long, default_value_t = 0.2)]
    pub validation_split: f32,
    /// Fraction of the data held out for the final evaluation.
    #[arg(long, default_value_t = 0.2)]
    pub test_split: f32,
    #[arg(long, default_value = "models/saved")]
    pub model_save_path: PathBuf,
    #[arg(long)]
    pub learning_rate: Option<f32>,
    #[arg(long)]
    pub dropout_rate: Option<f32>,
    #[arg(long)]
    pub seed: Option<u64>,
    /// JSON file overriding the architecture hyperparameters.
    #[arg(long)]
    pub arch_config: Option<PathBuf>,
    /// Fail instead of generating synthetic samples when the data directory is missing.
    #[arg(long)]
    pub no_synthetic: bool,
}

#[derive(Debug, Clone, Args)]
pub struct PredictArgs {
    /// A scan or a directory of scans.
    #[arg(long)]
    pub image: PathBuf,
    #[arg(long, default_value = "models/saved/mri_iq_model.safetensors")]
    pub model: PathBuf,
    #[arg(long, default_value_t = ModelKind::Planar)]
    pub model_type: ModelKind,
    /// Write a PNG of every prediction.
    #[arg(long)]
    pub visualize: bool,
    /// Directory of the visualizations.
    #[arg(long, default_value = "predictions")]
    pub output: PathBuf,
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Args)]
pub struct DemoArgs {
    #[arg(long, default_value = "data/sample")]
    pub data_dir: PathBuf,
    #[arg(long, default_value = "models/saved/mri_iq_model.safetensors")]
    pub model: PathBuf,
    #[arg(long, default_value = "predictions")]
    pub output: PathBuf,
    #[arg(long)]
    pub seed: Option<u64>,
}

impl Default for DemoArgs {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/sample"),
            model: PathBuf::from("models/saved").join(MODEL_FILE),
            output: PathBuf::from("predictions"),
            seed: None,
        }
    }
}

/// Runs a parsed command line, the demo if no command was given.
pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Command::Train(args)) => train(&args),
        Some(Command::Predict(args)) => predict(&args),
        Some(Command::Demo(args)) => demo(&args),
        None => demo(&DemoArgs::default()),
    }
}

fn rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// Trains, saves and evaluates a model.
pub fn train(args: &TrainArgs) -> Result<()> {
    if !args.data_dir.exists() {
        if args.no_synthetic {
            return Err(IqErr::NoData(format!(
                "the data directory {} doesn't exist",
                args.data_dir.display()
            )));
        }

        warn!(
            "{} doesn't exist, generating {SYNTHETIC_SAMPLES} SYNTHETIC samples with random labels. \
             A model trained on them predicts nothing real",
            args.data_dir.display()
        );
        create_sample_data(SYNTHETIC_SAMPLES, &args.data_dir, &mut rng(args.seed))?;
    }

    let kind = args.model_type;
    let input_shape = args
        .input_shape
        .as_deref()
        .map(parse_shape)
        .transpose()
        .map_err(IqErr::InvalidConfig)?;
    let arch = match &args.arch_config {
        Some(path) => ArchConfig::from_json_file(path, kind)?,
        None => ArchConfig::for_kind(kind),
    };

    let mut trainer = IqTrainer::new(kind, input_shape, &args.model_save_path, args.seed)?.with_arch(arch);
    let data = trainer.load_data(&args.data_dir, args.labels.as_deref())?;
    info!("loaded {} samples", data.len());

    let (train, test) = data.split(args.test_split, TEST_SPLIT_SEED)?;
    trainer.create_model(args.learning_rate, args.dropout_rate)?;
    trainer.train(&train, None, args.epochs, args.batch_size, args.validation_split)?;

    let model_path = trainer.save_model(None)?;
    let save_dir = trainer.save_dir().to_path_buf();
    if let Some(history) = trainer.history() {
        history.save_json(save_dir.join(HISTORY_JSON))?;
    }
    trainer.plot_training_history(&save_dir.join(HISTORY_PLOT))?;

    if !test.is_empty() {
        if let Some(metrics) = trainer.evaluate(&test) {
            println!("\nTest metrics:");
            println!("  MAE:  {:.2}", metrics.mae);
            println!("  MSE:  {:.2}", metrics.mse);
            println!("  RMSE: {:.2}", metrics.rmse);
            println!("  R²:   {:.3}", metrics.r2);
        }

        let y_pred = trainer.predict(&test)?;
        let report = analyze_model_performance(&test.labels, &y_pred, &save_dir.join(ANALYSIS_DIR))?;
        println!("\n{}", report.render());
    }

    println!("Model saved to {}", model_path.display());
    Ok(())
}

/// Predicts a single scan or a directory of scans.
pub fn predict(args: &PredictArgs) -> Result<()> {
    let mut predictor = IqPredictor::new(&args.model, args.model_type, None, args.seed)?;

    if args.image.is_file() {
        let score = predictor
            .predict_single(&args.image)
            .ok_or_else(|| IqErr::NoData(format!("{} couldn't be scored", args.image.display())))?;
        println!("\nPredicted IQ: {score:.1}");

        if args.visualize {
            predictor.visualize_prediction(&args.image, &visualization_path(&args.output, &args.image))?;
        }

        return Ok(());
    }

    if !args.image.is_dir() {
        return Err(IqErr::InvalidConfig(format!(
            "{} is neither a file nor a directory",
            args.image.display()
        )));
    }

    let images = discover_images(&args.image)?;
    if images.is_empty() {
        return Err(IqErr::NoData(format!(
            "no image files found in {}",
            args.image.display()
        )));
    }
    info!("found {} images in {}", images.len(), args.image.display());

    let results = predictor
        .predict_batch(&images)
        .ok_or_else(|| IqErr::NoData("none of the images could be scored".into()))?;

    println!("\nBatch Prediction Results:");
    println!("{}", "-".repeat(50));
    for (path, score) in &results {
        println!("{}: {score:.1}", display_name(path));
    }

    let average = results.iter().map(|(_, score)| score).sum::<f32>() / results.len() as f32;
    println!("\nAverage predicted IQ: {average:.1}");

    if args.visualize {
        for (path, _) in &results {
            if let Err(e) = predictor.visualize_prediction(path, &visualization_path(&args.output, path)) {
                warn!("couldn't visualize {}: {e}", path.display());
            }
        }
    }

    Ok(())
}

/// Makes sure there's data and a model, then predicts the first few samples.
pub fn demo(args: &DemoArgs) -> Result<()> {
    info!("running the MRI IQ prediction demo");

    if !args.data_dir.exists() {
        info!("creating {DEMO_SAMPLES} sample scans in {}", args.data_dir.display());
        create_sample_data(DEMO_SAMPLES, &args.data_dir, &mut rng(args.seed))?;
    }

    if !args.model.exists() {
        info!("no model at {}, training a quick one", args.model.display());
        let save_dir = args
            .model
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));

        let mut trainer = IqTrainer::new(ModelKind::Planar, None, save_dir, args.seed)?;
        let data = trainer.load_data(&args.data_dir, None)?;
        trainer.train(&data, None, DEMO_EPOCHS, DEMO_BATCH_SIZE, 0.2)?;
        trainer.save_model(Some(&args.model))?;
    }

    let mut predictor = IqPredictor::new(&args.model, ModelKind::Planar, None, args.seed)?;
    let images = discover_images(&args.data_dir)?;
    if images.is_empty() {
        return Err(IqErr::NoData(format!(
            "no sample images found in {}",
            args.data_dir.display()
        )));
    }

    for (i, path) in images.iter().take(DEMO_PREDICTIONS).enumerate() {
        info!("processing image {}: {}", i + 1, display_name(path));
        let out = args.output.join(format!("prediction_{}.png", i + 1));

        match predictor.visualize_prediction(path, &out) {
            Ok(score) => println!("{}: predicted IQ {score:.1}", display_name(path)),
            Err(e) => warn!("couldn't predict {}: {e}", path.display()),
        }
    }

    Ok(())
}

fn visualization_path(output: &Path, image: &Path) -> PathBuf {
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "scan".to_string());

    output.join(format!("{stem}_prediction.png"))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
