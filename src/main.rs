use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ndarray::{Array1, Array2};
use rand::Rng;
use segtrain::utils::math;
use segtrain::{
    BestTracker, BootstrapCrossEntropy, ParamSnapshot, RunningConfusion, ScheduleDriver,
    SemanticEncodingLoss, SwaCheckpoint, TrainingConfig,
};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "segtrain")]
#[command(about = "Training schedule and metrics core for semantic segmentation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the learning-rate / top-k trajectory of a configured run
    Schedule {
        /// Configuration file path (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of evenly spaced iterations to sample
        #[arg(short, long, default_value_t = 20)]
        samples: u64,
    },

    /// Run a synthetic training loop exercising SWA, metrics, and losses
    Simulate {
        /// Configuration file path (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory for simulated checkpoints
        #[arg(short, long, default_value = "weights")]
        output: PathBuf,
    },

    /// Validate configuration file
    Config {
        /// Configuration file to validate
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show derived schedule quantities
    Info {
        /// Configuration file path (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Schedule { config, samples } => {
            print_schedule(config, samples)?;
        }

        Commands::Simulate { config, output } => {
            simulate(config, output)?;
        }

        Commands::Config { file } => {
            validate_config(file)?;
        }

        Commands::Info { config } => {
            show_info(config)?;
        }
    }

    Ok(())
}

fn load_or_default(path: Option<PathBuf>) -> Result<TrainingConfig> {
    match path {
        Some(path) => {
            TrainingConfig::from_file(&path).context("Failed to load configuration file")
        }
        None => {
            warn!("no configuration file given, using Cityscapes defaults");
            Ok(TrainingConfig::default())
        }
    }
}

fn print_schedule(config_path: Option<PathBuf>, samples: u64) -> Result<()> {
    let config = load_or_default(config_path)?;
    let driver = ScheduleDriver::new(&config).context("Failed to build schedule driver")?;

    let max_iteration = driver.max_iteration();
    let step = (max_iteration / samples.max(1)).max(1);

    println!(
        "{:>12} {:>14} {:>14} {:>12} {:>9}",
        "iteration", "lr_multiplier", "learning_rate", "topk_pixels", "boundary"
    );
    let mut iteration = 1;
    while iteration <= max_iteration {
        let plan = driver.plan(iteration)?;
        println!(
            "{:>12} {:>14.6} {:>14.6e} {:>12} {:>9}",
            plan.iteration,
            plan.lr_multiplier,
            plan.learning_rate,
            plan.topk_pixels,
            if plan.swa_boundary { "yes" } else { "" }
        );
        iteration += step;
    }

    info!(
        max_iteration,
        lr_period = driver.lr_period(),
        "schedule trajectory printed"
    );
    Ok(())
}

fn simulate(config_path: Option<PathBuf>, output: PathBuf) -> Result<()> {
    let mut config = load_or_default(config_path)?;
    config.checkpointing.weight_dir = output;

    // Scale the run down so the simulation finishes quickly while still
    // crossing several annealing periods.
    config.schedule.dataset_size = 64;
    config.schedule.batch_size = 8;
    config.schedule.num_epochs = 12;
    config.schedule.lr_period_epochs = 3;
    config.validate().context("Invalid simulation configuration")?;

    info!("starting synthetic schedule simulation");

    let mut driver = ScheduleDriver::new(&config)?;
    let mut confusion = RunningConfusion::with_ignore_label(
        config.dataset.n_classes,
        config.dataset.ignore_label,
    )?;
    let ce_loss = BootstrapCrossEntropy::new(
        config.dataset.ignore_label,
        config.dataset.class_weight_tensor(),
        true,
    )?;
    let se_loss = SemanticEncodingLoss::new(
        config.dataset.n_classes,
        config.dataset.ignore_label,
        0.20,
    )?;
    let mut best = BestTracker::new();
    let mut rng = rand::rng();

    let n_classes = config.dataset.n_classes;
    let max_iteration = driver.max_iteration();
    let swa_path = config
        .checkpointing
        .weight_dir
        .join(&config.checkpointing.swa_filename);

    for iteration in 1..=max_iteration {
        let plan = driver.plan(iteration)?;

        // Synthetic batch: logits lean toward the labels more strongly as
        // training progresses, so predicted quality improves over the run.
        let boost = 1.0 + 4.0 * (iteration as f32 / max_iteration as f32);
        let n_pixels = 256;
        let mut ground_truth = Vec::with_capacity(n_pixels);
        for _ in 0..n_pixels {
            let gt = if rng.random_range(0..20) == 0 {
                config.dataset.ignore_label
            } else {
                rng.random_range(0..n_classes) as u32
            };
            ground_truth.push(gt);
        }
        let logits = synthetic_logits(&mut rng, &ground_truth, n_classes, boost);
        let prediction = predicted_labels(&logits);
        confusion.update(&ground_truth, &prediction)?;

        if plan.swa_boundary {
            let snapshot = synthetic_snapshot(&mut rng, iteration, max_iteration);
            driver.fold_snapshot(&snapshot, iteration)?;
            if let Some(averaged) = driver.averaged() {
                SwaCheckpoint::new(averaged.clone(), driver.num_swa_updates(), iteration)
                    .save(&swa_path)?;
            }
        }

        if iteration % config.logging.log_interval as u64 == 0 {
            let k = plan.topk_pixels.max(1) as usize;
            let train_ce = ce_loss.forward(logits.view(), &ground_truth, k)?;

            let se_target = se_loss.encode_targets(&ground_truth)?;
            let presence_logits = synthetic_presence(&mut rng, &se_target);
            let train_se = se_loss.forward(presence_logits.view(), se_target.view())?;

            let scores = confusion.get_scores();
            info!(
                iteration,
                lr = plan.learning_rate,
                topk = plan.topk_pixels,
                ce_loss = train_ce,
                se_loss = train_se,
                mean_iou = scores.mean_iou,
                overall_acc = scores.overall_acc,
                "training window"
            );
            confusion.reset();

            if best.observe(scores.mean_iou) {
                info!(mean_iou = scores.mean_iou, "new best mean IoU");
            }
        }
    }

    info!(
        swa_updates = driver.num_swa_updates(),
        best_mean_iou = best.best().unwrap_or(0.0),
        "simulation complete"
    );
    Ok(())
}

/// Snapshot whose weights drift deterministically with a little noise
fn synthetic_snapshot(
    rng: &mut impl Rng,
    iteration: u64,
    max_iteration: u64,
) -> ParamSnapshot {
    let progress = iteration as f32 / max_iteration as f32;
    let mut snapshot = ParamSnapshot::new();
    for (name, len) in [("encoder.weight", 24), ("classifier.weight", 12)] {
        let values: Vec<f32> = (0..len)
            .map(|i| progress + 0.01 * i as f32 + rng.random_range(-0.05..0.05))
            .collect();
        snapshot.insert(name, Array1::from(values).into_dyn());
    }
    snapshot
}

/// Per-pixel logits biased toward the ground-truth class
fn synthetic_logits(
    rng: &mut impl Rng,
    ground_truth: &[u32],
    n_classes: usize,
    boost: f32,
) -> Array2<f32> {
    let mut logits = Array2::zeros((ground_truth.len(), n_classes));
    for (mut row, &gt) in logits.outer_iter_mut().zip(ground_truth.iter()) {
        for value in row.iter_mut() {
            *value = rng.random_range(-1.0..1.0);
        }
        if (gt as usize) < n_classes {
            row[gt as usize] += boost;
        }
    }
    logits
}

/// Argmax of per-pixel softmax probabilities
fn predicted_labels(logits: &Array2<f32>) -> Vec<u32> {
    logits
        .outer_iter()
        .map(|row| {
            let scores: Vec<f32> = row.iter().copied().collect();
            let probs = math::softmax(&scores);
            let mut best = 0usize;
            let mut best_prob = f32::NEG_INFINITY;
            for (class, &prob) in probs.iter().enumerate() {
                if prob > best_prob {
                    best = class;
                    best_prob = prob;
                }
            }
            best as u32
        })
        .collect()
}

/// Presence logits leaning toward the encoded target
fn synthetic_presence(rng: &mut impl Rng, target: &Array1<f32>) -> Array1<f32> {
    target.mapv(|t| {
        let base: f32 = if t > 0.5 { 2.0 } else { -2.0 };
        base + rng.random_range(-0.5..0.5)
    })
}

fn validate_config(config_path: PathBuf) -> Result<()> {
    info!("validating configuration file: {}", config_path.display());

    let config = TrainingConfig::from_file(&config_path)
        .context("Failed to load configuration file")?;

    println!("Configuration is valid");
    println!("  dataset: {}", config.dataset.name);
    println!("  classes: {}", config.dataset.n_classes);
    println!("  epochs: {}", config.schedule.num_epochs);
    println!("  base learning rate: {}", config.schedule.base_lr);
    Ok(())
}

fn show_info(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_or_default(config_path)?;
    let schedule = &config.schedule;

    println!("Derived schedule quantities");
    println!("  iterations per epoch: {}", schedule.iterations_per_epoch());
    println!("  LR period (iterations): {}", schedule.lr_period());
    println!("  total iterations: {}", schedule.max_iteration());
    println!(
        "  annealing periods in run: {}",
        schedule.max_iteration() / schedule.lr_period()
    );
    println!(
        "  initial top-k pixel budget: {}",
        (schedule.topk_init * schedule.topk_unit as f64).round() as u64
    );
    Ok(())
}
