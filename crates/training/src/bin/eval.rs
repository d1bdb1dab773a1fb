use clap::Parser;
use cli_support::{PostprocessArgs, WeightsArgs};
use inference::{InferenceFactory, PostprocessConfig};
use models::PpnConfig;
use training::util::load_checkpoint_config;
use training::{EvalStats, ToyDataConfig, ToyDataGenerator};
use vision_core::interfaces::BlobSource;

#[derive(Parser, Debug)]
#[command(
    name = "eval",
    about = "Evaluate a PPN checkpoint on toy images (distance to nearest same-class detection)"
)]
struct Args {
    #[command(flatten)]
    weights: WeightsArgs,
    #[command(flatten)]
    post: PostprocessArgs,
    /// Number of toy images to evaluate.
    #[arg(long, default_value_t = 20)]
    images: usize,
    /// Seed for the toy images; differs from the training default on purpose.
    #[arg(long, default_value_t = 4242)]
    seed: u64,
    /// Image side length when no checkpoint config is available.
    #[arg(long, default_value_t = 512)]
    image_size: usize,
    /// A ground-truth point counts as found within this many pixels.
    #[arg(long, default_value_t = 8.0)]
    match_distance: f32,
    /// Print the summary as JSON.
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    cli_support::init_logging();
    let args = Args::parse();

    let cfg = match &args.weights.checkpoint {
        Some(path) => load_checkpoint_config(path).unwrap_or_else(|e| {
            log::warn!("{e}; using default model config");
            PpnConfig {
                image_size: args.image_size,
                ..PpnConfig::default()
            }
        }),
        None => PpnConfig {
            image_size: args.image_size,
            ..PpnConfig::default()
        },
    };
    let post = PostprocessConfig {
        min_confidence: args.post.min_confidence,
        cluster_radius: args.post.cluster_radius,
        drop_background: args.post.drop_background,
    };
    let size = cfg.image_size;
    let mut detector = InferenceFactory.build(cfg, post, args.weights.checkpoint.as_deref())?;
    let mut source = ToyDataGenerator::new(
        size,
        ToyDataConfig {
            seed: args.seed,
            ..ToyDataConfig::default()
        },
    )?;

    let mut stats = EvalStats::new(args.match_distance);
    for frame_id in 0..args.images {
        let blob = source.forward()?;
        let result = detector.detect(frame_id as u64, &blob)?;
        stats.add(&blob.gt_pixels, &result);
    }

    let summary = stats.summary();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "images={} gt_points={} detections={} mean_distance={} matched={:.3}",
            summary.images,
            summary.gt_points,
            summary.detections,
            summary
                .mean_distance
                .map(|d| format!("{d:.2}px"))
                .unwrap_or_else(|| "n/a".to_string()),
            summary.matched_fraction
        );
    }
    Ok(())
}
