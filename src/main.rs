use clap::Parser;
use image::ImageReader;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use labelscan::detection::ocr::{self, OcrsRecognizer};
use labelscan::detection::overlay;
use labelscan::{KeyFact, LabelPipeline, PipelineConfig};

#[derive(Parser)]
#[command(name = "labelscan")]
#[command(about = "Find nutrition labels in images and read their key facts")]
struct Cli {
    /// Path to input image file
    #[arg(value_name = "IMAGE")]
    image_path: PathBuf,

    /// Pipeline configuration (JSON)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the detector confidence threshold
    #[arg(long, value_name = "SCORE")]
    confidence: Option<f32>,

    /// Directory holding text-detection.rten and text-recognition.rten
    #[arg(long, value_name = "DIR")]
    ocr_models: Option<PathBuf>,

    /// Skip text recognition
    #[arg(long)]
    skip_ocr: bool,

    /// Write the letterboxed image with detection boxes drawn on it
    #[arg(long, value_name = "FILE")]
    annotate: Option<PathBuf>,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let default_level = if args.verbose { "labelscan=debug" } else { "labelscan=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(confidence) = args.confidence {
        config.detector.confidence_threshold = confidence;
    }
    config.validate()?;

    tracing::info!("Loading image: {:?}", args.image_path);
    let img = ImageReader::open(&args.image_path)?
        .decode()
        .map_err(|e| anyhow::anyhow!("Failed to decode image: {}", e))?;
    tracing::info!("Image loaded: {}x{}", img.width(), img.height());

    let input_size = config.detector.input_size;
    let mut builder = LabelPipeline::builder(config);
    if !args.skip_ocr {
        let model_dir = match args.ocr_models {
            Some(dir) => dir,
            None => ocr::default_model_dir()?,
        };
        builder = builder.text_recognizer(move || OcrsRecognizer::load(&model_dir));
    }
    let pipeline = builder.build();

    let image_id = pipeline.submit(img.clone());
    let result = pipeline
        .settled(image_id)
        .await
        .ok_or_else(|| anyhow::anyhow!("Image {} was replaced before it settled", image_id))?;

    if let Some(path) = &args.annotate {
        let detections = result.detections.as_deref().unwrap_or_default();
        overlay::draw_detections(&img, detections, input_size).save(path)?;
        tracing::info!("Annotated image written to {}", path.display());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("\n=== Nutrition Label Results ===");

    if let Some(error) = &result.initialization_error {
        println!("Warning: {}", error);
    }

    match &result.detections {
        Some(detections) => {
            println!("Detections: {}", detections.len());
            for detection in detections {
                let bbox = detection.image_rect();
                println!(
                    "  {} at ({:.3}, {:.3}) {:.3}x{:.3} - confidence: {:.2}, edge distance: {:.3}, area: {:.3}",
                    detection.class_name(),
                    bbox.x,
                    bbox.y,
                    bbox.width,
                    bbox.height,
                    detection.confidence(),
                    detection.min_distance_from_edges(),
                    detection.area_covered()
                );
            }
        }
        None => println!("Detections: unavailable"),
    }

    match &result.classification {
        Some(classification) => println!(
            "Classification: {} ({:.2})",
            classification.label, classification.confidence
        ),
        None => println!("Classification: unavailable"),
    }

    match &result.text_recognition {
        Some(recognition) => {
            println!("\nKey facts ({}/{}):", recognition.found_count(), KeyFact::ALL.len());
            for (fact, found) in recognition.contains_key_facts() {
                println!("  {:<10} {}", fact.name(), if *found { "yes" } else { "no" });
            }
            if args.verbose {
                println!("\nText: {}", recognition.text().trim_end());
            }
        }
        None => println!("Text recognition: unavailable"),
    }

    Ok(())
}
