//! faceveil: detect faces in an image and blur them.
//!
//! Reads a PNG or JPEG (raw bytes or base64), runs the detection and
//! anonymization pipeline with a cascade resource loaded from disk, and
//! writes the anonymized image, a JSON list of faces, or both.
//!
//! # Usage
//!
//! ```text
//! faceveil --cascade data/facefinder [OPTIONS] <INPUT>
//! ```
//!
//! `INPUT` may be `-` to read from stdin. `input_mode` and
//! `output_mode` environment variables override the defaults of the
//! matching flags. Set `RUST_LOG=debug` for per-stage logs.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use clap::{Parser, ValueEnum};
use faceveil_export::OutputMode;
use faceveil_pipeline::diagnostics::Clock;
use faceveil_pipeline::{
    CascadeModel, DetectionResult, OutputFormat, PipelineConfig, PipelineError, ScanConfig,
    SharedCascade,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Cascade shared by every request this process handles.
static CASCADE: SharedCascade = SharedCascade::new();

/// Detect faces in a still image and blur them away.
#[derive(Parser)]
#[command(name = "faceveil", version)]
struct Cli {
    /// Input image (PNG or JPEG), or `-` for stdin.
    input: PathBuf,

    /// Cascade resource (native or pico layout).
    #[arg(long, env = "FACEVEIL_CASCADE")]
    cascade: PathBuf,

    /// How the input bytes are encoded.
    #[arg(long, env = "input_mode", value_enum, default_value_t = InputMode::Base64)]
    input_mode: InputMode,

    /// What to write: json, image or json_image.
    #[arg(long, env = "output_mode", default_value_t = OutputMode::Json)]
    output_mode: OutputMode,

    /// Write output here instead of stdout.
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Smallest window side in pixels.
    #[arg(long, default_value_t = ScanConfig::DEFAULT_MIN_SIZE)]
    min_size: u32,

    /// Largest window side in pixels.
    #[arg(long, default_value_t = ScanConfig::DEFAULT_MAX_SIZE)]
    max_size: u32,

    /// Window stride as a fraction of the window side.
    #[arg(long, default_value_t = ScanConfig::DEFAULT_SHIFT_FACTOR)]
    shift_factor: f64,

    /// Growth factor between window sizes.
    #[arg(long, default_value_t = ScanConfig::DEFAULT_SCALE_FACTOR)]
    scale_factor: f64,

    /// Minimum IoU for two detections to merge.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_IOU_THRESHOLD)]
    iou_threshold: f64,

    /// Clustered score a detection must exceed to count as a face.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_QUALITY_THRESHOLD)]
    quality_threshold: f32,

    /// Blur radius as a fraction of the face width.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_BLUR_FRACTION)]
    blur_fraction: f64,

    /// Encoding of the output image.
    #[arg(long, value_enum, default_value_t = Format::Jpeg)]
    format: Format,

    /// JPEG quality (1-100).
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_JPEG_QUALITY, value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    /// The JSON must be a valid `PipelineConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,

    /// Outline faces instead of blurring them.
    #[arg(long, conflicts_with = "diagnostics")]
    outline: bool,

    /// Print per-stage timings and counts to stderr.
    #[arg(long)]
    diagnostics: bool,
}

/// Input payload encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum InputMode {
    /// Image file bytes as-is.
    Raw,
    /// Standard base64; payloads that are not valid base64 are used as raw bytes.
    Base64,
}

/// Output image encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    /// Lossless PNG.
    Png,
    /// JPEG at `--jpeg-quality`.
    Jpeg,
}

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<PipelineConfig, String> {
    let config = if let Some(ref json) = cli.config_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else {
        PipelineConfig {
            scan: ScanConfig {
                min_size: cli.min_size,
                max_size: cli.max_size,
                shift_factor: cli.shift_factor,
                scale_factor: cli.scale_factor,
            },
            iou_threshold: cli.iou_threshold,
            quality_threshold: cli.quality_threshold,
            blur_fraction: cli.blur_fraction,
            output_format: match cli.format {
                Format::Png => OutputFormat::Png,
                Format::Jpeg => OutputFormat::Jpeg,
            },
            jpeg_quality: cli.jpeg_quality,
        }
    };
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

/// Turn the request payload into image file bytes.
///
/// In base64 mode a payload that does not decode is taken as raw
/// bytes. Either way the result must look like a PNG or a JPEG.
fn decode_payload(payload: Vec<u8>, mode: InputMode) -> Result<Vec<u8>, String> {
    let data = match mode {
        InputMode::Raw => payload,
        InputMode::Base64 => match STANDARD.decode(payload.trim_ascii()) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!(error = %e, "payload is not base64, using raw bytes");
                payload
            }
        },
    };

    match sniff(&data) {
        Some(kind) => {
            debug!(kind, bytes = data.len(), "accepted input");
            Ok(data)
        }
        None => Err(
            "Only jpeg or png images, either raw bytes or base64 encoded, are acceptable inputs"
                .to_owned(),
        ),
    }
}

/// Content type of `data` from its magic bytes, if supported.
fn sniff(data: &[u8]) -> Option<&'static str> {
    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n";
    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF];
    if data.starts_with(PNG) {
        Some("image/png")
    } else if data.starts_with(JPEG) {
        Some("image/jpeg")
    } else {
        None
    }
}

fn read_input(path: &Path) -> Result<Vec<u8>, String> {
    if path.as_os_str() == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .lock()
            .read_to_end(&mut buf)
            .map_err(|e| format!("Error reading stdin: {e}"))?;
        Ok(buf)
    } else {
        std::fs::read(path).map_err(|e| format!("Error reading {}: {e}", path.display()))
    }
}

fn load_cascade(path: &Path) -> Result<&'static CascadeModel, String> {
    if let Some(model) = CASCADE.get() {
        return Ok(model);
    }
    let bytes =
        std::fs::read(path).map_err(|e| format!("Error reading {}: {e}", path.display()))?;
    let model = CASCADE
        .get_or_load(|| CascadeModel::unpack(&bytes))
        .map_err(|e| format!("Error loading cascade {}: {e}", path.display()))?;
    info!(
        stages = model.stages().len(),
        trees = model.tree_count(),
        scoring = ?model.scoring(),
        "cascade loaded"
    );
    Ok(model)
}

/// Detect faces and draw their outlines instead of blurring.
fn outlined(
    bytes: &[u8],
    model: &CascadeModel,
    config: &PipelineConfig,
) -> Result<DetectionResult, PipelineError> {
    use faceveil_pipeline::{grayscale, mark};

    let image = grayscale::decode(bytes)?;
    let faces = faceveil_pipeline::detect_faces(&image, model, config)?;
    let marked = mark::outline_faces(&image, &faces, mark::OUTLINE_COLOR);
    let encoded = grayscale::encode(&marked, config.output_format, config.jpeg_quality)?;
    Ok(DetectionResult {
        faces,
        image: Some(encoded),
        dimensions: faceveil_pipeline::Dimensions {
            width: image.width(),
            height: image.height(),
        },
    })
}

fn run(cli: &Cli) -> Result<(), String> {
    let config = config_from_cli(cli)?;
    let payload = read_input(&cli.input)?;
    let image_bytes = decode_payload(payload, cli.input_mode)?;
    let model = load_cascade(&cli.cascade)?;

    let result = if cli.diagnostics {
        let (result, diagnostics) = faceveil_pipeline::diagnostics::process_with_diagnostics(
            &image_bytes,
            model,
            &config,
            &StdClock,
        )
        .map_err(|e| format!("Error on face detection: {e}"))?;
        eprintln!("{}", diagnostics.report());
        result
    } else if cli.outline {
        outlined(&image_bytes, model, &config)
            .map_err(|e| format!("Error creating image output: {e}"))?
    } else if cli.output_mode.needs_image() {
        faceveil_pipeline::process(&image_bytes, model, &config)
            .map_err(|e| format!("Error on face detection: {e}"))?
    } else {
        faceveil_pipeline::process_faces(&image_bytes, model, &config)
            .map_err(|e| format!("Error on face detection: {e}"))?
    };

    let body = faceveil_export::render(&result, cli.output_mode)
        .map_err(|e| format!("Error encoding output: {e}"))?;
    match cli.output {
        Some(ref path) => std::fs::write(path, &body)
            .map_err(|e| format!("Error writing {}: {e}", path.display()))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(&body)
                .and_then(|()| stdout.flush())
                .map_err(|e| format!("Error writing output: {e}"))?;
        }
    }
    info!(
        faces = result.faces.len(),
        mode = %cli.output_mode,
        bytes = body.len(),
        "wrote output"
    );
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("{msg}");
            ExitCode::FAILURE
        }
    }
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\nrest";

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["faceveil", "--cascade", "model.bin"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_match_pipeline_config() {
        let cli = parse(&["photo.jpg"]);
        assert_eq!(config_from_cli(&cli).unwrap(), PipelineConfig::default());
        assert_eq!(cli.output_mode, OutputMode::Json);
        assert_eq!(cli.input_mode, InputMode::Base64);
    }

    #[test]
    fn flags_override_config() {
        let cli = parse(&[
            "--min-size",
            "40",
            "--iou-threshold",
            "0.3",
            "--format",
            "png",
            "--output-mode",
            "json_image",
            "-",
        ]);
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.scan.min_size, 40);
        assert!((config.iou_threshold - 0.3).abs() < f64::EPSILON);
        assert_eq!(config.output_format, OutputFormat::Png);
        assert_eq!(cli.output_mode, OutputMode::JsonImage);
        assert_eq!(cli.input, PathBuf::from("-"));
    }

    #[test]
    fn config_json_replaces_flags() {
        let json = serde_json::to_string(&PipelineConfig {
            quality_threshold: 2.5,
            ..PipelineConfig::default()
        })
        .unwrap();
        let cli = parse(&["--min-size", "99", "--config-json", &json, "in.png"]);
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.scan.min_size, ScanConfig::DEFAULT_MIN_SIZE);
        assert!((config.quality_threshold - 2.5).abs() < f32::EPSILON);
    }

    #[test]
    fn invalid_config_is_reported() {
        let cli = parse(&["--min-size", "50", "--max-size", "10", "in.png"]);
        assert!(config_from_cli(&cli).unwrap_err().contains("min_size"));
    }

    #[test]
    fn unknown_output_mode_is_rejected() {
        let result = Cli::try_parse_from([
            "faceveil",
            "--cascade",
            "m",
            "--output-mode",
            "svg",
            "in.png",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn jpeg_quality_is_range_checked() {
        let result = Cli::try_parse_from([
            "faceveil",
            "--cascade",
            "m",
            "--jpeg-quality",
            "0",
            "in.png",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn raw_png_is_accepted() {
        let data = decode_payload(PNG_HEADER.to_vec(), InputMode::Raw).unwrap();
        assert_eq!(data, PNG_HEADER);
    }

    #[test]
    fn base64_payload_is_decoded() {
        let encoded = format!("{}\n", STANDARD.encode(PNG_HEADER));
        let data = decode_payload(encoded.into_bytes(), InputMode::Base64).unwrap();
        assert_eq!(data, PNG_HEADER);
    }

    #[test]
    fn invalid_base64_falls_back_to_raw() {
        let jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00];
        let data = decode_payload(jpeg.clone(), InputMode::Base64).unwrap();
        assert_eq!(data, jpeg);
    }

    #[test]
    fn raw_mode_does_not_decode_base64() {
        let encoded = STANDARD.encode(PNG_HEADER).into_bytes();
        assert!(decode_payload(encoded, InputMode::Raw).is_err());
    }

    #[test]
    fn other_content_types_are_rejected() {
        let err = decode_payload(b"GIF89a....".to_vec(), InputMode::Base64).unwrap_err();
        assert!(err.contains("jpeg or png"));
    }

    #[test]
    fn sniff_recognizes_png_and_jpeg() {
        assert_eq!(sniff(PNG_HEADER), Some("image/png"));
        assert_eq!(sniff(&[0xFF, 0xD8, 0xFF, 0xDB]), Some("image/jpeg"));
        assert_eq!(sniff(b"BM"), None);
        assert_eq!(sniff(&[]), None);
    }
}
