//! Pipeline diagnostics: timing, counts, and other metrics for each stage.
//!
//! Timestamps come from a caller-supplied [`Clock`] so this crate stays
//! free of platform time sources. Durations are serialized as
//! fractional seconds (`f64`) for JSON compatibility, since
//! `std::time::Duration` does not implement serde traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::{Pipeline, PipelineStage};
use crate::types::{DetectionResult, OutputFormat, PipelineConfig, PipelineError};
use crate::CascadeModel;

/// Source of monotonic timestamps.
pub trait Clock {
    /// Opaque point in time.
    type Instant;

    /// The current instant.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Image decoding.
    pub decode: StageDiagnostics,
    /// Grayscale conversion.
    pub grayscale: StageDiagnostics,
    /// Multiscale cascade scan.
    pub scan: StageDiagnostics,
    /// Overlap clustering.
    pub cluster: StageDiagnostics,
    /// Quality gate.
    pub gate: StageDiagnostics,
    /// Region blur.
    pub blur: StageDiagnostics,
    /// Output encoding.
    pub encode: StageDiagnostics,
    /// Total wall-clock duration of the entire pipeline (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics that vary by pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Image decoding metrics.
    Decode {
        /// Size of the input image bytes.
        input_bytes: usize,
        /// Decoded image width in pixels.
        width: u32,
        /// Decoded image height in pixels.
        height: u32,
        /// Total pixel count (`width * height`).
        pixel_count: u64,
    },
    /// Grayscale conversion metrics.
    Grayscale {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
    },
    /// Cascade scan metrics.
    Scan {
        /// Window sizes that fit the image.
        scales: usize,
        /// Windows evaluated.
        windows: u64,
        /// Windows that passed every stage.
        raw_detections: usize,
    },
    /// Clustering metrics.
    Cluster {
        /// IoU threshold used for merging.
        iou_threshold: f64,
        /// Raw detections in.
        input_count: usize,
        /// Clusters out.
        cluster_count: usize,
    },
    /// Quality gate metrics.
    Gate {
        /// Score a cluster had to exceed.
        quality_threshold: f32,
        /// Clusters considered.
        candidate_count: usize,
        /// Face boxes accepted.
        face_count: usize,
    },
    /// Region blur metrics.
    Blur {
        /// Blur radius as a fraction of box width.
        blur_fraction: f64,
        /// Boxes blurred.
        face_count: usize,
        /// Total pixels inside the blurred boxes.
        blurred_pixels: u64,
    },
    /// Output encoding metrics.
    Encode {
        /// Encoding used.
        format: OutputFormat,
        /// Size of the encoded image.
        output_bytes: usize,
    },
}

/// High-level summary counts for the entire pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Source image width in pixels.
    pub image_width: u32,
    /// Source image height in pixels.
    pub image_height: u32,
    /// Total pixel count.
    pub pixel_count: u64,
    /// Windows that passed the cascade.
    pub raw_detection_count: usize,
    /// Faces in the final result.
    pub face_count: usize,
}

/// Run the full pipeline, timing every stage with `clock`.
///
/// Produces the same [`DetectionResult`] as [`crate::process`].
///
/// # Errors
///
/// Returns [`PipelineError`] from whichever stage fails.
pub fn process_with_diagnostics<C: Clock>(
    image_bytes: &[u8],
    model: &CascadeModel,
    config: &PipelineConfig,
    clock: &C,
) -> Result<(DetectionResult, PipelineDiagnostics), PipelineError> {
    let pipeline_start = clock.now();

    let (decoded, decode) = timed(clock, || {
        Pipeline::new(image_bytes.to_vec(), config.clone()).decode()
    })?;
    let dimensions = decoded.dimensions();
    let (grayscaled, grayscale) = timed(clock, || Ok(decoded.grayscale()))?;
    let (scanned, scan) = timed(clock, || grayscaled.scan(model))?;
    let raw_detection_count = scanned.raw().len();
    let (clustered, cluster) = timed(clock, || Ok(scanned.cluster()))?;
    let (gated, gate) = timed(clock, || Ok(clustered.gate()))?;
    let (blurred, blur) = timed(clock, || Ok(gated.blur()))?;

    let start = clock.now();
    let result = blurred.encode()?;
    let encode = StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Encode {
            format: config.output_format,
            output_bytes: result.image.as_ref().map_or(0, Vec::len),
        },
    };

    let total_duration = clock.elapsed(&pipeline_start);
    let diagnostics = PipelineDiagnostics {
        decode,
        grayscale,
        scan,
        cluster,
        gate,
        blur,
        encode,
        total_duration,
        summary: PipelineSummary {
            image_width: dimensions.width,
            image_height: dimensions.height,
            pixel_count: u64::from(dimensions.width) * u64::from(dimensions.height),
            raw_detection_count,
            face_count: result.faces.len(),
        },
    };
    Ok((result, diagnostics))
}

/// Run one stage transition and pair the new stage with its timing.
fn timed<C: Clock, S: PipelineStage>(
    clock: &C,
    step: impl FnOnce() -> Result<S, PipelineError>,
) -> Result<(S, StageDiagnostics), PipelineError> {
    let start = clock.now();
    let stage = step()?;
    let duration = clock.elapsed(&start);
    let metrics = stage.metrics();
    Ok((stage, StageDiagnostics { duration, metrics }))
}

impl PipelineDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Image: {}x{} ({} pixels)",
            self.summary.image_width, self.summary.image_height, self.summary.pixel_count,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        let stages = [
            ("Decode", &self.decode),
            ("Grayscale", &self.grayscale),
            ("Scan", &self.scan),
            ("Cluster", &self.cluster),
            ("Gate", &self.gate),
            ("Blur", &self.blur),
            ("Encode", &self.encode),
        ];
        for (name, diag) in stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Raw detections: {}  |  Faces: {}",
            self.summary.raw_detection_count, self.summary.face_count,
        ));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Decode {
            input_bytes,
            width,
            height,
            ..
        } => format!("{input_bytes} bytes -> {width}x{height}"),
        StageMetrics::Grayscale { width, height } => format!("{width}x{height}"),
        StageMetrics::Scan {
            scales,
            windows,
            raw_detections,
        } => format!("{scales} scales, {windows} windows, {raw_detections} hits"),
        StageMetrics::Cluster {
            iou_threshold,
            input_count,
            cluster_count,
        } => format!("iou>={iou_threshold:.2} {input_count}->{cluster_count}"),
        StageMetrics::Gate {
            quality_threshold,
            candidate_count,
            face_count,
        } => format!("score>{quality_threshold:.2} {candidate_count}->{face_count}"),
        StageMetrics::Blur {
            blur_fraction,
            face_count,
            blurred_pixels,
        } => format!("f={blur_fraction:.2} {face_count} boxes, {blurred_pixels} px"),
        StageMetrics::Encode {
            format,
            output_bytes,
        } => format!("{format:?} {output_bytes} bytes"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::cascade::{CascadeBuilder, Node, Tree};
    use crate::scoring::ScoringKind;

    /// Clock that advances one millisecond per reading.
    struct TickClock {
        ticks: Cell<u64>,
    }

    impl Clock for TickClock {
        type Instant = u64;

        fn now(&self) -> u64 {
            let t = self.ticks.get();
            self.ticks.set(t + 1);
            t
        }

        fn elapsed(&self, since: &u64) -> Duration {
            Duration::from_millis(self.now() - since)
        }
    }

    fn diag(millis: u64, metrics: StageMetrics) -> StageDiagnostics {
        StageDiagnostics {
            duration: Duration::from_millis(millis),
            metrics,
        }
    }

    #[test]
    fn duration_ms_converts_correctly() {
        let d = Duration::from_millis(1234);
        let ms = duration_ms(d);
        assert!((ms - 1234.0).abs() < 0.01);
    }

    #[test]
    fn report_lists_every_stage() {
        let diagnostics = PipelineDiagnostics {
            decode: diag(
                3,
                StageMetrics::Decode {
                    input_bytes: 1000,
                    width: 100,
                    height: 80,
                    pixel_count: 8000,
                },
            ),
            grayscale: diag(
                1,
                StageMetrics::Grayscale {
                    width: 100,
                    height: 80,
                },
            ),
            scan: diag(
                40,
                StageMetrics::Scan {
                    scales: 12,
                    windows: 4000,
                    raw_detections: 25,
                },
            ),
            cluster: diag(
                1,
                StageMetrics::Cluster {
                    iou_threshold: 0.18,
                    input_count: 25,
                    cluster_count: 2,
                },
            ),
            gate: diag(
                0,
                StageMetrics::Gate {
                    quality_threshold: 5.0,
                    candidate_count: 2,
                    face_count: 1,
                },
            ),
            blur: diag(
                2,
                StageMetrics::Blur {
                    blur_fraction: 0.1,
                    face_count: 1,
                    blurred_pixels: 1600,
                },
            ),
            encode: diag(
                5,
                StageMetrics::Encode {
                    format: OutputFormat::Jpeg,
                    output_bytes: 2048,
                },
            ),
            total_duration: Duration::from_millis(52),
            summary: PipelineSummary {
                image_width: 100,
                image_height: 80,
                pixel_count: 8000,
                raw_detection_count: 25,
                face_count: 1,
            },
        };

        let report = diagnostics.report();
        assert!(report.contains("Pipeline Diagnostics Report"));
        for stage in ["Decode", "Grayscale", "Scan", "Cluster", "Gate", "Blur", "Encode"] {
            assert!(report.contains(stage), "missing {stage}");
        }
        assert!(report.contains("4000 windows"));
        assert!(report.contains("Faces: 1"));
    }

    #[test]
    fn process_with_diagnostics_matches_process() {
        let model = CascadeBuilder::new(ScoringKind::Sum)
            .stage(1.0, vec![Tree::stump(Node::new(0, 0, 0, 0), 0.0, 0.0)])
            .build()
            .unwrap();
        let img = image::RgbaImage::from_pixel(48, 32, image::Rgba([90, 120, 30, 255]));
        let config = PipelineConfig {
            output_format: OutputFormat::Png,
            ..PipelineConfig::default()
        };
        let bytes = crate::grayscale::encode(&img, OutputFormat::Png, 100).unwrap();
        let clock = TickClock {
            ticks: Cell::new(0),
        };

        let (result, diagnostics) =
            process_with_diagnostics(&bytes, &model, &config, &clock).unwrap();
        assert_eq!(result, crate::process(&bytes, &model, &config).unwrap());
        assert_eq!(diagnostics.summary.image_width, 48);
        assert_eq!(diagnostics.summary.face_count, 0);
        assert_eq!(diagnostics.decode.duration, Duration::from_millis(1));
        assert!(diagnostics.total_duration > diagnostics.scan.duration);
        assert!(matches!(
            diagnostics.encode.metrics,
            StageMetrics::Encode { output_bytes, .. } if output_bytes > 0
        ));
    }

    #[test]
    fn diagnostics_serialize_durations_as_seconds() {
        let stage = diag(
            1500,
            StageMetrics::Grayscale {
                width: 1,
                height: 1,
            },
        );
        let json = serde_json::to_value(&stage).unwrap();
        assert!((json["duration"].as_f64().unwrap() - 1.5).abs() < 1e-9);
        let back: StageDiagnostics = serde_json::from_value(json).unwrap();
        assert_eq!(back.duration, Duration::from_millis(1500));
    }

    #[test]
    fn negative_duration_is_rejected() {
        let json = r#"{"duration": -1.0, "metrics": {"Grayscale": {"width": 1, "height": 1}}}"#;
        assert!(serde_json::from_str::<StageDiagnostics>(json).is_err());
    }
}
