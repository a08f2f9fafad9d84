//! Stage scoring: how leaf predictions combine into a window's confidence.
//!
//! This module defines the [`StageScoring`] trait for pluggable
//! confidence accumulation and the [`ScoringKind`] enum for selecting
//! one at load time.
//!
//! # Strategy pattern
//!
//! A trained cascade is only meaningful together with the rule it was
//! trained under. Both rules here keep a running sum of leaf
//! predictions across all stages; they differ in how a stage threshold
//! is compared and in what the final score means. The cascade resource
//! records which rule applies, so the detector never guesses.

use serde::{Deserialize, Serialize};

/// Selects how stage sums are compared and reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScoringKind {
    /// A stage passes when the running sum reaches its threshold
    /// (`sum >= threshold`). The final score is the running sum.
    #[default]
    Sum,

    /// A stage passes only when the running sum strictly exceeds its
    /// threshold. The final score is the margin above the last stage's
    /// threshold, so every accepted window scores above zero.
    ///
    /// This is the rule pico-style `facefinder` cascades are trained
    /// with.
    Margin,
}

impl ScoringKind {
    /// Code stored in the native cascade layout.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::Sum => 0,
            Self::Margin => 1,
        }
    }

    /// Inverse of [`code`](Self::code).
    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Sum),
            1 => Some(Self::Margin),
            _ => None,
        }
    }
}

/// Trait for confidence accumulation rules.
pub trait StageScoring {
    /// Whether a stage with `threshold` accepts the running `sum`.
    fn stage_passes(&self, sum: f32, threshold: f32) -> bool;

    /// Final window score once every stage has passed.
    fn final_score(&self, sum: f32, last_threshold: f32) -> f32;
}

impl StageScoring for ScoringKind {
    fn stage_passes(&self, sum: f32, threshold: f32) -> bool {
        match *self {
            Self::Sum => sum >= threshold,
            Self::Margin => sum > threshold,
        }
    }

    fn final_score(&self, sum: f32, last_threshold: f32) -> f32 {
        match *self {
            Self::Sum => sum,
            Self::Margin => sum - last_threshold,
        }
    }
}
