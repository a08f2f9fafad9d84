//! Overlap clustering of raw detections.
//!
//! A multiscale scan reports many jittered hits around every true
//! face. Two detections belong to the same cluster when their square
//! boxes overlap with IoU at or above the threshold; clusters grow by
//! chained overlap (connected components, via union-find).
//!
//! Each cluster collapses to the geometry of its highest-scoring
//! member, with the score summed over all members so that well
//! corroborated clusters rank higher. Representatives of different
//! clusters never overlap at or above the threshold, so clustering the
//! output again returns it unchanged.

use petgraph::unionfind::UnionFind;
use tracing::debug;

use crate::types::Detection;

/// Merge overlapping detections.
///
/// Output order follows the first member of each cluster in the input.
/// Ties for the best member go to the earliest one. Inputs of length 0
/// or 1 are returned as-is.
#[must_use]
pub fn cluster_detections(detections: &[Detection], iou_threshold: f64) -> Vec<Detection> {
    let n = detections.len();
    if n <= 1 {
        return detections.to_vec();
    }

    let mut uf = UnionFind::<usize>::new(n);
    for (i, a) in detections.iter().enumerate() {
        for (j, b) in detections.iter().enumerate().skip(i + 1) {
            if a.iou(b) >= iou_threshold {
                uf.union(i, j);
            }
        }
    }

    // Cluster slot per root, in order of first appearance.
    let mut slot_of_root: Vec<Option<usize>> = vec![None; n];
    let mut clusters: Vec<(Detection, f32)> = Vec::new();
    for (i, detection) in detections.iter().enumerate() {
        let root = uf.find_mut(i);
        match slot_of_root[root] {
            Some(slot) => {
                let (best, total) = &mut clusters[slot];
                *total += detection.score;
                if detection.score > best.score {
                    *best = *detection;
                }
            }
            None => {
                slot_of_root[root] = Some(clusters.len());
                clusters.push((*detection, detection.score));
            }
        }
    }

    debug!(
        raw = n,
        clusters = clusters.len(),
        iou_threshold,
        "clustered detections"
    );

    clusters
        .into_iter()
        .map(|(best, total)| Detection {
            score: total,
            ..best
        })
        .collect()
}
