//! Cascade model: packed binary layouts and the immutable in-memory arena.
//!
//! A cascade is an ordered list of stages. Each stage owns a run of
//! binary decision trees of one common depth plus a pass threshold.
//! Every internal node compares the intensities of two pixels whose
//! positions are given relative to the window center, in units of
//! `window_side / 256`; every leaf holds a prediction that is added to
//! the window's running confidence.
//!
//! Nodes and leaves of all trees live in two flat arrays. A [`Stage`]
//! records where its trees start, so traversal is plain index
//! arithmetic with no per-node allocation.
//!
//! # Layouts
//!
//! [`CascadeModel::unpack`] accepts two little-endian layouts and picks
//! one by sniffing the first four bytes.
//!
//! Native layout (starts with [`MAGIC`]):
//!
//! ```text
//! magic        4 bytes  "FVCS"
//! version      u32      FORMAT_VERSION
//! scoring      u32      ScoringKind::code
//! stage_count  u32      >= 1
//! per stage:
//!   tree_count u32      >= 1
//!   depth      u32      1..=MAX_DEPTH
//!   threshold  f32
//!   per tree:
//!     nodes    (2^depth - 1) x { r1 i8, c1 i8, r2 i8, c2 i8, threshold i16 }
//!     leaves   (2^depth) x f32
//! ```
//!
//! Pico layout (anything else), as used by the pre-trained
//! `facefinder` resource:
//!
//! ```text
//! header       8 bytes  (ignored)
//! depth        u32
//! tree_count   u32
//! per tree:
//!   nodes      (2^depth - 1) x { r1 i8, c1 i8, r2 i8, c2 i8 }
//!   leaves     (2^depth) x f32
//!   threshold  f32
//! ```
//!
//! Every pico tree becomes a single-tree stage scored with
//! [`ScoringKind::Margin`].
//!
//! Both parsers make one forward pass and reject truncated input,
//! trailing bytes, out-of-range depths and non-finite floats.

use std::sync::OnceLock;

use crate::scoring::ScoringKind;

/// First four bytes of the native layout.
pub const MAGIC: [u8; 4] = *b"FVCS";

/// Native layout version written by [`CascadeModel::to_bytes`].
pub const FORMAT_VERSION: u32 = 1;

/// Deepest tree accepted by either parser.
pub const MAX_DEPTH: u32 = 12;

/// Bytes skipped at the start of a pico cascade.
const PICO_HEADER_LEN: usize = 8;

/// Errors produced while reading or assembling a cascade.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CascadeError {
    /// The byte stream ended before a field could be read.
    #[error("cascade data truncated at byte {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        /// Position of the field that could not be read.
        offset: usize,
        /// Bytes the field needs.
        needed: usize,
        /// Bytes left in the stream.
        available: usize,
    },

    /// Bytes remain after the last tree.
    #[error("{0} unexpected trailing bytes after cascade data")]
    TrailingBytes(usize),

    /// The native magic is missing.
    #[error("unrecognized cascade header")]
    BadMagic,

    /// The native layout version is not supported.
    #[error("unsupported cascade format version {0}")]
    UnsupportedVersion(u32),

    /// The scoring code does not name a known rule.
    #[error("unknown scoring rule code {0}")]
    UnknownScoring(u32),

    /// A tree depth is zero or deeper than [`MAX_DEPTH`].
    #[error("tree depth {0} is outside 1..={max}", max = MAX_DEPTH)]
    InvalidDepth(u32),

    /// The cascade declares no stages.
    #[error("cascade has no stages")]
    EmptyCascade,

    /// A stage declares no trees.
    #[error("stage {stage} has no trees")]
    EmptyStage {
        /// Zero-based stage index.
        stage: usize,
    },

    /// A tree's depth differs from the rest of its stage.
    #[error("tree {tree} of stage {stage} does not match the stage depth")]
    MismatchedTree {
        /// Zero-based stage index.
        stage: usize,
        /// Zero-based tree index within the stage.
        tree: usize,
    },

    /// Node and leaf counts do not describe a complete binary tree.
    #[error("malformed tree: {nodes} nodes and {leaves} leaves")]
    MalformedTree {
        /// Number of internal nodes supplied.
        nodes: usize,
        /// Number of leaves supplied.
        leaves: usize,
    },

    /// A stored float is NaN or infinite.
    #[error("non-finite value at byte {offset}")]
    NonFiniteValue {
        /// Position of the offending float.
        offset: usize,
    },

    /// A threshold or prediction passed to the builder is NaN or infinite.
    #[error("non-finite threshold or prediction")]
    NonFiniteParameter,
}

/// Internal decision node: a pixel-pair comparison.
///
/// Offsets are signed and scaled by `window_side / 256`, so `±128`
/// reaches the window edge. Traversal steps to the right child when
/// `p(r1, c1) - p(r2, c2) <= threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Node {
    /// Row offset of the first sample.
    pub r1: i8,
    /// Column offset of the first sample.
    pub c1: i8,
    /// Row offset of the second sample.
    pub r2: i8,
    /// Column offset of the second sample.
    pub c2: i8,
    /// Intensity difference at or below which the right child is taken.
    pub threshold: i16,
}

impl Node {
    /// Pixel-pair node with a zero comparison threshold.
    #[must_use]
    pub const fn new(r1: i8, c1: i8, r2: i8, c2: i8) -> Self {
        Self {
            r1,
            c1,
            r2,
            c2,
            threshold: 0,
        }
    }

    /// Same node with a different comparison threshold.
    #[must_use]
    pub const fn with_threshold(self, threshold: i16) -> Self {
        Self { threshold, ..self }
    }
}

/// One decision tree used when assembling a cascade in code.
///
/// Nodes are in heap order: the root first, the children of the
/// 1-based node `i` at `2i` and `2i + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    nodes: Vec<Node>,
    leaves: Vec<f32>,
}

impl Tree {
    /// Create a tree from heap-ordered nodes and its leaf predictions.
    ///
    /// # Errors
    ///
    /// Returns [`CascadeError::MalformedTree`] unless there are `2^d`
    /// leaves and `2^d - 1` nodes for some depth `d` in
    /// `1..=MAX_DEPTH`.
    pub fn new(nodes: Vec<Node>, leaves: Vec<f32>) -> Result<Self, CascadeError> {
        let well_formed = leaves.len() >= 2
            && leaves.len().is_power_of_two()
            && leaves.len().trailing_zeros() <= MAX_DEPTH
            && nodes.len() + 1 == leaves.len();
        if !well_formed {
            return Err(CascadeError::MalformedTree {
                nodes: nodes.len(),
                leaves: leaves.len(),
            });
        }
        Ok(Self { nodes, leaves })
    }

    /// Depth-one tree: a single comparison choosing between two leaves.
    ///
    /// `left` is taken when the first sample is brighter than the second
    /// by more than the node threshold, `right` otherwise.
    #[must_use]
    pub fn stump(node: Node, left: f32, right: f32) -> Self {
        Self {
            nodes: vec![node],
            leaves: vec![left, right],
        }
    }

    /// Number of comparisons from root to leaf.
    #[must_use]
    pub const fn depth(&self) -> u32 {
        self.leaves.len().trailing_zeros()
    }
}

/// Location and parameters of one stage inside the arena.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stage {
    threshold: f32,
    depth: u32,
    tree_count: usize,
    node_base: usize,
    leaf_base: usize,
}

impl Stage {
    /// Pass threshold compared against the running confidence.
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Depth shared by every tree of the stage.
    #[must_use]
    pub const fn depth(&self) -> u32 {
        self.depth
    }

    /// Number of trees in the stage.
    #[must_use]
    pub const fn tree_count(&self) -> usize {
        self.tree_count
    }

    const fn nodes_per_tree(&self) -> usize {
        (1 << self.depth) - 1
    }

    const fn leaves_per_tree(&self) -> usize {
        1 << self.depth
    }
}

/// Immutable, pre-trained cascade.
///
/// Parsed once and then only read. The model is `Send + Sync`, so a
/// single instance can serve concurrent scans.
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeModel {
    stages: Vec<Stage>,
    nodes: Vec<Node>,
    leaves: Vec<f32>,
    scoring: ScoringKind,
}

impl CascadeModel {
    /// Parse a cascade in either supported layout.
    ///
    /// # Errors
    ///
    /// Returns a [`CascadeError`] describing the first problem found.
    pub fn unpack(bytes: &[u8]) -> Result<Self, CascadeError> {
        if bytes.starts_with(&MAGIC) {
            Self::parse_native(bytes)
        } else {
            Self::parse_pico(bytes)
        }
    }

    /// Parse the native, versioned layout.
    ///
    /// # Errors
    ///
    /// Returns a [`CascadeError`] describing the first problem found.
    pub fn parse_native(bytes: &[u8]) -> Result<Self, CascadeError> {
        let mut reader = Reader::new(bytes);

        if reader.array::<4>()? != MAGIC {
            return Err(CascadeError::BadMagic);
        }
        let version = reader.u32()?;
        if version != FORMAT_VERSION {
            return Err(CascadeError::UnsupportedVersion(version));
        }
        let code = reader.u32()?;
        let scoring = ScoringKind::from_code(code).ok_or(CascadeError::UnknownScoring(code))?;

        let stage_count = reader.u32()?;
        if stage_count == 0 {
            return Err(CascadeError::EmptyCascade);
        }

        let mut arena = Arena::new(scoring);
        for stage in 0..to_usize(stage_count) {
            let tree_count = to_usize(reader.u32()?);
            if tree_count == 0 {
                return Err(CascadeError::EmptyStage { stage });
            }
            let depth = checked_depth(reader.u32()?)?;
            let threshold = reader.f32()?;

            arena.begin_stage(threshold, depth);
            let (node_count, leaf_count) = tree_shape(depth);
            for _ in 0..tree_count {
                for _ in 0..node_count {
                    let [r1, c1, r2, c2] = reader.offsets()?;
                    let threshold = reader.i16()?;
                    arena.nodes.push(Node {
                        r1,
                        c1,
                        r2,
                        c2,
                        threshold,
                    });
                }
                for _ in 0..leaf_count {
                    arena.leaves.push(reader.f32()?);
                }
                arena.end_tree();
            }
        }

        reader.finish()?;
        Ok(arena.into_model())
    }

    /// Parse the pico `facefinder` layout.
    ///
    /// # Errors
    ///
    /// Returns a [`CascadeError`] describing the first problem found.
    pub fn parse_pico(bytes: &[u8]) -> Result<Self, CascadeError> {
        let mut reader = Reader::new(bytes);
        reader.take(PICO_HEADER_LEN)?;

        let depth = checked_depth(reader.u32()?)?;
        let tree_count = reader.u32()?;
        if tree_count == 0 {
            return Err(CascadeError::EmptyCascade);
        }

        let mut arena = Arena::new(ScoringKind::Margin);
        let (node_count, leaf_count) = tree_shape(depth);
        for _ in 0..tree_count {
            let node_base = arena.nodes.len();
            let leaf_base = arena.leaves.len();
            for _ in 0..node_count {
                let [r1, c1, r2, c2] = reader.offsets()?;
                arena.nodes.push(Node::new(r1, c1, r2, c2));
            }
            for _ in 0..leaf_count {
                arena.leaves.push(reader.f32()?);
            }
            let threshold = reader.f32()?;
            arena.stages.push(Stage {
                threshold,
                depth,
                tree_count: 1,
                node_base,
                leaf_base,
            });
        }

        reader.finish()?;
        Ok(arena.into_model())
    }

    /// Serialize into the native layout.
    ///
    /// [`parse_native`](Self::parse_native) reproduces an equal model
    /// from the result.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + self.nodes.len() * 6 + self.leaves.len() * 4);
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&self.scoring.code().to_le_bytes());
        out.extend_from_slice(&len_u32(self.stages.len()).to_le_bytes());

        for stage in &self.stages {
            out.extend_from_slice(&len_u32(stage.tree_count).to_le_bytes());
            out.extend_from_slice(&stage.depth.to_le_bytes());
            out.extend_from_slice(&stage.threshold.to_le_bytes());
            for index in 0..stage.tree_count {
                let (nodes, leaves) = self.tree(stage, index);
                for node in nodes {
                    for offset in [node.r1, node.c1, node.r2, node.c2] {
                        out.extend_from_slice(&offset.to_le_bytes());
                    }
                    out.extend_from_slice(&node.threshold.to_le_bytes());
                }
                for leaf in leaves {
                    out.extend_from_slice(&leaf.to_le_bytes());
                }
            }
        }
        out
    }

    /// Scoring rule the cascade was trained with.
    #[must_use]
    pub const fn scoring(&self) -> ScoringKind {
        self.scoring
    }

    /// Stages in evaluation order.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Total number of trees across all stages.
    #[must_use]
    pub fn tree_count(&self) -> usize {
        self.stages.iter().map(Stage::tree_count).sum()
    }

    /// Nodes and leaves of tree `index` within `stage`.
    ///
    /// `stage` must come from [`stages`](Self::stages) of this model.
    pub(crate) fn tree(&self, stage: &Stage, index: usize) -> (&[Node], &[f32]) {
        let node_start = stage.node_base + index * stage.nodes_per_tree();
        let leaf_start = stage.leaf_base + index * stage.leaves_per_tree();
        let nodes = self
            .nodes
            .get(node_start..node_start + stage.nodes_per_tree())
            .unwrap_or_default();
        let leaves = self
            .leaves
            .get(leaf_start..leaf_start + stage.leaves_per_tree())
            .unwrap_or_default();
        (nodes, leaves)
    }
}

/// Assemble a [`CascadeModel`] in code, stage by stage.
///
/// ```
/// use faceveil_pipeline::cascade::{CascadeBuilder, Node, Tree};
/// use faceveil_pipeline::scoring::ScoringKind;
///
/// let model = CascadeBuilder::new(ScoringKind::Sum)
///     .stage(1.0, vec![Tree::stump(Node::new(0, 0, 0, 100), 1.0, -1.0)])
///     .build()
///     .unwrap();
/// assert_eq!(model.stages().len(), 1);
/// ```
#[derive(Debug, Clone)]
#[must_use = "call .build() to obtain the model"]
pub struct CascadeBuilder {
    scoring: ScoringKind,
    stages: Vec<(f32, Vec<Tree>)>,
}

impl CascadeBuilder {
    /// Start an empty cascade using `scoring`.
    pub const fn new(scoring: ScoringKind) -> Self {
        Self {
            scoring,
            stages: Vec::new(),
        }
    }

    /// Append a stage with its pass threshold and trees.
    pub fn stage(mut self, threshold: f32, trees: Vec<Tree>) -> Self {
        self.stages.push((threshold, trees));
        self
    }

    /// Validate and pack the stages into an arena.
    ///
    /// # Errors
    ///
    /// Returns [`CascadeError::EmptyCascade`], [`CascadeError::EmptyStage`],
    /// [`CascadeError::MismatchedTree`] or
    /// [`CascadeError::NonFiniteParameter`].
    pub fn build(self) -> Result<CascadeModel, CascadeError> {
        if self.stages.is_empty() {
            return Err(CascadeError::EmptyCascade);
        }

        let mut arena = Arena::new(self.scoring);
        for (stage_index, (threshold, trees)) in self.stages.into_iter().enumerate() {
            let depth = trees
                .first()
                .map(Tree::depth)
                .ok_or(CascadeError::EmptyStage { stage: stage_index })?;
            if !threshold.is_finite() {
                return Err(CascadeError::NonFiniteParameter);
            }

            arena.begin_stage(threshold, depth);
            for (tree_index, tree) in trees.into_iter().enumerate() {
                if tree.depth() != depth {
                    return Err(CascadeError::MismatchedTree {
                        stage: stage_index,
                        tree: tree_index,
                    });
                }
                if !tree.leaves.iter().all(|v| v.is_finite()) {
                    return Err(CascadeError::NonFiniteParameter);
                }
                arena.nodes.extend(tree.nodes);
                arena.leaves.extend(tree.leaves);
                arena.end_tree();
            }
        }
        Ok(arena.into_model())
    }
}

/// Process-wide, lazily parsed cascade.
///
/// The first caller of [`get_or_load`](Self::get_or_load) runs the
/// loader; concurrent callers wait for it and then share the result.
/// A failed load is cached as well, so a corrupt resource is reported
/// consistently instead of being re-parsed for every request.
///
/// ```
/// use faceveil_pipeline::cascade::{CascadeModel, SharedCascade};
///
/// static FACEFINDER: SharedCascade = SharedCascade::new();
///
/// let first = FACEFINDER.get_or_load(|| CascadeModel::unpack(&[]));
/// assert!(first.is_err());
/// ```
#[derive(Debug, Default)]
pub struct SharedCascade {
    cell: OnceLock<Result<CascadeModel, CascadeError>>,
}

impl SharedCascade {
    /// An empty slot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    /// Return the shared model, running `load` if no load has happened yet.
    ///
    /// # Errors
    ///
    /// Returns the [`CascadeError`] of the one load attempt.
    pub fn get_or_load<F>(&self, load: F) -> Result<&CascadeModel, CascadeError>
    where
        F: FnOnce() -> Result<CascadeModel, CascadeError>,
    {
        self.cell.get_or_init(load).as_ref().map_err(Clone::clone)
    }

    /// The shared model, if it has been loaded successfully.
    #[must_use]
    pub fn get(&self) -> Option<&CascadeModel> {
        self.cell.get().and_then(|loaded| loaded.as_ref().ok())
    }
}

/// Collects stages, nodes and leaves while parsing or building.
struct Arena {
    stages: Vec<Stage>,
    nodes: Vec<Node>,
    leaves: Vec<f32>,
    scoring: ScoringKind,
}

impl Arena {
    const fn new(scoring: ScoringKind) -> Self {
        Self {
            stages: Vec::new(),
            nodes: Vec::new(),
            leaves: Vec::new(),
            scoring,
        }
    }

    fn begin_stage(&mut self, threshold: f32, depth: u32) {
        self.stages.push(Stage {
            threshold,
            depth,
            tree_count: 0,
            node_base: self.nodes.len(),
            leaf_base: self.leaves.len(),
        });
    }

    fn end_tree(&mut self) {
        if let Some(stage) = self.stages.last_mut() {
            stage.tree_count += 1;
        }
    }

    fn into_model(self) -> CascadeModel {
        CascadeModel {
            stages: self.stages,
            nodes: self.nodes,
            leaves: self.leaves,
            scoring: self.scoring,
        }
    }
}

/// Forward-only little-endian cursor.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], CascadeError> {
        let available = self.bytes.len() - self.pos;
        let slice = self
            .bytes
            .get(self.pos..self.pos + needed.min(available))
            .filter(|s| s.len() == needed)
            .ok_or(CascadeError::Truncated {
                offset: self.pos,
                needed,
                available,
            })?;
        self.pos += needed;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], CascadeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, CascadeError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i16(&mut self) -> Result<i16, CascadeError> {
        Ok(i16::from_le_bytes(self.array()?))
    }

    fn f32(&mut self) -> Result<f32, CascadeError> {
        let offset = self.pos;
        let value = f32::from_le_bytes(self.array()?);
        if value.is_finite() {
            Ok(value)
        } else {
            Err(CascadeError::NonFiniteValue { offset })
        }
    }

    /// Four signed pixel offsets `r1, c1, r2, c2`.
    fn offsets(&mut self) -> Result<[i8; 4], CascadeError> {
        Ok(self.array::<4>()?.map(|b| i8::from_le_bytes([b])))
    }

    fn finish(self) -> Result<(), CascadeError> {
        match self.bytes.len() - self.pos {
            0 => Ok(()),
            rest => Err(CascadeError::TrailingBytes(rest)),
        }
    }
}

fn checked_depth(depth: u32) -> Result<u32, CascadeError> {
    if (1..=MAX_DEPTH).contains(&depth) {
        Ok(depth)
    } else {
        Err(CascadeError::InvalidDepth(depth))
    }
}

/// `(internal nodes, leaves)` of a complete tree of `depth`.
const fn tree_shape(depth: u32) -> (usize, usize) {
    let leaves = 1usize << depth;
    (leaves - 1, leaves)
}

fn to_usize(value: u32) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

/// Saturating; arena sizes stay far below `u32::MAX`.
fn len_u32(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}
