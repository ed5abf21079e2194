//! Error types for the rigid body core.

use thiserror::Error;

/// Setup-time configuration errors.
///
/// These surface before the simulation starts; a world or shape that fails
/// validation is never constructed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Grid cell size must be positive and finite.
    #[error("grid cell size must be positive, got {0}")]
    CellSize(f32),

    /// Every grid axis needs at least one cell.
    #[error("grid extents must be non-zero on every axis, got {0:?}")]
    GridExtents([u32; 3]),

    /// Grid origin has a NaN or infinite component.
    #[error("grid origin is not finite")]
    GridOrigin,

    /// The solver needs at least one iteration per tick.
    #[error("solver iterations must be at least 1")]
    SolverIterations,

    /// Timestep must be positive and finite.
    #[error("timestep must be positive, got {0}")]
    Timestep(f32),

    /// A shape description cannot be simulated.
    #[error("degenerate shape: {0}")]
    DegenerateShape(String),

    /// Mass must be non-negative and finite.
    #[error("invalid mass: {0}")]
    Mass(f32),
}

/// Contact pool protocol violations.
///
/// These indicate use-after-free class bugs in the caller and are always
/// reported, never silently absorbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The handle was issued by a different allocator.
    #[error("allocator not found: handle belongs to allocator {handle}, not {allocator}")]
    AllocatorNotFound {
        /// Allocator that issued the handle.
        handle: u32,
        /// Allocator the handle was returned to.
        allocator: u32,
    },

    /// The slot index lies outside every chunk this allocator owns.
    #[error("slot {index} is outside the allocator's storage ({capacity} slots)")]
    OutOfRange {
        /// Offending slot index.
        index: u32,
        /// Current slot capacity.
        capacity: u32,
    },

    /// The slot was already free.
    #[error("slot {0} released twice")]
    DoubleFree(u32),
}

/// Errors while reading or writing model physics data.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Underlying stream error (including unexpected end of data).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A shape tag byte did not name a known shape.
    #[error("unknown shape tag: {0}")]
    UnknownShape(u8),

    /// A length prefix is larger than the format allows.
    #[error("invalid length {0}")]
    Length(u32),

    /// A bone name was not valid UTF-8.
    #[error("bone name is not valid utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// A joint refers to a bone that does not exist.
    #[error("joint refers to bone {bone}, but only {count} bones exist")]
    BoneIndex {
        /// Referenced bone.
        bone: u32,
        /// Number of bones read.
        count: u32,
    },

    /// A decoded shape failed validation.
    #[error(transparent)]
    Shape(#[from] ConfigError),
}

/// Errors from world-level operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PhysicsError {
    /// The handle does not name a live object or joint.
    #[error("invalid handle")]
    InvalidHandle,

    /// The object exists but is the wrong kind for this call.
    #[error("wrong object kind: expected {expected}")]
    WrongKind {
        /// What the call needed.
        expected: &'static str,
    },

    /// Configuration problem.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Pool protocol problem.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Result type for world operations.
pub type PhysicsResult<T> = Result<T, PhysicsError>;
