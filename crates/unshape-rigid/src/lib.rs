//! Rigid body simulation core for resin.
//!
//! A uniform grid of regions is the broad phase. Contacts are pooled per
//! tick and resolved by a sequential impulse solver over conflict-free
//! batches of constraints:
//! - [`PhysicsWorld`] - objects, joints, and the per-tick pipeline
//! - [`RigidBody`], [`RayCollider`], [`CollisionGroup`] - simulated objects
//! - [`CollisionShape`] - ray, sphere, triangle mesh, infinite plane, composite
//! - [`GridRegionManager`] - spatial partitioning into activity buckets
//! - [`ContactCache`] / [`Pool`] - chunked, recycled contact storage
//! - [`ConstraintGraph`] / [`Solver`] - islands, batching, and the solve
//! - [`ModelPhysics`] - binary per-bone shapes and joints
//!
//! Enable the `parallel` feature to solve the members of each batch on the
//! rayon thread pool, and `serde` for serializable configuration and shapes.

pub mod body;
pub mod codec;
pub mod config;
pub mod constraint;
pub mod contact;
pub mod debug;
pub mod error;
pub mod geom;
pub mod graph;
pub mod grid;
pub mod group;
pub mod joint;
pub mod mass;
pub mod narrow;
pub mod object;
pub mod pool;
pub mod ray;
pub mod region;
pub mod shape;
pub mod solver;
pub mod world;

pub use body::{BodyCache, CollisionCallback, RigidBody};
pub use codec::{BonePhysics, JointPhysics, ModelInstance, ModelPhysics};
pub use config::{ContactSettings, GridConfig, Physics, PhysicsConfig, SleepSettings};
pub use constraint::{
    ConstraintSolver, ContactReport, PhysicsConstraint, SolverBody, StepContext,
};
pub use contact::{ContactCache, ContactPart, ContactPoint, ContactRegion};
pub use debug::{Color, DebugRenderer, LineBuffer};
pub use error::{CodecError, ConfigError, PhysicsError, PhysicsResult, PoolError};
pub use geom::{Aabb, Line, Plane, PlaneSide};
pub use graph::{ConstraintGraph, ConstraintLink, batch_constraints};
pub use grid::{BroadEntry, GridRegionManager, RegionDelta, RegionManager};
pub use group::CollisionGroup;
pub use joint::{
    FixedJointConstraint, JointConstraint, JointDrive, PlacedFootConstraint,
    SkeletalJointConstraint,
};
pub use mass::MassInfo;
pub use narrow::{ContactManifold, ManifoldPoint, RayHit};
pub use object::{BroadBounds, CollisionObject, ObjectArena, ObjectCore, ObjectId, UserEntity};
pub use pool::{AllocatorId, Pool, PoolHandle, Recycle};
pub use ray::{RayCallback, RayCollider, RayContact};
pub use region::{Activity, PhysicsRegion, RegionId, RegionSet};
pub use shape::{CollisionShape, ShapeType, TriangleMesh};
pub use solver::{SolveOutcome, Solver};
pub use world::{JointId, OrphanCallback, PhysicsWorld, StepStats};
