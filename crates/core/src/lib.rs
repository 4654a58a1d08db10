//! Smoke Inverse-Design Core Library
//!
//! A differentiable 2D Eulerian smoke simulator on a periodic grid. Given an
//! initial density and a target density, it searches for the initial velocity
//! field whose simulated trajectory carries one into the other, by gradient
//! descent through the whole unrolled simulation.
//!
//! ## Components
//!
//! - Toroidal grid storage with write-once step/sweep arenas
//! - Semi-Lagrangian advection with bilinear sampling
//! - Pressure projection by a fixed number of Jacobi sweeps
//! - Hand-derived adjoints of every operator for the backward pass
//! - Gradient-descent optimizer over the initial velocity

pub mod config;
pub mod error;
pub mod grid;
pub mod solver;

// Re-export core types
pub use config::{InitialVelocity, SimulationConfig};
pub use error::{SimError, SimResult, Stage};
pub use grid::{IterationIndexedField, ScalarField2D, TimeIndexedField};
pub use solver::{
    backward, FrameRecorder, FrameSink, IterationReport, Optimizer, PassKind, PassStats,
    SimulationState, VelocityGradient,
};
