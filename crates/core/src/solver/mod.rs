//! Differentiable smoke solver
//!
//! The forward pipeline (advection and pressure projection) and its reverse-mode
//! gradient, plus the gradient-descent loop that ties them together.
//!
//! # Pipeline
//!
//! ```text
//! Optimizer ─► SimulationState::forward ─► loss
//!     ▲                                     │
//!     └──── descend ◄── backward ◄──────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use smoke_design_core::solver::Optimizer;
//! use smoke_design_core::{ScalarField2D, SimulationConfig};
//!
//! let config = SimulationConfig::with_resolution(32);
//! let mut optimizer = Optimizer::new(config, initial, target)?;
//! optimizer.run(|report| println!("{}: {}", report.iteration, report.loss), None)?;
//! optimizer.final_pass(None)?;
//! ```

pub mod advection;
mod gradient;
mod optimizer;
pub mod projection;
mod stepper;

// Re-exports
pub use advection::BilinearStencil;
pub use gradient::{backward, VelocityGradient};
pub use optimizer::{IterationReport, Optimizer};
pub use stepper::{
    mean_squared_error, FrameRecorder, FrameSink, PassKind, PassStats, SimulationState,
};
