//! Diffusion schedule, guidance, and the ODE stepping loop.

pub mod guidance;
pub mod schedule;
pub mod stepper;

pub use guidance::{apply_apg, ApgParams, MomentumState};
pub use schedule::schedule;
pub use stepper::{diffusion_step, DiffusionStepper, FakeStepper, RealStepper};
