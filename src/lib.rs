//! Per-frame 3A / ISP parameter control loop for a raw-Bayer sensor
//! pipeline: auto-exposure/gain, grey-world auto-white-balance,
//! contrast-detection autofocus, and a gamma curve, orchestrated frame by
//! frame against delayed (pipeline-depth-compensated) hardware controls.

pub mod af;
pub mod agc;
pub mod awb;
pub mod context;
pub mod controls;
pub mod contrast;
pub mod delayed_controls;
pub mod error;
pub mod grid;
pub mod histogram;
pub mod orchestrator;
pub mod param_assembler;
pub mod sensor;
pub mod stats;

pub use af::{AfAlgorithm, AfState, AfWindow};
pub use agc::{AgcAlgorithm, AgcOutput, AgcRanges, AgcState};
pub use awb::{AwbAlgorithm, AwbResult};
pub use context::{AlgorithmState, FrameContext, IpaContext, SessionConfig};
pub use controls::{AppControls, MeteringPreset, ResultMetadata};
pub use contrast::GammaLut;
pub use delayed_controls::DelayedControls;
pub use grid::{resolve_grid, GridDescriptor, Zone};
pub use histogram::Histogram;
pub use orchestrator::{FrameEvent, FrameInfo, FrameOrchestrator};
pub use sensor::{ControlId, ControlRange, LinearSensorHelper, SensorHelper};
pub use stats::{extract, StatsBufferView};
