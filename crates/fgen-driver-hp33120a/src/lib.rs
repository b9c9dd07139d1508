//! HP/Agilent 33120A function/arbitrary waveform generator.
//!
//! - [`driver`]: [`Hp33120a`], the serialized SCPI session with its error
//!   discipline and parameter shadow
//! - [`pipeline`]: [`CommandPipeline`], last-value-wins parameter coalescing
//!   drained by one worker thread
//! - [`arb`]: [`ArbManager`], four waveform slots resampled and uploaded in
//!   the background with volatile fallback
//! - [`lfo`]: software low-frequency modulators driving live parameters
//! - [`sim`]: an in-memory instrument for tests and `--simulate`

pub mod arb;
pub mod catalog;
pub mod driver;
pub mod lfo;
pub mod pipeline;
pub mod scpi;
pub mod sim;
pub mod types;

pub use arb::{ArbManager, ArbOutcome, SlotInfo, SlotState, StoredAs, SLOT_COUNT};
pub use catalog::Catalog;
pub use driver::{ConnectionState, DriverOptions, Hp33120a, Shadow};
pub use lfo::{LfoBank, LfoEngine, LfoSettings};
pub use pipeline::{AutomationThrottle, CommandPipeline, Param, ParamKind, PipelineTiming};
pub use sim::SimulatedInstrument;
pub use types::{AmSource, LfoShape, LiveTarget, ModShape, ModSource, TriggerSource, Waveform};
