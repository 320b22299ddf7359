pub mod batch;
pub mod manager;
pub mod pitcher;
pub mod state;

pub use manager::{Pipeline, PipelineConfig};
pub use pitcher::PitcherConfig;
pub use state::{HandlerState, StateValue};
