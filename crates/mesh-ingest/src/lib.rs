pub mod error;
pub mod gateway;
pub mod metrics;
pub mod normalize;
pub mod pipeline;
pub mod request_id;
pub mod router;
pub mod time;
pub mod wire;

pub use error::{GatewayError, WireError};
pub use gateway::{Gateway, GatewayConfig, IngressItem, MsgType};
pub use normalize::{NormalizedSample, Normalizer};
pub use pipeline::{HandlerState, Pipeline, PipelineConfig, PitcherConfig, StateValue};
pub use request_id::RequestIdGenerator;
pub use router::{CommandRegistry, CommandRequestBody, CommandResult, IngressRouter};
pub use wire::{Command, CommandHeader, CommandResponse, DataIndication, MeshCtrl, Message, RawResponse, SampleRecord};
