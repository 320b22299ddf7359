//! The mesh wire protocol: control byte, message header, and command TLVs.

pub mod command;
pub mod message;
pub mod mesh_ctrl;

pub use command::{
    Command, CommandHeader, CommandResponse, DataIndication, RawResponse, ResponseCommon, SampleRecord,
};
pub use message::Message;
pub use mesh_ctrl::MeshCtrl;
