//! `Message` — the fixed mesh header plus its command TLV payload.
//!
//! Grounded in `Message.from_raw` of the original gateway protocol module;
//! `Message.compile`'s divergent encode path is not carried over (see
//! `SPEC_FULL.md` §4.1). Field lengths follow `Message.LEN_ORDER`: `meshCtrl`
//! (1B), `addr` (8B), `requestId` (2B), `sourceHopcount` (1B),
//! `sourceQueueLength` (1B), `hopcount` (1B), `queueLength` (1B), `typeByte`
//! (1B), `partsByte` (1B) — 17 bytes total, always present.

use byteorder::{BigEndian, ByteOrder};

use crate::error::WireError;
use crate::wire::command::{parse_commands, Command, CommandHeader};
use crate::wire::mesh_ctrl::MeshCtrl;

const LEN_MESH_CTRL: usize = 1;
const LEN_ADDR: usize = 8;
const LEN_REQ_ID: usize = 2;
const LEN_SHC: usize = 1;
const LEN_SQL: usize = 1;
const LEN_HC: usize = 1;
const LEN_QL: usize = 1;
const LEN_TYPE: usize = 1;
const LEN_PART: usize = 1;
const HEADER_LEN: usize = LEN_MESH_CTRL
    + LEN_ADDR
    + LEN_REQ_ID
    + LEN_SHC
    + LEN_SQL
    + LEN_HC
    + LEN_QL
    + LEN_TYPE
    + LEN_PART;

/// `dtype` values carried in the low nibble of `typeByte`.
pub mod dtype {
    pub const RES: u8 = 0;
    pub const SPG: u8 = 1;
    pub const PLM: u8 = 2;
    pub const PLO: u8 = 3;
    pub const JXM: u8 = 4;
}

/// A decoded mesh message: header fields plus zero or more commands.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub mesh_ctrl: MeshCtrl,
    /// Lower-case hex MAC address (16 hex chars for an 8-byte address),
    /// byte order already flipped to match the conventional
    /// human-readable form (the wire carries it reversed).
    pub addr: String,
    pub request_id: u16,
    pub source_hopcount: u8,
    pub source_queue_length: u8,
    pub hopcount: u8,
    pub queue_length: u8,
    /// High nibble of `typeByte`; always zero on encode, preserved as-read
    /// on decode.
    pub reserved: u8,
    pub dtype: u8,
    /// 1-indexed part number of this message within a multi-part send.
    pub partnum: u8,
    /// Total number of parts in this message's multi-part send.
    pub numparts: u8,
    pub commands: Vec<Command>,
}

impl Message {
    /// Decode a complete frame body (everything after the TCP `MI` + length
    /// prefix, or the UDP payload) into header fields and commands.
    ///
    /// Returns [`WireError::MalformedFrame`] if fewer than [`HEADER_LEN`]
    /// bytes are available for the header, or propagates
    /// [`WireError::MalformedCommand`] from the TLV walk.
    pub fn decode(raw: &[u8]) -> Result<Self, WireError> {
        if raw.len() < HEADER_LEN {
            return Err(WireError::MalformedFrame(format!(
                "need {HEADER_LEN} header bytes, got {}",
                raw.len()
            )));
        }

        let mut i = 0usize;
        let mesh_ctrl = MeshCtrl::from_u8(raw[i]);
        i += LEN_MESH_CTRL;

        let addr = addr_from_wire(&raw[i..i + LEN_ADDR]);
        i += LEN_ADDR;

        let request_id = BigEndian::read_u16(&raw[i..i + LEN_REQ_ID]);
        i += LEN_REQ_ID;

        let source_hopcount = raw[i];
        i += LEN_SHC;
        let source_queue_length = raw[i];
        i += LEN_SQL;
        let hopcount = raw[i];
        i += LEN_HC;
        let queue_length = raw[i];
        i += LEN_QL;

        let type_byte = raw[i];
        i += LEN_TYPE;
        let reserved = type_byte >> 4;
        let dtype = type_byte & 0x0F;

        let parts_byte = raw[i];
        i += LEN_PART;
        let partnum = (parts_byte >> 4) + 1;
        let numparts = (parts_byte & 0x0F) + 1;

        let commands = parse_commands(&raw[i..])?;

        Ok(Self {
            mesh_ctrl,
            addr,
            request_id,
            source_hopcount,
            source_queue_length,
            hopcount,
            queue_length,
            reserved,
            dtype,
            partnum,
            numparts,
            commands,
        })
    }

    /// Encode this message back into its wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + 16);
        out.push(self.mesh_ctrl.to_u8());
        out.extend_from_slice(&addr_to_wire(&self.addr));
        let mut req = [0u8; 2];
        BigEndian::write_u16(&mut req, self.request_id);
        out.extend_from_slice(&req);
        out.push(self.source_hopcount);
        out.push(self.source_queue_length);
        out.push(self.hopcount);
        out.push(self.queue_length);
        out.push((self.reserved << 4) | (self.dtype & 0x0F));
        out.push(((self.partnum - 1) << 4) | (self.numparts - 1));

        for cmd in &self.commands {
            out.extend_from_slice(&cmd.encode());
        }
        out
    }

    /// Build the shared [`CommandHeader`] this message's commands need to
    /// produce their `response()`.
    pub fn command_header(&self) -> CommandHeader {
        CommandHeader {
            mesh_ctrl_fail: self.mesh_ctrl.fail(),
            addr: self.addr.clone(),
            source_hopcount: self.source_hopcount,
            source_queue_length: self.source_queue_length,
        }
    }
}

/// The wire carries `addr` reversed; flip it back to the conventional
/// most-significant-byte-first hex string.
fn addr_from_wire(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes.iter().rev() {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

fn addr_to_wire(addr: &str) -> [u8; LEN_ADDR] {
    let mut out = [0u8; LEN_ADDR];
    for (i, chunk) in (0..LEN_ADDR * 2).step_by(2).enumerate() {
        out[LEN_ADDR - 1 - i] = u8::from_str_radix(&addr[chunk..chunk + 2], 16).unwrap_or(0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::command::{Command, DataIndication, SampleRecord};

    fn sample_message() -> Message {
        Message {
            mesh_ctrl: MeshCtrl::from_u8(0b0010_0001),
            addr: "0102030405060708".into(),
            request_id: 0x1234,
            source_hopcount: 1,
            source_queue_length: 2,
            hopcount: 3,
            queue_length: 0,
            reserved: 0,
            dtype: 1,
            partnum: 1,
            numparts: 1,
            commands: vec![Command::DataIndication(DataIndication::new(
                0,
                0,
                vec![SampleRecord {
                    timestamp: 42,
                    vi: 38.5,
                    vo: 38.4,
                    ii: 7.0,
                    io: 6.9,
                    pi: 269.5,
                    po: 265.0,
                }],
            ))],
        }
    }

    #[test]
    fn round_trips_header_and_commands() {
        let msg = sample_message();
        let encoded = msg.encode();
        let decoded = Message::decode(&encoded).unwrap();

        assert_eq!(decoded.mesh_ctrl, msg.mesh_ctrl);
        assert_eq!(decoded.addr, msg.addr);
        assert_eq!(decoded.request_id, msg.request_id);
        assert_eq!(decoded.dtype, msg.dtype);
        assert_eq!(decoded.partnum, msg.partnum);
        assert_eq!(decoded.numparts, msg.numparts);
        assert_eq!(decoded.commands, msg.commands);
    }

    #[test]
    fn addr_byte_order_is_flipped_between_wire_and_hex() {
        let wire = [0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01];
        assert_eq!(addr_from_wire(&wire), "0102030405060708");
        assert_eq!(addr_to_wire("0102030405060708"), wire);
    }

    #[test]
    fn rejects_truncated_header() {
        let raw = [0u8; 5];
        assert!(Message::decode(&raw).is_err());
    }

    #[test]
    fn multipart_fields_round_trip() {
        let mut msg = sample_message();
        msg.partnum = 3;
        msg.numparts = 8;
        let encoded = msg.encode();
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded.partnum, 3);
        assert_eq!(decoded.numparts, 8);
    }

    #[test]
    fn decodes_a_bare_header_with_no_commands() {
        let body: [u8; 17] = [
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x02, 0x00,
        ];
        let msg = Message::decode(&body).unwrap();
        assert_eq!(msg.dtype, 2);
        assert_eq!(msg.commands.len(), 0);
    }
}
