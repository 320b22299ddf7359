//! Command TLV decoding/encoding.
//!
//! Each command inside a [`crate::wire::Message`] payload is a
//! `len(1B) | cmd_id(1B) | body(len-1 bytes)` TLV. Unknown `cmd_id`s decode
//! as [`RawResponse`]; `cmd_id == 0xDD` decodes as [`DataIndication`].

use std::collections::HashMap;
use std::sync::OnceLock;

use byteorder::{BigEndian, ByteOrder};

use crate::error::WireError;

/// `cmd_id` for the `DataIndication` sample-report command.
pub const CMD_DATA_INDICATION: u8 = 0xDD;

/// One decoded command, tagged by variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    DataIndication(DataIndication),
    Raw(RawResponse),
}

impl Command {
    /// Encode this command back into its TLV form: `len | cmd_id | body`.
    pub fn encode(&self) -> Vec<u8> {
        let (cmd_id, body) = match self {
            Command::DataIndication(d) => (CMD_DATA_INDICATION, d.encode_body()),
            Command::Raw(r) => (r.cmd_id, r.body()),
        };
        wrap(cmd_id, &body)
    }

    /// Build the per-command response dict consumed by the ingress router
    /// and sample normalizer, enriched with the shared header fields every
    /// command response carries.
    pub fn response(&self, header: &CommandHeader) -> CommandResponse {
        let common = ResponseCommon {
            status: !header.mesh_ctrl_fail,
            macaddr: header.addr.clone(),
            source_hopcount: header.source_hopcount,
            source_queue_length: header.source_queue_length,
        };
        match self {
            Command::DataIndication(d) => CommandResponse::Data {
                common,
                kind: "mon",
                op_stat: d.op_stat,
                reg_stat: d.reg_stat,
                samples: d.sorted_samples(),
            },
            Command::Raw(r) => CommandResponse::Raw {
                common,
                raw: r.raw_hex.clone(),
            },
        }
    }
}

/// The header fields a command's `response()` needs, decoupled from the full
/// [`crate::wire::Message`] so commands don't hold a back-reference.
#[derive(Debug, Clone)]
pub struct CommandHeader {
    pub mesh_ctrl_fail: bool,
    pub addr: String,
    pub source_hopcount: u8,
    pub source_queue_length: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseCommon {
    pub status: bool,
    pub macaddr: String,
    pub source_hopcount: u8,
    pub source_queue_length: u8,
}

/// The dict-shaped response a command produces, dispatched to
/// `dispatchCommandHandlers`.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResponse {
    Raw {
        common: ResponseCommon,
        raw: String,
    },
    Data {
        common: ResponseCommon,
        kind: &'static str,
        op_stat: u16,
        reg_stat: u16,
        samples: Vec<SampleRecord>,
    },
}

// ---------------------------------------------------------------------------
// Command registry
// ---------------------------------------------------------------------------

type DecodeFn = fn(&[u8]) -> Command;

fn registry() -> &'static HashMap<u8, DecodeFn> {
    static REGISTRY: OnceLock<HashMap<u8, DecodeFn>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut m: HashMap<u8, DecodeFn> = HashMap::new();
        m.insert(CMD_DATA_INDICATION, |body| {
            Command::DataIndication(DataIndication::decode(body))
        });
        m
    })
}

/// Parse the command TLVs out of a message's raw command payload. Unknown
/// `cmd_id`s fall back to [`RawResponse`]. Returns an error if a TLV's `len`
/// walks past the end of `payload`.
pub fn parse_commands(payload: &[u8]) -> Result<Vec<Command>, WireError> {
    let mut commands = Vec::new();
    let mut i = 0usize;
    while i < payload.len() {
        let len = payload[i] as usize;
        if i + 1 + len > payload.len() {
            return Err(WireError::MalformedCommand(format!(
                "TLV at offset {i} declares len {len} but only {} bytes remain",
                payload.len() - i - 1
            )));
        }
        let cmd_data = &payload[i + 1..i + 1 + len];
        if cmd_data.is_empty() {
            i += 1 + len;
            continue;
        }
        let cmd_id = cmd_data[0];
        let body = &cmd_data[1..];
        let command = match registry().get(&cmd_id) {
            Some(decode) => decode(body),
            None => Command::Raw(RawResponse::decode(cmd_id, body)),
        };
        commands.push(command);
        i += 1 + len;
    }
    Ok(commands)
}

fn wrap(cmd_id: u8, body: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(1 + body.len());
    raw.push(cmd_id);
    raw.extend_from_slice(body);
    let mut out = Vec::with_capacity(1 + raw.len());
    out.push(raw.len() as u8);
    out.extend_from_slice(&raw);
    out
}

// ---------------------------------------------------------------------------
// RawResponse — unknown command passthrough
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub cmd_id: u8,
    /// Uppercase hex rendering of the command body, matching the original
    /// `_h()` hex helper.
    pub raw_hex: String,
}

impl RawResponse {
    fn decode(cmd_id: u8, body: &[u8]) -> Self {
        Self {
            cmd_id,
            raw_hex: hex_upper(body),
        }
    }

    fn body(&self) -> Vec<u8> {
        unhex(&self.raw_hex)
    }
}

fn hex_upper(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02X}"));
    }
    s
}

fn unhex(hex: &str) -> Vec<u8> {
    (0..hex.len())
        .step_by(2)
        .filter_map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

// ---------------------------------------------------------------------------
// DataIndication — sample report (cmd_id 0xDD)
// ---------------------------------------------------------------------------

const SAMPLE_SIZE: usize = 14;

/// One decoded electrical sample. `timestamp` is seconds-since-sunrise (see
/// [`crate::normalize`]); the six electrical fields are already converted
/// from the wire's hundredths fixed-point integers to real units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRecord {
    pub timestamp: u16,
    pub vi: f64,
    pub vo: f64,
    pub ii: f64,
    pub io: f64,
    pub pi: f64,
    pub po: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataIndication {
    pub op_stat: u16,
    pub reg_stat: u16,
    pub samples: Vec<SampleRecord>,
}

impl DataIndication {
    pub fn new(op_stat: u16, reg_stat: u16, samples: Vec<SampleRecord>) -> Self {
        Self {
            op_stat,
            reg_stat,
            samples,
        }
    }

    /// Decode `opStat`, `regStat`, and all complete 14-byte sample records
    /// from a command body. Trailing bytes that can't complete a full
    /// sample are discarded with a warning; a body shorter than 4 bytes
    /// yields an empty, zeroed indication (mirrors the original's
    /// catch-and-log-on-parse-error behavior — frames are dropped upstream,
    /// not this command alone).
    fn decode(body: &[u8]) -> Self {
        if body.len() < 4 {
            tracing::warn!(len = body.len(), "DataIndication body too short for op_stat/reg_stat");
            return Self::default();
        }

        let op_stat = BigEndian::read_u16(&body[0..2]);
        let reg_stat = BigEndian::read_u16(&body[2..4]);
        let data = &body[4..];

        if data.len() % SAMPLE_SIZE != 0 {
            tracing::warn!(
                len = data.len(),
                sample_size = SAMPLE_SIZE,
                "DataIndication sample payload length is not a multiple of the sample size; trailing bytes discarded"
            );
        }

        let mut samples = Vec::with_capacity(data.len() / SAMPLE_SIZE);
        let mut i = 0;
        while i + SAMPLE_SIZE <= data.len() {
            let chunk = &data[i..i + SAMPLE_SIZE];
            samples.push(SampleRecord {
                timestamp: BigEndian::read_u16(&chunk[0..2]),
                vi: BigEndian::read_i16(&chunk[2..4]) as f64 / 100.0,
                vo: BigEndian::read_i16(&chunk[4..6]) as f64 / 100.0,
                ii: BigEndian::read_i16(&chunk[6..8]) as f64 / 100.0,
                io: BigEndian::read_i16(&chunk[8..10]) as f64 / 100.0,
                pi: BigEndian::read_i16(&chunk[10..12]) as f64 / 100.0,
                po: BigEndian::read_i16(&chunk[12..14]) as f64 / 100.0,
            });
            i += SAMPLE_SIZE;
        }

        Self {
            op_stat,
            reg_stat,
            samples,
        }
    }

    /// Encode the command body: `opStat(2B) | regStat(2B) | samples...`, in
    /// caller-given order (not sorted — that's `response()`'s job).
    fn encode_body(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.samples.len() * SAMPLE_SIZE);
        let mut buf = [0u8; 2];
        BigEndian::write_u16(&mut buf, self.op_stat);
        out.extend_from_slice(&buf);
        BigEndian::write_u16(&mut buf, self.reg_stat);
        out.extend_from_slice(&buf);

        for s in &self.samples {
            let mut b2 = [0u8; 2];
            BigEndian::write_u16(&mut b2, s.timestamp);
            out.extend_from_slice(&b2);
            for v in [s.vi, s.vo, s.ii, s.io] {
                BigEndian::write_i16(&mut b2, to_hundredths(v));
                out.extend_from_slice(&b2);
            }
            for v in [s.pi, s.po] {
                BigEndian::write_i16(&mut b2, to_hundredths_saturating(v));
                out.extend_from_slice(&b2);
            }
        }
        out
    }

    /// Samples sorted by timestamp ascending, for `response()`.
    fn sorted_samples(&self) -> Vec<SampleRecord> {
        let mut samples = self.samples.clone();
        samples.sort_by_key(|s| s.timestamp);
        samples
    }
}

fn to_hundredths(value: f64) -> i16 {
    (value * 100.0).round() as i16
}

fn to_hundredths_saturating(value: f64) -> i16 {
    let scaled = (value * 100.0).round();
    if scaled > i16::MAX as f64 {
        i16::MAX
    } else if scaled < i16::MIN as f64 {
        i16::MIN
    } else {
        scaled as i16
    }
}
