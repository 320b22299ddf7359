//! Sample normalizer: turns `DataIndication` command responses into the
//! pipeline's normalized record currency (spec.md §3, §4.4).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::time::utc_epoch_now;
use crate::wire::command::{CommandResponse, ResponseCommon, SampleRecord};

/// A telemetry sample in the pipeline's shared currency — the shape that
/// gets BSON-encoded into a batch envelope. Field names and casing match
/// the external bus's record schema (spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSample {
    #[serde(rename = "type")]
    pub kind: String,
    pub macaddr: String,
    pub freezetime: i64,
    pub localtime: i64,
    #[serde(rename = "regStat")]
    pub reg_stat: u16,
    #[serde(rename = "opStat")]
    pub op_stat: u16,
    #[serde(rename = "Vi")]
    pub vi: f64,
    #[serde(rename = "Vo")]
    pub vo: f64,
    #[serde(rename = "Ii")]
    pub ii: f64,
    #[serde(rename = "Io")]
    pub io: f64,
    #[serde(rename = "Pi")]
    pub pi: f64,
    #[serde(rename = "Po")]
    pub po: f64,
}

/// Converts `DataIndication` responses into [`NormalizedSample`]s,
/// anchored to a sunrise timestamp sampled once at process startup
/// (06:00 UTC of the day the process started — not recomputed per day,
/// not geographic).
pub struct Normalizer {
    sunrise: DateTime<Utc>,
    latest_by_type: DashMap<String, NormalizedSample>,
}

impl Normalizer {
    pub fn new(sunrise: DateTime<Utc>) -> Self {
        Self { sunrise, latest_by_type: DashMap::new() }
    }

    /// `handle_data_report`: only `CommandResponse::Data` carries
    /// `regStat`/`opStat`; any other response variant yields no records
    /// (the router only calls this for `Data` responses in practice).
    pub fn handle_data_report(&self, response: &CommandResponse) -> Vec<NormalizedSample> {
        let start = crate::metrics::now_ns();
        let CommandResponse::Data { common, kind, op_stat, reg_stat, samples } = response else {
            return Vec::new();
        };
        let localtime = utc_epoch_now();
        let records: Vec<NormalizedSample> = samples
            .iter()
            .map(|sample| self.normalize_one(common, kind, *op_stat, *reg_stat, sample, localtime))
            .collect();
        crate::metrics::METRICS.record_stage(&crate::metrics::METRICS.normalize_ns, crate::metrics::now_ns() - start);
        records
    }

    fn normalize_one(
        &self,
        common: &ResponseCommon,
        kind: &str,
        op_stat: u16,
        reg_stat: u16,
        sample: &SampleRecord,
        localtime: i64,
    ) -> NormalizedSample {
        let freezetime = self.sunrise.timestamp() + sample.timestamp as i64;
        let record = NormalizedSample {
            kind: kind.to_string(),
            macaddr: common.macaddr.clone(),
            freezetime,
            localtime,
            reg_stat,
            op_stat,
            vi: sample.vi,
            vo: sample.vo,
            ii: sample.ii,
            io: sample.io,
            pi: sample.pi,
            po: sample.po,
        };
        self.latest_by_type.insert(record.kind.clone(), record.clone());
        record
    }

    /// Most recently normalized record for a given `type`, kept for
    /// introspection — not otherwise consumed by the pipeline.
    pub fn latest(&self, kind: &str) -> Option<NormalizedSample> {
        self.latest_by_type.get(kind).map(|entry| entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::command::CommandResponse;

    fn sunrise() -> DateTime<Utc> {
        Utc::now().date_naive().and_hms_opt(6, 0, 0).unwrap().and_utc()
    }

    fn data_response(samples: Vec<SampleRecord>) -> CommandResponse {
        CommandResponse::Data {
            common: ResponseCommon {
                status: true,
                macaddr: "fa29eb6d8701".into(),
                source_hopcount: 0,
                source_queue_length: 0,
            },
            kind: "mon",
            op_stat: 1,
            reg_stat: 2,
            samples,
        }
    }

    #[test]
    fn freezetime_is_sunrise_plus_timestamp_offset() {
        let normalizer = Normalizer::new(sunrise());
        let sample = SampleRecord { timestamp: 10, vi: 38.5, vo: 38.4, ii: 7.0, io: 6.9, pi: 269.5, po: 265.0 };
        let records = normalizer.handle_data_report(&data_response(vec![sample]));

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].freezetime, sunrise().timestamp() + 10);
        assert_eq!(records[0].macaddr, "fa29eb6d8701");
        assert_eq!(records[0].kind, "mon");
        assert_eq!(records[0].vi, 38.5);
    }

    #[test]
    fn caches_the_latest_record_per_type() {
        let normalizer = Normalizer::new(sunrise());
        let sample = SampleRecord { timestamp: 1, vi: 1.0, vo: 1.0, ii: 1.0, io: 1.0, pi: 1.0, po: 1.0 };
        normalizer.handle_data_report(&data_response(vec![sample]));
        assert!(normalizer.latest("mon").is_some());
        assert!(normalizer.latest("missing").is_none());
    }

    #[test]
    fn non_data_response_yields_no_records() {
        let normalizer = Normalizer::new(sunrise());
        let response = CommandResponse::Raw {
            common: ResponseCommon {
                status: true,
                macaddr: "aabbccddeeff".into(),
                source_hopcount: 0,
                source_queue_length: 0,
            },
            raw: "ABCD".into(),
        };
        assert!(normalizer.handle_data_report(&response).is_empty());
    }
}
