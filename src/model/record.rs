//! Typed envelopes around registry payloads

use crate::model::window::parse_feed_timestamp;
use crate::{RecordError, RecordResult};
use chrono::NaiveDateTime;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Natural key of a procurement record
pub const CONTROL_NUMBER_FIELD: &str = "numeroControlePNCP";

/// Last-update timestamp used for ordering and staleness checks
pub const UPDATED_AT_FIELD: &str = "dataAtualizacaoGlobal";

/// Item number within a procurement record
pub const ITEM_NUMBER_FIELD: &str = "numeroItem";

/// PNCP control number: `CNPJ-<kind>-SEQUENCE/YEAR`
///
/// e.g. `07854402000100-1-000054/2025`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControlNumber {
    raw: String,
    cnpj: String,
    sequence: u32,
    year: u16,
}

impl ControlNumber {
    pub fn parse(value: &str) -> RecordResult<Self> {
        let invalid = || RecordError::InvalidControlNumber(value.to_string());

        let (head, year) = value.split_once('/').ok_or_else(invalid)?;
        let mut parts = head.split('-');
        let (cnpj, kind, sequence) = match (parts.next(), parts.next(), parts.next(), parts.next())
        {
            (Some(cnpj), Some(kind), Some(sequence), None) => (cnpj, kind, sequence),
            _ => return Err(invalid()),
        };

        if cnpj.len() != 14 || !all_digits(cnpj) {
            return Err(invalid());
        }
        if kind.is_empty() || !all_digits(kind) {
            return Err(invalid());
        }
        if sequence.is_empty() || !all_digits(sequence) {
            return Err(invalid());
        }
        if year.len() != 4 || !all_digits(year) {
            return Err(invalid());
        }

        Ok(Self {
            raw: value.to_string(),
            cnpj: cnpj.to_string(),
            sequence: sequence.parse().map_err(|_| invalid())?,
            year: year.parse().map_err(|_| invalid())?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Tax id of the purchasing body
    pub fn cnpj(&self) -> &str {
        &self.cnpj
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn year(&self) -> u16 {
        self.year
    }
}

fn all_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

impl FromStr for ControlNumber {
    type Err = RecordError;

    fn from_str(s: &str) -> RecordResult<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ControlNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// One entry of the update feed
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntry {
    pub control_number: ControlNumber,
    pub updated_at: NaiveDateTime,
    pub payload: Map<String, Value>,
}

impl RawEntry {
    /// Extracts the key and update timestamp, keeping the payload opaque
    pub fn from_json(value: Value) -> RecordResult<Self> {
        let Value::Object(payload) = value else {
            return Err(RecordError::MissingField(CONTROL_NUMBER_FIELD));
        };

        let control_number = payload
            .get(CONTROL_NUMBER_FIELD)
            .and_then(Value::as_str)
            .ok_or(RecordError::MissingField(CONTROL_NUMBER_FIELD))
            .and_then(ControlNumber::parse)?;

        let updated_at = payload_timestamp(&payload)?;

        Ok(Self {
            control_number,
            updated_at,
            payload,
        })
    }
}

/// Reads `dataAtualizacaoGlobal` from a payload object
pub(crate) fn payload_timestamp(payload: &Map<String, Value>) -> RecordResult<NaiveDateTime> {
    let raw = payload
        .get(UPDATED_AT_FIELD)
        .and_then(Value::as_str)
        .ok_or(RecordError::MissingField(UPDATED_AT_FIELD))?;

    parse_feed_timestamp(raw).map_err(|_| RecordError::InvalidTimestamp {
        field: UPDATED_AT_FIELD,
        value: raw.to_string(),
    })
}

/// One line item of a procurement record
#[derive(Debug, Clone, PartialEq)]
pub struct RawItem {
    pub control_number: ControlNumber,
    pub item_number: i64,
    pub payload: Map<String, Value>,
}

impl RawItem {
    pub fn from_json(control_number: &ControlNumber, value: Value) -> RecordResult<Self> {
        let Value::Object(payload) = value else {
            return Err(RecordError::MissingField(ITEM_NUMBER_FIELD));
        };

        let item_number = payload
            .get(ITEM_NUMBER_FIELD)
            .and_then(Value::as_i64)
            .ok_or(RecordError::MissingField(ITEM_NUMBER_FIELD))?;

        Ok(Self {
            control_number: control_number.clone(),
            item_number,
            payload,
        })
    }
}

/// An entry enriched with its items, ready to persist
#[derive(Debug, Clone, PartialEq)]
pub struct ProcurementRecord {
    pub entry: RawEntry,
    pub items: Vec<RawItem>,
}

impl ProcurementRecord {
    pub fn new(entry: RawEntry, items: Vec<RawItem>) -> Self {
        Self { entry, items }
    }

    pub fn key(&self) -> &ControlNumber {
        &self.entry.control_number
    }

    pub fn updated_at(&self) -> NaiveDateTime {
        self.entry.updated_at
    }
}

/// One page of the update feed
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PageResult {
    /// Oldest first
    pub entries: Vec<RawEntry>,
    pub page_number: u32,
    pub total_pages: u32,
    pub total_records: u64,
    pub pages_remaining: u32,
    pub is_empty: bool,
}

impl PageResult {
    /// Result for a page the registry answered with no content
    pub fn empty(page_number: u32) -> Self {
        Self {
            page_number,
            is_empty: true,
            ..Default::default()
        }
    }
}
