//! Data model for the ingestion engine
//!
//! # Components
//!
//! - `IngestionWindow` / `TimeBounds`: the day-granular window sent to the
//!   registry and the finer in-memory filter applied to entries
//! - `Modality`, `PageSize`, `PageRequest`: the parameters of a page query
//! - `ControlNumber`, `RawEntry`, `RawItem`, `ProcurementRecord`: typed
//!   envelopes around the registry's opaque JSON payloads
//! - `PageResult`: one page of the update feed

mod record;
mod window;

pub use record::{
    ControlNumber, PageResult, ProcurementRecord, RawEntry, RawItem, CONTROL_NUMBER_FIELD,
    ITEM_NUMBER_FIELD, UPDATED_AT_FIELD,
};
pub use window::{
    parse_feed_timestamp, parse_window_point, IngestionWindow, Modality, PageRequest, PageSize,
    TimeBounds, WindowPoint, WindowPosition,
};
