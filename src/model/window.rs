//! Ingestion windows, time bounds and page query parameters

use crate::{IngestError, RecordError, RecordResult};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::fmt;

/// Inclusive range of whole days sent to the registry
///
/// The upstream API only accepts day-level bounds (`YYYYMMDD`), so finer
/// filtering happens in memory through [`TimeBounds`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestionWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl IngestionWindow {
    /// Creates a window, rejecting `start > end`
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, IngestError> {
        if start > end {
            return Err(IngestError::InvalidWindow(format!(
                "{} is after {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// A window covering exactly one day
    pub fn single_day(day: NaiveDate) -> Self {
        Self {
            start: day,
            end: day,
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Start day in the registry's `YYYYMMDD` format
    pub fn api_start(&self) -> String {
        self.start.format("%Y%m%d").to_string()
    }

    /// End day in the registry's `YYYYMMDD` format
    pub fn api_end(&self) -> String {
        self.end.format("%Y%m%d").to_string()
    }

    /// Bounds covering every instant of every day in the window
    pub fn full_bounds(&self) -> TimeBounds {
        TimeBounds {
            start: self.start.and_time(NaiveTime::MIN),
            end: end_of_day(self.end),
        }
    }
}

impl fmt::Display for IngestionWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

fn end_of_day(day: NaiveDate) -> NaiveDateTime {
    day.and_time(NaiveTime::MIN) + chrono::Duration::days(1) - chrono::Duration::nanoseconds(1)
}

/// Where a timestamp falls relative to a [`TimeBounds`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPosition {
    Before,
    Within,
    After,
}

/// Inclusive instant range used to filter entries in memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBounds {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeBounds {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self, IngestError> {
        if start > end {
            return Err(IngestError::InvalidWindow(format!(
                "{} is after {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// The day window that must be requested to see every instant in these bounds
    pub fn covering_window(&self) -> IngestionWindow {
        IngestionWindow {
            start: self.start.date(),
            end: self.end.date(),
        }
    }

    pub fn position(&self, at: NaiveDateTime) -> WindowPosition {
        if at < self.start {
            WindowPosition::Before
        } else if at > self.end {
            WindowPosition::After
        } else {
            WindowPosition::Within
        }
    }
}

/// A window endpoint as typed by a user: a whole day or an exact instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPoint {
    Day(NaiveDate),
    At(NaiveDateTime),
}

impl WindowPoint {
    /// Earliest instant this point denotes
    pub fn as_start(&self) -> NaiveDateTime {
        match self {
            Self::Day(day) => day.and_time(NaiveTime::MIN),
            Self::At(at) => *at,
        }
    }

    /// Latest instant this point denotes
    pub fn as_end(&self) -> NaiveDateTime {
        match self {
            Self::Day(day) => end_of_day(*day),
            Self::At(at) => *at,
        }
    }
}

/// Parses `YYYYMMDD`, `YYYY-MM-DD` or an ISO local datetime
pub fn parse_window_point(value: &str) -> RecordResult<WindowPoint> {
    let value = value.trim();
    if let Ok(day) = NaiveDate::parse_from_str(value, "%Y%m%d") {
        return Ok(WindowPoint::Day(day));
    }
    if let Ok(day) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(WindowPoint::Day(day));
    }
    parse_feed_timestamp(value)
        .map(WindowPoint::At)
        .map_err(|_| RecordError::InvalidDate(value.to_string()))
}

/// Parses the registry's local timestamps (`2025-01-02T10:20:30`, optional fraction)
pub fn parse_feed_timestamp(value: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    value
        .parse::<NaiveDateTime>()
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
}

/// Procurement modality (`codigoModalidadeContratacao`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modality {
    LeilaoEletronico,
    DialogoCompetitivo,
    Concurso,
    ConcorrenciaEletronica,
    ConcorrenciaPresencial,
    PregaoEletronico,
    PregaoPresencial,
    Dispensa,
    Inexigibilidade,
    ManifestacaoDeInteresse,
    PreQualificacao,
    Credenciamento,
    LeilaoPresencial,
}

impl Modality {
    /// Numeric code used by the registry API
    pub fn code(&self) -> u8 {
        match self {
            Self::LeilaoEletronico => 1,
            Self::DialogoCompetitivo => 2,
            Self::Concurso => 3,
            Self::ConcorrenciaEletronica => 4,
            Self::ConcorrenciaPresencial => 5,
            Self::PregaoEletronico => 6,
            Self::PregaoPresencial => 7,
            Self::Dispensa => 8,
            Self::Inexigibilidade => 9,
            Self::ManifestacaoDeInteresse => 10,
            Self::PreQualificacao => 11,
            Self::Credenciamento => 12,
            Self::LeilaoPresencial => 13,
        }
    }

    pub fn from_code(code: i64) -> RecordResult<Self> {
        let modality = match code {
            1 => Self::LeilaoEletronico,
            2 => Self::DialogoCompetitivo,
            3 => Self::Concurso,
            4 => Self::ConcorrenciaEletronica,
            5 => Self::ConcorrenciaPresencial,
            6 => Self::PregaoEletronico,
            7 => Self::PregaoPresencial,
            8 => Self::Dispensa,
            9 => Self::Inexigibilidade,
            10 => Self::ManifestacaoDeInteresse,
            11 => Self::PreQualificacao,
            12 => Self::Credenciamento,
            13 => Self::LeilaoPresencial,
            other => return Err(RecordError::InvalidModality(other)),
        };
        Ok(modality)
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// Page sizes accepted by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    Ten,
    Fifty,
}

impl PageSize {
    pub fn get(&self) -> u32 {
        match self {
            Self::Ten => 10,
            Self::Fifty => 50,
        }
    }
}

impl TryFrom<u32> for PageSize {
    type Error = RecordError;

    fn try_from(value: u32) -> RecordResult<Self> {
        match value {
            10 => Ok(Self::Ten),
            50 => Ok(Self::Fifty),
            other => Err(RecordError::InvalidPageSize(other)),
        }
    }
}

/// One page query against the update feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub window: IngestionWindow,
    pub modality: Modality,
    /// 1-based
    pub page_number: u32,
    pub page_size: PageSize,
}

impl PageRequest {
    /// Request for the first page of a window
    pub fn first(window: IngestionWindow, modality: Modality, page_size: PageSize) -> Self {
        Self {
            window,
            modality,
            page_number: 1,
            page_size,
        }
    }

    /// Same query for another page (clamped to 1)
    pub fn page(&self, page_number: u32) -> Self {
        Self {
            page_number: page_number.max(1),
            ..*self
        }
    }
}
