//! Envelope rules for X12 and EDIFACT
//!
//! Both dialects nest transactions inside optional functional groups inside
//! interchanges. Each level opens with a header carrying a control number
//! and closes with a trailer that echoes it together with a count:
//!
//! | level       | X12       | EDIFACT   | trailer count          |
//! |-------------|-----------|-----------|------------------------|
//! | interchange | ISA / IEA | UNB / UNZ | groups (or messages)   |
//! | group       | GS / GE   | UNG / UNE | transactions           |
//! | transaction | ST / SE   | UNH / UNT | segments, both ends    |

use crate::syntax::Dialect;
use crate::{Error, Result};
use chrono::NaiveDateTime;
use edi_ir::{Element, MessageKey, Segment};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Nesting level of an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EnvelopeLevel {
    Interchange,
    Group,
    Transaction,
}

impl fmt::Display for EnvelopeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interchange => f.write_str("interchange"),
            Self::Group => f.write_str("group"),
            Self::Transaction => f.write_str("transaction"),
        }
    }
}

/// What a segment means to the envelope structure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentRole {
    Header(EnvelopeLevel),
    Trailer(EnvelopeLevel),
    Body,
}

/// Classify a segment tag
#[must_use]
pub fn role(tag: &str) -> SegmentRole {
    match tag {
        "ISA" | "UNB" => SegmentRole::Header(EnvelopeLevel::Interchange),
        "GS" | "UNG" => SegmentRole::Header(EnvelopeLevel::Group),
        "ST" | "UNH" => SegmentRole::Header(EnvelopeLevel::Transaction),
        "IEA" | "UNZ" => SegmentRole::Trailer(EnvelopeLevel::Interchange),
        "GE" | "UNE" => SegmentRole::Trailer(EnvelopeLevel::Group),
        "SE" | "UNT" => SegmentRole::Trailer(EnvelopeLevel::Transaction),
        _ => SegmentRole::Body,
    }
}

/// Dialect implied by an envelope tag
#[must_use]
pub fn dialect_of(tag: &str) -> Option<Dialect> {
    match tag {
        "ISA" | "GS" | "ST" | "IEA" | "GE" | "SE" => Some(Dialect::X12),
        "UNB" | "UNG" | "UNH" | "UNZ" | "UNE" | "UNT" => Some(Dialect::Edifact),
        _ => None,
    }
}

/// Index of the control number element in a header segment
#[must_use]
pub fn control_index(header_tag: &str) -> Option<usize> {
    match header_tag {
        "ISA" => Some(12),
        "GS" => Some(5),
        "ST" => Some(1),
        "UNB" | "UNG" => Some(4),
        "UNH" => Some(0),
        _ => None,
    }
}

/// Trailer tag closing a header tag
#[must_use]
pub fn trailer_tag(header_tag: &str) -> Option<&'static str> {
    match header_tag {
        "ISA" => Some("IEA"),
        "GS" => Some("GE"),
        "ST" => Some("SE"),
        "UNB" => Some("UNZ"),
        "UNG" => Some("UNE"),
        "UNH" => Some("UNT"),
        _ => None,
    }
}

/// Control number carried by a header, or echoed by a trailer
#[must_use]
pub fn control_number(segment: &Segment) -> &str {
    match role(&segment.tag) {
        SegmentRole::Trailer(_) => segment.value(1),
        _ => control_index(&segment.tag).map_or("", |i| segment.value(i)),
    }
}

/// Build the trailer for `header` with the given count
#[must_use]
pub fn trailer_for(header: &Segment, count: usize) -> Option<Segment> {
    let tag = trailer_tag(&header.tag)?;
    Some(Segment::from_values(
        tag,
        [count.to_string(), control_number(header).to_string()],
    ))
}

/// A disagreement between a trailer and what it closes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrailerMismatch {
    pub field: &'static str,
    pub expected: String,
    pub found: String,
}

impl fmt::Display for TrailerMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} mismatch: expected '{}', found '{}'",
            self.field, self.expected, self.found
        )
    }
}

/// Compare a trailer's count and control echo against the actual values
#[must_use]
pub fn check_trailer(header: &Segment, trailer: &Segment, actual_count: usize) -> Vec<TrailerMismatch> {
    let mut mismatches = Vec::new();
    let count = trailer.value(0);
    if count.parse::<usize>().ok() != Some(actual_count) {
        mismatches.push(TrailerMismatch {
            field: "count",
            expected: actual_count.to_string(),
            found: count.to_string(),
        });
    }
    let expected = control_number(header);
    let found = control_number(trailer);
    if expected != found {
        mismatches.push(TrailerMismatch {
            field: "control number",
            expected: expected.to_string(),
            found: found.to_string(),
        });
    }
    mismatches
}

/// Grammar key for a transaction header
///
/// X12 combines ST01 with the first non-empty of ST03, GS08 and ISA12.
/// EDIFACT combines the UNH message type with version and release
/// (`ORDERS:D:96A:UN` gives `ORDERS` / `D96A`).
#[must_use]
pub fn message_key(
    header: &Segment,
    group: Option<&Segment>,
    interchange: Option<&Segment>,
) -> Option<MessageKey> {
    match header.tag.as_str() {
        "ST" => {
            let code = header.value(0);
            if code.is_empty() {
                return None;
            }
            let version = [
                Some(header.value(2)),
                group.filter(|g| g.tag == "GS").map(|g| g.value(7)),
                interchange.filter(|i| i.tag == "ISA").map(|i| i.value(11)),
            ]
            .into_iter()
            .flatten()
            .find(|v| !v.is_empty())
            .unwrap_or_default();
            Some(MessageKey::new(code, version))
        }
        "UNH" => {
            let identifier = header.element(1)?;
            let code = identifier.component(0).unwrap_or_default();
            if code.is_empty() {
                return None;
            }
            let version = format!(
                "{}{}",
                identifier.component(1).unwrap_or_default(),
                identifier.component(2).unwrap_or_default()
            );
            Some(MessageKey::new(code, version))
        }
        _ => None,
    }
}

fn pad(value: &str, width: usize) -> String {
    format!("{value:<width$}")
}

/// X12 interchange header
///
/// ISA11 and ISA16 hold placeholders; the writer fills them from its
/// active separators. An empty `control` is assigned by the writer.
#[must_use]
pub fn isa_header(sender: &str, receiver: &str, control: &str, at: NaiveDateTime) -> Segment {
    Segment::from_values(
        "ISA",
        [
            "00".to_string(),
            pad("", 10),
            "00".to_string(),
            pad("", 10),
            "ZZ".to_string(),
            pad(sender, 15),
            "ZZ".to_string(),
            pad(receiver, 15),
            at.format("%y%m%d").to_string(),
            at.format("%H%M").to_string(),
            "U".to_string(),
            "00401".to_string(),
            control.to_string(),
            "0".to_string(),
            "P".to_string(),
            ":".to_string(),
        ],
    )
}

/// X12 functional group header
#[must_use]
pub fn gs_header(
    functional_id: &str,
    sender: &str,
    receiver: &str,
    control: &str,
    version: &str,
    at: NaiveDateTime,
) -> Segment {
    Segment::from_values(
        "GS",
        [
            functional_id.to_string(),
            sender.to_string(),
            receiver.to_string(),
            at.format("%Y%m%d").to_string(),
            at.format("%H%M").to_string(),
            control.to_string(),
            "X".to_string(),
            version.to_string(),
        ],
    )
}

/// X12 transaction set header
#[must_use]
pub fn st_header(code: &str, control: &str) -> Segment {
    Segment::from_values("ST", [code, control])
}

/// EDIFACT interchange header
#[must_use]
pub fn unb_header(sender: &str, receiver: &str, control: &str, at: NaiveDateTime) -> Segment {
    Segment::new("UNB")
        .with_element(Element::composite(["UNOC", "3"]))
        .with_element(sender)
        .with_element(receiver)
        .with_element(Element::composite([
            at.format("%y%m%d").to_string(),
            at.format("%H%M").to_string(),
        ]))
        .with_element(control)
}

/// EDIFACT message header for `key` (version `D96A` splits into `D` / `96A`)
#[must_use]
pub fn unh_header(reference: &str, key: &MessageKey, agency: &str) -> Segment {
    let split = key
        .version
        .char_indices()
        .nth(1)
        .map_or(key.version.len(), |(i, _)| i);
    let (version, release) = key.version.split_at(split);
    Segment::new("UNH")
        .with_element(reference)
        .with_element(Element::composite([
            key.code.as_str(),
            version,
            release,
            agency,
        ]))
}

/// Source of control numbers for headers written without one
pub trait ControlNumberGenerator: Send + Sync {
    /// Generate the next interchange control number
    fn next_interchange(&self) -> Result<String>;
    /// Generate the next group control number
    fn next_group(&self) -> Result<String>;
    /// Generate the next transaction control number
    fn next_transaction(&self) -> Result<String>;
    /// Reset counters
    fn reset(&self) -> Result<()>;

    /// Generate the next number for `level`
    fn next_for(&self, level: EnvelopeLevel) -> Result<String> {
        match level {
            EnvelopeLevel::Interchange => self.next_interchange(),
            EnvelopeLevel::Group => self.next_group(),
            EnvelopeLevel::Transaction => self.next_transaction(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
struct ControlNumberState {
    interchange: u64,
    group: u64,
    transaction: u64,
}

impl ControlNumberState {
    fn bump(&mut self, level: EnvelopeLevel) -> String {
        match level {
            EnvelopeLevel::Interchange => {
                self.interchange += 1;
                format!("{:09}", self.interchange)
            }
            EnvelopeLevel::Group => {
                self.group += 1;
                self.group.to_string()
            }
            EnvelopeLevel::Transaction => {
                self.transaction += 1;
                format!("{:04}", self.transaction)
            }
        }
    }
}

fn lock(state: &Mutex<ControlNumberState>) -> Result<std::sync::MutexGuard<'_, ControlNumberState>> {
    state
        .lock()
        .map_err(|_| Error::ControlNumber("Failed to lock state".to_string()))
}

/// In-memory sequential control numbers, owned by one writer session
#[derive(Debug, Default)]
pub struct MemoryControlNumberGenerator {
    state: Mutex<ControlNumberState>,
}

impl MemoryControlNumberGenerator {
    /// Create a generator starting at 1 on every level
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a generator whose next interchange number is `interchange + 1`
    #[must_use]
    pub fn starting_after(interchange: u64) -> Self {
        Self {
            state: Mutex::new(ControlNumberState {
                interchange,
                ..ControlNumberState::default()
            }),
        }
    }
}

impl ControlNumberGenerator for MemoryControlNumberGenerator {
    fn next_interchange(&self) -> Result<String> {
        Ok(lock(&self.state)?.bump(EnvelopeLevel::Interchange))
    }

    fn next_group(&self) -> Result<String> {
        Ok(lock(&self.state)?.bump(EnvelopeLevel::Group))
    }

    fn next_transaction(&self) -> Result<String> {
        Ok(lock(&self.state)?.bump(EnvelopeLevel::Transaction))
    }

    fn reset(&self) -> Result<()> {
        *lock(&self.state)? = ControlNumberState::default();
        Ok(())
    }
}

/// Control numbers persisted to a JSON file after every assignment
#[derive(Debug)]
pub struct FileBasedControlNumberGenerator {
    path: PathBuf,
    state: Mutex<ControlNumberState>,
}

impl FileBasedControlNumberGenerator {
    /// Open (or start) the sequence stored at `path`
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents).map_err(|e| {
                Error::ControlNumber(format!("Corrupt sequence file {}: {e}", path.display()))
            })?
        } else {
            ControlNumberState::default()
        };
        debug!("Control number sequence at {}: {:?}", path.display(), state);
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Location of the sequence file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn next(&self, level: EnvelopeLevel) -> Result<String> {
        let mut state = lock(&self.state)?;
        let number = state.bump(level);
        self.save(&state)?;
        Ok(number)
    }

    fn save(&self, state: &ControlNumberState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| Error::ControlNumber(e.to_string()))?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

impl ControlNumberGenerator for FileBasedControlNumberGenerator {
    fn next_interchange(&self) -> Result<String> {
        self.next(EnvelopeLevel::Interchange)
    }

    fn next_group(&self) -> Result<String> {
        self.next(EnvelopeLevel::Group)
    }

    fn next_transaction(&self) -> Result<String> {
        self.next(EnvelopeLevel::Transaction)
    }

    fn reset(&self) -> Result<()> {
        let mut state = lock(&self.state)?;
        *state = ControlNumberState::default();
        self.save(&state)
    }
}
