//! Streaming segment tokenizer
//!
//! [`SegmentScanner`] is a push-style byte scanner: bytes are fed in
//! arbitrary chunks and complete segments are pulled out as soon as their
//! terminator has been seen. [`Tokenizer`] and [`AsyncTokenizer`] drive the
//! same scanner from a blocking or an async reader, so both produce
//! identical segment sequences for identical input.
//!
//! Scanning is forward-only: a malformed segment is reported and skipped up
//! to its terminator, and scanning resumes with the next one.

use crate::syntax::{Dialect, ISA_LENGTH, SeparatorSet, UNA_LENGTH};
use crate::{Error, Result};
use edi_ir::{Element, Position, Segment};
use serde::{Deserialize, Serialize};
use std::io::{self, Read};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace, warn};

const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// A segment that could not be tokenized
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenizeError {
    /// Input ended inside a segment; whatever was read is kept in `partial`
    #[error("Unterminated segment '{}' at {position}", partial.tag)]
    Unterminated { partial: Segment, position: Position },

    /// The segment tag is not 2-3 uppercase alphanumerics starting with a
    /// letter; the split segment is kept in `segment`
    #[error("Invalid segment tag '{}' at {position}", segment.tag)]
    InvalidTag { segment: Segment, position: Position },
}

impl TokenizeError {
    /// Where the offending segment starts
    #[must_use]
    pub fn position(&self) -> Position {
        match self {
            Self::Unterminated { position, .. } | Self::InvalidTag { position, .. } => *position,
        }
    }
}

/// Tokenizer settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    /// Separators used until a header announces others
    pub separators: SeparatorSet,

    /// Pick up separators from `ISA` and `UNA` at each interchange start
    pub detect_separators: bool,

    /// Keep leading and trailing whitespace inside components
    pub preserve_whitespace: bool,

    /// Read buffer size in bytes
    pub chunk_size: usize,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            separators: SeparatorSet::x12(),
            detect_separators: true,
            preserve_whitespace: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl TokenizerConfig {
    /// Configuration with fixed separators and no detection
    #[must_use]
    pub fn fixed(separators: SeparatorSet) -> Self {
        Self {
            separators,
            detect_separators: false,
            ..Self::default()
        }
    }
}

/// Incremental segment scanner
#[derive(Debug)]
pub struct SegmentScanner {
    config: TokenizerConfig,
    separators: SeparatorSet,
    buf: Vec<u8>,
    /// First unconsumed byte in `buf`
    start: usize,
    /// Where the terminator search resumes; never inside an escape pair
    scan_from: usize,
    offset: usize,
    line: usize,
    column: usize,
    una_applied: bool,
}

impl SegmentScanner {
    /// Create a scanner, checking the configured separators
    pub fn new(config: TokenizerConfig) -> Result<Self> {
        config.separators.validate()?;
        Ok(Self::unchecked(config))
    }

    fn unchecked(config: TokenizerConfig) -> Self {
        Self {
            separators: config.separators,
            config,
            buf: Vec::new(),
            start: 0,
            scan_from: 0,
            offset: 0,
            line: 1,
            column: 1,
            una_applied: false,
        }
    }

    /// Separators currently in effect
    #[must_use]
    pub fn separators(&self) -> SeparatorSet {
        self.separators
    }

    /// Append input bytes
    pub fn feed(&mut self, bytes: &[u8]) {
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.scan_from -= self.start;
            self.start = 0;
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Number of fed bytes not yet consumed
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len() - self.start
    }

    /// Pull the next segment
    ///
    /// Returns `None` when no complete segment is buffered. With `eof` set,
    /// `None` means the input is exhausted, and a started but unterminated
    /// segment is reported as [`TokenizeError::Unterminated`].
    pub fn next_segment(&mut self, eof: bool) -> Option<std::result::Result<Segment, TokenizeError>> {
        loop {
            self.skip_whitespace();
            let pending = &self.buf[self.start..];
            if pending.is_empty() {
                return None;
            }
            if pending.len() < 3 && !eof {
                return None;
            }

            if pending.starts_with(b"UNA") {
                if pending.len() < UNA_LENGTH {
                    if !eof {
                        return None;
                    }
                    return Some(Err(self.unterminated()));
                }
                self.apply_una();
                continue;
            }

            if self.config.detect_separators {
                if pending.starts_with(b"ISA") {
                    if pending.len() < ISA_LENGTH && !eof {
                        return None;
                    }
                    self.apply_isa();
                } else if pending.starts_with(b"UNB") && !self.una_applied {
                    self.separators = self.base_for(Dialect::Edifact);
                }
            }

            return match self.find_terminator() {
                Some(end) => Some(self.take_segment(end)),
                None if eof => Some(Err(self.unterminated())),
                None => None,
            };
        }
    }

    fn base_for(&self, dialect: Dialect) -> SeparatorSet {
        if self.config.separators.dialect == dialect {
            self.config.separators
        } else {
            SeparatorSet::for_dialect(dialect)
        }
    }

    fn apply_una(&mut self) {
        let una = &self.buf[self.start..self.start + UNA_LENGTH];
        if self.config.detect_separators {
            match SeparatorSet::from_una(una) {
                Some(set) => {
                    debug!("UNA service string sets separators: {:?}", set);
                    self.separators = set;
                    self.una_applied = true;
                }
                None => warn!(
                    "Ignoring malformed UNA at line {}, column {}",
                    self.line, self.column
                ),
            }
        }
        self.advance(UNA_LENGTH);
    }

    fn apply_isa(&mut self) {
        match SeparatorSet::from_isa(&self.buf[self.start..]) {
            Some(set) => {
                debug!("ISA header sets separators: {:?}", set);
                self.separators = set;
            }
            None => {
                warn!(
                    "ISA header at line {} is not fixed-width; using {} defaults",
                    self.line,
                    Dialect::X12
                );
                if self.separators.dialect != Dialect::X12 {
                    self.separators = self.base_for(Dialect::X12);
                }
            }
        }
    }

    fn skip_whitespace(&mut self) {
        // A whitespace terminator here only closes an empty segment.
        let skip = self.buf[self.start..]
            .iter()
            .take_while(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
            .count();
        if skip > 0 {
            self.advance(skip);
        }
    }

    fn find_terminator(&mut self) -> Option<usize> {
        let mut i = self.scan_from.max(self.start);
        while i < self.buf.len() {
            let b = self.buf[i];
            if Some(b) == self.separators.escape {
                if i + 1 >= self.buf.len() {
                    self.scan_from = i;
                    return None;
                }
                i += 2;
                continue;
            }
            if b == self.separators.segment {
                return Some(i);
            }
            i += 1;
        }
        self.scan_from = i;
        None
    }

    fn position(&self, length: usize) -> Position {
        Position::new(self.line, self.column, self.offset, length)
    }

    fn take_segment(&mut self, end: usize) -> std::result::Result<Segment, TokenizeError> {
        let length = end - self.start + 1;
        let position = self.position(length);
        let segment = self
            .split(&self.buf[self.start..end])
            .with_position(position);
        self.advance(length);

        if !is_valid_tag(&segment.tag) {
            return Err(TokenizeError::InvalidTag { segment, position });
        }
        if segment.tag == "UNB" {
            self.una_applied = false;
        }
        trace!("Segment {} at {}", segment.tag, position);
        Ok(segment)
    }

    fn unterminated(&mut self) -> TokenizeError {
        let length = self.pending();
        let position = self.position(length);
        let partial = self
            .split(&self.buf[self.start..])
            .with_position(position);
        self.advance(length);
        TokenizeError::Unterminated { partial, position }
    }

    fn advance(&mut self, count: usize) {
        for &b in &self.buf[self.start..self.start + count] {
            if b == b'\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.start += count;
        self.offset += count;
        self.scan_from = self.scan_from.max(self.start);
    }

    /// Split a raw segment (terminator excluded) into tag and elements
    fn split(&self, raw: &[u8]) -> Segment {
        let seps = self.separators;
        let tag_end = unescaped_position(raw, seps.element, seps.escape).unwrap_or(raw.len());
        let tag = String::from_utf8_lossy(&raw[..tag_end]).trim().to_string();
        let mut segment = Segment::new(tag);
        if tag_end == raw.len() {
            return segment;
        }
        let body = &raw[tag_end + 1..];

        // ISA fields are fixed-width and carry separator characters as data.
        if segment.tag == "ISA" {
            segment.elements = body
                .split(|&b| b == seps.element)
                .map(|field| Element::simple(String::from_utf8_lossy(field)))
                .collect();
            return segment;
        }

        let mut repetitions: Vec<Vec<String>> = Vec::new();
        let mut components: Vec<String> = Vec::new();
        let mut current: Vec<u8> = Vec::new();
        let mut bytes = body.iter().copied();
        while let Some(b) = bytes.next() {
            if Some(b) == seps.escape {
                if let Some(literal) = bytes.next() {
                    current.push(literal);
                }
            } else if b == seps.component {
                components.push(self.component(&mut current));
            } else if Some(b) == seps.repetition {
                components.push(self.component(&mut current));
                repetitions.push(std::mem::take(&mut components));
            } else if b == seps.element {
                components.push(self.component(&mut current));
                repetitions.push(std::mem::take(&mut components));
                segment.elements.push(Element {
                    repetitions: std::mem::take(&mut repetitions),
                });
            } else {
                current.push(b);
            }
        }
        components.push(self.component(&mut current));
        repetitions.push(components);
        segment.elements.push(Element { repetitions });
        segment
    }

    fn component(&self, bytes: &mut Vec<u8>) -> String {
        let value = String::from_utf8_lossy(bytes);
        let value = if self.config.preserve_whitespace {
            value.into_owned()
        } else {
            value.trim().to_string()
        };
        bytes.clear();
        value
    }
}

fn unescaped_position(raw: &[u8], target: u8, escape: Option<u8>) -> Option<usize> {
    let mut i = 0;
    while i < raw.len() {
        if Some(raw[i]) == escape {
            i += 2;
            continue;
        }
        if raw[i] == target {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Tag rule: 2-3 uppercase ASCII alphanumerics, the first a letter
fn is_valid_tag(tag: &str) -> bool {
    let bytes = tag.as_bytes();
    (2..=3).contains(&bytes.len())
        && bytes[0].is_ascii_uppercase()
        && bytes[1..]
            .iter()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

/// Blocking tokenizer over any [`Read`]
///
/// Yields segments lazily. Tokenize errors are yielded and scanning
/// continues; an I/O error is yielded once and ends the sequence.
pub struct Tokenizer<R> {
    reader: R,
    scanner: SegmentScanner,
    chunk: Vec<u8>,
    eof: bool,
    done: bool,
}

impl<R: Read> Tokenizer<R> {
    /// Tokenizer with default configuration (X12 fallback, detection on)
    pub fn new(reader: R) -> Self {
        Self::from_scanner(reader, SegmentScanner::unchecked(TokenizerConfig::default()))
    }

    /// Tokenizer with an explicit configuration
    pub fn with_config(reader: R, config: TokenizerConfig) -> Result<Self> {
        Ok(Self::from_scanner(reader, SegmentScanner::new(config)?))
    }

    fn from_scanner(reader: R, scanner: SegmentScanner) -> Self {
        let chunk = vec![0; scanner.config.chunk_size.max(1)];
        Self {
            reader,
            scanner,
            chunk,
            eof: false,
            done: false,
        }
    }

    /// Separators currently in effect
    pub fn separators(&self) -> SeparatorSet {
        self.scanner.separators()
    }

    /// Recover the underlying reader
    pub fn into_inner(self) -> R {
        self.reader
    }

    fn fill(&mut self) -> io::Result<()> {
        let n = loop {
            match self.reader.read(&mut self.chunk) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        };
        if n == 0 {
            self.eof = true;
        } else {
            self.scanner.feed(&self.chunk[..n]);
        }
        Ok(())
    }
}

impl<R: Read> Iterator for Tokenizer<R> {
    type Item = Result<Segment>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if let Some(item) = self.scanner.next_segment(self.eof) {
                return Some(item.map_err(Error::from));
            }
            if self.eof {
                self.done = true;
                return None;
            }
            if let Err(e) = self.fill() {
                self.done = true;
                return Some(Err(e.into()));
            }
        }
    }
}

/// Async tokenizer over any [`AsyncRead`]
pub struct AsyncTokenizer<R> {
    reader: R,
    scanner: SegmentScanner,
    chunk: Vec<u8>,
    eof: bool,
    done: bool,
}

impl<R: AsyncRead + Unpin> AsyncTokenizer<R> {
    /// Tokenizer with default configuration (X12 fallback, detection on)
    pub fn new(reader: R) -> Self {
        Self::from_scanner(reader, SegmentScanner::unchecked(TokenizerConfig::default()))
    }

    /// Tokenizer with an explicit configuration
    pub fn with_config(reader: R, config: TokenizerConfig) -> Result<Self> {
        Ok(Self::from_scanner(reader, SegmentScanner::new(config)?))
    }

    fn from_scanner(reader: R, scanner: SegmentScanner) -> Self {
        let chunk = vec![0; scanner.config.chunk_size.max(1)];
        Self {
            reader,
            scanner,
            chunk,
            eof: false,
            done: false,
        }
    }

    /// Separators currently in effect
    pub fn separators(&self) -> SeparatorSet {
        self.scanner.separators()
    }

    /// Pull the next segment; `None` once the input is exhausted
    pub async fn next_segment(&mut self) -> Option<Result<Segment>> {
        if self.done {
            return None;
        }
        loop {
            if let Some(item) = self.scanner.next_segment(self.eof) {
                return Some(item.map_err(Error::from));
            }
            if self.eof {
                self.done = true;
                return None;
            }
            match self.reader.read(&mut self.chunk).await {
                Ok(0) => self.eof = true,
                Ok(n) => self.scanner.feed(&self.chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
    }

    /// Recover the underlying reader
    pub fn into_inner(self) -> R {
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(input: &str) -> Vec<Result<Segment>> {
        Tokenizer::new(input.as_bytes()).collect()
    }

    fn tags(input: &str) -> Vec<String> {
        tokenize(input)
            .into_iter()
            .map(|r| r.unwrap().tag)
            .collect()
    }

    #[test]
    fn test_simple_x12_segments() {
        let segments: Vec<Segment> = tokenize("ST*850*0001~BEG*00*SA*PO-1~SE*3*0001~")
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[1].tag, "BEG");
        assert_eq!(segments[1].value(2), "PO-1");
        assert_eq!(segments[2].value(0), "3");
    }

    #[test]
    fn test_whitespace_between_segments_skipped() {
        assert_eq!(tags("ST*850*1~\r\n  BEG*00~\nSE*3*1~\n"), ["ST", "BEG", "SE"]);
    }

    #[test]
    fn test_components_trimmed_unless_preserved() {
        let seg = tokenize("N1* ST *ACME  CORP ~").remove(0).unwrap();
        assert_eq!(seg.value(0), "ST");
        assert_eq!(seg.value(1), "ACME  CORP");

        let config = TokenizerConfig {
            preserve_whitespace: true,
            ..TokenizerConfig::default()
        };
        let mut tok = Tokenizer::with_config("N1* ST ~".as_bytes(), config).unwrap();
        assert_eq!(tok.next().unwrap().unwrap().value(0), " ST ");
    }

    #[test]
    fn test_composites_and_repetitions() {
        let seg = tokenize("REF*ZZ*A:B^C:D~").remove(0).unwrap();
        let element = seg.element(1).unwrap();
        assert!(element.is_repeated());
        assert_eq!(element.repetitions[0], vec!["A", "B"]);
        assert_eq!(element.repetitions[1], vec!["C", "D"]);
    }

    #[test]
    fn test_empty_elements_kept() {
        let seg = tokenize("N4*CITY**12345~").remove(0).unwrap();
        assert_eq!(seg.elements.len(), 3);
        assert!(seg.elements[1].is_empty());

        let bare = tokenize("SE~").remove(0).unwrap();
        assert!(bare.elements.is_empty());
    }

    #[test]
    fn test_edifact_release_character() {
        let config = TokenizerConfig::fixed(SeparatorSet::edifact());
        let segs: Vec<Segment> = Tokenizer::with_config("FTX+AAA+++IT?'S 50?+ OFF??'".as_bytes(), config)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].value(3), "IT'S 50+ OFF?");
    }

    #[test]
    fn test_una_sets_separators_and_is_not_emitted() {
        let input = "UNA:+.? 'UNB+UNOA:3+S+R+200101:1200+1'UNH+1+ORDERS:D:96A:UN'UNT+2+1'UNZ+1+1'";
        let segments: Vec<Segment> = tokenize(input).into_iter().map(|r| r.unwrap()).collect();
        let tags: Vec<&str> = segments.iter().map(|s| s.tag.as_str()).collect();
        assert_eq!(tags, ["UNB", "UNH", "UNT", "UNZ"]);
        assert_eq!(segments[1].element(1).unwrap().component(2), Some("96A"));
    }

    #[test]
    fn test_unb_without_una_uses_edifact_defaults() {
        assert_eq!(tags("UNB+UNOA:3+S+R+200101:1200+1'UNZ+0+1'"), ["UNB", "UNZ"]);
    }

    #[test]
    fn test_isa_detects_separators_and_keeps_fields() {
        let input = "ISA|00|          |00|          |ZZ|SENDER         |ZZ|RECEIVER       |200101|1200|U|00401|000000001|0|P|>\nGS|PO|S|R|20200101|1200|1|X|004010\nGE|0|1\nIEA|1|000000001\n";
        let segments: Vec<Segment> = tokenize(input).into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(segments.len(), 4);
        let isa = &segments[0];
        assert_eq!(isa.elements.len(), 16);
        assert_eq!(isa.value(1), "          ");
        assert_eq!(isa.value(15), ">");
        assert_eq!(segments[1].value(7), "004010");
    }

    #[test]
    fn test_custom_pipe_terminator() {
        let config = TokenizerConfig {
            separators: SeparatorSet {
                segment: b'|',
                ..SeparatorSet::x12()
            },
            ..TokenizerConfig::default()
        };
        let tok = Tokenizer::with_config("ST*850*1|BEG*00*SA|SE*3*1|".as_bytes(), config).unwrap();
        let tags: Vec<String> = tok.map(|r| r.unwrap().tag).collect();
        assert_eq!(tags, ["ST", "BEG", "SE"]);
    }

    #[test]
    fn test_invalid_tag_is_skipped() {
        let results = tokenize("ST*850*1~beg*00~B@G*1~SE*2*1~");
        assert_eq!(results.len(), 4);
        assert!(matches!(
            results[1],
            Err(Error::Tokenize(TokenizeError::InvalidTag { ref segment, .. }))
                if segment.tag == "beg" && segment.value(0) == "00"
        ));
        assert!(results[2].is_err());
        assert_eq!(results[3].as_ref().unwrap().tag, "SE");
    }

    #[test]
    fn test_unterminated_segment_surfaces_partial() {
        let results = tokenize("ST*850*1~BEG*00*SA");
        assert_eq!(results.len(), 2);
        match &results[1] {
            Err(Error::Tokenize(TokenizeError::Unterminated { partial, position })) => {
                assert_eq!(partial.tag, "BEG");
                assert_eq!(partial.value(1), "SA");
                assert_eq!(position.offset, 9);
            }
            other => panic!("Expected Unterminated, got {other:?}"),
        }
    }

    #[test]
    fn test_positions_track_lines() {
        let segments: Vec<Segment> = tokenize("ST*850*1~\nBEG*00~\nSE*3*1~")
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        let beg = segments[1].position.unwrap();
        assert_eq!(beg.line, 2);
        assert_eq!(beg.column, 1);
        assert_eq!(beg.offset, 10);
        assert_eq!(beg.length, 7);
    }

    #[test]
    fn test_scanner_handles_split_chunks() {
        let input = b"ST*850*1~BEG*00*SA*PO-1~SE*3*1~";
        for split in 1..input.len() {
            let mut scanner = SegmentScanner::new(TokenizerConfig::default()).unwrap();
            let mut out = Vec::new();
            scanner.feed(&input[..split]);
            while let Some(r) = scanner.next_segment(false) {
                out.push(r.unwrap());
            }
            scanner.feed(&input[split..]);
            while let Some(r) = scanner.next_segment(true) {
                out.push(r.unwrap());
            }
            assert_eq!(out.len(), 3, "split at {split}");
            assert_eq!(out[1].value(2), "PO-1");
        }
    }

    #[test]
    fn test_escape_split_across_chunks() {
        let config = TokenizerConfig::fixed(SeparatorSet::edifact());
        let mut scanner = SegmentScanner::new(config).unwrap();
        scanner.feed(b"FTX+A?");
        assert!(scanner.next_segment(false).is_none());
        scanner.feed(b"'B'");
        let seg = scanner.next_segment(false).unwrap().unwrap();
        assert_eq!(seg.value(0), "A'B");
    }

    #[test]
    fn test_io_error_ends_sequence() {
        struct Failing;
        impl Read for Failing {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::other("disk gone"))
            }
        }
        let mut tok = Tokenizer::new(Failing);
        assert!(matches!(tok.next(), Some(Err(Error::Io(_)))));
        assert!(tok.next().is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = TokenizerConfig {
            separators: SeparatorSet {
                element: b'~',
                ..SeparatorSet::x12()
            },
            ..TokenizerConfig::default()
        };
        assert!(matches!(
            Tokenizer::with_config(&b""[..], config),
            Err(Error::InvalidSeparators(_))
        ));
    }

    #[tokio::test]
    async fn test_async_tokenizer_matches_sync() {
        let input = "UNA:+.? 'UNB+UNOA:3+S+R+200101:1200+1'UNH+1+ORDERS:D:96A:UN'BGM+220+PO?+1'UNT+3+1'UNZ+1+1'";
        let sync: Vec<Segment> = tokenize(input).into_iter().map(|r| r.unwrap()).collect();

        let config = TokenizerConfig {
            chunk_size: 7,
            ..TokenizerConfig::default()
        };
        let mut tok = AsyncTokenizer::with_config(input.as_bytes(), config).unwrap();
        let mut async_segments = Vec::new();
        while let Some(item) = tok.next_segment().await {
            async_segments.push(item.unwrap());
        }
        assert_eq!(sync, async_segments);
        assert_eq!(async_segments[2].value(1), "PO+1");
    }
}
