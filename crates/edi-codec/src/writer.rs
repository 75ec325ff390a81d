//! Envelope-aware segment writer
//!
//! [`WriterSession`] is the state machine shared by the blocking
//! [`EdiWriter`] and the async [`AsyncEdiWriter`]: it tracks which
//! interchange, group and transaction are open, assigns missing control
//! numbers, and renders segments (and, in auto mode, trailers) to bytes.
//!
//! ```text
//! NoInterchange --ISA/UNB--> InInterchange --GS/UNG--> InGroup
//!                                  |                      |
//!                                  +------ST/UNH----------+--> InTransaction
//! ```
//!
//! With `auto_trailers` on, beginning a sibling closes the open inner levels
//! first, and trailers written by the caller are replaced by computed ones.

use crate::envelopes::{
    self, ControlNumberGenerator, EnvelopeLevel, MemoryControlNumberGenerator, SegmentRole,
};
use crate::syntax::{Dialect, SeparatorSet};
use crate::{Error, Result};
use edi_ir::{Segment, Segments, Transaction};
use serde::{Deserialize, Serialize};
use std::io::Write;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

/// When to emit an EDIFACT `UNA` service string advice before `UNB`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaPolicy {
    /// Only when the separators differ from the EDIFACT defaults
    #[default]
    WhenNonDefault,
    Always,
    Never,
}

/// Writer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Separators used for rendering
    pub separators: SeparatorSet,

    /// Bytes appended after every segment terminator (e.g. `"\n"`)
    pub postfix: String,

    /// Compute trailers and close open levels automatically
    pub auto_trailers: bool,

    /// Write component values untrimmed
    pub preserve_whitespace: bool,

    /// UNA emission policy
    pub una: UnaPolicy,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            separators: SeparatorSet::x12(),
            postfix: String::new(),
            auto_trailers: true,
            preserve_whitespace: false,
            una: UnaPolicy::default(),
        }
    }
}

impl WriterConfig {
    /// Defaults for `dialect`
    #[must_use]
    pub fn for_dialect(dialect: Dialect) -> Self {
        Self {
            separators: SeparatorSet::for_dialect(dialect),
            ..Self::default()
        }
    }
}

#[derive(Debug)]
struct OpenLevel {
    level: EnvelopeLevel,
    header: Segment,
    /// Segments (transaction), transactions (group) or groups (interchange)
    count: usize,
    /// Transactions written anywhere inside an interchange
    transactions: usize,
}

/// Envelope state machine and segment renderer
pub struct WriterSession {
    config: WriterConfig,
    stack: Vec<OpenLevel>,
    control_numbers: Box<dyn ControlNumberGenerator>,
}

impl std::fmt::Debug for WriterSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterSession")
            .field("config", &self.config)
            .field("stack", &self.stack)
            .finish_non_exhaustive()
    }
}

impl WriterSession {
    /// Create a session, checking the configured separators
    pub fn new(config: WriterConfig) -> Result<Self> {
        config.separators.validate()?;
        Ok(Self {
            config,
            stack: Vec::new(),
            control_numbers: Box::new(MemoryControlNumberGenerator::new()),
        })
    }

    /// Use `generator` for headers written without a control number
    #[must_use]
    pub fn with_control_numbers(mut self, generator: Box<dyn ControlNumberGenerator>) -> Self {
        self.control_numbers = generator;
        self
    }

    #[must_use]
    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Replace the separators; takes effect on the next segment
    pub fn set_separators(&mut self, separators: SeparatorSet) -> Result<()> {
        separators.validate()?;
        self.config.separators = separators;
        Ok(())
    }

    /// Replace the postfix; takes effect on the next segment
    pub fn set_postfix(&mut self, postfix: impl Into<String>) {
        self.config.postfix = postfix.into();
    }

    /// Levels currently open, outermost first
    #[must_use]
    pub fn open_levels(&self) -> Vec<EnvelopeLevel> {
        self.stack.iter().map(|o| o.level).collect()
    }

    #[must_use]
    pub fn is_open(&self, level: EnvelopeLevel) -> bool {
        self.stack.iter().any(|o| o.level == level)
    }

    /// Render one segment, dispatching on its envelope role
    pub fn write_segment(&mut self, segment: &Segment, out: &mut Vec<u8>) -> Result<()> {
        match envelopes::role(&segment.tag) {
            SegmentRole::Header(level) => self.open(level, segment, out),
            SegmentRole::Trailer(level) => self.close(level, Some(segment), out),
            SegmentRole::Body => self.body(segment, out),
        }
    }

    /// Render a whole transaction: header, body in graph order, trailer
    ///
    /// In manual mode the transaction's own trailer is written if present;
    /// without one the transaction stays open.
    pub fn write_transaction(&mut self, transaction: &Transaction, out: &mut Vec<u8>) -> Result<()> {
        let header = &transaction.header;
        if envelopes::role(&header.tag) != SegmentRole::Header(EnvelopeLevel::Transaction) {
            return Err(Error::IllegalState(format!(
                "{} is not a transaction header",
                header.tag
            )));
        }
        self.open(EnvelopeLevel::Transaction, header, out)?;
        for segment in Segments::body(&transaction.body) {
            self.body(segment, out)?;
        }
        if self.config.auto_trailers {
            self.close(EnvelopeLevel::Transaction, None, out)
        } else if let Some(trailer) = &transaction.trailer {
            self.close(EnvelopeLevel::Transaction, Some(trailer), out)
        } else {
            Ok(())
        }
    }

    /// Close every open level, innermost first
    ///
    /// In manual mode the caller owns the trailers, so open levels are left
    /// unterminated.
    pub fn finish(&mut self, out: &mut Vec<u8>) -> Result<()> {
        if self.stack.is_empty() {
            return Ok(());
        }
        if !self.config.auto_trailers {
            warn!(
                "Finishing with {} level(s) left unterminated: {:?}",
                self.stack.len(),
                self.open_levels()
            );
            return Ok(());
        }
        while !self.stack.is_empty() {
            self.close_top(out)?;
        }
        Ok(())
    }

    fn open(&mut self, level: EnvelopeLevel, segment: &Segment, out: &mut Vec<u8>) -> Result<()> {
        if level != EnvelopeLevel::Interchange && !self.is_open(EnvelopeLevel::Interchange) {
            return Err(Error::IllegalState(format!(
                "{} header {} outside an interchange",
                level, segment.tag
            )));
        }
        let to_close = self.stack.iter().filter(|o| o.level >= level).count();
        if to_close > 0 && !self.config.auto_trailers {
            return Err(Error::IllegalState(format!(
                "{} header {} while a {} is open",
                level,
                segment.tag,
                self.stack.last().map_or(level, |o| o.level)
            )));
        }

        let mut header = segment.clone();
        self.prepare_header(level, &mut header)?;
        let mut rendered = Vec::new();
        if header.tag == "UNB" && self.should_write_una() {
            rendered.extend_from_slice(&self.config.separators.to_una());
            rendered.extend_from_slice(self.config.postfix.as_bytes());
        }
        self.render(&header, &mut rendered)?;

        for _ in 0..to_close {
            self.close_top(out)?;
        }
        match level {
            EnvelopeLevel::Interchange => {}
            EnvelopeLevel::Group => {
                if let Some(interchange) = self.stack.first_mut() {
                    interchange.count += 1;
                }
            }
            EnvelopeLevel::Transaction => {
                if let Some(interchange) = self.stack.first_mut() {
                    interchange.transactions += 1;
                }
                if let Some(group) = self.stack.last_mut().filter(|o| o.level == EnvelopeLevel::Group) {
                    group.count += 1;
                }
            }
        }
        debug!("Opening {} {}", level, envelopes::control_number(&header));
        self.stack.push(OpenLevel {
            level,
            header,
            count: usize::from(level == EnvelopeLevel::Transaction),
            transactions: 0,
        });
        out.extend_from_slice(&rendered);
        Ok(())
    }

    fn close(&mut self, level: EnvelopeLevel, trailer: Option<&Segment>, out: &mut Vec<u8>) -> Result<()> {
        let tag = trailer.map_or("trailer", |t| t.tag.as_str());
        let Some(index) = self.stack.iter().rposition(|o| o.level == level) else {
            return Err(Error::IllegalState(format!(
                "{tag} closes a {level} that was never opened"
            )));
        };
        let inner = self.stack.len() - 1 - index;
        if inner > 0 && !self.config.auto_trailers {
            return Err(Error::IllegalState(format!(
                "{tag} closes a {level} while a {} is open",
                self.stack.last().map_or(level, |o| o.level)
            )));
        }
        for _ in 0..inner {
            self.close_top(out)?;
        }

        match trailer {
            Some(segment) if !self.config.auto_trailers => {
                self.render(segment, out)?;
                self.stack.pop();
                Ok(())
            }
            _ => self.close_top(out),
        }
    }

    fn close_top(&mut self, out: &mut Vec<u8>) -> Result<()> {
        let Some(open) = self.stack.pop() else {
            return Ok(());
        };
        let count = match open.level {
            EnvelopeLevel::Transaction => open.count + 1,
            EnvelopeLevel::Group => open.count,
            EnvelopeLevel::Interchange if open.count > 0 => open.count,
            EnvelopeLevel::Interchange => open.transactions,
        };
        let trailer = envelopes::trailer_for(&open.header, count).ok_or_else(|| {
            Error::IllegalState(format!("no trailer defined for {}", open.header.tag))
        })?;
        debug!(
            "Closing {} {} with {} count {}",
            open.level,
            envelopes::control_number(&open.header),
            trailer.tag,
            count
        );
        self.render(&trailer, out)
    }

    fn body(&mut self, segment: &Segment, out: &mut Vec<u8>) -> Result<()> {
        if !matches!(self.stack.last(), Some(o) if o.level == EnvelopeLevel::Transaction) {
            return Err(Error::IllegalState(format!(
                "segment {} outside a transaction",
                segment.tag
            )));
        }
        let mut rendered = Vec::new();
        self.render(segment, &mut rendered)?;
        if let Some(open) = self.stack.last_mut() {
            open.count += 1;
        }
        out.extend_from_slice(&rendered);
        Ok(())
    }

    fn prepare_header(&self, level: EnvelopeLevel, header: &mut Segment) -> Result<()> {
        if let Some(index) = envelopes::control_index(&header.tag) {
            if header.value(index).is_empty() {
                let number = self.control_numbers.next_for(level)?;
                header.set_value(index, number);
            }
        }
        if header.tag == "ISA" {
            let seps = self.config.separators;
            let repetition = seps.repetition.map_or_else(|| "U".to_string(), |r| char::from(r).to_string());
            header.set_value(10, repetition);
            header.set_value(15, char::from(seps.component).to_string());
        }
        Ok(())
    }

    fn should_write_una(&self) -> bool {
        match self.config.una {
            UnaPolicy::Always => true,
            UnaPolicy::Never => false,
            UnaPolicy::WhenNonDefault => {
                SeparatorSet {
                    dialect: Dialect::Edifact,
                    ..self.config.separators
                } != SeparatorSet::edifact()
            }
        }
    }

    fn render(&self, segment: &Segment, out: &mut Vec<u8>) -> Result<()> {
        let seps = self.config.separators;
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(segment.tag.as_bytes());

        if segment.tag == "ISA" {
            // Fixed-width fields, written verbatim.
            for element in &segment.elements {
                let value = element.value();
                if value.bytes().any(|b| b == seps.element || b == seps.segment) {
                    return Err(Error::Serialize(format!(
                        "ISA field '{value}' contains a separator"
                    )));
                }
                buf.push(seps.element);
                buf.extend_from_slice(value.as_bytes());
            }
        } else {
            for element in &segment.elements {
                buf.push(seps.element);
                for (r, repetition) in element.repetitions.iter().enumerate() {
                    if r > 0 {
                        let separator = seps.repetition.ok_or_else(|| {
                            Error::Serialize(format!(
                                "repeated element in {} but no repetition separator",
                                segment.tag
                            ))
                        })?;
                        buf.push(separator);
                    }
                    for (c, component) in repetition.iter().enumerate() {
                        if c > 0 {
                            buf.push(seps.component);
                        }
                        self.escape_into(component, &segment.tag, &mut buf)?;
                    }
                }
            }
        }

        buf.push(seps.segment);
        buf.extend_from_slice(self.config.postfix.as_bytes());
        trace!("Rendered {}", segment.tag);
        out.extend_from_slice(&buf);
        Ok(())
    }

    fn escape_into(&self, value: &str, tag: &str, buf: &mut Vec<u8>) -> Result<()> {
        let seps = self.config.separators;
        let value = if self.config.preserve_whitespace {
            value
        } else {
            value.trim()
        };
        for b in value.bytes() {
            if seps.is_special(b) {
                let escape = seps.escape.ok_or_else(|| {
                    Error::Serialize(format!(
                        "value '{value}' in {tag} contains separator '{}' and no escape character is set",
                        char::from(b)
                    ))
                })?;
                buf.push(escape);
            }
            buf.push(b);
        }
        Ok(())
    }
}

/// Blocking writer over any [`Write`]
///
/// Dropping the writer closes open levels (auto mode) and flushes on a
/// best-effort basis; call [`finish`](Self::finish) (or use
/// [`scoped`](Self::scoped)) to observe errors.
pub struct EdiWriter<W: Write> {
    inner: Option<W>,
    session: WriterSession,
    buf: Vec<u8>,
}

impl<W: Write> EdiWriter<W> {
    /// Writer with default configuration (X12, auto trailers)
    pub fn new(inner: W) -> Self {
        let session = WriterSession {
            config: WriterConfig::default(),
            stack: Vec::new(),
            control_numbers: Box::new(MemoryControlNumberGenerator::new()),
        };
        Self::with_session(inner, session)
    }

    /// Writer with an explicit configuration
    pub fn with_config(inner: W, config: WriterConfig) -> Result<Self> {
        Ok(Self::with_session(inner, WriterSession::new(config)?))
    }

    /// Writer driving an existing session
    pub fn with_session(inner: W, session: WriterSession) -> Self {
        Self {
            inner: Some(inner),
            session,
            buf: Vec::new(),
        }
    }

    /// Run `f` against a fresh writer and finish it even when `f` fails
    ///
    /// Returns `f`'s value with the underlying sink; `f`'s error takes
    /// precedence over a finishing error.
    pub fn scoped<F, T>(inner: W, config: WriterConfig, f: F) -> Result<(T, W)>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let mut writer = Self::with_config(inner, config)?;
        let outcome = f(&mut writer);
        let finished = writer.finish();
        let value = outcome?;
        finished?;
        let inner = writer.take_inner()?;
        Ok((value, inner))
    }

    pub fn session(&self) -> &WriterSession {
        &self.session
    }

    pub fn set_separators(&mut self, separators: SeparatorSet) -> Result<()> {
        self.session.set_separators(separators)
    }

    pub fn set_postfix(&mut self, postfix: impl Into<String>) {
        self.session.set_postfix(postfix);
    }

    pub fn write_segment(&mut self, segment: &Segment) -> Result<()> {
        self.session.write_segment(segment, &mut self.buf)?;
        self.drain()
    }

    pub fn write_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        self.session.write_transaction(transaction, &mut self.buf)?;
        self.drain()
    }

    /// Close open levels (auto mode) and flush
    ///
    /// Whatever was rendered reaches the sink and is flushed even when
    /// closing a level fails.
    pub fn finish(&mut self) -> Result<()> {
        let closed = self.session.finish(&mut self.buf);
        self.drain()?;
        if let Some(inner) = self.inner.as_mut() {
            inner.flush()?;
        }
        closed
    }

    /// Finish and recover the underlying sink
    pub fn into_inner(mut self) -> Result<W> {
        self.finish()?;
        self.take_inner()
    }

    fn take_inner(&mut self) -> Result<W> {
        self.inner
            .take()
            .ok_or_else(|| Error::IllegalState("writer already consumed".to_string()))
    }

    fn drain(&mut self) -> Result<()> {
        if let Some(inner) = self.inner.as_mut() {
            inner.write_all(&self.buf)?;
        }
        self.buf.clear();
        Ok(())
    }
}

impl<W: Write> Drop for EdiWriter<W> {
    fn drop(&mut self) {
        if self.inner.is_some() {
            let _ = self.finish();
        }
    }
}

/// Async writer over any [`AsyncWrite`]
///
/// There is no async drop: call [`finish`](Self::finish) before dropping.
pub struct AsyncEdiWriter<W> {
    inner: W,
    session: WriterSession,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> AsyncEdiWriter<W> {
    /// Writer with an explicit configuration
    pub fn with_config(inner: W, config: WriterConfig) -> Result<Self> {
        Ok(Self::with_session(inner, WriterSession::new(config)?))
    }

    /// Writer driving an existing session
    pub fn with_session(inner: W, session: WriterSession) -> Self {
        Self {
            inner,
            session,
            buf: Vec::new(),
        }
    }

    pub fn session(&self) -> &WriterSession {
        &self.session
    }

    pub fn set_separators(&mut self, separators: SeparatorSet) -> Result<()> {
        self.session.set_separators(separators)
    }

    pub fn set_postfix(&mut self, postfix: impl Into<String>) {
        self.session.set_postfix(postfix);
    }

    pub async fn write_segment(&mut self, segment: &Segment) -> Result<()> {
        self.session.write_segment(segment, &mut self.buf)?;
        self.drain().await
    }

    pub async fn write_transaction(&mut self, transaction: &Transaction) -> Result<()> {
        self.session.write_transaction(transaction, &mut self.buf)?;
        self.drain().await
    }

    /// Close open levels (auto mode) and flush
    pub async fn finish(&mut self) -> Result<()> {
        let closed = self.session.finish(&mut self.buf);
        self.drain().await?;
        self.inner.flush().await?;
        closed
    }

    /// Finish and recover the underlying sink
    pub async fn into_inner(mut self) -> Result<W> {
        self.finish().await?;
        Ok(self.inner)
    }

    async fn drain(&mut self) -> Result<()> {
        self.inner.write_all(&self.buf).await?;
        self.buf.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edi_ir::{Element, TransactionNode};

    fn x12_config() -> WriterConfig {
        WriterConfig {
            postfix: "\n".to_string(),
            ..WriterConfig::default()
        }
    }

    fn isa() -> Segment {
        Segment::from_values(
            "ISA",
            [
                "00", "          ", "00", "          ", "ZZ", "SENDER         ", "ZZ",
                "RECEIVER       ", "200101", "1200", "U", "00401", "000000007", "0", "P", ":",
            ],
        )
    }

    fn gs(control: &str) -> Segment {
        Segment::from_values("GS", ["PO", "S", "R", "20200101", "1200", control, "X", "004010"])
    }

    fn output(writer: EdiWriter<Vec<u8>>) -> String {
        String::from_utf8(writer.into_inner().unwrap()).unwrap()
    }

    #[test]
    fn test_auto_trailers_for_full_interchange() {
        let mut writer = EdiWriter::with_config(Vec::new(), x12_config()).unwrap();
        writer.write_segment(&isa()).unwrap();
        writer.write_segment(&gs("1")).unwrap();
        writer.write_segment(&Segment::from_values("ST", ["850", "0001"])).unwrap();
        writer.write_segment(&Segment::from_values("BEG", ["00", "SA", "PO-1"])).unwrap();

        let text = output(writer);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 7);
        assert!(lines[0].ends_with("*^*00401*000000007*0*P*:~"));
        assert_eq!(lines[4], "SE*3*0001~");
        assert_eq!(lines[5], "GE*1*1~");
        assert_eq!(lines[6], "IEA*1*000000007~");
    }

    #[test]
    fn test_next_transaction_auto_closes_previous() {
        let mut writer = EdiWriter::with_config(Vec::new(), x12_config()).unwrap();
        writer.write_segment(&isa()).unwrap();
        writer.write_segment(&gs("1")).unwrap();
        writer.write_segment(&Segment::from_values("ST", ["850", "0001"])).unwrap();
        writer.write_segment(&Segment::from_values("ST", ["850", "0002"])).unwrap();
        writer.write_segment(&gs("2")).unwrap();

        let text = output(writer);
        assert!(text.contains("ST*850*0001~\nSE*2*0001~\nST*850*0002~\nSE*2*0002~\nGE*2*1~\nGS*"));
        assert!(text.ends_with("GE*0*2~\nIEA*2*000000007~\n"));
    }

    #[test]
    fn test_caller_trailer_recomputed_in_auto_mode() {
        let mut writer = EdiWriter::with_config(Vec::new(), x12_config()).unwrap();
        writer.write_segment(&isa()).unwrap();
        writer.write_segment(&Segment::from_values("ST", ["850", "0001"])).unwrap();
        writer.write_segment(&Segment::from_values("SE", ["99", "XXXX"])).unwrap();
        writer.write_segment(&Segment::from_values("IEA", ["5", "1"])).unwrap();

        let text = output(writer);
        assert!(text.contains("SE*2*0001~"));
        assert!(text.ends_with("IEA*1*000000007~\n"));
    }

    #[test]
    fn test_missing_control_numbers_assigned() {
        let mut writer = EdiWriter::with_config(Vec::new(), WriterConfig::default()).unwrap();
        let mut header = isa();
        header.set_value(12, "");
        writer.write_segment(&header).unwrap();
        writer.write_segment(&Segment::from_values("ST", ["850", ""])).unwrap();
        let text = output(writer);
        assert!(text.contains("*000000001*0*P*"));
        assert!(text.contains("ST*850*0001~SE*2*0001~"));
    }

    #[test]
    fn test_manual_mode_illegal_states() {
        let config = WriterConfig {
            auto_trailers: false,
            ..WriterConfig::default()
        };
        let mut session = WriterSession::new(config).unwrap();
        let mut out = Vec::new();

        let err = session
            .write_segment(&Segment::from_values("SE", ["1", "1"]), &mut out)
            .unwrap_err();
        assert!(matches!(err, Error::IllegalState(_)));

        let err = session
            .write_segment(&Segment::from_values("BEG", ["00"]), &mut out)
            .unwrap_err();
        assert!(matches!(err, Error::IllegalState(_)));

        session.write_segment(&isa(), &mut out).unwrap();
        session
            .write_segment(&Segment::from_values("ST", ["850", "1"]), &mut out)
            .unwrap();
        let err = session
            .write_segment(&Segment::from_values("IEA", ["1", "000000007"]), &mut out)
            .unwrap_err();
        assert!(matches!(err, Error::IllegalState(_)));

        session
            .write_segment(&Segment::from_values("SE", ["7", "1"]), &mut out)
            .unwrap();
        assert!(String::from_utf8(out.clone()).unwrap().ends_with("SE*7*1~"));
        let before = out.len();
        session.finish(&mut out).unwrap();
        assert_eq!(out.len(), before);
        assert_eq!(session.open_levels(), [EnvelopeLevel::Interchange]);
    }

    /// Counts flushes reaching the sink
    #[derive(Default)]
    struct FlushCounter {
        bytes: Vec<u8>,
        flushes: usize,
    }

    impl Write for FlushCounter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.bytes.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    #[test]
    fn test_manual_mode_finish_leaves_levels_open_and_flushes() {
        let config = WriterConfig {
            auto_trailers: false,
            ..WriterConfig::default()
        };
        let ((), sink) = EdiWriter::scoped(FlushCounter::default(), config.clone(), |w| {
            w.write_segment(&isa())?;
            w.write_segment(&Segment::from_values("ST", ["850", "1"]))?;
            w.write_segment(&Segment::from_values("BEG", ["00"]))
        })
        .unwrap();
        assert!(sink.flushes >= 1);
        let text = String::from_utf8(sink.bytes).unwrap();
        assert!(text.ends_with("ST*850*1~BEG*00~"));
        assert!(!text.contains("SE*"));

        let mut dropped = FlushCounter::default();
        {
            let mut writer = EdiWriter::with_config(&mut dropped, config).unwrap();
            writer.write_segment(&isa()).unwrap();
            writer.write_segment(&Segment::from_values("ST", ["850", "1"])).unwrap();
        }
        assert_eq!(dropped.flushes, 1);
        assert!(!String::from_utf8(dropped.bytes).unwrap().contains("IEA"));
    }

    #[test]
    fn test_header_outside_interchange_rejected() {
        let mut session = WriterSession::new(WriterConfig::default()).unwrap();
        let mut out = Vec::new();
        let err = session.write_segment(&gs("1"), &mut out).unwrap_err();
        assert!(matches!(err, Error::IllegalState(_)));
        assert!(out.is_empty());
    }

    #[test]
    fn test_escaping_and_serialize_errors() {
        let mut session = WriterSession::new(WriterConfig::for_dialect(Dialect::Edifact)).unwrap();
        let mut out = Vec::new();
        session
            .write_segment(&Segment::from_values("UNB", ["UNOC", "S", "R", "200101", "1"]), &mut out)
            .unwrap();
        session
            .write_segment(&Segment::from_values("UNH", ["1", "ORDERS"]), &mut out)
            .unwrap();
        session
            .write_segment(&Segment::from_values("FTX", ["IT'S 50+ OFF?"]), &mut out)
            .unwrap();
        assert!(String::from_utf8(out).unwrap().ends_with("FTX+IT?'S 50?+ OFF??'"));

        let mut x12 = WriterSession::new(WriterConfig::default()).unwrap();
        let mut out = Vec::new();
        x12.write_segment(&isa(), &mut out).unwrap();
        x12.write_segment(&Segment::from_values("ST", ["850", "1"]), &mut out)
            .unwrap();
        let before = out.len();
        let err = x12
            .write_segment(&Segment::from_values("MSG", ["A*B"]), &mut out)
            .unwrap_err();
        assert!(matches!(err, Error::Serialize(_)));
        assert_eq!(out.len(), before);
    }

    #[test]
    fn test_una_policy() {
        let custom = SeparatorSet {
            segment: b'!',
            ..SeparatorSet::edifact()
        };
        let config = WriterConfig {
            separators: custom,
            ..WriterConfig::default()
        };
        let mut session = WriterSession::new(config).unwrap();
        let mut out = Vec::new();
        session
            .write_segment(&Segment::from_values("UNB", ["UNOC", "S", "R", "200101", "1"]), &mut out)
            .unwrap();
        assert!(out.starts_with(b"UNA:+.?*!UNB+"));

        let mut plain = WriterSession::new(WriterConfig::for_dialect(Dialect::Edifact)).unwrap();
        let mut out = Vec::new();
        plain
            .write_segment(&Segment::from_values("UNB", ["UNOC", "S", "R", "200101", "1"]), &mut out)
            .unwrap();
        assert!(out.starts_with(b"UNB+"));
    }

    #[test]
    fn test_isa_separator_fields_rewritten() {
        let config = WriterConfig {
            separators: SeparatorSet {
                component: b'>',
                repetition: None,
                ..SeparatorSet::x12()
            },
            ..WriterConfig::default()
        };
        let mut session = WriterSession::new(config).unwrap();
        let mut out = Vec::new();
        session.write_segment(&isa(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.len(), 106);
        assert!(text.ends_with("*U*00401*000000007*0*P*>~"));
    }

    #[test]
    fn test_write_transaction_flattens_loops() {
        let mut tx = Transaction::new(Segment::from_values("ST", ["850", "0001"]));
        tx.push(Segment::from_values("BEG", ["00", "SA"]));
        tx.push(TransactionNode::looped(
            "N1",
            vec![
                Segment::from_values("N1", ["ST", "ACME"]).into(),
                Segment::new("N3").with_element(Element::composite(["A", "B"])).into(),
            ],
        ));

        let mut writer = EdiWriter::with_config(Vec::new(), WriterConfig::default()).unwrap();
        writer.write_segment(&isa()).unwrap();
        writer.write_transaction(&tx).unwrap();
        let text = output(writer);
        assert!(text.contains("ST*850*0001~BEG*00*SA~N1*ST*ACME~N3*A:B~SE*5*0001~IEA*1*000000007~"));
    }

    #[test]
    fn test_set_postfix_and_separators_apply_to_next_segment() {
        let mut writer = EdiWriter::with_config(Vec::new(), WriterConfig::default()).unwrap();
        writer.write_segment(&isa()).unwrap();
        writer.set_postfix("\r\n");
        writer.write_segment(&Segment::from_values("ST", ["850", "1"])).unwrap();
        writer
            .set_separators(SeparatorSet {
                element: b'|',
                ..SeparatorSet::x12()
            })
            .unwrap();
        writer.write_segment(&Segment::from_values("BEG", ["00"])).unwrap();
        let text = output(writer);
        assert!(text.contains("~ST*850*1~\r\nBEG|00~\r\n"));
    }

    #[test]
    fn test_drop_closes_open_levels() {
        let mut sink = Vec::new();
        {
            let mut writer = EdiWriter::with_config(&mut sink, WriterConfig::default()).unwrap();
            writer.write_segment(&isa()).unwrap();
            writer.write_segment(&Segment::from_values("ST", ["850", "1"])).unwrap();
        }
        let text = String::from_utf8(sink).unwrap();
        assert!(text.ends_with("SE*2*1~IEA*1*000000007~"));
    }

    #[test]
    fn test_scoped_finishes_on_error() {
        let result = EdiWriter::scoped(Vec::new(), WriterConfig::default(), |w| {
            w.write_segment(&isa())?;
            w.write_segment(&Segment::from_values("ST", ["850", "1"]))?;
            Ok(())
        });
        let ((), sink) = result.unwrap();
        assert!(String::from_utf8(sink).unwrap().ends_with("IEA*1*000000007~"));

        let failed: Result<((), Vec<u8>)> = EdiWriter::scoped(Vec::new(), WriterConfig::default(), |w| {
            w.write_segment(&Segment::new("BEG"))
        });
        assert!(matches!(failed, Err(Error::IllegalState(_))));
    }

    #[tokio::test]
    async fn test_async_writer_matches_sync() {
        let mut sync = EdiWriter::with_config(Vec::new(), x12_config()).unwrap();
        sync.write_segment(&isa()).unwrap();
        sync.write_segment(&gs("1")).unwrap();
        sync.write_segment(&Segment::from_values("ST", ["850", "0001"])).unwrap();
        let expected = output(sync);

        let mut writer = AsyncEdiWriter::with_config(Vec::new(), x12_config()).unwrap();
        writer.write_segment(&isa()).await.unwrap();
        writer.write_segment(&gs("1")).await.unwrap();
        writer
            .write_segment(&Segment::from_values("ST", ["850", "0001"]))
            .await
            .unwrap();
        let bytes = writer.into_inner().await.unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), expected);
    }
}
