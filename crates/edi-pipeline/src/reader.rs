//! Pull-style interchange reader
//!
//! The reader ties the tokenizer, the schema registry and the graph mapper
//! together. Segments are pulled from the input one at a time and turned
//! into [`ReadItem`]s in document order: envelope segments as they are
//! seen, each transaction once its trailer arrives, and problems that are
//! not attached to a transaction as [`InvalidItem`]s.
//!
//! Only input failures end a read; everything else is reported as an item
//! and reading continues with the next segment.

use crate::{Error, Result};
use edi_codec::envelopes::{self, EnvelopeLevel, SegmentRole};
use edi_codec::{AsyncTokenizer, SeparatorSet, TokenizeError, Tokenizer, TokenizerConfig};
use edi_ir::{ErrorContext, ErrorKind, ErrorRecord, Level, MessageKey, Segment, Transaction};
use edi_mapping::{GraphMapper, MapperConfig};
use edi_schema::{MessageSchema, SchemaRegistry};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::Read;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{debug, trace, warn};

/// Reader settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub tokenizer: TokenizerConfig,
    pub mapper: MapperConfig,

    /// Check group and interchange trailers against what was read
    pub check_envelopes: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            tokenizer: TokenizerConfig::default(),
            mapper: MapperConfig::default(),
            check_envelopes: true,
        }
    }
}

/// A transaction with the problems found while mapping it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTransaction {
    pub transaction: Transaction,
    pub errors: ErrorContext,
}

impl ParsedTransaction {
    #[must_use]
    pub fn key(&self) -> Option<&MessageKey> {
        self.transaction.key.as_ref()
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        !self.errors.has_errors()
    }
}

/// Input that could not become a transaction or envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidItem {
    /// What went wrong
    pub kind: ErrorKind,

    /// Details, rooted at the level the problem concerns
    pub errors: ErrorContext,

    /// The segments involved, when any were read
    pub segments: Vec<Segment>,
}

impl InvalidItem {
    fn new(kind: ErrorKind, mut errors: ErrorContext, segments: Vec<Segment>) -> Self {
        errors.prune();
        Self {
            kind,
            errors,
            segments,
        }
    }
}

/// One unit of reader output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadItem {
    /// An interchange or group header or trailer
    Envelope(Segment),
    /// A complete transaction, mapped against its schema
    Transaction(Box<ParsedTransaction>),
    /// Tokenize errors, unknown schemas, orphan segments, envelope mismatches
    Invalid(InvalidItem),
}

impl ReadItem {
    #[must_use]
    pub fn as_transaction(&self) -> Option<&ParsedTransaction> {
        match self {
            Self::Transaction(parsed) => Some(parsed),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_invalid(&self) -> Option<&InvalidItem> {
        match self {
            Self::Invalid(item) => Some(item),
            _ => None,
        }
    }
}

/// Counts kept while reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub segments: usize,
    pub interchanges: usize,
    pub groups: usize,
    pub transactions: usize,
    pub invalid: usize,
}

struct OpenEnvelope {
    header: Segment,
    /// Groups (interchange) or transactions (group)
    count: usize,
    /// Transactions read directly or inside groups
    transactions: usize,
}

impl OpenEnvelope {
    fn new(header: Segment) -> Self {
        Self {
            header,
            count: 0,
            transactions: 0,
        }
    }
}

struct OpenTransaction {
    header: Segment,
    key: Option<MessageKey>,
    schema: Option<Arc<MessageSchema>>,
    body: Vec<Segment>,
}

/// Envelope tracking and transaction assembly, independent of I/O
struct ReaderCore {
    registry: Arc<SchemaRegistry>,
    mapper: GraphMapper,
    check_envelopes: bool,
    interchange: Option<OpenEnvelope>,
    group: Option<OpenEnvelope>,
    transaction: Option<OpenTransaction>,
    queue: VecDeque<ReadItem>,
    stats: ReaderStats,
}

impl ReaderCore {
    fn new(registry: Arc<SchemaRegistry>, config: &ReaderConfig) -> Self {
        Self {
            registry,
            mapper: GraphMapper::new(config.mapper),
            check_envelopes: config.check_envelopes,
            interchange: None,
            group: None,
            transaction: None,
            queue: VecDeque::new(),
            stats: ReaderStats::default(),
        }
    }

    fn pop(&mut self) -> Option<ReadItem> {
        self.queue.pop_front()
    }

    fn emit(&mut self, item: ReadItem) {
        match &item {
            ReadItem::Invalid(_) => self.stats.invalid += 1,
            ReadItem::Transaction(_) => self.stats.transactions += 1,
            ReadItem::Envelope(_) => {}
        }
        self.queue.push_back(item);
    }

    fn segment(&mut self, segment: Segment) {
        self.stats.segments += 1;
        trace!("Read {}", segment.tag);
        match envelopes::role(&segment.tag) {
            SegmentRole::Header(EnvelopeLevel::Interchange) => self.open_interchange(segment),
            SegmentRole::Header(EnvelopeLevel::Group) => self.open_group(segment),
            SegmentRole::Header(EnvelopeLevel::Transaction) => self.open_transaction(segment),
            SegmentRole::Trailer(EnvelopeLevel::Transaction) => self.close_transaction(segment),
            SegmentRole::Trailer(EnvelopeLevel::Group) => self.close_group(segment),
            SegmentRole::Trailer(EnvelopeLevel::Interchange) => self.close_interchange(segment),
            SegmentRole::Body => match self.transaction.as_mut() {
                Some(open) => open.body.push(segment),
                None => self.orphan(segment, "outside a transaction"),
            },
        }
    }

    fn tokenize_error(&mut self, error: &TokenizeError) {
        let position = error.position();
        let (TokenizeError::Unterminated { partial: segment, .. }
        | TokenizeError::InvalidTag { segment, .. }) = error;
        let tag = segment.tag.clone();
        let segments = vec![segment.clone()];
        warn!("Tokenize error: {}", error);
        let mut errors = ErrorContext::new(Level::Segment, tag.clone());
        errors.add(
            ErrorRecord::new(ErrorKind::StructuralTokenize, error.to_string())
                .with_value(tag)
                .with_expected(format!("a well-formed segment at line {}", position.line)),
        );
        self.emit(ReadItem::Invalid(InvalidItem::new(
            ErrorKind::StructuralTokenize,
            errors,
            segments,
        )));
    }

    fn finish(&mut self) {
        self.abandon_transaction();
        self.abandon_group();
        self.abandon_interchange();
    }

    fn open_interchange(&mut self, header: Segment) {
        self.finish();
        debug!(
            "Interchange {} opened by {}",
            envelopes::control_number(&header),
            header.tag
        );
        self.stats.interchanges += 1;
        self.interchange = Some(OpenEnvelope::new(header.clone()));
        self.emit(ReadItem::Envelope(header));
    }

    fn open_group(&mut self, header: Segment) {
        self.abandon_transaction();
        self.abandon_group();
        match self.interchange.as_mut() {
            Some(interchange) => interchange.count += 1,
            None => warn!("Group {} outside an interchange", envelopes::control_number(&header)),
        }
        debug!("Group {} opened", envelopes::control_number(&header));
        self.stats.groups += 1;
        self.group = Some(OpenEnvelope::new(header.clone()));
        self.emit(ReadItem::Envelope(header));
    }

    fn open_transaction(&mut self, header: Segment) {
        self.abandon_transaction();
        if let Some(group) = self.group.as_mut() {
            group.count += 1;
        }
        if let Some(interchange) = self.interchange.as_mut() {
            interchange.transactions += 1;
        }
        let key = envelopes::message_key(
            &header,
            self.group.as_ref().map(|g| &g.header),
            self.interchange.as_ref().map(|i| &i.header),
        );
        let schema = key.as_ref().and_then(|k| self.registry.get(k).ok());
        debug!(
            "Transaction {} ({}) opened",
            envelopes::control_number(&header),
            key.as_ref().map_or_else(|| "no key".to_string(), ToString::to_string)
        );
        self.transaction = Some(OpenTransaction {
            header,
            key,
            schema,
            body: Vec::new(),
        });
    }

    fn close_transaction(&mut self, trailer: Segment) {
        let Some(open) = self.transaction.take() else {
            self.orphan(trailer, "without an open transaction");
            return;
        };
        let Some(schema) = open.schema else {
            let code = open.header.value(0).to_string();
            let description = open
                .key
                .as_ref()
                .map_or_else(|| "no message key".to_string(), ToString::to_string);
            let mut errors = ErrorContext::transaction(code);
            let mut record = ErrorRecord::new(
                ErrorKind::UnknownSchema,
                format!("No schema registered for {description}"),
            );
            if let Some(key) = &open.key {
                record = record.with_value(key.to_string());
            }
            errors.add(record);
            let mut segments = Vec::with_capacity(open.body.len() + 2);
            segments.push(open.header);
            segments.extend(open.body);
            segments.push(trailer);
            self.emit(ReadItem::Invalid(InvalidItem::new(
                ErrorKind::UnknownSchema,
                errors,
                segments,
            )));
            return;
        };

        let mapped = self
            .mapper
            .map_transaction(&schema, open.header, open.body, Some(trailer));
        self.emit(ReadItem::Transaction(Box::new(ParsedTransaction {
            transaction: mapped.transaction,
            errors: mapped.errors,
        })));
    }

    fn close_group(&mut self, trailer: Segment) {
        self.abandon_transaction();
        let Some(group) = self.group.take() else {
            self.orphan(trailer, "without an open group");
            return;
        };
        self.emit(ReadItem::Envelope(trailer.clone()));
        self.check_envelope(Level::Group, &group.header, &trailer, group.count);
    }

    fn close_interchange(&mut self, trailer: Segment) {
        self.abandon_transaction();
        self.abandon_group();
        let Some(interchange) = self.interchange.take() else {
            self.orphan(trailer, "without an open interchange");
            return;
        };
        let count = if interchange.count > 0 {
            interchange.count
        } else {
            interchange.transactions
        };
        self.emit(ReadItem::Envelope(trailer.clone()));
        self.check_envelope(Level::Interchange, &interchange.header, &trailer, count);
    }

    fn check_envelope(&mut self, level: Level, header: &Segment, trailer: &Segment, count: usize) {
        if !self.check_envelopes {
            return;
        }
        let mismatches = envelopes::check_trailer(header, trailer, count);
        if mismatches.is_empty() {
            return;
        }
        let mut errors = ErrorContext::new(level, envelopes::control_number(header));
        for mismatch in mismatches {
            warn!("{} {}: {}", trailer.tag, envelopes::control_number(trailer), mismatch);
            errors.add(
                ErrorRecord::new(ErrorKind::TrailerMismatch, format!("{}: {mismatch}", trailer.tag))
                    .with_value(mismatch.found)
                    .with_expected(mismatch.expected),
            );
        }
        self.emit(ReadItem::Invalid(InvalidItem::new(
            ErrorKind::TrailerMismatch,
            errors,
            vec![header.clone(), trailer.clone()],
        )));
    }

    fn orphan(&mut self, segment: Segment, reason: &str) {
        let mut errors = ErrorContext::new(Level::Segment, segment.tag.clone());
        errors.add(
            ErrorRecord::new(ErrorKind::UnexpectedSegment, format!("{} {reason}", segment.tag))
                .with_value(segment.tag.clone()),
        );
        self.emit(ReadItem::Invalid(InvalidItem::new(
            ErrorKind::UnexpectedSegment,
            errors,
            vec![segment],
        )));
    }

    fn abandon_transaction(&mut self) {
        let Some(open) = self.transaction.take() else {
            return;
        };
        let control = envelopes::control_number(&open.header).to_string();
        warn!("Transaction {} is not terminated", control);
        let mut errors = ErrorContext::transaction(open.header.value(0));
        errors.add(
            ErrorRecord::new(
                ErrorKind::TrailerMismatch,
                format!("Transaction {control} ends without a trailer"),
            )
            .with_expected(envelopes::trailer_tag(&open.header.tag).unwrap_or_default()),
        );
        let mut segments = vec![open.header];
        segments.extend(open.body);
        self.emit(ReadItem::Invalid(InvalidItem::new(
            ErrorKind::TrailerMismatch,
            errors,
            segments,
        )));
    }

    fn abandon_group(&mut self) {
        if let Some(group) = self.group.take() {
            self.abandon(Level::Group, group.header);
        }
    }

    fn abandon_interchange(&mut self) {
        if let Some(interchange) = self.interchange.take() {
            self.abandon(Level::Interchange, interchange.header);
        }
    }

    fn abandon(&mut self, level: Level, header: Segment) {
        let control = envelopes::control_number(&header).to_string();
        warn!("{} {} is not terminated", header.tag, control);
        let mut errors = ErrorContext::new(level, control.clone());
        errors.add(
            ErrorRecord::new(
                ErrorKind::TrailerMismatch,
                format!("{} {control} ends without a trailer", header.tag),
            )
            .with_expected(envelopes::trailer_tag(&header.tag).unwrap_or_default()),
        );
        self.emit(ReadItem::Invalid(InvalidItem::new(
            ErrorKind::TrailerMismatch,
            errors,
            vec![header],
        )));
    }
}

fn route(core: &mut ReaderCore, item: Option<edi_codec::Result<Segment>>) -> Option<Error> {
    match item {
        Some(Ok(segment)) => core.segment(segment),
        Some(Err(edi_codec::Error::Tokenize(error))) => core.tokenize_error(&error),
        Some(Err(error)) => return Some(error.into()),
        None => core.finish(),
    }
    None
}

/// Blocking reader over any [`Read`]
pub struct EdiReader<R> {
    tokenizer: Tokenizer<R>,
    core: ReaderCore,
    done: bool,
}

impl<R: Read> EdiReader<R> {
    /// Reader with default configuration
    pub fn new(reader: R, registry: Arc<SchemaRegistry>) -> Self {
        let config = ReaderConfig::default();
        Self {
            tokenizer: Tokenizer::new(reader),
            core: ReaderCore::new(registry, &config),
            done: false,
        }
    }

    /// Reader with an explicit configuration
    pub fn with_config(reader: R, registry: Arc<SchemaRegistry>, config: &ReaderConfig) -> Result<Self> {
        Ok(Self {
            tokenizer: Tokenizer::with_config(reader, config.tokenizer)?,
            core: ReaderCore::new(registry, config),
            done: false,
        })
    }

    /// Separators currently in effect
    pub fn separators(&self) -> SeparatorSet {
        self.tokenizer.separators()
    }

    pub fn stats(&self) -> ReaderStats {
        self.core.stats
    }
}

impl<R: Read> Iterator for EdiReader<R> {
    type Item = Result<ReadItem>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.core.pop() {
                return Some(Ok(item));
            }
            if self.done {
                return None;
            }
            let next = self.tokenizer.next();
            self.done = next.is_none();
            if let Some(error) = route(&mut self.core, next) {
                self.done = true;
                return Some(Err(error));
            }
        }
    }
}

/// Async reader over any [`AsyncRead`]
pub struct AsyncEdiReader<R> {
    tokenizer: AsyncTokenizer<R>,
    core: ReaderCore,
    done: bool,
}

impl<R: AsyncRead + Unpin> AsyncEdiReader<R> {
    /// Reader with default configuration
    pub fn new(reader: R, registry: Arc<SchemaRegistry>) -> Self {
        let config = ReaderConfig::default();
        Self {
            tokenizer: AsyncTokenizer::new(reader),
            core: ReaderCore::new(registry, &config),
            done: false,
        }
    }

    /// Reader with an explicit configuration
    pub fn with_config(reader: R, registry: Arc<SchemaRegistry>, config: &ReaderConfig) -> Result<Self> {
        Ok(Self {
            tokenizer: AsyncTokenizer::with_config(reader, config.tokenizer)?,
            core: ReaderCore::new(registry, config),
            done: false,
        })
    }

    pub fn separators(&self) -> SeparatorSet {
        self.tokenizer.separators()
    }

    pub fn stats(&self) -> ReaderStats {
        self.core.stats
    }

    /// Pull the next item; `None` once the input is exhausted
    pub async fn next_item(&mut self) -> Option<Result<ReadItem>> {
        loop {
            if let Some(item) = self.core.pop() {
                return Some(Ok(item));
            }
            if self.done {
                return None;
            }
            let next = self.tokenizer.next_segment().await;
            self.done = next.is_none();
            if let Some(error) = route(&mut self.core, next) {
                self.done = true;
                return Some(Err(error));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edi_schema::SchemaNode;

    const ISA: &str = "ISA*00*          *00*          *ZZ*SENDER         *ZZ*RECEIVER       *200101*1200*^*00401*000000001*0*P*:~";

    fn registry() -> Arc<SchemaRegistry> {
        let schema = MessageSchema::new(
            MessageKey::new("850", "004010"),
            "Purchase Order",
            vec![
                SchemaNode::segment("BEG", 1, 1).into(),
                SchemaNode::looped("N1", 0, 10, vec![SchemaNode::segment("N1", 1, 1).into()]),
            ],
        )
        .unwrap();
        Arc::new(SchemaRegistry::from_schemas([schema]))
    }

    fn read_all(input: &str) -> Vec<ReadItem> {
        EdiReader::new(input.as_bytes(), registry())
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    fn describe(items: &[ReadItem]) -> Vec<String> {
        items
            .iter()
            .map(|item| match item {
                ReadItem::Envelope(s) => s.tag.clone(),
                ReadItem::Transaction(p) => format!("tx:{}", p.transaction.control_number()),
                ReadItem::Invalid(i) => format!("invalid:{:?}", i.kind),
            })
            .collect()
    }

    #[test]
    fn test_items_in_document_order() {
        let input = format!(
            "{ISA}GS*PO*S*R*20200101*1200*1*X*004010~ST*850*0001~BEG*00*SA~N1*ST*A~SE*4*0001~GE*1*1~IEA*1*000000001~"
        );
        let items = read_all(&input);
        assert_eq!(describe(&items), ["ISA", "GS", "tx:0001", "GE", "IEA"]);

        let parsed = items[2].as_transaction().unwrap();
        assert!(parsed.is_clean());
        assert_eq!(parsed.key(), Some(&MessageKey::new("850", "004010")));
        assert_eq!(parsed.transaction.body.len(), 2);
    }

    #[test]
    fn test_unknown_schema_is_invalid_item() {
        let input = format!("{ISA}ST*810*0001~BIG*20200101~SE*3*0001~IEA*1*000000001~");
        let items = read_all(&input);
        assert_eq!(describe(&items), ["ISA", "invalid:UnknownSchema", "IEA"]);
        let invalid = items[1].as_invalid().unwrap();
        assert_eq!(invalid.segments.len(), 3);
        assert_eq!(invalid.errors.errors[0].value.as_deref(), Some("810:00401"));
    }

    #[test]
    fn test_envelope_count_mismatch() {
        let input = format!(
            "{ISA}GS*PO*S*R*20200101*1200*7*X*004010~ST*850*0001~BEG*00~SE*3*0001~GE*2*8~IEA*1*000000001~"
        );
        let items = read_all(&input);
        assert_eq!(
            describe(&items),
            ["ISA", "GS", "tx:0001", "GE", "invalid:TrailerMismatch", "IEA"]
        );
        let invalid = items[4].as_invalid().unwrap();
        assert_eq!(invalid.errors.level, Level::Group);
        assert_eq!(invalid.errors.errors.len(), 2);
    }

    #[test]
    fn test_orphans_and_unterminated_levels() {
        let input = format!("BEG*00~{ISA}ST*850*0001~BEG*00~");
        let items = read_all(&input);
        assert_eq!(
            describe(&items),
            [
                "invalid:UnexpectedSegment",
                "ISA",
                "invalid:TrailerMismatch",
                "invalid:TrailerMismatch"
            ]
        );
        let abandoned = items[2].as_invalid().unwrap();
        assert_eq!(abandoned.errors.level, Level::Transaction);
        assert_eq!(abandoned.segments.len(), 2);
    }

    #[test]
    fn test_tokenize_errors_do_not_stop_reading() {
        let input = format!("{ISA}ST*850*0001~BEG*00~bad*1~SE*3*0001~IEA*1*000000001~N1*ST");
        let items = read_all(&input);
        assert_eq!(
            describe(&items),
            [
                "ISA",
                "invalid:StructuralTokenize",
                "tx:0001",
                "IEA",
                "invalid:StructuralTokenize"
            ]
        );
        let bad_tag = items[1].as_invalid().unwrap();
        assert_eq!(bad_tag.segments.len(), 1);
        assert_eq!(bad_tag.segments[0].tag, "bad");
        assert_eq!(bad_tag.segments[0].value(0), "1");

        let unterminated = items[4].as_invalid().unwrap();
        assert_eq!(unterminated.segments[0].tag, "N1");
    }

    #[test]
    fn test_stats() {
        let input = format!("{ISA}ST*850*0001~BEG*00~SE*3*0001~ST*850*0002~BEG*00~SE*3*0002~IEA*2*000000001~");
        let mut reader = EdiReader::new(input.as_bytes(), registry());
        let count = reader.by_ref().filter(|item| matches!(item, Ok(ReadItem::Transaction(_)))).count();
        assert_eq!(count, 2);
        let stats = reader.stats();
        assert_eq!(stats.transactions, 2);
        assert_eq!(stats.interchanges, 1);
        assert_eq!(stats.invalid, 0);
        assert_eq!(stats.segments, 8);
    }
}
