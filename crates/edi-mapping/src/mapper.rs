//! Schema-driven graph construction
//!
//! The mapper walks a flat run of body segments once, keeping a stack of
//! frames: the message root plus one frame per open loop occurrence. Each
//! frame remembers how far into its schema children it has progressed (the
//! cursor) and how often each position has occurred. A segment is placed at
//! the first position at or after a frame's cursor whose trigger tag matches
//! and which still has room; frames above the matching one are closed.
//!
//! Placement never fails. Segments that exceed a position's maximum are
//! attached there anyway and reported; segments with no position at all are
//! kept as [`TransactionNode::Unmapped`] where they occurred.

use edi_ir::{
    ErrorContext, ErrorKind, ErrorRecord, Level, LoopNode, PathStep, Segment, Transaction,
    TransactionNode,
};
use edi_schema::{MessageSchema, SchemaNode};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Which frame wins when a tag fits at several nesting levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Innermost open loop first; stay in a loop while it accepts the tag
    #[default]
    GreedyLoop,
    /// Outermost frame first; close loops whenever an enclosing level fits
    Enclosing,
}

/// Mapper settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    pub tie_break: TieBreak,
}

/// Body nodes produced for one transaction, with the problems found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedBody {
    pub nodes: Vec<TransactionNode>,
    pub errors: ErrorContext,
}

/// A fully assembled transaction, with the problems found while mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedTransaction {
    pub transaction: Transaction,
    pub errors: ErrorContext,
}

/// Builds transaction graphs from segments and a message schema
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphMapper {
    config: MapperConfig,
}

impl GraphMapper {
    #[must_use]
    pub fn new(config: MapperConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> MapperConfig {
        self.config
    }

    /// Start an incremental mapping of one transaction body
    #[must_use]
    pub fn session<'s>(&self, schema: &'s MessageSchema) -> MappingSession<'s> {
        MappingSession::new(schema, self.config)
    }

    /// Map the body segments of one transaction
    pub fn map_body<I>(&self, schema: &MessageSchema, segments: I) -> MappedBody
    where
        I: IntoIterator<Item = Segment>,
    {
        let mut session = self.session(schema);
        for segment in segments {
            session.push(segment);
        }
        session.finish()
    }

    /// Map a transaction from its envelope segments and body
    pub fn map_transaction<I>(
        &self,
        schema: &MessageSchema,
        header: Segment,
        body: I,
        trailer: Option<Segment>,
    ) -> MappedTransaction
    where
        I: IntoIterator<Item = Segment>,
    {
        let MappedBody { nodes, errors } = self.map_body(schema, body);
        let mut transaction = Transaction::new(header).with_key(schema.key.clone());
        transaction.body = nodes;
        transaction.trailer = trailer;
        debug!(
            "Mapped {} {} with {} error(s)",
            schema.key,
            transaction.control_number(),
            errors.error_count()
        );
        MappedTransaction { transaction, errors }
    }
}

struct Frame<'s> {
    children: &'s [SchemaNode],
    /// Loop id and 1-based occurrence; `None` for the message root
    scope: Option<(&'s str, usize)>,
    cursor: usize,
    counts: Vec<usize>,
    nodes: Vec<TransactionNode>,
}

impl<'s> Frame<'s> {
    fn new(children: &'s [SchemaNode], scope: Option<(&'s str, usize)>) -> Self {
        Self {
            children,
            scope,
            cursor: 0,
            counts: vec![0; children.len()],
            nodes: Vec::new(),
        }
    }

    /// Find a position for `tag`: one with room when `open`, an exhausted
    /// one otherwise
    ///
    /// In a loop that opens with a segment, that segment seen again starts a
    /// new occurrence one level up, so position 0 is never re-matched. A
    /// loop that opens with a nested loop keeps position 0 eligible, and a
    /// repeat of the nested loop stays inside the current occurrence.
    fn find(&self, tag: &str, open: bool) -> Option<usize> {
        let segment_first = matches!(self.children.first(), Some(SchemaNode::Segment(_)));
        let first = if self.scope.is_some() && segment_first {
            self.cursor.max(1)
        } else {
            self.cursor
        };
        (first..self.children.len()).find(|&i| {
            let node = &self.children[i];
            node.trigger() == tag && node.max_occurs().allows_another(self.counts[i]) == open
        })
    }

    fn occurrences_of(&self, tag: &str) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, TransactionNode::Unmapped(s) if s.tag == tag))
            .count()
    }
}

/// Incremental mapping of one transaction body
///
/// Segment ordinals in error records count the transaction header as 1, so
/// the first body segment is segment 2.
pub struct MappingSession<'s> {
    schema: &'s MessageSchema,
    config: MapperConfig,
    frames: Vec<Frame<'s>>,
    errors: ErrorContext,
    ordinal: usize,
}

impl<'s> MappingSession<'s> {
    fn new(schema: &'s MessageSchema, config: MapperConfig) -> Self {
        Self {
            schema,
            config,
            frames: vec![Frame::new(&schema.children, None)],
            errors: ErrorContext::transaction(schema.key.code.clone()),
            ordinal: 1,
        }
    }

    /// Place one segment
    pub fn push(&mut self, segment: Segment) {
        self.ordinal += 1;
        trace!("Mapping {} (segment {})", segment.tag, self.ordinal);

        if let Some((depth, position)) = self.locate(&segment.tag, true) {
            self.close_to(depth);
            self.place(position, segment);
            return;
        }

        if let Some((depth, position)) = self.locate(&segment.tag, false) {
            self.close_to(depth);
            let children = self.top().children;
            let node = &children[position];
            let mut path = self.scope_path(depth);
            path.push(step_for(node, self.top().counts[position] + 1));
            let record = ErrorRecord::new(
                ErrorKind::OccursTooManyTimes,
                format!("{} occurs more than {} time(s)", node.name(), node.max_occurs()),
            )
            .with_value(segment.tag.clone())
            .with_expected(format!("at most {}", node.max_occurs()))
            .at_segment(self.ordinal);
            self.errors.add_at(&path, record);
            self.place(position, segment);
            return;
        }

        let depth = self.frames.len() - 1;
        let occurrence = self.top().occurrences_of(&segment.tag) + 1;
        let mut path = self.scope_path(depth);
        path.push(PathStep::new(Level::Segment, segment.tag.clone(), occurrence));
        let message = if self.schema.knows(&segment.tag) {
            format!("{} is not expected at this point", segment.tag)
        } else {
            format!("{} is not defined for {}", segment.tag, self.schema.key)
        };
        self.errors.add_at(
            &path,
            ErrorRecord::new(ErrorKind::UnexpectedSegment, message)
                .with_value(segment.tag.clone())
                .at_segment(self.ordinal),
        );
        self.top_mut().nodes.push(TransactionNode::Unmapped(segment));
    }

    /// Close every open frame and return the graph
    pub fn finish(mut self) -> MappedBody {
        self.close_to(0);
        let root = self.frames.pop().map(|frame| {
            self.report_missing(&frame, &[]);
            frame.nodes
        });
        MappedBody {
            nodes: root.unwrap_or_default(),
            errors: self.errors,
        }
    }

    fn locate(&self, tag: &str, open: bool) -> Option<(usize, usize)> {
        let lookup = |depth: usize| self.frames[depth].find(tag, open).map(|p| (depth, p));
        match self.config.tie_break {
            TieBreak::GreedyLoop => (0..self.frames.len()).rev().find_map(lookup),
            TieBreak::Enclosing => (0..self.frames.len()).find_map(lookup),
        }
    }

    fn place(&mut self, position: usize, segment: Segment) {
        let frame = self.top_mut();
        frame.counts[position] += 1;
        frame.cursor = position;
        let children = frame.children;
        match &children[position] {
            SchemaNode::Segment(_) => frame.nodes.push(TransactionNode::Segment(segment)),
            SchemaNode::Loop(schema) => {
                let occurrence = frame.counts[position];
                trace!("Entering loop {} occurrence {}", schema.id, occurrence);
                self.frames
                    .push(Frame::new(&schema.children, Some((schema.id.as_str(), occurrence))));
                self.place(0, segment);
            }
        }
    }

    fn close_to(&mut self, depth: usize) {
        while self.frames.len() > depth + 1 {
            let path = self.scope_path(self.frames.len() - 1);
            let Some(frame) = self.frames.pop() else {
                return;
            };
            self.report_missing(&frame, &path);
            let id = frame.scope.map_or("", |(id, _)| id);
            let node = TransactionNode::Loop(LoopNode::new(id, frame.nodes));
            self.top_mut().nodes.push(node);
        }
    }

    fn report_missing(&mut self, frame: &Frame<'_>, path: &[PathStep]) {
        for (node, &count) in frame.children.iter().zip(&frame.counts) {
            if count >= node.min_occurs() {
                continue;
            }
            let what = if node.is_loop() { "Loop" } else { "Segment" };
            let mut at = path.to_vec();
            at.push(step_for(node, count + 1));
            self.errors.add_at(
                &at,
                ErrorRecord::new(
                    ErrorKind::MissingRequiredSegment,
                    format!(
                        "{what} {} occurs {count} time(s), at least {} required",
                        node.name(),
                        node.min_occurs()
                    ),
                )
                .with_expected(format!("at least {}", node.min_occurs())),
            );
        }
    }

    /// Loop steps from the root down to (and including) `depth`
    fn scope_path(&self, depth: usize) -> Vec<PathStep> {
        self.frames[..=depth]
            .iter()
            .filter_map(|f| f.scope)
            .map(|(id, occurrence)| PathStep::new(Level::Loop, id, occurrence))
            .collect()
    }

    fn top(&self) -> &Frame<'s> {
        &self.frames[self.frames.len() - 1]
    }

    fn top_mut(&mut self) -> &mut Frame<'s> {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }
}

fn step_for(node: &SchemaNode, occurrence: usize) -> PathStep {
    let level = if node.is_loop() {
        Level::Loop
    } else {
        Level::Segment
    };
    PathStep::new(level, node.name(), occurrence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use edi_ir::{navigate, MessageKey, NodeKind};
    use edi_schema::MaxOccurs;

    fn purchase_order() -> MessageSchema {
        MessageSchema::new(
            MessageKey::new("850", "004010"),
            "Purchase Order",
            vec![
                SchemaNode::segment("BEG", 1, 1).into(),
                SchemaNode::segment("REF", 0, MaxOccurs::Unbounded).into(),
                SchemaNode::looped(
                    "N1",
                    0,
                    200,
                    vec![
                        SchemaNode::segment("N1", 1, 1).into(),
                        SchemaNode::segment("N3", 0, 2).into(),
                        SchemaNode::segment("N4", 0, 1).into(),
                    ],
                ),
                SchemaNode::looped(
                    "PO1",
                    1,
                    MaxOccurs::Unbounded,
                    vec![
                        SchemaNode::segment("PO1", 1, 1).into(),
                        SchemaNode::looped("PID", 0, 1000, vec![SchemaNode::segment("PID", 1, 1).into()]),
                    ],
                ),
                SchemaNode::segment("CTT", 0, 1).into(),
            ],
        )
        .unwrap()
    }

    fn segments(tags: &[&str]) -> Vec<Segment> {
        tags.iter().map(|t| Segment::new(*t)).collect()
    }

    fn shape(nodes: &[TransactionNode]) -> String {
        nodes
            .iter()
            .map(|n| match n {
                TransactionNode::Segment(s) => s.tag.clone(),
                TransactionNode::Unmapped(s) => format!("?{}", s.tag),
                TransactionNode::Loop(l) => format!("{}({})", l.id, shape(&l.children)),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_nested_loops_are_built() {
        let schema = purchase_order();
        let mapped = GraphMapper::default().map_body(
            &schema,
            segments(&["BEG", "N1", "N3", "N4", "N1", "N3", "PO1", "PID", "PID", "PO1", "CTT"]),
        );
        assert!(!mapped.errors.has_errors(), "{:?}", mapped.errors.flatten());
        assert_eq!(
            shape(&mapped.nodes),
            "BEG N1(N1 N3 N4) N1(N1 N3) PO1(PO1 PID(PID) PID(PID)) PO1(PO1) CTT"
        );
    }

    #[test]
    fn test_loop_opening_with_nested_loop_repeats_inside_occurrence() {
        let schema = MessageSchema::new(
            MessageKey::new("856", "005010"),
            "Ship Notice",
            vec![
                SchemaNode::segment("BSN", 1, 1).into(),
                SchemaNode::looped(
                    "GRP",
                    1,
                    10,
                    vec![
                        SchemaNode::looped(
                            "LIN",
                            1,
                            5,
                            vec![
                                SchemaNode::segment("LIN", 1, 1).into(),
                                SchemaNode::segment("QTY", 0, 1).into(),
                            ],
                        ),
                        SchemaNode::segment("DTM", 0, 1).into(),
                    ],
                ),
            ],
        )
        .unwrap();
        let mapped = GraphMapper::default().map_body(
            &schema,
            segments(&["BSN", "LIN", "QTY", "LIN", "QTY", "DTM"]),
        );
        assert!(!mapped.errors.has_errors(), "{:?}", mapped.errors.flatten());
        assert_eq!(shape(&mapped.nodes), "BSN GRP(LIN(LIN QTY) LIN(LIN QTY) DTM)");
    }

    #[test]
    fn test_missing_required_positions_reported_once_each() {
        let schema = purchase_order();
        let mapped = GraphMapper::default().map_body(&schema, segments(&["REF", "REF"]));
        assert_eq!(mapped.errors.error_count(), 2);
        assert_eq!(mapped.errors.count_kind(ErrorKind::MissingRequiredSegment), 2);
        let paths: Vec<String> = mapped.errors.flatten().into_iter().map(|e| e.path).collect();
        assert_eq!(paths, ["850/BEG[1]", "850/PO1[1]"]);
    }

    #[test]
    fn test_excess_occurrence_attached_and_reported() {
        let schema = purchase_order();
        let mapped = GraphMapper::default().map_body(
            &schema,
            segments(&["BEG", "N1", "N3", "N3", "N3", "PO1"]),
        );
        assert_eq!(shape(&mapped.nodes), "BEG N1(N1 N3 N3 N3) PO1(PO1)");
        let errors = mapped.errors.flatten();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].record.kind, ErrorKind::OccursTooManyTimes);
        assert_eq!(errors[0].path, "850/N1[1]/N3[3]");
        assert_eq!(errors[0].record.segment_position, Some(6));
    }

    #[test]
    fn test_unknown_segment_kept_in_place() {
        let schema = purchase_order();
        let mapped = GraphMapper::default().map_body(
            &schema,
            segments(&["BEG", "N1", "ZZZ", "N3", "PO1"]),
        );
        assert_eq!(shape(&mapped.nodes), "BEG N1(N1 ?ZZZ N3) PO1(PO1)");
        assert_eq!(mapped.errors.count_kind(ErrorKind::UnexpectedSegment), 1);

        let node = navigate(&mapped.nodes, "N1/ZZZ").unwrap();
        assert_eq!(node.kind(), NodeKind::Unmapped);
        assert_eq!(mapped.errors.flatten()[0].path, "850/N1[1]/ZZZ[1]");
    }

    #[test]
    fn test_out_of_order_segment_is_unexpected() {
        let schema = purchase_order();
        let mapped = GraphMapper::default().map_body(&schema, segments(&["BEG", "PO1", "REF"]));
        assert_eq!(shape(&mapped.nodes), "BEG PO1(PO1 ?REF)");
        let errors = mapped.errors.flatten();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].record.message.contains("not expected"));
    }

    #[test]
    fn test_exhausted_loop_starts_extra_occurrence() {
        let schema = MessageSchema::new(
            MessageKey::new("ORDERS", "D96A"),
            "Orders",
            vec![SchemaNode::looped("NAD", 1, 2, vec![SchemaNode::segment("NAD", 1, 1).into()])],
        )
        .unwrap();
        let mapped = GraphMapper::default().map_body(&schema, segments(&["NAD", "NAD", "NAD"]));
        assert_eq!(shape(&mapped.nodes), "NAD(NAD) NAD(NAD) NAD(NAD)");
        assert_eq!(mapped.errors.count_kind(ErrorKind::OccursTooManyTimes), 1);
        assert_eq!(mapped.errors.flatten()[0].path, "ORDERS/NAD[3]");
    }

    #[test]
    fn test_tie_break_modes() {
        let schema = MessageSchema::new(
            MessageKey::new("TST", "1"),
            "Tie",
            vec![
                SchemaNode::looped(
                    "L",
                    0,
                    MaxOccurs::Unbounded,
                    vec![
                        SchemaNode::segment("A", 1, 1).into(),
                        SchemaNode::segment("B", 0, 1).into(),
                    ],
                ),
                SchemaNode::segment("B", 0, 1).into(),
            ],
        )
        .unwrap();

        let greedy = GraphMapper::default().map_body(&schema, segments(&["A", "B"]));
        assert_eq!(shape(&greedy.nodes), "L(A B)");

        let enclosing = GraphMapper::new(MapperConfig {
            tie_break: TieBreak::Enclosing,
        })
        .map_body(&schema, segments(&["A", "B"]));
        assert_eq!(shape(&enclosing.nodes), "L(A) B");
        assert!(!enclosing.errors.has_errors());
    }

    #[test]
    fn test_map_transaction_sets_key_and_envelope() {
        let schema = purchase_order();
        let mapped = GraphMapper::default().map_transaction(
            &schema,
            Segment::from_values("ST", ["850", "0001"]),
            segments(&["BEG", "PO1"]),
            Some(Segment::from_values("SE", ["4", "0001"])),
        );
        assert_eq!(mapped.transaction.key, Some(schema.key.clone()));
        assert_eq!(mapped.transaction.body_segment_count(), 2);
        assert_eq!(mapped.transaction.control_number(), "0001");
        assert!(!mapped.errors.has_errors());
    }

    #[test]
    fn test_config_from_json() {
        let config: MapperConfig = serde_json::from_str(r#"{"tie_break": "enclosing"}"#).unwrap();
        assert_eq!(config.tie_break, TieBreak::Enclosing);
        let config: MapperConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, MapperConfig::default());
    }
}
