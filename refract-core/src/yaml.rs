//! A span-carrying YAML facade. The event parser drives a small AST that
//! remembers where every node and mapping key sits in the source, which is
//! what position-based queries (hover, go-to-definition) and `$ref`
//! collection need. Values are projected to JSON for hashing and payloads.

use std::fmt::{self, Display};

use refract_pointer::JsonPointer;
use rustc_hash::FxHashMap;
use url::Url;
use yaml_rust2::parser::{Event, MarkedEventReceiver, Parser};
use yaml_rust2::scanner::{Marker, TScalarStyle};

use crate::key::fingerprint_json;

/// A zero-based line/column position.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
}

impl Pos {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }

    fn from_marker(marker: Marker) -> Self {
        // Markers report one-based lines and zero-based columns.
        Self {
            line: marker.line().saturating_sub(1) as u32,
            col: marker.col() as u32,
        }
    }
}

impl Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// A half-open `[start, end)` source region.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Span {
    pub start: Pos,
    pub end: Pos,
}

impl Span {
    pub fn new(start: Pos, end: Pos) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, pos: Pos) -> bool {
        self.start <= pos && pos < self.end
    }
}

/// A scalar value with its YAML core-schema interpretation.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    /// Interprets a plain scalar per the core schema. Quoted and block
    /// scalars are always strings.
    fn from_event(value: String, style: TScalarStyle) -> Self {
        if !matches!(style, TScalarStyle::Plain) {
            return Scalar::Str(value);
        }
        match value.as_str() {
            "" | "~" | "null" | "Null" | "NULL" => Scalar::Null,
            "true" | "True" | "TRUE" => Scalar::Bool(true),
            "false" | "False" | "FALSE" => Scalar::Bool(false),
            _ => {
                if let Ok(i) = value.parse::<i64>() {
                    Scalar::Int(i)
                } else if let Ok(f) = value.parse::<f64>() {
                    Scalar::Float(f)
                } else {
                    Scalar::Str(value)
                }
            }
        }
    }

    /// The scalar as a mapping key. Non-string scalars stringify the way
    /// they were written, which is how JSON object keys see them anyway.
    fn to_key(&self) -> String {
        match self {
            Scalar::Null => "null".to_owned(),
            Scalar::Bool(b) => b.to_string(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Str(s) => s.clone(),
        }
    }
}

/// One `key: value` entry of a mapping.
#[derive(Clone, Debug, PartialEq)]
pub struct MappingEntry {
    pub key: String,
    pub key_span: Span,
    pub value: YamlNode,
}

#[derive(Clone, Debug, PartialEq)]
pub enum YamlValue {
    Scalar(Scalar),
    Sequence(Vec<YamlNode>),
    Mapping(Vec<MappingEntry>),
}

/// A parsed YAML node with its source span.
#[derive(Clone, Debug, PartialEq)]
pub struct YamlNode {
    pub value: YamlValue,
    pub span: Span,
}

impl YamlNode {
    /// Looks up the entry for `key` if this node is a mapping.
    pub fn entry(&self, key: &str) -> Option<&MappingEntry> {
        match &self.value {
            YamlValue::Mapping(entries) => entries.iter().find(|e| e.key == key),
            _ => None,
        }
    }

    /// Returns the string value of the node's `$ref` entry, if it is a
    /// mapping that carries one.
    pub fn ref_entry(&self) -> Option<(&MappingEntry, &str)> {
        let entry = self.entry("$ref")?;
        match &entry.value.value {
            YamlValue::Scalar(Scalar::Str(s)) => Some((entry, s)),
            _ => None,
        }
    }

    /// Projects this node to JSON, preserving mapping order.
    pub fn to_json(&self) -> serde_json::Value {
        match &self.value {
            YamlValue::Scalar(Scalar::Null) => serde_json::Value::Null,
            YamlValue::Scalar(Scalar::Bool(b)) => serde_json::Value::Bool(*b),
            YamlValue::Scalar(Scalar::Int(i)) => serde_json::Value::Number((*i).into()),
            YamlValue::Scalar(Scalar::Float(f)) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            YamlValue::Scalar(Scalar::Str(s)) => serde_json::Value::String(s.clone()),
            YamlValue::Sequence(items) => {
                serde_json::Value::Array(items.iter().map(YamlNode::to_json).collect())
            }
            YamlValue::Mapping(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|e| (e.key.clone(), e.value.to_json()))
                    .collect(),
            ),
        }
    }
}

/// A `$ref` site found by [`YamlDocument::collect_refs`].
#[derive(Clone, Debug)]
pub struct RefSite {
    /// The reference string.
    pub reference: String,
    /// Pointer to the mapping that holds the `$ref` entry.
    pub path: JsonPointer<'static>,
    /// The span of the `$ref` key.
    pub key_span: Span,
    /// The span of the reference string value.
    pub value_span: Span,
}

/// The key (or sequence index) found under a cursor.
#[derive(Clone, Debug)]
pub struct KeyAtPosition {
    pub key: String,
    /// Pointer to the node the key introduces.
    pub path: JsonPointer<'static>,
}

/// A parsed YAML document bound to its URI.
#[derive(Debug)]
pub struct YamlDocument {
    uri: Url,
    root: YamlNode,
}

impl YamlDocument {
    /// Parses the first document of `text`. Scan errors are fatal for the
    /// document; the caller turns them into a tomb.
    pub fn parse(uri: Url, text: &str) -> Result<Self, YamlError> {
        let mut builder = AstBuilder::default();
        let mut parser = Parser::new(text.chars());
        parser.load(&mut builder, false).map_err(|e| YamlError {
            uri: uri.clone(),
            message: e.to_string(),
        })?;
        let root = builder.root.unwrap_or(YamlNode {
            value: YamlValue::Scalar(Scalar::Null),
            span: Span::default(),
        });
        Ok(Self { uri, root })
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn root(&self) -> &YamlNode {
        &self.root
    }

    /// Walks to the node at `pointer`, treating segments as mapping keys
    /// or sequence indices as the structure dictates.
    pub fn node_at(&self, pointer: &JsonPointer<'_>) -> Option<&YamlNode> {
        let mut node = &self.root;
        for segment in pointer.segments() {
            node = match &node.value {
                YamlValue::Mapping(_) => &node.entry(segment.as_str())?.value,
                YamlValue::Sequence(items) => items.get(segment.to_index()?)?,
                YamlValue::Scalar(_) => return None,
            };
        }
        Some(node)
    }

    /// Projects the node at `pointer` to JSON.
    pub fn value_at(&self, pointer: &JsonPointer<'_>) -> Option<serde_json::Value> {
        self.node_at(pointer).map(YamlNode::to_json)
    }

    /// Returns the source span of the node at `pointer`.
    pub fn span_at(&self, pointer: &JsonPointer<'_>) -> Option<Span> {
        self.node_at(pointer).map(|node| node.span)
    }

    /// Returns the span of the key that introduces the node at `pointer`,
    /// falling back to the node's own span for roots and sequence items.
    pub fn key_span_at(&self, pointer: &JsonPointer<'_>) -> Option<Span> {
        let (Some(last), parent) = (pointer.last(), pointer.parent()) else {
            return Some(self.root.span);
        };
        let parent = self.node_at(&parent)?;
        match &parent.value {
            YamlValue::Mapping(_) => Some(parent.entry(last.as_str())?.key_span),
            _ => self.span_at(pointer),
        }
    }

    /// Projects the whole document to JSON.
    pub fn to_json(&self) -> serde_json::Value {
        self.root.to_json()
    }

    /// A stable content hash of the JSON projection. Two documents that
    /// project to the same value (modulo mapping key order) hash equal.
    pub fn content_hash(&self) -> String {
        fingerprint_json(&self.to_json()).to_hex()
    }

    /// Finds the mapping key or sequence-item marker under `pos`. For
    /// sequence items the region before the item's first content (the `-`
    /// marker) answers with the item's index.
    pub fn key_at_position(&self, pos: Pos) -> Option<KeyAtPosition> {
        fn visit(node: &YamlNode, pos: Pos, path: &JsonPointer<'static>) -> Option<KeyAtPosition> {
            match &node.value {
                YamlValue::Mapping(entries) => {
                    for entry in entries {
                        if entry.key_span.contains(pos) {
                            return Some(KeyAtPosition {
                                key: entry.key.clone(),
                                path: path.child(entry.key.clone()),
                            });
                        }
                        if entry.value.span.contains(pos) {
                            return visit(&entry.value, pos, &path.child(entry.key.clone()));
                        }
                    }
                    None
                }
                YamlValue::Sequence(items) => {
                    for (index, item) in items.iter().enumerate() {
                        if pos < item.span.start {
                            // Between the previous item and this one's
                            // content: the `-` marker region.
                            return Some(KeyAtPosition {
                                key: index.to_string(),
                                path: path.child(index),
                            });
                        }
                        if item.span.contains(pos) {
                            return visit(item, pos, &path.child(index));
                        }
                    }
                    None
                }
                YamlValue::Scalar(_) => None,
            }
        }
        if !self.root.span.contains(pos) {
            return None;
        }
        visit(&self.root, pos, &JsonPointer::empty())
    }

    /// Finds the `$ref` carried by the innermost mapping that encloses
    /// `pos`, if any.
    pub fn ref_at_position(&self, pos: Pos) -> Option<RefSite> {
        fn visit(
            node: &YamlNode,
            pos: Pos,
            path: &JsonPointer<'static>,
            best: &mut Option<RefSite>,
        ) {
            match &node.value {
                YamlValue::Mapping(entries) => {
                    if let Some((entry, reference)) = node.ref_entry() {
                        *best = Some(RefSite {
                            reference: reference.to_owned(),
                            path: path.clone(),
                            key_span: entry.key_span,
                            value_span: entry.value.span,
                        });
                    }
                    for entry in entries {
                        if entry.value.span.contains(pos) {
                            visit(&entry.value, pos, &path.child(entry.key.clone()), best);
                        }
                    }
                }
                YamlValue::Sequence(items) => {
                    for (index, item) in items.iter().enumerate() {
                        if item.span.contains(pos) {
                            visit(item, pos, &path.child(index), best);
                        }
                    }
                }
                YamlValue::Scalar(_) => {}
            }
        }
        if !self.root.span.contains(pos) {
            return None;
        }
        let mut best = None;
        visit(&self.root, pos, &JsonPointer::empty(), &mut best);
        best
    }

    /// Collects every mapping that carries a `$ref` string.
    pub fn collect_refs(&self) -> Vec<RefSite> {
        fn visit(node: &YamlNode, path: &JsonPointer<'static>, out: &mut Vec<RefSite>) {
            match &node.value {
                YamlValue::Mapping(entries) => {
                    if let Some((entry, reference)) = node.ref_entry() {
                        out.push(RefSite {
                            reference: reference.to_owned(),
                            path: path.clone(),
                            key_span: entry.key_span,
                            value_span: entry.value.span,
                        });
                    }
                    for entry in entries {
                        visit(&entry.value, &path.child(entry.key.clone()), out);
                    }
                }
                YamlValue::Sequence(items) => {
                    for (index, item) in items.iter().enumerate() {
                        visit(item, &path.child(index), out);
                    }
                }
                YamlValue::Scalar(_) => {}
            }
        }
        let mut out = Vec::new();
        visit(&self.root, &JsonPointer::empty(), &mut out);
        out
    }
}

/// An error from the YAML scanner.
#[derive(Clone, Debug, thiserror::Error)]
#[error("YAML parse error in {uri}: {message}")]
pub struct YamlError {
    pub uri: Url,
    pub message: String,
}

enum Frame {
    Sequence {
        start: Pos,
        anchor: usize,
        items: Vec<YamlNode>,
    },
    Mapping {
        start: Pos,
        anchor: usize,
        entries: Vec<MappingEntry>,
        /// The pending key, once seen; `None` in the string slot marks a
        /// non-scalar key, whose entry is dropped.
        key: Option<(Option<String>, Span)>,
    },
}

#[derive(Default)]
struct AstBuilder {
    stack: Vec<Frame>,
    root: Option<YamlNode>,
    anchors: FxHashMap<usize, YamlNode>,
}

impl AstBuilder {
    fn insert(&mut self, node: YamlNode, anchor: usize) {
        if anchor != 0 {
            self.anchors.insert(anchor, node.clone());
        }
        match self.stack.last_mut() {
            None => {
                // Only the first document of a stream is kept.
                if self.root.is_none() {
                    self.root = Some(node);
                }
            }
            Some(Frame::Sequence { items, .. }) => items.push(node),
            Some(Frame::Mapping { entries, key, .. }) => match key.take() {
                None => {
                    let key_span = node.span;
                    let name = match &node.value {
                        YamlValue::Scalar(scalar) => Some(scalar.to_key()),
                        _ => None,
                    };
                    *key = Some((name, key_span));
                }
                Some((Some(name), key_span)) => entries.push(MappingEntry {
                    key: name,
                    key_span,
                    value: node,
                }),
                // A complex (non-scalar) key: drop the entry.
                Some((None, _)) => {}
            },
        }
    }
}

impl MarkedEventReceiver for AstBuilder {
    fn on_event(&mut self, event: Event, marker: Marker) {
        let pos = Pos::from_marker(marker);
        match event {
            Event::Scalar(value, style, anchor, _tag) => {
                // The end column is estimated from the written width;
                // quoted styles add their delimiters, block styles end at
                // the marker line.
                let width = match style {
                    TScalarStyle::SingleQuoted | TScalarStyle::DoubleQuoted => value.len() + 2,
                    TScalarStyle::Plain => value.len(),
                    _ => 1,
                };
                let node = YamlNode {
                    value: YamlValue::Scalar(Scalar::from_event(value, style)),
                    span: Span::new(pos, Pos::new(pos.line, pos.col + width as u32)),
                };
                self.insert(node, anchor);
            }
            Event::SequenceStart(anchor, _tag) => {
                self.stack.push(Frame::Sequence {
                    start: pos,
                    anchor,
                    items: Vec::new(),
                });
            }
            Event::SequenceEnd => {
                if let Some(Frame::Sequence {
                    start,
                    anchor,
                    items,
                }) = self.stack.pop()
                {
                    let node = YamlNode {
                        value: YamlValue::Sequence(items),
                        span: Span::new(start, pos),
                    };
                    self.insert(node, anchor);
                }
            }
            Event::MappingStart(anchor, _tag) => {
                self.stack.push(Frame::Mapping {
                    start: pos,
                    anchor,
                    entries: Vec::new(),
                    key: None,
                });
            }
            Event::MappingEnd => {
                if let Some(Frame::Mapping {
                    start,
                    anchor,
                    entries,
                    ..
                }) = self.stack.pop()
                {
                    let node = YamlNode {
                        value: YamlValue::Mapping(entries),
                        span: Span::new(start, pos),
                    };
                    self.insert(node, anchor);
                }
            }
            Event::Alias(anchor) => {
                // The alias reuses the anchored node; only the outermost
                // span is re-pointed at the alias site.
                let mut node = self.anchors.get(&anchor).cloned().unwrap_or(YamlNode {
                    value: YamlValue::Scalar(Scalar::Null),
                    span: Span::new(pos, pos),
                });
                node.span = Span::new(pos, Pos::new(pos.line, pos.col + 1));
                self.insert(node, 0);
            }
            Event::StreamStart
            | Event::StreamEnd
            | Event::DocumentStart
            | Event::DocumentEnd
            | Event::Nothing => {}
        }
    }
}
