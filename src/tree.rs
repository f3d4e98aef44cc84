//! Field emission interface.
//!
//! Dissectors do not render anything themselves; they report each decoded
//! field as "at `[offset, offset+length)` the value is V, labeled F, nested
//! under node P" through a [`FieldSink`]. The host application maps these
//! calls onto its own display tree; [`TreeSink`] is a plain recording
//! implementation used by tests and simple hosts.

use crate::variant::Variant;

/// Handle to an emitted node, usable as the parent of later emissions.
pub type NodeId = usize;

/// Parent of all top-level emissions for one message.
pub const ROOT: NodeId = 0;

/// Soft failure classes attached to nodes via [`FieldSink::flag`].
///
/// None of these abort decoding; they mark the affected subtree as
/// unreliable while siblings continue from a resynchronized offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    /// Wire content contradicts the protocol's own invariants.
    ProtocolViolation,
    /// Opcode, PDU type or attribute bit this implementation does not know.
    UnknownTag,
    /// A decode that was resolved heuristically rather than verified.
    AmbiguousEncoding,
    /// Declared content extends past the captured data.
    Truncated,
}

/// Write-only effect interface for decoded fields.
pub trait FieldSink {
    /// Report one field covering `length` bytes at `offset`. The returned
    /// node id may be used as `parent` for nested emissions.
    fn emit(
        &mut self,
        parent: NodeId,
        field: &'static str,
        offset: usize,
        length: usize,
        value: Variant<'_>,
    ) -> NodeId;

    /// Append display text to an already-emitted node.
    fn annotate(&mut self, node: NodeId, text: &str);

    /// Attach a warning to a node.
    fn flag(&mut self, node: NodeId, kind: WarningKind, message: &str);

    /// Append to the one-line message summary. Order of calls is display
    /// order.
    fn append_info(&mut self, text: &str);
}

/// Owned mirror of [`Variant`] for retention past the buffer lifetime.
#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    Bool(bool),
    Bytes(Vec<u8>),
    Str(String),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    None,
}

impl From<Variant<'_>> for Val {
    fn from(v: Variant<'_>) -> Val {
        match v {
            Variant::Bool(x) => Val::Bool(x),
            Variant::Bytes(x) => Val::Bytes(x.to_vec()),
            Variant::Str(x) => Val::Str(x.to_string()),
            Variant::OwnedStr(x) => Val::Str(x),
            Variant::I32(x) => Val::I32(x),
            Variant::I64(x) => Val::I64(x),
            Variant::U8(x) => Val::U8(x),
            Variant::U16(x) => Val::U16(x),
            Variant::U32(x) => Val::U32(x),
            Variant::U64(x) => Val::U64(x),
            Variant::F32(x) => Val::F32(x),
            Variant::F64(x) => Val::F64(x),
            Variant::None => Val::None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmittedField {
    pub node: NodeId,
    pub parent: NodeId,
    pub field: &'static str,
    pub offset: usize,
    pub length: usize,
    pub value: Val,
    pub annotations: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Warning {
    pub node: NodeId,
    pub kind: WarningKind,
    pub message: String,
}

/// A [`FieldSink`] that records everything it is handed.
#[derive(Debug, Default)]
pub struct TreeSink {
    fields: Vec<EmittedField>,
    warnings: Vec<Warning>,
    info: String,
}

impl TreeSink {
    pub fn new() -> TreeSink {
        TreeSink::default()
    }

    pub fn fields(&self) -> &[EmittedField] {
        &self.fields
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn info(&self) -> &str {
        &self.info
    }

    pub fn clear(&mut self) {
        self.fields.clear();
        self.warnings.clear();
        self.info.clear();
    }

    /// First emission with the given field name.
    pub fn field(&self, name: &str) -> Option<&EmittedField> {
        self.fields.iter().find(|f| f.field == name)
    }

    pub fn fields_named(&self, name: &str) -> Vec<&EmittedField> {
        self.fields.iter().filter(|f| f.field == name).collect()
    }

    pub fn has_warning(&self, kind: WarningKind) -> bool {
        self.warnings.iter().any(|w| w.kind == kind)
    }
}

impl FieldSink for TreeSink {
    fn emit(
        &mut self,
        parent: NodeId,
        field: &'static str,
        offset: usize,
        length: usize,
        value: Variant<'_>,
    ) -> NodeId {
        // node 0 is the implicit root, so ids start at 1
        let node = self.fields.len() + 1;
        self.fields.push(EmittedField {
            node,
            parent,
            field,
            offset,
            length,
            value: value.into(),
            annotations: Vec::new(),
        });
        node
    }

    fn annotate(&mut self, node: NodeId, text: &str) {
        if let Some(f) = self.fields.iter_mut().find(|f| f.node == node) {
            f.annotations.push(text.to_string());
        }
    }

    fn flag(&mut self, node: NodeId, kind: WarningKind, message: &str) {
        debug!("warning on node {}: {:?} {}", node, kind, message);
        self.warnings.push(Warning {
            node,
            kind,
            message: message.to_string(),
        });
    }

    fn append_info(&mut self, text: &str) {
        self.info.push_str(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_records_nesting_and_annotations() {
        let mut sink = TreeSink::new();
        let outer = sink.emit(ROOT, "proto.header", 0, 8, Variant::None);
        let inner = sink.emit(outer, "proto.header.len", 0, 4, Variant::U32(8));
        sink.annotate(inner, "(total)");
        sink.flag(outer, WarningKind::Truncated, "short capture");
        sink.append_info("HDR ");
        sink.append_info("len=8");

        assert_eq!(sink.fields().len(), 2);
        let f = sink.field("proto.header.len").unwrap();
        assert_eq!(f.parent, outer);
        assert_eq!(f.value, Val::U32(8));
        assert_eq!(f.annotations, vec!["(total)".to_string()]);
        assert!(sink.has_warning(WarningKind::Truncated));
        assert_eq!(sink.info(), "HDR len=8");
    }
}
