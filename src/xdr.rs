//! Cursor-advancing field readers.
//!
//! Every function reads one wire element at `offset`, emits exactly one
//! field (plus a padding marker where the encoding requires fill bytes) and
//! returns the offset advanced past what was consumed. Reads that would run
//! past the captured data fail with `OutOfBounds` before emitting anything.

use crate::buffer::{pad4, ByteOrder, DecodeBuffer, DissectResult};
use crate::tree::{FieldSink, NodeId};
use crate::variant::Variant;

/// Generic marker for alignment fill bytes.
pub const FIELD_PADDING: &str = "padding";

pub fn u32_field(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    field: &'static str,
) -> DissectResult<(usize, u32)> {
    let v = buf.u32_at(offset, ByteOrder::Big)?;
    sink.emit(parent, field, offset, 4, Variant::U32(v));
    Ok((offset + 4, v))
}

/// Signed read for status and error fields where negative means failure.
/// Signedness is the caller's choice, never inferred from the bytes.
pub fn i32_field(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    field: &'static str,
) -> DissectResult<(usize, i32)> {
    let v = buf.i32_at(offset, ByteOrder::Big)?;
    sink.emit(parent, field, offset, 4, Variant::I32(v));
    Ok((offset + 4, v))
}

pub fn u64_field(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    field: &'static str,
) -> DissectResult<(usize, u64)> {
    let v = buf.u64_at(offset, ByteOrder::Big)?;
    sink.emit(parent, field, offset, 8, Variant::U64(v));
    Ok((offset + 8, v))
}

/// XDR booleans are 4-byte words; anything non-zero reads as true.
pub fn bool_field(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    field: &'static str,
) -> DissectResult<(usize, bool)> {
    let v = buf.u32_at(offset, ByteOrder::Big)?;
    sink.emit(parent, field, offset, 4, Variant::Bool(v != 0));
    Ok((offset + 4, v != 0))
}

/// Seconds/nanoseconds timestamp pair, emitted under its own subtree node.
pub fn time_field(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    field: &'static str,
) -> DissectResult<usize> {
    let sec = buf.u32_at(offset, ByteOrder::Big)?;
    let nsec = buf.u32_at(offset + 4, ByteOrder::Big)?;
    let node = sink.emit(parent, field, offset, 8, Variant::None);
    sink.emit(node, "time.seconds", offset, 4, Variant::U32(sec));
    sink.emit(node, "time.nseconds", offset + 4, 4, Variant::U32(nsec));
    Ok(offset + 8)
}

/// Checked bounds for a length-prefixed element: the declared `length` plus
/// its fill bytes must fit in the capture.
fn opaque_span(buf: &DecodeBuffer<'_>, offset: usize) -> DissectResult<(usize, usize)> {
    let length = buf.u32_at(offset, ByteOrder::Big)? as usize;
    // validates data + padding in one go; a declared length running past
    // the capture is malformed input, not a programming error
    buf.window(offset + 4, length + pad4(length))?;
    Ok((length, pad4(length)))
}

/// Length-prefixed opaque data with 4-byte alignment fill.
///
/// Emits the length, the data and (when present) a padding marker, and
/// returns the offset past the fill bytes together with the raw data.
/// `length == 0` is valid and produces an empty blob with zero padding.
pub fn opaque_field<'a>(
    buf: &DecodeBuffer<'a>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    len_field: &'static str,
    data_field: &'static str,
) -> DissectResult<(usize, &'a [u8])> {
    let (length, pad) = opaque_span(buf, offset)?;
    sink.emit(parent, len_field, offset, 4, Variant::U32(length as u32));
    let data = buf.window(offset + 4, length)?;
    sink.emit(parent, data_field, offset + 4, length, Variant::Bytes(data));
    if pad > 0 {
        sink.emit(parent, FIELD_PADDING, offset + 4 + length, pad, Variant::None);
    }
    Ok((offset + 4 + length + pad, data))
}

/// As [`opaque_field`] but emitted as UTF-8 text (lossy for display).
pub fn string_field<'a>(
    buf: &DecodeBuffer<'a>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    len_field: &'static str,
    data_field: &'static str,
) -> DissectResult<(usize, &'a [u8])> {
    let (length, pad) = opaque_span(buf, offset)?;
    sink.emit(parent, len_field, offset, 4, Variant::U32(length as u32));
    let data = buf.window(offset + 4, length)?;
    let text = String::from_utf8_lossy(data);
    sink.emit(
        parent,
        data_field,
        offset + 4,
        length,
        Variant::OwnedStr(text.into_owned()),
    );
    if pad > 0 {
        sink.emit(parent, FIELD_PADDING, offset + 4 + length, pad, Variant::None);
    }
    Ok((offset + 4 + length + pad, data))
}

/// Fixed-width byte run emitted verbatim.
pub fn bytes_field<'a>(
    buf: &DecodeBuffer<'a>,
    offset: usize,
    length: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    field: &'static str,
) -> DissectResult<(usize, &'a [u8])> {
    let data = buf.window(offset, length)?;
    sink.emit(parent, field, offset, length, Variant::Bytes(data));
    Ok((offset + length, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DissectError;
    use crate::tree::{TreeSink, Val, ROOT};
    use hex_literal::hex;

    #[test]
    fn fixed_width_advancement() {
        let data = hex!("0000002a 00000000 00000001 deadbeef cafebabe");
        let buf = DecodeBuffer::new(&data);
        let mut sink = TreeSink::new();
        let (off, v) = u32_field(&buf, 0, ROOT, &mut sink, "t.a").unwrap();
        assert_eq!((off, v), (4, 42));
        let (off, v) = u64_field(&buf, off, ROOT, &mut sink, "t.b").unwrap();
        assert_eq!((off, v), (12, 1));
        let (off, b) = bytes_field(&buf, off, 8, ROOT, &mut sink, "t.c").unwrap();
        assert_eq!(off, 20);
        assert_eq!(b, hex!("deadbeef cafebabe"));
        assert_eq!(sink.fields().len(), 3);
    }

    #[test]
    fn opaque_with_padding() {
        // length 5, data "hello", 3 fill bytes
        let data = hex!("00000005 68656c6c 6f000000");
        let buf = DecodeBuffer::new(&data);
        let mut sink = TreeSink::new();
        let (off, v) = opaque_field(&buf, 0, ROOT, &mut sink, "t.len", "t.data").unwrap();
        assert_eq!(off, 12);
        assert_eq!(v, b"hello");
        let pad = sink.field(FIELD_PADDING).unwrap();
        assert_eq!((pad.offset, pad.length), (9, 3));
    }

    #[test]
    fn opaque_empty() {
        let data = hex!("00000000");
        let buf = DecodeBuffer::new(&data);
        let mut sink = TreeSink::new();
        let (off, v) = opaque_field(&buf, 0, ROOT, &mut sink, "t.len", "t.data").unwrap();
        assert_eq!(off, 4);
        assert!(v.is_empty());
        assert!(sink.field(FIELD_PADDING).is_none());
    }

    #[test]
    fn opaque_declared_past_end() {
        // declares 16 bytes but only 4 captured
        let data = hex!("00000010 61626364");
        let buf = DecodeBuffer::new(&data);
        let mut sink = TreeSink::new();
        let r = opaque_field(&buf, 0, ROOT, &mut sink, "t.len", "t.data");
        assert!(matches!(r, Err(DissectError::OutOfBounds { .. })));
        // nothing half-emitted
        assert!(sink.fields().is_empty());
    }

    #[test]
    fn string_lossy() {
        let data = hex!("00000003 61ff6200");
        let buf = DecodeBuffer::new(&data);
        let mut sink = TreeSink::new();
        let (off, _) = string_field(&buf, 0, ROOT, &mut sink, "t.len", "t.str").unwrap();
        assert_eq!(off, 8);
        match &sink.field("t.str").unwrap().value {
            Val::Str(s) => assert!(s.starts_with('a') && s.ends_with('b')),
            v => panic!("unexpected value {:?}", v),
        }
    }
}
