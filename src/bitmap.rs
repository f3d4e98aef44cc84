//! Generic bitmap-attribute engine.
//!
//! Wire layout: a 4-byte word count, that many 32-bit mask words, and (in
//! values mode) a 4-byte byte-length followed by the values of every set
//! bit packed in ascending bit order. Bit `j` of word `w` is attribute
//! number `32*w + j`, with `j == 0` at the least significant bit.
//!
//! Used for NFSv4 attribute masks (GETATTR, READDIR, fattr4 values) and
//! reusable for any protocol following the same shape.

use itertools::Itertools;

use crate::buffer::{padded4, ByteOrder, DecodeBuffer, DissectResult};
use crate::tree::{FieldSink, NodeId, WarningKind};
use crate::variant::Variant;

/// Sanity ceiling on the declared number of mask words. The protocol lets
/// implementations pad bitmaps arbitrarily; anything beyond this is treated
/// as garbage and skipped.
pub const MAX_BITMAP_WORDS: u32 = 100;

/// Marker for declared-but-undissected value bytes.
pub const FIELD_UNDISSECTED: &str = "bitmap.value.undissected";

/// How bit numbers resolve to display names.
#[derive(Clone, Copy)]
pub enum BitNames {
    /// Static bit-number -> name table.
    Table(&'static [(u32, &'static str)]),
    /// Name computed per bit; takes precedence over any table when chosen.
    Computed(fn(u32) -> Option<&'static str>),
}

impl BitNames {
    pub fn name_of(&self, bit: u32) -> Option<&'static str> {
        match self {
            BitNames::Table(t) => t.iter().find(|(b, _)| *b == bit).map(|(_, n)| *n),
            BitNames::Computed(f) => f(bit),
        }
    }
}

/// Configuration for one kind of bitmap (wire-independent).
pub struct BitmapSpec {
    /// Field id for each raw mask word.
    pub mask_field: &'static str,
    /// Optional hidden field carrying the number of set bits.
    pub count_field: Option<&'static str>,
    /// Field id for the values byte-length prefix (values mode only).
    pub values_len_field: &'static str,
    pub names: Option<BitNames>,
}

/// Decodes one value; returns the offset past what it consumed. Returning
/// the input offset unchanged means "I cannot decode this attribute", which
/// desynchronizes the value stream and makes the engine skip the rest.
pub type BitValueFn<'c> = &'c mut dyn FnMut(
    &DecodeBuffer<'_>,
    usize,
    u32,
    NodeId,
    &mut dyn FieldSink,
) -> DissectResult<usize>;

pub enum BitmapMode<'c> {
    MaskOnly,
    WithValues(BitValueFn<'c>),
}

/// Best-effort resynchronization offset once the mask count is untrusted:
/// past the declared masks, and past the declared value block when one
/// should follow.
fn resync_offset(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    num_masks: u32,
    expect_values: bool,
) -> usize {
    let after_masks = offset
        .saturating_add(4)
        .saturating_add((num_masks as usize).saturating_mul(4));
    let end = if expect_values {
        match buf.u32_at(after_masks, ByteOrder::Big) {
            Ok(len) => after_masks
                .saturating_add(4)
                .saturating_add(padded4(len as usize)),
            Err(_) => buf.len(),
        }
    } else {
        after_masks
    };
    end.min(buf.len())
}

/// Decode one bitmap at `offset`, returning the offset past it.
///
/// Violations of the bitmap's own invariants are flagged on `parent` and
/// resolved to a resynchronized offset; only reads past the capture bubble
/// up as errors.
pub fn dissect_bitmap(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    spec: &BitmapSpec,
    mode: BitmapMode<'_>,
) -> DissectResult<usize> {
    let expect_values = matches!(mode, BitmapMode::WithValues(_));
    let num_masks = buf.u32_at(offset, ByteOrder::Big)?;

    if num_masks > MAX_BITMAP_WORDS {
        sink.flag(
            parent,
            WarningKind::ProtocolViolation,
            &format!(
                "bitmap declares {} mask words (limit {}), skipping",
                num_masks, MAX_BITMAP_WORDS
            ),
        );
        return Ok(resync_offset(buf, offset, num_masks, expect_values));
    }

    if expect_values && num_masks == 0 {
        sink.flag(
            parent,
            WarningKind::ProtocolViolation,
            "bitmap carries values but declares no mask words",
        );
        return Ok(resync_offset(buf, offset, 0, true));
    }

    let mut cur = offset + 4;
    let mut set_bits: Vec<u32> = Vec::new();
    for w in 0..num_masks {
        let word = buf.u32_at(cur, ByteOrder::Big)?;
        let node = sink.emit(parent, spec.mask_field, cur, 4, Variant::U32(word));
        let word_bits: Vec<u32> = (0..32)
            .filter(|j| word & (1 << j) != 0)
            .map(|j| 32 * w + j)
            .collect();
        if let Some(names) = &spec.names {
            if !word_bits.is_empty() {
                let label = word_bits
                    .iter()
                    .map(|b| names.name_of(*b).unwrap_or("Unknown"))
                    .join(", ");
                sink.annotate(node, &format!("({})", label));
            }
        }
        set_bits.extend(word_bits);
        cur += 4;
    }

    if let Some(count_field) = spec.count_field {
        sink.emit(
            parent,
            count_field,
            offset,
            cur - offset,
            Variant::U32(set_bits.len() as u32),
        );
    }

    let value_cb = match mode {
        BitmapMode::MaskOnly => return Ok(cur),
        BitmapMode::WithValues(cb) => cb,
    };

    let (after_len, values_len) =
        crate::xdr::u32_field(buf, cur, parent, sink, spec.values_len_field)?;
    cur = after_len;
    let values_start = cur;
    let mut values_end = values_start + padded4(values_len as usize);
    if values_end > buf.len() {
        sink.flag(
            parent,
            WarningKind::Truncated,
            "declared attribute value length runs past captured data",
        );
        values_end = buf.len();
    }

    for bit in set_bits {
        let before = cur;
        cur = value_cb(buf, cur, bit, parent, sink)?;
        if cur == before {
            // value stream is unsynchronized from here on
            sink.flag(
                parent,
                WarningKind::UnknownTag,
                &format!("no value dissector for bit {}, remainder skipped", bit),
            );
            break;
        }
        if cur > values_end {
            sink.flag(
                parent,
                WarningKind::ProtocolViolation,
                &format!("value for bit {} overruns the declared value block", bit),
            );
            cur = values_end;
            break;
        }
    }

    if cur < values_end {
        let leftover = values_end - cur;
        let node = sink.emit(
            parent,
            FIELD_UNDISSECTED,
            cur,
            leftover,
            Variant::Bytes(buf.window(cur, leftover)?),
        );
        sink.flag(
            node,
            WarningKind::ProtocolViolation,
            &format!("{} declared value bytes not consumed", leftover),
        );
    }

    Ok(values_end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{TreeSink, ROOT};
    use hex_literal::hex;

    const NAMES: &[(u32, &str)] = &[(0, "ALPHA"), (3, "CHANGE"), (5, "FIVE"), (40, "FORTY")];

    fn spec() -> BitmapSpec {
        BitmapSpec {
            mask_field: "t.mask",
            count_field: Some("t.mask.count"),
            values_len_field: "t.mask.vallen",
            names: Some(BitNames::Table(NAMES)),
        }
    }

    #[test]
    fn mask_only_annotated() {
        // one word, bits 0 and 3
        let data = hex!("00000001 00000009");
        let buf = DecodeBuffer::new(&data);
        let mut sink = TreeSink::new();
        let end = dissect_bitmap(&buf, 0, ROOT, &mut sink, &spec(), BitmapMode::MaskOnly).unwrap();
        assert_eq!(end, 8);
        let mask = sink.field("t.mask").unwrap();
        assert_eq!(mask.annotations, vec!["(ALPHA, CHANGE)".to_string()]);
        assert_eq!(
            sink.field("t.mask.count").unwrap().value,
            crate::tree::Val::U32(2)
        );
    }

    #[test]
    fn value_callbacks_in_ascending_bit_order() {
        // two words, bits {0,5,31,32,40}; each value is one 4-byte word
        let mut data = Vec::new();
        data.extend_from_slice(&hex!("00000002"));
        data.extend_from_slice(&0x80000021u32.to_be_bytes()); // bits 0,5,31
        data.extend_from_slice(&0x00000101u32.to_be_bytes()); // bits 32,40
        data.extend_from_slice(&hex!("00000014")); // 20 value bytes
        for i in 0u32..5 {
            data.extend_from_slice(&i.to_be_bytes());
        }
        let buf = DecodeBuffer::new(&data);
        let mut sink = TreeSink::new();
        let mut seen: Vec<u32> = Vec::new();
        let mut cb = |b: &DecodeBuffer<'_>,
                      off: usize,
                      bit: u32,
                      parent: NodeId,
                      s: &mut dyn FieldSink|
         -> DissectResult<usize> {
            seen.push(bit);
            crate::xdr::u32_field(b, off, parent, s, "t.val").map(|(o, _)| o)
        };
        let end = dissect_bitmap(
            &buf,
            0,
            ROOT,
            &mut sink,
            &spec(),
            BitmapMode::WithValues(&mut cb),
        )
        .unwrap();
        assert_eq!(seen, vec![0, 5, 31, 32, 40]);
        // count + masks + length word + 5 values
        assert_eq!(end, 4 + 8 + 4 + 20);
        assert!(sink.warnings().is_empty());
    }

    #[test]
    fn word_count_ceiling() {
        // declares 101 words in a buffer that holds none of them
        let data = hex!("00000065 00000000");
        let buf = DecodeBuffer::new(&data);
        let mut sink = TreeSink::new();
        let end = dissect_bitmap(&buf, 0, ROOT, &mut sink, &spec(), BitmapMode::MaskOnly).unwrap();
        assert!(sink.has_warning(WarningKind::ProtocolViolation));
        // clamped to the capture, no out-of-bounds read attempted
        assert_eq!(end, buf.len());
        assert!(sink.field("t.mask").is_none());
    }

    #[test]
    fn values_mode_without_masks() {
        // zero mask words, declared value length 8
        let data = hex!("00000000 00000008 11111111 22222222");
        let buf = DecodeBuffer::new(&data);
        let mut sink = TreeSink::new();
        let mut cb = |_: &DecodeBuffer<'_>,
                      off: usize,
                      _: u32,
                      _: NodeId,
                      _: &mut dyn FieldSink|
         -> DissectResult<usize> { Ok(off) };
        let end = dissect_bitmap(
            &buf,
            0,
            ROOT,
            &mut sink,
            &spec(),
            BitmapMode::WithValues(&mut cb),
        )
        .unwrap();
        assert!(sink.has_warning(WarningKind::ProtocolViolation));
        // resynchronized past the declared opaque block
        assert_eq!(end, 16);
    }

    #[test]
    fn zero_consumption_skips_remainder() {
        // one word, bits 0 and 1; callback refuses both
        let data = hex!("00000001 00000003 00000008 aaaaaaaa bbbbbbbb");
        let buf = DecodeBuffer::new(&data);
        let mut sink = TreeSink::new();
        let mut calls = 0u32;
        let mut cb = |_: &DecodeBuffer<'_>,
                      off: usize,
                      _: u32,
                      _: NodeId,
                      _: &mut dyn FieldSink|
         -> DissectResult<usize> {
            calls += 1;
            Ok(off)
        };
        let end = dissect_bitmap(
            &buf,
            0,
            ROOT,
            &mut sink,
            &spec(),
            BitmapMode::WithValues(&mut cb),
        )
        .unwrap();
        // only the first bit was attempted
        assert_eq!(calls, 1);
        assert!(sink.has_warning(WarningKind::UnknownTag));
        let blob = sink.field(FIELD_UNDISSECTED).unwrap();
        assert_eq!(blob.length, 8);
        assert_eq!(end, buf.len());
    }

    #[test]
    fn leftover_declared_bytes_flagged() {
        // one word, bit 0 only; 12 declared value bytes, callback eats 4
        let data = hex!("00000001 00000001 0000000c 01020304 05060708 090a0b0c");
        let buf = DecodeBuffer::new(&data);
        let mut sink = TreeSink::new();
        let mut cb = |b: &DecodeBuffer<'_>,
                      off: usize,
                      _: u32,
                      p: NodeId,
                      s: &mut dyn FieldSink|
         -> DissectResult<usize> {
            crate::xdr::u32_field(b, off, p, s, "t.val").map(|(o, _)| o)
        };
        let end = dissect_bitmap(
            &buf,
            0,
            ROOT,
            &mut sink,
            &spec(),
            BitmapMode::WithValues(&mut cb),
        )
        .unwrap();
        assert_eq!(end, buf.len());
        let blob = sink.field(FIELD_UNDISSECTED).unwrap();
        assert_eq!(blob.length, 8);
        assert!(sink.has_warning(WarningKind::ProtocolViolation));
    }
}
