//! Filehandle decoding.
//!
//! NFS filehandles are opaque to the protocol but structured by the server
//! implementation. A small registry of vendor decoders inspects the handle
//! bytes; the first decoder that recognizes the layout emits its interior
//! fields, otherwise the handle stays a plain blob. Either way the raw
//! bytes and length are always emitted first, so a wrong vendor guess can
//! never hide data.

use crate::buffer::{ByteOrder, DecodeBuffer, DissectResult};
use crate::tree::{FieldSink, NodeId};
use crate::variant::Variant;
use crate::xdr;

/// A vendor decoder: returns `Ok(true)` when it recognized and emitted the
/// handle interior, `Ok(false)` to let the next decoder try. Decoders only
/// see the handle bytes, never the surrounding message.
pub type FhDecoder =
    fn(buf: &DecodeBuffer<'_>, parent: NodeId, sink: &mut dyn FieldSink) -> DissectResult<bool>;

pub struct FhRegistry {
    decoders: Vec<(&'static str, FhDecoder)>,
}

impl Default for FhRegistry {
    fn default() -> Self {
        let mut reg = FhRegistry {
            decoders: Vec::new(),
        };
        reg.register("knfsd", decode_knfsd);
        reg
    }
}

impl FhRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &'static str, decoder: FhDecoder) {
        self.decoders.push((name, decoder));
    }

    /// Emit the interior of a handle already emitted as a blob. `offset` and
    /// `length` locate the handle inside the full message buffer; decoders
    /// run against a window so their offsets are handle-relative.
    pub fn decode(
        &self,
        buf: &DecodeBuffer<'_>,
        offset: usize,
        length: usize,
        parent: NodeId,
        sink: &mut dyn FieldSink,
    ) -> DissectResult<()> {
        let window = buf.window(offset, length)?;
        let handle = DecodeBuffer::new(window);
        for (name, decoder) in &self.decoders {
            // vendor layouts shorter than the capture are a mismatch, not
            // an error for the message as a whole
            match decoder(&handle, parent, sink) {
                Ok(true) => {
                    sink.annotate(parent, &format!("({})", name));
                    return Ok(());
                }
                Ok(false) => {}
                Err(_) => {}
            }
        }
        Ok(())
    }
}

/// Linux knfsd "new style" handle: version 1, then auth/fsid/fileid type
/// bytes, then little-endian fsid and fileid words. The kernel writes these
/// in host order, which in practice means little-endian captures.
fn decode_knfsd(
    buf: &DecodeBuffer<'_>,
    parent: NodeId,
    sink: &mut dyn FieldSink,
) -> DissectResult<bool> {
    if buf.len() < 8 || buf.u8_at(0)? != 1 {
        return Ok(false);
    }
    let fsid_type = buf.u8_at(2)?;
    let fileid_type = buf.u8_at(3)?;
    if fsid_type > 2 || fileid_type > 2 {
        return Ok(false);
    }
    sink.emit(parent, "fh.version", 0, 1, Variant::U8(buf.u8_at(0)?));
    sink.emit(parent, "fh.auth_type", 1, 1, Variant::U8(buf.u8_at(1)?));
    sink.emit(parent, "fh.fsid_type", 2, 1, Variant::U8(fsid_type));
    sink.emit(parent, "fh.fileid_type", 3, 1, Variant::U8(fileid_type));

    let mut offset = 4;
    if fsid_type == 0 && buf.len() >= offset + 8 {
        let major = buf.u16_at(offset, ByteOrder::Little)?;
        let minor = buf.u16_at(offset + 2, ByteOrder::Little)?;
        let inode = buf.u32_at(offset + 4, ByteOrder::Little)?;
        sink.emit(parent, "fh.fsid.major", offset, 2, Variant::U16(major));
        sink.emit(parent, "fh.fsid.minor", offset + 2, 2, Variant::U16(minor));
        sink.emit(parent, "fh.fsid.inode", offset + 4, 4, Variant::U32(inode));
        offset += 8;
    }
    if fileid_type >= 1 && buf.len() >= offset + 8 {
        let inode = buf.u32_at(offset, ByteOrder::Little)?;
        let gen = buf.u32_at(offset + 4, ByteOrder::Little)?;
        sink.emit(parent, "fh.fileid.inode", offset, 4, Variant::U32(inode));
        sink.emit(parent, "fh.fileid.generation", offset + 4, 4, Variant::U32(gen));
    }
    Ok(true)
}

/// Emit a filehandle: length, raw bytes, then whatever interior a vendor
/// decoder recognizes. Returns the advanced offset and the handle bytes.
pub fn fhandle_field<'a>(
    buf: &DecodeBuffer<'a>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    registry: &FhRegistry,
) -> DissectResult<(usize, &'a [u8])> {
    let (end, data) = xdr::opaque_field(buf, offset, parent, sink, "fh.length", "fh.data")?;
    if !data.is_empty() {
        registry.decode(buf, offset + 4, data.len(), parent, sink)?;
    }
    Ok((end, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{TreeSink, Val, ROOT};
    use hex_literal::hex;

    #[test]
    fn knfsd_interior_fields() {
        // version 1, auth 0, fsid_type 0, fileid_type 1,
        // dev 8:1 inode 2 (LE), fileid inode 0x1234 gen 7 (LE)
        let data = hex!(
            "00000014"
            "01000001"
            "08000100 02000000"
            "34120000 07000000"
        );
        let buf = DecodeBuffer::new(&data);
        let mut sink = TreeSink::new();
        let reg = FhRegistry::new();
        let (off, fh) = fhandle_field(&buf, 0, ROOT, &mut sink, &reg).unwrap();
        assert_eq!(off, 24);
        assert_eq!(fh.len(), 20);
        match sink.field("fh.fsid.major").unwrap().value {
            Val::U16(v) => assert_eq!(v, 8),
            ref v => panic!("unexpected value {:?}", v),
        }
        match sink.field("fh.fileid.inode").unwrap().value {
            Val::U32(v) => assert_eq!(v, 0x1234),
            ref v => panic!("unexpected value {:?}", v),
        }
    }

    #[test]
    fn unrecognized_handle_stays_opaque() {
        let data = hex!("00000008 ffffffff ffffffff");
        let buf = DecodeBuffer::new(&data);
        let mut sink = TreeSink::new();
        let reg = FhRegistry::new();
        let (off, _) = fhandle_field(&buf, 0, ROOT, &mut sink, &reg).unwrap();
        assert_eq!(off, 12);
        assert!(sink.field("fh.version").is_none());
        assert!(sink.field("fh.data").is_some());
    }

    #[test]
    fn empty_handle() {
        let data = hex!("00000000");
        let buf = DecodeBuffer::new(&data);
        let mut sink = TreeSink::new();
        let reg = FhRegistry::new();
        let (off, fh) = fhandle_field(&buf, 0, ROOT, &mut sink, &reg).unwrap();
        assert_eq!(off, 4);
        assert!(fh.is_empty());
    }
}
