//! Performance Co-Pilot (pmcd) dissector.
//!
//! Every PDU starts with a 12-byte header: total length, PDU type, sender
//! PID. Beyond the header the interesting parts are stateful: metric ids
//! are resolved to names by pairing a client's PMNS_NAMES request with the
//! server's PMNS_IDS answer, and label PDUs carry a field the server
//! historically wrote in host byte order, so the value geometry has to be
//! guessed unless the peer advertised the fixed behavior.

use std::collections::HashMap;

use itertools::Itertools;

use crate::buffer::{padded4, ByteOrder, DecodeBuffer, DissectError, DissectResult};
use crate::pcp_types::*;
use crate::probe::{L4Info, ProbeL4, ProbeResult};
use crate::rparser::{Direction, PacketMeta, ParseResult, RBuilder, RParser};
use crate::tree::{FieldSink, NodeId, WarningKind, ROOT};
use crate::variant::Variant;

pub struct PcpBuilder {}
impl RBuilder for PcpBuilder {
    fn build(&self) -> Box<dyn RParser> {
        Box::new(PcpParser::new())
    }
    fn get_l4_probe(&self) -> Option<ProbeL4> {
        Some(pcp_probe)
    }
}

#[derive(Default)]
pub struct PcpParser {
    /// Names from the most recent unanswered PMNS_NAMES request.
    pmid_name_candidates: Vec<String>,
    pmid_to_name: HashMap<u32, String>,
    /// Frame of the latest PMNS_NAMES seen, and the frame whose candidates
    /// have already been consumed by a PMNS_IDS answer.
    last_names_frame: u32,
    last_processed_names_frame: u32,
    /// Peer advertised PCP_PDU_FLAG_LABELS, so label geometry fields can
    /// be trusted to be big-endian.
    using_good_labels: bool,
    msgs_parsed: u32,
}

impl PcpParser {
    pub fn new() -> PcpParser {
        PcpParser::default()
    }

    fn pmid_item(
        &self,
        buf: &DecodeBuffer<'_>,
        offset: usize,
        parent: NodeId,
        sink: &mut dyn FieldSink,
    ) -> DissectResult<(usize, u32)> {
        let pmid = buf.u32_at(offset, ByteOrder::Big)?;
        let node = sink.emit(parent, "pcp.pmid", offset, 4, Variant::U32(pmid));
        match self.pmid_to_name.get(&pmid) {
            Some(name) => sink.annotate(node, name),
            None => sink.annotate(node, "Metric name unknown"),
        }
        let (domain, cluster, item) = pmid_split(pmid);
        sink.emit(node, "pcp.pmid.domain", offset, 4, Variant::U32(domain));
        sink.emit(node, "pcp.pmid.cluster", offset, 4, Variant::U32(cluster));
        sink.emit(node, "pcp.pmid.item", offset, 4, Variant::U32(item));
        Ok((offset + 4, pmid))
    }

    fn dissect_start_or_error(
        &mut self,
        buf: &DecodeBuffer<'_>,
        meta: &PacketMeta,
        sink: &mut dyn FieldSink,
    ) -> DissectResult<()> {
        let sts = buf.i32_at(12, ByteOrder::Big)?;
        if sts < 0 {
            let node = sink.emit(ROOT, "pcp.error", 12, 4, Variant::I32(sts));
            sink.annotate(node, &format!("({})", pm_error_string(sts)));
            sink.append_info(&format!(" {}", pm_error_string(sts)));
            if sts == PM_ERR_NAME {
                // the pending name lookup failed; its candidates are dead
                self.pmid_name_candidates.clear();
            }
            return Ok(());
        }
        sink.emit(ROOT, "pcp.start.zero", 12, 1, Variant::U8(buf.u8_at(12)?));
        sink.emit(ROOT, "pcp.start.version", 13, 1, Variant::U8(buf.u8_at(13)?));
        let features = buf.u16_at(14, ByteOrder::Big)?;
        let node = sink.emit(ROOT, "pcp.start.features", 14, 2, Variant::U16(features));
        let names = PCP_FEATURE_FLAGS
            .iter()
            .filter(|(bit, _)| features as u32 & bit != 0)
            .map(|(_, name)| *name)
            .join(", ");
        if !names.is_empty() {
            sink.annotate(node, &format!("({})", names));
        }
        if meta.direction == Direction::ToClient && features as u32 & PCP_PDU_FLAG_LABELS != 0 {
            self.using_good_labels = true;
        }
        Ok(())
    }

    fn dissect_creds(
        &self,
        buf: &DecodeBuffer<'_>,
        sink: &mut dyn FieldSink,
    ) -> DissectResult<()> {
        let numcreds = buf.u32_at(12, ByteOrder::Big)?;
        sink.emit(ROOT, "pcp.creds.count", 12, 4, Variant::U32(numcreds));
        let mut offset = 16;
        for _ in 0..numcreds {
            let node = sink.emit(ROOT, "pcp.cred", offset, 4, Variant::None);
            sink.emit(node, "pcp.cred.type", offset, 1, Variant::U8(buf.u8_at(offset)?));
            sink.emit(node, "pcp.cred.version", offset + 1, 1, Variant::U8(buf.u8_at(offset + 1)?));
            offset += 4;
        }
        Ok(())
    }

    fn dissect_profile(
        &self,
        buf: &DecodeBuffer<'_>,
        sink: &mut dyn FieldSink,
    ) -> DissectResult<()> {
        sink.emit(ROOT, "pcp.ctxnum", 12, 4, Variant::U32(buf.u32_at(12, ByteOrder::Big)?));
        sink.emit(ROOT, "pcp.profile.g_state", 16, 4, Variant::U32(buf.u32_at(16, ByteOrder::Big)?));
        let numprof = buf.u32_at(20, ByteOrder::Big)?;
        sink.emit(ROOT, "pcp.profile.numprof", 20, 4, Variant::U32(numprof));
        let mut offset = 28;
        for _ in 0..numprof {
            let node = sink.emit(ROOT, "pcp.profile", offset, 16, Variant::None);
            sink.emit(node, "pcp.indom", offset, 4, Variant::U32(buf.u32_at(offset, ByteOrder::Big)?));
            sink.emit(node, "pcp.profile.state", offset + 4, 4, Variant::U32(buf.u32_at(offset + 4, ByteOrder::Big)?));
            let numinst = buf.u32_at(offset + 8, ByteOrder::Big)?;
            sink.emit(node, "pcp.profile.numinst", offset + 8, 4, Variant::U32(numinst));
            offset += 16;
            for _ in 0..numinst {
                sink.emit(node, "pcp.instance", offset, 4, Variant::U32(buf.u32_at(offset, ByteOrder::Big)?));
                offset += 4;
            }
        }
        Ok(())
    }

    fn dissect_fetch(
        &self,
        buf: &DecodeBuffer<'_>,
        sink: &mut dyn FieldSink,
    ) -> DissectResult<()> {
        sink.emit(ROOT, "pcp.ctxnum", 12, 4, Variant::U32(buf.u32_at(12, ByteOrder::Big)?));
        sink.emit(ROOT, "pcp.when.sec", 16, 4, Variant::U32(buf.u32_at(16, ByteOrder::Big)?));
        sink.emit(ROOT, "pcp.when.usec", 20, 4, Variant::U32(buf.u32_at(20, ByteOrder::Big)?));
        let numpmid = buf.u32_at(24, ByteOrder::Big)?;
        sink.emit(ROOT, "pcp.numpmid", 24, 4, Variant::U32(numpmid));
        let mut offset = 28;
        for _ in 0..numpmid {
            let (next, _) = self.pmid_item(buf, offset, ROOT, sink)?;
            offset = next;
        }
        Ok(())
    }

    /// Length-prefixed, 4-byte padded string used throughout the PMNS and
    /// instance PDUs.
    fn pcp_string<'a>(
        &self,
        buf: &DecodeBuffer<'a>,
        offset: usize,
        parent: NodeId,
        sink: &mut dyn FieldSink,
        len_field: &'static str,
        str_field: &'static str,
    ) -> DissectResult<(usize, &'a [u8])> {
        let len = buf.u32_at(offset, ByteOrder::Big)? as usize;
        sink.emit(parent, len_field, offset, 4, Variant::U32(len as u32));
        let data = buf.window(offset + 4, len)?;
        // padding must also be captured for the next element to be real
        buf.window(offset + 4, padded4(len))?;
        sink.emit(
            parent,
            str_field,
            offset + 4,
            len,
            Variant::OwnedStr(String::from_utf8_lossy(data).into_owned()),
        );
        Ok((offset + 4 + padded4(len), data))
    }

    fn dissect_desc(&self, buf: &DecodeBuffer<'_>, sink: &mut dyn FieldSink) -> DissectResult<()> {
        let (offset, _) = self.pmid_item(buf, 12, ROOT, sink)?;
        let vtype = buf.u32_at(offset, ByteOrder::Big)?;
        let node = sink.emit(ROOT, "pcp.desc.type", offset, 4, Variant::U32(vtype));
        sink.annotate(node, &format!("({})", pm_type_name(vtype as u8)));
        sink.emit(ROOT, "pcp.indom", offset + 4, 4, Variant::U32(buf.u32_at(offset + 4, ByteOrder::Big)?));
        sink.emit(ROOT, "pcp.desc.sem", offset + 8, 4, Variant::U32(buf.u32_at(offset + 8, ByteOrder::Big)?));
        sink.emit(ROOT, "pcp.desc.units", offset + 12, 4, Variant::U32(buf.u32_at(offset + 12, ByteOrder::Big)?));
        Ok(())
    }

    fn dissect_instance_req(
        &self,
        buf: &DecodeBuffer<'_>,
        sink: &mut dyn FieldSink,
    ) -> DissectResult<()> {
        sink.emit(ROOT, "pcp.indom", 12, 4, Variant::U32(buf.u32_at(12, ByteOrder::Big)?));
        sink.emit(ROOT, "pcp.when.sec", 16, 4, Variant::U32(buf.u32_at(16, ByteOrder::Big)?));
        sink.emit(ROOT, "pcp.when.usec", 20, 4, Variant::U32(buf.u32_at(20, ByteOrder::Big)?));
        sink.emit(ROOT, "pcp.instance", 24, 4, Variant::U32(buf.u32_at(24, ByteOrder::Big)?));
        self.pcp_string(buf, 28, ROOT, sink, "pcp.instance.name.length", "pcp.instance.name")?;
        Ok(())
    }

    fn dissect_instance(
        &self,
        buf: &DecodeBuffer<'_>,
        sink: &mut dyn FieldSink,
    ) -> DissectResult<()> {
        sink.emit(ROOT, "pcp.indom", 12, 4, Variant::U32(buf.u32_at(12, ByteOrder::Big)?));
        let numinst = buf.u32_at(16, ByteOrder::Big)?;
        sink.emit(ROOT, "pcp.instance.count", 16, 4, Variant::U32(numinst));
        let mut offset = 20;
        for _ in 0..numinst {
            let node = sink.emit(ROOT, "pcp.instance", offset, 4, Variant::U32(buf.u32_at(offset, ByteOrder::Big)?));
            let (next, _) = self.pcp_string(
                buf,
                offset + 4,
                node,
                sink,
                "pcp.instance.name.length",
                "pcp.instance.name",
            )?;
            offset = next;
        }
        Ok(())
    }

    fn dissect_text_req(
        &self,
        buf: &DecodeBuffer<'_>,
        sink: &mut dyn FieldSink,
    ) -> DissectResult<()> {
        sink.emit(ROOT, "pcp.text.ident", 12, 4, Variant::U32(buf.u32_at(12, ByteOrder::Big)?));
        sink.emit(ROOT, "pcp.text.type", 16, 4, Variant::U32(buf.u32_at(16, ByteOrder::Big)?));
        Ok(())
    }

    fn dissect_text(&self, buf: &DecodeBuffer<'_>, sink: &mut dyn FieldSink) -> DissectResult<()> {
        sink.emit(ROOT, "pcp.text.ident", 12, 4, Variant::U32(buf.u32_at(12, ByteOrder::Big)?));
        self.pcp_string(buf, 16, ROOT, sink, "pcp.text.length", "pcp.text")?;
        Ok(())
    }

    fn dissect_pmns_traverse(
        &self,
        buf: &DecodeBuffer<'_>,
        sink: &mut dyn FieldSink,
    ) -> DissectResult<()> {
        sink.emit(ROOT, "pcp.pmns.subtype", 12, 4, Variant::U32(buf.u32_at(12, ByteOrder::Big)?));
        self.pcp_string(buf, 16, ROOT, sink, "pcp.pmns.name.length", "pcp.pmns.name")?;
        Ok(())
    }

    fn dissect_pmns_names(
        &mut self,
        buf: &DecodeBuffer<'_>,
        meta: &PacketMeta,
        sink: &mut dyn FieldSink,
    ) -> DissectResult<()> {
        sink.emit(ROOT, "pcp.pmns.nstrbytes", 12, 4, Variant::U32(buf.u32_at(12, ByteOrder::Big)?));
        let numstatus = buf.u32_at(16, ByteOrder::Big)?;
        sink.emit(ROOT, "pcp.pmns.numstatus", 16, 4, Variant::U32(numstatus));
        let numnames = buf.u32_at(20, ByteOrder::Big)?;
        sink.emit(ROOT, "pcp.pmns.numnames", 20, 4, Variant::U32(numnames));
        let mut offset = 24;
        for _ in 0..numstatus {
            sink.emit(ROOT, "pcp.pmns.status", offset, 4, Variant::I32(buf.i32_at(offset, ByteOrder::Big)?));
            offset += 4;
        }

        // A client-side PMNS_NAMES is a name-to-pmid lookup request whose
        // answer (PMNS_IDS) carries the pmids in the same order. Stage the
        // names once per frame; replays and server-side NAMES never touch
        // the candidate list.
        let stage = meta.direction == Direction::ToServer
            && meta.frame > self.last_processed_names_frame
            && meta.frame > self.last_names_frame;
        if stage {
            self.pmid_name_candidates.clear();
            self.last_names_frame = meta.frame;
        }
        for _ in 0..numnames {
            let (next, raw) =
                self.pcp_string(buf, offset, ROOT, sink, "pcp.pmns.name.length", "pcp.pmns.name")?;
            if stage {
                self.pmid_name_candidates
                    .push(String::from_utf8_lossy(raw).into_owned());
            }
            offset = next;
        }
        Ok(())
    }

    fn dissect_pmns_ids(
        &mut self,
        buf: &DecodeBuffer<'_>,
        sink: &mut dyn FieldSink,
    ) -> DissectResult<()> {
        let sts = buf.i32_at(12, ByteOrder::Big)?;
        let node = sink.emit(ROOT, "pcp.pmns.status", 12, 4, Variant::I32(sts));
        if sts < 0 {
            sink.annotate(node, &format!("({})", pm_error_string(sts)));
        }
        let numids = buf.u32_at(16, ByteOrder::Big)?;
        sink.emit(ROOT, "pcp.pmns.numids", 16, 4, Variant::U32(numids));
        let mut offset = 20;
        let mut pmids = Vec::with_capacity(numids.min(64) as usize);
        for _ in 0..numids {
            let (next, pmid) = self.pmid_item(buf, offset, ROOT, sink)?;
            pmids.push(pmid);
            offset = next;
        }

        if sts == PM_ERR_NAME {
            self.pmid_name_candidates.clear();
            return Ok(());
        }
        // commit only when this answer belongs to a fresh request and the
        // cardinalities agree; a stale or partial answer proves nothing
        let candidates = ::std::mem::take(&mut self.pmid_name_candidates);
        if candidates.len() == pmids.len()
            && self.last_names_frame > self.last_processed_names_frame
        {
            for (pmid, name) in pmids.iter().zip(candidates) {
                self.pmid_to_name.entry(*pmid).or_insert(name);
            }
            self.last_processed_names_frame = self.last_names_frame;
        }
        Ok(())
    }

    fn dissect_label_req(
        &self,
        buf: &DecodeBuffer<'_>,
        sink: &mut dyn FieldSink,
    ) -> DissectResult<()> {
        sink.emit(ROOT, "pcp.label.ident", 12, 4, Variant::U32(buf.u32_at(12, ByteOrder::Big)?));
        let t = buf.u32_at(16, ByteOrder::Big)?;
        let node = sink.emit(ROOT, "pcp.label.type", 16, 4, Variant::U32(t));
        sink.annotate(node, &format!("({})", pcp_label_type_name(t)));
        Ok(())
    }

    /// The label geometry bug: servers before the fix wrote `value_offset`
    /// and `value_length` in host byte order. When the peer advertised
    /// PCP_PDU_FLAG_LABELS both are big-endian; otherwise the only tell is
    /// whether the big-endian reading stays inside the capture.
    fn label_value_geometry(
        &self,
        buf: &DecodeBuffer<'_>,
        entry: usize,
        json_start: usize,
        node: NodeId,
        sink: &mut dyn FieldSink,
    ) -> DissectResult<(usize, usize)> {
        let vo_be = buf.u16_at(entry + 4, ByteOrder::Big)? as usize;
        let vl_be = buf.u16_at(entry + 6, ByteOrder::Big)? as usize;
        if self.using_good_labels {
            return Ok((vo_be, vl_be));
        }
        if json_start + vo_be + vl_be > buf.len() {
            let vo = buf.u16_at(entry + 4, ByteOrder::Little)? as usize;
            let vl = buf.u16_at(entry + 6, ByteOrder::Little)? as usize;
            sink.flag(
                node,
                WarningKind::AmbiguousEncoding,
                "label value geometry read as little-endian (pre-fix server)",
            );
            Ok((vo, vl))
        } else {
            sink.flag(
                node,
                WarningKind::AmbiguousEncoding,
                "label value geometry assumed big-endian, peer did not advertise LABELS",
            );
            Ok((vo_be, vl_be))
        }
    }

    fn dissect_label(
        &self,
        buf: &DecodeBuffer<'_>,
        sink: &mut dyn FieldSink,
    ) -> DissectResult<()> {
        self.dissect_label_req(buf, sink)?;
        let nsets = buf.u32_at(24, ByteOrder::Big)?;
        sink.emit(ROOT, "pcp.label.nsets", 24, 4, Variant::U32(nsets));
        let mut offset = 28;
        for _ in 0..nsets {
            let set = sink.emit(ROOT, "pcp.label.set", offset, 0, Variant::None);
            sink.emit(set, "pcp.instance", offset, 4, Variant::U32(buf.u32_at(offset, ByteOrder::Big)?));
            let json_len = buf.u32_at(offset + 4, ByteOrder::Big)? as usize;
            sink.emit(set, "pcp.label.json.length", offset + 4, 4, Variant::U32(json_len as u32));
            let json_start = buf.u32_at(offset + 8, ByteOrder::Big)? as usize;
            sink.emit(set, "pcp.label.json.offset", offset + 8, 4, Variant::U32(json_start as u32));
            let nlabels = buf.i32_at(offset + 12, ByteOrder::Big)?;
            let nl_node = sink.emit(set, "pcp.label.nlabels", offset + 12, 4, Variant::I32(nlabels));
            if nlabels < 0 {
                sink.annotate(nl_node, &format!("({})", pm_error_string(nlabels)));
            }
            offset += 16;
            for _ in 0..nlabels.max(0) {
                let node = sink.emit(set, "pcp.label", offset, 8, Variant::None);
                let name_off = buf.u16_at(offset, ByteOrder::Big)? as usize;
                sink.emit(node, "pcp.label.name.offset", offset, 2, Variant::U16(name_off as u16));
                let name_len = buf.u8_at(offset + 2)? as usize;
                sink.emit(node, "pcp.label.name.length", offset + 2, 1, Variant::U8(name_len as u8));
                sink.emit(node, "pcp.label.flags", offset + 3, 1, Variant::U8(buf.u8_at(offset + 3)?));
                let (value_off, value_len) =
                    self.label_value_geometry(buf, offset, json_start, node, sink)?;
                sink.emit(node, "pcp.label.value.offset", offset + 4, 2, Variant::U16(value_off as u16));
                sink.emit(node, "pcp.label.value.length", offset + 6, 2, Variant::U16(value_len as u16));

                let name = buf.window(json_start + name_off, name_len)?;
                sink.emit(
                    node,
                    "pcp.label.name",
                    json_start + name_off,
                    name_len,
                    Variant::OwnedStr(String::from_utf8_lossy(name).into_owned()),
                );
                let value = buf.window(json_start + value_off, value_len)?;
                sink.emit(
                    node,
                    "pcp.label.value",
                    json_start + value_off,
                    value_len,
                    Variant::OwnedStr(String::from_utf8_lossy(value).into_owned()),
                );
                offset += 8;
            }
            let json = buf.window(json_start, json_len)?;
            sink.emit(
                set,
                "pcp.label.jsonb",
                json_start,
                json_len,
                Variant::OwnedStr(String::from_utf8_lossy(json).into_owned()),
            );
            offset = offset.max(json_start + padded4(json_len));
        }
        Ok(())
    }

    /// One non-in-situ value block: a type byte and a 24-bit total length
    /// that counts the 4 header bytes themselves.
    fn result_value_block(
        &self,
        buf: &DecodeBuffer<'_>,
        block: usize,
        parent: NodeId,
        sink: &mut dyn FieldSink,
    ) -> DissectResult<()> {
        let vtype = buf.u8_at(block)?;
        let vlen = buf.u24_at(block + 1, ByteOrder::Big)? as usize;
        let node = sink.emit(parent, "pcp.instance.valuep", block, vlen.max(4), Variant::None);
        let tnode = sink.emit(node, "pcp.value.type", block, 1, Variant::U8(vtype));
        sink.annotate(tnode, &format!("({})", pm_type_name(vtype)));
        sink.emit(node, "pcp.value.length", block + 1, 3, Variant::U32(vlen as u32));
        if vlen < 4 {
            sink.flag(
                node,
                WarningKind::ProtocolViolation,
                "value block length smaller than its own header",
            );
            return Ok(());
        }
        let payload = block + 4;
        let payload_len = vlen - 4;
        match vtype {
            PM_TYPE_32 => {
                sink.emit(node, "pcp.value.int", payload, 4, Variant::I32(buf.i32_at(payload, ByteOrder::Big)?));
            }
            PM_TYPE_U32 => {
                sink.emit(node, "pcp.value.uint", payload, 4, Variant::U32(buf.u32_at(payload, ByteOrder::Big)?));
            }
            PM_TYPE_64 => {
                sink.emit(node, "pcp.value.int64", payload, 8, Variant::I64(buf.i64_at(payload, ByteOrder::Big)?));
            }
            PM_TYPE_U64 => {
                sink.emit(node, "pcp.value.uint64", payload, 8, Variant::U64(buf.u64_at(payload, ByteOrder::Big)?));
            }
            PM_TYPE_FLOAT => {
                let v = f32::from_bits(buf.u32_at(payload, ByteOrder::Big)?);
                sink.emit(node, "pcp.value.float", payload, 4, Variant::F32(v));
            }
            PM_TYPE_DOUBLE => {
                let v = f64::from_bits(buf.u64_at(payload, ByteOrder::Big)?);
                sink.emit(node, "pcp.value.double", payload, 8, Variant::F64(v));
            }
            PM_TYPE_STRING => {
                let raw = buf.window(payload, payload_len)?;
                sink.emit(
                    node,
                    "pcp.value.string",
                    payload,
                    payload_len,
                    Variant::OwnedStr(String::from_utf8_lossy(raw).into_owned()),
                );
            }
            _ => {
                sink.emit(
                    node,
                    "pcp.value.aggregate",
                    payload,
                    payload_len,
                    Variant::Bytes(buf.window(payload, payload_len)?),
                );
            }
        }
        Ok(())
    }

    fn dissect_result(
        &self,
        buf: &DecodeBuffer<'_>,
        sink: &mut dyn FieldSink,
    ) -> DissectResult<()> {
        sink.emit(ROOT, "pcp.when.sec", 12, 4, Variant::U32(buf.u32_at(12, ByteOrder::Big)?));
        sink.emit(ROOT, "pcp.when.usec", 16, 4, Variant::U32(buf.u32_at(16, ByteOrder::Big)?));
        let numpmid = buf.u32_at(20, ByteOrder::Big)?;
        sink.emit(ROOT, "pcp.numpmid", 20, 4, Variant::U32(numpmid));
        let mut offset = 24;
        for _ in 0..numpmid {
            let (next, _) = self.pmid_item(buf, offset, ROOT, sink)?;
            offset = next;
            let numval = buf.i32_at(offset, ByteOrder::Big)?;
            let nv_node = sink.emit(ROOT, "pcp.numval", offset, 4, Variant::I32(numval));
            offset += 4;
            if numval < 0 {
                sink.annotate(nv_node, &format!("({})", pm_error_string(numval)));
                continue;
            }
            let valfmt = buf.u32_at(offset, ByteOrder::Big)?;
            sink.emit(ROOT, "pcp.valfmt", offset, 4, Variant::U32(valfmt));
            offset += 4;
            for _ in 0..numval {
                let vnode = sink.emit(ROOT, "pcp.instance.value", offset, 8, Variant::None);
                sink.emit(vnode, "pcp.instance", offset, 4, Variant::U32(buf.u32_at(offset, ByteOrder::Big)?));
                if valfmt == PM_VAL_INSITU {
                    sink.emit(vnode, "pcp.value.insitu", offset + 4, 4, Variant::U32(buf.u32_at(offset + 4, ByteOrder::Big)?));
                } else {
                    // offset into the PDU in 32-bit units
                    let units = buf.u32_at(offset + 4, ByteOrder::Big)? as usize;
                    sink.emit(vnode, "pcp.value.offset", offset + 4, 4, Variant::U32(units as u32));
                    self.result_value_block(buf, units * 4, vnode, sink)?;
                }
                offset += 8;
            }
        }
        Ok(())
    }

    fn dissect_body(
        &mut self,
        pdu_type: u32,
        buf: &DecodeBuffer<'_>,
        meta: &PacketMeta,
        sink: &mut dyn FieldSink,
    ) -> DissectResult<()> {
        match pdu_type {
            PCP_PDU_START_OR_ERROR => self.dissect_start_or_error(buf, meta, sink),
            PCP_PDU_RESULT => self.dissect_result(buf, sink),
            PCP_PDU_PROFILE => self.dissect_profile(buf, sink),
            PCP_PDU_FETCH => self.dissect_fetch(buf, sink),
            PCP_PDU_DESC_REQ => self.pmid_item(buf, 12, ROOT, sink).map(|_| ()),
            PCP_PDU_DESC => self.dissect_desc(buf, sink),
            PCP_PDU_INSTANCE_REQ => self.dissect_instance_req(buf, sink),
            PCP_PDU_INSTANCE => self.dissect_instance(buf, sink),
            PCP_PDU_TEXT_REQ => self.dissect_text_req(buf, sink),
            PCP_PDU_TEXT => self.dissect_text(buf, sink),
            PCP_PDU_CREDS => self.dissect_creds(buf, sink),
            PCP_PDU_PMNS_IDS => self.dissect_pmns_ids(buf, sink),
            PCP_PDU_PMNS_NAMES => self.dissect_pmns_names(buf, meta, sink),
            PCP_PDU_PMNS_CHILD | PCP_PDU_PMNS_TRAVERSE => self.dissect_pmns_traverse(buf, sink),
            PCP_PDU_LABEL_REQ => self.dissect_label_req(buf, sink),
            PCP_PDU_LABEL => self.dissect_label(buf, sink),
            PCP_PDU_CONTROL_REQ | PCP_PDU_USER_AUTH => {
                let len = buf.remaining(12);
                sink.emit(ROOT, "pcp.payload", 12, len, Variant::Bytes(buf.window(12, len)?));
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl RParser for PcpParser {
    fn parse_l4(
        &mut self,
        meta: &PacketMeta,
        data: &[u8],
        sink: &mut dyn FieldSink,
    ) -> ParseResult {
        let buf = DecodeBuffer::new(data);
        let header = (
            buf.u32_at(0, ByteOrder::Big),
            buf.u32_at(4, ByteOrder::Big),
            buf.u32_at(8, ByteOrder::Big),
        );
        let (length, pdu_type, from) = match header {
            (Ok(l), Ok(t), Ok(f)) => (l, t, f),
            _ => {
                debug!("pcp header shorter than 12 bytes");
                return ParseResult::Fail;
            }
        };
        if !pcp_pdu_type_known(pdu_type) {
            return ParseResult::Fail;
        }
        self.msgs_parsed += 1;

        let len_node = sink.emit(ROOT, "pcp.length", 0, 4, Variant::U32(length));
        if length as usize != data.len() {
            sink.flag(
                len_node,
                WarningKind::ProtocolViolation,
                &format!("declared length {} but {} bytes captured", length, data.len()),
            );
        }
        let type_node = sink.emit(ROOT, "pcp.type", 4, 4, Variant::U32(pdu_type));
        sink.annotate(type_node, &format!("({})", pcp_pdu_name(pdu_type)));
        sink.emit(ROOT, "pcp.pdu.from", 8, 4, Variant::U32(from));
        sink.append_info(pcp_pdu_name(pdu_type));

        if let Err(DissectError::OutOfBounds {
            offset,
            needed,
            available,
        }) = self.dissect_body(pdu_type, &buf, meta, sink)
        {
            sink.flag(
                ROOT,
                WarningKind::Truncated,
                &format!(
                    "PDU truncated: {} bytes needed at offset {}, {} captured",
                    needed, offset, available
                ),
            );
        }
        ParseResult::Ok
    }

    fn get(&self, key: &str) -> Option<Variant<'_>> {
        match key {
            "msgs_parsed" => Some(Variant::U32(self.msgs_parsed)),
            "known_metric_names" => Some(Variant::U32(self.pmid_to_name.len() as u32)),
            "using_good_labels" => Some(Variant::Bool(self.using_good_labels)),
            _ => None,
        }
    }

    fn keys(&self) -> ::std::slice::Iter<'_, &str> {
        ["msgs_parsed", "known_metric_names", "using_good_labels"].iter()
    }
}

pub fn pcp_probe(i: &[u8], _l4info: &L4Info) -> ProbeResult {
    if i.len() < 12 {
        return ProbeResult::Unsure;
    }
    let buf = DecodeBuffer::new(i);
    let length = match buf.u32_at(0, ByteOrder::Big) {
        Ok(l) => l,
        Err(_) => return ProbeResult::Unsure,
    };
    let pdu_type = match buf.u32_at(4, ByteOrder::Big) {
        Ok(t) => t,
        Err(_) => return ProbeResult::Unsure,
    };
    if !pcp_pdu_type_known(pdu_type) {
        return ProbeResult::NotForUs;
    }
    if length as usize == i.len() {
        ProbeResult::Certain
    } else {
        ProbeResult::Unsure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{TreeSink, Val};
    use hex_literal::hex;

    fn pdu(pdu_type: u32, body: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&((12 + body.len()) as u32).to_be_bytes());
        data.extend_from_slice(&pdu_type.to_be_bytes());
        data.extend_from_slice(&hex!("00001234")); // from
        data.extend_from_slice(body);
        data
    }

    fn parse(
        parser: &mut PcpParser,
        frame: u32,
        direction: Direction,
        data: &[u8],
    ) -> TreeSink {
        let mut sink = TreeSink::new();
        let meta = PacketMeta::new(frame, direction);
        assert_eq!(parser.parse_l4(&meta, data, &mut sink), ParseResult::Ok);
        sink
    }

    const PMID: u32 = (60 << 22) | (2 << 10) | 3;

    fn names_body(name: &str) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&(name.len() as u32).to_be_bytes()); // nstrbytes
        body.extend_from_slice(&hex!("00000000")); // numstatus
        body.extend_from_slice(&1u32.to_be_bytes()); // numnames
        body.extend_from_slice(&(name.len() as u32).to_be_bytes());
        body.extend_from_slice(name.as_bytes());
        while body.len() % 4 != 0 {
            body.push(0);
        }
        body
    }

    #[test]
    fn pmns_lookup_resolves_fetch_pmids() {
        let mut parser = PcpParser::new();

        let names = pdu(PCP_PDU_PMNS_NAMES, &names_body("kernel.all.load"));
        parse(&mut parser, 1, Direction::ToServer, &names);
        assert_eq!(parser.pmid_name_candidates.len(), 1);

        let mut ids_body = Vec::new();
        ids_body.extend_from_slice(&hex!("00000000")); // status
        ids_body.extend_from_slice(&1u32.to_be_bytes());
        ids_body.extend_from_slice(&PMID.to_be_bytes());
        let ids = pdu(PCP_PDU_PMNS_IDS, &ids_body);
        parse(&mut parser, 2, Direction::ToClient, &ids);
        assert!(parser.pmid_name_candidates.is_empty());
        assert_eq!(parser.pmid_to_name.get(&PMID).map(String::as_str), Some("kernel.all.load"));

        let mut fetch_body = Vec::new();
        fetch_body.extend_from_slice(&hex!("00000000 00000000 00000000")); // ctx, when
        fetch_body.extend_from_slice(&1u32.to_be_bytes());
        fetch_body.extend_from_slice(&PMID.to_be_bytes());
        let fetch = pdu(PCP_PDU_FETCH, &fetch_body);
        let sink = parse(&mut parser, 3, Direction::ToServer, &fetch);
        let pmid = sink.field("pcp.pmid").unwrap();
        assert!(pmid.annotations.iter().any(|a| a == "kernel.all.load"));
        assert_eq!(
            sink.fields_named("pcp.pmid.domain")[0].value,
            Val::U32(60)
        );
    }

    #[test]
    fn first_binding_wins() {
        let mut parser = PcpParser::new();
        parser.pmid_to_name.insert(PMID, "original.name".to_string());

        let names = pdu(PCP_PDU_PMNS_NAMES, &names_body("conflicting.name"));
        parse(&mut parser, 5, Direction::ToServer, &names);
        let mut ids_body = Vec::new();
        ids_body.extend_from_slice(&hex!("00000000"));
        ids_body.extend_from_slice(&1u32.to_be_bytes());
        ids_body.extend_from_slice(&PMID.to_be_bytes());
        let ids = pdu(PCP_PDU_PMNS_IDS, &ids_body);
        parse(&mut parser, 6, Direction::ToClient, &ids);
        assert_eq!(
            parser.pmid_to_name.get(&PMID).map(String::as_str),
            Some("original.name")
        );
    }

    #[test]
    fn cardinality_mismatch_discards_candidates() {
        let mut parser = PcpParser::new();
        let names = pdu(PCP_PDU_PMNS_NAMES, &names_body("one.name"));
        parse(&mut parser, 1, Direction::ToServer, &names);

        // answer carries two ids for one staged name
        let mut ids_body = Vec::new();
        ids_body.extend_from_slice(&hex!("00000000"));
        ids_body.extend_from_slice(&2u32.to_be_bytes());
        ids_body.extend_from_slice(&PMID.to_be_bytes());
        ids_body.extend_from_slice(&(PMID + 1).to_be_bytes());
        let ids = pdu(PCP_PDU_PMNS_IDS, &ids_body);
        parse(&mut parser, 2, Direction::ToClient, &ids);
        assert!(parser.pmid_to_name.is_empty());
        assert!(parser.pmid_name_candidates.is_empty());

        // a later well-formed exchange resolves on its own, unpolluted by
        // the mismatched batch
        let names = pdu(PCP_PDU_PMNS_NAMES, &names_body("later.name"));
        parse(&mut parser, 3, Direction::ToServer, &names);
        let mut ids_body = Vec::new();
        ids_body.extend_from_slice(&hex!("00000000"));
        ids_body.extend_from_slice(&1u32.to_be_bytes());
        ids_body.extend_from_slice(&(PMID + 2).to_be_bytes());
        let ids = pdu(PCP_PDU_PMNS_IDS, &ids_body);
        parse(&mut parser, 4, Direction::ToClient, &ids);
        assert_eq!(
            parser.pmid_to_name.get(&(PMID + 2)).map(String::as_str),
            Some("later.name")
        );
        assert_eq!(parser.pmid_to_name.len(), 1);
    }

    #[test]
    fn name_error_clears_candidates() {
        let mut parser = PcpParser::new();
        let names = pdu(PCP_PDU_PMNS_NAMES, &names_body("no.such.metric"));
        parse(&mut parser, 1, Direction::ToServer, &names);
        assert_eq!(parser.pmid_name_candidates.len(), 1);

        let err = pdu(PCP_PDU_START_OR_ERROR, &PM_ERR_NAME.to_be_bytes());
        let sink = parse(&mut parser, 2, Direction::ToClient, &err);
        assert!(parser.pmid_name_candidates.is_empty());
        let e = sink.field("pcp.error").unwrap();
        assert!(e.annotations.iter().any(|a| a.contains("PM_ERR_NAME")));
    }

    #[test]
    fn error_and_start_share_a_type_word() {
        // negative status word: the ERROR variant
        let mut parser = PcpParser::new();
        let err = pdu(PCP_PDU_START_OR_ERROR, &hex!("ffffcfc3")); // -12349
        let sink = parse(&mut parser, 1, Direction::ToClient, &err);
        let e = sink.field("pcp.error").unwrap();
        assert_eq!(e.value, Val::I32(-12349));
        assert!(e.annotations.iter().any(|a| a.contains("PM_ERR_TEXT")));
        assert!(sink.field("pcp.start.version").is_none());

        // zero status word: the START variant
        let start = pdu(PCP_PDU_START_OR_ERROR, &hex!("00000000"));
        let sink = parse(&mut parser, 2, Direction::ToClient, &start);
        assert!(sink.field("pcp.error").is_none());
        assert!(sink.field("pcp.start.version").is_some());
    }

    #[test]
    fn start_features_enable_good_labels() {
        let mut parser = PcpParser::new();
        // status word: zero, version 2, features LABELS
        let start = pdu(PCP_PDU_START_OR_ERROR, &hex!("00020200"));
        let sink = parse(&mut parser, 1, Direction::ToClient, &start);
        assert!(parser.using_good_labels);
        let f = sink.field("pcp.start.features").unwrap();
        assert!(f.annotations.iter().any(|a| a.contains("LABELS")));

        // the client echoing features must not flip the flag
        let mut parser = PcpParser::new();
        parse(&mut parser, 1, Direction::ToServer, &start);
        assert!(!parser.using_good_labels);
    }

    fn label_pdu(value_geometry_le: bool) -> Vec<u8> {
        let json = br#"{"agent":"linux"}"#;
        let mut body = Vec::new();
        body.extend_from_slice(&hex!("00000001")); // ident
        body.extend_from_slice(&hex!("00000001")); // type CONTEXT
        body.extend_from_slice(&hex!("00000000")); // padding
        body.extend_from_slice(&hex!("00000001")); // nsets
        body.extend_from_slice(&hex!("ffffffff")); // inst
        body.extend_from_slice(&(json.len() as u32).to_be_bytes());
        body.extend_from_slice(&52u32.to_be_bytes()); // json offset in PDU
        body.extend_from_slice(&1u32.to_be_bytes()); // nlabels
        // label entry: name at 2 len 5, value at 9 len 7
        body.extend_from_slice(&2u16.to_be_bytes());
        body.push(5);
        body.push(0);
        if value_geometry_le {
            body.extend_from_slice(&9u16.to_le_bytes());
            body.extend_from_slice(&7u16.to_le_bytes());
        } else {
            body.extend_from_slice(&9u16.to_be_bytes());
            body.extend_from_slice(&7u16.to_be_bytes());
        }
        body.extend_from_slice(json);
        pdu(PCP_PDU_LABEL, &body)
    }

    #[test]
    fn label_little_endian_geometry_detected() {
        let mut parser = PcpParser::new();
        let sink = parse(&mut parser, 1, Direction::ToClient, &label_pdu(true));
        assert!(sink.has_warning(WarningKind::AmbiguousEncoding));
        assert_eq!(sink.field("pcp.label.name").unwrap().value, Val::Str("agent".to_string()));
        assert_eq!(
            sink.field("pcp.label.value").unwrap().value,
            Val::Str("\"linux\"".to_string())
        );
    }

    #[test]
    fn label_big_endian_trusted_with_capability() {
        let mut parser = PcpParser::new();
        // server advertised LABELS, so geometry is read big-endian with no
        // heuristic even though a little-endian reading would also fit
        let start = pdu(PCP_PDU_START_OR_ERROR, &hex!("00020200"));
        parse(&mut parser, 1, Direction::ToClient, &start);
        let sink = parse(&mut parser, 2, Direction::ToClient, &label_pdu(false));
        assert!(!sink.has_warning(WarningKind::AmbiguousEncoding));
        assert_eq!(
            sink.field("pcp.label.value").unwrap().value,
            Val::Str("\"linux\"".to_string())
        );
    }

    #[test]
    fn label_big_endian_without_capability_is_flagged_unverified() {
        let mut parser = PcpParser::new();
        let sink = parse(&mut parser, 1, Direction::ToClient, &label_pdu(false));
        assert!(sink.has_warning(WarningKind::AmbiguousEncoding));
        // geometry still decoded as big-endian
        assert_eq!(
            sink.field("pcp.label.value").unwrap().value,
            Val::Str("\"linux\"".to_string())
        );
    }

    #[test]
    fn result_value_block_with_offset_in_words() {
        let mut body = Vec::new();
        body.extend_from_slice(&hex!("00000000 00000000")); // when
        body.extend_from_slice(&1u32.to_be_bytes()); // numpmid
        body.extend_from_slice(&PMID.to_be_bytes());
        body.extend_from_slice(&1u32.to_be_bytes()); // numval
        body.extend_from_slice(&PM_VAL_DPTR.to_be_bytes());
        body.extend_from_slice(&hex!("ffffffff")); // inst
        body.extend_from_slice(&11u32.to_be_bytes()); // offset: 11 words = byte 44
        // block at absolute 44: STRING, length 9 (4 header + 5 chars)
        body.extend_from_slice(&hex!("06000009"));
        body.extend_from_slice(b"hello");
        while body.len() % 4 != 0 {
            body.push(0);
        }
        let data = pdu(PCP_PDU_RESULT, &body);
        let mut parser = PcpParser::new();
        let sink = parse(&mut parser, 1, Direction::ToClient, &data);
        let s = sink.field("pcp.value.string").unwrap();
        assert_eq!(s.value, Val::Str("hello".to_string()));
        assert_eq!((s.offset, s.length), (48, 5));
        assert_eq!(sink.field("pcp.value.length").unwrap().value, Val::U32(9));
    }

    #[test]
    fn result_negative_numval_is_per_metric_error() {
        let mut body = Vec::new();
        body.extend_from_slice(&hex!("00000000 00000000"));
        body.extend_from_slice(&1u32.to_be_bytes());
        body.extend_from_slice(&PMID.to_be_bytes());
        body.extend_from_slice(&(-12360i32).to_be_bytes()); // PM_ERR_INST
        let data = pdu(PCP_PDU_RESULT, &body);
        let mut parser = PcpParser::new();
        let sink = parse(&mut parser, 1, Direction::ToClient, &data);
        let nv = sink.field("pcp.numval").unwrap();
        assert!(nv.annotations.iter().any(|a| a.contains("PM_ERR_INST")));
    }

    #[test]
    fn unknown_pdu_type_fails() {
        let mut parser = PcpParser::new();
        let data = pdu(0x700b, &[]);
        let mut sink = TreeSink::new();
        let meta = PacketMeta::new(1, Direction::ToServer);
        assert_eq!(parser.parse_l4(&meta, &data, &mut sink), ParseResult::Fail);
    }

    #[test]
    fn truncated_pdu_flags_but_succeeds() {
        let mut parser = PcpParser::new();
        // FETCH announcing a pmid that is not in the capture
        let mut body = Vec::new();
        body.extend_from_slice(&hex!("00000000 00000000 00000000"));
        body.extend_from_slice(&2u32.to_be_bytes());
        body.extend_from_slice(&PMID.to_be_bytes());
        let data = pdu(PCP_PDU_FETCH, &body);
        let sink = parse(&mut parser, 1, Direction::ToServer, &data);
        assert!(sink.has_warning(WarningKind::Truncated));
    }

    #[test]
    fn probe_checks_length_and_type() {
        let l4 = L4Info {
            src_port: 12345,
            dst_port: 44321,
            l4_proto: 6,
        };
        let good = pdu(PCP_PDU_CREDS, &hex!("00000000"));
        assert_eq!(pcp_probe(&good, &l4), ProbeResult::Certain);
        let bad = pdu(0x1234, &[]);
        assert_eq!(pcp_probe(&bad, &l4), ProbeResult::NotForUs);
        assert_eq!(pcp_probe(&[0u8; 4], &l4), ProbeResult::Unsure);
    }
}
