//! NFS dissector: ONC-RPC envelope plus version dispatch.
//!
//! One [`NfsParser`] instance holds the state of one TCP conversation: the
//! xid-to-request map that pairs replies with their calls, the filehandle
//! name cache and the vendor handle registry. The RPC envelope is parsed
//! with nom; envelope fields are then emitted at their fixed offsets and
//! the program payload handed to the per-version body decoders.

use std::collections::HashMap;

use crate::buffer::{padded4, DecodeBuffer, DissectError, DissectResult};
use crate::fhandle::FhRegistry;
use crate::nfs3::{self, NfsCtx};
use crate::nfs4;
use crate::nfs_snoop::SnoopCache;
use crate::nfs_types::{nfs2_procedure_string, nfs3_procedure_string};
use crate::probe::{L4Info, ProbeL4, ProbeResult};
use crate::rparser::{PacketMeta, ParseResult, RBuilder, RParser};
use crate::rpc::{
    self, RpcBody, RpcCredData, RpcPacket, AUTH_UNIX, NFS_PROGRAM, RPC_MSG_REPLY,
};
use crate::tree::{FieldSink, WarningKind, ROOT};
use crate::variant::Variant;

pub struct NfsBuilder {}
impl RBuilder for NfsBuilder {
    fn build(&self) -> Box<dyn RParser> {
        Box::new(NfsParser::new())
    }
    fn get_l4_probe(&self) -> Option<ProbeL4> {
        Some(nfs_probe)
    }
}

/// What a reply needs to know about its call.
#[derive(Debug, Clone, Copy)]
struct RequestCtx {
    progver: u32,
    procedure: u32,
}

pub struct NfsParser {
    /// Calls seen, keyed by xid. A duplicate xid replaces the earlier
    /// entry: retransmissions carry the authoritative procedure.
    requests: HashMap<u32, RequestCtx>,
    snoop: SnoopCache,
    registry: FhRegistry,
    msgs_parsed: u32,
}

impl Default for NfsParser {
    fn default() -> Self {
        NfsParser::new()
    }
}

impl NfsParser {
    pub fn new() -> NfsParser {
        NfsParser {
            requests: HashMap::new(),
            snoop: SnoopCache::new(),
            registry: FhRegistry::new(),
            msgs_parsed: 0,
        }
    }

    fn emit_cred(
        &self,
        buf: &DecodeBuffer<'_>,
        offset: usize,
        field: &'static str,
        cred: &rpc::RpcCred<'_>,
        sink: &mut dyn FieldSink,
    ) -> usize {
        let total = 8 + padded4(cred.length as usize);
        let node = sink.emit(ROOT, field, offset, total, Variant::None);
        sink.emit(node, "rpc.auth.flavor", offset, 4, Variant::U32(cred.flavor));
        sink.emit(node, "rpc.auth.length", offset + 4, 4, Variant::U32(cred.length));
        let body = offset + 8;
        match &cred.data {
            RpcCredData::None => {}
            RpcCredData::Unix(unix) => {
                sink.emit(node, "rpc.auth.stamp", body, 4, Variant::U32(unix.stamp));
                let name_len = unix.machine_name.len();
                sink.emit(
                    node,
                    "rpc.auth.machine",
                    body + 4,
                    4 + name_len,
                    Variant::Bytes(unix.machine_name),
                );
                let after_name = body + 8 + padded4(name_len);
                sink.emit(node, "rpc.auth.uid", after_name, 4, Variant::U32(unix.uid));
                sink.emit(node, "rpc.auth.gid", after_name + 4, 4, Variant::U32(unix.gid));
                let mut gid_off = after_name + 12;
                for gid in &unix.aux_gids {
                    sink.emit(node, "rpc.auth.auxgid", gid_off, 4, Variant::U32(*gid));
                    gid_off += 4;
                }
            }
            RpcCredData::Opaque(data) => {
                sink.emit(node, "rpc.auth.opaque", body, data.len(), Variant::Bytes(data));
            }
        }
        if cred.flavor == AUTH_UNIX && matches!(cred.data, RpcCredData::Opaque(_)) {
            sink.flag(node, WarningKind::ProtocolViolation, "malformed AUTH_UNIX credential");
        }
        offset + total
    }

    fn dissect_call(
        &mut self,
        pkt: &RpcPacket<'_>,
        meta: &PacketMeta,
        buf: &DecodeBuffer<'_>,
        payload_off: usize,
        sink: &mut dyn FieldSink,
    ) -> DissectResult<()> {
        let call = match &pkt.body {
            RpcBody::Call(c) => c,
            RpcBody::Reply(_) => return Ok(()),
        };
        sink.emit(ROOT, "rpc.version", 12, 4, Variant::U32(call.rpcvers));
        sink.emit(ROOT, "rpc.program", 16, 4, Variant::U32(call.program));
        sink.emit(ROOT, "rpc.programversion", 20, 4, Variant::U32(call.progver));
        let proc_node = sink.emit(ROOT, "rpc.procedure", 24, 4, Variant::U32(call.procedure));
        let cred_end = self.emit_cred(buf, 28, "rpc.cred", &call.cred, sink);
        self.emit_cred(buf, cred_end, "rpc.verf", &call.verifier, sink);

        if meta.first_pass {
            self.requests.insert(
                pkt.xid,
                RequestCtx {
                    progver: call.progver,
                    procedure: call.procedure,
                },
            );
        }

        let mut ctx = NfsCtx {
            registry: &self.registry,
            snoop: &mut self.snoop,
            xid: pkt.xid,
            first_pass: meta.first_pass,
        };
        match call.progver {
            2 => {
                let name = nfs2_procedure_string(call.procedure);
                sink.annotate(proc_node, &format!("({})", name));
                sink.append_info(&format!("V2 {} Call", name));
                nfs3::dissect_v2_call(call.procedure, buf, payload_off, ROOT, sink, &mut ctx)?;
            }
            3 => {
                let name = nfs3_procedure_string(call.procedure);
                sink.annotate(proc_node, &format!("({})", name));
                sink.append_info(&format!("V3 {} Call", name));
                nfs3::dissect_v3_call(call.procedure, buf, payload_off, ROOT, sink, &mut ctx)?;
            }
            4 => {
                // procedure 0 NULL, 1 COMPOUND
                if call.procedure == 1 {
                    sink.annotate(proc_node, "(COMPOUND)");
                    nfs4::dissect_compound_call(buf, payload_off, ROOT, sink, &mut ctx)?;
                } else {
                    sink.annotate(proc_node, "(NULL)");
                    sink.append_info("V4 NULL Call");
                }
            }
            other => {
                sink.flag(
                    proc_node,
                    WarningKind::UnknownTag,
                    &format!("unsupported NFS version {}", other),
                );
            }
        }
        Ok(())
    }

    fn dissect_reply(
        &mut self,
        pkt: &RpcPacket<'_>,
        meta: &PacketMeta,
        buf: &DecodeBuffer<'_>,
        payload_off: usize,
        sink: &mut dyn FieldSink,
    ) -> DissectResult<()> {
        let reply = match &pkt.body {
            RpcBody::Reply(r) => r,
            RpcBody::Call(_) => return Ok(()),
        };
        sink.emit(ROOT, "rpc.replystate", 12, 4, Variant::U32(reply.reply_state));
        if reply.reply_state != 0 {
            sink.append_info("RPC denied");
            return Ok(());
        }
        if let Some(verf) = &reply.verifier {
            let verf_end = self.emit_cred(buf, 16, "rpc.verf", verf, sink);
            if let Some(state) = reply.accept_state {
                let node = sink.emit(ROOT, "rpc.acceptstate", verf_end, 4, Variant::U32(state));
                if state != 0 {
                    sink.annotate(node, "(call rejected)");
                    sink.append_info("RPC error");
                    return Ok(());
                }
            }
        }

        let req = match self.requests.get(&pkt.xid) {
            Some(r) => *r,
            None => {
                // reply to a call outside the capture; the payload cannot
                // be interpreted without the procedure number
                sink.flag(ROOT, WarningKind::UnknownTag, "reply without matching call");
                return Ok(());
            }
        };
        let mut ctx = NfsCtx {
            registry: &self.registry,
            snoop: &mut self.snoop,
            xid: pkt.xid,
            first_pass: meta.first_pass,
        };
        match req.progver {
            2 => {
                sink.append_info(&format!(
                    "V2 {} Reply",
                    nfs2_procedure_string(req.procedure)
                ));
                nfs3::dissect_v2_reply(req.procedure, buf, payload_off, ROOT, sink, &mut ctx)?;
            }
            3 => {
                sink.append_info(&format!(
                    "V3 {} Reply",
                    nfs3_procedure_string(req.procedure)
                ));
                nfs3::dissect_v3_reply(req.procedure, buf, payload_off, ROOT, sink, &mut ctx)?;
            }
            4 => {
                if req.procedure == 1 {
                    nfs4::dissect_compound_reply(buf, payload_off, ROOT, sink, &mut ctx)?;
                } else {
                    sink.append_info("V4 NULL Reply");
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl RParser for NfsParser {
    fn parse_l4(
        &mut self,
        meta: &PacketMeta,
        data: &[u8],
        sink: &mut dyn FieldSink,
    ) -> ParseResult {
        let (rem, pkt) = match rpc::parse_rpc(data) {
            Ok(r) => r,
            Err(e) => {
                debug!("rpc envelope parse failed: {:?}", e);
                return ParseResult::Fail;
            }
        };
        self.msgs_parsed += 1;
        let buf = DecodeBuffer::new(data);
        let payload_off = data.len() - rem.len();

        let frag = sink.emit(
            ROOT,
            "rpc.fraglen",
            0,
            4,
            Variant::U32(pkt.fragment_header.fragment_length),
        );
        if pkt.fragment_header.last_fragment {
            sink.annotate(frag, "(last fragment)");
        }
        sink.emit(ROOT, "rpc.xid", 4, 4, Variant::U32(pkt.xid));
        sink.emit(ROOT, "rpc.msgtyp", 8, 4, Variant::U32(pkt.msg_type));

        if let RpcBody::Call(call) = &pkt.body {
            if call.program != NFS_PROGRAM {
                debug!("RPC program {} is not NFS", call.program);
                return ParseResult::Fail;
            }
        }

        let r = if pkt.msg_type == RPC_MSG_REPLY {
            self.dissect_reply(&pkt, meta, &buf, payload_off, sink)
        } else {
            self.dissect_call(&pkt, meta, &buf, payload_off, sink)
        };
        if let Err(DissectError::OutOfBounds {
            offset,
            needed,
            available,
        }) = r
        {
            // keep everything emitted so far; the message is cut short
            sink.flag(
                ROOT,
                WarningKind::Truncated,
                &format!(
                    "message truncated: {} bytes needed at offset {}, {} captured",
                    needed, offset, available
                ),
            );
        }
        ParseResult::Ok
    }

    fn get(&self, key: &str) -> Option<Variant<'_>> {
        match key {
            "msgs_parsed" => Some(Variant::U32(self.msgs_parsed)),
            "requests_pending" => Some(Variant::U32(self.requests.len() as u32)),
            _ => None,
        }
    }

    fn keys(&self) -> ::std::slice::Iter<'_, &str> {
        ["msgs_parsed", "requests_pending"].iter()
    }
}

pub fn nfs_probe(i: &[u8], l4info: &L4Info) -> ProbeResult {
    match rpc::rpc_probe(i, l4info) {
        ProbeResult::Certain => {
            // program number sits at a fixed offset in calls
            match DecodeBuffer::new(i).u32_at(16, crate::buffer::ByteOrder::Big) {
                Ok(NFS_PROGRAM) => ProbeResult::Certain,
                Ok(_) => ProbeResult::NotForUs,
                Err(_) => ProbeResult::Unsure,
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rparser::Direction;
    use crate::tree::TreeSink;
    use hex_literal::hex;

    fn rpc_call_header(xid: u32, progver: u32, procedure: u32, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        let len = (24 + 16 + payload.len()) as u32;
        buf.extend_from_slice(&(0x8000_0000u32 | len).to_be_bytes());
        buf.extend_from_slice(&xid.to_be_bytes());
        buf.extend_from_slice(&hex!("00000000 00000002")); // call, rpcvers 2
        buf.extend_from_slice(&NFS_PROGRAM.to_be_bytes());
        buf.extend_from_slice(&progver.to_be_bytes());
        buf.extend_from_slice(&procedure.to_be_bytes());
        buf.extend_from_slice(&hex!("00000000 00000000")); // null cred
        buf.extend_from_slice(&hex!("00000000 00000000")); // null verf
        buf.extend_from_slice(payload);
        buf
    }

    fn rpc_reply_header(xid: u32, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&hex!("80000000"));
        buf.extend_from_slice(&xid.to_be_bytes());
        buf.extend_from_slice(&hex!("00000001 00000000")); // reply, accepted
        buf.extend_from_slice(&hex!("00000000 00000000")); // null verf
        buf.extend_from_slice(&hex!("00000000")); // success
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn v3_lookup_round_trip_names_the_handle() {
        let mut parser = NfsParser::new();

        // LOOKUP call: dir fh + name "passwd"
        let call_payload = hex!(
            "00000004 0a0b0c0d"
            "00000006 70617373 77640000"
        );
        let call = rpc_call_header(0x77, 3, 3, &call_payload);
        let meta = PacketMeta::new(1, Direction::ToServer);
        let mut sink = TreeSink::new();
        assert_eq!(parser.parse_l4(&meta, &call, &mut sink), ParseResult::Ok);
        assert!(sink.info().contains("V3 LOOKUP Call"));
        assert_eq!(sink.field("rpc.xid").unwrap().value, crate::tree::Val::U32(0x77));

        // LOOKUP reply: OK + object fh + no attributes
        let reply_payload = hex!(
            "00000000"
            "00000004 11121314"
            "00000000 00000000"
        );
        let reply = rpc_reply_header(0x77, &reply_payload);
        let meta = PacketMeta::new(2, Direction::ToClient);
        let mut sink = TreeSink::new();
        assert_eq!(parser.parse_l4(&meta, &reply, &mut sink), ParseResult::Ok);
        assert!(sink.info().contains("V3 LOOKUP Reply"));
        assert_eq!(parser.snoop.name_for(&hex!("11121314")), Some("passwd"));
        assert_eq!(parser.get("msgs_parsed"), Some(Variant::U32(2)));
    }

    #[test]
    fn truncated_payload_flags_but_succeeds() {
        let mut parser = NfsParser::new();
        // GETATTR call whose filehandle claims more bytes than captured
        let call = rpc_call_header(0x10, 3, 1, &hex!("000000ff 01020304"));
        let meta = PacketMeta::new(1, Direction::ToServer);
        let mut sink = TreeSink::new();
        assert_eq!(parser.parse_l4(&meta, &call, &mut sink), ParseResult::Ok);
        assert!(sink.has_warning(WarningKind::Truncated));
    }

    #[test]
    fn reply_without_call_is_flagged() {
        let mut parser = NfsParser::new();
        let reply = rpc_reply_header(0x999, &hex!("00000000"));
        let meta = PacketMeta::new(5, Direction::ToClient);
        let mut sink = TreeSink::new();
        assert_eq!(parser.parse_l4(&meta, &reply, &mut sink), ParseResult::Ok);
        assert!(sink.has_warning(WarningKind::UnknownTag));
    }

    #[test]
    fn non_nfs_program_rejected() {
        let mut parser = NfsParser::new();
        let mut call = rpc_call_header(0x1, 2, 0, &[]);
        // overwrite program with portmapper
        call[16..20].copy_from_slice(&100000u32.to_be_bytes());
        let meta = PacketMeta::new(1, Direction::ToServer);
        let mut sink = TreeSink::new();
        assert_eq!(parser.parse_l4(&meta, &call, &mut sink), ParseResult::Fail);
    }

    #[test]
    fn revisit_does_not_restage() {
        let mut parser = NfsParser::new();
        let call_payload = hex!("00000004 0a0b0c0d 00000003 61626300");
        let call = rpc_call_header(0x50, 3, 3, &call_payload);
        let meta = PacketMeta::new(1, Direction::ToServer);
        let mut sink = TreeSink::new();
        parser.parse_l4(&meta, &call, &mut sink);

        let reply = rpc_reply_header(0x50, &hex!("00000000 00000004 21222324 00000000 00000000"));
        let meta = PacketMeta::new(2, Direction::ToClient);
        let mut sink = TreeSink::new();
        parser.parse_l4(&meta, &reply, &mut sink);
        assert_eq!(parser.snoop.name_for(&hex!("21222324")), Some("abc"));

        // second display pass over the same frames
        let meta = PacketMeta::new(1, Direction::ToServer).revisit();
        let mut sink = TreeSink::new();
        parser.parse_l4(&meta, &call, &mut sink);
        let meta = PacketMeta::new(2, Direction::ToClient).revisit();
        let mut sink = TreeSink::new();
        parser.parse_l4(&meta, &reply, &mut sink);
        assert_eq!(parser.snoop.name_for(&hex!("21222324")), Some("abc"));
    }

    #[test]
    fn v4_compound_dispatch() {
        let mut parser = NfsParser::new();
        let mut payload = Vec::new();
        payload.extend_from_slice(&hex!("00000000 00000000 00000001"));
        payload.extend_from_slice(&hex!("00000018")); // PUTROOTFH
        let call = rpc_call_header(0x20, 4, 1, &payload);
        let meta = PacketMeta::new(1, Direction::ToServer);
        let mut sink = TreeSink::new();
        assert_eq!(parser.parse_l4(&meta, &call, &mut sink), ParseResult::Ok);
        assert!(sink.info().contains("V4 Call PUTROOTFH"));
    }
}
