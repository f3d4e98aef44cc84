//! NFSv4 COMPOUND bodies (RFC 7530, session ops from RFC 5661).
//!
//! A COMPOUND is a tagged sequence of operations sharing a current
//! filehandle. Operations are decoded in order; an opcode this module does
//! not know desynchronizes everything after it, so decoding stops there
//! with the progress made so far. Each decoded operation leaves an
//! [`OpRecord`] behind; after the walk the most significant tier present
//! decides which operations make it into the one-line summary.

use itertools::Itertools;

use crate::bitmap::{dissect_bitmap, BitNames, BitmapMode, BitmapSpec};
use crate::buffer::{ByteOrder, DecodeBuffer, DissectResult};
use crate::fhandle::fhandle_field;
use crate::nfs3::NfsCtx;
use crate::nfs_types::*;
use crate::tree::{FieldSink, NodeId, WarningKind};
use crate::variant::Variant;
use crate::xdr;

/// Ceiling on the declared operation count of one COMPOUND.
pub const MAX_COMPOUND_OPS: u32 = 128;

const NFS4ERR_DENIED: u32 = 10010;
const NFS4ERR_CLID_INUSE: u32 = 10017;

/// One operation seen while walking a COMPOUND.
#[derive(Debug)]
pub struct OpRecord {
    pub opcode: u32,
    pub name: &'static str,
    pub tier: u8,
    /// Per-operation status, replies only.
    pub status: Option<u32>,
    /// Human detail for the summary line (a looked-up name, an offset).
    pub summary: Option<String>,
    /// Set after the walk when this op's tier is the best in the message.
    pub headline: bool,
}

fn fattr4_spec() -> BitmapSpec {
    BitmapSpec {
        mask_field: "nfs.attr_mask",
        count_field: None,
        values_len_field: "nfs.attr_vals.length",
        names: Some(BitNames::Table(FATTR4_BIT_NAMES)),
    }
}

fn stateid4(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
) -> DissectResult<usize> {
    let node = sink.emit(parent, "nfs.stateid", offset, 16, Variant::None);
    let (o, _) = xdr::u32_field(buf, offset, node, sink, "nfs.stateid.seqid")?;
    let (o, _) = xdr::bytes_field(buf, o, 12, node, sink, "nfs.stateid.other")?;
    Ok(o)
}

/// 12-byte v4 timestamp: signed 64-bit seconds plus nanoseconds.
fn nfstime4(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    field: &'static str,
) -> DissectResult<usize> {
    let sec = buf.i64_at(offset, ByteOrder::Big)?;
    let nsec = buf.u32_at(offset + 8, ByteOrder::Big)?;
    let node = sink.emit(parent, field, offset, 12, Variant::None);
    sink.emit(node, "time.seconds", offset, 8, Variant::I64(sec));
    sink.emit(node, "time.nseconds", offset + 8, 4, Variant::U32(nsec));
    Ok(offset + 12)
}

fn settime4(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    field: &'static str,
) -> DissectResult<usize> {
    // 0 server time, 1 client-supplied time follows
    let (offset, how) = xdr::u32_field(buf, offset, parent, sink, "nfs.set_time_how")?;
    if how == 1 {
        nfstime4(buf, offset, parent, sink, field)
    } else {
        Ok(offset)
    }
}

fn change_info4(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
) -> DissectResult<usize> {
    let node = sink.emit(parent, "nfs.change_info", offset, 20, Variant::None);
    let (o, _) = xdr::bool_field(buf, offset, node, sink, "nfs.change_info.atomic")?;
    let (o, _) = xdr::u64_field(buf, o, node, sink, "nfs.changeid.before")?;
    let (o, _) = xdr::u64_field(buf, o, node, sink, "nfs.changeid.after")?;
    Ok(o)
}

fn component4(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
) -> DissectResult<(usize, String)> {
    let (o, raw) = xdr::string_field(buf, offset, parent, sink, "nfs.name.length", "nfs.component")?;
    Ok((o, String::from_utf8_lossy(raw).into_owned()))
}

fn verifier4(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
) -> DissectResult<usize> {
    let (o, _) = xdr::bytes_field(buf, offset, 8, parent, sink, "nfs.verifier")?;
    Ok(o)
}

fn sessionid4(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
) -> DissectResult<usize> {
    let (o, _) = xdr::bytes_field(buf, offset, 16, parent, sink, "nfs.sessionid")?;
    Ok(o)
}

fn lock_owner4(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
) -> DissectResult<usize> {
    let (o, _) = xdr::u64_field(buf, offset, parent, sink, "nfs.clientid")?;
    let (o, _) = xdr::opaque_field(buf, o, parent, sink, "nfs.owner.length", "nfs.owner")?;
    Ok(o)
}

/// Count-prefixed mask with no per-bit names or values, used for session
/// operation sets and layout notification types.
fn plain_mask_spec(field: &'static str) -> BitmapSpec {
    BitmapSpec {
        mask_field: field,
        count_field: None,
        values_len_field: "bitmap.value.length",
        names: None,
    }
}

fn channel_attrs4(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    field: &'static str,
) -> DissectResult<usize> {
    let node = sink.emit(parent, field, offset, 0, Variant::None);
    let (o, _) = xdr::u32_field(buf, offset, node, sink, "nfs.session.headerpadsize")?;
    let (o, _) = xdr::u32_field(buf, o, node, sink, "nfs.session.maxrequestsize")?;
    let (o, _) = xdr::u32_field(buf, o, node, sink, "nfs.session.maxresponsesize")?;
    let (o, _) = xdr::u32_field(buf, o, node, sink, "nfs.session.maxresponsesize_cached")?;
    let (o, _) = xdr::u32_field(buf, o, node, sink, "nfs.session.maxoperations")?;
    let (o, _) = xdr::u32_field(buf, o, node, sink, "nfs.session.maxrequests")?;
    let (mut o, ird) = xdr::u32_field(buf, o, node, sink, "nfs.session.rdma_ird.count")?;
    for _ in 0..ird {
        let (n, _) = xdr::u32_field(buf, o, node, sink, "nfs.session.rdma_ird")?;
        o = n;
    }
    Ok(o)
}

/// Optional implementation identity trailing EXCHANGE_ID in both
/// directions (at most one element on the wire).
fn nfs_impl_id4(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
) -> DissectResult<usize> {
    let (mut o, count) = xdr::u32_field(buf, offset, parent, sink, "nfs.impl_id.count")?;
    for _ in 0..count {
        let (n, _) = xdr::string_field(
            buf,
            o,
            parent,
            sink,
            "nfs.impl_id.domain.length",
            "nfs.impl_id.domain",
        )?;
        let (n, _) =
            xdr::string_field(buf, n, parent, sink, "nfs.impl_id.name.length", "nfs.impl_id.name")?;
        o = nfstime4(buf, n, parent, sink, "nfs.impl_id.date")?;
    }
    Ok(o)
}

fn nfsace4(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
) -> DissectResult<usize> {
    let node = sink.emit(parent, "nfs.ace", offset, 0, Variant::None);
    let (o, _) = xdr::u32_field(buf, offset, node, sink, "nfs.ace.type")?;
    let (o, _) = xdr::u32_field(buf, o, node, sink, "nfs.ace.flag")?;
    let (o, _) = xdr::u32_field(buf, o, node, sink, "nfs.ace.mask")?;
    let (o, _) = xdr::string_field(buf, o, node, sink, "nfs.ace.who.length", "nfs.ace.who")?;
    Ok(o)
}

/// Decode the value of one fattr4 attribute. Returning the input offset
/// unchanged tells the bitmap engine the attribute is unknown here.
fn fattr4_value(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    bit: u32,
    parent: NodeId,
    sink: &mut dyn FieldSink,
) -> DissectResult<usize> {
    let o = offset;
    match bit {
        0 => dissect_bitmap(buf, o, parent, sink, &fattr4_spec(), BitmapMode::MaskOnly),
        1 => xdr::u32_field(buf, o, parent, sink, "nfs.ftype4").map(|(o, _)| o),
        2 => xdr::u32_field(buf, o, parent, sink, "nfs.fattr4.fh_expire_type").map(|(o, _)| o),
        3 => xdr::u64_field(buf, o, parent, sink, "nfs.fattr4.changeid").map(|(o, _)| o),
        4 => xdr::u64_field(buf, o, parent, sink, "nfs.fattr4.size").map(|(o, _)| o),
        5 => xdr::bool_field(buf, o, parent, sink, "nfs.fattr4.link_support").map(|(o, _)| o),
        6 => xdr::bool_field(buf, o, parent, sink, "nfs.fattr4.symlink_support").map(|(o, _)| o),
        7 => xdr::bool_field(buf, o, parent, sink, "nfs.fattr4.named_attr").map(|(o, _)| o),
        8 => {
            let node = sink.emit(parent, "nfs.fattr4.fsid", o, 16, Variant::None);
            let (o, _) = xdr::u64_field(buf, o, node, sink, "nfs.fsid.major")?;
            let (o, _) = xdr::u64_field(buf, o, node, sink, "nfs.fsid.minor")?;
            Ok(o)
        }
        9 => xdr::bool_field(buf, o, parent, sink, "nfs.fattr4.unique_handles").map(|(o, _)| o),
        10 => xdr::u32_field(buf, o, parent, sink, "nfs.fattr4.lease_time").map(|(o, _)| o),
        11 => xdr::u32_field(buf, o, parent, sink, "nfs.fattr4.rdattr_error").map(|(o, _)| o),
        13 => xdr::u32_field(buf, o, parent, sink, "nfs.fattr4.aclsupport").map(|(o, _)| o),
        14 => xdr::bool_field(buf, o, parent, sink, "nfs.fattr4.archive").map(|(o, _)| o),
        15 => xdr::bool_field(buf, o, parent, sink, "nfs.fattr4.cansettime").map(|(o, _)| o),
        16 => xdr::bool_field(buf, o, parent, sink, "nfs.fattr4.case_insensitive").map(|(o, _)| o),
        17 => xdr::bool_field(buf, o, parent, sink, "nfs.fattr4.case_preserving").map(|(o, _)| o),
        18 => xdr::bool_field(buf, o, parent, sink, "nfs.fattr4.chown_restricted").map(|(o, _)| o),
        19 => xdr::opaque_field(buf, o, parent, sink, "fh.length", "fh.data").map(|(o, _)| o),
        20 => xdr::u64_field(buf, o, parent, sink, "nfs.fattr4.fileid").map(|(o, _)| o),
        21 => xdr::u64_field(buf, o, parent, sink, "nfs.fattr4.files_avail").map(|(o, _)| o),
        22 => xdr::u64_field(buf, o, parent, sink, "nfs.fattr4.files_free").map(|(o, _)| o),
        23 => xdr::u64_field(buf, o, parent, sink, "nfs.fattr4.files_total").map(|(o, _)| o),
        25 => xdr::bool_field(buf, o, parent, sink, "nfs.fattr4.hidden").map(|(o, _)| o),
        26 => xdr::bool_field(buf, o, parent, sink, "nfs.fattr4.homogeneous").map(|(o, _)| o),
        27 => xdr::u64_field(buf, o, parent, sink, "nfs.fattr4.maxfilesize").map(|(o, _)| o),
        28 => xdr::u32_field(buf, o, parent, sink, "nfs.fattr4.maxlink").map(|(o, _)| o),
        29 => xdr::u32_field(buf, o, parent, sink, "nfs.fattr4.maxname").map(|(o, _)| o),
        30 => xdr::u64_field(buf, o, parent, sink, "nfs.fattr4.maxread").map(|(o, _)| o),
        31 => xdr::u64_field(buf, o, parent, sink, "nfs.fattr4.maxwrite").map(|(o, _)| o),
        32 => xdr::string_field(buf, o, parent, sink, "nfs.fattr4.mimetype.length", "nfs.fattr4.mimetype")
            .map(|(o, _)| o),
        33 => xdr::u32_field(buf, o, parent, sink, "nfs.fattr4.mode").map(|(o, _)| o),
        34 => xdr::bool_field(buf, o, parent, sink, "nfs.fattr4.no_trunc").map(|(o, _)| o),
        35 => xdr::u32_field(buf, o, parent, sink, "nfs.fattr4.numlinks").map(|(o, _)| o),
        36 => xdr::string_field(buf, o, parent, sink, "nfs.fattr4.owner.length", "nfs.fattr4.owner")
            .map(|(o, _)| o),
        37 => xdr::string_field(
            buf,
            o,
            parent,
            sink,
            "nfs.fattr4.owner_group.length",
            "nfs.fattr4.owner_group",
        )
        .map(|(o, _)| o),
        38 => xdr::u64_field(buf, o, parent, sink, "nfs.fattr4.quota_hard").map(|(o, _)| o),
        39 => xdr::u64_field(buf, o, parent, sink, "nfs.fattr4.quota_soft").map(|(o, _)| o),
        40 => xdr::u64_field(buf, o, parent, sink, "nfs.fattr4.quota_used").map(|(o, _)| o),
        41 => {
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.specdata1")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.specdata2")?;
            Ok(o)
        }
        42 => xdr::u64_field(buf, o, parent, sink, "nfs.fattr4.space_avail").map(|(o, _)| o),
        43 => xdr::u64_field(buf, o, parent, sink, "nfs.fattr4.space_free").map(|(o, _)| o),
        44 => xdr::u64_field(buf, o, parent, sink, "nfs.fattr4.space_total").map(|(o, _)| o),
        45 => xdr::u64_field(buf, o, parent, sink, "nfs.fattr4.space_used").map(|(o, _)| o),
        46 => xdr::bool_field(buf, o, parent, sink, "nfs.fattr4.system").map(|(o, _)| o),
        47 => nfstime4(buf, o, parent, sink, "nfs.fattr4.time_access"),
        48 => settime4(buf, o, parent, sink, "nfs.fattr4.time_access"),
        49 => nfstime4(buf, o, parent, sink, "nfs.fattr4.time_backup"),
        50 => nfstime4(buf, o, parent, sink, "nfs.fattr4.time_create"),
        51 => nfstime4(buf, o, parent, sink, "nfs.fattr4.time_delta"),
        52 => nfstime4(buf, o, parent, sink, "nfs.fattr4.time_metadata"),
        53 => nfstime4(buf, o, parent, sink, "nfs.fattr4.time_modify"),
        54 => settime4(buf, o, parent, sink, "nfs.fattr4.time_modify"),
        55 => xdr::u64_field(buf, o, parent, sink, "nfs.fattr4.mounted_on_fileid").map(|(o, _)| o),
        _ => Ok(o),
    }
}

fn fattr4(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    with_values: bool,
) -> DissectResult<usize> {
    if with_values {
        dissect_bitmap(
            buf,
            offset,
            parent,
            sink,
            &fattr4_spec(),
            BitmapMode::WithValues(&mut fattr4_value),
        )
    } else {
        dissect_bitmap(buf, offset, parent, sink, &fattr4_spec(), BitmapMode::MaskOnly)
    }
}

fn status4(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
) -> DissectResult<(usize, u32)> {
    let v = buf.u32_at(offset, ByteOrder::Big)?;
    let node = sink.emit(parent, "nfs.nfsstat4", offset, 4, Variant::U32(v));
    sink.annotate(node, &format!("({})", nfs4_status_string(v)));
    sink.emit(parent, "nfs.status", offset, 4, Variant::U32(v));
    Ok((offset + 4, v))
}

/// Decode one operation's arguments. `Ok(None)` means no decoder exists
/// for this opcode at this minor version; the caller stops the walk.
fn dissect_op_call(
    opcode: u32,
    minorversion: u32,
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    ctx: &mut NfsCtx<'_>,
    cfh: &mut Option<Vec<u8>>,
) -> DissectResult<Option<(usize, Option<String>)>> {
    if minorversion == 0 && (NFSPROC4_BACKCHANNEL_CTL..=NFS4_LAST_OP).contains(&opcode) {
        // session ops in a minor version 0 compound cannot be trusted
        return Ok(None);
    }
    let r = match opcode {
        NFSPROC4_ACCESS => {
            let (o, _) = xdr::u32_field(buf, offset, parent, sink, "nfs.access_check")?;
            (o, None)
        }
        NFSPROC4_CLOSE => {
            let (o, _) = xdr::u32_field(buf, offset, parent, sink, "nfs.seqid")?;
            (stateid4(buf, o, parent, sink)?, None)
        }
        NFSPROC4_COMMIT => {
            let (o, off) = xdr::u64_field(buf, offset, parent, sink, "nfs.offset4")?;
            let (o, count) = xdr::u32_field(buf, o, parent, sink, "nfs.count4")?;
            (o, Some(format!("Offset: {} Len: {}", off, count)))
        }
        NFSPROC4_CREATE => {
            let (o, ftype) = xdr::u32_field(buf, offset, parent, sink, "nfs.ftype4")?;
            let o = match ftype {
                // NF4LNK carries the target path
                5 => {
                    let (o, _) = xdr::string_field(
                        buf,
                        o,
                        parent,
                        sink,
                        "nfs.symlink.length",
                        "nfs.symlink.to",
                    )?;
                    o
                }
                // NF4BLK / NF4CHR carry device numbers
                3 | 4 => {
                    let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.specdata1")?;
                    let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.specdata2")?;
                    o
                }
                _ => o,
            };
            let (o, name) = component4(buf, o, parent, sink)?;
            ctx.snoop.stage(ctx.xid, cfh.as_deref(), &name, ctx.first_pass);
            let o = fattr4(buf, o, parent, sink, true)?;
            (o, Some(name))
        }
        NFSPROC4_DELEGPURGE | NFSPROC4_RENEW | NFSPROC4_DESTROY_CLIENTID => {
            let (o, _) = xdr::u64_field(buf, offset, parent, sink, "nfs.clientid")?;
            (o, None)
        }
        NFSPROC4_DELEGRETURN | NFSPROC4_FREE_STATEID => {
            (stateid4(buf, offset, parent, sink)?, None)
        }
        NFSPROC4_GETATTR => (fattr4(buf, offset, parent, sink, false)?, None),
        NFSPROC4_GETFH | NFSPROC4_LOOKUPP | NFSPROC4_READLINK | NFSPROC4_PUTPUBFH
        | NFSPROC4_PUTROOTFH | NFSPROC4_RESTOREFH | NFSPROC4_SAVEFH | NFSPROC4_ILLEGAL => {
            (offset, None)
        }
        NFSPROC4_LINK => {
            let (o, name) = component4(buf, offset, parent, sink)?;
            (o, Some(name))
        }
        NFSPROC4_LOCK => {
            let (o, _) = xdr::u32_field(buf, offset, parent, sink, "nfs.locktype")?;
            let (o, _) = xdr::bool_field(buf, o, parent, sink, "nfs.lock.reclaim")?;
            let (o, _) = xdr::u64_field(buf, o, parent, sink, "nfs.offset4")?;
            let (o, _) = xdr::u64_field(buf, o, parent, sink, "nfs.length4")?;
            let (o, new_owner) = xdr::bool_field(buf, o, parent, sink, "nfs.lock.new_owner")?;
            let o = if new_owner {
                let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.open_seqid")?;
                let o = stateid4(buf, o, parent, sink)?;
                let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.lock_seqid")?;
                lock_owner4(buf, o, parent, sink)?
            } else {
                let o = stateid4(buf, o, parent, sink)?;
                let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.lock_seqid")?;
                o
            };
            (o, None)
        }
        NFSPROC4_LOCKT => {
            let (o, _) = xdr::u32_field(buf, offset, parent, sink, "nfs.locktype")?;
            let (o, _) = xdr::u64_field(buf, o, parent, sink, "nfs.offset4")?;
            let (o, _) = xdr::u64_field(buf, o, parent, sink, "nfs.length4")?;
            (lock_owner4(buf, o, parent, sink)?, None)
        }
        NFSPROC4_LOCKU => {
            let (o, _) = xdr::u32_field(buf, offset, parent, sink, "nfs.locktype")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.seqid")?;
            let o = stateid4(buf, o, parent, sink)?;
            let (o, _) = xdr::u64_field(buf, o, parent, sink, "nfs.offset4")?;
            let (o, _) = xdr::u64_field(buf, o, parent, sink, "nfs.length4")?;
            (o, None)
        }
        NFSPROC4_LOOKUP => {
            let (o, name) = component4(buf, offset, parent, sink)?;
            ctx.snoop.stage(ctx.xid, cfh.as_deref(), &name, ctx.first_pass);
            (o, Some(name))
        }
        NFSPROC4_NVERIFY | NFSPROC4_VERIFY => (fattr4(buf, offset, parent, sink, true)?, None),
        NFSPROC4_OPEN => {
            let (o, _) = xdr::u32_field(buf, offset, parent, sink, "nfs.seqid")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.open.share_access")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.open.share_deny")?;
            let o = lock_owner4(buf, o, parent, sink)?;
            let (o, opentype) = xdr::u32_field(buf, o, parent, sink, "nfs.open.opentype")?;
            let o = if opentype == 1 {
                let (o, mode) = xdr::u32_field(buf, o, parent, sink, "nfs.createmode4")?;
                match mode {
                    0 | 1 => fattr4(buf, o, parent, sink, true)?,
                    2 => verifier4(buf, o, parent, sink)?,
                    // EXCLUSIVE4_1: verifier plus attributes
                    _ => {
                        let o = verifier4(buf, o, parent, sink)?;
                        fattr4(buf, o, parent, sink, true)?
                    }
                }
            } else {
                o
            };
            let (o, claim) = xdr::u32_field(buf, o, parent, sink, "nfs.open.claim_type")?;
            match claim {
                0 => {
                    let (o, name) = component4(buf, o, parent, sink)?;
                    ctx.snoop.stage(ctx.xid, cfh.as_deref(), &name, ctx.first_pass);
                    (o, Some(name))
                }
                1 => {
                    let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.open.delegate_type")?;
                    (o, None)
                }
                2 => {
                    let o = stateid4(buf, o, parent, sink)?;
                    let (o, name) = component4(buf, o, parent, sink)?;
                    (o, Some(name))
                }
                3 => {
                    let (o, name) = component4(buf, o, parent, sink)?;
                    (o, Some(name))
                }
                // CLAIM_FH family (4.1): current filehandle is the target
                4 | 6 => (o, None),
                5 => (stateid4(buf, o, parent, sink)?, None),
                _ => return Ok(None),
            }
        }
        NFSPROC4_OPENATTR => {
            let (o, _) = xdr::bool_field(buf, offset, parent, sink, "nfs.openattr.createdir")?;
            (o, None)
        }
        NFSPROC4_OPEN_CONFIRM => {
            let o = stateid4(buf, offset, parent, sink)?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.seqid")?;
            (o, None)
        }
        NFSPROC4_OPEN_DOWNGRADE => {
            let o = stateid4(buf, offset, parent, sink)?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.seqid")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.open.share_access")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.open.share_deny")?;
            (o, None)
        }
        NFSPROC4_PUTFH => {
            let node = sink.emit(parent, "nfs.fh", offset, 0, Variant::None);
            let (o, fh) = fhandle_field(buf, offset, node, sink, ctx.registry)?;
            if let Some((path, _)) = ctx.snoop.full_name(fh) {
                sink.annotate(node, &path);
            }
            *cfh = Some(fh.to_vec());
            (o, None)
        }
        NFSPROC4_READ => {
            let o = stateid4(buf, offset, parent, sink)?;
            let (o, off) = xdr::u64_field(buf, o, parent, sink, "nfs.offset4")?;
            let (o, count) = xdr::u32_field(buf, o, parent, sink, "nfs.count4")?;
            (o, Some(format!("Offset: {} Len: {}", off, count)))
        }
        NFSPROC4_READDIR => {
            let (o, _) = xdr::u64_field(buf, offset, parent, sink, "nfs.cookie4")?;
            let o = verifier4(buf, o, parent, sink)?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.dircount")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.maxcount")?;
            (fattr4(buf, o, parent, sink, false)?, None)
        }
        NFSPROC4_REMOVE => {
            let (o, name) = component4(buf, offset, parent, sink)?;
            (o, Some(name))
        }
        NFSPROC4_RENAME => {
            let (o, old) = component4(buf, offset, parent, sink)?;
            let (o, new) = component4(buf, o, parent, sink)?;
            (o, Some(format!("{} -> {}", old, new)))
        }
        NFSPROC4_SECINFO => {
            let (o, name) = component4(buf, offset, parent, sink)?;
            (o, Some(name))
        }
        NFSPROC4_SETATTR => {
            let o = stateid4(buf, offset, parent, sink)?;
            (fattr4(buf, o, parent, sink, true)?, None)
        }
        NFSPROC4_SETCLIENTID => {
            let o = verifier4(buf, offset, parent, sink)?;
            let (o, _) =
                xdr::string_field(buf, o, parent, sink, "nfs.client_id.length", "nfs.client_id")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.cb.program")?;
            let (o, _) = xdr::string_field(buf, o, parent, sink, "nfs.cb.netid.length", "nfs.cb.netid")?;
            let (o, _) = xdr::string_field(buf, o, parent, sink, "nfs.cb.addr.length", "nfs.cb.addr")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.cb.ident")?;
            (o, None)
        }
        NFSPROC4_SETCLIENTID_CONFIRM => {
            let (o, _) = xdr::u64_field(buf, offset, parent, sink, "nfs.clientid")?;
            (verifier4(buf, o, parent, sink)?, None)
        }
        NFSPROC4_WRITE => {
            let o = stateid4(buf, offset, parent, sink)?;
            let (o, off) = xdr::u64_field(buf, o, parent, sink, "nfs.offset4")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.write.stable")?;
            let (o, data) = xdr::opaque_field(buf, o, parent, sink, "nfs.data.length", "nfs.data")?;
            (o, Some(format!("Offset: {} Len: {}", off, data.len())))
        }
        NFSPROC4_RELEASE_LOCKOWNER => (lock_owner4(buf, offset, parent, sink)?, None),
        NFSPROC4_BIND_CONN_TO_SESSION => {
            let o = sessionid4(buf, offset, parent, sink)?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.bctsa.dir")?;
            let (o, _) = xdr::bool_field(buf, o, parent, sink, "nfs.bctsa.use_conn_in_rdma_mode")?;
            (o, None)
        }
        NFSPROC4_DESTROY_SESSION => (sessionid4(buf, offset, parent, sink)?, None),
        NFSPROC4_SECINFO_NO_NAME => {
            let (o, _) = xdr::u32_field(buf, offset, parent, sink, "nfs.secinfo.style")?;
            (o, None)
        }
        NFSPROC4_SEQUENCE => {
            let o = sessionid4(buf, offset, parent, sink)?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.seqid")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.slotid")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.highest_slotid")?;
            let (o, _) = xdr::bool_field(buf, o, parent, sink, "nfs.cachethis")?;
            (o, None)
        }
        NFSPROC4_TEST_STATEID => {
            let (mut o, count) = xdr::u32_field(buf, offset, parent, sink, "nfs.stateid.count")?;
            for _ in 0..count {
                o = stateid4(buf, o, parent, sink)?;
            }
            (o, None)
        }
        NFSPROC4_RECLAIM_COMPLETE => {
            let (o, _) = xdr::bool_field(buf, offset, parent, sink, "nfs.reclaim_one_fs")?;
            (o, None)
        }
        NFSPROC4_EXCHANGE_ID => {
            let o = verifier4(buf, offset, parent, sink)?;
            let (o, _) = xdr::opaque_field(buf, o, parent, sink, "nfs.owner.length", "nfs.owner")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.exchange_id.flags")?;
            let (o, spa_how) = xdr::u32_field(buf, o, parent, sink, "nfs.state_protect.how")?;
            let o = match spa_how {
                0 => o,
                1 => {
                    let o = dissect_bitmap(
                        buf,
                        o,
                        parent,
                        sink,
                        &plain_mask_spec("nfs.spo_must_enforce"),
                        BitmapMode::MaskOnly,
                    )?;
                    dissect_bitmap(
                        buf,
                        o,
                        parent,
                        sink,
                        &plain_mask_spec("nfs.spo_must_allow"),
                        BitmapMode::MaskOnly,
                    )?
                }
                // SP4_SSV state protection is not decoded here
                _ => return Ok(None),
            };
            (nfs_impl_id4(buf, o, parent, sink)?, None)
        }
        NFSPROC4_CREATE_SESSION => {
            let (o, _) = xdr::u64_field(buf, offset, parent, sink, "nfs.clientid")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.seqid")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.session.flags")?;
            let o = channel_attrs4(buf, o, parent, sink, "nfs.session.fore_chan_attrs")?;
            let o = channel_attrs4(buf, o, parent, sink, "nfs.session.back_chan_attrs")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.cb.program")?;
            let (mut o, count) = xdr::u32_field(buf, o, parent, sink, "nfs.cb.secparms.count")?;
            for _ in 0..count {
                let (n, flavor) = xdr::u32_field(buf, o, parent, sink, "nfs.cb.secparms.flavor")?;
                o = match flavor {
                    0 => n,
                    1 => {
                        let (n, _) = xdr::u32_field(buf, n, parent, sink, "nfs.cb.auth.stamp")?;
                        let (n, _) = xdr::string_field(
                            buf,
                            n,
                            parent,
                            sink,
                            "nfs.cb.auth.machine.length",
                            "nfs.cb.auth.machine",
                        )?;
                        let (n, _) = xdr::u32_field(buf, n, parent, sink, "nfs.cb.auth.uid")?;
                        let (n, _) = xdr::u32_field(buf, n, parent, sink, "nfs.cb.auth.gid")?;
                        let (mut n, gids) =
                            xdr::u32_field(buf, n, parent, sink, "nfs.cb.auth.gids.count")?;
                        for _ in 0..gids {
                            let (m, _) = xdr::u32_field(buf, n, parent, sink, "nfs.cb.auth.gid")?;
                            n = m;
                        }
                        n
                    }
                    // RPCSEC_GSS callback parameters are not decoded here
                    _ => return Ok(None),
                };
            }
            (o, None)
        }
        NFSPROC4_LAYOUTGET => {
            let (o, _) = xdr::bool_field(buf, offset, parent, sink, "nfs.layout.avail")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.layout.type")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.layout.iomode")?;
            let (o, off) = xdr::u64_field(buf, o, parent, sink, "nfs.offset4")?;
            let (o, len) = xdr::u64_field(buf, o, parent, sink, "nfs.length4")?;
            let (o, _) = xdr::u64_field(buf, o, parent, sink, "nfs.layout.minlength")?;
            let o = stateid4(buf, o, parent, sink)?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.maxcount")?;
            (o, Some(format!("Offset: {} Len: {}", off, len)))
        }
        NFSPROC4_LAYOUTRETURN => {
            let (o, _) = xdr::bool_field(buf, offset, parent, sink, "nfs.layout.reclaim")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.layout.type")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.layout.iomode")?;
            let (o, rtype) = xdr::u32_field(buf, o, parent, sink, "nfs.layout.returntype")?;
            // LAYOUTRETURN4_FILE carries a byte range and layout-specific body
            let o = if rtype == 1 {
                let (o, _) = xdr::u64_field(buf, o, parent, sink, "nfs.offset4")?;
                let (o, _) = xdr::u64_field(buf, o, parent, sink, "nfs.length4")?;
                let o = stateid4(buf, o, parent, sink)?;
                let (o, _) = xdr::opaque_field(
                    buf,
                    o,
                    parent,
                    sink,
                    "nfs.layout.body.length",
                    "nfs.layout.body",
                )?;
                o
            } else {
                o
            };
            (o, None)
        }
        NFSPROC4_GETDEVINFO => {
            let (o, _) = xdr::bytes_field(buf, offset, 16, parent, sink, "nfs.deviceid")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.layout.type")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.maxcount")?;
            let o = dissect_bitmap(
                buf,
                o,
                parent,
                sink,
                &plain_mask_spec("nfs.notify_mask"),
                BitmapMode::MaskOnly,
            )?;
            (o, None)
        }
        _ => return Ok(None),
    };
    Ok(Some(r))
}

/// Decode one operation's result, status included. Same `Ok(None)`
/// convention as [`dissect_op_call`].
fn dissect_op_reply(
    opcode: u32,
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    ctx: &mut NfsCtx<'_>,
) -> DissectResult<Option<(usize, u32)>> {
    let (offset, status) = status4(buf, offset, parent, sink)?;
    let ok = status == 0;
    let end = match opcode {
        NFSPROC4_ACCESS if ok => {
            let (o, _) = xdr::u32_field(buf, offset, parent, sink, "nfs.access_supported")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.access_allowed")?;
            o
        }
        NFSPROC4_CLOSE | NFSPROC4_LOCKU | NFSPROC4_OPEN_CONFIRM | NFSPROC4_OPEN_DOWNGRADE
            if ok =>
        {
            stateid4(buf, offset, parent, sink)?
        }
        NFSPROC4_COMMIT if ok => verifier4(buf, offset, parent, sink)?,
        NFSPROC4_CREATE if ok => {
            let o = change_info4(buf, offset, parent, sink)?;
            fattr4(buf, o, parent, sink, false)?
        }
        NFSPROC4_GETATTR if ok => fattr4(buf, offset, parent, sink, true)?,
        NFSPROC4_GETFH if ok => {
            let node = sink.emit(parent, "nfs.fh", offset, 0, Variant::None);
            let (o, fh) = fhandle_field(buf, offset, node, sink, ctx.registry)?;
            ctx.snoop.resolve(ctx.xid, fh, ctx.first_pass);
            if let Some((path, _)) = ctx.snoop.full_name(fh) {
                sink.annotate(node, &path);
            }
            o
        }
        NFSPROC4_LINK | NFSPROC4_REMOVE if ok => change_info4(buf, offset, parent, sink)?,
        NFSPROC4_LOCK if ok => stateid4(buf, offset, parent, sink)?,
        NFSPROC4_LOCK | NFSPROC4_LOCKT if status == NFS4ERR_DENIED => {
            let (o, _) = xdr::u64_field(buf, offset, parent, sink, "nfs.offset4")?;
            let (o, _) = xdr::u64_field(buf, o, parent, sink, "nfs.length4")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.locktype")?;
            lock_owner4(buf, o, parent, sink)?
        }
        NFSPROC4_OPEN if ok => {
            let o = stateid4(buf, offset, parent, sink)?;
            let o = change_info4(buf, o, parent, sink)?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.open.rflags")?;
            let o = fattr4(buf, o, parent, sink, false)?;
            let (o, dtype) = xdr::u32_field(buf, o, parent, sink, "nfs.open.delegate_type")?;
            match dtype {
                1 => {
                    let o = stateid4(buf, o, parent, sink)?;
                    let (o, _) = xdr::bool_field(buf, o, parent, sink, "nfs.open.recall")?;
                    nfsace4(buf, o, parent, sink)?
                }
                2 => {
                    let o = stateid4(buf, o, parent, sink)?;
                    let (o, _) = xdr::bool_field(buf, o, parent, sink, "nfs.open.recall")?;
                    let (o, limitby) = xdr::u32_field(buf, o, parent, sink, "nfs.open.limitby")?;
                    let o = match limitby {
                        1 => {
                            let (o, _) =
                                xdr::u64_field(buf, o, parent, sink, "nfs.open.limit_size")?;
                            o
                        }
                        2 => {
                            let (o, _) =
                                xdr::u32_field(buf, o, parent, sink, "nfs.open.limit_blocks")?;
                            let (o, _) = xdr::u32_field(
                                buf,
                                o,
                                parent,
                                sink,
                                "nfs.open.limit_block_size",
                            )?;
                            o
                        }
                        _ => o,
                    };
                    nfsace4(buf, o, parent, sink)?
                }
                _ => o,
            }
        }
        NFSPROC4_READ if ok => {
            let (o, _) = xdr::bool_field(buf, offset, parent, sink, "nfs.read.eof")?;
            let (o, _) = xdr::opaque_field(buf, o, parent, sink, "nfs.data.length", "nfs.data")?;
            o
        }
        NFSPROC4_READDIR if ok => {
            let mut o = verifier4(buf, offset, parent, sink)?;
            loop {
                let (next, follows) = xdr::bool_field(buf, o, parent, sink, "nfs.value_follows")?;
                o = next;
                if !follows {
                    break;
                }
                let entry = sink.emit(parent, "nfs.readdir.entry", o, 0, Variant::None);
                let (next, _) = xdr::u64_field(buf, o, entry, sink, "nfs.cookie4")?;
                let (next, _) = xdr::string_field(
                    buf,
                    next,
                    entry,
                    sink,
                    "nfs.name.length",
                    "nfs.readdir.entry.name",
                )?;
                o = fattr4(buf, next, entry, sink, true)?;
            }
            let (o, _) = xdr::bool_field(buf, o, parent, sink, "nfs.readdir.eof")?;
            o
        }
        NFSPROC4_READLINK if ok => {
            let (o, _) =
                xdr::string_field(buf, offset, parent, sink, "nfs.symlink.length", "nfs.symlink.to")?;
            o
        }
        NFSPROC4_RENAME if ok => {
            let o = change_info4(buf, offset, parent, sink)?;
            change_info4(buf, o, parent, sink)?
        }
        NFSPROC4_SECINFO | NFSPROC4_SECINFO_NO_NAME if ok => {
            let (mut o, count) = xdr::u32_field(buf, offset, parent, sink, "nfs.secinfo.count")?;
            for _ in 0..count {
                let (next, flavor) = xdr::u32_field(buf, o, parent, sink, "nfs.secinfo.flavor")?;
                o = next;
                // RPCSEC_GSS carries mechanism parameters
                if flavor == 6 {
                    let (next, _) =
                        xdr::opaque_field(buf, o, parent, sink, "nfs.secinfo.oid.length", "nfs.secinfo.oid")?;
                    let (next, _) = xdr::u32_field(buf, next, parent, sink, "nfs.secinfo.qop")?;
                    let (next, _) =
                        xdr::u32_field(buf, next, parent, sink, "nfs.secinfo.service")?;
                    o = next;
                }
            }
            o
        }
        NFSPROC4_SETATTR => fattr4(buf, offset, parent, sink, false)?,
        NFSPROC4_SETCLIENTID if ok => {
            let (o, _) = xdr::u64_field(buf, offset, parent, sink, "nfs.clientid")?;
            verifier4(buf, o, parent, sink)?
        }
        NFSPROC4_SETCLIENTID if status == NFS4ERR_CLID_INUSE => {
            let (o, _) =
                xdr::string_field(buf, offset, parent, sink, "nfs.cb.netid.length", "nfs.cb.netid")?;
            let (o, _) = xdr::string_field(buf, o, parent, sink, "nfs.cb.addr.length", "nfs.cb.addr")?;
            o
        }
        NFSPROC4_WRITE if ok => {
            let (o, _) = xdr::u32_field(buf, offset, parent, sink, "nfs.count4")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.write.committed")?;
            verifier4(buf, o, parent, sink)?
        }
        NFSPROC4_BIND_CONN_TO_SESSION if ok => {
            let o = sessionid4(buf, offset, parent, sink)?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.bctsa.dir")?;
            let (o, _) = xdr::bool_field(buf, o, parent, sink, "nfs.bctsa.use_conn_in_rdma_mode")?;
            o
        }
        NFSPROC4_SEQUENCE if ok => {
            let o = sessionid4(buf, offset, parent, sink)?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.seqid")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.slotid")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.highest_slotid")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.target_highest_slotid")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.sequence.status_flags")?;
            o
        }
        NFSPROC4_TEST_STATEID if ok => {
            let (mut o, count) = xdr::u32_field(buf, offset, parent, sink, "nfs.stateid.count")?;
            for _ in 0..count {
                let (next, _) = xdr::u32_field(buf, o, parent, sink, "nfs.stateid.status")?;
                o = next;
            }
            o
        }
        NFSPROC4_EXCHANGE_ID if ok => {
            let (o, _) = xdr::u64_field(buf, offset, parent, sink, "nfs.clientid")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.seqid")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.exchange_id.flags")?;
            let (o, spr_how) = xdr::u32_field(buf, o, parent, sink, "nfs.state_protect.how")?;
            let o = match spr_how {
                0 => o,
                1 => {
                    let o = dissect_bitmap(
                        buf,
                        o,
                        parent,
                        sink,
                        &plain_mask_spec("nfs.spo_must_enforce"),
                        BitmapMode::MaskOnly,
                    )?;
                    dissect_bitmap(
                        buf,
                        o,
                        parent,
                        sink,
                        &plain_mask_spec("nfs.spo_must_allow"),
                        BitmapMode::MaskOnly,
                    )?
                }
                _ => return Ok(None),
            };
            let (o, _) = xdr::u64_field(buf, o, parent, sink, "nfs.server_owner.minor_id")?;
            let (o, _) = xdr::opaque_field(
                buf,
                o,
                parent,
                sink,
                "nfs.server_owner.major_id.length",
                "nfs.server_owner.major_id",
            )?;
            let (o, _) = xdr::opaque_field(
                buf,
                o,
                parent,
                sink,
                "nfs.server_scope.length",
                "nfs.server_scope",
            )?;
            nfs_impl_id4(buf, o, parent, sink)?
        }
        NFSPROC4_CREATE_SESSION if ok => {
            let o = sessionid4(buf, offset, parent, sink)?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.seqid")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.session.flags")?;
            let o = channel_attrs4(buf, o, parent, sink, "nfs.session.fore_chan_attrs")?;
            channel_attrs4(buf, o, parent, sink, "nfs.session.back_chan_attrs")?
        }
        NFSPROC4_LAYOUTGET if ok => {
            let (o, _) = xdr::bool_field(buf, offset, parent, sink, "nfs.layout.return_on_close")?;
            let o = stateid4(buf, o, parent, sink)?;
            let (mut o, count) = xdr::u32_field(buf, o, parent, sink, "nfs.layout.count")?;
            for _ in 0..count {
                let node = sink.emit(parent, "nfs.layout", o, 0, Variant::None);
                let (n, _) = xdr::u64_field(buf, o, node, sink, "nfs.offset4")?;
                let (n, _) = xdr::u64_field(buf, n, node, sink, "nfs.length4")?;
                let (n, _) = xdr::u32_field(buf, n, node, sink, "nfs.layout.iomode")?;
                let (n, _) = xdr::u32_field(buf, n, node, sink, "nfs.layout.type")?;
                let (n, _) = xdr::opaque_field(
                    buf,
                    n,
                    node,
                    sink,
                    "nfs.layout.body.length",
                    "nfs.layout.body",
                )?;
                o = n;
            }
            o
        }
        NFSPROC4_LAYOUTRETURN if ok => {
            let (o, present) = xdr::bool_field(buf, offset, parent, sink, "nfs.value_follows")?;
            if present {
                stateid4(buf, o, parent, sink)?
            } else {
                o
            }
        }
        NFSPROC4_GETDEVINFO if ok => {
            let (o, _) = xdr::u32_field(buf, offset, parent, sink, "nfs.layout.type")?;
            let (o, _) = xdr::opaque_field(
                buf,
                o,
                parent,
                sink,
                "nfs.deviceaddr.length",
                "nfs.deviceaddr",
            )?;
            dissect_bitmap(
                buf,
                o,
                parent,
                sink,
                &plain_mask_spec("nfs.notify_mask"),
                BitmapMode::MaskOnly,
            )?
        }
        NFSPROC4_ILLEGAL
        | NFSPROC4_LOCKT
        | NFSPROC4_LOOKUP
        | NFSPROC4_LOOKUPP
        | NFSPROC4_NVERIFY
        | NFSPROC4_VERIFY
        | NFSPROC4_PUTFH
        | NFSPROC4_PUTPUBFH
        | NFSPROC4_PUTROOTFH
        | NFSPROC4_RENEW
        | NFSPROC4_RESTOREFH
        | NFSPROC4_SAVEFH
        | NFSPROC4_DELEGPURGE
        | NFSPROC4_DELEGRETURN
        | NFSPROC4_OPENATTR
        | NFSPROC4_RELEASE_LOCKOWNER
        | NFSPROC4_SETCLIENTID_CONFIRM
        | NFSPROC4_FREE_STATEID
        | NFSPROC4_DESTROY_SESSION
        | NFSPROC4_DESTROY_CLIENTID
        | NFSPROC4_RECLAIM_COMPLETE => offset,
        // failed ops with no error body end at their status word
        _ if !ok => offset,
        _ => return Ok(None),
    };
    Ok(Some((end, status)))
}

fn mark_headlines(records: &mut [OpRecord]) {
    if let Some(min) = records.iter().map(|r| r.tier).min() {
        for r in records.iter_mut() {
            r.headline = r.tier == min;
        }
    }
}

fn headline_text(records: &[OpRecord]) -> String {
    records
        .iter()
        .filter(|r| r.headline)
        .map(|r| match &r.summary {
            Some(s) => format!("{} {}", r.name, s),
            None => r.name.to_string(),
        })
        .join(" ")
}

fn opcode_field(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
) -> DissectResult<(usize, u32, NodeId)> {
    let opcode = buf.u32_at(offset, ByteOrder::Big)?;
    let node = sink.emit(parent, "nfs.opcode", offset, 4, Variant::U32(opcode));
    sink.annotate(node, &format!("({})", nfs4_op_name(opcode)));
    Ok((offset + 4, opcode, node))
}

fn known_opcode(opcode: u32) -> bool {
    (NFS4_FIRST_OP..=NFS4_LAST_OP).contains(&opcode) || opcode == NFSPROC4_ILLEGAL
}

fn ops_count(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
) -> DissectResult<(usize, u32)> {
    let (offset, mut count) = xdr::u32_field(buf, offset, parent, sink, "nfs.ops.count")?;
    if count > MAX_COMPOUND_OPS {
        sink.flag(
            parent,
            WarningKind::ProtocolViolation,
            &format!(
                "compound declares {} operations (limit {}), clamping",
                count, MAX_COMPOUND_OPS
            ),
        );
        count = MAX_COMPOUND_OPS;
    }
    Ok((offset, count))
}

pub fn dissect_compound_call(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    ctx: &mut NfsCtx<'_>,
) -> DissectResult<(usize, Vec<OpRecord>)> {
    let (offset, _) = xdr::string_field(buf, offset, parent, sink, "nfs.tag.length", "nfs.tag")?;
    let (offset, minorversion) = xdr::u32_field(buf, offset, parent, sink, "nfs.minorversion")?;
    let (mut offset, count) = ops_count(buf, offset, parent, sink)?;

    let mut records: Vec<OpRecord> = Vec::new();
    let mut cfh: Option<Vec<u8>> = None;
    for _ in 0..count {
        let (body_off, opcode, node) = opcode_field(buf, offset, parent, sink)?;
        if !known_opcode(opcode) {
            sink.flag(
                node,
                WarningKind::UnknownTag,
                &format!("opcode {} out of range, remaining operations skipped", opcode),
            );
            offset = body_off;
            break;
        }
        match dissect_op_call(opcode, minorversion, buf, body_off, node, sink, ctx, &mut cfh)? {
            Some((end, summary)) => {
                records.push(OpRecord {
                    opcode,
                    name: nfs4_op_name(opcode),
                    tier: nfs4_op_tier(opcode),
                    status: None,
                    summary,
                    headline: false,
                });
                offset = end;
            }
            None => {
                sink.flag(
                    node,
                    WarningKind::UnknownTag,
                    &format!(
                        "no argument dissector for {}, remaining operations skipped",
                        nfs4_op_name(opcode)
                    ),
                );
                offset = body_off;
                break;
            }
        }
    }

    mark_headlines(&mut records);
    let text = headline_text(&records);
    if text.is_empty() {
        sink.append_info("V4 Call");
    } else {
        sink.append_info(&format!("V4 Call {}", text));
    }
    Ok((offset, records))
}

pub fn dissect_compound_reply(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    ctx: &mut NfsCtx<'_>,
) -> DissectResult<(usize, Vec<OpRecord>)> {
    let (offset, overall_status) = status4(buf, offset, parent, sink)?;
    let (offset, _) = xdr::string_field(buf, offset, parent, sink, "nfs.tag.length", "nfs.tag")?;
    let (mut offset, count) = ops_count(buf, offset, parent, sink)?;

    let mut records: Vec<OpRecord> = Vec::new();
    for _ in 0..count {
        let (body_off, opcode, node) = opcode_field(buf, offset, parent, sink)?;
        if !known_opcode(opcode) {
            sink.flag(
                node,
                WarningKind::UnknownTag,
                &format!("opcode {} out of range, remaining results skipped", opcode),
            );
            offset = body_off;
            break;
        }
        match dissect_op_reply(opcode, buf, body_off, node, sink, ctx)? {
            Some((end, status)) => {
                records.push(OpRecord {
                    opcode,
                    name: nfs4_op_name(opcode),
                    tier: nfs4_op_tier(opcode),
                    status: Some(status),
                    summary: None,
                    headline: false,
                });
                offset = end;
            }
            None => {
                sink.flag(
                    node,
                    WarningKind::UnknownTag,
                    &format!(
                        "no result dissector for {}, remaining results skipped",
                        nfs4_op_name(opcode)
                    ),
                );
                offset = body_off;
                break;
            }
        }
    }

    mark_headlines(&mut records);
    let text = headline_text(&records);
    if text.is_empty() {
        sink.append_info("V4 Reply");
    } else {
        sink.append_info(&format!("V4 Reply {}", text));
    }
    if overall_status != 0 {
        sink.append_info(&format!(" Status: {}", nfs4_status_string(overall_status)));
    }
    Ok((offset, records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fhandle::FhRegistry;
    use crate::nfs_snoop::SnoopCache;
    use crate::tree::{TreeSink, ROOT};
    use hex_literal::hex;

    fn ctx<'r>(registry: &'r FhRegistry, snoop: &'r mut SnoopCache) -> NfsCtx<'r> {
        NfsCtx {
            registry,
            snoop,
            xid: 0x1000,
            first_pass: true,
        }
    }

    fn putfh_getattr_compound() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&hex!("00000000")); // empty tag
        data.extend_from_slice(&hex!("00000000")); // minorversion 0
        data.extend_from_slice(&hex!("00000002")); // 2 ops
        data.extend_from_slice(&hex!("00000016")); // PUTFH
        data.extend_from_slice(&hex!("00000010")); // fh length 16
        data.extend_from_slice(&[0xAA; 16]);
        data.extend_from_slice(&hex!("00000009")); // GETATTR
        data.extend_from_slice(&hex!("00000001 00000008")); // mask: bit 3
        data
    }

    #[test]
    fn putfh_getattr_call() {
        let data = putfh_getattr_compound();
        assert_eq!(data.len(), 48);
        let buf = DecodeBuffer::new(&data);
        let mut sink = TreeSink::new();
        let reg = FhRegistry::new();
        let mut snoop = SnoopCache::new();
        let mut c = ctx(&reg, &mut snoop);
        let (end, records) = dissect_compound_call(&buf, 0, ROOT, &mut sink, &mut c).unwrap();
        assert_eq!(end, 48);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "PUTFH");
        assert_eq!(records[1].name, "GETATTR");
        assert!(records.iter().all(|r| r.headline));
        let mask = sink.field("nfs.attr_mask").unwrap();
        assert!(mask.annotations.iter().any(|a| a.contains("Change")));
        assert!(sink.info().contains("V4 Call"));
        assert!(sink.warnings().is_empty());
    }

    #[test]
    fn out_of_range_opcode_stops_with_progress() {
        let mut data = Vec::new();
        data.extend_from_slice(&hex!("00000000 00000000 00000002"));
        data.extend_from_slice(&hex!("00000003 00000001")); // ACCESS, mask 1
        data.extend_from_slice(&hex!("00000002 deadbeef")); // opcode 2: reserved
        let buf = DecodeBuffer::new(&data);
        let mut sink = TreeSink::new();
        let reg = FhRegistry::new();
        let mut snoop = SnoopCache::new();
        let mut c = ctx(&reg, &mut snoop);
        let (end, records) = dissect_compound_call(&buf, 0, ROOT, &mut sink, &mut c).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "ACCESS");
        assert!(sink.has_warning(WarningKind::UnknownTag));
        // stopped right after the offending opcode word
        assert_eq!(end, data.len() - 4);
    }

    #[test]
    fn truncated_compound_is_out_of_bounds() {
        let mut data = putfh_getattr_compound();
        data.truncate(30); // cut inside the PUTFH handle
        let buf = DecodeBuffer::new(&data);
        let mut sink = TreeSink::new();
        let reg = FhRegistry::new();
        let mut snoop = SnoopCache::new();
        let mut c = ctx(&reg, &mut snoop);
        assert!(dissect_compound_call(&buf, 0, ROOT, &mut sink, &mut c).is_err());
    }

    #[test]
    fn lookup_then_getfh_resolves_name() {
        // call: PUTFH + LOOKUP "etc"
        let mut call = Vec::new();
        call.extend_from_slice(&hex!("00000000 00000000 00000002"));
        call.extend_from_slice(&hex!("00000016 00000004 01020304")); // PUTFH
        call.extend_from_slice(&hex!("0000000f 00000003 65746300")); // LOOKUP "etc"
        let buf = DecodeBuffer::new(&call);
        let mut sink = TreeSink::new();
        let reg = FhRegistry::new();
        let mut snoop = SnoopCache::new();
        {
            let mut c = ctx(&reg, &mut snoop);
            let (_, records) = dissect_compound_call(&buf, 0, ROOT, &mut sink, &mut c).unwrap();
            assert_eq!(records[1].summary.as_deref(), Some("etc"));
            // LOOKUP is tier 1, PUTFH tier 2
            assert!(records[1].headline);
            assert!(!records[0].headline);
        }

        // reply: PUTFH ok + LOOKUP ok + GETFH with the new handle
        let mut reply = Vec::new();
        reply.extend_from_slice(&hex!("00000000 00000000 00000003"));
        reply.extend_from_slice(&hex!("00000016 00000000")); // PUTFH ok
        reply.extend_from_slice(&hex!("0000000f 00000000")); // LOOKUP ok
        reply.extend_from_slice(&hex!("0000000a 00000000 00000004 0a0b0c0d")); // GETFH
        let buf = DecodeBuffer::new(&reply);
        let mut sink = TreeSink::new();
        {
            let mut c = ctx(&reg, &mut snoop);
            let (end, records) = dissect_compound_reply(&buf, 0, ROOT, &mut sink, &mut c).unwrap();
            assert_eq!(end, reply.len());
            assert_eq!(records.len(), 3);
            assert_eq!(records[2].status, Some(0));
        }
        assert_eq!(snoop.name_for(&hex!("0a0b0c0d")), Some("etc"));
    }

    #[test]
    fn oversized_op_count_is_clamped() {
        let mut data = Vec::new();
        data.extend_from_slice(&hex!("00000000 00000000"));
        data.extend_from_slice(&1000u32.to_be_bytes());
        // one decodable op, then nothing: the clamped walk stops at the
        // capture boundary with an error rather than looping on air
        data.extend_from_slice(&hex!("00000018")); // PUTROOTFH
        let buf = DecodeBuffer::new(&data);
        let mut sink = TreeSink::new();
        let reg = FhRegistry::new();
        let mut snoop = SnoopCache::new();
        let mut c = ctx(&reg, &mut snoop);
        let r = dissect_compound_call(&buf, 0, ROOT, &mut sink, &mut c);
        assert!(sink.has_warning(WarningKind::ProtocolViolation));
        assert!(r.is_err());
    }

    #[test]
    fn oversized_op_count_decodes_the_ceiling() {
        let mut data = Vec::new();
        data.extend_from_slice(&hex!("00000000 00000000"));
        data.extend_from_slice(&500u32.to_be_bytes());
        // plenty of decodable ops: the walk must stop at the ceiling, not
        // at the capture boundary
        for _ in 0..500 {
            data.extend_from_slice(&hex!("00000018")); // PUTROOTFH
        }
        let buf = DecodeBuffer::new(&data);
        let mut sink = TreeSink::new();
        let reg = FhRegistry::new();
        let mut snoop = SnoopCache::new();
        let mut c = ctx(&reg, &mut snoop);
        let (end, records) = dissect_compound_call(&buf, 0, ROOT, &mut sink, &mut c).unwrap();
        assert_eq!(records.len(), MAX_COMPOUND_OPS as usize);
        assert!(records.iter().all(|r| r.name == "PUTROOTFH"));
        assert_eq!(end, 12 + 4 * MAX_COMPOUND_OPS as usize);
        assert!(sink.has_warning(WarningKind::ProtocolViolation));
    }

    #[test]
    fn exchange_id_decodes_at_minor_version_one() {
        let mut data = Vec::new();
        data.extend_from_slice(&hex!("00000000 00000001 00000001")); // tag, minor 1, 1 op
        data.extend_from_slice(&hex!("0000002a")); // EXCHANGE_ID
        data.extend_from_slice(&hex!("0102030405060708")); // verifier
        data.extend_from_slice(&hex!("00000004 61626364")); // ownerid "abcd"
        data.extend_from_slice(&hex!("00000100")); // flags
        data.extend_from_slice(&hex!("00000000")); // SP4_NONE
        data.extend_from_slice(&hex!("00000000")); // no impl id
        let buf = DecodeBuffer::new(&data);
        let mut sink = TreeSink::new();
        let reg = FhRegistry::new();
        let mut snoop = SnoopCache::new();
        let mut c = ctx(&reg, &mut snoop);
        let (end, records) = dissect_compound_call(&buf, 0, ROOT, &mut sink, &mut c).unwrap();
        assert_eq!(end, data.len());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "EXCHANGE_ID");
        assert!(sink.warnings().is_empty());
        assert_eq!(sink.field("nfs.owner").unwrap().length, 4);
    }

    #[test]
    fn session_op_rejected_at_minor_version_zero() {
        let mut data = Vec::new();
        data.extend_from_slice(&hex!("00000000 00000000 00000001"));
        data.extend_from_slice(&hex!("00000035")); // SEQUENCE
        data.extend_from_slice(&[0u8; 32]);
        let buf = DecodeBuffer::new(&data);
        let mut sink = TreeSink::new();
        let reg = FhRegistry::new();
        let mut snoop = SnoopCache::new();
        let mut c = ctx(&reg, &mut snoop);
        let (_, records) = dissect_compound_call(&buf, 0, ROOT, &mut sink, &mut c).unwrap();
        assert!(records.is_empty());
        assert!(sink.has_warning(WarningKind::UnknownTag));
    }
}
