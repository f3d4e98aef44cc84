//! NFS version 2 and 3 procedure bodies (RFC 1094, RFC 1813).
//!
//! One function per call/reply pair would balloon; instead small typed
//! helpers mirror the XDR building blocks (fattr3, wcc_data, post_op_attr)
//! and the two dispatch functions lay them out per procedure. Name-granting
//! calls stage into the snoop cache; their replies resolve.

use crate::buffer::{ByteOrder, DecodeBuffer, DissectResult};
use crate::fhandle::{fhandle_field, FhRegistry};
use crate::nfs_snoop::SnoopCache;
use crate::nfs_types::*;
use crate::tree::{FieldSink, NodeId};
use crate::variant::Variant;
use crate::xdr;

/// Shared context for one message: the vendor handle registry, the
/// conversation's snoop cache and the identifiers the cache keys on.
pub struct NfsCtx<'r> {
    pub registry: &'r FhRegistry,
    pub snoop: &'r mut SnoopCache,
    pub xid: u32,
    pub first_pass: bool,
}

fn status3(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
) -> DissectResult<(usize, u32)> {
    let v = buf.u32_at(offset, ByteOrder::Big)?;
    let node = sink.emit(parent, "nfs.nfsstat3", offset, 4, Variant::U32(v));
    sink.annotate(node, &format!("({})", nfs3_status_string(v)));
    // generic mirror so cross-version filters see every failure
    sink.emit(parent, "nfs.status", offset, 4, Variant::U32(v));
    Ok((offset + 4, v))
}

fn fh3<'a>(
    buf: &DecodeBuffer<'a>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    ctx: &mut NfsCtx<'_>,
) -> DissectResult<(usize, &'a [u8])> {
    let node = sink.emit(parent, "nfs.fh", offset, 0, Variant::None);
    let (end, data) = fhandle_field(buf, offset, node, sink, ctx.registry)?;
    if let Some((path, _)) = ctx.snoop.full_name(data) {
        sink.annotate(node, &path);
    }
    Ok((end, data))
}

fn specdata3(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
) -> DissectResult<usize> {
    let (offset, _) = xdr::u32_field(buf, offset, parent, sink, "nfs.specdata1")?;
    let (offset, _) = xdr::u32_field(buf, offset, parent, sink, "nfs.specdata2")?;
    Ok(offset)
}

fn fattr3(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
) -> DissectResult<usize> {
    let node = sink.emit(parent, "nfs.fattr3", offset, 84, Variant::None);
    let (o, _) = xdr::u32_field(buf, offset, node, sink, "nfs.ftype3")?;
    let (o, _) = xdr::u32_field(buf, o, node, sink, "nfs.mode3")?;
    let (o, _) = xdr::u32_field(buf, o, node, sink, "nfs.nlink")?;
    let (o, _) = xdr::u32_field(buf, o, node, sink, "nfs.uid")?;
    let (o, _) = xdr::u32_field(buf, o, node, sink, "nfs.gid")?;
    let (o, _) = xdr::u64_field(buf, o, node, sink, "nfs.size3")?;
    let (o, _) = xdr::u64_field(buf, o, node, sink, "nfs.used")?;
    let o = specdata3(buf, o, node, sink)?;
    let (o, _) = xdr::u64_field(buf, o, node, sink, "nfs.fsid3")?;
    let (o, _) = xdr::u64_field(buf, o, node, sink, "nfs.fileid3")?;
    let o = xdr::time_field(buf, o, node, sink, "nfs.atime")?;
    let o = xdr::time_field(buf, o, node, sink, "nfs.mtime")?;
    let o = xdr::time_field(buf, o, node, sink, "nfs.ctime")?;
    Ok(o)
}

fn post_op_attr(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
) -> DissectResult<usize> {
    let (offset, follows) = xdr::bool_field(buf, offset, parent, sink, "nfs.attributes_follow")?;
    if follows {
        fattr3(buf, offset, parent, sink)
    } else {
        Ok(offset)
    }
}

fn wcc_attr(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
) -> DissectResult<usize> {
    let node = sink.emit(parent, "nfs.wcc_attr", offset, 24, Variant::None);
    let (o, _) = xdr::u64_field(buf, offset, node, sink, "nfs.size3")?;
    let o = xdr::time_field(buf, o, node, sink, "nfs.mtime")?;
    xdr::time_field(buf, o, node, sink, "nfs.ctime")
}

fn pre_op_attr(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
) -> DissectResult<usize> {
    let (offset, follows) = xdr::bool_field(buf, offset, parent, sink, "nfs.attributes_follow")?;
    if follows {
        wcc_attr(buf, offset, parent, sink)
    } else {
        Ok(offset)
    }
}

fn wcc_data(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
) -> DissectResult<usize> {
    let node = sink.emit(parent, "nfs.wcc_data", offset, 0, Variant::None);
    let offset = pre_op_attr(buf, offset, node, sink)?;
    post_op_attr(buf, offset, node, sink)
}

/// Optional filehandle in replies; a present handle resolves the staged
/// snoop entry for this xid.
fn post_op_fh3(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    ctx: &mut NfsCtx<'_>,
) -> DissectResult<usize> {
    let (offset, follows) = xdr::bool_field(buf, offset, parent, sink, "nfs.handle_follow")?;
    if follows {
        let (end, fh) = fh3(buf, offset, parent, sink, ctx)?;
        ctx.snoop.resolve(ctx.xid, fh, ctx.first_pass);
        Ok(end)
    } else {
        Ok(offset)
    }
}

/// set_uint32/set_uint64/set_time discriminated unions from sattr3.
fn set_u32(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    field: &'static str,
) -> DissectResult<usize> {
    let (offset, set) = xdr::bool_field(buf, offset, parent, sink, "nfs.set_it")?;
    if set {
        let (o, _) = xdr::u32_field(buf, offset, parent, sink, field)?;
        Ok(o)
    } else {
        Ok(offset)
    }
}

fn set_u64(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    field: &'static str,
) -> DissectResult<usize> {
    let (offset, set) = xdr::bool_field(buf, offset, parent, sink, "nfs.set_it")?;
    if set {
        let (o, _) = xdr::u64_field(buf, offset, parent, sink, field)?;
        Ok(o)
    } else {
        Ok(offset)
    }
}

fn set_time(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    field: &'static str,
) -> DissectResult<usize> {
    // 0 don't change, 1 server time, 2 client-supplied time follows
    let (offset, how) = xdr::u32_field(buf, offset, parent, sink, "nfs.set_time_how")?;
    if how == 2 {
        xdr::time_field(buf, offset, parent, sink, field)
    } else {
        Ok(offset)
    }
}

fn sattr3(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
) -> DissectResult<usize> {
    let node = sink.emit(parent, "nfs.sattr3", offset, 0, Variant::None);
    let o = set_u32(buf, offset, node, sink, "nfs.mode3")?;
    let o = set_u32(buf, o, node, sink, "nfs.uid")?;
    let o = set_u32(buf, o, node, sink, "nfs.gid")?;
    let o = set_u64(buf, o, node, sink, "nfs.size3")?;
    let o = set_time(buf, o, node, sink, "nfs.atime")?;
    set_time(buf, o, node, sink, "nfs.mtime")
}

/// Parent handle plus component name; the caller decides whether the pair
/// is staged for snooping.
fn diropargs3<'a>(
    buf: &DecodeBuffer<'a>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    ctx: &mut NfsCtx<'_>,
) -> DissectResult<(usize, &'a [u8], String)> {
    let (offset, fh) = fh3(buf, offset, parent, sink, ctx)?;
    let (offset, name) = xdr::string_field(buf, offset, parent, sink, "nfs.name.length", "nfs.name")?;
    Ok((offset, fh, String::from_utf8_lossy(name).into_owned()))
}

fn stage_diropargs(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    ctx: &mut NfsCtx<'_>,
) -> DissectResult<usize> {
    let (offset, fh, name) = diropargs3(buf, offset, parent, sink, ctx)?;
    ctx.snoop.stage(ctx.xid, Some(fh), &name, ctx.first_pass);
    Ok(offset)
}

pub fn dissect_v3_call(
    procedure: u32,
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    ctx: &mut NfsCtx<'_>,
) -> DissectResult<usize> {
    match procedure {
        NFSPROC3_NULL => Ok(offset),
        NFSPROC3_GETATTR | NFSPROC3_READLINK | NFSPROC3_FSSTAT | NFSPROC3_FSINFO
        | NFSPROC3_PATHCONF => {
            let (o, _) = fh3(buf, offset, parent, sink, ctx)?;
            Ok(o)
        }
        NFSPROC3_SETATTR => {
            let (o, _) = fh3(buf, offset, parent, sink, ctx)?;
            let o = sattr3(buf, o, parent, sink)?;
            let (o, check) = xdr::bool_field(buf, o, parent, sink, "nfs.sattrguard3")?;
            if check {
                xdr::time_field(buf, o, parent, sink, "nfs.ctime")
            } else {
                Ok(o)
            }
        }
        NFSPROC3_LOOKUP | NFSPROC3_REMOVE | NFSPROC3_RMDIR => {
            // REMOVE/RMDIR share the argument shape; only LOOKUP-style
            // calls can grant a name, and staging an object about to be
            // deleted is harmless since no reply handle will resolve it
            stage_diropargs(buf, offset, parent, sink, ctx)
        }
        NFSPROC3_ACCESS => {
            let (o, _) = fh3(buf, offset, parent, sink, ctx)?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.access_check")?;
            Ok(o)
        }
        NFSPROC3_READ => {
            let (o, _) = fh3(buf, offset, parent, sink, ctx)?;
            let (o, _) = xdr::u64_field(buf, o, parent, sink, "nfs.offset3")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.count3")?;
            Ok(o)
        }
        NFSPROC3_WRITE => {
            let (o, _) = fh3(buf, offset, parent, sink, ctx)?;
            let (o, _) = xdr::u64_field(buf, o, parent, sink, "nfs.offset3")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.count3")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.write.stable")?;
            let (o, _) = xdr::opaque_field(buf, o, parent, sink, "nfs.data.length", "nfs.data")?;
            Ok(o)
        }
        NFSPROC3_CREATE => {
            let o = stage_diropargs(buf, offset, parent, sink, ctx)?;
            let (o, mode) = xdr::u32_field(buf, o, parent, sink, "nfs.createmode3")?;
            match mode {
                // UNCHECKED / GUARDED carry initial attributes
                0 | 1 => sattr3(buf, o, parent, sink),
                // EXCLUSIVE carries the 8-byte create verifier
                _ => {
                    let (o, _) = xdr::bytes_field(buf, o, 8, parent, sink, "nfs.verifier")?;
                    Ok(o)
                }
            }
        }
        NFSPROC3_MKDIR => {
            let o = stage_diropargs(buf, offset, parent, sink, ctx)?;
            sattr3(buf, o, parent, sink)
        }
        NFSPROC3_SYMLINK => {
            let o = stage_diropargs(buf, offset, parent, sink, ctx)?;
            let o = sattr3(buf, o, parent, sink)?;
            let (o, _) =
                xdr::string_field(buf, o, parent, sink, "nfs.symlink.length", "nfs.symlink.to")?;
            Ok(o)
        }
        NFSPROC3_MKNOD => {
            let o = stage_diropargs(buf, offset, parent, sink, ctx)?;
            let (o, ftype) = xdr::u32_field(buf, o, parent, sink, "nfs.ftype3")?;
            match ftype {
                // NF3CHR / NF3BLK
                3 | 4 => {
                    let o = sattr3(buf, o, parent, sink)?;
                    specdata3(buf, o, parent, sink)
                }
                // NF3SOCK / NF3FIFO
                5 | 7 => sattr3(buf, o, parent, sink),
                _ => Ok(o),
            }
        }
        NFSPROC3_RENAME => {
            let o = stage_diropargs(buf, offset, parent, sink, ctx)?;
            let (o, _, _) = diropargs3(buf, o, parent, sink, ctx)?;
            Ok(o)
        }
        NFSPROC3_LINK => {
            let (o, _) = fh3(buf, offset, parent, sink, ctx)?;
            let (o, _, _) = diropargs3(buf, o, parent, sink, ctx)?;
            Ok(o)
        }
        NFSPROC3_READDIR => {
            let (o, _) = fh3(buf, offset, parent, sink, ctx)?;
            let (o, _) = xdr::u64_field(buf, o, parent, sink, "nfs.cookie3")?;
            let (o, _) = xdr::bytes_field(buf, o, 8, parent, sink, "nfs.cookieverf3")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.count3")?;
            Ok(o)
        }
        NFSPROC3_READDIRPLUS => {
            let (o, _) = fh3(buf, offset, parent, sink, ctx)?;
            let (o, _) = xdr::u64_field(buf, o, parent, sink, "nfs.cookie3")?;
            let (o, _) = xdr::bytes_field(buf, o, 8, parent, sink, "nfs.cookieverf3")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.dircount")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.maxcount")?;
            Ok(o)
        }
        NFSPROC3_COMMIT => {
            let (o, _) = fh3(buf, offset, parent, sink, ctx)?;
            let (o, _) = xdr::u64_field(buf, o, parent, sink, "nfs.offset3")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.count3")?;
            Ok(o)
        }
        _ => Ok(offset),
    }
}

fn readdir_entries(
    buf: &DecodeBuffer<'_>,
    mut offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    ctx: &mut NfsCtx<'_>,
    plus: bool,
) -> DissectResult<usize> {
    loop {
        let (o, follows) = xdr::bool_field(buf, offset, parent, sink, "nfs.value_follows")?;
        offset = o;
        if !follows {
            break;
        }
        let entry = sink.emit(parent, "nfs.readdir.entry", offset, 0, Variant::None);
        let (o, _) = xdr::u64_field(buf, offset, entry, sink, "nfs.fileid3")?;
        let (o, _) =
            xdr::string_field(buf, o, entry, sink, "nfs.name.length", "nfs.readdir.entry.name")?;
        let (o, _) = xdr::u64_field(buf, o, entry, sink, "nfs.cookie3")?;
        offset = o;
        if plus {
            offset = post_op_attr(buf, offset, entry, sink)?;
            offset = post_op_fh3(buf, offset, entry, sink, ctx)?;
        }
    }
    let (offset, _) = xdr::bool_field(buf, offset, parent, sink, "nfs.readdir.eof")?;
    Ok(offset)
}

pub fn dissect_v3_reply(
    procedure: u32,
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    ctx: &mut NfsCtx<'_>,
) -> DissectResult<usize> {
    if procedure == NFSPROC3_NULL {
        return Ok(offset);
    }
    let (offset, status) = status3(buf, offset, parent, sink)?;
    let ok = status == 0;
    match procedure {
        NFSPROC3_GETATTR => {
            if ok {
                fattr3(buf, offset, parent, sink)
            } else {
                Ok(offset)
            }
        }
        NFSPROC3_SETATTR | NFSPROC3_REMOVE | NFSPROC3_RMDIR => wcc_data(buf, offset, parent, sink),
        NFSPROC3_LOOKUP => {
            if ok {
                let (o, fh) = fh3(buf, offset, parent, sink, ctx)?;
                ctx.snoop.resolve(ctx.xid, fh, ctx.first_pass);
                let o = post_op_attr(buf, o, parent, sink)?;
                post_op_attr(buf, o, parent, sink)
            } else {
                post_op_attr(buf, offset, parent, sink)
            }
        }
        NFSPROC3_ACCESS => {
            let o = post_op_attr(buf, offset, parent, sink)?;
            if ok {
                let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.access_allowed")?;
                Ok(o)
            } else {
                Ok(o)
            }
        }
        NFSPROC3_READLINK => {
            let o = post_op_attr(buf, offset, parent, sink)?;
            if ok {
                let (o, _) =
                    xdr::string_field(buf, o, parent, sink, "nfs.symlink.length", "nfs.symlink.to")?;
                Ok(o)
            } else {
                Ok(o)
            }
        }
        NFSPROC3_READ => {
            let o = post_op_attr(buf, offset, parent, sink)?;
            if ok {
                let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.count3")?;
                let (o, _) = xdr::bool_field(buf, o, parent, sink, "nfs.read.eof")?;
                let (o, _) = xdr::opaque_field(buf, o, parent, sink, "nfs.data.length", "nfs.data")?;
                Ok(o)
            } else {
                Ok(o)
            }
        }
        NFSPROC3_WRITE => {
            let o = wcc_data(buf, offset, parent, sink)?;
            if ok {
                let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.count3")?;
                let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.write.committed")?;
                let (o, _) = xdr::bytes_field(buf, o, 8, parent, sink, "nfs.verifier")?;
                Ok(o)
            } else {
                Ok(o)
            }
        }
        NFSPROC3_CREATE | NFSPROC3_MKDIR | NFSPROC3_SYMLINK | NFSPROC3_MKNOD => {
            if ok {
                let o = post_op_fh3(buf, offset, parent, sink, ctx)?;
                let o = post_op_attr(buf, o, parent, sink)?;
                wcc_data(buf, o, parent, sink)
            } else {
                wcc_data(buf, offset, parent, sink)
            }
        }
        NFSPROC3_RENAME => {
            let o = wcc_data(buf, offset, parent, sink)?;
            wcc_data(buf, o, parent, sink)
        }
        NFSPROC3_LINK => {
            let o = post_op_attr(buf, offset, parent, sink)?;
            wcc_data(buf, o, parent, sink)
        }
        NFSPROC3_READDIR | NFSPROC3_READDIRPLUS => {
            let o = post_op_attr(buf, offset, parent, sink)?;
            if ok {
                let (o, _) = xdr::bytes_field(buf, o, 8, parent, sink, "nfs.cookieverf3")?;
                readdir_entries(buf, o, parent, sink, ctx, procedure == NFSPROC3_READDIRPLUS)
            } else {
                Ok(o)
            }
        }
        NFSPROC3_FSSTAT => {
            let o = post_op_attr(buf, offset, parent, sink)?;
            if ok {
                let (o, _) = xdr::u64_field(buf, o, parent, sink, "nfs.fsstat.tbytes")?;
                let (o, _) = xdr::u64_field(buf, o, parent, sink, "nfs.fsstat.fbytes")?;
                let (o, _) = xdr::u64_field(buf, o, parent, sink, "nfs.fsstat.abytes")?;
                let (o, _) = xdr::u64_field(buf, o, parent, sink, "nfs.fsstat.tfiles")?;
                let (o, _) = xdr::u64_field(buf, o, parent, sink, "nfs.fsstat.ffiles")?;
                let (o, _) = xdr::u64_field(buf, o, parent, sink, "nfs.fsstat.afiles")?;
                let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.fsstat.invarsec")?;
                Ok(o)
            } else {
                Ok(o)
            }
        }
        NFSPROC3_FSINFO => {
            let o = post_op_attr(buf, offset, parent, sink)?;
            if ok {
                let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.fsinfo.rtmax")?;
                let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.fsinfo.rtpref")?;
                let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.fsinfo.rtmult")?;
                let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.fsinfo.wtmax")?;
                let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.fsinfo.wtpref")?;
                let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.fsinfo.wtmult")?;
                let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.fsinfo.dtpref")?;
                let (o, _) = xdr::u64_field(buf, o, parent, sink, "nfs.fsinfo.maxfilesize")?;
                let o = xdr::time_field(buf, o, parent, sink, "nfs.fsinfo.time_delta")?;
                let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.fsinfo.properties")?;
                Ok(o)
            } else {
                Ok(o)
            }
        }
        NFSPROC3_PATHCONF => {
            let o = post_op_attr(buf, offset, parent, sink)?;
            if ok {
                let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.pathconf.linkmax")?;
                let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.pathconf.name_max")?;
                let (o, _) = xdr::bool_field(buf, o, parent, sink, "nfs.pathconf.no_trunc")?;
                let (o, _) =
                    xdr::bool_field(buf, o, parent, sink, "nfs.pathconf.chown_restricted")?;
                let (o, _) = xdr::bool_field(buf, o, parent, sink, "nfs.pathconf.case_insensitive")?;
                let (o, _) = xdr::bool_field(buf, o, parent, sink, "nfs.pathconf.case_preserving")?;
                Ok(o)
            } else {
                Ok(o)
            }
        }
        NFSPROC3_COMMIT => {
            let o = wcc_data(buf, offset, parent, sink)?;
            if ok {
                let (o, _) = xdr::bytes_field(buf, o, 8, parent, sink, "nfs.verifier")?;
                Ok(o)
            } else {
                Ok(o)
            }
        }
        _ => Ok(offset),
    }
}

/* ---- NFSv2 ---- */

fn status2(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
) -> DissectResult<(usize, u32)> {
    let v = buf.u32_at(offset, ByteOrder::Big)?;
    let node = sink.emit(parent, "nfs.nfsstat2", offset, 4, Variant::U32(v));
    sink.annotate(node, &format!("({})", nfs3_status_string(v)));
    sink.emit(parent, "nfs.status", offset, 4, Variant::U32(v));
    Ok((offset + 4, v))
}

fn fh2<'a>(
    buf: &DecodeBuffer<'a>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    ctx: &mut NfsCtx<'_>,
) -> DissectResult<(usize, &'a [u8])> {
    let node = sink.emit(parent, "nfs.fh", offset, FHSIZE2, Variant::None);
    let (end, data) = xdr::bytes_field(buf, offset, FHSIZE2, node, sink, "fh.data")?;
    ctx.registry.decode(buf, offset, FHSIZE2, node, sink)?;
    if let Some((path, _)) = ctx.snoop.full_name(data) {
        sink.annotate(node, &path);
    }
    Ok((end, data))
}

fn fattr2(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
) -> DissectResult<usize> {
    let node = sink.emit(parent, "nfs.fattr", offset, 68, Variant::None);
    let mut o = offset;
    for field in [
        "nfs.ftype",
        "nfs.mode",
        "nfs.nlink",
        "nfs.uid",
        "nfs.gid",
        "nfs.size",
        "nfs.blocksize",
        "nfs.rdev",
        "nfs.blocks",
        "nfs.fsid",
        "nfs.fileid",
    ] {
        let (next, _) = xdr::u32_field(buf, o, node, sink, field)?;
        o = next;
    }
    let o = xdr::time_field(buf, o, node, sink, "nfs.atime")?;
    let o = xdr::time_field(buf, o, node, sink, "nfs.mtime")?;
    xdr::time_field(buf, o, node, sink, "nfs.ctime")
}

fn sattr2(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
) -> DissectResult<usize> {
    let node = sink.emit(parent, "nfs.sattr", offset, 32, Variant::None);
    let mut o = offset;
    for field in ["nfs.mode", "nfs.uid", "nfs.gid", "nfs.size"] {
        let (next, _) = xdr::u32_field(buf, o, node, sink, field)?;
        o = next;
    }
    let o = xdr::time_field(buf, o, node, sink, "nfs.atime")?;
    xdr::time_field(buf, o, node, sink, "nfs.mtime")
}

fn diropargs2(
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    ctx: &mut NfsCtx<'_>,
    stage: bool,
) -> DissectResult<usize> {
    let (offset, fh) = fh2(buf, offset, parent, sink, ctx)?;
    let (offset, name) = xdr::string_field(buf, offset, parent, sink, "nfs.name.length", "nfs.name")?;
    if stage {
        let name = String::from_utf8_lossy(name).into_owned();
        ctx.snoop.stage(ctx.xid, Some(fh), &name, ctx.first_pass);
    }
    Ok(offset)
}

pub fn dissect_v2_call(
    procedure: u32,
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    ctx: &mut NfsCtx<'_>,
) -> DissectResult<usize> {
    match procedure {
        NFSPROC2_GETATTR | NFSPROC2_READLINK | NFSPROC2_STATFS => {
            let (o, _) = fh2(buf, offset, parent, sink, ctx)?;
            Ok(o)
        }
        NFSPROC2_SETATTR => {
            let (o, _) = fh2(buf, offset, parent, sink, ctx)?;
            sattr2(buf, o, parent, sink)
        }
        NFSPROC2_LOOKUP => diropargs2(buf, offset, parent, sink, ctx, true),
        NFSPROC2_READ => {
            let (o, _) = fh2(buf, offset, parent, sink, ctx)?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.offset")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.count")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.totalcount")?;
            Ok(o)
        }
        NFSPROC2_WRITE => {
            let (o, _) = fh2(buf, offset, parent, sink, ctx)?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.beginoffset")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.offset")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.totalcount")?;
            let (o, _) = xdr::opaque_field(buf, o, parent, sink, "nfs.data.length", "nfs.data")?;
            Ok(o)
        }
        NFSPROC2_CREATE | NFSPROC2_MKDIR => {
            let o = diropargs2(buf, offset, parent, sink, ctx, true)?;
            sattr2(buf, o, parent, sink)
        }
        NFSPROC2_REMOVE | NFSPROC2_RMDIR => diropargs2(buf, offset, parent, sink, ctx, false),
        NFSPROC2_RENAME => {
            let o = diropargs2(buf, offset, parent, sink, ctx, false)?;
            diropargs2(buf, o, parent, sink, ctx, false)
        }
        NFSPROC2_LINK => {
            let (o, _) = fh2(buf, offset, parent, sink, ctx)?;
            diropargs2(buf, o, parent, sink, ctx, false)
        }
        NFSPROC2_SYMLINK => {
            let o = diropargs2(buf, offset, parent, sink, ctx, true)?;
            let (o, _) =
                xdr::string_field(buf, o, parent, sink, "nfs.symlink.length", "nfs.symlink.to")?;
            sattr2(buf, o, parent, sink)
        }
        NFSPROC2_READDIR => {
            let (o, _) = fh2(buf, offset, parent, sink, ctx)?;
            let (o, _) = xdr::bytes_field(buf, o, 4, parent, sink, "nfs.cookie")?;
            let (o, _) = xdr::u32_field(buf, o, parent, sink, "nfs.count")?;
            Ok(o)
        }
        _ => Ok(offset),
    }
}

pub fn dissect_v2_reply(
    procedure: u32,
    buf: &DecodeBuffer<'_>,
    offset: usize,
    parent: NodeId,
    sink: &mut dyn FieldSink,
    ctx: &mut NfsCtx<'_>,
) -> DissectResult<usize> {
    if procedure == NFSPROC2_NULL {
        return Ok(offset);
    }
    let (offset, status) = status2(buf, offset, parent, sink)?;
    if status != 0 {
        return Ok(offset);
    }
    match procedure {
        NFSPROC2_GETATTR | NFSPROC2_SETATTR | NFSPROC2_WRITE => fattr2(buf, offset, parent, sink),
        NFSPROC2_LOOKUP | NFSPROC2_CREATE | NFSPROC2_MKDIR => {
            let (o, fh) = fh2(buf, offset, parent, sink, ctx)?;
            ctx.snoop.resolve(ctx.xid, fh, ctx.first_pass);
            fattr2(buf, o, parent, sink)
        }
        NFSPROC2_READLINK => {
            let (o, _) =
                xdr::string_field(buf, offset, parent, sink, "nfs.symlink.length", "nfs.symlink.to")?;
            Ok(o)
        }
        NFSPROC2_READ => {
            let o = fattr2(buf, offset, parent, sink)?;
            let (o, _) = xdr::opaque_field(buf, o, parent, sink, "nfs.data.length", "nfs.data")?;
            Ok(o)
        }
        NFSPROC2_READDIR => {
            let mut o = offset;
            loop {
                let (next, follows) = xdr::bool_field(buf, o, parent, sink, "nfs.value_follows")?;
                o = next;
                if !follows {
                    break;
                }
                let entry = sink.emit(parent, "nfs.readdir.entry", o, 0, Variant::None);
                let (next, _) = xdr::u32_field(buf, o, entry, sink, "nfs.fileid")?;
                let (next, _) = xdr::string_field(
                    buf,
                    next,
                    entry,
                    sink,
                    "nfs.name.length",
                    "nfs.readdir.entry.name",
                )?;
                let (next, _) = xdr::bytes_field(buf, next, 4, entry, sink, "nfs.cookie")?;
                o = next;
            }
            let (o, _) = xdr::bool_field(buf, o, parent, sink, "nfs.readdir.eof")?;
            Ok(o)
        }
        NFSPROC2_STATFS => {
            let mut o = offset;
            for field in [
                "nfs.statfs.tsize",
                "nfs.statfs.bsize",
                "nfs.statfs.blocks",
                "nfs.statfs.bfree",
                "nfs.statfs.bavail",
            ] {
                let (next, _) = xdr::u32_field(buf, o, parent, sink, field)?;
                o = next;
            }
            Ok(o)
        }
        _ => Ok(offset),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{TreeSink, Val, ROOT};
    use hex_literal::hex;

    fn ctx<'r>(registry: &'r FhRegistry, snoop: &'r mut SnoopCache) -> NfsCtx<'r> {
        NfsCtx {
            registry,
            snoop,
            xid: 0x42,
            first_pass: true,
        }
    }

    #[test]
    fn lookup_call_stages_name() {
        // fh (4 bytes) + name "passwd"
        let data = hex!(
            "00000004 0a0b0c0d"
            "00000006 70617373 77640000"
        );
        let buf = DecodeBuffer::new(&data);
        let mut sink = TreeSink::new();
        let reg = FhRegistry::new();
        let mut snoop = SnoopCache::new();
        let mut c = ctx(&reg, &mut snoop);
        let end =
            dissect_v3_call(NFSPROC3_LOOKUP, &buf, 0, ROOT, &mut sink, &mut c).unwrap();
        assert_eq!(end, data.len());
        // reply resolves it
        snoop.resolve(0x42, &hex!("11121314"), true);
        assert_eq!(snoop.name_for(&hex!("11121314")), Some("passwd"));
    }

    #[test]
    fn getattr_reply_emits_both_status_fields() {
        let mut data = hex!("00000000").to_vec(); // NFS3_OK
        data.extend_from_slice(&[0u8; 84]); // zeroed fattr3
        let buf = DecodeBuffer::new(&data);
        let mut sink = TreeSink::new();
        let reg = FhRegistry::new();
        let mut snoop = SnoopCache::new();
        let mut c = ctx(&reg, &mut snoop);
        dissect_v3_reply(NFSPROC3_GETATTR, &buf, 0, ROOT, &mut sink, &mut c).unwrap();
        let specific = sink.field("nfs.nfsstat3").unwrap();
        let generic = sink.field("nfs.status").unwrap();
        assert_eq!((specific.offset, specific.length), (generic.offset, generic.length));
        assert_eq!(specific.value, Val::U32(0));
        assert_eq!(generic.value, Val::U32(0));
        assert!(specific.annotations.iter().any(|a| a.contains("NFS3_OK")));
    }

    #[test]
    fn failed_lookup_reply_has_dir_attrs_only() {
        // NFS3ERR_NOENT, attributes_follow = false
        let data = hex!("00000002 00000000");
        let buf = DecodeBuffer::new(&data);
        let mut sink = TreeSink::new();
        let reg = FhRegistry::new();
        let mut snoop = SnoopCache::new();
        let mut c = ctx(&reg, &mut snoop);
        let end =
            dissect_v3_reply(NFSPROC3_LOOKUP, &buf, 0, ROOT, &mut sink, &mut c).unwrap();
        assert_eq!(end, 8);
        assert!(sink.field("nfs.fh").is_none());
    }

    #[test]
    fn write_call_layout() {
        let data = hex!(
            "00000004 01020304"          // fh
            "00000000 00001000"          // offset 4096
            "00000008"                   // count
            "00000001"                   // DATA_SYNC
            "00000008 6161616161616161"  // data
        );
        let buf = DecodeBuffer::new(&data);
        let mut sink = TreeSink::new();
        let reg = FhRegistry::new();
        let mut snoop = SnoopCache::new();
        let mut c = ctx(&reg, &mut snoop);
        let end = dissect_v3_call(NFSPROC3_WRITE, &buf, 0, ROOT, &mut sink, &mut c).unwrap();
        assert_eq!(end, data.len());
        assert_eq!(sink.field("nfs.offset3").unwrap().value, Val::U64(4096));
        assert_eq!(sink.field("nfs.data").unwrap().length, 8);
    }

    #[test]
    fn truncated_reply_is_out_of_bounds() {
        // OK status but fattr3 cut short
        let data = hex!("00000000 00000001 000001ff");
        let buf = DecodeBuffer::new(&data);
        let mut sink = TreeSink::new();
        let reg = FhRegistry::new();
        let mut snoop = SnoopCache::new();
        let mut c = ctx(&reg, &mut snoop);
        let r = dissect_v3_reply(NFSPROC3_GETATTR, &buf, 0, ROOT, &mut sink, &mut c);
        assert!(r.is_err());
    }

    #[test]
    fn v2_read_call() {
        let mut data = vec![0u8; 0];
        data.extend_from_slice(&[0xab; FHSIZE2]);
        data.extend_from_slice(&hex!("00000200 00000100 00000000"));
        let buf = DecodeBuffer::new(&data);
        let mut sink = TreeSink::new();
        let reg = FhRegistry::new();
        let mut snoop = SnoopCache::new();
        let mut c = ctx(&reg, &mut snoop);
        let end = dissect_v2_call(NFSPROC2_READ, &buf, 0, ROOT, &mut sink, &mut c).unwrap();
        assert_eq!(end, data.len());
        assert_eq!(sink.field("nfs.offset").unwrap().value, Val::U32(0x200));
    }
}
