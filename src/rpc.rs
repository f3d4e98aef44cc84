//! ONC-RPC envelope (RFC 5531) shared by the NFS dissector.
//!
//! The envelope is parsed with nom into a structured header; the NFS
//! dissector then emits header fields from the parse result and hands the
//! remaining payload to the per-program decoders. Record-mark reassembly is
//! the transport layer's job; one input buffer is one complete RPC message.

use nom::bytes::streaming::take;
use nom::error::{make_error, ErrorKind};
use nom::number::streaming::be_u32;
use nom::{Err, IResult};

use crate::buffer::pad4;
use crate::probe::{L4Info, ProbeResult};

pub const RPC_MSG_CALL: u32 = 0;
pub const RPC_MSG_REPLY: u32 = 1;

pub const AUTH_NULL: u32 = 0;
pub const AUTH_UNIX: u32 = 1;

pub const NFS_PROGRAM: u32 = 100003;

#[derive(Debug, PartialEq)]
pub struct RpcFragmentHeader {
    pub last_fragment: bool,
    pub fragment_length: u32,
}

#[derive(Debug, PartialEq)]
pub struct RpcAuthUnix<'a> {
    pub stamp: u32,
    pub machine_name: &'a [u8],
    pub uid: u32,
    pub gid: u32,
    pub aux_gids: Vec<u32>,
}

#[derive(Debug, PartialEq)]
pub enum RpcCredData<'a> {
    None,
    Unix(RpcAuthUnix<'a>),
    Opaque(&'a [u8]),
}

#[derive(Debug, PartialEq)]
pub struct RpcCred<'a> {
    pub flavor: u32,
    pub length: u32,
    pub data: RpcCredData<'a>,
}

#[derive(Debug, PartialEq)]
pub struct RpcCall<'a> {
    pub rpcvers: u32,
    pub program: u32,
    pub progver: u32,
    pub procedure: u32,
    pub cred: RpcCred<'a>,
    pub verifier: RpcCred<'a>,
}

#[derive(Debug, PartialEq)]
pub struct RpcReply<'a> {
    /// 0 accepted, 1 denied.
    pub reply_state: u32,
    pub verifier: Option<RpcCred<'a>>,
    /// Present for accepted replies; 0 is success.
    pub accept_state: Option<u32>,
}

#[derive(Debug, PartialEq)]
pub enum RpcBody<'a> {
    Call(RpcCall<'a>),
    Reply(RpcReply<'a>),
}

#[derive(Debug, PartialEq)]
pub struct RpcPacket<'a> {
    pub fragment_header: RpcFragmentHeader,
    pub xid: u32,
    pub msg_type: u32,
    pub body: RpcBody<'a>,
}

fn parse_auth_unix(i: &[u8]) -> IResult<&[u8], RpcAuthUnix<'_>> {
    let (i, stamp) = be_u32(i)?;
    let (i, name_len) = be_u32(i)?;
    let (i, machine_name) = take(name_len as usize)(i)?;
    let (i, _fill) = take(pad4(name_len as usize))(i)?;
    let (i, uid) = be_u32(i)?;
    let (i, gid) = be_u32(i)?;
    let (mut i, num_aux) = be_u32(i)?;
    let mut aux_gids = Vec::with_capacity(num_aux.min(16) as usize);
    for _ in 0..num_aux {
        let (rest, aux) = be_u32(i)?;
        aux_gids.push(aux);
        i = rest;
    }
    Ok((
        i,
        RpcAuthUnix {
            stamp,
            machine_name,
            uid,
            gid,
            aux_gids,
        },
    ))
}

fn parse_cred(i: &[u8]) -> IResult<&[u8], RpcCred<'_>> {
    let (i, flavor) = be_u32(i)?;
    let (i, length) = be_u32(i)?;
    let (i, body) = take(length as usize)(i)?;
    let data = match flavor {
        AUTH_NULL => RpcCredData::None,
        AUTH_UNIX => match parse_auth_unix(body) {
            Ok((_, unix)) => RpcCredData::Unix(unix),
            Err(_) => RpcCredData::Opaque(body),
        },
        _ => RpcCredData::Opaque(body),
    };
    Ok((
        i,
        RpcCred {
            flavor,
            length,
            data,
        },
    ))
}

fn parse_call(i: &[u8]) -> IResult<&[u8], RpcBody<'_>> {
    let (i, rpcvers) = be_u32(i)?;
    let (i, program) = be_u32(i)?;
    let (i, progver) = be_u32(i)?;
    let (i, procedure) = be_u32(i)?;
    let (i, cred) = parse_cred(i)?;
    let (i, verifier) = parse_cred(i)?;
    Ok((
        i,
        RpcBody::Call(RpcCall {
            rpcvers,
            program,
            progver,
            procedure,
            cred,
            verifier,
        }),
    ))
}

fn parse_reply(i: &[u8]) -> IResult<&[u8], RpcBody<'_>> {
    let (i, reply_state) = be_u32(i)?;
    if reply_state == 0 {
        let (i, verifier) = parse_cred(i)?;
        let (i, accept_state) = be_u32(i)?;
        Ok((
            i,
            RpcBody::Reply(RpcReply {
                reply_state,
                verifier: Some(verifier),
                accept_state: Some(accept_state),
            }),
        ))
    } else {
        // denied replies carry no program payload worth dispatching
        Ok((
            i,
            RpcBody::Reply(RpcReply {
                reply_state,
                verifier: None,
                accept_state: None,
            }),
        ))
    }
}

/// Parse the RPC envelope; the remaining input is the program payload.
pub fn parse_rpc(i: &[u8]) -> IResult<&[u8], RpcPacket<'_>> {
    let (rest, mark) = be_u32(i)?;
    let fragment_header = RpcFragmentHeader {
        last_fragment: (mark >> 31) == 1,
        fragment_length: mark & 0x7fff_ffff,
    };
    let (rest, xid) = be_u32(rest)?;
    let (rest, msg_type) = be_u32(rest)?;
    let (rest, body) = match msg_type {
        RPC_MSG_CALL => parse_call(rest)?,
        RPC_MSG_REPLY => parse_reply(rest)?,
        _ => return Err(Err::Error(make_error(i, ErrorKind::Switch))),
    };
    Ok((
        rest,
        RpcPacket {
            fragment_header,
            xid,
            msg_type,
            body,
        },
    ))
}

pub fn rpc_probe(i: &[u8], _l4info: &L4Info) -> ProbeResult {
    if i.len() < 28 {
        return ProbeResult::Unsure;
    }
    match parse_rpc(i) {
        Ok((_, pkt)) => match &pkt.body {
            RpcBody::Call(call) if call.rpcvers == 2 => ProbeResult::Certain,
            RpcBody::Call(_) => ProbeResult::NotForUs,
            RpcBody::Reply(_) => ProbeResult::Unsure,
        },
        Err(Err::Incomplete(_)) => ProbeResult::Unsure,
        Err(_) => ProbeResult::NotForUs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn call_with_auth_unix() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&hex!("80000044")); // last fragment, length 0x44
        buf.extend_from_slice(&hex!("deadbeef")); // xid
        buf.extend_from_slice(&hex!("00000000")); // call
        buf.extend_from_slice(&hex!("00000002")); // rpcvers
        buf.extend_from_slice(&100003u32.to_be_bytes());
        buf.extend_from_slice(&hex!("00000003")); // version 3
        buf.extend_from_slice(&hex!("00000003")); // LOOKUP
        // cred: AUTH_UNIX, stamp + "host" + uid/gid + one aux gid
        buf.extend_from_slice(&hex!("00000001 0000001c"));
        buf.extend_from_slice(&hex!("00000000 00000004 686f7374 00000000 00000000 00000001 00000064"));
        // verifier: AUTH_NULL
        buf.extend_from_slice(&hex!("00000000 00000000"));
        buf.extend_from_slice(&hex!("cafef00d")); // payload

        let (rem, pkt) = parse_rpc(&buf).unwrap();
        assert_eq!(rem, hex!("cafef00d"));
        assert_eq!(pkt.xid, 0xdeadbeef);
        assert!(pkt.fragment_header.last_fragment);
        match pkt.body {
            RpcBody::Call(call) => {
                assert_eq!(call.program, NFS_PROGRAM);
                assert_eq!(call.progver, 3);
                assert_eq!(call.procedure, 3);
                match call.cred.data {
                    RpcCredData::Unix(u) => {
                        assert_eq!(u.machine_name, b"host");
                        assert_eq!(u.aux_gids, vec![100]);
                    }
                    other => panic!("unexpected cred {:?}", other),
                }
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn accepted_reply() {
        let buf = hex!(
            "80000018 deadbeef 00000001" // reply
            "00000000"                  // accepted
            "00000000 00000000"         // null verifier
            "00000000"                  // success
            "00000000"                  // payload: status word
        );
        let (rem, pkt) = parse_rpc(&buf).unwrap();
        assert_eq!(rem.len(), 4);
        match pkt.body {
            RpcBody::Reply(rep) => {
                assert_eq!(rep.reply_state, 0);
                assert_eq!(rep.accept_state, Some(0));
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn bad_msg_type_rejected() {
        let buf = hex!("80000010 00000001 00000007 00000000");
        assert!(parse_rpc(&buf).is_err());
    }
}
