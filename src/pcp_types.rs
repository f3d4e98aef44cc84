//! Performance Co-Pilot protocol constants and name tables.

/* PDU type words; every PCP PDU starts with length, type, from. */
pub const PCP_PDU_START_OR_ERROR: u32 = 0x7000;
pub const PCP_PDU_RESULT: u32 = 0x7001;
pub const PCP_PDU_PROFILE: u32 = 0x7002;
pub const PCP_PDU_FETCH: u32 = 0x7003;
pub const PCP_PDU_DESC_REQ: u32 = 0x7004;
pub const PCP_PDU_DESC: u32 = 0x7005;
pub const PCP_PDU_INSTANCE_REQ: u32 = 0x7006;
pub const PCP_PDU_INSTANCE: u32 = 0x7007;
pub const PCP_PDU_TEXT_REQ: u32 = 0x7008;
pub const PCP_PDU_TEXT: u32 = 0x7009;
pub const PCP_PDU_CONTROL_REQ: u32 = 0x700a;
pub const PCP_PDU_CREDS: u32 = 0x700c;
pub const PCP_PDU_PMNS_IDS: u32 = 0x700d;
pub const PCP_PDU_PMNS_NAMES: u32 = 0x700e;
pub const PCP_PDU_PMNS_CHILD: u32 = 0x700f;
pub const PCP_PDU_PMNS_TRAVERSE: u32 = 0x7010;
pub const PCP_PDU_USER_AUTH: u32 = 0x7011;
pub const PCP_PDU_LABEL_REQ: u32 = 0x7012;
pub const PCP_PDU_LABEL: u32 = 0x7013;

pub fn pcp_pdu_name(pdu_type: u32) -> &'static str {
    match pdu_type {
        PCP_PDU_START_OR_ERROR => "START/ERROR",
        PCP_PDU_RESULT => "RESULT",
        PCP_PDU_PROFILE => "PROFILE",
        PCP_PDU_FETCH => "FETCH",
        PCP_PDU_DESC_REQ => "DESC_REQ",
        PCP_PDU_DESC => "DESC",
        PCP_PDU_INSTANCE_REQ => "INSTANCE_REQ",
        PCP_PDU_INSTANCE => "INSTANCE",
        PCP_PDU_TEXT_REQ => "TEXT_REQ",
        PCP_PDU_TEXT => "TEXT",
        PCP_PDU_CONTROL_REQ => "CONTROL_REQ",
        PCP_PDU_CREDS => "CREDS",
        PCP_PDU_PMNS_IDS => "PMNS_IDS",
        PCP_PDU_PMNS_NAMES => "PMNS_NAMES",
        PCP_PDU_PMNS_CHILD => "PMNS_CHILD",
        PCP_PDU_PMNS_TRAVERSE => "PMNS_TRAVERSE",
        PCP_PDU_USER_AUTH => "USER_AUTH",
        PCP_PDU_LABEL_REQ => "LABEL_REQ",
        PCP_PDU_LABEL => "LABEL",
        _ => "UNKNOWN",
    }
}

pub fn pcp_pdu_type_known(pdu_type: u32) -> bool {
    (PCP_PDU_START_OR_ERROR..=PCP_PDU_LABEL).contains(&pdu_type)
        && pdu_type != 0x700b
}

/* Feature bits advertised in the START status word. */
pub const PCP_PDU_FLAG_SECURE: u32 = 0x0001;
pub const PCP_PDU_FLAG_COMPRESS: u32 = 0x0002;
pub const PCP_PDU_FLAG_AUTH: u32 = 0x0004;
pub const PCP_PDU_FLAG_CREDS_REQD: u32 = 0x0008;
pub const PCP_PDU_FLAG_SECURE_ACK: u32 = 0x0010;
pub const PCP_PDU_FLAG_NO_NSS_INIT: u32 = 0x0020;
pub const PCP_PDU_FLAG_CONTAINER: u32 = 0x0040;
pub const PCP_PDU_FLAG_CERT_REQD: u32 = 0x0080;
/// Server writes label PDUs with correct byte order when set.
pub const PCP_PDU_FLAG_LABELS: u32 = 0x0200;

pub const PCP_FEATURE_FLAGS: &[(u32, &str)] = &[
    (PCP_PDU_FLAG_SECURE, "SECURE"),
    (PCP_PDU_FLAG_COMPRESS, "COMPRESS"),
    (PCP_PDU_FLAG_AUTH, "AUTH"),
    (PCP_PDU_FLAG_CREDS_REQD, "CREDS_REQD"),
    (PCP_PDU_FLAG_SECURE_ACK, "SECURE_ACK"),
    (PCP_PDU_FLAG_NO_NSS_INIT, "NO_NSS_INIT"),
    (PCP_PDU_FLAG_CONTAINER, "CONTAINER"),
    (PCP_PDU_FLAG_CERT_REQD, "CERT_REQD"),
    (PCP_PDU_FLAG_LABELS, "LABELS"),
];

/* pmapi error codes; returned negative in status words. */
pub const PM_ERR_NAME: i32 = -12357;

pub fn pm_error_string(code: i32) -> String {
    match code {
        -12345 => "PM_ERR_GENERIC",
        -12346 => "PM_ERR_PMNS",
        -12347 => "PM_ERR_NOPMNS",
        -12348 => "PM_ERR_DUPPMNS",
        -12349 => "PM_ERR_TEXT",
        -12350 => "PM_ERR_APPVERSION",
        -12351 => "PM_ERR_VALUE",
        -12352 => "PM_ERR_TIMEOUT",
        -12353 => "PM_ERR_NODATA",
        -12354 => "PM_ERR_RESET",
        -12357 => "PM_ERR_NAME",
        -12358 => "PM_ERR_PMID",
        -12359 => "PM_ERR_INDOM",
        -12360 => "PM_ERR_INST",
        -12361 => "PM_ERR_UNIT",
        -12362 => "PM_ERR_CONV",
        -12363 => "PM_ERR_TRUNC",
        -12364 => "PM_ERR_SIGN",
        -12365 => "PM_ERR_PROFILE",
        -12366 => "PM_ERR_IPC",
        -12368 => "PM_ERR_EOF",
        -12369 => "PM_ERR_NOTHOST",
        -12370 => "PM_ERR_EOL",
        -12371 => "PM_ERR_MODE",
        -12372 => "PM_ERR_LABEL",
        -12373 => "PM_ERR_LOGREC",
        -12374 => "PM_ERR_INDOM_LOG",
        -12375 => "PM_ERR_PMID_LOG",
        -12376 => "PM_ERR_NOTARCHIVE",
        -12377 => "PM_ERR_NOCONTEXT",
        -12378 => "PM_ERR_TOOSMALL",
        -12379 => "PM_ERR_TOOBIG",
        -12380 => "PM_ERR_FAULT",
        -12381 => "PM_ERR_THREAD",
        -12382 => "PM_ERR_NOCONTAINER",
        -12383 => "PM_ERR_BADSTORE",
        -12384 => "PM_ERR_LOGOVERLAP",
        -12385 => "PM_ERR_BADDERIVE",
        -12386 => "PM_ERR_NOLABELS",
        -12387 => "PM_ERR_PMDAFENCED",
        -12388 => "PM_ERR_RECTYPE",
        -12389 => "PM_ERR_FEATURE",
        -12390 => "PM_ERR_TLS",
        -12391 => "PM_ERR_ARG",
        -8765 => "PM_ERR_NYI",
        _ => return code.to_string(),
    }
    .to_string()
}

/* Metric value types carried in DESC and in RESULT value blocks. */
pub const PM_TYPE_32: u8 = 0;
pub const PM_TYPE_U32: u8 = 1;
pub const PM_TYPE_64: u8 = 2;
pub const PM_TYPE_U64: u8 = 3;
pub const PM_TYPE_FLOAT: u8 = 4;
pub const PM_TYPE_DOUBLE: u8 = 5;
pub const PM_TYPE_STRING: u8 = 6;
pub const PM_TYPE_AGGREGATE: u8 = 7;

pub fn pm_type_name(t: u8) -> &'static str {
    match t {
        PM_TYPE_32 => "32",
        PM_TYPE_U32 => "U32",
        PM_TYPE_64 => "64",
        PM_TYPE_U64 => "U64",
        PM_TYPE_FLOAT => "FLOAT",
        PM_TYPE_DOUBLE => "DOUBLE",
        PM_TYPE_STRING => "STRING",
        PM_TYPE_AGGREGATE => "AGGREGATE",
        _ => "UNKNOWN",
    }
}

/* Value format words in RESULT. */
pub const PM_VAL_INSITU: u32 = 0;
pub const PM_VAL_DPTR: u32 = 1;
pub const PM_VAL_SPTR: u32 = 2;

/* Ident type words shared by TEXT_REQ and LABEL_REQ. */
pub fn pcp_label_type_name(t: u32) -> &'static str {
    match t {
        0x01 => "CONTEXT",
        0x02 => "DOMAIN",
        0x04 => "INDOM",
        0x08 => "CLUSTER",
        0x10 => "ITEM",
        0x20 => "INSTANCES",
        _ => "UNKNOWN",
    }
}

/// Split a PMID into its (domain, cluster, item) bit fields.
/// Layout: 2 flag bits, 8 domain bits, 12 cluster bits, 10 item bits.
pub fn pmid_split(pmid: u32) -> (u32, u32, u32) {
    let domain = (pmid >> 22) & 0xff;
    let cluster = (pmid >> 10) & 0xfff;
    let item = pmid & 0x3ff;
    (domain, cluster, item)
}
