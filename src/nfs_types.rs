//! NFS protocol constants and name tables.

/* RFC 1094, section 'A.2.2 Server Procedures' */
pub const NFSPROC2_NULL: u32 = 0;
pub const NFSPROC2_GETATTR: u32 = 1;
pub const NFSPROC2_SETATTR: u32 = 2;
pub const NFSPROC2_ROOT: u32 = 3;
pub const NFSPROC2_LOOKUP: u32 = 4;
pub const NFSPROC2_READLINK: u32 = 5;
pub const NFSPROC2_READ: u32 = 6;
pub const NFSPROC2_WRITECACHE: u32 = 7;
pub const NFSPROC2_WRITE: u32 = 8;
pub const NFSPROC2_CREATE: u32 = 9;
pub const NFSPROC2_REMOVE: u32 = 10;
pub const NFSPROC2_RENAME: u32 = 11;
pub const NFSPROC2_LINK: u32 = 12;
pub const NFSPROC2_SYMLINK: u32 = 13;
pub const NFSPROC2_MKDIR: u32 = 14;
pub const NFSPROC2_RMDIR: u32 = 15;
pub const NFSPROC2_READDIR: u32 = 16;
pub const NFSPROC2_STATFS: u32 = 17;

/// Fixed file-handle size in NFSv2.
pub const FHSIZE2: usize = 32;

pub fn nfs2_procedure_string(procedure: u32) -> String {
    match procedure {
        NFSPROC2_NULL => "NULL",
        NFSPROC2_GETATTR => "GETATTR",
        NFSPROC2_SETATTR => "SETATTR",
        NFSPROC2_ROOT => "ROOT",
        NFSPROC2_LOOKUP => "LOOKUP",
        NFSPROC2_READLINK => "READLINK",
        NFSPROC2_READ => "READ",
        NFSPROC2_WRITECACHE => "WRITECACHE",
        NFSPROC2_WRITE => "WRITE",
        NFSPROC2_CREATE => "CREATE",
        NFSPROC2_REMOVE => "REMOVE",
        NFSPROC2_RENAME => "RENAME",
        NFSPROC2_LINK => "LINK",
        NFSPROC2_SYMLINK => "SYMLINK",
        NFSPROC2_MKDIR => "MKDIR",
        NFSPROC2_RMDIR => "RMDIR",
        NFSPROC2_READDIR => "READDIR",
        NFSPROC2_STATFS => "STATFS",
        _ => return procedure.to_string(),
    }
    .to_string()
}

/* RFC 1813, section '3. Server Procedures' */
pub const NFSPROC3_NULL: u32 = 0;
pub const NFSPROC3_GETATTR: u32 = 1;
pub const NFSPROC3_SETATTR: u32 = 2;
pub const NFSPROC3_LOOKUP: u32 = 3;
pub const NFSPROC3_ACCESS: u32 = 4;
pub const NFSPROC3_READLINK: u32 = 5;
pub const NFSPROC3_READ: u32 = 6;
pub const NFSPROC3_WRITE: u32 = 7;
pub const NFSPROC3_CREATE: u32 = 8;
pub const NFSPROC3_MKDIR: u32 = 9;
pub const NFSPROC3_SYMLINK: u32 = 10;
pub const NFSPROC3_MKNOD: u32 = 11;
pub const NFSPROC3_REMOVE: u32 = 12;
pub const NFSPROC3_RMDIR: u32 = 13;
pub const NFSPROC3_RENAME: u32 = 14;
pub const NFSPROC3_LINK: u32 = 15;
pub const NFSPROC3_READDIR: u32 = 16;
pub const NFSPROC3_READDIRPLUS: u32 = 17;
pub const NFSPROC3_FSSTAT: u32 = 18;
pub const NFSPROC3_FSINFO: u32 = 19;
pub const NFSPROC3_PATHCONF: u32 = 20;
pub const NFSPROC3_COMMIT: u32 = 21;

pub fn nfs3_procedure_string(procedure: u32) -> String {
    match procedure {
        NFSPROC3_NULL => "NULL",
        NFSPROC3_GETATTR => "GETATTR",
        NFSPROC3_SETATTR => "SETATTR",
        NFSPROC3_LOOKUP => "LOOKUP",
        NFSPROC3_ACCESS => "ACCESS",
        NFSPROC3_READLINK => "READLINK",
        NFSPROC3_READ => "READ",
        NFSPROC3_WRITE => "WRITE",
        NFSPROC3_CREATE => "CREATE",
        NFSPROC3_MKDIR => "MKDIR",
        NFSPROC3_SYMLINK => "SYMLINK",
        NFSPROC3_MKNOD => "MKNOD",
        NFSPROC3_REMOVE => "REMOVE",
        NFSPROC3_RMDIR => "RMDIR",
        NFSPROC3_RENAME => "RENAME",
        NFSPROC3_LINK => "LINK",
        NFSPROC3_READDIR => "READDIR",
        NFSPROC3_READDIRPLUS => "READDIRPLUS",
        NFSPROC3_FSSTAT => "FSSTAT",
        NFSPROC3_FSINFO => "FSINFO",
        NFSPROC3_PATHCONF => "PATHCONF",
        NFSPROC3_COMMIT => "COMMIT",
        _ => return procedure.to_string(),
    }
    .to_string()
}

/* RFC 1813, section '2.6 Defined Error Numbers' */
pub fn nfs3_status_string(status: u32) -> String {
    match status {
        0 => "NFS3_OK",
        1 => "NFS3ERR_PERM",
        2 => "NFS3ERR_NOENT",
        5 => "NFS3ERR_IO",
        6 => "NFS3ERR_NXIO",
        13 => "NFS3ERR_ACCES",
        17 => "NFS3ERR_EXIST",
        18 => "NFS3ERR_XDEV",
        19 => "NFS3ERR_NODEV",
        20 => "NFS3ERR_NOTDIR",
        21 => "NFS3ERR_ISDIR",
        22 => "NFS3ERR_INVAL",
        27 => "NFS3ERR_FBIG",
        28 => "NFS3ERR_NOSPC",
        30 => "NFS3ERR_ROFS",
        31 => "NFS3ERR_MLINK",
        63 => "NFS3ERR_NAMETOOLONG",
        66 => "NFS3ERR_NOTEMPTY",
        69 => "NFS3ERR_DQUOT",
        70 => "NFS3ERR_STALE",
        71 => "NFS3ERR_REMOTE",
        10001 => "NFS3ERR_BADHANDLE",
        10002 => "NFS3ERR_NOT_SYNC",
        10003 => "NFS3ERR_BAD_COOKIE",
        10004 => "NFS3ERR_NOTSUPP",
        10005 => "NFS3ERR_TOOSMALL",
        10006 => "NFS3ERR_SERVERFAULT",
        10007 => "NFS3ERR_BADTYPE",
        10008 => "NFS3ERR_JUKEBOX",
        _ => return status.to_string(),
    }
    .to_string()
}

/* RFC 7530 section 16.2, RFC 5661 section 18 */
pub const NFSPROC4_ACCESS: u32 = 3;
pub const NFSPROC4_CLOSE: u32 = 4;
pub const NFSPROC4_COMMIT: u32 = 5;
pub const NFSPROC4_CREATE: u32 = 6;
pub const NFSPROC4_DELEGPURGE: u32 = 7;
pub const NFSPROC4_DELEGRETURN: u32 = 8;
pub const NFSPROC4_GETATTR: u32 = 9;
pub const NFSPROC4_GETFH: u32 = 10;
pub const NFSPROC4_LINK: u32 = 11;
pub const NFSPROC4_LOCK: u32 = 12;
pub const NFSPROC4_LOCKT: u32 = 13;
pub const NFSPROC4_LOCKU: u32 = 14;
pub const NFSPROC4_LOOKUP: u32 = 15;
pub const NFSPROC4_LOOKUPP: u32 = 16;
pub const NFSPROC4_NVERIFY: u32 = 17;
pub const NFSPROC4_OPEN: u32 = 18;
pub const NFSPROC4_OPENATTR: u32 = 19;
pub const NFSPROC4_OPEN_CONFIRM: u32 = 20;
pub const NFSPROC4_OPEN_DOWNGRADE: u32 = 21;
pub const NFSPROC4_PUTFH: u32 = 22;
pub const NFSPROC4_PUTPUBFH: u32 = 23;
pub const NFSPROC4_PUTROOTFH: u32 = 24;
pub const NFSPROC4_READ: u32 = 25;
pub const NFSPROC4_READDIR: u32 = 26;
pub const NFSPROC4_READLINK: u32 = 27;
pub const NFSPROC4_REMOVE: u32 = 28;
pub const NFSPROC4_RENAME: u32 = 29;
pub const NFSPROC4_RENEW: u32 = 30;
pub const NFSPROC4_RESTOREFH: u32 = 31;
pub const NFSPROC4_SAVEFH: u32 = 32;
pub const NFSPROC4_SECINFO: u32 = 33;
pub const NFSPROC4_SETATTR: u32 = 34;
pub const NFSPROC4_SETCLIENTID: u32 = 35;
pub const NFSPROC4_SETCLIENTID_CONFIRM: u32 = 36;
pub const NFSPROC4_VERIFY: u32 = 37;
pub const NFSPROC4_WRITE: u32 = 38;
pub const NFSPROC4_RELEASE_LOCKOWNER: u32 = 39;
pub const NFSPROC4_BACKCHANNEL_CTL: u32 = 40;
pub const NFSPROC4_BIND_CONN_TO_SESSION: u32 = 41;
pub const NFSPROC4_EXCHANGE_ID: u32 = 42;
pub const NFSPROC4_CREATE_SESSION: u32 = 43;
pub const NFSPROC4_DESTROY_SESSION: u32 = 44;
pub const NFSPROC4_FREE_STATEID: u32 = 45;
pub const NFSPROC4_GET_DIR_DELEGATION: u32 = 46;
pub const NFSPROC4_GETDEVINFO: u32 = 47;
pub const NFSPROC4_GETDEVLIST: u32 = 48;
pub const NFSPROC4_LAYOUTCOMMIT: u32 = 49;
pub const NFSPROC4_LAYOUTGET: u32 = 50;
pub const NFSPROC4_LAYOUTRETURN: u32 = 51;
pub const NFSPROC4_SECINFO_NO_NAME: u32 = 52;
pub const NFSPROC4_SEQUENCE: u32 = 53;
pub const NFSPROC4_SET_SSV: u32 = 54;
pub const NFSPROC4_TEST_STATEID: u32 = 55;
pub const NFSPROC4_WANT_DELEGATION: u32 = 56;
pub const NFSPROC4_DESTROY_CLIENTID: u32 = 57;
pub const NFSPROC4_RECLAIM_COMPLETE: u32 = 58;

/// Reserved fallback opcode outside the contiguous run.
pub const NFSPROC4_ILLEGAL: u32 = 10044;

/// First and last opcode of the contiguous range this crate knows about.
pub const NFS4_FIRST_OP: u32 = NFSPROC4_ACCESS;
pub const NFS4_LAST_OP: u32 = NFSPROC4_RECLAIM_COMPLETE;

pub fn nfs4_op_name(op: u32) -> &'static str {
    match op {
        NFSPROC4_ACCESS => "ACCESS",
        NFSPROC4_CLOSE => "CLOSE",
        NFSPROC4_COMMIT => "COMMIT",
        NFSPROC4_CREATE => "CREATE",
        NFSPROC4_DELEGPURGE => "DELEGPURGE",
        NFSPROC4_DELEGRETURN => "DELEGRETURN",
        NFSPROC4_GETATTR => "GETATTR",
        NFSPROC4_GETFH => "GETFH",
        NFSPROC4_LINK => "LINK",
        NFSPROC4_LOCK => "LOCK",
        NFSPROC4_LOCKT => "LOCKT",
        NFSPROC4_LOCKU => "LOCKU",
        NFSPROC4_LOOKUP => "LOOKUP",
        NFSPROC4_LOOKUPP => "LOOKUPP",
        NFSPROC4_NVERIFY => "NVERIFY",
        NFSPROC4_OPEN => "OPEN",
        NFSPROC4_OPENATTR => "OPENATTR",
        NFSPROC4_OPEN_CONFIRM => "OPEN_CONFIRM",
        NFSPROC4_OPEN_DOWNGRADE => "OPEN_DOWNGRADE",
        NFSPROC4_PUTFH => "PUTFH",
        NFSPROC4_PUTPUBFH => "PUTPUBFH",
        NFSPROC4_PUTROOTFH => "PUTROOTFH",
        NFSPROC4_READ => "READ",
        NFSPROC4_READDIR => "READDIR",
        NFSPROC4_READLINK => "READLINK",
        NFSPROC4_REMOVE => "REMOVE",
        NFSPROC4_RENAME => "RENAME",
        NFSPROC4_RENEW => "RENEW",
        NFSPROC4_RESTOREFH => "RESTOREFH",
        NFSPROC4_SAVEFH => "SAVEFH",
        NFSPROC4_SECINFO => "SECINFO",
        NFSPROC4_SETATTR => "SETATTR",
        NFSPROC4_SETCLIENTID => "SETCLIENTID",
        NFSPROC4_SETCLIENTID_CONFIRM => "SETCLIENTID_CONFIRM",
        NFSPROC4_VERIFY => "VERIFY",
        NFSPROC4_WRITE => "WRITE",
        NFSPROC4_RELEASE_LOCKOWNER => "RELEASE_LOCKOWNER",
        NFSPROC4_BACKCHANNEL_CTL => "BACKCHANNEL_CTL",
        NFSPROC4_BIND_CONN_TO_SESSION => "BIND_CONN_TO_SESSION",
        NFSPROC4_EXCHANGE_ID => "EXCHANGE_ID",
        NFSPROC4_CREATE_SESSION => "CREATE_SESSION",
        NFSPROC4_DESTROY_SESSION => "DESTROY_SESSION",
        NFSPROC4_FREE_STATEID => "FREE_STATEID",
        NFSPROC4_GET_DIR_DELEGATION => "GET_DIR_DELEGATION",
        NFSPROC4_GETDEVINFO => "GETDEVINFO",
        NFSPROC4_GETDEVLIST => "GETDEVLIST",
        NFSPROC4_LAYOUTCOMMIT => "LAYOUTCOMMIT",
        NFSPROC4_LAYOUTGET => "LAYOUTGET",
        NFSPROC4_LAYOUTRETURN => "LAYOUTRETURN",
        NFSPROC4_SECINFO_NO_NAME => "SECINFO_NO_NAME",
        NFSPROC4_SEQUENCE => "SEQUENCE",
        NFSPROC4_SET_SSV => "SET_SSV",
        NFSPROC4_TEST_STATEID => "TEST_STATEID",
        NFSPROC4_WANT_DELEGATION => "WANT_DELEGATION",
        NFSPROC4_DESTROY_CLIENTID => "DESTROY_CLIENTID",
        NFSPROC4_RECLAIM_COMPLETE => "RECLAIM_COMPLETE",
        NFSPROC4_ILLEGAL => "ILLEGAL",
        _ => "UNKNOWN",
    }
}

/// Display significance per opcode: lower tier is more headline-worthy.
/// Tier 1 ops name files or move data; tier 2 ops are handle and session
/// housekeeping that accompanies nearly every compound.
pub fn nfs4_op_tier(op: u32) -> u8 {
    match op {
        NFSPROC4_CLOSE
        | NFSPROC4_COMMIT
        | NFSPROC4_CREATE
        | NFSPROC4_DELEGPURGE
        | NFSPROC4_DELEGRETURN
        | NFSPROC4_LINK
        | NFSPROC4_LOCK
        | NFSPROC4_LOCKT
        | NFSPROC4_LOCKU
        | NFSPROC4_LOOKUP
        | NFSPROC4_LOOKUPP
        | NFSPROC4_OPEN
        | NFSPROC4_OPENATTR
        | NFSPROC4_OPEN_CONFIRM
        | NFSPROC4_OPEN_DOWNGRADE
        | NFSPROC4_READ
        | NFSPROC4_READDIR
        | NFSPROC4_READLINK
        | NFSPROC4_REMOVE
        | NFSPROC4_RENAME
        | NFSPROC4_SECINFO
        | NFSPROC4_SECINFO_NO_NAME
        | NFSPROC4_SETATTR
        | NFSPROC4_SETCLIENTID
        | NFSPROC4_SETCLIENTID_CONFIRM
        | NFSPROC4_WRITE
        | NFSPROC4_EXCHANGE_ID
        | NFSPROC4_CREATE_SESSION
        | NFSPROC4_DESTROY_SESSION
        | NFSPROC4_DESTROY_CLIENTID
        | NFSPROC4_RECLAIM_COMPLETE
        | NFSPROC4_LAYOUTGET
        | NFSPROC4_LAYOUTCOMMIT
        | NFSPROC4_LAYOUTRETURN
        | NFSPROC4_GETDEVINFO => 1,
        _ => 2,
    }
}

pub fn nfs4_status_string(status: u32) -> String {
    match status {
        0 => "NFS4_OK",
        1 => "NFS4ERR_PERM",
        2 => "NFS4ERR_NOENT",
        5 => "NFS4ERR_IO",
        6 => "NFS4ERR_NXIO",
        13 => "NFS4ERR_ACCESS",
        17 => "NFS4ERR_EXIST",
        18 => "NFS4ERR_XDEV",
        20 => "NFS4ERR_NOTDIR",
        21 => "NFS4ERR_ISDIR",
        22 => "NFS4ERR_INVAL",
        27 => "NFS4ERR_FBIG",
        28 => "NFS4ERR_NOSPC",
        30 => "NFS4ERR_ROFS",
        31 => "NFS4ERR_MLINK",
        63 => "NFS4ERR_NAMETOOLONG",
        66 => "NFS4ERR_NOTEMPTY",
        69 => "NFS4ERR_DQUOT",
        70 => "NFS4ERR_STALE",
        10001 => "NFS4ERR_BADHANDLE",
        10003 => "NFS4ERR_BAD_COOKIE",
        10004 => "NFS4ERR_NOTSUPP",
        10005 => "NFS4ERR_TOOSMALL",
        10006 => "NFS4ERR_SERVERFAULT",
        10007 => "NFS4ERR_BADTYPE",
        10008 => "NFS4ERR_DELAY",
        10009 => "NFS4ERR_SAME",
        10010 => "NFS4ERR_DENIED",
        10011 => "NFS4ERR_EXPIRED",
        10012 => "NFS4ERR_LOCKED",
        10013 => "NFS4ERR_GRACE",
        10014 => "NFS4ERR_FHEXPIRED",
        10015 => "NFS4ERR_SHARE_DENIED",
        10016 => "NFS4ERR_WRONGSEC",
        10017 => "NFS4ERR_CLID_INUSE",
        10018 => "NFS4ERR_RESOURCE",
        10019 => "NFS4ERR_MOVED",
        10020 => "NFS4ERR_NOFILEHANDLE",
        10021 => "NFS4ERR_MINOR_VERS_MISMATCH",
        10022 => "NFS4ERR_STALE_CLIENTID",
        10023 => "NFS4ERR_STALE_STATEID",
        10024 => "NFS4ERR_OLD_STATEID",
        10025 => "NFS4ERR_BAD_STATEID",
        10026 => "NFS4ERR_BAD_SEQID",
        10027 => "NFS4ERR_NOT_SAME",
        10028 => "NFS4ERR_LOCK_RANGE",
        10029 => "NFS4ERR_SYMLINK",
        10030 => "NFS4ERR_RESTOREFH",
        10031 => "NFS4ERR_LEASE_MOVED",
        10032 => "NFS4ERR_ATTRNOTSUPP",
        10033 => "NFS4ERR_NO_GRACE",
        10034 => "NFS4ERR_RECLAIM_BAD",
        10035 => "NFS4ERR_RECLAIM_CONFLICT",
        10036 => "NFS4ERR_BADXDR",
        10037 => "NFS4ERR_LOCKS_HELD",
        10038 => "NFS4ERR_OPENMODE",
        10039 => "NFS4ERR_BADOWNER",
        10040 => "NFS4ERR_BADCHAR",
        10041 => "NFS4ERR_BADNAME",
        10042 => "NFS4ERR_BAD_RANGE",
        10043 => "NFS4ERR_LOCK_NOTSUPP",
        10044 => "NFS4ERR_OP_ILLEGAL",
        10045 => "NFS4ERR_DEADLOCK",
        10046 => "NFS4ERR_FILE_OPEN",
        10047 => "NFS4ERR_ADMIN_REVOKED",
        10048 => "NFS4ERR_CB_PATH_DOWN",
        _ => return status.to_string(),
    }
    .to_string()
}

/// fattr4 attribute bit names (RFC 7530 section 5, RFC 5661 section 5).
pub const FATTR4_BIT_NAMES: &[(u32, &str)] = &[
    (0, "Supported_Attrs"),
    (1, "Type"),
    (2, "FH_Expire_Type"),
    (3, "Change"),
    (4, "Size"),
    (5, "Link_Support"),
    (6, "Symlink_Support"),
    (7, "Named_Attr"),
    (8, "FSID"),
    (9, "Unique_Handles"),
    (10, "Lease_Time"),
    (11, "RDAttr_Error"),
    (12, "ACL"),
    (13, "ACL_Support"),
    (14, "Archive"),
    (15, "CanSetTime"),
    (16, "Case_Insensitive"),
    (17, "Case_Preserving"),
    (18, "Chown_Restricted"),
    (19, "FileHandle"),
    (20, "FileId"),
    (21, "Files_Avail"),
    (22, "Files_Free"),
    (23, "Files_Total"),
    (24, "FS_Locations"),
    (25, "Hidden"),
    (26, "Homogeneous"),
    (27, "MaxFileSize"),
    (28, "MaxLink"),
    (29, "MaxName"),
    (30, "MaxRead"),
    (31, "MaxWrite"),
    (32, "MIMEType"),
    (33, "Mode"),
    (34, "No_Trunc"),
    (35, "NumLinks"),
    (36, "Owner"),
    (37, "Owner_Group"),
    (38, "Quota_Avail_Hard"),
    (39, "Quota_Avail_Soft"),
    (40, "Quota_Used"),
    (41, "RawDev"),
    (42, "Space_Avail"),
    (43, "Space_Free"),
    (44, "Space_Total"),
    (45, "Space_Used"),
    (46, "System"),
    (47, "Time_Access"),
    (48, "Time_Access_Set"),
    (49, "Time_Backup"),
    (50, "Time_Create"),
    (51, "Time_Delta"),
    (52, "Time_Metadata"),
    (53, "Time_Modify"),
    (54, "Time_Modify_Set"),
    (55, "Mounted_On_FileId"),
    (56, "Dir_Notif_Delay"),
    (57, "Dirent_Notif_Delay"),
    (58, "DACL"),
    (59, "SACL"),
    (60, "Change_Policy"),
    (61, "FS_Status"),
    (62, "FS_Layout_Types"),
    (63, "Layout_Hint"),
    (64, "Layout_Types"),
    (65, "Layout_Blksize"),
    (66, "Layout_Alignment"),
    (67, "FS_Locations_Info"),
    (68, "MDS_Threshold"),
    (69, "Retention_Get"),
    (70, "Retention_Set"),
    (71, "RetentEvt_Get"),
    (72, "RetentEvt_Set"),
    (73, "Retention_Hold"),
    (74, "Mode_Set_Masked"),
    (75, "SuppAttr_ExclCreat"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_names_cover_contiguous_range() {
        for op in NFS4_FIRST_OP..=NFS4_LAST_OP {
            assert_ne!(nfs4_op_name(op), "UNKNOWN", "missing name for op {}", op);
        }
        assert_eq!(nfs4_op_name(NFSPROC4_ILLEGAL), "ILLEGAL");
        assert_eq!(nfs4_op_name(2), "UNKNOWN");
    }

    #[test]
    fn tiers_rank_data_ops_first() {
        assert_eq!(nfs4_op_tier(NFSPROC4_OPEN), 1);
        assert_eq!(nfs4_op_tier(NFSPROC4_PUTFH), 2);
        assert!(nfs4_op_tier(NFSPROC4_READ) < nfs4_op_tier(NFSPROC4_GETATTR));
    }
}
