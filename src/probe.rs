/// Return value from protocol probe trying to identify a protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The format was recognized with great probability
    Certain,
    /// The format was recognized with great probability, in opposite direction
    Reverse,
    /// The format is recognized, but could be something else.
    /// Continue sending more data
    Unsure,
    /// The format is identified as not for this parser, do not send more data
    NotForUs,
    /// An error occurred in the format probe (fatal)
    Fatal,
}

pub struct L4Info {
    pub src_port: u16,
    pub dst_port: u16,
    pub l4_proto: u8,
}

/// Stateless probe for Layer 4 protocol identification
pub type ProbeL4 = fn(&[u8], &L4Info) -> ProbeResult;
