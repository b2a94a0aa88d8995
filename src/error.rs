use thiserror::Error;

/// Errors surfaced by the demuxer and its parsing layers.
#[derive(Error, Debug)]
pub enum DemuxError {
    /// Clean end of the transport stream.
    #[error("no more packets")]
    NoMorePackets,

    #[error("packet must start with a sync byte, got 0x{0:02x}")]
    PacketMustStartWithSyncByte(u8),

    /// A read overran the underlying buffer.
    #[error("end of buffer: needed {needed} bytes, {left} left")]
    EndOfBuffer { needed: usize, left: usize },

    /// Packet size auto-detection found no second sync byte.
    #[error("only one sync byte detected in first {0} bytes")]
    OnlyOneSyncByte(usize),

    /// Only 188-byte and 192-byte physical packets are supported.
    #[error("unsupported packet size {0}")]
    UnsupportedPacketSize(usize),

    #[error("CRC32 mismatch: stored 0x{stored:08x}, computed 0x{computed:08x}")]
    CrcMismatch { stored: u32, computed: u32 },

    /// PSI section length field exceeds the 1021-byte ceiling.
    #[error("section length {0} exceeds 1021")]
    SectionTooLong(u16),

    #[error("invalid DVB time")]
    InvalidDvbTime,

    /// Serialization is only implemented for PAT and PMT sections.
    #[error("writing table id 0x{0:02x} is not supported")]
    UnsupportedTableWrite(u8),

    /// Packet serialization would overflow the target packet size.
    #[error("can't write {payload} bytes of payload: only {available} available")]
    PayloadTooLarge { payload: usize, available: usize },

    /// PES declared a data end before its data start.
    #[error("data end {end} is before data start {start}")]
    InvalidDataBounds { start: usize, end: usize },

    #[error("cancelled")]
    Cancelled,

    #[error("custom packets parser failed: {0}")]
    PacketsParser(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DemuxError {
    /// Whether the error describes corruption local to a single packet.
    ///
    /// Recoverable errors are counted against the demuxer's skip-error budget
    /// and the offending packet is discarded; everything else is surfaced.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DemuxError::EndOfBuffer { .. })
    }
}
