//! MPEG-2 Transport Stream demultiplexer.
//!
//! This crate reads a raw transport stream (ISO/IEC 13818-1) from any
//! [`std::io::Read`] source and emits typed payload units: PSI/SI tables
//! (PAT, PMT, NIT, SDT, EIT, TOT per ETSI EN 300 468) and PES packets, each
//! tagged with its PID and adaptation-field metadata.
//!
//! The pipeline is strictly layered: the packet buffer locates packet
//! boundaries (188-byte standard and 192-byte M2TS slots, auto-detected),
//! the per-PID assembler tracks continuity counters and groups packets into
//! payload units, and the payload parsers decode PSI sections (with MPEG-2
//! CRC-32 validation) and PES headers. Scratch payloads and packets are
//! recycled through size-bucketed pools.
//!
//! ```no_run
//! use std::fs::File;
//! use std::io::BufReader;
//!
//! fn main() -> tsdemux::Result<()> {
//!     let file = BufReader::new(File::open("stream.ts")?);
//!     let mut demuxer = tsdemux::Demuxer::new(file);
//!     loop {
//!         match demuxer.next_data() {
//!             Ok(data) => {
//!                 if let Some(pes) = data.pes() {
//!                     println!("PID {}: {} PES bytes", data.pid, pes.data().len());
//!                 }
//!             }
//!             Err(tsdemux::DemuxError::NoMorePackets) => break,
//!             Err(e) => return Err(e),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod accumulator;
pub mod buffer;
pub mod cancellation;
pub mod clock;
pub mod crc32;
pub mod cursor;
pub mod data;
pub mod demuxer;
pub mod descriptor;
pub mod dvb;
pub mod eit;
pub mod error;
pub mod nit;
pub mod packet;
pub mod pat;
pub mod pes;
pub mod pmt;
pub mod pool;
pub mod program_map;
pub mod psi;
pub mod sdt;
pub mod tot;

pub use accumulator::{PacketList, UnitAssembler};
pub use buffer::{PacketBuffer, PacketSkipper};
pub use cancellation::CancellationToken;
pub use clock::ClockReference;
pub use crc32::compute_crc32;
pub use cursor::ByteCursor;
pub use data::{DataPayload, DemuxerData, PID_CAT, PID_NULL, PID_PAT, PID_TSDT, PacketsParser};
pub use demuxer::Demuxer;
pub use descriptor::Descriptor;
pub use eit::{EitData, EitEvent};
pub use error::DemuxError;
pub use nit::{NitData, NitTransportStream};
pub use packet::{
    AdaptationField, M2TS_PACKET_SIZE, MPEGTS_PACKET_SIZE, Packet, PacketHeader, SYNC_BYTE,
};
pub use pat::{PatData, PatProgram};
pub use pes::{PesData, PesHeader, PesOptionalHeader};
pub use pmt::{PmtData, PmtElementaryStream, StreamType};
pub use pool::{PacketPool, PayloadPool, PooledBuffer};
pub use program_map::ProgramMap;
pub use psi::{PsiData, PsiSection, PsiTableBody, PsiTableId};
pub use sdt::{SdtData, SdtService};
pub use tot::TotData;

/// Result type for demuxing operations.
pub type Result<T> = std::result::Result<T, DemuxError>;
