use std::io::{ErrorKind, Read};
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use memchr::memchr;
use tracing::debug;

use crate::packet::{M2TS_PACKET_SIZE, MPEGTS_PACKET_SIZE, Packet, PacketHeader, SYNC_BYTE};
use crate::{DemuxError, Result};

/// Predicate consulted after a packet's header is parsed; returning `true`
/// drops the packet before adaptation-field and payload decoding.
pub type PacketSkipper = Arc<dyn Fn(&PacketHeader) -> bool + Send + Sync>;

/// Auto-detection peeks this many bytes: enough for two sync bytes at any
/// physical packet size up to 192.
const AUTO_DETECT_WINDOW: usize = 193;

/// Framing layer that cuts a byte reader into fixed-size packet slots.
pub struct PacketBuffer<R> {
    reader: R,
    packet_size: usize,
    /// Bytes consumed during packet-size detection, served before the reader.
    carryover: BytesMut,
    skipper: Option<PacketSkipper>,
    skip_err_counter: u32,
    skip_err_limit: u32,
}

impl<R: Read> PacketBuffer<R> {
    /// Build a packet buffer, auto-detecting the packet size when
    /// `packet_size` is zero.
    pub fn new(
        mut reader: R,
        packet_size: usize,
        skip_err_limit: u32,
        skipper: Option<PacketSkipper>,
    ) -> Result<Self> {
        let mut carryover = BytesMut::new();
        let packet_size = if packet_size == 0 {
            Self::auto_detect_packet_size(&mut reader, &mut carryover)?
        } else {
            packet_size
        };
        if !(MPEGTS_PACKET_SIZE..=M2TS_PACKET_SIZE).contains(&packet_size) {
            return Err(DemuxError::UnsupportedPacketSize(packet_size));
        }
        Ok(PacketBuffer {
            reader,
            packet_size,
            carryover,
            skipper,
            skip_err_counter: 0,
            skip_err_limit,
        })
    }

    /// Physical packet size in bytes, detected or configured.
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Hand the reader back, e.g. to rewind it.
    pub fn into_reader(self) -> R {
        self.reader
    }

    /// Detect the packet size from the spacing of the first two sync bytes.
    ///
    /// The peeked bytes are retained and served before the reader, so no
    /// packet is lost regardless of whether the reader is seekable.
    fn auto_detect_packet_size(reader: &mut R, carryover: &mut BytesMut) -> Result<usize> {
        let mut window = [0u8; AUTO_DETECT_WINDOW];
        let mut filled = 0;
        while filled < AUTO_DETECT_WINDOW {
            match reader.read(&mut window[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if filled == 0 {
            return Err(DemuxError::NoMorePackets);
        }
        if window[0] != SYNC_BYTE {
            return Err(DemuxError::PacketMustStartWithSyncByte(window[0]));
        }

        let tail = &window[MPEGTS_PACKET_SIZE.min(filled)..filled];
        let packet_size = memchr(SYNC_BYTE, tail)
            .map(|idx| MPEGTS_PACKET_SIZE + idx)
            .ok_or(DemuxError::OnlyOneSyncByte(AUTO_DETECT_WINDOW))?;
        debug!(packet_size, "auto-detected packet size");

        carryover.extend_from_slice(&window[..filled]);
        Ok(packet_size)
    }

    /// Fill `slot` from the carryover bytes, then the reader.
    ///
    /// A clean EOF before any byte of the slot, or a truncated trailing slot,
    /// both surface as [`DemuxError::NoMorePackets`].
    fn read_slot(&mut self, slot: &mut [u8]) -> Result<()> {
        let mut filled = self.carryover.len().min(slot.len());
        if filled > 0 {
            slot[..filled].copy_from_slice(&self.carryover[..filled]);
            self.carryover.advance(filled);
        }
        while filled < slot.len() {
            match self.reader.read(&mut slot[filled..]) {
                Ok(0) => return Err(DemuxError::NoMorePackets),
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Read and parse the next packet into `packet`.
    ///
    /// Skipped packets are read through transparently. Recoverable parse
    /// errors are counted against the skip-error budget: while under the
    /// limit the corrupt slot is dropped and reading continues; at the limit
    /// the error surfaces. Any successful parse resets the counter.
    pub fn next(&mut self, packet: &mut Packet) -> Result<()> {
        loop {
            let size = self.packet_size;
            self.read_slot(packet.slot_mut(size))?;

            let skipper = self.skipper.as_ref().map(|s| {
                let skip: &dyn Fn(&PacketHeader) -> bool = &**s;
                skip
            });
            match packet.parse(skipper) {
                Ok(false) => {
                    self.skip_err_counter = 0;
                    return Ok(());
                }
                Ok(true) => {
                    packet.reset();
                }
                Err(e) if e.is_recoverable() && self.skip_err_counter < self.skip_err_limit => {
                    self.skip_err_counter += 1;
                    debug!(
                        error = %e,
                        skipped = self.skip_err_counter,
                        limit = self.skip_err_limit,
                        "dropping unparsable packet"
                    );
                    packet.reset();
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::M2TS_PACKET_SIZE;
    use std::io::Cursor;

    fn build_packet(pid: u16, cc: u8) -> Vec<u8> {
        let mut bs = vec![0xffu8; MPEGTS_PACKET_SIZE];
        bs[0] = SYNC_BYTE;
        bs[1] = (pid >> 8) as u8 & 0x1f;
        bs[2] = pid as u8;
        bs[3] = 0x10 | (cc & 0x0f);
        bs
    }

    #[test]
    fn detects_standard_packet_size() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&build_packet(0x100, 0));
        stream.extend_from_slice(&build_packet(0x100, 1));
        let pb = PacketBuffer::new(Cursor::new(stream), 0, 0, None).unwrap();
        assert_eq!(pb.packet_size(), MPEGTS_PACKET_SIZE);
    }

    #[test]
    fn detects_m2ts_packet_size() {
        let mut stream = Vec::new();
        for cc in 0..2u8 {
            let ts = build_packet(0x100, cc);
            stream.push(SYNC_BYTE);
            stream.extend_from_slice(&[0, 0, 0, 0]);
            stream.extend_from_slice(&ts[1..]);
        }
        let pb = PacketBuffer::new(Cursor::new(stream), 0, 0, None).unwrap();
        assert_eq!(pb.packet_size(), M2TS_PACKET_SIZE);
    }

    #[test]
    fn detection_needs_a_leading_sync_byte() {
        let stream = vec![0x00u8; 400];
        assert!(matches!(
            PacketBuffer::new(Cursor::new(stream), 0, 0, None),
            Err(DemuxError::PacketMustStartWithSyncByte(0x00))
        ));
    }

    #[test]
    fn detection_fails_without_second_sync_byte() {
        let mut stream = vec![0x00u8; 400];
        stream[0] = SYNC_BYTE;
        assert!(matches!(
            PacketBuffer::new(Cursor::new(stream), 0, 0, None),
            Err(DemuxError::OnlyOneSyncByte(_))
        ));
    }

    #[test]
    fn detection_loses_no_packet() {
        let mut stream = Vec::new();
        for cc in 0..3u8 {
            stream.extend_from_slice(&build_packet(0x42, cc));
        }
        let mut pb = PacketBuffer::new(Cursor::new(stream), 0, 0, None).unwrap();
        let mut p = Packet::new();
        for cc in 0..3u8 {
            pb.next(&mut p).unwrap();
            assert_eq!(p.header.pid, 0x42);
            assert_eq!(p.header.continuity_counter, cc);
        }
        assert!(matches!(pb.next(&mut p), Err(DemuxError::NoMorePackets)));
    }

    #[test]
    fn truncated_tail_surfaces_as_no_more_packets() {
        let mut stream = build_packet(0x42, 0);
        stream.extend_from_slice(&build_packet(0x42, 1)[..100]);
        let mut pb =
            PacketBuffer::new(Cursor::new(stream), MPEGTS_PACKET_SIZE, 0, None).unwrap();
        let mut p = Packet::new();
        pb.next(&mut p).unwrap();
        assert!(matches!(pb.next(&mut p), Err(DemuxError::NoMorePackets)));
    }

    #[test]
    fn skipper_reads_through_rejected_packets() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&build_packet(0x1fff, 0));
        stream.extend_from_slice(&build_packet(0x1fff, 1));
        stream.extend_from_slice(&build_packet(0x42, 0));
        let skipper: PacketSkipper = Arc::new(|h: &PacketHeader| h.pid == 0x1fff);
        let mut pb =
            PacketBuffer::new(Cursor::new(stream), MPEGTS_PACKET_SIZE, 0, Some(skipper)).unwrap();
        let mut p = Packet::new();
        pb.next(&mut p).unwrap();
        assert_eq!(p.header.pid, 0x42);
    }

    #[test]
    fn skip_error_budget_tolerates_corrupt_packets() {
        // Middle packet advertises an adaptation field that overruns the slot.
        let mut corrupt = build_packet(0x42, 1);
        corrupt[3] = 0x30 | 1;
        corrupt[4] = 200; // adaptation field length larger than the packet
        let mut stream = Vec::new();
        stream.extend_from_slice(&build_packet(0x42, 0));
        stream.extend_from_slice(&corrupt);
        stream.extend_from_slice(&build_packet(0x42, 2));

        // With budget: the corrupt slot is dropped.
        let mut pb = PacketBuffer::new(
            Cursor::new(stream.clone()),
            MPEGTS_PACKET_SIZE,
            1,
            None,
        )
        .unwrap();
        let mut p = Packet::new();
        pb.next(&mut p).unwrap();
        assert_eq!(p.header.continuity_counter, 0);
        pb.next(&mut p).unwrap();
        assert_eq!(p.header.continuity_counter, 2);

        // Without budget: the error surfaces.
        let mut pb =
            PacketBuffer::new(Cursor::new(stream), MPEGTS_PACKET_SIZE, 0, None).unwrap();
        pb.next(&mut p).unwrap();
        assert!(matches!(
            pb.next(&mut p),
            Err(DemuxError::EndOfBuffer { .. })
        ));
    }
}
