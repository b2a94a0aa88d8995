//! Demuxer facade: drives the framing layer and the reassembly engine and
//! hands out parsed records on demand.

use std::collections::VecDeque;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use tracing::warn;

use crate::accumulator::UnitAssembler;
use crate::buffer::{PacketBuffer, PacketSkipper};
use crate::cancellation::CancellationToken;
use crate::data::{DataPayload, DemuxerData, PacketsParser, parse_unit};
use crate::packet::Packet;
use crate::pool::{PacketPool, PayloadPool};
use crate::program_map::ProgramMap;
use crate::{DemuxError, Result};

/// A pull-based MPEG-TS demultiplexer over a byte reader.
///
/// Reading is demand-driven: each [`next_data`] call consumes just enough
/// packets to complete the next payload unit. The demuxer is not safe for
/// concurrent calls; callers serialize access. Records it hands out may be
/// dropped on other threads, which is why the backing pools are lock-guarded.
///
/// [`next_data`]: Demuxer::next_data
pub struct Demuxer<R> {
    reader: Option<R>,
    packet_buffer: Option<PacketBuffer<R>>,
    packet_size: usize,
    skip_err_limit: u32,
    skipper: Option<PacketSkipper>,
    packets_parser: Option<PacketsParser>,
    program_map: ProgramMap,
    assembler: UnitAssembler,
    data_buffer: VecDeque<DemuxerData>,
    token: CancellationToken,
    packet_pool: Arc<PacketPool>,
    payload_pool: Arc<PayloadPool>,
}

impl<R: Read> Demuxer<R> {
    pub fn new(reader: R) -> Self {
        Demuxer {
            reader: Some(reader),
            packet_buffer: None,
            packet_size: 0,
            skip_err_limit: 0,
            skipper: None,
            packets_parser: None,
            program_map: ProgramMap::new(),
            assembler: UnitAssembler::new(),
            data_buffer: VecDeque::new(),
            token: CancellationToken::new(),
            packet_pool: Arc::new(PacketPool::new()),
            payload_pool: Arc::new(PayloadPool::new()),
        }
    }

    /// Physical packet size in bytes; zero (the default) auto-detects from
    /// the first sync bytes.
    pub fn with_packet_size(mut self, packet_size: usize) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Number of recoverable per-packet parse errors tolerated before one is
    /// surfaced.
    pub fn with_skip_error_limit(mut self, limit: u32) -> Self {
        self.skip_err_limit = limit;
        self
    }

    /// Predicate deciding, from the parsed header, whether a packet is
    /// dropped before it enters reassembly.
    pub fn with_packet_skipper(mut self, skipper: PacketSkipper) -> Self {
        self.skipper = Some(skipper);
        self
    }

    /// Custom parser invoked on each completed unit before the native one.
    pub fn with_packets_parser(mut self, parser: PacketsParser) -> Self {
        self.packets_parser = Some(parser);
        self
    }

    /// Cancellation token polled by [`next_packet`] and [`next_data`].
    ///
    /// [`next_packet`]: Demuxer::next_packet
    /// [`next_data`]: Demuxer::next_data
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Share a packet pool with other demuxers instead of owning one.
    pub fn with_packet_pool(mut self, pool: Arc<PacketPool>) -> Self {
        self.packet_pool = pool;
        self
    }

    /// Share a scratch-payload pool with other demuxers instead of owning one.
    pub fn with_payload_pool(mut self, pool: Arc<PayloadPool>) -> Self {
        self.payload_pool = pool;
        self
    }

    /// PMT-PID to program-number associations learned from PATs so far.
    pub fn program_map(&self) -> &ProgramMap {
        &self.program_map
    }

    /// Pool that recycles packet allocations.
    pub fn packet_pool(&self) -> &Arc<PacketPool> {
        &self.packet_pool
    }

    /// Pool that recycles scratch payload buffers.
    pub fn payload_pool(&self) -> &Arc<PayloadPool> {
        &self.payload_pool
    }

    /// Release a packet obtained from [`next_packet`] back to the pool.
    ///
    /// [`next_packet`]: Demuxer::next_packet
    pub fn recycle(&self, packet: Box<Packet>) {
        self.packet_pool.put(packet);
    }

    fn packet_buffer(&mut self) -> Result<&mut PacketBuffer<R>> {
        if self.packet_buffer.is_none() {
            // The reader is only gone if a previous initialization failed;
            // the stream is unusable then.
            let Some(reader) = self.reader.take() else {
                return Err(DemuxError::NoMorePackets);
            };
            self.packet_buffer = Some(PacketBuffer::new(
                reader,
                self.packet_size,
                self.skip_err_limit,
                self.skipper.clone(),
            )?);
        }
        Ok(self
            .packet_buffer
            .as_mut()
            .expect("packet buffer was just built"))
    }

    /// Read the next packet.
    ///
    /// The caller owns the returned packet and should hand it back via
    /// [`recycle`] once done.
    ///
    /// [`recycle`]: Demuxer::recycle
    pub fn next_packet(&mut self) -> Result<Box<Packet>> {
        if self.token.is_cancelled() {
            return Err(DemuxError::Cancelled);
        }
        let mut packet = self.packet_pool.get();
        match self.packet_buffer()?.next(&mut packet) {
            Ok(()) => Ok(packet),
            Err(e) => {
                self.packet_pool.put(packet);
                Err(e)
            }
        }
    }

    /// Read packets until the next payload unit completes and return its
    /// first record; further records from the same unit are buffered.
    ///
    /// At end of stream the per-PID accumulators are drained in ascending
    /// PID order so trailing units (typically PES with no terminating start
    /// indicator) are still delivered; the call returns
    /// [`DemuxError::NoMorePackets`] once everything is flushed.
    pub fn next_data(&mut self) -> Result<DemuxerData> {
        if self.token.is_cancelled() {
            return Err(DemuxError::Cancelled);
        }
        if let Some(data) = self.data_buffer.pop_front() {
            return Ok(data);
        }

        loop {
            let packet = match self.next_packet() {
                Ok(packet) => packet,
                Err(DemuxError::NoMorePackets) => return self.drain(),
                Err(e) => return Err(e),
            };

            let Some(unit) = self.assembler.push(
                packet,
                &self.program_map,
                &self.packet_pool,
                &self.payload_pool,
            ) else {
                continue;
            };

            let records = parse_unit(
                unit,
                self.packets_parser.as_mut(),
                &self.program_map,
                &self.packet_pool,
                &self.payload_pool,
            )?;
            if let Some(data) = self.update_data(records) {
                return Ok(data);
            }
        }
    }

    /// End-of-stream mode: drain accumulators until one yields a record.
    ///
    /// Parse failures are expected here since trailing units may be cut
    /// short; they are logged and skipped so later PIDs still come through.
    fn drain(&mut self) -> Result<DemuxerData> {
        loop {
            if self.token.is_cancelled() {
                return Err(DemuxError::Cancelled);
            }
            let Some(unit) = self.assembler.dump() else {
                return Err(DemuxError::NoMorePackets);
            };
            let pid = unit.head().map(|p| p.header.pid);
            match parse_unit(
                unit,
                self.packets_parser.as_mut(),
                &self.program_map,
                &self.packet_pool,
                &self.payload_pool,
            ) {
                Ok(records) => {
                    if let Some(data) = self.update_data(records) {
                        return Ok(data);
                    }
                }
                Err(e) => {
                    warn!(pid, error = %e, "dropping incomplete trailing unit");
                }
            }
        }
    }

    /// Queue all but the first record and fold PAT entries into the program
    /// map so the PIDs they announce are classified as PMT from now on.
    fn update_data(&mut self, records: Vec<DemuxerData>) -> Option<DemuxerData> {
        if records.is_empty() {
            return None;
        }
        for record in &records {
            if let DataPayload::Pat(pat) = &record.payload {
                for program in &pat.programs {
                    // Program number zero announces the NIT, not a PMT.
                    if program.program_number > 0 {
                        self.program_map
                            .set(program.program_map_pid, program.program_number);
                    }
                }
            }
        }
        let mut records = records.into_iter();
        let first = records.next();
        self.data_buffer.extend(records);
        first
    }
}

impl<R: Read + Seek> Demuxer<R> {
    /// Reset all demuxing state and seek the reader back to the start.
    pub fn rewind(&mut self) -> Result<u64> {
        self.data_buffer.clear();
        self.assembler.reset(&self.packet_pool);
        let mut reader = match self.packet_buffer.take() {
            Some(packet_buffer) => packet_buffer.into_reader(),
            None => self.reader.take().ok_or(DemuxError::NoMorePackets)?,
        };
        let n = reader.seek(SeekFrom::Start(0))?;
        self.reader = Some(reader);
        Ok(n)
    }
}
