//! Per-PID reassembly: groups the packets of one payload unit together and
//! decides when a unit is complete.

use std::collections::BTreeMap;
use std::mem;
use std::sync::Arc;

use crate::ByteCursor;
use crate::data::is_psi_pid;
use crate::packet::Packet;
use crate::pool::{PacketPool, PayloadPool};
use crate::program_map::ProgramMap;
use crate::psi::{PsiTableId, should_stop_psi_parsing};

/// An ordered run of packets belonging to one payload unit, all on the same
/// PID, plus the total payload byte count across them.
#[derive(Debug, Default)]
pub struct PacketList {
    packets: Vec<Box<Packet>>,
    payload_len: usize,
}

impl PacketList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, packet: Box<Packet>) {
        self.payload_len += packet.payload().map_or(0, <[u8]>::len);
        self.packets.push(packet);
    }

    /// First packet of the unit; carries the adaptation field reported with
    /// the parsed record.
    pub fn head(&self) -> Option<&Packet> {
        self.packets.first().map(|v| &**v)
    }

    /// Most recently appended packet.
    pub fn tail(&self) -> Option<&Packet> {
        self.packets.last().map(|v| &**v)
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Total payload bytes across all held packets.
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    pub fn iter(&self) -> impl Iterator<Item = &Packet> {
        self.packets.iter().map(Box::as_ref)
    }

    /// Release every held packet back to the pool.
    pub fn release(&mut self, pool: &PacketPool) {
        for packet in self.packets.drain(..) {
            pool.put(packet);
        }
        self.payload_len = 0;
    }
}

/// Accumulates packets for a single PID.
#[derive(Debug)]
struct PacketAccumulator {
    pid: u16,
    q: PacketList,
}

impl PacketAccumulator {
    fn new(pid: u16) -> Self {
        PacketAccumulator {
            pid,
            q: PacketList::new(),
        }
    }

    /// Add a packet; returns a completed unit when one is ready.
    fn add(
        &mut self,
        packet: Box<Packet>,
        program_map: &ProgramMap,
        packet_pool: &PacketPool,
        payload_pool: &Arc<PayloadPool>,
    ) -> Option<PacketList> {
        // A retransmission repeats the previous continuity counter. A packet
        // that announces a discontinuity is a restart, not a retransmission,
        // even when the counters happen to match.
        if let Some(tail) = self.q.tail()
            && packet.header.has_payload
            && packet.header.continuity_counter == tail.header.continuity_counter
            && !packet
                .adaptation_field
                .as_ref()
                .is_some_and(|af| af.discontinuity_indicator)
        {
            packet_pool.put(packet);
            return None;
        }

        if self.has_discontinuity(&packet) {
            self.q.release(packet_pool);
        }

        let mut flushed = None;
        if packet.header.payload_unit_start_indicator && !self.q.is_empty() {
            flushed = Some(mem::take(&mut self.q));
        }

        self.q.push(packet);

        if is_psi_pid(self.pid, program_map) && is_psi_complete(&self.q, payload_pool) {
            // A unit flushed by the start indicator in the same call was an
            // incomplete leftover; drop it in favor of the finished section.
            if let Some(mut leftover) = flushed.take() {
                leftover.release(packet_pool);
            }
            flushed = Some(mem::take(&mut self.q));
        }

        flushed
    }

    fn has_discontinuity(&self, packet: &Packet) -> bool {
        if packet
            .adaptation_field
            .as_ref()
            .is_some_and(|af| af.discontinuity_indicator)
        {
            return !self.q.is_empty();
        }
        let Some(tail) = self.q.tail() else {
            return false;
        };
        let last_cc = tail.header.continuity_counter;
        if packet.header.has_payload {
            packet.header.continuity_counter != (last_cc + 1) % 16
        } else {
            packet.header.continuity_counter != last_cc
        }
    }
}

/// Checks whether the held payloads form one or more complete PSI sections:
/// every declared section length is covered by the concatenated bytes.
fn is_psi_complete(list: &PacketList, payload_pool: &Arc<PayloadPool>) -> bool {
    let mut scratch = PayloadPool::get(payload_pool, list.payload_len());
    let mut offset = 0;
    for packet in list.iter() {
        if let Some(payload) = packet.payload() {
            scratch[offset..offset + payload.len()].copy_from_slice(payload);
            offset += payload.len();
        }
    }

    let mut cur = ByteCursor::new(&scratch);
    let Ok(pointer_field) = cur.next_byte() else {
        return false;
    };
    if cur.skip(pointer_field as isize).is_err() {
        return false;
    }

    while cur.has_bytes_left() {
        let Ok(table_id) = cur.next_byte() else {
            return false;
        };
        if should_stop_psi_parsing(PsiTableId(table_id)) {
            break;
        }
        let Ok(val) = cur.next_u16() else {
            return false;
        };
        if cur.skip((val & 0xfff) as isize).is_err() {
            return false;
        }
    }

    cur.len() >= cur.offset()
}

/// Groups incoming packets into payload units, one accumulator per PID.
#[derive(Debug, Default)]
pub struct UnitAssembler {
    accumulators: BTreeMap<u16, PacketAccumulator>,
}

impl UnitAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a packet; returns a completed unit when one is ready.
    ///
    /// Packets flagged as corrupt and packets without payload are discarded.
    pub fn push(
        &mut self,
        packet: Box<Packet>,
        program_map: &ProgramMap,
        packet_pool: &PacketPool,
        payload_pool: &Arc<PayloadPool>,
    ) -> Option<PacketList> {
        if packet.header.transport_error_indicator || !packet.header.has_payload {
            packet_pool.put(packet);
            return None;
        }

        let pid = packet.header.pid;
        self.accumulators
            .entry(pid)
            .or_insert_with(|| PacketAccumulator::new(pid))
            .add(packet, program_map, packet_pool, payload_pool)
    }

    /// Drain the lowest-PID non-empty accumulator, removing it.
    ///
    /// Called repeatedly at end of stream to flush trailing units that no
    /// payload start ever terminated. Returns `None` once every accumulator
    /// is gone.
    pub fn dump(&mut self) -> Option<PacketList> {
        while let Some((_, acc)) = self.accumulators.pop_first() {
            if !acc.q.is_empty() {
                return Some(acc.q);
            }
        }
        None
    }

    /// Drop all held packets back to the pool.
    pub fn reset(&mut self, packet_pool: &PacketPool) {
        for (_, mut acc) in mem::take(&mut self.accumulators) {
            acc.q.release(packet_pool);
        }
    }
}
