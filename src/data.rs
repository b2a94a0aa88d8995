//! Typed output records and the payload-unit parser that produces them.

use std::sync::Arc;

use crate::ByteCursor;
use crate::accumulator::PacketList;
use crate::eit::EitData;
use crate::nit::NitData;
use crate::packet::AdaptationField;
use crate::pat::PatData;
use crate::pes::{PesData, is_pes_payload};
use crate::pmt::PmtData;
use crate::pool::{PacketPool, PayloadPool};
use crate::program_map::ProgramMap;
use crate::psi::{PsiData, PsiTableBody, parse_psi};
use crate::sdt::SdtData;
use crate::tot::TotData;
use crate::{DemuxError, Result};

/// Program Association Table.
pub const PID_PAT: u16 = 0x0000;
/// Conditional Access Table; its payload is private to the CA system.
pub const PID_CAT: u16 = 0x0001;
/// Transport Stream Description Table.
pub const PID_TSDT: u16 = 0x0002;
/// Null packets used for fixed-bandwidth padding.
pub const PID_NULL: u16 = 0x1fff;

/// Custom per-unit parser. Receives the completed packet run and returns its
/// records plus whether the native parsing path should be skipped.
pub type PacketsParser =
    Box<dyn FnMut(&PacketList) -> Result<(Vec<DemuxerData>, bool)> + Send>;

/// The payload carried by a [`DemuxerData`] record.
#[derive(Debug)]
pub enum DataPayload {
    Pat(PatData),
    Pmt(PmtData),
    Nit(NitData),
    Sdt(SdtData),
    Eit(EitData),
    Tot(TotData),
    Pes(PesData),
}

/// One parsed payload unit: a PSI table or a PES packet, tagged with its PID
/// and the adaptation field seen at the start of the unit.
///
/// A PES record owns a pooled scratch buffer; dropping the record (or calling
/// [`DemuxerData::close`]) returns the buffer to its size bucket.
#[derive(Debug)]
pub struct DemuxerData {
    pub pid: u16,
    pub adaptation_field: Option<AdaptationField>,
    pub payload: DataPayload,
}

impl DemuxerData {
    /// Release any pooled resources held by this record.
    pub fn close(self) {}

    pub fn pat(&self) -> Option<&PatData> {
        match &self.payload {
            DataPayload::Pat(d) => Some(d),
            _ => None,
        }
    }

    pub fn pmt(&self) -> Option<&PmtData> {
        match &self.payload {
            DataPayload::Pmt(d) => Some(d),
            _ => None,
        }
    }

    pub fn nit(&self) -> Option<&NitData> {
        match &self.payload {
            DataPayload::Nit(d) => Some(d),
            _ => None,
        }
    }

    pub fn sdt(&self) -> Option<&SdtData> {
        match &self.payload {
            DataPayload::Sdt(d) => Some(d),
            _ => None,
        }
    }

    pub fn eit(&self) -> Option<&EitData> {
        match &self.payload {
            DataPayload::Eit(d) => Some(d),
            _ => None,
        }
    }

    pub fn tot(&self) -> Option<&TotData> {
        match &self.payload {
            DataPayload::Tot(d) => Some(d),
            _ => None,
        }
    }

    pub fn pes(&self) -> Option<&PesData> {
        match &self.payload {
            DataPayload::Pes(d) => Some(d),
            _ => None,
        }
    }
}

/// Whether `pid` carries PSI sections: the PAT, a PMT announced by it, or one
/// of the well-known DVB SI PIDs (0x10-0x14, 0x1E-0x1F).
pub(crate) fn is_psi_pid(pid: u16, program_map: &ProgramMap) -> bool {
    pid == PID_PAT
        || program_map.exists(pid)
        || (0x10..=0x14).contains(&pid)
        || (0x1e..=0x1f).contains(&pid)
}

fn psi_into_records(
    psi: PsiData,
    adaptation_field: Option<&AdaptationField>,
    pid: u16,
) -> Vec<DemuxerData> {
    psi.sections
        .into_iter()
        .filter_map(|section| {
            let payload = match section.body? {
                PsiTableBody::Pat(d) => DataPayload::Pat(d),
                PsiTableBody::Pmt(d) => DataPayload::Pmt(d),
                PsiTableBody::Nit(d) => DataPayload::Nit(d),
                PsiTableBody::Sdt(d) => DataPayload::Sdt(d),
                PsiTableBody::Eit(d) => DataPayload::Eit(d),
                PsiTableBody::Tot(d) => DataPayload::Tot(d),
            };
            Some(DemuxerData {
                pid,
                adaptation_field: adaptation_field.cloned(),
                payload,
            })
        })
        .collect()
}

/// Parse one completed unit into records, releasing the packets to the pool.
///
/// The payload slices of all packets are concatenated into one pooled scratch
/// buffer. PSI units release the scratch as soon as their tables are decoded;
/// a PES record keeps it alive until the record is dropped.
pub(crate) fn parse_unit(
    mut list: PacketList,
    packets_parser: Option<&mut PacketsParser>,
    program_map: &ProgramMap,
    packet_pool: &PacketPool,
    payload_pool: &Arc<PayloadPool>,
) -> Result<Vec<DemuxerData>> {
    let mut records = Vec::new();
    if let Some(parser) = packets_parser {
        let (custom, skip) = match parser(&list) {
            Ok(out) => out,
            Err(e) => {
                list.release(packet_pool);
                return Err(DemuxError::PacketsParser(e.to_string()));
            }
        };
        records = custom;
        if skip {
            list.release(packet_pool);
            return Ok(records);
        }
    }

    let Some(head) = list.head() else {
        return Ok(records);
    };
    let pid = head.header.pid;
    let adaptation_field = head.adaptation_field.clone();

    let mut scratch = PayloadPool::get(payload_pool, list.payload_len());
    let mut offset = 0;
    for packet in list.iter() {
        if let Some(payload) = packet.payload() {
            scratch[offset..offset + payload.len()].copy_from_slice(payload);
            offset += payload.len();
        }
    }
    list.release(packet_pool);

    if pid == PID_CAT {
        // CA payloads are system-private; only a custom parser can decode
        // them, so the native path produces nothing.
    } else if is_psi_pid(pid, program_map) {
        let psi = {
            let mut cur = ByteCursor::new(&scratch);
            parse_psi(&mut cur)?
        };
        records.extend(psi_into_records(psi, adaptation_field.as_ref(), pid));
    } else if is_pes_payload(&scratch) {
        records.push(DemuxerData {
            pid,
            adaptation_field,
            payload: DataPayload::Pes(PesData::parse(scratch)?),
        });
    }
    Ok(records)
}
