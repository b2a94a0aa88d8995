use crate::descriptor::{Descriptor, parse_descriptors};
use crate::{ByteCursor, Result};

/// Running status values used by SDT services and EIT events
/// (EN 300 468 table 6).
pub const RUNNING_STATUS_UNDEFINED: u8 = 0;
pub const RUNNING_STATUS_NOT_RUNNING: u8 = 1;
pub const RUNNING_STATUS_STARTS_IN_A_FEW_SECONDS: u8 = 2;
pub const RUNNING_STATUS_PAUSING: u8 = 3;
pub const RUNNING_STATUS_RUNNING: u8 = 4;
pub const RUNNING_STATUS_OFF_AIR: u8 = 5;

/// One service entry of an SDT.
#[derive(Debug, Clone, PartialEq)]
pub struct SdtService {
    pub service_id: u16,
    /// EIT schedule information is present on this transport stream.
    pub has_eit_schedule: bool,
    /// EIT present/following information is present on this transport stream.
    pub has_eit_present_following: bool,
    pub running_status: u8,
    /// Access to one or more streams may be controlled by a CA system.
    pub has_free_csa_mode: bool,
    pub descriptors: Vec<Descriptor>,
}

/// Service Description Table body (EN 300 468 §5.2.3).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SdtData {
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub services: Vec<SdtService>,
}

impl SdtData {
    pub(crate) fn parse(
        cur: &mut ByteCursor<'_>,
        sections_end: usize,
        table_id_extension: u16,
    ) -> Result<Self> {
        let mut d = SdtData {
            transport_stream_id: table_id_extension,
            original_network_id: cur.next_u16()?,
            ..Default::default()
        };
        // Reserved byte.
        cur.skip(1)?;

        while cur.offset() < sections_end {
            let service_id = cur.next_u16()?;
            let b = cur.next_byte()?;
            let has_eit_schedule = b & 0x02 > 0;
            let has_eit_present_following = b & 0x01 > 0;

            let b = cur.next_byte()?;
            let running_status = b >> 5;
            let has_free_csa_mode = b & 0x10 > 0;
            // The byte also holds the top bits of the descriptor loop length.
            cur.skip(-1)?;

            d.services.push(SdtService {
                service_id,
                has_eit_schedule,
                has_eit_present_following,
                running_status,
                has_free_csa_mode,
                descriptors: parse_descriptors(cur)?,
            });
        }
        Ok(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ServiceDescriptor;

    #[test]
    fn parses_services_with_descriptors() {
        let mut bs = vec![
            0x00, 0x44, // original network id
            0xff, // reserved
            0x10, 0x01, // service id
            0xfd, // EIT schedule + present/following
        ];
        // running status 4, free CA, descriptor loop of one service descriptor
        let service_descriptor = [
            0x48, 0x09, 0x01, 0x04, b'p', b'r', b'o', b'v', 0x02, b't', b'v',
        ];
        bs.push(0x90 | (service_descriptor.len() >> 8) as u8);
        bs.push(service_descriptor.len() as u8);
        bs.extend_from_slice(&service_descriptor);

        let mut cur = ByteCursor::new(&bs);
        let sdt = SdtData::parse(&mut cur, bs.len(), 0x0001).unwrap();
        assert_eq!(sdt.transport_stream_id, 0x0001);
        assert_eq!(sdt.original_network_id, 0x0044);
        assert_eq!(sdt.services.len(), 1);

        let service = &sdt.services[0];
        assert_eq!(service.service_id, 0x1001);
        assert!(service.has_eit_schedule);
        assert!(service.has_eit_present_following);
        assert_eq!(service.running_status, RUNNING_STATUS_RUNNING);
        assert!(service.has_free_csa_mode);
        assert_eq!(
            service.descriptors,
            vec![Descriptor::Service(ServiceDescriptor {
                service_type: 0x01,
                provider: b"prov".to_vec(),
                name: b"tv".to_vec(),
            })]
        );
    }
}
