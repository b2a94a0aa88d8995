use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::descriptor::{Descriptor, parse_descriptors};
use crate::dvb::{parse_dvb_duration_seconds, parse_dvb_time};
use crate::{ByteCursor, Result};

/// One event entry of an EIT.
#[derive(Debug, Clone, PartialEq)]
pub struct EitEvent {
    pub event_id: u16,
    pub start_time: DateTime<Utc>,
    pub duration: Duration,
    pub running_status: u8,
    /// Access to one or more streams may be controlled by a CA system.
    pub has_free_csa_mode: bool,
    pub descriptors: Vec<Descriptor>,
}

/// Event Information Table body (EN 300 468 §5.2.4).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EitData {
    pub service_id: u16,
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub segment_last_section_number: u8,
    pub last_table_id: u8,
    pub events: Vec<EitEvent>,
}

impl EitData {
    pub(crate) fn parse(
        cur: &mut ByteCursor<'_>,
        sections_end: usize,
        table_id_extension: u16,
    ) -> Result<Self> {
        let mut d = EitData {
            service_id: table_id_extension,
            transport_stream_id: cur.next_u16()?,
            original_network_id: cur.next_u16()?,
            segment_last_section_number: cur.next_byte()?,
            last_table_id: cur.next_byte()?,
            ..Default::default()
        };

        while cur.offset() < sections_end {
            let event_id = cur.next_u16()?;
            let start_time = parse_dvb_time(cur)?;
            let duration = parse_dvb_duration_seconds(cur)?;

            let b = cur.next_byte()?;
            let running_status = b >> 5;
            let has_free_csa_mode = b & 0x10 > 0;
            // The byte also holds the top bits of the descriptor loop length.
            cur.skip(-1)?;

            d.events.push(EitEvent {
                event_id,
                start_time,
                duration,
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
    use crate::descriptor::ShortEventDescriptor;
    use chrono::TimeZone;

    #[test]
    fn parses_events() {
        let mut bs = vec![
            0x00, 0x01, // transport stream id
            0x00, 0x44, // original network id
            0x02, // segment last section number
            0x60, // last table id
            0x00, 0x05, // event id
            0xb0, 0xa2, 0x12, 0x45, 0x00, // start time 1982-09-06 12:45:00
            0x01, 0x30, 0x00, // duration 1h30
        ];
        let short_event = [
            0x4d, 0x0c, b'e', b'n', b'g', 0x04, b'n', b'e', b'w', b's', 0x03, b'a', b'b', b'c',
        ];
        // running status 4, descriptors loop length
        bs.push(0x80 | (short_event.len() >> 8) as u8);
        bs.push(short_event.len() as u8);
        bs.extend_from_slice(&short_event);

        let mut cur = ByteCursor::new(&bs);
        let eit = EitData::parse(&mut cur, bs.len(), 0x1001).unwrap();
        assert_eq!(eit.service_id, 0x1001);
        assert_eq!(eit.transport_stream_id, 0x0001);
        assert_eq!(eit.original_network_id, 0x0044);
        assert_eq!(eit.segment_last_section_number, 2);
        assert_eq!(eit.last_table_id, 0x60);
        assert_eq!(eit.events.len(), 1);

        let event = &eit.events[0];
        assert_eq!(event.event_id, 5);
        assert_eq!(
            event.start_time,
            Utc.with_ymd_and_hms(1982, 9, 6, 12, 45, 0).unwrap()
        );
        assert_eq!(event.duration, Duration::from_secs(5400));
        assert_eq!(event.running_status, 4);
        assert!(!event.has_free_csa_mode);
        assert_eq!(
            event.descriptors,
            vec![Descriptor::ShortEvent(ShortEventDescriptor {
                language: *b"eng",
                event_name: b"news".to_vec(),
                text: b"abc".to_vec(),
            })]
        );
    }
}
