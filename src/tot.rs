use chrono::{DateTime, Utc};

use crate::descriptor::{Descriptor, parse_descriptors};
use crate::dvb::parse_dvb_time;
use crate::{ByteCursor, Result};

/// Time Offset Table body (EN 300 468 §5.2.6).
#[derive(Debug, Clone, PartialEq)]
pub struct TotData {
    pub utc_time: DateTime<Utc>,
    pub descriptors: Vec<Descriptor>,
}

impl TotData {
    pub(crate) fn parse(cur: &mut ByteCursor<'_>) -> Result<Self> {
        Ok(TotData {
            utc_time: parse_dvb_time(cur)?,
            descriptors: parse_descriptors(cur)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{LocalTimeOffsetDescriptor, LocalTimeOffsetItem};
    use chrono::TimeZone;
    use std::time::Duration;

    #[test]
    fn parses_time_and_offsets() {
        let bs = [
            0xb0, 0xa2, 0x12, 0x45, 0x00, // 1982-09-06 12:45:00
            0xf0, 0x0f, // descriptors length
            0x58, 0x0d, // local time offset descriptor
            b'F', b'R', b'A', 0x02, // country, region 0, positive
            0x01, 0x00, // offset 1h
            0xb0, 0xa2, 0x12, 0x45, 0x00, // time of change
            0x02, 0x00, // next offset 2h
        ];
        let mut cur = ByteCursor::new(&bs);
        let tot = TotData::parse(&mut cur).unwrap();
        assert_eq!(
            tot.utc_time,
            Utc.with_ymd_and_hms(1982, 9, 6, 12, 45, 0).unwrap()
        );
        assert_eq!(
            tot.descriptors,
            vec![Descriptor::LocalTimeOffset(LocalTimeOffsetDescriptor {
                items: vec![LocalTimeOffsetItem {
                    country_code: *b"FRA",
                    country_region_id: 0,
                    local_time_offset_polarity: false,
                    local_time_offset: Duration::from_secs(3600),
                    time_of_change: Utc.with_ymd_and_hms(1982, 9, 6, 12, 45, 0).unwrap(),
                    next_time_offset: Duration::from_secs(7200),
                }],
            })]
        );
    }
}
