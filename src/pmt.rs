use bytes::{BufMut, BytesMut};

use crate::descriptor::{
    Descriptor, calc_descriptors_length, parse_descriptors, write_descriptors_with_length,
};
use crate::{ByteCursor, Result};

/// Elementary stream types (ISO 13818-1 table 2-29 and common registrations).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Mpeg1Video,
    Mpeg2Video,
    Mpeg1Audio,
    Mpeg2Audio,
    PrivateSections,
    PrivatePes,
    AdtsAac,
    Mpeg4Visual,
    LatmAac,
    H264,
    Mpeg4Audio,
    H265,
    /// AC-3 audio as registered by ATSC A/52.
    Ac3,
    Dts,
    TrueHd,
    EAc3,
    Scte35,
    Other(u8),
}

impl From<u8> for StreamType {
    fn from(value: u8) -> Self {
        match value {
            0x01 => StreamType::Mpeg1Video,
            0x02 => StreamType::Mpeg2Video,
            0x03 => StreamType::Mpeg1Audio,
            0x04 => StreamType::Mpeg2Audio,
            0x05 => StreamType::PrivateSections,
            0x06 => StreamType::PrivatePes,
            0x0f => StreamType::AdtsAac,
            0x10 => StreamType::Mpeg4Visual,
            0x11 => StreamType::LatmAac,
            0x1b => StreamType::H264,
            0x1c => StreamType::Mpeg4Audio,
            0x24 => StreamType::H265,
            0x81 => StreamType::Ac3,
            0x82 => StreamType::Dts,
            0x83 => StreamType::TrueHd,
            0x84 => StreamType::EAc3,
            0x86 => StreamType::Scte35,
            other => StreamType::Other(other),
        }
    }
}

impl StreamType {
    /// Wire value of this stream type.
    pub fn value(&self) -> u8 {
        match self {
            StreamType::Mpeg1Video => 0x01,
            StreamType::Mpeg2Video => 0x02,
            StreamType::Mpeg1Audio => 0x03,
            StreamType::Mpeg2Audio => 0x04,
            StreamType::PrivateSections => 0x05,
            StreamType::PrivatePes => 0x06,
            StreamType::AdtsAac => 0x0f,
            StreamType::Mpeg4Visual => 0x10,
            StreamType::LatmAac => 0x11,
            StreamType::H264 => 0x1b,
            StreamType::Mpeg4Audio => 0x1c,
            StreamType::H265 => 0x24,
            StreamType::Ac3 => 0x81,
            StreamType::Dts => 0x82,
            StreamType::TrueHd => 0x83,
            StreamType::EAc3 => 0x84,
            StreamType::Scte35 => 0x86,
            StreamType::Other(value) => *value,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(
            self,
            StreamType::Mpeg1Video
                | StreamType::Mpeg2Video
                | StreamType::Mpeg4Visual
                | StreamType::H264
                | StreamType::H265
        )
    }

    pub fn is_audio(&self) -> bool {
        matches!(
            self,
            StreamType::Mpeg1Audio
                | StreamType::Mpeg2Audio
                | StreamType::AdtsAac
                | StreamType::LatmAac
                | StreamType::Mpeg4Audio
                | StreamType::Ac3
                | StreamType::Dts
                | StreamType::TrueHd
                | StreamType::EAc3
        )
    }
}

/// One elementary stream entry of a PMT.
#[derive(Debug, Clone, PartialEq)]
pub struct PmtElementaryStream {
    pub stream_type: StreamType,
    pub elementary_pid: u16,
    pub descriptors: Vec<Descriptor>,
}

/// Program Map Table body (ISO 13818-1 §2.4.4.8).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PmtData {
    pub program_number: u16,
    /// PID carrying the PCR for this program; 0x1FFF when none applies.
    pub pcr_pid: u16,
    pub program_descriptors: Vec<Descriptor>,
    pub elementary_streams: Vec<PmtElementaryStream>,
}

impl PmtData {
    /// Parse the PMT body between the syntax header and the CRC.
    pub(crate) fn parse(
        cur: &mut ByteCursor<'_>,
        sections_end: usize,
        table_id_extension: u16,
    ) -> Result<Self> {
        let mut d = PmtData {
            program_number: table_id_extension,
            pcr_pid: cur.next_u16()? & 0x1fff,
            program_descriptors: parse_descriptors(cur)?,
            ..Default::default()
        };
        while cur.offset() < sections_end {
            d.elementary_streams.push(PmtElementaryStream {
                stream_type: StreamType::from(cur.next_byte()?),
                elementary_pid: cur.next_u16()? & 0x1fff,
                descriptors: parse_descriptors(cur)?,
            });
        }
        Ok(d)
    }

    pub(crate) fn calc_length(&self) -> u16 {
        let mut length = 4 + calc_descriptors_length(&self.program_descriptors);
        for es in &self.elementary_streams {
            length += 5 + calc_descriptors_length(&es.descriptors);
        }
        length
    }

    pub(crate) fn write(&self, buf: &mut BytesMut) -> usize {
        let mut written = 2;
        buf.put_u16(0xe000 | self.pcr_pid & 0x1fff);
        written += write_descriptors_with_length(buf, &self.program_descriptors);
        for es in &self.elementary_streams {
            buf.put_u8(es.stream_type.value());
            buf.put_u16(0xe000 | es.elementary_pid & 0x1fff);
            written += 3 + write_descriptors_with_length(buf, &es.descriptors);
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::RegistrationDescriptor;

    #[test]
    fn stream_type_round_trip() {
        for value in [0x01u8, 0x06, 0x0f, 0x1b, 0x24, 0x86, 0x42] {
            assert_eq!(StreamType::from(value).value(), value);
        }
        assert!(StreamType::H264.is_video());
        assert!(!StreamType::H264.is_audio());
        assert!(StreamType::AdtsAac.is_audio());
        assert_eq!(StreamType::from(0x42), StreamType::Other(0x42));
    }

    #[test]
    fn write_round_trip() {
        let pmt = PmtData {
            program_number: 1,
            pcr_pid: 0x101,
            program_descriptors: vec![Descriptor::Registration(RegistrationDescriptor {
                format_identifier: u32::from_be_bytes(*b"HDMV"),
                additional_identification_info: Vec::new(),
            })],
            elementary_streams: vec![
                PmtElementaryStream {
                    stream_type: StreamType::H264,
                    elementary_pid: 0x101,
                    descriptors: Vec::new(),
                },
                PmtElementaryStream {
                    stream_type: StreamType::AdtsAac,
                    elementary_pid: 0x102,
                    descriptors: vec![Descriptor::StreamIdentifier(0x02)],
                },
            ],
        };
        let mut buf = BytesMut::new();
        let written = pmt.write(&mut buf);
        assert_eq!(written, pmt.calc_length() as usize);
        assert_eq!(buf.len(), written);
        let mut cur = ByteCursor::new(&buf);
        assert_eq!(PmtData::parse(&mut cur, buf.len(), 1).unwrap(), pmt);
    }
}
