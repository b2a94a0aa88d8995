use std::ops::Range;

use crate::clock::ClockReference;
use crate::pool::PooledBuffer;
use crate::{ByteCursor, DemuxError, Result};

/// Stream ids with dedicated handling (ISO 13818-1 table 2-18).
pub const STREAM_ID_PRIVATE_STREAM_1: u8 = 0xbd;
pub const STREAM_ID_PADDING_STREAM: u8 = 0xbe;
pub const STREAM_ID_PRIVATE_STREAM_2: u8 = 0xbf;

/// PTS/DTS indicator values.
pub const PTS_DTS_INDICATOR_NO_PTS_OR_DTS: u8 = 0;
pub const PTS_DTS_INDICATOR_FORBIDDEN: u8 = 1;
pub const PTS_DTS_INDICATOR_ONLY_PTS: u8 = 2;
pub const PTS_DTS_INDICATOR_BOTH_PRESENT: u8 = 3;

/// Trick mode controls.
pub const TRICK_MODE_CONTROL_FAST_FORWARD: u8 = 0;
pub const TRICK_MODE_CONTROL_SLOW_MOTION: u8 = 1;
pub const TRICK_MODE_CONTROL_FREEZE_FRAME: u8 = 2;
pub const TRICK_MODE_CONTROL_FAST_REVERSE: u8 = 3;
pub const TRICK_MODE_CONTROL_SLOW_REVERSE: u8 = 4;

/// P-STD buffer scales.
pub const PSTD_BUFFER_SCALE_128_BYTES: u8 = 0;
pub const PSTD_BUFFER_SCALE_1024_BYTES: u8 = 1;

/// Whether a stream id is followed by the optional PES header.
/// Padding (0xBE) and private stream 2 (0xBF) are not.
fn has_optional_header(stream_id: u8) -> bool {
    stream_id >> 1 != 0b101_1111
}

/// DSM trick mode byte (ISO 13818-1 §2.4.3.8).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DsmTrickMode {
    pub trick_mode_control: u8,
    pub field_id: u8,
    pub intra_slice_refresh: u8,
    pub frequency_truncation: u8,
    pub repeat_control: u8,
}

impl DsmTrickMode {
    fn parse(b: u8) -> Self {
        let mut m = DsmTrickMode {
            trick_mode_control: b >> 5,
            ..Default::default()
        };
        match m.trick_mode_control {
            TRICK_MODE_CONTROL_FAST_FORWARD | TRICK_MODE_CONTROL_FAST_REVERSE => {
                m.field_id = b >> 3 & 0x3;
                m.intra_slice_refresh = b >> 2 & 0x1;
                m.frequency_truncation = b & 0x3;
            }
            TRICK_MODE_CONTROL_FREEZE_FRAME => m.field_id = b >> 3 & 0x3,
            TRICK_MODE_CONTROL_SLOW_MOTION | TRICK_MODE_CONTROL_SLOW_REVERSE => {
                m.repeat_control = b & 0x1f;
            }
            _ => {}
        }
        m
    }
}

/// Program packet sequence counter fields of the PES extension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketSequenceCounter {
    pub counter: u8,
    pub mpeg1_or_mpeg2_id: u8,
    pub original_stuffing_length: u8,
}

/// P-STD buffer fields of the PES extension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PstdBuffer {
    pub scale: u8,
    pub size: u16,
}

/// Optional PES header extension (ISO 13818-1 §2.4.3.7).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PesExtension {
    pub private_data: Option<Vec<u8>>,
    /// Length of a pack header that was present in the original stream.
    pub pack_field: Option<u8>,
    pub packet_sequence_counter: Option<PacketSequenceCounter>,
    pub pstd_buffer: Option<PstdBuffer>,
    pub extension2_data: Option<Vec<u8>>,
}

impl PesExtension {
    fn parse(cur: &mut ByteCursor<'_>) -> Result<Self> {
        let mut ext = PesExtension::default();
        let b = cur.next_byte()?;
        let has_private_data = b & 0x80 > 0;
        let has_pack_header_field = b & 0x40 > 0;
        let has_packet_sequence_counter = b & 0x20 > 0;
        let has_pstd_buffer = b & 0x10 > 0;
        let has_extension2 = b & 0x01 > 0;

        if has_private_data {
            ext.private_data = Some(cur.next_bytes(16)?);
        }
        if has_pack_header_field {
            ext.pack_field = Some(cur.next_byte()?);
        }
        if has_packet_sequence_counter {
            let bs = cur.next_bytes_no_copy(2)?;
            ext.packet_sequence_counter = Some(PacketSequenceCounter {
                counter: bs[0] & 0x7f,
                mpeg1_or_mpeg2_id: bs[1] >> 6 & 0x1,
                original_stuffing_length: bs[1] & 0x3f,
            });
        }
        if has_pstd_buffer {
            let bs = cur.next_bytes_no_copy(2)?;
            ext.pstd_buffer = Some(PstdBuffer {
                scale: bs[0] >> 5 & 0x1,
                size: u16::from_be_bytes([bs[0], bs[1]]) & 0x1fff,
            });
        }
        if has_extension2 {
            let length = (cur.next_byte()? & 0x7f) as usize;
            ext.extension2_data = Some(cur.next_bytes(length)?);
        }
        Ok(ext)
    }
}

/// Optional PES header (ISO 13818-1 §2.4.3.6).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PesOptionalHeader {
    pub marker_bits: u8,
    pub scrambling_control: u8,
    pub priority: bool,
    /// The header is immediately followed by a video start code or audio
    /// sync word.
    pub data_alignment_indicator: bool,
    pub is_copyrighted: bool,
    pub is_original: bool,
    pub pts_dts_indicator: u8,
    pub header_length: u8,
    pub pts: Option<ClockReference>,
    pub dts: Option<ClockReference>,
    pub escr: Option<ClockReference>,
    pub es_rate: Option<u32>,
    pub dsm_trick_mode: Option<DsmTrickMode>,
    pub additional_copy_info: Option<u8>,
    pub crc: Option<u16>,
    pub extension: Option<PesExtension>,
}

impl PesOptionalHeader {
    /// Parse the optional header; returns the header and the offset of the
    /// PES data that follows it.
    fn parse(cur: &mut ByteCursor<'_>) -> Result<(Self, usize)> {
        let bs = cur.next_bytes_no_copy(3)?;
        let b = bs[0];
        let mut h = PesOptionalHeader {
            marker_bits: b >> 6,
            scrambling_control: b >> 4 & 0x3,
            priority: b & 0x8 > 0,
            data_alignment_indicator: b & 0x4 > 0,
            is_copyrighted: b & 0x2 > 0,
            is_original: b & 0x1 > 0,
            ..Default::default()
        };
        let b = bs[1];
        h.pts_dts_indicator = b >> 6 & 0x3;
        let has_escr = b & 0x20 > 0;
        let has_es_rate = b & 0x10 > 0;
        let has_dsm_trick_mode = b & 0x8 > 0;
        let has_additional_copy_info = b & 0x4 > 0;
        let has_crc = b & 0x2 > 0;
        let has_extension = b & 0x1 > 0;
        h.header_length = bs[2];

        let data_start = cur.offset() + h.header_length as usize;

        if h.pts_dts_indicator == PTS_DTS_INDICATOR_ONLY_PTS {
            h.pts = Some(ClockReference::parse_pts_or_dts(cur)?);
        } else if h.pts_dts_indicator == PTS_DTS_INDICATOR_BOTH_PRESENT {
            h.pts = Some(ClockReference::parse_pts_or_dts(cur)?);
            h.dts = Some(ClockReference::parse_pts_or_dts(cur)?);
        }
        if has_escr {
            h.escr = Some(ClockReference::parse_escr(cur)?);
        }
        if has_es_rate {
            let bs = cur.next_bytes_no_copy(3)?;
            h.es_rate =
                Some((bs[0] as u32 & 0x7f) << 15 | (bs[1] as u32) << 7 | (bs[2] as u32) >> 1);
        }
        if has_dsm_trick_mode {
            h.dsm_trick_mode = Some(DsmTrickMode::parse(cur.next_byte()?));
        }
        if has_additional_copy_info {
            h.additional_copy_info = Some(cur.next_byte()? & 0x7f);
        }
        if has_crc {
            h.crc = Some(cur.next_u16()?);
        }
        if has_extension {
            h.extension = Some(PesExtension::parse(cur)?);
        }
        Ok((h, data_start))
    }
}

/// Fixed PES header fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PesHeader {
    pub stream_id: u8,
    /// Bytes remaining after this field; zero means the packet extends to
    /// the end of the reassembled payload (video elementary streams).
    pub packet_length: u16,
    pub optional_header: Option<PesOptionalHeader>,
}

impl PesHeader {
    /// Parse the header after the start-code prefix; returns the header and
    /// the data byte range.
    fn parse(cur: &mut ByteCursor<'_>) -> Result<(Self, Range<usize>)> {
        let bs = cur.next_bytes_no_copy(3)?;
        let mut h = PesHeader {
            stream_id: bs[0],
            packet_length: u16::from_be_bytes([bs[1], bs[2]]),
            ..Default::default()
        };

        let data_end = if h.packet_length > 0 {
            cur.offset() + h.packet_length as usize
        } else {
            cur.len()
        };

        let data_start = if has_optional_header(h.stream_id) {
            let (optional_header, data_start) = PesOptionalHeader::parse(cur)?;
            h.optional_header = Some(optional_header);
            data_start
        } else {
            cur.offset()
        };
        Ok((h, data_start..data_end))
    }

    pub fn is_video_stream(&self) -> bool {
        self.stream_id == 0xe0 || self.stream_id == 0xfd
    }
}

/// A reassembled PES packet: parsed header plus the elementary stream bytes.
///
/// The data lives in a pooled scratch buffer owned by this record; dropping
/// the record returns the buffer to its size bucket.
#[derive(Debug)]
pub struct PesData {
    pub header: PesHeader,
    scratch: PooledBuffer,
    data_range: Range<usize>,
}

impl PesData {
    /// Parse a PES payload held in `scratch`, which must start with the
    /// 0x000001 prefix.
    pub(crate) fn parse(scratch: PooledBuffer) -> Result<Self> {
        let (header, data_range) = {
            let mut cur = ByteCursor::new(&scratch);
            // The prefix was already checked to identify the payload as PES.
            cur.seek(3);
            PesHeader::parse(&mut cur)?
        };
        if data_range.end < data_range.start {
            return Err(DemuxError::InvalidDataBounds {
                start: data_range.start,
                end: data_range.end,
            });
        }
        if data_range.end > scratch.len() {
            return Err(DemuxError::EndOfBuffer {
                needed: data_range.end - scratch.len(),
                left: 0,
            });
        }
        Ok(PesData {
            header,
            scratch,
            data_range,
        })
    }

    /// Elementary stream bytes.
    pub fn data(&self) -> &[u8] {
        &self.scratch[self.data_range.clone()]
    }
}

/// Whether a reassembled payload starts with the PES start-code prefix.
pub(crate) fn is_pes_payload(bs: &[u8]) -> bool {
    bs.len() >= 4 && u32::from_be_bytes([bs[0], bs[1], bs[2], bs[3]]) >> 8 == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PayloadPool;
    use std::sync::Arc;

    fn parse_bytes(bs: &[u8]) -> Result<PesData> {
        let pool = Arc::new(PayloadPool::new());
        let mut scratch = PayloadPool::get(&pool, bs.len());
        scratch.copy_from_slice(bs);
        PesData::parse(scratch)
    }

    fn encode_pts(flag: u8, pts: u64) -> [u8; 5] {
        [
            flag << 4 | ((pts >> 30) as u8 & 0x07) << 1 | 0x01,
            (pts >> 22) as u8,
            ((pts >> 15) as u8 & 0x7f) << 1 | 0x01,
            (pts >> 7) as u8,
            (pts as u8 & 0x7f) << 1 | 0x01,
        ]
    }

    #[test]
    fn detects_pes_prefix() {
        assert!(is_pes_payload(&[0x00, 0x00, 0x01, 0xe0]));
        assert!(!is_pes_payload(&[0x00, 0x00, 0x02, 0xe0]));
        assert!(!is_pes_payload(&[0x00, 0x00, 0x01]));
    }

    #[test]
    fn parses_video_pes_with_pts_and_dts() {
        let mut bs = vec![
            0x00, 0x00, 0x01, // prefix
            0xe0, 0x00, 0x00, // video stream, unbounded length
            0x80, // marker bits
            0xc0, // PTS + DTS
            0x0a, // header length 10
        ];
        bs.extend_from_slice(&encode_pts(0b0011, 180_000));
        bs.extend_from_slice(&encode_pts(0b0001, 90_000));
        bs.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);

        let pes = parse_bytes(&bs).unwrap();
        assert_eq!(pes.header.stream_id, 0xe0);
        assert!(pes.header.is_video_stream());
        assert_eq!(pes.header.packet_length, 0);
        let oh = pes.header.optional_header.as_ref().unwrap();
        assert_eq!(oh.pts_dts_indicator, PTS_DTS_INDICATOR_BOTH_PRESENT);
        assert_eq!(oh.pts, Some(ClockReference::new(180_000, 0)));
        assert_eq!(oh.dts, Some(ClockReference::new(90_000, 0)));
        assert_eq!(pes.data(), &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn bounded_packet_length_limits_the_data() {
        let bs = [
            0x00, 0x00, 0x01, // prefix
            0xc0, 0x00, 0x05, // audio stream, length 5
            0x80, 0x00, 0x00, // optional header, nothing set
            0xaa, 0xbb, // data
            0x99, 0x99, // trailing bytes beyond the PES packet
        ];
        let pes = parse_bytes(&bs).unwrap();
        assert_eq!(pes.header.packet_length, 5);
        assert_eq!(pes.data(), &[0xaa, 0xbb]);
    }

    #[test]
    fn private_stream_2_has_no_optional_header() {
        let bs = [
            0x00, 0x00, 0x01, // prefix
            STREAM_ID_PRIVATE_STREAM_2,
            0x00, 0x03, // length 3
            0x01, 0x02, 0x03,
        ];
        let pes = parse_bytes(&bs).unwrap();
        assert!(pes.header.optional_header.is_none());
        assert_eq!(pes.data(), &[0x01, 0x02, 0x03]);
    }

    #[test]
    fn header_length_skips_stuffing() {
        let mut bs = vec![
            0x00, 0x00, 0x01, // prefix
            0xe0, 0x00, 0x00, // video stream
            0x80, // marker bits
            0x80, // PTS only
            0x08, // header length: 5 PTS bytes + 3 stuffing
        ];
        bs.extend_from_slice(&encode_pts(0b0010, 90_000));
        bs.extend_from_slice(&[0xff, 0xff, 0xff]); // stuffing
        bs.extend_from_slice(&[0x42]);

        let pes = parse_bytes(&bs).unwrap();
        let oh = pes.header.optional_header.as_ref().unwrap();
        assert_eq!(oh.pts, Some(ClockReference::new(90_000, 0)));
        assert_eq!(pes.data(), &[0x42]);
    }

    #[test]
    fn parses_all_optional_fields_and_extension() {
        let mut bs = vec![
            0x00, 0x00, 0x01, // prefix
            0xbd, 0x00, 0x00, // private stream 1
            0xbd, // marker + scrambled(3) + priority + alignment + copyright(0) + original
            0x3f, // ESCR + ES rate + trick mode + copy info + CRC + extension
            0x00, // header length patched below
        ];
        let fields_start = bs.len();
        // ESCR base 90000 ext 0
        let escr = {
            let cr = ClockReference::new(90_000, 27);
            let mut buf = bytes::BytesMut::new();
            cr.write_escr(&mut buf);
            buf
        };
        bs.extend_from_slice(&escr);
        bs.extend_from_slice(&[0x80 | 0x01, 0x00, 0x01]); // ES rate
        bs.push(0x2 << 5 | 0x1 << 3); // freeze frame, field id 1
        bs.push(0x80 | 0x19); // additional copy info
        bs.extend_from_slice(&[0x12, 0x34]); // CRC
        // Extension: private data + P-STD + extension 2
        bs.push(0x80 | 0x10 | 0x01);
        bs.extend_from_slice(&[0x11; 16]);
        bs.extend_from_slice(&[0x40 | 0x20 | 0x01, 0x55]); // P-STD scale 1, size 0x155
        bs.extend_from_slice(&[0x82, 0x01, 0x02]); // extension 2, 2 bytes
        bs[8] = (bs.len() - fields_start) as u8;
        bs.extend_from_slice(&[0x77, 0x88]); // data

        let pes = parse_bytes(&bs).unwrap();
        let oh = pes.header.optional_header.as_ref().unwrap();
        assert_eq!(oh.marker_bits, 0b10);
        assert_eq!(oh.scrambling_control, 0x3);
        assert!(oh.priority);
        assert!(oh.data_alignment_indicator);
        assert!(!oh.is_copyrighted);
        assert!(oh.is_original);
        assert_eq!(oh.escr, Some(ClockReference::new(90_000, 27)));
        assert_eq!(oh.es_rate, Some(0x01 << 15));
        assert_eq!(
            oh.dsm_trick_mode,
            Some(DsmTrickMode {
                trick_mode_control: TRICK_MODE_CONTROL_FREEZE_FRAME,
                field_id: 1,
                ..Default::default()
            })
        );
        assert_eq!(oh.additional_copy_info, Some(0x19));
        assert_eq!(oh.crc, Some(0x1234));
        let ext = oh.extension.as_ref().unwrap();
        assert_eq!(ext.private_data.as_deref(), Some(&[0x11u8; 16][..]));
        assert_eq!(
            ext.pstd_buffer,
            Some(PstdBuffer {
                scale: 1,
                size: 0x155
            })
        );
        assert_eq!(ext.extension2_data.as_deref(), Some(&[0x01u8, 0x02][..]));
        assert_eq!(pes.data(), &[0x77, 0x88]);
    }

    #[test]
    fn data_end_before_data_start_is_rejected() {
        // Bounded length of 1 puts the data end before the optional header
        // says the data starts.
        let bs = [
            0x00, 0x00, 0x01, // prefix
            0xe0, 0x00, 0x01, // video stream, length 1
            0x80, 0x00, 0x10, // header length 16
            0x00,
        ];
        assert!(matches!(
            parse_bytes(&bs),
            Err(DemuxError::InvalidDataBounds { .. })
        ));
    }
}
