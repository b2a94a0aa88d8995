//! PSI section framing: pointer field, section headers, CRC validation and
//! table-body dispatch.

use bytes::{BufMut, BytesMut};
use tracing::warn;

use crate::crc32::compute_crc32;
use crate::eit::EitData;
use crate::nit::NitData;
use crate::pat::PatData;
use crate::pmt::PmtData;
use crate::sdt::SdtData;
use crate::tot::TotData;
use crate::{ByteCursor, DemuxError, Result};

/// Sections longer than this violate ISO 13818-1 §2.4.4.
const MAX_SECTION_LENGTH: u16 = 1021;

/// PSI table id (ISO 13818-1 table 2-31, EN 300 468 table 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PsiTableId(pub u8);

impl PsiTableId {
    pub const PAT: PsiTableId = PsiTableId(0x00);
    pub const PMT: PsiTableId = PsiTableId(0x02);
    pub const NIT_ACTUAL: PsiTableId = PsiTableId(0x40);
    pub const NIT_OTHER: PsiTableId = PsiTableId(0x41);
    pub const SDT_ACTUAL: PsiTableId = PsiTableId(0x42);
    pub const SDT_OTHER: PsiTableId = PsiTableId(0x46);
    pub const BAT: PsiTableId = PsiTableId(0x4a);
    pub const EIT_START: PsiTableId = PsiTableId(0x4e);
    pub const EIT_END: PsiTableId = PsiTableId(0x6f);
    pub const TDT: PsiTableId = PsiTableId(0x70);
    pub const RST: PsiTableId = PsiTableId(0x71);
    pub const ST: PsiTableId = PsiTableId(0x72);
    pub const TOT: PsiTableId = PsiTableId(0x73);
    pub const DIT: PsiTableId = PsiTableId(0x7e);
    pub const SIT: PsiTableId = PsiTableId(0x7f);
    pub const NULL: PsiTableId = PsiTableId(0xff);

    pub fn is_eit(self) -> bool {
        (Self::EIT_START.0..=Self::EIT_END.0).contains(&self.0)
    }

    /// Whether a 5-byte syntax header follows the section header.
    pub fn has_syntax_header(self) -> bool {
        matches!(
            self,
            Self::PAT
                | Self::PMT
                | Self::NIT_ACTUAL
                | Self::NIT_OTHER
                | Self::SDT_ACTUAL
                | Self::SDT_OTHER
        ) || self.is_eit()
    }

    /// Whether the section ends with a CRC32.
    pub fn has_crc32(self) -> bool {
        self.has_syntax_header() || self == Self::TOT
    }

    /// Ids this demuxer does not recognize stop section parsing.
    pub fn is_unknown(self) -> bool {
        if self.is_eit() {
            return false;
        }
        !matches!(
            self,
            Self::PAT
                | Self::PMT
                | Self::NIT_ACTUAL
                | Self::NIT_OTHER
                | Self::SDT_ACTUAL
                | Self::SDT_OTHER
                | Self::BAT
                | Self::TDT
                | Self::RST
                | Self::ST
                | Self::TOT
                | Self::DIT
                | Self::SIT
                | Self::NULL
        )
    }

    /// Human-readable table kind, for diagnostics.
    pub fn kind(self) -> &'static str {
        if self.is_eit() {
            return "EIT";
        }
        match self {
            Self::PAT => "PAT",
            Self::PMT => "PMT",
            Self::NIT_ACTUAL | Self::NIT_OTHER => "NIT",
            Self::SDT_ACTUAL | Self::SDT_OTHER => "SDT",
            Self::BAT => "BAT",
            Self::TDT => "TDT",
            Self::RST => "RST",
            Self::ST => "ST",
            Self::TOT => "TOT",
            Self::DIT => "DIT",
            Self::SIT => "SIT",
            Self::NULL => "Null",
            _ => "Unknown",
        }
    }
}

/// Whether table-id `id` ends section parsing: stuffing or unknown tables.
pub(crate) fn should_stop_psi_parsing(id: PsiTableId) -> bool {
    id == PsiTableId::NULL || id.is_unknown()
}

/// Fixed 3-byte section header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PsiSectionHeader {
    pub table_id: PsiTableId,
    pub section_syntax_indicator: bool,
    pub private_bit: bool,
    /// Bytes following this header, CRC included. At most 1021.
    pub section_length: u16,
}

/// 5-byte syntax header present on PAT, PMT, NIT, SDT and EIT sections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PsiSyntaxHeader {
    /// Transport stream id for PAT, program number for PMT, and so on.
    pub table_id_extension: u16,
    pub version_number: u8,
    pub current_next_indicator: bool,
    pub section_number: u8,
    pub last_section_number: u8,
}

impl PsiSyntaxHeader {
    fn parse(cur: &mut ByteCursor<'_>) -> Result<Self> {
        let table_id_extension = cur.next_u16()?;
        let b = cur.next_byte()?;
        Ok(PsiSyntaxHeader {
            table_id_extension,
            version_number: b >> 1 & 0x1f,
            current_next_indicator: b & 0x01 > 0,
            section_number: cur.next_byte()?,
            last_section_number: cur.next_byte()?,
        })
    }

    fn write(&self, buf: &mut BytesMut) -> usize {
        buf.put_u16(self.table_id_extension);
        buf.put_u8(0xc0 | (self.version_number & 0x1f) << 1 | self.current_next_indicator as u8);
        buf.put_u8(self.section_number);
        buf.put_u8(self.last_section_number);
        5
    }
}

/// Parsed table body, discriminated by table id.
#[derive(Debug, Clone, PartialEq)]
pub enum PsiTableBody {
    Pat(PatData),
    Pmt(PmtData),
    Nit(NitData),
    Sdt(SdtData),
    Eit(EitData),
    Tot(TotData),
}

/// One PSI section.
#[derive(Debug, Clone, PartialEq)]
pub struct PsiSection {
    pub header: PsiSectionHeader,
    pub syntax_header: Option<PsiSyntaxHeader>,
    /// Typed body; `None` for tables that are recognized but not decoded
    /// (BAT, TDT, RST, ST, DIT, SIT) and for empty sections.
    pub body: Option<PsiTableBody>,
    /// CRC stored in the section, zero when the table carries none.
    pub crc32: u32,
}

/// A complete PSI payload unit: pointer field plus one or more sections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PsiData {
    pub pointer_field: usize,
    pub sections: Vec<PsiSection>,
}

enum SectionOutcome {
    Section(PsiSection),
    /// CRC mismatch: the section was consumed and dropped.
    Dropped,
    /// Stuffing or unknown table id: stop parsing the unit.
    Stop,
}

/// Parse a PSI payload: pointer field, filler, then sections until a stop
/// table id or the end of the buffer.
pub fn parse_psi(cur: &mut ByteCursor<'_>) -> Result<PsiData> {
    let mut d = PsiData {
        pointer_field: cur.next_byte()? as usize,
        ..Default::default()
    };
    cur.skip(d.pointer_field as isize)?;

    while cur.has_bytes_left() {
        match parse_psi_section(cur)? {
            SectionOutcome::Section(s) => d.sections.push(s),
            SectionOutcome::Dropped => {}
            SectionOutcome::Stop => break,
        }
    }
    Ok(d)
}

fn parse_psi_section(cur: &mut ByteCursor<'_>) -> Result<SectionOutcome> {
    let offset_start = cur.offset();
    let table_id = PsiTableId(cur.next_byte()?);
    if should_stop_psi_parsing(table_id) {
        return Ok(SectionOutcome::Stop);
    }

    let val = cur.next_u16()?;
    let header = PsiSectionHeader {
        table_id,
        section_syntax_indicator: val & 0x8000 > 0,
        private_bit: val & 0x4000 > 0,
        section_length: val & 0xfff,
    };
    if header.section_length > MAX_SECTION_LENGTH {
        return Err(DemuxError::SectionTooLong(header.section_length));
    }

    if header.section_length == 0 {
        return Ok(SectionOutcome::Section(PsiSection {
            header,
            syntax_header: None,
            body: None,
            crc32: 0,
        }));
    }

    let offset_sections_start = cur.offset();
    let offset_end = offset_sections_start + header.section_length as usize;
    let mut offset_sections_end = offset_end;
    if table_id.has_crc32() {
        if header.section_length < 4 {
            return Err(DemuxError::EndOfBuffer {
                needed: 4,
                left: header.section_length as usize,
            });
        }
        offset_sections_end -= 4;
    }

    // Validate the CRC before decoding the body so a corrupt section is
    // dropped whole instead of yielding a half-parsed table.
    let mut crc32 = 0;
    if table_id.has_crc32() {
        cur.seek(offset_start);
        let covered = cur.next_bytes_no_copy(offset_sections_end - offset_start)?;
        let computed = compute_crc32(covered);
        let stored = cur.next_u32()?;
        if stored != computed {
            warn!(
                table = table_id.kind(),
                stored, computed, "dropping PSI section with bad CRC32"
            );
            cur.seek(offset_end);
            return Ok(SectionOutcome::Dropped);
        }
        crc32 = stored;
    }

    cur.seek(offset_sections_start);
    let mut syntax_header = None;
    if table_id.has_syntax_header() {
        syntax_header = Some(PsiSyntaxHeader::parse(cur)?);
    }
    let table_id_extension = syntax_header.map(|h| h.table_id_extension).unwrap_or(0);

    let body = if table_id.is_eit() {
        Some(PsiTableBody::Eit(EitData::parse(
            cur,
            offset_sections_end,
            table_id_extension,
        )?))
    } else {
        match table_id {
            PsiTableId::PAT => Some(PsiTableBody::Pat(PatData::parse(
                cur,
                offset_sections_end,
                table_id_extension,
            )?)),
            PsiTableId::PMT => Some(PsiTableBody::Pmt(PmtData::parse(
                cur,
                offset_sections_end,
                table_id_extension,
            )?)),
            PsiTableId::NIT_ACTUAL | PsiTableId::NIT_OTHER => Some(PsiTableBody::Nit(
                NitData::parse(cur, table_id_extension)?,
            )),
            PsiTableId::SDT_ACTUAL | PsiTableId::SDT_OTHER => Some(PsiTableBody::Sdt(
                SdtData::parse(cur, offset_sections_end, table_id_extension)?,
            )),
            PsiTableId::TOT => Some(PsiTableBody::Tot(TotData::parse(cur)?)),
            // Recognized but not decoded; their bytes are still consumed.
            _ => None,
        }
    };

    cur.seek(offset_end);
    Ok(SectionOutcome::Section(PsiSection {
        header,
        syntax_header,
        body,
        crc32,
    }))
}

impl PsiSection {
    fn calc_section_length(&self) -> u16 {
        let mut length = 0;
        if self.header.table_id.has_syntax_header() {
            length += 5;
        }
        length += match &self.body {
            Some(PsiTableBody::Pat(pat)) => pat.calc_length(),
            Some(PsiTableBody::Pmt(pmt)) => pmt.calc_length(),
            _ => 0,
        };
        if self.header.table_id.has_crc32() {
            length += 4;
        }
        length
    }

    /// Serialize the section; only PAT and PMT bodies are supported.
    pub fn write(&self, buf: &mut BytesMut) -> Result<usize> {
        if !matches!(
            self.body,
            Some(PsiTableBody::Pat(_)) | Some(PsiTableBody::Pmt(_))
        ) {
            return Err(DemuxError::UnsupportedTableWrite(self.header.table_id.0));
        }

        let offset_start = buf.len();
        let section_length = self.calc_section_length();
        buf.put_u8(self.header.table_id.0);
        let mut val = section_length & 0xfff;
        val |= (self.header.section_syntax_indicator as u16) << 15;
        val |= (self.header.private_bit as u16) << 14;
        buf.put_u16(val | 0x3000);
        let mut written = 3;

        if let Some(syntax_header) = &self.syntax_header {
            written += syntax_header.write(buf);
        }
        written += match &self.body {
            Some(PsiTableBody::Pat(pat)) => pat.write(buf),
            Some(PsiTableBody::Pmt(pmt)) => pmt.write(buf),
            _ => unreachable!(),
        };

        if self.header.table_id.has_crc32() {
            let crc = compute_crc32(&buf[offset_start..]);
            buf.put_u32(crc);
            written += 4;
        }
        Ok(written)
    }
}

impl PsiData {
    /// Serialize the pointer field, filler bytes and every section.
    pub fn write(&self, buf: &mut BytesMut) -> Result<usize> {
        buf.put_u8(self.pointer_field as u8);
        buf.put_bytes(0x00, self.pointer_field);
        let mut written = 1 + self.pointer_field;
        for section in &self.sections {
            written += section.write(buf)?;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pat::PatProgram;
    use crate::pmt::{PmtElementaryStream, StreamType};

    fn pat_section(version: u8, programs: &[(u16, u16)]) -> PsiSection {
        PsiSection {
            header: PsiSectionHeader {
                table_id: PsiTableId::PAT,
                section_syntax_indicator: true,
                private_bit: false,
                section_length: 0,
            },
            syntax_header: Some(PsiSyntaxHeader {
                table_id_extension: 1,
                version_number: version,
                current_next_indicator: true,
                section_number: 0,
                last_section_number: 0,
            }),
            body: Some(PsiTableBody::Pat(PatData {
                transport_stream_id: 1,
                programs: programs
                    .iter()
                    .map(|&(program_number, program_map_pid)| PatProgram {
                        program_number,
                        program_map_pid,
                    })
                    .collect(),
            })),
            crc32: 0,
        }
    }

    #[test]
    fn pat_write_parse_round_trip() {
        let psi = PsiData {
            pointer_field: 3,
            sections: vec![pat_section(5, &[(1, 0x100), (2, 0x200)])],
        };
        let mut buf = BytesMut::new();
        psi.write(&mut buf).unwrap();

        let mut cur = ByteCursor::new(&buf);
        let parsed = parse_psi(&mut cur).unwrap();
        assert_eq!(parsed.pointer_field, 3);
        assert_eq!(parsed.sections.len(), 1);

        let section = &parsed.sections[0];
        assert_eq!(section.header.table_id, PsiTableId::PAT);
        assert!(section.header.section_syntax_indicator);
        assert_eq!(section.header.section_length, 5 + 8 + 4);
        let syntax = section.syntax_header.unwrap();
        assert_eq!(syntax.table_id_extension, 1);
        assert_eq!(syntax.version_number, 5);
        assert!(syntax.current_next_indicator);
        let Some(PsiTableBody::Pat(pat)) = &section.body else {
            panic!("expected PAT body");
        };
        assert_eq!(pat.programs.len(), 2);
        assert_eq!(pat.programs[1].program_map_pid, 0x200);
    }

    #[test]
    fn stored_crc_matches_computed_crc() {
        let psi = PsiData {
            pointer_field: 0,
            sections: vec![pat_section(0, &[(1, 0x100)])],
        };
        let mut buf = BytesMut::new();
        psi.write(&mut buf).unwrap();
        let end = buf.len();
        let stored = u32::from_be_bytes([buf[end - 4], buf[end - 3], buf[end - 2], buf[end - 1]]);
        assert_eq!(compute_crc32(&buf[1..end - 4]), stored);
    }

    #[test]
    fn pmt_write_parse_round_trip() {
        let pmt = PmtData {
            program_number: 1,
            pcr_pid: 0x100,
            program_descriptors: Vec::new(),
            elementary_streams: vec![PmtElementaryStream {
                stream_type: StreamType::H264,
                elementary_pid: 0x100,
                descriptors: Vec::new(),
            }],
        };
        let psi = PsiData {
            pointer_field: 0,
            sections: vec![PsiSection {
                header: PsiSectionHeader {
                    table_id: PsiTableId::PMT,
                    section_syntax_indicator: true,
                    private_bit: false,
                    section_length: 0,
                },
                syntax_header: Some(PsiSyntaxHeader {
                    table_id_extension: 1,
                    current_next_indicator: true,
                    ..Default::default()
                }),
                body: Some(PsiTableBody::Pmt(pmt.clone())),
                crc32: 0,
            }],
        };
        let mut buf = BytesMut::new();
        psi.write(&mut buf).unwrap();

        let mut cur = ByteCursor::new(&buf);
        let parsed = parse_psi(&mut cur).unwrap();
        let Some(PsiTableBody::Pmt(parsed_pmt)) = &parsed.sections[0].body else {
            panic!("expected PMT body");
        };
        assert_eq!(parsed_pmt, &pmt);
    }

    #[test]
    fn corrupt_crc_drops_the_section() {
        let psi = PsiData {
            pointer_field: 0,
            sections: vec![pat_section(0, &[(1, 0x100)])],
        };
        let mut buf = BytesMut::new();
        psi.write(&mut buf).unwrap();
        let end = buf.len();
        buf[end - 1] ^= 0xff;

        let mut cur = ByteCursor::new(&buf);
        let parsed = parse_psi(&mut cur).unwrap();
        assert!(parsed.sections.is_empty());
    }

    #[test]
    fn stuffing_table_id_stops_parsing() {
        let psi = PsiData {
            pointer_field: 0,
            sections: vec![pat_section(0, &[(1, 0x100)])],
        };
        let mut buf = BytesMut::new();
        psi.write(&mut buf).unwrap();
        buf.put_bytes(0xff, 20);

        let mut cur = ByteCursor::new(&buf);
        let parsed = parse_psi(&mut cur).unwrap();
        assert_eq!(parsed.sections.len(), 1);
    }

    #[test]
    fn oversized_section_length_is_fatal() {
        // Section length 0xFFE > 1021.
        let bs = [0x00, 0x00, 0xbf, 0xfe, 0x00, 0x00];
        let mut cur = ByteCursor::new(&bs);
        assert!(matches!(
            parse_psi(&mut cur),
            Err(DemuxError::SectionTooLong(0xffe))
        ));
    }

    #[test]
    fn tdt_is_recognized_without_a_body() {
        // TDT: table id 0x70, no syntax header, no CRC, 5-byte UTC time.
        let bs = [
            0x00, // pointer field
            0x70, 0x70, 0x05, // header, section length 5
            0xb0, 0xa2, 0x12, 0x45, 0x00,
        ];
        let mut cur = ByteCursor::new(&bs);
        let parsed = parse_psi(&mut cur).unwrap();
        assert_eq!(parsed.sections.len(), 1);
        assert_eq!(parsed.sections[0].header.table_id, PsiTableId::TDT);
        assert!(parsed.sections[0].body.is_none());
        assert_eq!(cur.offset(), bs.len());
    }
}
