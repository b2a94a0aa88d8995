use bytes::{BufMut, BytesMut};

use crate::{ByteCursor, Result};

/// One program entry of a PAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatProgram {
    /// Program number; zero announces the network PID (NIT).
    pub program_number: u16,
    /// PID carrying this program's PMT (or the NIT for program zero).
    pub program_map_pid: u16,
}

/// Program Association Table body (ISO 13818-1 §2.4.4.3).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatData {
    pub transport_stream_id: u16,
    pub programs: Vec<PatProgram>,
}

impl PatData {
    /// Parse the PAT body between the syntax header and the CRC.
    pub(crate) fn parse(
        cur: &mut ByteCursor<'_>,
        sections_end: usize,
        table_id_extension: u16,
    ) -> Result<Self> {
        let mut d = PatData {
            transport_stream_id: table_id_extension,
            ..Default::default()
        };
        while cur.offset() < sections_end {
            d.programs.push(PatProgram {
                program_number: cur.next_u16()?,
                program_map_pid: cur.next_u16()? & 0x1fff,
            });
        }
        Ok(d)
    }

    pub(crate) fn calc_length(&self) -> u16 {
        4 * self.programs.len() as u16
    }

    pub(crate) fn write(&self, buf: &mut BytesMut) -> usize {
        for program in &self.programs {
            buf.put_u16(program.program_number);
            buf.put_u16(0xe000 | program.program_map_pid & 0x1fff);
        }
        self.calc_length() as usize
    }
}
