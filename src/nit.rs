use crate::descriptor::{Descriptor, parse_descriptors};
use crate::{ByteCursor, Result};

/// One transport stream entry of a NIT.
#[derive(Debug, Clone, PartialEq)]
pub struct NitTransportStream {
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub transport_descriptors: Vec<Descriptor>,
}

/// Network Information Table body (EN 300 468 §5.2.1).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NitData {
    pub network_id: u16,
    pub network_descriptors: Vec<Descriptor>,
    pub transport_streams: Vec<NitTransportStream>,
}

impl NitData {
    pub(crate) fn parse(cur: &mut ByteCursor<'_>, table_id_extension: u16) -> Result<Self> {
        let mut d = NitData {
            network_id: table_id_extension,
            network_descriptors: parse_descriptors(cur)?,
            ..Default::default()
        };

        let loop_length = (cur.next_u16()? & 0xfff) as usize;
        let offset_end = cur.offset() + loop_length;
        while cur.offset() < offset_end {
            d.transport_streams.push(NitTransportStream {
                transport_stream_id: cur.next_u16()?,
                original_network_id: cur.next_u16()?,
                transport_descriptors: parse_descriptors(cur)?,
            });
        }
        Ok(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::NetworkNameDescriptor;

    #[test]
    fn parses_network_and_transport_loops() {
        let bs = [
            0xf0, 0x06, // network descriptors length
            0x40, 0x04, b'n', b'e', b't', b'1', // network name
            0xf0, 0x06, // transport stream loop length
            0x00, 0x01, // transport stream id
            0x00, 0x44, // original network id
            0xf0, 0x00, // empty transport descriptors
        ];
        let mut cur = ByteCursor::new(&bs);
        let nit = NitData::parse(&mut cur, 0x1234).unwrap();
        assert_eq!(nit.network_id, 0x1234);
        assert_eq!(
            nit.network_descriptors,
            vec![Descriptor::NetworkName(NetworkNameDescriptor {
                name: b"net1".to_vec()
            })]
        );
        assert_eq!(nit.transport_streams.len(), 1);
        assert_eq!(nit.transport_streams[0].transport_stream_id, 0x0001);
        assert_eq!(nit.transport_streams[0].original_network_id, 0x0044);
        assert!(nit.transport_streams[0].transport_descriptors.is_empty());
    }
}
