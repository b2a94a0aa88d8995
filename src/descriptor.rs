//! Tag-dispatched parsing and serialization of PSI/SI descriptors.
//!
//! Descriptors appear in PMT program and elementary-stream loops and in the
//! DVB SI tables (NIT, SDT, EIT, TOT). Each loop is a 12-bit length followed
//! by `[tag][length][body]` entries. Tags with bit 7 set are user-defined;
//! anything else without a dedicated parser is kept as raw bytes.

use std::time::Duration;

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Utc};

use crate::dvb::{
    parse_dvb_duration_minutes, parse_dvb_time, write_dvb_duration_minutes, write_dvb_time,
};
use crate::{ByteCursor, Result};

/// Descriptor tags (ISO 13818-1 §2.6, ETSI EN 300 468 §6.1).
pub const DESCRIPTOR_TAG_AC3: u8 = 0x6a;
pub const DESCRIPTOR_TAG_AVC_VIDEO: u8 = 0x28;
pub const DESCRIPTOR_TAG_COMPONENT: u8 = 0x50;
pub const DESCRIPTOR_TAG_CONTENT: u8 = 0x54;
pub const DESCRIPTOR_TAG_DATA_STREAM_ALIGNMENT: u8 = 0x06;
pub const DESCRIPTOR_TAG_ENHANCED_AC3: u8 = 0x7a;
pub const DESCRIPTOR_TAG_EXTENDED_EVENT: u8 = 0x4e;
pub const DESCRIPTOR_TAG_EXTENSION: u8 = 0x7f;
pub const DESCRIPTOR_TAG_ISO639_LANGUAGE_AND_AUDIO_TYPE: u8 = 0x0a;
pub const DESCRIPTOR_TAG_LOCAL_TIME_OFFSET: u8 = 0x58;
pub const DESCRIPTOR_TAG_MAXIMUM_BITRATE: u8 = 0x0e;
pub const DESCRIPTOR_TAG_NETWORK_NAME: u8 = 0x40;
pub const DESCRIPTOR_TAG_PARENTAL_RATING: u8 = 0x55;
pub const DESCRIPTOR_TAG_PRIVATE_DATA_INDICATOR: u8 = 0x0f;
pub const DESCRIPTOR_TAG_PRIVATE_DATA_SPECIFIER: u8 = 0x5f;
pub const DESCRIPTOR_TAG_REGISTRATION: u8 = 0x05;
pub const DESCRIPTOR_TAG_SERVICE: u8 = 0x48;
pub const DESCRIPTOR_TAG_SHORT_EVENT: u8 = 0x4d;
pub const DESCRIPTOR_TAG_STREAM_IDENTIFIER: u8 = 0x52;
pub const DESCRIPTOR_TAG_SUBTITLING: u8 = 0x59;
pub const DESCRIPTOR_TAG_TELETEXT: u8 = 0x56;
pub const DESCRIPTOR_TAG_VBI_DATA: u8 = 0x45;
pub const DESCRIPTOR_TAG_VBI_TELETEXT: u8 = 0x46;

/// Extension descriptor tags (EN 300 468 §6.3).
pub const DESCRIPTOR_TAG_EXTENSION_SUPPLEMENTARY_AUDIO: u8 = 0x06;

/// Audio types carried by the ISO 639 language descriptor.
pub const AUDIO_TYPE_CLEAN_EFFECTS: u8 = 0x1;
pub const AUDIO_TYPE_HEARING_IMPAIRED: u8 = 0x2;
pub const AUDIO_TYPE_VISUAL_IMPAIRED_COMMENTARY: u8 = 0x3;

/// Data stream alignment types (ISO 13818-1 §2.6.11).
pub const DATA_STREAM_ALIGNMENT_AUDIO_SYNC_WORD: u8 = 0x1;
pub const DATA_STREAM_ALIGNMENT_VIDEO_SLICE_OR_ACCESS_UNIT: u8 = 0x1;
pub const DATA_STREAM_ALIGNMENT_VIDEO_ACCESS_UNIT: u8 = 0x2;
pub const DATA_STREAM_ALIGNMENT_VIDEO_GOP_OR_SEQ: u8 = 0x3;
pub const DATA_STREAM_ALIGNMENT_VIDEO_SEQ: u8 = 0x4;

/// Service types (EN 300 468 §6.2.33).
pub const SERVICE_TYPE_DIGITAL_TELEVISION: u8 = 0x1;

/// Teletext page types (EN 300 468 §6.2.43).
pub const TELETEXT_TYPE_INITIAL_PAGE: u8 = 0x1;
pub const TELETEXT_TYPE_SUBTITLE_PAGE: u8 = 0x2;
pub const TELETEXT_TYPE_ADDITIONAL_INFORMATION_PAGE: u8 = 0x3;
pub const TELETEXT_TYPE_PROGRAMME_SCHEDULE_PAGE: u8 = 0x4;
pub const TELETEXT_TYPE_HEARING_IMPAIRED_SUBTITLE_PAGE: u8 = 0x5;

/// VBI data service ids (EN 300 468 §6.2.47).
pub const VBI_DATA_SERVICE_ID_EBU_TELETEXT: u8 = 0x1;
pub const VBI_DATA_SERVICE_ID_INVERTED_TELETEXT: u8 = 0x2;
pub const VBI_DATA_SERVICE_ID_VPS: u8 = 0x4;
pub const VBI_DATA_SERVICE_ID_WSS: u8 = 0x5;
pub const VBI_DATA_SERVICE_ID_CLOSED_CAPTIONING: u8 = 0x6;
pub const VBI_DATA_SERVICE_ID_MONOCHROME_442_SAMPLES: u8 = 0x7;

/// AC-3 descriptor (EN 300 468 Annex D).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ac3Descriptor {
    pub component_type: Option<u8>,
    pub bsid: Option<u8>,
    pub main_id: Option<u8>,
    pub asvc: Option<u8>,
    pub additional_info: Vec<u8>,
}

impl Ac3Descriptor {
    fn parse(cur: &mut ByteCursor<'_>, offset_end: usize) -> Result<Self> {
        let b = cur.next_byte()?;
        let has_component_type = b & 0x80 > 0;
        let has_bsid = b & 0x40 > 0;
        let has_main_id = b & 0x20 > 0;
        let has_asvc = b & 0x10 > 0;

        let mut d = Ac3Descriptor::default();
        if has_component_type {
            d.component_type = Some(cur.next_byte()?);
        }
        if has_bsid {
            d.bsid = Some(cur.next_byte()?);
        }
        if has_main_id {
            d.main_id = Some(cur.next_byte()?);
        }
        if has_asvc {
            d.asvc = Some(cur.next_byte()?);
        }
        if cur.offset() < offset_end {
            d.additional_info = cur.next_bytes(offset_end - cur.offset())?;
        }
        Ok(d)
    }

    fn length(&self) -> u8 {
        1 + self.component_type.is_some() as u8
            + self.bsid.is_some() as u8
            + self.main_id.is_some() as u8
            + self.asvc.is_some() as u8
            + self.additional_info.len() as u8
    }

    fn write(&self, buf: &mut BytesMut) {
        let mut flags = (self.component_type.is_some() as u8) << 7;
        flags |= (self.bsid.is_some() as u8) << 6;
        flags |= (self.main_id.is_some() as u8) << 5;
        flags |= (self.asvc.is_some() as u8) << 4;
        buf.put_u8(flags | 0x0f);
        for field in [self.component_type, self.bsid, self.main_id, self.asvc]
            .into_iter()
            .flatten()
        {
            buf.put_u8(field);
        }
        buf.put_slice(&self.additional_info);
    }
}

/// AVC video descriptor (ISO 13818-1 §2.6.64).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvcVideoDescriptor {
    pub profile_idc: u8,
    pub constraint_set0: bool,
    pub constraint_set1: bool,
    pub constraint_set2: bool,
    pub compatible_flags: u8,
    pub level_idc: u8,
    pub avc_still_present: bool,
    pub avc_24_hour_picture: bool,
}

impl AvcVideoDescriptor {
    fn parse(cur: &mut ByteCursor<'_>) -> Result<Self> {
        let mut d = AvcVideoDescriptor {
            profile_idc: cur.next_byte()?,
            ..Default::default()
        };
        let b = cur.next_byte()?;
        d.constraint_set0 = b & 0x80 > 0;
        d.constraint_set1 = b & 0x40 > 0;
        d.constraint_set2 = b & 0x20 > 0;
        d.compatible_flags = b & 0x1f;
        d.level_idc = cur.next_byte()?;
        let b = cur.next_byte()?;
        d.avc_still_present = b & 0x80 > 0;
        d.avc_24_hour_picture = b & 0x40 > 0;
        Ok(d)
    }

    fn length(&self) -> u8 {
        4
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.profile_idc);
        let mut b = (self.constraint_set0 as u8) << 7;
        b |= (self.constraint_set1 as u8) << 6;
        b |= (self.constraint_set2 as u8) << 5;
        buf.put_u8(b | self.compatible_flags & 0x1f);
        buf.put_u8(self.level_idc);
        let mut b = (self.avc_still_present as u8) << 7;
        b |= (self.avc_24_hour_picture as u8) << 6;
        buf.put_u8(b | 0x3f);
    }
}

/// Component descriptor (EN 300 468 §6.2.8).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentDescriptor {
    pub stream_content_ext: u8,
    pub stream_content: u8,
    pub component_type: u8,
    pub component_tag: u8,
    pub iso639_language_code: [u8; 3],
    pub text: Vec<u8>,
}

impl ComponentDescriptor {
    fn parse(cur: &mut ByteCursor<'_>, offset_end: usize) -> Result<Self> {
        let mut d = ComponentDescriptor::default();
        let b = cur.next_byte()?;
        d.stream_content_ext = b >> 4;
        d.stream_content = b & 0xf;
        d.component_type = cur.next_byte()?;
        d.component_tag = cur.next_byte()?;
        d.iso639_language_code
            .copy_from_slice(cur.next_bytes_no_copy(3)?);
        if cur.offset() < offset_end {
            d.text = cur.next_bytes(offset_end - cur.offset())?;
        }
        Ok(d)
    }

    fn length(&self) -> u8 {
        6 + self.text.len() as u8
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.stream_content_ext << 4 | self.stream_content & 0xf);
        buf.put_u8(self.component_type);
        buf.put_u8(self.component_tag);
        buf.put_slice(&self.iso639_language_code);
        buf.put_slice(&self.text);
    }
}

/// One genre entry of a content descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContentItem {
    pub content_nibble_level_1: u8,
    pub content_nibble_level_2: u8,
    pub user_byte: u8,
}

/// Content descriptor (EN 300 468 §6.2.9).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentDescriptor {
    pub items: Vec<ContentItem>,
}

impl ContentDescriptor {
    fn parse(cur: &mut ByteCursor<'_>, offset_end: usize) -> Result<Self> {
        let mut d = ContentDescriptor::default();
        while cur.offset() < offset_end {
            let bs = cur.next_bytes_no_copy(2)?;
            d.items.push(ContentItem {
                content_nibble_level_1: bs[0] >> 4,
                content_nibble_level_2: bs[0] & 0xf,
                user_byte: bs[1],
            });
        }
        Ok(d)
    }

    fn length(&self) -> u8 {
        2 * self.items.len() as u8
    }

    fn write(&self, buf: &mut BytesMut) {
        for item in &self.items {
            buf.put_u8(item.content_nibble_level_1 << 4 | item.content_nibble_level_2 & 0xf);
            buf.put_u8(item.user_byte);
        }
    }
}

/// Enhanced AC-3 descriptor (EN 300 468 Annex D).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnhancedAc3Descriptor {
    pub component_type: Option<u8>,
    pub bsid: Option<u8>,
    pub main_id: Option<u8>,
    pub asvc: Option<u8>,
    pub mix_info_exists: bool,
    pub sub_stream1: Option<u8>,
    pub sub_stream2: Option<u8>,
    pub sub_stream3: Option<u8>,
    pub additional_info: Vec<u8>,
}

impl EnhancedAc3Descriptor {
    fn parse(cur: &mut ByteCursor<'_>, offset_end: usize) -> Result<Self> {
        let b = cur.next_byte()?;
        let mut d = EnhancedAc3Descriptor {
            mix_info_exists: b & 0x08 > 0,
            ..Default::default()
        };
        if b & 0x80 > 0 {
            d.component_type = Some(cur.next_byte()?);
        }
        if b & 0x40 > 0 {
            d.bsid = Some(cur.next_byte()?);
        }
        if b & 0x20 > 0 {
            d.main_id = Some(cur.next_byte()?);
        }
        if b & 0x10 > 0 {
            d.asvc = Some(cur.next_byte()?);
        }
        if b & 0x04 > 0 {
            d.sub_stream1 = Some(cur.next_byte()?);
        }
        if b & 0x02 > 0 {
            d.sub_stream2 = Some(cur.next_byte()?);
        }
        if b & 0x01 > 0 {
            d.sub_stream3 = Some(cur.next_byte()?);
        }
        if cur.offset() < offset_end {
            d.additional_info = cur.next_bytes(offset_end - cur.offset())?;
        }
        Ok(d)
    }

    fn length(&self) -> u8 {
        1 + self.component_type.is_some() as u8
            + self.bsid.is_some() as u8
            + self.main_id.is_some() as u8
            + self.asvc.is_some() as u8
            + self.sub_stream1.is_some() as u8
            + self.sub_stream2.is_some() as u8
            + self.sub_stream3.is_some() as u8
            + self.additional_info.len() as u8
    }

    fn write(&self, buf: &mut BytesMut) {
        let mut flags = (self.component_type.is_some() as u8) << 7;
        flags |= (self.bsid.is_some() as u8) << 6;
        flags |= (self.main_id.is_some() as u8) << 5;
        flags |= (self.asvc.is_some() as u8) << 4;
        flags |= (self.mix_info_exists as u8) << 3;
        flags |= (self.sub_stream1.is_some() as u8) << 2;
        flags |= (self.sub_stream2.is_some() as u8) << 1;
        flags |= self.sub_stream3.is_some() as u8;
        buf.put_u8(flags);
        for field in [
            self.component_type,
            self.bsid,
            self.main_id,
            self.asvc,
            self.sub_stream1,
            self.sub_stream2,
            self.sub_stream3,
        ]
        .into_iter()
        .flatten()
        {
            buf.put_u8(field);
        }
        buf.put_slice(&self.additional_info);
    }
}

/// One item of an extended event descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedEventItem {
    pub description: Vec<u8>,
    pub content: Vec<u8>,
}

impl ExtendedEventItem {
    fn parse(cur: &mut ByteCursor<'_>) -> Result<Self> {
        let mut item = ExtendedEventItem::default();
        let description_length = cur.next_byte()? as usize;
        item.description = cur.next_bytes(description_length)?;
        let content_length = cur.next_byte()? as usize;
        item.content = cur.next_bytes(content_length)?;
        Ok(item)
    }
}

/// Extended event descriptor (EN 300 468 §6.2.15).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedEventDescriptor {
    pub number: u8,
    pub last_descriptor_number: u8,
    pub iso639_language_code: [u8; 3],
    pub items: Vec<ExtendedEventItem>,
    pub text: Vec<u8>,
}

impl ExtendedEventDescriptor {
    fn parse(cur: &mut ByteCursor<'_>) -> Result<Self> {
        let mut d = ExtendedEventDescriptor::default();
        let b = cur.next_byte()?;
        d.number = b >> 4;
        d.last_descriptor_number = b & 0xf;
        d.iso639_language_code
            .copy_from_slice(cur.next_bytes_no_copy(3)?);

        let items_length = cur.next_byte()? as usize;
        let items_end = cur.offset() + items_length;
        while cur.offset() < items_end {
            d.items.push(ExtendedEventItem::parse(cur)?);
        }

        let text_length = cur.next_byte()? as usize;
        d.text = cur.next_bytes(text_length)?;
        Ok(d)
    }

    fn items_length(&self) -> usize {
        self.items
            .iter()
            .map(|item| 2 + item.description.len() + item.content.len())
            .sum()
    }

    fn length(&self) -> u8 {
        (5 + self.items_length() + 1 + self.text.len()) as u8
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.number << 4 | self.last_descriptor_number & 0xf);
        buf.put_slice(&self.iso639_language_code);
        buf.put_u8(self.items_length() as u8);
        for item in &self.items {
            buf.put_u8(item.description.len() as u8);
            buf.put_slice(&item.description);
            buf.put_u8(item.content.len() as u8);
            buf.put_slice(&item.content);
        }
        buf.put_u8(self.text.len() as u8);
        buf.put_slice(&self.text);
    }
}

/// Supplementary audio descriptor carried by an extension descriptor
/// (EN 300 468 §6.4.10).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupplementaryAudioDescriptor {
    pub mix_type: bool,
    pub editorial_classification: u8,
    pub language_code: Option<[u8; 3]>,
    pub private_data: Vec<u8>,
}

impl SupplementaryAudioDescriptor {
    fn parse(cur: &mut ByteCursor<'_>, offset_end: usize) -> Result<Self> {
        let b = cur.next_byte()?;
        let mut d = SupplementaryAudioDescriptor {
            mix_type: b & 0x80 > 0,
            editorial_classification: b >> 2 & 0x1f,
            ..Default::default()
        };
        if b & 0x01 > 0 {
            let mut code = [0u8; 3];
            code.copy_from_slice(cur.next_bytes_no_copy(3)?);
            d.language_code = Some(code);
        }
        if cur.offset() < offset_end {
            d.private_data = cur.next_bytes(offset_end - cur.offset())?;
        }
        Ok(d)
    }

    fn length(&self) -> u8 {
        1 + 3 * self.language_code.is_some() as u8 + self.private_data.len() as u8
    }

    fn write(&self, buf: &mut BytesMut) {
        let mut b = (self.mix_type as u8) << 7;
        b |= (self.editorial_classification & 0x1f) << 2;
        b |= 0x02; // reserved
        b |= self.language_code.is_some() as u8;
        buf.put_u8(b);
        if let Some(code) = &self.language_code {
            buf.put_slice(code);
        }
        buf.put_slice(&self.private_data);
    }
}

/// Payload of an extension descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionPayload {
    SupplementaryAudio(SupplementaryAudioDescriptor),
    Unknown(Vec<u8>),
}

/// Extension descriptor (EN 300 468 §6.2.16).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionDescriptor {
    pub tag: u8,
    pub payload: ExtensionPayload,
}

impl ExtensionDescriptor {
    fn parse(cur: &mut ByteCursor<'_>, offset_end: usize) -> Result<Self> {
        let tag = cur.next_byte()?;
        let payload = match tag {
            DESCRIPTOR_TAG_EXTENSION_SUPPLEMENTARY_AUDIO => ExtensionPayload::SupplementaryAudio(
                SupplementaryAudioDescriptor::parse(cur, offset_end)?,
            ),
            _ => ExtensionPayload::Unknown(cur.next_bytes(offset_end - cur.offset())?),
        };
        Ok(ExtensionDescriptor { tag, payload })
    }

    fn length(&self) -> u8 {
        1 + match &self.payload {
            ExtensionPayload::SupplementaryAudio(d) => d.length(),
            ExtensionPayload::Unknown(data) => data.len() as u8,
        }
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.tag);
        match &self.payload {
            ExtensionPayload::SupplementaryAudio(d) => d.write(buf),
            ExtensionPayload::Unknown(data) => buf.put_slice(data),
        }
    }
}

/// ISO 639 language and audio type descriptor (ISO 13818-1 §2.6.18).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Iso639LanguageDescriptor {
    pub language: [u8; 3],
    pub audio_type: u8,
}

impl Iso639LanguageDescriptor {
    fn parse(cur: &mut ByteCursor<'_>, offset_end: usize) -> Result<Self> {
        // Some real streams declare a length of 3 and encode the language in
        // only two bytes; take the last byte as the type and whatever is left
        // as the language code.
        let bs = cur.next_bytes_no_copy(offset_end - cur.offset())?;
        let mut d = Iso639LanguageDescriptor {
            audio_type: *bs.last().unwrap_or(&0),
            ..Default::default()
        };
        let n = bs.len().min(3);
        d.language[..n].copy_from_slice(&bs[..n]);
        Ok(d)
    }

    fn length(&self) -> u8 {
        4
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.language);
        buf.put_u8(self.audio_type);
    }
}

/// One country entry of a local time offset descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTimeOffsetItem {
    pub country_code: [u8; 3],
    pub country_region_id: u8,
    pub local_time_offset_polarity: bool,
    pub local_time_offset: Duration,
    pub time_of_change: DateTime<Utc>,
    pub next_time_offset: Duration,
}

/// Local time offset descriptor (EN 300 468 §6.2.20).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalTimeOffsetDescriptor {
    pub items: Vec<LocalTimeOffsetItem>,
}

impl LocalTimeOffsetDescriptor {
    fn parse(cur: &mut ByteCursor<'_>, offset_end: usize) -> Result<Self> {
        let mut d = LocalTimeOffsetDescriptor::default();
        for _ in 0..(offset_end - cur.offset()) / 13 {
            let mut country_code = [0u8; 3];
            country_code.copy_from_slice(cur.next_bytes_no_copy(3)?);
            let b = cur.next_byte()?;
            d.items.push(LocalTimeOffsetItem {
                country_code,
                country_region_id: b >> 2,
                local_time_offset_polarity: b & 0x01 > 0,
                local_time_offset: parse_dvb_duration_minutes(cur)?,
                time_of_change: parse_dvb_time(cur)?,
                next_time_offset: parse_dvb_duration_minutes(cur)?,
            });
        }
        Ok(d)
    }

    fn length(&self) -> u8 {
        13 * self.items.len() as u8
    }

    fn write(&self, buf: &mut BytesMut) {
        for item in &self.items {
            buf.put_slice(&item.country_code);
            buf.put_u8(
                item.country_region_id << 2 | 0x02 | item.local_time_offset_polarity as u8,
            );
            write_dvb_duration_minutes(buf, item.local_time_offset);
            write_dvb_time(buf, &item.time_of_change);
            write_dvb_duration_minutes(buf, item.next_time_offset);
        }
    }
}

/// Maximum bitrate descriptor (ISO 13818-1 §2.6.26).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaximumBitrateDescriptor {
    /// In bytes per second.
    pub bitrate: u32,
}

impl MaximumBitrateDescriptor {
    fn parse(cur: &mut ByteCursor<'_>) -> Result<Self> {
        let bs = cur.next_bytes_no_copy(3)?;
        Ok(MaximumBitrateDescriptor {
            bitrate: ((bs[0] as u32 & 0x3f) << 16 | (bs[1] as u32) << 8 | bs[2] as u32) * 50,
        })
    }

    fn length(&self) -> u8 {
        3
    }

    fn write(&self, buf: &mut BytesMut) {
        let units = self.bitrate / 50;
        buf.put_u8(0xc0 | (units >> 16) as u8 & 0x3f);
        buf.put_u8((units >> 8) as u8);
        buf.put_u8(units as u8);
    }
}

/// Network name descriptor (EN 300 468 §6.2.27).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkNameDescriptor {
    pub name: Vec<u8>,
}

impl NetworkNameDescriptor {
    fn parse(cur: &mut ByteCursor<'_>, offset_end: usize) -> Result<Self> {
        Ok(NetworkNameDescriptor {
            name: cur.next_bytes(offset_end - cur.offset())?,
        })
    }

    fn length(&self) -> u8 {
        self.name.len() as u8
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.name);
    }
}

/// One country entry of a parental rating descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParentalRatingItem {
    pub country_code: [u8; 3],
    pub rating: u8,
}

impl ParentalRatingItem {
    /// Minimum recommended age, or zero for undefined and user-defined
    /// ratings.
    pub fn minimum_age(&self) -> u8 {
        if self.rating == 0 || self.rating > 0x10 {
            return 0;
        }
        self.rating + 3
    }
}

/// Parental rating descriptor (EN 300 468 §6.2.28).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParentalRatingDescriptor {
    pub items: Vec<ParentalRatingItem>,
}

impl ParentalRatingDescriptor {
    fn parse(cur: &mut ByteCursor<'_>, offset_end: usize) -> Result<Self> {
        let mut d = ParentalRatingDescriptor::default();
        for _ in 0..(offset_end - cur.offset()) / 4 {
            let bs = cur.next_bytes_no_copy(4)?;
            d.items.push(ParentalRatingItem {
                country_code: [bs[0], bs[1], bs[2]],
                rating: bs[3],
            });
        }
        Ok(d)
    }

    fn length(&self) -> u8 {
        4 * self.items.len() as u8
    }

    fn write(&self, buf: &mut BytesMut) {
        for item in &self.items {
            buf.put_slice(&item.country_code);
            buf.put_u8(item.rating);
        }
    }
}

/// Registration descriptor (ISO 13818-1 §2.6.8).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationDescriptor {
    pub format_identifier: u32,
    pub additional_identification_info: Vec<u8>,
}

impl RegistrationDescriptor {
    fn parse(cur: &mut ByteCursor<'_>, offset_end: usize) -> Result<Self> {
        let mut d = RegistrationDescriptor {
            format_identifier: cur.next_u32()?,
            ..Default::default()
        };
        if cur.offset() < offset_end {
            d.additional_identification_info = cur.next_bytes(offset_end - cur.offset())?;
        }
        Ok(d)
    }

    fn length(&self) -> u8 {
        4 + self.additional_identification_info.len() as u8
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u32(self.format_identifier);
        buf.put_slice(&self.additional_identification_info);
    }
}

/// Service descriptor (EN 300 468 §6.2.33).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub service_type: u8,
    pub provider: Vec<u8>,
    pub name: Vec<u8>,
}

impl ServiceDescriptor {
    fn parse(cur: &mut ByteCursor<'_>) -> Result<Self> {
        let mut d = ServiceDescriptor {
            service_type: cur.next_byte()?,
            ..Default::default()
        };
        let provider_length = cur.next_byte()? as usize;
        d.provider = cur.next_bytes(provider_length)?;
        let name_length = cur.next_byte()? as usize;
        d.name = cur.next_bytes(name_length)?;
        Ok(d)
    }

    fn length(&self) -> u8 {
        (3 + self.provider.len() + self.name.len()) as u8
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.service_type);
        buf.put_u8(self.provider.len() as u8);
        buf.put_slice(&self.provider);
        buf.put_u8(self.name.len() as u8);
        buf.put_slice(&self.name);
    }
}

/// Short event descriptor (EN 300 468 §6.2.37).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShortEventDescriptor {
    pub language: [u8; 3],
    pub event_name: Vec<u8>,
    pub text: Vec<u8>,
}

impl ShortEventDescriptor {
    fn parse(cur: &mut ByteCursor<'_>) -> Result<Self> {
        let mut d = ShortEventDescriptor::default();
        d.language.copy_from_slice(cur.next_bytes_no_copy(3)?);
        let event_length = cur.next_byte()? as usize;
        d.event_name = cur.next_bytes(event_length)?;
        let text_length = cur.next_byte()? as usize;
        d.text = cur.next_bytes(text_length)?;
        Ok(d)
    }

    fn length(&self) -> u8 {
        (5 + self.event_name.len() + self.text.len()) as u8
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.language);
        buf.put_u8(self.event_name.len() as u8);
        buf.put_slice(&self.event_name);
        buf.put_u8(self.text.len() as u8);
        buf.put_slice(&self.text);
    }
}

/// One page entry of a subtitling descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubtitlingItem {
    pub language: [u8; 3],
    pub subtitling_type: u8,
    pub composition_page_id: u16,
    pub ancillary_page_id: u16,
}

/// Subtitling descriptor (EN 300 468 §6.2.41).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubtitlingDescriptor {
    pub items: Vec<SubtitlingItem>,
}

impl SubtitlingDescriptor {
    fn parse(cur: &mut ByteCursor<'_>, offset_end: usize) -> Result<Self> {
        let mut d = SubtitlingDescriptor::default();
        for _ in 0..(offset_end - cur.offset()) / 8 {
            let mut language = [0u8; 3];
            language.copy_from_slice(cur.next_bytes_no_copy(3)?);
            d.items.push(SubtitlingItem {
                language,
                subtitling_type: cur.next_byte()?,
                composition_page_id: cur.next_u16()?,
                ancillary_page_id: cur.next_u16()?,
            });
        }
        Ok(d)
    }

    fn length(&self) -> u8 {
        8 * self.items.len() as u8
    }

    fn write(&self, buf: &mut BytesMut) {
        for item in &self.items {
            buf.put_slice(&item.language);
            buf.put_u8(item.subtitling_type);
            buf.put_u16(item.composition_page_id);
            buf.put_u16(item.ancillary_page_id);
        }
    }
}

/// One page entry of a teletext descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeletextItem {
    pub language: [u8; 3],
    pub teletext_type: u8,
    pub magazine: u8,
    /// Decimal page number, decoded from two BCD digits.
    pub page: u8,
}

/// Teletext descriptor (EN 300 468 §6.2.43), also used for VBI teletext.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeletextDescriptor {
    pub items: Vec<TeletextItem>,
}

impl TeletextDescriptor {
    fn parse(cur: &mut ByteCursor<'_>, offset_end: usize) -> Result<Self> {
        let mut d = TeletextDescriptor::default();
        for _ in 0..(offset_end - cur.offset()) / 5 {
            let mut language = [0u8; 3];
            language.copy_from_slice(cur.next_bytes_no_copy(3)?);
            let b = cur.next_byte()?;
            let teletext_type = b >> 3;
            let magazine = b & 0x7;
            let b = cur.next_byte()?;
            d.items.push(TeletextItem {
                language,
                teletext_type,
                magazine,
                page: (b >> 4) * 10 + (b & 0xf),
            });
        }
        Ok(d)
    }

    fn length(&self) -> u8 {
        5 * self.items.len() as u8
    }

    fn write(&self, buf: &mut BytesMut) {
        for item in &self.items {
            buf.put_slice(&item.language);
            buf.put_u8(item.teletext_type << 3 | item.magazine & 0x7);
            buf.put_u8((item.page / 10) << 4 | item.page % 10);
        }
    }
}

/// One line entry of a VBI data service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VbiDataItem {
    pub field_parity: bool,
    pub line_offset: u8,
}

/// One service entry of a VBI data descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VbiDataService {
    pub data_service_id: u8,
    pub items: Vec<VbiDataItem>,
}

impl VbiDataService {
    /// Whether entries for this service id describe field parity and line
    /// offsets rather than reserved bytes.
    fn has_line_entries(&self) -> bool {
        self.data_service_id <= VBI_DATA_SERVICE_ID_MONOCHROME_442_SAMPLES
            && self.data_service_id != 0x0
            && self.data_service_id != 0x3
    }
}

/// VBI data descriptor (EN 300 468 §6.2.47).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VbiDataDescriptor {
    pub services: Vec<VbiDataService>,
}

impl VbiDataDescriptor {
    fn parse(cur: &mut ByteCursor<'_>, offset_end: usize) -> Result<Self> {
        let mut d = VbiDataDescriptor::default();
        while cur.offset() < offset_end {
            let mut service = VbiDataService {
                data_service_id: cur.next_byte()?,
                items: Vec::new(),
            };
            let data_length = cur.next_byte()? as usize;
            let data_end = cur.offset() + data_length;
            while cur.offset() < data_end {
                let b = cur.next_byte()?;
                if service.has_line_entries() {
                    service.items.push(VbiDataItem {
                        field_parity: b & 0x20 > 0,
                        line_offset: b & 0x1f,
                    });
                }
            }
            d.services.push(service);
        }
        Ok(d)
    }

    fn length(&self) -> u8 {
        self.services
            .iter()
            .map(|s| {
                2 + if s.has_line_entries() {
                    s.items.len() as u8
                } else {
                    1
                }
            })
            .sum()
    }

    fn write(&self, buf: &mut BytesMut) {
        for service in &self.services {
            buf.put_u8(service.data_service_id);
            if service.has_line_entries() {
                buf.put_u8(service.items.len() as u8);
                for item in &service.items {
                    buf.put_u8(0xc0 | (item.field_parity as u8) << 5 | item.line_offset & 0x1f);
                }
            } else {
                buf.put_u8(1);
                buf.put_u8(0xff);
            }
        }
    }
}

/// A parsed descriptor, discriminated by its tag.
///
/// Tags with bit 7 set (except 0xFF) are user-defined and kept raw; tags
/// without a dedicated parser are kept raw as [`Descriptor::Unknown`].
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    Ac3(Ac3Descriptor),
    AvcVideo(AvcVideoDescriptor),
    Component(ComponentDescriptor),
    Content(ContentDescriptor),
    DataStreamAlignment(u8),
    EnhancedAc3(EnhancedAc3Descriptor),
    ExtendedEvent(ExtendedEventDescriptor),
    Extension(ExtensionDescriptor),
    Iso639LanguageAndAudioType(Iso639LanguageDescriptor),
    LocalTimeOffset(LocalTimeOffsetDescriptor),
    MaximumBitrate(MaximumBitrateDescriptor),
    NetworkName(NetworkNameDescriptor),
    ParentalRating(ParentalRatingDescriptor),
    PrivateDataIndicator(u32),
    PrivateDataSpecifier(u32),
    Registration(RegistrationDescriptor),
    Service(ServiceDescriptor),
    ShortEvent(ShortEventDescriptor),
    StreamIdentifier(u8),
    Subtitling(SubtitlingDescriptor),
    Teletext(TeletextDescriptor),
    VbiData(VbiDataDescriptor),
    VbiTeletext(TeletextDescriptor),
    UserDefined { tag: u8, data: Vec<u8> },
    Unknown { tag: u8, data: Vec<u8> },
}

impl Descriptor {
    fn parse_body(cur: &mut ByteCursor<'_>, tag: u8, offset_end: usize) -> Result<Self> {
        let d = match tag {
            DESCRIPTOR_TAG_AC3 => Descriptor::Ac3(Ac3Descriptor::parse(cur, offset_end)?),
            DESCRIPTOR_TAG_AVC_VIDEO => Descriptor::AvcVideo(AvcVideoDescriptor::parse(cur)?),
            DESCRIPTOR_TAG_COMPONENT => {
                Descriptor::Component(ComponentDescriptor::parse(cur, offset_end)?)
            }
            DESCRIPTOR_TAG_CONTENT => {
                Descriptor::Content(ContentDescriptor::parse(cur, offset_end)?)
            }
            DESCRIPTOR_TAG_DATA_STREAM_ALIGNMENT => {
                Descriptor::DataStreamAlignment(cur.next_byte()?)
            }
            DESCRIPTOR_TAG_ENHANCED_AC3 => {
                Descriptor::EnhancedAc3(EnhancedAc3Descriptor::parse(cur, offset_end)?)
            }
            DESCRIPTOR_TAG_EXTENDED_EVENT => {
                Descriptor::ExtendedEvent(ExtendedEventDescriptor::parse(cur)?)
            }
            DESCRIPTOR_TAG_EXTENSION => {
                Descriptor::Extension(ExtensionDescriptor::parse(cur, offset_end)?)
            }
            DESCRIPTOR_TAG_ISO639_LANGUAGE_AND_AUDIO_TYPE => Descriptor::Iso639LanguageAndAudioType(
                Iso639LanguageDescriptor::parse(cur, offset_end)?,
            ),
            DESCRIPTOR_TAG_LOCAL_TIME_OFFSET => {
                Descriptor::LocalTimeOffset(LocalTimeOffsetDescriptor::parse(cur, offset_end)?)
            }
            DESCRIPTOR_TAG_MAXIMUM_BITRATE => {
                Descriptor::MaximumBitrate(MaximumBitrateDescriptor::parse(cur)?)
            }
            DESCRIPTOR_TAG_NETWORK_NAME => {
                Descriptor::NetworkName(NetworkNameDescriptor::parse(cur, offset_end)?)
            }
            DESCRIPTOR_TAG_PARENTAL_RATING => {
                Descriptor::ParentalRating(ParentalRatingDescriptor::parse(cur, offset_end)?)
            }
            DESCRIPTOR_TAG_PRIVATE_DATA_INDICATOR => {
                Descriptor::PrivateDataIndicator(cur.next_u32()?)
            }
            DESCRIPTOR_TAG_PRIVATE_DATA_SPECIFIER => {
                Descriptor::PrivateDataSpecifier(cur.next_u32()?)
            }
            DESCRIPTOR_TAG_REGISTRATION => {
                Descriptor::Registration(RegistrationDescriptor::parse(cur, offset_end)?)
            }
            DESCRIPTOR_TAG_SERVICE => Descriptor::Service(ServiceDescriptor::parse(cur)?),
            DESCRIPTOR_TAG_SHORT_EVENT => {
                Descriptor::ShortEvent(ShortEventDescriptor::parse(cur)?)
            }
            DESCRIPTOR_TAG_STREAM_IDENTIFIER => Descriptor::StreamIdentifier(cur.next_byte()?),
            DESCRIPTOR_TAG_SUBTITLING => {
                Descriptor::Subtitling(SubtitlingDescriptor::parse(cur, offset_end)?)
            }
            DESCRIPTOR_TAG_TELETEXT => {
                Descriptor::Teletext(TeletextDescriptor::parse(cur, offset_end)?)
            }
            DESCRIPTOR_TAG_VBI_DATA => {
                Descriptor::VbiData(VbiDataDescriptor::parse(cur, offset_end)?)
            }
            DESCRIPTOR_TAG_VBI_TELETEXT => {
                Descriptor::VbiTeletext(TeletextDescriptor::parse(cur, offset_end)?)
            }
            tag if tag & 0x80 > 0 && tag != 0xff => Descriptor::UserDefined {
                tag,
                data: cur.next_bytes(offset_end - cur.offset())?,
            },
            tag => Descriptor::Unknown {
                tag,
                data: cur.next_bytes(offset_end - cur.offset())?,
            },
        };
        Ok(d)
    }

    /// Wire tag of this descriptor.
    pub fn tag(&self) -> u8 {
        match self {
            Descriptor::Ac3(_) => DESCRIPTOR_TAG_AC3,
            Descriptor::AvcVideo(_) => DESCRIPTOR_TAG_AVC_VIDEO,
            Descriptor::Component(_) => DESCRIPTOR_TAG_COMPONENT,
            Descriptor::Content(_) => DESCRIPTOR_TAG_CONTENT,
            Descriptor::DataStreamAlignment(_) => DESCRIPTOR_TAG_DATA_STREAM_ALIGNMENT,
            Descriptor::EnhancedAc3(_) => DESCRIPTOR_TAG_ENHANCED_AC3,
            Descriptor::ExtendedEvent(_) => DESCRIPTOR_TAG_EXTENDED_EVENT,
            Descriptor::Extension(_) => DESCRIPTOR_TAG_EXTENSION,
            Descriptor::Iso639LanguageAndAudioType(_) => {
                DESCRIPTOR_TAG_ISO639_LANGUAGE_AND_AUDIO_TYPE
            }
            Descriptor::LocalTimeOffset(_) => DESCRIPTOR_TAG_LOCAL_TIME_OFFSET,
            Descriptor::MaximumBitrate(_) => DESCRIPTOR_TAG_MAXIMUM_BITRATE,
            Descriptor::NetworkName(_) => DESCRIPTOR_TAG_NETWORK_NAME,
            Descriptor::ParentalRating(_) => DESCRIPTOR_TAG_PARENTAL_RATING,
            Descriptor::PrivateDataIndicator(_) => DESCRIPTOR_TAG_PRIVATE_DATA_INDICATOR,
            Descriptor::PrivateDataSpecifier(_) => DESCRIPTOR_TAG_PRIVATE_DATA_SPECIFIER,
            Descriptor::Registration(_) => DESCRIPTOR_TAG_REGISTRATION,
            Descriptor::Service(_) => DESCRIPTOR_TAG_SERVICE,
            Descriptor::ShortEvent(_) => DESCRIPTOR_TAG_SHORT_EVENT,
            Descriptor::StreamIdentifier(_) => DESCRIPTOR_TAG_STREAM_IDENTIFIER,
            Descriptor::Subtitling(_) => DESCRIPTOR_TAG_SUBTITLING,
            Descriptor::Teletext(_) => DESCRIPTOR_TAG_TELETEXT,
            Descriptor::VbiData(_) => DESCRIPTOR_TAG_VBI_DATA,
            Descriptor::VbiTeletext(_) => DESCRIPTOR_TAG_VBI_TELETEXT,
            Descriptor::UserDefined { tag, .. } | Descriptor::Unknown { tag, .. } => *tag,
        }
    }

    /// Length of the descriptor body, not counting the tag and length bytes.
    pub fn length(&self) -> u8 {
        match self {
            Descriptor::Ac3(d) => d.length(),
            Descriptor::AvcVideo(d) => d.length(),
            Descriptor::Component(d) => d.length(),
            Descriptor::Content(d) => d.length(),
            Descriptor::DataStreamAlignment(_) => 1,
            Descriptor::EnhancedAc3(d) => d.length(),
            Descriptor::ExtendedEvent(d) => d.length(),
            Descriptor::Extension(d) => d.length(),
            Descriptor::Iso639LanguageAndAudioType(d) => d.length(),
            Descriptor::LocalTimeOffset(d) => d.length(),
            Descriptor::MaximumBitrate(d) => d.length(),
            Descriptor::NetworkName(d) => d.length(),
            Descriptor::ParentalRating(d) => d.length(),
            Descriptor::PrivateDataIndicator(_) => 4,
            Descriptor::PrivateDataSpecifier(_) => 4,
            Descriptor::Registration(d) => d.length(),
            Descriptor::Service(d) => d.length(),
            Descriptor::ShortEvent(d) => d.length(),
            Descriptor::StreamIdentifier(_) => 1,
            Descriptor::Subtitling(d) => d.length(),
            Descriptor::Teletext(d) => d.length(),
            Descriptor::VbiData(d) => d.length(),
            Descriptor::VbiTeletext(d) => d.length(),
            Descriptor::UserDefined { data, .. } | Descriptor::Unknown { data, .. } => {
                data.len() as u8
            }
        }
    }

    /// Serialize the descriptor, tag and length bytes included.
    pub fn write(&self, buf: &mut BytesMut) -> usize {
        buf.put_u8(self.tag());
        buf.put_u8(self.length());
        match self {
            Descriptor::Ac3(d) => d.write(buf),
            Descriptor::AvcVideo(d) => d.write(buf),
            Descriptor::Component(d) => d.write(buf),
            Descriptor::Content(d) => d.write(buf),
            Descriptor::DataStreamAlignment(alignment) => buf.put_u8(*alignment),
            Descriptor::EnhancedAc3(d) => d.write(buf),
            Descriptor::ExtendedEvent(d) => d.write(buf),
            Descriptor::Extension(d) => d.write(buf),
            Descriptor::Iso639LanguageAndAudioType(d) => d.write(buf),
            Descriptor::LocalTimeOffset(d) => d.write(buf),
            Descriptor::MaximumBitrate(d) => d.write(buf),
            Descriptor::NetworkName(d) => d.write(buf),
            Descriptor::ParentalRating(d) => d.write(buf),
            Descriptor::PrivateDataIndicator(indicator) => buf.put_u32(*indicator),
            Descriptor::PrivateDataSpecifier(specifier) => buf.put_u32(*specifier),
            Descriptor::Registration(d) => d.write(buf),
            Descriptor::Service(d) => d.write(buf),
            Descriptor::ShortEvent(d) => d.write(buf),
            Descriptor::StreamIdentifier(component_tag) => buf.put_u8(*component_tag),
            Descriptor::Subtitling(d) => d.write(buf),
            Descriptor::Teletext(d) => d.write(buf),
            Descriptor::VbiData(d) => d.write(buf),
            Descriptor::VbiTeletext(d) => d.write(buf),
            Descriptor::UserDefined { data, .. } | Descriptor::Unknown { data, .. } => {
                buf.put_slice(data)
            }
        }
        2 + self.length() as usize
    }
}

/// Parse a descriptor loop: a 12-bit byte length followed by descriptors.
///
/// The upper four bits of the length word belong to the surrounding table
/// (reserved bits, or running status in SDT and EIT) and are ignored here.
pub fn parse_descriptors(cur: &mut ByteCursor<'_>) -> Result<Vec<Descriptor>> {
    let length = (cur.next_u16()? & 0xfff) as usize;
    let offset_end = cur.offset() + length;

    let mut descriptors = Vec::new();
    while cur.offset() < offset_end {
        let tag = cur.next_byte()?;
        let length = cur.next_byte()? as usize;
        // The declared length is authoritative even when the body is
        // corrupt; always resume right after it.
        let descriptor_end = cur.offset() + length;
        if length > 0 {
            descriptors.push(Descriptor::parse_body(cur, tag, descriptor_end)?);
        } else {
            descriptors.push(Descriptor::Unknown {
                tag,
                data: Vec::new(),
            });
        }
        cur.seek(descriptor_end);
    }
    Ok(descriptors)
}

/// Total wire length of a descriptor loop, without the 2-byte length word.
pub fn calc_descriptors_length(descriptors: &[Descriptor]) -> u16 {
    descriptors.iter().map(|d| 2 + d.length() as u16).sum()
}

/// Serialize a descriptor loop including its 12-bit length word.
pub fn write_descriptors_with_length(buf: &mut BytesMut, descriptors: &[Descriptor]) -> usize {
    buf.put_u16(calc_descriptors_length(descriptors) | 0xf000);
    let mut written = 2;
    for d in descriptors {
        written += d.write(buf);
    }
    written
}
