//! DVB SI time and duration codecs (ETSI EN 300 468 Annex C).
//!
//! Times are 16 bits of Modified Julian Date followed by six BCD digits of
//! hours, minutes and seconds. Durations are BCD digits only.

use std::time::Duration;

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

use crate::{ByteCursor, DemuxError, Result};

fn bcd_digits(b: u8) -> u64 {
    (b >> 4) as u64 * 10 + (b & 0xf) as u64
}

fn bcd_byte(n: u8) -> u8 {
    (n / 10) << 4 | n % 10
}

/// Parse a 5-byte DVB time into UTC.
///
/// The MJD arithmetic follows EN 300 468 Annex C to the letter; it is only
/// valid for dates the 16-bit MJD can express (1900 through 2038).
pub fn parse_dvb_time(cur: &mut ByteCursor<'_>) -> Result<DateTime<Utc>> {
    let mjd = cur.next_u16()? as f64;
    let ytf = ((mjd - 15078.2) / 365.25).floor();
    let mtf = ((mjd - 14956.1 - (ytf * 365.25).floor()) / 30.6001).floor();
    let mt = mtf as i32;
    let day = (mjd - 14956.0 - (ytf * 365.25).floor() - (mtf * 30.6001).floor()) as u32;

    let k = (mt >> 1 == 7) as i32;
    let year = 1900 + ytf as i32 + k;
    let month = mt - 1 - k * 12;

    let bs = cur.next_bytes_no_copy(3)?;
    Utc.with_ymd_and_hms(
        year,
        month as u32,
        day,
        bcd_digits(bs[0]) as u32,
        bcd_digits(bs[1]) as u32,
        bcd_digits(bs[2]) as u32,
    )
    .single()
    .ok_or(DemuxError::InvalidDvbTime)
}

/// Parse a 2-byte BCD duration in hours and minutes.
pub fn parse_dvb_duration_minutes(cur: &mut ByteCursor<'_>) -> Result<Duration> {
    let bs = cur.next_bytes_no_copy(2)?;
    Ok(Duration::from_secs(
        bcd_digits(bs[0]) * 3600 + bcd_digits(bs[1]) * 60,
    ))
}

/// Parse a 3-byte BCD duration in hours, minutes and seconds.
pub fn parse_dvb_duration_seconds(cur: &mut ByteCursor<'_>) -> Result<Duration> {
    let bs = cur.next_bytes_no_copy(3)?;
    Ok(Duration::from_secs(
        bcd_digits(bs[0]) * 3600 + bcd_digits(bs[1]) * 60 + bcd_digits(bs[2]),
    ))
}

/// Serialize a UTC time as 5-byte DVB time.
pub fn write_dvb_time(buf: &mut BytesMut, t: &DateTime<Utc>) -> usize {
    let year = t.year() - 1900;
    let month = t.month() as i32;
    let day = t.day() as i32;

    let l = (month <= 2) as i32;
    let mjd = 14956
        + day
        + ((year - l) as f64 * 365.25) as i32
        + ((month + 1 + l * 12) as f64 * 30.6001) as i32;
    buf.put_u16(mjd as u16);

    buf.put_u8(bcd_byte(t.hour() as u8));
    buf.put_u8(bcd_byte(t.minute() as u8));
    buf.put_u8(bcd_byte(t.second() as u8));
    5
}

/// Serialize a duration as 2-byte BCD hours and minutes.
pub fn write_dvb_duration_minutes(buf: &mut BytesMut, d: Duration) -> usize {
    let secs = d.as_secs();
    buf.put_u8(bcd_byte((secs / 3600) as u8));
    buf.put_u8(bcd_byte((secs / 60 % 60) as u8));
    2
}

/// Serialize a duration as 3-byte BCD hours, minutes and seconds.
pub fn write_dvb_duration_seconds(buf: &mut BytesMut, d: Duration) -> usize {
    let secs = d.as_secs();
    buf.put_u8(bcd_byte((secs / 3600) as u8));
    buf.put_u8(bcd_byte((secs / 60 % 60) as u8));
    buf.put_u8(bcd_byte((secs % 60) as u8));
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reference_dvb_time() {
        // Example from EN 300 468 Annex C: MJD 45218 is 1982-09-06.
        let bs = [0xb0, 0xa2, 0x12, 0x45, 0x00];
        let mut cur = ByteCursor::new(&bs);
        let t = parse_dvb_time(&mut cur).unwrap();
        assert_eq!(
            t,
            Utc.with_ymd_and_hms(1982, 9, 6, 12, 45, 0).unwrap()
        );
    }

    #[test]
    fn time_round_trip() {
        for (y, mo, d, h, mi, s) in [
            (1982, 9, 6, 12, 45, 0),
            (2000, 2, 29, 23, 59, 59),
            (2024, 1, 1, 0, 0, 0),
            (2035, 12, 31, 6, 30, 15),
        ] {
            let t = Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap();
            let mut buf = BytesMut::new();
            assert_eq!(write_dvb_time(&mut buf, &t), 5);
            let mut cur = ByteCursor::new(&buf);
            assert_eq!(parse_dvb_time(&mut cur).unwrap(), t);
        }
    }

    #[test]
    fn duration_seconds_round_trip() {
        let d = Duration::from_secs(2 * 3600 + 34 * 60 + 56);
        let mut buf = BytesMut::new();
        assert_eq!(write_dvb_duration_seconds(&mut buf, d), 3);
        assert_eq!(&buf[..], &[0x02, 0x34, 0x56]);
        let mut cur = ByteCursor::new(&buf);
        assert_eq!(parse_dvb_duration_seconds(&mut cur).unwrap(), d);
    }

    #[test]
    fn duration_minutes_round_trip() {
        let d = Duration::from_secs(11 * 3600 + 45 * 60);
        let mut buf = BytesMut::new();
        assert_eq!(write_dvb_duration_minutes(&mut buf, d), 2);
        let mut cur = ByteCursor::new(&buf);
        assert_eq!(parse_dvb_duration_minutes(&mut cur).unwrap(), d);
    }
}
