//! ARIB 40-bit time field decoding (16-bit MJD followed by 24-bit BCD hhmmss).

use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::error::ModelError;

/// Length of an encoded time field in bytes.
pub const ARIB_TIME_LEN: usize = 5;

fn bcd(byte: u8) -> Option<u32> {
    let hi = (byte >> 4) as u32;
    let lo = (byte & 0x0F) as u32;
    (hi <= 9 && lo <= 9).then_some(hi * 10 + lo)
}

fn mjd_epoch() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1858, 11, 17)
}

/// Decode an MJD+BCD time field into local (JST) wall-clock time.
///
/// The all-ones pattern ("undefined") is rejected.
pub fn decode(field: &[u8]) -> Result<NaiveDateTime, ModelError> {
    let invalid = || ModelError::InvalidAribTime(format!("{:02X?}", field));

    if field.len() < ARIB_TIME_LEN {
        return Err(invalid());
    }
    if field[..ARIB_TIME_LEN].iter().all(|&b| b == 0xFF) {
        return Err(invalid());
    }

    let mjd = u16::from_be_bytes([field[0], field[1]]) as i64;
    let hour = bcd(field[2]).ok_or_else(invalid)?;
    let minute = bcd(field[3]).ok_or_else(invalid)?;
    let second = bcd(field[4]).ok_or_else(invalid)?;

    let date = mjd_epoch()
        .and_then(|epoch| epoch.checked_add_signed(Duration::days(mjd)))
        .ok_or_else(invalid)?;
    date.and_hms_opt(hour, minute, second).ok_or_else(invalid)
}

/// Encode a wall-clock time into the 40-bit field.
pub fn encode(time: &NaiveDateTime) -> Option<[u8; ARIB_TIME_LEN]> {
    use chrono::Timelike;

    let days = (time.date() - mjd_epoch()?).num_days();
    let mjd = u16::try_from(days).ok()?;
    let to_bcd = |v: u32| (((v / 10) << 4) | (v % 10)) as u8;
    let [m0, m1] = mjd.to_be_bytes();
    Some([
        m0,
        m1,
        to_bcd(time.hour()),
        to_bcd(time.minute()),
        to_bcd(time.second()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_arib_example() {
        // ARIB STD-B10 example: 93/10/13 12:45:00 -> 0xC079124500
        let time = decode(&[0xC0, 0x79, 0x12, 0x45, 0x00]).unwrap();
        assert_eq!(
            time,
            NaiveDate::from_ymd_opt(1993, 10, 13)
                .unwrap()
                .and_hms_opt(12, 45, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_decode_rejects_bad_bcd() {
        assert!(decode(&[0xC0, 0x79, 0x1A, 0x45, 0x00]).is_err());
        assert!(decode(&[0xC0, 0x79, 0x25, 0x00, 0x00]).is_err());
        assert!(decode(&[0xFF; 5]).is_err());
        assert!(decode(&[0xC0, 0x79]).is_err());
    }

    #[test]
    fn test_encode_matches_decode() {
        let time = NaiveDate::from_ymd_opt(2024, 4, 1)
            .unwrap()
            .and_hms_opt(23, 59, 58)
            .unwrap();
        let field = encode(&time).unwrap();
        assert_eq!(decode(&field).unwrap(), time);
    }
}
