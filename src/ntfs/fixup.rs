//! Update-sequence (fixup) validation and repair.
//!
//! Every multi-sector record parks the real last two bytes of each sector
//! in an array at the record head and stamps the sector tails with the
//! update sequence number instead. A tail that does not match the USN
//! means the write was torn. Decoding any attribute before the tails are
//! restored would read the USN stamp instead of real data, so fixup runs
//! first, always.

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::error::NtfsError;

/// Validate and patch the update-sequence bytes of one record buffer.
///
/// `record` is the record's index, used only for error context. The buffer
/// must hold the whole record. Not idempotent relative to the patched
/// buffer: once the tails are restored they no longer match the USN, and a
/// second call fails.
pub fn apply_fixups(record: u64, buf: &mut [u8], bytes_per_sector: u16) -> Result<(), NtfsError> {
    let bytes_per_sector = bytes_per_sector as usize;
    if bytes_per_sector < 2 || buf.len() < 8 {
        return Err(NtfsError::BadAttribute {
            record,
            offset: 0,
            reason: format!(
                "cannot fix up a {}-byte record with {bytes_per_sector}-byte sectors",
                buf.len()
            ),
        });
    }

    let usa_offset = LittleEndian::read_u16(&buf[0x04..0x06]) as usize;
    let usa_count = LittleEndian::read_u16(&buf[0x06..0x08]) as usize;

    // The array is the USN itself plus one replacement word per sector.
    if usa_count < 2 || usa_offset + usa_count * 2 > buf.len() {
        return Err(NtfsError::BadAttribute {
            record,
            offset: usa_offset,
            reason: format!("invalid update sequence array (count {usa_count})"),
        });
    }
    if (usa_count - 1) * bytes_per_sector > buf.len() {
        return Err(NtfsError::BadAttribute {
            record,
            offset: usa_offset,
            reason: format!(
                "update sequence covers {} sectors but the buffer holds {}",
                usa_count - 1,
                buf.len() / bytes_per_sector
            ),
        });
    }

    let usn = LittleEndian::read_u16(&buf[usa_offset..usa_offset + 2]);

    // Validate every sector tail before patching any of them, so a torn
    // record is never half-repaired.
    for sector in 0..usa_count - 1 {
        let tail = (sector + 1) * bytes_per_sector - 2;
        let found = LittleEndian::read_u16(&buf[tail..tail + 2]);
        if found != usn {
            return Err(NtfsError::FixupMismatch {
                record,
                sector,
                expected: usn,
                found,
            });
        }
    }

    for sector in 0..usa_count - 1 {
        let tail = (sector + 1) * bytes_per_sector - 2;
        let replacement = usa_offset + 2 + sector * 2;
        buf[tail] = buf[replacement];
        buf[tail + 1] = buf[replacement + 1];
    }

    debug!("record {record}: fixup applied over {} sectors (usn {usn:#06x})", usa_count - 1);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1024-byte record: USA at 0x30, USN 0xBEEF, replacement words
    /// 0x1111 and 0x2222 parked for the two sector tails.
    fn make_fixed_up_record() -> Vec<u8> {
        let mut buf = vec![0u8; 1024];
        buf[0..4].copy_from_slice(b"FILE");
        buf[0x04..0x06].copy_from_slice(&0x30u16.to_le_bytes());
        buf[0x06..0x08].copy_from_slice(&3u16.to_le_bytes());
        buf[0x30..0x32].copy_from_slice(&0xBEEFu16.to_le_bytes());
        buf[0x32..0x34].copy_from_slice(&0x1111u16.to_le_bytes());
        buf[0x34..0x36].copy_from_slice(&0x2222u16.to_le_bytes());
        // Stamp both sector tails with the USN
        buf[510..512].copy_from_slice(&0xBEEFu16.to_le_bytes());
        buf[1022..1024].copy_from_slice(&0xBEEFu16.to_le_bytes());
        buf
    }

    #[test]
    fn test_fixup_restores_sector_tails() {
        let mut buf = make_fixed_up_record();
        apply_fixups(0, &mut buf, 512).unwrap();
        assert_eq!(&buf[510..512], &0x1111u16.to_le_bytes());
        assert_eq!(&buf[1022..1024], &0x2222u16.to_le_bytes());
    }

    #[test]
    fn test_torn_write_detected() {
        let mut buf = make_fixed_up_record();
        // Corrupt the second sector's tail
        buf[1022..1024].copy_from_slice(&0xDEADu16.to_le_bytes());
        let err = apply_fixups(7, &mut buf, 512).unwrap_err();
        match err {
            NtfsError::FixupMismatch {
                record,
                sector,
                expected,
                found,
            } => {
                assert_eq!(record, 7);
                assert_eq!(sector, 1);
                assert_eq!(expected, 0xBEEF);
                assert_eq!(found, 0xDEAD);
            }
            other => panic!("unexpected error: {other}"),
        }
        // The first sector's tail must not have been patched
        assert_eq!(&buf[510..512], &0xBEEFu16.to_le_bytes());
    }

    #[test]
    fn test_not_idempotent_after_patch() {
        let mut buf = make_fixed_up_record();
        apply_fixups(0, &mut buf, 512).unwrap();
        assert!(matches!(
            apply_fixups(0, &mut buf, 512),
            Err(NtfsError::FixupMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_usa_rejected() {
        let mut buf = make_fixed_up_record();
        buf[0x06..0x08].copy_from_slice(&0u16.to_le_bytes());
        assert!(matches!(
            apply_fixups(0, &mut buf, 512),
            Err(NtfsError::BadAttribute { .. })
        ));

        let mut buf = make_fixed_up_record();
        // USA extends past the buffer
        buf[0x04..0x06].copy_from_slice(&1020u16.to_le_bytes());
        assert!(apply_fixups(0, &mut buf, 512).is_err());
    }

    #[test]
    fn test_usa_count_exceeding_buffer_rejected() {
        let mut buf = make_fixed_up_record();
        // 5 sectors claimed, buffer holds 2
        buf[0x06..0x08].copy_from_slice(&6u16.to_le_bytes());
        assert!(apply_fixups(0, &mut buf, 512).is_err());
    }
}
