use byteorder::{ByteOrder, LittleEndian};

use crate::error::NtfsError;

/// NTFS boot sector (Volume Boot Record) fields and derived geometry.
///
/// Parsed once from the first sector; immutable afterwards. All later I/O
/// positioning is computed from these values.
#[derive(Debug, Clone)]
pub struct BootSector {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub total_sectors: u64,
    pub mft_start_lcn: u64,
    pub mft_mirror_start_lcn: u64,
    pub volume_serial: u64,
    mft_record_size: u32,
    index_record_size: u32,
}

impl BootSector {
    pub const SIZE: usize = 512;

    pub fn parse(vbr: &[u8]) -> Result<Self, NtfsError> {
        if vbr.len() < Self::SIZE {
            return Err(NtfsError::BadBootSector(format!(
                "boot sector is {} bytes, need {}",
                vbr.len(),
                Self::SIZE
            )));
        }

        // OEM ID "NTFS    " at offset 3
        if &vbr[3..11] != b"NTFS    " {
            return Err(NtfsError::BadBootSector("OEM ID mismatch".into()));
        }

        let bytes_per_sector = LittleEndian::read_u16(&vbr[0x0B..0x0D]);
        if !matches!(bytes_per_sector, 512 | 1024 | 2048 | 4096) {
            return Err(NtfsError::BadBootSector(format!(
                "invalid bytes per sector: {bytes_per_sector}"
            )));
        }

        let sectors_per_cluster = vbr[0x0D];
        if sectors_per_cluster == 0 || sectors_per_cluster > 128 {
            return Err(NtfsError::BadBootSector(format!(
                "invalid sectors per cluster: {sectors_per_cluster}"
            )));
        }

        let total_sectors = LittleEndian::read_u64(&vbr[0x28..0x30]);
        let mft_start_lcn = LittleEndian::read_u64(&vbr[0x30..0x38]);
        let mft_mirror_start_lcn = LittleEndian::read_u64(&vbr[0x38..0x40]);

        // The fields at 0x40 and 0x44 are stored as four bytes, but only the
        // low byte is meaningful; Windows writes e.g. 0xF6 00 00 00 for -10.
        let clusters_per_mft_record = vbr[0x40] as i8;
        let clusters_per_index_record = vbr[0x44] as i8;
        let volume_serial = LittleEndian::read_u64(&vbr[0x48..0x50]);

        let bytes_per_cluster = bytes_per_sector as u64 * sectors_per_cluster as u64;
        let mft_record_size = record_size(clusters_per_mft_record, bytes_per_cluster)?;
        let index_record_size = record_size(clusters_per_index_record, bytes_per_cluster)?;

        Ok(Self {
            bytes_per_sector,
            sectors_per_cluster,
            total_sectors,
            mft_start_lcn,
            mft_mirror_start_lcn,
            volume_serial,
            mft_record_size,
            index_record_size,
        })
    }

    pub fn bytes_per_cluster(&self) -> u64 {
        self.bytes_per_sector as u64 * self.sectors_per_cluster as u64
    }

    /// Size in bytes of one MFT record; the canonical value is 1024.
    pub fn mft_record_size(&self) -> u32 {
        self.mft_record_size
    }

    pub fn index_record_size(&self) -> u32 {
        self.index_record_size
    }

    /// Absolute byte offset of MFT record 0.
    pub fn mft_byte_offset(&self) -> u64 {
        self.mft_start_lcn * self.bytes_per_cluster()
    }

    pub fn mft_mirror_byte_offset(&self) -> u64 {
        self.mft_mirror_start_lcn * self.bytes_per_cluster()
    }

    pub fn volume_size_bytes(&self) -> u64 {
        self.total_sectors * self.bytes_per_sector as u64
    }
}

/// Record size from the signed boot-sector field.
///
/// Negative values mean `2^(-value)` bytes; positive values (below 0x80 by
/// virtue of the i8 sign bit) count whole clusters.
fn record_size(clusters: i8, bytes_per_cluster: u64) -> Result<u32, NtfsError> {
    if clusters == 0 {
        return Err(NtfsError::BadBootSector("record size field is zero".into()));
    }
    if clusters > 0 {
        let size = clusters as u64 * bytes_per_cluster;
        u32::try_from(size)
            .map_err(|_| NtfsError::BadBootSector(format!("record size {size} overflows")))
    } else {
        let pow = (-clusters) as u32;
        if pow > 31 {
            return Err(NtfsError::BadBootSector(format!(
                "record size exponent {pow} out of range"
            )));
        }
        Ok(1u32 << pow)
    }
}
