//! MFT record reading.
//!
//! Record 0 describes the `$MFT` file itself, so its non-resident `$DATA`
//! run list is the map for every other record. The reader bootstraps by
//! fetching record 0 straight from the boot-sector-derived offset, parses
//! that run list once, and serves all later record reads through it.

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};

use super::attr::{Attribute, AttributeWalker};
use super::boot::BootSector;
use super::fixup::apply_fixups;
use super::runs::{DataRun, RunReader};
use super::{FileReference, ATTR_DATA};
use crate::block::BlockSource;
use crate::error::NtfsError;

/// Record signature; `INDX` is accepted by the reader but index records
/// are not decoded here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMagic {
    File,
    Baad,
    Indx,
}

impl RecordMagic {
    fn from_bytes(bytes: [u8; 4]) -> Option<Self> {
        match &bytes {
            b"FILE" => Some(Self::File),
            b"BAAD" => Some(Self::Baad),
            b"INDX" => Some(Self::Indx),
            _ => None,
        }
    }
}

/// Fixed header at the start of every FILE record.
#[derive(Debug, Clone)]
pub struct RecordHeader {
    pub magic: RecordMagic,
    pub update_sequence_offset: u16,
    pub update_sequence_count: u16,
    pub log_sequence_number: u64,
    pub sequence_number: u16,
    pub hard_link_count: u16,
    pub first_attribute_offset: u16,
    pub flags: u16,
    pub used_size: u32,
    pub allocated_size: u32,
    pub base_record: FileReference,
    pub next_attribute_id: u16,
    /// This record's own number, stamped by Windows XP and later.
    pub record_number: u32,
}

pub const RECORD_FLAG_IN_USE: u16 = 0x01;
pub const RECORD_FLAG_DIRECTORY: u16 = 0x02;

impl RecordHeader {
    pub fn parse(record: u64, buf: &[u8], bytes_per_sector: u16) -> Result<Self, NtfsError> {
        let bad = |reason: String| NtfsError::BadAttribute {
            record,
            offset: 0,
            reason,
        };
        if buf.len() < 48 {
            return Err(bad(format!("record buffer is {} bytes, need 48", buf.len())));
        }

        let magic = RecordMagic::from_bytes([buf[0], buf[1], buf[2], buf[3]]).ok_or(
            NtfsError::BadMagic {
                record,
                found: [buf[0], buf[1], buf[2], buf[3]],
            },
        )?;

        let header = Self {
            magic,
            update_sequence_offset: LittleEndian::read_u16(&buf[0x04..0x06]),
            update_sequence_count: LittleEndian::read_u16(&buf[0x06..0x08]),
            log_sequence_number: LittleEndian::read_u64(&buf[0x08..0x10]),
            sequence_number: LittleEndian::read_u16(&buf[0x10..0x12]),
            hard_link_count: LittleEndian::read_u16(&buf[0x12..0x14]),
            first_attribute_offset: LittleEndian::read_u16(&buf[0x14..0x16]),
            flags: LittleEndian::read_u16(&buf[0x16..0x18]),
            used_size: LittleEndian::read_u32(&buf[0x18..0x1C]),
            allocated_size: LittleEndian::read_u32(&buf[0x1C..0x20]),
            base_record: FileReference(LittleEndian::read_u64(&buf[0x20..0x28])),
            next_attribute_id: LittleEndian::read_u16(&buf[0x28..0x2A]),
            record_number: LittleEndian::read_u32(&buf[0x2C..0x30]),
        };

        if header.used_size > header.allocated_size {
            return Err(bad(format!(
                "used size {} exceeds allocated size {}",
                header.used_size, header.allocated_size
            )));
        }
        if header.allocated_size as usize > buf.len() {
            return Err(bad(format!(
                "allocated size {} exceeds record buffer {}",
                header.allocated_size,
                buf.len()
            )));
        }
        let first_attr = header.first_attribute_offset as usize;
        if first_attr % 8 != 0 || first_attr >= header.used_size as usize {
            return Err(bad(format!("invalid first attribute offset {first_attr:#x}")));
        }
        // Every used byte must lie inside a fixed-up sector.
        let fixed_sectors = header.update_sequence_count.saturating_sub(1) as usize;
        if fixed_sectors * (bytes_per_sector as usize) < header.used_size as usize {
            return Err(bad(format!(
                "update sequence covers {fixed_sectors} sectors, fewer than used size {}",
                header.used_size
            )));
        }
        let canonical_count = 1 + (header.used_size as usize).div_ceil(bytes_per_sector as usize);
        if header.update_sequence_count as usize != canonical_count {
            debug!(
                "record {record}: update sequence count {} (canonical for used size would be {canonical_count})",
                header.update_sequence_count
            );
        }

        Ok(header)
    }

    pub fn is_in_use(&self) -> bool {
        self.flags & RECORD_FLAG_IN_USE != 0
    }

    pub fn is_directory(&self) -> bool {
        self.flags & RECORD_FLAG_DIRECTORY != 0
    }
}

/// A fixed-up MFT record in an owned buffer. Attribute views borrow from
/// this buffer and share its lifetime.
#[derive(Debug)]
pub struct MftRecord {
    pub number: u64,
    pub header: RecordHeader,
    buf: Vec<u8>,
}

impl MftRecord {
    pub fn attributes(&self) -> AttributeWalker<'_> {
        AttributeWalker::new(
            self.number,
            &self.buf,
            self.header.first_attribute_offset as usize,
            self.header.used_size as usize,
        )
    }

    /// First cleanly-parsed attribute of the given type.
    pub fn find_attribute(&self, type_id: u32) -> Option<Attribute<'_>> {
        self.attributes()
            .filter_map(|a| a.ok())
            .find(|a| a.header.type_id == type_id)
    }

    /// First unnamed attribute of the given type (the primary stream).
    pub fn find_unnamed_attribute(&self, type_id: u32) -> Option<Attribute<'_>> {
        self.attributes()
            .filter_map(|a| a.ok())
            .find(|a| a.header.type_id == type_id && !a.is_named())
    }

    /// Reference address composed from this record's number and sequence
    /// number; on a consistent volume a base record's stored base
    /// reference is zero and other records point at their base.
    pub fn file_reference(&self) -> FileReference {
        FileReference::new(self.header.record_number as u64, self.header.sequence_number)
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }
}

/// Reads MFT records by index through the MFT's own `$DATA` run list.
///
/// Holds exactly one `BlockSource`; record buffers are handed to the
/// caller and never shared. No record cache is kept (callers layer one on
/// top if they need it).
pub struct MftReader<S> {
    source: S,
    boot: BootSector,
    mft_runs: Vec<DataRun>,
    mft_data_size: u64,
}

impl<S: BlockSource> MftReader<S> {
    /// Open a volume: parse the boot sector, bootstrap record 0 from the
    /// boot-sector-derived offset, and adopt `$MFT`'s `$DATA` run list as
    /// the record map. Any failure here is fatal to the whole inspection.
    pub fn open(mut source: S) -> Result<Self, NtfsError> {
        let mut vbr = [0u8; BootSector::SIZE];
        source.read_at(0, &mut vbr)?;
        let boot = BootSector::parse(&vbr)?;
        debug!(
            "boot sector: {} bytes/sector, {} sectors/cluster, MFT at LCN {}",
            boot.bytes_per_sector, boot.sectors_per_cluster, boot.mft_start_lcn
        );

        let mut buf = vec![0u8; boot.mft_record_size() as usize];
        source.read_at(boot.mft_byte_offset(), &mut buf)?;
        let record = finish_record(0, buf, boot.bytes_per_sector)?;

        let data = record
            .find_unnamed_attribute(ATTR_DATA)
            .ok_or(NtfsError::BadAttribute {
                record: 0,
                offset: 0,
                reason: "$MFT has no unnamed $DATA attribute".into(),
            })?;
        let nr = data.non_resident_header().ok_or(NtfsError::BadAttribute {
            record: 0,
            offset: 0,
            reason: "$MFT $DATA is resident".into(),
        })?;
        let mft_data_size = nr.actual_size;
        let mft_runs = data.decode_runs()?;
        debug!(
            "$MFT $DATA: {} bytes in {} runs",
            mft_data_size,
            mft_runs.len()
        );

        Ok(Self {
            source,
            boot,
            mft_runs,
            mft_data_size,
        })
    }

    pub fn boot(&self) -> &BootSector {
        &self.boot
    }

    pub fn mft_runs(&self) -> &[DataRun] {
        &self.mft_runs
    }

    pub fn mft_data_size(&self) -> u64 {
        self.mft_data_size
    }

    /// Number of records the `$MFT` `$DATA` stream holds.
    pub fn record_count(&self) -> u64 {
        self.mft_data_size / self.boot.mft_record_size() as u64
    }

    /// Read record `index` out of the MFT's `$DATA` stream.
    ///
    /// Per-record damage (`DamagedRecord`, `FixupMismatch`, bad magic) is
    /// returned to the caller but does not poison the reader; the next
    /// call proceeds normally.
    pub fn read_record(&mut self, index: u64) -> Result<MftRecord, NtfsError> {
        let record_size = self.boot.mft_record_size() as u64;
        let mut buf = vec![0u8; record_size as usize];
        let reader = RunReader::new(
            &self.mft_runs,
            self.boot.bytes_per_cluster(),
            self.mft_data_size,
        );
        reader.read_range_strict(&mut self.source, index * record_size, &mut buf)?;
        finish_record(index, buf, self.boot.bytes_per_sector)
    }

    /// Access the underlying source, e.g. to materialize non-resident
    /// content of a record that was already read.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

/// Shared tail of a record load: magic gate, fixup, header parse.
fn finish_record(index: u64, mut buf: Vec<u8>, bytes_per_sector: u16) -> Result<MftRecord, NtfsError> {
    if buf.len() < 4 {
        return Err(NtfsError::BadMagic {
            record: index,
            found: [0; 4],
        });
    }
    // Unknown magic (e.g. a zeroed, never-written record) carries no valid
    // update sequence, so it is rejected before fixup.
    let magic = RecordMagic::from_bytes([buf[0], buf[1], buf[2], buf[3]]).ok_or(
        NtfsError::BadMagic {
            record: index,
            found: [buf[0], buf[1], buf[2], buf[3]],
        },
    )?;

    apply_fixups(index, &mut buf, bytes_per_sector)?;

    match magic {
        RecordMagic::Baad => {
            warn!("record {index} is marked damaged");
            Err(NtfsError::DamagedRecord(index))
        }
        RecordMagic::Indx => Err(NtfsError::NotAFileRecord(index)),
        RecordMagic::File => {
            let header = RecordHeader::parse(index, &buf, bytes_per_sector)?;
            Ok(MftRecord {
                number: index,
                header,
                buf,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_header_bytes() -> Vec<u8> {
        let mut buf = vec![0u8; 1024];
        buf[0..4].copy_from_slice(b"FILE");
        buf[0x04..0x06].copy_from_slice(&0x30u16.to_le_bytes());
        buf[0x06..0x08].copy_from_slice(&3u16.to_le_bytes());
        buf[0x08..0x10].copy_from_slice(&42u64.to_le_bytes()); // LSN
        buf[0x10..0x12].copy_from_slice(&1u16.to_le_bytes()); // sequence
        buf[0x12..0x14].copy_from_slice(&1u16.to_le_bytes()); // hard links
        buf[0x14..0x16].copy_from_slice(&0x38u16.to_le_bytes());
        buf[0x16..0x18].copy_from_slice(&RECORD_FLAG_IN_USE.to_le_bytes());
        buf[0x18..0x1C].copy_from_slice(&0x100u32.to_le_bytes()); // used
        buf[0x1C..0x20].copy_from_slice(&1024u32.to_le_bytes()); // allocated
        buf[0x28..0x2A].copy_from_slice(&4u16.to_le_bytes());
        buf[0x2C..0x30].copy_from_slice(&7u32.to_le_bytes()); // record number
        buf
    }

    #[test]
    fn test_header_parse() {
        let buf = make_header_bytes();
        let header = RecordHeader::parse(7, &buf, 512).unwrap();
        assert_eq!(header.magic, RecordMagic::File);
        assert_eq!(header.log_sequence_number, 42);
        assert_eq!(header.first_attribute_offset, 0x38);
        assert!(header.is_in_use());
        assert!(!header.is_directory());
        assert!(header.base_record.is_base());
        assert_eq!(header.record_number, 7);
    }

    #[test]
    fn test_header_rejects_unknown_magic() {
        let mut buf = make_header_bytes();
        buf[0..4].copy_from_slice(b"JUNK");
        assert!(matches!(
            RecordHeader::parse(3, &buf, 512),
            Err(NtfsError::BadMagic { record: 3, found }) if &found == b"JUNK"
        ));
    }

    #[test]
    fn test_header_rejects_used_beyond_allocated() {
        let mut buf = make_header_bytes();
        buf[0x18..0x1C].copy_from_slice(&2048u32.to_le_bytes());
        assert!(RecordHeader::parse(0, &buf, 512).is_err());
    }

    #[test]
    fn test_header_rejects_misaligned_first_attribute() {
        let mut buf = make_header_bytes();
        buf[0x14..0x16].copy_from_slice(&0x39u16.to_le_bytes());
        assert!(RecordHeader::parse(0, &buf, 512).is_err());
    }

    #[test]
    fn test_header_rejects_short_update_sequence() {
        let mut buf = make_header_bytes();
        // One fixed-up sector cannot cover 600 used bytes
        buf[0x06..0x08].copy_from_slice(&2u16.to_le_bytes());
        buf[0x18..0x1C].copy_from_slice(&600u32.to_le_bytes());
        assert!(RecordHeader::parse(0, &buf, 512).is_err());
    }

    #[test]
    fn test_file_reference_composition() {
        let mut buf = make_header_bytes();
        buf[0x10..0x12].copy_from_slice(&9u16.to_le_bytes());
        let header = RecordHeader::parse(7, &buf, 512).unwrap();
        let record = MftRecord {
            number: 7,
            header,
            buf,
        };
        let reference = record.file_reference();
        assert_eq!(reference.record_index(), 7);
        assert_eq!(reference.sequence_number(), 9);
    }
}
