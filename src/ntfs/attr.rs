//! MFT record attribute parsing.
//!
//! Attributes share a 16-byte header prefix and then split into resident
//! (content inline in the record) and non-resident (content in external
//! clusters described by a run list). The walker yields attributes lazily
//! in on-disk order; typed content access is uniform across both storage
//! forms.

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, TimeZone, Utc};

use super::runs::{decode_run_list, DataRun, ReadOutcome, RunReader};
use super::{
    FileReference, ATTR_DATA, ATTR_END, ATTR_FILE_NAME, ATTR_STANDARD_INFORMATION,
    ATTR_VOLUME_INFORMATION, ATTR_VOLUME_NAME,
};
use crate::block::BlockSource;
use crate::error::NtfsError;

// Attribute header flags
pub const ATTR_FLAG_COMPRESSED: u16 = 0x0001;
pub const ATTR_FLAG_ENCRYPTED: u16 = 0x4000;
pub const ATTR_FLAG_SPARSE: u16 = 0x8000;

// FILE_NAME namespaces
pub const NAMESPACE_POSIX: u8 = 0;
pub const NAMESPACE_WIN32: u8 = 1;
pub const NAMESPACE_DOS: u8 = 2;
pub const NAMESPACE_WIN32_AND_DOS: u8 = 3;

/// Common prefix shared by every attribute header.
#[derive(Debug, Clone)]
pub struct AttributeHeader {
    pub type_id: u32,
    pub length: u32,
    pub non_resident: bool,
    pub name_length: u8,
    pub name_offset: u16,
    pub flags: u16,
    pub attribute_id: u16,
}

/// Extension fields of a resident attribute.
#[derive(Debug, Clone)]
pub struct ResidentHeader {
    pub content_size: u32,
    pub content_offset: u16,
    pub indexed: u8,
}

/// Extension fields of a non-resident attribute.
#[derive(Debug, Clone)]
pub struct NonResidentHeader {
    pub starting_vcn: u64,
    pub ending_vcn: u64,
    pub run_list_offset: u16,
    pub compression_unit_size: u16,
    pub allocated_size: u64,
    pub actual_size: u64,
    pub initialized_size: u64,
}

impl NonResidentHeader {
    /// Cluster count the run list must cover. An empty attribute stores
    /// `ending_vcn = starting_vcn - 1`, which wraps to zero here.
    pub fn cluster_count(&self) -> u64 {
        self.ending_vcn
            .wrapping_sub(self.starting_vcn)
            .wrapping_add(1)
    }
}

#[derive(Debug, Clone)]
pub enum AttributeBody {
    Resident(ResidentHeader),
    NonResident(NonResidentHeader),
}

/// One attribute of an MFT record, borrowing the record buffer.
#[derive(Debug, Clone)]
pub struct Attribute<'rec> {
    pub header: AttributeHeader,
    pub body: AttributeBody,
    record: u64,
    offset: usize,
    raw: &'rec [u8],
}

impl<'rec> Attribute<'rec> {
    /// Parse the attribute starting at `offset`; the walker has already
    /// verified that `[offset, offset + length)` lies inside the record.
    fn parse_at(record: u64, buf: &'rec [u8], offset: usize, length: usize) -> Result<Self, NtfsError> {
        let bad = |reason: String| NtfsError::BadAttribute {
            record,
            offset,
            reason,
        };

        let raw = &buf[offset..offset + length];
        let non_resident_flag = raw[0x08];
        if non_resident_flag > 1 {
            return Err(bad(format!("invalid non-resident flag {non_resident_flag}")));
        }

        let header = AttributeHeader {
            type_id: LittleEndian::read_u32(&raw[0x00..0x04]),
            length: length as u32,
            non_resident: non_resident_flag == 1,
            name_length: raw[0x09],
            name_offset: LittleEndian::read_u16(&raw[0x0A..0x0C]),
            flags: LittleEndian::read_u16(&raw[0x0C..0x0E]),
            attribute_id: LittleEndian::read_u16(&raw[0x0E..0x10]),
        };

        let name_end = header.name_offset as usize + header.name_length as usize * 2;
        if header.name_length > 0 && name_end > length {
            return Err(bad("attribute name exceeds attribute length".into()));
        }

        let body = if header.non_resident {
            if length < 0x40 {
                return Err(bad("non-resident header truncated".into()));
            }
            let nr = NonResidentHeader {
                starting_vcn: LittleEndian::read_u64(&raw[0x10..0x18]),
                ending_vcn: LittleEndian::read_u64(&raw[0x18..0x20]),
                run_list_offset: LittleEndian::read_u16(&raw[0x20..0x22]),
                compression_unit_size: LittleEndian::read_u16(&raw[0x22..0x24]),
                allocated_size: LittleEndian::read_u64(&raw[0x28..0x30]),
                actual_size: LittleEndian::read_u64(&raw[0x30..0x38]),
                initialized_size: LittleEndian::read_u64(&raw[0x38..0x40]),
            };
            if (nr.run_list_offset as usize) < 0x40 || nr.run_list_offset as usize > length {
                return Err(bad(format!("run list offset {} out of range", nr.run_list_offset)));
            }
            AttributeBody::NonResident(nr)
        } else {
            if length < 0x18 {
                return Err(bad("resident header truncated".into()));
            }
            let r = ResidentHeader {
                content_size: LittleEndian::read_u32(&raw[0x10..0x14]),
                content_offset: LittleEndian::read_u16(&raw[0x14..0x16]),
                indexed: raw[0x16],
            };
            let content_end = r.content_offset as usize + r.content_size as usize;
            if content_end > length {
                return Err(bad("resident content exceeds attribute length".into()));
            }
            AttributeBody::Resident(r)
        };

        Ok(Self {
            header,
            body,
            record,
            offset,
            raw,
        })
    }

    /// Attribute name (e.g. an alternate `$DATA` stream name), if any.
    pub fn name(&self) -> Option<String> {
        if self.header.name_length == 0 {
            return None;
        }
        let start = self.header.name_offset as usize;
        let end = start + self.header.name_length as usize * 2;
        Some(decode_utf16le(&self.raw[start..end]))
    }

    pub fn is_named(&self) -> bool {
        self.header.name_length > 0
    }

    pub fn is_compressed(&self) -> bool {
        self.header.flags & ATTR_FLAG_COMPRESSED != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.header.flags & ATTR_FLAG_ENCRYPTED != 0
    }

    pub fn is_sparse(&self) -> bool {
        self.header.flags & ATTR_FLAG_SPARSE != 0
    }

    /// Inline content of a resident attribute; `None` when non-resident.
    pub fn resident_content(&self) -> Option<&'rec [u8]> {
        match &self.body {
            AttributeBody::Resident(r) => {
                let start = r.content_offset as usize;
                Some(&self.raw[start..start + r.content_size as usize])
            }
            AttributeBody::NonResident(_) => None,
        }
    }

    pub fn non_resident_header(&self) -> Option<&NonResidentHeader> {
        match &self.body {
            AttributeBody::NonResident(nr) => Some(nr),
            AttributeBody::Resident(_) => None,
        }
    }

    /// Logical content size in bytes for either storage form.
    pub fn content_size(&self) -> u64 {
        match &self.body {
            AttributeBody::Resident(r) => r.content_size as u64,
            AttributeBody::NonResident(nr) => nr.actual_size,
        }
    }

    /// Decode the run list of a non-resident attribute.
    pub fn decode_runs(&self) -> Result<Vec<DataRun>, NtfsError> {
        let nr = self.non_resident_header().ok_or(NtfsError::BadAttribute {
            record: self.record,
            offset: self.offset,
            reason: "resident attribute has no run list".into(),
        })?;
        decode_run_list(
            self.record,
            self.header.attribute_id,
            &self.raw[nr.run_list_offset as usize..],
            nr.cluster_count(),
        )
    }

    /// Typed access to the attribute content.
    ///
    /// Resident content is served as a borrow of the record buffer. For
    /// non-resident content, a context without a source yields a
    /// [`TypedContent::NonResident`] handle; a context with a source
    /// materializes up to `byte_limit` bytes through the run list.
    pub fn content(&self, ctx: ReadContext<'_>) -> Result<TypedContent<'rec>, NtfsError> {
        match &self.body {
            AttributeBody::Resident(_) => {
                // resident_content() is Some for this body by construction
                let bytes = self.resident_content().unwrap_or(&[]);
                self.typed_from(ContentBytes::Borrowed(bytes))
            }
            AttributeBody::NonResident(nr) => {
                let source = match ctx.source {
                    Some(source) => source,
                    None => {
                        return Ok(TypedContent::NonResident(NonResidentContent {
                            runs: self.decode_runs()?,
                            allocated_size: nr.allocated_size,
                            actual_size: nr.actual_size,
                            initialized_size: nr.initialized_size,
                        }))
                    }
                };

                if self.is_compressed() {
                    return Err(NtfsError::UnsupportedFeature(
                        "compressed non-resident content".into(),
                    ));
                }
                if self.is_encrypted() {
                    return Err(NtfsError::UnsupportedFeature(
                        "encrypted non-resident content".into(),
                    ));
                }

                let runs = self.decode_runs()?;
                let reader = RunReader::new(&runs, ctx.bytes_per_cluster, nr.actual_size);
                let mut bytes = Vec::new();
                let outcome = reader.read_into(source, &mut bytes, 0, ctx.byte_limit)?;
                self.typed_from(ContentBytes::Owned {
                    bytes,
                    more_available: outcome.more_available,
                })
            }
        }
    }

    fn typed_from(&self, content: ContentBytes<'rec>) -> Result<TypedContent<'rec>, NtfsError> {
        match self.header.type_id {
            ATTR_STANDARD_INFORMATION => {
                StandardInformation::parse(self.record, self.offset, content.bytes())
                    .map(TypedContent::StandardInformation)
            }
            ATTR_FILE_NAME => FileName::parse(self.record, self.offset, content.bytes())
                .map(TypedContent::FileName),
            ATTR_VOLUME_NAME => Ok(TypedContent::VolumeName(decode_utf16le(content.bytes()))),
            ATTR_VOLUME_INFORMATION => {
                VolumeInformation::parse(self.record, self.offset, content.bytes())
                    .map(TypedContent::VolumeInformation)
            }
            ATTR_DATA => Ok(TypedContent::Data(content)),
            _ => Ok(TypedContent::Opaque(content)),
        }
    }
}

/// Per-call context for [`Attribute::content`].
pub struct ReadContext<'s> {
    pub source: Option<&'s mut (dyn BlockSource + 's)>,
    pub bytes_per_cluster: u64,
    /// Maximum bytes to materialize for non-resident content.
    pub byte_limit: usize,
}

impl<'s> ReadContext<'s> {
    /// Context that never touches the volume; non-resident attributes
    /// come back as handles instead of bytes.
    pub fn metadata_only() -> Self {
        Self {
            source: None,
            bytes_per_cluster: 0,
            byte_limit: 0,
        }
    }

    pub fn with_source(
        source: &'s mut (dyn BlockSource + 's),
        bytes_per_cluster: u64,
        byte_limit: usize,
    ) -> Self {
        Self {
            source: Some(source),
            bytes_per_cluster,
            byte_limit,
        }
    }
}

/// Attribute content bytes, borrowed from the record buffer when resident
/// or owned when read out of external clusters.
#[derive(Debug, Clone)]
pub enum ContentBytes<'rec> {
    Borrowed(&'rec [u8]),
    Owned { bytes: Vec<u8>, more_available: bool },
}

impl ContentBytes<'_> {
    pub fn bytes(&self) -> &[u8] {
        match self {
            ContentBytes::Borrowed(b) => b,
            ContentBytes::Owned { bytes, .. } => bytes,
        }
    }

    /// Whether content remains beyond what was materialized.
    pub fn more_available(&self) -> bool {
        match self {
            ContentBytes::Borrowed(_) => false,
            ContentBytes::Owned { more_available, .. } => *more_available,
        }
    }
}

/// Attribute content keyed by type id; unknown types stay opaque.
#[derive(Debug, Clone)]
pub enum TypedContent<'rec> {
    StandardInformation(StandardInformation),
    FileName(FileName),
    VolumeName(String),
    VolumeInformation(VolumeInformation),
    Data(ContentBytes<'rec>),
    Opaque(ContentBytes<'rec>),
    /// Non-resident content that the caller chose not to materialize.
    NonResident(NonResidentContent),
}

/// Handle to non-resident content: owns the decoded run list and produces
/// owned byte ranges on demand.
#[derive(Debug, Clone)]
pub struct NonResidentContent {
    pub runs: Vec<DataRun>,
    pub allocated_size: u64,
    pub actual_size: u64,
    pub initialized_size: u64,
}

impl NonResidentContent {
    pub fn reader(&self, bytes_per_cluster: u64) -> RunReader<'_> {
        RunReader::new(&self.runs, bytes_per_cluster, self.actual_size)
    }

    /// Read `[start, start + count)` of the content into a fresh buffer.
    pub fn read_range<S: BlockSource + ?Sized>(
        &self,
        source: &mut S,
        bytes_per_cluster: u64,
        start: u64,
        count: usize,
    ) -> Result<(Vec<u8>, ReadOutcome), NtfsError> {
        let mut buf = vec![0u8; count];
        let outcome = self
            .reader(bytes_per_cluster)
            .read_range(source, start, &mut buf)?;
        buf.truncate(outcome.bytes_read);
        Ok((buf, outcome))
    }
}

/// `$STANDARD_INFORMATION` (0x10) content.
#[derive(Debug, Clone)]
pub struct StandardInformation {
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub mft_modified: DateTime<Utc>,
    pub accessed: DateTime<Utc>,
    pub dos_flags: u32,
    pub security_id: Option<u32>,
}

impl StandardInformation {
    pub fn parse(record: u64, offset: usize, data: &[u8]) -> Result<Self, NtfsError> {
        if data.len() < 48 {
            return Err(NtfsError::BadAttribute {
                record,
                offset,
                reason: format!("STANDARD_INFORMATION is {} bytes, need 48", data.len()),
            });
        }
        Ok(Self {
            created: filetime_to_datetime(LittleEndian::read_u64(&data[0..8])),
            modified: filetime_to_datetime(LittleEndian::read_u64(&data[8..16])),
            mft_modified: filetime_to_datetime(LittleEndian::read_u64(&data[16..24])),
            accessed: filetime_to_datetime(LittleEndian::read_u64(&data[24..32])),
            dos_flags: LittleEndian::read_u32(&data[32..36]),
            // The security id only exists in the NTFS 3.x long form
            security_id: if data.len() >= 56 {
                Some(LittleEndian::read_u32(&data[52..56]))
            } else {
                None
            },
        })
    }
}

/// `$FILE_NAME` (0x30) content.
#[derive(Debug, Clone)]
pub struct FileName {
    pub parent: FileReference,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub mft_modified: DateTime<Utc>,
    pub accessed: DateTime<Utc>,
    pub allocated_size: u64,
    pub real_size: u64,
    pub flags: u32,
    pub reparse_value: u32,
    pub namespace: u8,
    pub name: String,
}

impl FileName {
    pub fn parse(record: u64, offset: usize, data: &[u8]) -> Result<Self, NtfsError> {
        let bad = |reason: String| NtfsError::BadAttribute {
            record,
            offset,
            reason,
        };
        if data.len() < 66 {
            return Err(bad(format!("FILE_NAME is {} bytes, need 66", data.len())));
        }
        let name_length = data[64] as usize;
        let name_end = 66 + name_length * 2;
        if data.len() < name_end {
            return Err(bad(format!(
                "FILE_NAME of {} UTF-16 units exceeds {} content bytes",
                name_length,
                data.len()
            )));
        }
        Ok(Self {
            parent: FileReference(LittleEndian::read_u64(&data[0..8])),
            created: filetime_to_datetime(LittleEndian::read_u64(&data[8..16])),
            modified: filetime_to_datetime(LittleEndian::read_u64(&data[16..24])),
            mft_modified: filetime_to_datetime(LittleEndian::read_u64(&data[24..32])),
            accessed: filetime_to_datetime(LittleEndian::read_u64(&data[32..40])),
            allocated_size: LittleEndian::read_u64(&data[40..48]),
            real_size: LittleEndian::read_u64(&data[48..56]),
            flags: LittleEndian::read_u32(&data[56..60]),
            reparse_value: LittleEndian::read_u32(&data[60..64]),
            namespace: data[65],
            name: decode_utf16le(&data[66..name_end]),
        })
    }

    /// DOS-only names are short-name aliases; prefer the Win32 form.
    pub fn is_dos_only(&self) -> bool {
        self.namespace == NAMESPACE_DOS
    }
}

/// `$VOLUME_INFORMATION` (0x70) content.
#[derive(Debug, Clone)]
pub struct VolumeInformation {
    pub major_version: u8,
    pub minor_version: u8,
    pub flags: u16,
}

impl VolumeInformation {
    pub fn parse(record: u64, offset: usize, data: &[u8]) -> Result<Self, NtfsError> {
        if data.len() < 12 {
            return Err(NtfsError::BadAttribute {
                record,
                offset,
                reason: format!("VOLUME_INFORMATION is {} bytes, need 12", data.len()),
            });
        }
        Ok(Self {
            major_version: data[8],
            minor_version: data[9],
            flags: LittleEndian::read_u16(&data[10..12]),
        })
    }
}

/// Windows FILETIME (100 ns ticks since 1601-01-01 UTC) to `DateTime<Utc>`.
pub fn filetime_to_datetime(filetime: u64) -> DateTime<Utc> {
    const EPOCH_DELTA_100NS: u64 = 116_444_736_000_000_000;
    let unix_100ns = filetime.saturating_sub(EPOCH_DELTA_100NS);
    let seconds = (unix_100ns / 10_000_000) as i64;
    let nanoseconds = ((unix_100ns % 10_000_000) * 100) as u32;
    Utc.timestamp_opt(seconds, nanoseconds)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

pub(crate) fn decode_utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes.chunks_exact(2).map(LittleEndian::read_u16).collect();
    String::from_utf16_lossy(&units)
}

/// Lazy walk over the attribute stream of a fixed-up record buffer.
///
/// Stops at the 0xFFFFFFFF terminator; the cursor must stay inside
/// `used_size` at every step. Attribute ordering is not enforced, and the
/// record's `next_attribute_id` is deliberately ignored (ids may be
/// reused after deletion; only the terminator is authoritative).
pub struct AttributeWalker<'rec> {
    record: u64,
    buf: &'rec [u8],
    used_size: usize,
    cursor: usize,
    done: bool,
}

impl<'rec> AttributeWalker<'rec> {
    pub fn new(record: u64, buf: &'rec [u8], first_attribute_offset: usize, used_size: usize) -> Self {
        Self {
            record,
            buf,
            used_size: used_size.min(buf.len()),
            cursor: first_attribute_offset,
            done: false,
        }
    }
}

impl<'rec> Iterator for AttributeWalker<'rec> {
    type Item = Result<Attribute<'rec>, NtfsError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let bad = |offset: usize, reason: &str| NtfsError::BadAttribute {
            record: self.record,
            offset,
            reason: reason.into(),
        };

        if self.cursor + 4 > self.used_size {
            self.done = true;
            return Some(Err(bad(self.cursor, "attribute stream has no terminator")));
        }
        let type_id = LittleEndian::read_u32(&self.buf[self.cursor..self.cursor + 4]);
        if type_id == ATTR_END {
            self.done = true;
            return None;
        }

        if self.cursor + 16 > self.used_size {
            self.done = true;
            return Some(Err(bad(self.cursor, "attribute header truncated")));
        }
        let length = LittleEndian::read_u32(&self.buf[self.cursor + 4..self.cursor + 8]) as usize;
        if length == 0 {
            self.done = true;
            return Some(Err(bad(self.cursor, "attribute length is zero")));
        }
        if length % 8 != 0 {
            self.done = true;
            return Some(Err(bad(self.cursor, "attribute length is not 8-byte aligned")));
        }
        if self.cursor + length > self.used_size {
            self.done = true;
            return Some(Err(bad(self.cursor, "attribute extends past used size")));
        }

        let item = Attribute::parse_at(self.record, self.buf, self.cursor, length);
        if item.is_err() {
            self.done = true;
        } else {
            self.cursor += length;
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Append a resident attribute to `buf` and return its offset.
    fn push_resident(buf: &mut Vec<u8>, type_id: u32, attribute_id: u16, content: &[u8]) -> usize {
        let offset = buf.len();
        let content_offset = 0x18u16;
        let unpadded = content_offset as usize + content.len();
        let length = (unpadded + 7) & !7;

        let mut attr = vec![0u8; length];
        attr[0x00..0x04].copy_from_slice(&type_id.to_le_bytes());
        attr[0x04..0x08].copy_from_slice(&(length as u32).to_le_bytes());
        attr[0x08] = 0; // resident
        attr[0x0E..0x10].copy_from_slice(&attribute_id.to_le_bytes());
        attr[0x10..0x14].copy_from_slice(&(content.len() as u32).to_le_bytes());
        attr[0x14..0x16].copy_from_slice(&content_offset.to_le_bytes());
        attr[0x18..0x18 + content.len()].copy_from_slice(content);
        buf.extend_from_slice(&attr);
        offset
    }

    /// Append a non-resident attribute with the given run list bytes.
    fn push_non_resident(
        buf: &mut Vec<u8>,
        type_id: u32,
        attribute_id: u16,
        cluster_count: u64,
        actual_size: u64,
        run_list: &[u8],
    ) -> usize {
        let offset = buf.len();
        let run_list_offset = 0x40u16;
        let unpadded = run_list_offset as usize + run_list.len();
        let length = (unpadded + 7) & !7;

        let mut attr = vec![0u8; length];
        attr[0x00..0x04].copy_from_slice(&type_id.to_le_bytes());
        attr[0x04..0x08].copy_from_slice(&(length as u32).to_le_bytes());
        attr[0x08] = 1; // non-resident
        attr[0x0E..0x10].copy_from_slice(&attribute_id.to_le_bytes());
        attr[0x10..0x18].copy_from_slice(&0u64.to_le_bytes()); // starting VCN
        attr[0x18..0x20].copy_from_slice(&(cluster_count - 1).to_le_bytes()); // ending VCN
        attr[0x20..0x22].copy_from_slice(&run_list_offset.to_le_bytes());
        attr[0x28..0x30].copy_from_slice(&actual_size.next_multiple_of(4096).to_le_bytes());
        attr[0x30..0x38].copy_from_slice(&actual_size.to_le_bytes());
        attr[0x38..0x40].copy_from_slice(&actual_size.to_le_bytes());
        attr[0x40..0x40 + run_list.len()].copy_from_slice(run_list);
        buf.extend_from_slice(&attr);
        offset
    }

    fn push_terminator(buf: &mut Vec<u8>) {
        buf.extend_from_slice(&ATTR_END.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);
    }

    fn file_name_content(name: &str, parent: FileReference) -> Vec<u8> {
        let mut content = vec![0u8; 66];
        content[0..8].copy_from_slice(&parent.0.to_le_bytes());
        let filetime = 116_444_736_000_000_000u64 + 1_000_000_000;
        for at in [8usize, 16, 24, 32] {
            content[at..at + 8].copy_from_slice(&filetime.to_le_bytes());
        }
        content[40..48].copy_from_slice(&65536u64.to_le_bytes());
        content[48..56].copy_from_slice(&65536u64.to_le_bytes());
        content[56..60].copy_from_slice(&0x06u32.to_le_bytes());
        content[64] = name.len() as u8;
        content[65] = NAMESPACE_WIN32_AND_DOS;
        for unit in name.encode_utf16() {
            content.extend_from_slice(&unit.to_le_bytes());
        }
        content
    }

    #[test]
    fn test_walk_visits_increasing_offsets_and_terminates() {
        let mut buf = Vec::new();
        let o1 = push_resident(&mut buf, ATTR_STANDARD_INFORMATION, 0, &[0u8; 48]);
        let o2 = push_resident(
            &mut buf,
            ATTR_FILE_NAME,
            2,
            &file_name_content("a.txt", FileReference::new(5, 5)),
        );
        let o3 = push_resident(&mut buf, ATTR_DATA, 3, b"hello");
        push_terminator(&mut buf);
        let used = buf.len();

        let attrs: Vec<_> = AttributeWalker::new(0, &buf, 0, used)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(attrs.len(), 3);
        let offsets: Vec<usize> = attrs.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![o1, o2, o3]);
        assert!(offsets.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(attrs[0].header.type_id, ATTR_STANDARD_INFORMATION);
        assert_eq!(attrs[2].header.type_id, ATTR_DATA);
    }

    #[test]
    fn test_walk_missing_terminator_is_error() {
        let mut buf = Vec::new();
        push_resident(&mut buf, ATTR_DATA, 1, b"data");
        let used = buf.len();

        let results: Vec<_> = AttributeWalker::new(0, &buf, 0, used).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(NtfsError::BadAttribute { .. })));
    }

    #[test]
    fn test_walk_rejects_misaligned_length() {
        let mut buf = Vec::new();
        push_resident(&mut buf, ATTR_DATA, 1, b"data");
        // Corrupt the length to a non-multiple of 8
        buf[0x04..0x08].copy_from_slice(&29u32.to_le_bytes());
        push_terminator(&mut buf);
        let used = buf.len();

        let first = AttributeWalker::new(0, &buf, 0, used).next().unwrap();
        assert!(matches!(first, Err(NtfsError::BadAttribute { .. })));
    }

    #[test]
    fn test_walk_rejects_zero_length() {
        let mut buf = Vec::new();
        push_resident(&mut buf, ATTR_DATA, 1, b"data");
        buf[0x04..0x08].copy_from_slice(&0u32.to_le_bytes());
        push_terminator(&mut buf);

        let used = buf.len();
        let first = AttributeWalker::new(0, &buf, 0, used).next().unwrap();
        assert!(matches!(first, Err(NtfsError::BadAttribute { .. })));
    }

    #[test]
    fn test_resident_content_is_borrowed_slice() {
        let mut buf = Vec::new();
        push_resident(&mut buf, ATTR_DATA, 1, b"hello world");
        push_terminator(&mut buf);
        let used = buf.len();

        let attr = AttributeWalker::new(0, &buf, 0, used)
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(attr.resident_content(), Some(&b"hello world"[..]));
        match attr.content(ReadContext::metadata_only()).unwrap() {
            TypedContent::Data(content) => {
                assert_eq!(content.bytes(), b"hello world");
                assert!(!content.more_available());
            }
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[test]
    fn test_file_name_round_trip() {
        let mut buf = Vec::new();
        push_resident(
            &mut buf,
            ATTR_FILE_NAME,
            2,
            &file_name_content("$MFT", FileReference::new(5, 5)),
        );
        push_terminator(&mut buf);
        let used = buf.len();

        let attr = AttributeWalker::new(0, &buf, 0, used)
            .next()
            .unwrap()
            .unwrap();
        match attr.content(ReadContext::metadata_only()).unwrap() {
            TypedContent::FileName(fname) => {
                assert_eq!(fname.name, "$MFT");
                assert_eq!(fname.parent.record_index(), 5);
                assert_eq!(fname.namespace, NAMESPACE_WIN32_AND_DOS);
                assert_eq!(fname.real_size, 65536);
                assert!(!fname.is_dos_only());
            }
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[test]
    fn test_standard_information_short_form() {
        let mut buf = Vec::new();
        let mut content = vec![0u8; 48];
        let filetime = 116_444_736_000_000_000u64; // 1970-01-01
        content[0..8].copy_from_slice(&filetime.to_le_bytes());
        content[32..36].copy_from_slice(&0x26u32.to_le_bytes());
        push_resident(&mut buf, ATTR_STANDARD_INFORMATION, 0, &content);
        push_terminator(&mut buf);
        let used = buf.len();

        let attr = AttributeWalker::new(0, &buf, 0, used)
            .next()
            .unwrap()
            .unwrap();
        match attr.content(ReadContext::metadata_only()).unwrap() {
            TypedContent::StandardInformation(info) => {
                assert_eq!(info.created, DateTime::<Utc>::UNIX_EPOCH);
                assert_eq!(info.dos_flags, 0x26);
                assert_eq!(info.security_id, None);
            }
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_is_opaque() {
        let mut buf = Vec::new();
        push_resident(&mut buf, 0x100, 1, &[1, 2, 3]);
        push_terminator(&mut buf);
        let used = buf.len();

        let attr = AttributeWalker::new(0, &buf, 0, used)
            .next()
            .unwrap()
            .unwrap();
        assert!(matches!(
            attr.content(ReadContext::metadata_only()).unwrap(),
            TypedContent::Opaque(_)
        ));
    }

    #[test]
    fn test_non_resident_without_source_yields_handle() {
        let mut buf = Vec::new();
        // Single run: 16 clusters at LCN 4 (header 0x33)
        let run_list = [0x33, 0x10, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00];
        push_non_resident(&mut buf, ATTR_DATA, 1, 16, 16 * 4096, &run_list);
        push_terminator(&mut buf);
        let used = buf.len();

        let attr = AttributeWalker::new(0, &buf, 0, used)
            .next()
            .unwrap()
            .unwrap();
        match attr.content(ReadContext::metadata_only()).unwrap() {
            TypedContent::NonResident(handle) => {
                assert_eq!(handle.runs.len(), 1);
                assert_eq!(handle.runs[0].lcn, Some(4));
                assert_eq!(handle.runs[0].length, 16);
                assert_eq!(handle.actual_size, 16 * 4096);
            }
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[test]
    fn test_compressed_materialization_unsupported() {
        let mut buf = Vec::new();
        let run_list = [0x11, 0x01, 0x04, 0x00];
        let offset = push_non_resident(&mut buf, ATTR_DATA, 1, 1, 4096, &run_list);
        buf[offset + 0x0C..offset + 0x0E].copy_from_slice(&ATTR_FLAG_COMPRESSED.to_le_bytes());
        push_terminator(&mut buf);
        let used = buf.len();

        let attr = AttributeWalker::new(0, &buf, 0, used)
            .next()
            .unwrap()
            .unwrap();
        let mut src = std::io::Cursor::new(vec![0u8; 8 * 4096]);
        let err = attr
            .content(ReadContext::with_source(&mut src, 4096, 128))
            .unwrap_err();
        assert!(matches!(err, NtfsError::UnsupportedFeature(_)));
    }

    #[test]
    fn test_attribute_name_decoding() {
        let mut buf = Vec::new();
        // Named resident $DATA stream "$Bad": name at 0x18, content after it
        let name: Vec<u8> = "$Bad"
            .encode_utf16()
            .flat_map(|u| u.to_le_bytes())
            .collect();
        let offset = push_resident(&mut buf, ATTR_DATA, 2, &[name.as_slice(), b"xy"].concat());
        // Point name_offset at the name bytes and shift content_offset past them
        buf[offset + 0x09] = 4;
        buf[offset + 0x0A..offset + 0x0C].copy_from_slice(&0x18u16.to_le_bytes());
        buf[offset + 0x10..offset + 0x14].copy_from_slice(&2u32.to_le_bytes());
        buf[offset + 0x14..offset + 0x16].copy_from_slice(&0x20u16.to_le_bytes());
        push_terminator(&mut buf);
        let used = buf.len();

        let attr = AttributeWalker::new(0, &buf, 0, used)
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(attr.name().as_deref(), Some("$Bad"));
        assert_eq!(attr.resident_content(), Some(&b"xy"[..]));
    }
}
