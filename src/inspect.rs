//! Inspection driver: opens a volume, reads record 0, resolves `$MFT`'s
//! own `$DATA`, and follows it through the rest of the table, printing
//! findings to stdout. Diagnostics go through the `log` facade.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::{debug, info, warn};

use crate::block::BlockSource;
use crate::error::NtfsError;
use crate::ntfs::attr::{FileName, ReadContext, TypedContent};
use crate::ntfs::mft::{MftReader, MftRecord};
use crate::ntfs::{
    ATTR_DATA, ATTR_FILE_NAME, ATTR_VOLUME_INFORMATION, ATTR_VOLUME_NAME, MFT_RECORD_MFT,
    MFT_RECORD_VOLUME,
};

/// Per-volume walk statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InspectionSummary {
    pub records_total: u64,
    pub records_in_use: u64,
    pub directories: u64,
    pub damaged: u64,
    pub torn: u64,
    pub index_records: u64,
    pub unallocated: u64,
    pub malformed: u64,
}

pub struct Inspector<S: BlockSource> {
    reader: MftReader<S>,
}

impl Inspector<BufReader<File>> {
    /// Open a volume image or block device read-only.
    pub fn open_path(path: &Path) -> Result<Self, NtfsError> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file))
    }
}

impl<S: BlockSource> Inspector<S> {
    pub fn new(source: S) -> Result<Self, NtfsError> {
        Ok(Self {
            reader: MftReader::open(source)?,
        })
    }

    pub fn reader(&self) -> &MftReader<S> {
        &self.reader
    }

    /// Full inspection: geometry, `$MFT` self-description, volume
    /// metadata, then a walk over every record of the table.
    pub fn run(&mut self) -> Result<InspectionSummary, NtfsError> {
        self.report_geometry();
        self.report_mft_record()?;
        if let Err(e) = self.report_volume_record() {
            warn!("$Volume record unreadable: {e}");
        }
        self.walk_records()
    }

    fn report_geometry(&self) {
        let boot = self.reader.boot();
        println!("NTFS volume, serial {:#018x}", boot.volume_serial);
        println!("  sector size:     {} bytes", boot.bytes_per_sector);
        println!(
            "  cluster size:    {} bytes ({} sectors)",
            boot.bytes_per_cluster(),
            boot.sectors_per_cluster
        );
        println!(
            "  volume size:     {} bytes ({} sectors)",
            boot.volume_size_bytes(),
            boot.total_sectors
        );
        println!("  MFT record size: {} bytes", boot.mft_record_size());
        println!(
            "  $MFT at LCN {} (byte {}), mirror at LCN {} (byte {})",
            boot.mft_start_lcn,
            boot.mft_byte_offset(),
            boot.mft_mirror_start_lcn,
            boot.mft_mirror_byte_offset()
        );
    }

    /// Record 0 findings. Read through the freshly-bootstrapped run list,
    /// exercising the self-referential path end to end. Errors here are
    /// fatal: without a healthy record 0 nothing else is trustworthy.
    fn report_mft_record(&mut self) -> Result<(), NtfsError> {
        let record = self.reader.read_record(MFT_RECORD_MFT)?;

        let name = best_file_name(&record)
            .map(|f| f.name)
            .unwrap_or_else(|| "<unnamed>".into());
        println!("record 0: \"{name}\", reference {} (stored base {})",
            record.file_reference(),
            record.header.base_record.0
        );

        let data = record
            .find_unnamed_attribute(ATTR_DATA)
            .ok_or(NtfsError::BadAttribute {
                record: 0,
                offset: 0,
                reason: "$MFT has no unnamed $DATA attribute".into(),
            })?;
        match data.content(ReadContext::metadata_only())? {
            TypedContent::NonResident(content) => {
                println!(
                    "  $DATA: {} bytes in {} runs ({} allocated, {} initialized)",
                    content.actual_size,
                    content.runs.len(),
                    content.allocated_size,
                    content.initialized_size
                );
                for run in &content.runs {
                    match run.lcn {
                        Some(lcn) => println!("    run: LCN {lcn}, {} clusters", run.length),
                        None => println!("    run: sparse, {} clusters", run.length),
                    }
                }

                // The table describes itself: the first bytes of $MFT's
                // own $DATA stream are record 0's magic.
                let boot = self.reader.boot();
                let bytes_per_cluster = boot.bytes_per_cluster();
                let (head, _) = content.read_range(
                    self.reader.source_mut(),
                    bytes_per_cluster,
                    0,
                    4,
                )?;
                println!(
                    "  first bytes of $DATA: {:?} (record 0 seen through its own run list)",
                    String::from_utf8_lossy(&head)
                );
            }
            _ => {
                return Err(NtfsError::BadAttribute {
                    record: 0,
                    offset: 0,
                    reason: "$MFT $DATA is resident".into(),
                })
            }
        }
        Ok(())
    }

    /// Volume label and version out of `$Volume` (record 3). Recoverable:
    /// a volume with a damaged record 3 can still be walked.
    fn report_volume_record(&mut self) -> Result<(), NtfsError> {
        let record = self.reader.read_record(MFT_RECORD_VOLUME)?;

        if let Some(attr) = record.find_attribute(ATTR_VOLUME_NAME) {
            if let TypedContent::VolumeName(label) = attr.content(ReadContext::metadata_only())? {
                println!("volume label: \"{label}\"");
            }
        }
        if let Some(attr) = record.find_attribute(ATTR_VOLUME_INFORMATION) {
            if let TypedContent::VolumeInformation(vi) =
                attr.content(ReadContext::metadata_only())?
            {
                println!("NTFS version: {}.{}", vi.major_version, vi.minor_version);
            }
        }
        Ok(())
    }

    /// Walk every record the `$MFT` `$DATA` stream holds. Per-record
    /// damage is counted and reported; only I/O failures abort the walk.
    fn walk_records(&mut self) -> Result<InspectionSummary, NtfsError> {
        let mut summary = InspectionSummary {
            records_total: self.reader.record_count(),
            ..Default::default()
        };
        info!("walking {} MFT records", summary.records_total);

        for index in 0..summary.records_total {
            match self.reader.read_record(index) {
                Ok(record) => {
                    if !record.header.is_in_use() {
                        debug!("record {index}: not in use");
                        continue;
                    }
                    summary.records_in_use += 1;
                    if record.header.is_directory() {
                        summary.directories += 1;
                    }
                    self.report_record(index, &record);
                }
                Err(NtfsError::DamagedRecord(_)) => {
                    summary.damaged += 1;
                    println!("record {index}: damaged (BAAD)");
                }
                Err(NtfsError::FixupMismatch { sector, .. }) => {
                    summary.torn += 1;
                    println!("record {index}: torn write detected in sector {sector}");
                }
                Err(NtfsError::NotAFileRecord(_)) => {
                    summary.index_records += 1;
                    debug!("record {index}: index record");
                }
                Err(NtfsError::BadMagic { found, .. }) if found == [0; 4] => {
                    // Never-written slack in the MFT's allocated tail.
                    summary.unallocated += 1;
                }
                Err(e @ NtfsError::Io(_)) | Err(e @ NtfsError::Truncated { .. }) => return Err(e),
                Err(e) => {
                    summary.malformed += 1;
                    warn!("record {index}: {e}");
                }
            }
        }

        println!(
            "{} records: {} in use ({} directories), {} unallocated, {} damaged, {} torn, {} malformed",
            summary.records_total,
            summary.records_in_use,
            summary.directories,
            summary.unallocated,
            summary.damaged,
            summary.torn,
            summary.malformed
        );
        Ok(summary)
    }

    fn report_record(&self, index: u64, record: &MftRecord) {
        let kind = if record.header.is_directory() {
            "dir "
        } else {
            "file"
        };
        let name = best_file_name(record);
        let name = name
            .map(|f| f.name)
            .unwrap_or_else(|| "<unnamed>".into());

        match record.find_unnamed_attribute(ATTR_DATA) {
            Some(data) => {
                let storage = if data.non_resident_header().is_some() {
                    "non-resident"
                } else {
                    "resident"
                };
                println!(
                    "record {index}: {kind} \"{name}\", data {} bytes ({storage})",
                    data.content_size()
                );
            }
            None => println!("record {index}: {kind} \"{name}\""),
        }
    }
}

/// Pick the record's display name: any non-DOS-only `$FILE_NAME` wins
/// over a short-name alias.
fn best_file_name(record: &MftRecord) -> Option<FileName> {
    let mut fallback = None;
    for attr in record.attributes() {
        let Ok(attr) = attr else { break };
        if attr.header.type_id != ATTR_FILE_NAME {
            continue;
        }
        match attr.content(ReadContext::metadata_only()) {
            Ok(TypedContent::FileName(name)) if !name.is_dos_only() => return Some(name),
            Ok(TypedContent::FileName(name)) => fallback = Some(name),
            _ => {}
        }
    }
    fallback
}
