//! Data-run decoding and byte-range reads over non-resident content.
//!
//! A run list is a chain of variable-width entries, each a header byte
//! whose low nibble gives the width of the length field and whose high
//! nibble gives the width of the LCN delta field (0 = sparse). Deltas are
//! signed and relative to the previous run's absolute LCN, so a file
//! scattered across the volume encodes in a handful of bytes.

use std::io;

use log::debug;

use crate::block::BlockSource;
use crate::error::NtfsError;

/// One decoded extent of a non-resident attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRun {
    /// Absolute starting LCN; `None` for a sparse run (no clusters allocated).
    pub lcn: Option<u64>,
    /// Run length in clusters.
    pub length: u64,
}

impl DataRun {
    pub fn is_sparse(&self) -> bool {
        self.lcn.is_none()
    }
}

/// Decode a run list into absolute extents.
///
/// `expected_clusters` is `ending_vcn - starting_vcn + 1` from the owning
/// attribute header; the decoded runs must cover exactly that many
/// clusters. `record` and `attribute` are carried for error context only.
pub fn decode_run_list(
    record: u64,
    attribute: u16,
    data: &[u8],
    expected_clusters: u64,
) -> Result<Vec<DataRun>, NtfsError> {
    let bad = |offset: usize| NtfsError::BadRunList {
        record,
        attribute,
        offset,
    };

    let mut runs = Vec::new();
    let mut pos = 0usize;
    let mut current_lcn: i64 = 0;
    let mut total_clusters: u64 = 0;

    loop {
        let header = *data.get(pos).ok_or_else(|| bad(pos))?;
        if header == 0 {
            break;
        }
        let entry_offset = pos;
        pos += 1;

        let len_width = (header & 0x0F) as usize;
        let off_width = (header >> 4) as usize;

        // A run must declare a positive length width; widths above 8 bytes
        // cannot fit the 64-bit cluster arithmetic.
        if len_width == 0 || len_width > 8 || off_width > 8 {
            return Err(bad(entry_offset));
        }
        if pos + len_width + off_width > data.len() {
            return Err(bad(entry_offset));
        }

        let length = read_uint_le(&data[pos..pos + len_width]);
        pos += len_width;

        let lcn = if off_width == 0 {
            // Sparse run: clusters exist in VCN space only.
            None
        } else {
            let delta = read_int_le(&data[pos..pos + off_width]);
            pos += off_width;
            current_lcn += delta;
            if current_lcn < 0 {
                return Err(bad(entry_offset));
            }
            Some(current_lcn as u64)
        };

        total_clusters = total_clusters
            .checked_add(length)
            .ok_or_else(|| bad(entry_offset))?;
        runs.push(DataRun { lcn, length });
    }

    if total_clusters != expected_clusters {
        return Err(NtfsError::RunListLengthMismatch {
            record,
            attribute,
            decoded: total_clusters,
            expected: expected_clusters,
        });
    }

    debug!(
        "record {record} attribute {attribute}: {} runs covering {total_clusters} clusters",
        runs.len()
    );
    Ok(runs)
}

/// Little-endian unsigned integer of 1..=8 bytes.
fn read_uint_le(bytes: &[u8]) -> u64 {
    let mut value = 0u64;
    for (i, &b) in bytes.iter().enumerate() {
        value |= (b as u64) << (i * 8);
    }
    value
}

/// Little-endian signed integer of 1..=8 bytes, sign-extended to i64.
fn read_int_le(bytes: &[u8]) -> i64 {
    let mut value = 0i64;
    for (i, &b) in bytes.iter().enumerate() {
        value |= (b as i64) << (i * 8);
    }
    let shift = 64 - bytes.len() * 8;
    (value << shift) >> shift
}

/// Result of a range read: how much was filled and whether the content
/// continues past the requested range.
#[derive(Debug, Clone, Copy)]
pub struct ReadOutcome {
    pub bytes_read: usize,
    pub more_available: bool,
}

/// Streams byte ranges of a non-resident attribute out of its runs.
///
/// Stateless between calls: every read computes absolute positions from
/// the run list and issues absolute reads on the `BlockSource`, so
/// interleaved readers over the same source do not disturb each other.
pub struct RunReader<'a> {
    runs: &'a [DataRun],
    bytes_per_cluster: u64,
    content_size: u64,
}

impl<'a> RunReader<'a> {
    /// `content_size` is the logical size in bytes (the attribute's
    /// `actual_size`); reads are clipped to it even when the final run's
    /// cluster rounding allocates more.
    pub fn new(runs: &'a [DataRun], bytes_per_cluster: u64, content_size: u64) -> Self {
        Self {
            runs,
            bytes_per_cluster,
            content_size,
        }
    }

    pub fn content_size(&self) -> u64 {
        self.content_size
    }

    /// Read logical bytes `[start, start + buf.len())` into `buf`.
    ///
    /// Sparse runs read as zeroes. If the range extends past the end of
    /// the content, only the leading `bytes_read` bytes of `buf` are
    /// filled and `more_available` is false; otherwise `more_available`
    /// tells whether content remains past the range.
    pub fn read_range<S: BlockSource + ?Sized>(
        &self,
        source: &mut S,
        start: u64,
        buf: &mut [u8],
    ) -> Result<ReadOutcome, NtfsError> {
        if start >= self.content_size || buf.is_empty() {
            return Ok(ReadOutcome {
                bytes_read: 0,
                more_available: start < self.content_size,
            });
        }
        let want_end = (start + buf.len() as u64).min(self.content_size);

        let mut run_start = 0u64;
        let mut written = 0usize;
        for run in self.runs {
            let run_bytes = run.length * self.bytes_per_cluster;
            let run_end = run_start + run_bytes;
            if run_end <= start {
                run_start = run_end;
                continue;
            }
            if run_start >= want_end {
                break;
            }

            let lo = start.max(run_start);
            let hi = want_end.min(run_end);
            let dst = &mut buf[(lo - start) as usize..(hi - start) as usize];
            match run.lcn {
                Some(lcn) => {
                    let physical = lcn * self.bytes_per_cluster + (lo - run_start);
                    source.read_at(physical, dst)?;
                }
                None => dst.fill(0),
            }
            written += dst.len();
            run_start = run_end;
        }

        Ok(ReadOutcome {
            bytes_read: written,
            more_available: start + (written as u64) < self.content_size,
        })
    }

    /// Like [`read_range`](Self::read_range) but a short read is an error.
    pub fn read_range_strict<S: BlockSource + ?Sized>(
        &self,
        source: &mut S,
        start: u64,
        buf: &mut [u8],
    ) -> Result<(), NtfsError> {
        let outcome = self.read_range(source, start, buf)?;
        if outcome.bytes_read < buf.len() {
            return Err(NtfsError::Truncated {
                offset: start,
                requested: buf.len(),
                got: outcome.bytes_read,
            });
        }
        Ok(())
    }

    /// Incremental load: append up to `count` bytes of content starting at
    /// `buffer_offset` to `buf`, which must already hold exactly the
    /// content bytes `[0, buffer_offset)`. Bytes already present are not
    /// re-read. `buffer_offset` must be cluster-aligned.
    pub fn read_into<S: BlockSource + ?Sized>(
        &self,
        source: &mut S,
        buf: &mut Vec<u8>,
        buffer_offset: u64,
        count: usize,
    ) -> Result<ReadOutcome, NtfsError> {
        if buffer_offset % self.bytes_per_cluster != 0 {
            return Err(NtfsError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("buffer offset {buffer_offset} is not cluster-aligned"),
            )));
        }
        if buf.len() as u64 != buffer_offset {
            return Err(NtfsError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "buffer holds {} bytes but claims offset {buffer_offset}",
                    buf.len()
                ),
            )));
        }

        let old_len = buf.len();
        buf.resize(old_len + count, 0);
        let outcome = self.read_range(source, buffer_offset, &mut buf[old_len..]);
        match &outcome {
            Ok(o) => buf.truncate(old_len + o.bytes_read),
            Err(_) => buf.truncate(old_len),
        }
        outcome
    }
}
