use thiserror::Error;

#[derive(Error, Debug)]
pub enum NtfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid boot sector: {0}")]
    BadBootSector(String),

    #[error("MFT record {record} has invalid magic {found:?}")]
    BadMagic { record: u64, found: [u8; 4] },

    #[error("MFT record {0} is marked damaged (BAAD)")]
    DamagedRecord(u64),

    #[error("MFT record {0} is an index record, not a file record")]
    NotAFileRecord(u64),

    #[error("Fixup mismatch in record {record}, sector {sector}: expected USN {expected:#06x}, found {found:#06x}")]
    FixupMismatch {
        record: u64,
        sector: usize,
        expected: u16,
        found: u16,
    },

    #[error("Bad attribute in record {record} at offset {offset:#x}: {reason}")]
    BadAttribute {
        record: u64,
        offset: usize,
        reason: String,
    },

    #[error("Malformed run list in record {record}, attribute {attribute}, at byte {offset}")]
    BadRunList {
        record: u64,
        attribute: u16,
        offset: usize,
    },

    #[error("Run list of record {record}, attribute {attribute} covers {decoded} clusters, expected {expected}")]
    RunListLengthMismatch {
        record: u64,
        attribute: u16,
        decoded: u64,
        expected: u64,
    },

    #[error("Read truncated: requested {requested} bytes at content offset {offset}, got {got}")]
    Truncated {
        offset: u64,
        requested: usize,
        got: usize,
    },

    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),
}
