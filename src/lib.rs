//! Read-only inspector for NTFS volume images.
//!
//! Parses the boot sector, locates the Master File Table, validates and
//! fixes up MFT records, enumerates their attributes, and resolves
//! non-resident content through data-run lists — including the MFT's own
//! `$DATA` stream, which maps every other record on the volume.

pub mod block;
pub mod error;
pub mod inspect;
pub mod ntfs;

pub use error::NtfsError;
