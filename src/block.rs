use std::io::{self, Read, Seek, SeekFrom};

/// Positioned-read access to a volume image or block device.
///
/// Every read supplies an absolute byte offset; implementations must not
/// depend on any cursor surviving between calls. Interleaved readers over
/// the same source stay correct because each call re-seeks.
pub trait BlockSource {
    /// Fill `buf` with bytes starting at absolute offset `offset`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
}

impl<R: Read + Seek> BlockSource for R {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.read_exact(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_at_is_absolute() {
        let data: Vec<u8> = (0u8..=255).collect();
        let mut src = Cursor::new(data);

        let mut buf = [0u8; 4];
        src.read_at(10, &mut buf).unwrap();
        assert_eq!(buf, [10, 11, 12, 13]);

        // A second read at a lower offset must not be affected by the first.
        src.read_at(2, &mut buf).unwrap();
        assert_eq!(buf, [2, 3, 4, 5]);
    }

    #[test]
    fn test_read_past_end_fails() {
        let mut src = Cursor::new(vec![0u8; 16]);
        let mut buf = [0u8; 8];
        assert!(src.read_at(12, &mut buf).is_err());
    }
}
