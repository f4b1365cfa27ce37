use std::io::Read;

/// Fills one fragment-sized chunk from `src`.
///
/// Returns `(hit_eof, filled)`: how many bytes landed in `chunk` and
/// whether the source is exhausted, which is what lets the fragment
/// writer drop the continuation bit on the final fragment. A source that
/// fits the chunk exactly does not report EOF until the read after.
pub fn fill_buf<R: Read>(src: &mut R, chunk: &mut [u8]) -> std::io::Result<(bool, usize)> {
    let mut filled = 0;

    loop {
        if filled == chunk.len() {
            return Ok((false, filled));
        }
        match src.read(&mut chunk[filled..])? {
            0 => return Ok((true, filled)),
            n => filled += n,
        }
    }
}

#[cfg(test)]
mod test_chunk_fill {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn short_source_reports_eof() {
        let mut src = Cursor::new(vec![0x00, 0x01]);
        let mut chunk = [0u8; 4];

        assert_eq!(fill_buf(&mut src, &mut chunk).unwrap(), (true, 2));
        assert_eq!(&chunk, &[0x00, 0x01, 0, 0]);
    }

    #[test]
    fn source_spanning_chunks() {
        // Four payload bytes over two-byte chunks, the fragment shape
        let mut src = Cursor::new(vec![0x00, 0x01, 0x02, 0x03]);
        let mut chunk = [0u8; 2];

        assert_eq!(fill_buf(&mut src, &mut chunk).unwrap(), (false, 2));
        assert_eq!(&chunk, &[0x00, 0x01]);

        assert_eq!(fill_buf(&mut src, &mut chunk).unwrap(), (false, 2));
        assert_eq!(&chunk, &[0x02, 0x03]);

        // Exhaustion only shows on the read after the last full chunk
        assert_eq!(fill_buf(&mut src, &mut chunk).unwrap(), (true, 0));
    }

    #[test]
    fn exact_fit_is_not_eof_yet() {
        let mut src = Cursor::new(vec![0x2A; 4]);
        let mut chunk = [0u8; 4];

        assert_eq!(fill_buf(&mut src, &mut chunk).unwrap(), (false, 4));
        assert_eq!(&chunk, &[0x2A; 4]);
    }
}
