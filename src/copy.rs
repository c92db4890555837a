use std::io::{self, Read, Write};

use crate::error::{Error, Result};

pub(crate) const COPY_BUF_SIZE: usize = 256 * 1024;

pub(crate) const READ_SOURCE: &str = "read source";

/// Read into `buf` until it is full or the source hits EOF.
///
/// Returns the number of bytes read; anything short of `buf.len()` means EOF.
pub(crate) fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Copy `reader` into `writer`, tagging read and write failures separately.
pub(crate) fn copy_stream<R, W>(reader: &mut R, writer: &mut W, write_context: &str) -> Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::io(READ_SOURCE, e)),
        };
        writer
            .write_all(&buf[..n])
            .map_err(|e| Error::io(write_context, e))?;
        total += n as u64;
    }
    Ok(total)
}
