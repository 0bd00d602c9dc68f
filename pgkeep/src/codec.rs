//! Blocking stream stages: dump bytes to gzip (and age) on the way in, and back out.

use crate::encryption::Encryptor;
use crate::utils::errors::EncryptionError;
use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};

/// Metadata recorded in the gzip header.
#[derive(Debug, Clone)]
pub(crate) struct StreamHeader {
    pub name: String,
    pub mtime: u32,
}

/// Wraps a reader and counts the bytes that pass through it.
struct Counted<R> {
    inner: R,
    count: u64,
}

impl<R: Read> Read for Counted<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

/// Copy `source` into `file` as gzip, encrypted when an encryptor is given.
///
/// Returns the number of uncompressed bytes read from `source`. The file is synced
/// before returning.
pub(crate) fn encode_into<R: Read>(
    source: R,
    file: File,
    header: &StreamHeader,
    encryptor: Option<&Encryptor>,
    level: Compression,
) -> io::Result<u64> {
    let mut source = Counted {
        inner: source,
        count: 0,
    };
    let gzip = || {
        GzBuilder::new()
            .filename(header.name.as_bytes())
            .mtime(header.mtime)
    };
    let output = BufWriter::new(file);

    let output = match encryptor {
        Some(encryptor) => {
            let sealed = encryptor.encrypt_to(output)?;
            let mut gz = gzip().write(sealed, level);
            io::copy(&mut source, &mut gz)?;
            gz.finish()?.finish()?
        }
        None => {
            let mut gz = gzip().write(output, level);
            io::copy(&mut source, &mut gz)?;
            gz.finish()?
        }
    };

    let file = output.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(source.count)
}

/// Open a backup file for reading as plain dump bytes.
pub(crate) fn decode_from(
    file: File,
    encryptor: Option<&Encryptor>,
) -> Result<Box<dyn Read + Send>, EncryptionError> {
    let input = BufReader::new(file);
    Ok(match encryptor {
        Some(encryptor) => Box::new(GzDecoder::new(encryptor.decrypt_from(input)?)),
        None => Box::new(GzDecoder::new(input)),
    })
}
