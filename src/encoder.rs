use crate::error::Error;
use bytes::{Bytes, BytesMut};
use flate2::{Compress, CompressError, Compression, Crc, FlushCompress, Status};
use std::fmt;
use std::io::{self, Write};

const SCRATCH_SIZE: usize = 8 * 1024; // 8KB deflate output window

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const CM_DEFLATE: u8 = 8;
const FLAG_NAME: u8 = 0x08;
const OS_UNKNOWN: u8 = 0xff;

/// A reusable gzip encoder that writes into an internal buffer.
///
/// Each [`reset`](Self::reset) starts a new gzip member whose header carries
/// the given name in its FNAME field. Compressed bytes accumulate until
/// drained with [`take`](Self::take).
pub struct GzipEncoder {
    compress: Compress,
    crc: Crc,
    level: Compression,
    output: BytesMut,
    scratch: Box<[u8]>,
    finished: bool,
}

impl GzipEncoder {
    /// Creates an encoder primed with an unnamed header.
    pub fn new(level: Compression) -> Self {
        let mut encoder = Self {
            compress: Compress::new(level, false),
            crc: Crc::new(),
            level,
            output: BytesMut::new(),
            scratch: vec![0u8; SCRATCH_SIZE].into_boxed_slice(),
            finished: false,
        };
        encoder.write_header(&[]);
        encoder
    }

    /// Discards all state and starts a new member named `name`.
    ///
    /// An empty name omits the FNAME field.
    pub fn reset(&mut self, name: &[u8]) -> Result<(), Error> {
        if name.contains(&0) {
            return Err(Error::InvalidHeaderName);
        }

        self.compress.reset();
        self.crc.reset();
        self.output.clear();
        self.finished = false;
        self.write_header(name);
        Ok(())
    }

    /// Finishes the deflate stream and appends the gzip trailer.
    ///
    /// Calling this again before a reset is a no-op.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }

        loop {
            let (_, _, status) = self
                .deflate(&[], FlushCompress::Finish)
                .map_err(io::Error::other)?;
            if status == Status::StreamEnd {
                break;
            }
        }

        self.output.extend_from_slice(&self.crc.sum().to_le_bytes());
        self.output.extend_from_slice(&self.crc.amount().to_le_bytes());
        self.finished = true;
        Ok(())
    }

    /// Drains the compressed bytes produced so far.
    pub fn take(&mut self) -> Bytes {
        self.output.split().freeze()
    }

    /// Returns whether the current member has been finished.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn write_header(&mut self, name: &[u8]) {
        let flags = if name.is_empty() { 0 } else { FLAG_NAME };
        let extra_flags = match self.level.level() {
            9 => 2,
            1 => 4,
            _ => 0,
        };

        self.output.extend_from_slice(&GZIP_MAGIC);
        self.output.extend_from_slice(&[CM_DEFLATE, flags]);
        // mtime
        self.output.extend_from_slice(&[0; 4]);
        self.output.extend_from_slice(&[extra_flags, OS_UNKNOWN]);

        if !name.is_empty() {
            self.output.extend_from_slice(name);
            self.output.extend_from_slice(&[0]);
        }
    }

    /// Runs one deflate step, returning bytes consumed, bytes produced and the status.
    fn deflate(
        &mut self,
        input: &[u8],
        flush: FlushCompress,
    ) -> Result<(usize, usize, Status), CompressError> {
        let before_in = self.compress.total_in();
        let before_out = self.compress.total_out();

        let status = self
            .compress
            .compress(input, &mut self.scratch[..], flush)?;

        let consumed = (self.compress.total_in() - before_in) as usize;
        let produced = (self.compress.total_out() - before_out) as usize;
        self.output.extend_from_slice(&self.scratch[..produced]);

        Ok((consumed, produced, status))
    }
}

impl Write for GzipEncoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.finished {
            return Err(io::Error::other("gzip member already finished"));
        }
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            let (consumed, produced, _) = self
                .deflate(buf, FlushCompress::None)
                .map_err(io::Error::other)?;

            if consumed > 0 {
                self.crc.update(&buf[..consumed]);
                return Ok(consumed);
            }

            // No progress at all; let write_all report WriteZero
            if produced == 0 {
                return Ok(0);
            }
        }
    }

    /// Sync-flushes so all input written so far can be decoded.
    fn flush(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }

        loop {
            let (_, produced, _) = self
                .deflate(&[], FlushCompress::Sync)
                .map_err(io::Error::other)?;
            if produced < self.scratch.len() {
                return Ok(());
            }
        }
    }
}

impl fmt::Debug for GzipEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GzipEncoder")
            .field("level", &self.level.level())
            .field("buffered", &self.output.len())
            .field("finished", &self.finished)
            .finish()
    }
}
