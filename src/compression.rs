use std::io::{self, Write};

use flate2::Compression as GzipLevel;
use flate2::write::GzEncoder;

use crate::config::CompressionKind;
use crate::error::{Error, Result};
use crate::parallelism::Parallelism;
use crate::pgzip::ParallelGzEncoder;

const ZSTD_LEVEL: i32 = 3;

enum Encoder<W: Write> {
    None(W),
    Gzip(GzEncoder<W>),
    ParallelGzip(ParallelGzEncoder<W>),
    Lz4(lz4_flex::frame::FrameEncoder<W>),
    Snappy(snap::write::FrameEncoder<W>),
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> Encoder<W> {
    fn as_write(&mut self) -> &mut dyn Write {
        match self {
            Encoder::None(w) => w,
            Encoder::Gzip(e) => e,
            Encoder::ParallelGzip(e) => e,
            Encoder::Lz4(e) => e,
            Encoder::Snappy(e) => e,
            Encoder::Zstd(e) => e,
        }
    }

    fn finish(self) -> io::Result<W> {
        match self {
            Encoder::None(w) => Ok(w),
            Encoder::Gzip(e) => e.finish(),
            Encoder::ParallelGzip(e) => e.finish(),
            Encoder::Lz4(e) => e.finish().map_err(io::Error::from),
            Encoder::Snappy(e) => e
                .into_inner()
                .map_err(|e| io::Error::new(e.error().kind(), e.error().to_string())),
            Encoder::Zstd(e) => e.finish(),
        }
    }
}

/// A writer that compresses everything written to it before forwarding it
/// to the destination.
///
/// [`finish`](Self::finish) must be called to write the format trailer;
/// without it the destination holds a truncated stream. A writer dropped
/// without `finish` finalizes on a best-effort basis and logs any failure.
pub struct CompressingWriter<W: Write> {
    kind: CompressionKind,
    encoder: Option<Encoder<W>>,
}

/// Wrap `destination` in the encoder for `kind`.
///
/// Multi-threaded kinds size their worker pools from `parallelism`.
pub fn wrap<W: Write>(
    destination: W,
    kind: CompressionKind,
    parallelism: &Parallelism,
) -> Result<CompressingWriter<W>> {
    let encoder = match kind {
        CompressionKind::None => Encoder::None(destination),
        CompressionKind::Gzip => Encoder::Gzip(GzEncoder::new(destination, GzipLevel::default())),
        CompressionKind::ParallelGzip => Encoder::ParallelGzip(
            ParallelGzEncoder::new(destination, parallelism.parallel_gzip_workers())
                .map_err(|source| Error::Codec { kind, source })?,
        ),
        CompressionKind::Lz4 => Encoder::Lz4(lz4_flex::frame::FrameEncoder::new(destination)),
        CompressionKind::Snappy => Encoder::Snappy(snap::write::FrameEncoder::new(destination)),
        CompressionKind::Zstd => {
            let codec_err = |source| Error::Codec { kind, source };
            let mut encoder =
                zstd::stream::write::Encoder::new(destination, ZSTD_LEVEL).map_err(codec_err)?;
            encoder
                .multithread(parallelism.zstd_workers() as u32)
                .map_err(codec_err)?;
            Encoder::Zstd(encoder)
        }
    };
    tracing::debug!(compression = %kind, "compressing writer opened");
    Ok(CompressingWriter {
        kind,
        encoder: Some(encoder),
    })
}

/// Run `f` against a compressing writer and finalize it whatever `f` returns.
///
/// On success returns `f`'s value together with the destination writer.
pub fn compress_scoped<W, T, F>(
    destination: W,
    kind: CompressionKind,
    parallelism: &Parallelism,
    f: F,
) -> Result<(T, W)>
where
    W: Write,
    F: FnOnce(&mut CompressingWriter<W>) -> io::Result<T>,
{
    let mut writer = wrap(destination, kind, parallelism)?;
    let written = f(&mut writer).map_err(|e| Error::io("write compressed stream", e));
    let finished = writer.finish();
    match (written, finished) {
        (Ok(value), Ok(destination)) => Ok((value, destination)),
        (Err(e), _) | (Ok(_), Err(e)) => Err(e),
    }
}

impl<W: Write> CompressingWriter<W> {
    pub fn kind(&self) -> CompressionKind {
        self.kind
    }

    /// Flush buffered data and format trailers, then hand back the destination.
    pub fn finish(mut self) -> Result<W> {
        let kind = self.kind;
        let encoder = self.encoder.take().ok_or_else(|| Error::Codec {
            kind,
            source: finalized_error(),
        })?;
        encoder.finish().map_err(|source| Error::Codec { kind, source })
    }

    fn encoder(&mut self) -> io::Result<&mut dyn Write> {
        match self.encoder.as_mut() {
            Some(encoder) => Ok(encoder.as_write()),
            None => Err(finalized_error()),
        }
    }
}

fn finalized_error() -> io::Error {
    io::Error::other("compressing writer already finalized")
}

impl<W: Write> Write for CompressingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder()?.write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.encoder()?.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder()?.flush()
    }
}

impl<W: Write> Drop for CompressingWriter<W> {
    fn drop(&mut self) {
        if let Some(encoder) = self.encoder.take()
            && let Err(e) = encoder.finish()
        {
            tracing::warn!(compression = %self.kind, error = %e, "finalize on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn payload(size: usize) -> Vec<u8> {
        // Semi-compressible: repeating pattern with some variation
        (0..size).map(|i| ((i % 251) ^ (i / 1024)) as u8).collect()
    }

    fn decompress(kind: CompressionKind, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        match kind {
            CompressionKind::None => out.extend_from_slice(data),
            CompressionKind::Gzip | CompressionKind::ParallelGzip => {
                flate2::read::MultiGzDecoder::new(data)
                    .read_to_end(&mut out)
                    .unwrap();
            }
            CompressionKind::Lz4 => {
                lz4_flex::frame::FrameDecoder::new(data)
                    .read_to_end(&mut out)
                    .unwrap();
            }
            CompressionKind::Snappy => {
                snap::read::FrameDecoder::new(data)
                    .read_to_end(&mut out)
                    .unwrap();
            }
            CompressionKind::Zstd => out = zstd::decode_all(data).unwrap(),
        }
        out
    }

    #[test]
    fn every_kind_roundtrips() {
        let data = payload(3 * 1024 * 1024 + 17);
        let par = Parallelism::new(4);
        for kind in CompressionKind::ALL {
            let mut w = wrap(Vec::new(), kind, &par).unwrap();
            for chunk in data.chunks(64 * 1024 + 3) {
                w.write_all(chunk).unwrap();
            }
            let out = w.finish().unwrap();
            assert_eq!(decompress(kind, &out), data, "roundtrip failed for {kind}");
        }
    }

    #[test]
    fn every_kind_roundtrips_empty_input() {
        let par = Parallelism::new(1);
        for kind in CompressionKind::ALL {
            let out = wrap(Vec::new(), kind, &par).unwrap().finish().unwrap();
            assert!(decompress(kind, &out).is_empty(), "{kind} produced data");
        }
    }

    #[test]
    fn none_is_verbatim_passthrough() {
        let data = b"hello world";
        let mut w = wrap(Vec::new(), CompressionKind::None, &Parallelism::new(1)).unwrap();
        w.write_all(data).unwrap();
        let out = w.finish().unwrap();
        assert_eq!(out, data);
    }

    /// Counts every write call that reaches the destination.
    struct CountingSink {
        writes: usize,
        flushes: usize,
        bytes: Vec<u8>,
    }

    impl Write for CountingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes += 1;
            self.bytes.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    #[test]
    fn none_finish_performs_no_extra_writes() {
        let sink = CountingSink {
            writes: 0,
            flushes: 0,
            bytes: Vec::new(),
        };
        let mut w = wrap(sink, CompressionKind::None, &Parallelism::new(1)).unwrap();
        w.write_all(b"abc").unwrap();
        let sink = w.finish().unwrap();
        assert_eq!(sink.writes, 1);
        assert_eq!(sink.flushes, 0);
        assert_eq!(sink.bytes, b"abc");
    }

    #[test]
    fn compressed_kinds_change_the_bytes() {
        let data = payload(64 * 1024);
        let par = Parallelism::new(2);
        for kind in CompressionKind::ALL
            .into_iter()
            .filter(|k| *k != CompressionKind::None)
        {
            let mut w = wrap(Vec::new(), kind, &par).unwrap();
            w.write_all(&data).unwrap();
            let out = w.finish().unwrap();
            assert_ne!(out, data, "{kind} left the payload untouched");
        }
    }

    #[test]
    fn drop_without_finish_still_writes_trailer() {
        let mut dest = Vec::new();
        {
            let mut w = wrap(&mut dest, CompressionKind::Gzip, &Parallelism::new(1)).unwrap();
            w.write_all(b"dropped early").unwrap();
        }
        assert_eq!(decompress(CompressionKind::Gzip, &dest), b"dropped early");
    }

    #[test]
    fn scoped_finalizes_on_success() {
        let (written, out) = compress_scoped(
            Vec::new(),
            CompressionKind::Zstd,
            &Parallelism::new(3),
            |w| {
                w.write_all(b"scoped payload")?;
                Ok(14)
            },
        )
        .unwrap();
        assert_eq!(written, 14);
        assert_eq!(decompress(CompressionKind::Zstd, &out), b"scoped payload");
    }

    #[test]
    fn scoped_finalizes_on_error() {
        let mut dest = Vec::new();
        let err = compress_scoped(&mut dest, CompressionKind::Lz4, &Parallelism::new(1), |w| {
            w.write_all(b"before failure")?;
            Err::<(), _>(io::Error::other("source went away"))
        })
        .unwrap_err();
        assert!(err.to_string().contains("source went away"), "got: {err}");
        assert_eq!(decompress(CompressionKind::Lz4, &dest), b"before failure");
    }

    #[derive(Debug)]
    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "backend gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn finish_failure_is_a_codec_error() {
        let w = wrap(FailingSink, CompressionKind::Gzip, &Parallelism::new(1)).unwrap();
        let err = w.finish().unwrap_err();
        assert!(matches!(err, Error::Codec { kind: CompressionKind::Gzip, .. }));
        assert_eq!(err.class(), crate::error::ErrorClass::Codec);
    }

    #[test]
    fn write_errors_propagate_unchanged() {
        let mut w = wrap(FailingSink, CompressionKind::None, &Parallelism::new(1)).unwrap();
        let err = w.write_all(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn kind_is_reported() {
        let w = wrap(Vec::new(), CompressionKind::Snappy, &Parallelism::new(1)).unwrap();
        assert_eq!(w.kind(), CompressionKind::Snappy);
    }
}
