//! Bounded in-memory pipe between a producing writer and a consuming reader.
//!
//! Only [`PipeWriter::close`] produces a clean EOF on the reader. A writer
//! that is dropped or closed with an error makes the reader fail, so a
//! producer that died half way is never mistaken for a finished stream.

use std::io::{self, Read, Write};
use std::mem;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};

const CHUNK_SIZE: usize = 64 * 1024;
/// Chunks in flight before the writer blocks.
const DEPTH: usize = 16;

enum Message {
    Data(Vec<u8>),
    Error(io::Error),
    Eof,
}

pub struct PipeWriter {
    tx: SyncSender<Message>,
    buf: Vec<u8>,
}

pub struct PipeReader {
    rx: Receiver<Message>,
    chunk: Vec<u8>,
    pos: usize,
    eof: bool,
}

/// Create a connected writer/reader pair.
pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = sync_channel(DEPTH);
    (
        PipeWriter {
            tx,
            buf: Vec::with_capacity(CHUNK_SIZE),
        },
        PipeReader {
            rx,
            chunk: Vec::new(),
            pos: 0,
            eof: false,
        },
    )
}

fn reader_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed")
}

impl PipeWriter {
    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = mem::replace(&mut self.buf, Vec::with_capacity(CHUNK_SIZE));
        self.tx.send(Message::Data(chunk)).map_err(|_| reader_gone())
    }

    /// Flush buffered bytes and signal end of stream.
    pub fn close(mut self) -> io::Result<()> {
        self.send_buffered()?;
        self.tx.send(Message::Eof).map_err(|_| reader_gone())
    }

    /// Make the reader fail with `err` once it has consumed what was sent.
    pub fn close_with_error(mut self, err: io::Error) {
        let _ = self.send_buffered();
        let _ = self.tx.send(Message::Error(err));
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = (CHUNK_SIZE - self.buf.len()).min(buf.len());
        self.buf.extend_from_slice(&buf[..n]);
        if self.buf.len() == CHUNK_SIZE {
            self.send_buffered()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.pos < self.chunk.len() {
                let n = (self.chunk.len() - self.pos).min(buf.len());
                buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            if self.eof {
                return Ok(0);
            }
            match self.rx.recv() {
                Ok(Message::Data(chunk)) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                Ok(Message::Eof) => self.eof = true,
                Ok(Message::Error(err)) => return Err(err),
                Err(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "pipe writer dropped before close",
                    ));
                }
            }
        }
    }
}
