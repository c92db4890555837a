//! Block-parallel gzip.
//!
//! Input is cut into fixed-size blocks and each block is compressed as a
//! complete gzip member by a fixed pool of worker threads. Members are
//! written to the inner writer strictly in input order, so the output is a
//! valid multi-member gzip stream that `gzip -d` and
//! `flate2::read::MultiGzDecoder` read back as one payload.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::mem;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, Sender, bounded, unbounded};
use flate2::Compression;
use flate2::write::GzEncoder;

/// Uncompressed bytes per gzip member.
pub const DEFAULT_BLOCK_SIZE: usize = 1 << 20;

/// Block sequence number and uncompressed bytes.
type Job = (u64, Vec<u8>);
/// Block sequence number and the compressed member.
type Member = (u64, io::Result<Vec<u8>>);

pub struct ParallelGzEncoder<W: Write> {
    inner: W,
    block_size: usize,
    /// Blocks handed out but not yet written, across queue and workers.
    max_in_flight: u64,
    buf: Vec<u8>,
    jobs: Option<Sender<Job>>,
    members: Receiver<Member>,
    workers: Vec<JoinHandle<()>>,
    /// Members that finished ahead of their turn.
    ready: BTreeMap<u64, Vec<u8>>,
    next_seq: u64,
    next_write: u64,
}

impl<W: Write> ParallelGzEncoder<W> {
    pub fn new(inner: W, workers: usize) -> io::Result<Self> {
        Self::with_block_size(inner, workers, DEFAULT_BLOCK_SIZE)
    }

    /// Start `workers` compression threads; they live until the encoder is
    /// finished or dropped.
    pub fn with_block_size(inner: W, workers: usize, block_size: usize) -> io::Result<Self> {
        let workers = workers.max(1);
        let block_size = block_size.max(1);
        let level = Compression::default();
        let (job_tx, job_rx) = bounded::<Job>(workers);
        let (member_tx, member_rx) = unbounded::<Member>();

        let handles = (0..workers)
            .map(|i| {
                let jobs = job_rx.clone();
                let members = member_tx.clone();
                thread::Builder::new()
                    .name(format!("dumpsink-pgzip-{i}"))
                    .spawn(move || run_worker(jobs, members, level))
            })
            .collect::<io::Result<Vec<_>>>()?;

        Ok(Self {
            inner,
            block_size,
            max_in_flight: 2 * workers as u64,
            buf: Vec::with_capacity(block_size),
            jobs: Some(job_tx),
            members: member_rx,
            workers: handles,
            ready: BTreeMap::new(),
            next_seq: 0,
            next_write: 0,
        })
    }

    /// Queue the buffered block, first writing out finished members while
    /// too many blocks are in flight.
    fn dispatch(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        while self.next_seq - self.next_write >= self.max_in_flight {
            self.collect_one()?;
        }
        let block = mem::replace(&mut self.buf, Vec::with_capacity(self.block_size));
        let jobs = self.jobs.as_ref().ok_or_else(pool_gone)?;
        jobs.send((self.next_seq, block)).map_err(|_| pool_gone())?;
        self.next_seq += 1;
        Ok(())
    }

    /// Wait for one member and write every member that is now next in line.
    fn collect_one(&mut self) -> io::Result<()> {
        let (seq, member) = self.members.recv().map_err(|_| pool_gone())?;
        self.ready.insert(seq, member?);
        while let Some(member) = self.ready.remove(&self.next_write) {
            self.inner.write_all(&member)?;
            self.next_write += 1;
        }
        Ok(())
    }

    fn write_all_pending(&mut self) -> io::Result<()> {
        while self.next_write < self.next_seq {
            self.collect_one()?;
        }
        Ok(())
    }

    /// Compress what is left, write every member and return the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.dispatch()?;
        self.write_all_pending()?;
        if self.next_seq == 0 {
            // An empty payload still has to be a valid gzip file.
            let member = compress_member(&[], Compression::default())?;
            self.inner.write_all(&member)?;
        }
        self.jobs.take();
        for worker in self.workers.drain(..) {
            worker
                .join()
                .map_err(|_| io::Error::other("gzip worker panicked"))?;
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for ParallelGzEncoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.block_size - self.buf.len();
        let n = room.min(buf.len());
        self.buf.extend_from_slice(&buf[..n]);
        if self.buf.len() == self.block_size {
            self.dispatch()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.dispatch()?;
        self.write_all_pending()?;
        self.inner.flush()
    }
}

fn pool_gone() -> io::Error {
    io::Error::other("gzip worker pool stopped")
}

fn run_worker(jobs: Receiver<Job>, members: Sender<Member>, level: Compression) {
    while let Ok((seq, block)) = jobs.recv() {
        if members.send((seq, compress_member(&block, level))).is_err() {
            break;
        }
    }
}

fn compress_member(block: &[u8], level: Compression) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(block.len() / 2 + 64), level);
    encoder.write_all(block)?;
    encoder.finish()
}
