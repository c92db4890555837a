/// Share of the CPU each concurrent stage may take.
///
/// Backups usually run next to a live workload, so no stage claims every
/// core: parallel gzip and the uploader take half, zstd takes a third.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Parallelism {
    available: usize,
}

const PARALLEL_GZIP_DIVISOR: usize = 2;
const ZSTD_DIVISOR: usize = 3;
const UPLOAD_DIVISOR: usize = 2;

impl Parallelism {
    /// `available` is the number of logical CPUs to plan for; zero counts as one.
    pub fn new(available: usize) -> Self {
        Self {
            available: available.max(1),
        }
    }

    pub fn detect() -> Self {
        Self::new(num_cpus::get())
    }

    pub fn available(&self) -> usize {
        self.available
    }

    /// `available / divisor`, never less than one worker.
    pub fn share(&self, divisor: usize) -> usize {
        (self.available / divisor.max(1)).max(1)
    }

    pub fn parallel_gzip_workers(&self) -> usize {
        self.share(PARALLEL_GZIP_DIVISOR)
    }

    pub fn zstd_workers(&self) -> usize {
        self.share(ZSTD_DIVISOR)
    }

    pub fn upload_concurrency(&self) -> usize {
        self.share(UPLOAD_DIVISOR)
    }
}

impl Default for Parallelism {
    fn default() -> Self {
        Self::detect()
    }
}
