use crate::error::{ConfigError, Result};
use std::fmt::{self, Display, Formatter};
use std::num::NonZeroUsize;

/// Upper bound on `string_len * table_size` for a single configuration, in bytes.
pub const MAX_MEMORY: usize = 200_000_000;

/// Step multiplier used between consecutive points of a log-scale range.
const RANGE_MULTIPLIER: usize = 8;

/// Where the key's hash is computed relative to the table's lock.
///
/// This is fixed for a whole run, so the timed loop never branches on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Hint {
    /// Hash inside the critical section.
    Plain,
    /// Hash before taking the lock.
    Hinted,
}

impl Hint {
    /// Both variants, plain first.
    pub const ALL: [Hint; 2] = [Hint::Plain, Hint::Hinted];

    /// Returns `true` for [`Hint::Hinted`].
    pub fn is_hinted(self) -> bool {
        self == Hint::Hinted
    }
}

impl Display for Hint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Hint::Plain => f.write_str("plain"),
            Hint::Hinted => f.write_str("hinted"),
        }
    }
}

/// One point of the parameter sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RunConfig {
    /// Length in bytes of every generated key.
    pub string_len: usize,
    /// Number of entries in the baseline storage, and so in the table when timing starts.
    pub table_size: usize,
    /// Number of worker threads hammering the table.
    pub threads: NonZeroUsize,
    /// Whether workers pass a precomputed hash.
    pub hint: Hint,
}

impl RunConfig {
    /// Creates a configuration. Nothing is checked until [`validate`](Self::validate).
    pub fn new(string_len: usize, table_size: usize, threads: NonZeroUsize, hint: Hint) -> Self {
        Self {
            string_len,
            table_size,
            threads,
            hint,
        }
    }

    /// Checks that the configuration can be run at all.
    ///
    /// A configuration whose keys would need more than [`MAX_MEMORY`] bytes in total is rejected,
    /// as is one with an empty table, which leaves nothing to draw lookups from.
    pub fn validate(&self) -> Result<()> {
        match self.string_len.checked_mul(self.table_size) {
            Some(bytes) if bytes <= MAX_MEMORY => {}
            _ => {
                return Err(ConfigError::TooBig {
                    string_len: self.string_len,
                    table_size: self.table_size,
                    limit: MAX_MEMORY,
                })
            }
        }
        if self.table_size == 0 {
            return Err(ConfigError::EmptyTable);
        }
        Ok(())
    }
}

impl Display for RunConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/threads:{}",
            self.string_len, self.table_size, self.threads
        )
    }
}

/// Points from `lo` to `hi`, multiplying by [`RANGE_MULTIPLIER`] each step.
///
/// Both endpoints are always included, e.g. `10..=10_000_000` yields
/// `10, 64, 512, 4096, 32768, 262144, 2097152, 10000000`.
fn log_range(lo: usize, hi: usize) -> Vec<usize> {
    let mut out = vec![lo];
    if hi <= lo {
        return out;
    }
    // first step lands on the next power of the multiplier above `lo`
    let mut next = 1usize;
    while next <= lo {
        next = match next.checked_mul(RANGE_MULTIPLIER) {
            Some(n) => n,
            None => break,
        };
    }
    while next < hi && next > lo {
        out.push(next);
        next = match next.checked_mul(RANGE_MULTIPLIER) {
            Some(n) => n,
            None => break,
        };
    }
    out.push(hi);
    out
}

/// Powers of two from `lo` to `hi`, inclusive.
fn thread_range(lo: usize, hi: usize) -> Vec<NonZeroUsize> {
    let mut out = Vec::new();
    let mut n = lo.max(1);
    while n <= hi {
        if let Some(nz) = NonZeroUsize::new(n) {
            out.push(nz);
        }
        n = match n.checked_mul(2) {
            Some(n) => n,
            None => break,
        };
    }
    out
}

fn env_usize(var: &'static str) -> Result<Option<usize>> {
    let value = match std::env::var(var) {
        Ok(value) => value,
        Err(_) => return Ok(None),
    };
    match value.trim().parse() {
        Ok(n) => Ok(Some(n)),
        Err(_) => Err(ConfigError::InvalidEnv { var, value }),
    }
}

/// The cross product of configurations a benchmark harness runs.
///
/// Key length and table size form a range pair, the thread count is a separate axis, and every
/// point is produced for both [`Hint`] values.
///
/// ```
/// use contended::Sweep;
///
/// let sweep = Sweep::new().string_len(1, 8).table_size(10, 100).max_threads(2);
/// // 2 string lengths x 3 table sizes x 2 thread counts x 2 hint modes
/// assert_eq!(sweep.configs().count(), 24);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sweep {
    string_len: (usize, usize),
    table_size: (usize, usize),
    threads: (usize, usize),
}

impl Default for Sweep {
    fn default() -> Self {
        Self {
            string_len: (1, 4096),
            table_size: (10, 10_000_000),
            threads: (1, 16),
        }
    }
}

impl Sweep {
    /// The full default sweep.
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment variable capping the thread axis.
    pub const MAX_THREADS_VAR: &'static str = "CONTENDED_MAX_THREADS";
    /// Environment variable capping the key length axis.
    pub const MAX_STRING_LEN_VAR: &'static str = "CONTENDED_MAX_STRING_LEN";
    /// Environment variable capping the table size axis.
    pub const MAX_TABLE_SIZE_VAR: &'static str = "CONTENDED_MAX_TABLE_SIZE";

    /// The default sweep, with each axis' upper bound optionally lowered through
    /// [`MAX_THREADS_VAR`](Self::MAX_THREADS_VAR),
    /// [`MAX_STRING_LEN_VAR`](Self::MAX_STRING_LEN_VAR) and
    /// [`MAX_TABLE_SIZE_VAR`](Self::MAX_TABLE_SIZE_VAR).
    pub fn from_env() -> Result<Self> {
        let mut sweep = Self::new();
        if let Some(n) = env_usize(Self::MAX_THREADS_VAR)? {
            sweep = sweep.max_threads(n);
        }
        if let Some(n) = env_usize(Self::MAX_STRING_LEN_VAR)? {
            sweep.string_len.1 = n.max(sweep.string_len.0);
        }
        if let Some(n) = env_usize(Self::MAX_TABLE_SIZE_VAR)? {
            sweep.table_size.1 = n.max(sweep.table_size.0);
        }
        Ok(sweep)
    }

    /// Sets the key length range.
    pub fn string_len(mut self, lo: usize, hi: usize) -> Self {
        self.string_len = (lo, hi);
        self
    }

    /// Sets the table size range.
    pub fn table_size(mut self, lo: usize, hi: usize) -> Self {
        self.table_size = (lo, hi);
        self
    }

    /// Sets the thread count range; counts are powers of two within it.
    pub fn threads(mut self, lo: usize, hi: usize) -> Self {
        self.threads = (lo, hi);
        self
    }

    /// Lowers the upper end of the thread range to `max`.
    pub fn max_threads(mut self, max: usize) -> Self {
        self.threads.1 = self.threads.1.min(max);
        self
    }

    /// Every configuration in the sweep, including ones that will fail
    /// [`RunConfig::validate`]; the harness decides what to do with those.
    pub fn configs(&self) -> impl Iterator<Item = RunConfig> {
        let string_lens = log_range(self.string_len.0, self.string_len.1);
        let table_sizes = log_range(self.table_size.0, self.table_size.1);
        let threads = thread_range(self.threads.0, self.threads.1);

        let mut out = Vec::with_capacity(
            string_lens.len() * table_sizes.len() * threads.len() * Hint::ALL.len(),
        );
        for hint in Hint::ALL {
            for &string_len in &string_lens {
                for &table_size in &table_sizes {
                    for &t in &threads {
                        out.push(RunConfig::new(string_len, table_size, t, hint));
                    }
                }
            }
        }
        out.into_iter()
    }
}
