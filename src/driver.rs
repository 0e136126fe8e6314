//! Runs one configuration: seeds a fresh table from random baseline entries, then lets every
//! worker thread hammer it with random lookups while timing only the lookups themselves.

use crate::config::{Hint, RunConfig};
use crate::error::Result;
use crate::table::ContendedHashTable;
use crate::workload::{IndexBuffer, Key, Storage, INDEX_BUFFER_CAPACITY};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::hash::{BuildHasher, Hash};
use std::hint::black_box;
use std::num::NonZeroUsize;
use std::sync::{Barrier, OnceLock};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// The table type the driver benchmarks.
pub type Table = ContendedHashTable<Key, u64>;

/// Measures wall-clock time, excluding any intervals spent paused.
#[derive(Clone, Copy, Debug)]
pub struct Stopwatch {
    running_since: Option<Instant>,
    elapsed: Duration,
}

impl Stopwatch {
    /// Creates a running stopwatch.
    pub fn start() -> Self {
        Self {
            running_since: Some(Instant::now()),
            elapsed: Duration::ZERO,
        }
    }

    /// Stops accumulating time. Does nothing if already paused.
    pub fn pause(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.elapsed += since.elapsed();
        }
    }

    /// Resumes accumulating time. Does nothing if already running.
    pub fn resume(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    /// Total time spent running so far.
    pub fn elapsed(&self) -> Duration {
        match self.running_since {
            Some(since) => self.elapsed + since.elapsed(),
            None => self.elapsed,
        }
    }
}

/// How a worker calls into the table on every iteration.
///
/// The two implementations are separate instantiations of the worker loop, so choosing between
/// them costs one branch per run rather than one per lookup.
pub trait Lookup {
    /// The [`Hint`] this lookup corresponds to.
    const HINT: Hint;

    /// Performs one get-or-insert.
    fn get_or_insert<K, V, S>(table: &ContendedHashTable<K, V, S>, key: &K, value: V) -> V
    where
        K: Hash + Eq + Clone,
        V: Clone,
        S: BuildHasher;
}

/// Hashes inside the critical section.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainLookup;

/// Hashes before taking the lock.
#[derive(Clone, Copy, Debug, Default)]
pub struct HintedLookup;

impl Lookup for PlainLookup {
    const HINT: Hint = Hint::Plain;

    #[inline]
    fn get_or_insert<K, V, S>(table: &ContendedHashTable<K, V, S>, key: &K, value: V) -> V
    where
        K: Hash + Eq + Clone,
        V: Clone,
        S: BuildHasher,
    {
        table.get_or_insert(key, value)
    }
}

impl Lookup for HintedLookup {
    const HINT: Hint = Hint::Hinted;

    #[inline]
    fn get_or_insert<K, V, S>(table: &ContendedHashTable<K, V, S>, key: &K, value: V) -> V
    where
        K: Hash + Eq + Clone,
        V: Clone,
        S: BuildHasher,
    {
        table.get_or_insert_with_hint(key, value)
    }
}

/// The table thread zero built, along with how many entries it had right after the reset.
#[derive(Debug)]
struct SeededTable {
    table: Table,
    seeded_len: usize,
}

/// Everything the workers of one run share.
///
/// On the first run of a configuration thread zero generates the storage and resets a table from
/// it; later runs find both already in place. Either way every thread (thread zero included)
/// waits on `setup_done` before touching them, which is what keeps workers away from a table that
/// has not been reset yet.
struct RunContext<'a> {
    config: RunConfig,
    storage: &'a OnceLock<Storage>,
    table: &'a OnceLock<SeededTable>,
    setup_done: Barrier,
}

impl RunContext<'_> {
    /// Only ever called by thread zero, before the barrier.
    fn setup(&self, rng: &mut StdRng) {
        let storage = self.storage.get_or_init(|| {
            let storage = Storage::generate(rng, self.config.string_len, self.config.table_size);
            debug!(config = %self.config, entries = storage.len(), "storage generated");
            storage
        });
        if self.table.get().is_some() {
            return;
        }

        let mut table = Table::with_capacity(storage.len());
        table.reset(storage.entries().iter().cloned());
        let seeded_len = table.len();
        debug!(
            config = %self.config,
            entries = storage.len(),
            distinct = seeded_len,
            "table reset"
        );
        // only thread zero fills the slot, and it was empty above
        let _ = self.table.set(SeededTable { table, seeded_len });
    }

    fn worker<L: Lookup>(
        &self,
        thread_index: usize,
        iterations: u64,
        mut rng: StdRng,
    ) -> Result<Duration> {
        if thread_index == 0 {
            self.setup(&mut rng);
        }
        self.setup_done.wait();

        let storage = self
            .storage
            .get()
            .expect("thread zero publishes storage before reaching the barrier");
        let table = &self
            .table
            .get()
            .expect("thread zero publishes the table before reaching the barrier")
            .table;
        let entries = storage.entries();

        let mut indices = IndexBuffer::new(&mut rng, INDEX_BUFFER_CAPACITY, entries.len())?;

        let mut stopwatch = Stopwatch::start();
        for _ in 0..iterations {
            let (key, value) = &entries[indices.current()];
            black_box(L::get_or_insert(table, key, *value));

            if indices.advance() {
                stopwatch.pause();
                indices.refill(&mut rng);
                trace!(thread_index, "refilled index buffer");
                stopwatch.resume();
            }
        }
        Ok(stopwatch.elapsed())
    }
}

fn rng_for(seed: Option<u64>, run: u64, thread_index: usize) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(
            (seed ^ (run << 32)).wrapping_add(thread_index as u64),
        ),
        None => StdRng::from_entropy(),
    }
}

/// Validates configurations and hands out [`Prepared`] runs for them.
///
/// ```
/// use std::num::NonZeroUsize;
/// use contended::{Driver, Hint, RunConfig};
///
/// let config = RunConfig::new(8, 100, NonZeroUsize::new(2).unwrap(), Hint::Hinted);
/// let mut prepared = Driver::seeded(7).prepare(&config).unwrap();
/// let first = prepared.run(1_000).unwrap();
/// let second = prepared.run(1_000).unwrap();
/// assert!(first.fresh_setup());
/// assert!(!second.fresh_setup());
/// assert_eq!(second.table_len(), 100);
/// assert_eq!(second.thread_durations().len(), 2);
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct Driver {
    seed: Option<u64>,
}

impl Driver {
    /// A driver whose workers seed their random number generators from the OS.
    pub fn new() -> Self {
        Self::default()
    }

    /// A driver whose workers derive their random number generators from `seed`, so that the
    /// same configuration generates the same data and access pattern every time.
    pub fn seeded(seed: u64) -> Self {
        Self { seed: Some(seed) }
    }

    /// Validates `config` and returns a handle for running it any number of times.
    ///
    /// A rejected configuration returns the reason it was rejected, and no storage or table is
    /// ever allocated for it. Nothing is allocated for an accepted one either until its first
    /// [`run`](Prepared::run).
    pub fn prepare(&self, config: &RunConfig) -> Result<Prepared> {
        if let Err(e) = config.validate() {
            debug!(config = %config, error = %e, "configuration rejected");
            return Err(e);
        }
        Ok(Prepared {
            config: *config,
            seed: self.seed,
            runs: 0,
            storage: OnceLock::new(),
            table: OnceLock::new(),
        })
    }

    /// Prepares `config` and runs it once with every worker performing `iterations` lookups.
    pub fn run(&self, config: &RunConfig, iterations: u64) -> Result<RunReport> {
        self.prepare(config)?.run(iterations)
    }
}

/// A validated configuration, with the storage and table it shares between runs.
///
/// The storage is generated once, by thread zero of the first run. The table is reset from it at
/// the same time and reused by later runs, unless a run grew it past its seeded contents, in which
/// case thread zero of the next run resets a new one. A harness that takes many samples of one
/// configuration should hold on to a single `Prepared` for all of them.
#[derive(Debug)]
pub struct Prepared {
    config: RunConfig,
    seed: Option<u64>,
    runs: u64,
    storage: OnceLock<Storage>,
    table: OnceLock<SeededTable>,
}

impl Prepared {
    /// The configuration this handle runs.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Number of completed runs.
    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// The baseline entries, once the first run has generated them.
    pub fn storage(&self) -> Option<&Storage> {
        self.storage.get()
    }

    /// The table as the last run left it, if there has been one.
    pub fn table(&self) -> Option<&Table> {
        self.table.get().map(|seeded| &seeded.table)
    }

    /// Runs the configuration with every worker performing `iterations` lookups.
    ///
    /// The report carries the time each worker spent in its timed loop, which excludes setup and
    /// index buffer refills.
    pub fn run(&mut self, iterations: u64) -> Result<RunReport> {
        let drifted = self
            .table
            .get()
            .map_or(false, |seeded| seeded.table.len() != seeded.seeded_len);
        if drifted {
            debug!(config = %self.config, "table grew during the previous run, resetting");
            self.table.take();
        }
        let fresh_setup = self.table.get().is_none();

        let report = match self.config.hint {
            Hint::Plain => self.run_with::<PlainLookup>(iterations, fresh_setup),
            Hint::Hinted => self.run_with::<HintedLookup>(iterations, fresh_setup),
        }?;
        self.runs += 1;
        Ok(report)
    }

    fn run_with<L: Lookup>(&self, iterations: u64, fresh_setup: bool) -> Result<RunReport> {
        debug_assert_eq!(L::HINT, self.config.hint);

        let ctx = RunContext {
            config: self.config,
            storage: &self.storage,
            table: &self.table,
            setup_done: Barrier::new(self.config.threads.get()),
        };
        let durations = thread::scope(|s| {
            let handles: Vec<_> = (0..self.config.threads.get())
                .map(|thread_index| {
                    let ctx = &ctx;
                    let rng = rng_for(self.seed, self.runs, thread_index);
                    s.spawn(move || ctx.worker::<L>(thread_index, iterations, rng))
                })
                .collect();

            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .collect::<Result<Vec<_>>>()
        })?;

        let report = RunReport {
            config: self.config,
            durations: durations.into_boxed_slice(),
            table_len: self.table().map_or(0, Table::len),
            fresh_setup,
        };
        debug!(
            config = %report.config,
            hint = %report.config.hint,
            mean = ?report.mean_duration(),
            table_len = report.table_len,
            fresh_setup,
            "run complete"
        );
        Ok(report)
    }
}

/// The outcome of one run of a configuration.
#[derive(Clone, Debug)]
pub struct RunReport {
    config: RunConfig,
    durations: Box<[Duration]>,
    table_len: usize,
    fresh_setup: bool,
}

impl RunReport {
    /// The configuration that was run.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Time spent in the timed loop, one entry per worker thread.
    pub fn thread_durations(&self) -> &[Duration] {
        &self.durations
    }

    /// Sum of all workers' timed durations.
    pub fn total_duration(&self) -> Duration {
        self.durations.iter().sum()
    }

    /// Mean of the workers' timed durations, which is what a harness should record as the time
    /// taken for the requested number of iterations.
    pub fn mean_duration(&self) -> Duration {
        let threads = NonZeroUsize::new(self.durations.len()).map_or(1, NonZeroUsize::get);
        let total_nanos = self.total_duration().as_nanos() / threads as u128;
        Duration::from_nanos(u64::try_from(total_nanos).unwrap_or(u64::MAX))
    }

    /// Metadata to attach to the harness's own statistics for this run.
    pub fn counters(&self) -> [(&'static str, usize); 3] {
        [
            ("String Size", self.config.string_len),
            ("HashTable Size", self.config.table_size),
            ("Use hinted", usize::from(self.config.hint.is_hinted())),
        ]
    }

    /// Number of entries in the table after the run.
    pub fn table_len(&self) -> usize {
        self.table_len
    }

    /// `true` if thread zero reset a table during this run, rather than reusing the previous one.
    pub fn fresh_setup(&self) -> bool {
        self.fresh_setup
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;

    fn config(string_len: usize, table_size: usize, threads: usize, hint: Hint) -> RunConfig {
        RunConfig::new(
            string_len,
            table_size,
            NonZeroUsize::new(threads).unwrap(),
            hint,
        )
    }

    #[test]
    fn stopwatch_excludes_pauses() {
        let wall = Instant::now();
        let mut sw = Stopwatch::start();
        sw.pause();
        let paused_at = sw.elapsed();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(sw.elapsed(), paused_at);
        sw.resume();
        thread::sleep(Duration::from_millis(5));
        sw.pause();
        assert!(sw.elapsed() >= paused_at + Duration::from_millis(5));
        assert!(sw.elapsed() + Duration::from_millis(20) <= wall.elapsed());
    }

    #[test]
    fn stopwatch_pause_and_resume_are_idempotent() {
        let mut sw = Stopwatch::start();
        sw.pause();
        sw.pause();
        let t = sw.elapsed();
        sw.resume();
        sw.resume();
        assert!(sw.elapsed() >= t);
    }

    #[test]
    fn rejected_before_setup() {
        let driver = Driver::seeded(0);
        let err = driver
            .run(&config(4096, 10_000_000, 2, Hint::Plain), 10)
            .unwrap_err();
        assert!(matches!(err, ConfigError::TooBig { .. }));
        let err = driver.run(&config(8, 0, 2, Hint::Plain), 10).unwrap_err();
        assert_eq!(err, ConfigError::EmptyTable);
    }

    #[test]
    fn both_hints_leave_table_matching_storage() {
        for hint in Hint::ALL {
            let mut prepared = Driver::seeded(11).prepare(&config(8, 50, 3, hint)).unwrap();
            let report = prepared.run(5_000).unwrap();
            assert_eq!(report.table_len(), 50);
            let table = prepared.table().unwrap();
            for (key, value) in prepared.storage().unwrap().entries() {
                assert_eq!(table.get(key), Some(*value));
            }
            assert_eq!(report.counters()[2].1, usize::from(hint.is_hinted()));
        }
    }

    #[test]
    fn refill_happens_inside_run() {
        // more iterations than a single buffer holds
        let mut prepared = Driver::seeded(3)
            .prepare(&config(4, 10, 1, Hint::Plain))
            .unwrap();
        let report = prepared
            .run(INDEX_BUFFER_CAPACITY as u64 * 2 + 7)
            .unwrap();
        assert_eq!(report.thread_durations().len(), 1);
        assert_eq!(report.table_len(), prepared.storage().unwrap().len());
    }

    #[test]
    fn prepare_allocates_nothing_until_run() {
        let mut prepared = Driver::seeded(4)
            .prepare(&config(8, 20, 2, Hint::Plain))
            .unwrap();
        assert!(prepared.storage().is_none());
        assert!(prepared.table().is_none());
        assert_eq!(prepared.runs(), 0);
        assert!(prepared.run(10).unwrap().fresh_setup());
        assert!(prepared.storage().is_some());
        assert_eq!(prepared.runs(), 1);
    }

    #[test]
    fn later_runs_reuse_setup() {
        let mut prepared = Driver::seeded(6)
            .prepare(&config(8, 30, 2, Hint::Hinted))
            .unwrap();
        assert!(prepared.run(100).unwrap().fresh_setup());
        let storage_ptr = prepared.storage().unwrap().entries().as_ptr();
        for _ in 0..3 {
            let report = prepared.run(100).unwrap();
            assert!(!report.fresh_setup());
            assert_eq!(report.table_len(), 30);
        }
        assert_eq!(prepared.storage().unwrap().entries().as_ptr(), storage_ptr);
        assert_eq!(prepared.runs(), 4);
    }

    #[test]
    fn grown_table_is_reset_on_next_run() {
        let mut prepared = Driver::seeded(8)
            .prepare(&config(8, 30, 2, Hint::Plain))
            .unwrap();
        prepared.run(10).unwrap();
        let extra: Key = std::sync::Arc::from(&b"not a seeded key"[..]);
        assert!(prepared.table().unwrap().insert(extra.clone(), 1));

        let report = prepared.run(10).unwrap();
        assert!(report.fresh_setup());
        assert_eq!(report.table_len(), 30);
        assert!(!prepared.table().unwrap().contains_key(&extra));
    }

    #[test]
    fn zero_iterations() {
        let report = Driver::seeded(5)
            .run(&config(2, 10, 2, Hint::Hinted), 0)
            .unwrap();
        assert_eq!(report.thread_durations().len(), 2);
        assert!(report.mean_duration() <= report.total_duration());
    }

    #[test]
    fn counters_name_configuration() {
        let report = Driver::seeded(9)
            .run(&config(16, 20, 1, Hint::Plain), 10)
            .unwrap();
        assert_eq!(
            report.counters(),
            [("String Size", 16), ("HashTable Size", 20), ("Use hinted", 0)]
        );
    }
}
