use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::parallel::WorkSplitter;

/// Primes the sieve starts with, so segmenting can begin at 30
pub const SEED_PRIMES: [i64; 10] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29];

/// First integer of the first sieved block
pub const FIRST_BLOCK_START: i64 = SEED_PRIMES[SEED_PRIMES.len() - 1] + 1;

pub const DEFAULT_INITIAL_BLOCK_SIZE: usize = 512;

// Heavily impacts performance. The marking buffer is this many bytes, so it
// should sit comfortably inside L2.
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 1 << 17;

/// Largest accepted `max_block_size` (a 1 GiB marking buffer)
pub const MAX_BLOCK_SIZE_LIMIT: usize = 1 << 30;

/// How composite marking and harvesting run within a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    Sequential,
    Parallel(WorkSplitter),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SieveConfig {
    pub initial_block_size: usize,
    pub max_block_size: usize,
    pub execution: Execution,
}

impl Default for SieveConfig {
    fn default() -> Self {
        Self {
            initial_block_size: DEFAULT_INITIAL_BLOCK_SIZE,
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            execution: Execution::Parallel(WorkSplitter::available()),
        }
    }
}

impl SieveConfig {
    pub fn sequential() -> Self {
        Self {
            execution: Execution::Sequential,
            ..Self::default()
        }
    }

    /// Parallel execution, capped at `workers` threads when given
    pub fn parallel(workers: Option<usize>) -> Self {
        let splitter = match workers {
            Some(n) => WorkSplitter::with_workers(n),
            None => WorkSplitter::available(),
        };

        Self {
            execution: Execution::Parallel(splitter),
            ..Self::default()
        }
    }

    pub fn with_max_block_size(mut self, max_block_size: usize) -> Self {
        self.max_block_size = max_block_size;
        self
    }

    pub fn with_initial_block_size(mut self, initial_block_size: usize) -> Self {
        self.initial_block_size = initial_block_size;
        self
    }

    /// Checks that the seed primes are enough to sieve the first block and
    /// that the marking buffer stays within [`MAX_BLOCK_SIZE_LIMIT`].
    pub fn validate(&self) -> Result<()> {
        if self.initial_block_size == 0 {
            return Err(Error::InvalidConfig(
                "initial_block_size must be greater than 0".to_string(),
            ));
        }

        if self.max_block_size < self.initial_block_size {
            return Err(Error::InvalidConfig(format!(
                "max_block_size ({}) must be >= initial_block_size ({})",
                self.max_block_size, self.initial_block_size
            )));
        }

        if self.max_block_size > MAX_BLOCK_SIZE_LIMIT {
            return Err(Error::InvalidConfig(format!(
                "max_block_size ({}) must be <= {}",
                self.max_block_size, MAX_BLOCK_SIZE_LIMIT
            )));
        }

        if !may_sieve(FIRST_BLOCK_START, self.initial_block_size) {
            return Err(Error::InvalidConfig(format!(
                "initial_block_size ({}) is too large to sieve from {} with the seed primes",
                self.initial_block_size, FIRST_BLOCK_START
            )));
        }

        Ok(())
    }
}

/// A block of `size` starting at `start` can be sieved once every prime
/// below `start` is known, as long as `start² >= start + size`
fn may_sieve(start: i64, size: usize) -> bool {
    let start = start as i128;
    start * start >= start + size as i128
}

fn may_sieve_strictly(start: i64, size: usize) -> bool {
    let start = start as i128;
    start * start > start + size as i128
}

/// Segmented Sieve of Eratosthenes with a growing prime cache
///
/// Numbers are sieved block by block on demand. Each block is crossed off
/// using the primes found so far, then its survivors are appended to the
/// cache. Block size doubles (up to `max_block_size`) as soon as the known
/// primes are enough to sieve the larger block.
///
/// - Queries for cached indices are O(1)
/// - The marking buffer is allocated once and reused across blocks
/// - Marking and harvesting may be split across scoped worker threads
/// - Queries need `&mut self`; share between threads behind a `Mutex`
pub struct SegmentedSieve {
    primes: Vec<i64>,
    // Only true is ever stored during marking, so relaxed atomics suffice.
    // The harvest swaps every visited cell back to false.
    is_not_prime: Vec<AtomicBool>,
    block_start: i64,
    block_size: usize,
    max_block_size: usize,
    // Leading primes whose square falls inside the current block
    marking_primes: usize,
    blocks_sieved: u64,
    execution: Execution,
}

impl SegmentedSieve {
    /// Sieve with the default block sizes, parallel across all cores
    pub fn new() -> Self {
        Self::build(SieveConfig::default())
    }

    pub fn with_config(config: SieveConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: SieveConfig) -> Self {
        let is_not_prime = (0..config.max_block_size)
            .map(|_| AtomicBool::new(false))
            .collect();

        Self {
            primes: SEED_PRIMES.to_vec(),
            is_not_prime,
            block_start: FIRST_BLOCK_START,
            block_size: config.initial_block_size,
            max_block_size: config.max_block_size,
            marking_primes: 0,
            blocks_sieved: 0,
            execution: config.execution,
        }
    }

    /// Returns the nth 0-indexed prime, where 2 is prime #0
    ///
    /// Negative indices return 2. Previously computed primes are cached.
    ///
    /// # Panics
    ///
    /// Panics if the sieve would have to run past `i64::MAX`.
    pub fn nth_prime(&mut self, n: i64) -> i64 {
        match self.try_nth_prime(n) {
            Ok(prime) => prime,
            Err(err) => panic!("{}", err),
        }
    }

    /// Like [`nth_prime`](Self::nth_prime), but reports overflow as an error
    pub fn try_nth_prime(&mut self, n: i64) -> Result<i64> {
        if n < 0 {
            return Ok(SEED_PRIMES[0]);
        }

        let index = usize::try_from(n).map_err(|_| self.overflow())?;
        if let Some(&prime) = self.primes.get(index) {
            return Ok(prime);
        }

        self.extend_to_len(index + 1)?;
        Ok(self.primes[index])
    }

    /// First `count` primes, sieving further if needed
    pub fn first(&mut self, count: usize) -> Result<&[i64]> {
        self.extend_to_len(count)?;
        Ok(&self.primes[..count])
    }

    /// Number of primes strictly less than `limit`
    pub fn prime_count_below(&mut self, limit: i64) -> Result<usize> {
        if limit <= SEED_PRIMES[0] {
            return Ok(0);
        }

        if self.block_start < limit {
            debug!(
                limit,
                block_start = self.block_start,
                "extending sieve to count primes"
            );
            while self.block_start < limit {
                self.sieve_next_block()?;
            }
        }

        Ok(self.primes.partition_point(|&p| p < limit))
    }

    /// Primes found so far, in ascending order
    pub fn primes(&self) -> &[i64] {
        &self.primes
    }

    pub fn len(&self) -> usize {
        self.primes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primes.is_empty()
    }

    /// First integer of the next block to sieve
    pub fn block_start(&self) -> i64 {
        self.block_start
    }

    /// Size of the next block to sieve
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn max_block_size(&self) -> usize {
        self.max_block_size
    }

    pub fn blocks_sieved(&self) -> u64 {
        self.blocks_sieved
    }

    pub fn execution(&self) -> Execution {
        self.execution
    }

    fn overflow(&self) -> Error {
        Error::Overflow {
            block_start: self.block_start,
            block_size: self.block_size,
        }
    }

    fn extend_to_len(&mut self, len: usize) -> Result<()> {
        if self.primes.len() >= len {
            return Ok(());
        }

        debug!(cached = self.primes.len(), target = len, "extending sieve");
        while self.primes.len() < len {
            self.sieve_next_block()?;
        }

        Ok(())
    }

    fn sieve_next_block(&mut self) -> Result<()> {
        let block_start = self.block_start;
        let block_size = self.block_size;
        let block_end = i64::try_from(block_size)
            .ok()
            .and_then(|size| block_start.checked_add(size))
            .ok_or_else(|| self.overflow())?;
        debug_assert!(may_sieve(block_start, block_size));

        self.advance_marking_primes(block_end);
        self.mark_composites(block_start, block_size);
        let found = self.harvest(block_start, block_size);

        self.block_start = block_end;
        self.blocks_sieved += 1;
        trace!(block_start, block_size, found, "sieved block");

        self.grow_block_size();
        Ok(())
    }

    fn advance_marking_primes(&mut self, block_end: i64) {
        // Primes above sqrt(block_end - 1) only have multiples in this block
        // that a smaller prime already marks
        let last = block_end - 1;

        while let Some(&prime) = self.primes.get(self.marking_primes) {
            match prime.checked_mul(prime) {
                Some(square) if square <= last => self.marking_primes += 1,
                _ => break,
            }
        }
    }

    fn mark_composites(&self, block_start: i64, block_size: usize) {
        let marking = &self.primes[..self.marking_primes];
        let flags = &self.is_not_prime[..block_size];

        match self.execution {
            Execution::Sequential => {
                for &prime in marking {
                    mark_multiples(flags, block_start, prime);
                }
            }
            Execution::Parallel(splitter) => {
                splitter.run(marking.len(), |i, _| {
                    mark_multiples(flags, block_start, marking[i]);
                });
            }
        }
    }

    /// Appends the unmarked numbers of the block and clears every flag
    fn harvest(&mut self, block_start: i64, block_size: usize) -> usize {
        let flags = &self.is_not_prime[..block_size];
        let before = self.primes.len();

        match self.execution {
            Execution::Sequential => {
                for (offset, flag) in flags.iter().enumerate() {
                    if !flag.swap(false, Ordering::Relaxed) {
                        self.primes.push(block_start + offset as i64);
                    }
                }
            }
            Execution::Parallel(splitter) => {
                let per_worker =
                    splitter.run_collect(block_size, Vec::new, |local: &mut Vec<i64>, offset, _| {
                        if !flags[offset].swap(false, Ordering::Relaxed) {
                            local.push(block_start + offset as i64);
                        }
                    });

                // Chunks are contiguous, so worker order is ascending order
                for list in per_worker {
                    self.primes.extend(list);
                }
            }
        }

        self.primes.len() - before
    }

    fn grow_block_size(&mut self) {
        let before = self.block_size;

        while self.block_size < self.max_block_size
            && may_sieve_strictly(self.block_start, 2 * self.block_size)
        {
            self.block_size = (self.block_size * 2).min(self.max_block_size);
        }

        if self.block_size != before {
            debug!(
                block_start = self.block_start,
                from = before,
                to = self.block_size,
                "grew block size"
            );
        }
    }
}

impl fmt::Debug for SegmentedSieve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentedSieve")
            .field("primes", &self.primes.len())
            .field("block_start", &self.block_start)
            .field("block_size", &self.block_size)
            .field("max_block_size", &self.max_block_size)
            .field("blocks_sieved", &self.blocks_sieved)
            .field("execution", &self.execution)
            .finish_non_exhaustive()
    }
}

impl Default for SegmentedSieve {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks every multiple of `prime` inside the block starting at `block_start`
fn mark_multiples(flags: &[AtomicBool], block_start: i64, prime: i64) {
    let multiplier = block_start / prime;
    let mut multiple = multiplier * prime;

    if multiple < block_start {
        multiple += prime;
    }

    let step = prime as usize;
    let mut offset = (multiple - block_start) as usize;

    while offset < flags.len() {
        // Concurrent writers only ever store true
        flags[offset].store(true, Ordering::Relaxed);
        offset += step;
    }
}
