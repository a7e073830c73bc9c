//! Segmented Sieve of Eratosthenes for finding the nth prime.
//!
//! ```
//! use nthprime::SegmentedSieve;
//!
//! let mut sieve = SegmentedSieve::new();
//! assert_eq!(sieve.nth_prime(0), 2);
//! assert_eq!(sieve.nth_prime(99), 541);
//! ```

pub mod error;
pub mod parallel;
pub mod sieve;
pub mod storage;
pub mod verify;

pub use error::{Error, Result};
pub use parallel::{WorkSplitter, run_parallel};
pub use sieve::{Execution, SegmentedSieve, SieveConfig};
