use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use nthprime::sieve::DEFAULT_MAX_BLOCK_SIZE;
use nthprime::{Execution, SegmentedSieve, SieveConfig, storage, verify};

#[derive(Parser)]
#[command(name = "nthprime")]
#[command(about = "Find the nth prime with a segmented Sieve of Eratosthenes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SieveArgs {
    #[arg(long, help = "Sieve on a single thread")]
    sequential: bool,
    #[arg(
        short,
        long,
        conflicts_with = "sequential",
        help = "Number of worker threads (defaults to CPU count)"
    )]
    workers: Option<usize>,
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_BLOCK_SIZE,
        help = "Upper bound on the number of integers sieved per block"
    )]
    max_block_size: usize,
}

impl SieveArgs {
    fn config(&self) -> SieveConfig {
        let config = if self.sequential {
            SieveConfig::sequential()
        } else {
            SieveConfig::parallel(self.workers)
        };

        config.with_max_block_size(self.max_block_size)
    }
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Print the nth prime (0-indexed, 2 is prime #0)")]
    Nth {
        #[arg(allow_negative_numbers = true, help = "Index of the prime to find")]
        n: i64,
        #[arg(long, help = "Check the result with a Miller-Rabin test")]
        verify: bool,
        #[command(flatten)]
        sieve: SieveArgs,
    },
    #[command(about = "Write the first COUNT primes")]
    List {
        #[arg(help = "Number of primes to write")]
        count: usize,
        #[arg(
            short,
            long,
            help = "Write primes in binary format (8 bytes per prime, little-endian)"
        )]
        binary: bool,
        #[arg(short, long, help = "Output file (defaults to stdout)")]
        output: Option<PathBuf>,
        #[arg(long, help = "Check every prime with a Miller-Rabin test")]
        verify: bool,
        #[command(flatten)]
        sieve: SieveArgs,
    },
    #[command(about = "Count the primes below a limit")]
    Count {
        #[arg(allow_negative_numbers = true, help = "Exclusive upper limit")]
        limit: i64,
        #[command(flatten)]
        sieve: SieveArgs,
    },
}

fn mode_name(sieve: &SegmentedSieve) -> String {
    match sieve.execution() {
        Execution::Sequential => "sequential".to_string(),
        Execution::Parallel(splitter) => format!("parallel({})", splitter.max_workers()),
    }
}

fn build_sieve(args: &SieveArgs) -> Result<SegmentedSieve, String> {
    SegmentedSieve::with_config(args.config()).map_err(|e| e.to_string())
}

fn run(command: Commands) -> Result<(&'static str, String, String), String> {
    match command {
        Commands::Nth {
            n,
            verify: check,
            sieve,
        } => {
            let mut sieve = build_sieve(&sieve)?;
            let prime = sieve.try_nth_prime(n).map_err(|e| e.to_string())?; // negative n gives 2

            if check && !verify::is_probable_prime(prime) {
                return Err(format!("Verification failed: {} is not prime", prime));
            }

            println!("{}", prime);
            Ok(("nth", n.to_string(), mode_name(&sieve)))
        }
        Commands::List {
            count,
            binary,
            output,
            verify: check,
            sieve,
        } => {
            let mut sieve = build_sieve(&sieve)?;
            let mode = mode_name(&sieve);
            let primes = sieve.first(count).map_err(|e| e.to_string())?;

            // Refuse to write anything if a single entry fails the check
            if check {
                if let Some((index, value)) = verify::first_invalid(primes) {
                    return Err(format!(
                        "Verification failed at index {}: {}",
                        index, value
                    ));
                }
            }

            // Stdout unless an output file was given
            let mut writer = storage::open_output(output.as_deref())
                .map_err(|e| format!("Error opening output: {}", e))?;
            let written = if binary {
                storage::write_primes_binary(&mut writer, primes)
            } else {
                storage::write_primes_text(&mut writer, primes)
            }
            .map_err(|e| format!("Error writing primes: {}", e))?;

            // Keep stdout clean for piping; only report when writing to a file
            if let Some(path) = &output {
                eprintln!("Saved {} primes to {}", written, path.display());
            }

            Ok(("list", count.to_string(), mode))
        }
        Commands::Count { limit, sieve } => {
            let mut sieve = build_sieve(&sieve)?;
            let count = sieve.prime_count_below(limit).map_err(|e| e.to_string())?;

            println!("{}", count);
            Ok(("count", limit.to_string(), mode_name(&sieve)))
        }
    }
}

fn main() -> ExitCode {
    // Diagnostics go to stderr, controlled by RUST_LOG
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let start = Instant::now();

    let (subcommand, args, mode) = match run(cli.command) {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    // Timing covers sieve construction, sieving and output
    let duration_us = start.elapsed().as_micros();

    eprintln!(
        "Execution time: {}us ({:.2}ms)",
        duration_us,
        duration_us as f64 / 1000.0
    );

    // A failed log write never fails the run
    if let Err(e) = storage::log_execution(subcommand, &args, &mode, duration_us) {
        eprintln!("Warning: Failed to log execution: {}", e);
    }

    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_negative_index() {
        let cli = Cli::try_parse_from(["nthprime", "nth", "-5"]).unwrap();
        match cli.command {
            Commands::Nth { n, verify, sieve } => {
                assert_eq!(n, -5);
                assert!(!verify);
                assert!(!sieve.sequential);
                assert_eq!(sieve.max_block_size, DEFAULT_MAX_BLOCK_SIZE);
            }
            _ => panic!("expected nth subcommand"),
        }
    }

    #[test]
    fn test_sequential_conflicts_with_workers() {
        let result = Cli::try_parse_from(["nthprime", "nth", "10", "--sequential", "-w", "2"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_sieve_args_config() {
        let cli = Cli::try_parse_from(["nthprime", "count", "100", "-w", "3", "--max-block-size", "4096"])
            .unwrap();
        let Commands::Count { limit, sieve } = cli.command else {
            panic!("expected count subcommand");
        };

        assert_eq!(limit, 100);
        let config = sieve.config();
        assert_eq!(config.max_block_size, 4096);
        assert_eq!(
            config.execution,
            Execution::Parallel(nthprime::WorkSplitter::with_workers(3))
        );
    }

    #[test]
    fn test_run_nth() {
        let cli = Cli::try_parse_from(["nthprime", "nth", "99", "--sequential", "--verify"]).unwrap();
        let (subcommand, args, mode) = run(cli.command).unwrap();

        assert_eq!(subcommand, "nth");
        assert_eq!(args, "99");
        assert_eq!(mode, "sequential");
    }

    #[test]
    fn test_run_rejects_bad_block_size() {
        let cli = Cli::try_parse_from(["nthprime", "nth", "10", "--max-block-size", "0"]).unwrap();
        let err = run(cli.command).unwrap_err();
        assert!(err.starts_with("Invalid sieve configuration"), "{}", err);
    }

    #[test]
    fn test_run_rejects_oversized_block_buffer() {
        let cli = Cli::try_parse_from(["nthprime", "nth", "5", "--max-block-size", "1000000000000"])
            .unwrap();
        let err = run(cli.command).unwrap_err();
        assert!(err.contains("must be <="), "{}", err);
    }
}
