//! Code to parse the command line using `clap`, and the `Config` the parsed
//! command line is turned into.

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, CommandFactory, Parser};
use std::path::PathBuf;

use crate::emitter::TokenRules;

/// The set operations we know how to do
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum OpName {
    /// Print the tokens present in any file
    Union,
    /// Print the tokens present in every file
    Intersection,
    /// Print the tokens missing from at least one file
    Difference,
}

/// How a membership filter's size is decided
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Sizing {
    /// Size each filter for this many tokens
    Tokens(u64),
    /// Count the lines of every input first, and size for that many tokens
    CountLines,
}

/// Which kind of membership set a run uses. Every set in a run is the same
/// kind.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Backend {
    /// Exact sets: no errors, memory grows with the number of distinct tokens
    Exact,
    /// Chained bloom filters: fixed memory, occasional false positives
    Bloom {
        /// How the filters are sized
        sizing: Sizing,
        /// How many filters are chained
        filters: usize,
    },
}

/// How the per-input sets of intersection and difference are built
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum BuildStrategy {
    /// One input after another, on the calling thread
    Sequential,
    /// One thread per input
    PerInput,
    /// One input after another, each split into chunks spread over a pool of
    /// workers
    PerChunk {
        /// Approximate size of each chunk, in bytes
        chunk_size: usize,
        /// Number of worker threads
        workers: usize,
    },
}

/// Everything a run needs to know, decided once, before any input is read
#[derive(Debug, Clone)]
pub struct Config {
    /// The set operation requested
    pub op: OpName,
    /// The files to take as operands
    pub inputs: Vec<PathBuf>,
    /// How lines are turned into tokens
    pub rules: TokenRules,
    /// Which kind of membership set to use
    pub backend: Backend,
    /// How intersection and difference build their per-input sets
    pub strategy: BuildStrategy,
    /// Prefix each line of union output with its number of occurrences
    pub count: bool,
    /// Size, in bytes, of input buffers
    pub buffer_size: usize,
}

/// The default input buffer size
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 20;

impl Config {
    /// A configuration using plain lines as tokens, exact sets, and no
    /// parallelism
    #[must_use]
    pub fn new(op: OpName, inputs: Vec<PathBuf>) -> Self {
        Config {
            op,
            inputs,
            rules: TokenRules::default(),
            backend: Backend::Exact,
            strategy: BuildStrategy::Sequential,
            count: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl TryFrom<CliArgs> for Config {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self> {
        let Some(op) = args.op() else { bail!("One of --union, --intersection, or --difference is required") };
        if args.files.is_empty() {
            bail!("At least one input file is required");
        }
        let rules = TokenRules::new(
            args.trim,
            args.match_pattern.as_deref(),
            args.capture_pattern.as_deref(),
        )
        .context("Can't compile token rules")?;

        let backend = if args.estimated_tokens > 0 {
            Backend::Bloom { sizing: Sizing::Tokens(args.estimated_tokens), filters: args.filters }
        } else if args.estimate {
            Backend::Bloom { sizing: Sizing::CountLines, filters: args.filters }
        } else {
            Backend::Exact
        };
        if args.count {
            if op != OpName::Union {
                bail!("--count only applies to --union");
            }
            if backend != Backend::Exact {
                bail!("--count needs exact sets, so it can't be combined with bloom filters");
            }
        }

        let strategy = if args.chunk_size > 0 {
            BuildStrategy::PerChunk {
                chunk_size: args.chunk_size,
                workers: args.workers.unwrap_or_else(num_cpus::get),
            }
        } else if args.parallel {
            BuildStrategy::PerInput
        } else {
            BuildStrategy::Sequential
        };

        Ok(Config {
            op,
            inputs: args.files,
            rules,
            backend,
            strategy,
            count: args.count,
            buffer_size: args.buffer_size.max(1),
        })
    }
}

/// Print the help message to standard output
pub fn print_usage() -> Result<()> {
    CliArgs::command().print_help().context("failed printing to stdout")
}

#[derive(Debug, Parser)]
#[command(name = "tt", version, about)]
#[command(group(ArgGroup::new("operation").args(["union", "intersection", "difference"]).multiple(false)))]
/// `CliArgs` contains the parsed command line.
pub struct CliArgs {
    /// Print each distinct token found in any file
    #[arg(short, long)]
    pub union: bool,
    /// Print each distinct token found in every file
    #[arg(short, long)]
    pub intersection: bool,
    /// Print each distinct token missing from at least one file
    #[arg(short, long)]
    pub difference: bool,

    /// Trim whitespace from both ends of each line
    #[arg(long)]
    pub trim: bool,
    /// Only use lines matching this regular expression
    #[arg(long = "match", value_name = "REGEX")]
    pub match_pattern: Option<String>,
    /// Use the text captured by this regular expression's single group as the token
    #[arg(long = "capture", value_name = "REGEX")]
    pub capture_pattern: Option<String>,

    /// With --union, prefix each token with the number of times it occurs
    #[arg(short, long)]
    pub count: bool,
    /// Compute the result but write nothing
    #[arg(long)]
    pub null: bool,

    /// Use bloom filters sized for this many tokens (0 means exact sets)
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub estimated_tokens: u64,
    /// Use bloom filters sized by counting the lines of the input files
    #[arg(long)]
    pub estimate: bool,
    /// Number of chained bloom filters per set
    #[arg(long, value_name = "K", default_value_t = 2)]
    pub filters: usize,

    /// Input buffer size, in bytes
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,
    /// Build each file's set on its own thread
    #[arg(long)]
    pub parallel: bool,
    /// Build each file's set from chunks of about this many bytes, spread over worker threads
    #[arg(long, value_name = "BYTES", default_value_t = 0)]
    pub chunk_size: usize,
    /// Number of chunk workers (default: one per CPU)
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Log progress to standard error
    #[arg(short, long)]
    pub verbose: bool,

    /// The files to take as operands. A single file is allowed: union and
    /// intersection then print its distinct tokens, and difference prints
    /// nothing.
    #[arg(value_name = "FILE")]
    pub files: Vec<PathBuf>,
}

impl CliArgs {
    /// The set operation requested, if any
    #[must_use]
    pub fn op(&self) -> Option<OpName> {
        if self.union {
            Some(OpName::Union)
        } else if self.intersection {
            Some(OpName::Intersection)
        } else if self.difference {
            Some(OpName::Difference)
        } else {
            None
        }
    }
}
