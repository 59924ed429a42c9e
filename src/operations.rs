//! Houses the `calculate` function
//!
use anyhow::{Context, Result};
use std::path::Path;
use std::thread;
use std::time::Instant;
use tracing::debug;

use crate::args::{Backend, BuildStrategy, Config, OpName, Sizing};
use crate::dispatch::Dispatcher;
use crate::emitter::{for_each_token, Emitter, ScanCounts};
use crate::io::{self, TokenSink};
use crate::set::{BloomSets, CountedSet, ExactSets, MembershipSet, SetFactory};
use crate::stats::RunStats;

/// Calculates the set operation named by `config.op` and writes the result to
/// `out`. Each file in `config.inputs` is treated as a set of tokens:
///
/// * `OpName::Union` writes the tokens that occur in any file,
/// * `OpName::Intersection` writes the tokens that occur in every file, and
/// * `OpName::Difference` writes the tokens missing from at least one file.
///
/// Each token is written at most once, in order of first appearance. `out` is
/// flushed before returning, even when the run fails part way.
pub fn calculate(config: &Config, out: &mut impl TokenSink) -> Result<RunStats> {
    let started = Instant::now();
    let mut stats =
        RunStats { bytes_to_process: io::bytes_to_process(&config.inputs)?, ..RunStats::default() };

    let result = match config.backend {
        Backend::Exact => {
            debug!(op = ?config.op, "using exact sets");
            drive(config, &ExactSets, out, &mut stats)
        }
        Backend::Bloom { sizing, filters } => {
            let expected = match sizing {
                Sizing::Tokens(n) => n,
                Sizing::CountLines => io::count_lines(&config.inputs, config.buffer_size)?,
            };
            stats.estimated_tokens = Some(expected);
            debug!(op = ?config.op, expected, filters, "using bloom filters");
            drive(config, &BloomSets::new(expected, filters), out, &mut stats)
        }
    };

    let flushed = out.flush();
    result?;
    flushed?;
    stats.elapsed = started.elapsed();
    Ok(stats)
}

fn drive<F: SetFactory>(
    config: &Config,
    factory: &F,
    out: &mut impl TokenSink,
    stats: &mut RunStats,
) -> Result<()> {
    match config.op {
        OpName::Union if config.count => counted_union(config, out, stats),
        OpName::Union => union(config, factory, out, stats),
        OpName::Intersection => {
            let sets = build_sets(config, factory, stats)?;
            emit_wanted(config, factory, &sets, in_every, out, stats)
        }
        OpName::Difference => {
            let sets = build_sets(config, factory, stats)?;
            emit_wanted(config, factory, &sets, missing_from_some, out, stats)
        }
    }
}

/// Calls `each` for every token of the file at `path`, returning the scan
/// counts.
fn scan_input(
    path: &Path,
    config: &Config,
    mut each: impl FnMut(&[u8]) -> Result<()>,
) -> Result<ScanCounts> {
    let mut emitter = Emitter::open(path, &config.rules, config.buffer_size)?;
    while emitter.advance()? {
        each(emitter.current())?;
    }
    emitter.close();
    Ok(emitter.counts())
}

/// `Union` needs just one pass and one set
fn union<F: SetFactory>(
    config: &Config,
    factory: &F,
    out: &mut impl TokenSink,
    stats: &mut RunStats,
) -> Result<()> {
    let mut seen = factory.make();
    for path in &config.inputs {
        let counts = scan_input(path, config, |token| {
            if !seen.contains(token) {
                out.write_token(token)?;
                seen.insert(token);
                stats.tokens_written += 1;
            }
            Ok(())
        })?;
        stats.scan += counts;
    }
    Ok(())
}

/// A counted union can't write anything until every count is known, so it
/// keeps every token.
fn counted_union(config: &Config, out: &mut impl TokenSink, stats: &mut RunStats) -> Result<()> {
    let mut set = CountedSet::default();
    for path in &config.inputs {
        let counts = scan_input(path, config, |token| {
            set.insert(token);
            Ok(())
        })?;
        stats.scan += counts;
    }
    stats.tokens_written += set.output_with_count_to(out)?;
    Ok(())
}

/// Builds one set per input, returned in input order
fn build_sets<F: SetFactory>(
    config: &Config,
    factory: &F,
    stats: &mut RunStats,
) -> Result<Vec<F::Set>> {
    debug!(strategy = ?config.strategy, inputs = config.inputs.len(), "building sets");
    let built: Vec<(F::Set, ScanCounts)> = match config.strategy {
        BuildStrategy::Sequential => {
            config.inputs.iter().map(|path| build_one(path, config, factory)).collect::<Result<_>>()?
        }
        BuildStrategy::PerInput => thread::scope(|scope| {
            let handles: Vec<_> = config
                .inputs
                .iter()
                .map(|path| scope.spawn(move || build_one(path, config, factory)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect::<Result<Vec<_>>>()
        })?,
        BuildStrategy::PerChunk { chunk_size, workers } => {
            let dispatcher = Dispatcher::new(chunk_size, config.buffer_size).with_workers(workers);
            config
                .inputs
                .iter()
                .map(|path| build_chunked(path, config, factory, &dispatcher))
                .collect::<Result<_>>()?
        }
    };

    let mut sets = Vec::with_capacity(built.len());
    for (set, counts) in built {
        stats.scan += counts;
        sets.push(set);
    }
    Ok(sets)
}

fn build_one<F: SetFactory>(
    path: &Path,
    config: &Config,
    factory: &F,
) -> Result<(F::Set, ScanCounts)> {
    let mut set = factory.make();
    let counts = scan_input(path, config, |token| {
        set.insert(token);
        Ok(())
    })?;
    debug!(path = %path.display(), tokens = counts.tokens_emitted, "built set");
    Ok((set, counts))
}

/// Each chunk worker fills a set of its own; the workers' sets are merged
/// once the input is used up.
fn build_chunked<F: SetFactory>(
    path: &Path,
    config: &Config,
    factory: &F,
    dispatcher: &Dispatcher,
) -> Result<(F::Set, ScanCounts)> {
    let reader = io::open_input(path, config.buffer_size)?;
    let states = dispatcher
        .run_with_state(
            reader,
            || (factory.make(), ScanCounts::default()),
            |state: &mut (F::Set, ScanCounts), chunk: &[u8]| {
                let (set, counts) = state;
                for_each_token(chunk, &config.rules, counts, |token| set.insert(token));
            },
        )
        .with_context(|| format!("Error reading file: {}", path.display()))?;

    let mut merged = factory.make();
    let mut total = ScanCounts::default();
    for (set, counts) in states {
        merged.absorb(set);
        total += counts;
    }
    debug!(path = %path.display(), tokens = total.tokens_emitted, "built set from chunks");
    Ok((merged, total))
}

fn in_every<S: MembershipSet>(sets: &[S], token: &[u8]) -> bool {
    sets.iter().all(|set| set.contains(token))
}

fn missing_from_some<S: MembershipSet>(sets: &[S], token: &[u8]) -> bool {
    sets.iter().any(|set| !set.contains(token))
}

/// The second pass of `Intersection` and `Difference`: rescan every input,
/// writing each `wanted` token the first time it's seen. The `echoed` set
/// remembers what's been written.
fn emit_wanted<F: SetFactory>(
    config: &Config,
    factory: &F,
    sets: &[F::Set],
    wanted: fn(&[F::Set], &[u8]) -> bool,
    out: &mut impl TokenSink,
    stats: &mut RunStats,
) -> Result<()> {
    let mut echoed = factory.make();
    for path in &config.inputs {
        let counts = scan_input(path, config, |token| {
            if echoed.contains(token) || !wanted(sets, token) {
                return Ok(());
            }
            out.write_token(token)?;
            echoed.insert(token);
            stats.tokens_written += 1;
            Ok(())
        })?;
        stats.scan += counts;
    }
    Ok(())
}

#[allow(clippy::pedantic)]
#[cfg(test)]
mod test {
    use super::*;
    use crate::emitter::TokenRules;
    use crate::io::{Discard, LineSink};
    use assert_fs::{prelude::*, TempDir};
    use itertools::Itertools;
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    use self::OpName::*;

    fn write_operands(temp_dir: &TempDir, operands: &[&[u8]]) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for operand in operands {
            let name = format!("operand{}", paths.len());
            let op = temp_dir.child(name);
            op.write_binary(operand).unwrap();
            paths.push(PathBuf::from(op.path()));
        }
        paths
    }

    fn run(config: &Config) -> String {
        let mut out = LineSink::new(Vec::new());
        calculate(config, &mut out).unwrap();
        String::from_utf8(out.into_inner()).unwrap()
    }

    fn calc_with(operation: OpName, operands: &[&[u8]], adjust: impl Fn(&mut Config)) -> String {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::new(operation, write_operands(&temp_dir, operands));
        adjust(&mut config);
        run(&config)
    }

    fn strategies() -> Vec<BuildStrategy> {
        vec![
            BuildStrategy::Sequential,
            BuildStrategy::PerInput,
            BuildStrategy::PerChunk { chunk_size: 3, workers: 3 },
        ]
    }

    fn backends() -> Vec<Backend> {
        vec![
            Backend::Exact,
            Backend::Bloom { sizing: Sizing::Tokens(10_000), filters: 3 },
            Backend::Bloom { sizing: Sizing::CountLines, filters: 2 },
        ]
    }

    // Every backend and build strategy should agree on small inputs
    fn calc(operation: OpName, operands: &[&[u8]]) -> String {
        let expected = calc_with(operation, operands, |_| {});
        for (strategy, backend) in strategies().into_iter().cartesian_product(backends()) {
            let got = calc_with(operation, operands, |c| {
                c.strategy = strategy;
                c.backend = backend;
                c.buffer_size = 4;
            });
            assert_eq!(got, expected, "for {operation:?} with {strategy:?} and {backend:?}");
        }
        expected
    }

    #[test]
    fn given_a_single_argument_union_and_intersection_return_its_lines_in_order_without_dups() {
        let arg: Vec<&[u8]> = vec![b"xxx\nabc\nxxx\nyyy\nxxx\nabc\n"];
        let uniq = "xxx\nabc\nyyy\n";
        assert_eq!(calc(Union, &arg), uniq);
        assert_eq!(calc(Intersection, &arg), uniq);
        assert_eq!(calc(Difference, &arg), "");
    }

    #[test]
    fn results_for_each_operation() {
        let args: Vec<&[u8]> = vec![
            b"xyz\nabc\nxy\nxz\nx\n", // Strings containing "x" (and "abc")
            b"xyz\nabc\nxy\nyz\ny\n", // Strings containing "y" (and "abc")
            b"xyz\nabc\nxz\nyz\nz\n", // Strings containing "z" (and "abc")
        ];
        assert_eq!(calc(Union, &args), "xyz\nabc\nxy\nxz\nx\nyz\ny\nz\n", "for {Union:?}");
        assert_eq!(calc(Intersection, &args), "xyz\nabc\n", "for {Intersection:?}");
        assert_eq!(calc(Difference, &args), "xy\nxz\nx\nyz\ny\nz\n", "for {Difference:?}");
    }

    #[test]
    fn cat_dog_bird_fish() {
        let args: Vec<&[u8]> = vec![b"cat\ndog\nbird\n", b"dog\nbird\nfish\n"];
        assert_eq!(calc(Union, &args), "cat\ndog\nbird\nfish\n");
        assert_eq!(calc(Intersection, &args), "dog\nbird\n");
        assert_eq!(calc(Difference, &args), "cat\nfish\n");
    }

    #[test]
    fn every_strategy_drops_a_final_carriage_return() {
        let args: Vec<&[u8]> = vec![b"x\ny\r", b"y\nx\n"];
        assert_eq!(calc(Intersection, &args), "x\ny\n");
        assert_eq!(calc(Difference, &args), "");
    }

    #[test]
    fn difference_writes_a_token_once_even_when_missing_from_several_files() {
        let args: Vec<&[u8]> = vec![b"solo\nall\n", b"all\n", b"all\n", b"all\nsolo\n"];
        assert_eq!(calc(Difference, &args), "solo\n");
    }

    #[test]
    fn token_rules_apply_in_both_passes() {
        let args: Vec<&[u8]> = vec![b" a1 \nb2\na3\n", b"a3\n  a1\na4\n"];
        let rules = TokenRules::new(true, Some("^a"), Some(r"a(\d+)")).unwrap();
        let with_rules = |c: &mut Config| c.rules = rules.clone();
        assert_eq!(calc_with(Union, &args, with_rules), "1\n3\n4\n");
        assert_eq!(calc_with(Intersection, &args, with_rules), "1\n3\n");
        assert_eq!(calc_with(Difference, &args, with_rules), "4\n");
    }

    #[test]
    fn counted_union_reports_occurrences() {
        let args: Vec<&[u8]> = vec![b"b\na\nb\n", b"c\nb\n"];
        let got = calc_with(Union, &args, |c| c.count = true);
        assert_eq!(got, "3: b\n1: a\n1: c\n");
    }

    #[test]
    fn union_is_idempotent() {
        let args: Vec<&[u8]> = vec![b"q\nw\ne\nq\n", b"r\nw\nt\n"];
        assert_eq!(calc(Union, &args), calc(Union, &args));
    }

    #[test]
    fn stats_cover_both_passes() {
        let temp_dir = TempDir::new().unwrap();
        let paths = write_operands(&temp_dir, &[b"a\nb\n", b"b\nc\n"]);
        let stats = calculate(&Config::new(Intersection, paths), &mut Discard).unwrap();
        assert_eq!(stats.scan.lines_scanned, 8);
        assert_eq!(stats.scan.tokens_emitted, 8);
        assert_eq!(stats.tokens_written, 1);
        assert_eq!(stats.bytes_to_process, 8);
        assert_eq!(stats.estimated_tokens, None);
    }

    #[test]
    fn estimating_counts_input_lines() {
        let temp_dir = TempDir::new().unwrap();
        let paths = write_operands(&temp_dir, &[b"a\nb\n", b"b\nc\nd\n"]);
        let mut config = Config::new(Union, paths);
        config.backend = Backend::Bloom { sizing: Sizing::CountLines, filters: 2 };
        let stats = calculate(&config, &mut Discard).unwrap();
        assert_eq!(stats.estimated_tokens, Some(5));
        assert_eq!(stats.tokens_written, 4);
    }

    #[test]
    fn a_missing_input_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let mut paths = write_operands(&temp_dir, &[b"a\n"]);
        paths.push(temp_dir.path().join("missing"));
        for op in [Union, Intersection, Difference] {
            let err = calculate(&Config::new(op, paths.clone()), &mut Discard).unwrap_err();
            assert!(format!("{err:#}").contains("missing"), "{err:#}");
        }
    }

    struct FailingSink {
        written: Vec<u8>,
        flushed: bool,
    }
    impl TokenSink for FailingSink {
        fn write_token(&mut self, token: &[u8]) -> Result<()> {
            if token == b"boom" {
                anyhow::bail!("write failed");
            }
            self.written.extend_from_slice(token);
            Ok(())
        }
        fn write_counted(&mut self, _count: u32, token: &[u8]) -> Result<()> {
            self.write_token(token)
        }
        fn flush(&mut self) -> Result<()> {
            self.flushed = true;
            Ok(())
        }
    }

    #[test]
    fn output_is_flushed_when_a_run_fails() {
        let temp_dir = TempDir::new().unwrap();
        let paths = write_operands(&temp_dir, &[b"ok\nboom\nlater\n"]);
        let mut sink = FailingSink { written: Vec::new(), flushed: false };
        assert!(calculate(&Config::new(Union, paths), &mut sink).is_err());
        assert!(sink.flushed);
        assert_eq!(sink.written, b"ok");
    }

    fn tokens(output: &str) -> BTreeSet<String> {
        output.lines().map(String::from).collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]
        #[test]
        fn intersection_and_difference_partition_the_union(
            a in proptest::collection::vec("[a-e]{1,2}", 0..20),
            b in proptest::collection::vec("[a-e]{1,2}", 0..20),
        ) {
            let a = a.iter().map(|l| format!("{l}\n")).collect::<String>();
            let b = b.iter().map(|l| format!("{l}\n")).collect::<String>();
            let args: Vec<&[u8]> = vec![a.as_bytes(), b.as_bytes()];
            let union = tokens(&calc_with(Union, &args, |_| {}));
            let intersection = tokens(&calc_with(Intersection, &args, |_| {}));
            let difference = tokens(&calc_with(Difference, &args, |_| {}));
            prop_assert!(intersection.is_disjoint(&difference));
            let both: BTreeSet<String> = intersection.union(&difference).cloned().collect();
            prop_assert_eq!(both, union);
        }
    }
}
