use anyhow::Result;
use clap::Parser;
use std::io;
use tracing::Level;
use tt::args::{print_usage, CliArgs, Config};
use tt::io::{Discard, LineSink};
use tt::operations::calculate;

fn main() -> Result<()> {
    let args = CliArgs::parse();

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_target(false)
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::WARN })
        .init();

    if args.op().is_none() {
        print_usage()?;
        std::process::exit(1);
    }

    let discard = args.null;
    let config = Config::try_from(args)?;

    let stats = if discard {
        calculate(&config, &mut Discard)?
    } else {
        let stdout = io::BufWriter::with_capacity(config.buffer_size, io::stdout().lock());
        calculate(&config, &mut LineSink::new(stdout))?
    };

    eprint!("{}", stats.report(config.rules.has_match_pattern()));
    Ok(())
}
