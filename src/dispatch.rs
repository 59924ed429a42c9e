//! The `Dispatcher` splits one input into chunks of whole lines and feeds
//! them, through a bounded queue, to a pool of worker threads.
//!
//! Workers take chunks in whatever order they get to them, so the processing
//! function must not care which chunk comes first.
use anyhow::{bail, Result};
use crossbeam_channel::{bounded, Sender};
use memchr::memchr;
use std::io::{BufRead, BufReader, Read};
use std::thread;
use tracing::debug;

/// The number of chunks that may wait in the queue before the reader blocks
pub const QUEUE_CAPACITY: usize = 256;

/// A run of complete lines. Every chunk but possibly the last of an input
/// ends with a newline.
pub type Chunk = Vec<u8>;

/// Settings for a chunked pass over one input
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    chunk_size: usize,
    buffer_size: usize,
    workers: usize,
}

impl Dispatcher {
    /// Reads `buffer_size` bytes at a time and cuts them into chunks of about
    /// `chunk_size` bytes, one worker per CPU.
    #[must_use]
    pub fn new(chunk_size: usize, buffer_size: usize) -> Self {
        Dispatcher {
            chunk_size: chunk_size.max(1),
            buffer_size: buffer_size.max(1),
            workers: num_cpus::get(),
        }
    }

    /// Use `workers` worker threads instead of one per CPU
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Calls `process` on every chunk of `reader`, from the worker threads.
    /// Returns once every chunk has been processed.
    pub fn run<R, P>(&self, reader: R, process: P) -> Result<()>
    where
        R: Read,
        P: Fn(&[u8]) + Sync,
    {
        self.run_with_state(reader, || (), |_, chunk| process(chunk))?;
        Ok(())
    }

    /// Like `run`, but each worker owns a state value, made by `init`, that
    /// `process` may update. Returns the workers' states once every chunk has
    /// been processed, so the caller can merge them.
    ///
    /// A read error stops the dispatch. The workers still finish the chunks
    /// already queued before the error is returned.
    pub fn run_with_state<R, S, I, P>(&self, reader: R, init: I, process: P) -> Result<Vec<S>>
    where
        R: Read,
        S: Send,
        I: Fn() -> S + Sync,
        P: Fn(&mut S, &[u8]) + Sync,
    {
        let (sender, receiver) = bounded::<Chunk>(QUEUE_CAPACITY);
        thread::scope(|scope| {
            let handles: Vec<_> = (0..self.workers)
                .map(|_| {
                    let receiver = receiver.clone();
                    let (init, process) = (&init, &process);
                    scope.spawn(move || {
                        let mut state = init();
                        for chunk in receiver {
                            process(&mut state, &chunk);
                        }
                        state
                    })
                })
                .collect();
            drop(receiver);

            let produced = self.produce(reader, &sender);
            // Closing the queue lets the workers drain it and exit
            drop(sender);

            let states = handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect();
            let chunks = produced?;
            debug!(chunks, workers = self.workers, "chunked pass complete");
            Ok(states)
        })
    }

    /// Reads `reader` to the end, sending its chunks to `sender`. Returns the
    /// number of chunks sent.
    fn produce<R: Read>(&self, reader: R, sender: &Sender<Chunk>) -> Result<usize> {
        let mut reader = BufReader::with_capacity(self.buffer_size, reader);
        let mut chunks = 0;
        loop {
            let mut block = Vec::with_capacity(self.buffer_size);
            (&mut reader).take(self.buffer_size as u64).read_to_end(&mut block)?;
            if block.is_empty() {
                return Ok(chunks);
            }
            // Read on to a newline so no line spans two blocks
            if block.last() != Some(&b'\n') {
                reader.read_until(b'\n', &mut block)?;
            }
            let mut rest = &block[..];
            while !rest.is_empty() {
                let (chunk, tail) = rest.split_at(chunk_end(rest, self.chunk_size));
                if sender.send(chunk.to_vec()).is_err() {
                    bail!("every chunk worker has exited");
                }
                chunks += 1;
                rest = tail;
            }
        }
    }
}

/// The length of the chunk at the start of `buf`: at least `chunk_size`
/// bytes (or all of `buf`), extended to just past the next newline.
fn chunk_end(buf: &[u8], chunk_size: usize) -> usize {
    if buf.len() <= chunk_size || buf[chunk_size - 1] == b'\n' {
        return buf.len().min(chunk_size);
    }
    match memchr(b'\n', &buf[chunk_size..]) {
        Some(i) => chunk_size + i + 1,
        None => buf.len(),
    }
}
