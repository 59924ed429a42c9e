//! The `calculate` function in `operations` is the kernel of the application.
//! The `args` module parses the command line into a `Config`, and the `io`
//! module hides I/O details.
//!
//! Each input file is treated as a set of tokens, one per line. The
//! `emitter` module turns lines into tokens, the `set` module remembers which
//! tokens have been seen (exactly, or with bloom filters when the inputs are
//! too big to remember exactly), and the `dispatch` module spreads the
//! work of reading one big file over several threads.
//!
//! Current Limitations:
//! * A "line" is zero or more non-newline bytes followed by a newline (or the
//!   end of the file). UTF-16 files are translated to UTF-8 on input, but
//!   output is always UTF-8.
//! * With bloom filters, a token can be wrongly reported as present in a
//!   file. Union and difference may then leave out a token they should
//!   write, and intersection may write one it shouldn't. A token is never
//!   reported missing from a file that contains it.

#![cfg_attr(debug_assertions, allow(dead_code, unused_imports))]
#![deny(unused_must_use)]
#![deny(clippy::all)]
#![allow(clippy::needless_return)]
#![deny(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![deny(missing_docs)]

pub mod args;
mod bloom;
pub mod dispatch;
pub mod emitter;
pub mod io;
pub mod operations;
pub mod set;
pub mod stats;
