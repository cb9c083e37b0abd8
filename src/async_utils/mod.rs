//! Asynchronous utilities for use with Tokio.
//!
//! Some of this stuff is frankly Rust magic, but it lets the rest of the
//! program treat CPU-heavy page extraction and file listings as ordinary
//! async streams.

use std::pin::Pin;

use futures::Stream;

pub mod blocking_iter_streams;
pub mod io;
pub mod size_hint;

/// A type alias for a boxed future. This is used to make it easier to work with
/// with complex futures.
pub type BoxedFuture<Output> = Pin<Box<dyn Future<Output = Output> + Send>>;

/// A type alias for a boxed stream. This is used to make it easier to work
/// streams that return complex types.
pub type BoxedStream<Item> = Pin<Box<dyn Stream<Item = Item> + Send>>;
