//! # Bipbuf
//!
//! Bipbuf is a Single Producer Single Consumer, lockless, no_std, thread safe,
//! contiguous-reservation circular buffer, based on [BipBuffers].
//!
//! [BipBuffers]: https://www.codeproject.com/Articles/3479/%2FArticles%2F3479%2FThe-Bip-Buffer-The-Circular-Buffer-with-a-Twist
//!
//! While classic ring buffers move data between two threads (or between an
//! interrupt and main code) one element at a time, a bip buffer hands out a
//! *contiguous* block of its own storage on both sides: the producer reserves
//! a writable span, fills it in place, and commits it; the consumer reserves a
//! readable span, drains it in place, and commits the part it consumed. No
//! element is ever copied through an intermediate location, which makes the
//! structure a good fit for DMA engines, packet assembly, and other
//! latency-sensitive block I/O.
//!
//! Unlike a byte queue, `bipbuf` stores any element type `T`. Elements are
//! moved into the buffer through a [`WriteGrant`], handed back out through a
//! [`ReadGrant`], and dropped exactly once.
//!
//! ```rust
//! use bipbuf::BipBuffer;
//!
//! // Create and split a new buffer of 6 elements
//! let buffer: BipBuffer<u32, 6> = BipBuffer::new();
//! let (mut prod, mut cons) = buffer.try_split().unwrap();
//!
//! // Reserve up to 4 slots, fill 3 of them, publish
//! let mut wgr = prod.write_reserve(4);
//! assert_eq!(wgr.capacity(), 4);
//! wgr.push(10).unwrap();
//! wgr.push(20).unwrap();
//! wgr.push(30).unwrap();
//! prod.write_commit(wgr);
//!
//! // Drain the committed elements in place
//! let rgr = cons.read_reserve(usize::MAX);
//! assert_eq!(&*rgr, &[10, 20, 30]);
//! cons.read_commit(rgr);
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(missing_docs)]

mod bipbuffer;
mod ranges;

pub use crate::bipbuffer::{
    BipBuffer, BipReader, BipWriter, Consumer, Producer, ReadGrant, WriteGrant,
};

use core::result::Result as CoreResult;

/// Result type used by the `bipbuf` interfaces
pub type Result<T> = CoreResult<T, Error>;

/// Error type used by the `bipbuf` interfaces
///
/// Note that running out of contiguous space or data is *not* an error:
/// [`Producer::write_reserve`] and [`Consumer::read_reserve`] report it by
/// returning a short or empty grant, and the caller retries later.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt_0_3", derive(defmt::Format))]
pub enum Error {
    /// Unable to split the buffer, as it has already been split
    AlreadySplit,
}
