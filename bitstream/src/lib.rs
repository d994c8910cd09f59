//! Low-level bit packing primitives for the nextroute protocol.
//!
//! This crate provides [`BitWriter`] and [`BitReader`] for bit-level encoding
//! and decoding, and the [`Stream`] trait which lets one `serialize` function
//! drive both directions through [`WriteStream`] and [`ReadStream`].
//!
//! # Design Principles
//!
//! - **No unsafe code** - Safety is paramount.
//! - **Bounded operations** - All reads/writes are bounds-checked against a fixed capacity.
//! - **No domain knowledge** - This crate knows nothing about sessions, relays, or routes.
//! - **Explicit errors** - All failures return structured errors, never panic.
//!
//! # Wire layout
//!
//! Bits are packed least-significant first into 32-bit words stored
//! little-endian. The final partial word is truncated to whole bytes.
//!
//! # Example
//!
//! ```
//! use bitstream::{ReadStream, Stream, WriteStream};
//!
//! let mut stream = WriteStream::with_capacity(16);
//! let mut flag = true;
//! let mut count = 42;
//! stream.serialize_bool(&mut flag);
//! stream.serialize_integer(&mut count, 0, 100);
//! let bytes = stream.finish().unwrap();
//!
//! let mut stream = ReadStream::new(&bytes);
//! let mut flag = false;
//! let mut count = 0;
//! stream.serialize_bool(&mut flag);
//! stream.serialize_integer(&mut count, 0, 100);
//! assert!(stream.result().is_ok());
//! assert!(flag);
//! assert_eq!(count, 42);
//! ```

mod error;
mod reader;
mod stream;
mod writer;

pub use error::{BitError, BitResult};
pub use reader::BitReader;
pub use stream::{
    bits_required, ReadStream, Stream, WriteStream, ADDRESS_IPV4, ADDRESS_IPV6, ADDRESS_NONE,
};
pub use writer::BitWriter;
