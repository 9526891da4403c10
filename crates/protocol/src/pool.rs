//! Bounded pools of ready-to-use coders.
//!
//! A pool is pre-filled at construction and never grows past its capacity:
//! `get` falls back to a fresh instance when the reservoir is empty, and
//! `put` silently drops the instance when it is full. Since coders keep
//! their scratch buffers warm, cycling through the pool keeps steady-state
//! allocation on hot paths near zero.

use std::io::{Read, Write};

use parking_lot::Mutex;

use crate::codec::{CodecError, Decoder, Encoder, Format};
use crate::message::Message;

/// Reservoir capacity used when a pool is built with size zero.
pub const DEFAULT_POOL_SIZE: usize = 100;

/// Initial buffer capacity for [`EncoderPool::encode_bytes`] when built
/// with size zero.
pub const DEFAULT_INITIAL_BUFFER_SIZE: usize = 200;

/// A bounded reservoir of [`Encoder`] instances for one format.
pub struct EncoderPool {
    pool: Mutex<Vec<Encoder>>,
    capacity: usize,
    initial_buffer_size: usize,
    format: Format,
}

impl EncoderPool {
    /// Builds a pre-filled pool. Zero sizes select the defaults.
    pub fn new(pool_size: usize, initial_buffer_size: usize, format: Format) -> Self {
        let capacity = if pool_size == 0 { DEFAULT_POOL_SIZE } else { pool_size };
        let initial_buffer_size = if initial_buffer_size == 0 {
            DEFAULT_INITIAL_BUFFER_SIZE
        } else {
            initial_buffer_size
        };

        let instances = (0..capacity).map(|_| Encoder::new(format)).collect();
        Self {
            pool: Mutex::new(instances),
            capacity,
            initial_buffer_size,
            format,
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Takes an encoder from the reservoir, allocating a fresh one when it
    /// is empty.
    pub fn get(&self) -> Encoder {
        self.pool
            .lock()
            .pop()
            .unwrap_or_else(|| Encoder::new(self.format))
    }

    /// Offers an encoder back. Dropped without blocking when the reservoir
    /// is already at capacity.
    pub fn put(&self, encoder: Encoder) {
        let mut pool = self.pool.lock();
        if pool.len() < self.capacity {
            pool.push(encoder);
        }
    }

    /// Encodes to a stream with a borrowed encoder.
    pub fn encode_to<W: Write>(&self, destination: W, message: &Message) -> Result<(), CodecError> {
        let mut encoder = self.get();
        let result = encoder.encode_to(destination, message);
        self.put(encoder);
        result
    }

    /// Encodes to a fresh byte buffer sized at the pool's initial capacity.
    pub fn encode_bytes(&self, message: &Message) -> Result<Vec<u8>, CodecError> {
        let mut data = Vec::with_capacity(self.initial_buffer_size);
        let mut encoder = self.get();
        let result = encoder.encode_to(&mut data, message);
        self.put(encoder);
        result.map(|()| data)
    }

    #[cfg(test)]
    fn resident(&self) -> usize {
        self.pool.lock().len()
    }
}

/// A bounded reservoir of [`Decoder`] instances for one format.
pub struct DecoderPool {
    pool: Mutex<Vec<Decoder>>,
    capacity: usize,
    format: Format,
}

impl DecoderPool {
    /// Builds a pre-filled pool. A zero size selects the default.
    pub fn new(pool_size: usize, format: Format) -> Self {
        let capacity = if pool_size == 0 { DEFAULT_POOL_SIZE } else { pool_size };
        let instances = (0..capacity).map(|_| Decoder::new(format)).collect();
        Self {
            pool: Mutex::new(instances),
            capacity,
            format,
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Takes a decoder from the reservoir, allocating a fresh one when it
    /// is empty.
    pub fn get(&self) -> Decoder {
        self.pool
            .lock()
            .pop()
            .unwrap_or_else(|| Decoder::new(self.format))
    }

    /// Offers a decoder back. Dropped without blocking when the reservoir
    /// is already at capacity.
    pub fn put(&self, decoder: Decoder) {
        let mut pool = self.pool.lock();
        if pool.len() < self.capacity {
            pool.push(decoder);
        }
    }

    /// Decodes from a stream with a borrowed decoder.
    pub fn decode_from<R: Read>(&self, source: R) -> Result<Message, CodecError> {
        let mut decoder = self.get();
        let result = decoder.decode_from(source);
        self.put(decoder);
        result
    }

    /// Decodes from a byte slice with a borrowed decoder.
    pub fn decode_bytes(&self, source: &[u8]) -> Result<Message, CodecError> {
        let mut decoder = self.get();
        let result = decoder.decode(source);
        self.put(decoder);
        result
    }

    #[cfg(test)]
    fn resident(&self) -> usize {
        self.pool.lock().len()
    }
}
