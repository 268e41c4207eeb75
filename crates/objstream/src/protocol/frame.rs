//! Delimiter framing for JSON objects.
//!
//! Each frame is one compact JSON document followed by a single delimiter
//! byte:
//!
//! ```text
//! [UTF-8 JSON bytes][delimiter]
//! ```
//!
//! With `Framing::Sentinel` the delimiter is an ASCII control byte, which
//! compact JSON always escapes, so it can never occur inside a frame. There
//! is no length prefix; the reader scans for the delimiter and enforces a
//! maximum frame size while doing so.

use super::pool::BufferPool;
use crate::config::{Framing, StreamDefaults};
use crate::{Result, StreamError};
use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Serialize `value` into `buf` as one delimited frame.
pub fn encode_frame<T: Serialize + ?Sized>(
    value: &T,
    framing: Framing,
    buf: &mut BytesMut,
) -> Result<()> {
    serde_json::to_writer(buf.writer(), value).map_err(StreamError::Encode)?;
    buf.put_u8(framing.delimiter());
    Ok(())
}

/// Deserialize one frame body (without its delimiter).
pub fn decode_frame<T: DeserializeOwned>(frame: &[u8]) -> Result<T> {
    serde_json::from_slice(frame).map_err(StreamError::Decode)
}

/// Pending bytes read from a connection that have not formed a frame yet.
///
/// The buffer is tied to one connection generation; bytes left over from an
/// older connection are discarded before reading from a newer one.
#[derive(Debug)]
pub struct FrameBuffer {
    buffer: BytesMut,
    framing: Framing,
    max_frame_size: usize,
    /// Bytes at the front of `buffer` already searched for the delimiter.
    scanned: usize,
    /// Skipping the tail of an oversized frame up to its delimiter.
    discarding: bool,
    generation: u64,
    pool: Arc<BufferPool>,
}

impl FrameBuffer {
    pub fn new(framing: Framing, max_frame_size: usize, pool: Arc<BufferPool>) -> Self {
        Self {
            buffer: pool.acquire(StreamDefaults::READ_CHUNK_SIZE),
            framing,
            max_frame_size,
            scanned: 0,
            discarding: false,
            generation: 0,
            pool,
        }
    }

    /// Number of bytes waiting for a delimiter.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Bind the buffer to a connection generation, dropping stale bytes.
    pub fn attach(&mut self, generation: u64) {
        if self.generation != generation {
            if !self.buffer.is_empty() {
                debug!(
                    "Dropping {} pending bytes from connection #{}",
                    self.buffer.len(),
                    self.generation
                );
            }
            self.reset();
            self.generation = generation;
        }
    }

    /// Discard all pending bytes.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.discarding = false;
    }

    /// Space to read the next chunk of socket data into.
    pub fn read_buf(&mut self) -> &mut BytesMut {
        self.buffer.reserve(StreamDefaults::READ_CHUNK_SIZE);
        &mut self.buffer
    }

    /// Extract the next complete frame body, if one is buffered.
    ///
    /// Fails with [`StreamError::FrameTooLarge`] as soon as the pending frame
    /// is known to exceed the maximum; the pending bytes are then dropped and
    /// the rest of that frame is skipped when it arrives.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        let delimiter = self.framing.delimiter();

        if self.discarding {
            match find_delimiter(delimiter, &self.buffer) {
                Some(pos) => {
                    let _ = self.buffer.split_to(pos + 1);
                    self.discarding = false;
                    self.scanned = 0;
                }
                None => {
                    self.buffer.clear();
                    return Ok(None);
                }
            }
        }

        let Some(offset) = find_delimiter(delimiter, &self.buffer[self.scanned..]) else {
            self.scanned = self.buffer.len();
            if self.buffer.len() > self.max_frame_size {
                let size = self.buffer.len();
                self.buffer.clear();
                self.scanned = 0;
                self.discarding = true;
                return Err(StreamError::FrameTooLarge {
                    size,
                    max: self.max_frame_size,
                });
            }
            return Ok(None);
        };

        let end = self.scanned + offset;
        let mut frame = self.buffer.split_to(end + 1);
        frame.truncate(end);
        self.scanned = 0;

        if frame.len() > self.max_frame_size {
            return Err(StreamError::FrameTooLarge {
                size: frame.len(),
                max: self.max_frame_size,
            });
        }

        if self.framing == Framing::Line && frame.last() == Some(&b'\r') {
            frame.truncate(frame.len() - 1);
        }

        self.recycle_if_drained();
        Ok(Some(frame.freeze()))
    }

    /// Swap a grown, now-empty buffer for a pooled one of normal size.
    fn recycle_if_drained(&mut self) {
        if self.buffer.is_empty() && self.buffer.capacity() > 4 * StreamDefaults::READ_CHUNK_SIZE {
            let fresh = self.pool.acquire(StreamDefaults::READ_CHUNK_SIZE);
            let grown = std::mem::replace(&mut self.buffer, fresh);
            self.pool.release(grown);
        }
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buffer));
    }
}

fn find_delimiter(delimiter: u8, haystack: &[u8]) -> Option<usize> {
    haystack.iter().position(|&b| b == delimiter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Transfer {
        to: String,
        amount: u64,
        memo: Option<String>,
    }

    fn buffer(framing: Framing, max: usize) -> FrameBuffer {
        FrameBuffer::new(framing, max, Arc::new(BufferPool::new()))
    }

    #[test]
    fn test_encode_appends_sentinel() {
        let mut buf = BytesMut::new();
        encode_frame(&serde_json::json!({"a": 1}), Framing::default(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"{\"a\":1}\0");
    }

    #[test]
    fn test_round_trip_through_buffer() {
        let value = Transfer {
            to: "line\nbreak \u{0} and nul".to_string(),
            amount: 42,
            memo: None,
        };

        for framing in [Framing::default(), Framing::Line, Framing::Sentinel(0x1e)] {
            let mut wire = BytesMut::new();
            encode_frame(&value, framing, &mut wire).unwrap();

            let mut fb = buffer(framing, 1024);
            fb.read_buf().extend_from_slice(&wire);
            let frame = fb.next_frame().unwrap().expect("complete frame");
            let decoded: Transfer = decode_frame(&frame).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(fb.pending(), 0);
        }
    }

    #[test]
    fn test_partial_frame_waits_for_more_data() {
        let mut fb = buffer(Framing::default(), 1024);
        fb.read_buf().extend_from_slice(b"{\"amount\":");
        assert!(fb.next_frame().unwrap().is_none());

        fb.read_buf().extend_from_slice(b"1}\0{\"next\"");
        assert_eq!(&fb.next_frame().unwrap().unwrap()[..], b"{\"amount\":1}");
        // Residual bytes stay for the next read
        assert_eq!(fb.pending(), 7);
        assert!(fb.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_multiple_frames_in_one_chunk() {
        let mut fb = buffer(Framing::default(), 1024);
        fb.read_buf().extend_from_slice(b"1\0\"two\"\0[3]\0");
        assert_eq!(&fb.next_frame().unwrap().unwrap()[..], b"1");
        assert_eq!(&fb.next_frame().unwrap().unwrap()[..], b"\"two\"");
        assert_eq!(&fb.next_frame().unwrap().unwrap()[..], b"[3]");
        assert!(fb.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_line_framing_strips_carriage_return() {
        let mut fb = buffer(Framing::Line, 1024);
        fb.read_buf().extend_from_slice(b"{\"id\":1}\r\n");
        assert_eq!(&fb.next_frame().unwrap().unwrap()[..], b"{\"id\":1}");
    }

    #[test]
    fn test_frame_at_max_size_is_accepted() {
        let mut fb = buffer(Framing::default(), 8);
        fb.read_buf().extend_from_slice(b"\"123456\"\0");
        assert_eq!(fb.next_frame().unwrap().unwrap().len(), 8);
    }

    #[test]
    fn test_oversized_unterminated_frame_fails() {
        let mut fb = buffer(Framing::default(), 8);
        fb.read_buf().extend_from_slice(b"\"123456789");

        match fb.next_frame() {
            Err(StreamError::FrameTooLarge { size, max }) => {
                assert_eq!(size, 10);
                assert_eq!(max, 8);
            }
            other => panic!("Expected FrameTooLarge, got: {:?}", other),
        }
        assert_eq!(fb.pending(), 0);

        // The tail of the oversized frame is skipped, the next frame survives.
        fb.read_buf().extend_from_slice(b"0\"\0{}\0");
        assert_eq!(&fb.next_frame().unwrap().unwrap()[..], b"{}");
    }

    #[test]
    fn test_oversized_terminated_frame_fails_without_partial_object() {
        let mut fb = buffer(Framing::default(), 4);
        fb.read_buf().extend_from_slice(b"[1,2,3]\0[]\0");

        assert!(matches!(
            fb.next_frame(),
            Err(StreamError::FrameTooLarge { size: 7, max: 4 })
        ));
        assert_eq!(&fb.next_frame().unwrap().unwrap()[..], b"[]");
    }

    #[test]
    fn test_attach_new_generation_drops_stale_bytes() {
        let mut fb = buffer(Framing::default(), 1024);
        fb.attach(1);
        fb.read_buf().extend_from_slice(b"{\"half\":");
        fb.attach(1);
        assert_eq!(fb.pending(), 8);

        fb.attach(2);
        assert_eq!(fb.pending(), 0);
        assert_eq!(fb.generation(), 2);
    }

    #[test]
    fn test_find_delimiter_returns_first_match() {
        assert_eq!(find_delimiter(0x00, b"{}\0[]\0"), Some(2));
        assert_eq!(find_delimiter(b'\n', b"{}\0"), None);
        assert_eq!(find_delimiter(0x00, b""), None);
    }

    #[test]
    fn test_decode_error_is_reported() {
        let result: Result<Transfer> = decode_frame(b"{\"to\":");
        assert!(matches!(result, Err(StreamError::Decode(_))));
    }

    #[test]
    fn test_drained_large_buffer_returns_to_pool() {
        let pool = Arc::new(BufferPool::new());
        let mut fb = FrameBuffer::new(Framing::default(), 1 << 20, pool.clone());

        let big = vec![b'1'; 600 * 1024];
        fb.read_buf().extend_from_slice(&big);
        fb.read_buf().extend_from_slice(b"\0");
        assert_eq!(fb.next_frame().unwrap().unwrap().len(), big.len());

        drop(fb);
        assert!(pool.idle() >= 1);
    }
}
