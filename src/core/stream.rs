use super::base_stream::BaseStream;
use super::error::{PDFError, PDFResult};
use std::sync::Arc;

/// An in-memory byte cursor over the document.
///
/// The underlying data is stored in an Arc, so windows opened by
/// concurrent requests share the bytes without cloning them.
#[derive(Clone)]
pub struct Stream {
    /// The underlying byte buffer (shared via Arc)
    bytes: Arc<Vec<u8>>,
    /// Current read position
    pos: usize,
    /// Starting offset in the buffer
    start: usize,
    /// Length of accessible data from start
    length: usize,
}

impl Stream {
    /// Creates a new Stream from a byte vector.
    ///
    /// A `length` of zero means "everything after `start`".
    pub fn new(bytes: Vec<u8>, start: usize, length: usize) -> Self {
        Self::from_arc(Arc::new(bytes), start, length)
    }

    /// Creates a Stream over an already shared buffer.
    pub fn from_arc(bytes: Arc<Vec<u8>>, start: usize, length: usize) -> Self {
        let start = start.min(bytes.len());
        let available = bytes.len() - start;
        let length = if length == 0 { available } else { length.min(available) };

        Stream {
            bytes,
            pos: start,
            start,
            length,
        }
    }

    /// Creates a new Stream from a byte vector with default parameters.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::new(bytes, 0, 0)
    }

    /// Returns the shared underlying buffer.
    pub fn shared_bytes(&self) -> Arc<Vec<u8>> {
        Arc::clone(&self.bytes)
    }

    /// Returns the readable window of the underlying buffer.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[self.start..self.start + self.length]
    }
}

impl BaseStream for Stream {
    fn length(&self) -> usize {
        self.length
    }

    fn is_empty(&self) -> bool {
        self.length == 0
    }

    fn start(&self) -> usize {
        self.start
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn set_pos(&mut self, pos: usize) -> PDFResult<()> {
        if pos < self.start || pos > self.start + self.length {
            return Err(PDFError::InvalidPosition {
                pos,
                length: self.length,
            });
        }
        self.pos = pos;
        Ok(())
    }

    fn get_byte(&mut self) -> PDFResult<u8> {
        if self.pos >= self.start + self.length {
            return Err(PDFError::UnexpectedEndOfStream);
        }
        let byte = self.bytes[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    fn get_bytes(&mut self, length: usize) -> PDFResult<Vec<u8>> {
        let end_pos = self.pos + length;
        if end_pos > self.start + self.length {
            return Err(PDFError::UnexpectedEndOfStream);
        }

        let bytes = self.bytes[self.pos..end_pos].to_vec();
        self.pos = end_pos;
        Ok(bytes)
    }

    fn get_byte_range(&self, begin: usize, end: usize) -> PDFResult<Vec<u8>> {
        if begin > end || begin < self.start || end > self.start + self.length {
            return Err(PDFError::InvalidByteRange { begin, end });
        }
        Ok(self.bytes[begin..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_creation() {
        let data = vec![1, 2, 3, 4, 5];
        let stream = Stream::from_bytes(data);

        assert_eq!(stream.length(), 5);
        assert_eq!(stream.pos(), 0);
        assert!(!stream.is_empty());
    }

    #[test]
    fn test_get_byte() {
        let data = vec![10, 20, 30, 40, 50];
        let mut stream = Stream::from_bytes(data);

        assert_eq!(stream.get_byte().unwrap(), 10);
        assert_eq!(stream.get_byte().unwrap(), 20);
        assert_eq!(stream.pos(), 2);
    }

    #[test]
    fn test_peek_byte() {
        let mut stream = Stream::from_bytes(vec![10, 20, 30]);

        assert_eq!(stream.peek_byte().unwrap(), 10);
        assert_eq!(stream.pos(), 0);
        assert_eq!(stream.get_byte().unwrap(), 10);
        assert_eq!(stream.pos(), 1);
    }

    #[test]
    fn test_end_of_stream() {
        let mut stream = Stream::from_bytes(vec![1, 2]);

        stream.get_byte().unwrap();
        stream.get_byte().unwrap();
        assert_eq!(stream.get_byte(), Err(PDFError::UnexpectedEndOfStream));
    }

    #[test]
    fn test_window_uses_absolute_positions() {
        let stream = Stream::from_bytes((1..=10).collect());

        let mut window = Stream::from_arc(stream.shared_bytes(), 2, 4);
        assert_eq!(window.length(), 4);
        assert_eq!(window.pos(), 2);
        assert_eq!(window.end(), 6);
        assert_eq!(window.as_slice(), &[3, 4, 5, 6]);
        assert_eq!(window.get_byte().unwrap(), 3);
        assert_eq!(window.get_bytes(3).unwrap(), vec![4, 5, 6]);
        assert!(window.get_byte().is_err());
        assert!(window.set_pos(1).is_err());
    }

    #[test]
    fn test_window_is_clamped() {
        let stream = Stream::from_bytes(vec![1, 2, 3]);
        // Zero length means "to the end"; oversize lengths are clipped
        assert_eq!(Stream::from_arc(stream.shared_bytes(), 1, 0).as_slice(), &[2, 3]);
        assert_eq!(Stream::from_arc(stream.shared_bytes(), 2, 50).length(), 1);
        assert!(Stream::from_arc(stream.shared_bytes(), 9, 0).is_empty());
    }

    #[test]
    fn test_windows_share_data() {
        let stream = Stream::from_bytes((1..=10).collect());

        let _a = Stream::from_arc(stream.shared_bytes(), 0, 5);
        let _b = Stream::from_arc(stream.shared_bytes(), 5, 5);
        assert_eq!(Arc::strong_count(&stream.bytes), 3);
    }

    #[test]
    fn test_byte_range_bounds() {
        let stream = Stream::from_bytes(b"0123456789".to_vec());
        assert_eq!(stream.get_byte_range(2, 5).unwrap(), b"234".to_vec());
        assert_eq!(
            stream.get_byte_range(5, 2),
            Err(PDFError::InvalidByteRange { begin: 5, end: 2 })
        );
        assert!(stream.get_byte_range(8, 11).is_err());
    }
}
