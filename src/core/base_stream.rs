use super::error::PDFResult;

/// Base trait for byte cursors the lexer reads from.
///
/// The document bytes are shared between concurrent requests, so every
/// implementation must be `Send + Sync`. Each parser owns its own cursor.
///
/// Positions are absolute offsets into the underlying buffer, so a
/// window created at offset 100 starts with `pos() == 100`.
pub trait BaseStream: Send + Sync {
    // ============================================================================
    // Required methods
    // ============================================================================

    /// Returns the total length of the stream in bytes.
    fn length(&self) -> usize;

    /// Returns true if the stream contains no data.
    fn is_empty(&self) -> bool;

    /// Returns the absolute offset of the first readable byte.
    fn start(&self) -> usize;

    /// Returns the current position in the stream.
    fn pos(&self) -> usize;

    /// Sets the current position in the stream.
    fn set_pos(&mut self, pos: usize) -> PDFResult<()>;

    /// Reads and returns a single byte from the stream, advancing the position.
    fn get_byte(&mut self) -> PDFResult<u8>;

    /// Reads the specified number of bytes from the stream, advancing the position.
    fn get_bytes(&mut self, length: usize) -> PDFResult<Vec<u8>>;

    /// Returns a range of bytes without changing the current position.
    ///
    /// # Arguments
    /// * `begin` - Starting byte offset (inclusive)
    /// * `end` - Ending byte offset (exclusive)
    fn get_byte_range(&self, begin: usize, end: usize) -> PDFResult<Vec<u8>>;

    // ============================================================================
    // Provided methods
    // ============================================================================

    /// Returns the absolute offset one past the last readable byte.
    fn end(&self) -> usize {
        self.start() + self.length()
    }

    /// Reads a single byte without advancing the position.
    fn peek_byte(&mut self) -> PDFResult<u8> {
        let current_pos = self.pos();
        let byte = self.get_byte()?;
        self.set_pos(current_pos)?;
        Ok(byte)
    }
}
