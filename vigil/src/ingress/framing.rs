// SPDX-License-Identifier: GPL-3.0-or-later

//! Frame reassembly for stream-oriented connections.
//!
//! A stream peer delivers bytes in arbitrary chunks; the frame buffer turns
//! those chunks into discrete application records. In the default
//! line-delimited mode a record is one `\n`-terminated line, with any
//! trailing partial line buffered for the next read. In raw mode every read
//! chunk is delivered immediately as one record.
//!
//! Datagram transports do not use a frame buffer at all.

use super::OverflowError;

/// How bytes from a stream peer are cut into records.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Split on `\n`, buffering the trailing partial line.
    #[default]
    Line,
    /// Deliver every read chunk as one record, unbuffered.
    Raw,
}

/// Upper bound of the accumulation buffer for a line-delimited peer.
///
/// A peer that sends this much without a delimiter is considered malformed
/// or hostile, and its connection must be closed by the caller.
pub const MAX_BUFFERED: usize = 1024 * 1024;

/// Per-connection reassembly state.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    mode: DeliveryMode,
    buffer: Vec<u8>,
}

impl FrameBuffer {
    /// Creates a frame buffer in the default line-delimited mode.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// Feeds one read chunk and returns the completed records.
    ///
    /// In line mode the error is returned when the buffered partial line
    /// exceeds [`MAX_BUFFERED`]; the buffer content is discarded and the
    /// caller is expected to drop the connection.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>, OverflowError> {
        match self.mode {
            DeliveryMode::Raw => {
                let mut records = Vec::with_capacity(2);
                // A partial line left over from line mode goes out first.
                if !self.buffer.is_empty() {
                    records.push(std::mem::take(&mut self.buffer));
                }
                if !chunk.is_empty() {
                    records.push(chunk.to_vec());
                }
                Ok(records)
            }
            DeliveryMode::Line => {
                self.buffer.extend_from_slice(chunk);

                let mut records = Vec::new();
                while let Some(position) = self.buffer.iter().position(|byte| *byte == b'\n') {
                    let mut record: Vec<u8> = self.buffer.drain(..=position).collect();
                    record.pop(); // the delimiter is not part of the record
                    records.push(record);
                }

                if self.buffer.len() > MAX_BUFFERED {
                    let buffered = self.buffer.len();
                    self.buffer.clear();
                    return Err(OverflowError { buffered, limit: MAX_BUFFERED });
                }
                Ok(records)
            }
        }
    }

    /// Switches the delivery mode, effective for subsequently pushed bytes.
    ///
    /// Switching to raw mode flushes any buffered partial line as exactly
    /// one record before raw chunks begin.
    pub fn set_mode(&mut self, mode: DeliveryMode) -> Vec<Vec<u8>> {
        self.mode = mode;
        if mode == DeliveryMode::Raw && !self.buffer.is_empty() {
            vec![std::mem::take(&mut self.buffer)]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn push_all(sut: &mut FrameBuffer, chunks: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut records = Vec::new();
        for chunk in chunks {
            records.extend(sut.push(chunk).unwrap());
        }
        records
    }

    #[test]
    fn single_chunk_with_one_line() {
        let mut sut = FrameBuffer::new();

        let records = sut.push(b"hello\n").unwrap();

        assert_eq!(records, vec![b"hello".to_vec()]);
    }

    #[test]
    fn line_split_across_reads_matches_concatenated_split() {
        // The delivered records must equal the split of the concatenation,
        // no matter how the bytes were cut across reads.
        let payload = b"first\nsecond\nthird\npartial";
        let expected: Vec<Vec<u8>> =
            vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()];

        for cut in 1..payload.len() {
            let mut sut = FrameBuffer::new();
            let records = push_all(&mut sut, &[&payload[..cut], &payload[cut..]]);
            assert_eq!(records, expected, "failed for cut at {cut}");
        }
    }

    #[test]
    fn byte_at_a_time_delivery() {
        let mut sut = FrameBuffer::new();
        let payload = b"a\nbb\nccc\n";

        let mut records = Vec::new();
        for byte in payload {
            records.extend(sut.push(&[*byte]).unwrap());
        }

        assert_eq!(records, vec![b"a".to_vec(), b"bb".to_vec(), b"ccc".to_vec()]);
    }

    #[test]
    fn empty_lines_are_records() {
        let mut sut = FrameBuffer::new();

        let records = sut.push(b"\n\nx\n").unwrap();

        assert_eq!(records, vec![b"".to_vec(), b"".to_vec(), b"x".to_vec()]);
    }

    #[test]
    fn no_record_contains_the_delimiter() {
        let mut sut = FrameBuffer::new();

        let records = push_all(&mut sut, &[b"ab\ncd", b"ef\n\ngh\n"]);

        assert!(records.iter().all(|record| !record.contains(&b'\n')));
    }

    #[test]
    fn switch_to_raw_flushes_partial_line_as_one_record() {
        let mut sut = FrameBuffer::new();
        assert!(sut.push(b"complete\npartial").unwrap().len() == 1);

        let flushed = sut.set_mode(DeliveryMode::Raw);

        assert_eq!(flushed, vec![b"partial".to_vec()]);
        // Subsequent chunks are delivered verbatim.
        let records = sut.push(b"raw chunk \n with delimiter").unwrap();
        assert_eq!(records, vec![b"raw chunk \n with delimiter".to_vec()]);
    }

    #[test]
    fn switch_to_raw_with_empty_buffer_flushes_nothing() {
        let mut sut = FrameBuffer::new();

        assert!(sut.set_mode(DeliveryMode::Raw).is_empty());
    }

    #[test]
    fn switch_back_to_line_mode_buffers_again() {
        let mut sut = FrameBuffer::new();
        sut.set_mode(DeliveryMode::Raw);
        sut.set_mode(DeliveryMode::Line);

        assert!(sut.push(b"no delimiter yet").unwrap().is_empty());
        assert_eq!(sut.push(b" done\n").unwrap(), vec![b"no delimiter yet done".to_vec()]);
    }

    #[test]
    fn overflow_without_delimiter_errors() {
        let mut sut = FrameBuffer::new();
        let chunk = vec![b'x'; MAX_BUFFERED + 1];

        let result = sut.push(&chunk);

        assert!(result.is_err());
        // The buffer is discarded; later pushes start clean.
        assert_eq!(sut.push(b"ok\n").unwrap(), vec![b"ok".to_vec()]);
    }

    #[test]
    fn overflow_accumulates_across_pushes() {
        let mut sut = FrameBuffer::new();
        let chunk = vec![b'x'; MAX_BUFFERED / 2 + 1];

        assert!(sut.push(&chunk).unwrap().is_empty());
        assert!(sut.push(&chunk).is_err());
    }

    #[test]
    fn exactly_at_the_bound_is_not_an_overflow() {
        let mut sut = FrameBuffer::new();
        let chunk = vec![b'x'; MAX_BUFFERED];

        assert!(sut.push(&chunk).unwrap().is_empty());
    }
}
