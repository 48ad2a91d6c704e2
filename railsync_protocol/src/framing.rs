// Message framing over a reliable byte stream.
//
// Two wire formats share one push/pop decoder:
//
// - `WireFormat::LegacyText`: `<N>: <payload>`, where N is the decimal byte
//   length of the payload. The decoder locates the `:` separator and walks
//   backward over ASCII digits to recover N. Bytes in front of the digit run
//   are skipped, which tolerates length prefixes glued directly onto the tail
//   of a previous payload (legacy peers count lengths inconsistently and
//   leave stray bytes behind).
// - `WireFormat::LengthHeader`: 4-byte big-endian length, then payload.
//
// `FrameDecoder` never performs I/O. Reader threads `push` whatever a socket
// read returned and then `pop` until it yields `None`. The output is the same
// however the input is chunked: every decision depends only on bytes already
// required to be present, and the separator search window is fixed.
//
// A `MAX_MESSAGE_SIZE` constant (16 MB) protects against unbounded allocation
// from malformed length prefixes.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::error::FramingError;

/// Maximum allowed payload size (16 MB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// How far into the buffer the legacy decoder looks for the `:` separator.
/// A legal prefix is at most a few junk bytes plus eight digits.
const SEPARATOR_WINDOW: usize = 32;

/// Longest digit run accepted as a legacy length prefix.
const MAX_LENGTH_DIGITS: usize = 8;

const HEADER_LEN: usize = 4;

/// Which framing a connection speaks. Both ends must agree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireFormat {
    #[default]
    LegacyText,
    LengthHeader,
}

/// Frame a payload for the wire.
pub fn encode_frame(format: WireFormat, payload: &[u8]) -> Result<Vec<u8>, FramingError> {
    let len = payload.len();
    if len > MAX_MESSAGE_SIZE {
        return Err(FramingError::TooLarge { len });
    }
    let mut out = Vec::with_capacity(len + 12);
    match format {
        WireFormat::LegacyText => {
            out.extend_from_slice(len.to_string().as_bytes());
            out.extend_from_slice(b": ");
        }
        WireFormat::LengthHeader => {
            let header = u32::try_from(len).map_err(|_| FramingError::TooLarge { len })?;
            out.extend_from_slice(&header.to_be_bytes());
        }
    }
    out.extend_from_slice(payload);
    Ok(out)
}

/// Frame a payload and write it out, flushing the writer.
pub fn write_frame<W: Write>(writer: &mut W, format: WireFormat, payload: &[u8]) -> io::Result<()> {
    let frame = encode_frame(format, payload)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    writer.write_all(&frame)?;
    writer.flush()
}

/// Incremental decoder for one inbound stream.
#[derive(Debug)]
pub struct FrameDecoder {
    format: WireFormat,
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new(format: WireFormat) -> Self {
        Self {
            format,
            buf: Vec::new(),
        }
    }

    /// Append raw bytes from the stream.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes held but not yet emitted.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Extract the next complete unit, if the buffer holds one.
    ///
    /// Returns `Ok(None)` when more bytes are needed. On error the buffer has
    /// been discarded and the decoder must not be trusted again.
    pub fn pop(&mut self) -> Result<Option<Vec<u8>>, FramingError> {
        match self.format {
            WireFormat::LegacyText => self.pop_legacy(),
            WireFormat::LengthHeader => self.pop_header(),
        }
    }

    fn pop_legacy(&mut self) -> Result<Option<Vec<u8>>, FramingError> {
        let window = &self.buf[..self.buf.len().min(SEPARATOR_WINDOW)];
        let Some(sep) = window.iter().position(|&b| b == b':') else {
            if self.buf.len() >= SEPARATOR_WINDOW {
                return Err(self.desync());
            }
            return Ok(None);
        };

        let digits_start = self.buf[..sep]
            .iter()
            .rposition(|b| !b.is_ascii_digit())
            .map_or(0, |i| i + 1);
        let digit_count = sep - digits_start;
        if digit_count == 0 || digit_count > MAX_LENGTH_DIGITS {
            return Err(self.desync());
        }
        let len = self.buf[digits_start..sep]
            .iter()
            .fold(0usize, |acc, b| acc * 10 + usize::from(b - b'0'));
        if len > MAX_MESSAGE_SIZE {
            self.buf.clear();
            return Err(FramingError::TooLarge { len });
        }

        let Some(&after_sep) = self.buf.get(sep + 1) else {
            return Ok(None);
        };
        if after_sep != b' ' {
            return Err(self.desync());
        }

        let start = sep + 2;
        let end = start + len;
        if self.buf.len() < end {
            return Ok(None);
        }
        let payload = self.buf[start..end].to_vec();
        self.buf.drain(..end);
        Ok(Some(payload))
    }

    fn pop_header(&mut self) -> Result<Option<Vec<u8>>, FramingError> {
        let Some(header) = self.buf.first_chunk::<HEADER_LEN>() else {
            return Ok(None);
        };
        let len = u32::from_be_bytes(*header) as usize;
        if len > MAX_MESSAGE_SIZE {
            self.buf.clear();
            return Err(FramingError::TooLarge { len });
        }
        let end = HEADER_LEN + len;
        if self.buf.len() < end {
            return Ok(None);
        }
        let payload = self.buf[HEADER_LEN..end].to_vec();
        self.buf.drain(..end);
        Ok(Some(payload))
    }

    fn desync(&mut self) -> FramingError {
        let discarded = self.buf.len();
        self.buf.clear();
        FramingError::Desynchronized { discarded }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Feed `bytes` in the given chunk sizes and collect every emitted unit,
    /// stopping at the first error.
    fn decode_chunked(
        format: WireFormat,
        bytes: &[u8],
        chunks: &[usize],
    ) -> (Vec<Vec<u8>>, Option<FramingError>) {
        let mut decoder = FrameDecoder::new(format);
        let mut units = Vec::new();
        let mut offset = 0;
        let mut sizes = chunks.iter().copied().cycle();
        while offset < bytes.len() {
            let size = sizes.next().unwrap_or(1).max(1);
            let end = (offset + size).min(bytes.len());
            decoder.push(&bytes[offset..end]);
            offset = end;
            loop {
                match decoder.pop() {
                    Ok(Some(unit)) => units.push(unit),
                    Ok(None) => break,
                    Err(e) => return (units, Some(e)),
                }
            }
        }
        (units, None)
    }

    #[test]
    fn legacy_single_unit() {
        let mut decoder = FrameDecoder::new(WireFormat::LegacyText);
        decoder.push(b"10: QUIT Alice");
        assert_eq!(decoder.pop().unwrap(), Some(b"QUIT Alice".to_vec()));
        assert_eq!(decoder.pop().unwrap(), None);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn legacy_partial_unit_is_retained() {
        let mut decoder = FrameDecoder::new(WireFormat::LegacyText);
        decoder.push(b"10: QUIT Al");
        assert_eq!(decoder.pop().unwrap(), None);
        assert_eq!(decoder.buffered(), 11);
        decoder.push(b"ice");
        assert_eq!(decoder.pop().unwrap(), Some(b"QUIT Alice".to_vec()));
    }

    #[test]
    fn legacy_split_inside_length_prefix() {
        let mut decoder = FrameDecoder::new(WireFormat::LegacyText);
        decoder.push(b"1");
        assert_eq!(decoder.pop().unwrap(), None);
        decoder.push(b"0");
        assert_eq!(decoder.pop().unwrap(), None);
        decoder.push(b":");
        assert_eq!(decoder.pop().unwrap(), None);
        decoder.push(b" QUIT Alice");
        assert_eq!(decoder.pop().unwrap(), Some(b"QUIT Alice".to_vec()));
    }

    #[test]
    fn legacy_prefix_glued_onto_previous_payload() {
        let mut decoder = FrameDecoder::new(WireFormat::LegacyText);
        // "xy" trails the first unit with no delimiter before the next prefix.
        decoder.push(b"5: HELLOxy10: QUIT Alice");
        assert_eq!(decoder.pop().unwrap(), Some(b"HELLO".to_vec()));
        assert_eq!(decoder.pop().unwrap(), Some(b"QUIT Alice".to_vec()));
    }

    #[test]
    fn legacy_leading_space_is_skipped() {
        let mut decoder = FrameDecoder::new(WireFormat::LegacyText);
        decoder.push(b" 10: QUIT Alice");
        assert_eq!(decoder.pop().unwrap(), Some(b"QUIT Alice".to_vec()));
    }

    #[test]
    fn legacy_payload_may_contain_separator() {
        let payload = b"MESSAGE Bob\tInfo\tarrival: 12:30";
        let frame = encode_frame(WireFormat::LegacyText, payload).unwrap();
        let mut decoder = FrameDecoder::new(WireFormat::LegacyText);
        decoder.push(&frame);
        decoder.push(&frame);
        assert_eq!(decoder.pop().unwrap(), Some(payload.to_vec()));
        assert_eq!(decoder.pop().unwrap(), Some(payload.to_vec()));
    }

    #[test]
    fn legacy_separator_without_digits_desyncs() {
        let mut decoder = FrameDecoder::new(WireFormat::LegacyText);
        decoder.push(b"abc: QUIT Alice");
        assert_eq!(
            decoder.pop(),
            Err(FramingError::Desynchronized { discarded: 15 })
        );
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn legacy_missing_space_after_separator_desyncs() {
        let mut decoder = FrameDecoder::new(WireFormat::LegacyText);
        decoder.push(b"4:QUIT");
        assert!(matches!(
            decoder.pop(),
            Err(FramingError::Desynchronized { .. })
        ));
    }

    #[test]
    fn legacy_no_separator_in_window_desyncs() {
        let mut decoder = FrameDecoder::new(WireFormat::LegacyText);
        decoder.push(&[b'a'; SEPARATOR_WINDOW - 1]);
        assert_eq!(decoder.pop().unwrap(), None);
        decoder.push(b"a");
        assert!(matches!(
            decoder.pop(),
            Err(FramingError::Desynchronized { .. })
        ));
    }

    #[test]
    fn legacy_oversized_length_rejected() {
        let mut decoder = FrameDecoder::new(WireFormat::LegacyText);
        decoder.push(b"99999999: x");
        assert_eq!(
            decoder.pop(),
            Err(FramingError::TooLarge { len: 99_999_999 })
        );
    }

    #[test]
    fn legacy_empty_payload() {
        let frame = encode_frame(WireFormat::LegacyText, b"").unwrap();
        assert_eq!(frame, b"0: ".to_vec());
        let mut decoder = FrameDecoder::new(WireFormat::LegacyText);
        decoder.push(&frame);
        assert_eq!(decoder.pop().unwrap(), Some(Vec::new()));
    }

    #[test]
    fn header_roundtrip_multiple() {
        let mut wire = Vec::new();
        for msg in [&b"first"[..], b"second", b"third"] {
            write_frame(&mut wire, WireFormat::LengthHeader, msg).unwrap();
        }
        let (units, err) = decode_chunked(WireFormat::LengthHeader, &wire, &[3]);
        assert!(err.is_none());
        assert_eq!(units, vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]);
    }

    #[test]
    fn header_oversized_length_rejected() {
        let mut decoder = FrameDecoder::new(WireFormat::LengthHeader);
        decoder.push(&(MAX_MESSAGE_SIZE as u32 + 1).to_be_bytes());
        assert!(matches!(decoder.pop(), Err(FramingError::TooLarge { .. })));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn rejects_oversized_write() {
        let big = vec![0u8; MAX_MESSAGE_SIZE + 1];
        let mut buf = Vec::new();
        let err = write_frame(&mut buf, WireFormat::LegacyText, &big).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(buf.is_empty());
    }

    fn arb_stream() -> impl Strategy<Value = Vec<u8>> {
        // Mostly well-formed frames, with the occasional junk byte between
        // them so desync and glued-prefix paths get exercised too.
        let unit = prop_oneof![
            8 => proptest::collection::vec(any::<u8>(), 0..40)
                .prop_map(|p| encode_frame(WireFormat::LegacyText, &p).unwrap_or_default()),
            1 => proptest::collection::vec(any::<u8>(), 1..4),
        ];
        proptest::collection::vec(unit, 0..8).prop_map(|parts| parts.concat())
    }

    proptest! {
        #[test]
        fn legacy_chunk_boundary_invariance(
            bytes in arb_stream(),
            chunks in proptest::collection::vec(1usize..7, 1..6),
        ) {
            let (whole, whole_err) =
                decode_chunked(WireFormat::LegacyText, &bytes, &[bytes.len().max(1)]);
            let (chunked, chunked_err) = decode_chunked(WireFormat::LegacyText, &bytes, &chunks);
            prop_assert_eq!(whole, chunked);
            // The discarded byte count depends on how much had arrived.
            prop_assert_eq!(whole_err.is_some(), chunked_err.is_some());
        }

        #[test]
        fn header_chunk_boundary_invariance(
            payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..40), 0..6),
            chunks in proptest::collection::vec(1usize..7, 1..6),
        ) {
            let mut bytes = Vec::new();
            for p in &payloads {
                bytes.extend(encode_frame(WireFormat::LengthHeader, p).unwrap());
            }
            let (units, err) = decode_chunked(WireFormat::LengthHeader, &bytes, &chunks);
            prop_assert!(err.is_none());
            prop_assert_eq!(units, payloads);
        }
    }
}
