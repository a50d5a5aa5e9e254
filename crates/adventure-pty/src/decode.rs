//! Incremental UTF-8 decoding for drained PTY output.
//!
//! Drain boundaries fall wherever the reader happened to be, so a chunk can
//! end in the middle of a multi-byte character. The decoder holds such a
//! tail back and prefixes it to the next chunk. Bytes that can never form a
//! valid character are replaced with U+FFFD instead of failing the drain.

use std::char::REPLACEMENT_CHARACTER;

use log::warn;

#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes held back from the previous chunk.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Decode `bytes`, holding back an incomplete trailing character.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let input = if self.pending.is_empty() {
            bytes.to_vec()
        } else {
            let mut joined = std::mem::take(&mut self.pending);
            joined.extend_from_slice(bytes);
            joined
        };

        let mut out = String::with_capacity(input.len());
        let mut rest = input.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            warn!("replacing {len} invalid byte(s) in PTY output");
                            out.push(REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush whatever is held back, lossily. Used once no more bytes can arrive.
    pub fn finish(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            warn!("dropping truncated character ({} byte(s)) at end of output", pending.len());
        }
        String::from_utf8_lossy(&pending).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passes_through() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"You are in a valley.\n"), "You are in a valley.\n");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_split_character_is_held_back() {
        // "é" is 0xC3 0xA9.
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"caf\xC3"), "caf");
        assert_eq!(decoder.pending_len(), 1);
        assert_eq!(decoder.decode(b"\xA9!"), "é!");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_four_byte_character_across_three_chunks() {
        // U+1F409 is F0 9F 90 89.
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"\xF0\x9F"), "");
        assert_eq!(decoder.decode(b"\x90"), "");
        assert_eq!(decoder.decode(b"\x89 dragon"), "\u{1F409} dragon");
    }

    #[test]
    fn test_invalid_byte_is_replaced() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"a\xFFb"), "a\u{FFFD}b");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_empty_chunk_keeps_pending() {
        let mut decoder = Utf8Decoder::new();
        decoder.decode(b"\xE2\x82");
        assert_eq!(decoder.decode(b""), "");
        assert_eq!(decoder.pending_len(), 2);
        assert_eq!(decoder.decode(b"\xAC"), "€");
    }

    #[test]
    fn test_finish_flushes_lossily() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"end\xE2\x82"), "end");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert_eq!(decoder.pending_len(), 0);
        assert_eq!(decoder.finish(), "");
    }
}
