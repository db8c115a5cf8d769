const REPLACEMENT: char = '\u{FFFD}';

/// Incremental UTF-8 decoder for a byte stream delivered in arbitrary pieces.
///
/// A multi-byte sequence cut by a piece boundary is held back until the rest
/// of it arrives. Invalid bytes decode to U+FFFD instead of failing.
#[derive(Debug, Default, Clone)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes as much of `pending + bytes` as is complete.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(bytes);

        let mut text = String::with_capacity(input.len());
        let mut rest = input.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(invalid) => {
                            text.push(REPLACEMENT);
                            rest = &after[invalid..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        text
    }

    /// Ends the stream. Bytes of an unfinished sequence decode to U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            REPLACEMENT.to_string()
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn decode_in_pieces(bytes: &[u8], cuts: &[usize]) -> String {
        let mut decoder = Utf8StreamDecoder::new();
        let mut text = String::new();
        let mut start = 0;
        let end = [bytes.len()];
        for &cut in cuts.iter().chain(&end) {
            text += &decoder.decode(&bytes[start..cut]);
            start = cut;
        }
        text += &decoder.finish();
        text
    }

    #[test]
    fn decoder_passes_ascii_through() {
        let mut decoder = Utf8StreamDecoder::new();

        assert_eq!(decoder.decode(b"He"), "He");
        assert_eq!(decoder.decode(b"llo"), "llo");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn decoder_holds_back_split_sequence() {
        let bytes = "é".as_bytes();
        let mut decoder = Utf8StreamDecoder::new();

        assert_eq!(decoder.decode(&bytes[..1]), "");
        assert!(decoder.has_pending());
        assert_eq!(decoder.decode(&bytes[1..]), "é");
        assert!(!decoder.has_pending());
    }

    #[test]
    fn decoder_output_is_independent_of_split_points() {
        let text = "naïve 日本語 text 🦀 done";
        let bytes = text.as_bytes();

        for cut in 0..=bytes.len() {
            assert_eq!(decode_in_pieces(bytes, &[cut]), text, "cut at {cut}");
        }
        for a in 0..=bytes.len() {
            for b in a..=bytes.len() {
                assert_eq!(decode_in_pieces(bytes, &[a, b]), text, "cuts at {a}, {b}");
            }
        }
    }

    #[test]
    fn decoder_reassembles_four_byte_sequence_fed_bytewise() {
        let bytes = "🦀".as_bytes();
        let cuts: Vec<usize> = (1..bytes.len()).collect();

        assert_eq!(decode_in_pieces(bytes, &cuts), "🦀");
    }

    #[test]
    fn decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8StreamDecoder::new();

        assert_eq!(decoder.decode(b"a\xFFb"), "a\u{FFFD}b");
        assert_eq!(decoder.decode(b"\xC3\x28"), "\u{FFFD}(");
    }

    #[test]
    fn decoder_finish_replaces_truncated_sequence() {
        let mut decoder = Utf8StreamDecoder::new();

        assert_eq!(decoder.decode(&"日".as_bytes()[..2]), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert!(!decoder.has_pending());
        assert_eq!(decoder.decode(b"ok"), "ok");
    }
}
