//! Incremental UTF-8 decoding for the pty byte stream.
//!
//! The reader hands us whatever `read()` returned, so a multi-byte
//! sequence can be split across two buffers.  `decode` therefore
//! reports how many bytes it consumed and distinguishes "not enough
//! bytes yet" from "this will never decode".

/// Outcome of decoding one code point from the head of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    /// A code point together with the number of bytes it occupied.
    Rune(char, usize),
    /// The lead byte promises more continuation bytes than the buffer
    /// holds; retry once more data has arrived.
    NeedMore,
    /// The head of the buffer is not valid UTF-8.
    Invalid,
}

/// Decode the first code point in `bytes`.
pub fn decode(bytes: &[u8]) -> Decoded {
    let lead = match bytes.first() {
        Some(&b) => b,
        None => return Decoded::NeedMore,
    };

    let (len, init) = if lead < 0x80 {
        (1, u32::from(lead))
    } else if lead & 0xe0 == 0xc0 {
        (2, u32::from(lead & 0x1f))
    } else if lead & 0xf0 == 0xe0 {
        (3, u32::from(lead & 0x0f))
    } else if lead & 0xf8 == 0xf0 {
        (4, u32::from(lead & 0x07))
    } else {
        return Decoded::Invalid;
    };

    if bytes.len() < len {
        return Decoded::NeedMore;
    }

    let mut rune = init;
    for &b in &bytes[1..len] {
        if b & 0xc0 != 0x80 {
            return Decoded::Invalid;
        }
        rune = (rune << 6) | u32::from(b & 0x3f);
    }

    match std::char::from_u32(rune) {
        Some(c) => Decoded::Rune(c, len),
        None => Decoded::Invalid,
    }
}

/// Encode a code point into `buf`, returning the number of bytes
/// written (1..=4).
pub fn encode(rune: char, buf: &mut [u8; 4]) -> usize {
    rune.encode_utf8(buf).len()
}
