//! Modified UTF-8, the string encoding of the constant pool.
//!
//! Text is encoded per UTF-16 code unit: NUL takes two bytes (`C0 80`),
//! and characters outside the BMP are written as two three-byte surrogate
//! sequences.

/// Largest encoded length a constant-pool string may have.
pub const MAX_ENCODED_LEN: usize = u16::MAX as usize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Mutf8Error {
    #[error("invalid byte 0x{byte:02x} at offset {offset}")]
    InvalidByte { byte: u8, offset: usize },
    #[error("truncated sequence at offset {offset}")]
    Truncated { offset: usize },
    #[error("unpaired surrogate")]
    UnpairedSurrogate,
}

fn unit_len(unit: u16) -> usize {
    match unit {
        0x0001..=0x007F => 1,
        0x0000 | 0x0080..=0x07FF => 2,
        _ => 3,
    }
}

/// Encoded length in bytes, excluding the two-byte length prefix.
pub fn encoded_len(s: &str) -> usize {
    s.encode_utf16().map(unit_len).sum()
}

pub fn encode(s: &str, out: &mut Vec<u8>) {
    for unit in s.encode_utf16() {
        match unit_len(unit) {
            1 => out.push(unit as u8),
            2 => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
}

pub fn decode(bytes: &[u8]) -> Result<String, Mutf8Error> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let cont = |offset: usize| -> Result<u16, Mutf8Error> {
            match bytes.get(offset) {
                Some(c) if c & 0xC0 == 0x80 => Ok((c & 0x3F) as u16),
                Some(c) => Err(Mutf8Error::InvalidByte { byte: *c, offset }),
                None => Err(Mutf8Error::Truncated { offset }),
            }
        };
        if b & 0x80 == 0 {
            units.push(b as u16);
            i += 1;
        } else if b & 0xE0 == 0xC0 {
            units.push(((b & 0x1F) as u16) << 6 | cont(i + 1)?);
            i += 2;
        } else if b & 0xF0 == 0xE0 {
            units.push(((b & 0x0F) as u16) << 12 | cont(i + 1)? << 6 | cont(i + 2)?);
            i += 3;
        } else {
            return Err(Mutf8Error::InvalidByte { byte: b, offset: i });
        }
    }
    String::from_utf16(&units).map_err(|_| Mutf8Error::UnpairedSurrogate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc(s: &str) -> Vec<u8> {
        let mut out = Vec::new();
        encode(s, &mut out);
        out
    }

    #[test]
    fn ascii_is_one_byte_per_char() {
        assert_eq!(enc("abc"), b"abc");
        assert_eq!(encoded_len("abc"), 3);
    }

    #[test]
    fn nul_is_two_bytes() {
        assert_eq!(enc("\0"), vec![0xC0, 0x80]);
        assert_eq!(encoded_len("a\0"), 3);
    }

    #[test]
    fn supplementary_chars_are_surrogate_pairs() {
        let bytes = enc("😀");
        assert_eq!(bytes.len(), 6);
        assert_eq!(encoded_len("😀"), 6);
        assert_eq!(decode(&bytes).unwrap(), "😀");
    }

    #[test]
    fn two_and_three_byte_chars() {
        assert_eq!(encoded_len("é"), 2);
        assert_eq!(encoded_len("€"), 3);
        assert_eq!(decode(&enc("é€\0x")).unwrap(), "é€\0x");
    }

    #[test]
    fn rejects_bad_sequences() {
        assert_eq!(decode(&[0xC3]), Err(Mutf8Error::Truncated { offset: 1 }));
        assert_eq!(decode(&[0xF0, 0x80]), Err(Mutf8Error::InvalidByte { byte: 0xF0, offset: 0 }));
        // lone high surrogate
        assert_eq!(decode(&[0xED, 0xA0, 0x80]), Err(Mutf8Error::UnpairedSurrogate));
    }
}
