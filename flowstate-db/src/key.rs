//! Order-preserving key encoding.
//!
//! Composite keys are the concatenation of their parts. Each part has a
//! fixed-width or length-prefixed encoding, so the lexicographic byte order
//! of an encoded tuple equals the tuple order of its decoded values and a
//! prefix scan on the leading parts selects exactly the matching rows.
//!
//! - `i64`: 8 bytes big-endian with the sign bit flipped.
//! - `String`: big-endian `u32` byte length, then the UTF-8 bytes.
//!
//! Strings therefore order by length first. That is fine for the state
//! store, which only ever scans *within* one string value (e.g. one job type).

/// Failure to decode a key read back from a column family.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct KeyDecodeError(pub String);

/// A value that can be used as (part of) a column family key.
pub trait DbKey: Sized {
    /// Append the encoded form to `out`.
    fn encode_into(&self, out: &mut Vec<u8>);

    /// Decode one value from the front of `input`, advancing it.
    fn decode_from(input: &mut &[u8]) -> Result<Self, KeyDecodeError>;

    fn to_key_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    /// Decode a complete key; trailing bytes are an error.
    fn from_key_bytes(bytes: &[u8]) -> Result<Self, KeyDecodeError> {
        let mut input = bytes;
        let value = Self::decode_from(&mut input)?;
        if !input.is_empty() {
            return Err(KeyDecodeError(format!(
                "{} trailing bytes after key",
                input.len()
            )));
        }
        Ok(value)
    }
}

fn take<'a>(input: &mut &'a [u8], len: usize) -> Result<&'a [u8], KeyDecodeError> {
    if input.len() < len {
        return Err(KeyDecodeError(format!(
            "expected {len} bytes, found {}",
            input.len()
        )));
    }
    let (head, tail) = input.split_at(len);
    *input = tail;
    Ok(head)
}

const SIGN_BIT: u64 = 1 << 63;

impl DbKey for i64 {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&((*self as u64) ^ SIGN_BIT).to_be_bytes());
    }

    fn decode_from(input: &mut &[u8]) -> Result<Self, KeyDecodeError> {
        let bytes = take(input, 8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok((u64::from_be_bytes(buf) ^ SIGN_BIT) as i64)
    }
}

impl DbKey for String {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.len() as u32).to_be_bytes());
        out.extend_from_slice(self.as_bytes());
    }

    fn decode_from(input: &mut &[u8]) -> Result<Self, KeyDecodeError> {
        let len_bytes = take(input, 4)?;
        let mut buf = [0u8; 4];
        buf.copy_from_slice(len_bytes);
        let len = u32::from_be_bytes(buf) as usize;
        let bytes = take(input, len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| KeyDecodeError(format!("invalid UTF-8 in string key: {e}")))
    }
}

impl<A: DbKey, B: DbKey> DbKey for (A, B) {
    fn encode_into(&self, out: &mut Vec<u8>) {
        self.0.encode_into(out);
        self.1.encode_into(out);
    }

    fn decode_from(input: &mut &[u8]) -> Result<Self, KeyDecodeError> {
        Ok((A::decode_from(input)?, B::decode_from(input)?))
    }
}

impl<A: DbKey, B: DbKey, C: DbKey> DbKey for (A, B, C) {
    fn encode_into(&self, out: &mut Vec<u8>) {
        self.0.encode_into(out);
        self.1.encode_into(out);
        self.2.encode_into(out);
    }

    fn decode_from(input: &mut &[u8]) -> Result<Self, KeyDecodeError> {
        Ok((
            A::decode_from(input)?,
            B::decode_from(input)?,
            C::decode_from(input)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_negative_keys_sort_before_positive() {
        let mut encoded: Vec<_> = [5i64, -1, 0, i64::MIN, i64::MAX, -300]
            .iter()
            .map(|k| k.to_key_bytes())
            .collect();
        encoded.sort();
        let decoded: Vec<i64> = encoded
            .iter()
            .map(|b| i64::from_key_bytes(b).unwrap())
            .collect();
        assert_eq!(decoded, vec![i64::MIN, -300, -1, 0, 5, i64::MAX]);
    }

    #[test]
    fn test_string_prefix_does_not_match_longer_string() {
        let short = ("ab".to_string(), 1i64).to_key_bytes();
        let long = ("abc".to_string(), 1i64).to_key_bytes();
        let prefix = "ab".to_string().to_key_bytes();
        assert!(short.starts_with(&prefix));
        assert!(!long.starts_with(&prefix));
    }

    #[test]
    fn test_truncated_key_is_rejected() {
        let bytes = (7i64, 9i64).to_key_bytes();
        assert!(<(i64, i64)>::from_key_bytes(&bytes[..12]).is_err());
        assert!(i64::from_key_bytes(&bytes).is_err());
    }

    proptest! {
        #[test]
        fn i64_encoding_preserves_order(a in any::<i64>(), b in any::<i64>()) {
            prop_assert_eq!(a.cmp(&b), a.to_key_bytes().cmp(&b.to_key_bytes()));
        }

        #[test]
        fn pair_encoding_preserves_order(
            a in (any::<i64>(), any::<i64>()),
            b in (any::<i64>(), any::<i64>()),
        ) {
            prop_assert_eq!(a.cmp(&b), a.to_key_bytes().cmp(&b.to_key_bytes()));
        }
    }
}
