use std::cmp::Ordering;

/// Compares two byte arrays up to `length` bytes.
///
/// Stored bytes are handled through their signed (`i8`) view, the way the
/// database producers wrote them:
/// - both non-zero with the same sign: compare the signed values;
/// - opposite signs: the negative byte (unsigned value >= 128) is larger;
/// - exactly one zero: the zero byte is smaller.
///
/// When every compared position is equal, the arrays are equal if both hold
/// at least `length` bytes; otherwise the shorter array is smaller. The net
/// effect is unsigned lexicographic ordering over the first `length` bytes.
pub fn compare_bytes(bytes1: &[u8], bytes2: &[u8], length: usize) -> Ordering {
    for (&a, &b) in bytes1.iter().zip(bytes2).take(length) {
        let (a, b) = (a as i8, b as i8);
        let ord = match (a.signum(), b.signum()) {
            (0, 0) => Ordering::Equal,
            (0, _) => Ordering::Less,
            (_, 0) => Ordering::Greater,
            (sa, sb) if sa == sb => a.cmp(&b),
            // opposite signs
            (sa, _) if sa > 0 => Ordering::Less,
            _ => Ordering::Greater,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }

    if bytes1.len() >= length && bytes2.len() >= length {
        Ordering::Equal
    } else {
        bytes1.len().cmp(&bytes2.len())
    }
}
