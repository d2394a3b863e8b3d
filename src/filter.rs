//! Control-character escaping used by TriOS sensors.
//!
//! The sensor never puts the XON/XOFF bytes, the frame start marker or the
//! escape marker itself on the wire inside a frame. Each of them is replaced
//! by `@` followed by a lower-case letter:
//!
//! | sequence | byte   |
//! |----------|--------|
//! | `@f`     | `0x11` |
//! | `@g`     | `0x13` |
//! | `@e`     | `0x23` |
//! | `@d`     | `0x40` |
//!
//! Only the device-to-host direction is escaped; commands go out verbatim.

/// Escape marker byte (`@`).
pub const ESCAPE: u8 = 0x40;

/// Resolve the byte an escape letter stands for.
#[inline]
fn escaped(letter: u8) -> Option<u8> {
    match letter {
        b'f' => Some(0x11),
        b'g' => Some(0x13),
        b'e' => Some(0x23),
        b'd' => Some(0x40),
        _ => None,
    }
}

/// Replace every escape pair in `raw` with the control byte it encodes.
///
/// An `@` followed by an unknown letter, or sitting at the very end of the
/// buffer, is copied through unchanged.
///
/// Resolving is not idempotent for output that contains `@`: `@df` becomes
/// `@f`, which a second pass would turn into `0x11`. Run it once per buffer.
pub fn unescape(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let byte = raw[i];
        if byte == ESCAPE {
            if let Some(resolved) = raw.get(i + 1).copied().and_then(escaped) {
                out.push(resolved);
                i += 2;
                continue;
            }
        }
        out.push(byte);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn resolves_all_four_pairs() {
        assert_eq!(unescape(b"@f"), vec![0x11]);
        assert_eq!(unescape(b"@g"), vec![0x13]);
        assert_eq!(unescape(b"@e"), vec![0x23]);
        assert_eq!(unescape(b"@d"), vec![0x40]);
    }

    #[test]
    fn pairs_inside_a_stream() {
        let raw = [0x13, 0x11, b'#', 0x05, b'@', b'e', 0x07, b'@', b'd', 0x01];
        assert_eq!(
            unescape(&raw),
            vec![0x13, 0x11, b'#', 0x05, 0x23, 0x07, 0x40, 0x01]
        );
    }

    #[test]
    fn unknown_letter_passes_through() {
        assert_eq!(unescape(b"@x@"), b"@x@".to_vec());
        assert_eq!(unescape(b"ab@"), b"ab@".to_vec());
    }

    #[test]
    fn escaped_marker_is_not_reused_as_escape() {
        // "@d" resolves to '@', which must not combine with the next 'f'.
        assert_eq!(unescape(b"@df"), vec![0x40, b'f']);
        // a second pass is not a no-op once a resolved '@' is present
        assert_eq!(unescape(&unescape(b"@df")), vec![0x11]);
    }

    proptest! {
        #[test]
        fn identity_without_marker(bytes in prop::collection::vec(any::<u8>().prop_filter("no marker", |b| *b != ESCAPE), 0..256)) {
            prop_assert_eq!(unescape(&bytes), bytes);
        }

        #[test]
        fn resolved_output_is_stable(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
            let once = unescape(&bytes);
            prop_assume!(!once.contains(&ESCAPE));
            prop_assert_eq!(unescape(&once), once);
        }
    }
}
