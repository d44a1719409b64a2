/*!
Per-prefix event-id hashing (§4.4): the stable, collector-independent identity attached to each
route-history row. Hashing the raw BMP message bytes (not the OpenBMP envelope) means two
collectors wrapping the same underlying BMP record produce identical ids; appending the prefix
text and action char keeps every prefix inside a multi-prefix UPDATE distinct.
*/
use sha2::{Digest, Sha256};

/// `SHA-256(bmp_message_bytes || prefix_text || "/" || action_char)` (§4.4, Loc-RIB rows).
pub fn event_id(bmp_message_bytes: &[u8], prefix_text: &str, action_char: char) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bmp_message_bytes);
    hasher.update(prefix_text.as_bytes());
    hasher.update(b"/");
    let mut action_buf = [0u8; 4];
    hasher.update(action_char.encode_utf8(&mut action_buf).as_bytes());
    hasher.finalize().into()
}

/// `SHA-256(bmp_message_bytes || peer_address || "/" || prefix_text || "/" || action_char)`
/// (§4.4, non-Loc-RIB Adj-RIB-In history rows — the peer-address suffix distinguishes the same
/// prefix learned from different peers in the same BMP message).
pub fn event_id_adj_rib_in(
    bmp_message_bytes: &[u8],
    peer_address: &str,
    prefix_text: &str,
    action_char: char,
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bmp_message_bytes);
    hasher.update(peer_address.as_bytes());
    hasher.update(b"/");
    hasher.update(prefix_text.as_bytes());
    hasher.update(b"/");
    let mut action_buf = [0u8; 4];
    hasher.update(action_char.encode_utf8(&mut action_buf).as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let a = event_id(b"bmp-bytes", "10.0.0.0/24", 'A');
        let b = event_id(b"bmp-bytes", "10.0.0.0/24", 'A');
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_prefixes_distinct_ids() {
        let a = event_id(b"bmp-bytes", "10.0.0.0/24", 'A');
        let b = event_id(b"bmp-bytes", "10.0.1.0/24", 'A');
        assert_ne!(a, b);
    }

    #[test]
    fn test_distinct_actions_distinct_ids() {
        let a = event_id(b"bmp-bytes", "10.0.0.0/24", 'A');
        let b = event_id(b"bmp-bytes", "10.0.0.0/24", 'D');
        assert_ne!(a, b);
    }

    #[test]
    fn test_adj_rib_in_distinguishes_peers() {
        let a = event_id_adj_rib_in(b"bmp-bytes", "192.0.2.1", "10.0.0.0/24", 'A');
        let b = event_id_adj_rib_in(b"bmp-bytes", "192.0.2.2", "10.0.0.0/24", 'A');
        assert_ne!(a, b);
    }

    #[test]
    fn test_envelope_independence() {
        // Two different OpenBMP wrappers around identical bmp bytes must hash identically;
        // callers are responsible for passing only the unwrapped bmp_message_bytes span.
        let wrapped_v2_equivalent = event_id(b"identical-bmp-bytes", "10.0.0.0/24", 'A');
        let wrapped_v17_equivalent = event_id(b"identical-bmp-bytes", "10.0.0.0/24", 'A');
        assert_eq!(wrapped_v2_equivalent, wrapped_v17_equivalent);
    }
}
