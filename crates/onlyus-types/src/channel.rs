/// Separator between the two PINs of a channel id.
pub const CHANNEL_ID_SEPARATOR: char = '-';

/// Canonical channel id for a pair of PINs.
///
/// The PINs are ordered lexicographically before joining, so both members
/// compute the same id without a lookup.
pub fn derive_channel_id(pin_a: &str, pin_b: &str) -> String {
    let (low, high) = if pin_a <= pin_b {
        (pin_a, pin_b)
    } else {
        (pin_b, pin_a)
    };
    format!("{low}{CHANNEL_ID_SEPARATOR}{high}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_and_joined() {
        assert_eq!(derive_channel_id("111111", "222222"), "111111-222222");
        assert_eq!(derive_channel_id("222222", "111111"), "111111-222222");
    }

    #[test]
    fn commutative_over_many_pairs() {
        let pins = ["100000", "123456", "654321", "999999", "500000", "000001"];
        for a in pins {
            for b in pins {
                assert_eq!(derive_channel_id(a, b), derive_channel_id(b, a));
            }
        }
    }

    #[test]
    fn self_channel() {
        assert_eq!(derive_channel_id("424242", "424242"), "424242-424242");
    }
}
