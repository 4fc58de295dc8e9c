use rand::Rng;

pub const PIN_LEN: usize = 6;

/// Exactly six ASCII digits.
pub fn is_valid_pin(pin: &str) -> bool {
    pin.len() == PIN_LEN && pin.bytes().all(|b| b.is_ascii_digit())
}

/// Random PIN in `100000..=999999` (never a leading zero).
pub fn generate_pin() -> String {
    rand::rng().random_range(100_000u32..=999_999).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_pins_are_valid() {
        for _ in 0..1000 {
            let pin = generate_pin();
            assert!(is_valid_pin(&pin), "bad pin {pin}");
            assert_ne!(pin.as_bytes()[0], b'0');
        }
    }

    #[test]
    fn rejects_malformed() {
        assert!(is_valid_pin("012345"));
        assert!(!is_valid_pin("12345"));
        assert!(!is_valid_pin("1234567"));
        assert!(!is_valid_pin("12a456"));
        assert!(!is_valid_pin(""));
        assert!(!is_valid_pin("١٢٣٤٥٦"));
    }
}
