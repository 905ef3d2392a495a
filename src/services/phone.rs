// services/phone.rs
//
// Canonicalizes Kenyan MSISDNs into the wire format the Daraja API expects.
// "0712 345-678" and "+254712345678" both become "254712345678".

use crate::errors::{AppError, Result};

pub fn normalize_phone(raw: &str) -> Result<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '+' | ' ' | '-'))
        .collect();

    let normalized = if cleaned.starts_with("07") || cleaned.starts_with("01") {
        format!("254{}", &cleaned[1..])
    } else {
        cleaned
    };

    let valid = normalized.len() == 12
        && normalized.starts_with("254")
        && normalized.chars().all(|c| c.is_ascii_digit());

    if valid {
        Ok(normalized)
    } else {
        Err(AppError::InvalidPhoneFormat(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_trunk_prefixes_become_country_code() {
        assert_eq!(normalize_phone("0712345678").unwrap(), "254712345678");
        assert_eq!(normalize_phone("0112345678").unwrap(), "254112345678");
    }

    #[test]
    fn already_canonical_passes_through() {
        assert_eq!(normalize_phone("254712345678").unwrap(), "254712345678");
    }

    #[test]
    fn plus_spaces_and_hyphens_are_stripped() {
        assert_eq!(normalize_phone("+254 712-345-678").unwrap(), "254712345678");
        assert_eq!(normalize_phone("0712 345 678").unwrap(), "254712345678");
    }

    #[test]
    fn rejects_wrong_shapes() {
        assert!(normalize_phone("0812345678").is_err()); // unknown trunk prefix
        assert!(normalize_phone("071234567").is_err()); // too short
        assert!(normalize_phone("07123456789").is_err()); // too long
        assert!(normalize_phone("25571234567").is_err()); // wrong country code
        assert!(normalize_phone("07123a5678").is_err()); // non-digit
        assert!(normalize_phone("").is_err());
    }

    #[test]
    fn all_local_format_numbers_normalize_to_last_nine_digits() {
        for prefix in ["07", "01"] {
            let raw = format!("{}23456789", prefix);
            let normalized = normalize_phone(&raw).unwrap();
            assert_eq!(normalized, format!("254{}", &raw[1..]));
        }
    }
}
