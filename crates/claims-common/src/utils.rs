//! Utility functions and helpers

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Get current timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Short hex uniquifier for session ids and synthesized correlation ids
pub fn short_uid() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Calculate exponential backoff delay in milliseconds
pub fn exponential_backoff_ms(attempt: u32, initial_ms: u64, max_ms: u64, multiplier: f64) -> u64 {
    let delay = initial_ms as f64 * multiplier.powi(attempt as i32);
    (delay as u64).min(max_ms)
}

/// Create a slug safe for correlation identifiers
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut last_dash = true;
    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_uid_is_eight_hex_chars() {
        let uid = short_uid();
        assert_eq!(uid.len(), 8);
        assert!(uid.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn backoff_caps_at_max() {
        assert_eq!(exponential_backoff_ms(0, 1000, 60_000, 2.0), 1000);
        assert_eq!(exponential_backoff_ms(3, 1000, 60_000, 2.0), 8000);
        assert_eq!(exponential_backoff_ms(10, 1000, 60_000, 2.0), 60_000);
    }

    #[test]
    fn slugify_strips_punctuation() {
        assert_eq!(slugify("Bupa Arabia  (Gold)"), "bupa-arabia-gold");
        assert_eq!(slugify("--Khamis Mushait--"), "khamis-mushait");
        assert_eq!(slugify(""), "");
    }
}
