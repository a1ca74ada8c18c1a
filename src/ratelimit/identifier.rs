//! Tracking identifier derivation.

use sha2::{Digest, Sha256};

/// Identifier shared by every caller without a user id or email.
pub const ANONYMOUS: &str = "anonymous";

/// Derive the tracking identifier for an attempt.
///
/// A user id is the most stable identity and is used verbatim. An email is
/// never persisted in the clear: it is normalised and hashed into
/// `email_<digits>`. Without either, all callers share the `anonymous` bucket.
pub fn get_identifier(email: Option<&str>, user_id: Option<&str>) -> String {
    if let Some(user_id) = user_id.filter(|id| !id.is_empty()) {
        return user_id.to_string();
    }

    match email.map(str::trim).filter(|email| !email.is_empty()) {
        Some(email) => format!("email_{}", hash_email(email)),
        None => ANONYMOUS.to_string(),
    }
}

fn hash_email(email: &str) -> u64 {
    let digest = Sha256::digest(email.to_lowercase().as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_used_verbatim() {
        assert_eq!(get_identifier(None, Some("user-123")), "user-123");
        assert_eq!(get_identifier(Some("test@example.com"), Some("user-123")), "user-123");
    }

    #[test]
    fn test_email_hashed() {
        let id = get_identifier(Some("test@example.com"), None);

        let digits = id.strip_prefix("email_").unwrap();
        assert!(!digits.is_empty());
        assert!(digits.chars().all(|c| c.is_ascii_digit()));
        assert!(!id.contains("test"));
    }

    #[test]
    fn test_email_hash_is_stable_and_normalised() {
        let a = get_identifier(Some("test@example.com"), None);
        let b = get_identifier(Some("  Test@Example.COM "), None);
        let c = get_identifier(Some("other@example.com"), None);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_anonymous_fallback() {
        assert_eq!(get_identifier(None, None), "anonymous");
        assert_eq!(get_identifier(Some("   "), Some("")), "anonymous");
    }
}
