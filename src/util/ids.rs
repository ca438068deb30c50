use rand::distributions::Alphanumeric;
use rand::Rng;

/// Generate a new row identifier.
///
/// Ids are UUID v4 in their 32-character simple (hyphen-less) form. Callers
/// must treat them as opaque strings.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Generate a random alphanumeric token of `len` characters from the OS RNG.
///
/// Used for API key secrets and session tokens.
pub fn random_token(len: usize) -> String {
    rand::rngs::OsRng
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_new_id_shape() {
        let id = new_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_new_id_unique() {
        let ids: HashSet<String> = (0..1000).map(|_| new_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_random_token_length_and_charset() {
        let token = random_token(40);
        assert_eq!(token.len(), 40);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(random_token(40), token);
    }
}
