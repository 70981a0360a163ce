use uuid::Uuid;

/// Code for a master-data row created without one, e.g. `KTG-1a2b3c4d`.
pub fn generate_code(prefix: &str) -> String {
    let uuid = Uuid::now_v7();
    let hex = format!("{:032x}", uuid.as_u128());
    // Last 8 hex chars come from the random tail of the UUIDv7, so codes
    // minted in the same millisecond still differ.
    format!("{prefix}-{}", &hex[24..])
}

pub fn generate_salt() -> String {
    Uuid::now_v7().simple().to_string()
}

/// Bearer token for a login session: 64 hex chars from two random UUIDs.
pub fn generate_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_is_correct() {
        let code = generate_code("KTG");
        assert!(code.starts_with("KTG-"));
        assert_eq!(code.len(), 12); // "KTG-" (4) + 8 hex chars
        assert!(code[4..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn codes_are_unique() {
        let a = generate_code("SUP");
        let b = generate_code("SUP");
        assert_ne!(a, b);
    }

    #[test]
    fn salts_differ() {
        assert_ne!(generate_salt(), generate_salt());
    }

    #[test]
    fn tokens_are_long_and_distinct() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }
}
