//! Bearer-token authentication: `<agent-id>:<secret>` against the
//! configured token table, compared in constant time.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Extracts and validates the bearer token from an `Authorization` header
/// value, returning the authenticated `agent_id`.
pub fn authenticate(header_value: Option<&str>, tokens: &HashMap<String, String>) -> Result<String> {
    let header_value = header_value.ok_or(Error::AuthRequired)?;
    let token = header_value.strip_prefix("Bearer ").ok_or(Error::AuthRequired)?;
    let (agent_id, secret) = token.split_once(':').ok_or(Error::AuthRequired)?;

    let expected = tokens.get(agent_id).ok_or(Error::AuthRequired)?;
    if constant_time_eq(expected.as_bytes(), secret.as_bytes()) {
        Ok(agent_id.to_string())
    } else {
        Err(Error::AuthRequired)
    }
}

/// Byte-for-byte comparison that always walks the full length of the
/// longer input, so the compare time doesn't leak how many leading bytes
/// of a guessed secret were correct.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let len = a.len().max(b.len());
    let mut diff: u8 = (a.len() != b.len()) as u8;
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> HashMap<String, String> {
        [("agent-1".to_string(), "s3cret".to_string())].into_iter().collect()
    }

    #[test]
    fn accepts_valid_bearer_token() {
        let agent_id = authenticate(Some("Bearer agent-1:s3cret"), &tokens()).unwrap();
        assert_eq!(agent_id, "agent-1");
    }

    #[test]
    fn rejects_wrong_secret() {
        assert!(authenticate(Some("Bearer agent-1:wrong"), &tokens()).is_err());
    }

    #[test]
    fn rejects_unknown_agent() {
        assert!(authenticate(Some("Bearer ghost:s3cret"), &tokens()).is_err());
    }

    #[test]
    fn rejects_missing_header() {
        assert!(authenticate(None, &tokens()).is_err());
    }

    #[test]
    fn rejects_malformed_header() {
        assert!(authenticate(Some("agent-1:s3cret"), &tokens()).is_err());
        assert!(authenticate(Some("Bearer agent-1"), &tokens()).is_err());
    }
}
