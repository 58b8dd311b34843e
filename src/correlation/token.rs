use std::fmt;

use http::HeaderValue;
use rand::Rng;

/// Header carrying the correlation token from the fetch layer down to the
/// transport.
pub const HEADER_NAME: &str = "x-har-request-id";

const ALPHABET: &[u8; 64] = b"useandom-26T198340PX75pxJACKVERYMINDBUSHWOLF_GQZbfghjklqvwyzrict";
const TOKEN_LEN: usize = 21;

/// Opaque identifier linking one logical fetch call to the transport-level
/// events of every physical request it issues.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationToken(String);

impl CorrelationToken {
    /// 21 URL-safe characters, 126 random bits.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let token = (0..TOKEN_LEN)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        Self(token)
    }

    /// Recover a token from a header value. Anything that is not a
    /// well-formed token is treated as absent.
    pub fn from_header(value: &HeaderValue) -> Option<Self> {
        let raw = value.to_str().ok()?.trim();
        let valid = !raw.is_empty()
            && raw.len() <= 128
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_header_value(&self) -> HeaderValue {
        HeaderValue::from_str(&self.0).unwrap_or_else(|_| HeaderValue::from_static(""))
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_tokens_are_unique_and_header_safe() {
        let tokens: HashSet<CorrelationToken> =
            (0..10_000).map(|_| CorrelationToken::generate()).collect();
        assert_eq!(tokens.len(), 10_000);

        for token in tokens.iter().take(50) {
            assert_eq!(token.as_str().len(), 21);
            let parsed = CorrelationToken::from_header(&token.to_header_value());
            assert_eq!(parsed.as_ref(), Some(token));
        }
    }

    #[test]
    fn rejects_malformed_header_values() {
        assert!(CorrelationToken::from_header(&HeaderValue::from_static("")).is_none());
        assert!(CorrelationToken::from_header(&HeaderValue::from_static("a b")).is_none());
        assert!(CorrelationToken::from_header(&HeaderValue::from_static("abc-DEF_123")).is_some());
    }
}
