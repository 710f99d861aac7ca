//! Caller and provider identifiers used to key every admission decision.

use std::convert::Infallible;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An opaque string naming the caller.
///
/// Either a token the browser persists for its session, or the network
/// address of the request when no token was supplied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    /// Identity used when nothing at all identifies the caller.
    pub const ANONYMOUS: &'static str = "anonymous";

    /// Create an identity from a caller-supplied token.
    ///
    /// Returns `None` for blank tokens.
    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.trim();
        (!token.is_empty()).then(|| Self(token.to_string()))
    }

    /// Create an identity from the caller's network address.
    pub fn from_addr(addr: IpAddr) -> Self {
        Self(addr.to_string())
    }

    pub fn anonymous() -> Self {
        Self(Self::ANONYMOUS.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The AI backend a job is sent to.
///
/// Determines which rate window and daily cap apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Provider {
    #[default]
    Gemini,
    OpenRouter,
    Other(String),
}

impl Provider {
    pub fn as_str(&self) -> &str {
        match self {
            Provider::Gemini => "gemini",
            Provider::OpenRouter => "openrouter",
            Provider::Other(name) => name,
        }
    }
}

impl From<&str> for Provider {
    fn from(name: &str) -> Self {
        let name = name.trim().to_ascii_lowercase();
        match name.as_str() {
            "gemini" => Provider::Gemini,
            "openrouter" => Provider::OpenRouter,
            _ => Provider::Other(name),
        }
    }
}

impl From<String> for Provider {
    fn from(name: String) -> Self {
        Provider::from(name.as_str())
    }
}

impl From<Provider> for String {
    fn from(provider: Provider) -> Self {
        provider.as_str().to_string()
    }
}

impl FromStr for Provider {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Provider::from(s))
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_token_is_rejected() {
        assert!(ClientIdentity::from_token("").is_none());
        assert!(ClientIdentity::from_token("   ").is_none());
        assert_eq!(
            ClientIdentity::from_token(" client_abc ").unwrap().as_str(),
            "client_abc"
        );
    }

    #[test]
    fn test_identity_from_address() {
        let addr: IpAddr = "10.1.2.3".parse().unwrap();
        assert_eq!(ClientIdentity::from_addr(addr).as_str(), "10.1.2.3");
    }

    #[test]
    fn test_provider_parsing_is_case_insensitive() {
        assert_eq!(Provider::from("Gemini"), Provider::Gemini);
        assert_eq!(Provider::from("OPENROUTER"), Provider::OpenRouter);
        assert_eq!(
            Provider::from("Mistral"),
            Provider::Other("mistral".to_string())
        );
    }

    #[test]
    fn test_provider_serde_uses_names() {
        let json = serde_json::to_string(&Provider::OpenRouter).unwrap();
        assert_eq!(json, "\"openrouter\"");

        let parsed: Provider = serde_json::from_str("\"gemini\"").unwrap();
        assert_eq!(parsed, Provider::Gemini);
    }
}
