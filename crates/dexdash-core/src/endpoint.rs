use serde::{Deserialize, Serialize};

/// Name of the endpoint selected when no preference is stored.
pub const DEFAULT_ENDPOINT_NAME: &str = "mainnet-beta";

/// A named RPC location. `custom` marks user-supplied entries.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub custom: bool,
}

impl Endpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            custom: false,
        }
    }

    pub fn custom(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            custom: true,
            ..Self::new(name, url)
        }
    }

    /// The endpoints shipped with the application.
    pub fn builtins() -> Vec<Endpoint> {
        vec![
            Endpoint::new(DEFAULT_ENDPOINT_NAME, "https://api.mainnet-beta.solana.com"),
            Endpoint::new("localnet", "http://127.0.0.1:8899"),
        ]
    }

    pub fn default_endpoint() -> Endpoint {
        Endpoint::new(DEFAULT_ENDPOINT_NAME, "https://api.mainnet-beta.solana.com")
    }

    /// The pub/sub URL that pairs with this endpoint's HTTP URL.
    pub fn websocket_url(&self) -> String {
        if let Some(rest) = self.url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.url.strip_prefix("http://") {
            // Local validators serve pub/sub on the port after the HTTP one.
            match local_pubsub_port(rest) {
                Some(shifted) => format!("ws://{shifted}"),
                None => format!("ws://{rest}"),
            }
        } else {
            self.url.clone()
        }
    }

    pub fn has_http_scheme(&self) -> bool {
        self.url.starts_with("http://") || self.url.starts_with("https://")
    }
}

fn local_pubsub_port(host_and_path: &str) -> Option<String> {
    let (authority, path) = match host_and_path.find('/') {
        Some(idx) => host_and_path.split_at(idx),
        None => (host_and_path, ""),
    };
    let (host, port) = authority.rsplit_once(':')?;
    if host != "127.0.0.1" && host != "localhost" {
        return None;
    }
    let port: u16 = port.parse().ok()?;
    Some(format!("{host}:{}{path}", port.checked_add(1)?))
}

/// How settled a state must be before the endpoint reports it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Confirmed => "confirmed",
            Self::Finalized => "finalized",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_endpoint_is_first_builtin() {
        assert_eq!(Endpoint::builtins()[0], Endpoint::default_endpoint());
        assert!(!Endpoint::default_endpoint().custom);
    }

    #[test]
    fn websocket_url_for_https() {
        let ep = Endpoint::new("m", "https://api.mainnet-beta.solana.com");
        assert_eq!(ep.websocket_url(), "wss://api.mainnet-beta.solana.com");
    }

    #[test]
    fn websocket_url_for_local_validator_shifts_port() {
        let ep = Endpoint::new("l", "http://127.0.0.1:8899");
        assert_eq!(ep.websocket_url(), "ws://127.0.0.1:8900");
    }

    #[test]
    fn websocket_url_for_plain_http_keeps_port() {
        let ep = Endpoint::new("r", "http://rpc.internal:8899/path");
        assert_eq!(ep.websocket_url(), "ws://rpc.internal:8899/path");
    }

    #[test]
    fn custom_constructor_sets_flag() {
        let ep = Endpoint::custom("mine", "https://rpc.example.com");
        assert!(ep.custom);
        assert!(ep.has_http_scheme());
    }

    #[test]
    fn commitment_serde() {
        assert_eq!(serde_json::to_string(&Commitment::Finalized).unwrap(), "\"finalized\"");
        let c: Commitment = serde_json::from_str("\"processed\"").unwrap();
        assert_eq!(c, Commitment::Processed);
        assert_eq!(Commitment::default().as_str(), "confirmed");
    }

    #[test]
    fn custom_flag_defaults_when_absent() {
        let ep: Endpoint = serde_json::from_str(r#"{"name":"x","url":"https://x"}"#).unwrap();
        assert!(!ep.custom);
    }
}
