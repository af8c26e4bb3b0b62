//! Server endpoint scheme.
//!
//! Everything is derived from one configured base URL:
//!
//! - WebSocket: scheme swapped `http → ws`, `https → wss`, plus `/connect`
//! - Version probe: `{base}/version`

use url::Url;

/// Path suffix of the WebSocket endpoint.
pub const CONNECT_PATH: &str = "/connect";

/// Path suffix of the version probe.
pub const VERSION_PATH: &str = "/version";

/// Endpoints derived from a server base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: String,
    websocket: String,
    version: String,
}

impl Endpoints {
    /// Derive endpoints from an `http(s)://` base URL.
    ///
    /// # Errors
    ///
    /// Returns error if the URL does not parse or is not http/https.
    pub fn from_base_url(input: &str) -> Result<Self, EndpointError> {
        let base = input.trim().trim_end_matches('/');
        let url = Url::parse(base).map_err(|e| EndpointError::InvalidUrl(format!("{base}: {e}")))?;

        let ws_scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            scheme => {
                return Err(EndpointError::UnsupportedScheme(scheme.to_string()));
            }
        };

        // Keep the caller's spelling after the scheme so paths survive as-is.
        let rest = &base[url.scheme().len()..];

        Ok(Self {
            base: base.to_string(),
            websocket: format!("{ws_scheme}{rest}{CONNECT_PATH}"),
            version: format!("{base}{VERSION_PATH}"),
        })
    }

    /// Base URL without a trailing slash.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// WebSocket endpoint.
    #[must_use]
    pub fn websocket(&self) -> &str {
        &self.websocket
    }

    /// Version probe endpoint.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }
}

/// Errors for endpoint derivation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EndpointError {
    /// URL failed to parse
    #[error("invalid server URL: {0}")]
    InvalidUrl(String),
    /// Scheme is not http or https
    #[error("unsupported URL scheme '{0}', expected http or https")]
    UnsupportedScheme(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_becomes_wss() {
        let endpoints = Endpoints::from_base_url("https://amadare-mhw-sync.herokuapp.com/").unwrap();

        assert_eq!(endpoints.base(), "https://amadare-mhw-sync.herokuapp.com");
        assert_eq!(
            endpoints.websocket(),
            "wss://amadare-mhw-sync.herokuapp.com/connect"
        );
        assert_eq!(
            endpoints.version(),
            "https://amadare-mhw-sync.herokuapp.com/version"
        );
    }

    #[test]
    fn http_becomes_ws_and_keeps_port_and_path() {
        let endpoints = Endpoints::from_base_url("http://localhost:5000/sync").unwrap();

        assert_eq!(endpoints.websocket(), "ws://localhost:5000/sync/connect");
        assert_eq!(endpoints.version(), "http://localhost:5000/sync/version");
    }

    #[test]
    fn other_schemes_are_rejected() {
        assert!(matches!(
            Endpoints::from_base_url("ftp://example.com"),
            Err(EndpointError::UnsupportedScheme(s)) if s == "ftp"
        ));
        assert!(matches!(
            Endpoints::from_base_url("not a url"),
            Err(EndpointError::InvalidUrl(_))
        ));
    }
}
