//! WebSocket upgrade validation and subprotocol negotiation.
//!
//! Two protocol generations are accepted. `v8` carries the bootstrap token
//! as a second offered subprotocol, `<jwt>.bootstrap.v8.real-time.<product>`;
//! `v7` carries it in the `bootstrap` query parameter. The answer always
//! names the plain version string.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

use super::request::RequestHead;

/// Negotiated protocol generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V7,
    V8,
}

impl ProtocolVersion {
    fn tag(self) -> &'static str {
        match self {
            Self::V7 => "v7",
            Self::V8 => "v8",
        }
    }

    /// Subprotocol string for this version and product domain.
    pub fn subprotocol(self, product: &str) -> String {
        format!("{}.real-time.{product}", self.tag())
    }
}

/// A validated upgrade, ready to be answered with 101.
#[derive(Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub accept_key: String,
    pub protocol: String,
    pub version: ProtocolVersion,
    /// Raw bootstrap token.
    pub bootstrap: String,
}

impl std::fmt::Debug for UpgradeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradeRequest")
            .field("protocol", &self.protocol)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Reasons an upgrade request is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    /// Missing or malformed upgrade headers, protocol, or bootstrap.
    BadRequest(&'static str),
    /// `Sec-WebSocket-Version` other than 13.
    UnsupportedVersion,
}

impl HandshakeError {
    pub fn status(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::UnsupportedVersion => 426,
        }
    }
}

/// Validate the upgrade headers and extract the bootstrap token.
pub fn negotiate(head: &RequestHead<'_>, product: &str) -> Result<UpgradeRequest, HandshakeError> {
    let upgrade = head
        .header("upgrade")
        .ok_or(HandshakeError::BadRequest("missing upgrade header"))?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(HandshakeError::BadRequest("upgrade is not websocket"));
    }
    if !head
        .header_tokens("connection")
        .any(|t| t.eq_ignore_ascii_case("upgrade"))
    {
        return Err(HandshakeError::BadRequest("connection does not upgrade"));
    }
    match head.header("sec-websocket-version") {
        None => return Err(HandshakeError::BadRequest("missing websocket version")),
        Some("13") => {}
        Some(_) => return Err(HandshakeError::UnsupportedVersion),
    }

    let key = head
        .header("sec-websocket-key")
        .ok_or(HandshakeError::BadRequest("missing websocket key"))?;
    match STANDARD.decode(key) {
        Ok(raw) if raw.len() == 16 => {}
        _ => return Err(HandshakeError::BadRequest("malformed websocket key")),
    }

    let offered: Vec<&str> = head.header_tokens("sec-websocket-protocol").collect();
    let v8 = ProtocolVersion::V8.subprotocol(product);
    let v7 = ProtocolVersion::V7.subprotocol(product);

    let (version, bootstrap) = if offered.contains(&v8.as_str()) {
        let suffix = format!(".bootstrap.{v8}");
        let token = offered
            .iter()
            .find_map(|p| p.strip_suffix(suffix.as_str()))
            .filter(|t| !t.is_empty())
            .ok_or(HandshakeError::BadRequest("missing bootstrap"))?;
        (ProtocolVersion::V8, token)
    } else if offered.contains(&v7.as_str()) {
        let token = head
            .query_param("bootstrap")
            .filter(|t| !t.is_empty())
            .ok_or(HandshakeError::BadRequest("missing bootstrap"))?;
        (ProtocolVersion::V7, token)
    } else {
        return Err(HandshakeError::BadRequest("no supported subprotocol"));
    };

    Ok(UpgradeRequest {
        accept_key: derive_accept_key(key.as_bytes()),
        protocol: version.subprotocol(product),
        version,
        bootstrap: bootstrap.to_string(),
    })
}
