//! Working out who is calling.

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::admission::ClientIdentity;

pub const CLIENT_ID_HEADER: &str = "x-client-id";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Everything in the request that can identify the caller.
///
/// The request body may also carry an explicit `clientId`, which wins over
/// all of these; see [`ClientHints::resolve`].
#[derive(Debug, Clone, Default)]
pub struct ClientHints {
    pub header: Option<ClientIdentity>,
    pub forwarded_for: Option<IpAddr>,
    pub peer: Option<IpAddr>,
}

impl ClientHints {
    pub fn from_parts(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let header = headers
            .get(CLIENT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(ClientIdentity::from_token);

        let forwarded_for = headers
            .get(FORWARDED_FOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|first| first.trim().parse().ok());

        Self {
            header,
            forwarded_for,
            peer: peer.map(|addr| addr.ip()),
        }
    }

    /// Pick the identity: explicit token, then header, then forwarded
    /// address, then socket peer, then anonymous.
    pub fn resolve(&self, explicit: Option<&str>) -> ClientIdentity {
        explicit
            .and_then(ClientIdentity::from_token)
            .or_else(|| self.header.clone())
            .or_else(|| self.forwarded_for.map(ClientIdentity::from_addr))
            .or_else(|| self.peer.map(ClientIdentity::from_addr))
            .unwrap_or_else(ClientIdentity::anonymous)
    }
}

impl<S> FromRequestParts<S> for ClientHints
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self::from_parts(&parts.headers, peer))
    }
}
