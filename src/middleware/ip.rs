//! Client address resolution.
//!
//! Uploader clients usually sit behind a reverse proxy, so forwarded headers win over
//! the transport peer address.

use axum::{
    extract::{FromRequestParts, connect_info::ConnectInfo},
    http::{HeaderMap, request::Parts},
};
use std::{
    convert::Infallible,
    net::{IpAddr, SocketAddr},
};

/// Extract client IP from proxy headers, falling back to the transport peer.
pub fn extract_ip_from_headers(headers: &HeaderMap, fallback: Option<IpAddr>) -> IpAddr {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|hv| hv.to_str().ok())
        .and_then(|h| h.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());
    if let Some(ip) = forwarded {
        return ip;
    }

    let real = headers
        .get("x-real-ip")
        .and_then(|hv| hv.to_str().ok())
        .and_then(|h| h.trim().parse::<IpAddr>().ok());
    if let Some(ip) = real {
        return ip;
    }

    fallback.unwrap_or(IpAddr::from([127, 0, 0, 1]))
}

/// Remote socket address if the server was started with connect info.
/// Never rejects, so handlers also work under `oneshot` in tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct MaybeRemoteAddr(pub Option<SocketAddr>);

impl<S> FromRequestParts<S> for MaybeRemoteAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeRemoteAddr(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
        ))
    }
}

/// Resolved client address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let MaybeRemoteAddr(remote) = MaybeRemoteAddr::from_request_parts(parts, state).await?;
        Ok(ClientIp(extract_ip_from_headers(
            &parts.headers,
            remote.map(|addr| addr.ip()),
        )))
    }
}
