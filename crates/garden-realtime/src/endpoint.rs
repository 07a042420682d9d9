use garden_core::RealtimeError;

/// Derive the WebSocket endpoint from the page origin.
///
/// `https://host` maps to `wss://host{path}` and `http://host` to
/// `ws://host{path}`. Any path, query or fragment on the origin is ignored.
pub fn endpoint_from_origin(origin: &str, path: &str) -> Result<String, RealtimeError> {
    let origin = origin.trim();
    let (scheme, rest) = origin
        .split_once("://")
        .ok_or_else(|| RealtimeError::InvalidEndpoint(format!("missing scheme: {origin}")))?;

    let ws_scheme = if scheme.eq_ignore_ascii_case("https") {
        "wss"
    } else if scheme.eq_ignore_ascii_case("http") {
        "ws"
    } else {
        return Err(RealtimeError::InvalidEndpoint(format!(
            "unsupported scheme '{scheme}' in {origin}"
        )));
    };

    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() {
        return Err(RealtimeError::InvalidEndpoint(format!(
            "missing host: {origin}"
        )));
    }

    Ok(format!("{ws_scheme}://{host}{path}"))
}
