//! Bridges a browser WebSocket to an upstream WebSocket: dials the target
//! (optionally through a proxy), forwards frames both directions, and
//! records the full transcript to history on termination.

use crate::middleware::workspace::WorkspaceId;
use crate::AppState;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Extension, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::Connector;
use workbench_core::domain::{History, ProxySelector};
use workbench_core::resolver::{self, BuiltinContext, ScopeStack};

pub async fn ws_handler(
    State(state): State<AppState>,
    Extension(WorkspaceId(workspace_id)): Extension<WorkspaceId>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| relay(socket, state, workspace_id))
}

async fn relay(socket: WebSocket, state: AppState, workspace_id: i64) {
    let (mut to_browser, mut from_browser) = socket.split();

    let connect = match from_browser.next().await {
        Some(Ok(Message::Text(text))) => serde_json::from_str::<Value>(&text).ok(),
        _ => None,
    };
    let connect = match connect.filter(|v| v.get("type").and_then(|t| t.as_str()) == Some("connect")) {
        Some(v) => v,
        None => {
            send_envelope(&mut to_browser, &json!({
                "type": "error",
                "message": "first message must be a connect envelope",
            }))
            .await;
            return;
        }
    };

    let raw_url = connect.get("url").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let headers_doc = connect.get("headers").cloned().unwrap_or_else(|| json!({})).to_string();
    let proxy_id = connect.get("proxyId").and_then(|v| v.as_i64());
    let subprotocols: Vec<String> = connect
        .get("subprotocols")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|s| s.as_str().map(String::from)).collect())
        .unwrap_or_default();

    let workspace_vars = state.repo.get_workspace(workspace_id).await.map(|w| w.variables).unwrap_or_default();
    let env_vars = match state.repo.active_environment(workspace_id).await {
        Ok(Some(env)) => env.variables,
        _ => HashMap::new(),
    };
    let builtin_vars = resolver::builtin_vars(&BuiltinContext::default());
    let empty = HashMap::new();
    let scopes = ScopeStack::new().push(&empty).push(&env_vars).push(&workspace_vars).push(&builtin_vars);

    let resolved_url = resolver::resolve(&raw_url, &scopes);
    let resolved_headers = resolver::resolve_headers(&headers_doc, &scopes);

    let selector = proxy_id.map(ProxySelector::from_wire).unwrap_or(ProxySelector::Inherit);
    let proxy_url = resolve_proxy_url(&state, workspace_id, selector).await;

    state.metrics.record_ws_connection();

    let mut transcript: Vec<Value> = vec![connect];

    let dialed = dial_upstream(&resolved_url, &resolved_headers, &subprotocols, proxy_url.as_deref()).await;
    let (upstream, selected_subprotocol) = match dialed {
        Ok(pair) => pair,
        Err(message) => {
            let env = json!({ "type": "error", "message": message });
            transcript.push(env.clone());
            send_envelope(&mut to_browser, &env).await;
            write_history(&state, workspace_id, &resolved_url, &resolved_headers, &transcript, Some(message)).await;
            return;
        }
    };

    let connected = json!({
        "type": "connected",
        "url": resolved_url,
        "subprotocol": selected_subprotocol,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    transcript.push(connected.clone());
    if !send_envelope(&mut to_browser, &connected).await {
        write_history(&state, workspace_id, &resolved_url, &resolved_headers, &transcript, None).await;
        return;
    }

    let (mut to_upstream, mut from_upstream) = upstream.split();

    loop {
        tokio::select! {
            incoming = from_browser.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let Some(envelope) = serde_json::from_str::<Value>(&text).ok() else { continue };
                        match envelope.get("type").and_then(|t| t.as_str()) {
                            Some("send") => {
                                let format = envelope.get("format").and_then(|f| f.as_str()).unwrap_or("text");
                                let payload = envelope.get("payload").and_then(|p| p.as_str()).unwrap_or("");
                                let frame = if format == "binary" {
                                    match base64::engine::general_purpose::STANDARD.decode(payload) {
                                        Ok(bytes) => WsMessage::Binary(bytes.into()),
                                        Err(_) => continue,
                                    }
                                } else {
                                    WsMessage::Text(payload.to_string().into())
                                };
                                transcript.push(envelope);
                                if to_upstream.send(frame).await.is_err() {
                                    break;
                                }
                            }
                            Some("close") => {
                                let reason = envelope.get("reason").and_then(|r| r.as_str()).unwrap_or("").to_string();
                                let _ = to_upstream
                                    .send(WsMessage::Close(Some(CloseFrame {
                                        code: CloseCode::Normal,
                                        reason: reason.clone().into(),
                                    })))
                                    .await;
                                let closed = json!({
                                    "type": "closed",
                                    "code": 1000,
                                    "reason": reason,
                                    "timestamp": chrono::Utc::now().to_rfc3339(),
                                });
                                transcript.push(closed.clone());
                                send_envelope(&mut to_browser, &closed).await;
                                break;
                            }
                            _ => {}
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            outgoing = from_upstream.next() => {
                match outgoing {
                    Some(Ok(WsMessage::Text(text))) => {
                        let env = json!({
                            "type": "received",
                            "payload": text.to_string(),
                            "format": "text",
                            "timestamp": chrono::Utc::now().to_rfc3339(),
                        });
                        transcript.push(env.clone());
                        if !send_envelope(&mut to_browser, &env).await {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Binary(bytes))) => {
                        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
                        let env = json!({
                            "type": "received",
                            "payload": encoded,
                            "format": "binary",
                            "timestamp": chrono::Utc::now().to_rfc3339(),
                        });
                        transcript.push(env.clone());
                        if !send_envelope(&mut to_browser, &env).await {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    write_history(&state, workspace_id, &resolved_url, &resolved_headers, &transcript, None).await;
}

async fn send_envelope(sink: &mut futures::stream::SplitSink<WebSocket, Message>, envelope: &Value) -> bool {
    sink.send(Message::Text(envelope.to_string().into())).await.is_ok()
}

async fn resolve_proxy_url(state: &AppState, workspace_id: i64, selector: ProxySelector) -> Option<String> {
    match selector {
        ProxySelector::Direct => None,
        ProxySelector::Inherit => match state.repo.active_proxy(workspace_id).await {
            Ok(Some(proxy)) => Some(proxy.url),
            _ => None,
        },
        ProxySelector::Specific(id) => match state.repo.get_proxy(id).await {
            Ok(proxy) => Some(proxy.url),
            Err(_) => None,
        },
    }
}

type UpstreamSocket = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

/// Dials `url`, routed through `proxy_url` (HTTP/HTTPS CONNECT tunnel) when
/// given, else direct. TLS verification is disabled, matching the request
/// executor's trust model for arbitrary target hosts. Returns the negotiated
/// subprotocol, if the handshake response carried one.
async fn dial_upstream(
    url: &str,
    headers: &[(String, String)],
    subprotocols: &[String],
    proxy_url: Option<&str>,
) -> Result<(UpstreamSocket, Option<String>), String> {
    let mut request = url.into_client_request().map_err(|e| format!("invalid URL: {e}"))?;

    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            tokio_tungstenite::tungstenite::http::HeaderName::from_bytes(name.as_bytes()),
            tokio_tungstenite::tungstenite::http::HeaderValue::from_str(value),
        ) {
            request.headers_mut().insert(name, value);
        }
    }
    if !subprotocols.is_empty()
        && let Ok(value) = tokio_tungstenite::tungstenite::http::HeaderValue::from_str(&subprotocols.join(", "))
    {
        request.headers_mut().insert("sec-websocket-protocol", value);
    }

    let connector = Some(Connector::Rustls(Arc::new(tls::insecure_client_config())));

    let (stream, response) = match proxy_url.filter(|p| p.starts_with("http://") || p.starts_with("https://")) {
        Some(proxy) => {
            let tcp = connect_through_http_proxy(proxy, url).await?;
            tokio_tungstenite::client_async_tls_with_config(request, tcp, None, connector)
                .await
                .map_err(|e| format!("websocket handshake failed: {e}"))?
        }
        None => tokio_tungstenite::connect_async_tls_with_config(request, None, false, connector)
            .await
            .map_err(|e| format!("websocket handshake failed: {e}"))?,
    };

    let selected = response
        .headers()
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    Ok((stream, selected))
}

/// Tunnels a raw TCP connection to `target_url`'s host through an HTTP
/// `CONNECT` proxy. SOCKS5 proxies fall back to a direct dial by the caller
/// (see `dial_upstream`'s scheme filter) — not implemented here.
async fn connect_through_http_proxy(proxy_url: &str, target_url: &str) -> Result<TcpStream, String> {
    let proxy = url::Url::parse(proxy_url).map_err(|e| format!("invalid proxy URL: {e}"))?;
    let proxy_host = proxy.host_str().ok_or("proxy URL has no host")?;
    let proxy_port = proxy.port_or_known_default().unwrap_or(80);

    let target = url::Url::parse(target_url).map_err(|e| format!("invalid target URL: {e}"))?;
    let target_host = target.host_str().ok_or("target URL has no host")?;
    let target_port = target.port_or_known_default().unwrap_or(443);

    let mut stream = TcpStream::connect((proxy_host, proxy_port))
        .await
        .map_err(|e| format!("proxy connect failed: {e}"))?;

    let connect_req =
        format!("CONNECT {target_host}:{target_port} HTTP/1.1\r\nHost: {target_host}:{target_port}\r\n\r\n");
    stream
        .write_all(connect_req.as_bytes())
        .await
        .map_err(|e| format!("proxy CONNECT write failed: {e}"))?;

    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| format!("proxy CONNECT read failed: {e}"))?;
        if n == 0 {
            return Err("proxy closed connection during CONNECT".to_string());
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let status_line = String::from_utf8_lossy(&buf);
    let ok = status_line.starts_with("HTTP/1.1 200") || status_line.starts_with("HTTP/1.0 200");
    if !ok {
        return Err(format!(
            "proxy CONNECT rejected: {}",
            status_line.lines().next().unwrap_or("").trim()
        ));
    }
    Ok(stream)
}

async fn write_history(
    state: &AppState,
    workspace_id: i64,
    url: &str,
    headers: &[(String, String)],
    transcript: &[Value],
    error: Option<String>,
) {
    let entry = History {
        id: 0,
        workspace_id,
        request_id: None,
        flow_id: None,
        method: "WS".to_string(),
        url: url.to_string(),
        request_headers: serde_json::to_string(
            &headers.iter().cloned().collect::<HashMap<_, _>>(),
        )
        .unwrap_or_default(),
        request_body: String::new(),
        status_code: None,
        response_headers: String::new(),
        response_body: serde_json::to_string(transcript).unwrap_or_default(),
        duration_ms: None,
        error,
        created_at: chrono::Utc::now(),
    };
    let _ = state.repo.create_history(entry).await;
}

/// A rustls `ServerCertVerifier` that accepts any certificate, so the relay
/// can dial arbitrary (often self-signed) upstream hosts. Same trust model
/// as `workbench_core::proxy::build_http_client_with_timeout`'s
/// `danger_accept_invalid_certs`.
mod tls {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::crypto::CryptoProvider;
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{ClientConfig, DigitallySignedStruct, Error, SignatureScheme};
    use std::sync::Arc;

    #[derive(Debug)]
    struct NoVerifier(Arc<CryptoProvider>);

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            rustls::crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            rustls::crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }

    pub fn insecure_client_config() -> ClientConfig {
        let provider = CryptoProvider::get_default()
            .expect("a default rustls crypto provider must be installed")
            .clone();
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier(provider)))
            .with_no_client_auth()
    }
}
