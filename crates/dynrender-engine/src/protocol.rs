use serde_json::Value;

/// `jwt error` payload meaning the token is already dead and cannot be renewed.
pub const JWT_EXP_CLAIM_INVALID: &str = "jwt: exp claim is invalid";

#[derive(Debug, Clone, serde::Serialize)]
struct OutboundFrame<'a> {
    event: &'a str,
    args: [&'a str; 1],
}

#[derive(Debug, Clone, serde::Deserialize)]
struct InboundFrame {
    event: String,
    #[serde(default)]
    args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    AuthSuccess,
    ConsoleOutput(String),
    TokenExpiring,
    TokenExpired,
    JwtError(String),
    /// Anything else the proxy relays (stats, status, daemon messages...).
    Other(String),
}

fn encode(event: &str, arg: &str) -> String {
    let frame = OutboundFrame {
        event,
        args: [arg],
    };
    serde_json::to_string(&frame).unwrap_or_else(|_| {
        // Unreachable for string-only frames; keep a well-formed fallback.
        format!("{{\"event\":{event:?},\"args\":[]}}")
    })
}

pub fn auth(token: &str) -> String {
    encode("auth", token)
}

pub fn send_command(command: &str) -> String {
    encode("send command", command)
}

fn first_arg(args: &[Value]) -> String {
    match args.first() {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

pub fn decode(text: &str) -> InboundEvent {
    let Ok(frame) = serde_json::from_str::<InboundFrame>(text) else {
        return InboundEvent::Other("<malformed>".to_string());
    };
    match frame.event.as_str() {
        "auth success" => InboundEvent::AuthSuccess,
        "console output" => InboundEvent::ConsoleOutput(first_arg(&frame.args)),
        "token expiring" => InboundEvent::TokenExpiring,
        "token expired" => InboundEvent::TokenExpired,
        "jwt error" => InboundEvent::JwtError(first_arg(&frame.args)),
        _ => InboundEvent::Other(frame.event),
    }
}
