use reqwest::{
    StatusCode,
    header::{ACCEPT, CONTENT_TYPE},
};

use crate::error::{RenderError, RenderResult};
use crate::settings::PanelSettings;

/// One-time console socket URL plus the bearer token used to authenticate on it.
#[derive(Clone, PartialEq, Eq, serde::Deserialize)]
pub struct ConsoleCredentials {
    pub socket: String,
    pub token: String,
}

impl std::fmt::Debug for ConsoleCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleCredentials")
            .field("socket", &self.socket)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch(&self, panel: &PanelSettings) -> RenderResult<ConsoleCredentials>;
}

#[derive(Debug, serde::Deserialize)]
struct WebsocketResponse {
    data: ConsoleCredentials,
}

pub fn websocket_endpoint(panel: &PanelSettings) -> String {
    format!(
        "{}/api/client/servers/{}/websocket",
        panel.host.trim().trim_end_matches('/'),
        panel.server_id.trim()
    )
}

/// Fetches console credentials from the panel's client API.
#[derive(Debug, Clone, Default)]
pub struct PanelClient {
    http: reqwest::Client,
}

impl PanelClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait::async_trait]
impl CredentialSource for PanelClient {
    async fn fetch(&self, panel: &PanelSettings) -> RenderResult<ConsoleCredentials> {
        let url = websocket_endpoint(panel);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&panel.key)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| RenderError::session(format!("Unable to reach the panel: {e}")))?;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(RenderError::session(format!(
                "Unable to get websocket credentials. Status code: `{}`.",
                status.as_u16()
            )));
        }

        let body: WebsocketResponse = resp.json().await.map_err(|e| {
            RenderError::session(format!("Invalid websocket credentials response: {e}"))
        })?;
        tracing::debug!(socket = %body.data.socket, "fetched console credentials");
        Ok(body.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panel(host: &str) -> PanelSettings {
        PanelSettings {
            host: host.to_string(),
            key: "ptlc_secret".to_string(),
            server_id: "1a2b3c4d".to_string(),
        }
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        assert_eq!(
            websocket_endpoint(&panel("https://panel.example.com/")),
            "https://panel.example.com/api/client/servers/1a2b3c4d/websocket"
        );
        assert_eq!(
            websocket_endpoint(&panel("https://panel.example.com")),
            "https://panel.example.com/api/client/servers/1a2b3c4d/websocket"
        );
    }

    #[test]
    fn parses_websocket_response() {
        let raw = r#"{"data":{"socket":"wss://node.example.com:8080/api/servers/x/ws","token":"jwt"}}"#;
        let body: WebsocketResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(body.data.token, "jwt");
        assert!(body.data.socket.starts_with("wss://"));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let creds = ConsoleCredentials {
            socket: "wss://x".into(),
            token: "jwt-secret".into(),
        };
        assert!(!format!("{creds:?}").contains("jwt-secret"));
        assert!(!format!("{:?}", panel("https://p")).contains("ptlc_secret"));
    }
}
