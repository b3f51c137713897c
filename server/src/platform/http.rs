//! [`Platform`] backed by the platform gateway's REST API.
//!
//! Routes (relative to `base_url`, bot token in `Authorization: Bot <token>`):
//!
//! | call                       | route                                   |
//! |----------------------------|-----------------------------------------|
//! | send_message               | `POST   /channels/{id}/messages`        |
//! | send_as_identity           | `POST   /webhooks/{id}/{token}`         |
//! | find_outbound_identity     | `GET    /channels/{id}/webhooks`        |
//! | create_outbound_identity   | `POST   /channels/{id}/webhooks`        |
//! | delete_message             | `DELETE /channels/{id}/messages/{msg}`  |
//! | send_direct                | `POST   /users/{id}/direct-messages`    |
//! | check_permissions          | `GET    /channels/{id}/permissions`     |
//! | channel_exists             | `GET    /channels/{id}`                 |
//! | admin_channel              | `GET    /guilds/{id}/admin-channel`     |
//! | guild_stats                | `GET    /stats`                         |
//!
//! Files travel base64-encoded inside the JSON body.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{GuildStats, OutboundFile, OutboundIdentity, Platform, PlatformError};
use crate::engine::events::Attachment;
use crate::engine::permissions::{PermissionCheck, Permissions};

pub struct HttpPlatform {
    client: Client,
    base_url: String,
    token: String,
}

#[derive(Serialize)]
struct FilePayload<'a> {
    filename: &'a str,
    data: String,
}

impl<'a> From<&'a OutboundFile> for FilePayload<'a> {
    fn from(file: &'a OutboundFile) -> Self {
        Self {
            filename: &file.filename,
            data: STANDARD.encode(&file.data),
        }
    }
}

#[derive(Serialize)]
struct MessagePayload<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    avatar_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<FilePayload<'a>>,
}

#[derive(Deserialize)]
struct WebhookEntry {
    id: String,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    owned_by_self: bool,
}

#[derive(Deserialize)]
struct CreatedWebhook {
    id: String,
    token: String,
}

/// The gateway may send the permission integer as a JSON number or a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum PermissionBits {
    Number(u64),
    Text(String),
}

#[derive(Deserialize)]
struct PermissionsResponse {
    allow: PermissionBits,
}

#[derive(Deserialize)]
struct AdminChannelResponse {
    channel_id: Option<String>,
}

impl HttpPlatform {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, PlatformError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("RelayBridge/0.1")
            .build()
            .map_err(|e| PlatformError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.token))
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<Response, PlatformError> {
        let resp = builder.send().await.map_err(map_reqwest_error)?;
        check_status(resp)
    }
}

fn seg(s: &str) -> std::borrow::Cow<'_, str> {
    urlencoding::encode(s)
}

fn map_reqwest_error(e: reqwest::Error) -> PlatformError {
    if e.is_timeout() {
        PlatformError::Timeout
    } else {
        PlatformError::Transport(e.to_string())
    }
}

fn check_status(resp: Response) -> Result<Response, PlatformError> {
    match resp.status() {
        s if s.is_success() => Ok(resp),
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => Err(PlatformError::PermissionDenied),
        StatusCode::NOT_FOUND => Err(PlatformError::NotFound),
        StatusCode::PAYLOAD_TOO_LARGE => Err(PlatformError::PayloadTooLarge),
        s => Err(PlatformError::Transport(format!("unexpected status {s}"))),
    }
}

fn parse_permissions(bits: PermissionBits) -> Result<Permissions, PlatformError> {
    let raw = match bits {
        PermissionBits::Number(n) => n,
        PermissionBits::Text(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|e| PlatformError::Transport(format!("bad permission value: {e}")))?,
    };
    Ok(Permissions::from_bits_truncate(raw))
}

#[async_trait]
impl Platform for HttpPlatform {
    async fn send_message(
        &self,
        channel_id: &str,
        text: &str,
        file: Option<&OutboundFile>,
    ) -> Result<(), PlatformError> {
        let payload = MessagePayload {
            content: text,
            username: None,
            avatar_url: None,
            file: file.map(FilePayload::from),
        };
        self.execute(
            self.request(Method::POST, &format!("/channels/{}/messages", seg(channel_id)))
                .json(&payload),
        )
        .await?;
        Ok(())
    }

    async fn send_as_identity(
        &self,
        identity: &OutboundIdentity,
        text: &str,
        display_name: &str,
        avatar_url: Option<&str>,
        file: Option<&OutboundFile>,
    ) -> Result<(), PlatformError> {
        let payload = MessagePayload {
            content: text,
            username: Some(display_name),
            avatar_url,
            file: file.map(FilePayload::from),
        };
        self.execute(
            self.request(
                Method::POST,
                &format!("/webhooks/{}/{}", seg(&identity.id), seg(&identity.token)),
            )
            .json(&payload),
        )
        .await?;
        Ok(())
    }

    async fn find_outbound_identity(
        &self,
        channel_id: &str,
    ) -> Result<Option<OutboundIdentity>, PlatformError> {
        let resp = self
            .execute(self.request(Method::GET, &format!("/channels/{}/webhooks", seg(channel_id))))
            .await?;
        let entries: Vec<WebhookEntry> = resp.json().await.map_err(map_reqwest_error)?;

        Ok(entries
            .into_iter()
            .filter(|w| w.owned_by_self)
            .find_map(|w| {
                w.token.map(|token| OutboundIdentity {
                    id: w.id,
                    token,
                    channel_id: channel_id.to_string(),
                })
            }))
    }

    async fn create_outbound_identity(
        &self,
        channel_id: &str,
        name: &str,
    ) -> Result<OutboundIdentity, PlatformError> {
        let resp = self
            .execute(
                self.request(Method::POST, &format!("/channels/{}/webhooks", seg(channel_id)))
                    .json(&serde_json::json!({ "name": name })),
            )
            .await?;
        let created: CreatedWebhook = resp.json().await.map_err(map_reqwest_error)?;
        debug!(%channel_id, webhook_id = %created.id, "created outbound identity");

        Ok(OutboundIdentity {
            id: created.id,
            token: created.token,
            channel_id: channel_id.to_string(),
        })
    }

    async fn delete_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> Result<(), PlatformError> {
        self.execute(self.request(
            Method::DELETE,
            &format!("/channels/{}/messages/{}", seg(channel_id), seg(message_id)),
        ))
        .await?;
        Ok(())
    }

    async fn send_direct(&self, user_id: &str, text: &str) -> Result<(), PlatformError> {
        self.execute(
            self.request(Method::POST, &format!("/users/{}/direct-messages", seg(user_id)))
                .json(&serde_json::json!({ "content": text })),
        )
        .await?;
        Ok(())
    }

    async fn check_permissions(
        &self,
        channel_id: &str,
        required: Permissions,
    ) -> Result<PermissionCheck, PlatformError> {
        let resp = self
            .execute(self.request(
                Method::GET,
                &format!("/channels/{}/permissions", seg(channel_id)),
            ))
            .await?;
        let body: PermissionsResponse = resp.json().await.map_err(map_reqwest_error)?;
        let granted = parse_permissions(body.allow)?;
        Ok(PermissionCheck::evaluate(granted, required))
    }

    async fn fetch_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>, PlatformError> {
        let resp = self
            .client
            .get(&attachment.url)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let resp = check_status(resp)?;
        let bytes = resp.bytes().await.map_err(map_reqwest_error)?;
        Ok(bytes.to_vec())
    }

    async fn channel_exists(&self, channel_id: &str) -> Result<bool, PlatformError> {
        match self
            .execute(self.request(Method::GET, &format!("/channels/{}", seg(channel_id))))
            .await
        {
            Ok(_) => Ok(true),
            Err(PlatformError::NotFound) | Err(PlatformError::PermissionDenied) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn admin_channel(&self, guild_id: &str) -> Result<Option<String>, PlatformError> {
        match self
            .execute(self.request(
                Method::GET,
                &format!("/guilds/{}/admin-channel", seg(guild_id)),
            ))
            .await
        {
            Ok(resp) => {
                let body: AdminChannelResponse = resp.json().await.map_err(map_reqwest_error)?;
                Ok(body.channel_id)
            }
            Err(PlatformError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn guild_stats(&self) -> Result<GuildStats, PlatformError> {
        let resp = self.execute(self.request(Method::GET, "/stats")).await?;
        resp.json().await.map_err(map_reqwest_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_permissions_number_and_string() {
        let perms = parse_permissions(PermissionBits::Number(1 << 11)).unwrap();
        assert_eq!(perms, Permissions::SEND_MESSAGES);

        let perms = parse_permissions(PermissionBits::Text(" 34816 ".into())).unwrap();
        assert_eq!(perms, Permissions::SEND_MESSAGES | Permissions::ATTACH_FILES);

        assert!(parse_permissions(PermissionBits::Text("lots".into())).is_err());
    }

    #[test]
    fn test_permissions_response_accepts_both_shapes() {
        let body: PermissionsResponse = serde_json::from_str(r#"{"allow": "2048"}"#).unwrap();
        assert_eq!(
            parse_permissions(body.allow).unwrap(),
            Permissions::SEND_MESSAGES
        );
        let body: PermissionsResponse = serde_json::from_str(r#"{"allow": 2048}"#).unwrap();
        assert_eq!(
            parse_permissions(body.allow).unwrap(),
            Permissions::SEND_MESSAGES
        );
    }

    #[test]
    fn test_file_payload_is_base64() {
        let file = OutboundFile {
            filename: "a.txt".into(),
            data: b"hello".to_vec(),
        };
        let payload = FilePayload::from(&file);
        assert_eq!(payload.filename, "a.txt");
        assert_eq!(payload.data, "aGVsbG8=");
    }

    #[test]
    fn test_message_payload_skips_absent_fields() {
        let payload = MessagePayload {
            content: "hi",
            username: None,
            avatar_url: None,
            file: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json, serde_json::json!({ "content": "hi" }));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let platform =
            HttpPlatform::new("http://gateway.local/api/", "t", Duration::from_secs(1)).unwrap();
        assert_eq!(platform.base_url, "http://gateway.local/api");
    }

    #[test]
    fn test_path_segments_are_encoded() {
        assert_eq!(seg("a/b c"), "a%2Fb%20c");
    }
}
