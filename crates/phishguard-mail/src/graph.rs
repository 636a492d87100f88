//! Graph-style REST client
//!
//! Implements [`MailProvider`] against a Microsoft-Graph shaped API:
//! OData filters and continuation links for listing, `sendMail` for
//! outbound, `/subscriptions` for change notifications.

use crate::{MailError, MailProvider, SubscriptionInfo, SubscriptionRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use phishguard_analysis::{Importance, ReplyMessage};
use phishguard_common::config::MailApiConfig;
use phishguard_common::{AttachmentMeta, Email, HeaderMap};
use serde::Deserialize;
use serde_json::json;

const MESSAGE_SELECT: &str =
    "id,internetMessageId,subject,from,toRecipients,receivedDateTime,body,internetMessageHeaders";

/// REST client for one observed mailbox
pub struct GraphMailClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    mailbox: String,
}

#[derive(Debug, Deserialize)]
struct MessagePage {
    value: Vec<GraphMessage>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    id: String,
    internet_message_id: Option<String>,
    subject: Option<String>,
    from: Option<GraphRecipient>,
    to_recipients: Option<Vec<GraphRecipient>>,
    received_date_time: Option<DateTime<Utc>>,
    body: Option<GraphBody>,
    internet_message_headers: Option<Vec<GraphHeader>>,
    attachments: Option<Vec<GraphAttachment>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphRecipient {
    email_address: GraphEmailAddress,
}

#[derive(Debug, Deserialize)]
struct GraphEmailAddress {
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphBody {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphHeader {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphAttachment {
    name: Option<String>,
    content_type: Option<String>,
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionPage {
    value: Vec<GraphSubscription>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphSubscription {
    id: String,
    resource: String,
    notification_url: String,
    expiration_date_time: DateTime<Utc>,
}

impl GraphMailClient {
    pub fn new(config: &MailApiConfig, mailbox: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone().unwrap_or_default(),
            mailbox: mailbox.to_string(),
        }
    }

    fn map_status(status: reqwest::StatusCode, context: &str) -> MailError {
        match status.as_u16() {
            401 | 403 => MailError::Unauthorized,
            404 => MailError::NotFound(context.to_string()),
            429 => MailError::Transient(format!("throttled: {}", context)),
            s if s >= 500 => MailError::Transient(format!("status {}: {}", s, context)),
            s => MailError::Permanent(format!("status {}: {}", s, context)),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, MailError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| MailError::Transient(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::map_status(response.status(), url));
        }
        response
            .json()
            .await
            .map_err(|e| MailError::Permanent(format!("decode: {}", e)))
    }

    fn convert(&self, message: GraphMessage) -> Email {
        let mut headers = HeaderMap::new();
        for header in message.internet_message_headers.unwrap_or_default() {
            headers.insert(&header.name, header.value);
        }

        let attachments = message
            .attachments
            .unwrap_or_default()
            .into_iter()
            .map(|a| AttachmentMeta {
                filename: a.name.unwrap_or_default(),
                content_type: a.content_type.unwrap_or_default(),
                size_bytes: a.size.unwrap_or(0),
            })
            .collect();

        Email {
            message_id: message.internet_message_id.unwrap_or_default(),
            provider_id: message.id,
            sender: message
                .from
                .and_then(|r| r.email_address.address)
                .unwrap_or_default(),
            recipient: message
                .to_recipients
                .and_then(|r| r.into_iter().next())
                .and_then(|r| r.email_address.address)
                .unwrap_or_else(|| self.mailbox.clone()),
            subject: message.subject.unwrap_or_default(),
            received_at: message.received_date_time.unwrap_or_else(Utc::now),
            headers,
            body: message.body.and_then(|b| b.content).unwrap_or_default(),
            attachments,
        }
    }
}

#[async_trait]
impl MailProvider for GraphMailClient {
    async fn list_messages_since(
        &self,
        since: DateTime<Utc>,
        max_pages: u32,
    ) -> Result<Vec<Email>, MailError> {
        let filter = format!(
            "receivedDateTime ge {}",
            since.format("%Y-%m-%dT%H:%M:%SZ")
        );
        let mut url = format!(
            "{}/users/{}/messages?$filter={}&$orderby=receivedDateTime asc&$select={}&$expand=attachments($select=name,contentType,size)",
            self.base_url,
            self.mailbox,
            urlencode(&filter),
            MESSAGE_SELECT,
        );

        let mut emails = Vec::new();
        for page in 0..max_pages.max(1) {
            let body: MessagePage = self.get_json(&url).await?;
            emails.extend(body.value.into_iter().map(|m| self.convert(m)));
            match body.next_link {
                Some(next) => url = next,
                None => break,
            }
            if page + 1 == max_pages {
                tracing::debug!(max_pages, "poll pagination cap reached");
            }
        }
        Ok(emails)
    }

    async fn get_message(&self, provider_id: &str) -> Result<Email, MailError> {
        let url = format!(
            "{}/users/{}/messages/{}?$select={}&$expand=attachments($select=name,contentType,size)",
            self.base_url, self.mailbox, provider_id, MESSAGE_SELECT,
        );
        let message: GraphMessage = self.get_json(&url).await?;
        Ok(self.convert(message))
    }

    async fn send_reply(&self, reply: &ReplyMessage) -> Result<(), MailError> {
        let url = format!("{}/users/{}/sendMail", self.base_url, self.mailbox);
        let payload = json!({
            "message": {
                "subject": reply.subject,
                "body": { "contentType": "HTML", "content": reply.html_body },
                "toRecipients": reply.recipients.iter().map(|address| json!({
                    "emailAddress": { "address": address }
                })).collect::<Vec<_>>(),
                "importance": match reply.importance {
                    Importance::High => "high",
                    Importance::Normal => "normal",
                },
            },
            "saveToSentItems": true,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| MailError::Transient(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::map_status(response.status(), "sendMail"));
        }
        Ok(())
    }

    async fn list_subscriptions(&self) -> Result<Vec<SubscriptionInfo>, MailError> {
        let url = format!("{}/subscriptions", self.base_url);
        let page: SubscriptionPage = self.get_json(&url).await?;
        Ok(page
            .value
            .into_iter()
            .map(|s| SubscriptionInfo {
                id: s.id,
                resource: s.resource,
                notification_url: s.notification_url,
                expires_at: s.expiration_date_time,
            })
            .collect())
    }

    async fn create_subscription(
        &self,
        request: &SubscriptionRequest,
    ) -> Result<SubscriptionInfo, MailError> {
        let url = format!("{}/subscriptions", self.base_url);
        let payload = json!({
            "changeType": "created",
            "notificationUrl": request.notification_url,
            "resource": request.resource,
            "clientState": request.client_state,
            "expirationDateTime": request.expires_at.to_rfc3339(),
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| MailError::Transient(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::map_status(response.status(), "create subscription"));
        }
        let created: GraphSubscription = response
            .json()
            .await
            .map_err(|e| MailError::Permanent(format!("decode: {}", e)))?;
        Ok(SubscriptionInfo {
            id: created.id,
            resource: created.resource,
            notification_url: created.notification_url,
            expires_at: created.expiration_date_time,
        })
    }

    async fn renew_subscription(
        &self,
        id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<SubscriptionInfo, MailError> {
        let url = format!("{}/subscriptions/{}", self.base_url, id);
        let response = self
            .client
            .patch(&url)
            .bearer_auth(&self.token)
            .json(&json!({ "expirationDateTime": expires_at.to_rfc3339() }))
            .send()
            .await
            .map_err(|e| MailError::Transient(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Self::map_status(response.status(), "renew subscription"));
        }
        let renewed: GraphSubscription = response
            .json()
            .await
            .map_err(|e| MailError::Permanent(format!("decode: {}", e)))?;
        Ok(SubscriptionInfo {
            id: renewed.id,
            resource: renewed.resource,
            notification_url: renewed.notification_url,
            expires_at: renewed.expiration_date_time,
        })
    }

    async fn delete_subscription(&self, id: &str) -> Result<(), MailError> {
        let url = format!("{}/subscriptions/{}", self.base_url, id);
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| MailError::Transient(e.to_string()))?;
        if !response.status().is_success() && response.status().as_u16() != 404 {
            return Err(Self::map_status(response.status(), "delete subscription"));
        }
        Ok(())
    }
}

fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ' ' => out.push_str("%20"),
            ':' => out.push_str("%3A"),
            '\'' => out.push_str("%27"),
            _ => out.push(c),
        }
    }
    out
}
