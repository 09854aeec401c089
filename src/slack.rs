use crate::history::{HistoryPage, HistoryProvider};
use crate::timestamp::Record;
use crate::workspace::{AuthInfo, Conversation, ConversationKind, User, Workspace};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_API_BASE: &str = "https://slack.com/api";
pub const DEFAULT_MAX_RETRIES: u32 = 5;

const LIST_PAGE_SIZE: usize = 200;
const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum SlackError {
    #[error("request to {method} failed")]
    Transport {
        method: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} returned error `{error}`")]
    Api { method: String, error: String },

    #[error("{method} still rate limited after {attempts} attempts")]
    RateLimited { method: String, attempts: u32 },

    #[error("unexpected response from {method}: {reason}")]
    Decode { method: String, reason: String },
}

/// Blocking client for the Slack Web API.
pub struct SlackClient {
    http: Client,
    base_url: String,
    token: String,
    max_retries: u32,
}

impl SlackClient {
    pub fn new(token: impl Into<String>) -> Result<Self, SlackError> {
        let http = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| SlackError::Transport {
                method: "client setup".into(),
                source,
            })?;

        Ok(Self {
            http,
            base_url: DEFAULT_API_BASE.to_string(),
            token: token.into(),
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Call one API method, backing off while Slack answers 429.
    fn call(&self, method: &str, params: &[(&str, String)]) -> Result<Value, SlackError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), method);
        let transport = |source: reqwest::Error| SlackError::Transport {
            method: method.to_string(),
            source,
        };

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.token)
                .form(params)
                .send()
                .map_err(transport)?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempts > self.max_retries {
                    return Err(SlackError::RateLimited {
                        method: method.to_string(),
                        attempts,
                    });
                }
                let wait = retry_after(response.headers()).unwrap_or(DEFAULT_BACKOFF);
                warn!(method, wait_secs = wait.as_secs(), "rate limited, backing off");
                std::thread::sleep(wait);
                continue;
            }

            let body: Value = response
                .error_for_status()
                .map_err(transport)?
                .json()
                .map_err(transport)?;
            return check_ok(method, body);
        }
    }

    /// Follow `response_metadata.next_cursor` until it runs out, collecting `field`.
    fn paginate<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
        field: &str,
    ) -> Result<Vec<T>, SlackError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut page_params = params.to_vec();
            page_params.push(("limit", LIST_PAGE_SIZE.to_string()));
            if let Some(c) = &cursor {
                page_params.push(("cursor", c.clone()));
            }

            let mut body = self.call(method, &page_params)?;
            let batch: Vec<T> = take_field(method, &mut body, field)?;
            debug!(method, count = batch.len(), "listed page");
            items.extend(batch);

            cursor = next_cursor(&body);
            if cursor.is_none() {
                break;
            }
        }

        Ok(items)
    }
}

impl HistoryProvider for SlackClient {
    type Error = SlackError;

    fn history(
        &self,
        conversation_id: &str,
        oldest: f64,
        count: usize,
    ) -> Result<HistoryPage, SlackError> {
        let method = "conversations.history";
        let body = self.call(
            method,
            &[
                ("channel", conversation_id.to_string()),
                ("oldest", format!("{oldest:.6}")),
                ("limit", count.to_string()),
            ],
        )?;
        history_page(method, body)
    }
}

impl Workspace for SlackClient {
    fn auth_test(&self) -> Result<AuthInfo, SlackError> {
        #[derive(Deserialize)]
        struct Identity {
            team: String,
            user: String,
            user_id: String,
        }

        let method = "auth.test";
        let raw = self.call(method, &[])?;
        let identity: Identity = decode(method, raw.clone())?;
        Ok(AuthInfo {
            team: identity.team,
            user: identity.user,
            user_id: identity.user_id,
            raw,
        })
    }

    fn users(&self) -> Result<Vec<User>, SlackError> {
        self.paginate("users.list", &[], "members")
    }

    fn conversations(&self, kind: ConversationKind) -> Result<Vec<Conversation>, SlackError> {
        self.paginate(
            "conversations.list",
            &[
                ("types", kind.api_type().to_string()),
                ("exclude_archived", "false".to_string()),
            ],
            "channels",
        )
    }

    fn conversation_info(&self, conversation_id: &str) -> Result<Value, SlackError> {
        let method = "conversations.info";
        let mut body = self.call(method, &[("channel", conversation_id.to_string())])?;
        take_field(method, &mut body, "channel")
    }
}

/// Slack reports failures in-band with `"ok": false`.
fn check_ok(method: &str, body: Value) -> Result<Value, SlackError> {
    if body.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(body);
    }
    let error = body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown_error")
        .to_string();
    Err(SlackError::Api {
        method: method.to_string(),
        error,
    })
}

fn history_page(method: &str, mut body: Value) -> Result<HistoryPage, SlackError> {
    let has_more = body.get("has_more").and_then(Value::as_bool).unwrap_or(false);
    let messages: Vec<Record> = take_field(method, &mut body, "messages")?;
    Ok(HistoryPage { messages, has_more })
}

fn take_field<T: DeserializeOwned>(
    method: &str,
    body: &mut Value,
    field: &str,
) -> Result<T, SlackError> {
    let value = body
        .get_mut(field)
        .map(Value::take)
        .ok_or_else(|| SlackError::Decode {
            method: method.to_string(),
            reason: format!("missing `{field}`"),
        })?;
    decode(method, value)
}

fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, SlackError> {
    serde_json::from_value(value).map_err(|e| SlackError::Decode {
        method: method.to_string(),
        reason: e.to_string(),
    })
}

fn next_cursor(body: &Value) -> Option<String> {
    body.pointer("/response_metadata/next_cursor")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_owned)
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
