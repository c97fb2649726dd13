//! Outbound HTTP for the whole client.
//!
//! Every call goes through `ApiGateway`: it attaches the current credential and, when the
//! API answers 401 to a credentialed call, ends that session (store cleared, state reset,
//! redirect to the login view) before handing the error back.

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::multipart;
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{AppError, AppResult};
use crate::identity::{SessionView, SignOutTrigger};

#[derive(Clone)]
pub struct ApiGateway {
    base: Url,
    client: reqwest::Client,
    session: SessionView,
    sign_out: SignOutTrigger,
}

impl ApiGateway {
    pub fn new(config: &ClientConfig, session: SessionView, sign_out: SignOutTrigger) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::network("client_init".to_string(), e.to_string()))?;
        Ok(Self { base: config.api_base.clone(), client, session, sign_out })
    }

    pub fn base(&self) -> &Url { &self.base }
    pub fn session(&self) -> &SessionView { &self.session }

    /// `path` is taken relative to the base, so a base of `https://host/api/v1` sends
    /// `/auth/login` to `https://host/api/v1/auth/login`.
    fn url(&self, path: &str, query: &[(&str, String)]) -> AppResult<Url> {
        let mut url = self
            .base
            .join(path.trim_start_matches('/'))
            .map_err(|e| AppError::validation("invalid_path".to_string(), format!("{}: {}", path, e)))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    /// Raw JSON request. A success with an empty body yields `Value::Null`.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        query: &[(&str, String)],
    ) -> AppResult<Value> {
        let url = self.url(path, query)?;
        self.dispatch(method, url, |rb| match body {
            Some(b) => rb.json(b),
            None => rb,
        })
        .await
    }

    /// `request` decoded into `T`.
    pub async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        query: &[(&str, String)],
    ) -> AppResult<T> {
        let value = self.request(method, path, body, query).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn send_multipart<T: DeserializeOwned>(&self, path: &str, form: multipart::Form) -> AppResult<T> {
        let url = self.url(path, &[])?;
        let value = self.dispatch(Method::POST, url, |rb| rb.multipart(form)).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn dispatch<F>(&self, method: Method, url: Url, prepare: F) -> AppResult<Value>
    where
        F: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        // credential and generation are captured together: a 401 can only end the
        // session this request was sent under
        let auth = self.session.credential_with_generation();
        let mut rb = self.client.request(method.clone(), url.clone());
        if let Some((cred, _)) = &auth {
            let value = HeaderValue::from_str(&cred.bearer())
                .map_err(|_| AppError::storage("invalid_credential", "stored credential is not a valid header value"))?;
            rb = rb.header(AUTHORIZATION, value);
        }
        let resp = prepare(rb).send().await.map_err(|e| {
            warn!(target: "meterbill", "{} {} failed: {}", method, url.path(), e);
            AppError::from(e)
        })?;
        let status = resp.status();
        debug!(target: "meterbill", "{} {} -> {}", method, url.path(), status.as_u16());
        let bytes = resp.bytes().await?;

        if status.is_success() {
            if bytes.iter().all(|b| b.is_ascii_whitespace()) {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_slice(&bytes)?);
        }

        let message = error_detail(&bytes)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
        if status == StatusCode::UNAUTHORIZED {
            if let Some((_, generation)) = &auth {
                if self.sign_out.unauthorized(*generation) {
                    warn!(target: "meterbill", "credential rejected on {} {}; signed out", method, url.path());
                }
            }
        }
        Err(AppError::from_status(status.as_u16(), auth.is_some(), message))
    }
}

/// Pull a human-readable message out of an error body.
/// FastAPI sends `{"detail": "..."}`, or a list of `{"msg": ...}` entries for 422s.
pub fn error_detail(bytes: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(bytes).ok()?.trim();
    if text.is_empty() {
        return None;
    }
    let Ok(v) = serde_json::from_str::<Value>(text) else {
        return Some(text.chars().take(200).collect());
    };
    let detail = v.get("detail").or_else(|| v.get("message")).or_else(|| v.get("error"))?;
    match detail {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let msgs: Vec<String> = items
                .iter()
                .map(|it| match it.get("msg").and_then(|m| m.as_str()) {
                    Some(m) => m.to_string(),
                    None => it.to_string(),
                })
                .collect();
            if msgs.is_empty() { None } else { Some(msgs.join("; ")) }
        }
        other => Some(other.to_string()),
    }
}
