//! The wire boundary: a `Transport` sends one prepared request and hands back
//! status, content type and raw body. Payload decoding lives here too.

use super::request::Method;
use crate::error::FetchError;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A request with its URL resolved and body settled, ready for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait Transport: Send + Sync {
    fn send(&self, request: PreparedRequest) -> BoxFuture<'static, Result<RawResponse, FetchError>>;
}

/// Decoded response content.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    /// Decode by content type: `*json*` → JSON, `text/*` → text, anything
    /// else → bytes. An empty body is JSON null whatever the content type.
    pub fn decode(content_type: Option<&str>, body: &[u8]) -> Result<Self, FetchError> {
        if body.is_empty() {
            return Ok(Payload::Json(Value::Null));
        }
        let ct = content_type.unwrap_or_default().to_ascii_lowercase();
        if ct.contains("json") {
            serde_json::from_slice(body)
                .map(Payload::Json)
                .map_err(|e| FetchError::Decode(e.to_string()))
        } else if ct.starts_with("text/") {
            Ok(Payload::Text(String::from_utf8_lossy(body).into_owned()))
        } else {
            Ok(Payload::Binary(body.to_vec()))
        }
    }

    /// Deserialize into a caller type. Text payloads deserialize as a JSON
    /// string; binary payloads never deserialize.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        let value = match self {
            Payload::Json(v) => v.clone(),
            Payload::Text(s) => Value::String(s.clone()),
            Payload::Binary(b) => {
                return Err(FetchError::Decode(format!(
                    "cannot deserialize {} byte binary payload",
                    b.len()
                )))
            }
        };
        serde_json::from_value(value).map_err(|e| FetchError::Decode(e.to_string()))
    }

    /// Best-effort conversion for error bodies.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Payload::Json(Value::Null) => None,
            Payload::Json(v) => Some(v),
            Payload::Text(s) => Some(Value::String(s)),
            Payload::Binary(_) => None,
        }
    }
}

/// HTTP(S) transport backed by reqwest.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str) -> Result<Self, FetchError> {
        let client = Client::builder().user_agent(user_agent).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: PreparedRequest) -> BoxFuture<'static, Result<RawResponse, FetchError>> {
        let client = self.client.clone();
        async move {
            let mut builder = client
                .request(request.method.into(), &request.url)
                .query(&request.query);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let resp = builder.send().await?;
            let status = resp.status().as_u16();
            let content_type = resp
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = resp.bytes().await?.to_vec();

            Ok(RawResponse {
                status,
                content_type,
                body,
            })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_decode_by_content_type() {
        let json = Payload::decode(Some("application/json; charset=utf-8"), br#"{"id":7}"#).unwrap();
        assert_eq!(json, Payload::Json(serde_json::json!({"id": 7})));

        let text = Payload::decode(Some("text/plain"), b"ok").unwrap();
        assert_eq!(text, Payload::Text("ok".to_string()));

        let bin = Payload::decode(Some("application/octet-stream"), &[1, 2, 3]).unwrap();
        assert_eq!(bin, Payload::Binary(vec![1, 2, 3]));

        let missing = Payload::decode(None, &[9]).unwrap();
        assert_eq!(missing, Payload::Binary(vec![9]));
    }

    #[test]
    fn test_decode_empty_and_invalid() {
        assert_eq!(
            Payload::decode(Some("application/json"), b"").unwrap(),
            Payload::Json(Value::Null)
        );
        let err = Payload::decode(Some("application/json"), b"{not json").unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[test]
    fn test_parse() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Market {
            id: String,
        }
        let p = Payload::Json(serde_json::json!({"id": "7"}));
        assert_eq!(p.parse::<Market>().unwrap(), Market { id: "7".into() });
        assert_eq!(Payload::Text("hi".into()).parse::<String>().unwrap(), "hi");
        assert!(Payload::Binary(vec![0]).parse::<String>().is_err());
        assert!(p.parse::<Vec<u32>>().is_err());
    }
}
