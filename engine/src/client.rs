//! HTTP client for the reservation system's pull API.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use frontdesk_sync_core::source::{ReservationSource, SourceError};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

const MAX_ERROR_BODY: usize = 512;

/// [`ReservationSource`] over HTTP.
///
/// Every request carries the configured timeout, a bearer token when one is set,
/// and an `X-Source-System` header naming this system.
#[derive(Clone, Debug)]
pub struct HttpReservationSource {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    system_name: String,
}

impl HttpReservationSource {
    /// Create a client for `base_url` (e.g. `http://pms.local/api`).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Unreachable`] if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        system_name: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            system_name: system_name.into(),
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<Value>, SourceError> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self
            .client
            .get(&url)
            .header("X-Source-System", &self.system_name)
            .query(query);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SourceError::Timeout(e.to_string())
            } else {
                SourceError::Unreachable(e.to_string())
            }
        })?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SourceError::Unauthorized),
            status if status.is_success() => {
                let body: Value = response
                    .json()
                    .await
                    .map_err(|e| SourceError::InvalidResponse(e.to_string()))?;
                let items = extract_items(body)?;
                tracing::debug!(path, items = items.len(), "Fetched from reservation system");
                Ok(items)
            }
            status => {
                let mut body = response.text().await.unwrap_or_default();
                if body.len() > MAX_ERROR_BODY {
                    let mut cut = MAX_ERROR_BODY;
                    while !body.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    body.truncate(cut);
                }
                Err(SourceError::Status {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }
}

/// Items of a list response: either a bare array or `{"data": [...]}`.
///
/// # Errors
///
/// Returns [`SourceError::InvalidResponse`] for any other shape.
pub fn extract_items(body: Value) -> Result<Vec<Value>, SourceError> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(SourceError::InvalidResponse(
                "expected an array or an object with a data array".to_string(),
            )),
        },
        other => Err(SourceError::InvalidResponse(format!(
            "expected an array, got {other}"
        ))),
    }
}

#[async_trait]
impl ReservationSource for HttpReservationSource {
    async fn arrivals(&self, date: NaiveDate) -> Result<Vec<Value>, SourceError> {
        self.get("/arrivals", &[("date", date.to_string())]).await
    }

    async fn departures(&self, date: NaiveDate) -> Result<Vec<Value>, SourceError> {
        self.get("/departures", &[("date", date.to_string())]).await
    }

    async fn room_status(&self) -> Result<Vec<Value>, SourceError> {
        self.get("/rooms/status", &[]).await
    }

    async fn reservation_changes(&self, since: DateTime<Utc>) -> Result<Vec<Value>, SourceError> {
        let since = since.to_rfc3339_opts(SecondsFormat::Secs, true);
        self.get("/reservations/changes", &[("since", since)]).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code unwraps for brevity
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_array_and_data_wrapper_are_accepted() {
        assert_eq!(extract_items(json!([{"a": 1}])).unwrap().len(), 1);
        assert_eq!(
            extract_items(json!({"data": [{"a": 1}, {"a": 2}], "total": 2}))
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn other_shapes_are_invalid() {
        assert!(matches!(
            extract_items(json!({"items": []})),
            Err(SourceError::InvalidResponse(_))
        ));
        assert!(matches!(
            extract_items(json!("nope")),
            Err(SourceError::InvalidResponse(_))
        ));
    }

    #[test]
    fn trailing_slash_is_dropped() {
        let source = HttpReservationSource::new(
            "http://pms.local/api/",
            None,
            "reception",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(source.base_url, "http://pms.local/api");
    }

    #[tokio::test]
    async fn unreachable_host_is_systemic() {
        // Port 9 (discard) on localhost is closed on test machines.
        let source = HttpReservationSource::new(
            "http://127.0.0.1:9",
            None,
            "reception",
            Duration::from_secs(2),
        )
        .unwrap();
        let err = source.room_status().await.unwrap_err();
        assert!(matches!(
            err,
            SourceError::Unreachable(_) | SourceError::Timeout(_)
        ));
    }
}
