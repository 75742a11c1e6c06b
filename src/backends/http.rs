//! REST backend over HTTP

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace, warn};
use url::Url;

use crate::backend::SimulationBackend;
use crate::config::{RunMethod, SyncConfig, ValuesRoute};
use crate::types::{SimulationId, SimulationModel, SimulationParameters};
use crate::{Result, SyncError};

/// Fallback used when an error body carries no usable `message` field.
pub const DETAILS_UNAVAILABLE: &str = "details unavailable";

/// Backend speaking the simulation server's REST routes
///
/// Routes are resolved against `base_url` + `api_prefix`:
/// `new`, `run/{id}`, `get_values/{id}` (or `values/{id}`), `get_ids`,
/// `set_parameters/{id}`, `delete/{id}` and `ping`.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    api_base: Url,
    values_route: ValuesRoute,
    run_method: RunMethod,
}

impl HttpBackend {
    /// Build a backend from validated configuration.
    pub fn new(config: &SyncConfig) -> Result<Self> {
        config.validate()?;

        let mut api_base = Url::parse(&config.base_url).map_err(|e| {
            SyncError::config_error_with_source(
                format!("invalid base URL '{}'", config.base_url),
                Box::new(e),
            )
        })?;
        api_base
            .path_segments_mut()
            .map_err(|()| SyncError::config_error("base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(config.api_prefix.split('/').filter(|segment| !segment.is_empty()));

        let client = Client::builder().timeout(config.request_timeout()).build().map_err(|e| {
            SyncError::config_error_with_source("failed to build HTTP client", Box::new(e))
        })?;

        debug!(api_base = %api_base, values_route = ?config.values_route, "HTTP backend ready");

        Ok(Self { client, api_base, values_route: config.values_route, run_method: config.run_method })
    }

    /// Absolute URL of `route`, optionally followed by an identifier segment.
    pub fn endpoint(&self, route: &str, id: Option<&SimulationId>) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(route);
            if let Some(id) = id {
                segments.push(&id.to_string());
            }
        }
        url
    }

    async fn send(&self, label: &'static str, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(|e| {
            warn!(operation = label, error = %e, "Request failed without a response");
            match SyncError::from(e) {
                SyncError::Request { status, message } => {
                    SyncError::request_failed(status, format!("{label}: {message}"))
                }
                other => other,
            }
        })?;

        let status = response.status();
        trace!(operation = label, %status, "Response received");
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let error = request_error(label, status, &body);
        warn!(operation = label, %status, "{error}");
        Err(error)
    }

    async fn decode<T: DeserializeOwned>(label: &'static str, response: Response) -> Result<T> {
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| SyncError::protocol_error(label, e.to_string()))
    }

    /// Deployment-defined acknowledgement; an empty body is `null`.
    async fn ack(label: &'static str, response: Response) -> Result<Value> {
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| SyncError::protocol_error(label, e.to_string()))
    }
}

#[async_trait::async_trait]
impl SimulationBackend for HttpBackend {
    async fn create(&self, parameters: &SimulationParameters) -> Result<SimulationId> {
        const LABEL: &str = "create simulation";
        let request = self.client.post(self.endpoint("new", None)).json(parameters);
        let response = self.send(LABEL, request).await?;
        let id: SimulationId = Self::decode(LABEL, response).await?;
        id.validate().map_err(|e| SyncError::protocol_error(LABEL, e.to_string()))?;
        Ok(id)
    }

    async fn run(&self, id: &SimulationId) -> Result<Value> {
        const LABEL: &str = "run simulation";
        let method = match self.run_method {
            RunMethod::Post => Method::POST,
            RunMethod::Get => Method::GET,
        };
        let request = self.client.request(method, self.endpoint("run", Some(id)));
        let response = self.send(LABEL, request).await?;
        Self::ack(LABEL, response).await
    }

    async fn values(&self, id: &SimulationId) -> Result<SimulationModel> {
        const LABEL: &str = "fetch values";
        let url = self.endpoint(self.values_route.segment(), Some(id));
        let response = self.send(LABEL, self.client.get(url)).await?;
        Self::decode(LABEL, response).await
    }

    async fn ids(&self) -> Result<Vec<SimulationId>> {
        const LABEL: &str = "list ids";
        let response = self.send(LABEL, self.client.get(self.endpoint("get_ids", None))).await?;
        let body = response.text().await?;
        parse_ids(LABEL, &body)
    }

    async fn set_parameters(
        &self,
        id: &SimulationId,
        parameters: &SimulationParameters,
    ) -> Result<Value> {
        const LABEL: &str = "set parameters";
        let request = self.client.post(self.endpoint("set_parameters", Some(id))).json(parameters);
        let response = self.send(LABEL, request).await?;
        Self::ack(LABEL, response).await
    }

    async fn delete(&self, id: &SimulationId) -> Result<Value> {
        const LABEL: &str = "delete simulation";
        let response =
            self.send(LABEL, self.client.post(self.endpoint("delete", Some(id)))).await?;
        Self::ack(LABEL, response).await
    }

    async fn ping(&self) -> Result<()> {
        self.send("ping", self.client.get(self.endpoint("ping", None))).await?;
        Ok(())
    }
}

/// Build the error for a non-success response.
///
/// Renders `"<label>: <status> <reason> - <message>"`, taking `message` from a
/// JSON error body when present.
pub(crate) fn request_error(label: &str, status: StatusCode, body: &str) -> SyncError {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("message").and_then(Value::as_str).map(str::to_owned))
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| DETAILS_UNAVAILABLE.to_string());

    let status_line = match status.canonical_reason() {
        Some(reason) => format!("{} {reason}", status.as_u16()),
        None => status.as_u16().to_string(),
    };
    SyncError::request_failed(status.as_u16(), format!("{label}: {status_line} - {detail}"))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdList {
    Bare(Vec<SimulationId>),
    Wrapped { id: Vec<SimulationId> },
}

/// Accepts `{"id": [...]}` or a bare array; elements may be numbers, strings
/// or `{"id": n}` objects.
pub(crate) fn parse_ids(label: &str, body: &str) -> Result<Vec<SimulationId>> {
    let ids = match serde_json::from_str::<IdList>(body) {
        Ok(IdList::Bare(ids)) | Ok(IdList::Wrapped { id: ids }) => ids,
        Err(_) => {
            return Err(SyncError::protocol_error(
                label,
                format!("expected an array of identifiers, got {}", body.trim()),
            ));
        }
    };
    for id in &ids {
        id.validate().map_err(|e| SyncError::protocol_error(label, e.to_string()))?;
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(yaml: &str) -> HttpBackend {
        HttpBackend::new(&SyncConfig::from_yaml_str(yaml).unwrap()).unwrap()
    }

    #[test]
    fn endpoints_join_prefix_route_and_id() {
        let http = backend("base_url: http://10.0.0.5:8080\n");
        assert_eq!(
            http.endpoint("get_values", Some(&SimulationId::Number(7))).as_str(),
            "http://10.0.0.5:8080/api/get_values/7"
        );
        assert_eq!(http.endpoint("ping", None).as_str(), "http://10.0.0.5:8080/api/ping");

        let nested = backend("base_url: http://host/sim/\napi_prefix: /v2/api/\n");
        assert_eq!(
            nested.endpoint("run", Some(&SimulationId::from("night run"))).as_str(),
            "http://host/sim/v2/api/run/night%20run"
        );
    }

    #[test]
    fn error_message_uses_json_message_field() {
        let error = request_error(
            "fetch values",
            StatusCode::NOT_FOUND,
            r#"{"message": "Unknown id 150"}"#,
        );
        assert_eq!(error.status(), Some(404));
        assert_eq!(error.to_string(), "fetch values: 404 Not Found - Unknown id 150");
    }

    #[test]
    fn error_message_falls_back_when_body_is_unusable() {
        for body in ["", "Simulation not found", r#"{"error": "x"}"#, r#"{"message": ""}"#] {
            let error = request_error("ping", StatusCode::INTERNAL_SERVER_ERROR, body);
            assert_eq!(
                error.to_string(),
                "ping: 500 Internal Server Error - details unavailable",
                "body {body:?}"
            );
        }
    }

    #[test]
    fn id_lists_accept_every_backend_shape() {
        let wrapped = parse_ids("list ids", r#"{"id": [3, 7]}"#).unwrap();
        assert_eq!(wrapped, vec![SimulationId::Number(3), SimulationId::Number(7)]);

        let objects = parse_ids("list ids", r#"[{"id": 3}, {"id": 7}]"#).unwrap();
        assert_eq!(objects, wrapped);

        let names = parse_ids("list ids", r#"["a", 2]"#).unwrap();
        assert_eq!(names, vec![SimulationId::from("a"), SimulationId::Number(2)]);

        assert!(parse_ids("list ids", "[]").unwrap().is_empty());
    }

    #[test]
    fn malformed_id_lists_are_protocol_errors() {
        for body in [r#"{"ids": [1]}"#, r#"{"id": 3}"#, "null", r#"[true]"#, r#"[""]"#] {
            let error = parse_ids("list ids", body).unwrap_err();
            assert!(matches!(error, SyncError::Protocol { .. }), "{body} accepted");
        }
    }
}
