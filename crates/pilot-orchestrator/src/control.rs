use crate::config::PilotConfig;
use crate::error::{ConfigError, ControlError};
use async_trait::async_trait;
use pilot_core::{RemoteStatus, StatusResponse, StrategyId};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Imperative requests against the remote strategy server.
#[async_trait]
pub trait ControlApi: Send + Sync {
    async fn initialize(&self, strategy_id: StrategyId) -> Result<(), ControlError>;
    async fn run(&self, strategy_id: StrategyId) -> Result<(), ControlError>;
    async fn stop(&self, strategy_id: StrategyId) -> Result<(), ControlError>;
    async fn query_status(&self, strategy_id: StrategyId) -> Result<RemoteStatus, ControlError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    Started,
    /// The remote already runs this strategy. Non-fatal.
    AlreadyRunning,
    Failed(ControlError),
}

pub fn classify_init(result: Result<(), ControlError>) -> InitOutcome {
    match result {
        Ok(()) => InitOutcome::Started,
        Err(ControlError::Conflict(_)) => InitOutcome::AlreadyRunning,
        Err(err) => InitOutcome::Failed(err),
    }
}

pub struct HttpControl {
    client: reqwest::Client,
    server: Url,
    timeout: Duration,
}

impl HttpControl {
    pub fn new(client: reqwest::Client, server: Url, timeout: Duration) -> Self {
        Self {
            client,
            server,
            timeout,
        }
    }

    pub fn from_config(config: &PilotConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.http_client()?,
            config.server_base()?,
            config.request_timeout(),
        ))
    }

    fn endpoint(&self, strategy_id: StrategyId, action: &str) -> Result<Url, ControlError> {
        self.server
            .join(&format!("strategy/{strategy_id}/{action}"))
            .map_err(|err| ControlError::Request(err.to_string()))
    }

    async fn post(&self, strategy_id: StrategyId, action: &str) -> Result<(), ControlError> {
        let url = self.endpoint(strategy_id, action)?;
        debug!(event = "control_request", strategy_id = %strategy_id, action, url = %url);
        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| ControlError::Request(err.to_string()))?;
        check_status(strategy_id, response).await.map(|_| ())
    }
}

async fn check_status(
    strategy_id: StrategyId,
    response: reqwest::Response,
) -> Result<reqwest::Response, ControlError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::CONFLICT {
        return Err(ControlError::Conflict(strategy_id));
    }
    let body = match response.text().await {
        Ok(body) => body,
        Err(err) => {
            debug!(
                event = "control_error_body_unreadable",
                strategy_id = %strategy_id,
                status = status.as_u16(),
                error = %err
            );
            String::new()
        }
    };
    Err(ControlError::Status {
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}

#[async_trait]
impl ControlApi for HttpControl {
    async fn initialize(&self, strategy_id: StrategyId) -> Result<(), ControlError> {
        self.post(strategy_id, "init").await
    }

    async fn run(&self, strategy_id: StrategyId) -> Result<(), ControlError> {
        self.post(strategy_id, "run").await
    }

    async fn stop(&self, strategy_id: StrategyId) -> Result<(), ControlError> {
        self.post(strategy_id, "stop").await
    }

    async fn query_status(&self, strategy_id: StrategyId) -> Result<RemoteStatus, ControlError> {
        let url = self.endpoint(strategy_id, "status")?;
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| ControlError::Request(err.to_string()))?;
        let response = check_status(strategy_id, response).await?;
        let payload = response
            .json::<StatusResponse>()
            .await
            .map_err(|err| ControlError::Decode(err.to_string()))?;
        Ok(payload.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> StrategyId {
        StrategyId::new(7).expect("id")
    }

    #[test]
    fn conflict_is_not_a_failure() {
        assert_eq!(
            classify_init(Err(ControlError::Conflict(id()))),
            InitOutcome::AlreadyRunning
        );
        assert_eq!(classify_init(Ok(())), InitOutcome::Started);
        let server_error = ControlError::Status {
            status: 500,
            body: "boom".to_string(),
        };
        assert_eq!(
            classify_init(Err(server_error.clone())),
            InitOutcome::Failed(server_error)
        );
    }

    fn response(status: u16, body: reqwest::Body) -> reqwest::Response {
        reqwest::Response::from(
            http::Response::builder()
                .status(status)
                .body(body)
                .expect("response"),
        )
    }

    #[tokio::test]
    async fn error_status_keeps_trimmed_body() {
        let err = check_status(id(), response(503, reqwest::Body::from(" maintenance\n")))
            .await
            .expect_err("503");
        assert_eq!(
            err,
            ControlError::Status {
                status: 503,
                body: "maintenance".to_string()
            }
        );

        let conflict = check_status(id(), response(409, reqwest::Body::from("busy")))
            .await
            .expect_err("409");
        assert_eq!(conflict, ControlError::Conflict(id()));
    }

    #[tokio::test]
    async fn unreadable_error_body_still_reports_status() {
        let broken = futures_util::stream::iter(vec![Err::<Vec<u8>, std::io::Error>(
            std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"),
        )]);
        let err = check_status(id(), response(500, reqwest::Body::wrap_stream(broken)))
            .await
            .expect_err("500");
        assert_eq!(
            err,
            ControlError::Status {
                status: 500,
                body: String::new()
            }
        );
    }

    #[test]
    fn endpoints_are_joined_under_server_base() {
        let control = HttpControl::new(
            reqwest::Client::new(),
            Url::parse("http://127.0.0.1:8686/").expect("url"),
            Duration::from_secs(1),
        );
        assert_eq!(
            control.endpoint(id(), "init").expect("url").as_str(),
            "http://127.0.0.1:8686/strategy/7/init"
        );
        assert_eq!(
            control.endpoint(id(), "status").expect("url").as_str(),
            "http://127.0.0.1:8686/strategy/7/status"
        );
    }
}
