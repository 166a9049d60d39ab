use crate::error::TransportError;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use pilot_core::StrategyId;
use url::Url;

/// Raw body chunks of one push connection. Frame boundaries are not aligned
/// with chunk boundaries.
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn connect(&self, strategy_id: StrategyId) -> Result<ChunkStream, TransportError>;
}

/// Long-lived `GET {server}/strategy/{id}/events` carrying newline-framed JSON.
pub struct HttpEventTransport {
    client: reqwest::Client,
    server: Url,
}

impl HttpEventTransport {
    /// The client must not carry a total request timeout; the stream is
    /// expected to stay open indefinitely.
    pub fn new(client: reqwest::Client, server: Url) -> Self {
        Self { client, server }
    }

    pub fn events_url(&self, strategy_id: StrategyId) -> Result<Url, TransportError> {
        self.server
            .join(&format!("strategy/{strategy_id}/events"))
            .map_err(|err| TransportError::Connect(err.to_string()))
    }
}

#[async_trait]
impl EventTransport for HttpEventTransport {
    async fn connect(&self, strategy_id: StrategyId) -> Result<ChunkStream, TransportError> {
        let url = self.events_url(strategy_id)?;
        let response = self
            .client
            .get(url)
            .header(
                reqwest::header::ACCEPT,
                "application/x-ndjson, text/event-stream",
            )
            .send()
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|err| TransportError::Stream(err.to_string()))
        });
        Ok(stream.boxed())
    }
}
