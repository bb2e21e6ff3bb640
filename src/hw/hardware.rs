use std::pin::Pin;

use async_trait::async_trait;
use tokio_stream::Stream;
use tracing::trace;

use crate::error::{ExchangeError, TransportError};
use crate::handlers::FrameCodec;
use crate::protocol::EndpointId;
use crate::utils::format_hex;

/// Write acknowledgement mode for one characteristic write.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

/// Raw notification fragments from the reply characteristic, in arrival order.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// Link to one MA Touch controller.
///
/// Implementations own connection state; the protocol engine drives them
/// one call at a time.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Reports whether a link is currently up.
    async fn is_connected(&self) -> Result<bool, TransportError>;

    /// Establishes the link.
    async fn connect(&mut self) -> Result<(), TransportError>;

    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Resolves the control service and its characteristics.
    async fn discover(&mut self) -> Result<(), TransportError>;

    async fn read(&self, endpoint: EndpointId) -> Result<Vec<u8>, TransportError>;

    async fn write(
        &self,
        endpoint: EndpointId,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), TransportError>;

    /// Enables notifications and returns the fragment stream.
    async fn subscribe(&self, endpoint: EndpointId) -> Result<FragmentStream, TransportError>;

    /// Writes `frame` as ordered slices of at most `max_chunk` bytes.
    async fn write_chunked(
        &self,
        endpoint: EndpointId,
        frame: &[u8],
        max_chunk: usize,
        mode: WriteMode,
    ) -> Result<(), ExchangeError> {
        let mut offset = 0usize;
        for chunk in FrameCodec::chunk(frame, max_chunk)? {
            trace!(
                offset,
                remaining = frame.len() - offset,
                fragment = %format_hex(chunk),
                "sending fragment"
            );
            self.write(endpoint, chunk, mode).await?;
            offset += chunk.len();
        }
        Ok(())
    }
}
