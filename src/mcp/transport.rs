use anyhow::Result;
use futures::{SinkExt, StreamExt};
use tokio::io::BufReader;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, error};

use super::types::{McpMessage, McpNotification, McpRequest, McpResponse};

/// Upper bound on one framed JSON-RPC line; larger input is a transport error.
const MAX_LINE_BYTES: usize = 1024 * 1024;

pub struct StdioTransport {
    reader: FramedRead<BufReader<tokio::io::Stdin>, LinesCodec>,
    writer: FramedWrite<tokio::io::Stdout, LinesCodec>,
}

impl StdioTransport {
    pub fn new() -> Self {
        let reader = FramedRead::new(
            BufReader::new(tokio::io::stdin()),
            LinesCodec::new_with_max_length(MAX_LINE_BYTES),
        );
        let writer = FramedWrite::new(tokio::io::stdout(), LinesCodec::new());

        Self { reader, writer }
    }

    pub async fn read_message(&mut self) -> Result<Option<McpMessage>> {
        match self.reader.next().await {
            Some(Ok(line)) => {
                debug!("Received: {}", line);
                parse_message(&line).map(Some)
            }
            Some(Err(e)) => {
                error!("Error reading from stdin: {}", e);
                Err(anyhow::anyhow!("Transport error: {}", e))
            }
            None => {
                debug!("EOF reached");
                Ok(None)
            }
        }
    }

    pub async fn write_response(&mut self, response: McpResponse) -> Result<()> {
        let json = serde_json::to_string(&response)?;
        debug!("Sending: {}", json);

        self.writer.send(json).await?;

        Ok(())
    }
}

/// Classifies one line: a message carrying `id` is a request, otherwise a notification.
fn parse_message(line: &str) -> Result<McpMessage> {
    let value: serde_json::Value = serde_json::from_str(line).map_err(|e| {
        error!("Failed to parse JSON: {}", e);
        anyhow::anyhow!("Invalid JSON: {}", e)
    })?;

    let Some(obj) = value.as_object() else {
        error!("Invalid JSON-RPC message structure");
        return Err(anyhow::anyhow!("Invalid JSON-RPC message structure"));
    };

    if obj.contains_key("id") {
        serde_json::from_value::<McpRequest>(value)
            .map(McpMessage::Request)
            .map_err(|e| {
                error!("Failed to parse request: {}", e);
                anyhow::anyhow!("Invalid JSON-RPC request: {}", e)
            })
    } else {
        serde_json::from_value::<McpNotification>(value)
            .map(McpMessage::Notification)
            .map_err(|e| {
                error!("Failed to parse notification: {}", e);
                anyhow::anyhow!("Invalid JSON-RPC notification: {}", e)
            })
    }
}
