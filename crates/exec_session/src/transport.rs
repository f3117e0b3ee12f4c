use async_trait::async_trait;
use exec_api::{
    ChannelEventSink, ExecApiClient, ExecApiConfig, ExecApiError, ExecutionRequest, HintReply,
    HintRequest, LiveChannel, RunOutcome,
};

/// Opens live channels. Each successful connect yields a fresh handle.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(&self, on_event: ChannelEventSink)
        -> Result<Box<dyn LiveHandle>, ExecApiError>;
}

/// One open live connection, owned exclusively by the controller.
pub trait LiveHandle: Send {
    fn send(&self, request: &ExecutionRequest);
    fn send_input(&self, text: &str);
    fn is_connected(&self) -> bool;
    fn disconnect(&mut self);
}

/// Request/response path to the execution service.
#[async_trait]
pub trait BatchExecutor: Send + Sync {
    async fn run(&self, request: &ExecutionRequest) -> Result<RunOutcome, ExecApiError>;
    async fn request_hint(&self, request: &HintRequest) -> Result<HintReply, ExecApiError>;
}

#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    config: ExecApiConfig,
}

impl WebSocketConnector {
    pub fn new(config: ExecApiConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl LiveConnector for WebSocketConnector {
    async fn connect(
        &self,
        on_event: ChannelEventSink,
    ) -> Result<Box<dyn LiveHandle>, ExecApiError> {
        let channel = LiveChannel::connect_with_config(&self.config, on_event).await?;
        Ok(Box::new(channel))
    }
}

impl LiveHandle for LiveChannel {
    fn send(&self, request: &ExecutionRequest) {
        LiveChannel::send(self, request);
    }

    fn send_input(&self, text: &str) {
        LiveChannel::send_input(self, text);
    }

    fn is_connected(&self) -> bool {
        LiveChannel::is_connected(self)
    }

    fn disconnect(&mut self) {
        LiveChannel::disconnect(self);
    }
}

#[async_trait]
impl BatchExecutor for ExecApiClient {
    async fn run(&self, request: &ExecutionRequest) -> Result<RunOutcome, ExecApiError> {
        ExecApiClient::run(self, request).await
    }

    async fn request_hint(&self, request: &HintRequest) -> Result<HintReply, ExecApiError> {
        ExecApiClient::request_hint(self, request).await
    }
}
