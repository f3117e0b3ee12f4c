use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::config::ExecApiConfig;
use crate::error::ExecApiError;
use crate::events::{parse_inbound, ChannelEvent, InboundMessage};
use crate::payload::{ClientMessage, ExecutionRequest};

/// Single subscriber for everything a live channel reports.
pub type ChannelEventSink = Box<dyn FnMut(ChannelEvent) + Send + 'static>;

const NOT_CONNECTED_MESSAGE: &str = "Not connected to execution server";

type SharedSink = Arc<Mutex<ChannelEventSink>>;

/// Persistent bidirectional connection to the execution service.
///
/// Inbound frames are classified and delivered to the subscriber in arrival
/// order from a single reader task. The channel never reconnects: once closed
/// it stays closed and a fresh [`LiveChannel::connect`] is required.
pub struct LiveChannel {
    outgoing: mpsc::UnboundedSender<WsMessage>,
    connected: Arc<AtomicBool>,
    on_event: SharedSink,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for LiveChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveChannel")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl LiveChannel {
    pub async fn connect_with_config(
        config: &ExecApiConfig,
        on_event: ChannelEventSink,
    ) -> Result<Self, ExecApiError> {
        Self::connect(&config.live_endpoint(), on_event).await
    }

    pub async fn connect(url: &str, on_event: ChannelEventSink) -> Result<Self, ExecApiError> {
        let (stream, _response) = connect_async(url).await?;
        tracing::info!(url, "live channel connected");

        let (mut sink, mut source) = stream.split();
        let connected = Arc::new(AtomicBool::new(true));
        let on_event: SharedSink = Arc::new(Mutex::new(on_event));
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<WsMessage>();

        let writer = tokio::spawn({
            let connected = Arc::clone(&connected);
            let on_event = Arc::clone(&on_event);
            async move {
                while let Some(frame) = outgoing_rx.recv().await {
                    let closing = matches!(frame, WsMessage::Close(_));
                    if let Err(error) = sink.send(frame).await {
                        connected.store(false, Ordering::Release);
                        emit(
                            &on_event,
                            ChannelEvent::SendFailed {
                                message: error.to_string(),
                            },
                        );
                        break;
                    }
                    if closing {
                        break;
                    }
                }
                let _ = sink.close().await;
            }
        });

        let reader = tokio::spawn({
            let connected = Arc::clone(&connected);
            let on_event = Arc::clone(&on_event);
            async move {
                let reason = loop {
                    match source.next().await {
                        None => break None,
                        Some(Ok(WsMessage::Text(text))) => dispatch_frame(text.as_str(), &on_event),
                        Some(Ok(WsMessage::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                            Ok(text) => dispatch_frame(text, &on_event),
                            Err(_) => tracing::warn!("dropping non UTF-8 live channel frame"),
                        },
                        Some(Ok(WsMessage::Close(frame))) => {
                            break frame
                                .map(|frame| frame.reason.to_string())
                                .filter(|reason| !reason.is_empty());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(error)) => break Some(error.to_string()),
                    }
                };

                connected.store(false, Ordering::Release);
                tracing::info!(reason = reason.as_deref().unwrap_or(""), "live channel closed");
                emit(&on_event, ChannelEvent::Closed { reason });
            }
        });

        Ok(Self {
            outgoing,
            connected,
            on_event,
            reader: Some(reader),
            writer: Some(writer),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.outgoing.is_closed()
    }

    /// Submits a run. Pre-supplied input gets a trailing newline when missing.
    pub fn send(&self, request: &ExecutionRequest) {
        self.send_message(&ClientMessage::execute(request));
    }

    /// Forwards one line of program input.
    pub fn send_input(&self, text: &str) {
        self.send_message(&ClientMessage::input(text));
    }

    /// Closes the connection without reporting a `Closed` event.
    pub fn disconnect(&mut self) {
        let was_connected = self.connected.swap(false, Ordering::AcqRel);
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if was_connected {
            let _ = self.outgoing.send(WsMessage::Close(None));
        }
        // The writer exits after flushing the close frame.
        self.writer.take();
    }

    fn send_message(&self, message: &ClientMessage) {
        if !self.is_connected() {
            emit(
                &self.on_event,
                ChannelEvent::SendFailed {
                    message: NOT_CONNECTED_MESSAGE.to_string(),
                },
            );
            return;
        }

        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(error) => {
                emit(
                    &self.on_event,
                    ChannelEvent::SendFailed {
                        message: format!("failed to encode frame: {error}"),
                    },
                );
                return;
            }
        };

        if self.outgoing.send(WsMessage::Text(text.into())).is_err() {
            self.connected.store(false, Ordering::Release);
            emit(
                &self.on_event,
                ChannelEvent::SendFailed {
                    message: NOT_CONNECTED_MESSAGE.to_string(),
                },
            );
        }
    }
}

impl Drop for LiveChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn dispatch_frame(text: &str, on_event: &SharedSink) {
    match parse_inbound(text) {
        Ok(InboundMessage::Event(event)) => emit(on_event, ChannelEvent::Session(event)),
        Ok(InboundMessage::Unrecognized { event_type, .. }) => {
            tracing::warn!(event_type = %event_type, "dropping unknown live channel message");
        }
        Err(error) => {
            tracing::warn!(error = %error, "dropping malformed live channel message");
        }
    }
}

fn emit(on_event: &SharedSink, event: ChannelEvent) {
    let mut on_event = lock_unpoisoned(on_event);
    (*on_event)(event);
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
