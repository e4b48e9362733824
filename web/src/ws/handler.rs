use crate::extractors::admitted_connection::AdmittedConnection;
use axum::extract::ws::{close_code, CloseFrame, Message as Frame, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use events::DomainEvent;
use futures::{sink::SinkExt, stream::StreamExt};
use log::*;
use service::AppState;
use session::admission::Admitted;
use session::lifecycle::Registration;
use session::manager::SubscribeOutcome;
use session::message::{ClientMessage, Event, EventType};
use session::{ConnectionHandle, ConnectionId};
use tokio::sync::mpsc;

/// WebSocket endpoint. Admission runs first; only an admitted handshake is
/// upgraded.
pub(crate) async fn ws_handler(
    AdmittedConnection(admitted): AdmittedConnection,
    State(app_state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    debug!("Upgrading WebSocket connection for user {}", admitted.identity);
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, admitted))
}

/// Drives one established connection until either side goes away.
async fn handle_socket(socket: WebSocket, app_state: AppState, admitted: Admitted) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<Frame>(app_state.config.outbound_buffer());
    let handle = ConnectionHandle::new(ConnectionId::new(), tx);

    let registration = match app_state
        .session_manager
        .open_connection(handle.clone(), admitted)
    {
        Ok(registration) => registration,
        Err(e) => {
            error!("Closing connection {} without registering it: {e}", handle.id());
            let close = Frame::Close(Some(CloseFrame {
                code: close_code::ERROR,
                reason: "internal error".into(),
            }));
            if let Err(e) = ws_sender.send(close).await {
                debug!("Failed to send close frame to {}: {e}", handle.id());
            }
            return;
        }
    };

    reply(
        &handle,
        Event::Welcome {
            connection_id: registration.connection_id().to_string(),
            user_id: registration.identity(),
        },
    );

    // Writer: drains the bounded queue the dispatcher fills.
    let mut sender_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            // A queued close means the connection was evicted server side.
            let closing = matches!(frame, Frame::Close(_));
            if ws_sender.send(frame).await.is_err() || closing {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Frame::Text(text))) => {
                    handle_client_message(&app_state, &registration, &handle, text.as_str()).await;
                }
                Some(Ok(Frame::Close(_))) | None => break,
                // Ping/pong is answered by the transport; binary frames are not part of the protocol.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Read error on connection {}: {e}", registration.connection_id());
                    break;
                }
            },
            _ = &mut sender_task => {
                debug!("Writer for connection {} stopped", registration.connection_id());
                break;
            }
        }
    }

    registration.close();
    sender_task.abort();
}

async fn handle_client_message(
    app_state: &AppState,
    registration: &Registration,
    handle: &ConnectionHandle,
    text: &str,
) {
    let connection_id = registration.connection_id();

    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            debug!("Unparseable message from connection {connection_id}: {e}");
            reply(
                handle,
                Event::Error {
                    message: "unrecognized message".to_string(),
                },
            );
            return;
        }
    };

    match message {
        ClientMessage::Ping { message } => {
            trace!("Ping from connection {connection_id}");
            reply(handle, Event::Pong { message });
        }
        ClientMessage::Subscribe { topic } => {
            let event = match app_state.session_manager.subscribe(connection_id, &topic) {
                SubscribeOutcome::Subscribed | SubscribeOutcome::AlreadySubscribed => {
                    Event::Subscribed {
                        topic: topic.trim().to_string(),
                    }
                }
                SubscribeOutcome::InvalidTopic => Event::Error {
                    message: "invalid topic".to_string(),
                },
                SubscribeOutcome::NotRegistered => Event::Error {
                    message: "connection is not registered".to_string(),
                },
            };
            reply(handle, event);
        }
        ClientMessage::Unsubscribe { topic } => {
            app_state.session_manager.unsubscribe(connection_id, &topic);
            reply(
                handle,
                Event::Unsubscribed {
                    topic: topic.trim().to_string(),
                },
            );
        }
        ClientMessage::Data { data, kind } => {
            info!(
                "Data message from user {} on connection {connection_id}",
                registration.identity()
            );
            app_state
                .event_publisher
                .publish(DomainEvent::ClientData {
                    user_id: registration.identity().value(),
                    kind,
                    data,
                })
                .await;
        }
    }
}

/// Queue a direct reply on this connection only.
fn reply(handle: &ConnectionHandle, event: Event) {
    let event_type = event.event_type();
    let frame = match event.to_frame() {
        Ok(frame) => frame,
        Err(e) => {
            error!("Failed to serialize {event_type} reply: {e}");
            return;
        }
    };
    if let Err(e) = handle.try_send(frame) {
        warn!(
            "Dropped {event_type} reply for connection {}: {e:?}",
            handle.id()
        );
    }
}
