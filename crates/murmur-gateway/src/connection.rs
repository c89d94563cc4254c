use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use murmur_types::events::{GatewayCommand, GatewayEvent};
use murmur_types::models::MessageKind;

use crate::error::ChatError;
use crate::registry::ConnectionHandle;
use crate::service::{ChatService, NewMessage};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Identity of one authenticated connection, fixed for its lifetime.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub user_id: Uuid,
    pub username: String,
    pub handle: ConnectionHandle,
}

impl ConnectionContext {
    pub fn conn_id(&self) -> Uuid {
        self.handle.conn_id
    }

    /// Report a failed command back to this connection only.
    fn reply_error(&self, err: &ChatError) {
        let message = match err {
            // Don't leak storage details to clients
            ChatError::Transient(_) => "Temporarily unavailable, try again".to_string(),
            other => other.to_string(),
        };
        self.handle.send(GatewayEvent::Error { message });
    }
}

/// Handle a pre-authenticated WebSocket connection. The token was validated
/// at the HTTP upgrade, so the loop starts with Ready.
pub async fn handle_connection(socket: WebSocket, service: ChatService, user_id: Uuid, username: String) {
    let (mut sender, mut receiver) = socket.split();

    let (handle, mut user_rx) = service.registry().register(user_id).await;
    let ctx = ConnectionContext {
        user_id,
        username,
        handle,
    };
    let conn_id = ctx.conn_id();

    info!("{} ({}) connected to gateway [conn={}]", ctx.username, user_id, conn_id);

    let ready = GatewayEvent::Ready {
        user_id,
        username: ctx.username.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        finish(&service, &ctx).await;
        return;
    }

    service.presence().connected(user_id).await;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = user_rx.recv() => {
                    let Some(event) = event else { break };
                    trace!("-> {} [conn={}]", event.kind(), conn_id);
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection {}", missed_heartbeats, conn_id);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let (stop_tx, stop_rx) = watch::channel(false);
    let recv_service = service.clone();
    let recv_ctx = ctx.clone();
    let mut recv_task = tokio::spawn(async move {
        read_commands(receiver, &recv_service, &recv_ctx, &pong_flag_recv, stop_rx).await;
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => {
            let _ = stop_tx.send(true);
            let _ = (&mut recv_task).await;
        }
        _ = &mut recv_task => send_task.abort(),
    }

    finish(&service, &ctx).await;
}

/// Commands are handled one at a time and never cancelled midway: a stop
/// request is only observed between commands, so a send_message that was
/// already read still gets persisted and fanned out.
async fn read_commands<R, E>(
    mut receiver: R,
    service: &ChatService,
    ctx: &ConnectionContext,
    pong_received: &AtomicBool,
    mut stop_rx: watch::Receiver<bool>,
) where
    R: Stream<Item = Result<Message, E>> + Unpin,
{
    loop {
        let msg = tokio::select! {
            msg = receiver.next() => msg,
            _ = stop_rx.changed() => break,
        };

        match msg {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<GatewayCommand>(&text) {
                Ok(cmd) => handle_command(service, ctx, cmd).await,
                Err(e) => {
                    warn!(
                        "{} ({}) bad command: {} -- raw: {}",
                        ctx.username,
                        ctx.user_id,
                        e,
                        text.chars().take(200).collect::<String>()
                    );
                    ctx.handle.send(GatewayEvent::Error {
                        message: format!("Malformed command: {}", e),
                    });
                }
            },
            Some(Ok(Message::Pong(_))) => {
                pong_received.store(true, Ordering::Release);
            }
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
            Some(Ok(_)) => {}
        }
    }
}

/// Unregister, and go offline only if no newer connection took over.
async fn finish(service: &ChatService, ctx: &ConnectionContext) {
    if service.registry().unregister(ctx.user_id, ctx.conn_id()).await {
        service.presence().disconnected(ctx.user_id).await;
        info!("{} ({}) disconnected from gateway", ctx.username, ctx.user_id);
    } else {
        debug!(
            "{} ({}) stale connection {} closed; a newer one is active",
            ctx.username,
            ctx.user_id,
            ctx.conn_id()
        );
    }
}

async fn send_event<S>(sender: &mut S, event: &GatewayEvent) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
{
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode {} event: {}", event.kind(), e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

async fn handle_command(service: &ChatService, ctx: &ConnectionContext, cmd: GatewayCommand) {
    let user_id = ctx.user_id;

    let result = match cmd {
        GatewayCommand::JoinConversations { conversation_ids } => {
            let requested = conversation_ids.len();
            service
                .join_conversations(user_id, ctx.conn_id(), conversation_ids)
                .await
                .map(|joined| {
                    info!(
                        "{} ({}) joined {}/{} conversation rooms",
                        ctx.username,
                        user_id,
                        joined.len(),
                        requested
                    );
                })
        }

        GatewayCommand::SendMessage {
            conversation_id,
            text,
            kind,
            file_url,
        } => {
            let new = NewMessage {
                kind: kind.unwrap_or(MessageKind::Text),
                text,
                file_url,
            };
            service
                .send_message(user_id, conversation_id, new)
                .await
                .map(|created| {
                    debug!("{} ({}) sent {}", ctx.username, user_id, created.message.id);
                })
        }

        GatewayCommand::MessageDelivered { message_id } => service
            .mark_delivered(user_id, message_id)
            .await
            .map(|_| ()),

        GatewayCommand::MessageSeen { conversation_id } => service
            .mark_conversation_seen(user_id, conversation_id)
            .await
            .map(|_| ()),

        GatewayCommand::Typing {
            conversation_id,
            is_typing,
        } => {
            service
                .router()
                .on_typing(user_id, conversation_id, is_typing)
                .await;
            Ok(())
        }
    };

    if let Err(e) = result {
        if e.is_terminal() {
            debug!("{} ({}) command rejected: {}", ctx.username, user_id, e);
        } else {
            error!("{} ({}) command failed: {:#}", ctx.username, user_id, e);
        }
        ctx.reply_error(&e);
    }
}
