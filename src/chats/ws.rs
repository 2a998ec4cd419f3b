use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{ws::WebSocket, Path, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tower_sessions::Session;
use uuid::Uuid;

use crate::events::{self, Event, Notifier};
use crate::{session, AppError, AppResult, AppState};

use super::msg;

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Message { content: String },
    Skip,
}

// persisted events out as JSON in order, chat or skip frames in
#[debug_handler(state = AppState)]
pub(crate) async fn conversation_ws(
    Path(conversation_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    State(notifier): State<Arc<Notifier>>,
    session: Session,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let user_id = session::current_user(&session).await?;
    if !msg::is_participant(&db_pool, conversation_id, user_id).await? {
        return Err(AppError::not_found("conversation"));
    }

    // subscribe before the upgrade so nothing published mid-handshake is lost
    let rx = notifier.subscribe(&events::conv_topic(conversation_id));
    Ok(ws
        .on_upgrade(move |stream| handle(stream, db_pool, notifier, rx, conversation_id, user_id))
        .into_response())
}

async fn handle(
    stream: WebSocket,
    db_pool: SqlitePool,
    notifier: Arc<Notifier>,
    mut rx: broadcast::Receiver<Event>,
    conversation_id: Uuid,
    user_id: Uuid,
) {
    let (mut sender, mut receiver) = stream.split();

    let forward = tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sender.send(text.into()).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = receiver.next().await {
        let Ok(frame) = serde_json::from_slice::<ClientFrame>(&frame.into_data()) else {
            continue;
        };

        let result = match frame {
            ClientFrame::Message { content } => {
                msg::send_msg(&db_pool, &notifier, conversation_id, user_id, &content)
                    .await
                    .map(|_| ())
            }
            ClientFrame::Skip => msg::skip(&db_pool, &notifier, conversation_id, user_id).await,
        };
        if let Err(err) = result {
            tracing::debug!(%conversation_id, %user_id, "ws frame rejected: {}", err.source);
        }
    }

    forward.abort();
}
