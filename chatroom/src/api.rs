use crate::{
    chat::{self, ImageUpload, UserTurn},
    completion::CompletionGateway,
    config::Config,
    db::{self, with_conn, DbPool},
    error::ChatError,
    messages,
    model::NewMessage,
    rooms,
};
use anyhow::Result;
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::{JsonRejection, PathRejection, QueryRejection},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, TcpListener};
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub gateway: CompletionGateway,
    pub config: Config,
}

impl AppState {
    /// Open the configured database and build the completion client.
    pub fn new(config: Config) -> Result<Self> {
        let pool = db::open_pool(&config.database)?;
        Self::with_pool(config, pool)
    }

    pub fn with_pool(config: Config, pool: DbPool) -> Result<Self> {
        let gateway = CompletionGateway::new(config.completion.clone())?;
        Ok(Self {
            pool,
            gateway,
            config,
        })
    }
}

/// Uniform `{code, msg, data}` response body.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: u16,
    pub msg: String,
    pub data: Option<T>,
}

fn ok<T: Serialize>(msg: &str, data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        code: 0,
        msg: msg.into(),
        data: Some(data),
    })
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let code = self.code();
        if code >= 500 {
            warn!(code, error = %self, "request failed");
        }
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ApiResponse::<()> {
            code,
            msg: self.to_string(),
            data: None,
        };
        (status, Json(body)).into_response()
    }
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    let conversations = Router::new()
        .route(
            "/conversations/:conversation_id/messages",
            post(send_conversation_message),
        )
        .layer(DefaultBodyLimit::max(
            state.config.max_upload_bytes() as usize,
        ));
    Router::new()
        .route("/health", get(health))
        .route("/room/add", post(add_room))
        .route("/room/list", get(list_rooms))
        .route("/room/delete", post(delete_room))
        .route("/room/rename", post(rename_room))
        .route("/room/message/add", post(add_message))
        .route("/room/message/list", get(list_messages))
        .merge(conversations)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

fn bad_json(e: JsonRejection) -> ChatError {
    ChatError::validation(e.body_text())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddRoomReq {
    room_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddRoomResp {
    room_id: i64,
}

async fn add_room(
    State(state): State<AppState>,
    req: Result<Json<AddRoomReq>, JsonRejection>,
) -> Result<impl IntoResponse, ChatError> {
    let Json(req) = req.map_err(bad_json)?;
    let room = with_conn(&state.pool, move |conn| {
        rooms::create_room(conn, &req.room_name)
    })
    .await?;
    Ok(ok("Room created", AddRoomResp { room_id: room.id }))
}

async fn list_rooms(State(state): State<AppState>) -> Result<impl IntoResponse, ChatError> {
    let list = with_conn(&state.pool, |conn| rooms::list_rooms(conn)).await?;
    Ok(ok("Success", list))
}

#[derive(Deserialize)]
struct RoomIdQuery {
    #[serde(rename = "roomId")]
    room_id: Option<i64>,
}

fn room_id_from(query: Result<Query<RoomIdQuery>, QueryRejection>) -> Result<i64, ChatError> {
    let Query(q) = query.map_err(|_| ChatError::validation("invalid room id"))?;
    let room_id = q
        .room_id
        .ok_or_else(|| ChatError::validation("room id is required"))?;
    rooms::check_room_id(room_id)?;
    Ok(room_id)
}

async fn delete_room(
    State(state): State<AppState>,
    query: Result<Query<RoomIdQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ChatError> {
    let room_id = room_id_from(query)?;
    with_conn(&state.pool, move |conn| rooms::delete_room(conn, room_id)).await?;
    Ok(Json(ApiResponse::<()> {
        code: 0,
        msg: "Room deleted".into(),
        data: None,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenameRoomReq {
    room_id: i64,
    room_name: String,
}

async fn rename_room(
    State(state): State<AppState>,
    req: Result<Json<RenameRoomReq>, JsonRejection>,
) -> Result<impl IntoResponse, ChatError> {
    let Json(req) = req.map_err(bad_json)?;
    let room = with_conn(&state.pool, move |conn| {
        rooms::rename_room(conn, req.room_id, &req.room_name)
    })
    .await?;
    Ok(ok("Room renamed", room))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddMessageReq {
    room_id: i64,
    #[serde(default, alias = "profile_id")]
    profile_id: i64,
    sender: String,
    content: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddMessageResp {
    message_id: i64,
}

async fn add_message(
    State(state): State<AppState>,
    req: Result<Json<AddMessageReq>, JsonRejection>,
) -> Result<impl IntoResponse, ChatError> {
    let Json(req) = req.map_err(bad_json)?;
    let new_msg = NewMessage::text(req.room_id, req.sender, req.content).with_profile(req.profile_id);
    let message =
        with_conn(&state.pool, move |conn| messages::append_with_preview(conn, new_msg)).await?;
    Ok(ok(
        "Message added",
        AddMessageResp {
            message_id: message.id,
        },
    ))
}

async fn list_messages(
    State(state): State<AppState>,
    query: Result<Query<RoomIdQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ChatError> {
    let room_id = room_id_from(query)?;
    let msgs = with_conn(&state.pool, move |conn| messages::list_by_room(conn, room_id)).await?;
    Ok(ok("Success", msgs))
}

async fn read_turn(mut multipart: Multipart) -> Result<UserTurn, ChatError> {
    let bad = |e: MultipartError| ChatError::validation(e.to_string());
    let mut turn = UserTurn::default();
    while let Some(field) = multipart.next_field().await.map_err(bad)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("text") => turn.text = field.text().await.map_err(bad)?,
            Some("sender") => turn.sender = Some(field.text().await.map_err(bad)?),
            Some("image") => {
                let file_name = field.file_name().map(str::to_owned);
                let content_type = field.content_type().map(str::to_owned);
                let data = field.bytes().await.map_err(bad)?;
                // browsers send an empty part when no file was picked
                if !data.is_empty() {
                    turn.image = Some(ImageUpload {
                        data,
                        file_name,
                        content_type,
                    });
                }
            }
            _ => {}
        }
    }
    Ok(turn)
}

async fn send_conversation_message(
    State(state): State<AppState>,
    conversation_id: Result<Path<i64>, PathRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, ChatError> {
    let Path(room_id) =
        conversation_id.map_err(|_| ChatError::validation("invalid conversation id"))?;
    rooms::check_room_id(room_id)?;
    let multipart = multipart.map_err(|e| ChatError::validation(e.body_text()))?;
    let turn = read_turn(multipart).await?;
    let result = chat::run_turn(&state.pool, &state.gateway, room_id, turn).await?;
    Ok(Json(result))
}

/// Serve the router on an already bound listener until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    listener.set_nonblocking(true)?;
    axum::Server::from_tcp(listener)?
        .serve(build_router(state).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Run the HTTP server bound to the configured address until Ctrl-C.
pub async fn run_http_server(config: Config) -> Result<()> {
    let state = AppState::new(config)?;
    let addr: SocketAddr = state.config.bind.parse()?;
    let listener = TcpListener::bind(addr)?;
    info!(%addr, database = %state.config.database.display(), "chat server listening");
    serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutting down");
    })
    .await
}
