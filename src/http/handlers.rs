//! Route handlers.
//!
//! Each handler collects its input, hands the guard work to a blocking
//! thread, and renders the result as escaped HTML. Rejections come back as
//! `GuardError` and render through its `IntoResponse` impl.

use std::io::Write;
use std::time::Instant;

use axum::{
    extract::{multipart::Field, Multipart, Query, State},
    response::{IntoResponse, Response},
    Extension, Form, Json,
};
use serde::Deserialize;

use crate::error::{GuardError, GuardResult};
use crate::guard::{CommandRequest, GuardKind, UploadRequest};
use crate::http::response::{html_message, html_pre};
use crate::http::server::AppState;
use crate::security::SessionToken;

const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct CommandBody {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub name: String,
}

/// Run guard work off the async runtime.
async fn blocking<T, F>(f: F) -> GuardResult<T>
where
    F: FnOnce() -> GuardResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| GuardError::internal(format!("blocking task failed: {}", e)))?
}

pub async fn health() -> &'static str {
    "OK"
}

/// `POST /upload`, multipart field `file`.
pub async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let field = loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some(UPLOAD_FIELD) => break field,
            Ok(Some(_)) => continue,
            Ok(None) => {
                return state
                    .guards
                    .audit
                    .reject(GuardKind::Upload, GuardError::validation("No file uploaded"))
                    .into_response();
            }
            Err(e) => return e.into_response(),
        }
    };

    let file_name = field.file_name().unwrap_or_default().to_string();
    let declared_mime = field.content_type().map(str::to_string);

    let staged = match stage_field(field, &state).await {
        Ok(staged) => staged,
        Err(response) => return response,
    };

    let upload = state.guards.upload.clone();
    let result = blocking(move || {
        let (temp, size) = staged;
        let request = UploadRequest {
            file_name,
            declared_size: size,
            declared_mime,
            temp_path: temp.path().to_path_buf(),
        };
        // `temp` is removed on drop unless the guard moved it away.
        upload.accept(&request)
    })
    .await;

    match result {
        Ok(stored) => html_message(&format!("File uploaded successfully: {}", stored.file_name))
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Stream a multipart field into a staging file, stopping one byte past the
/// size limit.
async fn stage_field(
    mut field: Field<'_>,
    state: &AppState,
) -> Result<(tempfile::NamedTempFile, u64), Response> {
    let limit = state.guards.upload.max_size();
    let mut temp = tempfile::Builder::new()
        .prefix("upload-")
        .tempfile_in(&state.staging_dir)
        .map_err(|e| GuardError::from(e).into_response())?;

    let mut size: u64 = 0;
    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                let room = (limit + 1).saturating_sub(size) as usize;
                let take = chunk.len().min(room);
                temp.write_all(&chunk[..take])
                    .map_err(|e| GuardError::from(e).into_response())?;
                size += take as u64;
                if size > limit {
                    tracing::debug!(limit, "Upload exceeded size limit while streaming");
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => return Err(e.into_response()),
        }
    }
    temp.flush().map_err(|e| GuardError::from(e).into_response())?;
    Ok((temp, size))
}

/// `POST /login`, form `username` and `password`.
pub async fn login(
    State(state): State<AppState>,
    Extension(SessionToken(token)): Extension<SessionToken>,
    Form(form): Form<LoginForm>,
) -> Response {
    let result = blocking(move || {
        let mut window = state
            .sessions
            .with_session(&token, |s| s.login_window.clone())
            .ok_or_else(|| GuardError::validation("Session not found"))?;

        let outcome = state.db.with_conn(|conn| {
            state
                .auth
                .login(conn, &form.username, &form.password, &mut window, Instant::now())
        });

        state.sessions.with_session(&token, |s| {
            s.login_window = window;
            if let Ok(user) = &outcome {
                s.user_id = Some(user.id);
            }
        });
        outcome
    })
    .await;

    match result {
        Ok(user) => html_message(&format!("Welcome {}", user.username)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `POST /command`, JSON `{"command": .., "args": [..]}`.
pub async fn command(
    State(state): State<AppState>,
    Extension(SessionToken(token)): Extension<SessionToken>,
    Json(body): Json<CommandBody>,
) -> Response {
    let result = blocking(move || {
        let request = CommandRequest::new(body.command, body.args);
        let guard = &state.guards.command;
        let validated = state
            .sessions
            .with_session(&token, |s| {
                guard.authorize(&request, &mut s.command_window, Instant::now())
            })
            .ok_or_else(|| GuardError::validation("Session not found"))??;
        guard.execute(validated)
    })
    .await;

    match result {
        Ok(output) => html_pre(&output).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /page?name=`.
pub async fn page(State(state): State<AppState>, Query(params): Query<PageParams>) -> Response {
    let include = state.guards.include.clone();
    match blocking(move || include.include(&params.name)).await {
        Ok(file) => html_pre(&file.text()).into_response(),
        Err(e) => e.into_response(),
    }
}
