// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! HTTP surface.
//!
//! Every JSON reply is a `{data, message}` envelope. Unknown ids and bad
//! input are answered with HTTP 200 and `message: "failed"`; only requests
//! axum itself cannot extract (e.g. a missing `user_id`) get a 4xx.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::header;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use fleet_core::record::format_line;
use fleet_core::{
    AccountLineParser, Fleet, LineParser, LogEntry, WorkerDetail, WorkerId, WorkerSpec,
    WorkerStatus, WorkerSummary,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const INDEX_HTML: &str = include_str!("../static/index.html");
const INDEX_JS: &str = include_str!("../static/index.js");

const SUCCESS: &str = "success";
const CREATED: &str = "create success";
const FAILED: &str = "failed";

/// Reply envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    data: T,
    message: &'static str,
}

impl<T> ApiResponse<T> {
    fn reply(data: T, message: &'static str) -> Json<Self> {
        Json(Self { data, message })
    }
}

/// `data` of `GET /client/{id}`; all fields empty when the id is unknown.
#[derive(Debug, Default, Serialize)]
pub struct DetailData {
    status: Option<WorkerStatus>,
    proxy_url: Option<String>,
    logs: Vec<LogEntry>,
}

impl From<WorkerDetail> for DetailData {
    fn from(detail: WorkerDetail) -> Self {
        Self {
            status: Some(detail.status),
            proxy_url: detail.proxy_url,
            logs: detail.logs,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateParams {
    user_id: String,
    proxy_url: Option<String>,
}

/// All routes, sharing one [`Fleet`].
pub fn router(fleet: Arc<Fleet>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/static/index.js", get(script))
        .route(
            "/client/",
            get(list_clients).post(create_client).delete(delete_all),
        )
        .route("/client/{id}", get(client_detail).delete(delete_client))
        .route("/upload/", post(upload))
        .layer(TraceLayer::new_for_http())
        .with_state(fleet)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn script() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/javascript; charset=utf-8")],
        INDEX_JS,
    )
}

async fn client_detail(
    State(fleet): State<Arc<Fleet>>,
    Path(id): Path<String>,
) -> Json<ApiResponse<DetailData>> {
    match id.parse::<WorkerId>().ok().and_then(|id| fleet.detail(&id)) {
        Some(detail) => ApiResponse::reply(detail.into(), SUCCESS),
        None => ApiResponse::reply(DetailData::default(), FAILED),
    }
}

async fn list_clients(State(fleet): State<Arc<Fleet>>) -> Json<ApiResponse<Vec<WorkerSummary>>> {
    ApiResponse::reply(fleet.overview(), SUCCESS)
}

/// `POST /client/?user_id=..&proxy_url=..`: register and launch one worker.
///
/// Answers `create success` with the new id. A spec the accounts file could
/// not read back (a `user_id` without a digit or with whitespace, or a proxy
/// that is not a URL) is refused: the reply is `{data: null, message:
/// "failed"}` and nothing is registered or persisted.
async fn create_client(
    State(fleet): State<Arc<Fleet>>,
    Query(params): Query<CreateParams>,
) -> Json<ApiResponse<Option<WorkerId>>> {
    let proxy_url = params.proxy_url.filter(|p| !p.trim().is_empty());
    let requested = WorkerSpec::new(params.user_id, proxy_url);
    match AccountLineParser.parse_line(&format_line(&requested)) {
        Ok(spec) => ApiResponse::reply(Some(fleet.add(spec)), CREATED),
        Err(err) => {
            warn!(%err, user_id = %requested.user_id, "rejected registration");
            ApiResponse::reply(None, FAILED)
        }
    }
}

async fn delete_client(
    State(fleet): State<Arc<Fleet>>,
    Path(id): Path<String>,
) -> Json<ApiResponse<String>> {
    let removed = match id.parse::<WorkerId>() {
        Ok(worker) => fleet.remove(worker).await,
        Err(_) => false,
    };
    ApiResponse::reply(id, if removed { SUCCESS } else { FAILED })
}

async fn delete_all(State(fleet): State<Arc<Fleet>>) -> Json<ApiResponse<Vec<WorkerId>>> {
    let removed = fleet.remove_all().await;
    info!(count = removed.len(), "all workers removed");
    ApiResponse::reply(Vec::new(), SUCCESS)
}

async fn upload(State(fleet): State<Arc<Fleet>>, mut multipart: Multipart) -> Json<ApiResponse<()>> {
    let text = loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some("file") || field.file_name().is_some() => {
                match field.bytes().await {
                    Ok(bytes) => break String::from_utf8_lossy(&bytes).into_owned(),
                    Err(err) => {
                        warn!(%err, "upload body unreadable");
                        return ApiResponse::reply((), FAILED);
                    }
                }
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!("upload carried no file");
                return ApiResponse::reply((), FAILED);
            }
            Err(err) => {
                warn!(%err, "malformed multipart upload");
                return ApiResponse::reply((), FAILED);
            }
        }
    };

    let ids = fleet.load_batch(&text);
    info!(count = ids.len(), "upload registered, launching in background");
    tokio::spawn(async move { fleet.launch_all(&ids) });
    ApiResponse::reply((), SUCCESS)
}
