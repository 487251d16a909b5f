//! Echo service used to exercise the proxy over real HTTP.
//!
//! `/test` reports back every argument it received, from the query string,
//! a URL-encoded body, or a multipart body, along with size and checksum of
//! each uploaded file. Any other POST/PUT/PATCH body is returned unchanged
//! under the same content type.

use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Query, RawQuery, Request},
    http::{header::CONTENT_TYPE, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{debug, info};

pub const FORM_URL_ENCODED: &str = "application/x-www-form-urlencoded";
pub const MULTIPART_FORM_DATA: &str = "multipart/form-data";

/// What `/test` received.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Echo {
    /// Argument values by name, in arrival order.
    pub arguments: BTreeMap<String, Vec<String>>,
    /// Uploaded files. `None` when the request had no body.
    pub attachment_info: Option<Vec<AttachmentInfo>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentInfo {
    pub name: String,
    pub file_name: String,
    pub bytes: u64,
    pub checksum: u64,
}

/// Everything `/echo` saw about a request, body included.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEcho {
    pub method: String,
    pub query: Option<String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Deserialize)]
pub struct FibonacciQuery {
    pub count: usize,
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

pub fn app() -> Router {
    Router::new()
        .route("/test", get(echo).post(echo).put(echo).delete(echo).patch(echo))
        .route("/test/fibonacci", get(fibonacci))
        .route("/test/unauthorized", any(unauthorized))
        .route("/test/error", any(failure))
        .route("/test/headers", any(echo_headers))
        .route("/echo", any(raw_echo))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "mock server listening");
    }
    axum::serve(listener, app()).await
}

/// Sum of the byte values, used to check uploads arrived intact.
pub fn checksum(data: &[u8]) -> u64 {
    data.iter().map(|&b| u64::from(b)).sum()
}

fn push(arguments: &mut BTreeMap<String, Vec<String>>, pairs: Vec<(String, String)>) {
    for (name, value) in pairs {
        arguments.entry(name).or_default().push(value);
    }
}

async fn echo(
    method: Method,
    Query(query): Query<Vec<(String, String)>>,
    request: Request,
) -> Result<Response, Response> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    debug!(%method, %content_type, "echo request");

    let mut echo = Echo::default();
    push(&mut echo.arguments, query);

    if content_type.starts_with(FORM_URL_ENCODED) {
        let Form(pairs) = Form::<Vec<(String, String)>>::from_request(request, &())
            .await
            .map_err(IntoResponse::into_response)?;
        push(&mut echo.arguments, pairs);
        echo.attachment_info = Some(Vec::new());
    } else if content_type.starts_with(MULTIPART_FORM_DATA) {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(IntoResponse::into_response)?;
        let mut info = Vec::new();
        while let Some(field) = multipart.next_field().await.map_err(IntoResponse::into_response)? {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let data = field.bytes().await.map_err(IntoResponse::into_response)?;
                    info.push(AttachmentInfo {
                        name,
                        file_name,
                        bytes: data.len() as u64,
                        checksum: checksum(&data),
                    });
                }
                None => {
                    let text = field.text().await.map_err(IntoResponse::into_response)?;
                    echo.arguments.entry(name).or_default().push(text);
                }
            }
        }
        echo.attachment_info = Some(info);
    } else if !content_type.is_empty() {
        let body = Bytes::from_request(request, &())
            .await
            .map_err(IntoResponse::into_response)?;
        debug!(bytes = body.len(), "echoing custom body");
        return Ok(([(CONTENT_TYPE, content_type)], body).into_response());
    }

    let delay = echo
        .arguments
        .get("delay")
        .and_then(|values| values.first())
        .and_then(|ms| ms.parse::<u64>().ok());
    if let Some(ms) = delay {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    Ok(Json(echo).into_response())
}

async fn fibonacci(Query(query): Query<FibonacciQuery>) -> Json<Vec<u64>> {
    let mut numbers = Vec::with_capacity(query.count);
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..query.count {
        numbers.push(a);
        (a, b) = (b, a.saturating_add(b));
    }
    Json(numbers)
}

async fn unauthorized() -> (StatusCode, &'static str) {
    (StatusCode::FORBIDDEN, "access denied")
}

async fn failure() -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            message: "something went wrong".to_string(),
        }),
    )
}

/// Report the `x-` headers of the request.
async fn echo_headers(headers: HeaderMap) -> Json<BTreeMap<String, String>> {
    let echoed = headers
        .iter()
        .filter(|(name, _)| name.as_str().starts_with("x-"))
        .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
        .collect();
    Json(echoed)
}

async fn raw_echo(method: Method, RawQuery(query): RawQuery, headers: HeaderMap, body: Bytes) -> Json<RawEcho> {
    Json(RawEcho {
        method: method.to_string(),
        query,
        content_type: headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        body: body.to_vec(),
    })
}
