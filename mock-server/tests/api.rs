use axum::http::{self, Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, checksum, Echo, RawEcho};
use tower::ServiceExt;

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn empty_request(method: &str, uri: &str) -> Request<String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(String::new())
        .unwrap()
}

fn typed_request(method: &str, uri: &str, content_type: &str, body: Vec<u8>) -> Request<axum::body::Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, content_type)
        .body(axum::body::Body::from(body))
        .unwrap()
}

// --- /test ---

#[tokio::test]
async fn get_echoes_query_arguments() {
    let resp = app()
        .oneshot(empty_request(
            "GET",
            "/test?string=h%C3%A9llo%2Bg%C3%B8odbye&strings=a&strings=b&strings=c&number=123",
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let echo: Echo = body_json(resp).await;
    assert_eq!(echo.arguments["string"], vec!["héllo+gøodbye"]);
    assert_eq!(echo.arguments["strings"], vec!["a", "b", "c"]);
    assert_eq!(echo.arguments["number"], vec!["123"]);
    assert!(echo.attachment_info.is_none());
}

#[tokio::test]
async fn delete_echoes_query_arguments() {
    let resp = app().oneshot(empty_request("DELETE", "/test?id=101")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let echo: Echo = body_json(resp).await;
    assert_eq!(echo.arguments["id"], vec!["101"]);
}

#[tokio::test]
async fn url_encoded_post_reports_empty_attachment_info() {
    let resp = app()
        .oneshot(typed_request(
            "POST",
            "/test",
            mock_server::FORM_URL_ENCODED,
            b"flag=true&strings=a&strings=b".to_vec(),
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let echo: Echo = body_json(resp).await;
    assert_eq!(echo.arguments["flag"], vec!["true"]);
    assert_eq!(echo.arguments["strings"], vec!["a", "b"]);
    assert_eq!(echo.attachment_info, Some(Vec::new()));
}

#[tokio::test]
async fn multipart_post_reports_file_sizes_and_checksums() {
    let file = b"abcdefghijklmnopqrstuvwxyz";
    let mut body = Vec::new();
    body.extend_from_slice(b"--XYZ\r\nContent-Disposition: form-data; name=\"number\"\r\n\r\n123\r\n");
    body.extend_from_slice(
        b"--XYZ\r\nContent-Disposition: form-data; name=\"attachments\"; filename=\"test.txt\"\r\n\
          Content-Type: application/octet-stream\r\n\r\n",
    );
    body.extend_from_slice(file);
    body.extend_from_slice(b"\r\n--XYZ--\r\n");

    let resp = app()
        .oneshot(typed_request("POST", "/test", "multipart/form-data; boundary=XYZ", body))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let echo: Echo = body_json(resp).await;
    assert_eq!(echo.arguments["number"], vec!["123"]);
    let info = echo.attachment_info.unwrap();
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].name, "attachments");
    assert_eq!(info[0].file_name, "test.txt");
    assert_eq!(info[0].bytes, 26);
    assert_eq!(info[0].checksum, checksum(file));
}

#[tokio::test]
async fn custom_body_is_returned_unchanged() {
    let resp = app()
        .oneshot(typed_request("PUT", "/test", "text/plain", b"some text".to_vec()))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[http::header::CONTENT_TYPE], "text/plain");
    assert_eq!(&body_bytes(resp).await[..], b"some text");
}

// --- fixed endpoints ---

#[tokio::test]
async fn fibonacci_returns_count_numbers() {
    let resp = app()
        .oneshot(empty_request("GET", "/test/fibonacci?count=8"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let numbers: Vec<u64> = body_json(resp).await;
    assert_eq!(numbers, vec![0, 1, 1, 2, 3, 5, 8, 13]);
}

#[tokio::test]
async fn unauthorized_returns_403() {
    let resp = app().oneshot(empty_request("GET", "/test/unauthorized")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(&body_bytes(resp).await[..], b"access denied");
}

#[tokio::test]
async fn error_returns_500_with_message() {
    let resp = app().oneshot(empty_request("GET", "/test/error")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = body_json(resp).await;
    assert_eq!(body["message"], "something went wrong");
}

#[tokio::test]
async fn headers_echoes_x_headers_only() {
    let request = Request::builder()
        .uri("/test/headers")
        .header("X-Token", "abc")
        .header("Accept", "application/json")
        .body(String::new())
        .unwrap();
    let resp = app().oneshot(request).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let headers: std::collections::BTreeMap<String, String> = body_json(resp).await;
    assert_eq!(headers.get("x-token").map(String::as_str), Some("abc"));
    assert!(!headers.contains_key("accept"));
}

#[tokio::test]
async fn raw_echo_reports_request_bytes() {
    let resp = app()
        .oneshot(typed_request("POST", "/echo?a=1", "text/plain", b"hello".to_vec()))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let echo: RawEcho = body_json(resp).await;
    assert_eq!(echo.method, "POST");
    assert_eq!(echo.query.as_deref(), Some("a=1"));
    assert_eq!(echo.content_type.as_deref(), Some("text/plain"));
    assert_eq!(echo.body, b"hello");
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let resp = app().oneshot(empty_request("GET", "/nope")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
