//! Compile dispatch against a stand-in compilation service.

use std::time::Duration;

use axum::{http::StatusCode, routing::post, Json, Router};
use codecast::client::{Connection, LanguageMode, RoomSession, TextBufferFactory};
use codecast::clients::compile_client::CompileClient;
use codecast::error::CompileError;
use codecast::models::CompileRequest;
use serde_json::{json, Value};

/// Answers based on the submitted code.
async fn compile(Json(request): Json<CompileRequest>) -> (StatusCode, Json<Value>) {
    match request.code.as_str() {
        "print(1)" => (StatusCode::OK, Json(json!({"output": "1\n"}))),
        "print(" => (StatusCode::BAD_REQUEST, Json(json!({"error": "syntax error"}))),
        "echo" => (StatusCode::OK, Json(json!({"language": request.language}))),
        "sleep" => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            (StatusCode::OK, Json(json!({"output": "late"})))
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"detail": "boom"}))),
    }
}

async fn start_compiler() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let app = Router::new().route("/compile", post(compile));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://127.0.0.1:{port}/compile")
}

#[tokio::test]
async fn test_output_is_returned_verbatim() {
    let client = CompileClient::new(start_compiler().await);
    assert_eq!(client.submit("print(1)", "python").await.unwrap(), "1\n");
}

#[tokio::test]
async fn test_service_error_message_is_displayed() {
    let client = CompileClient::new(start_compiler().await);
    let err = client.submit("print(", "python").await.unwrap_err();
    assert!(matches!(err, CompileError::Rejected { status: 400, .. }));
    assert_eq!(client.submit_for_display("print(", "python").await, "syntax error");
}

#[tokio::test]
async fn test_body_without_output_is_serialized() {
    let client = CompileClient::new(start_compiler().await);
    assert_eq!(client.submit("echo", "c").await.unwrap(), r#"{"language":"c"}"#);
}

#[tokio::test]
async fn test_other_failures_show_generic_text() {
    let client = CompileClient::new(start_compiler().await);
    assert_eq!(client.submit_for_display("???", "python").await, "An error occurred");

    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let unreachable = CompileClient::new(format!("http://127.0.0.1:{port}/compile"));
    assert!(matches!(
        unreachable.submit("print(1)", "python").await,
        Err(CompileError::Failed(Some(_)))
    ));
    assert_eq!(unreachable.submit_for_display("print(1)", "python").await, "An error occurred");
}

#[tokio::test]
async fn test_configured_timeout_applies() {
    let client = CompileClient::new(start_compiler().await).with_timeout(Duration::from_millis(100));
    assert_eq!(client.submit_for_display("sleep", "python").await, "An error occurred");
}

#[tokio::test]
async fn test_session_runs_its_document() {
    let client = CompileClient::new(start_compiler().await);
    let (conn, _remote) = Connection::detached("a");
    let session = RoomSession::attach(conn, "R1", "alice", LanguageMode::new("python"), Box::new(TextBufferFactory::new())).unwrap();

    session.type_text("print(1)");
    assert_eq!(session.run_code(&client).await, "1\n");

    session.type_text("echo");
    assert_eq!(session.run_code(&client).await, r#"{"language":"python"}"#);
}
