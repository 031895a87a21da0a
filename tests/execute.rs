mod common;

use std::time::{Duration, Instant};

use axum::http::StatusCode;
use common::{OUTPUT_LIMIT, has_binary, test_app, test_app_with_workspace_root};
use judge::sandbox::TRUNCATION_MARKER;
use serde_json::json;

#[tokio::test]
async fn health_reports_idle_service() {
    let app = test_app(None);
    let (status, body) = app.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["activeJobs"], 0);
    assert!(body["uptime"].is_u64());
}

#[tokio::test]
async fn stats_lists_no_jobs_when_idle() {
    let app = test_app(None);
    let (status, body) = app.get("/stats").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["activeJobs"], 0);
    assert_eq!(body["jobs"], json!([]));
}

#[tokio::test]
async fn languages_are_listed() {
    let app = test_app(None);
    let (status, body) = app.get("/languages").await;

    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["c", "cpp", "java", "python", "javascript"]);
}

#[tokio::test]
async fn missing_api_key_is_unauthorized() {
    let app = test_app(Some("s3cret"));
    let body = json!({ "language": "ruby", "code": "puts 1" });

    let (status, response) = app.post("/execute", body.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(response["error"], "Unauthorized");

    let (status, _) = app
        .post_with_headers("/execute", body, &[("authorization", "Bearer s3cret")])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unsupported_language_creates_no_workspace() {
    let app = test_app(None);
    let (status, body) = app
        .post("/execute", json!({ "language": "ruby", "code": "puts 1", "input": "" }))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("ruby"));
    app.assert_clean();
}

#[tokio::test]
async fn missing_fields_and_bad_json_are_bad_requests() {
    let app = test_app(None);

    let (status, body) = app.post("/execute", json!({ "language": "python" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Code is required");

    let (status, body) = app
        .post("/execute", json!({ "language": "python", "code": 42 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    app.assert_clean();
}

#[tokio::test]
async fn oversized_code_is_rejected() {
    let app = test_app(None);
    let code = "#".repeat(32 * 1024);
    let (status, body) = app
        .post("/execute", json!({ "language": "python", "code": code }))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("maximum size"));
    app.assert_clean();
}

#[tokio::test]
async fn python_hello_world() {
    if !has_binary("python3") {
        return;
    }
    let app = test_app(None);
    let (status, body) = app
        .post(
            "/execute",
            json!({
                "language": "python",
                "code": "name = input(); print(\"Hello, \" + name)",
                "input": "World"
            }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["output"], "Hello, World\n");
    assert_eq!(body["error"], json!(null));
    assert!(body["executionTime"].is_u64());
    app.assert_clean();
}

#[tokio::test]
async fn runtime_error_surfaces_stderr() {
    if !has_binary("python3") {
        return;
    }
    let app = test_app(None);
    let (status, body) = app
        .post(
            "/execute",
            json!({ "language": "python", "code": "print('before')\nraise ValueError('bad')" }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["status"], "runtime_failed");
    assert_eq!(body["output"], "before\n");
    assert!(body["error"].as_str().unwrap().contains("ValueError: bad"));
    app.assert_clean();
}

#[tokio::test]
async fn infinite_loop_times_out() {
    if !has_binary("python3") {
        return;
    }
    let app = test_app(None);
    let started = Instant::now();
    let (status, body) = app
        .post(
            "/execute",
            json!({ "language": "python", "code": "while True:\n    pass", "timeout": 500 }),
        )
        .await;

    assert!(started.elapsed() < Duration::from_millis(2_000));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["signal"], "timeout");
    assert_eq!(body["status"], "timed_out");
    assert_eq!(body["error"], "Execution timed out");
    app.assert_clean();
}

#[tokio::test]
async fn runaway_output_is_capped() {
    if !has_binary("python3") {
        return;
    }
    let app = test_app(None);
    let (status, body) = app
        .post(
            "/execute",
            json!({ "language": "python", "code": "while True:\n    print('x' * 100)", "timeout": 5000 }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["signal"], "outputLimit");
    assert_eq!(body["status"], "output_exceeded");
    let output = body["output"].as_str().unwrap();
    assert!(output.ends_with(TRUNCATION_MARKER));
    assert!(output.len() <= OUTPUT_LIMIT + TRUNCATION_MARKER.len());
    app.assert_clean();
}

#[tokio::test]
async fn cpp_compile_error_skips_run() {
    if !has_binary("g++") {
        return;
    }
    let app = test_app(None);
    let (status, body) = app
        .post(
            "/execute",
            json!({
                "language": "cpp",
                "code": "#include <iostream>\nint main() { std::cout << \"hi\" << std::endl return 0; }"
            }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["status"], "compile_failed");
    assert_eq!(body["output"], "");
    assert!(body["error"].as_str().unwrap().contains("error"));
    app.assert_clean();
}

#[tokio::test]
async fn cpp_program_compiles_and_runs() {
    if !has_binary("g++") {
        return;
    }
    let app = test_app(None);
    let (status, body) = app
        .post(
            "/execute",
            json!({
                "language": "c++",
                "code": "#include <iostream>\nint main() { int a, b; std::cin >> a >> b; std::cout << a + b << std::endl; }",
                "input": "2 3"
            }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["output"], "5\n");
    app.assert_clean();
}

#[tokio::test]
async fn concurrent_jobs_see_only_their_own_workspace() {
    if !has_binary("python3") {
        return;
    }
    let app = test_app(None);
    let code = "import os\nprint(sorted(os.listdir('.')))\nprint(os.getcwd())";

    let requests = (0..4).map(|_| {
        app.post("/execute", json!({ "language": "python", "code": code, "input": "" }))
    });
    let responses = futures_util::future::join_all(requests).await;

    let mut cwds = Vec::new();
    for (status, body) in responses {
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let output = body["output"].as_str().unwrap();
        let mut lines = output.lines();
        assert_eq!(lines.next(), Some("['input.txt', 'main.py']"));
        cwds.push(lines.next().unwrap().to_string());
    }
    cwds.sort();
    cwds.dedup();
    assert_eq!(cwds.len(), 4);
    app.assert_clean();
}

#[tokio::test]
async fn broken_workspace_root_reports_internal_error() {
    let root = tempfile::tempdir().unwrap();
    let file_root = root.path().join("occupied");
    std::fs::write(&file_root, "").unwrap();
    let app = test_app_with_workspace_root(root, file_root);

    let (status, body) = app
        .post("/execute", json!({ "language": "python", "code": "print(1)" }))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["status"], "internal_error");
    assert_eq!(body["output"], "");
    assert!(body["error"].is_string());
    assert!(body["executionTime"].is_u64());
    assert!(app.judge.registry().is_empty());
}
