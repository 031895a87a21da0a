mod common;

use axum::http::StatusCode;
use common::{has_binary, test_app};
use judge::batch::REDACTED;
use serde_json::{Value, json};

const DOUBLER: &str = "n = int(input())\nprint(n * 2)";

fn doubler_cases() -> Value {
    json!([
        { "input": "1", "expectedOutput": "2" },
        { "input": "2", "expectedOutput": "5" },
        { "input": "3", "expectedOutput": "6" }
    ])
}

#[tokio::test]
async fn submit_redacts_when_any_case_fails() {
    if !has_binary("python3") {
        return;
    }
    let app = test_app(None);
    let (status, body) = app
        .post(
            "/submit",
            json!({ "language": "python", "code": DOUBLER, "testCases": doubler_cases() }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"], json!({ "passed": 2, "total": 3 }));

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    for verdict in results {
        assert_eq!(verdict["actualOutput"], REDACTED);
        assert_eq!(verdict["expectedOutput"], REDACTED);
    }
    assert_eq!(results[1]["passed"], false);
    app.assert_clean();
}

#[tokio::test]
async fn run_mode_keeps_details_visible() {
    if !has_binary("python3") {
        return;
    }
    let app = test_app(None);
    let (status, body) = app
        .post(
            "/run",
            json!({ "language": "python", "code": DOUBLER, "testCases": doubler_cases() }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"], json!({ "passed": 2, "total": 3 }));

    let results = body["results"].as_array().unwrap();
    assert_eq!(results[1]["testCaseIndex"], 1);
    assert_eq!(results[1]["expectedOutput"], "5");
    assert_eq!(results[1]["actualOutput"], "4\n");
    assert_eq!(results[1]["passed"], false);
    assert_eq!(results[0]["passed"], true);
    app.assert_clean();
}

#[tokio::test]
async fn passing_submit_is_not_redacted() {
    if !has_binary("python3") {
        return;
    }
    let app = test_app(None);
    let (_, body) = app
        .post(
            "/submit",
            json!({
                "language": "python",
                "code": DOUBLER,
                "testCases": [{ "input": "4", "expectedOutput": "8" }]
            }),
        )
        .await;

    assert_eq!(body["summary"], json!({ "passed": 1, "total": 1 }));
    assert_eq!(body["results"][0]["actualOutput"], "8\n");
}

#[tokio::test]
async fn structured_output_matches_despite_spacing() {
    if !has_binary("python3") {
        return;
    }
    let app = test_app(None);
    let (_, body) = app
        .post(
            "/run",
            json!({
                "language": "python",
                "code": "print('[1,2,3]')",
                "testCases": [{ "input": "", "expectedOutput": "[1, 2, 3]" }]
            }),
        )
        .await;

    assert_eq!(body["summary"]["passed"], 1);
    assert_eq!(body["results"][0]["passed"], true);
}

#[tokio::test]
async fn compile_error_fails_every_case() {
    if !has_binary("g++") {
        return;
    }
    let app = test_app(None);
    let (status, body) = app
        .post(
            "/run",
            json!({
                "language": "cpp",
                "code": "int main() { return }",
                "testCases": [
                    { "input": "", "expectedOutput": "" },
                    { "input": "", "expectedOutput": "" }
                ]
            }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"], json!({ "passed": 0, "total": 2 }));
    let first = body["results"][0]["error"].as_str().unwrap().to_string();
    assert_eq!(body["results"][1]["error"], first.as_str());
    app.assert_clean();
}

#[tokio::test]
async fn empty_case_list_is_bad_request() {
    let app = test_app(None);
    let (status, body) = app
        .post(
            "/submit",
            json!({ "language": "python", "code": "print(1)", "testCases": [] }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
    app.assert_clean();
}

#[tokio::test]
async fn unsupported_language_rejects_whole_batch() {
    let app = test_app(None);
    let (status, _) = app
        .post(
            "/submit",
            json!({
                "language": "brainfuck",
                "code": "+",
                "testCases": [{ "input": "", "expectedOutput": "" }]
            }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    app.assert_clean();
}
