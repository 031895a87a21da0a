#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use judge::{
    batch::BatchRunner,
    judge::{Judge, JudgeLimits},
    languages::LanguageRegistry,
    router,
    sandbox::{ProcessSandbox, Sandbox},
    types::AppState,
};
use serde_json::Value;
use tower::ServiceExt;

pub const OUTPUT_LIMIT: usize = 8 * 1024;

pub struct TestApp {
    pub router: Router,
    pub judge: Arc<Judge>,
    pub root: tempfile::TempDir,
}

pub fn has_binary(name: &str) -> bool {
    std::process::Command::new(name)
        .arg("--version")
        .output()
        .is_ok()
}

pub fn test_app(api_key: Option<&str>) -> TestApp {
    let root = tempfile::tempdir().unwrap();
    let workspace_root = root.path().to_path_buf();
    build_app(root, workspace_root, api_key)
}

/// Like [`test_app`] but with workspaces created under `workspace_root`.
pub fn test_app_with_workspace_root(root: tempfile::TempDir, workspace_root: PathBuf) -> TestApp {
    build_app(root, workspace_root, None)
}

fn build_app(root: tempfile::TempDir, workspace_root: PathBuf, api_key: Option<&str>) -> TestApp {
    let judge = Arc::new(Judge::with_parts(
        LanguageRegistry::default(),
        Sandbox::Process(ProcessSandbox::default()),
        workspace_root,
        JudgeLimits {
            max_code_bytes: 16 * 1024,
            max_input_bytes: 16 * 1024,
            max_timeout_ms: 10_000,
            compile_timeout_ms: 60_000,
            max_output_bytes: OUTPUT_LIMIT,
        },
    ));
    let batch = Arc::new(BatchRunner::with_options(judge.clone(), Duration::ZERO, 1));

    let router = router(AppState {
        judge: judge.clone(),
        batch,
        api_key: api_key.map(str::to_string),
        started_at: Instant::now(),
        prometheus_handle: None,
    });

    TestApp { router, judge, root }
}

impl TestApp {
    pub async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.post_with_headers(path, body, &[]).await
    }

    pub async fn post_with_headers(
        &self,
        path: &str,
        body: Value,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json");
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let request = request.body(Body::from(body.to_string())).unwrap();
        self.send(request).await
    }

    pub async fn get(&self, path: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(path).body(Body::empty()).unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 16 * 1024 * 1024).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    /// No workspace directory and no registry entry may outlive a response.
    pub fn assert_clean(&self) {
        assert_eq!(count_entries(self.root.path()), 0, "workspace leaked");
        assert!(self.judge.registry().is_empty(), "registry entry leaked");
    }
}

pub fn count_entries(path: &Path) -> usize {
    std::fs::read_dir(path).map(|d| d.count()).unwrap_or(0)
}
