#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use dubweb::accelerator::AcceleratorSetup;
use dubweb::config::Config;
use dubweb::engine::EngineFactory;
use dubweb::job::JobRunner;
use dubweb::server::{build_router, AppState};

/// Stub engine: records its arguments and writes a small output file
pub const STUB_ENGINE: &str = r#"
echo "$@" > "$0.args"
while [ $# -gt 0 ]; do
  case "$1" in
    --output_directory) dir="$2"; shift 2 ;;
    --output_name) name="$2"; shift 2 ;;
    *) shift ;;
  esac
done
printf 'dubbed video' > "$dir/$name"
echo "saved $name"
"#;

pub const BOUNDARY: &str = "dubweb-test-boundary";

/// Temporary workspace with a stub engine script and its directories
pub struct TestEnv {
    pub dir: TempDir,
    pub config: Config,
}

impl TestEnv {
    pub fn new(script: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let script_path = dir.path().join("engine.sh");
        std::fs::write(&script_path, script).unwrap();

        let mut config = Config::default();
        config.engine.program = "sh".to_string();
        config.engine.base_args = vec![script_path.to_string_lossy().to_string()];
        config.engine.poll_interval_ms = 20;
        config.jobs.output_dir = dir.path().join("outputs");
        config.jobs.upload_dir = dir.path().join("uploads");
        config.media.ffprobe_path = String::new();

        Self { dir, config }
    }

    pub fn runner(&self) -> JobRunner {
        let engine = EngineFactory::create_engine(self.config.engine.clone());
        let accelerator = AcceleratorSetup::cpu_only(self.config.accelerator.clone());
        JobRunner::new(&self.config, engine, accelerator).unwrap()
    }

    pub fn state(&self) -> AppState {
        AppState::new(Arc::new(self.runner()), self.config.jobs.upload_dir.clone())
    }

    pub fn app(&self) -> Router {
        build_router(self.state())
    }

    pub fn script_args(&self) -> Option<String> {
        std::fs::read_to_string(self.dir.path().join("engine.sh.args")).ok()
    }

    pub fn upload_dir(&self) -> &Path {
        &self.config.jobs.upload_dir
    }

    pub fn write_input(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, b"video bytes").unwrap();
        path
    }
}

/// Encode text fields and an optional file as multipart/form-data
pub fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, content)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"video\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_form(app: Router, uri: &str, body: Vec<u8>) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
