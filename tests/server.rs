// 该文件是 Kouqu （抠图取物） 项目的一部分。
// tests/server.rs - HTTP 接口测试
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

#![cfg(feature = "server")]

use std::{io::Cursor, path::Path, sync::Arc};

use axum::{
  Router,
  body::Body,
  http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use image::{GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use serde_json::Value;
use tower::ServiceExt;

use kouqu::{
  input::SourceImage,
  model::{DetectItem, SegmentMask},
  output::{DEFAULT_URL_PREFIX, ResultStore, compose_cutout},
  server::{AppContext, DEFAULT_MAX_UPLOAD_BYTES, ModelStatus, create_router},
  task::{CutoutOutcome, CutoutPipeline, TaskError},
};

const BOUNDARY: &str = "kouqu-test-boundary";

/// 提示词为 "nothing" 时不返回结果，否则整张图都是目标
struct FakePipeline;

impl CutoutPipeline for FakePipeline {
  fn run(&self, image: &SourceImage, prompt: &str) -> Result<Option<CutoutOutcome>, TaskError> {
    if prompt == "nothing" {
      return Ok(None);
    }

    let mask = GrayImage::from_pixel(image.width(), image.height(), Luma([255]));
    let cutout = compose_cutout(image.as_rgb(), &mask)?;
    Ok(Some(CutoutOutcome {
      detection: DetectItem {
        phrase: prompt.to_string(),
        score: 0.9,
        bbox: [0.0, 0.0, image.width() as f32, image.height() as f32],
      },
      mask: SegmentMask { mask, iou: 0.95 },
      cutout,
    }))
  }
}

fn app(static_dir: &Path, pipeline: Option<Arc<dyn CutoutPipeline>>) -> Router {
  app_with_limit(static_dir, pipeline, DEFAULT_MAX_UPLOAD_BYTES)
}

fn app_with_limit(
  static_dir: &Path,
  pipeline: Option<Arc<dyn CutoutPipeline>>,
  max_upload_bytes: usize,
) -> Router {
  let models = ModelStatus {
    grounding_dino: pipeline.is_some(),
    mobile_sam: pipeline.is_some(),
  };
  let store = ResultStore::new(static_dir.join("images"), DEFAULT_URL_PREFIX).unwrap();
  let ctx = AppContext::new(pipeline, models, Arc::new(store));
  create_router(ctx, static_dir, max_upload_bytes)
}

fn ready_app(static_dir: &Path) -> Router {
  app(static_dir, Some(Arc::new(FakePipeline)))
}

fn png_bytes() -> Vec<u8> {
  let mut bytes = Vec::new();
  RgbImage::from_pixel(6, 4, Rgb([30, 60, 90]))
    .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
    .unwrap();
  bytes
}

enum Part<'a> {
  File(&'a [u8]),
  Text(&'a str, &'a str),
}

fn multipart(parts: &[Part]) -> Request<Body> {
  let mut body = Vec::new();
  for part in parts {
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    match part {
      Part::File(bytes) => {
        body.extend_from_slice(
          b"Content-Disposition: form-data; name=\"image_file\"; filename=\"upload.png\"\r\n",
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(bytes);
      }
      Part::Text(name, value) => {
        body.extend_from_slice(
          format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}").as_bytes(),
        );
      }
    }
    body.extend_from_slice(b"\r\n");
  }
  body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

  Request::post("/segment")
    .header(
      header::CONTENT_TYPE,
      format!("multipart/form-data; boundary={BOUNDARY}"),
    )
    .body(Body::from(body))
    .unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
  let response = app.oneshot(request).await.unwrap();
  let status = response.status();
  let bytes = response.into_body().collect().await.unwrap().to_bytes();
  let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
  (status, json)
}

#[tokio::test]
async fn health_is_ok_when_models_loaded() {
  let dir = tempfile::tempdir().unwrap();
  let (status, json) = send(
    ready_app(dir.path()),
    Request::get("/health").body(Body::empty()).unwrap(),
  )
  .await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(json["status"], "ok");
  assert_eq!(json["models"]["grounding_dino"], true);
  assert!(json["started_at"].is_string());
}

#[tokio::test]
async fn health_is_degraded_without_models() {
  let dir = tempfile::tempdir().unwrap();
  let (status, json) = send(
    app(dir.path(), None),
    Request::get("/health").body(Body::empty()).unwrap(),
  )
  .await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(json["status"], "degraded");
  assert_eq!(json["models"]["mobile_sam"], false);
}

#[tokio::test]
async fn index_serves_upload_form() {
  let dir = tempfile::tempdir().unwrap();
  let response = ready_app(dir.path())
    .oneshot(Request::get("/").body(Body::empty()).unwrap())
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);

  let bytes = response.into_body().collect().await.unwrap().to_bytes();
  let html = String::from_utf8(bytes.to_vec()).unwrap();
  assert!(html.contains("name=\"image_file\""));
  assert!(html.contains("name=\"prompt\""));
}

#[tokio::test]
async fn missing_file_is_bad_request() {
  let dir = tempfile::tempdir().unwrap();
  let (status, json) = send(
    ready_app(dir.path()),
    multipart(&[Part::Text("prompt", "burger")]),
  )
  .await;

  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(json["success"], false);
  assert_eq!(json["error"], "No image file provided.");
}

#[tokio::test]
async fn blank_prompt_is_bad_request() {
  let dir = tempfile::tempdir().unwrap();
  let png = png_bytes();
  let (status, json) = send(
    ready_app(dir.path()),
    multipart(&[Part::File(&png), Part::Text("prompt", "   ")]),
  )
  .await;

  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(json["error"], "Please provide both an image and a prompt.");
}

#[tokio::test]
async fn long_prompt_is_bad_request() {
  let dir = tempfile::tempdir().unwrap();
  let png = png_bytes();
  let prompt = "a".repeat(300);
  let (status, _) = send(
    ready_app(dir.path()),
    multipart(&[Part::File(&png), Part::Text("prompt", &prompt)]),
  )
  .await;

  assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_format_is_unsupported() {
  let dir = tempfile::tempdir().unwrap();
  let (status, json) = send(
    ready_app(dir.path()),
    multipart(&[
      Part::File(b"definitely not an image"),
      Part::Text("prompt", "burger"),
    ]),
  )
  .await;

  assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
  assert_eq!(json["success"], false);
}

#[tokio::test]
async fn oversized_body_is_payload_too_large() {
  let dir = tempfile::tempdir().unwrap();
  let pipeline: Arc<dyn CutoutPipeline> = Arc::new(FakePipeline);
  let big = vec![0u8; 4096];
  let (status, json) = send(
    app_with_limit(dir.path(), Some(pipeline), 1024),
    multipart(&[Part::File(&big), Part::Text("prompt", "burger")]),
  )
  .await;

  assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
  assert_eq!(json["success"], false);
  assert!(json["error"].is_string());
}

#[tokio::test]
async fn no_detection_is_unprocessable() {
  let dir = tempfile::tempdir().unwrap();
  let png = png_bytes();
  let (status, json) = send(
    ready_app(dir.path()),
    multipart(&[Part::File(&png), Part::Text("prompt", "nothing")]),
  )
  .await;

  assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
  assert_eq!(
    json["error"],
    "Could not detect the object. Please try a different prompt."
  );
}

#[tokio::test]
async fn missing_models_is_unavailable() {
  let dir = tempfile::tempdir().unwrap();
  let png = png_bytes();
  let (status, json) = send(
    app(dir.path(), None),
    multipart(&[Part::File(&png), Part::Text("prompt", "burger")]),
  )
  .await;

  assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
  assert_eq!(json["success"], false);
}

#[tokio::test]
async fn successful_cutout_is_stored_and_served() {
  let dir = tempfile::tempdir().unwrap();
  let png = png_bytes();
  let (status, json) = send(
    ready_app(dir.path()),
    multipart(&[Part::File(&png), Part::Text("prompt", "burger")]),
  )
  .await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(json["success"], true);
  assert_eq!(json["phrase"], "burger");

  let id = json["id"].as_str().unwrap();
  let original_path = json["original_path"].as_str().unwrap();
  let result_path = json["result_path"].as_str().unwrap();
  assert_eq!(original_path, format!("/static/images/{id}_original.png"));
  assert_eq!(result_path, format!("/static/images/{id}_result.png"));

  let result_file = dir.path().join("images").join(format!("{id}_result.png"));
  assert!(result_file.exists());
  let cutout = image::open(&result_file).unwrap().to_rgba8();
  assert_eq!(cutout.dimensions(), (6, 4));
  assert_eq!(cutout.get_pixel(0, 0).0, [30, 60, 90, 255]);

  let response = ready_app(dir.path())
    .oneshot(Request::get(result_path).body(Body::empty()).unwrap())
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
}
