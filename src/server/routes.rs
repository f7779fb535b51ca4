// 该文件是 Kouqu （抠图取物） 项目的一部分。
// src/server/routes.rs - 路由处理
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

use std::time::Instant;

use axum::{
  Json,
  extract::{Multipart, State},
  response::Html,
};
use serde::Serialize;
use tracing::{debug, info};

use super::{AppContext, MAX_PROMPT_CHARS, ModelStatus, ServerError};
use crate::input::decode_upload;

const INDEX_HTML: &str = include_str!("../../assets/index.html");

#[derive(Debug, Serialize)]
pub struct SegmentResponse {
  pub success: bool,
  pub id: String,
  pub original_path: String,
  pub result_path: String,
  pub phrase: String,
  pub score: f32,
  pub bbox: [f32; 4],
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
  pub status: &'static str,
  pub models: ModelStatus,
  pub started_at: String,
}

pub async fn index() -> Html<&'static str> {
  Html(INDEX_HTML)
}

pub async fn health(State(ctx): State<AppContext>) -> Json<HealthResponse> {
  let status = if ctx.pipeline.is_some() && ctx.models.ready() {
    "ok"
  } else {
    "degraded"
  };

  Json(HealthResponse {
    status,
    models: ctx.models,
    started_at: ctx.started_at.to_rfc3339(),
  })
}

pub async fn segment(
  State(ctx): State<AppContext>,
  mut multipart: Multipart,
) -> Result<Json<SegmentResponse>, ServerError> {
  let mut image = None;
  let mut prompt = None;
  while let Some(field) = multipart.next_field().await? {
    match field.name() {
      Some("image_file") => image = Some(field.bytes().await?),
      Some("prompt") => prompt = Some(field.text().await?),
      other => debug!("忽略表单字段: {:?}", other),
    }
  }

  let image = image.ok_or(ServerError::MissingImage)?;
  let prompt = prompt.unwrap_or_default().trim().to_string();
  if image.is_empty() || prompt.is_empty() {
    return Err(ServerError::MissingInput);
  }
  if prompt.chars().count() > MAX_PROMPT_CHARS {
    return Err(ServerError::PromptTooLong(MAX_PROMPT_CHARS));
  }

  let pipeline = ctx.pipeline.clone().ok_or(ServerError::ModelsUnavailable)?;
  let store = ctx.store.clone();
  let max_side = ctx.max_image_side;
  info!("收到抠图请求: {} 字节, 提示词 \"{}\"", image.len(), prompt);

  // 解码和推理都是阻塞计算，放到阻塞线程池
  let response = tokio::task::spawn_blocking(move || -> Result<SegmentResponse, ServerError> {
    let now = Instant::now();
    let source = decode_upload(&image, max_side)?;
    let outcome = pipeline
      .run(&source, &prompt)?
      .ok_or(ServerError::NotDetected)?;

    let stored = store
      .save(source.as_rgb(), &outcome.cutout)
      .map_err(|e| ServerError::Internal(e.to_string()))?;
    let url = |path: &std::path::Path| {
      store
        .url_path(path)
        .ok_or_else(|| ServerError::Internal(format!("无法生成访问路径: {}", path.display())))
    };
    let original_path = url(&stored.original)?;
    let result_path = url(&stored.result)?;
    info!("抠图完成 {}，耗时: {:.2?}", stored.id, now.elapsed());

    Ok(SegmentResponse {
      success: true,
      id: stored.id,
      original_path,
      result_path,
      phrase: outcome.detection.phrase,
      score: outcome.detection.score,
      bbox: outcome.detection.bbox,
    })
  })
  .await
  .map_err(|e| ServerError::Internal(e.to_string()))??;

  Ok(Json(response))
}
