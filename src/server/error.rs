// 该文件是 Kouqu （抠图取物） 项目的一部分。
// src/server/error.rs - HTTP 错误响应
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

use axum::{
  Json,
  extract::multipart::MultipartError,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::{input::ImageInputError, task::TaskError};

// 面向客户端的错误文本，页面直接展示
#[derive(Error, Debug)]
pub enum ServerError {
  #[error("No image file provided.")]
  MissingImage,
  #[error("Please provide both an image and a prompt.")]
  MissingInput,
  #[error("Prompt is too long (at most {0} characters).")]
  PromptTooLong(usize),
  #[error("Unsupported image format: {0}")]
  UnsupportedImage(#[source] ImageInputError),
  #[error("Image is too large: {0}")]
  ImageTooLarge(#[source] ImageInputError),
  #[error("Could not read the image: {0}")]
  InvalidImage(#[source] ImageInputError),
  #[error("Models are not loaded. Please try again later.")]
  ModelsUnavailable,
  #[error("Could not detect the object. Please try a different prompt.")]
  NotDetected,
  #[error("Malformed upload: {0}")]
  Multipart(#[from] MultipartError),
  #[error("An error occurred: {0}")]
  Internal(String),
}

impl ServerError {
  pub fn status(&self) -> StatusCode {
    match self {
      ServerError::MissingImage
      | ServerError::MissingInput
      | ServerError::PromptTooLong(_)
      | ServerError::InvalidImage(_) => StatusCode::BAD_REQUEST,
      ServerError::UnsupportedImage(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
      ServerError::ImageTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
      ServerError::ModelsUnavailable => StatusCode::SERVICE_UNAVAILABLE,
      ServerError::NotDetected => StatusCode::UNPROCESSABLE_ENTITY,
      ServerError::Multipart(e) => e.status(),
      ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl From<ImageInputError> for ServerError {
  fn from(e: ImageInputError) -> Self {
    match e {
      ImageInputError::Empty => ServerError::MissingInput,
      ImageInputError::UnsupportedFormat | ImageInputError::FormatNotAllowed(_) => {
        ServerError::UnsupportedImage(e)
      }
      ImageInputError::TooLarge { .. } => ServerError::ImageTooLarge(e),
      _ => ServerError::InvalidImage(e),
    }
  }
}

impl From<TaskError> for ServerError {
  fn from(e: TaskError) -> Self {
    match e {
      TaskError::EmptyPrompt => ServerError::MissingInput,
      e => ServerError::Internal(e.to_string()),
    }
  }
}

impl IntoResponse for ServerError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      error!(status = %status, error = %self, "请求处理失败");
    } else {
      warn!(status = %status, error = %self, "请求被拒绝");
    }

    let body = json!({
      "success": false,
      "error": self.to_string(),
    });
    (status, Json(body)).into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn image_errors_map_to_statuses() {
    assert_eq!(
      ServerError::from(ImageInputError::UnsupportedFormat).status(),
      StatusCode::UNSUPPORTED_MEDIA_TYPE
    );
    assert_eq!(
      ServerError::from(ImageInputError::Empty).status(),
      StatusCode::BAD_REQUEST
    );
    assert_eq!(
      ServerError::from(ImageInputError::TooLarge {
        width: 9000,
        height: 10,
        max: 8192
      })
      .status(),
      StatusCode::PAYLOAD_TOO_LARGE
    );
  }

  #[test]
  fn task_errors_are_internal() {
    let err = ServerError::from(TaskError::Detect("boom".into()));
    assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(err.to_string(), "An error occurred: 检测失败: boom");
  }

  #[test]
  fn not_detected_is_unprocessable() {
    let response = ServerError::NotDetected.into_response();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
  }
}
