// 该文件是 Kouqu （抠图取物） 项目的一部分。
// src/output/save_image_file.rs - 保存抠图文件
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

use std::path::{Path, PathBuf};

use image::ImageFormat;
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::SourceImage,
  output::{Render, draw::draw_detection},
  query_value,
  task::CutoutOutcome,
};

/// `image:///out/cutout.png?boxes=/out/preview.png`
pub struct SaveImageFileOutput {
  path: PathBuf,
  boxes: Option<PathBuf>,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput {
      path: PathBuf::from(uri.path()),
      boxes: query_value(uri, "boxes").map(PathBuf::from),
    })
  }
}

fn ensure_parent(path: &Path) -> Result<(), SaveImageFileError> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent).map_err(SaveImageFileError::IoError)?;
  }
  Ok(())
}

impl Render<SourceImage, CutoutOutcome> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &SourceImage, result: &CutoutOutcome) -> Result<(), Self::Error> {
    // 抠图带透明通道，统一写成 PNG
    ensure_parent(&self.path)?;
    result
      .cutout
      .save_with_format(&self.path, ImageFormat::Png)
      .map_err(SaveImageFileError::ImageError)?;
    warn!("保存图像到文件: {}", self.path.display());

    if let Some(boxes) = &self.boxes {
      ensure_parent(boxes)?;
      draw_detection(frame.as_rgb(), &result.detection)
        .save_with_format(boxes, ImageFormat::Png)
        .map_err(SaveImageFileError::ImageError)?;
      warn!("保存检测框预览到文件: {}", boxes.display());
    }
    Ok(())
  }
}
