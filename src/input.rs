// 该文件是 Kouqu （抠图取物） 项目的一部分。
// src/input.rs - 图像输入
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

use std::sync::Arc;

use image::{ImageFormat, RgbImage};
use thiserror::Error;

pub trait AsNchwFrame<const W: u32, const H: u32> {
  fn as_nchw(&self) -> &[f32];
}

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::ImageFileInput;

mod upload;
pub use self::upload::{DEFAULT_MAX_IMAGE_SIDE, SUPPORTED_FORMATS, decode_upload};

#[derive(Error, Debug)]
pub enum ImageInputError {
  #[error("图像数据为空")]
  Empty,
  #[error("不支持的图像格式")]
  UnsupportedFormat,
  #[error("不支持的图像格式: {0:?}")]
  FormatNotAllowed(ImageFormat),
  #[error("图像尺寸 {width}x{height} 超出限制 {max}")]
  TooLarge { width: u32, height: u32, max: u32 },
  #[error("图像解码错误: {0}")]
  Decode(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 解码后的 RGB 原图，内部共享所有权，克隆代价很小
#[derive(Debug, Clone)]
pub struct SourceImage {
  image: Arc<RgbImage>,
}

impl SourceImage {
  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn as_rgb(&self) -> &RgbImage {
    &self.image
  }
}

impl From<RgbImage> for SourceImage {
  fn from(image: RgbImage) -> Self {
    Self {
      image: Arc::new(image),
    }
  }
}

impl AsRef<RgbImage> for SourceImage {
  fn as_ref(&self) -> &RgbImage {
    &self.image
  }
}
