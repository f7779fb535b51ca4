// 该文件是 Kouqu （抠图取物） 项目的一部分。
// src/input/upload.rs - 上传图像解码
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

use std::io::Cursor;

use image::{ImageFormat, ImageReader};
use tracing::debug;

use super::{ImageInputError, SourceImage};

pub const DEFAULT_MAX_IMAGE_SIDE: u32 = 8192;

pub const SUPPORTED_FORMATS: [ImageFormat; 5] = [
  ImageFormat::Png,
  ImageFormat::Jpeg,
  ImageFormat::WebP,
  ImageFormat::Bmp,
  ImageFormat::Gif,
];

/// 解码上传的图像字节。格式根据文件头判断，与客户端声明的文件名无关。
pub fn decode_upload(bytes: &[u8], max_side: u32) -> Result<SourceImage, ImageInputError> {
  if bytes.is_empty() {
    return Err(ImageInputError::Empty);
  }

  let format = image::guess_format(bytes).map_err(|_| ImageInputError::UnsupportedFormat)?;
  if !SUPPORTED_FORMATS.contains(&format) {
    return Err(ImageInputError::FormatNotAllowed(format));
  }

  // 先只读文件头拿到尺寸，超限的图像不做解码
  let (width, height) = ImageReader::with_format(Cursor::new(bytes), format).into_dimensions()?;
  debug!("上传图像: {:?} {}x{}", format, width, height);

  if width == 0 || height == 0 || width.max(height) > max_side {
    return Err(ImageInputError::TooLarge {
      width,
      height,
      max: max_side,
    });
  }

  let image = ImageReader::with_format(Cursor::new(bytes), format).decode()?;
  Ok(SourceImage::from(image.to_rgb8()))
}
