// 该文件是 Kouqu （抠图取物） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use tracing::error;
use url::Url;

use super::{DEFAULT_MAX_IMAGE_SIDE, ImageInputError, SourceImage, decode_upload};
use crate::{FromUrl, FromUrlWithScheme};

/// `image:///path/to/file.jpg`，只产生一帧
pub struct ImageFileInput {
  image: Option<SourceImage>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageInputError::SchemeMismatch);
    }

    let bytes = std::fs::read(url.path())?;
    let image = decode_upload(&bytes, DEFAULT_MAX_IMAGE_SIDE)?;

    Ok(ImageFileInput { image: Some(image) })
  }
}

impl Iterator for ImageFileInput {
  type Item = SourceImage;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take()
  }
}
