// 该文件是 Kouqu （抠图取物） 项目的一部分。
// src/output.rs - 输出定义
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

use crate::FromUrl;
#[cfg(any(feature = "save_image_file", feature = "directory_record"))]
use crate::FromUrlWithScheme;
use crate::input::SourceImage;
use crate::task::CutoutOutcome;
use thiserror::Error;
use url::Url;

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

mod compose;
pub use self::compose::compose_cutout;

#[cfg(feature = "save_image_file")]
pub mod draw;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DEFAULT_URL_PREFIX, ResultStore, ResultStoreError, StoredPaths};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("掩码尺寸 {actual:?} 与原图尺寸 {expected:?} 不一致")]
  MaskSize {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "directory_record")]
  #[error("结果目录错误: {0}")]
  ResultStoreError(#[from] ResultStoreError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
  #[cfg(feature = "directory_record")]
  ResultStore(ResultStore),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => {
        let output = SaveImageFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveImageFileOutput(output))
      }
      #[cfg(feature = "directory_record")]
      ResultStore::SCHEME => {
        let output = ResultStore::from_url(url)?;
        Ok(OutputWrapper::ResultStore(output))
      }
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl Render<SourceImage, CutoutOutcome> for OutputWrapper {
  type Error = OutputError;

  #[allow(unused_variables)]
  fn render_result(&self, frame: &SourceImage, result: &CutoutOutcome) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::ResultStore(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
    }
  }
}
