// 该文件是 Kouqu （抠图取物） 项目的一部分。
// src/output/directory_record.rs - 结果目录存储
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

use std::{
  path::{Path, PathBuf},
  time::{Duration, SystemTime},
};

use image::{ImageFormat, RgbImage, RgbaImage};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::SourceImage,
  output::Render,
  query_value,
  task::CutoutOutcome,
};

pub const DEFAULT_URL_PREFIX: &str = "/static/images";

#[derive(Error, Debug)]
pub enum ResultStoreError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 一次请求落盘后的文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPaths {
  pub id: String,
  pub original: PathBuf,
  pub result: PathBuf,
}

/// 把原图和抠图结果按 `{uuid}_original.png` / `{uuid}_result.png` 写入同一目录
#[derive(Debug, Clone)]
pub struct ResultStore {
  directory: PathBuf,
  url_prefix: String,
}

impl FromUrlWithScheme for ResultStore {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ResultStore {
  type Error = ResultStoreError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(ResultStoreError::SchemeMismatch);
    }

    let prefix = query_value(uri, "prefix").unwrap_or_else(|| DEFAULT_URL_PREFIX.to_string());
    Self::new(uri.path(), prefix)
  }
}

impl ResultStore {
  pub fn new(directory: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Result<Self, ResultStoreError> {
    let directory = directory.into();
    if !directory.exists() {
      info!("创建结果目录: {}", directory.display());
      std::fs::create_dir_all(&directory)?;
    }

    Ok(ResultStore {
      directory,
      url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
    })
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  pub fn save(&self, source: &RgbImage, cutout: &RgbaImage) -> Result<StoredPaths, ResultStoreError> {
    self.save_as(Uuid::new_v4().to_string(), source, cutout)
  }

  /// 结果图写入失败时删除已写入的原图，不留下半套文件
  pub(crate) fn save_as(
    &self,
    id: String,
    source: &RgbImage,
    cutout: &RgbaImage,
  ) -> Result<StoredPaths, ResultStoreError> {
    let original = self.directory.join(format!("{id}_original.png"));
    let result = self.directory.join(format!("{id}_result.png"));

    source.save_with_format(&original, ImageFormat::Png)?;
    if let Err(e) = cutout.save_with_format(&result, ImageFormat::Png) {
      if let Err(rm) = std::fs::remove_file(&original) {
        warn!("无法删除原图 {}: {}", original.display(), rm);
      }
      return Err(e.into());
    }
    debug!("保存结果: {} / {}", original.display(), result.display());

    Ok(StoredPaths {
      id,
      original,
      result,
    })
  }

  /// 存储文件对应的静态访问路径
  pub fn url_path(&self, path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    Some(format!("{}/{}", self.url_prefix, name))
  }

  /// 删除修改时间早于 `older_than` 的文件，返回删除数量；单个文件出错只记录日志
  pub fn sweep(&self, older_than: Duration) -> usize {
    let entries = match std::fs::read_dir(&self.directory) {
      Ok(entries) => entries,
      Err(e) => {
        warn!("无法读取结果目录 {}: {}", self.directory.display(), e);
        return 0;
      }
    };

    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
      let path = entry.path();
      let expired = entry
        .metadata()
        .and_then(|meta| {
          if !meta.is_file() {
            return Ok(false);
          }
          let modified = meta.modified()?;
          Ok(now
            .duration_since(modified)
            .map(|age| age >= older_than)
            .unwrap_or(false))
        });

      match expired {
        Ok(true) => match std::fs::remove_file(&path) {
          Ok(()) => removed += 1,
          Err(e) => warn!("删除过期文件失败 {}: {}", path.display(), e),
        },
        Ok(false) => {}
        Err(e) => warn!("读取文件信息失败 {}: {}", path.display(), e),
      }
    }

    if removed > 0 {
      info!("清理过期结果文件 {} 个", removed);
    }
    removed
  }
}

impl Render<SourceImage, CutoutOutcome> for ResultStore {
  type Error = ResultStoreError;

  fn render_result(&self, frame: &SourceImage, result: &CutoutOutcome) -> Result<(), Self::Error> {
    let stored = self.save(frame.as_rgb(), &result.cutout)?;
    info!(
      "结果已保存: {} -> {}",
      stored.original.display(),
      stored.result.display()
    );
    Ok(())
  }
}
