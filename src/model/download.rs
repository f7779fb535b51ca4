// 该文件是 Kouqu （抠图取物） 项目的一部分。
// src/model/download.rs - 模型文件下载
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

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

#[derive(Error, Debug)]
pub enum DownloadError {
  #[error("模型文件不存在: {0}")]
  Missing(PathBuf),
  #[error("未启用下载功能，无法获取: {0}")]
  Disabled(Url),
  #[cfg(feature = "download")]
  #[error("HTTP 错误: {0}")]
  Http(#[from] reqwest::Error),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}

/// 确保文件存在；缺失且给出下载地址时先下载到 `.part`，完成后再改名
pub fn ensure_file(path: &Path, source: Option<&Url>) -> Result<(), DownloadError> {
  if path.exists() {
    return Ok(());
  }

  let Some(source) = source else {
    warn!("模型文件不存在且没有下载地址: {}", path.display());
    return Err(DownloadError::Missing(path.to_path_buf()));
  };

  fetch(path, source)
}

#[cfg(feature = "download")]
fn fetch(path: &Path, source: &Url) -> Result<(), DownloadError> {
  info!("模型文件不存在，开始下载: {} -> {}", source, path.display());

  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)?;
  }

  let partial = partial_path(path);
  let now = std::time::Instant::now();
  let result = (|| -> Result<u64, DownloadError> {
    let mut response = reqwest::blocking::get(source.clone())?.error_for_status()?;
    let mut file = std::fs::File::create(&partial)?;
    let size = response.copy_to(&mut file)?;
    file.sync_all()?;
    Ok(size)
  })();

  match result {
    Ok(size) => {
      std::fs::rename(&partial, path)?;
      info!(
        "下载完成: {} ({:.2} MB, 耗时 {:.2?})",
        path.display(),
        size as f64 / (1024.0 * 1024.0),
        now.elapsed()
      );
      Ok(())
    }
    Err(e) => {
      warn!("下载失败: {}", e);
      let _ = std::fs::remove_file(&partial);
      Err(e)
    }
  }
}

#[cfg(not(feature = "download"))]
fn fetch(path: &Path, source: &Url) -> Result<(), DownloadError> {
  warn!(
    "模型文件不存在: {}，未启用 download 功能，跳过 {}",
    path.display(),
    source
  );
  info!("请手动下载模型文件");
  Err(DownloadError::Disabled(source.clone()))
}

#[cfg_attr(not(feature = "download"), allow(dead_code))]
fn partial_path(path: &Path) -> PathBuf {
  let mut name = path.file_name().unwrap_or_default().to_os_string();
  name.push(".part");
  path.with_file_name(name)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn existing_file_needs_no_source() {
    let file = tempfile::NamedTempFile::new().unwrap();
    assert!(ensure_file(file.path(), None).is_ok());
  }

  #[test]
  fn missing_file_without_source_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.onnx");
    assert!(matches!(
      ensure_file(&path, None),
      Err(DownloadError::Missing(p)) if p == path
    ));
  }

  #[test]
  fn partial_path_appends_suffix() {
    assert_eq!(
      partial_path(Path::new("/models/gdino.onnx")),
      PathBuf::from("/models/gdino.onnx.part")
    );
  }
}
