// 该文件是 Kouqu （抠图取物） 项目的一部分。
// src/model/session.rs - ONNX Runtime 推理会话
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

use std::path::Path;

use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::DynValue,
};
use tracing::{debug, info};

pub const DEFAULT_INTRA_THREADS: usize = 4;

pub fn build_session(model_path: &Path, threads: usize) -> Result<Session, ort::Error> {
  info!("加载模型文件: {}", model_path.display());
  if let Ok(meta) = std::fs::metadata(model_path) {
    debug!(
      "模型文件大小: {:.2} MB",
      meta.len() as f64 / (1024.0 * 1024.0)
    );
  }

  let session = Session::builder()?
    .with_optimization_level(GraphOptimizationLevel::Level3)?
    .with_intra_threads(threads)?
    .commit_from_file(model_path)?;

  for input in session.inputs.iter() {
    debug!("模型输入: {} {:?}", input.name, input.input_type);
  }
  for output in session.outputs.iter() {
    debug!("模型输出: {} {:?}", output.name, output.output_type);
  }

  Ok(session)
}

/// 模型输出中的一个 f32 张量（形状 + 数据的拷贝），拷贝后即可释放会话锁
#[derive(Debug, Clone)]
pub struct OwnedTensor {
  pub shape: Vec<usize>,
  pub data: Vec<f32>,
}

impl OwnedTensor {
  pub fn from_value(value: &DynValue) -> Result<Self, ort::Error> {
    let (shape, data) = value.try_extract_tensor::<f32>()?;
    Ok(OwnedTensor {
      shape: shape.iter().map(|&d| d.max(0) as usize).collect(),
      data: data.to_vec(),
    })
  }

  pub fn dim(&self, axis: usize) -> usize {
    self.shape.get(axis).copied().unwrap_or(0)
  }
}
