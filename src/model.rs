// 该文件是 Kouqu （抠图取物） 项目的一部分。
// src/model.rs - 模型
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

use image::GrayImage;
use serde::Serialize;

use crate::input::SourceImage;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 检测输入：原图 + 文本提示
#[derive(Debug, Clone)]
pub struct DetectQuery {
  pub image: SourceImage,
  pub prompt: String,
}

/// 分割输入：原图 + 框提示（原图像素坐标）
#[derive(Debug, Clone)]
pub struct SegmentQuery {
  pub image: SourceImage,
  pub bbox: [f32; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectItem {
  pub phrase: String,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，原图像素坐标
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  /// 得分最高的检测框；得分相同时保留靠前的一个
  pub fn best(&self) -> Option<&DetectItem> {
    self.items.iter().fold(None, |best: Option<&DetectItem>, item| match best {
      Some(b) if b.score >= item.score => Some(b),
      _ => Some(item),
    })
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 二值掩码：255 表示目标，0 表示背景，尺寸与原图一致
#[derive(Debug, Clone)]
pub struct SegmentMask {
  pub mask: GrayImage,
  pub iou: f32,
}

impl SegmentMask {
  pub fn coverage(&self) -> usize {
    self.mask.pixels().filter(|p| p[0] > 0).count()
  }
}

mod download;
pub use self::download::{DownloadError, ensure_file};

mod session;

pub mod tokenizer;

mod grounding_dino;
pub use self::grounding_dino::{GroundingDino, GroundingDinoBuilder, GroundingDinoError};

mod mobile_sam;
pub use self::mobile_sam::{MobileSam, MobileSamBuilder, MobileSamError};
