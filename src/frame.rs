// 该文件是 Kouqu （抠图取物） 项目的一部分。
// src/frame.rs - NCHW 张量帧定义
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

use image::{RgbImage, imageops::FilterType};
use ndarray::{Array4, ShapeError};

use crate::input::AsNchwFrame;

const RGB_CHANNELS: usize = 3;

/// 像素归一化参数：`(pixel * SCALE - MEAN) / STD`
pub trait Normalization {
  const MEAN: [f32; 3];
  const STD: [f32; 3];
  const SCALE: f32;

  fn normalize(channel: usize, value: u8) -> f32 {
    (value as f32 * Self::SCALE - Self::MEAN[channel]) / Self::STD[channel]
  }
}

/// ImageNet 归一化（0~1 区间），Grounding DINO 使用
#[derive(Debug, Clone, Copy)]
pub struct ImageNet;

impl Normalization for ImageNet {
  const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
  const STD: [f32; 3] = [0.229, 0.224, 0.225];
  const SCALE: f32 = 1.0 / 255.0;
}

/// SAM 像素归一化（0~255 区间）
#[derive(Debug, Clone, Copy)]
pub struct SamPixel;

impl Normalization for SamPixel {
  const MEAN: [f32; 3] = [123.675, 116.28, 103.53];
  const STD: [f32; 3] = [58.395, 57.12, 57.375];
  const SCALE: f32 = 1.0;
}

/// 原图与模型输入之间的几何关系
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameGeometry {
  pub source_width: u32,
  pub source_height: u32,
  /// 有效区域宽度（拉伸时等于帧宽，补边时为缩放后的宽度）
  pub content_width: u32,
  pub content_height: u32,
}

impl FrameGeometry {
  pub fn scale_x(&self) -> f32 {
    self.content_width as f32 / self.source_width as f32
  }

  pub fn scale_y(&self) -> f32 {
    self.content_height as f32 / self.source_height as f32
  }

  /// 把原图像素坐标下的 [x_min, y_min, x_max, y_max] 映射到帧坐标
  pub fn to_frame(&self, bbox: &[f32; 4]) -> [f32; 4] {
    let (sx, sy) = (self.scale_x(), self.scale_y());
    [bbox[0] * sx, bbox[1] * sy, bbox[2] * sx, bbox[3] * sy]
  }
}

/// 固定尺寸、已归一化的 f32 NCHW 帧
#[derive(Debug, Clone)]
pub struct NchwFrame<const W: u32, const H: u32> {
  data: Box<[f32]>,
  geometry: FrameGeometry,
}

impl<const W: u32, const H: u32> NchwFrame<W, H> {
  pub fn height(&self) -> usize {
    H as usize
  }

  pub fn width(&self) -> usize {
    W as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn geometry(&self) -> &FrameGeometry {
    &self.geometry
  }

  /// 直接拉伸到 W x H
  pub fn stretch<N: Normalization>(image: &RgbImage) -> Self {
    let resized = image::imageops::resize(image, W, H, FilterType::Triangle);
    let geometry = FrameGeometry {
      source_width: image.width(),
      source_height: image.height(),
      content_width: W,
      content_height: H,
    };
    let mut frame = Self::zeroed(geometry);
    frame.fill::<N>(&resized);
    frame
  }

  /// 按最长边缩放到 W，左上角对齐，其余部分补零
  pub fn letterbox<N: Normalization>(image: &RgbImage) -> Self {
    let (width, height) = image.dimensions();
    let scale = W.min(H) as f32 / width.max(height) as f32;
    let content_width = ((width as f32 * scale).round() as u32).clamp(1, W);
    let content_height = ((height as f32 * scale).round() as u32).clamp(1, H);

    let resized =
      image::imageops::resize(image, content_width, content_height, FilterType::Triangle);
    let geometry = FrameGeometry {
      source_width: width,
      source_height: height,
      content_width,
      content_height,
    };
    let mut frame = Self::zeroed(geometry);
    frame.fill::<N>(&resized);
    frame
  }

  /// 转为 [1, 3, H, W] 的张量
  pub fn to_array(&self) -> Result<Array4<f32>, ShapeError> {
    Array4::from_shape_vec(
      (1, RGB_CHANNELS, H as usize, W as usize),
      self.data.to_vec(),
    )
  }

  fn zeroed(geometry: FrameGeometry) -> Self {
    let size = RGB_CHANNELS * (W as usize) * (H as usize);
    Self {
      data: vec![0f32; size].into_boxed_slice(),
      geometry,
    }
  }

  fn fill<N: Normalization>(&mut self, image: &RgbImage) {
    let plane = (W as usize) * (H as usize);
    for (x, y, pixel) in image.enumerate_pixels() {
      if x >= W || y >= H {
        continue;
      }
      let idx = (y as usize) * (W as usize) + (x as usize);
      for c in 0..RGB_CHANNELS {
        self.data[c * plane + idx] = N::normalize(c, pixel[c]);
      }
    }
  }
}

impl<const W: u32, const H: u32> AsNchwFrame<W, H> for NchwFrame<W, H> {
  fn as_nchw(&self) -> &[f32] {
    &self.data
  }
}
