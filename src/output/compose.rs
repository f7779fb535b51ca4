// 该文件是 Kouqu （抠图取物） 项目的一部分。
// src/output/compose.rs - 抠图合成
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

use image::{GrayImage, Rgba, RgbaImage};

use super::OutputError;

/// 掩码内保留原图颜色且不透明，掩码外为全透明黑色
pub fn compose_cutout(source: &image::RgbImage, mask: &GrayImage) -> Result<RgbaImage, OutputError> {
  if source.dimensions() != mask.dimensions() {
    return Err(OutputError::MaskSize {
      expected: source.dimensions(),
      actual: mask.dimensions(),
    });
  }

  let cutout = RgbaImage::from_fn(source.width(), source.height(), |x, y| {
    if mask.get_pixel(x, y)[0] > 0 {
      let [r, g, b] = source.get_pixel(x, y).0;
      Rgba([r, g, b, 255])
    } else {
      Rgba([0, 0, 0, 0])
    }
  });
  Ok(cutout)
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Luma, Rgb, RgbImage};

  #[test]
  fn alpha_follows_mask() {
    let source = RgbImage::from_pixel(4, 3, Rgb([10, 20, 30]));
    let mask = GrayImage::from_fn(4, 3, |x, _| if x < 2 { Luma([255]) } else { Luma([0]) });

    let cutout = compose_cutout(&source, &mask).unwrap();
    for (x, _, pixel) in cutout.enumerate_pixels() {
      if x < 2 {
        assert_eq!(*pixel, Rgba([10, 20, 30, 255]));
      } else {
        assert_eq!(*pixel, Rgba([0, 0, 0, 0]));
      }
    }
  }

  #[test]
  fn mismatched_mask_is_rejected() {
    let source = RgbImage::new(4, 4);
    let mask = GrayImage::new(2, 2);
    assert!(matches!(
      compose_cutout(&source, &mask),
      Err(OutputError::MaskSize {
        expected: (4, 4),
        actual: (2, 2)
      })
    ));
  }
}
