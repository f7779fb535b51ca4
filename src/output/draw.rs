// 该文件是 Kouqu （抠图取物） 项目的一部分。
// src/output/draw.rs - 检测框预览
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

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::model::DetectItem;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]); // 绿色

/// 在原图副本上画出选中的检测框（边框 2 像素）
pub fn draw_detection(image: &RgbImage, item: &DetectItem) -> RgbImage {
  let mut canvas = image.clone();
  draw_box(&mut canvas, &item.bbox, BOX_COLOR);
  canvas
}

/// bbox 为原图像素坐标 [x_min, y_min, x_max, y_max]
pub fn draw_box(image: &mut RgbImage, bbox: &[f32; 4], color: Rgb<u8>) {
  let (w, h) = (image.width() as i32, image.height() as i32);
  if w == 0 || h == 0 {
    return;
  }

  let x_min = (bbox[0].floor() as i32).clamp(0, w - 1);
  let y_min = (bbox[1].floor() as i32).clamp(0, h - 1);
  let x_max = (bbox[2].ceil() as i32).clamp(0, w - 1);
  let y_max = (bbox[3].ceil() as i32).clamp(0, h - 1);
  if x_min >= x_max || y_min >= y_max {
    return;
  }

  let width = (x_max - x_min + 1) as u32;
  let height = (y_max - y_min + 1) as u32;
  draw_hollow_rect_mut(image, Rect::at(x_min, y_min).of_size(width, height), color);

  // 内缩一圈再画一次，加粗边框
  if width > 2 && height > 2 {
    let inner = Rect::at(x_min + 1, y_min + 1).of_size(width - 2, height - 2);
    draw_hollow_rect_mut(image, inner, color);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn draws_two_pixel_border() {
    let mut image = RgbImage::new(20, 20);
    draw_box(&mut image, &[2.0, 2.0, 10.0, 10.0], BOX_COLOR);
    assert_eq!(*image.get_pixel(2, 5), BOX_COLOR);
    assert_eq!(*image.get_pixel(3, 5), BOX_COLOR);
    assert_eq!(*image.get_pixel(10, 5), BOX_COLOR);
    assert_eq!(*image.get_pixel(9, 5), BOX_COLOR);
    assert_eq!(*image.get_pixel(5, 5), Rgb([0, 0, 0]));
  }

  #[test]
  fn degenerate_box_is_ignored() {
    let mut image = RgbImage::new(8, 8);
    draw_box(&mut image, &[4.0, 4.0, 4.0, 4.0], BOX_COLOR);
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }

  #[test]
  fn box_outside_image_is_clamped() {
    let mut image = RgbImage::new(8, 8);
    draw_box(&mut image, &[-5.0, -5.0, 50.0, 50.0], BOX_COLOR);
    assert_eq!(*image.get_pixel(0, 0), BOX_COLOR);
    assert_eq!(*image.get_pixel(7, 7), BOX_COLOR);
  }
}
