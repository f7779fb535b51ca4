// 该文件是 Kouqu （抠图取物） 项目的一部分。
// src/model/mobile_sam.rs - MobileSAM 框提示分割
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

use std::{path::PathBuf, sync::Mutex};

use image::GrayImage;
use ndarray::{Array1, Array2, Array3, Array4};
use ort::{session::Session, value::TensorRef};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use super::{
  Model, SegmentMask, SegmentQuery,
  download::{DownloadError, ensure_file},
  grounding_dino::sibling,
  session::{DEFAULT_INTRA_THREADS, OwnedTensor, build_session},
};
use crate::{FromUrl, FromUrlWithScheme, frame::NchwFrame, frame::SamPixel, query_value};

const SAM_INPUT_SIZE: u32 = 1024;
const SAM_LOW_RES_SIZE: usize = 256;
const SAM_MASK_THRESH: f32 = 0.0;
const SAM_DECODER_FILE: &str = "mobile_sam_decoder.onnx";
// 框提示的左上角和右下角在 SAM 中分别用标签 2 和 3 表示
const SAM_BOX_LABELS: [f32; 2] = [2.0, 3.0];

type SamFrame = NchwFrame<SAM_INPUT_SIZE, SAM_INPUT_SIZE>;

#[derive(Error, Debug)]
pub enum MobileSamError {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("参数 {0} 无效: {1}")]
  InvalidParam(&'static str, String),
  #[error("模型文件错误: {0}")]
  Download(#[from] DownloadError),
  #[error("ONNX Runtime 错误: {0}")]
  Ort(#[from] ort::Error),
  #[error("张量形状错误: {0}")]
  Shape(#[from] ndarray::ShapeError),
  #[error("模型缺少输出: {0}")]
  MissingOutput(&'static str),
  #[error("掩码尺寸不匹配: 期望 {expected}, 实际 {actual}")]
  MaskSize { expected: usize, actual: usize },
  #[error("推理会话锁已失效")]
  Poisoned,
}

pub struct MobileSamBuilder {
  encoder_path: PathBuf,
  decoder_path: PathBuf,
  threads: usize,
  mask_threshold: f32,
  download: Option<Url>,
  decoder_download: Option<Url>,
}

impl FromUrlWithScheme for MobileSamBuilder {
  const SCHEME: &'static str = "mobilesam";
}

fn parse_url(url: &Url, key: &'static str) -> Result<Option<Url>, MobileSamError> {
  query_value(url, key)
    .map(|v| Url::parse(&v).map_err(|_| MobileSamError::InvalidParam(key, v)))
    .transpose()
}

impl FromUrl for MobileSamBuilder {
  type Error = MobileSamError;

  /// `mobilesam:///models/mobile_sam_encoder.onnx?decoder=/models/mobile_sam_decoder.onnx`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(MobileSamError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let encoder_path = PathBuf::from(url.path());
    let decoder_path = query_value(url, "decoder")
      .map(PathBuf::from)
      .unwrap_or_else(|| sibling(&encoder_path, SAM_DECODER_FILE));

    let threads = match query_value(url, "threads") {
      Some(v) => v
        .parse()
        .map_err(|_| MobileSamError::InvalidParam("threads", v))?,
      None => DEFAULT_INTRA_THREADS,
    };
    let mask_threshold = match query_value(url, "mask_threshold") {
      Some(v) => v
        .parse()
        .map_err(|_| MobileSamError::InvalidParam("mask_threshold", v))?,
      None => SAM_MASK_THRESH,
    };

    Ok(MobileSamBuilder {
      encoder_path,
      decoder_path,
      threads,
      mask_threshold,
      download: parse_url(url, "download")?,
      decoder_download: parse_url(url, "decoder_download")?,
    })
  }
}

impl MobileSamBuilder {
  pub fn build(self) -> Result<MobileSam, MobileSamError> {
    ensure_file(&self.encoder_path, self.download.as_ref())?;
    ensure_file(&self.decoder_path, self.decoder_download.as_ref())?;

    info!("创建 MobileSAM 编码器推理会话");
    let encoder = build_session(&self.encoder_path, self.threads)?;
    info!("创建 MobileSAM 解码器推理会话");
    let decoder = build_session(&self.decoder_path, self.threads)?;
    info!("MobileSAM 加载完成");

    Ok(MobileSam {
      encoder: Mutex::new(encoder),
      decoder: Mutex::new(decoder),
      mask_threshold: self.mask_threshold,
    })
  }
}

pub struct MobileSam {
  encoder: Mutex<Session>,
  decoder: Mutex<Session>,
  mask_threshold: f32,
}

impl MobileSam {
  fn embed(&self, frame: &SamFrame) -> Result<OwnedTensor, MobileSamError> {
    let images = frame.to_array()?;
    let mut encoder = self.encoder.lock().map_err(|_| MobileSamError::Poisoned)?;
    debug!("执行 MobileSAM 编码器推理");
    let outputs = encoder.run(ort::inputs![
      "images" => TensorRef::from_array_view(&images)?,
    ])?;
    let embeddings = outputs
      .get("image_embeddings")
      .ok_or(MobileSamError::MissingOutput("image_embeddings"))?;
    Ok(OwnedTensor::from_value(embeddings)?)
  }
}

impl Model for MobileSam {
  type Input = SegmentQuery;
  type Output = SegmentMask;
  type Error = MobileSamError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let (width, height) = (input.image.width(), input.image.height());
    let frame = SamFrame::letterbox::<SamPixel>(input.image.as_rgb());

    let embeddings = self.embed(&frame)?;
    debug!("image_embeddings 形状: {:?}", embeddings.shape);
    let embeddings = Array4::from_shape_vec(
      (
        embeddings.dim(0),
        embeddings.dim(1),
        embeddings.dim(2),
        embeddings.dim(3),
      ),
      embeddings.data,
    )?;

    let [x_min, y_min, x_max, y_max] = frame.geometry().to_frame(&input.bbox);
    let point_coords = Array3::from_shape_vec((1, 2, 2), vec![x_min, y_min, x_max, y_max])?;
    let point_labels = Array2::from_shape_vec((1, 2), SAM_BOX_LABELS.to_vec())?;
    let mask_input = Array4::<f32>::zeros((1, 1, SAM_LOW_RES_SIZE, SAM_LOW_RES_SIZE));
    let has_mask_input = Array1::from_vec(vec![0f32]);
    let orig_im_size = Array1::from_vec(vec![height as f32, width as f32]);

    let (masks, iou) = {
      let mut decoder = self.decoder.lock().map_err(|_| MobileSamError::Poisoned)?;
      debug!("执行 MobileSAM 解码器推理");
      let outputs = decoder.run(ort::inputs![
        "image_embeddings" => TensorRef::from_array_view(&embeddings)?,
        "point_coords" => TensorRef::from_array_view(&point_coords)?,
        "point_labels" => TensorRef::from_array_view(&point_labels)?,
        "mask_input" => TensorRef::from_array_view(&mask_input)?,
        "has_mask_input" => TensorRef::from_array_view(&has_mask_input)?,
        "orig_im_size" => TensorRef::from_array_view(&orig_im_size)?,
      ])?;

      let masks = outputs
        .get("masks")
        .ok_or(MobileSamError::MissingOutput("masks"))?;
      let iou = match outputs.get("iou_predictions") {
        Some(v) => OwnedTensor::from_value(v)?.data.first().copied(),
        None => None,
      };
      (OwnedTensor::from_value(masks)?, iou)
    };
    debug!("masks 形状: {:?}, iou: {:?}", masks.shape, iou);

    let mask = mask_from_logits(&masks.data, width, height, self.mask_threshold)?;
    Ok(SegmentMask {
      mask,
      iou: iou.unwrap_or(0.0),
    })
  }
}

/// 取第一张掩码的 logits，大于阈值的像素记为目标
pub(crate) fn mask_from_logits(
  logits: &[f32],
  width: u32,
  height: u32,
  threshold: f32,
) -> Result<GrayImage, MobileSamError> {
  let expected = (width as usize) * (height as usize);
  let Some(first) = logits.get(..expected) else {
    return Err(MobileSamError::MaskSize {
      expected,
      actual: logits.len(),
    });
  };

  let pixels = first
    .iter()
    .map(|&l| if l > threshold { 255u8 } else { 0u8 })
    .collect();
  GrayImage::from_raw(width, height, pixels).ok_or(MobileSamError::MaskSize {
    expected,
    actual: first.len(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn thresholds_logits_into_a_binary_mask() {
    let logits = [-1.0, 0.5, 0.0, 3.0, -0.1, 2.0];
    let mask = mask_from_logits(&logits, 3, 2, 0.0).unwrap();
    let values: Vec<u8> = mask.pixels().map(|p| p[0]).collect();
    assert_eq!(values, vec![0, 255, 0, 255, 0, 255]);
  }

  #[test]
  fn uses_only_the_first_mask() {
    let mut logits = vec![1.0; 4];
    logits.extend(vec![-1.0; 4]);
    let mask = mask_from_logits(&logits, 2, 2, 0.0).unwrap();
    assert!(mask.pixels().all(|p| p[0] == 255));
  }

  #[test]
  fn short_output_is_an_error() {
    let result = mask_from_logits(&[1.0; 3], 2, 2, 0.0);
    assert!(matches!(
      result,
      Err(MobileSamError::MaskSize {
        expected: 4,
        actual: 3
      })
    ));
  }

  #[test]
  fn builder_defaults_decoder_next_to_encoder() {
    let url = Url::parse("mobilesam:///models/mobile_sam_encoder.onnx").unwrap();
    let builder = MobileSamBuilder::from_url(&url).unwrap();
    assert_eq!(
      builder.decoder_path,
      PathBuf::from("/models/mobile_sam_decoder.onnx")
    );
    assert_eq!(builder.mask_threshold, SAM_MASK_THRESH);
    assert!(builder.download.is_none());
  }

  #[test]
  fn builder_reads_overrides() {
    let url = Url::parse(
      "mobilesam:///e.onnx?decoder=/d/dec.onnx&mask_threshold=0.5&decoder_download=https://example.com/d.onnx",
    )
    .unwrap();
    let builder = MobileSamBuilder::from_url(&url).unwrap();
    assert_eq!(builder.decoder_path, PathBuf::from("/d/dec.onnx"));
    assert_eq!(builder.mask_threshold, 0.5);
    assert!(builder.decoder_download.is_some());
  }

  #[test]
  fn builder_rejects_wrong_scheme() {
    let url = Url::parse("gdino:///e.onnx").unwrap();
    assert!(matches!(
      MobileSamBuilder::from_url(&url),
      Err(MobileSamError::ModelPathError(_))
    ));
  }
}
