// 该文件是 Kouqu （抠图取物） 项目的一部分。
// src/model/grounding_dino.rs - Grounding DINO 开放词汇检测
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
  sync::Mutex,
};

use ndarray::{Array2, Array3};
use ort::{session::Session, value::TensorRef};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use super::{
  DetectItem, DetectQuery, DetectResult, Model,
  download::{DownloadError, ensure_file},
  session::{DEFAULT_INTRA_THREADS, OwnedTensor, build_session},
  tokenizer::{Encoding, TokenizerError, WordPieceTokenizer, normalize_caption},
};
use crate::{FromUrl, FromUrlWithScheme, frame::ImageNet, frame::NchwFrame, query_value};

const GDINO_INPUT_W: u32 = 800;
const GDINO_INPUT_H: u32 = 800;
const GDINO_BOX_THRESH: f32 = 0.35;
const GDINO_TEXT_THRESH: f32 = 0.25;
const GDINO_VOCAB_FILE: &str = "vocab.txt";

type GdinoFrame = NchwFrame<GDINO_INPUT_W, GDINO_INPUT_H>;

#[derive(Error, Debug)]
pub enum GroundingDinoError {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("参数 {0} 无效: {1}")]
  InvalidParam(&'static str, String),
  #[error("模型文件错误: {0}")]
  Download(#[from] DownloadError),
  #[error("分词器错误: {0}")]
  Tokenizer(#[from] TokenizerError),
  #[error("ONNX Runtime 错误: {0}")]
  Ort(#[from] ort::Error),
  #[error("张量形状错误: {0}")]
  Shape(#[from] ndarray::ShapeError),
  #[error("模型缺少输出: {0}")]
  MissingOutput(&'static str),
  #[error("模型输出形状不符合预期: {0}")]
  UnexpectedOutput(String),
  #[error("推理会话锁已失效")]
  Poisoned,
}

pub struct GroundingDinoBuilder {
  model_path: PathBuf,
  vocab_path: PathBuf,
  box_threshold: f32,
  text_threshold: f32,
  threads: usize,
  download: Option<Url>,
}

impl FromUrlWithScheme for GroundingDinoBuilder {
  const SCHEME: &'static str = "gdino";
}

fn parse_param<T: std::str::FromStr>(
  url: &Url,
  key: &'static str,
  default: T,
) -> Result<T, GroundingDinoError> {
  match query_value(url, key) {
    Some(v) => v
      .parse()
      .map_err(|_| GroundingDinoError::InvalidParam(key, v)),
    None => Ok(default),
  }
}

impl FromUrl for GroundingDinoBuilder {
  type Error = GroundingDinoError;

  /// `gdino:///models/groundingdino.onnx?vocab=...&box_threshold=0.35&text_threshold=0.25`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GroundingDinoError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let model_path = PathBuf::from(url.path());
    let vocab_path = query_value(url, "vocab")
      .map(PathBuf::from)
      .unwrap_or_else(|| sibling(&model_path, GDINO_VOCAB_FILE));
    let download = match query_value(url, "download") {
      Some(v) => Some(
        Url::parse(&v).map_err(|_| GroundingDinoError::InvalidParam("download", v))?,
      ),
      None => None,
    };

    let builder = GroundingDinoBuilder {
      model_path,
      vocab_path,
      box_threshold: parse_param(url, "box_threshold", GDINO_BOX_THRESH)?,
      text_threshold: parse_param(url, "text_threshold", GDINO_TEXT_THRESH)?,
      threads: parse_param(url, "threads", DEFAULT_INTRA_THREADS)?,
      download,
    };

    for (key, value) in [
      ("box_threshold", builder.box_threshold),
      ("text_threshold", builder.text_threshold),
    ] {
      if !(0.0..=1.0).contains(&value) {
        return Err(GroundingDinoError::InvalidParam(key, value.to_string()));
      }
    }

    Ok(builder)
  }
}

pub(super) fn sibling(path: &Path, name: &str) -> PathBuf {
  path
    .parent()
    .map(|p| p.join(name))
    .unwrap_or_else(|| PathBuf::from(name))
}

impl GroundingDinoBuilder {
  pub fn box_threshold(mut self, threshold: f32) -> Self {
    self.box_threshold = threshold;
    self
  }

  pub fn text_threshold(mut self, threshold: f32) -> Self {
    self.text_threshold = threshold;
    self
  }

  pub fn build(self) -> Result<GroundingDino, GroundingDinoError> {
    ensure_file(&self.model_path, self.download.as_ref())?;
    let tokenizer = WordPieceTokenizer::from_file(&self.vocab_path)?;

    info!("创建 Grounding DINO 推理会话");
    let session = build_session(&self.model_path, self.threads)?;
    info!(
      "Grounding DINO 加载完成 (box_threshold={}, text_threshold={})",
      self.box_threshold, self.text_threshold
    );

    Ok(GroundingDino {
      session: Mutex::new(session),
      tokenizer,
      box_threshold: self.box_threshold,
      text_threshold: self.text_threshold,
    })
  }
}

pub struct GroundingDino {
  session: Mutex<Session>,
  tokenizer: WordPieceTokenizer,
  box_threshold: f32,
  text_threshold: f32,
}

impl Model for GroundingDino {
  type Input = DetectQuery;
  type Output = DetectResult;
  type Error = GroundingDinoError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let caption = normalize_caption(&input.prompt);
    let encoding = self.tokenizer.encode(&caption);
    debug!("提示词: {:?}, 词元数: {}", caption, encoding.len());

    let frame = GdinoFrame::stretch::<ImageNet>(input.image.as_rgb());
    let pixel_values = frame.to_array()?;
    let text_len = encoding.len();
    let input_ids = Array2::from_shape_vec((1, text_len), encoding.input_ids.clone())?;
    let attention_mask = Array2::from_shape_vec((1, text_len), encoding.attention_mask.clone())?;
    let token_type_ids = Array2::from_shape_vec((1, text_len), encoding.token_type_ids.clone())?;
    let pixel_mask = Array3::<i64>::ones((1, GDINO_INPUT_H as usize, GDINO_INPUT_W as usize));

    let (logits, boxes) = {
      let mut session = self
        .session
        .lock()
        .map_err(|_| GroundingDinoError::Poisoned)?;
      debug!("执行 Grounding DINO 推理");
      let outputs = session.run(ort::inputs![
        "pixel_values" => TensorRef::from_array_view(&pixel_values)?,
        "input_ids" => TensorRef::from_array_view(&input_ids)?,
        "attention_mask" => TensorRef::from_array_view(&attention_mask)?,
        "token_type_ids" => TensorRef::from_array_view(&token_type_ids)?,
        "pixel_mask" => TensorRef::from_array_view(&pixel_mask)?,
      ])?;

      let logits = outputs
        .get("logits")
        .ok_or(GroundingDinoError::MissingOutput("logits"))?;
      let boxes = outputs
        .get("pred_boxes")
        .ok_or(GroundingDinoError::MissingOutput("pred_boxes"))?;
      (OwnedTensor::from_value(logits)?, OwnedTensor::from_value(boxes)?)
    };
    debug!("logits 形状: {:?}, pred_boxes 形状: {:?}", logits.shape, boxes.shape);

    let outputs = DinoOutputs::new(logits, boxes)?;
    let result = outputs.decode(
      &encoding,
      &self.tokenizer,
      self.box_threshold,
      self.text_threshold,
      (input.image.width(), input.image.height()),
    );
    debug!("检测到 {} 个目标", result.len());
    Ok(result)
  }
}

/// 模型的原始输出：logits [1, Q, T] 与 pred_boxes [1, Q, 4]（归一化 cx, cy, w, h）
#[derive(Debug, Clone)]
pub(crate) struct DinoOutputs {
  logits: Vec<f32>,
  boxes: Vec<f32>,
  num_queries: usize,
  num_text: usize,
}

impl DinoOutputs {
  fn new(logits: OwnedTensor, boxes: OwnedTensor) -> Result<Self, GroundingDinoError> {
    if logits.shape.len() != 3 || boxes.shape.len() != 3 || boxes.dim(2) != 4 {
      return Err(GroundingDinoError::UnexpectedOutput(format!(
        "logits {:?}, pred_boxes {:?}",
        logits.shape, boxes.shape
      )));
    }
    let num_queries = logits.dim(1).min(boxes.dim(1));
    let num_text = logits.dim(2);
    Ok(Self::from_raw(logits.data, boxes.data, num_queries, num_text))
  }

  pub(crate) fn from_raw(
    logits: Vec<f32>,
    boxes: Vec<f32>,
    num_queries: usize,
    num_text: usize,
  ) -> Self {
    Self {
      logits,
      boxes,
      num_queries,
      num_text,
    }
  }

  pub(crate) fn decode(
    &self,
    encoding: &Encoding,
    tokenizer: &WordPieceTokenizer,
    box_threshold: f32,
    text_threshold: f32,
    (width, height): (u32, u32),
  ) -> DetectResult {
    let (w, h) = (width as f32, height as f32);
    // 只看实际输入的词元位置，其余位置是填充
    let valid = encoding.len().min(self.num_text);
    let mut items = Vec::new();

    for q in 0..self.num_queries {
      let start = q * self.num_text;
      let Some(row) = self.logits.get(start..start + valid) else {
        break;
      };
      let Some(&[cx, cy, bw, bh]) = self.boxes.get(q * 4..q * 4 + 4) else {
        break;
      };

      let probs: Vec<f32> = row.iter().map(|&l| sigmoid(l)).collect();
      let score = probs
        .iter()
        .copied()
        .filter(|p| !p.is_nan())
        .fold(f32::NEG_INFINITY, f32::max);
      if score <= box_threshold {
        continue;
      }
      if [cx, cy, bw, bh].iter().any(|v| v.is_nan()) {
        continue;
      }

      let x_min = ((cx - bw / 2.0) * w).clamp(0.0, w);
      let y_min = ((cy - bh / 2.0) * h).clamp(0.0, h);
      let x_max = ((cx + bw / 2.0) * w).clamp(0.0, w);
      let y_max = ((cy + bh / 2.0) * h).clamp(0.0, h);
      if x_max <= x_min || y_max <= y_min {
        continue;
      }

      let phrase_ids: Vec<i64> = probs
        .iter()
        .zip(encoding.input_ids.iter())
        .filter(|&(&p, &id)| p > text_threshold && !tokenizer.is_special(id))
        .map(|(_, &id)| id)
        .collect();

      items.push(DetectItem {
        phrase: tokenizer.decode(&phrase_ids),
        score,
        bbox: [x_min, y_min, x_max, y_max],
      });
    }

    items.sort_by(|a, b| b.score.total_cmp(&a.score));
    DetectResult::from(items)
  }
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
  use super::*;

  const VOCAB: &[&str] = &["[PAD]", "[UNK]", "[CLS]", "[SEP]", ".", "the", "burger", "fries"];
  const NUM_TEXT: usize = 8;

  fn tokenizer() -> WordPieceTokenizer {
    WordPieceTokenizer::from_vocab(VOCAB.iter().copied()).unwrap()
  }

  /// 构造一个 query 的 logits 行：给定位置取 `hit`，其余取很小的值
  fn logit_row(hits: &[(usize, f32)]) -> Vec<f32> {
    let mut row = vec![-10.0; NUM_TEXT];
    for &(i, v) in hits {
      row[i] = v;
    }
    row
  }

  fn decode(logits: Vec<f32>, boxes: Vec<f32>, queries: usize) -> DetectResult {
    let t = tokenizer();
    // [CLS] the burger . [SEP]
    let encoding = t.encode("the burger.");
    DinoOutputs::from_raw(logits, boxes, queries, NUM_TEXT).decode(
      &encoding,
      &t,
      GDINO_BOX_THRESH,
      GDINO_TEXT_THRESH,
      (200, 100),
    )
  }

  #[test]
  fn keeps_boxes_above_threshold_sorted_by_score() {
    let mut logits = logit_row(&[(2, 1.0)]);
    logits.extend(logit_row(&[(2, 3.0), (1, 2.0)]));
    logits.extend(logit_row(&[]));
    let boxes = vec![
      0.5, 0.5, 0.2, 0.2, //
      0.25, 0.5, 0.5, 1.0, //
      0.5, 0.5, 1.0, 1.0,
    ];

    let result = decode(logits, boxes, 3);
    assert_eq!(result.len(), 2);
    assert!(result.items[0].score > result.items[1].score);
    assert_eq!(result.items[0].bbox, [0.0, 0.0, 100.0, 100.0]);
    assert_eq!(result.items[0].phrase, "the burger");
    assert_eq!(result.items[1].phrase, "burger");
    assert!(result.items.iter().all(|i| i.score > GDINO_BOX_THRESH));
  }

  #[test]
  fn ignores_logits_past_the_prompt() {
    // 第 6 个位置超出 5 个词元的提示，不应计入得分
    let logits = logit_row(&[(6, 5.0)]);
    let result = decode(logits, vec![0.5, 0.5, 0.5, 0.5], 1);
    assert!(result.is_empty());
  }

  #[test]
  fn skips_nan_and_degenerate_boxes() {
    let mut logits = logit_row(&[(2, 2.0)]);
    logits.extend(logit_row(&[(2, 2.0)]));
    let boxes = vec![
      f32::NAN, 0.5, 0.2, 0.2, //
      0.5, 0.5, 0.0, 0.3,
    ];
    assert!(decode(logits, boxes, 2).is_empty());
  }

  #[test]
  fn clamps_boxes_to_the_image() {
    let logits = logit_row(&[(2, 2.0)]);
    let result = decode(logits, vec![0.9, 0.1, 0.4, 0.4], 1);
    let [x_min, y_min, x_max, y_max] = result.items[0].bbox;
    assert!((x_min - 140.0).abs() < 1e-3);
    assert_eq!(y_min, 0.0);
    assert_eq!(x_max, 200.0);
    assert!((y_max - 30.0).abs() < 1e-3);
  }

  #[test]
  fn special_tokens_never_make_the_phrase() {
    let logits = logit_row(&[(0, 4.0), (3, 4.0), (4, 4.0), (2, 4.0)]);
    let result = decode(logits, vec![0.5, 0.5, 0.5, 0.5], 1);
    assert_eq!(result.items[0].phrase, "burger");
  }

  #[test]
  fn builder_parses_url_parameters() {
    let url = Url::parse(
      "gdino:///models/gdino.onnx?box_threshold=0.4&text_threshold=0.3&threads=2&download=https://example.com/g.onnx",
    )
    .unwrap();
    let builder = GroundingDinoBuilder::from_url(&url).unwrap();
    assert_eq!(builder.model_path, PathBuf::from("/models/gdino.onnx"));
    assert_eq!(builder.vocab_path, PathBuf::from("/models/vocab.txt"));
    assert_eq!(builder.box_threshold, 0.4);
    assert_eq!(builder.text_threshold, 0.3);
    assert_eq!(builder.threads, 2);
    assert!(builder.download.is_some());
  }

  #[test]
  fn builder_rejects_bad_parameters() {
    let url = Url::parse("gdino:///m.onnx?box_threshold=lots").unwrap();
    assert!(matches!(
      GroundingDinoBuilder::from_url(&url),
      Err(GroundingDinoError::InvalidParam("box_threshold", _))
    ));

    let url = Url::parse("gdino:///m.onnx?text_threshold=1.5").unwrap();
    assert!(GroundingDinoBuilder::from_url(&url).is_err());

    let url = Url::parse("yolo26:///m.onnx").unwrap();
    assert!(matches!(
      GroundingDinoBuilder::from_url(&url),
      Err(GroundingDinoError::ModelPathError(_))
    ));
  }
}
