// 该文件是 Kouqu （抠图取物） 项目的一部分。
// src/args.rs - 服务参数配置
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

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use kouqu::{input::DEFAULT_MAX_IMAGE_SIDE, server::DEFAULT_MAX_UPLOAD_BYTES};

/// Kouqu 抠图服务参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 监听地址
  #[arg(long, env = "HOST", default_value = "0.0.0.0")]
  pub host: String,

  /// 监听端口（Cloud Run 通过 PORT 注入）
  #[arg(long, env = "PORT", default_value_t = 8080)]
  pub port: u16,

  /// Grounding DINO 模型
  /// 例如: gdino:///models/grounding_dino.onnx?box_threshold=0.35&download=https://...
  #[arg(
    long,
    env = "KOUQU_DETECTOR",
    value_name = "MODEL",
    default_value = "gdino:///models/grounding_dino.onnx"
  )]
  pub detector: Url,

  /// MobileSAM 编码器模型，解码器通过 decoder 参数指定
  /// 例如: mobilesam:///models/mobile_sam_encoder.onnx?decoder=/models/mobile_sam_decoder.onnx
  #[arg(
    long,
    env = "KOUQU_SEGMENTER",
    value_name = "MODEL",
    default_value = "mobilesam:///models/mobile_sam_encoder.onnx"
  )]
  pub segmenter: Url,

  /// 静态文件目录，结果图片写入其中的 images 子目录
  #[arg(long, env = "KOUQU_STATIC_DIR", default_value = "static", value_name = "DIR")]
  pub static_dir: PathBuf,

  /// 结果文件保留秒数，0 表示永久保留
  #[arg(long, env = "KOUQU_RETENTION_SECS", default_value_t = 0, value_name = "SECONDS")]
  pub retention_secs: u64,

  /// 上传请求体大小上限（字节）
  #[arg(long, env = "KOUQU_MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES, value_name = "BYTES")]
  pub max_upload_bytes: usize,

  /// 图像最长边上限（像素）
  #[arg(long, env = "KOUQU_MAX_IMAGE_SIDE", default_value_t = DEFAULT_MAX_IMAGE_SIDE, value_name = "PIXELS")]
  pub max_image_side: u32,
}
