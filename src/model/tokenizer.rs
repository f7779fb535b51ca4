// 该文件是 Kouqu （抠图取物） 项目的一部分。
// src/model/tokenizer.rs - BERT WordPiece 分词
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

//! Grounding DINO 文本编码器（bert-base-uncased）使用的 WordPiece 分词。

use std::{collections::HashMap, path::Path};

use thiserror::Error;
use tracing::debug;
use unicode_normalization::UnicodeNormalization;
use unicode_properties::{GeneralCategory, GeneralCategoryGroup, UnicodeGeneralCategory};

pub const MAX_TEXT_LEN: usize = 256;
const MAX_WORD_CHARS: usize = 100;

const CLS_TOKEN: &str = "[CLS]";
const SEP_TOKEN: &str = "[SEP]";
const UNK_TOKEN: &str = "[UNK]";

#[derive(Error, Debug)]
pub enum TokenizerError {
  #[error("词表读取错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("词表缺少特殊词元: {0}")]
  MissingSpecialToken(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoding {
  pub input_ids: Vec<i64>,
  pub attention_mask: Vec<i64>,
  pub token_type_ids: Vec<i64>,
}

impl Encoding {
  pub fn len(&self) -> usize {
    self.input_ids.len()
  }

  pub fn is_empty(&self) -> bool {
    self.input_ids.is_empty()
  }
}

#[derive(Debug, Clone)]
pub struct WordPieceTokenizer {
  vocab: HashMap<String, i64>,
  tokens: Vec<String>,
  cls_id: i64,
  sep_id: i64,
  unk_id: i64,
}

impl WordPieceTokenizer {
  /// 读取 vocab.txt：每行一个词元，行号即 id
  pub fn from_file(path: &Path) -> Result<Self, TokenizerError> {
    let content = std::fs::read_to_string(path)?;
    let tokenizer = Self::from_vocab(content.lines())?;
    debug!("词表大小: {}", tokenizer.tokens.len());
    Ok(tokenizer)
  }

  pub fn from_vocab<'a, I: IntoIterator<Item = &'a str>>(lines: I) -> Result<Self, TokenizerError> {
    let tokens: Vec<String> = lines.into_iter().map(|l| l.trim_end().to_string()).collect();
    let vocab: HashMap<String, i64> = tokens
      .iter()
      .enumerate()
      .map(|(i, t)| (t.clone(), i as i64))
      .collect();

    let lookup = |token: &'static str| {
      vocab
        .get(token)
        .copied()
        .ok_or(TokenizerError::MissingSpecialToken(token))
    };
    let cls_id = lookup(CLS_TOKEN)?;
    let sep_id = lookup(SEP_TOKEN)?;
    let unk_id = lookup(UNK_TOKEN)?;

    Ok(Self {
      vocab,
      tokens,
      cls_id,
      sep_id,
      unk_id,
    })
  }

  pub fn encode(&self, text: &str) -> Encoding {
    let mut input_ids = vec![self.cls_id];
    for word in basic_split(&text.to_lowercase()) {
      self.word_piece(&word, &mut input_ids);
    }
    input_ids.push(self.sep_id);

    // 超长时截断，保留结尾的 [SEP]
    if input_ids.len() > MAX_TEXT_LEN {
      input_ids.truncate(MAX_TEXT_LEN - 1);
      input_ids.push(self.sep_id);
    }

    let len = input_ids.len();
    Encoding {
      input_ids,
      attention_mask: vec![1; len],
      token_type_ids: vec![0; len],
    }
  }

  /// 是否为不参与短语解码的词元（[CLS]、[SEP]、句点）
  pub fn is_special(&self, id: i64) -> bool {
    id == self.cls_id || id == self.sep_id || self.token(id) == Some(".")
  }

  pub fn token(&self, id: i64) -> Option<&str> {
    usize::try_from(id)
      .ok()
      .and_then(|i| self.tokens.get(i))
      .map(String::as_str)
  }

  /// 把 id 序列还原为短语，`##` 续接片段直接拼在前一个词后面
  pub fn decode(&self, ids: &[i64]) -> String {
    let mut phrase = String::new();
    for token in ids.iter().filter_map(|&id| self.token(id)) {
      match token.strip_prefix("##") {
        Some(rest) => phrase.push_str(rest),
        None => {
          if !phrase.is_empty() {
            phrase.push(' ');
          }
          phrase.push_str(token);
        }
      }
    }
    phrase
  }

  fn word_piece(&self, word: &str, output: &mut Vec<i64>) {
    let chars: Vec<char> = word.chars().collect();
    if chars.len() > MAX_WORD_CHARS {
      output.push(self.unk_id);
      return;
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    while start < chars.len() {
      let mut end = chars.len();
      let mut found = None;
      while start < end {
        let piece: String = chars[start..end].iter().collect();
        let piece = if start > 0 { format!("##{piece}") } else { piece };
        if let Some(&id) = self.vocab.get(&piece) {
          found = Some(id);
          break;
        }
        end -= 1;
      }

      match found {
        Some(id) => {
          pieces.push(id);
          start = end;
        }
        None => {
          // 整个词无法切分时记为一个 [UNK]
          output.push(self.unk_id);
          return;
        }
      }
    }
    output.extend(pieces);
  }
}

/// BERT 基础切分：NFD 分解后去掉重音，按空白切分，标点和 CJK 汉字单独成词
fn basic_split(text: &str) -> Vec<String> {
  let mut words = Vec::new();
  let mut current = String::new();
  for c in text.nfd() {
    if c == '\0' || c == '\u{fffd}' || (c.is_control() && !c.is_whitespace()) {
      continue;
    }
    if c.general_category() == GeneralCategory::NonspacingMark {
      continue;
    }
    if c.is_whitespace() {
      if !current.is_empty() {
        words.push(std::mem::take(&mut current));
      }
    } else if is_punctuation(c) || is_cjk(c) {
      if !current.is_empty() {
        words.push(std::mem::take(&mut current));
      }
      words.push(c.to_string());
    } else {
      current.push(c);
    }
  }
  if !current.is_empty() {
    words.push(current);
  }
  words
}

// ASCII 中的 $ + < = > ^ ` | ~ 属于符号类，BERT 也按标点处理
fn is_punctuation(c: char) -> bool {
  c.is_ascii_punctuation() || c.general_category_group() == GeneralCategoryGroup::Punctuation
}

fn is_cjk(c: char) -> bool {
  matches!(c as u32,
    0x4E00..=0x9FFF
    | 0x3400..=0x4DBF
    | 0x20000..=0x2A6DF
    | 0x2A700..=0x2B73F
    | 0x2B740..=0x2B81F
    | 0x2B820..=0x2CEAF
    | 0xF900..=0xFAFF
    | 0x2F800..=0x2FA1F)
}

/// Grounding DINO 的提示词约定：小写、去首尾空白、以句点结尾
pub fn normalize_caption(prompt: &str) -> String {
  let mut caption = prompt.trim().to_lowercase();
  if !caption.ends_with('.') {
    caption.push('.');
  }
  caption
}

#[cfg(test)]
mod tests {
  use super::*;

  const VOCAB: &[&str] = &[
    "[PAD]", "[UNK]", "[CLS]", "[SEP]", ".", "the", "burger", "fries", "ham", "##bur", "##ger",
    "hot", "dog", "##s", "cafe", "jalapeno", "汉", "堡", "「", "」",
  ];

  fn tokenizer() -> WordPieceTokenizer {
    WordPieceTokenizer::from_vocab(VOCAB.iter().copied()).unwrap()
  }

  #[test]
  fn encodes_known_words() {
    let encoding = tokenizer().encode("The burger.");
    assert_eq!(encoding.input_ids, vec![2, 5, 6, 4, 3]);
    assert_eq!(encoding.attention_mask, vec![1; 5]);
    assert_eq!(encoding.token_type_ids, vec![0; 5]);
  }

  #[test]
  fn splits_into_word_pieces() {
    let encoding = tokenizer().encode("hamburger hotdogs");
    // hotdogs 在 ##dogs 处无法继续切分，整词记为 [UNK]
    assert_eq!(encoding.input_ids, vec![2, 8, 9, 10, 1, 3]);
  }

  #[test]
  fn unknown_word_is_a_single_unk() {
    let encoding = tokenizer().encode("pizza");
    assert_eq!(encoding.input_ids, vec![2, 1, 3]);
  }

  #[test]
  fn strips_accents_before_lookup() {
    assert_eq!(tokenizer().encode("Café").input_ids, vec![2, 14, 3]);
    assert_eq!(tokenizer().encode("jalapeño").input_ids, vec![2, 15, 3]);
  }

  #[test]
  fn cjk_characters_are_separate_words() {
    assert_eq!(tokenizer().encode("汉堡").input_ids, vec![2, 16, 17, 3]);
  }

  #[test]
  fn unicode_punctuation_splits_words() {
    let encoding = tokenizer().encode("burger「fries」");
    assert_eq!(encoding.input_ids, vec![2, 6, 18, 7, 19, 3]);
  }

  #[test]
  fn fullwidth_comma_is_not_merged_into_a_word() {
    // 全角逗号经 NFD 不变，单独成词后查不到，记为 [UNK]
    let encoding = tokenizer().encode("burger，fries");
    assert_eq!(encoding.input_ids, vec![2, 6, 1, 7, 3]);
  }

  #[test]
  fn truncates_long_prompts_keeping_sep() {
    let text = "the ".repeat(400);
    let encoding = tokenizer().encode(&text);
    assert_eq!(encoding.len(), MAX_TEXT_LEN);
    assert_eq!(*encoding.input_ids.last().unwrap(), 3);
  }

  #[test]
  fn decode_joins_continuations() {
    let t = tokenizer();
    assert_eq!(t.decode(&[5, 8, 9, 10]), "the hamburger");
  }

  #[test]
  fn special_tokens_are_flagged() {
    let t = tokenizer();
    assert!(t.is_special(2));
    assert!(t.is_special(3));
    assert!(t.is_special(4));
    assert!(!t.is_special(6));
  }

  #[test]
  fn missing_special_token_is_rejected() {
    let result = WordPieceTokenizer::from_vocab(["[PAD]", "hello"]);
    assert!(matches!(
      result,
      Err(TokenizerError::MissingSpecialToken("[CLS]"))
    ));
  }

  #[test]
  fn caption_is_normalized() {
    assert_eq!(normalize_caption("  The Burger "), "the burger.");
    assert_eq!(normalize_caption("fries."), "fries.");
  }
}
