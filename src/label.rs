// 该文件是 Linzhi （林芝） 项目的一部分。
// src/label.rs - 类别标签映射
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

//! 标签映射文件解析
//!
//! 标签映射使用 protobuf 文本格式，每个条目形如：
//!
//! ```text
//! item {
//!   name: "/m/01g317"
//!   id: 1
//!   display_name: "person"
//! }
//! ```
//!
//! 解析后得到 [`CategoryIndex`]：类别编号到显示名称的只读映射。

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

/// 未知类别的显示名称
pub const UNKNOWN_LABEL: &str = "unknown";

#[derive(Error, Debug)]
pub enum LabelMapError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("第 {line} 行语法错误: {message}")]
  SyntaxError { line: usize, message: String },
  #[error("第 {line} 行的条目缺少 id 字段")]
  MissingId { line: usize },
  #[error("第 {line} 行的 id 无效: {value}")]
  InvalidId { line: usize, value: String },
}

impl LabelMapError {
  fn syntax(line: usize, message: impl Into<String>) -> Self {
    LabelMapError::SyntaxError {
      line,
      message: message.into(),
    }
  }
}

/// 标签映射中的单个条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelItem {
  pub id: u32,
  pub name: Option<String>,
  pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
  Ident(String),
  Str(String),
  Number(String),
  Colon,
  OpenBrace,
  CloseBrace,
}

struct Lexer<'a> {
  chars: std::iter::Peekable<std::str::Chars<'a>>,
  line: usize,
}

impl<'a> Lexer<'a> {
  fn new(text: &'a str) -> Self {
    Self {
      chars: text.chars().peekable(),
      line: 1,
    }
  }

  fn skip_blank(&mut self) {
    while let Some(&c) = self.chars.peek() {
      match c {
        '\n' => {
          self.line += 1;
          self.chars.next();
        }
        '#' => {
          while let Some(&c) = self.chars.peek() {
            if c == '\n' {
              break;
            }
            self.chars.next();
          }
        }
        c if c.is_whitespace() || c == ',' || c == ';' => {
          self.chars.next();
        }
        _ => break,
      }
    }
  }

  fn read_string(&mut self, quote: char) -> Result<String, LabelMapError> {
    let mut value = String::new();
    loop {
      match self.chars.next() {
        Some(c) if c == quote => return Ok(value),
        Some('\\') => match self.chars.next() {
          Some('n') => value.push('\n'),
          Some('t') => value.push('\t'),
          Some(c) => value.push(c),
          None => return Err(LabelMapError::syntax(self.line, "字符串未闭合")),
        },
        Some('\n') | None => return Err(LabelMapError::syntax(self.line, "字符串未闭合")),
        Some(c) => value.push(c),
      }
    }
  }

  fn next_token(&mut self) -> Result<Option<(usize, Token)>, LabelMapError> {
    self.skip_blank();
    let line = self.line;
    let Some(c) = self.chars.next() else {
      return Ok(None);
    };

    let token = match c {
      ':' => Token::Colon,
      '{' => Token::OpenBrace,
      '}' => Token::CloseBrace,
      '"' | '\'' => Token::Str(self.read_string(c)?),
      c if c.is_ascii_digit() || c == '-' || c == '+' => {
        let mut value = String::from(c);
        while let Some(&c) = self.chars.peek() {
          if c.is_ascii_alphanumeric() || c == '.' {
            value.push(c);
            self.chars.next();
          } else {
            break;
          }
        }
        Token::Number(value)
      }
      c if c.is_alphabetic() || c == '_' => {
        let mut value = String::from(c);
        while let Some(&c) = self.chars.peek() {
          if c.is_alphanumeric() || c == '_' {
            value.push(c);
            self.chars.next();
          } else {
            break;
          }
        }
        Token::Ident(value)
      }
      c => {
        return Err(LabelMapError::syntax(line, format!("意外的字符 '{}'", c)));
      }
    };

    Ok(Some((line, token)))
  }

  fn tokenize(mut self) -> Result<Vec<(usize, Token)>, LabelMapError> {
    let mut tokens = Vec::new();
    while let Some(token) = self.next_token()? {
      tokens.push(token);
    }
    Ok(tokens)
  }
}

// 跳过一个已读入 '{' 的消息体，直到与之匹配的 '}'
fn skip_message<I>(iter: &mut I, open_line: usize) -> Result<(), LabelMapError>
where
  I: Iterator<Item = (usize, Token)>,
{
  let mut depth = 1usize;
  while depth > 0 {
    match iter.next() {
      Some((_, Token::OpenBrace)) => depth += 1,
      Some((_, Token::CloseBrace)) => depth -= 1,
      Some(_) => {}
      None => return Err(LabelMapError::syntax(open_line, "嵌套消息未闭合")),
    }
  }
  Ok(())
}

/// 解析 protobuf 文本格式的标签映射
pub fn parse_label_map(text: &str) -> Result<Vec<LabelItem>, LabelMapError> {
  let tokens = Lexer::new(text).tokenize()?;
  let mut iter = tokens.into_iter().peekable();
  let mut items = Vec::new();

  while let Some((line, token)) = iter.next() {
    match token {
      Token::Ident(ref key) if key == "item" => {}
      other => {
        return Err(LabelMapError::syntax(
          line,
          format!("期望 'item'，实际为 {:?}", other),
        ));
      }
    }

    // `item: {` 与 `item {` 两种写法均合法
    if matches!(iter.peek(), Some((_, Token::Colon))) {
      iter.next();
    }
    match iter.next() {
      Some((_, Token::OpenBrace)) => {}
      _ => return Err(LabelMapError::syntax(line, "'item' 之后缺少 '{'")),
    }

    let item_line = line;
    let mut id = None;
    let mut name = None;
    let mut display_name = None;

    loop {
      let (line, token) = iter
        .next()
        .ok_or_else(|| LabelMapError::syntax(item_line, "条目未闭合"))?;
      let key = match token {
        Token::CloseBrace => break,
        Token::Ident(key) => key,
        other => {
          return Err(LabelMapError::syntax(
            line,
            format!("期望字段名，实际为 {:?}", other),
          ));
        }
      };

      let has_colon = matches!(iter.peek(), Some((_, Token::Colon)));
      if has_colon {
        iter.next();
      }

      // 嵌套消息（如 keypoints { ... }）之前的 ':' 可省略
      if matches!(iter.peek(), Some((_, Token::OpenBrace))) {
        if matches!(key.as_str(), "id" | "name" | "display_name") {
          return Err(LabelMapError::syntax(
            line,
            format!("字段 '{}' 的取值不能是消息", key),
          ));
        }
        iter.next();
        skip_message(&mut iter, line)?;
        debug!("忽略标签映射中的嵌套字段: {}", key);
        continue;
      }

      if !has_colon {
        return Err(LabelMapError::syntax(
          line,
          format!("字段 '{}' 之后缺少 ':'", key),
        ));
      }

      let value = match iter.next() {
        Some((_, Token::Str(value))) | Some((_, Token::Number(value))) => value,
        Some((_, Token::Ident(value))) => value,
        _ => {
          return Err(LabelMapError::syntax(
            line,
            format!("字段 '{}' 缺少取值", key),
          ));
        }
      };

      match key.as_str() {
        "id" => {
          let parsed = value
            .parse::<i64>()
            .ok()
            .filter(|id| *id >= 1 && *id <= u32::MAX as i64)
            .ok_or_else(|| LabelMapError::InvalidId {
              line,
              value: value.clone(),
            })?;
          id = Some(parsed as u32);
        }
        "name" => name = Some(value),
        "display_name" => display_name = Some(value),
        other => debug!("忽略标签映射中的未知字段: {}", other),
      }
    }

    let id = id.ok_or(LabelMapError::MissingId { line: item_line })?;
    items.push(LabelItem {
      id,
      name,
      display_name,
    });
  }

  Ok(items)
}

/// 类别编号到显示名称的映射，启动时构建一次，之后只读
#[derive(Debug, Clone, Default)]
pub struct CategoryIndex {
  names: BTreeMap<u32, String>,
}

impl CategoryIndex {
  /// 由标签条目构建，超出 `max_num_classes` 的条目被忽略，重复的 id 只保留第一次出现
  pub fn from_items(items: &[LabelItem], max_num_classes: u32, use_display_name: bool) -> Self {
    let mut names = BTreeMap::new();
    for item in items {
      if item.id == 0 || item.id > max_num_classes {
        info!("忽略类别 {}，超出类别范围 [1, {}]", item.id, max_num_classes);
        continue;
      }

      let name = match (&item.display_name, &item.name) {
        (Some(display_name), _) if use_display_name => display_name.clone(),
        (_, Some(name)) => name.clone(),
        (Some(display_name), None) => display_name.clone(),
        (None, None) => format!("category_{}", item.id),
      };

      if names.contains_key(&item.id) {
        debug!("类别 {} 重复出现，保留首个名称", item.id);
        continue;
      }
      names.insert(item.id, name);
    }
    Self { names }
  }

  /// 从标签映射文件加载
  pub fn load(path: impl AsRef<Path>, max_num_classes: u32) -> Result<Self, LabelMapError> {
    let path = path.as_ref();
    info!("加载标签映射文件: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    let items = parse_label_map(&text)?;
    let index = Self::from_items(&items, max_num_classes, true);
    info!("标签映射加载完成, 共 {} 个类别", index.len());
    Ok(index)
  }

  pub fn get(&self, class_id: u32) -> Option<&str> {
    self.names.get(&class_id).map(String::as_str)
  }

  /// 查询显示名称，未知类别返回 [`UNKNOWN_LABEL`]
  pub fn display_name(&self, class_id: u32) -> &str {
    self.get(class_id).unwrap_or(UNKNOWN_LABEL)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE: &str = r#"
# COCO 片段
item {
  name: "/m/01g317"
  id: 1
  display_name: "person"
}
item {
  name: "/m/0199g"
  id: 2
  display_name: "bicycle"
}
item: {
  name: 'toothbrush'
  id: 90
}
item {
  name: "/m/beyond"
  id: 91
  display_name: "beyond"
}
"#;

  #[test]
  fn parses_items_in_order() {
    let items = parse_label_map(SAMPLE).unwrap();
    assert_eq!(items.len(), 4);
    assert_eq!(items[0].id, 1);
    assert_eq!(items[0].name.as_deref(), Some("/m/01g317"));
    assert_eq!(items[0].display_name.as_deref(), Some("person"));
    assert_eq!(items[2].display_name, None);
  }

  #[test]
  fn category_index_resolves_known_ids() {
    let items = parse_label_map(SAMPLE).unwrap();
    let index = CategoryIndex::from_items(&items, 90, true);
    assert_eq!(index.len(), 3);
    assert_eq!(index.display_name(1), "person");
    assert_eq!(index.display_name(2), "bicycle");
    assert_eq!(index.display_name(90), "toothbrush");
  }

  #[test]
  fn out_of_range_ids_are_unknown() {
    let items = parse_label_map(SAMPLE).unwrap();
    let index = CategoryIndex::from_items(&items, 90, true);
    assert_eq!(index.get(91), None);
    assert_eq!(index.display_name(91), UNKNOWN_LABEL);
    assert_eq!(index.display_name(0), UNKNOWN_LABEL);
    assert_eq!(index.display_name(u32::MAX), UNKNOWN_LABEL);
  }

  #[test]
  fn raw_names_when_display_name_disabled() {
    let items = parse_label_map(SAMPLE).unwrap();
    let index = CategoryIndex::from_items(&items, 90, false);
    assert_eq!(index.display_name(1), "/m/01g317");
  }

  #[test]
  fn duplicate_ids_keep_first_name() {
    let items = parse_label_map(
      "item { id: 3 display_name: \"car\" } item { id: 3 display_name: \"auto\" }",
    )
    .unwrap();
    let index = CategoryIndex::from_items(&items, 90, true);
    assert_eq!(index.len(), 1);
    assert_eq!(index.display_name(3), "car");
  }

  #[test]
  fn missing_id_is_reported() {
    let err = parse_label_map("item {\n  name: \"x\"\n}\n").unwrap_err();
    assert!(matches!(err, LabelMapError::MissingId { line: 1 }));
  }

  #[test]
  fn negative_id_is_rejected() {
    let err = parse_label_map("item {\n  id: -1\n}").unwrap_err();
    assert!(matches!(err, LabelMapError::InvalidId { line: 2, .. }));
  }

  #[test]
  fn unterminated_item_is_syntax_error() {
    let err = parse_label_map("item {\n  id: 1\n").unwrap_err();
    assert!(matches!(err, LabelMapError::SyntaxError { .. }));
  }

  #[test]
  fn nested_messages_are_skipped() {
    let text = r#"
item {
  name: "/m/01g317"
  id: 1
  display_name: "person"
  keypoints {
    id: 0
    label: "nose"
  }
  keypoints: { id: 1 label: "left_eye" }
  frequency: FREQUENT
}
item { id: 2 display_name: "bicycle" }
"#;
    let items = parse_label_map(text).unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].id, 1);
    assert_eq!(items[0].display_name.as_deref(), Some("person"));
    assert_eq!(items[1].id, 2);
  }

  #[test]
  fn unterminated_nested_message_is_syntax_error() {
    let err = parse_label_map("item {\n  id: 1\n  keypoints {\n    id: 0\n").unwrap_err();
    assert!(matches!(err, LabelMapError::SyntaxError { line: 3, .. }));
  }

  #[test]
  fn known_field_cannot_be_a_message() {
    let err = parse_label_map("item { id { value: 1 } }").unwrap_err();
    assert!(matches!(err, LabelMapError::SyntaxError { .. }));
  }

  #[test]
  fn bundled_coco_label_map_has_eighty_classes() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/data/mscoco_label_map.pbtxt");
    let index = CategoryIndex::load(path, 90).unwrap();
    assert_eq!(index.len(), 80);
    assert_eq!(index.display_name(1), "person");
    assert_eq!(index.display_name(18), "dog");
    assert_eq!(index.display_name(90), "toothbrush");
    // 12 号在 COCO 中未使用
    assert_eq!(index.display_name(12), UNKNOWN_LABEL);
  }
}
