//! `correct_answer_spec` 的解析
//!
//! 儲存格式 (wire encoding):
//! - MCQ / CHECKBOX / 單欄 SHORT：預期答案字串本身
//! - 多欄 SHORT：以 `|` 分隔，例如 `cat|dog|bird`，欄位依序標為 `A`、`B`、`C`…
//!   舊資料的 `,` 分隔只在「不含 `|`、`options_count > 1`、且切出的數量剛好等於
//!   `options_count`」時才會被接受，其餘情況一律視為錯誤
//! - LONG：內容忽略
//! - MIXED：JSON 陣列，`[{"type": "MCQ", "answer": "B"}, {"type": "LONG"}]`
//!
//! 題目在建立 catalog 時解析一次，評分器只接觸強型別的 [`AnswerSpec`]。

use crate::domain::model::{Question, QuestionId, QuestionType};
use crate::utils::error::{EngineError, Result};
use serde::Deserialize;
use std::collections::HashSet;

pub const CANONICAL_DELIMITER: char = '|';
pub const LEGACY_DELIMITER: char = ',';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub label: String,
    pub expected: String,
}

/// MIXED 題中的單一小題
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartSpec {
    Choice(String),
    Text(String),
    Slots(Vec<Slot>),
    Manual,
}

impl PartSpec {
    pub fn is_manual(&self) -> bool {
        matches!(self, PartSpec::Manual)
    }

    /// 多空格的 SHORT 小題每格算一個，其餘小題各算一個
    pub fn value_count(&self) -> usize {
        match self {
            PartSpec::Slots(slots) => slots.len(),
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixedPart {
    pub label: String,
    pub spec: PartSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerSpec {
    Choice(String),
    Text(String),
    Slots(Vec<Slot>),
    Manual,
    Mixed(Vec<MixedPart>),
}

impl AnswerSpec {
    /// 是否計入 total_possible
    pub fn counts_toward_total(&self) -> bool {
        match self {
            AnswerSpec::Manual => false,
            AnswerSpec::Mixed(parts) => parts.iter().any(|part| !part.spec.is_manual()),
            _ => true,
        }
    }

    pub fn expected_value_count(&self) -> usize {
        match self {
            AnswerSpec::Slots(slots) => slots.len(),
            AnswerSpec::Mixed(parts) => parts.iter().map(|part| part.spec.value_count()).sum(),
            _ => 1,
        }
    }
}

/// 已解析的題目，`question.options_count` 已依實際內容校正
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuestion {
    pub question: Question,
    pub spec: AnswerSpec,
}

impl ParsedQuestion {
    pub fn parse(question: &Question) -> Result<Self> {
        if question.points == 0 {
            return Err(EngineError::InvalidAnswerSpec {
                question_id: question.id,
                message: "points must be at least 1".to_string(),
            });
        }

        let spec = parse_answer_spec(question)?;
        let mut question = question.clone();

        if matches!(question.question_type, QuestionType::Short | QuestionType::Mixed) {
            let actual = spec.expected_value_count() as u32;
            if question.options_count != Some(actual) {
                if let Some(declared) = question.options_count {
                    tracing::warn!(
                        "Question {} declares options_count={} but its spec holds {} values, correcting",
                        question.id,
                        declared,
                        actual
                    );
                }
                question.options_count = Some(actual);
            }
        }

        Ok(Self { question, spec })
    }

    pub fn id(&self) -> QuestionId {
        self.question.id
    }

    pub fn points(&self) -> u32 {
        self.question.points
    }

    pub fn counts_toward_total(&self) -> bool {
        self.spec.counts_toward_total()
    }
}

#[derive(Debug, Deserialize)]
struct RawPart {
    #[serde(rename = "type")]
    part_type: QuestionType,
    #[serde(default)]
    answer: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    options_count: Option<u32>,
}

pub fn parse_answer_spec(question: &Question) -> Result<AnswerSpec> {
    let id = question.id;
    let raw = question.correct_answer_spec.as_str();

    match question.question_type {
        QuestionType::Mcq | QuestionType::Checkbox => {
            Ok(AnswerSpec::Choice(non_empty(id, raw, "choice answer")?.to_string()))
        }
        QuestionType::Short => {
            let mut values = split_values(id, raw, question.options_count)?;
            if values.len() == 1 {
                Ok(AnswerSpec::Text(values.remove(0)))
            } else {
                Ok(AnswerSpec::Slots(label_slots(values, None)))
            }
        }
        QuestionType::Long => Ok(AnswerSpec::Manual),
        QuestionType::Mixed => parse_mixed(id, raw).map(AnswerSpec::Mixed),
    }
}

fn parse_mixed(id: QuestionId, raw: &str) -> Result<Vec<MixedPart>> {
    let raw_parts: Vec<RawPart> =
        serde_json::from_str(raw).map_err(|e| EngineError::InvalidAnswerSpec {
            question_id: id,
            message: format!("MIXED spec is not a JSON part list: {}", e),
        })?;

    let mut labels = HashSet::new();
    let mut parts = Vec::with_capacity(raw_parts.len());

    for (index, part) in raw_parts.into_iter().enumerate() {
        let label = part
            .label
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| (index + 1).to_string());

        if !labels.insert(label.clone()) {
            return Err(EngineError::InvalidAnswerSpec {
                question_id: id,
                message: format!("duplicate MIXED part label '{}'", label),
            });
        }

        let spec = match part.part_type {
            QuestionType::Mcq | QuestionType::Checkbox => {
                PartSpec::Choice(non_empty(id, &part.answer, "choice part")?.to_string())
            }
            QuestionType::Short => {
                let values = split_values(id, &part.answer, part.options_count)?;
                text_or_slots(values, Some(&label)).ok_or_else(|| {
                    EngineError::InvalidAnswerSpec {
                        question_id: id,
                        message: format!("SHORT part '{}' has no expected value", label),
                    }
                })?
            }
            QuestionType::Long => PartSpec::Manual,
            QuestionType::Mixed => {
                return Err(EngineError::InvalidAnswerSpec {
                    question_id: id,
                    message: format!("part '{}' cannot itself be MIXED", label),
                })
            }
        };

        parts.push(MixedPart { label, spec });
    }

    Ok(parts)
}

fn text_or_slots(mut values: Vec<String>, prefix: Option<&str>) -> Option<PartSpec> {
    match values.len() {
        0 => None,
        1 => values.pop().map(PartSpec::Text),
        _ => Some(PartSpec::Slots(label_slots(values, prefix))),
    }
}

fn label_slots(values: Vec<String>, prefix: Option<&str>) -> Vec<Slot> {
    values
        .into_iter()
        .enumerate()
        .map(|(index, expected)| Slot {
            label: match prefix {
                Some(prefix) => format!("{}.{}", prefix, slot_label(index)),
                None => slot_label(index),
            },
            expected,
        })
        .collect()
}

/// 依儲存格式切出預期值
pub fn split_values(id: QuestionId, raw: &str, options_count: Option<u32>) -> Result<Vec<String>> {
    let raw = non_empty(id, raw, "SHORT answer")?;

    let values: Vec<String> = if raw.contains(CANONICAL_DELIMITER) {
        raw.split(CANONICAL_DELIMITER)
            .map(|v| v.trim().to_string())
            .collect()
    } else {
        match options_count {
            Some(expected) if expected > 1 => {
                let legacy: Vec<String> = raw
                    .split(LEGACY_DELIMITER)
                    .map(|v| v.trim().to_string())
                    .collect();
                if legacy.len() != expected as usize {
                    return Err(EngineError::InvalidAnswerSpec {
                        question_id: id,
                        message: format!(
                            "options_count is {} but '{}' encodes {} values",
                            expected,
                            raw,
                            legacy.len()
                        ),
                    });
                }
                legacy
            }
            _ => vec![raw.to_string()],
        }
    };

    if values.len() > 1 && values.iter().any(|v| v.is_empty()) {
        return Err(EngineError::InvalidAnswerSpec {
            question_id: id,
            message: format!("'{}' contains an empty slot value", raw),
        });
    }

    Ok(values)
}

/// 若題目使用舊的逗號格式，回傳轉換後的標準 `|` 格式
pub fn migrate_short_spec(question: &Question) -> Result<Option<String>> {
    if question.question_type != QuestionType::Short
        || question.correct_answer_spec.contains(CANONICAL_DELIMITER)
    {
        return Ok(None);
    }

    let values = split_values(
        question.id,
        &question.correct_answer_spec,
        question.options_count,
    )?;
    if values.len() < 2 {
        return Ok(None);
    }

    Ok(Some(values.join(&CANONICAL_DELIMITER.to_string())))
}

/// 0 -> A, 25 -> Z, 26 -> AA
pub fn slot_label(index: usize) -> String {
    let mut n = index + 1;
    let mut label = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        label.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    label.reverse();
    String::from_utf8_lossy(&label).into_owned()
}

fn non_empty<'a>(id: QuestionId, raw: &'a str, what: &str) -> Result<&'a str> {
    if raw.trim().is_empty() {
        return Err(EngineError::InvalidAnswerSpec {
            question_id: id,
            message: format!("{} is empty", what),
        });
    }
    Ok(raw)
}
