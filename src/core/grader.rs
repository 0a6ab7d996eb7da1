use crate::core::answer_spec::{AnswerSpec, ParsedQuestion, PartSpec, Slot};
use crate::domain::model::{AnswerPayload, Grade, Question, QuestionId};
use crate::utils::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// SHORT 題文字比對規則；選擇題永遠是完全比對
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradingPolicy {
    pub case_sensitive: bool,
    pub trim_whitespace: bool,
}

impl Default for GradingPolicy {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            trim_whitespace: true,
        }
    }
}

/// Provisional：session 仍在作答中，未填的欄位先不評分
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradingPhase {
    Provisional,
    Final,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Correct,
    Incorrect,
    Pending,
    Manual,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AnswerGrader {
    policy: GradingPolicy,
}

impl AnswerGrader {
    pub fn new(policy: GradingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> GradingPolicy {
        self.policy
    }

    /// 直接對未解析的題目評分
    pub fn grade_question(
        &self,
        question: &Question,
        payload: &AnswerPayload,
        phase: GradingPhase,
    ) -> Result<Grade> {
        let parsed = ParsedQuestion::parse(question)?;
        self.grade(&parsed, payload, phase)
    }

    pub fn grade(
        &self,
        question: &ParsedQuestion,
        payload: &AnswerPayload,
        phase: GradingPhase,
    ) -> Result<Grade> {
        let id = question.id();
        let outcome = match &question.spec {
            AnswerSpec::Choice(expected) => {
                let given = expect_text(id, payload)?;
                bool_outcome(given == expected.as_str())
            }
            AnswerSpec::Text(expected) => {
                let given = expect_text(id, payload)?;
                bool_outcome(self.text_matches(given, expected))
            }
            AnswerSpec::Slots(slots) => {
                let given = expect_slots(id, payload)?;
                ensure_known_labels(id, given, slots.iter().map(|s| s.label.as_str()))?;
                self.grade_slots(slots, given, phase)
            }
            AnswerSpec::Manual => {
                expect_text(id, payload)?;
                Outcome::Manual
            }
            AnswerSpec::Mixed(parts) => {
                let given = expect_slots(id, payload)?;
                let labels = parts.iter().flat_map(|part| match &part.spec {
                    PartSpec::Slots(slots) => slots.iter().map(|s| s.label.as_str()).collect::<Vec<_>>(),
                    _ => vec![part.label.as_str()],
                });
                ensure_known_labels(id, given, labels)?;

                let outcomes: Vec<Outcome> = parts
                    .iter()
                    .filter(|part| !part.spec.is_manual())
                    .map(|part| self.grade_part(&part.label, &part.spec, given, phase))
                    .collect();

                combine(&outcomes)
            }
        };

        Ok(match outcome {
            Outcome::Correct => Grade::scored(true, question.points()),
            Outcome::Incorrect => Grade::scored(false, question.points()),
            Outcome::Pending => Grade::pending(),
            Outcome::Manual => Grade::manual(),
        })
    }

    fn grade_part(
        &self,
        label: &str,
        spec: &PartSpec,
        given: &BTreeMap<String, String>,
        phase: GradingPhase,
    ) -> Outcome {
        match spec {
            PartSpec::Choice(expected) => match answered(given, label) {
                Some(value) => bool_outcome(value == expected.as_str()),
                None => missing(phase),
            },
            PartSpec::Text(expected) => match answered(given, label) {
                Some(value) => bool_outcome(self.text_matches(value, expected)),
                None => missing(phase),
            },
            PartSpec::Slots(slots) => self.grade_slots(slots, given, phase),
            PartSpec::Manual => Outcome::Manual,
        }
    }

    fn grade_slots(
        &self,
        slots: &[Slot],
        given: &BTreeMap<String, String>,
        phase: GradingPhase,
    ) -> Outcome {
        let outcomes: Vec<Outcome> = slots
            .iter()
            .map(|slot| match answered(given, &slot.label) {
                Some(value) => bool_outcome(self.text_matches(value, &slot.expected)),
                None => missing(phase),
            })
            .collect();
        combine(&outcomes)
    }

    fn text_matches(&self, given: &str, expected: &str) -> bool {
        let (given, expected) = if self.policy.trim_whitespace {
            (given.trim(), expected.trim())
        } else {
            (given, expected)
        };

        if self.policy.case_sensitive {
            given == expected
        } else {
            given.to_lowercase() == expected.to_lowercase()
        }
    }
}

fn bool_outcome(correct: bool) -> Outcome {
    if correct {
        Outcome::Correct
    } else {
        Outcome::Incorrect
    }
}

fn missing(phase: GradingPhase) -> Outcome {
    match phase {
        GradingPhase::Provisional => Outcome::Pending,
        GradingPhase::Final => Outcome::Incorrect,
    }
}

/// 全對才算對；有錯優先於未作答；沒有可評分項目時交由人工
fn combine(outcomes: &[Outcome]) -> Outcome {
    let gradable: Vec<Outcome> = outcomes
        .iter()
        .copied()
        .filter(|o| *o != Outcome::Manual)
        .collect();

    if gradable.is_empty() {
        Outcome::Manual
    } else if gradable.contains(&Outcome::Incorrect) {
        Outcome::Incorrect
    } else if gradable.contains(&Outcome::Pending) {
        Outcome::Pending
    } else {
        Outcome::Correct
    }
}

fn answered<'a>(given: &'a BTreeMap<String, String>, label: &str) -> Option<&'a str> {
    given
        .get(label)
        .map(String::as_str)
        .filter(|value| !value.trim().is_empty())
}

fn expect_text(id: QuestionId, payload: &AnswerPayload) -> Result<&str> {
    match payload {
        AnswerPayload::Text(value) => Ok(value),
        AnswerPayload::Slots(_) => Err(EngineError::MalformedAnswer {
            question_id: id,
            message: "expected a plain string answer, got a slot map".to_string(),
        }),
    }
}

fn expect_slots(id: QuestionId, payload: &AnswerPayload) -> Result<&BTreeMap<String, String>> {
    match payload {
        AnswerPayload::Slots(slots) => Ok(slots),
        AnswerPayload::Text(_) => Err(EngineError::MalformedAnswer {
            question_id: id,
            message: "expected a slot map answer, got a plain string".to_string(),
        }),
    }
}

fn ensure_known_labels<'a>(
    id: QuestionId,
    given: &BTreeMap<String, String>,
    labels: impl IntoIterator<Item = &'a str>,
) -> Result<()> {
    let known: HashSet<&str> = labels.into_iter().collect();
    if let Some(unknown) = given.keys().find(|key| !known.contains(key.as_str())) {
        return Err(EngineError::MalformedAnswer {
            question_id: id,
            message: format!("unknown slot label '{}'", unknown),
        });
    }
    Ok(())
}
