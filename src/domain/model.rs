use crate::utils::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type TierId = u64;
pub type ExamId = u64;
pub type QuestionId = u64;
pub type SessionId = u64;

/// 課程難度階梯中的一階
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurriculumTier {
    pub id: TierId,
    #[serde(default)]
    pub name: String,
    pub program_order: i32,
    pub subprogram_order: i32,
    pub level_number: i32,
    #[serde(default)]
    pub internal_difficulty: Option<i32>,
}

impl CurriculumTier {
    /// (program, subprogram, level) 標準排序鍵
    pub fn canonical_key(&self) -> (i32, i32, i32) {
        (self.program_order, self.subprogram_order, self.level_number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    Mcq,
    Checkbox,
    Short,
    Long,
    Mixed,
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QuestionType::Mcq => "MCQ",
            QuestionType::Checkbox => "CHECKBOX",
            QuestionType::Short => "SHORT",
            QuestionType::Long => "LONG",
            QuestionType::Mixed => "MIXED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub exam_id: ExamId,
    pub question_type: QuestionType,
    #[serde(default)]
    pub correct_answer_spec: String,
    #[serde(default)]
    pub options_count: Option<u32>,
    pub points: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamDefinition {
    pub id: ExamId,
    #[serde(default)]
    pub title: String,
    pub tier_ids: Vec<TierId>,
    /// 0 表示不計時
    #[serde(default)]
    pub timer_minutes: u32,
    #[serde(default)]
    pub questions: Vec<Question>,
}

impl ExamDefinition {
    pub fn total_question_count(&self) -> usize {
        self.questions.len()
    }

    pub fn is_timed(&self) -> bool {
        self.timer_minutes > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentAttributes {
    pub student_id: String,
    pub grade: u8,
    pub rank_band: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRule {
    pub grade: u8,
    /// `None` 代表該年級的任何排名區間
    #[serde(default)]
    pub rank_band: Option<String>,
    pub tier_id: TierId,
}

impl PlacementRule {
    pub fn normalized_band(&self) -> Option<String> {
        self.rank_band.as_deref().map(normalize_band)
    }
}

/// 排名區間不分大小寫、忽略前後空白
pub fn normalize_band(band: &str) -> String {
    band.trim().to_ascii_uppercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub tier_id: TierId,
    pub exam_id: ExamId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Harder,
    Easier,
}

impl Direction {
    pub fn step(&self) -> i8 {
        match self {
            Direction::Harder => 1,
            Direction::Easier => -1,
        }
    }
}

/// 導航結果：到達邊界不是錯誤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "placement", rename_all = "snake_case")]
pub enum Navigation<T> {
    Moved(T),
    Boundary,
}

impl<T> Navigation<T> {
    pub fn is_boundary(&self) -> bool {
        matches!(self, Navigation::Boundary)
    }

    pub fn moved(self) -> Option<T> {
        match self {
            Navigation::Moved(value) => Some(value),
            Navigation::Boundary => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Navigation<U> {
        match self {
            Navigation::Moved(value) => Navigation::Moved(f(value)),
            Navigation::Boundary => Navigation::Boundary,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum Actor {
    Student(String),
    Teacher(String),
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Student(id) => write!(f, "student:{}", id),
            Actor::Teacher(id) => write!(f, "teacher:{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionTrigger {
    Manual,
    TimerExpired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifficultyChange {
    pub at: DateTime<Utc>,
    pub direction: Direction,
    pub from_tier: TierId,
    pub to_tier: TierId,
    pub exam_id: ExamId,
    pub requested_by: Actor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateScore {
    pub total_score: u32,
    pub total_possible: u32,
    pub percentage: f64,
    /// 沒有可自動評分的題目時為 false，percentage 固定為 0
    pub percentage_defined: bool,
    pub answered: usize,
    pub pending_manual: usize,
    pub question_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub student_id: String,
    pub exam_id: ExamId,
    pub timer_minutes: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completion_trigger: Option<CompletionTrigger>,
    pub original_tier: TierId,
    pub final_tier: TierId,
    #[serde(default)]
    pub difficulty_changes: Vec<DifficultyChange>,
    #[serde(default)]
    pub score: Option<AggregateScore>,
}

impl Session {
    /// original_tier 與 final_tier 都從分級結果開始
    pub fn open(id: SessionId, draft: NewSession) -> Self {
        Self {
            id,
            student_id: draft.student_id,
            exam_id: draft.exam_id,
            timer_minutes: draft.timer_minutes,
            started_at: draft.started_at,
            completed_at: None,
            completion_trigger: None,
            original_tier: draft.tier_id,
            final_tier: draft.tier_id,
            difficulty_changes: Vec::new(),
            score: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// 建立新 session 時的資料，id 由 store 指派
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub student_id: String,
    pub exam_id: ExamId,
    pub timer_minutes: u32,
    pub started_at: DateTime<Utc>,
    pub tier_id: TierId,
}

/// 學生送出的答案：純字串或「欄位標籤 → 字串」
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerPayload {
    Text(String),
    Slots(BTreeMap<String, String>),
}

impl AnswerPayload {
    pub fn slots<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        AnswerPayload::Slots(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<&str> for AnswerPayload {
    fn from(value: &str) -> Self {
        AnswerPayload::Text(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeStatus {
    Graded,
    ManualReview,
    /// 尚有欄位未作答且 session 仍在進行
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grade {
    pub is_correct: Option<bool>,
    pub points_earned: u32,
    pub status: GradeStatus,
}

impl Grade {
    pub fn scored(correct: bool, points: u32) -> Self {
        Self {
            is_correct: Some(correct),
            points_earned: if correct { points } else { 0 },
            status: GradeStatus::Graded,
        }
    }

    pub fn manual() -> Self {
        Self {
            is_correct: None,
            points_earned: 0,
            status: GradeStatus::ManualReview,
        }
    }

    pub fn pending() -> Self {
        Self {
            is_correct: None,
            points_earned: 0,
            status: GradeStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub session_id: SessionId,
    pub question_id: QuestionId,
    pub payload: AnswerPayload,
    pub is_correct: Option<bool>,
    pub points_earned: u32,
    pub status: GradeStatus,
    pub submitted_at: DateTime<Utc>,
    pub revision: u32,
}

impl Answer {
    pub fn apply_grade(&mut self, grade: Grade) {
        self.is_correct = grade.is_correct;
        self.points_earned = grade.points_earned;
        self.status = grade.status;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub question_id: QuestionId,
    pub answer: AnswerPayload,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// 客戶端提示，伺服器會自行確認
    #[serde(default)]
    pub timer_expired: bool,
    /// 僅供診斷
    #[serde(default)]
    pub unsaved_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// 例如鎖逾時，呼叫端可以重送
    #[serde(default)]
    pub retryable: bool,
}

impl SubmitOutcome {
    pub fn from_result<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self {
                success: true,
                reason: None,
                retryable: false,
            },
            Err(error) => Self {
                success: false,
                reason: Some(error.rejection_code().to_string()),
                retryable: error.is_retryable(),
            },
        }
    }
}
