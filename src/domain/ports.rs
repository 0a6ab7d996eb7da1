use crate::domain::model::{
    Answer, CurriculumTier, ExamDefinition, NewSession, PlacementRule, QuestionId, Session,
    SessionId,
};
use crate::utils::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// 課程、考卷與分級規則的唯讀來源
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn tiers(&self) -> Result<Vec<CurriculumTier>>;
    async fn exams(&self) -> Result<Vec<ExamDefinition>>;
    async fn placement_rules(&self) -> Result<Vec<PlacementRule>>;
}

pub trait SessionStore: Send + Sync {
    fn create_session(
        &self,
        draft: NewSession,
    ) -> impl std::future::Future<Output = Result<Session>> + Send;
    fn load_session(
        &self,
        id: SessionId,
    ) -> impl std::future::Future<Output = Result<Option<Session>>> + Send;
    fn save_session(&self, session: &Session)
        -> impl std::future::Future<Output = Result<()>> + Send;
    /// 每個 (session, question) 只保留一筆，回傳被覆蓋的舊答案
    fn upsert_answer(
        &self,
        answer: Answer,
    ) -> impl std::future::Future<Output = Result<Option<Answer>>> + Send;
    fn find_answer(
        &self,
        session_id: SessionId,
        question_id: QuestionId,
    ) -> impl std::future::Future<Output = Result<Option<Answer>>> + Send;
    fn answers_for(
        &self,
        id: SessionId,
    ) -> impl std::future::Future<Output = Result<Vec<Answer>>> + Send;
}

/// 伺服器時間來源
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
