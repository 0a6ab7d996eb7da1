use crate::domain::model::{Answer, NewSession, QuestionId, Session, SessionId};
use crate::domain::ports::SessionStore;
use crate::utils::error::{EngineError, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct StoreState {
    last_id: SessionId,
    sessions: HashMap<SessionId, Session>,
    answers: BTreeMap<(SessionId, QuestionId), Answer>,
}

/// 行程內的 SessionStore，clone 後共用同一份資料
#[derive(Debug, Clone, Default)]
pub struct InMemorySessionStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }
}

impl SessionStore for InMemorySessionStore {
    async fn create_session(&self, draft: NewSession) -> Result<Session> {
        let mut state = self.state.lock().await;
        state.last_id += 1;
        let session = Session::open(state.last_id, draft);
        state.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn load_session(&self, id: SessionId) -> Result<Option<Session>> {
        let state = self.state.lock().await;
        Ok(state.sessions.get(&id).cloned())
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.sessions.get_mut(&session.id) {
            Some(stored) => {
                *stored = session.clone();
                Ok(())
            }
            None => Err(EngineError::Storage {
                message: format!("cannot save unknown session {}", session.id),
            }),
        }
    }

    async fn upsert_answer(&self, answer: Answer) -> Result<Option<Answer>> {
        let mut state = self.state.lock().await;
        if !state.sessions.contains_key(&answer.session_id) {
            return Err(EngineError::Storage {
                message: format!("answer for unknown session {}", answer.session_id),
            });
        }
        Ok(state
            .answers
            .insert((answer.session_id, answer.question_id), answer))
    }

    async fn find_answer(
        &self,
        session_id: SessionId,
        question_id: QuestionId,
    ) -> Result<Option<Answer>> {
        let state = self.state.lock().await;
        Ok(state.answers.get(&(session_id, question_id)).cloned())
    }

    async fn answers_for(&self, id: SessionId) -> Result<Vec<Answer>> {
        let state = self.state.lock().await;
        Ok(state
            .answers
            .range((id, QuestionId::MIN)..=(id, QuestionId::MAX))
            .map(|(_, answer)| answer.clone())
            .collect())
    }
}
