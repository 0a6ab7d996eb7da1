use crate::config::EngineConfig;
use crate::core::catalog::{ExamCatalog, ExamEntry};
use crate::core::clock::{SessionClock, DEFAULT_GRACE_PERIOD_SECONDS};
use crate::core::grader::{AnswerGrader, GradingPhase, GradingPolicy};
use crate::core::placement::PlacementResolver;
use crate::domain::model::{
    Actor, AggregateScore, Answer, CompletionRequest, CompletionTrigger, DifficultyChange,
    Direction, ExamId, GradeStatus, Navigation, NewSession, Placement, Session, SessionId,
    StudentAttributes, SubmitOutcome, SubmitRequest, TierId,
};
use crate::domain::ports::{Clock, SessionStore};
use crate::utils::error::{EngineError, Result};
use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub grace_period: Duration,
    /// 取得 session 鎖的最長等待時間，逾時回傳 `SessionBusy`
    pub lock_timeout: std::time::Duration,
    pub allow_student_difficulty_change: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            grace_period: Duration::seconds(DEFAULT_GRACE_PERIOD_SECONDS),
            lock_timeout: std::time::Duration::from_millis(5000),
            allow_student_difficulty_change: true,
        }
    }
}

type LockTable = Arc<std::sync::Mutex<HashMap<SessionId, Arc<Mutex<()>>>>>;

/// 每個 session 一把鎖，不同 session 之間互不影響
///
/// 表格只保留正在使用或等待中的鎖，最後一個持有者釋放後就移除該項目。
#[derive(Debug, Default)]
struct SessionLocks {
    table: LockTable,
}

impl SessionLocks {
    async fn acquire(
        &self,
        session_id: SessionId,
        timeout: std::time::Duration,
    ) -> Result<SessionLockGuard> {
        let lock = {
            let mut table = lock_table(&self.table);
            Arc::clone(table.entry(session_id).or_default())
        };

        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(SessionLockGuard {
                guard: Some(guard),
                table: Arc::clone(&self.table),
                session_id,
            }),
            Err(_) => {
                tracing::warn!("Timed out waiting for lock on session {}", session_id);
                release_if_idle(&self.table, session_id);
                Err(EngineError::SessionBusy { session_id })
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        lock_table(&self.table).len()
    }
}

/// 持有中的 session 鎖，離開作用域時釋放並清理表格
struct SessionLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    table: LockTable,
    session_id: SessionId,
}

impl Drop for SessionLockGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        release_if_idle(&self.table, self.session_id);
    }
}

fn lock_table(
    table: &LockTable,
) -> std::sync::MutexGuard<'_, HashMap<SessionId, Arc<Mutex<()>>>> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 只剩表格本身持有時才移除，等待中的呼叫者會各自持有一份 Arc
fn release_if_idle(table: &LockTable, session_id: SessionId) {
    let mut table = lock_table(table);
    if table
        .get(&session_id)
        .is_some_and(|lock| Arc::strong_count(lock) == 1)
    {
        table.remove(&session_id);
    }
}

/// 唯一可以修改 Session 與 Answer 的元件
pub struct SessionCoordinator<S: SessionStore, C: Clock> {
    catalog: Arc<ExamCatalog>,
    resolver: PlacementResolver,
    grader: AnswerGrader,
    store: S,
    clock: C,
    settings: SessionSettings,
    locks: SessionLocks,
}

impl<S: SessionStore, C: Clock> SessionCoordinator<S, C> {
    pub fn new(
        catalog: Arc<ExamCatalog>,
        store: S,
        clock: C,
        settings: SessionSettings,
        policy: GradingPolicy,
    ) -> Self {
        Self {
            resolver: PlacementResolver::new(Arc::clone(&catalog)),
            catalog,
            grader: AnswerGrader::new(policy),
            store,
            clock,
            settings,
            locks: SessionLocks::default(),
        }
    }

    pub fn from_config(catalog: Arc<ExamCatalog>, store: S, clock: C, config: &EngineConfig) -> Self {
        Self::new(
            catalog,
            store,
            clock,
            config.session_settings(),
            config.grading_policy(),
        )
    }

    pub fn resolver(&self) -> &PlacementResolver {
        &self.resolver
    }

    /// 依學生資料分級並開始考試
    pub async fn start(&self, student: &StudentAttributes, actor: &Actor) -> Result<Session> {
        authorize_start(student, actor)?;
        let placement = self.resolver.place(student)?;
        self.open_session(student, placement).await
    }

    /// 指定考卷開始考試，考卷必須對應到該 tier
    pub async fn start_exam(
        &self,
        student: &StudentAttributes,
        exam_id: ExamId,
        tier_id: TierId,
        actor: &Actor,
    ) -> Result<Session> {
        authorize_start(student, actor)?;
        let exam = self.catalog.exam(exam_id)?;
        if !exam.definition.tier_ids.contains(&tier_id) {
            return Err(EngineError::PlacementNotFound {
                grade: student.grade,
                rank_band: student.rank_band.clone(),
                reason: format!("exam {} is not mapped to tier {}", exam_id, tier_id),
            });
        }
        self.open_session(student, Placement { tier_id, exam_id })
            .await
    }

    async fn open_session(
        &self,
        student: &StudentAttributes,
        placement: Placement,
    ) -> Result<Session> {
        let exam = self.catalog.exam(placement.exam_id)?;
        if !exam.definition.is_timed() {
            tracing::debug!("Exam {} is untimed", exam.id());
        }
        let session = self
            .store
            .create_session(NewSession {
                student_id: student.student_id.clone(),
                exam_id: placement.exam_id,
                timer_minutes: exam.definition.timer_minutes,
                started_at: self.clock.now(),
                tier_id: placement.tier_id,
            })
            .await?;

        tracing::info!(
            "🚀 Session {} started: student {} on exam {} (tier {}, {} min)",
            session.id,
            session.student_id,
            session.exam_id,
            session.original_tier,
            session.timer_minutes
        );
        Ok(session)
    }

    pub async fn submit(
        &self,
        session_id: SessionId,
        request: SubmitRequest,
        actor: &Actor,
    ) -> Result<Answer> {
        let _guard = self
            .locks
            .acquire(session_id, self.settings.lock_timeout)
            .await?;

        let mut session = self.load(session_id).await?;
        authorize_owner(&session, actor, "submit answers")?;

        let now = self.clock.now();
        let clock = SessionClock::for_session(&session, self.settings.grace_period);
        if !clock.can_accept_answers(now) {
            tracing::warn!(
                "❌ Rejected answer for question {} on closed session {}",
                request.question_id,
                session_id
            );
            return Err(EngineError::SubmissionRejected { session_id });
        }

        let exam = self.catalog.exam(session.exam_id)?;
        let question =
            exam.question(request.question_id)
                .ok_or(EngineError::QuestionNotInExam {
                    question_id: request.question_id,
                    exam_id: session.exam_id,
                })?;

        let completing = !session.is_completed() && clock.is_timer_expired(now);
        let phase = if session.is_completed() || completing {
            GradingPhase::Final
        } else {
            GradingPhase::Provisional
        };
        let grade = self.grader.grade(question, &request.answer, phase)?;

        // 先落實計時到期的完成狀態，再收下這筆最後的答案
        if completing {
            session.completed_at = Some(now);
            session.completion_trigger = Some(CompletionTrigger::TimerExpired);
            self.store.save_session(&session).await?;
            tracing::info!(
                "⏰ Session {} completed by timer while accepting a late answer",
                session_id
            );
        }

        let revision = self
            .store
            .find_answer(session_id, request.question_id)
            .await?
            .map_or(1, |previous| previous.revision + 1);

        let answer = Answer {
            session_id,
            question_id: request.question_id,
            payload: request.answer,
            is_correct: grade.is_correct,
            points_earned: grade.points_earned,
            status: grade.status,
            submitted_at: now,
            revision,
        };
        self.store.upsert_answer(answer.clone()).await?;

        tracing::debug!(
            "Session {} question {} rev {} graded {:?} ({} pts)",
            session_id,
            answer.question_id,
            revision,
            answer.is_correct,
            answer.points_earned
        );

        if session.is_completed() {
            session.score = Some(self.finalize(&session, exam).await?);
            self.store.save_session(&session).await?;
        }

        Ok(answer)
    }

    /// 給傳輸層使用：永遠回傳明確的成功或拒絕
    pub async fn submit_outcome(
        &self,
        session_id: SessionId,
        request: SubmitRequest,
        actor: &Actor,
    ) -> SubmitOutcome {
        let result = self.submit(session_id, request, actor).await;
        if let Err(e) = &result {
            tracing::debug!(
                "Submission to session {} failed ({:?}): {}",
                session_id,
                e.category(),
                e
            );
        }
        SubmitOutcome::from_result(&result)
    }

    pub async fn complete(
        &self,
        session_id: SessionId,
        request: CompletionRequest,
        actor: &Actor,
    ) -> Result<AggregateScore> {
        let _guard = self
            .locks
            .acquire(session_id, self.settings.lock_timeout)
            .await?;

        let mut session = self.load(session_id).await?;
        authorize_participant(&session, actor, "complete the session")?;

        let now = self.clock.now();
        let clock = SessionClock::for_session(&session, self.settings.grace_period);

        if request.unsaved_count > 0 {
            tracing::warn!(
                "Client reported {} unsaved answers when completing session {}",
                request.unsaved_count,
                session_id
            );
        }

        match session.completed_at {
            Some(completed_at) => {
                if !clock.is_in_grace_period(now) {
                    return Err(EngineError::SessionAlreadyCompleted {
                        session_id,
                        completed_at,
                    });
                }
                tracing::debug!(
                    "Session {} already completed at {}, repeating aggregate",
                    session_id,
                    completed_at
                );
            }
            None => {
                let expired = clock.is_timer_expired(now);
                if request.timer_expired && !expired {
                    tracing::warn!(
                        "Client reported timer expiry for session {} before server expiry {:?}",
                        session_id,
                        clock.expiry_time()
                    );
                }
                session.completed_at = Some(clock.completion_instant(now));
                session.completion_trigger = Some(if expired {
                    CompletionTrigger::TimerExpired
                } else {
                    CompletionTrigger::Manual
                });
            }
        }

        let exam = self.catalog.exam(session.exam_id)?;
        let score = self.finalize(&session, exam).await?;
        session.score = Some(score.clone());
        self.store.save_session(&session).await?;

        tracing::info!(
            "✅ Session {} completed ({:?}): {}/{} ({:.2}%)",
            session_id,
            session.completion_trigger,
            score.total_score,
            score.total_possible,
            score.percentage
        );
        Ok(score)
    }

    pub async fn request_difficulty_change(
        &self,
        session_id: SessionId,
        direction: Direction,
        actor: &Actor,
    ) -> Result<Navigation<Placement>> {
        let _guard = self
            .locks
            .acquire(session_id, self.settings.lock_timeout)
            .await?;

        let mut session = self.load(session_id).await?;
        match actor {
            Actor::Teacher(_) => {}
            Actor::Student(_) if !self.settings.allow_student_difficulty_change => {
                return Err(EngineError::Forbidden {
                    message: "students may not request a difficulty change".to_string(),
                });
            }
            Actor::Student(_) => authorize_owner(&session, actor, "change difficulty")?,
        }

        let navigation = self
            .resolver
            .adjust_difficulty(session.final_tier, direction)?;

        match navigation {
            Navigation::Moved(placement) => {
                session.difficulty_changes.push(DifficultyChange {
                    at: self.clock.now(),
                    direction,
                    from_tier: session.final_tier,
                    to_tier: placement.tier_id,
                    exam_id: placement.exam_id,
                    requested_by: actor.clone(),
                });
                session.final_tier = placement.tier_id;
                self.store.save_session(&session).await?;

                tracing::info!(
                    "🔀 Session {} moved {:?} to tier {} (exam {}) by {}",
                    session_id,
                    direction,
                    placement.tier_id,
                    placement.exam_id,
                    actor
                );
            }
            Navigation::Boundary => {
                tracing::info!(
                    "Session {} already at the {:?} boundary (tier {})",
                    session_id,
                    direction,
                    session.final_tier
                );
            }
        }

        Ok(navigation)
    }

    pub async fn session(&self, session_id: SessionId) -> Result<Session> {
        self.load(session_id).await
    }

    pub async fn answers(&self, session_id: SessionId) -> Result<Vec<Answer>> {
        self.load(session_id).await?;
        self.store.answers_for(session_id).await
    }

    /// 目前成績，不寫入任何資料
    pub async fn score(&self, session_id: SessionId) -> Result<AggregateScore> {
        let session = self.load(session_id).await?;
        let exam = self.catalog.exam(session.exam_id)?;
        let answers = self.store.answers_for(session_id).await?;
        Ok(aggregate_score(exam, &answers))
    }

    async fn load(&self, session_id: SessionId) -> Result<Session> {
        self.store
            .load_session(session_id)
            .await?
            .ok_or(EngineError::SessionNotFound(session_id))
    }

    /// 以 Final 階段重新評分尚未定案的答案，然後計算總分
    async fn finalize(&self, session: &Session, exam: &ExamEntry) -> Result<AggregateScore> {
        let mut answers = self.store.answers_for(session.id).await?;

        for answer in answers.iter_mut() {
            if answer.status != GradeStatus::Pending {
                continue;
            }
            let Some(question) = exam.question(answer.question_id) else {
                continue;
            };
            let grade = self
                .grader
                .grade(question, &answer.payload, GradingPhase::Final)?;
            answer.apply_grade(grade);
            self.store.upsert_answer(answer.clone()).await?;
        }

        Ok(aggregate_score(exam, &answers))
    }
}

/// total_possible 只計入可自動評分的題目；未作答的題目仍計入總分
pub fn aggregate_score(exam: &ExamEntry, answers: &[Answer]) -> AggregateScore {
    let mut total_score = 0;
    let mut answered = 0;
    let mut pending_manual = 0;

    for answer in answers {
        if exam.question(answer.question_id).is_none() {
            tracing::warn!(
                "Ignoring answer to question {} outside exam {}",
                answer.question_id,
                exam.id()
            );
            continue;
        }
        answered += 1;
        total_score += answer.points_earned;
        if answer.status == GradeStatus::ManualReview {
            pending_manual += 1;
        }
    }

    let total_possible = exam.total_possible();
    let percentage_defined = total_possible > 0;
    let percentage = if percentage_defined {
        (f64::from(total_score) * 10000.0 / f64::from(total_possible)).round() / 100.0
    } else {
        tracing::warn!("Exam {} has no auto-gradable questions", exam.id());
        0.0
    };

    AggregateScore {
        total_score,
        total_possible,
        percentage,
        percentage_defined,
        answered,
        pending_manual,
        question_count: exam.definition.total_question_count(),
    }
}

fn authorize_start(student: &StudentAttributes, actor: &Actor) -> Result<()> {
    match actor {
        Actor::Teacher(_) => Ok(()),
        Actor::Student(id) if *id == student.student_id => Ok(()),
        Actor::Student(id) => Err(EngineError::Forbidden {
            message: format!("student {} cannot start a session for {}", id, student.student_id),
        }),
    }
}

fn authorize_owner(session: &Session, actor: &Actor, action: &str) -> Result<()> {
    match actor {
        Actor::Student(id) if *id == session.student_id => Ok(()),
        _ => Err(EngineError::Forbidden {
            message: format!("{} cannot {} for session {}", actor, action, session.id),
        }),
    }
}

fn authorize_participant(session: &Session, actor: &Actor, action: &str) -> Result<()> {
    match actor {
        Actor::Teacher(_) => Ok(()),
        Actor::Student(_) => authorize_owner(session, actor, action),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemorySessionStore, ManualClock};
    use crate::domain::model::{
        AnswerPayload, CurriculumTier, ExamDefinition, PlacementRule, Question, QuestionType,
    };
    use chrono::{TimeZone, Utc};

    fn question(id: u64, question_type: QuestionType, spec: &str) -> Question {
        Question {
            id,
            exam_id: 1,
            question_type,
            correct_answer_spec: spec.to_string(),
            options_count: None,
            points: 1,
        }
    }

    fn catalog() -> Arc<ExamCatalog> {
        let tiers = vec![CurriculumTier {
            id: 1,
            name: "Only".to_string(),
            program_order: 1,
            subprogram_order: 1,
            level_number: 1,
            internal_difficulty: Some(1),
        }];
        let exams = vec![ExamDefinition {
            id: 1,
            title: "Quiz".to_string(),
            tier_ids: vec![1],
            timer_minutes: 10,
            questions: vec![
                question(1, QuestionType::Mcq, "A"),
                question(2, QuestionType::Short, "cat|dog"),
                question(3, QuestionType::Long, ""),
            ],
        }];
        let rules = vec![PlacementRule {
            grade: 4,
            rank_band: None,
            tier_id: 1,
        }];
        Arc::new(ExamCatalog::build(tiers, exams, rules).unwrap())
    }

    fn student() -> StudentAttributes {
        StudentAttributes {
            student_id: "amy".to_string(),
            grade: 4,
            rank_band: "TOP_50".to_string(),
        }
    }

    fn coordinator() -> (SessionCoordinator<InMemorySessionStore, ManualClock>, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).unwrap());
        let coordinator = SessionCoordinator::new(
            catalog(),
            InMemorySessionStore::new(),
            clock.clone(),
            SessionSettings::default(),
            GradingPolicy::default(),
        );
        (coordinator, clock)
    }

    fn submit(question_id: u64, answer: AnswerPayload) -> SubmitRequest {
        SubmitRequest {
            question_id,
            answer,
        }
    }

    #[tokio::test]
    async fn test_resubmission_overwrites_and_bumps_revision() {
        let (coordinator, _clock) = coordinator();
        let me = Actor::Student("amy".to_string());
        let session = coordinator.start(&student(), &me).await.unwrap();

        coordinator
            .submit(session.id, submit(1, "B".into()), &me)
            .await
            .unwrap();
        let second = coordinator
            .submit(session.id, submit(1, "A".into()), &me)
            .await
            .unwrap();

        assert_eq!(second.revision, 2);
        let answers = coordinator.answers(session.id).await.unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].is_correct, Some(true));
    }

    #[tokio::test]
    async fn test_pending_slots_become_false_on_completion() {
        let (coordinator, _clock) = coordinator();
        let me = Actor::Student("amy".to_string());
        let session = coordinator.start(&student(), &me).await.unwrap();

        let partial = coordinator
            .submit(session.id, submit(2, AnswerPayload::slots([("A", "cat")])), &me)
            .await
            .unwrap();
        assert_eq!(partial.status, GradeStatus::Pending);

        coordinator
            .complete(session.id, CompletionRequest::default(), &me)
            .await
            .unwrap();

        let answers = coordinator.answers(session.id).await.unwrap();
        assert_eq!(answers[0].is_correct, Some(false));
        assert_eq!(answers[0].status, GradeStatus::Graded);
    }

    #[tokio::test]
    async fn test_malformed_answer_writes_nothing() {
        let (coordinator, _clock) = coordinator();
        let me = Actor::Student("amy".to_string());
        let session = coordinator.start(&student(), &me).await.unwrap();

        let result = coordinator
            .submit(session.id, submit(2, "cat".into()), &me)
            .await;
        assert!(matches!(result, Err(EngineError::MalformedAnswer { .. })));
        assert!(coordinator.answers(session.id).await.unwrap().is_empty());

        let outcome = coordinator
            .submit_outcome(session.id, submit(99, "A".into()), &me)
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.reason.as_deref(), Some("validation_error"));
    }

    #[tokio::test]
    async fn test_only_the_owner_may_submit() {
        let (coordinator, _clock) = coordinator();
        let me = Actor::Student("amy".to_string());
        let session = coordinator.start(&student(), &me).await.unwrap();

        for actor in [
            Actor::Student("bob".to_string()),
            Actor::Teacher("t-1".to_string()),
        ] {
            let result = coordinator
                .submit(session.id, submit(1, "A".into()), &actor)
                .await;
            assert!(matches!(result, Err(EngineError::Forbidden { .. })));
        }
    }

    #[tokio::test]
    async fn test_students_can_be_barred_from_difficulty_changes() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).unwrap());
        let coordinator = SessionCoordinator::new(
            catalog(),
            InMemorySessionStore::new(),
            clock,
            SessionSettings {
                allow_student_difficulty_change: false,
                ..SessionSettings::default()
            },
            GradingPolicy::default(),
        );
        let me = Actor::Student("amy".to_string());
        let session = coordinator.start(&student(), &me).await.unwrap();

        let denied = coordinator
            .request_difficulty_change(session.id, Direction::Harder, &me)
            .await;
        assert!(matches!(denied, Err(EngineError::Forbidden { .. })));

        let teacher = Actor::Teacher("t-1".to_string());
        let boundary = coordinator
            .request_difficulty_change(session.id, Direction::Harder, &teacher)
            .await
            .unwrap();
        assert!(boundary.is_boundary());
    }

    #[tokio::test]
    async fn test_score_of_unknown_session() {
        let (coordinator, _clock) = coordinator();
        assert!(matches!(
            coordinator.score(42).await,
            Err(EngineError::SessionNotFound(42))
        ));
    }

    #[tokio::test]
    async fn test_lock_table_empties_once_sessions_are_done() {
        let (coordinator, _clock) = coordinator();
        let me = Actor::Student("amy".to_string());

        for _ in 0..50 {
            let session = coordinator.start(&student(), &me).await.unwrap();
            coordinator
                .submit(session.id, submit(1, "A".into()), &me)
                .await
                .unwrap();
            coordinator
                .complete(session.id, CompletionRequest::default(), &me)
                .await
                .unwrap();
        }
        let rejected = coordinator.submit(999, submit(1, "A".into()), &me).await;
        assert!(matches!(rejected, Err(EngineError::SessionNotFound(999))));

        assert_eq!(coordinator.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_busy_waiter_leaves_no_lock_behind() {
        let locks = SessionLocks::default();
        let held = locks
            .acquire(7, std::time::Duration::from_secs(5))
            .await
            .unwrap();

        let busy = locks.acquire(7, std::time::Duration::from_millis(10)).await;
        assert!(matches!(busy, Err(EngineError::SessionBusy { session_id: 7 })));
        assert_eq!(locks.len(), 1);

        drop(held);
        assert_eq!(locks.len(), 0);
    }
}
