//! 單一 session 的計時狀態機：Active → GracePeriod → Closed
//!
//! 狀態不儲存，每次由 `started_at`、`timer_minutes`、`completed_at` 與伺服器時間算出。

use crate::domain::model::Session;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_GRACE_PERIOD_SECONDS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockState {
    Active,
    GracePeriod,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionClock {
    started_at: DateTime<Utc>,
    timer_minutes: u32,
    completed_at: Option<DateTime<Utc>>,
    grace: Duration,
}

impl SessionClock {
    pub fn new(
        started_at: DateTime<Utc>,
        timer_minutes: u32,
        completed_at: Option<DateTime<Utc>>,
        grace: Duration,
    ) -> Self {
        Self {
            started_at,
            timer_minutes,
            completed_at,
            grace,
        }
    }

    pub fn for_session(session: &Session, grace: Duration) -> Self {
        Self::new(
            session.started_at,
            session.timer_minutes,
            session.completed_at,
            grace,
        )
    }

    /// 不計時的考試沒有到期時間
    pub fn expiry_time(&self) -> Option<DateTime<Utc>> {
        (self.timer_minutes > 0)
            .then(|| self.started_at + Duration::minutes(i64::from(self.timer_minutes)))
    }

    pub fn is_timer_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_time().is_some_and(|expiry| now >= expiry)
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// 寬限期的起點：已完成時為完成時間，否則為到期時間
    ///
    /// 提前交卷的 session 不會因為計時還沒到而繼續開放。計時到期後才完成的 session，
    /// `completed_at` 一定落在到期寬限期內（見 `completion_instant`），因此不會晚於應有的截止點。
    pub fn grace_anchor(&self) -> Option<DateTime<Utc>> {
        self.completed_at.or_else(|| self.expiry_time())
    }

    pub fn grace_deadline(&self) -> Option<DateTime<Utc>> {
        self.grace_anchor().map(|anchor| anchor + self.grace)
    }

    pub fn is_in_grace_period(&self, now: DateTime<Utc>) -> bool {
        if !self.is_timer_expired(now) && !self.is_completed() {
            return false;
        }
        self.grace_deadline().is_some_and(|deadline| now <= deadline)
    }

    pub fn can_accept_answers(&self, now: DateTime<Utc>) -> bool {
        self.state(now) != ClockState::Closed
    }

    pub fn state(&self, now: DateTime<Utc>) -> ClockState {
        if !self.is_completed() && !self.is_timer_expired(now) {
            ClockState::Active
        } else if self.is_in_grace_period(now) {
            ClockState::GracePeriod
        } else {
            ClockState::Closed
        }
    }

    /// 第一次完成時要寫入的 completed_at
    ///
    /// 計時已過且寬限期也已結束時，回傳到期時間本身，避免完成動作重新打開寬限期。
    pub fn completion_instant(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.expiry_time() {
            Some(expiry) if now > expiry + self.grace => expiry,
            _ => now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn timed(completed_at: Option<DateTime<Utc>>) -> SessionClock {
        SessionClock::new(start(), 30, completed_at, Duration::seconds(60))
    }

    #[test]
    fn test_active_before_expiry() {
        let clock = timed(None);
        let expiry = clock.expiry_time().unwrap();

        let now = expiry - Duration::seconds(1);
        assert_eq!(clock.state(now), ClockState::Active);
        assert!(clock.can_accept_answers(now));
        assert!(!clock.is_timer_expired(now));
    }

    #[test]
    fn test_grace_after_expiry_then_closed() {
        let clock = timed(None);
        let expiry = clock.expiry_time().unwrap();

        assert!(clock.is_timer_expired(expiry));
        assert_eq!(clock.state(expiry + Duration::seconds(30)), ClockState::GracePeriod);
        assert_eq!(clock.state(expiry + Duration::seconds(60)), ClockState::GracePeriod);
        assert_eq!(clock.state(expiry + Duration::seconds(61)), ClockState::Closed);
        assert!(!clock.can_accept_answers(expiry + Duration::seconds(120)));
    }

    #[test]
    fn test_grace_anchors_on_later_completion() {
        let expiry = start() + Duration::minutes(30);
        let clock = timed(Some(expiry + Duration::seconds(30)));

        assert!(clock.can_accept_answers(expiry + Duration::seconds(80)));
        assert!(!clock.can_accept_answers(expiry + Duration::seconds(120)));
    }

    #[test]
    fn test_early_manual_completion_closes_after_its_own_grace() {
        let done = start() + Duration::minutes(10);
        let clock = timed(Some(done));

        assert_eq!(clock.grace_deadline(), Some(done + Duration::seconds(60)));
        assert_eq!(clock.state(done + Duration::seconds(10)), ClockState::GracePeriod);
        assert_eq!(clock.state(done + Duration::seconds(61)), ClockState::Closed);
        // 計時尚未到期也不會重新開放
        assert!(!clock.can_accept_answers(start() + Duration::minutes(25)));
        assert!(!clock.is_in_grace_period(start() + Duration::minutes(30)));
    }

    #[test]
    fn test_untimed_session_stays_active_until_completed() {
        let clock = SessionClock::new(start(), 0, None, Duration::seconds(60));
        let much_later = start() + Duration::days(3);

        assert_eq!(clock.expiry_time(), None);
        assert!(!clock.is_timer_expired(much_later));
        assert_eq!(clock.state(much_later), ClockState::Active);

        let done = SessionClock::new(start(), 0, Some(much_later), Duration::seconds(60));
        assert!(done.is_in_grace_period(much_later + Duration::seconds(59)));
        assert_eq!(done.state(much_later + Duration::seconds(61)), ClockState::Closed);
    }

    #[test]
    fn test_completion_instant_never_reopens_writes() {
        let clock = timed(None);
        let expiry = clock.expiry_time().unwrap();

        let in_grace = expiry + Duration::seconds(20);
        assert_eq!(clock.completion_instant(in_grace), in_grace);

        let long_after = expiry + Duration::minutes(10);
        assert_eq!(clock.completion_instant(long_after), expiry);
    }
}
