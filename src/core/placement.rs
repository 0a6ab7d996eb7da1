use crate::core::catalog::ExamCatalog;
use crate::domain::model::{
    normalize_band, Direction, ExamId, Navigation, Placement, PlacementRule, StudentAttributes,
    TierId,
};
use crate::utils::error::{EngineError, Result};
use std::sync::Arc;

/// 初次分級與難度調整，純查詢，不寫入任何狀態
#[derive(Debug, Clone)]
pub struct PlacementResolver {
    catalog: Arc<ExamCatalog>,
}

impl PlacementResolver {
    pub fn new(catalog: Arc<ExamCatalog>) -> Self {
        Self { catalog }
    }

    pub fn place(&self, student: &StudentAttributes) -> Result<Placement> {
        let not_found = |reason: String| EngineError::PlacementNotFound {
            grade: student.grade,
            rank_band: student.rank_band.clone(),
            reason,
        };

        let rule = self
            .match_rule(student)
            .ok_or_else(|| not_found("no placement rule matches".to_string()))?;

        let exam_id = self.first_exam(rule.tier_id).ok_or_else(|| {
            not_found(format!("tier {} has no mapped exam", rule.tier_id))
        })?;

        tracing::debug!(
            "Placed student {} (grade {}, {}) at tier {} / exam {}",
            student.student_id,
            student.grade,
            student.rank_band,
            rule.tier_id,
            exam_id
        );

        Ok(Placement {
            tier_id: rule.tier_id,
            exam_id,
        })
    }

    /// 完全相符的 (grade, band) 優先，其次才是該年級不限 band 的規則
    fn match_rule(&self, student: &StudentAttributes) -> Option<&PlacementRule> {
        let band = normalize_band(&student.rank_band);
        let rules = self.catalog.placement_rules();

        rules
            .iter()
            .find(|rule| {
                rule.grade == student.grade && rule.normalized_band().as_ref() == Some(&band)
            })
            .or_else(|| {
                rules
                    .iter()
                    .find(|rule| rule.grade == student.grade && rule.rank_band.is_none())
            })
    }

    pub fn adjust_difficulty(
        &self,
        current_tier: TierId,
        direction: Direction,
    ) -> Result<Navigation<Placement>> {
        let graph = self.catalog.graph();
        if graph.tier(current_tier).is_none() {
            return Err(EngineError::TierNotFound(current_tier));
        }

        let Some(next) = graph.step(current_tier, direction).moved() else {
            tracing::debug!("Tier {} is at the {:?} boundary", current_tier, direction);
            return Ok(Navigation::Boundary);
        };

        // 圖只索引有考卷的 tier，這裡仍再確認一次
        Ok(match self.first_exam(next.id) {
            Some(exam_id) => Navigation::Moved(Placement {
                tier_id: next.id,
                exam_id,
            }),
            None => Navigation::Boundary,
        })
    }

    fn first_exam(&self, tier_id: TierId) -> Option<ExamId> {
        self.catalog.graph().exams_for(tier_id).first().copied()
    }
}
