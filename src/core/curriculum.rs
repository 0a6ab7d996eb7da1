//! 課程難度階梯的記憶體索引
//!
//! - `ladder`：依標準鍵 (program, subprogram, level, id) 排序的所有 tier
//! - `by_difficulty`：只收錄「有 internal_difficulty 且至少對應一份考卷」的 tier，
//!   以 (difficulty, 標準鍵, id) 排序，查詢為 O(log n)
//!
//! 兩種排序若不一致，不做調和，只透過 [`CurriculumGraph::ordering_conflicts`] 回報。

use crate::domain::model::{CurriculumTier, Direction, ExamDefinition, ExamId, Navigation, TierId};
use crate::utils::error::{EngineError, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

type CanonicalKey = (i32, i32, i32, TierId);
type DifficultyKey = (i32, CanonicalKey);

#[derive(Debug, Clone, Default)]
pub struct CurriculumGraph {
    ladder: Vec<CurriculumTier>,
    position: HashMap<TierId, usize>,
    exams_by_tier: HashMap<TierId, Vec<ExamId>>,
    by_difficulty: BTreeMap<DifficultyKey, usize>,
}

fn canonical(tier: &CurriculumTier) -> CanonicalKey {
    let (program, subprogram, level) = tier.canonical_key();
    (program, subprogram, level, tier.id)
}

impl CurriculumGraph {
    pub fn build(tiers: Vec<CurriculumTier>, exams: &[ExamDefinition]) -> Result<Self> {
        let mut ladder = tiers;
        ladder.sort_by_key(canonical);

        let mut position = HashMap::with_capacity(ladder.len());
        for (index, tier) in ladder.iter().enumerate() {
            if position.insert(tier.id, index).is_some() {
                return Err(EngineError::InvalidCatalog {
                    message: format!("duplicate tier id {}", tier.id),
                });
            }
        }

        let mut exams_by_tier: HashMap<TierId, Vec<ExamId>> = HashMap::new();
        for exam in exams {
            for tier_id in &exam.tier_ids {
                if !position.contains_key(tier_id) {
                    return Err(EngineError::InvalidCatalog {
                        message: format!("exam {} maps to unknown tier {}", exam.id, tier_id),
                    });
                }
                exams_by_tier.entry(*tier_id).or_default().push(exam.id);
            }
        }
        for exam_ids in exams_by_tier.values_mut() {
            exam_ids.sort_unstable();
            exam_ids.dedup();
        }

        let mut by_difficulty = BTreeMap::new();
        for (index, tier) in ladder.iter().enumerate() {
            if let Some(difficulty) = tier.internal_difficulty {
                if exams_by_tier.contains_key(&tier.id) {
                    by_difficulty.insert((difficulty, canonical(tier)), index);
                }
            }
        }

        Ok(Self {
            ladder,
            position,
            exams_by_tier,
            by_difficulty,
        })
    }

    pub fn len(&self) -> usize {
        self.ladder.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ladder.is_empty()
    }

    pub fn tier(&self, id: TierId) -> Option<&CurriculumTier> {
        self.position.get(&id).map(|&index| &self.ladder[index])
    }

    /// 依標準順序列出所有 tier
    pub fn canonical_ladder(&self) -> &[CurriculumTier] {
        &self.ladder
    }

    pub fn exams_for(&self, tier_id: TierId) -> &[ExamId] {
        self.exams_by_tier
            .get(&tier_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_examinable(&self, tier_id: TierId) -> bool {
        !self.exams_for(tier_id).is_empty()
    }

    pub fn distinct_difficulties(&self) -> usize {
        self.by_difficulty
            .keys()
            .map(|(difficulty, _)| *difficulty)
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn step(&self, tier_id: TierId, direction: Direction) -> Navigation<&CurriculumTier> {
        match direction {
            Direction::Harder => self.next_harder(tier_id),
            Direction::Easier => self.next_easier(tier_id),
        }
    }

    /// 難度嚴格較高者中最小的一個；同難度取標準鍵最小者
    pub fn next_harder(&self, tier_id: TierId) -> Navigation<&CurriculumTier> {
        let Some(tier) = self.tier(tier_id) else {
            return Navigation::Boundary;
        };

        let found = match tier.internal_difficulty {
            Some(difficulty) => self
                .by_difficulty
                .range((
                    Bound::Excluded((difficulty, (i32::MAX, i32::MAX, i32::MAX, TierId::MAX))),
                    Bound::Unbounded,
                ))
                .next()
                .map(|(_, &index)| index),
            None => self.canonical_neighbor(tier_id, Direction::Harder),
        };

        found.map_or(Navigation::Boundary, |index| {
            Navigation::Moved(&self.ladder[index])
        })
    }

    /// 難度嚴格較低者中最大的一個；同難度取標準鍵最大者（階梯上最接近的一階）
    pub fn next_easier(&self, tier_id: TierId) -> Navigation<&CurriculumTier> {
        let Some(tier) = self.tier(tier_id) else {
            return Navigation::Boundary;
        };

        let found = match tier.internal_difficulty {
            Some(difficulty) => self
                .by_difficulty
                .range((
                    Bound::Unbounded,
                    Bound::Excluded((difficulty, (i32::MIN, i32::MIN, i32::MIN, TierId::MIN))),
                ))
                .next_back()
                .map(|(_, &index)| index),
            None => self.canonical_neighbor(tier_id, Direction::Easier),
        };

        found.map_or(Navigation::Boundary, |index| {
            Navigation::Moved(&self.ladder[index])
        })
    }

    /// 沒有難度值的 tier 改用標準順序，找下一個（或上一個）可施測的 tier
    fn canonical_neighbor(&self, tier_id: TierId, direction: Direction) -> Option<usize> {
        let start = *self.position.get(&tier_id)?;
        match direction {
            Direction::Harder => (start + 1..self.ladder.len())
                .find(|&index| self.is_examinable(self.ladder[index].id)),
            Direction::Easier => (0..start)
                .rev()
                .find(|&index| self.is_examinable(self.ladder[index].id)),
        }
    }

    /// 標準順序與難度順序相反的 tier 組合 (較低標準鍵, 較高標準鍵)
    pub fn ordering_conflicts(&self) -> Vec<(TierId, TierId)> {
        let ranked: Vec<&CurriculumTier> = self
            .ladder
            .iter()
            .filter(|tier| tier.internal_difficulty.is_some() && self.is_examinable(tier.id))
            .collect();

        let mut conflicts = Vec::new();
        for (i, lower) in ranked.iter().enumerate() {
            for upper in &ranked[i + 1..] {
                if lower.internal_difficulty > upper.internal_difficulty {
                    conflicts.push((lower.id, upper.id));
                }
            }
        }
        conflicts
    }
}
