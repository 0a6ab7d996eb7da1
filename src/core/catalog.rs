use crate::core::answer_spec::{migrate_short_spec, ParsedQuestion};
use crate::core::curriculum::CurriculumGraph;
use crate::domain::model::{
    CurriculumTier, ExamDefinition, ExamId, PlacementRule, QuestionId,
};
use crate::domain::ports::CatalogSource;
use crate::utils::error::{EngineError, Result};
use std::collections::{BTreeMap, HashMap, HashSet};

/// 考卷與已解析題目
#[derive(Debug, Clone)]
pub struct ExamEntry {
    pub definition: ExamDefinition,
    questions: BTreeMap<QuestionId, ParsedQuestion>,
}

impl ExamEntry {
    pub fn id(&self) -> ExamId {
        self.definition.id
    }

    pub fn question(&self, id: QuestionId) -> Option<&ParsedQuestion> {
        self.questions.get(&id)
    }

    pub fn questions(&self) -> impl Iterator<Item = &ParsedQuestion> {
        self.questions.values()
    }

    /// 排除 LONG（以及全部小題皆為 LONG 的 MIXED）後的總分
    pub fn total_possible(&self) -> u32 {
        self.questions()
            .filter(|q| q.counts_toward_total())
            .map(|q| q.points())
            .sum()
    }
}

/// 唯讀快取：課程圖、考卷、分級規則。載入後不再變動
#[derive(Debug, Clone)]
pub struct ExamCatalog {
    graph: CurriculumGraph,
    exams: HashMap<ExamId, ExamEntry>,
    rules: Vec<PlacementRule>,
}

impl ExamCatalog {
    pub async fn load(source: &dyn CatalogSource) -> Result<Self> {
        let tiers = source.tiers().await?;
        let exams = source.exams().await?;
        let rules = source.placement_rules().await?;
        Self::build(tiers, exams, rules)
    }

    pub fn build(
        tiers: Vec<CurriculumTier>,
        exams: Vec<ExamDefinition>,
        rules: Vec<PlacementRule>,
    ) -> Result<Self> {
        let graph = CurriculumGraph::build(tiers, &exams)?;

        let mut entries = HashMap::with_capacity(exams.len());
        let mut legacy_specs = 0;
        for exam in exams {
            if exam.tier_ids.is_empty() {
                return Err(EngineError::InvalidCatalog {
                    message: format!("exam {} is not mapped to any tier", exam.id),
                });
            }

            let mut questions = BTreeMap::new();
            for question in &exam.questions {
                if let Some(canonical) = migrate_short_spec(question)? {
                    legacy_specs += 1;
                    tracing::debug!(
                        "Question {} uses the legacy SHORT format, canonical form is '{}'",
                        question.id,
                        canonical
                    );
                }
                if question.exam_id != exam.id {
                    return Err(EngineError::InvalidCatalog {
                        message: format!(
                            "question {} belongs to exam {} but is listed under exam {}",
                            question.id, question.exam_id, exam.id
                        ),
                    });
                }
                let parsed = ParsedQuestion::parse(question)?;
                if questions.insert(question.id, parsed).is_some() {
                    return Err(EngineError::InvalidCatalog {
                        message: format!("duplicate question id {} in exam {}", question.id, exam.id),
                    });
                }
            }

            let id = exam.id;
            let entry = ExamEntry {
                definition: exam,
                questions,
            };
            if entries.insert(id, entry).is_some() {
                return Err(EngineError::InvalidCatalog {
                    message: format!("duplicate exam id {}", id),
                });
            }
        }

        let mut seen = HashSet::new();
        for rule in &rules {
            if graph.tier(rule.tier_id).is_none() {
                return Err(EngineError::InvalidCatalog {
                    message: format!(
                        "placement rule for grade {} points at unknown tier {}",
                        rule.grade, rule.tier_id
                    ),
                });
            }
            if !seen.insert((rule.grade, rule.normalized_band())) {
                return Err(EngineError::InvalidCatalog {
                    message: format!(
                        "duplicate placement rule for grade {} and band {:?}",
                        rule.grade, rule.rank_band
                    ),
                });
            }
        }

        if legacy_specs > 0 {
            tracing::warn!(
                "⚠️ {} SHORT questions still use comma-separated answers",
                legacy_specs
            );
        }

        let conflicts = graph.ordering_conflicts();
        if !conflicts.is_empty() {
            tracing::warn!(
                "⚠️ {} tier pairs disagree between canonical and difficulty order: {:?}",
                conflicts.len(),
                conflicts
            );
        }

        tracing::info!(
            "📚 Catalog loaded: {} tiers, {} exams, {} placement rules",
            graph.len(),
            entries.len(),
            rules.len()
        );

        Ok(Self {
            graph,
            exams: entries,
            rules,
        })
    }

    pub fn graph(&self) -> &CurriculumGraph {
        &self.graph
    }

    pub fn exam(&self, id: ExamId) -> Result<&ExamEntry> {
        self.exams.get(&id).ok_or(EngineError::ExamNotFound(id))
    }

    pub fn placement_rules(&self) -> &[PlacementRule] {
        &self.rules
    }
}
