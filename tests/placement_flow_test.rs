use anyhow::Result;
use chrono::{TimeZone, Utc};
use placement_engine::domain::model::{
    Actor, CurriculumTier, Direction, ExamDefinition, Navigation, Placement, PlacementRule,
    StudentAttributes,
};
use placement_engine::{
    ExamCatalog, GradingPolicy, InMemorySessionStore, ManualClock, SessionCoordinator,
    SessionSettings, StaticCatalog,
};
use std::sync::Arc;

fn tier(id: u64, program: i32, level: i32, difficulty: Option<i32>) -> CurriculumTier {
    CurriculumTier {
        id,
        name: format!("P{}-L{}", program, level),
        program_order: program,
        subprogram_order: 1,
        level_number: level,
        internal_difficulty: difficulty,
    }
}

fn exam(id: u64, tier_id: u64) -> ExamDefinition {
    ExamDefinition {
        id,
        title: format!("Exam {}", id),
        tier_ids: vec![tier_id],
        timer_minutes: 40,
        questions: Vec::new(),
    }
}

/// 難度值稀疏、含重複值，也有沒考卷的 tier
fn snapshot() -> StaticCatalog {
    StaticCatalog::new(
        vec![
            tier(1, 1, 1, Some(100)),
            tier(2, 1, 2, Some(150)),
            tier(3, 1, 3, Some(150)),
            tier(4, 2, 1, Some(220)),
            tier(5, 2, 2, None),
            tier(6, 2, 3, Some(400)),
            tier(7, 3, 1, Some(900)),
        ],
        vec![
            exam(10, 1),
            exam(20, 2),
            exam(30, 3),
            exam(41, 4),
            exam(40, 4),
            exam(50, 5),
            exam(60, 6),
        ],
        vec![
            PlacementRule {
                grade: 5,
                rank_band: Some("TOP_20".to_string()),
                tier_id: 2,
            },
            PlacementRule {
                grade: 5,
                rank_band: None,
                tier_id: 1,
            },
        ],
    )
}

async fn catalog() -> Result<Arc<ExamCatalog>> {
    Ok(Arc::new(ExamCatalog::load(&snapshot()).await?))
}

fn student() -> StudentAttributes {
    StudentAttributes {
        student_id: "kid-5".to_string(),
        grade: 5,
        rank_band: "TOP_20".to_string(),
    }
}

#[tokio::test]
async fn test_place_then_climb_until_boundary() -> Result<()> {
    let catalog = catalog().await?;
    let coordinator = SessionCoordinator::new(
        Arc::clone(&catalog),
        InMemorySessionStore::new(),
        ManualClock::new(Utc.with_ymd_and_hms(2026, 2, 2, 14, 0, 0).unwrap()),
        SessionSettings::default(),
        GradingPolicy::default(),
    );

    let first = coordinator.resolver().place(&student())?;
    let second = coordinator.resolver().place(&student())?;
    assert_eq!(first, second);
    assert_eq!(first, Placement { tier_id: 2, exam_id: 20 });

    let me = Actor::Student("kid-5".to_string());
    let session = coordinator.start(&student(), &me).await?;
    assert_eq!(session.exam_id, 20);

    let bound = catalog.graph().distinct_difficulties();
    let mut steps = 0;
    let mut visited = Vec::new();
    loop {
        match coordinator
            .request_difficulty_change(session.id, Direction::Harder, &me)
            .await?
        {
            Navigation::Moved(placement) => {
                visited.push(placement.tier_id);
                steps += 1;
                assert!(steps <= bound, "climb did not terminate");
            }
            Navigation::Boundary => break,
        }
    }

    // tier 3 與 tier 2 同難度，tier 7 沒有考卷
    assert_eq!(visited, vec![4, 6]);

    let finished = coordinator.session(session.id).await?;
    assert_eq!(finished.original_tier, 2);
    assert_eq!(finished.final_tier, 6);
    assert_eq!(finished.difficulty_changes.len(), steps);
    assert_eq!(finished.difficulty_changes[0].exam_id, 40);
    Ok(())
}

#[tokio::test]
async fn test_navigation_is_deterministic_and_bounded() -> Result<()> {
    let catalog = catalog().await?;
    let graph = catalog.graph();

    for tier in graph.canonical_ladder() {
        if !graph.is_examinable(tier.id) {
            continue;
        }
        assert_eq!(graph.next_harder(tier.id), graph.next_harder(tier.id));
        assert_eq!(graph.next_easier(tier.id), graph.next_easier(tier.id));
    }

    assert!(graph.next_harder(6).is_boundary());
    assert!(graph.next_easier(1).is_boundary());
    Ok(())
}

#[tokio::test]
async fn test_teacher_moves_student_down() -> Result<()> {
    let catalog = catalog().await?;
    let coordinator = SessionCoordinator::new(
        catalog,
        InMemorySessionStore::new(),
        ManualClock::new(Utc.with_ymd_and_hms(2026, 2, 2, 14, 0, 0).unwrap()),
        SessionSettings::default(),
        GradingPolicy::default(),
    );

    let teacher = Actor::Teacher("ms-lin".to_string());
    let session = coordinator.start(&student(), &teacher).await?;

    let moved = coordinator
        .request_difficulty_change(session.id, Direction::Easier, &teacher)
        .await?;
    assert_eq!(moved, Navigation::Moved(Placement { tier_id: 1, exam_id: 10 }));

    let stuck = coordinator
        .request_difficulty_change(session.id, Direction::Easier, &teacher)
        .await?;
    assert!(stuck.is_boundary());

    let reloaded = coordinator.session(session.id).await?;
    assert_eq!(reloaded.difficulty_changes.len(), 1);
    assert_eq!(reloaded.original_tier, 2);
    Ok(())
}
