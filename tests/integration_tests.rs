// Integration tests for Cohort Match

use async_trait::async_trait;
use cohort_match::core::error::ScoringError;
use cohort_match::core::narrative::{NarrativeError, NarrativeReasonProvider, NarrativeRequest, TemplateNarrator};
use cohort_match::core::scoring::{BlendPolicy, Compatibility, CompatibilityScorer, ScoreSource};
use cohort_match::core::{ConsentProtocol, MatchingError, RoundOrchestrator, RoundSettings, TrainerSettings, TrainingPipeline};
use cohort_match::models::{
    AttachmentStyle, ConsentSide, ContactInfo, CoreValue, EventScope, FeedbackEntry,
    FeedbackRatings, Gender, MatchRecord, Participant, ParticipantId, Profile, ScoreBreakdown, ScoringWeights,
};
use cohort_match::routes::{self, AppState};
use cohort_match::services::InMemoryStore;
use std::collections::HashMap;
use std::sync::Arc;

fn create_participant(id: ParticipantId) -> Participant {
    Participant {
        id,
        display_name: format!("Participant {}", id),
        gender: Some(Gender::NonBinary),
        open_to: vec![],
        profile: Profile {
            attachment: Some(AttachmentStyle::Secure),
            core_values: vec![CoreValue::Family, CoreValue::Learning],
            vibe: vec![format!("story number {}", id)],
            ..Profile::default()
        },
        contact: ContactInfo {
            email: Some(format!("p{}@example.com", id)),
            phone: None,
            instagram: None,
        },
        survey_complete: true,
    }
}

/// Scorer reading symmetric scores from a fixed table
struct TableScorer {
    scores: HashMap<(ParticipantId, ParticipantId), f64>,
    default: f64,
}

impl TableScorer {
    fn new(entries: &[(ParticipantId, ParticipantId, f64)], default: f64) -> Self {
        let scores = entries
            .iter()
            .map(|&(a, b, s)| ((a.min(b), a.max(b)), s))
            .collect();
        Self { scores, default }
    }

    fn lookup(&self, a: ParticipantId, b: ParticipantId) -> f64 {
        *self.scores.get(&(a.min(b), a.max(b))).unwrap_or(&self.default)
    }
}

impl CompatibilityScorer for TableScorer {
    fn name(&self) -> &'static str {
        "table"
    }

    fn score(&self, a: &Participant, b: &Participant) -> Result<Compatibility, ScoringError> {
        let score = self.lookup(a.id, b.id);
        let mut breakdown = ScoreBreakdown::default();
        breakdown.insert(cohort_match::models::Factor::Values, score);
        Ok(Compatibility {
            score,
            breakdown,
            source: ScoreSource::RuleBased,
        })
    }
}

/// Scorer that fails for every pair involving one participant
struct FlakyScorer {
    broken: ParticipantId,
}

impl CompatibilityScorer for FlakyScorer {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn score(&self, a: &Participant, b: &Participant) -> Result<Compatibility, ScoringError> {
        if a.id == self.broken || b.id == self.broken {
            return Err(ScoringError::NonFinite);
        }
        Ok(Compatibility::neutral(80.0))
    }
}

struct FailingNarrator;

#[async_trait]
impl NarrativeReasonProvider for FailingNarrator {
    async fn narrate(&self, _request: &NarrativeRequest) -> Result<String, NarrativeError> {
        Err(NarrativeError::ApiError("service unavailable".to_string()))
    }
}

async fn seeded_store(scope: &EventScope, ids: &[ParticipantId]) -> Arc<InMemoryStore> {
    let store = Arc::new(InMemoryStore::new());
    for id in ids {
        store.upsert_participant(scope, create_participant(*id)).await;
    }
    store
}

fn orchestrator(store: Arc<InMemoryStore>, narrator: Arc<dyn NarrativeReasonProvider>) -> RoundOrchestrator {
    RoundOrchestrator::new(
        store,
        narrator,
        ScoringWeights::default(),
        BlendPolicy::default(),
        RoundSettings::default(),
    )
}

fn pair_cost(scorer: &TableScorer, a: ParticipantId, b: ParticipantId) -> f64 {
    100.0 - scorer.lookup(a, b)
}

fn five_person_scores() -> TableScorer {
    TableScorer::new(
        &[
            (1, 2, 90.0),
            (1, 3, 40.0),
            (1, 4, 55.0),
            (1, 5, 20.0),
            (2, 3, 70.0),
            (2, 4, 35.0),
            (2, 5, 60.0),
            (3, 4, 85.0),
            (3, 5, 30.0),
            (4, 5, 45.0),
        ],
        0.0,
    )
}

fn real_pairs(records: &[MatchRecord]) -> Vec<(ParticipantId, ParticipantId)> {
    records.iter().filter_map(|r| r.pair_key()).collect()
}

#[tokio::test]
async fn test_odd_pool_leaves_one_unmatched_with_optimal_pairs() {
    let scope = EventScope::new("spring-mixer");
    let store = seeded_store(&scope, &[1, 2, 3, 4, 5]).await;
    let scorer = five_person_scores();

    let response = orchestrator(store, Arc::new(TemplateNarrator))
        .run_round_with(&scope, 1, &scorer)
        .await
        .unwrap();

    let pairs = real_pairs(&response.records);
    let unmatched: Vec<_> = response.records.iter().filter(|r| r.is_unmatched()).collect();
    assert_eq!(pairs.len(), 2);
    assert_eq!(unmatched.len(), 1);
    assert!(unmatched[0].score.is_none());
    assert_eq!(response.stats.pool_size, 5);

    // Among the four matched participants, the chosen pairs are the cheapest split
    let mut matched: Vec<ParticipantId> = pairs.iter().flat_map(|(a, b)| [*a, *b]).collect();
    matched.sort_unstable();
    let [w, x, y, z] = [matched[0], matched[1], matched[2], matched[3]];
    let best_split = [
        pair_cost(&scorer, w, x) + pair_cost(&scorer, y, z),
        pair_cost(&scorer, w, y) + pair_cost(&scorer, x, z),
        pair_cost(&scorer, w, z) + pair_cost(&scorer, x, y),
    ]
    .into_iter()
    .fold(f64::INFINITY, f64::min);
    let chosen: f64 = pairs.iter().map(|(a, b)| pair_cost(&scorer, *a, *b)).sum();
    assert!((chosen - best_split).abs() < 1e-9);

    // 1-2 and 3-4 is the global optimum for this table
    assert!(pairs.contains(&(1, 2)));
    assert!(pairs.contains(&(3, 4)));
    assert_eq!(unmatched[0].participant_a, 5);
}

#[tokio::test]
async fn test_rounds_are_serialized_and_write_once() {
    let scope = EventScope::new("autumn-social");
    let store = seeded_store(&scope, &[1, 2, 3, 4, 5]).await;
    let scorer = five_person_scores();
    let orchestrator = orchestrator(store.clone(), Arc::new(TemplateNarrator));

    let early = orchestrator.run_round_with(&scope, 2, &scorer).await;
    assert!(matches!(early, Err(MatchingError::PriorRoundMissing(1))));

    let first = orchestrator.run_round_with(&scope, 1, &scorer).await.unwrap();

    let again = orchestrator.run_round_with(&scope, 1, &scorer).await;
    assert!(matches!(again, Err(MatchingError::RoundAlreadyComplete(1))));

    let skipped = orchestrator.run_round_with(&scope, 3, &scorer).await;
    assert!(matches!(skipped, Err(MatchingError::PriorRoundMissing(2))));

    // Round 2 reuses the round 1 pool and avoids repeating its pairs
    let second = orchestrator.run_round_with(&scope, 2, &scorer).await.unwrap();
    assert_eq!(second.stats.pool_size, 5);
    assert_eq!(second.stats.repeat_pairs, 0);
    for pair in real_pairs(&second.records) {
        assert!(!real_pairs(&first.records).contains(&pair));
    }

    use cohort_match::services::MatchStore;
    let stored = store.get_round_records(&scope, 1).await.unwrap();
    assert_eq!(stored.len(), first.records.len());
}

#[tokio::test]
async fn test_scoring_failures_degrade_to_neutral() {
    let scope = EventScope::new("degraded");
    let store = seeded_store(&scope, &[1, 2, 3, 4]).await;

    let response = orchestrator(store, Arc::new(TemplateNarrator))
        .run_round_with(&scope, 1, &FlakyScorer { broken: 4 })
        .await
        .unwrap();

    assert_eq!(response.stats.pairs, 2);
    assert_eq!(response.stats.degraded_scores, 6);

    let with_broken = response
        .records
        .iter()
        .find(|r| r.participants().any(|id| id == 4))
        .unwrap();
    assert_eq!(with_broken.score, Some(RoundSettings::default().neutral_score));
}

#[tokio::test]
async fn test_narrative_failure_falls_back_to_template() {
    let scope = EventScope::new("quiet-night");
    let store = seeded_store(&scope, &[1, 2]).await;

    let response = orchestrator(store, Arc::new(FailingNarrator))
        .run_round(&scope, 1)
        .await
        .unwrap();

    assert_eq!(response.records.len(), 1);
    let narrative = response.records[0].narrative.as_deref().unwrap();
    assert!(narrative.contains("compatibility"));
}

#[tokio::test]
async fn test_incompatible_preferences_are_avoided() {
    let scope = EventScope::new("preferences");
    let store = Arc::new(InMemoryStore::new());
    let genders = [
        (1, Gender::Woman, vec![Gender::Man]),
        (2, Gender::Woman, vec![Gender::Man]),
        (3, Gender::Man, vec![Gender::Woman]),
        (4, Gender::Man, vec![Gender::Woman]),
    ];
    for (id, gender, open_to) in genders {
        let mut participant = create_participant(id);
        participant.gender = Some(gender);
        participant.open_to = open_to;
        store.upsert_participant(&scope, participant).await;
    }

    // Same-gender pairs score highest but are not mutually open
    let scorer = TableScorer::new(&[(1, 2, 99.0), (3, 4, 99.0)], 30.0);
    let response = orchestrator(store, Arc::new(TemplateNarrator))
        .run_round_with(&scope, 1, &scorer)
        .await
        .unwrap();

    let pairs = real_pairs(&response.records);
    assert!(!pairs.contains(&(1, 2)));
    assert!(!pairs.contains(&(3, 4)));
    assert_eq!(response.stats.forced_pairs, 0);
}

#[tokio::test]
async fn test_consent_sequence() {
    let scope = EventScope::new("consent");
    let store = seeded_store(&scope, &[1, 2]).await;
    let response = orchestrator(store.clone(), Arc::new(TemplateNarrator))
        .run_round(&scope, 1)
        .await
        .unwrap();
    let record = &response.records[0];
    let (a, b) = (record.participant_a, record.participant_b.unwrap());

    let consent = ConsentProtocol::new(store.clone());

    // A says yes, B has not answered
    let r = consent.submit_for_participant(&scope, record.id, a, true).await.unwrap();
    assert_eq!(r.mutual_match, None);
    assert!(r.partner_contact.is_none());

    // B says no
    let r = consent.submit_for_participant(&scope, record.id, b, false).await.unwrap();
    assert_eq!(r.mutual_match, Some(false));

    // A flips back and forth; B's no still holds
    let r = consent.submit_for_participant(&scope, record.id, a, false).await.unwrap();
    assert_eq!(r.mutual_match, Some(false));
    let r = consent.submit_for_participant(&scope, record.id, a, true).await.unwrap();
    assert_eq!(r.mutual_match, Some(false));
    assert!(r.partner_contact.is_none());

    // Resubmitting the same answer is idempotent
    let r = consent.submit_for_participant(&scope, record.id, a, true).await.unwrap();
    assert_eq!(r.mutual_match, Some(false));

    // B changes to yes: mutual, and contact is revealed to each side
    let r = consent.submit_for_participant(&scope, record.id, b, true).await.unwrap();
    assert_eq!(r.mutual_match, Some(true));
    let revealed = r.partner_contact.unwrap();
    assert_eq!(revealed.email, Some(format!("p{}@example.com", a)));

    let outsider = consent.submit_for_participant(&scope, record.id, 99, true).await;
    assert!(matches!(outsider, Err(MatchingError::NotInPair { participant: 99, .. })));

    let unknown = consent
        .submit_for_participant(&scope, uuid::Uuid::new_v4(), a, true)
        .await;
    assert!(matches!(unknown, Err(MatchingError::UnknownPair(_))));
}

#[tokio::test]
async fn test_consent_only_for_first_round_pairs() {
    let scope = EventScope::new("later-rounds");
    let store = seeded_store(&scope, &[1, 2, 3]).await;
    let orchestrator = orchestrator(store.clone(), Arc::new(TemplateNarrator));
    let consent = ConsentProtocol::new(store.clone());

    let first = orchestrator.run_round(&scope, 1).await.unwrap();
    let second = orchestrator.run_round(&scope, 2).await.unwrap();

    let unmatched = first.records.iter().find(|r| r.is_unmatched()).unwrap();
    let result = consent
        .submit_for_participant(&scope, unmatched.id, unmatched.participant_a, true)
        .await;
    match result {
        Err(err @ MatchingError::NoPartner(id)) => {
            assert_eq!(id, unmatched.id);
            assert_eq!(err.kind(), "no_partner");
            assert_eq!(err.status_code(), 409);
        }
        other => panic!("expected NoPartner, got {:?}", other),
    }

    let direct = consent
        .submit_consent(&scope, unmatched.id, ConsentSide::A, true)
        .await;
    assert!(matches!(direct, Err(MatchingError::NoPartner(_))));

    let later = second.records.iter().find(|r| !r.is_unmatched()).unwrap();
    let result = consent
        .submit_for_participant(&scope, later.id, later.participant_a, true)
        .await;
    assert!(matches!(result, Err(MatchingError::ConsentClosed(2))));
}

#[tokio::test]
async fn test_training_uses_round_history_and_feedback() {
    let scope = EventScope::new("learning");
    let store = seeded_store(&scope, &[1, 2, 3, 4]).await;
    let scorer = TableScorer::new(&[(1, 2, 80.0), (3, 4, 70.0), (1, 3, 40.0), (2, 4, 50.0)], 20.0);
    orchestrator(store.clone(), Arc::new(TemplateNarrator))
        .run_round_with(&scope, 1, &scorer)
        .await
        .unwrap();

    store
        .add_feedback(FeedbackEntry {
            event_scope: scope.clone(),
            round: 1,
            rater: 1,
            ratee: 2,
            ratings: FeedbackRatings {
                overall: Some(95),
                chemistry: Some(90),
                ..FeedbackRatings::default()
            },
        })
        .await;

    let pipeline = TrainingPipeline::new(store.clone(), TrainerSettings::default());
    let trained = pipeline.train_embeddings(&scope, None).await.unwrap();
    assert_eq!(trained.participant_count, 4);
    assert!(trained.coverage > 0.0 && trained.coverage <= 1.0);

    let predicted = pipeline.predict_compatibility(&scope, 1, 2).await.unwrap();
    assert_eq!(predicted.model_version, trained.model_version);
    assert!((0.0..=100.0).contains(&predicted.score));

    // A second run publishes a new version that becomes the latest
    let retrained = pipeline.train_embeddings(&scope, Some(1)).await.unwrap();
    assert_ne!(retrained.model_version, trained.model_version);
    let predicted = pipeline.predict_compatibility(&scope, 3, 4).await.unwrap();
    assert_eq!(predicted.model_version, retrained.model_version);
}

#[actix_web::test]
async fn test_http_round_lifecycle() {
    use actix_web::{test, web, App};

    let scope = EventScope::new("http");
    let store = seeded_store(&scope, &[1, 2, 3, 4]).await;
    let state = AppState {
        store: store.clone(),
        orchestrator: orchestrator(store.clone(), Arc::new(TemplateNarrator)),
        consent: ConsentProtocol::new(store.clone()),
        training: TrainingPipeline::new(store.clone(), TrainerSettings::default()),
    };

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .configure(routes::configure_routes),
    )
    .await;

    let req = test::TestRequest::get().uri("/api/v1/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let req = test::TestRequest::post().uri("/api/v1/events/http/rounds/1/run").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["stats"]["pairs"], 2);

    let req = test::TestRequest::post().uri("/api/v1/events/http/rounds/1/run").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 409);

    let req = test::TestRequest::get().uri("/api/v1/events/http/rounds/1").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let req = test::TestRequest::get().uri("/api/v1/events/http/rounds/2").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 404);

    let req = test::TestRequest::get()
        .uri("/api/v1/events/http/compatibility?a=1&b=2")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 404);
}
