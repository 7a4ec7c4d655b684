use crate::core::embeddings::TrainingSnapshot;
use crate::models::{
    ConsentSide, ContactInfo, Embedding, EmbeddingModel, EventScope, FeedbackEntry,
    FeedbackRatings, Gender, MatchRecord, ModelMetadata, ModelMetrics, PairId, Participant,
    Profile, ScoreBreakdown,
};
use crate::services::store::{MatchStore, PoolFilter, StoreError};
use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::time::Duration;

/// PostgreSQL-backed store
///
/// Round closure, consent updates and training snapshots each run as a
/// single statement or transaction, so concurrent requests see either the
/// whole round or none of it.
pub struct PostgresStore {
    pool: PgPool,
}

const RECORD_COLUMNS: &str = "id, event_scope, round, participant_a, participant_b, score, breakdown, \
     narrative, forced, repeat_pair, wants_match_a, wants_match_b, created_at";

impl PostgresStore {
    /// Create a new store from a connection string and run migrations
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        acquire_timeout_secs: u64,
        idle_timeout_secs: u64,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(idle_timeout_secs))
            .test_before_acquire(true)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Create a new store from settings
    pub async fn from_settings(
        url: &str,
        max_connections: Option<u32>,
        min_connections: Option<u32>,
        acquire_timeout_secs: Option<u64>,
        idle_timeout_secs: Option<u64>,
    ) -> Result<Self, StoreError> {
        tracing::info!("Connecting to PostgreSQL");

        Self::new(
            url,
            max_connections.unwrap_or(10),
            min_connections.unwrap_or(1),
            acquire_timeout_secs.unwrap_or(5),
            idle_timeout_secs.unwrap_or(600),
        )
        .await
    }

    /// Insert or replace a participant (used by seeding tools)
    pub async fn upsert_participant(&self, scope: &EventScope, participant: &Participant) -> Result<(), StoreError> {
        let query = r#"
            INSERT INTO participants (event_scope, id, display_name, gender, open_to, profile, contact, survey_complete)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (event_scope, id)
            DO UPDATE SET
                display_name = EXCLUDED.display_name,
                gender = EXCLUDED.gender,
                open_to = EXCLUDED.open_to,
                profile = EXCLUDED.profile,
                contact = EXCLUDED.contact,
                survey_complete = EXCLUDED.survey_complete
        "#;

        sqlx::query(query)
            .bind(scope.as_str())
            .bind(participant.id)
            .bind(&participant.display_name)
            .bind(participant.gender.map(gender_to_text))
            .bind(Json(&participant.open_to))
            .bind(Json(&participant.profile))
            .bind(Json(&participant.contact))
            .bind(participant.survey_complete)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn gender_to_text(gender: Gender) -> String {
    serde_json::to_value(gender)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn gender_from_text(text: Option<String>) -> Option<Gender> {
    text.and_then(|s| serde_json::from_value(serde_json::Value::String(s)).ok())
}

fn participant_from_row(row: &PgRow) -> Result<Participant, sqlx::Error> {
    let open_to: Json<Vec<Gender>> = row.try_get("open_to")?;
    let profile: Json<Profile> = row.try_get("profile")?;
    let contact: Json<ContactInfo> = row.try_get("contact")?;

    Ok(Participant {
        id: row.try_get("id")?,
        display_name: row.try_get("display_name")?,
        gender: gender_from_text(row.try_get("gender")?),
        open_to: open_to.0,
        profile: profile.0,
        contact: contact.0,
        survey_complete: row.try_get("survey_complete")?,
    })
}

fn record_from_row(row: &PgRow) -> Result<MatchRecord, sqlx::Error> {
    let scope: String = row.try_get("event_scope")?;
    let round: i32 = row.try_get("round")?;
    let breakdown: Json<ScoreBreakdown> = row.try_get("breakdown")?;

    Ok(MatchRecord {
        id: row.try_get("id")?,
        event_scope: EventScope(scope),
        round: round.max(0) as u32,
        participant_a: row.try_get("participant_a")?,
        participant_b: row.try_get("participant_b")?,
        score: row.try_get("score")?,
        breakdown: breakdown.0,
        narrative: row.try_get("narrative")?,
        forced: row.try_get("forced")?,
        repeat_pair: row.try_get("repeat_pair")?,
        wants_match_a: row.try_get("wants_match_a")?,
        wants_match_b: row.try_get("wants_match_b")?,
        created_at: row.try_get("created_at")?,
    })
}

fn feedback_from_row(row: &PgRow) -> Result<FeedbackEntry, sqlx::Error> {
    let scope: String = row.try_get("event_scope")?;
    let round: i32 = row.try_get("round")?;
    let ratings: Json<FeedbackRatings> = row.try_get("ratings")?;

    Ok(FeedbackEntry {
        event_scope: EventScope(scope),
        round: round.max(0) as u32,
        rater: row.try_get("rater")?,
        ratee: row.try_get("ratee")?,
        ratings: ratings.0,
    })
}

#[async_trait]
impl MatchStore for PostgresStore {
    async fn get_profiles(&self, scope: &EventScope, filter: &PoolFilter) -> Result<Vec<Participant>, StoreError> {
        let rows = match filter {
            PoolFilter::CompleteSurveys => {
                let query = r#"
                    SELECT id, display_name, gender, open_to, profile, contact, survey_complete
                    FROM participants
                    WHERE event_scope = $1 AND survey_complete
                    ORDER BY id
                "#;
                sqlx::query(query).bind(scope.as_str()).fetch_all(&self.pool).await?
            }
            PoolFilter::Ids(ids) => {
                let query = r#"
                    SELECT id, display_name, gender, open_to, profile, contact, survey_complete
                    FROM participants
                    WHERE event_scope = $1 AND id = ANY($2)
                    ORDER BY id
                "#;
                sqlx::query(query)
                    .bind(scope.as_str())
                    .bind(ids)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let participants = rows
            .iter()
            .map(participant_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!("Loaded {} participants for {}", participants.len(), scope);
        Ok(participants)
    }

    async fn get_round_records(&self, scope: &EventScope, round: u32) -> Result<Vec<MatchRecord>, StoreError> {
        let query = format!(
            "SELECT {} FROM match_records WHERE event_scope = $1 AND round = $2 ORDER BY participant_a",
            RECORD_COLUMNS
        );

        let rows = sqlx::query(&query)
            .bind(scope.as_str())
            .bind(round as i32)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(record_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn persist_match_records(
        &self,
        scope: &EventScope,
        round: u32,
        records: &[MatchRecord],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let closed = sqlx::query(
            "INSERT INTO closed_rounds (event_scope, round) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(scope.as_str())
        .bind(round as i32)
        .execute(&mut *tx)
        .await?;

        if closed.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::RoundClosed {
                scope: scope.clone(),
                round,
            });
        }

        let insert = format!(
            "INSERT INTO match_records ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            RECORD_COLUMNS
        );
        for record in records {
            if record.round != round || &record.event_scope != scope {
                tx.rollback().await?;
                return Err(StoreError::Integrity(format!(
                    "record {} belongs to {} round {}",
                    record.id, record.event_scope, record.round
                )));
            }

            sqlx::query(&insert)
                .bind(record.id)
                .bind(scope.as_str())
                .bind(round as i32)
                .bind(record.participant_a)
                .bind(record.participant_b)
                .bind(record.score)
                .bind(Json(&record.breakdown))
                .bind(&record.narrative)
                .bind(record.forced)
                .bind(record.repeat_pair)
                .bind(record.wants_match_a)
                .bind(record.wants_match_b)
                .bind(record.created_at)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        tracing::debug!("Persisted {} records for {} round {}", records.len(), scope, round);
        Ok(())
    }

    async fn get_record(&self, scope: &EventScope, pair_id: PairId) -> Result<Option<MatchRecord>, StoreError> {
        let query = format!(
            "SELECT {} FROM match_records WHERE event_scope = $1 AND id = $2",
            RECORD_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(scope.as_str())
            .bind(pair_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(record_from_row).transpose()?)
    }

    async fn set_consent(
        &self,
        scope: &EventScope,
        pair_id: PairId,
        side: ConsentSide,
        wants_match: bool,
    ) -> Result<MatchRecord, StoreError> {
        // Each side owns exactly one column; the update never reads the other
        let column = match side {
            ConsentSide::A => "wants_match_a",
            ConsentSide::B => "wants_match_b",
        };
        let query = format!(
            "UPDATE match_records SET {} = $1 WHERE event_scope = $2 AND id = $3 RETURNING {}",
            column, RECORD_COLUMNS
        );

        let row = sqlx::query(&query)
            .bind(wants_match)
            .bind(scope.as_str())
            .bind(pair_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("pairing {}", pair_id)))?;

        Ok(record_from_row(&row)?)
    }

    async fn get_feedback(&self, scope: &EventScope) -> Result<Vec<FeedbackEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT event_scope, round, rater, ratee, ratings FROM feedback WHERE event_scope = $1 ORDER BY id",
        )
        .bind(scope.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(feedback_from_row).collect::<Result<Vec<_>, _>>()?)
    }

    async fn training_snapshot(&self, scope: &EventScope) -> Result<TrainingSnapshot, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let query = format!(
            "SELECT {} FROM match_records WHERE event_scope = $1 ORDER BY round, participant_a",
            RECORD_COLUMNS
        );
        let record_rows = sqlx::query(&query)
            .bind(scope.as_str())
            .fetch_all(&mut *tx)
            .await?;

        let feedback_rows = sqlx::query(
            "SELECT event_scope, round, rater, ratee, ratings FROM feedback WHERE event_scope = $1 ORDER BY id",
        )
        .bind(scope.as_str())
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(TrainingSnapshot {
            records: record_rows.iter().map(record_from_row).collect::<Result<Vec<_>, _>>()?,
            feedback: feedback_rows.iter().map(feedback_from_row).collect::<Result<Vec<_>, _>>()?,
        })
    }

    async fn persist_embeddings(&self, embeddings: &[Embedding]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for embedding in embeddings {
            sqlx::query(
                "INSERT INTO embeddings (model_version, participant_id, vector) VALUES ($1, $2, $3)",
            )
            .bind(embedding.model_version)
            .bind(embedding.participant_id)
            .bind(&embedding.vector)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn persist_model_metrics(&self, metadata: &ModelMetadata) -> Result<(), StoreError> {
        let query = r#"
            INSERT INTO embedding_models
                (version, event_scope, rank, participant_count, rmse, coverage, observed_cells, trained_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#;

        sqlx::query(query)
            .bind(metadata.version)
            .bind(metadata.event_scope.as_str())
            .bind(metadata.rank as i32)
            .bind(metadata.participant_count as i32)
            .bind(metadata.metrics.rmse)
            .bind(metadata.metrics.coverage)
            .bind(metadata.metrics.observed_cells as i64)
            .bind(metadata.trained_at)
            .execute(&self.pool)
            .await?;

        tracing::info!("Published model {} for {}", metadata.version, metadata.event_scope);
        Ok(())
    }

    async fn latest_model(&self, scope: &EventScope) -> Result<Option<EmbeddingModel>, StoreError> {
        let query = r#"
            SELECT version, event_scope, rank, participant_count, rmse, coverage, observed_cells, trained_at
            FROM embedding_models
            WHERE event_scope = $1
            ORDER BY trained_at DESC
            LIMIT 1
        "#;

        let Some(row) = sqlx::query(query)
            .bind(scope.as_str())
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let rank: i32 = row.try_get("rank")?;
        let participant_count: i32 = row.try_get("participant_count")?;
        let observed_cells: i64 = row.try_get("observed_cells")?;
        let metadata = ModelMetadata {
            version: row.try_get("version")?,
            event_scope: scope.clone(),
            rank: rank.max(0) as usize,
            participant_count: participant_count.max(0) as usize,
            metrics: ModelMetrics {
                rmse: row.try_get("rmse")?,
                coverage: row.try_get("coverage")?,
                observed_cells: observed_cells.max(0) as usize,
            },
            trained_at: row.try_get("trained_at")?,
        };

        let embedding_rows = sqlx::query(
            "SELECT participant_id, vector FROM embeddings WHERE model_version = $1 ORDER BY participant_id",
        )
        .bind(metadata.version)
        .fetch_all(&self.pool)
        .await?;

        let embeddings = embedding_rows
            .iter()
            .map(|row| {
                Ok(Embedding {
                    participant_id: row.try_get("participant_id")?,
                    model_version: metadata.version,
                    vector: row.try_get("vector")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        Ok(Some(EmbeddingModel { metadata, embeddings }))
    }

    async fn health_check(&self) -> Result<bool, StoreError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| true)
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gender_text_round_trip() {
        assert_eq!(gender_to_text(Gender::NonBinary), "non_binary");
        assert_eq!(gender_from_text(Some("woman".to_string())), Some(Gender::Woman));
        assert_eq!(gender_from_text(Some("unknown".to_string())), None);
        assert_eq!(gender_from_text(None), None);
    }
}
