use sqlx::{sqlite::SqliteConnectOptions, Row, SqlitePool};
use std::str::FromStr;

use crate::model::{Ecosystem, ExchangeConfiguration, MembershipEntry};
use crate::{EcosystemId, NegotiationId, OfferingId, ParticipantId, Result};

/// SQLite-backed store. Aggregates are persisted as single rows with the
/// embedded lists serialized into a JSON `document` column, plus a few
/// plain columns for lookups. Every update is guarded by the aggregate's
/// `version` so concurrent transitions against the same record cannot
/// interleave: the loser of a race sees zero affected rows and retries
/// against fresh state.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::from_str(database_url)
                .map_err(sqlx::Error::from)?
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal),
        )
        .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS negotiations (
                id TEXT PRIMARY KEY,
                provider TEXT NOT NULL,
                consumer TEXT NOT NULL,
                provider_offering TEXT NOT NULL,
                consumer_offering TEXT NOT NULL,
                document TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 0,
                updated_at DATETIME NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_negotiations_pairing
                ON negotiations(provider, provider_offering, consumer, consumer_offering);
            CREATE INDEX IF NOT EXISTS idx_negotiations_provider ON negotiations(provider);
            CREATE INDEX IF NOT EXISTS idx_negotiations_consumer ON negotiations(consumer);

            CREATE TABLE IF NOT EXISTS ecosystems (
                id TEXT PRIMARY KEY,
                orchestrator TEXT NOT NULL,
                document TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 0,
                updated_at DATETIME NOT NULL
            );

            CREATE TABLE IF NOT EXISTS ecosystem_members (
                ecosystem_id TEXT NOT NULL,
                participant TEXT NOT NULL,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                FOREIGN KEY (ecosystem_id) REFERENCES ecosystems(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_members_ecosystem ON ecosystem_members(ecosystem_id);
            CREATE INDEX IF NOT EXISTS idx_members_participant ON ecosystem_members(participant);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn create_negotiation(&self, config: &ExchangeConfiguration) -> Result<()> {
        let document = serde_json::to_string(config)?;
        sqlx::query(
            r#"
            INSERT INTO negotiations (id, provider, consumer, provider_offering, consumer_offering, document, version, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(config.id.to_string())
        .bind(config.provider.to_string())
        .bind(config.consumer.to_string())
        .bind(config.provider_service_offering.to_string())
        .bind(config.consumer_service_offering.to_string())
        .bind(document)
        .bind(config.version)
        .bind(config.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_negotiation(&self, id: NegotiationId) -> Result<Option<ExchangeConfiguration>> {
        let row = sqlx::query("SELECT document FROM negotiations WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| decode_document(r.get::<String, _>(0)))
            .transpose()
    }

    /// Duplicate detection for the uniqueness invariant on the
    /// (provider, providerOffering, consumer, consumerOffering) tuple.
    pub async fn find_negotiation_by_pairing(
        &self,
        provider: ParticipantId,
        provider_offering: OfferingId,
        consumer: ParticipantId,
        consumer_offering: OfferingId,
    ) -> Result<Option<ExchangeConfiguration>> {
        let row = sqlx::query(
            r#"
            SELECT document FROM negotiations
            WHERE provider = ? AND provider_offering = ? AND consumer = ? AND consumer_offering = ?
            "#,
        )
        .bind(provider.to_string())
        .bind(provider_offering.to_string())
        .bind(consumer.to_string())
        .bind(consumer_offering.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| decode_document(r.get::<String, _>(0)))
            .transpose()
    }

    pub async fn list_negotiations_for(
        &self,
        participant: ParticipantId,
    ) -> Result<Vec<ExchangeConfiguration>> {
        let rows = sqlx::query(
            r#"
            SELECT document FROM negotiations
            WHERE provider = ? OR consumer = ?
            ORDER BY updated_at DESC
            "#,
        )
        .bind(participant.to_string())
        .bind(participant.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| decode_document(r.get::<String, _>(0)))
            .collect()
    }

    /// Compare-and-swap write. `config.version` must be the version the
    /// caller loaded; on success the stored version is bumped by one.
    /// Returns false when another writer got there first.
    pub async fn update_negotiation(&self, config: &ExchangeConfiguration) -> Result<bool> {
        let mut next = config.clone();
        next.version = config.version + 1;
        let document = serde_json::to_string(&next)?;

        let result = sqlx::query(
            r#"
            UPDATE negotiations SET document = ?, version = ?, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(document)
        .bind(next.version)
        .bind(next.updated_at)
        .bind(config.id.to_string())
        .bind(config.version)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn create_ecosystem(&self, ecosystem: &Ecosystem) -> Result<()> {
        let document = serde_json::to_string(ecosystem)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO ecosystems (id, orchestrator, document, version, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(ecosystem.id.to_string())
        .bind(ecosystem.orchestrator.to_string())
        .bind(document)
        .bind(ecosystem.version)
        .bind(ecosystem.updated_at)
        .execute(&mut *tx)
        .await?;

        insert_member_rows(&mut tx, ecosystem).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_ecosystem(&self, id: EcosystemId) -> Result<Option<Ecosystem>> {
        let row = sqlx::query("SELECT document FROM ecosystems WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| decode_document(r.get::<String, _>(0)))
            .transpose()
    }

    /// Compare-and-swap write of the whole aggregate, including the
    /// projection side-table, in one transaction.
    pub async fn update_ecosystem(&self, ecosystem: &Ecosystem) -> Result<bool> {
        let mut next = ecosystem.clone();
        next.version = ecosystem.version + 1;
        let document = serde_json::to_string(&next)?;

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE ecosystems SET document = ?, version = ?, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(document)
        .bind(next.version)
        .bind(next.updated_at)
        .bind(ecosystem.id.to_string())
        .bind(ecosystem.version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM ecosystem_members WHERE ecosystem_id = ?")
            .bind(ecosystem.id.to_string())
            .execute(&mut *tx)
            .await?;
        insert_member_rows(&mut tx, ecosystem).await?;

        tx.commit().await?;
        Ok(true)
    }

    pub async fn delete_ecosystem(&self, id: EcosystemId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM ecosystem_members WHERE ecosystem_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM ecosystems WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(result.rows_affected() == 1)
    }

    /// All ecosystems the participant is involved in: as orchestrator, as a
    /// member, or through a non-rejected invitation or join request.
    pub async fn list_ecosystems_for(&self, participant: ParticipantId) -> Result<Vec<Ecosystem>> {
        let rows = sqlx::query(
            r#"
            SELECT document FROM ecosystems e
            WHERE e.orchestrator = ?
               OR EXISTS (
                    SELECT 1 FROM ecosystem_members m
                    WHERE m.ecosystem_id = e.id
                      AND m.participant = ?
                      AND (m.kind = 'participant' OR m.status != 'Rejected')
                  )
            ORDER BY e.updated_at DESC
            "#,
        )
        .bind(participant.to_string())
        .bind(participant.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| decode_document(r.get::<String, _>(0)))
            .collect()
    }

    /// Ecosystems holding an invitation (any status) for the participant.
    pub async fn list_ecosystems_with_invitation_for(
        &self,
        participant: ParticipantId,
    ) -> Result<Vec<Ecosystem>> {
        let rows = sqlx::query(
            r#"
            SELECT document FROM ecosystems e
            WHERE EXISTS (
                SELECT 1 FROM ecosystem_members m
                WHERE m.ecosystem_id = e.id
                  AND m.participant = ?
                  AND m.kind = 'invitation'
            )
            ORDER BY e.updated_at DESC
            "#,
        )
        .bind(participant.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| decode_document(r.get::<String, _>(0)))
            .collect()
    }
}

fn decode_document<T: serde::de::DeserializeOwned>(document: String) -> Result<T> {
    Ok(serde_json::from_str(&document)?)
}

async fn insert_member_rows(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    ecosystem: &Ecosystem,
) -> Result<()> {
    let lists: [(&str, &[MembershipEntry]); 3] = [
        ("participant", &ecosystem.participants),
        ("invitation", &ecosystem.invitations),
        ("join_request", &ecosystem.join_requests),
    ];

    for (kind, entries) in lists {
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO ecosystem_members (ecosystem_id, participant, kind, status)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(ecosystem.id.to_string())
            .bind(entry.participant.to_string())
            .bind(kind)
            .bind(format!("{:?}", entry.status))
            .execute(&mut **tx)
            .await?;
        }
    }

    Ok(())
}
