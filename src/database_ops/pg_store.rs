use async_trait::async_trait;
use sqlx::Row;
use tracing::instrument;

use super::{Db, StoreError, TableCounts, TargetStore};
use crate::model::{
    DropRecord, ImportBatchRecord, PhotoRecord, PoleRecord, ProjectRecord, StatusHistoryEntry,
};

/// Postgres/PostGIS implementation of [`TargetStore`].
///
/// All statements are sent non-persistent so transaction-mode poolers work.
#[derive(Clone)]
pub struct PgTargetStore {
    db: Db,
}

impl PgTargetStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

const UPSERT_PROJECT: &str = r#"
    INSERT INTO projects (id, name, project_code, created_at, updated_at, metadata)
    VALUES ($1, $2, $3, $4, $5, $6)
    ON CONFLICT (id) DO UPDATE SET
        name = EXCLUDED.name,
        project_code = EXCLUDED.project_code,
        updated_at = EXCLUDED.updated_at,
        metadata = EXCLUDED.metadata
    RETURNING id
"#;

const UPSERT_POLE: &str = r#"
    INSERT INTO poles (
        id, project_id, pole_number, vf_pole_id, status, installation_status,
        quality_checked, quality_check_date, quality_checked_by,
        location, gps_accuracy, zone, pon, distribution_or_feeder,
        contractor_id, contractor_name, working_team,
        date_installed, pole_type, pole_height,
        import_batch_id, onemap_id, onemap_data,
        max_capacity, drop_count,
        created_at, created_by, updated_at, updated_by,
        metadata
    ) VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9,
        CASE WHEN $10::float8 IS NULL OR $11::float8 IS NULL THEN NULL
             ELSE ST_SetSRID(ST_MakePoint($10::float8, $11::float8), 4326)::geography END,
        $12, $13, $14, $15, $16, $17, $18, $19, $20, $21,
        $22, $23, $24, $25, $26, $27, $28, $29, $30, $31
    )
    ON CONFLICT (pole_number) DO UPDATE SET
        project_id = EXCLUDED.project_id,
        vf_pole_id = EXCLUDED.vf_pole_id,
        status = EXCLUDED.status,
        installation_status = EXCLUDED.installation_status,
        quality_checked = EXCLUDED.quality_checked,
        quality_check_date = EXCLUDED.quality_check_date,
        quality_checked_by = EXCLUDED.quality_checked_by,
        location = EXCLUDED.location,
        gps_accuracy = EXCLUDED.gps_accuracy,
        zone = EXCLUDED.zone,
        pon = EXCLUDED.pon,
        distribution_or_feeder = EXCLUDED.distribution_or_feeder,
        contractor_id = EXCLUDED.contractor_id,
        contractor_name = EXCLUDED.contractor_name,
        working_team = EXCLUDED.working_team,
        date_installed = EXCLUDED.date_installed,
        pole_type = EXCLUDED.pole_type,
        pole_height = EXCLUDED.pole_height,
        import_batch_id = EXCLUDED.import_batch_id,
        onemap_id = EXCLUDED.onemap_id,
        onemap_data = EXCLUDED.onemap_data,
        max_capacity = EXCLUDED.max_capacity,
        drop_count = EXCLUDED.drop_count,
        updated_at = EXCLUDED.updated_at,
        updated_by = EXCLUDED.updated_by,
        metadata = EXCLUDED.metadata
    RETURNING id
"#;

const UPSERT_DROP: &str = r#"
    INSERT INTO drops (
        id, project_id, drop_number, pole_id, status,
        property_id, address, customer_name, customer_phone, customer_email,
        distance_to_pole, cable_length, cable_type, ont_serial,
        location,
        signup_date, approval_date, installation_scheduled_date,
        connection_date, activation_date,
        import_batch_id, onemap_id,
        created_at, created_by, updated_at, updated_by,
        metadata
    ) VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
        CASE WHEN $15::float8 IS NULL OR $16::float8 IS NULL THEN NULL
             ELSE ST_SetSRID(ST_MakePoint($15::float8, $16::float8), 4326)::geography END,
        $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28
    )
    ON CONFLICT (drop_number) DO UPDATE SET
        project_id = EXCLUDED.project_id,
        pole_id = EXCLUDED.pole_id,
        status = EXCLUDED.status,
        property_id = EXCLUDED.property_id,
        address = EXCLUDED.address,
        customer_name = EXCLUDED.customer_name,
        customer_phone = EXCLUDED.customer_phone,
        customer_email = EXCLUDED.customer_email,
        distance_to_pole = EXCLUDED.distance_to_pole,
        cable_length = EXCLUDED.cable_length,
        cable_type = EXCLUDED.cable_type,
        ont_serial = EXCLUDED.ont_serial,
        location = EXCLUDED.location,
        signup_date = EXCLUDED.signup_date,
        approval_date = EXCLUDED.approval_date,
        installation_scheduled_date = EXCLUDED.installation_scheduled_date,
        connection_date = EXCLUDED.connection_date,
        activation_date = EXCLUDED.activation_date,
        import_batch_id = EXCLUDED.import_batch_id,
        onemap_id = EXCLUDED.onemap_id,
        updated_at = EXCLUDED.updated_at,
        updated_by = EXCLUDED.updated_by,
        metadata = EXCLUDED.metadata
    RETURNING id
"#;

const UPSERT_STATUS_HISTORY: &str = r#"
    INSERT INTO status_history (
        id, entity_type, entity_id, old_status, new_status,
        changed_by, changed_at, reason, metadata
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
    ON CONFLICT (id) DO UPDATE SET
        old_status = EXCLUDED.old_status,
        new_status = EXCLUDED.new_status,
        changed_by = EXCLUDED.changed_by,
        changed_at = EXCLUDED.changed_at,
        reason = EXCLUDED.reason,
        metadata = EXCLUDED.metadata
    RETURNING id
"#;

const UPSERT_PHOTO: &str = r#"
    INSERT INTO pole_photos (
        id, pole_id, photo_type, storage_url, thumbnail_url,
        file_size, mime_type, uploaded_at, uploaded_by, metadata
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
    ON CONFLICT (pole_id, photo_type) DO UPDATE SET
        storage_url = EXCLUDED.storage_url,
        thumbnail_url = EXCLUDED.thumbnail_url,
        file_size = EXCLUDED.file_size,
        mime_type = EXCLUDED.mime_type,
        uploaded_by = EXCLUDED.uploaded_by,
        metadata = EXCLUDED.metadata
    RETURNING id
"#;

const UPSERT_IMPORT_BATCH: &str = r#"
    INSERT INTO import_batches (
        id, import_type, file_name, file_url, project_id,
        total_records, processed_records, success_count, error_count, duplicate_count,
        status, started_at, completed_at, errors,
        imported_by, imported_at, metadata
    ) VALUES (
        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
        $11, $12, $13, $14, $15, $16, $17
    )
    ON CONFLICT (id) DO UPDATE SET
        import_type = EXCLUDED.import_type,
        file_name = EXCLUDED.file_name,
        file_url = EXCLUDED.file_url,
        project_id = EXCLUDED.project_id,
        total_records = EXCLUDED.total_records,
        processed_records = EXCLUDED.processed_records,
        success_count = EXCLUDED.success_count,
        error_count = EXCLUDED.error_count,
        duplicate_count = EXCLUDED.duplicate_count,
        status = EXCLUDED.status,
        started_at = EXCLUDED.started_at,
        completed_at = EXCLUDED.completed_at,
        errors = EXCLUDED.errors,
        imported_by = EXCLUDED.imported_by,
        metadata = EXCLUDED.metadata
    RETURNING id
"#;

const RECOMPUTE_DROP_COUNTS: &str = r#"
    UPDATE poles p
    SET drop_count = (
        SELECT COUNT(*)
        FROM drops d
        WHERE d.pole_id = p.id
    )
"#;

const ROW_COUNTS: &str = r#"
    SELECT
        (SELECT COUNT(*) FROM projects) AS projects,
        (SELECT COUNT(*) FROM poles) AS poles,
        (SELECT COUNT(*) FROM drops) AS drops,
        (SELECT COUNT(*) FROM status_history) AS status_history,
        (SELECT COUNT(*) FROM pole_photos) AS pole_photos,
        (SELECT COUNT(*) FROM import_batches) AS import_batches
"#;

#[async_trait]
impl TargetStore for PgTargetStore {
    #[instrument(skip(self))]
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .persistent(false)
            .execute(&self.db.pool)
            .await?;
        Ok(())
    }

    async fn upsert_project(&self, p: &ProjectRecord) -> Result<String, StoreError> {
        let id: String = sqlx::query_scalar(UPSERT_PROJECT)
            .persistent(false)
            .bind(&p.id)
            .bind(&p.name)
            .bind(&p.code)
            .bind(p.created_at)
            .bind(p.updated_at)
            .bind(p.envelope.to_json())
            .fetch_one(&self.db.pool)
            .await?;
        Ok(id)
    }

    async fn upsert_pole(&self, id: &str, p: &PoleRecord) -> Result<String, StoreError> {
        let id: String = sqlx::query_scalar(UPSERT_POLE)
            .persistent(false)
            .bind(id)
            .bind(&p.project_id)
            .bind(&p.pole_number)
            .bind(&p.alternate_id)
            .bind(p.status.as_str())
            .bind(&p.installation_status)
            .bind(p.quality_checked)
            .bind(p.quality_check_date)
            .bind(&p.quality_checked_by)
            .bind(p.location.map(|g| g.longitude))
            .bind(p.location.map(|g| g.latitude))
            .bind(p.gps_accuracy)
            .bind(&p.zone)
            .bind(&p.pon)
            .bind(&p.distribution_or_feeder)
            .bind(&p.contractor_id)
            .bind(&p.contractor_name)
            .bind(&p.working_team)
            .bind(p.date_installed)
            .bind(&p.pole_type)
            .bind(&p.pole_height)
            .bind(&p.import_batch_id)
            .bind(&p.onemap_id)
            .bind(&p.onemap_data)
            .bind(p.max_capacity)
            .bind(p.drop_count)
            .bind(p.created_at)
            .bind(&p.created_by)
            .bind(p.updated_at)
            .bind(&p.updated_by)
            .bind(p.envelope.to_json())
            .fetch_one(&self.db.pool)
            .await?;
        Ok(id)
    }

    async fn upsert_drop(
        &self,
        id: &str,
        d: &DropRecord,
        pole_id: Option<&str>,
    ) -> Result<String, StoreError> {
        let id: String = sqlx::query_scalar(UPSERT_DROP)
            .persistent(false)
            .bind(id)
            .bind(&d.project_id)
            .bind(&d.drop_number)
            .bind(pole_id)
            .bind(d.status.as_str())
            .bind(&d.property_id)
            .bind(&d.address)
            .bind(&d.customer_name)
            .bind(&d.customer_phone)
            .bind(&d.customer_email)
            .bind(d.distance_to_pole)
            .bind(d.cable_length)
            .bind(&d.cable_type)
            .bind(&d.ont_serial)
            .bind(d.location.map(|g| g.longitude))
            .bind(d.location.map(|g| g.latitude))
            .bind(d.signup_date)
            .bind(d.approval_date)
            .bind(d.installation_scheduled_date)
            .bind(d.connection_date)
            .bind(d.activation_date)
            .bind(&d.import_batch_id)
            .bind(&d.onemap_id)
            .bind(d.created_at)
            .bind(&d.created_by)
            .bind(d.updated_at)
            .bind(&d.updated_by)
            .bind(d.envelope.to_json())
            .fetch_one(&self.db.pool)
            .await?;
        Ok(id)
    }

    async fn upsert_status_history(
        &self,
        e: &StatusHistoryEntry,
    ) -> Result<String, StoreError> {
        let id: String = sqlx::query_scalar(UPSERT_STATUS_HISTORY)
            .persistent(false)
            .bind(&e.id)
            .bind(e.parent_kind.as_str())
            .bind(&e.parent_id)
            .bind(&e.change.old_status)
            .bind(&e.change.new_status)
            .bind(&e.change.changed_by)
            .bind(e.change.changed_at)
            .bind(&e.change.reason)
            .bind(&e.change.metadata)
            .fetch_one(&self.db.pool)
            .await?;
        Ok(id)
    }

    async fn upsert_photo(&self, ph: &PhotoRecord) -> Result<String, StoreError> {
        let u = &ph.upload;
        let id: String = sqlx::query_scalar(UPSERT_PHOTO)
            .persistent(false)
            .bind(&ph.id)
            .bind(&ph.pole_id)
            .bind(u.category.as_str())
            .bind(&u.storage_url)
            .bind(&u.thumbnail_url)
            .bind(u.file_size)
            .bind(&u.mime_type)
            .bind(u.uploaded_at)
            .bind(&u.uploaded_by)
            .bind(&u.metadata)
            .fetch_one(&self.db.pool)
            .await?;
        Ok(id)
    }

    async fn upsert_import_batch(&self, b: &ImportBatchRecord) -> Result<String, StoreError> {
        let id: String = sqlx::query_scalar(UPSERT_IMPORT_BATCH)
            .persistent(false)
            .bind(&b.id)
            .bind(b.import_type.as_str())
            .bind(&b.file_name)
            .bind(&b.file_url)
            .bind(&b.project_id)
            .bind(b.total_records)
            .bind(b.processed_records)
            .bind(b.success_count)
            .bind(b.error_count)
            .bind(b.duplicate_count)
            .bind(&b.status)
            .bind(b.started_at)
            .bind(b.completed_at)
            .bind(&b.errors)
            .bind(&b.imported_by)
            .bind(b.imported_at)
            .bind(b.envelope.to_json())
            .fetch_one(&self.db.pool)
            .await?;
        Ok(id)
    }

    async fn find_pole_id(&self, pole_number: &str) -> Result<Option<String>, StoreError> {
        let id: Option<String> =
            sqlx::query_scalar("SELECT id FROM poles WHERE pole_number = $1 LIMIT 1")
                .persistent(false)
                .bind(pole_number)
                .fetch_optional(&self.db.pool)
                .await?;
        Ok(id)
    }

    async fn recompute_drop_counts(&self) -> Result<u64, StoreError> {
        let res = sqlx::query(RECOMPUTE_DROP_COUNTS)
            .persistent(false)
            .execute(&self.db.pool)
            .await?;
        Ok(res.rows_affected())
    }

    async fn row_counts(&self) -> Result<TableCounts, StoreError> {
        let row = sqlx::query(ROW_COUNTS)
            .persistent(false)
            .fetch_one(&self.db.pool)
            .await?;
        Ok(TableCounts {
            projects: row.try_get("projects")?,
            poles: row.try_get("poles")?,
            drops: row.try_get("drops")?,
            status_history: row.try_get("status_history")?,
            pole_photos: row.try_get("pole_photos")?,
            import_batches: row.try_get("import_batches")?,
        })
    }
}
