//! Report repository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;

use crate::database::models::{
    EventDbModel, ReportJoinRow, ScheduleDbModel, hydrate_reports,
};
use crate::database::retry::retry_on_sqlite_busy;
use crate::domain::{EventBinding, Report};
use crate::Result;

const REPORT_JOIN: &str = r#"
    SELECT
        r.name          AS report_name,
        r.title         AS report_title,
        r.group_id      AS group_id,
        r.evaluation    AS evaluation,
        r.active        AS active,
        c.uuid          AS card_uuid,
        c.title         AS card_title,
        rc.position     AS card_position,
        rp.id           AS recipient_id,
        rp.kind         AS recipient_kind,
        rp.position     AS recipient_position,
        rp.chat_id      AS chat_id,
        rp.thread_id    AS thread_id,
        rp.remote_path  AS remote_path,
        rp.email_to     AS email_to,
        rp.email_cc     AS email_cc,
        rp.subject_template AS subject_template,
        rp.body_template    AS body_template,
        e.id            AS export_id,
        e.position      AS export_position,
        e.format        AS export_format,
        e.template_body AS template_body,
        e.filename_template AS filename_template,
        e.column_order  AS column_order
    FROM reports r
    LEFT JOIN report_cards rc ON rc.report_name = r.name
    LEFT JOIN cards c ON c.uuid = rc.card_uuid
    LEFT JOIN recipients rp ON rp.report_name = r.name
    LEFT JOIN exports e ON e.report_name = r.name
"#;

/// Read access to schedules, event bindings and report aggregates.
#[async_trait]
pub trait ReportRepository: Send + Sync {
    /// All active schedules.
    async fn load_schedule(&self) -> Result<Vec<ScheduleDbModel>>;

    /// Every event binding of an active report.
    async fn load_all_events(&self) -> Result<Vec<EventBinding>>;

    /// Event bindings of active reports for one event name.
    async fn load_events_by_cron(&self, cron_name: &str) -> Result<Vec<EventBinding>>;

    /// Hydrated reports with the given name (zero or one).
    async fn load_reports_by_name(&self, name: &str) -> Result<Vec<Report>>;

    /// All active hydrated reports.
    async fn load_active_reports(&self) -> Result<Vec<Report>>;
}

/// SQLx implementation of ReportRepository.
pub struct SqlxReportRepository {
    pool: SqlitePool,
}

impl SqlxReportRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Run the hydration join inside one read transaction so that the
    /// aggregate is a consistent snapshot.
    async fn load_reports(&self, filter: &str, bind: Option<&str>) -> Result<Vec<Report>> {
        let sql = format!("{REPORT_JOIN} WHERE {filter} ORDER BY r.name");
        let rows = retry_on_sqlite_busy("load_reports", || async {
            let mut tx = self.pool.begin().await?;
            let mut query = sqlx::query_as::<_, ReportJoinRow>(&sql);
            if let Some(value) = bind {
                query = query.bind(value);
            }
            let rows = query.fetch_all(&mut *tx).await?;
            tx.commit().await?;
            Ok(rows)
        })
        .await?;

        debug!(rows = rows.len(), "Hydrating reports");
        hydrate_reports(rows)
    }
}

#[async_trait]
impl ReportRepository for SqlxReportRepository {
    async fn load_schedule(&self) -> Result<Vec<ScheduleDbModel>> {
        retry_on_sqlite_busy("load_schedule", || async {
            Ok(sqlx::query_as::<_, ScheduleDbModel>(
                "SELECT cron_name, cron_expr FROM schedules WHERE active = 1 ORDER BY cron_name",
            )
            .fetch_all(&self.pool)
            .await?)
        })
        .await
    }

    async fn load_all_events(&self) -> Result<Vec<EventBinding>> {
        let rows = retry_on_sqlite_busy("load_all_events", || async {
            Ok(sqlx::query_as::<_, EventDbModel>(
                r#"
                SELECT ev.cron_name, ev.report_name
                FROM report_events ev
                JOIN reports r ON r.name = ev.report_name
                WHERE r.active = 1
                ORDER BY ev.cron_name, ev.report_name
                "#,
            )
            .fetch_all(&self.pool)
            .await?)
        })
        .await?;
        Ok(rows.into_iter().map(EventBinding::from).collect())
    }

    async fn load_events_by_cron(&self, cron_name: &str) -> Result<Vec<EventBinding>> {
        let rows = retry_on_sqlite_busy("load_events_by_cron", || async {
            Ok(sqlx::query_as::<_, EventDbModel>(
                r#"
                SELECT ev.cron_name, ev.report_name
                FROM report_events ev
                JOIN reports r ON r.name = ev.report_name
                WHERE r.active = 1 AND ev.cron_name = ?
                ORDER BY ev.report_name
                "#,
            )
            .bind(cron_name)
            .fetch_all(&self.pool)
            .await?)
        })
        .await?;
        Ok(rows.into_iter().map(EventBinding::from).collect())
    }

    async fn load_reports_by_name(&self, name: &str) -> Result<Vec<Report>> {
        self.load_reports("r.name = ?", Some(name)).await
    }

    async fn load_active_reports(&self) -> Result<Vec<Report>> {
        self.load_reports("r.active = 1", None).await
    }
}
