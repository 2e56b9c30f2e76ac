//! Candidate queries against the asset library.
//!
//! `available_content` implements the ranked-candidate contract: hard
//! filters (analysis, availability, expiry, go-live, FILL paths, exclusions,
//! replay delay) plus a composite priority ordering computed server-side so
//! the builder's local re-scoring starts from a good set.

use crate::data::models::CandidateRow;
use crate::scheduler::rotation::RotationToken;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

/// Reserved pattern marking filler files that must never be scheduled.
const FILL_PATH_PATTERN: &str = "%FILL%";

/// Cap on candidates returned per fetch; enough for variety without paying
/// for the whole library on every slot.
const CANDIDATE_LIMIT: i64 = 200;

/// Parameters for one `available_content` fetch. Delay hours arrive already
/// multiplied by the reduction factor.
#[derive(Debug)]
pub struct ContentQuery<'a> {
    pub token: &'a RotationToken,
    pub exclude_ids: &'a [i32],
    pub compare_date: DateTime<Utc>,
    pub base_delay_hours: f64,
    pub additional_delay_hours: f64,
    pub featured_delay_hours: f64,
    pub ignore_delays: bool,
}

fn push_candidate_select(builder: &mut QueryBuilder<'_, Postgres>) {
    builder.push(
        r#"
        SELECT
            a.id AS asset_id,
            a.guid,
            i.id AS instance_id,
            a.content_type,
            a.content_title,
            a.duration_seconds,
            a.duration_category,
            a.engagement_score,
            a.theme,
            a.meeting_date,
            i.file_name,
            i.file_path,
            i.encoded_date,
            sm.last_scheduled_date,
            COALESCE(sm.total_airings, 0) AS total_airings,
            COALESCE(sm.featured, FALSE) AS featured,
            sm.content_expiry_date,
            sm.go_live_date
        FROM assets a
        JOIN instances i ON a.id = i.asset_id AND i.is_primary = TRUE
        LEFT JOIN scheduling_metadata sm ON a.id = sm.asset_id
        WHERE a.analysis_completed = TRUE
        "#,
    );
}

fn push_token_filter(builder: &mut QueryBuilder<'_, Postgres>, token: &RotationToken) {
    match token {
        RotationToken::Category(category) => {
            builder.push(" AND a.duration_category = ");
            builder.push_bind(category.as_str());
        }
        RotationToken::ContentType(ty) => {
            builder.push(" AND lower(a.content_type) = ");
            builder.push_bind(ty.clone());
        }
    }
}

fn push_window_filters(builder: &mut QueryBuilder<'_, Postgres>, compare_date: DateTime<Utc>) {
    builder.push(" AND COALESCE(sm.available_for_scheduling, TRUE) = TRUE");
    builder.push(" AND (sm.content_expiry_date IS NULL OR sm.content_expiry_date > ");
    builder.push_bind(compare_date);
    builder.push(") AND (sm.go_live_date IS NULL OR sm.go_live_date <= ");
    builder.push_bind(compare_date);
    builder.push(") AND i.file_path NOT LIKE ");
    builder.push_bind(FILL_PATH_PATTERN);
}

fn push_exclusions(builder: &mut QueryBuilder<'_, Postgres>, exclude_ids: &[i32]) {
    if !exclude_ids.is_empty() {
        builder.push(" AND NOT (a.id = ANY(");
        builder.push_bind(exclude_ids.to_vec());
        builder.push("))");
    }
}

/// Ranked candidates for a rotation token.
pub async fn available_content(
    pool: &PgPool,
    query: &ContentQuery<'_>,
) -> Result<Vec<CandidateRow>, sqlx::Error> {
    let compare = query.compare_date;
    let mut builder = QueryBuilder::new("");
    push_candidate_select(&mut builder);
    push_token_filter(&mut builder, query.token);
    push_window_filters(&mut builder, compare);

    if !query.ignore_delays {
        // Eligible when never scheduled, scheduled in the future relative to
        // the build date, or past the required replay delay. Featured assets
        // use the featured spacing instead of the category delay.
        builder.push(
            " AND (sm.last_scheduled_date IS NULL OR sm.last_scheduled_date > ",
        );
        builder.push_bind(compare);
        builder.push(" OR EXTRACT(EPOCH FROM (");
        builder.push_bind(compare);
        builder.push(
            " - sm.last_scheduled_date)) / 3600 >= CASE WHEN COALESCE(sm.featured, FALSE) THEN ",
        );
        builder.push_bind(query.featured_delay_hours);
        builder.push(" ELSE (");
        builder.push_bind(query.base_delay_hours);
        builder.push(" + COALESCE(sm.total_airings, 0) * ");
        builder.push_bind(query.additional_delay_hours);
        builder.push(") END)");
    }

    push_exclusions(&mut builder, query.exclude_ids);

    // Composite priority: freshness 0.35, engagement 0.25, inverse airings
    // 0.20, time since last scheduled 0.20. Ties broken toward the least
    // recently scheduled, then a random jitter.
    builder.push(" ORDER BY (CASE WHEN i.encoded_date IS NULL THEN 0 WHEN i.encoded_date >= ");
    builder.push_bind(compare);
    builder.push(" THEN 100 WHEN i.encoded_date >= ");
    builder.push_bind(compare - Duration::days(1));
    builder.push(" THEN 90 WHEN i.encoded_date >= ");
    builder.push_bind(compare - Duration::days(3));
    builder.push(" THEN 80 WHEN i.encoded_date >= ");
    builder.push_bind(compare - Duration::days(7));
    builder.push(" THEN 60 WHEN i.encoded_date >= ");
    builder.push_bind(compare - Duration::days(14));
    builder.push(" THEN 40 WHEN i.encoded_date >= ");
    builder.push_bind(compare - Duration::days(30));
    builder.push(" THEN 20 ELSE 10 END * 0.35");
    builder.push(" + COALESCE(a.engagement_score, 50) * 0.25");
    builder.push(
        " + CASE WHEN COALESCE(sm.total_airings, 0) = 0 THEN 100 \
           WHEN sm.total_airings <= 2 THEN 80 \
           WHEN sm.total_airings <= 5 THEN 60 \
           WHEN sm.total_airings <= 10 THEN 40 \
           WHEN sm.total_airings <= 20 THEN 20 \
           ELSE 10 END * 0.20",
    );
    builder.push(" + CASE WHEN sm.last_scheduled_date IS NULL THEN 100 WHEN EXTRACT(EPOCH FROM (");
    builder.push_bind(compare);
    builder.push(
        " - sm.last_scheduled_date)) / 3600 >= 24 THEN 100 \
           WHEN EXTRACT(EPOCH FROM (",
    );
    builder.push_bind(compare);
    builder.push(
        " - sm.last_scheduled_date)) / 3600 >= 12 THEN 80 \
           WHEN EXTRACT(EPOCH FROM (",
    );
    builder.push_bind(compare);
    builder.push(
        " - sm.last_scheduled_date)) / 3600 >= 6 THEN 60 \
           WHEN EXTRACT(EPOCH FROM (",
    );
    builder.push_bind(compare);
    builder.push(
        " - sm.last_scheduled_date)) / 3600 >= 3 THEN 40 \
           WHEN EXTRACT(EPOCH FROM (",
    );
    builder.push_bind(compare);
    builder.push(" - sm.last_scheduled_date)) / 3600 >= 1 THEN 20 ELSE 0 END * 0.20) DESC");
    builder.push(
        ", sm.last_scheduled_date ASC NULLS FIRST\
         , sm.total_airings ASC NULLS FIRST\
         , i.encoded_date DESC NULLS LAST\
         , RANDOM() LIMIT ",
    );
    builder.push_bind(CANDIDATE_LIMIT);

    builder.build_query_as::<CandidateRow>().fetch_all(pool).await
}

/// Featured-eligible candidates: configured featurable types plus manually
/// flagged assets, ordered least-recently-scheduled first, then engagement.
pub async fn featured_content(
    pool: &PgPool,
    featurable_types: &[String],
    exclude_ids: &[i32],
    compare_date: DateTime<Utc>,
) -> Result<Vec<CandidateRow>, sqlx::Error> {
    let mut builder = QueryBuilder::new("");
    push_candidate_select(&mut builder);
    push_window_filters(&mut builder, compare_date);

    let types_upper: Vec<String> = featurable_types.iter().map(|t| t.to_uppercase()).collect();
    builder.push(" AND (COALESCE(sm.featured, FALSE) = TRUE");
    if !types_upper.is_empty() {
        builder.push(" OR upper(a.content_type) = ANY(");
        builder.push_bind(types_upper);
        builder.push(")");
    }
    builder.push(")");

    push_exclusions(&mut builder, exclude_ids);

    builder.push(
        " ORDER BY sm.last_scheduled_date ASC NULLS FIRST\
         , a.engagement_score DESC NULLS LAST\
         , RANDOM()",
    );

    builder.build_query_as::<CandidateRow>().fetch_all(pool).await
}

/// Ids of every valid asset in a category/type for the build date, used by
/// the category-reset check. Expiry and go-live are respected; replay delays
/// are not.
pub async fn category_asset_ids(
    pool: &PgPool,
    token: &RotationToken,
    compare_date: DateTime<Utc>,
) -> Result<Vec<i32>, sqlx::Error> {
    let mut builder = QueryBuilder::new(
        r#"
        SELECT a.id
        FROM assets a
        LEFT JOIN scheduling_metadata sm ON a.id = sm.asset_id
        WHERE a.analysis_completed = TRUE
        "#,
    );
    push_token_filter(&mut builder, token);
    builder.push(" AND (sm.content_expiry_date IS NULL OR sm.content_expiry_date > ");
    builder.push_bind(compare_date);
    builder.push(") AND (sm.go_live_date IS NULL OR sm.go_live_date <= ");
    builder.push_bind(compare_date);
    builder.push(")");

    let rows: Vec<(i32,)> = builder.build_query_as().fetch_all(pool).await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Clear `last_scheduled_date` for the given assets so they become
/// immediately eligible again. Returns the number of rows touched.
pub async fn reset_category_delays(pool: &PgPool, asset_ids: &[i32]) -> Result<u64, sqlx::Error> {
    if asset_ids.is_empty() {
        return Ok(0);
    }
    let result = sqlx::query(
        "UPDATE scheduling_metadata SET last_scheduled_date = NULL WHERE asset_id = ANY($1)",
    )
    .bind(asset_ids.to_vec())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Upsert scheduling metadata after a placement: stamp the air time and
/// increment `total_airings` so later slots in the same run see it.
pub async fn mark_asset_scheduled(
    pool: &PgPool,
    asset_id: i32,
    air_time: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO scheduling_metadata (asset_id, last_scheduled_date, total_airings)
        VALUES ($1, $2, 1)
        ON CONFLICT (asset_id) DO UPDATE SET
            last_scheduled_date = EXCLUDED.last_scheduled_date,
            total_airings = scheduling_metadata.total_airings + 1
        "#,
    )
    .bind(asset_id)
    .bind(air_time)
    .execute(pool)
    .await?;
    Ok(())
}
