//! Preference repository trait and implementation

use crate::db::CacheDatabase;
use crate::error::Result;
use crate::models::UserPreference;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{query, Row, SqliteExecutor};
use std::sync::Arc;

/// One preference record per user. Upsert-only.
#[async_trait]
pub trait PreferenceRepository: Send + Sync {
    async fn upsert(&self, preference: &UserPreference) -> Result<()>;

    async fn find_by_user(&self, user_id: &str) -> Result<Option<UserPreference>>;
}

pub struct SqlitePreferenceRepository {
    db: Arc<CacheDatabase>,
}

impl SqlitePreferenceRepository {
    pub fn new(db: Arc<CacheDatabase>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PreferenceRepository for SqlitePreferenceRepository {
    async fn upsert(&self, preference: &UserPreference) -> Result<()> {
        self.db
            .with_deadline("preferences.put", async {
                let pool = self.db.session().await?;
                write_preference(&*pool, preference).await
            })
            .await
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Option<UserPreference>> {
        self.db
            .with_deadline("preferences.get", async {
                let pool = self.db.session().await?;
                let row = query("SELECT * FROM preferences WHERE user_id = ?")
                    .bind(user_id)
                    .fetch_optional(&*pool)
                    .await?;

                row.as_ref().map(preference_from_row).transpose()
            })
            .await
    }
}

pub(crate) async fn write_preference<'e, E>(executor: E, preference: &UserPreference) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    query(
        r#"
        INSERT INTO preferences (user_id, theme, font_size, default_key, notation, last_sync)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id) DO UPDATE SET
            theme = excluded.theme,
            font_size = excluded.font_size,
            default_key = excluded.default_key,
            notation = excluded.notation,
            last_sync = excluded.last_sync
        "#,
    )
    .bind(&preference.user_id)
    .bind(preference.theme.as_str())
    .bind(preference.font_size.as_str())
    .bind(&preference.default_key)
    .bind(preference.notation.as_str())
    .bind(preference.last_sync)
    .execute(executor)
    .await?;
    Ok(())
}

fn preference_from_row(row: &SqliteRow) -> Result<UserPreference> {
    let theme: String = row.try_get("theme")?;
    let font_size: String = row.try_get("font_size")?;
    let notation: String = row.try_get("notation")?;

    Ok(UserPreference {
        user_id: row.try_get("user_id")?,
        theme: theme.parse()?,
        font_size: font_size.parse()?,
        default_key: row.try_get("default_key")?,
        notation: notation.parse()?,
        last_sync: row.try_get("last_sync")?,
    })
}
