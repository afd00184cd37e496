use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use rearch::CapsuleHandle;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, DbConn, DbErr, EntityTrait, SqlErr};
use thiserror::Error;
use tracing::instrument;

use crate::{config::db_conn_capsule, orm::short_url};

/// A persisted slug to URL mapping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mapping {
    pub slug: String,
    pub original_url: String,
    /// Denormalized `host + "/" + slug`; recomputable from the other fields.
    pub short_url: String,
}

impl Mapping {
    #[must_use]
    pub fn new(slug: String, original_url: String, host: &str) -> Self {
        let short_url = format!("{}/{slug}", host.trim_end_matches('/'));
        Self {
            slug,
            original_url,
            short_url,
        }
    }
}

#[derive(Debug, Error)]
pub enum InsertMappingError {
    #[error("slug {0} is already taken")]
    DuplicateSlug(String),
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error),
}

pub fn url_repository_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn UrlRepository> {
    let db = get.as_ref(db_conn_capsule).clone();
    Arc::new(UrlRepositoryImpl { db })
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UrlRepository: Send + Sync {
    async fn slug_exists(&self, slug: &str) -> anyhow::Result<bool>;

    /// Inserts a brand new [`Mapping`].
    ///
    /// The store enforces slug uniqueness itself, so a concurrent writer that
    /// claimed the same slug first surfaces as [`InsertMappingError::DuplicateSlug`].
    async fn insert_mapping(&self, mapping: Mapping) -> Result<Mapping, InsertMappingError>;

    async fn find_by_slug(&self, slug: &str) -> anyhow::Result<Option<Mapping>>;
}

struct UrlRepositoryImpl {
    db: DbConn,
}

#[async_trait]
impl UrlRepository for UrlRepositoryImpl {
    #[instrument(skip(self))]
    async fn slug_exists(&self, slug: &str) -> anyhow::Result<bool> {
        Ok(short_url::Entity::find_by_id(slug)
            .one(&self.db)
            .await
            .context("Failed to check slug existence")?
            .is_some())
    }

    #[instrument(skip(self))]
    async fn insert_mapping(&self, mapping: Mapping) -> Result<Mapping, InsertMappingError> {
        let slug = mapping.slug.clone();
        let to_insert = short_url::ActiveModel {
            slug: Set(mapping.slug),
            original_url: Set(mapping.original_url),
            short_url: Set(mapping.short_url),
        };

        match to_insert.insert(&self.db).await {
            Ok(model) => Ok(model.into()),
            Err(err) if is_unique_violation(&err) => Err(InsertMappingError::DuplicateSlug(slug)),
            Err(err) => Err(InsertMappingError::Internal(
                anyhow::Error::new(err).context("Failed to insert mapping"),
            )),
        }
    }

    #[instrument(skip(self))]
    async fn find_by_slug(&self, slug: &str) -> anyhow::Result<Option<Mapping>> {
        Ok(short_url::Entity::find_by_id(slug)
            .one(&self.db)
            .await
            .context("Failed to retrieve mapping")?
            .map(Mapping::from))
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

impl From<short_url::Model> for Mapping {
    fn from(
        short_url::Model {
            slug,
            original_url,
            short_url,
        }: short_url::Model,
    ) -> Self {
        Self {
            slug,
            original_url,
            short_url,
        }
    }
}
