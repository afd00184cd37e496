#![allow(dead_code, clippy::unwrap_used)]

use std::{
    collections::{HashMap, hash_map::Entry},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, Response},
};
use slugline::{
    api::{self, AppState},
    url_repo::{InsertMappingError, Mapping, UrlRepository},
    url_service::{ShortenerSettings, new_url_service},
};
use tower::ServiceExt;

pub const HOST: &str = "https://sl.ug";

/// Keeps mappings in memory, enforcing slug uniqueness on insert.
#[derive(Default)]
pub struct MemoryUrlRepository {
    mappings: Mutex<HashMap<String, Mapping>>,
    /// When set, `slug_exists` always answers `false` so only the insert guards uniqueness.
    skip_existence_check: bool,
}

impl MemoryUrlRepository {
    pub fn without_existence_check() -> Self {
        Self {
            skip_existence_check: true,
            ..Self::default()
        }
    }

    pub fn with_slugs(slugs: impl IntoIterator<Item = String>) -> Self {
        let repo = Self::default();
        for slug in slugs {
            let mapping = Mapping::new(slug, "https://example.com/seed".to_owned(), HOST);
            repo.mappings
                .lock()
                .unwrap()
                .insert(mapping.slug.clone(), mapping);
        }
        repo
    }

    /// Stores `original_url` under `slug` as-is, skipping any validation.
    pub fn with_mapping(slug: &str, original_url: &str) -> Self {
        let repo = Self::default();
        let mapping = Mapping::new(slug.to_owned(), original_url.to_owned(), HOST);
        repo.mappings
            .lock()
            .unwrap()
            .insert(mapping.slug.clone(), mapping);
        repo
    }

    pub fn len(&self) -> usize {
        self.mappings.lock().unwrap().len()
    }
}

#[async_trait]
impl UrlRepository for MemoryUrlRepository {
    async fn slug_exists(&self, slug: &str) -> anyhow::Result<bool> {
        if self.skip_existence_check {
            return Ok(false);
        }
        Ok(self.mappings.lock().unwrap().contains_key(slug))
    }

    async fn insert_mapping(&self, mapping: Mapping) -> Result<Mapping, InsertMappingError> {
        match self.mappings.lock().unwrap().entry(mapping.slug.clone()) {
            Entry::Occupied(_) => Err(InsertMappingError::DuplicateSlug(mapping.slug)),
            Entry::Vacant(vacant) => Ok(vacant.insert(mapping).clone()),
        }
    }

    async fn find_by_slug(&self, slug: &str) -> anyhow::Result<Option<Mapping>> {
        Ok(self.mappings.lock().unwrap().get(slug).cloned())
    }
}

/// Finds every slug free but fails every insert.
pub struct FailingInsertUrlRepository;

#[async_trait]
impl UrlRepository for FailingInsertUrlRepository {
    async fn slug_exists(&self, _slug: &str) -> anyhow::Result<bool> {
        Ok(false)
    }

    async fn insert_mapping(&self, _mapping: Mapping) -> Result<Mapping, InsertMappingError> {
        Err(InsertMappingError::Internal(anyhow::anyhow!(
            "connection reset by peer"
        )))
    }

    async fn find_by_slug(&self, _slug: &str) -> anyhow::Result<Option<Mapping>> {
        Ok(None)
    }
}

/// Never answers within any reasonable deadline.
pub struct StalledUrlRepository;

#[async_trait]
impl UrlRepository for StalledUrlRepository {
    async fn slug_exists(&self, _slug: &str) -> anyhow::Result<bool> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(false)
    }

    async fn insert_mapping(&self, mapping: Mapping) -> Result<Mapping, InsertMappingError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(mapping)
    }

    async fn find_by_slug(&self, _slug: &str) -> anyhow::Result<Option<Mapping>> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(None)
    }
}

pub fn app<R: UrlRepository + 'static>(url_repo: Arc<R>, settings: ShortenerSettings) -> Router {
    api::router(AppState {
        url_service: new_url_service(url_repo, HOST.to_owned(), settings),
        url_host: HOST.to_owned(),
    })
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
