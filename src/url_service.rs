use std::{num::NonZeroU32, sync::Arc, time::Duration};

use async_trait::async_trait;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rearch::CapsuleHandle;
use serde::Serialize;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{instrument, warn};
use url::Url;

use crate::{
    config::{shortener_settings_capsule, url_host_capsule},
    slug::{AllocationError, SlugAllocator},
    url_repo::{InsertMappingError, Mapping, UrlRepository, url_repository_capsule},
};

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct ShortenedUrl {
    #[serde(skip)]
    pub slug: String,
    pub original_url: String,
    pub short_url: String,
}

#[derive(Debug)]
pub struct Redirect {
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShortenerSettings {
    pub allocator: SlugAllocator,
    /// Rounds of allocate-then-insert before giving up on duplicate slugs.
    pub insert_attempts: NonZeroU32,
    pub deadline: Duration,
}

const INSERT_ATTEMPTS: NonZeroU32 = match NonZeroU32::new(3) {
    Some(attempts) => attempts,
    None => unreachable!(),
};

impl Default for ShortenerSettings {
    fn default() -> Self {
        Self {
            allocator: SlugAllocator::default(),
            insert_attempts: INSERT_ATTEMPTS,
            deadline: Duration::from_secs(5),
        }
    }
}

pub fn url_service_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> Arc<dyn UrlService> {
    let url_repo = Arc::clone(get.as_ref(url_repository_capsule));
    let host = get.as_ref(url_host_capsule).clone();
    let settings = get.as_ref(shortener_settings_capsule).clone();
    new_url_service(url_repo, host, settings)
}

#[must_use]
pub fn new_url_service(
    url_repo: Arc<dyn UrlRepository>,
    host: String,
    settings: ShortenerSettings,
) -> Arc<dyn UrlService> {
    Arc::new(UrlServiceImpl {
        url_repo,
        host,
        settings,
    })
}

#[async_trait]
pub trait UrlService: Send + Sync {
    async fn get_url(&self, slug: &str) -> Result<Redirect, GetUrlError>;
    async fn create_url(&self, url: &str) -> Result<ShortenedUrl, CreateUrlError>;
}

#[derive(Debug, Error)]
pub enum GetUrlError {
    #[error("Unable to locate a url with that slug")]
    NotFound,
    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error),
}

#[derive(Debug, Error)]
pub enum CreateUrlError {
    #[error("Invalid URL Format")]
    InvalidUrl,
    #[error("exhausted slug allocation attempts")]
    AllocationExhausted,
    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error), // NOTE: no #[from] so we have to be explicit
}

/// Whether `input` is an absolute URL whose host contains at least one `.`.
///
/// The scheme itself is not restricted. Control characters are rejected even
/// though the URL parser strips some of them, since the raw input is what
/// ends up in the `Location` header.
#[must_use]
pub fn is_valid_url(input: &str) -> bool {
    !input.chars().any(char::is_control)
        && Url::parse(input).is_ok_and(|url| url.host_str().is_some_and(|host| host.contains('.')))
}

struct UrlServiceImpl {
    url_repo: Arc<dyn UrlRepository>,
    host: String,
    settings: ShortenerSettings,
}

#[async_trait]
impl UrlService for UrlServiceImpl {
    #[instrument(skip(self))]
    async fn get_url(&self, slug: &str) -> Result<Redirect, GetUrlError> {
        let deadline = self.settings.deadline;
        match timeout(deadline, self.url_repo.find_by_slug(slug)).await {
            Ok(Ok(Some(mapping))) => Ok(Redirect {
                url: mapping.original_url,
            }),
            Ok(Ok(None)) => Err(GetUrlError::NotFound),
            Ok(Err(err)) => Err(GetUrlError::Internal(err)),
            Err(_) => Err(GetUrlError::DeadlineExceeded(deadline)),
        }
    }

    #[instrument(skip(self))]
    async fn create_url(&self, url: &str) -> Result<ShortenedUrl, CreateUrlError> {
        if !is_valid_url(url) {
            return Err(CreateUrlError::InvalidUrl);
        }

        let mut rng = StdRng::from_os_rng();
        let deadline = self.settings.deadline;
        timeout(deadline, self.allocate_and_insert(&mut rng, url))
            .await
            .unwrap_or(Err(CreateUrlError::DeadlineExceeded(deadline)))
    }
}

impl UrlServiceImpl {
    /// Allocates a slug and inserts the mapping, starting over whenever the
    /// insert reports that a concurrent writer claimed the slug first.
    async fn allocate_and_insert<R: Rng + Send>(
        &self,
        rng: &mut R,
        url: &str,
    ) -> Result<ShortenedUrl, CreateUrlError> {
        for attempt in 0..self.settings.insert_attempts.get() {
            let slug = self
                .settings
                .allocator
                .generate_unique_slug(rng, self.url_repo.as_ref())
                .await
                .map_err(|err| match err {
                    AllocationError::Exhausted { attempts } => {
                        warn!(attempts, "Exhausted slug allocation attempts");
                        CreateUrlError::AllocationExhausted
                    }
                    AllocationError::Storage(err) => CreateUrlError::Internal(err),
                })?;

            match self
                .url_repo
                .insert_mapping(Mapping::new(slug, url.to_owned(), &self.host))
                .await
            {
                Ok(mapping) => return Ok(mapping.into()),
                Err(InsertMappingError::DuplicateSlug(slug)) => {
                    warn!(attempt, slug, "Slug was claimed before it could be inserted");
                }
                Err(InsertMappingError::Internal(err)) => {
                    return Err(CreateUrlError::Internal(
                        err.context("Failed to persist new mapping"),
                    ));
                }
            }
        }

        Err(CreateUrlError::AllocationExhausted)
    }
}

impl From<Mapping> for ShortenedUrl {
    fn from(
        Mapping {
            slug,
            original_url,
            short_url,
        }: Mapping,
    ) -> Self {
        Self {
            slug,
            original_url,
            short_url,
        }
    }
}
