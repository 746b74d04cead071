#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use range_shortener::application::services::LinkService;
use range_shortener::domain::allocation::{
    AllocatorOptions, CodeAllocator, CodeSpace, RangeAllocator,
};
use range_shortener::domain::entities::{Link, NewLink};
use range_shortener::domain::repositories::{LinkRepository, RangeLedger};
use range_shortener::error::AppError;
use range_shortener::infrastructure::persistence::MemoryRangeLedger;
use range_shortener::state::AppState;
use serde_json::json;

pub const BASE_URL: &str = "https://s.example.com";

/// Link storage kept in a vector; mirrors the Postgres repository's lookups.
#[derive(Default)]
pub struct InMemoryLinkRepository {
    links: Mutex<Vec<Link>>,
    next_id: AtomicI64,
    offline: AtomicBool,
}

impl InMemoryLinkRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail as if the database were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn insert(&self, code: &str, long_url: &str, expires_at: Option<DateTime<Utc>>) -> Link {
        let link = Link::new(
            self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            code.to_string(),
            long_url.to_string(),
            Utc::now(),
            expires_at,
        );
        self.links.lock().unwrap().push(link.clone());
        link
    }

    pub fn len(&self) -> usize {
        self.links.lock().unwrap().len()
    }

    fn check_online(&self) -> Result<(), AppError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::internal("Database error", json!({})));
        }
        Ok(())
    }
}

#[async_trait]
impl LinkRepository for InMemoryLinkRepository {
    async fn create(&self, new_link: NewLink) -> Result<Link, AppError> {
        self.check_online()?;
        if self
            .links
            .lock()
            .unwrap()
            .iter()
            .any(|l| l.code == new_link.code)
        {
            return Err(AppError::conflict(
                "Unique constraint violation",
                json!({ "constraint": "links_code_key" }),
            ));
        }
        Ok(self.insert(&new_link.code, &new_link.long_url, new_link.expires_at))
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Link>, AppError> {
        self.check_online()?;
        Ok(self
            .links
            .lock()
            .unwrap()
            .iter()
            .find(|l| l.code == code)
            .cloned())
    }

    async fn find_permanent_by_long_url(
        &self,
        long_url: &str,
    ) -> Result<Option<Link>, AppError> {
        self.check_online()?;
        Ok(self
            .links
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|l| l.long_url == long_url && l.expires_at.is_none())
            .cloned())
    }

    async fn ping(&self) -> Result<(), AppError> {
        self.check_online()
    }
}

/// Allocator over a fresh in-memory ledger, seeded like a first deployment.
pub async fn memory_allocator(
    space: CodeSpace,
    options: AllocatorOptions,
) -> (Arc<MemoryRangeLedger>, CodeAllocator) {
    let ledger = Arc::new(MemoryRangeLedger::new());
    let allocator = RangeAllocator::bootstrap(
        ledger.clone() as Arc<dyn RangeLedger>,
        space.size(),
        options,
    )
    .await
    .unwrap();
    (ledger, CodeAllocator::new(allocator, space))
}

pub struct TestApp {
    pub state: AppState,
    pub links: Arc<InMemoryLinkRepository>,
    pub ledger: Arc<MemoryRangeLedger>,
}

/// Application state backed entirely by in-memory storage with the default
/// code space.
pub async fn create_test_app() -> TestApp {
    create_test_app_with(CodeSpace::default(), AllocatorOptions::default(), None).await
}

pub async fn create_test_app_with(
    space: CodeSpace,
    options: AllocatorOptions,
    default_ttl: Option<chrono::Duration>,
) -> TestApp {
    let (ledger, codes) = memory_allocator(space, options).await;
    let codes = Arc::new(codes);
    let links = Arc::new(InMemoryLinkRepository::new());

    let link_service = Arc::new(LinkService::new(
        links.clone(),
        codes.clone(),
        default_ttl,
    ));

    TestApp {
        state: AppState {
            link_service,
            code_allocator: codes,
            base_url: BASE_URL.to_string(),
        },
        links,
        ledger,
    }
}
