//! Page-fetch capability and repository-style store interfaces.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use gacha_core::{Product, RunStatus, ScrapeLog, SiteConfig};
use reqwest::StatusCode;
use scraper::{Html, Selector};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "gacha-storage";

// ---------------------------------------------------------------------------
// Fetch capability
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("session init failed: {0}")]
    Session(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

/// Transport settings for one fetch session. `timeout` is the hard
/// wall-clock cap on a single page load.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// One element of a rendered page snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageElement {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
}

impl PageElement {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Owned snapshot of a fetched document: element list for tag queries plus
/// the full visible text. Extracted eagerly so nothing borrowed from the
/// parser survives past the fetch call.
#[derive(Debug, Clone, Default)]
pub struct PageDom {
    elements: Vec<PageElement>,
    body_text: String,
}

impl PageDom {
    pub fn parse(html: &str) -> Self {
        let document = Html::parse_document(html);
        let all = Selector::parse("*").expect("`*` is a valid selector");
        let elements = document
            .select(&all)
            .map(|node| PageElement {
                tag: node.value().name().to_ascii_lowercase(),
                attrs: node
                    .value()
                    .attrs()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                text: node.text().collect::<String>().trim().to_string(),
            })
            .collect();
        let body_text = document
            .root_element()
            .text()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            elements,
            body_text,
        }
    }

    /// Build a snapshot directly from elements and body text. Intended for
    /// canned fixtures in tests.
    pub fn from_parts(elements: Vec<PageElement>, body_text: impl Into<String>) -> Self {
        Self {
            elements,
            body_text: body_text.into(),
        }
    }

    pub fn find_all(&self, tag: &str) -> impl Iterator<Item = &PageElement> {
        let tag = tag.to_ascii_lowercase();
        self.elements.iter().filter(move |el| el.tag == tag)
    }

    pub fn find(&self, tag: &str) -> Option<&PageElement> {
        self.find_all(tag).next()
    }

    pub fn body_text(&self) -> &str {
        &self.body_text
    }
}

/// A scoped fetch session owned exclusively by one run. Dropped (and thereby
/// released) on every exit path.
#[async_trait]
pub trait PageSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<PageDom, FetchError>;
}

/// Acquires a fresh session at run start. An `open` failure is fatal to the
/// whole run.
#[async_trait]
pub trait PageSessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn PageSession>, FetchError>;
}

pub struct HttpPageSession {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpPageSession {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            debug!(url, attempt, "fetching page");
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        return Ok(resp.text().await?);
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }

        Err(FetchError::Request(
            last_request_error.expect("retry loop captures a request error"),
        ))
    }
}

#[async_trait]
impl PageSession for HttpPageSession {
    async fn navigate(&mut self, url: &str) -> Result<PageDom, FetchError> {
        let body = self.fetch_text(url).await?;
        Ok(PageDom::parse(&body))
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpSessionFactory {
    config: FetchConfig,
}

impl HttpSessionFactory {
    pub fn new(config: FetchConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PageSessionFactory for HttpSessionFactory {
    async fn open(&self) -> Result<Box<dyn PageSession>, FetchError> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(self.config.timeout);
        if let Some(user_agent) = &self.config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder
            .build()
            .map_err(|e| FetchError::Session(e.to_string()))?;
        Ok(Box::new(HttpPageSession {
            client,
            backoff: self.config.backoff,
        }))
    }
}

// ---------------------------------------------------------------------------
// Store interfaces
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("{0}")]
    Message(String),
}

#[derive(Debug, Clone, Default)]
pub struct CatalogFilter {
    pub manufacturer: Option<String>,
    pub keyword: Option<String>,
    pub page: usize,
    pub per_page: usize,
}

#[derive(Debug, Clone)]
pub struct CatalogPage {
    pub items: Vec<Product>,
    pub page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Insert-or-update keyed on `product.id`. `created_at` is assigned on
    /// first insert and preserved afterwards; `updated_at` on every write.
    async fn upsert(&self, product: Product) -> Result<Product, StoreError>;

    /// Items whose stored name contains `fragment` as a substring.
    async fn find_by_name_contains(&self, fragment: &str) -> Result<Vec<Product>, StoreError>;

    async fn find_new(&self) -> Result<Vec<Product>, StoreError>;

    async fn set_is_new(&self, id: Uuid, is_new: bool) -> Result<(), StoreError>;

    async fn list(&self, filter: CatalogFilter) -> Result<CatalogPage, StoreError>;
}

#[async_trait]
pub trait SiteConfigStore: Send + Sync {
    async fn find_enabled(&self) -> Result<Vec<SiteConfig>, StoreError>;
    async fn find_all(&self) -> Result<Vec<SiteConfig>, StoreError>;
    async fn find_by_name(&self, site_name: &str) -> Result<Option<SiteConfig>, StoreError>;
    async fn save(&self, config: SiteConfig) -> Result<SiteConfig, StoreError>;
}

#[async_trait]
pub trait RunLogStore: Send + Sync {
    async fn append(&self, log: ScrapeLog) -> Result<(), StoreError>;
    async fn recent(&self, limit: usize) -> Result<Vec<ScrapeLog>, StoreError>;
    async fn by_site(&self, site: &str) -> Result<Vec<ScrapeLog>, StoreError>;
}

fn paginate(items: Vec<Product>, page: usize, per_page: usize) -> CatalogPage {
    let per_page = per_page.max(1);
    let total_items = items.len();
    let total_pages = total_items.max(1).div_ceil(per_page);
    let page = page.clamp(1, total_pages);
    let start = (page - 1) * per_page;
    let items = items.into_iter().skip(start).take(per_page).collect();
    CatalogPage {
        items,
        page,
        total_pages,
        total_items,
    }
}

// ---------------------------------------------------------------------------
// In-memory stores
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryCatalogStore {
    items: RwLock<HashMap<Uuid, Product>>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert records verbatim, timestamps included. Fixture hook for tests
    /// and local bootstrapping.
    pub async fn seed(&self, products: Vec<Product>) {
        let mut items = self.items.write().await;
        for product in products {
            items.insert(product.id, product);
        }
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn upsert(&self, mut product: Product) -> Result<Product, StoreError> {
        let mut items = self.items.write().await;
        let now = Utc::now();
        match items.get(&product.id) {
            Some(existing) => product.created_at = existing.created_at,
            None => product.created_at = now,
        }
        product.updated_at = now;
        items.insert(product.id, product.clone());
        Ok(product)
    }

    async fn find_by_name_contains(&self, fragment: &str) -> Result<Vec<Product>, StoreError> {
        let items = self.items.read().await;
        Ok(items
            .values()
            .filter(|p| p.product_name.contains(fragment))
            .cloned()
            .collect())
    }

    async fn find_new(&self) -> Result<Vec<Product>, StoreError> {
        let items = self.items.read().await;
        Ok(items.values().filter(|p| p.is_new).cloned().collect())
    }

    async fn set_is_new(&self, id: Uuid, is_new: bool) -> Result<(), StoreError> {
        let mut items = self.items.write().await;
        if let Some(product) = items.get_mut(&id) {
            product.is_new = is_new;
            product.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list(&self, filter: CatalogFilter) -> Result<CatalogPage, StoreError> {
        let items = self.items.read().await;
        let mut matched: Vec<Product> = items
            .values()
            .filter(|p| {
                filter
                    .manufacturer
                    .as_deref()
                    .is_none_or(|m| p.manufacturer == m)
            })
            .filter(|p| {
                filter
                    .keyword
                    .as_deref()
                    .is_none_or(|k| p.product_name.contains(k))
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(paginate(matched, filter.page, filter.per_page))
    }
}

#[derive(Default)]
pub struct MemorySiteConfigStore {
    configs: RwLock<HashMap<Uuid, SiteConfig>>,
}

impl MemorySiteConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SiteConfigStore for MemorySiteConfigStore {
    async fn find_enabled(&self) -> Result<Vec<SiteConfig>, StoreError> {
        let configs = self.configs.read().await;
        let mut enabled: Vec<SiteConfig> =
            configs.values().filter(|c| c.enabled).cloned().collect();
        enabled.sort_by(|a, b| a.site_name.cmp(&b.site_name));
        Ok(enabled)
    }

    async fn find_all(&self) -> Result<Vec<SiteConfig>, StoreError> {
        let configs = self.configs.read().await;
        let mut all: Vec<SiteConfig> = configs.values().cloned().collect();
        all.sort_by(|a, b| a.site_name.cmp(&b.site_name));
        Ok(all)
    }

    async fn find_by_name(&self, site_name: &str) -> Result<Option<SiteConfig>, StoreError> {
        let configs = self.configs.read().await;
        Ok(configs.values().find(|c| c.site_name == site_name).cloned())
    }

    async fn save(&self, config: SiteConfig) -> Result<SiteConfig, StoreError> {
        let mut configs = self.configs.write().await;
        configs.insert(config.id, config.clone());
        Ok(config)
    }
}

#[derive(Default)]
pub struct MemoryRunLogStore {
    logs: RwLock<Vec<ScrapeLog>>,
}

impl MemoryRunLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunLogStore for MemoryRunLogStore {
    async fn append(&self, log: ScrapeLog) -> Result<(), StoreError> {
        self.logs.write().await.push(log);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ScrapeLog>, StoreError> {
        let logs = self.logs.read().await;
        let mut sorted: Vec<ScrapeLog> = logs.clone();
        sorted.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        sorted.truncate(limit);
        Ok(sorted)
    }

    async fn by_site(&self, site: &str) -> Result<Vec<ScrapeLog>, StoreError> {
        let logs = self.logs.read().await;
        let mut matched: Vec<ScrapeLog> = logs
            .iter()
            .filter(|l| l.target_site == site)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        Ok(matched)
    }
}

// ---------------------------------------------------------------------------
// Postgres stores
// ---------------------------------------------------------------------------

pub async fn connect_pg(database_url: &str) -> Result<PgPool, StoreError> {
    Ok(PgPool::connect(database_url).await?)
}

/// Create the backing tables when they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS products (
            id UUID PRIMARY KEY,
            product_name TEXT NOT NULL,
            manufacturer TEXT NOT NULL,
            image_url TEXT,
            release_date DATE,
            price INT,
            description TEXT,
            source_url TEXT,
            is_new BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS site_configs (
            id UUID PRIMARY KEY,
            site_name TEXT NOT NULL UNIQUE,
            site_url TEXT NOT NULL,
            cron_expression TEXT,
            enabled BOOLEAN NOT NULL DEFAULT TRUE,
            last_run_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scrape_logs (
            id UUID PRIMARY KEY,
            target_site TEXT NOT NULL,
            status TEXT NOT NULL,
            items_found INT,
            error_message TEXT,
            executed_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

fn product_from_row(row: &PgRow) -> Result<Product, sqlx::Error> {
    Ok(Product {
        id: row.try_get("id")?,
        product_name: row.try_get("product_name")?,
        manufacturer: row.try_get("manufacturer")?,
        image_url: row.try_get("image_url")?,
        release_date: row.try_get("release_date")?,
        price: row.try_get("price")?,
        description: row.try_get("description")?,
        source_url: row.try_get("source_url")?,
        is_new: row.try_get("is_new")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn site_config_from_row(row: &PgRow) -> Result<SiteConfig, sqlx::Error> {
    Ok(SiteConfig {
        id: row.try_get("id")?,
        site_name: row.try_get("site_name")?,
        site_url: row.try_get("site_url")?,
        cron_expression: row.try_get("cron_expression")?,
        enabled: row.try_get("enabled")?,
        last_run_at: row.try_get("last_run_at")?,
    })
}

fn scrape_log_from_row(row: &PgRow) -> Result<ScrapeLog, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status = match status.as_str() {
        "SUCCESS" => RunStatus::Success,
        _ => RunStatus::Failure,
    };
    Ok(ScrapeLog {
        id: row.try_get("id")?,
        target_site: row.try_get("target_site")?,
        status,
        items_found: row.try_get("items_found")?,
        error_message: row.try_get("error_message")?,
        executed_at: row.try_get("executed_at")?,
    })
}

pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn upsert(&self, product: Product) -> Result<Product, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO products
                (id, product_name, manufacturer, image_url, release_date,
                 price, description, source_url, is_new, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW())
            ON CONFLICT (id) DO UPDATE
               SET product_name = EXCLUDED.product_name,
                   manufacturer = EXCLUDED.manufacturer,
                   image_url = EXCLUDED.image_url,
                   release_date = EXCLUDED.release_date,
                   price = EXCLUDED.price,
                   description = EXCLUDED.description,
                   source_url = EXCLUDED.source_url,
                   is_new = EXCLUDED.is_new,
                   updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(product.id)
        .bind(&product.product_name)
        .bind(&product.manufacturer)
        .bind(&product.image_url)
        .bind(product.release_date)
        .bind(product.price)
        .bind(&product.description)
        .bind(&product.source_url)
        .bind(product.is_new)
        .fetch_one(&self.pool)
        .await?;
        Ok(product_from_row(&row)?)
    }

    async fn find_by_name_contains(&self, fragment: &str) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM products WHERE product_name LIKE '%' || $1 || '%'",
        )
        .bind(fragment)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| product_from_row(row).map_err(StoreError::from))
            .collect()
    }

    async fn find_new(&self) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query("SELECT * FROM products WHERE is_new")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| product_from_row(row).map_err(StoreError::from))
            .collect()
    }

    async fn set_is_new(&self, id: Uuid, is_new: bool) -> Result<(), StoreError> {
        sqlx::query("UPDATE products SET is_new = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(is_new)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self, filter: CatalogFilter) -> Result<CatalogPage, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM products
             WHERE ($1::text IS NULL OR manufacturer = $1)
               AND ($2::text IS NULL OR product_name LIKE '%' || $2 || '%')
             ORDER BY updated_at DESC
            "#,
        )
        .bind(&filter.manufacturer)
        .bind(&filter.keyword)
        .fetch_all(&self.pool)
        .await?;
        let matched = rows
            .iter()
            .map(|row| product_from_row(row).map_err(StoreError::from))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(paginate(matched, filter.page, filter.per_page))
    }
}

pub struct PgSiteConfigStore {
    pool: PgPool,
}

impl PgSiteConfigStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SiteConfigStore for PgSiteConfigStore {
    async fn find_enabled(&self) -> Result<Vec<SiteConfig>, StoreError> {
        let rows = sqlx::query("SELECT * FROM site_configs WHERE enabled ORDER BY site_name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| site_config_from_row(row).map_err(StoreError::from))
            .collect()
    }

    async fn find_all(&self) -> Result<Vec<SiteConfig>, StoreError> {
        let rows = sqlx::query("SELECT * FROM site_configs ORDER BY site_name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| site_config_from_row(row).map_err(StoreError::from))
            .collect()
    }

    async fn find_by_name(&self, site_name: &str) -> Result<Option<SiteConfig>, StoreError> {
        let row = sqlx::query("SELECT * FROM site_configs WHERE site_name = $1")
            .bind(site_name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref()
            .map(|r| site_config_from_row(r).map_err(StoreError::from))
            .transpose()
    }

    async fn save(&self, config: SiteConfig) -> Result<SiteConfig, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO site_configs
                (id, site_name, site_url, cron_expression, enabled, last_run_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
               SET site_name = EXCLUDED.site_name,
                   site_url = EXCLUDED.site_url,
                   cron_expression = EXCLUDED.cron_expression,
                   enabled = EXCLUDED.enabled,
                   last_run_at = EXCLUDED.last_run_at
            RETURNING *
            "#,
        )
        .bind(config.id)
        .bind(&config.site_name)
        .bind(&config.site_url)
        .bind(&config.cron_expression)
        .bind(config.enabled)
        .bind(config.last_run_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(site_config_from_row(&row)?)
    }
}

pub struct PgRunLogStore {
    pool: PgPool,
}

impl PgRunLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunLogStore for PgRunLogStore {
    async fn append(&self, log: ScrapeLog) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO scrape_logs
                (id, target_site, status, items_found, error_message, executed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(log.id)
        .bind(&log.target_site)
        .bind(log.status.as_str())
        .bind(log.items_found)
        .bind(&log.error_message)
        .bind(log.executed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ScrapeLog>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query("SELECT * FROM scrape_logs ORDER BY executed_at DESC LIMIT $1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| scrape_log_from_row(row).map_err(StoreError::from))
            .collect()
    }

    async fn by_site(&self, site: &str) -> Result<Vec<ScrapeLog>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM scrape_logs WHERE target_site = $1 ORDER BY executed_at DESC",
        )
        .bind(site)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| scrape_log_from_row(row).map_err(StoreError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_product(name: &str, manufacturer: &str) -> Product {
        Product {
            id: Uuid::new_v4(),
            product_name: name.to_string(),
            manufacturer: manufacturer.to_string(),
            image_url: None,
            release_date: None,
            price: None,
            description: None,
            source_url: None,
            is_new: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn page_dom_exposes_tags_attrs_and_body_text() {
        let dom = PageDom::parse(
            r#"<html><body>
                <h1> Widget A </h1>
                <a href="/items/item.html?n=42">link</a>
                <img src="https://cdn.example/model/1.jpg">
                <p>300円（税込）</p>
            </body></html>"#,
        );

        let links: Vec<_> = dom.find_all("a").collect();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].attr("href"), Some("/items/item.html?n=42"));

        assert_eq!(dom.find("h1").map(|el| el.text.as_str()), Some("Widget A"));
        assert!(dom.body_text().contains("300円（税込）"));
        assert!(dom.find("table").is_none());
    }

    #[tokio::test]
    async fn memory_catalog_upsert_assigns_and_preserves_timestamps() {
        let store = MemoryCatalogStore::new();
        let product = sample_product("Widget A", "ACME");

        let inserted = store.upsert(product.clone()).await.unwrap();
        let created_at = inserted.created_at;

        let mut changed = inserted.clone();
        changed.price = Some(500);
        let updated = store.upsert(changed).await.unwrap();

        assert_eq!(updated.created_at, created_at);
        assert!(updated.updated_at >= created_at);
        assert_eq!(updated.price, Some(500));
    }

    #[tokio::test]
    async fn memory_catalog_name_contains_is_substring_match() {
        let store = MemoryCatalogStore::new();
        store
            .upsert(sample_product("Widget A Deluxe", "ACME"))
            .await
            .unwrap();
        store.upsert(sample_product("Gadget B", "ACME")).await.unwrap();

        let hits = store.find_by_name_contains("Widget A").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].product_name, "Widget A Deluxe");
        assert!(store.find_by_name_contains("Nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_catalog_list_filters_and_paginates() {
        let store = MemoryCatalogStore::new();
        for i in 0..5 {
            store
                .upsert(sample_product(&format!("Widget {i}"), "ACME"))
                .await
                .unwrap();
        }
        store.upsert(sample_product("Other", "BETA")).await.unwrap();

        let page = store
            .list(CatalogFilter {
                manufacturer: Some("ACME".into()),
                keyword: Some("Widget".into()),
                page: 1,
                per_page: 2,
            })
            .await
            .unwrap();
        assert_eq!(page.total_items, 5);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.items.len(), 2);
    }

    #[tokio::test]
    async fn memory_run_logs_sort_recent_first() {
        let store = MemoryRunLogStore::new();
        store.append(ScrapeLog::success("A", 1)).await.unwrap();
        store.append(ScrapeLog::failure("B", "boom")).await.unwrap();

        let recent = store.recent(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].target_site, "B");

        let by_site = store.by_site("A").await.unwrap();
        assert_eq!(by_site.len(), 1);
        assert_eq!(by_site[0].items_found, Some(1));
    }
}
