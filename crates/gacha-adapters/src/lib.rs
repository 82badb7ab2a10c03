//! Per-site scrapers, the shared extraction driver, and field parsers.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{Datelike, Days, Months, NaiveDate, Weekday};
use gacha_core::RawProduct;
use gacha_storage::{PageDom, PageSession};
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const CRATE_NAME: &str = "gacha-adapters";

pub const SUPPORTED_SITES: &[&str] = &["BANDAI_GASHAPON", "TAKARA_TOMY_ARTS"];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("product name not found at {url}")]
    MissingName { url: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionPlan {
    /// All fields come from the listing page itself. Fast, but incomplete
    /// (no release date).
    ListingOnly,
    /// The listing page yields candidate URLs; each candidate is fetched
    /// individually for full fields.
    ListingThenDetail,
}

/// Per-run bounds: `max_items` caps detail-page visits, the delay range is
/// the randomized politeness pause between detail fetches.
#[derive(Debug, Clone)]
pub struct ScrapeLimits {
    pub max_items: usize,
    pub delay_min: Duration,
    pub delay_max: Duration,
}

impl Default for ScrapeLimits {
    fn default() -> Self {
        Self {
            max_items: 50,
            delay_min: Duration::from_millis(500),
            delay_max: Duration::from_millis(1500),
        }
    }
}

/// One vendor site's extraction behavior: target discovery plus field
/// extraction. The shared driver in [`collect_products`] owns sequencing,
/// caps, dedup, and failure isolation.
pub trait SiteScraper: Send + Sync {
    fn site_name(&self) -> &'static str;
    fn manufacturer(&self) -> &'static str;
    fn plan(&self) -> ExtractionPlan;

    /// Listing pages to visit for one run. `today` anchors date-derived
    /// targets such as monthly calendars.
    fn listing_urls(&self, today: NaiveDate) -> Vec<String>;

    fn is_detail_link(&self, href: &str) -> bool;

    fn normalize_url(&self, href: &str) -> String {
        href.to_string()
    }

    fn extract_detail(&self, dom: &PageDom, url: &str) -> Result<RawProduct, ExtractError>;

    fn extract_from_listing(&self, _dom: &PageDom, _page_url: &str) -> Vec<RawProduct> {
        Vec::new()
    }
}

async fn politeness_pause(limits: &ScrapeLimits) {
    let min = limits.delay_min.min(limits.delay_max).as_millis() as u64;
    let max = limits.delay_min.max(limits.delay_max).as_millis() as u64;
    let millis = rand::thread_rng().gen_range(min..=max);
    tokio::time::sleep(Duration::from_millis(millis)).await;
}

/// Drive one site's extraction end-to-end over an exclusively-owned session.
///
/// Candidate URLs are deduplicated within the run, including across listing
/// pages. A malformed or unfetchable candidate is logged and skipped; hitting
/// the item cap stops early with the partial result. Listing pages that fail
/// to load are skipped so the remaining pages still contribute.
pub async fn collect_products(
    scraper: &dyn SiteScraper,
    session: &mut dyn PageSession,
    limits: &ScrapeLimits,
    today: NaiveDate,
) -> Vec<RawProduct> {
    let site = scraper.site_name();
    info!(site, "starting extraction");

    let mut seen = HashSet::new();
    let mut out = Vec::new();

    'pages: for listing_url in scraper.listing_urls(today) {
        let dom = match session.navigate(&listing_url).await {
            Ok(dom) => dom,
            Err(err) => {
                warn!(site, url = %listing_url, error = %err, "listing page fetch failed, skipping");
                continue;
            }
        };

        match scraper.plan() {
            ExtractionPlan::ListingOnly => {
                for raw in scraper.extract_from_listing(&dom, &listing_url) {
                    if out.len() >= limits.max_items {
                        info!(site, max = limits.max_items, "reached item limit, stopping");
                        break 'pages;
                    }
                    out.push(raw);
                }
            }
            ExtractionPlan::ListingThenDetail => {
                let candidates: Vec<String> = dom
                    .find_all("a")
                    .filter_map(|a| a.attr("href"))
                    .filter(|href| scraper.is_detail_link(href))
                    .map(|href| scraper.normalize_url(href))
                    .collect();
                debug!(site, count = candidates.len(), "candidate links on listing page");

                for url in candidates {
                    if !seen.insert(url.clone()) {
                        continue;
                    }
                    if out.len() >= limits.max_items {
                        info!(site, max = limits.max_items, "reached item limit, stopping");
                        break 'pages;
                    }
                    match session.navigate(&url).await {
                        Ok(detail) => match scraper.extract_detail(&detail, &url) {
                            Ok(raw) => {
                                out.push(raw);
                                if out.len() % 10 == 0 {
                                    info!(site, scraped = out.len(), "progress");
                                }
                            }
                            Err(err) => warn!(site, url = %url, error = %err, "candidate skipped"),
                        },
                        Err(err) => {
                            warn!(site, url = %url, error = %err, "detail fetch failed, candidate skipped")
                        }
                    }
                    politeness_pause(limits).await;
                }
            }
        }
    }

    info!(site, total = out.len(), "extraction finished");
    out
}

// ---------------------------------------------------------------------------
// Field parsers
// ---------------------------------------------------------------------------

static PRICE_TAXED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)円[（(]税込[）)]").expect("price pattern"));
static PRICE_BARE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)円").expect("price pattern"));
static PRICE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+円([（(]税込[）)])?$").expect("price line pattern"));
static WEEK_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})年(\d{1,2})月\s*第(\d)週").expect("week date pattern"));
static MONTH_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})年(\d{1,2})月").expect("month date pattern"));
static LINEUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"全(\d+)種").expect("lineup pattern"));

/// Price in tax-inclusive form first (`300円（税込）`, half- or full-width
/// parens), bare `300円` as fallback, `None` when neither appears.
pub fn parse_price(text: &str) -> Option<i32> {
    if let Some(caps) = PRICE_TAXED.captures(text) {
        return caps[1].parse().ok();
    }
    PRICE_BARE
        .captures(text)
        .and_then(|caps| caps[1].parse().ok())
}

/// Release date in three tiers: `YYYY年M月 第N週` resolves to the first
/// Sunday of that week window, `YYYY年M月` (trailing 未定 allowed) to the
/// first of the month, anything else to `None`.
pub fn parse_release_date(text: &str) -> Option<NaiveDate> {
    if let Some(caps) = WEEK_DATE.captures(text) {
        let year = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let week = caps[3].parse().ok()?;
        return first_sunday_of_week(year, month, week);
    }
    if let Some(caps) = MONTH_DATE.captures(text) {
        let year = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, 1);
    }
    None
}

/// First Sunday within the week window (week 1 = days 1–7, week 2 = days
/// 8–14, …). Falls back to the window start if no Sunday lands inside, which
/// cannot happen for a 7-day span.
pub fn first_sunday_of_week(year: i32, month: u32, week: u32) -> Option<NaiveDate> {
    let start_day = (week.max(1) - 1) * 7 + 1;
    let start = NaiveDate::from_ymd_opt(year, month, start_day)?;
    for offset in 0..7 {
        if let Some(date) = start.checked_add_days(Days::new(offset)) {
            if date.weekday() == Weekday::Sun {
                return Some(date);
            }
        }
    }
    Some(start)
}

/// First non-empty trimmed line that is neither a bare price string nor a
/// listed boilerplate label.
pub fn parse_name(text: &str, boilerplate: &[&str]) -> Option<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .find(|line| !PRICE_LINE.is_match(line) && !boilerplate.contains(line))
        .map(ToString::to_string)
}

/// Site attribution phrase, with a ` - 全N種` suffix when the page text
/// carries a lineup-count marker.
pub fn build_description(attribution: &str, text: &str) -> String {
    match LINEUP.captures(text) {
        Some(caps) => format!("{attribution} - 全{}種", &caps[1]),
        None => attribution.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Bandai Gashapon
// ---------------------------------------------------------------------------

const BANDAI_BASE: &str = "https://gashapon.jp";
const BANDAI_LISTING: &str = "https://gashapon.jp/products/";
const BANDAI_ATTRIBUTION: &str = "バンダイガシャポン公式サイトより";

#[derive(Debug, Clone, Copy, Default)]
pub struct BandaiScraper;

impl SiteScraper for BandaiScraper {
    fn site_name(&self) -> &'static str {
        "BANDAI_GASHAPON"
    }

    fn manufacturer(&self) -> &'static str {
        "BANDAI"
    }

    fn plan(&self) -> ExtractionPlan {
        ExtractionPlan::ListingThenDetail
    }

    fn listing_urls(&self, _today: NaiveDate) -> Vec<String> {
        vec![BANDAI_LISTING.to_string()]
    }

    fn is_detail_link(&self, href: &str) -> bool {
        href.contains("detail.php?jan_code=")
    }

    fn normalize_url(&self, href: &str) -> String {
        if href.starts_with("http") {
            href.to_string()
        } else if href.starts_with('/') {
            format!("{BANDAI_BASE}{href}")
        } else {
            format!("{BANDAI_BASE}/{href}")
        }
    }

    fn extract_detail(&self, dom: &PageDom, url: &str) -> Result<RawProduct, ExtractError> {
        let name = dom
            .find_all("h1")
            .find_map(|h1| parse_name(&h1.text, &[]))
            .ok_or_else(|| ExtractError::MissingName {
                url: url.to_string(),
            })?;

        let image_url = dom
            .find_all("img")
            .filter_map(|img| img.attr("src"))
            .find(|src| src.contains("bandai-a.akamaihd.net") && src.contains("/model/"))
            .map(ToString::to_string);

        let body = dom.body_text();
        Ok(RawProduct {
            name,
            manufacturer: self.manufacturer().to_string(),
            image_url,
            release_date: parse_release_date(body),
            price: parse_price(body),
            description: Some(build_description(BANDAI_ATTRIBUTION, body)),
            source_url: Some(url.to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// Takara Tomy Arts
// ---------------------------------------------------------------------------

const TAKARA_BASE: &str = "https://www.takaratomy-arts.co.jp";
const TAKARA_ATTRIBUTION: &str = "タカラトミーアーツ公式サイトより";
const TAKARA_NAME_BOILERPLATE: &[&str] = &["商品情報"];

static TAKARA_PRICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"■価格[：:](\d+)円").expect("labeled price pattern"));
static TAKARA_RELEASE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"■発売時期[：:]?(\d{4})年(\d{1,2})月").expect("labeled release pattern"));

#[derive(Debug, Clone, Copy, Default)]
pub struct TakaraTomyScraper;

impl TakaraTomyScraper {
    fn calendar_url(date: NaiveDate) -> String {
        format!("{TAKARA_BASE}/items/gacha/calendar/?ym={}", date.format("%Y%m"))
    }
}

impl SiteScraper for TakaraTomyScraper {
    fn site_name(&self) -> &'static str {
        "TAKARA_TOMY_ARTS"
    }

    fn manufacturer(&self) -> &'static str {
        "TAKARA_TOMY"
    }

    fn plan(&self) -> ExtractionPlan {
        ExtractionPlan::ListingThenDetail
    }

    /// This month's and next month's release calendars.
    fn listing_urls(&self, today: NaiveDate) -> Vec<String> {
        let mut urls = vec![Self::calendar_url(today)];
        if let Some(next_month) = today.checked_add_months(Months::new(1)) {
            urls.push(Self::calendar_url(next_month));
        }
        urls
    }

    fn is_detail_link(&self, href: &str) -> bool {
        href.contains("item.html?n=")
    }

    fn normalize_url(&self, href: &str) -> String {
        if href.starts_with("http") {
            return href.to_string();
        }
        // Calendar pages link items as ../../item.html?n=XXX.
        if href.contains("../../item.html") {
            if let Some(query_start) = href.find('?') {
                return format!("{TAKARA_BASE}/items/item.html{}", &href[query_start..]);
            }
        }
        if href.starts_with('/') {
            format!("{TAKARA_BASE}{href}")
        } else {
            format!("{TAKARA_BASE}/{href}")
        }
    }

    fn extract_detail(&self, dom: &PageDom, url: &str) -> Result<RawProduct, ExtractError> {
        let name = dom
            .find_all("h2")
            .find_map(|h2| parse_name(&h2.text, TAKARA_NAME_BOILERPLATE))
            .ok_or_else(|| ExtractError::MissingName {
                url: url.to_string(),
            })?;

        let image_url = dom
            .find_all("img")
            .filter_map(|img| img.attr("src"))
            .find(|src| src.contains("/upfiles/products/") && src.contains("_b.jpg"))
            .map(|src| {
                if src.starts_with("http") {
                    src.to_string()
                } else {
                    format!("{TAKARA_BASE}{src}")
                }
            });

        let body = dom.body_text();
        let price = TAKARA_PRICE
            .captures(body)
            .and_then(|caps| caps[1].parse().ok());
        let release_date = TAKARA_RELEASE.captures(body).and_then(|caps| {
            let year = caps[1].parse().ok()?;
            let month = caps[2].parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, 1)
        });

        Ok(RawProduct {
            name,
            manufacturer: self.manufacturer().to_string(),
            image_url,
            release_date,
            price,
            description: Some(build_description(TAKARA_ATTRIBUTION, body)),
            source_url: Some(url.to_string()),
        })
    }
}

/// Resolve the scraper variant for a configured site name.
pub fn scraper_for_site(site_name: &str) -> Option<Box<dyn SiteScraper>> {
    match site_name {
        "BANDAI_GASHAPON" => Some(Box::new(BandaiScraper)),
        "TAKARA_TOMY_ARTS" => Some(Box::new(TakaraTomyScraper)),
        _ => None,
    }
}
