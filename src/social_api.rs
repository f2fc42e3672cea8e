//! # Social-Graph API Client
//!
//! Upstream fetcher for non-chain entities: Farcaster reactions via the
//! Neynar HTTP API. Pagination is cursor-based and untrusted: the loop
//! carries a hard page-count bound and same-cursor-repeat detection so a
//! misbehaving paginator can never hang a request. Whatever was accumulated
//! before termination is returned.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use serde::Deserialize;

use crate::errors::FetchError;
use crate::types::FarcasterUser;

const NEYNAR_BASE_URL: &str = "https://api.neynar.com/v2/farcaster";
const PAGE_LIMIT: u32 = 100;
/// Hard safety bound on pages fetched for a single cast.
const MAX_PAGES: u32 = 50;
const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// One page of cast reactions as the API returns it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LikesPage {
    #[serde(default)]
    pub reactions: Vec<ReactionEntry>,
    #[serde(default)]
    pub next: Option<PageCursor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReactionEntry {
    pub user: FarcasterUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageCursor {
    pub cursor: Option<String>,
}

/// Seam the cache layer fetches social-graph data through.
#[async_trait::async_trait]
pub trait SocialReader: Send + Sync {
    /// All users who liked a cast, deduplicated by fid.
    async fn fetch_cast_likers(&self, cast_hash: &str) -> Result<Vec<FarcasterUser>>;
}

pub struct SocialGraphClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl SocialGraphClient {
    pub fn new(api_key: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("Failed to build http client")?;
        Ok(Self {
            http,
            api_key,
            base_url: NEYNAR_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch_likes_page(&self, cast_hash: &str, cursor: Option<String>) -> Result<LikesPage> {
        let mut query: Vec<(&str, String)> = vec![
            ("hash", cast_hash.to_string()),
            ("types", "likes".to_string()),
            ("limit", PAGE_LIMIT.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }

        let response = self
            .http
            .get(format!("{}/reactions/cast", self.base_url))
            .header("x-api-key", &self.api_key)
            .query(&query)
            .send()
            .await
            .context("reactions request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("reactions request returned {status}: {body}");
        }

        response
            .json::<LikesPage>()
            .await
            .context("failed to decode reactions page")
    }
}

#[async_trait::async_trait]
impl SocialReader for SocialGraphClient {
    async fn fetch_cast_likers(&self, cast_hash: &str) -> Result<Vec<FarcasterUser>> {
        if self.api_key.is_empty() {
            bail!("NEYNAR_API_KEY is not configured");
        }
        let hash = cast_hash.to_string();
        paginate_likes(|cursor| self.fetch_likes_page(&hash, cursor)).await
    }
}

/// Validate a `0x`-prefixed hex cast hash, rejecting malformed input before
/// any cache or upstream interaction. Returns the trimmed canonical form.
pub fn validate_cast_hash(input: &str) -> Result<String, FetchError> {
    let hash = input.trim();
    let digits = hash.strip_prefix("0x").unwrap_or("");
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(FetchError::InvalidInput(format!(
            "invalid cast hash: must be a hex string starting with 0x, got {input:?}"
        )));
    }
    Ok(hash.to_string())
}

/// Drive the cursor pagination to termination. Generic over the page fetcher
/// so termination behavior is testable without a live endpoint.
///
/// Stops when: no next cursor, an empty/no-new-users page, the same cursor
/// repeats, or the page bound is hit.
pub(crate) async fn paginate_likes<F, Fut>(mut fetch_page: F) -> Result<Vec<FarcasterUser>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<LikesPage>>,
{
    let mut users: Vec<FarcasterUser> = Vec::new();
    let mut seen_fids: HashSet<u64> = HashSet::new();
    let mut cursor: Option<String> = None;
    let mut page = 0u32;

    loop {
        let page_data = fetch_page(cursor.clone()).await?;

        let before = users.len();
        for entry in page_data.reactions {
            if seen_fids.insert(entry.user.fid) {
                users.push(entry.user);
            }
        }

        let next_cursor = page_data.next.and_then(|n| n.cursor);
        if next_cursor.is_none() || users.len() == before {
            break;
        }
        // A paginator handing back the cursor we just used would loop forever.
        if cursor.is_some() && next_cursor == cursor {
            debug!("paginator repeated cursor {next_cursor:?}, stopping");
            break;
        }

        cursor = next_cursor;
        page += 1;
        if page > MAX_PAGES {
            warn!("stopping pagination after {MAX_PAGES} pages, returning partial results");
            break;
        }
    }

    Ok(users)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn user(fid: u64) -> ReactionEntry {
        ReactionEntry {
            user: FarcasterUser {
                fid,
                username: format!("user{fid}"),
                display_name: String::new(),
                pfp_url: String::new(),
                custody_address: String::new(),
            },
        }
    }

    fn page(fids: &[u64], next: Option<&str>) -> LikesPage {
        LikesPage {
            reactions: fids.iter().map(|&f| user(f)).collect(),
            next: next.map(|c| PageCursor { cursor: Some(c.to_string()) }),
        }
    }

    #[tokio::test]
    async fn stops_when_cursor_runs_out() {
        let pages = Arc::new(AtomicU32::new(0));
        let p = pages.clone();
        let users = paginate_likes(move |cursor| {
            let p = p.clone();
            async move {
                match p.fetch_add(1, Ordering::SeqCst) {
                    0 => {
                        assert!(cursor.is_none());
                        Ok(page(&[1, 2], Some("c1")))
                    }
                    1 => {
                        assert_eq!(cursor.as_deref(), Some("c1"));
                        Ok(page(&[3], None))
                    }
                    _ => panic!("fetched past the final page"),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(users.iter().map(|u| u.fid).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(pages.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn repeated_cursor_terminates_with_partial_results() {
        let pages = Arc::new(AtomicU32::new(0));
        let p = pages.clone();
        let users = paginate_likes(move |_cursor| {
            let page_no = p.fetch_add(1, Ordering::SeqCst);
            async move {
                // Every page claims "stuck" is next and hands out a new user,
                // so neither the cursor-exhausted nor the no-new-users stop
                // condition fires first.
                Ok(page(&[100 + page_no as u64], Some("stuck")))
            }
        })
        .await
        .unwrap();

        // Page 0 sets cursor to "stuck"; page 1 repeats it and stops.
        assert_eq!(pages.load(Ordering::SeqCst), 2);
        assert_eq!(users.len(), 2);
    }

    #[tokio::test]
    async fn page_bound_terminates_runaway_pagination() {
        let pages = Arc::new(AtomicU32::new(0));
        let p = pages.clone();
        let users = paginate_likes(move |_cursor| {
            let page_no = p.fetch_add(1, Ordering::SeqCst);
            async move {
                // Fresh cursor and fresh user every page: only the hard page
                // bound can stop this.
                Ok(page(&[page_no as u64], Some(&format!("c{page_no}"))))
            }
        })
        .await
        .unwrap();

        assert_eq!(pages.load(Ordering::SeqCst), MAX_PAGES + 1);
        assert_eq!(users.len(), (MAX_PAGES + 1) as usize);
    }

    #[tokio::test]
    async fn duplicate_fids_are_collapsed_and_stop_pagination() {
        let pages = Arc::new(AtomicU32::new(0));
        let p = pages.clone();
        let users = paginate_likes(move |_cursor| {
            let page_no = p.fetch_add(1, Ordering::SeqCst);
            async move {
                // Second page repeats the same users under a new cursor.
                let _ = page_no;
                Ok(page(&[1, 2], Some(&format!("c{page_no}"))))
            }
        })
        .await
        .unwrap();

        assert_eq!(users.len(), 2);
        // No new users on page 1 means stop.
        assert_eq!(pages.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cast_hash_validation() {
        assert_eq!(validate_cast_hash(" 0xAbC123 ").unwrap(), "0xAbC123");
        assert!(validate_cast_hash("0x").is_err());
        assert!(validate_cast_hash("abc123").is_err());
        assert!(validate_cast_hash("0xZZZ").is_err());
        assert!(validate_cast_hash("").is_err());
    }
}
