use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE};
use scraper::{node::Node, ElementRef, Html, Selector};
use serde_json::Value;
use url::Url;

use crate::config::FetchSettings;

// ── Constants ────────────────────────────────────────────────────────────────

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const MAX_REDIRECTS: usize = 10;
const MAX_IMAGE_CANDIDATES: usize = 20;

// ── Lazy statics ─────────────────────────────────────────────────────────────

static IMG_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("img").unwrap());
static BODY_SEL: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());
static JSONLD_SEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("script[type=\"application/ld+json\"]").unwrap());
static META_IMAGE_SEL: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        "meta[property=\"og:image\"], meta[property=\"og:image:secure_url\"], \
         meta[name=\"twitter:image\"], meta[name=\"twitter:image:src\"], \
         meta[itemprop=\"image\"]",
    )
    .unwrap()
});

static TRACKING_PIXEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(pixel|spacer|blank|1x1|tracking)\.(gif|png)").unwrap());

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("{0}")]
    Request(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("upstream returned HTTP {0}")]
    Status(u16),
    #[error("unsupported content type {0:?}, expected HTML or text")]
    UnsupportedContent(String),
    #[error("page is larger than {0} bytes")]
    TooLarge(usize),
}

// ── Transport ────────────────────────────────────────────────────────────────

/// A fetched page.
#[derive(Debug, Clone)]
pub struct Page {
    /// Final URL after redirects.
    pub url: Url,
    pub content_type: String,
    pub body: String,
}

impl Page {
    pub fn is_html(&self) -> bool {
        self.content_type.contains("html")
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Page, FetchError>;
}

/// Fetches pages over HTTP with a pooled `reqwest` client.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_body_bytes: usize,
}

impl HttpFetcher {
    pub fn new(settings: &FetchSettings) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,text/plain;q=0.8,*/*;q=0.5",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let timeout = Duration::from_secs(settings.timeout_secs);
        let mut builder = reqwest::ClientBuilder::new()
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .timeout(timeout)
            .pool_max_idle_per_host(settings.max_idle_per_host)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(USER_AGENT)
            .default_headers(headers);

        if settings.insecure_ssl {
            tracing::warn!("TLS certificate verification disabled for page fetches");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| FetchError::Request(e.to_string()))?;

        Ok(Self {
            client,
            timeout,
            max_body_bytes: settings.max_body_bytes,
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else if e.is_connect() {
            FetchError::Request(format!("connection failed: {}", e))
        } else {
            FetchError::Request(e.to_string())
        }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Page, FetchError> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_lowercase();

        if !(content_type.contains("html") || content_type.starts_with("text/")) {
            return Err(FetchError::UnsupportedContent(content_type));
        }

        if response
            .content_length()
            .is_some_and(|len| len > self.max_body_bytes as u64)
        {
            return Err(FetchError::TooLarge(self.max_body_bytes));
        }

        let final_url = response.url().clone();
        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.map_send_error(e))? {
            if bytes.len() + chunk.len() > self.max_body_bytes {
                return Err(FetchError::TooLarge(self.max_body_bytes));
            }
            bytes.extend_from_slice(&chunk);
        }
        let body = String::from_utf8_lossy(&bytes).into_owned();

        tracing::debug!(url = %final_url, bytes = body.len(), "fetched page");

        Ok(Page {
            url: final_url,
            content_type,
            body,
        })
    }
}

// ── Page cleaning ────────────────────────────────────────────────────────────

/// Turns a fetched page into the text handed to the model: visible text one
/// block per line, cut to `text_limit` characters, followed by the image URLs
/// found on the page. The image list is never cut.
///
/// Parsing is CPU-bound; async callers run this on the blocking pool.
pub fn page_to_prompt_text(page: &Page, text_limit: usize) -> String {
    if !page.is_html() {
        return truncate_chars(&normalize_lines(&page.body), text_limit).to_string();
    }

    let document = Html::parse_document(&page.body);
    let text = visible_text(&document);
    let images = image_candidates(&document, &page.url);

    let mut out = truncate_chars(&text, text_limit).to_string();
    if images.is_empty() {
        return out;
    }

    out.push_str("\n\nImage candidates:\n");
    for image in images {
        out.push_str(&image);
        out.push('\n');
    }
    out
}

/// Visible text of the document body, block elements on their own lines.
pub fn visible_text(document: &Html) -> String {
    let mut raw = String::new();
    match document.select(&BODY_SEL).next() {
        Some(body) => walk_text(body, &mut raw),
        None => walk_text(document.root_element(), &mut raw),
    }
    normalize_lines(&raw)
}

enum Walk<'a> {
    Open(ElementRef<'a>),
    Text(&'a str),
    Close { newline: bool },
}

/// Depth-first text walk with an explicit stack, so deeply nested markup
/// cannot overflow the thread stack.
fn walk_text(root: ElementRef<'_>, out: &mut String) {
    let mut stack = vec![Walk::Open(root)];

    while let Some(item) = stack.pop() {
        match item {
            Walk::Text(text) => out.push_str(text),
            Walk::Close { newline } => {
                if newline {
                    out.push('\n');
                }
            }
            Walk::Open(el) => {
                let name = el.value().name();
                if matches!(
                    name,
                    "script" | "style" | "noscript" | "template" | "svg" | "iframe" | "head"
                ) {
                    continue;
                }

                let block = is_block(name);
                if block {
                    out.push('\n');
                }
                stack.push(Walk::Close {
                    newline: block || name == "br",
                });

                let children: Vec<Walk<'_>> = el
                    .children()
                    .filter_map(|child| match child.value() {
                        Node::Text(text) => Some(Walk::Text(&*text.text)),
                        Node::Element(_) => ElementRef::wrap(child).map(Walk::Open),
                        _ => None,
                    })
                    .collect();
                stack.extend(children.into_iter().rev());
            }
        }
    }
}

fn is_block(name: &str) -> bool {
    matches!(
        name,
        "p" | "div"
            | "section"
            | "article"
            | "main"
            | "header"
            | "footer"
            | "aside"
            | "nav"
            | "ul"
            | "ol"
            | "li"
            | "dl"
            | "dt"
            | "dd"
            | "table"
            | "tr"
            | "td"
            | "th"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "figure"
            | "figcaption"
            | "blockquote"
            | "pre"
            | "form"
            | "label"
    )
}

pub fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Collapse whitespace within each line and drop blank lines.
fn normalize_lines(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Image candidates ─────────────────────────────────────────────────────────

/// Absolute image URLs from meta tags, JSON-LD and `<img>` elements, in that
/// order, deduplicated.
pub fn image_candidates(document: &Html, base_url: &Url) -> Vec<String> {
    let mut raw: Vec<String> = Vec::new();

    for meta in document.select(&META_IMAGE_SEL) {
        if let Some(content) = meta.value().attr("content") {
            raw.push(content.trim().to_string());
        }
    }

    for script in document.select(&JSONLD_SEL) {
        let text: String = script.text().collect();
        if let Ok(value) = serde_json::from_str::<Value>(&text) {
            jsonld_images(&value, &mut raw);
        }
    }

    for img in document.select(&IMG_SEL) {
        if let Some(src) = img_src(img) {
            raw.push(src);
        }
    }

    let mut seen = Vec::new();
    for candidate in raw {
        if candidate.is_empty() || candidate.starts_with("data:") {
            continue;
        }
        let Ok(resolved) = base_url.join(&candidate) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        let resolved = resolved.to_string();
        if TRACKING_PIXEL_RE.is_match(&resolved) || seen.contains(&resolved) {
            continue;
        }
        seen.push(resolved);
        if seen.len() == MAX_IMAGE_CANDIDATES {
            break;
        }
    }
    seen
}

fn img_src(el: ElementRef<'_>) -> Option<String> {
    let v = el.value();
    v.attr("data-src")
        .or_else(|| v.attr("src"))
        .or_else(|| v.attr("data-lazy-src"))
        .or_else(|| v.attr("data-original"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && !s.starts_with("data:"))
        .or_else(|| {
            v.attr("srcset")
                .or_else(|| v.attr("data-srcset"))
                .and_then(best_src_from_srcset)
        })
}

/// Picks the widest (or highest density) entry of a `srcset`.
fn best_src_from_srcset(srcset: &str) -> Option<String> {
    let mut best: Option<(f64, String)> = None;

    for part in srcset.split(',') {
        let mut pieces = part.split_whitespace();
        let Some(url) = pieces.next() else {
            continue;
        };
        let score = pieces
            .next()
            .and_then(|desc| {
                desc.strip_suffix('w')
                    .or_else(|| desc.strip_suffix('x'))
                    .and_then(|n| n.parse::<f64>().ok())
            })
            .unwrap_or(0.0);

        if best.as_ref().map_or(true, |(s, _)| score >= *s) {
            best = Some((score, url.to_string()));
        }
    }

    best.map(|(_, url)| url)
}

fn jsonld_images(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            if let Some(image) = map.get("image") {
                match image {
                    Value::String(s) => out.push(s.clone()),
                    Value::Array(items) => {
                        for item in items {
                            match item {
                                Value::String(s) => out.push(s.clone()),
                                Value::Object(obj) => {
                                    if let Some(Value::String(u)) = obj.get("url") {
                                        out.push(u.clone());
                                    }
                                }
                                _ => {}
                            }
                        }
                    }
                    Value::Object(obj) => {
                        if let Some(Value::String(u)) = obj.get("url") {
                            out.push(u.clone());
                        }
                    }
                    _ => {}
                }
            }
            for (key, nested) in map {
                if key != "image" {
                    jsonld_images(nested, out);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                jsonld_images(item, out);
            }
        }
        _ => {}
    }
}
