//! HTML directory-listing parsing.
//!
//! Listings are tables: one row per child, the first cell links to it and a
//! later cell carries its size. Directories link with a trailing `/`.

use scraper::Html;
use url::Url;

use crate::patterns::{CELL_SELECTOR, LINK_SELECTOR, ROW_SELECTOR, SIZE_REGEX};

/// One child of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingItem {
    Directory {
        url: Url,
    },
    File {
        url: Url,
        /// Decoded leaf filename.
        name: String,
        size: Option<u64>,
        /// False when the listing rounded the size (`1.5 MiB`).
        size_exact: bool,
    },
}

/// Size parsed from a listing cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListedSize {
    pub bytes: u64,
    pub exact: bool,
}

/// Extracts children from a listing page fetched from `base`.
///
/// Sort links (`?C=N;O=D`), the parent link and links that leave `base`'s
/// directory are skipped.
#[must_use]
pub fn parse_listing(html: &str, base: &Url) -> Vec<ListingItem> {
    let document = Html::parse_document(html);
    let mut items = Vec::new();

    for row in document.select(&ROW_SELECTOR) {
        let cells: Vec<_> = row.select(&CELL_SELECTOR).collect();
        let Some(first) = cells.first() else {
            continue;
        };
        let Some(href) = first
            .select(&LINK_SELECTOR)
            .next()
            .and_then(|link| link.value().attr("href"))
        else {
            continue;
        };
        let href = href.trim();
        if href.is_empty() || href.starts_with('?') || href.starts_with('#') || is_parent(href) {
            continue;
        }
        let Ok(url) = base.join(href) else {
            continue;
        };
        if !is_child_of(&url, base) {
            continue;
        }

        if href.ends_with('/') {
            items.push(ListingItem::Directory { url });
            continue;
        }

        let Some(name) = leaf_name(&url) else {
            continue;
        };
        let size = cells[1..].iter().find_map(|cell| {
            let text: String = cell.text().collect();
            parse_size(&text)
        });
        items.push(ListingItem::File {
            url,
            name,
            size: size.map(|s| s.bytes),
            size_exact: size.is_some_and(|s| s.exact),
        });
    }
    items
}

fn is_parent(href: &str) -> bool {
    matches!(href, ".." | "../" | "./" | ".") || href.ends_with("/../")
}

/// True when `url` is on the same origin and strictly below `base`'s directory.
fn is_child_of(url: &Url, base: &Url) -> bool {
    url.origin() == base.origin()
        && url.path().starts_with(base.path())
        && url.path().len() > base.path().len()
}

/// Decoded last path segment.
fn leaf_name(url: &Url) -> Option<String> {
    let raw = url.path_segments()?.next_back()?;
    if raw.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(raw).map_or_else(|_| raw.to_string(), |d| d.into_owned());
    Some(decoded)
}

/// Parses a listing size cell: `1,234`, `700K`, `1.5 GiB`, `3 MB`.
///
/// Plain integers are byte-exact; anything with a unit is rounded. `-` and
/// unrecognized text yield `None`.
///
/// ```
/// use myrient_core::crawler::parse_size;
///
/// let size = parse_size("1.5 KiB").unwrap();
/// assert_eq!(size.bytes, 1536);
/// assert!(!size.exact);
/// assert!(parse_size("12,345").unwrap().exact);
/// assert!(parse_size("-").is_none());
/// ```
#[must_use]
pub fn parse_size(text: &str) -> Option<ListedSize> {
    let captures = SIZE_REGEX.captures(text)?;
    let number = captures.get(1)?.as_str().replace(',', "");
    let unit = captures.get(2).map_or("", |m| m.as_str()).to_ascii_lowercase();
    let exponent = match unit.as_str() {
        "" => 0,
        "k" => 1,
        "m" => 2,
        "g" => 3,
        "t" => 4,
        "p" => 5,
        _ => return None,
    };

    if exponent == 0 && !number.contains('.') {
        let bytes: u64 = number.parse().ok()?;
        return Some(ListedSize { bytes, exact: true });
    }

    let value: f64 = number.parse().ok()?;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let bytes = (value * 1024f64.powi(exponent)).round() as u64;
    Some(ListedSize {
        bytes,
        exact: false,
    })
}
