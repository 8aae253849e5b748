
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};

use crate::error::DatasetError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub name: String,
    pub url: String,
    pub kind: EntryKind,
    pub last_modified: Option<String>,
    pub size: Option<String>,
}

impl ListingEntry {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

pub fn parse_listing(base_url: &str, html: &str) -> Result<Vec<ListingEntry>, DatasetError> {
    let base = directory_url(base_url)?;
    let document = Html::parse_document(html);

    let row_selector = selector("table tr")?;
    let cell_selector = selector("td")?;
    let anchor_selector = selector("a[href]")?;

    let mut entries = Vec::new();
    for row in document.select(&row_selector) {
        let cells: Vec<ElementRef<'_>> = row.select(&cell_selector).collect();
        let Some((index, anchor)) = cells.iter().enumerate().find_map(|(index, cell)| {
            cell.select(&anchor_selector)
                .next()
                .map(|anchor| (index, anchor))
        }) else {
            continue;
        };
        let text_at = |offset: usize| {
            cells
                .get(index + offset)
                .map(|cell| cell.text().collect::<String>().trim().to_string())
                .filter(|text| !text.is_empty())
        };
        if let Some(mut entry) = entry_from_anchor(&base, anchor) {
            entry.last_modified = text_at(1);
            entry.size = text_at(2).filter(|size| size != "-");
            entries.push(entry);
        }
    }

    if entries.is_empty() {
        let pre_selector = selector("pre a[href]")?;
        entries.extend(
            document
                .select(&pre_selector)
                .filter_map(|anchor| entry_from_anchor(&base, anchor)),
        );
    }

    Ok(entries)
}

fn entry_from_anchor(base: &Url, anchor: ElementRef<'_>) -> Option<ListingEntry> {
    let href = anchor.value().attr("href")?.trim();
    if href.is_empty() || href.starts_with('?') || href.starts_with('#') {
        return None;
    }
    let url = base.join(href).ok()?;
    if !url.as_str().starts_with(base.as_str()) || url.as_str() == base.as_str() {
        return None;
    }
    let relative = &url.as_str()[base.as_str().len()..];
    let kind = if relative.ends_with('/') {
        EntryKind::Directory
    } else {
        EntryKind::File
    };
    let name = relative.trim_end_matches('/').to_string();
    if name.is_empty() || name.contains('/') || name.contains('?') {
        return None;
    }
    Some(ListingEntry {
        name,
        url: url.to_string(),
        kind,
        last_modified: None,
        size: None,
    })
}

fn directory_url(base_url: &str) -> Result<Url, DatasetError> {
    let mut normalized = base_url.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Url::parse(&normalized).map_err(|err| DatasetError::Network {
        url: base_url.to_string(),
        message: format!("invalid listing url: {err}"),
        retryable: false,
    })
}

fn selector(css: &str) -> Result<Selector, DatasetError> {
    Selector::parse(css)
        .map_err(|err| DatasetError::Filesystem(format!("bad selector {css}: {err:?}")))
}
