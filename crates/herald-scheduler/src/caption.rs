//! Post captions and canonical links.

use crate::{ContentItem, PublishError};

const MAX_HASHTAGS: usize = 5;

/// Turn a tag into a hashtag, dropping everything but letters and digits.
fn hashtag(tag: &str) -> Option<String> {
    let body: String = tag.chars().filter(|c| c.is_alphanumeric()).collect();
    if body.is_empty() {
        None
    } else {
        Some(format!("#{}", body))
    }
}

/// Title, summary and up to five hashtags, separated by blank lines.
pub fn build_caption(item: &ContentItem) -> Result<String, PublishError> {
    let title = item.title.trim();
    if title.is_empty() {
        return Err(PublishError::Validation(format!("item {} has an empty title", item.id)));
    }

    let mut sections = vec![title.to_string()];
    if let Some(summary) = item.summary.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        sections.push(summary.to_string());
    }

    let mut tags: Vec<String> = Vec::new();
    for tag in item.tags.iter().filter_map(|t| hashtag(t)) {
        if !tags.iter().any(|t| t.eq_ignore_ascii_case(&tag)) {
            tags.push(tag);
        }
        if tags.len() == MAX_HASHTAGS {
            break;
        }
    }
    if !tags.is_empty() {
        sections.push(tags.join(" "));
    }

    Ok(sections.join("\n\n"))
}

/// `{site_url}/{category}/{slug or id}`.
pub fn canonical_url(site_url: &str, item: &ContentItem) -> String {
    let slug = item.slug.as_deref().filter(|s| !s.is_empty()).unwrap_or(&item.id);
    format!(
        "{}/{}/{}",
        site_url.trim_end_matches('/'),
        item.category.trim_matches('/'),
        slug.trim_matches('/')
    )
}

pub fn is_absolute_url(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}

/// Resolve a possibly relative image reference against the site URL.
pub fn resolve_url(site_url: &str, reference: &str) -> String {
    if is_absolute_url(reference) {
        reference.to_string()
    } else {
        format!(
            "{}/{}",
            site_url.trim_end_matches('/'),
            reference.trim_start_matches('/')
        )
    }
}
