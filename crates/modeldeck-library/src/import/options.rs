//! Filter options derived from a page of browsed entries.

use super::convert::PackageConverter;
use super::summary::HuggingFaceModelSummary;
use std::collections::{BTreeSet, HashSet};

/// Non-blank values, distinct ignoring case (first spelling wins), sorted ignoring case.
fn distinct_case_insensitive<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut distinct: Vec<String> = values
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .filter(|value| seen.insert(value.to_lowercase()))
        .map(str::to_string)
        .collect();
    distinct.sort_by_cached_key(|value| value.to_lowercase());
    distinct
}

/// Pipeline tags offered as filters.
#[must_use]
pub fn pipeline_options(summaries: &[HuggingFaceModelSummary]) -> Vec<String> {
    distinct_case_insensitive(summaries.iter().filter_map(|s| s.pipeline_tag.as_deref()))
}

/// Library names offered as filters.
#[must_use]
pub fn library_options(summaries: &[HuggingFaceModelSummary]) -> Vec<String> {
    distinct_case_insensitive(summaries.iter().filter_map(|s| s.library_name.as_deref()))
}

/// Ids of the entries a local runtime can execute.
#[must_use]
pub fn downloadable_model_ids(
    summaries: &[HuggingFaceModelSummary],
    converter: &dyn PackageConverter,
) -> BTreeSet<String> {
    summaries
        .iter()
        .filter(|summary| converter.is_compatible(summary))
        .map(|summary| summary.model_id.clone())
        .collect()
}

/// Tags shown for a browsed entry: trimmed, non-blank, and without
/// `text-generation` when the entry is also tagged `multimodal`.
#[must_use]
pub fn visible_tags(tags: &[String]) -> Vec<String> {
    let tags: Vec<&str> =
        tags.iter().map(|tag| tag.trim()).filter(|tag| !tag.is_empty()).collect();
    let multimodal = tags.iter().any(|tag| tag.eq_ignore_ascii_case("multimodal"));
    tags.into_iter()
        .filter(|tag| !(multimodal && tag.eq_ignore_ascii_case("text-generation")))
        .map(str::to_string)
        .collect()
}

/// Applies [`visible_tags`] to every entry of a browsed page.
#[must_use]
pub fn with_visible_tags(summaries: Vec<HuggingFaceModelSummary>) -> Vec<HuggingFaceModelSummary> {
    summaries
        .into_iter()
        .map(|mut summary| {
            summary.tags = visible_tags(&summary.tags);
            summary
        })
        .collect()
}
