//! Filter and sort state for the library screens.

use modeldeck_abstraction::{InstallState, ModelPackage, ProviderType};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

/// Library tab the user is looking at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LibraryTab {
    #[default]
    Local,
    Curated,
    HuggingFace,
}

/// Sort order for catalog models.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSort {
    /// Installed first, then in-flight installs, then by name.
    #[default]
    Recommended,
    Name,
    SizeDesc,
    Updated,
    Newest,
    Oldest,
}

/// Sort order for the Hugging Face listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HuggingFaceSort {
    #[default]
    Trending,
    MostDownloaded,
    MostLiked,
    RecentlyUpdated,
    Newest,
}

impl HuggingFaceSort {
    /// Label shown in the sort picker.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Trending => "Trending",
            Self::MostDownloaded => "Most downloaded",
            Self::MostLiked => "Most liked",
            Self::RecentlyUpdated => "Recently updated",
            Self::Newest => "Newest",
        }
    }
}

/// User-chosen filters. Owned by presentation, read by the aggregator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryFilterState {
    pub tab: LibraryTab,
    pub local_search_query: String,
    pub hugging_face_search_query: String,
    /// Applies to every tab.
    pub pipeline_tag: Option<String>,
    pub local_sort: ModelSort,
    pub local_library: Option<ProviderType>,
    pub hugging_face_sort: HuggingFaceSort,
    pub hugging_face_library: Option<String>,
}

impl LibraryFilterState {
    /// Search text of the current tab.
    #[must_use]
    pub fn current_search_query(&self) -> &str {
        match self.tab {
            LibraryTab::HuggingFace => &self.hugging_face_search_query,
            LibraryTab::Local | LibraryTab::Curated => &self.local_search_query,
        }
    }

    /// Returns `true` if anything on `tab` differs from its default.
    #[must_use]
    pub fn has_active_filters_for(&self, tab: LibraryTab) -> bool {
        match tab {
            LibraryTab::HuggingFace => {
                !self.hugging_face_search_query.trim().is_empty()
                    || self.pipeline_tag.is_some()
                    || self.hugging_face_library.is_some()
                    || self.hugging_face_sort != HuggingFaceSort::Trending
            }
            LibraryTab::Local | LibraryTab::Curated => {
                !self.local_search_query.trim().is_empty()
                    || self.pipeline_tag.is_some()
                    || self.local_library.is_some()
                    || self.local_sort != ModelSort::Recommended
            }
        }
    }

    /// Number of non-default filter chips on `tab`. Search text is not counted.
    #[must_use]
    pub fn active_filter_count_for(&self, tab: LibraryTab) -> usize {
        let (library_set, sort_changed) = match tab {
            LibraryTab::HuggingFace => (
                self.hugging_face_library.is_some(),
                self.hugging_face_sort != HuggingFaceSort::Trending,
            ),
            LibraryTab::Local | LibraryTab::Curated => {
                (self.local_library.is_some(), self.local_sort != ModelSort::Recommended)
            }
        };
        [self.pipeline_tag.is_some(), library_set, sort_changed].into_iter().filter(|b| *b).count()
    }

    /// Filters and sorts `models` by the local search, provider, pipeline tag and sort.
    ///
    /// The sort is stable, so ties keep catalog order.
    #[must_use]
    pub fn apply(&self, models: &[ModelPackage]) -> Vec<ModelPackage> {
        let query = self.local_search_query.trim().to_lowercase();
        let pipeline = self.pipeline_tag.as_deref().map(str::to_lowercase);

        let mut filtered: Vec<ModelPackage> = models
            .iter()
            .filter(|model| query.is_empty() || matches_text(model, &query))
            .filter(|model| self.local_library.is_none_or(|provider| model.provider_type == provider))
            .filter(|model| {
                pipeline.as_deref().is_none_or(|tag| {
                    model.capabilities.iter().any(|capability| capability.to_lowercase() == tag)
                })
            })
            .cloned()
            .collect();

        sort_models(&mut filtered, self.local_sort);
        filtered
    }
}

fn contains(haystack: &str, query: &str) -> bool {
    haystack.to_lowercase().contains(query)
}

fn contains_opt(haystack: Option<&String>, query: &str) -> bool {
    haystack.is_some_and(|value| contains(value, query))
}

fn matches_text(model: &ModelPackage, query: &str) -> bool {
    contains(&model.display_name, query)
        || contains(&model.model_id, query)
        || model.capabilities.iter().any(|capability| contains(capability, query))
        || contains_opt(model.author.as_ref(), query)
        || contains_opt(model.license.as_ref(), query)
        || model.architectures.iter().any(|arch| contains(arch, query))
        || model.languages.iter().any(|language| contains(language, query))
        || contains_opt(model.base_model.as_ref(), query)
        || contains_opt(model.model_type.as_ref(), query)
        || contains_opt(model.summary.as_ref(), query)
        || contains_opt(model.description.as_ref(), query)
}

fn sort_models(models: &mut [ModelPackage], sort: ModelSort) {
    match sort {
        ModelSort::Recommended => models.sort_by_cached_key(|model| {
            let installing =
                matches!(model.install_state, InstallState::Downloading | InstallState::Paused);
            (
                model.install_state != InstallState::Installed,
                !installing,
                model.display_name.to_lowercase(),
            )
        }),
        ModelSort::Name => models.sort_by_cached_key(|model| model.display_name.to_lowercase()),
        ModelSort::SizeDesc => models.sort_by_key(|model| Reverse(model.size_bytes)),
        ModelSort::Updated => models.sort_by_key(|model| Reverse(model.updated_at)),
        ModelSort::Newest => models.sort_by_key(|model| Reverse(model.created_at)),
        ModelSort::Oldest => models.sort_by_key(|model| model.created_at),
    }
}
