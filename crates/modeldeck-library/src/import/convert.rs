//! Compatibility checks and conversion of external entries into catalog packages.

use super::summary::HuggingFaceModelSummary;
use crate::config::ImportConfig;
use chrono::Utc;
use modeldeck_abstraction::{
    CollaboratorError, CollaboratorResult, DeliveryType, InstallState, ModelPackage, ProviderType,
};
use std::collections::BTreeSet;

/// Decides which local runtime, if any, can execute an external model.
pub trait CompatibilityChecker: Send + Sync {
    /// Returns the runtime for `summary`, or `None` if no local runtime supports it.
    fn check(&self, summary: &HuggingFaceModelSummary) -> Option<ProviderType>;
}

/// Matches library names and tags against the runtimes shipped with the app.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeCompatibilityChecker;

impl RuntimeCompatibilityChecker {
    fn provider_for(marker: &str) -> Option<ProviderType> {
        match marker.trim().to_lowercase().as_str() {
            "mediapipe" => Some(ProviderType::MediaPipe),
            "tflite" | "litert" => Some(ProviderType::Tflite),
            "mlc-llm" | "mlc" => Some(ProviderType::MlcLlm),
            "onnx" => Some(ProviderType::OnnxRuntime),
            _ => None,
        }
    }
}

impl CompatibilityChecker for RuntimeCompatibilityChecker {
    fn check(&self, summary: &HuggingFaceModelSummary) -> Option<ProviderType> {
        if summary.is_private {
            return None;
        }
        summary
            .library_name
            .as_deref()
            .into_iter()
            .chain(summary.tags.iter().map(String::as_str))
            .find_map(Self::provider_for)
    }
}

/// Turns an external entry into a catalog package.
pub trait PackageConverter: Send + Sync {
    /// Converts `summary`.
    ///
    /// # Returns
    /// `Ok(None)` when the entry is not compatible with any local runtime.
    ///
    /// # Errors
    /// Returns `InvalidArgument` when the entry's metadata cannot form a package.
    fn convert(&self, summary: &HuggingFaceModelSummary) -> CollaboratorResult<Option<ModelPackage>>;

    /// Returns `true` if `summary` would convert to a package.
    fn is_compatible(&self, summary: &HuggingFaceModelSummary) -> bool;
}

/// Converter for Hugging Face hub entries.
#[derive(Debug, Clone)]
pub struct HuggingFaceConverter<C = RuntimeCompatibilityChecker> {
    checker: C,
    config: ImportConfig,
}

impl HuggingFaceConverter {
    /// Creates a converter using the runtime checker.
    #[must_use]
    pub fn new(config: ImportConfig) -> Self {
        Self::with_checker(RuntimeCompatibilityChecker, config)
    }
}

impl<C: CompatibilityChecker> HuggingFaceConverter<C> {
    /// Creates a converter using `checker`.
    #[must_use]
    pub fn with_checker(checker: C, config: ImportConfig) -> Self {
        Self { checker, config }
    }

    fn model_id(&self, repository: &str) -> String {
        format!("{}{}", self.config.id_prefix, repository.replace('/', "-"))
    }

    fn manifest_url(&self, summary: &HuggingFaceModelSummary, provider: ProviderType) -> String {
        let artifact = match provider {
            ProviderType::MlcLlm => "model.safetensors",
            _ => "model.bin",
        };
        let revision = summary
            .last_modified
            .map_or_else(|| self.config.default_revision.clone(), |at| at.to_rfc3339());
        format!("hf://{}?artifact={artifact}&revision={revision}", summary.model_id)
    }
}

/// Capabilities implied by the pipeline tag and tags. Defaults to text generation.
fn capabilities(summary: &HuggingFaceModelSummary) -> BTreeSet<String> {
    let from_pipeline = summary.pipeline_tag.as_deref().and_then(|tag| {
        match tag.to_lowercase().as_str() {
            "text-generation" => Some("text-generation"),
            "text2text-generation" => Some("text2text-generation"),
            "image-text-to-text" => Some("multimodal"),
            "text-to-image" => Some("image-generation"),
            "automatic-speech-recognition" => Some("speech-recognition"),
            "text-to-speech" => Some("text-to-speech"),
            "translation" => Some("translation"),
            "summarization" => Some("summarization"),
            "question-answering" => Some("question-answering"),
            _ => None,
        }
    });
    let from_tags = summary.tags.iter().filter_map(|tag| match tag.to_lowercase().as_str() {
        "multimodal" => Some("multimodal"),
        "vision" => Some("vision"),
        "audio" => Some("audio"),
        "image" => Some("image"),
        _ => None,
    });

    let mut capabilities: BTreeSet<String> =
        from_pipeline.into_iter().chain(from_tags).map(str::to_string).collect();
    if capabilities.is_empty() {
        capabilities.insert("text-generation".to_string());
    }
    capabilities
}

impl<C: CompatibilityChecker> PackageConverter for HuggingFaceConverter<C> {
    fn convert(&self, summary: &HuggingFaceModelSummary) -> CollaboratorResult<Option<ModelPackage>> {
        let Some(provider) = self.checker.check(summary) else {
            return Ok(None);
        };
        if summary.model_id.trim().is_empty() {
            return Err(CollaboratorError::InvalidArgument("model id is blank".to_string()));
        }

        let now = Utc::now();
        Ok(Some(ModelPackage {
            model_id: self.model_id(&summary.model_id),
            display_name: summary.display_name.clone(),
            version: summary.last_modified.map_or_else(|| "latest".to_string(), |at| at.to_rfc3339()),
            provider_type: provider,
            delivery_type: DeliveryType::CloudFallback,
            min_app_version: 1,
            size_bytes: summary.total_size_bytes.unwrap_or(0),
            capabilities: capabilities(summary),
            install_state: InstallState::NotInstalled,
            manifest_url: self.manifest_url(summary, provider),
            created_at: summary.created_at.unwrap_or(now),
            updated_at: summary.last_modified.unwrap_or(now),
            author: summary.author.clone(),
            license: summary.license.clone(),
            languages: summary.languages.clone(),
            architectures: summary.architectures.clone(),
            base_model: None,
            model_type: summary.model_type.clone(),
            summary: summary.summary.clone(),
            description: summary.description.clone(),
        }))
    }

    fn is_compatible(&self, summary: &HuggingFaceModelSummary) -> bool {
        self.checker.check(summary).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn converter() -> HuggingFaceConverter {
        HuggingFaceConverter::new(ImportConfig::default())
    }

    #[test]
    fn test_checker_maps_library_and_tags() {
        let checker = RuntimeCompatibilityChecker;
        let summary = HuggingFaceModelSummary::new("org/a", "A").with_library("MediaPipe");
        assert_eq!(checker.check(&summary), Some(ProviderType::MediaPipe));

        let summary = HuggingFaceModelSummary::new("org/b", "B").with_tags(["gguf", "litert"]);
        assert_eq!(checker.check(&summary), Some(ProviderType::Tflite));

        let summary = HuggingFaceModelSummary::new("org/c", "C").with_library("transformers");
        assert_eq!(checker.check(&summary), None);

        let mut summary = HuggingFaceModelSummary::new("org/d", "D").with_library("onnx");
        summary.is_private = true;
        assert_eq!(checker.check(&summary), None);
    }

    #[test]
    fn test_convert_builds_cloud_package() {
        let summary = HuggingFaceModelSummary::new("mlc-ai/Llama-3-8B", "Llama 3 8B")
            .with_library("mlc-llm")
            .with_pipeline_tag("text-generation")
            .with_tags(["vision"]);

        let package = converter().convert(&summary).unwrap().unwrap();

        assert_eq!(package.model_id, "hf-mlc-ai-Llama-3-8B");
        assert_eq!(package.provider_type, ProviderType::MlcLlm);
        assert_eq!(package.delivery_type, DeliveryType::CloudFallback);
        assert_eq!(package.version, "latest");
        assert_eq!(package.install_state, InstallState::NotInstalled);
        assert_eq!(
            package.manifest_url,
            "hf://mlc-ai/Llama-3-8B?artifact=model.safetensors&revision=main"
        );
        assert_eq!(
            package.capabilities.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["text-generation", "vision"]
        );
    }

    #[test]
    fn test_convert_uses_last_modified_as_revision() {
        let modified = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut summary = HuggingFaceModelSummary::new("org/m", "M").with_library("tflite");
        summary.last_modified = Some(modified);

        let package = converter().convert(&summary).unwrap().unwrap();
        assert_eq!(package.version, modified.to_rfc3339());
        let expected = format!("artifact=model.bin&revision={}", modified.to_rfc3339());
        assert!(package.manifest_url.ends_with(&expected));
        assert_eq!(package.capabilities.len(), 1);
    }

    #[test]
    fn test_convert_incompatible_and_blank_id() {
        let summary = HuggingFaceModelSummary::new("org/x", "X");
        assert_eq!(converter().convert(&summary).unwrap(), None);
        assert!(!converter().is_compatible(&summary));

        let summary = HuggingFaceModelSummary::new("  ", "Blank").with_library("onnx");
        assert!(matches!(
            converter().convert(&summary),
            Err(CollaboratorError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_custom_prefix() {
        let config = ImportConfig { id_prefix: "ext-".to_string(), ..ImportConfig::default() };
        let converter = HuggingFaceConverter::new(config);
        let summary = HuggingFaceModelSummary::new("a/b", "B").with_library("onnx");
        assert_eq!(converter.convert(&summary).unwrap().unwrap().model_id, "ext-a-b");
    }
}
