use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::{ArtifactPaths, ModelVersions};
use crate::model::{load_artifact, ImageLabeler, TorchImageLabeler};

const MISSING_CONFIDENCE: f64 = 0.05;
const MIXED_CONFIDENCE: f64 = 0.30;
const IMAGE_TOP_K: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoodCategory {
    Veg,
    NonVeg,
    Rice,
    Bread,
    Curry,
    Snacks,
    Sweets,
    Mixed,
}

impl FoodCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FoodCategory::Veg => "veg",
            FoodCategory::NonVeg => "non_veg",
            FoodCategory::Rice => "rice",
            FoodCategory::Bread => "bread",
            FoodCategory::Curry => "curry",
            FoodCategory::Snacks => "snacks",
            FoodCategory::Sweets => "sweets",
            FoodCategory::Mixed => "mixed",
        }
    }

    pub fn shelf_life_hours(&self) -> u32 {
        match self {
            FoodCategory::Veg => 6,
            FoodCategory::NonVeg => 3,
            FoodCategory::Rice => 5,
            FoodCategory::Bread => 8,
            FoodCategory::Curry => 5,
            FoodCategory::Snacks => 10,
            FoodCategory::Sweets => 12,
            FoodCategory::Mixed => 4,
        }
    }

    pub fn storage(&self) -> &'static str {
        match self {
            FoodCategory::Veg => "Refrigerate below 5 C; reheat before serving.",
            FoodCategory::NonVeg => "Refrigerate immediately; consume within 3 h for safety.",
            FoodCategory::Rice => "Keep covered at room temp up to 2 h, then refrigerate.",
            FoodCategory::Bread => "Room temperature in airtight bag; lasts 6-8 h.",
            FoodCategory::Curry => "Hot-hold above 65 C or refrigerate below 5 C.",
            FoodCategory::Snacks => "Room temperature; avoid moisture.",
            FoodCategory::Sweets => "Cool, dry place; refrigerate cream-based items.",
            FoodCategory::Mixed => "Separate veg/non-veg; refrigerate perishable items.",
        }
    }
}

// Order matters: equal scores keep this order when ranked.
const CATEGORY_KEYWORDS: [(FoodCategory, &[&str]); 7] = [
    (
        FoodCategory::Veg,
        &[
            "paneer", "sabzi", "dal", "vegetable", "aloo", "gobi", "palak", "chole", "rajma", "bhindi", "matar",
            "mushroom", "soya", "tofu",
        ],
    ),
    (
        FoodCategory::NonVeg,
        &[
            "chicken", "mutton", "fish", "egg", "prawn", "kebab", "tikka", "tandoori chicken", "butter chicken",
            "keema",
        ],
    ),
    (
        FoodCategory::Rice,
        &["rice", "pulao", "biryani", "jeera rice", "fried rice", "khichdi", "tahiri", "curd rice"],
    ),
    (
        FoodCategory::Bread,
        &["roti", "naan", "paratha", "chapati", "puri", "pav", "kulcha", "bhatura", "phulka"],
    ),
    (
        FoodCategory::Curry,
        &["curry", "gravy", "masala", "korma", "kadai", "rogan josh", "vindaloo", "makhani", "butter"],
    ),
    (
        FoodCategory::Snacks,
        &["samosa", "pakora", "bhaji", "vada", "chaat", "bhel", "pani puri", "dahi vada", "kachori", "dhokla"],
    ),
    (
        FoodCategory::Sweets,
        &[
            "gulab jamun", "rasgulla", "halwa", "kheer", "jalebi", "ladoo", "barfi", "rasmalai", "sandesh", "payasam",
        ],
    ),
];

const VEG_INDICATORS: &[&str] = &[
    "paneer", "sabzi", "dal", "vegetable", "aloo", "gobi", "palak", "chole", "rajma", "veg", "tofu", "soya",
    "mushroom",
];
const NON_VEG_INDICATORS: &[&str] = &["chicken", "mutton", "fish", "egg", "prawn", "kebab", "keema"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: FoodCategory,
    pub confidence: f64,
    pub matched_keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub primary_category: FoodCategory,
    pub confidence: f64,
    /// Categories with at least one match, best first.
    pub all_scores: Vec<CategoryScore>,
    pub is_vegetarian: bool,
    pub shelf_life_hours: u32,
    pub storage_recommendation: String,
    pub model_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageClassification {
    pub label: String,
    pub confidence: f64,
    pub all_labels: Vec<LabelScore>,
    pub model_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImageClassification {
    fn unknown(model_version: String, error: String) -> Self {
        Self {
            label: "unknown".to_string(),
            confidence: 0.0,
            all_labels: Vec::new(),
            model_version,
            error: Some(error),
        }
    }
}

/// Keyword classifier for food descriptions, with an optional image model.
pub struct FoodClassifier {
    image_model: Option<Arc<dyn ImageLabeler>>,
    text_version: String,
    image_version: String,
}

impl FoodClassifier {
    pub fn from_config(artifacts: &ArtifactPaths, versions: &ModelVersions) -> Self {
        let image_model = match (&artifacts.image_model, &artifacts.image_labels) {
            (Some(model), Some(labels)) => {
                load_artifact(Some(model.as_path()), "image classifier", |p| TorchImageLabeler::open(p, labels))
                    .map(|m| Arc::new(m) as Arc<dyn ImageLabeler>)
            }
            (Some(_), None) => {
                error!("image classifier configured without a label file; image classification disabled");
                None
            }
            _ => None,
        };
        Self::new(image_model, &versions.classifier, &versions.image)
    }

    pub fn new(image_model: Option<Arc<dyn ImageLabeler>>, text_version: &str, image_version: &str) -> Self {
        info!("food classifier ready: image_model={}", image_model.is_some());
        Self {
            image_model,
            text_version: text_version.to_string(),
            image_version: image_version.to_string(),
        }
    }

    pub fn classify(&self, description: &str) -> Classification {
        let desc = description.to_lowercase();

        let mut ranked: Vec<(FoodCategory, Vec<String>, f64)> = CATEGORY_KEYWORDS
            .iter()
            .map(|(cat, keywords)| {
                let matched: Vec<String> =
                    keywords.iter().filter(|kw| desc.contains(**kw)).map(|kw| kw.to_string()).collect();
                let conf = keyword_confidence(matched.len());
                (*cat, matched, conf)
            })
            .collect();
        // stable sort: ties keep table order
        ranked.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then(b.2.total_cmp(&a.2)));

        let all_scores: Vec<CategoryScore> = ranked
            .iter()
            .filter(|(_, matched, _)| !matched.is_empty())
            .map(|(cat, matched, conf)| CategoryScore {
                category: *cat,
                confidence: *conf,
                matched_keywords: matched.clone(),
            })
            .collect();

        let (primary, confidence, all_scores) = match all_scores.first() {
            Some(top) => (top.category, top.confidence, all_scores.clone()),
            None => (
                FoodCategory::Mixed,
                MIXED_CONFIDENCE,
                vec![CategoryScore {
                    category: FoodCategory::Mixed,
                    confidence: MIXED_CONFIDENCE,
                    matched_keywords: Vec::new(),
                }],
            ),
        };

        let has_veg = VEG_INDICATORS.iter().any(|kw| desc.contains(kw));
        let has_non_veg = NON_VEG_INDICATORS.iter().any(|kw| desc.contains(kw));

        debug!("classified {:?} as {}", description, primary.as_str());
        Classification {
            primary_category: primary,
            confidence,
            all_scores,
            is_vegetarian: has_veg && !has_non_veg,
            shelf_life_hours: primary.shelf_life_hours(),
            storage_recommendation: primary.storage().to_string(),
            model_version: self.text_version.clone(),
        }
    }

    pub fn primary_category(&self, description: &str) -> FoodCategory {
        self.classify(description).primary_category
    }

    pub fn classify_image(&self, image: &Path) -> ImageClassification {
        let Some(model) = &self.image_model else {
            return ImageClassification::unknown(
                "image-unavailable".to_string(),
                "image classifier not loaded".to_string(),
            );
        };

        match model.top_k(image, IMAGE_TOP_K) {
            Ok(labels) if !labels.is_empty() => {
                let all_labels: Vec<LabelScore> = labels
                    .into_iter()
                    .map(|(label, p)| LabelScore {
                        label,
                        confidence: (p as f64).clamp(0.0, 1.0),
                    })
                    .collect();
                ImageClassification {
                    label: all_labels[0].label.clone(),
                    confidence: all_labels[0].confidence,
                    all_labels,
                    model_version: self.image_version.clone(),
                    error: None,
                }
            }
            Ok(_) => ImageClassification::unknown(self.image_version.clone(), "model returned no labels".to_string()),
            Err(e) => {
                error!("image classification failed for {}: {:#}", image.display(), e);
                ImageClassification::unknown(self.image_version.clone(), e.to_string())
            }
        }
    }

    pub fn has_image_model(&self) -> bool {
        self.image_model.is_some()
    }
}

fn keyword_confidence(matches: usize) -> f64 {
    if matches == 0 {
        MISSING_CONFIDENCE
    } else {
        (0.40 + 0.15 * matches as f64).min(0.98)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> FoodClassifier {
        FoodClassifier::new(None, "keyword-nlp-v2", "vit")
    }

    #[test]
    fn test_keyword_confidence() {
        assert_eq!(keyword_confidence(0), 0.05);
        assert!((keyword_confidence(1) - 0.55).abs() < 1e-9);
        assert!((keyword_confidence(2) - 0.70).abs() < 1e-9);
        assert_eq!(keyword_confidence(10), 0.98);
    }

    #[test]
    fn test_no_match_is_mixed() {
        let c = classifier().classify("assorted leftovers from lunch");
        assert_eq!(c.primary_category, FoodCategory::Mixed);
        assert_eq!(c.confidence, 0.30);
        assert_eq!(c.all_scores.len(), 1);
        assert_eq!(c.shelf_life_hours, 4);
        assert!(!c.is_vegetarian);
    }

    #[test]
    fn test_more_matches_rank_first() {
        let c = classifier().classify("Chicken biryani with jeera rice and raita");
        // rice: rice, biryani, jeera rice
        assert_eq!(c.primary_category, FoodCategory::Rice);
        assert_eq!(c.all_scores[0].matched_keywords.len(), 3);
        assert!(!c.is_vegetarian);
    }

    #[test]
    fn test_non_veg_indicator_wins() {
        let c = classifier().classify("dal makhani, aloo gobi and egg curry");
        assert!(!c.is_vegetarian);
    }

    #[test]
    fn test_primary_category_shortcut() {
        assert_eq!(classifier().primary_category("gulab jamun and jalebi"), FoodCategory::Sweets);
    }

    struct Broken;

    impl ImageLabeler for Broken {
        fn top_k(&self, _: &Path, _: usize) -> anyhow::Result<Vec<(String, f32)>> {
            anyhow::bail!("selected index k out of range")
        }
    }

    struct Silent;

    impl ImageLabeler for Silent {
        fn top_k(&self, _: &Path, _: usize) -> anyhow::Result<Vec<(String, f32)>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_image_inference_error_is_reported() {
        let clf = FoodClassifier::new(Some(Arc::new(Broken)), "keyword-nlp-v2", "vit");
        let r = clf.classify_image(Path::new("/tmp/plate.jpg"));
        assert_eq!(r.label, "unknown");
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.model_version, "vit");
        assert!(r.error.as_deref().is_some_and(|e| e.contains("out of range")));

        // the model stays loaded for the next call
        assert!(clf.has_image_model());
    }

    #[test]
    fn test_image_empty_result() {
        let clf = FoodClassifier::new(Some(Arc::new(Silent)), "keyword-nlp-v2", "vit");
        let r = clf.classify_image(Path::new("/tmp/plate.jpg"));
        assert_eq!(r.label, "unknown");
        assert!(r.all_labels.is_empty());
        assert_eq!(r.error.as_deref(), Some("model returned no labels"));
    }

    #[test]
    fn test_image_without_model() {
        let r = classifier().classify_image(Path::new("/tmp/plate.jpg"));
        assert_eq!(r.label, "unknown");
        assert_eq!(r.confidence, 0.0);
        assert!(r.all_labels.is_empty());
        assert!(r.error.is_some());
    }
}
