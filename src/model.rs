use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::{fs, path::Path, sync::Arc};
use tch::{kind::Kind, CModule, Device, Tensor};
use tracing::{info, warn};

// ---------- Trained model seams ----------

/// A trained numeric model producing one value from a flat feature vector.
pub trait Regressor: Send + Sync {
    fn predict(&self, features: &[f32]) -> Result<f32>;
}

/// A trained image model returning the top `k` (label, probability) pairs.
pub trait ImageLabeler: Send + Sync {
    fn top_k(&self, image: &Path, k: usize) -> Result<Vec<(String, f32)>>;
}

/// How a predictor produces its estimate. Chosen once at construction from
/// artifact presence; a failing `Trained` call still falls back per call.
pub enum Strategy<M: ?Sized> {
    Trained(Arc<M>),
    Heuristic,
}

impl<M: ?Sized> Clone for Strategy<M> {
    fn clone(&self) -> Self {
        match self {
            Strategy::Trained(m) => Strategy::Trained(Arc::clone(m)),
            Strategy::Heuristic => Strategy::Heuristic,
        }
    }
}

impl<M: ?Sized> Strategy<M> {
    pub fn from_handle(handle: Option<Arc<M>>) -> Self {
        match handle {
            Some(m) => Strategy::Trained(m),
            None => Strategy::Heuristic,
        }
    }

    pub fn is_trained(&self) -> bool {
        matches!(self, Strategy::Trained(_))
    }
}

// ---------- Artifact loader ----------

/// Opens an artifact with `open`, returning `None` on any failure.
///
/// Absent files and unreadable/incompatible data are both logged once as a
/// warning. No retry is attempted; callers treat `None` as permanent.
pub fn load_artifact<T, F>(path: Option<&Path>, kind: &str, open: F) -> Option<T>
where
    F: FnOnce(&Path) -> Result<T>,
{
    let Some(path) = path else {
        info!("{}: no artifact configured, using heuristic", kind);
        return None;
    };
    if !path.exists() {
        warn!("{}: artifact not found at {}", kind, path.display());
        return None;
    }
    match open(path) {
        Ok(artifact) => {
            info!("{}: loaded artifact from {}", kind, path.display());
            Some(artifact)
        }
        Err(e) => {
            warn!("{}: failed to load {}: {:#}", kind, path.display(), e);
            None
        }
    }
}

// ---------- TorchScript regressor ----------

/// TorchScript module fed a single sample shaped as `input_shape`.
pub struct TorchRegressor {
    model: CModule,
    device: Device,
    input_shape: Vec<i64>,
}

impl TorchRegressor {
    pub fn open(path: &Path, input_shape: &[i64]) -> Result<Self> {
        let device = Device::Cpu;
        let model = CModule::load_on_device(path, device)
            .with_context(|| format!("failed to load TorchScript {}", path.display()))?;
        let reg = Self {
            model,
            device,
            input_shape: input_shape.to_vec(),
        };

        // Dry run on zeros so a shape mismatch shows up at load, not per call.
        let n: i64 = input_shape.iter().product();
        reg.predict(&vec![0.0; n as usize])
            .context("dry-run forward failed")?;
        Ok(reg)
    }
}

impl Regressor for TorchRegressor {
    fn predict(&self, features: &[f32]) -> Result<f32> {
        let expected: i64 = self.input_shape.iter().product();
        if features.len() as i64 != expected {
            bail!(
                "feature length mismatch: got {}, expected {}",
                features.len(),
                expected
            );
        }

        let input = Tensor::from_slice(features)
            .f_reshape(self.input_shape.as_slice())?
            .to_device(self.device);
        let out = self
            .model
            .forward_ts(&[input])?
            .f_to_kind(Kind::Float)?
            .f_flatten(0, -1)?;
        let values = Vec::<f32>::try_from(&out)?;

        match values.first() {
            Some(v) if v.is_finite() => Ok(*v),
            Some(v) => Err(anyhow!("model produced non-finite output {}", v)),
            None => Err(anyhow!("model produced an empty output")),
        }
    }
}

// ---------- TorchScript image labeller ----------

#[derive(Deserialize)]
struct LabelsJson {
    labels: Vec<String>,
}

pub struct TorchImageLabeler {
    model: CModule,
    labels: Vec<String>,
}

impl TorchImageLabeler {
    pub fn open(model_path: &Path, labels_path: &Path) -> Result<Self> {
        let txt = fs::read_to_string(labels_path)
            .with_context(|| format!("failed to read labels at {}", labels_path.display()))?;
        let meta: LabelsJson = serde_json::from_str(&txt).context("failed to parse labels json")?;
        if meta.labels.is_empty() {
            bail!("label list is empty");
        }
        let model = CModule::load_on_device(model_path, Device::Cpu)
            .with_context(|| format!("failed to load TorchScript {}", model_path.display()))?;
        let labeler = Self {
            model,
            labels: meta.labels,
        };

        // Dry run on a blank image so a label/class count mismatch fails here.
        let blank = Tensor::f_zeros([1, 3, 224, 224], (Kind::Float, Device::Cpu))?;
        let classes = labeler.probabilities(blank).context("dry-run forward failed")?.size1()?;
        if classes != labeler.labels.len() as i64 {
            bail!(
                "model outputs {} classes but {} labels were supplied",
                classes,
                labeler.labels.len()
            );
        }
        Ok(labeler)
    }

    /// Flattened class probabilities for one `[1, 3, 224, 224]` batch.
    fn probabilities(&self, batch: Tensor) -> Result<Tensor> {
        let logits = self.model.forward_ts(&[batch])?;
        Ok(logits.f_softmax(-1, Kind::Float)?.f_flatten(0, -1)?)
    }
}

/// Number of entries to request from `topk`: never more than the caller
/// asked for, the labels on file, or the classes the model produced.
fn top_k_width(requested: usize, labels: usize, classes: i64) -> i64 {
    (requested.min(labels) as i64).min(classes).max(0)
}

impl ImageLabeler for TorchImageLabeler {
    fn top_k(&self, image: &Path, k: usize) -> Result<Vec<(String, f32)>> {
        let img = tch::vision::imagenet::load_image_and_resize224(image)
            .with_context(|| format!("failed to read image {}", image.display()))?;
        let probs = self.probabilities(img.f_unsqueeze(0)?)?;

        let k = top_k_width(k, self.labels.len(), probs.size1()?);
        if k == 0 {
            return Ok(Vec::new());
        }
        let (values, indices) = probs.f_topk(k, -1, true, true)?;
        let values = Vec::<f32>::try_from(&values)?;
        let indices = Vec::<i64>::try_from(&indices)?;

        values
            .into_iter()
            .zip(indices)
            .map(|(p, i)| {
                let label = self
                    .labels
                    .get(i as usize)
                    .ok_or_else(|| anyhow!("class index {} has no label", i))?;
                Ok((label.clone(), p))
            })
            .collect()
    }
}

// ---------- Label encoder ----------

#[derive(Deserialize, Debug, Clone)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    pub fn new<S: Into<String>>(classes: impl IntoIterator<Item = S>) -> Self {
        Self {
            classes: classes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let txt = fs::read_to_string(path)
            .with_context(|| format!("failed to read encoder at {}", path.display()))?;
        let enc: LabelEncoder = serde_json::from_str(&txt).context("failed to parse encoder json")?;
        if enc.classes.is_empty() {
            bail!("encoder has no classes");
        }
        Ok(enc)
    }

    /// Index of `class`, or `None` when the encoder never saw it.
    pub fn encode(&self, class: &str) -> Option<usize> {
        self.classes.iter().position(|c| c == class)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_artifact_is_absent() {
        let got: Option<LabelEncoder> =
            load_artifact(Some(Path::new("/no/such/encoder.json")), "encoder", LabelEncoder::open);
        assert!(got.is_none());
    }

    #[test]
    fn test_unconfigured_artifact_is_absent() {
        let got: Option<LabelEncoder> = load_artifact(None, "encoder", LabelEncoder::open);
        assert!(got.is_none());
    }

    #[test]
    fn test_corrupt_artifact_is_absent() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "\x00\x01 garbage").unwrap();
        let got: Option<LabelEncoder> = load_artifact(Some(f.path()), "encoder", LabelEncoder::open);
        assert!(got.is_none());

        let reg = load_artifact(Some(f.path()), "surplus model", |p| TorchRegressor::open(p, &[1, 6]));
        assert!(reg.is_none());
    }

    #[test]
    fn test_encoder_loads_and_encodes() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"classes": ["Birthday", "Festival", "Unknown", "Wedding"]}}"#).unwrap();

        let enc = load_artifact(Some(f.path()), "encoder", LabelEncoder::open).unwrap();
        assert_eq!(enc.len(), 4);
        assert_eq!(enc.encode("Festival"), Some(1));
        assert_eq!(enc.encode("Unknown"), Some(2));
        assert_eq!(enc.encode("Gala"), None);
    }

    #[test]
    fn test_top_k_width_never_exceeds_model_classes() {
        // five labels on file, three logits out of the model
        assert_eq!(top_k_width(5, 5, 3), 3);
        assert_eq!(top_k_width(5, 10, 1000), 5);
        assert_eq!(top_k_width(5, 2, 1000), 2);
        assert_eq!(top_k_width(5, 5, 0), 0);
    }

    #[test]
    fn test_strategy_from_handle() {
        struct Zero;
        impl Regressor for Zero {
            fn predict(&self, _: &[f32]) -> Result<f32> {
                Ok(0.0)
            }
        }

        let s: Strategy<dyn Regressor> = Strategy::from_handle(Some(Arc::new(Zero) as Arc<dyn Regressor>));
        assert!(s.is_trained());
        let s: Strategy<dyn Regressor> = Strategy::from_handle(None);
        assert!(!s.is_trained());
    }
}
