//! Per-plan template and mapping lookup.
//!
//! Layout under the catalog root:
//!
//! ```text
//! templates/<plan-lowercase>.pdf
//! mappings/<plan-lowercase>.json
//! ```

use crate::error::{FormStampError, Result};
use crate::field::{FieldMetadata, load_fields_json};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Plans shipped with the application.
pub const KNOWN_PLANS: [&str; 8] = [
    "Amil",
    "Bradesco",
    "Unimed",
    "Humana",
    "Petrobras",
    "saudecaixa",
    "SulAmerica",
    "Geap",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanAsset {
    pub plan: String,
    pub template_path: PathBuf,
    pub mapping_path: PathBuf,
    /// Lowercase hex digest the template bytes must match.
    pub sha256: Option<String>,
}

/// Everything needed to stamp one plan's guide.
#[derive(Debug, Clone)]
pub struct PlanBundle {
    pub plan: String,
    pub template: Vec<u8>,
    pub fields: Vec<FieldMetadata>,
}

#[derive(Debug, Clone)]
pub struct PlanCatalog {
    root: PathBuf,
    /// Keyed by lowercase plan name.
    by_id: BTreeMap<String, PlanAsset>,
}

impl PlanCatalog {
    /// Catalog with [`KNOWN_PLANS`] registered under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let mut catalog = Self::empty(root);
        for plan in KNOWN_PLANS {
            let asset = catalog.asset_for(plan);
            catalog.by_id.insert(plan.to_ascii_lowercase(), asset);
        }
        catalog
    }

    pub fn empty(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            by_id: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn asset_for(&self, plan: &str) -> PlanAsset {
        let stem = plan.to_ascii_lowercase();
        PlanAsset {
            plan: plan.to_string(),
            template_path: self.root.join("templates").join(format!("{stem}.pdf")),
            mapping_path: self.root.join("mappings").join(format!("{stem}.json")),
            sha256: None,
        }
    }

    pub fn insert(&mut self, asset: PlanAsset) -> Result<()> {
        let id = asset.plan.trim().to_ascii_lowercase();
        if id.is_empty() {
            return Err(FormStampError::InvalidConfiguration(
                "plan name cannot be empty".to_string(),
            ));
        }
        if self.by_id.contains_key(&id) {
            return Err(FormStampError::InvalidConfiguration(format!(
                "duplicate plan in catalog: {}",
                asset.plan
            )));
        }
        self.by_id.insert(id, asset);
        Ok(())
    }

    /// Registers `plan` at the conventional paths under the root.
    pub fn register(&mut self, plan: &str) -> Result<()> {
        let asset = self.asset_for(plan.trim());
        self.insert(asset)
    }

    pub fn pin(&mut self, plan: &str, sha256: &str) -> Result<()> {
        let digest = sha256.trim().to_ascii_lowercase();
        if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(FormStampError::InvalidConfiguration(format!(
                "sha256 pin for {plan} is not a 64-digit hex digest"
            )));
        }
        let id = plan.trim().to_ascii_lowercase();
        let asset = self
            .by_id
            .get_mut(&id)
            .ok_or_else(|| FormStampError::UnknownPlan(plan.to_string()))?;
        asset.sha256 = Some(digest);
        Ok(())
    }

    /// Case-insensitive.
    pub fn get(&self, plan: &str) -> Result<&PlanAsset> {
        self.by_id
            .get(&plan.trim().to_ascii_lowercase())
            .ok_or_else(|| FormStampError::UnknownPlan(plan.to_string()))
    }

    pub fn plans(&self) -> impl Iterator<Item = &str> {
        self.by_id.values().map(|asset| asset.plan.as_str())
    }

    /// Reads and verifies the template, then loads the mapping. A missing
    /// mapping file yields no fields; the guide is then just the template.
    pub fn load(&self, plan: &str) -> Result<PlanBundle> {
        let asset = self.get(plan)?;
        let template = std::fs::read(&asset.template_path)?;
        if let Some(expected) = &asset.sha256 {
            let found = sha256_hex(&template);
            if &found != expected {
                return Err(FormStampError::Integrity {
                    subject: asset.template_path.display().to_string(),
                    expected: expected.clone(),
                    found,
                });
            }
        }
        let fields = if asset.mapping_path.exists() {
            let fields = load_fields_json(&std::fs::read_to_string(&asset.mapping_path)?)?;
            if fields.is_empty() {
                log::warn!("mapping for plan {} is empty", asset.plan);
            }
            fields
        } else {
            log::warn!(
                "no mapping for plan {} at {}; the template will be produced without values",
                asset.plan,
                asset.mapping_path.display()
            );
            Vec::new()
        };
        Ok(PlanBundle {
            plan: asset.plan.clone(),
            template,
            fields,
        })
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}
