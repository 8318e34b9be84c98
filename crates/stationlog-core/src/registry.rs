use std::fs;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::AnalysisError;
use crate::model::PlatformKey;

/// Registry document shipped with the crate.
const BUNDLED_PATTERNS: &str = include_str!("../patterns/l2ar_patterns.json");

// ---------------------------------------------------------------------------
// Compiled patterns
// ---------------------------------------------------------------------------

/// A test-item regex, compiled once and anchored at the start of the line.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, AnalysisError> {
        let regex = Regex::new(&format!("^(?:{source})"))
            .map_err(|e| AnalysisError::InvalidRegex(format!("{source}: {e}")))?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    /// The pattern text as written in the registry document.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }
}

// ---------------------------------------------------------------------------
// Registry document
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RegistryDocument {
    #[serde(default)]
    patterns: Map<String, Value>,
    #[serde(default)]
    platforms: Map<String, Value>,
    #[serde(default)]
    test_types: Map<String, Value>,
    #[serde(default)]
    test_sites: Map<String, Value>,
}

#[derive(Debug)]
struct PatternFamily {
    name: String,
    categories: Vec<(String, Vec<Pattern>)>,
}

/// Site/platform/test-type to pattern-list lookup. Immutable once built.
#[derive(Debug, Default)]
pub struct PatternRegistry {
    sites: Vec<(String, String)>,
    platforms: Vec<(String, PlatformKey)>,
    test_types: Vec<(String, String)>,
    families: Vec<PatternFamily>,
}

/// Registry names are compared without case, spaces or underscores, so
/// `GENERIC_Basic_Band` + `Patterns` finds `GenericBasicBandPatterns`.
fn fold_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

fn names_match(a: &str, b: &str) -> bool {
    fold_name(a) == fold_name(b)
}

fn string_table(section: &str, map: Map<String, Value>) -> Result<Vec<(String, String)>, AnalysisError> {
    map.into_iter()
        .map(|(key, value)| match value {
            Value::String(s) => Ok((key, s)),
            other => Err(AnalysisError::RegistryLoad(format!(
                "{section}.{key} must be a string, found {other}"
            ))),
        })
        .collect()
}

impl PatternRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The registry bundled with the crate (L2AR site patterns).
    pub fn bundled() -> Result<Self, AnalysisError> {
        Self::from_json_str(BUNDLED_PATTERNS)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, AnalysisError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| AnalysisError::RegistryLoad(format!("{}: {e}", path.display())))?;
        let registry = Self::from_json_str(&text)?;
        tracing::info!(
            path = %path.display(),
            families = registry.families.len(),
            patterns = registry.pattern_count(),
            "loaded pattern registry"
        );
        Ok(registry)
    }

    /// Like [`PatternRegistry::load`], but a broken document yields an empty
    /// registry instead of an error. Every lookup then misses.
    pub fn load_or_empty(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(registry) => registry,
            Err(e) => {
                tracing::error!(error = %e, "pattern registry unavailable, continuing with none");
                Self::empty()
            }
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, AnalysisError> {
        let doc: RegistryDocument =
            serde_json::from_str(text).map_err(|e| AnalysisError::RegistryLoad(e.to_string()))?;

        let sites = string_table("TestSites", doc.test_sites)?;
        let test_types = string_table("TestTypes", doc.test_types)?;

        let mut platforms = Vec::with_capacity(doc.platforms.len());
        for (key, value) in doc.platforms {
            let platform: PlatformKey = serde_json::from_value(value).map_err(|e| {
                AnalysisError::RegistryLoad(format!("Platforms.{key}: {e}"))
            })?;
            platforms.push((key, platform));
        }

        let mut families = Vec::with_capacity(doc.patterns.len());
        for (family_name, body) in doc.patterns {
            let Value::Object(categories) = body else {
                return Err(AnalysisError::RegistryLoad(format!(
                    "Patterns.{family_name} must be an object"
                )));
            };
            let mut compiled_categories = Vec::with_capacity(categories.len());
            for (category, list) in categories {
                let Value::Array(items) = list else {
                    return Err(AnalysisError::RegistryLoad(format!(
                        "Patterns.{family_name}.{category} must be a list"
                    )));
                };
                let mut compiled = Vec::with_capacity(items.len());
                for item in items {
                    let Value::String(source) = item else {
                        tracing::warn!(family = %family_name, category = %category, "skipping non-string pattern");
                        continue;
                    };
                    match Pattern::new(&source) {
                        Ok(p) => compiled.push(p),
                        Err(e) => {
                            tracing::warn!(family = %family_name, category = %category, error = %e, "skipping invalid pattern")
                        }
                    }
                }
                compiled_categories.push((category, compiled));
            }
            families.push(PatternFamily {
                name: family_name,
                categories: compiled_categories,
            });
        }

        Ok(Self {
            sites,
            platforms,
            test_types,
            families,
        })
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// Patterns registered for a site, platform and test type. Unknown keys
    /// give an empty slice.
    pub fn lookup(&self, site: &str, platform: &PlatformKey, test_type: &str) -> &[Pattern] {
        match self.resolve(site, platform, test_type) {
            Some(patterns) => patterns,
            None => {
                tracing::warn!(
                    site,
                    platform = %platform,
                    test_type,
                    "no patterns registered"
                );
                &[]
            }
        }
    }

    fn resolve(&self, site: &str, platform: &PlatformKey, test_type: &str) -> Option<&[Pattern]> {
        if !self.sites.is_empty()
            && !self
                .sites
                .iter()
                .any(|(k, v)| names_match(k, site) || names_match(v, site))
        {
            return None;
        }

        let family = self.family_for(platform)?;

        let category_names: Vec<String> = match self
            .test_types
            .iter()
            .find(|(k, v)| names_match(k, test_type) || names_match(v, test_type))
        {
            Some((key, _)) => vec![key.clone(), format!("{key}_TEST")],
            None if self.test_types.is_empty() => {
                vec![test_type.to_string(), format!("{test_type}_TEST")]
            }
            None => return None,
        };

        family
            .categories
            .iter()
            .find(|(name, _)| category_names.iter().any(|c| names_match(c, name)))
            .map(|(_, patterns)| patterns.as_slice())
    }

    fn family_for(&self, platform: &PlatformKey) -> Option<&PatternFamily> {
        let wanted = platform.discriminant();
        let mut candidates = vec![format!("{wanted}Patterns")];
        match self
            .platforms
            .iter()
            .find(|(k, p)| names_match(k, wanted) || names_match(p.discriminant(), wanted))
        {
            Some((key, _)) => candidates.push(format!("{key}Patterns")),
            None if self.platforms.is_empty() => {}
            None => return None,
        }
        self.families
            .iter()
            .find(|f| candidates.iter().any(|c| names_match(c, &f.name)))
    }

    /// Test-type keys that have a pattern list for `platform`, in document order.
    pub fn test_types_for(&self, platform: &PlatformKey) -> Vec<&str> {
        let Some(family) = self.family_for(platform) else {
            return Vec::new();
        };
        self.test_types
            .iter()
            .filter(|(key, _)| {
                let plain = key.as_str();
                let suffixed = format!("{key}_TEST");
                family
                    .categories
                    .iter()
                    .any(|(name, _)| names_match(plain, name) || names_match(&suffixed, name))
            })
            .map(|(key, _)| key.as_str())
            .collect()
    }

    pub fn platform(&self, name: &str) -> Option<&PlatformKey> {
        self.platforms
            .iter()
            .find(|(k, p)| names_match(k, name) || names_match(p.discriminant(), name))
            .map(|(_, p)| p)
    }

    pub fn pattern_count(&self) -> usize {
        self.families
            .iter()
            .flat_map(|f| f.categories.iter())
            .map(|(_, patterns)| patterns.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pattern_count() == 0
    }
}
