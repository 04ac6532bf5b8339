//! Resource-config sequences and profiles

use crate::error::{ConfigError, ConfigResult};
use crate::resource::ResourceConfig;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

/// A profile dimension: a base profile plus the sub-profiles it implies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSet {
    pub base_profile: String,
    pub sub_profiles: IndexSet<String>,
}

impl ProfileSet {
    pub fn new<I, S>(base_profile: impl Into<String>, sub_profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ProfileSet {
            base_profile: base_profile.into(),
            sub_profiles: sub_profiles.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `profile` names this set's base profile or a sub-profile.
    pub fn is_member(&self, profile: &str) -> bool {
        self.base_profile == profile || self.sub_profiles.contains(profile)
    }
}

/// Profile sets keyed by base profile; uniqueness enforced on the base.
#[derive(Debug, Clone, Default)]
pub struct ProfileStore {
    profiles: IndexMap<String, ProfileSet>,
}

impl ProfileStore {
    pub fn new() -> Self {
        ProfileStore::default()
    }

    pub fn add(&mut self, profile_set: ProfileSet) -> ConfigResult<()> {
        if self.profiles.contains_key(&profile_set.base_profile) {
            return Err(ConfigError::DuplicateProfile {
                base_profile: profile_set.base_profile,
                config_path: String::new(),
            });
        }
        self.profiles
            .insert(profile_set.base_profile.clone(), profile_set);
        Ok(())
    }

    pub fn get(&self, base_profile: &str) -> Option<&ProfileSet> {
        self.profiles.get(base_profile)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProfileSet> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// Ordered, named container of resource configs plus the profile sets the
/// same digestion produced. Duplicate selectors are legal; order of
/// insertion is the order of application.
#[derive(Debug, Clone, Default)]
pub struct ResourceConfigSeq {
    name: String,
    configs: Vec<ResourceConfig>,
    profiles: ProfileStore,
}

impl ResourceConfigSeq {
    pub fn new(name: impl Into<String>) -> Self {
        ResourceConfigSeq {
            name: name.into(),
            configs: Vec::new(),
            profiles: ProfileStore::new(),
        }
    }

    /// The sequence name; usually the base URI it was digested from.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add(&mut self, config: ResourceConfig) {
        self.configs.push(config);
    }

    pub fn add_profile_set(&mut self, profile_set: ProfileSet) -> ConfigResult<()> {
        self.profiles.add(profile_set)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResourceConfig> {
        self.configs.iter()
    }

    pub fn get(&self, index: usize) -> Option<&ResourceConfig> {
        self.configs.get(index)
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}
