// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Monitored entity identifiers derived from Azure resource ids.
//!
//! An identifier is `{ENTITY_TYPE}-{HASH}` where `HASH` is the 64-bit
//! MurmurHash2 ("64A") of the lowercased resource id, printed as 16 uppercase
//! hex digits. The values must match the ones computed by the backend for the
//! same resources, so the hash is reproduced bit for bit.

use std::collections::HashMap;

use regex::RegexBuilder;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::ResourceError;
use crate::record::{
    ParsedRecord, CUSTOM_DEVICE_ATTRIBUTE, RESOURCE_ID_ATTRIBUTE, RESOURCE_TYPE_ATTRIBUTE,
    SOURCE_ENTITY_ATTRIBUTE,
};

pub const CUSTOM_DEVICE_ENTITY_TYPE: &str = "CUSTOM_DEVICE";

const MURMUR_SEED: u64 = 0xe17a_1465;
const MURMUR_M: u64 = 0xc6a4_a793_5bd1_e995;
const MURMUR_R: u32 = 47;

/// Resource types are never shortened below `namespace/type`.
const MIN_RESOURCE_TYPE_SEGMENTS: usize = 2;

const BUNDLED_MAPPING: &str = include_str!("../resources/me_type_mapper.json");

/// MurmurHash64A over `data` with the fixed seed used for entity ids.
#[must_use]
pub fn murmurhash64a(data: &[u8]) -> u64 {
    let mut h = MURMUR_SEED ^ (data.len() as u64).wrapping_mul(MURMUR_M);

    let mut chunks = data.chunks_exact(8);
    for chunk in &mut chunks {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(chunk);
        let mut k = u64::from_le_bytes(bytes);

        k = k.wrapping_mul(MURMUR_M);
        k ^= k >> MURMUR_R;
        k = k.wrapping_mul(MURMUR_M);

        h ^= k;
        h = h.wrapping_mul(MURMUR_M);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut bytes = [0u8; 8];
        bytes[..tail.len()].copy_from_slice(tail);
        h ^= u64::from_le_bytes(bytes);
        h = h.wrapping_mul(MURMUR_M);
    }

    h ^= h >> MURMUR_R;
    h = h.wrapping_mul(MURMUR_M);
    h ^= h >> MURMUR_R;
    h
}

/// Builds the identifier of a resource for one entity type.
#[must_use]
pub fn create_monitored_entity_id(entity_type: &str, resource_id: &str) -> String {
    let hash = murmurhash64a(resource_id.to_lowercase().as_bytes());
    format!("{entity_type}-{hash:016X}")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MappingEntry {
    resource_type: String,
    #[serde(default)]
    category: Option<String>,
    me_type: Vec<String>,
}

/// Lookup table from `"{resource type}[,{category}]"` (lowercase) to entity
/// type codes.
#[derive(Debug, Clone, Default)]
pub struct EntityTypeMapper {
    mapping: HashMap<String, Vec<String>>,
}

impl EntityTypeMapper {
    /// Mapping shipped with the crate.
    ///
    /// # Errors
    ///
    /// Returns an error if the bundled JSON is malformed.
    pub fn bundled() -> Result<Self, ResourceError> {
        Self::from_json("me_type_mapper.json", BUNDLED_MAPPING)
    }

    /// Parses a mapping document: `[{resourceType, category?, meType: [..]}]`.
    ///
    /// # Errors
    ///
    /// Returns an error if `json` does not follow that schema.
    pub fn from_json(name: &str, json: &str) -> Result<Self, ResourceError> {
        let entries: Vec<MappingEntry> =
            serde_json::from_str(json).map_err(|source| ResourceError::Json {
                name: name.to_string(),
                source,
            })?;

        let mapping = entries
            .into_iter()
            .map(|entry| {
                let mut key = entry.resource_type.to_lowercase();
                if let Some(category) = entry.category.filter(|c| !c.is_empty()) {
                    key.push(',');
                    key.push_str(&category.to_lowercase());
                }
                (key, entry.me_type)
            })
            .collect();

        Ok(Self { mapping })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    fn get(&self, key: &str) -> Option<&[String]> {
        self.mapping.get(key).map(Vec::as_slice)
    }

    /// Resolves entity types for a lowercase resource type and category.
    ///
    /// Returns the matched types and, when the resource type had to be
    /// shortened to find a match, the shortened type.
    fn resolve(&self, resource_type: &str, category: &str) -> Option<(&[String], Option<String>)> {
        let with_category = format!("{resource_type},{category}");
        if let Some(types) = self.get(&with_category).or_else(|| self.get(resource_type)) {
            return Some((types, None));
        }

        // sub-resource logs are attributed to the closest mapped parent
        let mut segments: Vec<&str> = resource_type.split('/').collect();
        while segments.len() > MIN_RESOURCE_TYPE_SEGMENTS {
            segments.pop();
            let parent_type = segments.join("/");
            if let Some(types) = self.get(&parent_type) {
                return Some((types, Some(parent_type)));
            }
        }
        None
    }

    /// Adds `dt.source_entity` (and `dt.entity.custom_device` for custom
    /// devices) to a record that has a resource id and type.
    ///
    /// A single identifier is stored as a plain string, several as a JSON
    /// array. Records that cannot be resolved are left untouched.
    pub fn infer_monitored_entity_id(&self, category: &str, parsed: &mut ParsedRecord) {
        let Some(mut resource_id) = parsed
            .get(RESOURCE_ID_ATTRIBUTE)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
        else {
            return;
        };
        let resource_type = parsed
            .get(RESOURCE_TYPE_ATTRIBUTE)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        if resource_type.is_empty() {
            return;
        }

        let Some((entity_types, parent_type)) =
            self.resolve(&resource_type, &category.to_lowercase())
        else {
            return;
        };

        if let Some(parent_type) = parent_type {
            match parent_resource_id(&resource_id, &parent_type) {
                Some(parent_id) => resource_id = parent_id,
                None => {
                    debug!("Resource id '{resource_id}' does not contain type '{parent_type}'");
                    return;
                }
            }
        }

        let identifiers: Vec<String> = entity_types
            .iter()
            .map(|entity_type| create_monitored_entity_id(entity_type, &resource_id))
            .collect();

        if let Some(custom_device) = entity_types
            .iter()
            .zip(&identifiers)
            .find(|(entity_type, _)| entity_type.eq_ignore_ascii_case(CUSTOM_DEVICE_ENTITY_TYPE))
            .map(|(_, identifier)| identifier.clone())
        {
            parsed.insert(
                CUSTOM_DEVICE_ATTRIBUTE.to_string(),
                Value::String(custom_device),
            );
        }

        let source_entity = match identifiers.as_slice() {
            [single] => Value::String(single.clone()),
            _ => Value::String(Value::from(identifiers).to_string()),
        };
        parsed.insert(SOURCE_ENTITY_ATTRIBUTE.to_string(), source_entity);
    }
}

/// Cuts a sub-resource id down to the id of its `parent_type` ancestor.
fn parent_resource_id(resource_id: &str, parent_type: &str) -> Option<String> {
    let pattern = format!("^.*{}/[^/]*", regex::escape(parent_type));
    let regex = RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .ok()?;
    regex.find(resource_id).map(|m| m.as_str().to_string())
}
