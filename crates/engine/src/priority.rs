//! Priority resolution.
//!
//! Resolution order (first match wins):
//!
//! 1. gift-like event + consumer has gift overrides: name, then id, then
//!    the first cost range (ascending by `min`) containing the gift's cost
//! 2. consumer's default override for the event type
//! 3. the global table, falling back to a single default for unlisted types
//!
//! Profiles are validated when built, not when looked up. The resolver holds
//! them behind an `Arc` that is replaced wholesale on every registration, so
//! a reader never observes a half-updated profile map.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use livequeue_core::{GiftInfo, ProfileError};

/// Priority for event types missing from the global table.
pub const FALLBACK_PRIORITY: i32 = 30;

/// Global default priorities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityTable {
    entries: HashMap<String, i32>,
    fallback: i32,
}

impl Default for PriorityTable {
    fn default() -> Self {
        let entries = [
            ("gift", 100),
            ("subscribe", 90),
            ("follow", 80),
            ("share", 60),
            ("chat", 50),
            ("member", 40),
            ("like", 20),
            ("viewerCount", 10),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            entries,
            fallback: FALLBACK_PRIORITY,
        }
    }
}

impl PriorityTable {
    pub fn new(entries: HashMap<String, i32>, fallback: i32) -> Self {
        Self { entries, fallback }
    }

    pub fn get(&self, event_type: &str) -> i32 {
        self.entries.get(event_type).copied().unwrap_or(self.fallback)
    }
}

/// Event types that receive gift treatment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GiftEventTypes(HashSet<String>);

impl GiftEventTypes {
    pub fn new<I, T>(types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self(types.into_iter().map(Into::into).collect())
    }

    pub fn is_gift_like(&self, event_type: &str) -> bool {
        self.0.contains(event_type)
    }

    pub fn to_vec(&self) -> Vec<String> {
        let mut types: Vec<String> = self.0.iter().cloned().collect();
        types.sort();
        types
    }
}

impl Default for GiftEventTypes {
    fn default() -> Self {
        Self::new(["gift"])
    }
}

/// Inclusive cost range `[min, max] → priority`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostRange {
    pub min: i64,
    pub max: i64,
    pub priority: i32,
}

impl CostRange {
    pub fn new(min: i64, max: i64, priority: i32) -> Self {
        Self { min, max, priority }
    }

    pub fn contains(&self, cost: i64) -> bool {
        self.min <= cost && cost <= self.max
    }
}

/// Unvalidated gift rules, as written in configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GiftOverridesSpec {
    pub by_name: HashMap<String, i32>,
    pub by_id: HashMap<String, i32>,
    pub by_cost_range: Vec<CostRange>,
}

/// Unvalidated per-consumer profile, as written in configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PriorityProfileSpec {
    pub default_overrides: HashMap<String, i32>,
    pub gift_overrides: Option<GiftOverridesSpec>,
}

/// Validated gift rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GiftOverrides {
    /// Keys are lowercased.
    by_name: HashMap<String, i32>,
    by_id: HashMap<String, i32>,
    /// Sorted ascending by `min` (stable, so equal minimums keep their order).
    by_cost_range: Vec<CostRange>,
}

impl GiftOverrides {
    fn resolve(&self, gift: &GiftInfo) -> Option<i32> {
        if let Some(name) = &gift.name {
            if let Some(p) = self.by_name.get(&name.to_lowercase()) {
                return Some(*p);
            }
        }

        if let Some(id) = &gift.id {
            if let Some(p) = self.by_id.get(id) {
                return Some(*p);
            }
        }

        // Ranges may overlap; the first in sorted order wins.
        let cost = gift.cost?;
        self.by_cost_range
            .iter()
            .find(|r| r.contains(cost))
            .map(|r| r.priority)
    }

    pub fn cost_ranges(&self) -> &[CostRange] {
        &self.by_cost_range
    }
}

impl TryFrom<GiftOverridesSpec> for GiftOverrides {
    type Error = ProfileError;

    fn try_from(spec: GiftOverridesSpec) -> Result<Self, Self::Error> {
        let mut by_name = HashMap::with_capacity(spec.by_name.len());
        for (name, priority) in spec.by_name {
            let key = name.trim().to_lowercase();
            if key.is_empty() {
                return Err(ProfileError::EmptyGiftName);
            }
            by_name.insert(key, priority);
        }

        let mut by_id = HashMap::with_capacity(spec.by_id.len());
        for (id, priority) in spec.by_id {
            let key = id.trim().to_string();
            if key.is_empty() {
                return Err(ProfileError::EmptyGiftId);
            }
            by_id.insert(key, priority);
        }

        let mut by_cost_range = spec.by_cost_range;
        if let Some(bad) = by_cost_range.iter().find(|r| r.min > r.max) {
            return Err(ProfileError::InvalidCostRange {
                min: bad.min,
                max: bad.max,
            });
        }
        by_cost_range.sort_by_key(|r| r.min);

        Ok(Self {
            by_name,
            by_id,
            by_cost_range,
        })
    }
}

/// Priority overrides for one downstream consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServicePriorityProfile {
    default_overrides: HashMap<String, i32>,
    gift_overrides: Option<GiftOverrides>,
}

impl ServicePriorityProfile {
    pub fn new(
        default_overrides: HashMap<String, i32>,
        gift_overrides: Option<GiftOverridesSpec>,
    ) -> Result<Self, ProfileError> {
        Ok(Self {
            default_overrides,
            gift_overrides: gift_overrides.map(GiftOverrides::try_from).transpose()?,
        })
    }

    pub fn default_override(&self, event_type: &str) -> Option<i32> {
        self.default_overrides.get(event_type).copied()
    }

    pub fn gift_overrides(&self) -> Option<&GiftOverrides> {
        self.gift_overrides.as_ref()
    }
}

impl TryFrom<PriorityProfileSpec> for ServicePriorityProfile {
    type Error = ProfileError;

    fn try_from(spec: PriorityProfileSpec) -> Result<Self, Self::Error> {
        Self::new(spec.default_overrides, spec.gift_overrides)
    }
}

/// Pure resolution over explicit inputs.
pub fn resolve_priority(
    table: &PriorityTable,
    gift_types: &GiftEventTypes,
    event_type: &str,
    profile: Option<&ServicePriorityProfile>,
    payload: &Value,
) -> i32 {
    if let Some(profile) = profile {
        if gift_types.is_gift_like(event_type) {
            if let Some(rules) = profile.gift_overrides() {
                if let Some(p) = rules.resolve(&GiftInfo::from_payload(payload)) {
                    return p;
                }
            }
        }

        if let Some(p) = profile.default_override(event_type) {
            return p;
        }
    }

    table.get(event_type)
}

type ProfileMap = HashMap<String, Arc<ServicePriorityProfile>>;

/// Maps (event type, consumer, payload) to a priority.
#[derive(Debug)]
pub struct PriorityResolver {
    table: PriorityTable,
    gift_types: GiftEventTypes,
    profiles: RwLock<Arc<ProfileMap>>,
}

impl PriorityResolver {
    pub fn new(table: PriorityTable, gift_types: GiftEventTypes) -> Self {
        Self {
            table,
            gift_types,
            profiles: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    pub fn gift_types(&self) -> &GiftEventTypes {
        &self.gift_types
    }

    pub fn is_gift_like(&self, event_type: &str) -> bool {
        self.gift_types.is_gift_like(event_type)
    }

    pub fn resolve(&self, event_type: &str, consumer_id: Option<&str>, payload: &Value) -> i32 {
        let profile = consumer_id.and_then(|id| self.profile(id));
        resolve_priority(
            &self.table,
            &self.gift_types,
            event_type,
            profile.as_deref(),
            payload,
        )
    }

    pub fn profile(&self, consumer_id: &str) -> Option<Arc<ServicePriorityProfile>> {
        self.snapshot().get(consumer_id).cloned()
    }

    /// Create or replace a consumer's profile.
    pub fn register_profile(&self, consumer_id: &str, profile: ServicePriorityProfile) {
        self.update(|map| {
            map.insert(consumer_id.to_string(), Arc::new(profile));
        });
        info!(consumer_id, "priority profile registered");
    }

    /// Returns whether a profile was removed.
    pub fn clear_profile(&self, consumer_id: &str) -> bool {
        let mut removed = false;
        self.update(|map| removed = map.remove(consumer_id).is_some());
        if removed {
            info!(consumer_id, "priority profile cleared");
        }
        removed
    }

    fn snapshot(&self) -> Arc<ProfileMap> {
        // The map is only ever swapped whole, so a poisoned lock still guards
        // a consistent value.
        match self.profiles.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn update(&self, f: impl FnOnce(&mut ProfileMap)) {
        let mut guard = match self.profiles.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = ProfileMap::clone(&guard);
        f(&mut next);
        *guard = Arc::new(next);
    }
}

impl Default for PriorityResolver {
    fn default() -> Self {
        Self::new(PriorityTable::default(), GiftEventTypes::default())
    }
}
