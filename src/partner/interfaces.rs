use std::collections::BTreeMap;

use anyhow::Context;
use serde::Deserialize;

/// Position of an achievement inside the remote stats bitfield. Ordered by
/// stat first, then bit.
#[derive(Debug, serde::Deserialize, serde::Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct AchievementSlot {
    pub stat_id: u32,
    pub bit_id: u32,
}

impl AchievementSlot {
    pub const fn new(stat_id: u32, bit_id: u32) -> Self {
        Self { stat_id, bit_id }
    }

    /// The slot right after this one in the same stat.
    pub fn next_bit(self) -> anyhow::Result<Self> {
        let bit_id = self
            .bit_id
            .checked_add(1)
            .with_context(|| format!("No bit left after slot {self}"))?;

        Ok(Self::new(self.stat_id, bit_id))
    }
}

impl std::fmt::Display for AchievementSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.stat_id, self.bit_id)
    }
}

#[derive(Debug, serde::Deserialize, serde::Serialize, Clone)]
pub struct RemoteAchievement {
    pub api_name: String,
    pub stat_id: u32,
    pub bit_id: u32,
}

impl RemoteAchievement {
    pub const fn slot(&self) -> AchievementSlot {
        AchievementSlot::new(self.stat_id, self.bit_id)
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct FetchAchievementsResponse {
    pub achievements: Vec<RemoteAchievement>,
}

#[derive(Debug, serde::Deserialize)]
pub struct NewAchievementResponse {
    pub achievement: AchievementSlot,
}

/// One entry of the local achievement definitions file.
#[derive(Debug, serde::Deserialize, serde::Serialize, Clone)]
pub struct AchievementDefinition {
    pub id: String,
    pub icon: String,
    pub icon_locked: String,
    pub name: BTreeMap<String, String>,
    pub description: BTreeMap<String, String>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub permission: u32,
    #[serde(default, rename = "progressStat")]
    pub progress_stat: Option<serde_json::Value>,
    #[serde(default, rename = "progressMin")]
    pub progress_min: Option<serde_json::Value>,
    #[serde(default, rename = "progressMax")]
    pub progress_max: Option<serde_json::Value>,
}

#[derive(Debug, serde::Deserialize)]
pub struct AchievementFile {
    pub data: Vec<AchievementDefinition>,
}

#[derive(Debug, serde::Deserialize, serde::Serialize, Clone)]
pub struct SteamApp {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
}

#[derive(Debug, serde::Deserialize)]
pub struct AppList {
    pub steam_apps: Vec<SteamApp>,
}

/// Renders an optional JSON scalar the way the portal expects it in a form
/// field: absent and null become an empty string, strings are sent bare.
pub fn form_value(value: Option<&serde_json::Value>) -> String {
    match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum AppId {
        Number(u64),
        Text(String),
    }

    Ok(match AppId::deserialize(deserializer)? {
        AppId::Number(id) => id.to_string(),
        AppId::Text(id) => id,
    })
}
