use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Vendor ids shared with the bridge's device metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vendor {
    Stick,
    Conalog,
    Nanoom,
}

impl Vendor {
    pub const ALL: [Vendor; 3] = [Vendor::Stick, Vendor::Conalog, Vendor::Nanoom];

    pub fn id(self) -> u32 {
        match self {
            Vendor::Stick => 0,
            Vendor::Conalog => 1,
            Vendor::Nanoom => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Vendor::Stick => "stick",
            Vendor::Conalog => "conalog",
            Vendor::Nanoom => "nanoom",
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.id() == id)
    }

    /// Case-insensitive; the bridge reports "Conalog".
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.name().eq_ignore_ascii_case(name.trim()))
    }

    /// Whether a neighbor's `vid` names this vendor, by name or by number.
    pub fn matches(self, vid: &Value) -> bool {
        matches_catalog(vid, self.name(), self.id())
    }
}

/// Product ids shared with the bridge's device metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Product {
    Stick,
    #[serde(rename = "guard_1_1")]
    Guard11,
    #[serde(rename = "guard_2_1")]
    Guard21,
    #[serde(rename = "booster_1_1")]
    Booster11,
    #[serde(rename = "booster_2_1")]
    Booster21,
}

impl Product {
    pub const ALL: [Product; 5] = [
        Product::Stick,
        Product::Guard11,
        Product::Guard21,
        Product::Booster11,
        Product::Booster21,
    ];

    pub fn id(self) -> u32 {
        match self {
            Product::Stick => 0,
            Product::Guard11 => 1,
            Product::Guard21 => 2,
            Product::Booster11 => 3,
            Product::Booster21 => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Product::Stick => "stick",
            Product::Guard11 => "guard_1_1",
            Product::Guard21 => "guard_2_1",
            Product::Booster11 => "booster_1_1",
            Product::Booster21 => "booster_2_1",
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.id() == id)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(name.trim()))
    }

    pub fn matches(self, pid: &Value) -> bool {
        matches_catalog(pid, self.name(), self.id())
    }
}

fn matches_catalog(value: &Value, name: &str, id: u32) -> bool {
    match value {
        Value::String(s) => s.eq_ignore_ascii_case(name),
        Value::Number(n) => n.as_u64() == Some(u64::from(id)),
        _ => false,
    }
}
