// ── Organization (tenant) domain types ──

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::entity_id::EntityId;

/// Subscription plan of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Pro,
    Enterprise,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationSettings {
    pub theme: Option<String>,
    pub custom_domain: Option<String>,
    /// How long telemetry is kept, in days. Also bounds series age.
    pub retention_days: u32,
}

impl Default for OrganizationSettings {
    fn default() -> Self {
        Self {
            theme: None,
            custom_domain: None,
            retention_days: 30,
        }
    }
}

/// Tenant boundary. Every device, command, rule and alert belongs to one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: EntityId,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub plan: Plan,
    #[serde(default)]
    pub settings: OrganizationSettings,
}

impl Organization {
    pub fn new(id: impl Into<EntityId>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            slug: slugify(&name),
            name,
            plan: Plan::default(),
            settings: OrganizationSettings::default(),
        }
    }
}

/// Lowercase, ASCII-alphanumeric words joined by `-`.
pub fn slugify(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Acme  Labs, Inc."), "acme-labs-inc");
    }

    #[test]
    fn new_organization_derives_slug() {
        let org = Organization::new("org-1", "Green House");
        assert_eq!(org.slug, "green-house");
        assert_eq!(org.plan, Plan::Free);
        assert_eq!(org.settings.retention_days, 30);
    }
}
