//! Alias resolution from raw upstream rows to canonical records.
//!
//! The upstream tables accumulated several generations of field names for the
//! same data (`Senior_First`, `First_Name`, `firstName`, ...). A
//! [`NormalizationSchema`] lists, per canonical field, the raw aliases to try
//! in order; the first non-empty one wins. Normalization is pure and never
//! fails; missing data yields missing fields or the configured default.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregate::primary_identifier;
use crate::config::RetrievalConfig;
use crate::models::{CanonicalRecord, RawRecord};

/// Canonical name of the derived full-name field.
pub const MEMBER_NAME: &str = "memberName";

/// Region used when no region alias carries a value.
pub const DEFAULT_REGION: &str = "Unassigned";

/// Status used when no status alias carries a value.
pub const DEFAULT_STATUS: &str = "Pending";

/// How one canonical field is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    /// Canonical field name
    pub name: String,
    /// Raw field names tried in order
    pub aliases: Vec<String>,
    /// Value used when no alias resolves
    #[serde(default)]
    pub default: Option<String>,
}

impl FieldRule {
    /// Rule for `name` resolved through `aliases`, with no default.
    pub fn new(name: &str, aliases: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            default: None,
        }
    }

    /// Builder method to set the fallback value.
    pub fn with_default(mut self, default: &str) -> Self {
        self.default = Some(default.to_string());
        self
    }
}

/// Alias table for one family of tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationSchema {
    /// Canonical fields, resolved independently
    pub fields: Vec<FieldRule>,
    /// Aliases for the given name used to derive `memberName`
    pub first_name_aliases: Vec<String>,
    /// Aliases for the family name used to derive `memberName`
    pub last_name_aliases: Vec<String>,
    /// Single-field full-name aliases, used when first and last are both absent
    pub full_name_aliases: Vec<String>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl Default for NormalizationSchema {
    /// Field names seen across the case-management tables.
    fn default() -> Self {
        Self {
            fields: vec![
                FieldRule::new(
                    "region",
                    &[
                        "Region",
                        "region",
                        "County",
                        "county",
                        "Senior_County",
                        "Service_Area",
                    ],
                )
                .with_default(DEFAULT_REGION),
                FieldRule::new(
                    "status",
                    &["Status", "status", "Case_Status", "Client_Status"],
                )
                .with_default(DEFAULT_STATUS),
                FieldRule::new(
                    "healthPlan",
                    &["Health_Plan", "HealthPlan", "health_plan", "Plan"],
                ),
                FieldRule::new(
                    "phone",
                    &[
                        "Phone",
                        "phone",
                        "Senior_Phone",
                        "Phone_Number",
                        "Primary_Phone",
                    ],
                ),
                FieldRule::new(
                    "email",
                    &["Email", "email", "Senior_Email", "Email_Address"],
                ),
                FieldRule::new(
                    "dateOfBirth",
                    &["DOB", "dob", "Date_of_Birth", "Birth_Date", "Senior_DOB"],
                ),
                FieldRule::new(
                    "address",
                    &["Address", "address", "Street_Address", "Senior_Address"],
                ),
                FieldRule::new("city", &["City", "city", "Senior_City"]),
                FieldRule::new("zip", &["Zip", "ZIP", "zip", "Zip_Code", "Postal_Code"]),
                FieldRule::new(
                    "caseWorker",
                    &["Case_Worker", "Caseworker", "Assigned_To", "Social_Worker"],
                ),
            ],
            first_name_aliases: strings(&[
                "Senior_First",
                "First_Name",
                "FirstName",
                "first_name",
                "firstName",
                "First",
            ]),
            last_name_aliases: strings(&[
                "Senior_Last",
                "Last_Name",
                "LastName",
                "last_name",
                "lastName",
                "Last",
            ]),
            full_name_aliases: strings(&[
                "Senior_Name",
                "Full_Name",
                "FullName",
                "Name",
                "name",
                MEMBER_NAME,
            ]),
        }
    }
}

/// Maps raw records to canonical ones.
#[derive(Debug, Clone)]
pub struct Normalizer {
    schema: NormalizationSchema,
    id_aliases: Vec<String>,
}

impl Normalizer {
    /// Creates a normalizer for `schema`, resolving the record id through `id_aliases`.
    pub fn new(schema: NormalizationSchema, id_aliases: Vec<String>) -> Self {
        Self { schema, id_aliases }
    }

    /// Default case-management schema with the configured identifier aliases.
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self::new(NormalizationSchema::default(), config.id_aliases.clone())
    }

    /// The alias table in use.
    pub fn schema(&self) -> &NormalizationSchema {
        &self.schema
    }

    /// Normalizes a borrowed record, copying it into the passthrough.
    pub fn normalize(&self, raw: &RawRecord) -> CanonicalRecord {
        self.normalize_owned(raw.clone())
    }

    /// Normalizes a record, moving it into the passthrough.
    pub fn normalize_owned(&self, raw: RawRecord) -> CanonicalRecord {
        let mut fields = BTreeMap::new();

        for rule in &self.schema.fields {
            let value = resolve(&raw, &rule.aliases).or_else(|| rule.default.clone());
            if let Some(value) = value {
                fields.insert(rule.name.clone(), value);
            }
        }

        if let Some(name) = self.member_name(&raw) {
            fields.insert(MEMBER_NAME.to_string(), name);
        }

        CanonicalRecord {
            id: primary_identifier(&raw, &self.id_aliases),
            fields,
            passthrough: raw,
        }
    }

    fn member_name(&self, raw: &RawRecord) -> Option<String> {
        let first = resolve(raw, &self.schema.first_name_aliases);
        let last = resolve(raw, &self.schema.last_name_aliases);

        let joined = collapse_whitespace(&format!(
            "{} {}",
            first.as_deref().unwrap_or_default(),
            last.as_deref().unwrap_or_default()
        ));
        if !joined.is_empty() {
            return Some(joined);
        }

        resolve(raw, &self.schema.full_name_aliases).map(|full| collapse_whitespace(&full))
    }
}

/// First alias whose value is a non-empty scalar after trimming.
fn resolve(raw: &RawRecord, aliases: &[String]) -> Option<String> {
    aliases.iter().find_map(|alias| scalar_text(raw.get(alias)?))
}

fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}
