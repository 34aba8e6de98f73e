//! Catalog Item (service offering)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pricing;
use crate::domain::value_objects::Money;
use crate::Result;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: Uuid,
    pub name: String,
    pub base_price: Money,
    pub discount_percent: Option<Decimal>,
    pub fields: Vec<FieldSpec>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A custom field a service asks the buyer for (account username, password...).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub label: Option<String>,
}

fn default_required() -> bool { true }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Text,
    Password,
    Email,
    Username,
}

impl FieldSpec {
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self { name: name.into(), kind, required: true, label: None }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Label shown to the buyer: the declared label, or the field name in title case.
    pub fn display_label(&self) -> String {
        if let Some(label) = self.label.as_deref().filter(|l| !l.trim().is_empty()) {
            return label.to_string();
        }
        self.name
            .split('_')
            .filter(|w| !w.is_empty())
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl CatalogItem {
    pub fn create(name: impl Into<String>, base_price: Money) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(), name: name.into(), base_price, discount_percent: None,
            fields: vec![], active: true, created_at: now, updated_at: now,
        }
    }

    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.required)
    }

    /// Current unit price after discount, at `scale` decimal places.
    pub fn effective_price(&self, scale: u32) -> Result<Money> {
        pricing::effective_price(self.base_price, self.discount_percent, scale)
    }

    pub fn set_discount(&mut self, percent: Option<Decimal>) -> Result<()> {
        if let Some(p) = percent {
            pricing::check_discount(p)?;
        }
        self.discount_percent = percent;
        self.touch();
        Ok(())
    }

    pub fn update_price(&mut self, price: Decimal) -> Result<()> {
        self.base_price = pricing::check_price(price)?;
        self.touch();
        Ok(())
    }

    pub fn deactivate(&mut self) { self.active = false; self.touch(); }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}
