//! Field validator: every required field a service declares must be filled
//! and well formed before a line can be checked out.

use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::{CartItem, CatalogItem, FieldKind};
use crate::domain::value_objects::FieldValues;
use crate::{CheckoutError, Result};

/// Why a single cart line blocked checkout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ItemRejection {
    pub cart_item_id: Uuid,
    pub catalog_item_id: Uuid,
    pub item_name: String,
    pub missing: Vec<String>,
}

impl ItemRejection {
    pub fn summary(rejections: &[ItemRejection]) -> String {
        rejections
            .iter()
            .map(|r| format!("{}: {}", r.item_name, r.missing.join(", ")))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Labels of the required fields that are absent, blank or malformed.
pub fn missing_fields(fields: &FieldValues, catalog_item: &CatalogItem) -> Vec<String> {
    catalog_item
        .required_fields()
        .filter_map(|spec| {
            let value = fields.get(&spec.name).map(str::trim).unwrap_or_default();
            if value.is_empty() {
                return Some(spec.display_label());
            }
            if spec.kind == FieldKind::Email && !validator::validate_email(value) {
                return Some(format!("{} (invalid email)", spec.display_label()));
            }
            None
        })
        .collect()
}

pub fn check_fields(fields: &FieldValues, catalog_item: &CatalogItem) -> Result<()> {
    let missing = missing_fields(fields, catalog_item);
    if missing.is_empty() { Ok(()) } else { Err(CheckoutError::MissingFields(missing)) }
}

pub fn validate(cart_item: &CartItem, catalog_item: &CatalogItem) -> Result<()> {
    check_fields(&cart_item.fields, catalog_item)
}
