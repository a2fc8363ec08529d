// Request bodies and decoded responses of the tours API.
// Responses keep unknown fields in `extra` so nothing the upstream sends is lost.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelQuantity {
    pub id: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timeslot {
    pub id: String,
}

/// Body of `POST /product/{id}/options/{optionId}/dynamic-price`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicPriceRequest {
    pub selected_date: NaiveDate,
    pub labels: Vec<LabelQuantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeslot: Option<Timeslot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDetail {
    pub id: Value,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableDate {
    pub date: NaiveDate,
    #[serde(default)]
    pub available: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductOption {
    pub id: Value,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
