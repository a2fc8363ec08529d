// Typed cache/deduplication keys, one variant per upstream endpoint.

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::LabelQuantity;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RequestKey {
    ProductDetail {
        product_id: String,
    },
    AvailableDates {
        product_id: String,
        start_date: NaiveDate,
    },
    OptionsByDate {
        product_id: String,
        date: NaiveDate,
    },
    OptionsByPeriod {
        product_id: String,
    },
    PriceByDate {
        product_id: String,
        option_code: String,
        start_date: NaiveDate,
        end_date: NaiveDate,
    },
    PriceByPeriod {
        product_id: String,
        option_code: String,
    },
    DynamicPrice {
        product_id: String,
        option_id: String,
        selected_date: NaiveDate,
        labels: Vec<LabelQuantity>,
        timeslot_id: Option<String>,
    },
}

impl RequestKey {
    /// Endpoint name used for monitoring.
    pub fn endpoint(&self) -> &'static str {
        match self {
            RequestKey::ProductDetail { .. } => "product_detail",
            RequestKey::AvailableDates { .. } => "available_dates",
            RequestKey::OptionsByDate { .. } => "options_by_date",
            RequestKey::OptionsByPeriod { .. } => "options_by_period",
            RequestKey::PriceByDate { .. } => "price_by_date",
            RequestKey::PriceByPeriod { .. } => "price_by_period",
            RequestKey::DynamicPrice { .. } => "dynamic_price",
        }
    }

    /// Deterministic string form. Field order is fixed by the type, so equal keys
    /// always serialize identically.
    pub fn to_key_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}
