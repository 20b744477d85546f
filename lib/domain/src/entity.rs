use serde::Serialize;

use crate::config::{ConnectionConfig, MetricQuery};

/// How a consumer should present one metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityDescriptor {
    pub unique_id: String,
    pub name: String,
    pub metric: String,
    pub unit: Option<String>,
}

impl EntityDescriptor {
    pub fn for_metric(connection: &ConnectionConfig, metric: &MetricQuery) -> Self {
        let unit = (!metric.unit.is_empty()).then(|| metric.unit.clone());
        Self {
            unique_id: slugify(&format!("{}_{}_sensor", connection.name, metric.name)),
            name: metric.name.clone(),
            metric: metric.name.clone(),
            unit,
        }
    }
}

/// Lowercase, with every run of non-alphanumeric characters collapsed to `_`.
pub fn slugify(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for ch in raw.chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.extend(ch.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    slug
}
