//! Grocy REST client.
//!
//! Fetches shopping-list rows and resolves them into named items: product
//! names, purchase-unit amounts, unit labels and product-group categories.
//! Lookups are cached for the duration of a run; the scheduler clears the
//! caches between runs.
//!
//! Grocy serializes numbers inconsistently (sometimes as strings), so the
//! numeric wire fields go through a tolerant deserializer.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::clients::{ClientError, ClientResult, SourceClient, SourceItem};
use crate::config::GrocyConfig;

const API_KEY_HEADER: &str = "GROCY-API-KEY";

#[derive(Debug, Clone, Deserialize)]
struct ShoppingListRow {
    #[serde(default, deserialize_with = "de_opt_u32")]
    product_id: Option<u32>,
    #[serde(default)]
    note: Option<String>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    amount: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_u32")]
    qu_id: Option<u32>,
    #[serde(default, deserialize_with = "de_opt_u32")]
    done: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct Product {
    name: String,
    #[serde(default, deserialize_with = "de_opt_u32")]
    product_group_id: Option<u32>,
    #[serde(default, deserialize_with = "de_opt_u32")]
    qu_id_purchase: Option<u32>,
    #[serde(default, deserialize_with = "de_opt_u32")]
    qu_id_stock: Option<u32>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    qu_factor_purchase_to_stock: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct QuantityUnit {
    name: String,
    #[serde(default)]
    name_plural: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProductGroup {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct UnitConversion {
    #[serde(default, deserialize_with = "de_opt_u32")]
    from_qu_id: Option<u32>,
    #[serde(default, deserialize_with = "de_opt_u32")]
    to_qu_id: Option<u32>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    factor: Option<f64>,
}

pub struct GrocyClient {
    http: reqwest::Client,
    base_url: String,
    products: Mutex<HashMap<u32, Product>>,
    quantity_units: Mutex<HashMap<u32, QuantityUnit>>,
    product_groups: Mutex<HashMap<u32, ProductGroup>>,
    conversions: Mutex<HashMap<u32, Vec<UnitConversion>>>,
}

impl GrocyClient {
    pub fn new(api_url: &str, api_key: &str, timeout_secs: u64) -> ClientResult<Self> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(api_key)
            .map_err(|_| ClientError::InvalidConfig("grocy api key is not a valid header value".into()))?;
        headers.insert(API_KEY_HEADER, key);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| ClientError::InvalidConfig(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            base_url: api_url.trim_end_matches('/').to_string(),
            products: Mutex::new(HashMap::new()),
            quantity_units: Mutex::new(HashMap::new()),
            product_groups: Mutex::new(HashMap::new()),
            conversions: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_config(config: &GrocyConfig) -> ClientResult<Self> {
        Self::new(&config.api_url, &config.api_key, config.timeout_secs)
    }

    /// Empties the lookup caches so the next run sees fresh product data.
    pub async fn clear_caches(&self) {
        self.products.lock().await.clear();
        self.quantity_units.lock().await.clear();
        self.product_groups.lock().await.clear();
        self.conversions.lock().await.clear();
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> ClientResult<T> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self.http.get(&url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            let detail = format!("GET {path}: {}", body.chars().take(200).collect::<String>());
            return Err(ClientError::from_status(status.as_u16(), detail, retry_after));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ClientError::Decode(format!("GET {path}: {e}")))
    }

    async fn product(&self, id: u32) -> ClientResult<Product> {
        if let Some(found) = self.products.lock().await.get(&id).cloned() {
            return Ok(found);
        }
        let fetched: Product = self.get_json(&format!("objects/products/{id}"), &[]).await?;
        self.products.lock().await.insert(id, fetched.clone());
        Ok(fetched)
    }

    async fn quantity_unit(&self, id: u32) -> ClientResult<QuantityUnit> {
        if let Some(found) = self.quantity_units.lock().await.get(&id).cloned() {
            return Ok(found);
        }
        let fetched: QuantityUnit = self
            .get_json(&format!("objects/quantity_units/{id}"), &[])
            .await?;
        self.quantity_units.lock().await.insert(id, fetched.clone());
        Ok(fetched)
    }

    async fn product_group(&self, id: u32) -> ClientResult<ProductGroup> {
        if let Some(found) = self.product_groups.lock().await.get(&id).cloned() {
            return Ok(found);
        }
        let fetched: ProductGroup = self
            .get_json(&format!("objects/product_groups/{id}"), &[])
            .await?;
        self.product_groups.lock().await.insert(id, fetched.clone());
        Ok(fetched)
    }

    async fn product_conversions(&self, product_id: u32) -> ClientResult<Vec<UnitConversion>> {
        if let Some(found) = self.conversions.lock().await.get(&product_id).cloned() {
            return Ok(found);
        }
        let fetched: Vec<UnitConversion> = self
            .get_json(
                "objects/quantity_unit_conversions",
                &[("query[]", format!("product_id={product_id}"))],
            )
            .await?;
        self.conversions
            .lock()
            .await
            .insert(product_id, fetched.clone());
        Ok(fetched)
    }

    /// Resolves one raw row. Rows without a product use their note as the
    /// name; rows with neither are dropped. Permanent lookup failures for
    /// unit or category degrade the item instead of failing the fetch.
    async fn resolve_row(&self, row: &ShoppingListRow) -> ClientResult<Option<SourceItem>> {
        let product_id = match row.product_id {
            Some(id) => id,
            None => {
                let name = row.note.clone().unwrap_or_default();
                if name.trim().is_empty() {
                    return Ok(None);
                }
                return Ok(Some(SourceItem {
                    name,
                    amount: row.amount,
                    unit: None,
                    unit_plural: None,
                    category: None,
                }));
            }
        };

        let product = self.product(product_id).await?;
        let conversions = self.product_conversions(product_id).await?;
        let amount = row
            .amount
            .map(|a| convert_amount(a, row.qu_id, &product, &conversions));

        let unit = match product.qu_id_purchase {
            Some(qu_id) => match self.quantity_unit(qu_id).await {
                Ok(unit) => Some(unit),
                Err(e) if !e.is_transient() => {
                    debug!(qu_id, error = %e, "quantity unit lookup failed, item stays unitless");
                    None
                }
                Err(e) => return Err(e),
            },
            None => None,
        };
        let category = match product.product_group_id {
            Some(group_id) => match self.product_group(group_id).await {
                Ok(group) => Some(group.name),
                Err(e) if !e.is_transient() => {
                    debug!(group_id, error = %e, "product group lookup failed, item stays uncategorized");
                    None
                }
                Err(e) => return Err(e),
            },
            None => None,
        };

        Ok(Some(SourceItem {
            name: product.name,
            amount,
            unit: unit.as_ref().map(|u| u.name.clone()),
            unit_plural: unit.as_ref().and_then(|u| u.name_plural.clone()),
            category,
        }))
    }
}

/// Converts a row amount into the product's purchase unit. Tries the
/// product's conversion list in both directions, then the builtin
/// purchase-to-stock factor. Unresolvable conversions keep the raw
/// amount.
fn convert_amount(
    amount: f64,
    row_qu_id: Option<u32>,
    product: &Product,
    conversions: &[UnitConversion],
) -> f64 {
    let row_qu = match row_qu_id {
        Some(id) => id,
        None => return amount,
    };
    let purchase_qu = match product.qu_id_purchase {
        Some(id) => id,
        None => return amount,
    };
    if row_qu == purchase_qu {
        return amount;
    }

    for conv in conversions {
        if conv.from_qu_id == Some(row_qu) && conv.to_qu_id == Some(purchase_qu) {
            if let Some(factor) = conv.factor {
                return amount * factor;
            }
        }
    }
    for conv in conversions {
        if conv.from_qu_id == Some(purchase_qu) && conv.to_qu_id == Some(row_qu) {
            if let Some(factor) = conv.factor {
                if factor != 0.0 {
                    return amount / factor;
                }
            }
        }
    }
    if product.qu_id_stock == Some(row_qu) {
        if let Some(factor) = product.qu_factor_purchase_to_stock {
            if factor != 0.0 {
                return amount / factor;
            }
        }
    }

    debug!(row_qu, purchase_qu, "no unit conversion found, keeping raw amount");
    amount
}

#[async_trait]
impl SourceClient for GrocyClient {
    async fn fetch_list_items(&self, list_id: u32) -> ClientResult<Vec<SourceItem>> {
        let rows: Vec<ShoppingListRow> = self
            .get_json(
                "objects/shopping_list",
                &[("query[]", format!("shopping_list_id={list_id}"))],
            )
            .await?;

        let mut items = Vec::new();
        for row in rows {
            // done rows were already bought
            if row.done.unwrap_or(0) != 0 {
                continue;
            }
            match self.resolve_row(&row).await {
                Ok(Some(item)) => items.push(item),
                Ok(None) => {}
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    warn!(list_id, error = %e, "skipping shopping list row that failed to resolve");
                }
            }
        }
        Ok(items)
    }

    async fn check_connection(&self) -> ClientResult<()> {
        let _: Value = self.get_json("system/info", &[]).await?;
        Ok(())
    }
}

fn de_opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_to_f64))
}

fn de_opt_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_to_f64).map(|f| f as u32))
}

fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
