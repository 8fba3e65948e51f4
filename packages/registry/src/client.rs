//! HTTP client for the geo.admin.ch identify endpoint.

use std::time::Duration;

use async_trait::async_trait;
use geo::Polygon;
use serde_json::{Value, json};

use crate::{IdentifyService, RegistryConfig, RegistryError};

/// Queries the register through `MapServer/identify`.
pub struct GeoAdminClient {
    client: reqwest::Client,
    config: RegistryConfig,
}

impl GeoAdminClient {
    /// Builds a client with the configured request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Client`] if the HTTP client cannot be built.
    pub fn new(config: RegistryConfig) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl IdentifyService for GeoAdminClient {
    async fn identify(&self, area: &Polygon<f64>) -> Result<Vec<Value>, RegistryError> {
        let params = identify_params(area, &self.config);

        log::debug!(
            "Identify request with {} ring vertices",
            area.exterior().0.len()
        );

        let body = briefkasten_http::send_json(
            || self.client.get(&self.config.endpoint).query(&params),
            self.config.max_retries,
        )
        .await?;

        parse_identify_response(body)
    }
}

/// Builds the `esriGeometryPolygon` geometry object for a polygon.
#[must_use]
pub fn esri_polygon(area: &Polygon<f64>, spatial_reference: u32) -> Value {
    let rings: Vec<Vec<[f64; 2]>> = std::iter::once(area.exterior())
        .chain(area.interiors())
        .map(|ring| ring.0.iter().map(|c| [c.x, c.y]).collect())
        .collect();

    json!({
        "rings": rings,
        "spatialReference": { "wkid": spatial_reference },
    })
}

/// Query parameters of one identify request.
#[must_use]
pub fn identify_params(
    area: &Polygon<f64>,
    config: &RegistryConfig,
) -> Vec<(&'static str, String)> {
    vec![
        ("geometryType", "esriGeometryPolygon".to_string()),
        (
            "geometry",
            esri_polygon(area, config.spatial_reference).to_string(),
        ),
        ("tolerance", "0".to_string()),
        ("layers", config.layer.clone()),
        ("imageDisplay", "500,600,96".to_string()),
        ("sr", config.spatial_reference.to_string()),
        ("limit", config.result_limit.to_string()),
        ("returnGeometry", "false".to_string()),
    ]
}

/// Extracts the `results` array from an identify response.
///
/// # Errors
///
/// Returns [`RegistryError::Response`] if the body has no `results` array.
pub fn parse_identify_response(body: Value) -> Result<Vec<Value>, RegistryError> {
    match body {
        Value::Object(mut map) => match map.remove("results") {
            Some(Value::Array(results)) => Ok(results),
            _ => Err(RegistryError::Response {
                message: "missing `results` array".to_string(),
            }),
        },
        _ => Err(RegistryError::Response {
            message: "response is not a JSON object".to_string(),
        }),
    }
}
