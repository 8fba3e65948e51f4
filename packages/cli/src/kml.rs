//! Polygons from map.geo.admin.ch drawings.
//!
//! A drawing shared from the federal map viewer is a short link
//! (`https://s.geo.admin.ch/...`) that redirects to a viewer URL embedding
//! the drawing's KML address. The KML holds the polygon ring in its first
//! `<coordinates>` element as `lon,lat[,alt]` tuples.

use std::time::Duration;

use geo::Polygon;
use quick_xml::Reader;
use quick_xml::events::Event;

const KML_API_PREFIX: &str = "https://public.geo.admin.ch/api/kml";
const FEATURE_INFO_SUFFIX: &str = "&featureInfo=default";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors while turning a drawing link into a polygon.
#[derive(Debug, thiserror::Error)]
pub enum KmlError {
    /// Downloading the KML failed.
    #[error(transparent)]
    Http(#[from] briefkasten_http::HttpError),

    /// Building the client or following the share link failed.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The link did not resolve to a KML drawing.
    #[error("{url} does not point to a map.geo.admin.ch drawing")]
    NotADrawing {
        /// The resolved URL.
        url: String,
    },

    /// The KML is not well-formed XML.
    #[error("KML parse error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// No `<coordinates>` element was found.
    #[error("KML contains no coordinates")]
    NoCoordinates,

    /// A coordinate tuple is not `lon,lat[,alt]`.
    #[error("Invalid KML coordinate {value:?}")]
    Coordinate {
        /// The offending tuple.
        value: String,
    },

    /// The ring does not form a polygon.
    #[error(transparent)]
    Polygon(#[from] briefkasten_tiler::TilerError),
}

/// Cuts the KML address out of a resolved viewer URL.
#[must_use]
pub fn extract_kml_url(resolved: &str) -> Option<String> {
    let start = resolved.find(KML_API_PREFIX)?;
    let url = &resolved[start..];
    let url = url.split(FEATURE_INFO_SUFFIX).next().unwrap_or(url);
    Some(url.to_string())
}

/// Reads the first `<coordinates>` element of a KML document.
///
/// # Errors
///
/// Returns [`KmlError`] if the XML is malformed, has no coordinates, or a
/// tuple is not numeric.
pub fn parse_kml_coordinates(xml: &str) -> Result<Vec<[f64; 2]>, KmlError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut in_coordinates = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.local_name().as_ref() == b"coordinates" => {
                in_coordinates = true;
            }
            Event::Text(text) if in_coordinates => {
                return parse_tuples(&text.unescape()?);
            }
            Event::End(e) if e.local_name().as_ref() == b"coordinates" => {
                in_coordinates = false;
            }
            Event::Eof => return Err(KmlError::NoCoordinates),
            _ => {}
        }
    }
}

fn parse_tuples(text: &str) -> Result<Vec<[f64; 2]>, KmlError> {
    let coords = text
        .split_whitespace()
        .map(|tuple| {
            let mut parts = tuple.split(',').map(|p| p.trim().parse::<f64>());
            match (parts.next(), parts.next()) {
                (Some(Ok(lon)), Some(Ok(lat))) => Ok([lon, lat]),
                _ => Err(KmlError::Coordinate {
                    value: tuple.to_string(),
                }),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    if coords.is_empty() {
        return Err(KmlError::NoCoordinates);
    }
    Ok(coords)
}

/// Follows a share link's redirects and returns the KML address.
async fn resolve_share_link(client: &reqwest::Client, url: &str) -> Result<String, KmlError> {
    if let Some(kml) = extract_kml_url(url) {
        return Ok(kml);
    }

    let response = client.head(url).send().await?.error_for_status()?;
    let resolved = response.url().as_str();
    log::debug!("Share link {url} resolved to {resolved}");

    extract_kml_url(resolved).ok_or_else(|| KmlError::NotADrawing {
        url: url.to_string(),
    })
}

/// Downloads the drawing behind `url` and returns its polygon.
///
/// # Errors
///
/// Returns [`KmlError`] if the link does not resolve to a drawing or the
/// KML cannot be read.
pub async fn load_kml_polygon(url: &str, max_retries: u32) -> Result<Polygon<f64>, KmlError> {
    let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

    let kml_url = resolve_share_link(&client, url).await?;
    log::info!("Loading drawing from {kml_url}");

    let xml = briefkasten_http::send_text(|| client.get(&kml_url), max_retries).await?;
    let coords = parse_kml_coordinates(&xml)?;

    Ok(briefkasten_tiler::polygon_from_coords(&coords)?)
}
