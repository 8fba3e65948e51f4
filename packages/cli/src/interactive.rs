//! Menu-driven interface for running a calculation without flags.

use dialoguer::{Confirm, Input, Select};

use crate::input::PolygonArgs;
use crate::{ComputeOptions, MultiProgress};

/// Top-level actions of the interactive menu.
enum Action {
    ComputeFromLink,
    ComputeFromFile,
    ListCategories,
}

impl Action {
    const ALL: &[Self] = &[Self::ComputeFromLink, Self::ComputeFromFile, Self::ListCategories];

    #[must_use]
    const fn label(&self) -> &'static str {
        match self {
            Self::ComputeFromLink => "Count mailboxes for a map.geo.admin.ch drawing",
            Self::ComputeFromFile => "Count mailboxes for a GeoJSON file",
            Self::ListCategories => "List building categories",
        }
    }
}

/// Prompts for an action and its inputs, then runs it.
///
/// # Errors
///
/// Returns an error if a prompt fails or the selected action fails.
pub async fn run(multi: &MultiProgress) -> Result<(), Box<dyn std::error::Error>> {
    println!("Briefkasten");
    println!();

    let labels: Vec<&str> = Action::ALL.iter().map(Action::label).collect();

    let idx = Select::new()
        .with_prompt("What would you like to do?")
        .items(&labels)
        .default(0)
        .interact()?;

    let args = match Action::ALL[idx] {
        Action::ComputeFromLink => {
            let url: String = Input::new()
                .with_prompt("Link to the drawing")
                .interact_text()?;
            PolygonArgs {
                geojson: None,
                coords: None,
                kml_url: Some(url.trim().to_string()),
            }
        }
        Action::ComputeFromFile => {
            let path: String = Input::new()
                .with_prompt("Path to the GeoJSON file")
                .interact_text()?;
            PolygonArgs {
                geojson: Some(path.trim().into()),
                coords: None,
                kml_url: None,
            }
        }
        Action::ListCategories => {
            print!("{}", crate::report::render_categories());
            return Ok(());
        }
    };

    let count_businesses = Confirm::new()
        .with_prompt("Count businesses from the Overture places dataset?")
        .default(true)
        .interact()?;

    let options = ComputeOptions {
        policy: None,
        no_businesses: !count_businesses,
        json: false,
        export_tiles: None,
        top: 20,
    };

    let settings = crate::load_settings(None)?;
    let polygon = crate::input::load_polygon(&args, settings.registry.max_retries).await?;
    crate::compute(multi, &polygon, settings, &options).await
}
