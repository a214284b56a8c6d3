//! Seed script for the view configuration service
//!
//! Creates (or reuses) a `production` environment, rebuilds its views from
//! the bundled sample file and issues a fresh access key.
//! Run: cargo run --bin load_data
//! Then: cargo run --bin viewcfg-cli -- secure-get --view 1 --secret <printed secret>

use view_config::auth::issue_key;
use view_config::config::ServerConfig;
use view_config::environments::{create_environment, NewEnvironment};
use view_config::importer::rebuild_environment;
use view_config::models::ViewDraft;
use view_config::storage::Storage;
use view_config::telemetry;

const SAMPLE_VIEWS: &str = include_str!("sample_views.json");
const DEFAULT_SLUG: &str = "production";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::from_env();
    let _log_guard = telemetry::init(&config);

    let storage = Storage::open(&config.data_dir_str())?;

    let env = match storage.get_environment_by_slug(DEFAULT_SLUG)? {
        Some(existing) => existing,
        None => create_environment(
            &storage,
            NewEnvironment {
                env_name: "Production".to_string(),
                slug: DEFAULT_SLUG.to_string(),
                description: Some("Seeded by load_data".to_string()),
                created_by: "load_data".to_string(),
            },
        )?,
    };

    let drafts: Vec<ViewDraft> = serde_json::from_str(SAMPLE_VIEWS)?;
    let report = rebuild_environment(&storage, env.id, &drafts)?;
    println!(
        "Loaded {} views into '{}' ({} replaced, {} failed)",
        report.views_processed,
        env.slug,
        report.cleared,
        report.failed_view_ids.len()
    );

    let issued = issue_key(&storage, env.id, "load_data", config.secret_hash_cost)?;
    println!("Environment id: {}", env.id);
    println!("Access secret (shown once): {}", issued.secret);

    storage.flush().await?;
    Ok(())
}
