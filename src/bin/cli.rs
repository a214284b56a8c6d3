use clap::{Parser, Subcommand};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fs;

const SECRET_FILE: &str = ".viewcfg_secret";

#[derive(Parser)]
#[command(name = "viewcfg-cli")]
#[command(about = "CLI for the view configuration service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, env = "VIEWCFG_URL", default_value = "http://localhost:8000")]
    url: String,
}

#[derive(Subcommand)]
enum Commands {
    CreateEnv {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        slug: String,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short = 'b', long, default_value = "cli")]
        created_by: String,
    },
    ListEnvs,
    GetEnv {
        #[arg(short, long)]
        env_id: String,
    },
    /// Issue a secret; `--save` stores it for `secure-get`
    IssueKey {
        #[arg(short, long)]
        env_id: String,
        #[arg(short = 'b', long, default_value = "cli")]
        created_by: String,
        #[arg(long)]
        save: bool,
    },
    ListKeys {
        #[arg(short, long)]
        env_id: String,
    },
    Lookup {
        #[arg(short, long)]
        secret: Option<String>,
    },
    /// expire | pause | activate
    Key {
        #[arg(short, long)]
        key_id: String,
        #[arg(short, long)]
        action: String,
    },
    /// Create a view from a JSON file holding `{id, name, status?, menus}`
    CreateView {
        #[arg(short, long)]
        env_id: String,
        #[arg(short, long)]
        file: String,
    },
    GetView {
        #[arg(short, long)]
        id: String,
    },
    ListViews {
        #[arg(short, long)]
        env_id: String,
    },
    Activate {
        #[arg(short, long)]
        id: String,
    },
    Deactivate {
        #[arg(short, long)]
        id: String,
    },
    Copy {
        #[arg(short, long)]
        view_id: String,
        #[arg(short = 't', long = "to", num_args = 1.., required = true)]
        env_ids: Vec<String>,
    },
    Catalog,
    SecureGet {
        /// Tenant view id or view name
        #[arg(short, long)]
        view: String,
        #[arg(short, long)]
        secret: Option<String>,
    },
    Sync {
        #[arg(short, long)]
        env_id: String,
    },
    /// Remove the saved secret
    Forget,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssuedKey {
    secret: String,
    key_id: String,
}

fn saved_secret(explicit: Option<String>) -> String {
    explicit
        .or_else(|| fs::read_to_string(SECRET_FILE).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

async fn print_response(res: Response) -> Result<(), reqwest::Error> {
    let status = res.status();
    let text = res.text().await?;
    let body = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| serde_json::to_string_pretty(&v).ok())
        .unwrap_or(text);
    println!("{} {}", status, body);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = Client::new();
    let url = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::CreateEnv { name, slug, description, created_by } => {
            let res = client.post(format!("{}/envs", url))
                .json(&json!({
                    "envName": name,
                    "slug": slug,
                    "description": description,
                    "createdBy": created_by
                }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::ListEnvs => {
            let res = client.get(format!("{}/envs", url)).send().await?;
            print_response(res).await?;
        }
        Commands::GetEnv { env_id } => {
            let res = client.get(format!("{}/envs/{}", url, env_id)).send().await?;
            print_response(res).await?;
        }
        Commands::IssueKey { env_id, created_by, save } => {
            let res = client.post(format!("{}/envs/{}/keys", url, env_id))
                .json(&json!({ "createdBy": created_by }))
                .send()
                .await?;
            if res.status().is_success() {
                let issued: IssuedKey = res.json().await?;
                println!("Key {} issued. Secret (shown once): {}", issued.key_id, issued.secret);
                if save {
                    fs::write(SECRET_FILE, &issued.secret)?;
                    println!("Secret saved to {}", SECRET_FILE);
                }
            } else {
                print_response(res).await?;
            }
        }
        Commands::ListKeys { env_id } => {
            let res = client.get(format!("{}/envs/{}/keys", url, env_id)).send().await?;
            print_response(res).await?;
        }
        Commands::Lookup { secret } => {
            let res = client.post(format!("{}/envs/lookup", url))
                .json(&json!({ "secret": saved_secret(secret) }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Key { key_id, action } => {
            let res = client.post(format!("{}/envs/keys/{}/{}", url, key_id, action))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::CreateView { env_id, file } => {
            let mut body: Value = serde_json::from_str(&fs::read_to_string(&file)?)?;
            match body.as_object_mut() {
                Some(obj) => {
                    obj.insert("envId".to_string(), json!(env_id));
                }
                None => return Err(format!("{} must contain a JSON object", file).into()),
            }
            let res = client.post(format!("{}/views/", url)).json(&body).send().await?;
            print_response(res).await?;
        }
        Commands::GetView { id } => {
            let res = client.get(format!("{}/views/{}", url, id)).send().await?;
            print_response(res).await?;
        }
        Commands::ListViews { env_id } => {
            let res = client.get(format!("{}/views/env/{}", url, env_id)).send().await?;
            print_response(res).await?;
        }
        Commands::Activate { id } => {
            let res = client.put(format!("{}/views/{}/activate", url, id)).send().await?;
            print_response(res).await?;
        }
        Commands::Deactivate { id } => {
            let res = client.put(format!("{}/views/{}/deactivate", url, id)).send().await?;
            print_response(res).await?;
        }
        Commands::Copy { view_id, env_ids } => {
            let res = client.post(format!("{}/views/copy", url))
                .json(&json!({ "viewId": view_id, "envIds": env_ids }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Catalog => {
            let res = client.get(format!("{}/views/menus/all", url)).send().await?;
            print_response(res).await?;
        }
        Commands::SecureGet { view, secret } => {
            let res = client.get(format!("{}/secure-views/{}", url, view))
                .header("X-Token", saved_secret(secret))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Sync { env_id } => {
            let res = client.post(format!("{}/views/sync/{}", url, env_id)).send().await?;
            print_response(res).await?;
        }
        Commands::Forget => {
            let _ = fs::remove_file(SECRET_FILE);
            println!("Saved secret removed.");
        }
    }

    Ok(())
}
