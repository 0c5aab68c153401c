use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use url::Url;

use scrapekit::config::AppConfig;
use scrapekit::export::write_json;
use scrapekit::jokes::{Joke, JOKE_API_URL};
use scrapekit::logging::{init_logging, LogContext, RequestIdGenerator};
use scrapekit::schema::ShapeRegistry;
use scrapekit::storage::Database;
use scrapekit::transport::{DriverManager, HttpClient, HttpResponse, Locator, Method, TlsClient};
use scrapekit::ScrapeKitResult;

#[derive(Parser)]
#[command(name = "scrapekit")]
#[command(about = "Scraping scaffolds: HTTP, TLS-profile and browser clients with SQLite persistence")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, help = "Enable verbose logging")]
    verbose: bool,

    #[arg(short, long, help = "Configuration file path")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch URLs concurrently with the HTTP client
    Fetch {
        #[arg(required = true, help = "URLs to request")]
        urls: Vec<Url>,

        #[arg(short, long, default_value = "GET", help = "HTTP method")]
        method: Method,

        #[arg(short = 'H', long = "header", help = "Extra header as NAME=VALUE")]
        headers: Vec<String>,
    },

    /// Fetch URLs through a browser fingerprint preset
    TlsFetch {
        #[arg(required = true, help = "URLs to request")]
        urls: Vec<Url>,

        #[arg(long, help = "Preset identifier, e.g. chrome_108")]
        client: Option<String>,
    },

    /// Fetch jokes from JokeAPI and export them
    Jokes {
        #[arg(short = 'n', long, default_value_t = 6, help = "Number of jokes to fetch")]
        count: usize,

        #[arg(long, help = "Persist fetched jokes to the database")]
        save: bool,

        #[arg(short, long, help = "Output file path")]
        output: Option<PathBuf>,
    },

    /// Inspect stored jokes
    Db {
        #[command(subcommand)]
        action: DbAction,
    },

    /// Open a page in the browser, optionally search, then scroll to the bottom
    Browse {
        #[arg(help = "Page to open")]
        url: Url,

        #[arg(short, long, help = "Text typed into the page's `q` field")]
        query: Option<String>,
    },
}

#[derive(Subcommand)]
enum DbAction {
    /// List every stored joke
    List,
    /// Show one joke
    Get { id: i64 },
    /// Delete one joke
    Delete { id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path).await?,
        None => AppConfig::load().await?,
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }

    init_logging(&config.logging)?;

    let context = LogContext::new("main", "startup")
        .with_request_id(RequestIdGenerator::generate())
        .with_string_field("version", env!("CARGO_PKG_VERSION"));
    scrapekit::log_info!(context, "scrapekit starting up");

    let result = match cli.command {
        Commands::Fetch { urls, method, headers } => fetch(&config, urls, method, headers).await,
        Commands::TlsFetch { urls, client } => tls_fetch(&config, urls, client).await,
        Commands::Jokes { count, save, output } => jokes(&config, count, save, output).await,
        Commands::Db { action } => db(&config, action).await,
        Commands::Browse { url, query } => browse(&config, url.as_str(), query.as_deref()).await,
    };

    if let Err(e) = &result {
        error!("Command failed: {:#}", e);
    }
    result
}

fn parse_headers(raw: &[String]) -> Result<HashMap<String, String>> {
    raw.iter()
        .map(|entry| {
            let (name, value) = entry
                .split_once('=')
                .with_context(|| format!("Header '{}' is not NAME=VALUE", entry))?;
            Ok((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

fn report(urls: &[String], responses: &[ScrapeKitResult<HttpResponse>]) {
    for (url, response) in urls.iter().zip(responses) {
        match response {
            Ok(response) => match response.text() {
                Ok(body) => println!("{} [{}]\n{}\n", url, response.status, body),
                Err(e) => error!("Failed to decode response for {}: {}", url, e),
            },
            Err(e) => error!("Failed to get response for {}: {}", url, e),
        }
    }
}

async fn fetch(config: &AppConfig, urls: Vec<Url>, method: Method, headers: Vec<String>) -> Result<()> {
    let urls: Vec<String> = urls.into_iter().map(String::from).collect();
    let client = HttpClient::new(&config.http);
    client.set_headers(parse_headers(&headers)?).await;

    let responses = client.send_multi_request(&urls, method).await;
    report(&urls, &responses);

    client.close().await;
    Ok(())
}

async fn tls_fetch(config: &AppConfig, urls: Vec<Url>, identifier: Option<String>) -> Result<()> {
    let urls: Vec<String> = urls.into_iter().map(String::from).collect();
    let mut tls = config.tls.clone();
    if let Some(identifier) = identifier {
        tls.client_identifier = identifier;
    }
    let client = TlsClient::new(&tls)?;

    let responses = client.send_multi_request(&urls, Method::Get).await;
    report(&urls, &responses);

    client.close().await;
    Ok(())
}

async fn open_database(config: &AppConfig) -> Result<Database> {
    let db = Database::open(&config.database, Arc::new(ShapeRegistry::new())).await?;
    db.init::<Joke>().await?;
    Ok(db)
}

async fn jokes(config: &AppConfig, count: usize, save: bool, output: Option<PathBuf>) -> Result<()> {
    let client = HttpClient::new(&config.http);
    let urls = vec![JOKE_API_URL.to_string(); count];

    let responses = client.send_multi_request(&urls, Method::Get).await;
    client.close().await;

    let mut jokes = Vec::with_capacity(responses.len());
    for (i, response) in responses.into_iter().enumerate() {
        match response.and_then(|r| r.json::<Joke>()) {
            Ok(joke) => {
                println!("Response {}: [{}] {}", i + 1, joke.category, joke.text());
                jokes.push(joke);
            }
            Err(e) => error!("Joke {} failed: {}", i + 1, e),
        }
    }

    if save {
        let db = open_database(config).await?;
        for joke in &jokes {
            let id = db.save(joke).await?;
            info!("Stored joke as id {}", id);
        }
        info!("{} jokes stored in {}", db.count::<Joke>().await?, db.current_database());
    }

    let output = output.unwrap_or_else(|| config.output.output_file.clone());
    write_json(&jokes, &output).await?;
    println!("Wrote {} jokes to {}", jokes.len(), output.display());
    Ok(())
}

async fn db(config: &AppConfig, action: DbAction) -> Result<()> {
    let db = open_database(config).await?;

    match action {
        DbAction::List => {
            let jokes = db.get_all::<Joke>().await?;
            println!("{}", serde_json::to_string_pretty(&jokes)?);
        }
        DbAction::Get { id } => match db.get_by_id::<Joke>(id).await? {
            Some(joke) => println!("{}", serde_json::to_string_pretty(&joke)?),
            None => warn!("No joke with id {}", id),
        },
        DbAction::Delete { id } => {
            if db.delete::<Joke>(id).await? {
                println!("Deleted joke {}", id);
            } else {
                warn!("No joke with id {}", id);
            }
        }
    }
    Ok(())
}

async fn browse(config: &AppConfig, url: &str, query: Option<&str>) -> Result<()> {
    let mut driver = DriverManager::new(&config.browser).await?;

    let outcome = async {
        driver.get(url).await?;
        if let Some(query) = query {
            driver
                .send_keys_to_element(&Locator::Name("q".to_string()), &format!("{}\n", query))
                .await?;
        }
        driver.scroll_to_bottom().await?;
        driver.wait(10.0).await;
        ScrapeKitResult::Ok(())
    }
    .await;

    match &outcome {
        Ok(()) => info!("Successfully interacted with {}", url),
        Err(e) => error!("An error occurred during interaction: {}", e),
    }

    info!("Quitting the browser driver...");
    driver.quit().await?;
    outcome.map_err(Into::into)
}
