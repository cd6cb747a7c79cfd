use std::{fs, path::PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueHint};
use futures::{StreamExt, stream::BoxStream};
use graphreq::{
    BatchRequest, GraphClient, GraphResponse, GraphResult, QueryParams,
    auth::set_token_keyring, config, search::DEFAULT_SEARCH_LIMIT,
};
use serde_json::Value;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "graphreq")]
#[command(version)]
#[command(about = "Talk to the Microsoft Graph API with retries, batching and resumable uploads")]
struct Cli {
    /// Account whose token is used (defaults to the configured account)
    #[arg(short, long, global = true)]
    account: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// GET a resource and print the response
    Get {
        path: String,
        /// Query parameter as key=value, e.g. '$select=subject'
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Follow @odata.nextLink and print every item
    List {
        path: String,
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Run a /search/query request
    Search {
        query: String,
        /// Entity type to search, e.g. message, driveItem
        #[arg(short, long = "entity-type", required = true)]
        entity_types: Vec<String>,
        #[arg(short, long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
        #[arg(short, long = "field")]
        fields: Vec<String>,
    },
    /// Submit a JSON array of batch requests
    Batch {
        #[arg(value_hint = ValueHint::FilePath)]
        file: PathBuf,
    },
    /// Download raw content to a file
    Download {
        path: String,
        #[arg(short, long, value_hint = ValueHint::FilePath)]
        output: PathBuf,
    },
    /// Upload a file to a drive item path, e.g. /me/drive/root:/report.pdf:
    Upload {
        path: String,
        #[arg(value_hint = ValueHint::FilePath)]
        file: PathBuf,
    },
    /// Attach a file to a draft message
    Attach {
        message_id: String,
        #[arg(value_hint = ValueHint::FilePath)]
        file: PathBuf,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Store an access token in the OS keyring
    SetToken { token: String },
}

fn parse_param(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected key=value, got '{raw}'"))?;
    Ok((key.to_string(), value.to_string()))
}

fn to_params(params: Vec<(String, String)>) -> Option<QueryParams> {
    if params.is_empty() {
        None
    } else {
        Some(params.into_iter().collect())
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(async move {
        match cli.command {
            Commands::SetToken { token } => {
                set_token_keyring(cli.account.as_deref(), &token)?;
                println!("Access token stored for use with graphreq");
                Ok(())
            }
            requires_token => {
                let config = config::read_config()?;
                let client = config.graph_client()?;
                let account = cli.account.or(config.default_account.clone());
                run(&client, requires_token, account.as_deref()).await
            }
        }
    })
}

async fn run(client: &GraphClient, command: Commands, account: Option<&str>) -> Result<()> {
    match command {
        Commands::Get { path, params } => match client.get(&path, account, to_params(params)).await? {
            GraphResponse::Content(value) => print_json(&value),
            GraphResponse::NoContent => {
                eprintln!("No content");
                Ok(())
            }
        },
        Commands::List {
            path,
            params,
            limit,
        } => print_stream(client.paginate(&path, account, to_params(params), limit)).await,
        Commands::Search {
            query,
            entity_types,
            limit,
            fields,
        } => {
            let fields = (!fields.is_empty()).then_some(fields);
            print_stream(client.search(&query, entity_types, account, limit, fields)).await
        }
        Commands::Batch { file } => submit_batch(client, file, account).await,
        Commands::Download { path, output } => {
            let bytes = client.download_raw(&path, account, None).await?;
            fs::write(&output, &bytes)
                .with_context(|| format!("Unable to write {}", output.display()))?;
            eprintln!("Wrote {} bytes to {}", bytes.len(), output.display());
            Ok(())
        }
        Commands::Upload { path, file } => {
            let data =
                fs::read(&file).with_context(|| format!("Unable to read {}", file.display()))?;
            let item = client.upload_large(&path, &data, account, None).await?;
            print_json(&item)
        }
        Commands::Attach {
            message_id,
            file,
            name,
            content_type,
        } => {
            let data =
                fs::read(&file).with_context(|| format!("Unable to read {}", file.display()))?;
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| anyhow!("Unable to derive an attachment name"))?,
            };
            let attachment = client
                .upload_large_mail_attachment(
                    &message_id,
                    &name,
                    &data,
                    account,
                    content_type.as_deref(),
                )
                .await?;
            print_json(&attachment)
        }
        Commands::SetToken { .. } => Err(anyhow!("set-token does not talk to the API")),
    }
}

async fn submit_batch(client: &GraphClient, file: PathBuf, account: Option<&str>) -> Result<()> {
    let contents =
        fs::read_to_string(&file).with_context(|| format!("Unable to read {}", file.display()))?;
    let requests: Vec<BatchRequest> =
        serde_json::from_str(&contents).context("Batch file must be a JSON array of requests")?;

    let result = client.submit_batch(&requests, account).await?;
    let ordered: Vec<_> = requests
        .iter()
        .filter_map(|request| result.get(&request.id))
        .collect();
    println!("{}", serde_json::to_string_pretty(&ordered)?);
    Ok(())
}

async fn print_stream(mut stream: BoxStream<'_, GraphResult<Value>>) -> Result<()> {
    while let Some(item) = stream.next().await {
        print_json(&item?)?;
    }
    Ok(())
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
