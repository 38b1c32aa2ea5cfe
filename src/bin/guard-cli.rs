use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::Method;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;

use request_guard::signature::signer::string_to_sign;
use request_guard::signature::{canonicalize, SignatureContext, Signer, HEADER_AUTH, HEADER_AUTH_DATE};

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Sign and send requests to a request-guard protected service", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:9500")]
    url: String,

    #[arg(short, long, env = "GUARD_KEY_ID", default_value = "default")]
    key_id: String,

    #[arg(short, long, env = "GUARD_SECRET")]
    secret: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the headers for a request without sending it
    Sign(RequestArgs),
    /// Sign a request and send it
    Send(RequestArgs),
}

#[derive(Args)]
struct RequestArgs {
    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Path with optional query string, e.g. /items/7?q=x
    path: String,

    /// JSON body (sent as application/json)
    #[arg(long, conflicts_with = "form")]
    json: Option<String>,

    /// Form body, e.g. a=1&b=2 (sent as application/x-www-form-urlencoded)
    #[arg(long)]
    form: Option<String>,

    /// Routed path parameter the server will see, as name=value
    #[arg(short, long = "param")]
    params: Vec<String>,

    /// Override the timestamp (Unix seconds)
    #[arg(long)]
    timestamp: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let signer = Signer::new(cli.key_id.clone(), cli.secret.clone());

    match cli.command {
        Commands::Sign(args) => {
            let prepared = prepare(&signer, &args).await?;
            println!("string-to-sign: {}", prepared.string_to_sign);
            println!("{}: {}", HEADER_AUTH, prepared.auth);
            println!("{}: {}", HEADER_AUTH_DATE, prepared.date);
        }
        Commands::Send(args) => {
            let prepared = prepare(&signer, &args).await?;
            let client = reqwest::Client::new();
            let mut request = client
                .request(prepared.method.clone(), format!("{}{}", cli.url, args.path))
                .header(HEADER_AUTH, &prepared.auth)
                .header(HEADER_AUTH_DATE, &prepared.date);
            if let Some((content_type, body)) = prepared.body {
                request = request.header("content-type", content_type).body(body);
            }
            print_response(request.send().await?).await?;
        }
    }

    Ok(())
}

struct Prepared {
    method: Method,
    string_to_sign: String,
    auth: String,
    date: String,
    body: Option<(&'static str, String)>,
}

async fn prepare(signer: &Signer, args: &RequestArgs) -> Result<Prepared, Box<dyn std::error::Error>> {
    let method = Method::from_bytes(args.method.to_ascii_uppercase().as_bytes())?;
    let (path, query) = match args.path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (args.path.as_str(), None),
    };

    let body = match (&args.json, &args.form) {
        (Some(json), _) => Some(("application/json", json.clone())),
        (None, Some(form)) => Some(("application/x-www-form-urlencoded", form.clone())),
        (None, None) => None,
    };

    let path_params = args
        .params
        .iter()
        .map(|p| {
            p.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| format!("path parameter `{p}` is not name=value"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut context = SignatureContext::new(method.clone(), path).with_path_params(path_params);
    if let Some(query) = query {
        context = context.with_query(query);
    }
    if let Some((content_type, text)) = &body {
        context = context.with_body(*content_type, text.clone().into_bytes());
    }

    let (params, _) = canonicalize(&context).await?;
    let timestamp = args.timestamp.unwrap_or_else(unix_now);
    let headers = signer.sign(&params, timestamp);

    Ok(Prepared {
        method,
        string_to_sign: string_to_sign(&params, timestamp),
        auth: headers.auth,
        date: headers.date,
        body,
    })
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: service returned status {}", status);
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
