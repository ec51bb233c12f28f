use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;

use request_guard::audit::AuditLog;
use request_guard::config::{load_config, DatabaseConfig, GuardConfig, IncludeEntry};
use request_guard::database::Database;
use request_guard::guard::escape::{escape_str, OutputContext};
use request_guard::guard::include::sha256_hex;
use request_guard::guard::{QueryGuard, SignatureScanner};
use request_guard::security::headers::security_headers;
use request_guard::security::Authenticator;

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Management CLI for the Request Guard", long_about = None)]
struct Cli {
    /// Config file supplying signatures, login policy and expected headers
    #[arg(short, long, env = "GUARD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print an include manifest with SHA-256 digests for every file in a directory
    Hash { dir: PathBuf },
    /// Run the upload signature scan over a file
    Scan { file: PathBuf },
    /// Escape text for an output context (html, js, url, css)
    Escape {
        #[arg(long, default_value = "html")]
        context: String,
        text: String,
    },
    /// Create a user; the password is read from GUARD_PASSWORD
    AddUser {
        #[arg(long)]
        database: Option<String>,
        username: String,
    },
    /// Report which security headers a server sets
    Probe { url: String },
}

#[derive(Serialize)]
struct Manifest {
    include: ManifestFiles,
}

#[derive(Serialize)]
struct ManifestFiles {
    files: Vec<IncludeEntry>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };

    match cli.command {
        Commands::Hash { dir } => {
            let mut files = Vec::new();
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                if !entry.file_type()?.is_file() {
                    continue;
                }
                files.push(IncludeEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    sha256: Some(sha256_hex(&std::fs::read(entry.path())?)),
                });
            }
            files.sort_by(|a, b| a.name.cmp(&b.name));
            print!("{}", toml::to_string(&Manifest { include: ManifestFiles { files } })?);
        }
        Commands::Scan { file } => {
            let scanner = SignatureScanner::new(&config.upload.signatures)?;
            let content = std::fs::read(&file)?;
            let hits = scanner.matches(&content);
            if hits.is_empty() {
                println!("clean: {}", file.display());
            } else {
                for i in hits {
                    println!("match: {}", scanner.pattern(i).unwrap_or("?"));
                }
                std::process::exit(1);
            }
        }
        Commands::Escape { context, text } => {
            println!("{}", escape_str(&text, OutputContext::parse_lenient(&context)));
        }
        Commands::AddUser { database, username } => {
            let password = std::env::var("GUARD_PASSWORD")
                .map_err(|_| "GUARD_PASSWORD must be set")?;
            let db_config = DatabaseConfig {
                path: database.unwrap_or(config.database.path.clone()),
            };
            let db = Database::open(&db_config)?;
            let (audit, _) = AuditLog::in_memory();
            let query = Arc::new(QueryGuard::new(&config.query, audit.clone()));
            let auth = Authenticator::new(&config.login, query, audit);
            let id = db.with_conn(|conn| auth.create_user(conn, &username, &password))?;
            println!("created user {} (id {})", username, id);
        }
        Commands::Probe { url } => {
            let res = reqwest::Client::new().get(&url).send().await?;
            println!("{} {}", url, res.status());

            let mut missing = 0;
            for (name, expected) in security_headers(&config.headers)? {
                match res.headers().get(&name) {
                    Some(value) if *value == expected => {
                        println!("  ok       {}: {}", name, value.to_str().unwrap_or("?"))
                    }
                    Some(value) => {
                        missing += 1;
                        println!("  differs  {}: {}", name, value.to_str().unwrap_or("?"));
                    }
                    None => {
                        missing += 1;
                        println!("  missing  {}", name);
                    }
                }
            }
            if missing > 0 {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
