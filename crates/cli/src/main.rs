use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use civic_agents::{DialogueEngine, StaffDesk};
use civic_core::{ChatInput, IncidentSubmission};
use civic_ml::CivicMlStack;
use civic_observability::{init_tracing, AppMetrics};
use civic_retrieval::{load_kb_dir, KnowledgeRetriever};
use civic_storage::{KnowledgeRepository, Store};
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "civic")]
#[command(about = "Civic Navigator CLI")]
struct Cli {
    #[arg(long, env = "CIVIC_KB_ROOT", default_value = "kb")]
    kb_root: PathBuf,

    /// SQLite URL; without it everything lives in memory for this run.
    #[arg(long, env = "CIVIC_DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive chat that keeps one session across lines.
    Chat {
        #[arg(long)]
        session_id: Option<String>,
    },
    Kb {
        #[command(subcommand)]
        command: KbCommand,
    },
    Incident {
        #[command(subcommand)]
        command: IncidentCommand,
    },
}

#[derive(Debug, Subcommand)]
enum KbCommand {
    Search {
        query: String,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = civic_agents::DEFAULT_KB_PAGE_SIZE)]
        page_size: usize,
    },
}

#[derive(Debug, Subcommand)]
enum IncidentCommand {
    Status {
        public_id: String,
    },
    Create {
        #[arg(long)]
        title: String,
        #[arg(long)]
        category: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    List {
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = civic_agents::DEFAULT_INCIDENT_PAGE_SIZE)]
        page_size: usize,
    },
    Update {
        public_id: String,
        status: String,
        #[arg(long)]
        note: Option<String>,
    },
}

struct Services {
    engine: DialogueEngine<Store>,
    desk: StaffDesk<Store>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("civic_cli");
    let cli = Cli::parse();

    let services = build_services(&cli.kb_root, cli.database_url.as_deref()).await?;

    match cli.command {
        Command::Chat { session_id } => run_chat(&services.engine, session_id).await?,
        Command::Kb { command } => match command {
            KbCommand::Search {
                query,
                page,
                page_size,
            } => {
                let hits = services.desk.kb_search(&query, page, page_size).await?;
                println!("{}", serde_json::to_string_pretty(&hits)?);
            }
        },
        Command::Incident { command } => match command {
            IncidentCommand::Status { public_id } => {
                let view = services.desk.incident_status(&public_id).await?;
                println!("{}", serde_json::to_string_pretty(&view)?);
            }
            IncidentCommand::Create {
                title,
                category,
                description,
                location,
                email,
            } => {
                let incident = services
                    .desk
                    .create_incident(IncidentSubmission {
                        title,
                        description,
                        category,
                        location_text: location,
                        contact_email: email,
                    })
                    .await?;
                println!("{}", serde_json::to_string_pretty(&incident)?);
            }
            IncidentCommand::List { page, page_size } => {
                let incidents = services.desk.list_incidents(page, page_size).await?;
                println!("{}", serde_json::to_string_pretty(&incidents)?);
            }
            IncidentCommand::Update {
                public_id,
                status,
                note,
            } => {
                let incident = services
                    .desk
                    .update_status(&public_id, &status, note.as_deref())
                    .await?;
                println!("{}", serde_json::to_string_pretty(&incident)?);
            }
        },
    }

    Ok(())
}

async fn run_chat(engine: &DialogueEngine<Store>, mut session_id: Option<String>) -> Result<()> {
    println!("Civic Navigator chat mode. type 'exit' to quit.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }

        let message = line.trim();
        if message.eq_ignore_ascii_case("exit") || message.eq_ignore_ascii_case("quit") {
            break;
        }

        if message.is_empty() {
            continue;
        }

        let reply = engine
            .handle_turn(ChatInput {
                session_id: session_id.clone(),
                message: message.to_string(),
                role: None,
            })
            .await?;
        session_id = Some(reply.session_id);

        println!("\n{}\n", reply.reply);

        if !reply.citations.is_empty() {
            println!("Sources:");
            for citation in reply.citations {
                match citation.source_link {
                    Some(link) => println!("- {} ({}): {}", citation.title, link, citation.snippet),
                    None => println!("- {}: {}", citation.title, citation.snippet),
                }
            }
            println!();
        }
    }

    Ok(())
}

async fn build_services(kb_root: &Path, database_url: Option<&str>) -> Result<Services> {
    let metrics = AppMetrics::shared();
    let ml_stack = CivicMlStack::load_default();
    let retriever = Arc::new(KnowledgeRetriever::new(ml_stack.embedder.clone()));

    let store = match database_url {
        Some(database_url) => Store::sqlite(database_url).await?,
        None => Store::memory(),
    };

    let docs = load_kb_dir(kb_root, ml_stack.embedder.as_ref())
        .with_context(|| format!("failed loading knowledge base from {}", kb_root.display()))?;
    for doc in &docs {
        store.upsert_document(doc).await?;
    }

    let store = Arc::new(store);
    Ok(Services {
        engine: DialogueEngine::new(retriever.clone(), &ml_stack, store.clone(), metrics.clone()),
        desk: StaffDesk::new(store, retriever, metrics),
    })
}
