use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures::future::join_all;
use govern_client::{
    api::ApiClient,
    classify::{ai_act_risk, categorize_risk},
    collection::CollectionView,
    config::{parse_base_url, ClientConfig},
    export::{export, ExportFormat},
    logging,
    models::{BiasAudit, ComplianceTracker, EventLog, Policy, Resource, Risk, Task},
    poll::{PollConfig, PollRegistry, PollState},
    questionnaire::{Answer, Question, QuestionKind, Wizard, WizardError},
    render::{chip, dispatch, job_tone, render_text, summarize, view_for, View},
    storage::{Dismissals, FileStore, KeyValueStore, StorageKey},
    utils, JobId, JobKind, JobRef,
};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base url of the governance API
    #[arg(long, env = "GOVERN_API_URL")]
    api_url: Option<String>,

    /// Bearer token sent with every request
    #[arg(long, env = "GOVERN_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Seconds between status requests while watching jobs
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Log debug output to stderr
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect and follow long-running jobs
    Jobs {
        #[command(subcommand)]
        action: JobAction,
    },
    /// List every record of a collection
    List { resource: ResourceKind },
    /// Show one record
    Show { resource: ResourceKind, id: String },
    /// Delete one record
    Delete { resource: ResourceKind, id: String },
    /// Download a collection as JSON or CSV
    Export {
        resource: ResourceKind,
        #[arg(short, long, value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,
        /// Directory the file is written to
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
    /// Classify a project's AI system through the risk questionnaire
    Assess {
        /// Project the answers belong to
        #[arg(short, long)]
        project: String,
        /// Discard saved progress and start over
        #[arg(long)]
        restart: bool,
        /// Store the resulting classification on the project
        #[arg(long)]
        save: bool,
        /// Also write the classification to this JSON file
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Suggest a category for a risk description
    Categorize { text: Vec<String> },
    /// Manage dismissed tips
    Tips {
        #[command(subcommand)]
        action: TipAction,
    },
}

#[derive(Subcommand, Debug)]
enum JobAction {
    /// Fetch the current status once
    Status {
        #[arg(value_enum)]
        kind: JobKind,
        id: String,
    },
    /// Poll until every job reaches a final state
    Watch {
        #[arg(value_enum)]
        kind: JobKind,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Delete a job and its results
    Delete {
        #[arg(value_enum)]
        kind: JobKind,
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum TipAction {
    Dismiss { name: String },
    Reset { name: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ResourceKind {
    Policies,
    Risks,
    Tasks,
    Trackers,
    Events,
    BiasAudits,
}

macro_rules! with_resource {
    ($kind:expr, $func:ident($($arg:expr),*)) => {
        match $kind {
            ResourceKind::Policies => $func::<Policy>($($arg),*).await,
            ResourceKind::Risks => $func::<Risk>($($arg),*).await,
            ResourceKind::Tasks => $func::<Task>($($arg),*).await,
            ResourceKind::Trackers => $func::<ComplianceTracker>($($arg),*).await,
            ResourceKind::Events => $func::<EventLog>($($arg),*).await,
            ResourceKind::BiasAudits => $func::<BiasAudit>($($arg),*).await,
        }
    };
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env before parsing so clap sees GOVERN_* values from it
    dotenv::dotenv().ok();
    let args = Args::parse();
    logging::init_logging(args.verbose);

    let mut config = ClientConfig::from_env()?;
    if let Some(url) = &args.api_url {
        config.base_url = parse_base_url(url)?;
    }
    if let Some(token) = args.token {
        config.token = Some(token);
    }
    if let Some(secs) = args.poll_interval {
        config.poll_interval = Duration::from_secs(secs.max(1));
    }

    let client = Arc::new(ApiClient::new(&config)?);

    match args.command {
        Command::Jobs { action } => run_jobs(&config, client, action).await,
        Command::List { resource } => with_resource!(resource, list_records(&client)),
        Command::Show { resource, id } => with_resource!(resource, show_record(&client, &id)),
        Command::Delete { resource, id } => with_resource!(resource, delete_record(&client, &id)),
        Command::Export {
            resource,
            format,
            out,
        } => with_resource!(resource, export_records(&client, format, &out)),
        Command::Assess {
            project,
            restart,
            save,
            out,
        } => assess(&config, &client, &project, restart, save, out).await,
        Command::Categorize { text } => {
            let text = text.join(" ");
            if text.trim().is_empty() {
                bail!("nothing to categorize");
            }
            println!("{:?}", categorize_risk(&text));
            Ok(())
        }
        Command::Tips { action } => {
            let store = FileStore::open(&config.state_file)?;
            let dismissals = Dismissals::new(&store);
            match action {
                TipAction::Dismiss { name } => dismissals.dismiss(&StorageKey::tip(&name))?,
                TipAction::Reset { name } => dismissals.reset(&StorageKey::tip(&name))?,
            }
            Ok(())
        }
    }
}

async fn run_jobs(config: &ClientConfig, client: Arc<ApiClient>, action: JobAction) -> Result<()> {
    match action {
        JobAction::Status { kind, id } => {
            let reply = client.fetch_job_status(kind, &JobId::new(id)).await?;
            let job = &reply.job;
            println!("{} {}", JobRef::new(kind, job.id.clone()), chip(job.status.as_str(), job_tone(&job.status)));
            if let Some(created) = job.created_at {
                println!("created {}", created.format("%Y-%m-%d %H:%M"));
            }
            let view = dispatch(Some(&job.status), job.result.as_ref(), job.error.as_deref());
            println!("{}", render_text(&view));
            Ok(())
        }
        JobAction::Watch { kind, ids } => {
            let registry = PollRegistry::new(client, PollConfig::from(config));
            let follows = ids
                .into_iter()
                .map(|id| {
                    let job = JobRef::new(kind, JobId::new(id));
                    let rx = registry.start(job.clone());
                    follow(job, rx)
                })
                .collect::<Vec<_>>();

            let finals = tokio::select! {
                finals = join_all(follows) => finals,
                _ = tokio::signal::ctrl_c() => {
                    registry.cancel_all();
                    eprintln!("Stopped watching.");
                    return Ok(());
                }
            };

            if finals.iter().any(|s| matches!(view_for(s), View::Failure { .. })) {
                bail!("at least one job did not complete");
            }
            Ok(())
        }
        JobAction::Delete { kind, id } => {
            client.delete_job(kind, &JobId::new(id.clone())).await?;
            println!("Deleted {} {}", kind.label(), id);
            Ok(())
        }
    }
}

/// Prints every distinct view a job goes through and returns its final state.
async fn follow(job: JobRef, mut rx: watch::Receiver<PollState>) -> PollState {
    let mut last: Option<String> = None;
    loop {
        let state = rx.borrow_and_update().clone();
        let line = render_text(&view_for(&state));
        if last.as_deref() != Some(line.as_str()) {
            println!("[{}] {}", job, line);
            last = Some(line);
        }
        if state.is_final() {
            return state;
        }
        if rx.changed().await.is_err() {
            return rx.borrow().clone();
        }
    }
}

async fn list_records<R: Resource>(client: &ApiClient) -> Result<()> {
    let mut view = CollectionView::<R>::new();
    view.list(client).await?;
    if view.is_empty() {
        println!("No {} records.", R::FEATURE);
        return Ok(());
    }
    println!("{}", summarize(&serde_json::to_value(view.items())?));
    Ok(())
}

async fn show_record<R: Resource>(client: &ApiClient, id: &str) -> Result<()> {
    let mut view = CollectionView::<R>::new();
    let record = view.select(client, id).await?;
    println!("{}", summarize(&serde_json::to_value(record)?));
    Ok(())
}

async fn delete_record<R: Resource>(client: &ApiClient, id: &str) -> Result<()> {
    let mut view = CollectionView::<R>::new();
    view.delete(client, id).await?;
    println!("Deleted {} {}", R::FEATURE, id);
    Ok(())
}

async fn export_records<R: Resource>(client: &ApiClient, format: ExportFormat, out: &Path) -> Result<()> {
    let mut view = CollectionView::<R>::new();
    view.list(client).await?;
    let export = export(R::FEATURE, view.items(), format)?;
    let path = export.save(out)?;
    println!("Exported {} {} records to {}", view.len(), R::FEATURE, path.display());
    Ok(())
}

enum Input {
    Answer(Answer),
    Keep,
    Back,
    Quit,
}

fn print_question(question: &Question, current: Option<&Answer>) {
    println!();
    println!("{}", question.prompt);
    for (i, option) in question.options.iter().enumerate() {
        let marker = if current.is_some_and(|a| a.includes(option.value)) { "*" } else { " " };
        println!(" {}{:>2}. {}", marker, i + 1, utils::truncate(option.label, 72));
    }
    match question.kind {
        QuestionKind::MultiChoice => println!("Numbers separated by commas, 'b' to go back, 'q' to stop."),
        _ => println!("Choose a number, 'b' to go back, 'q' to stop."),
    }
}

fn parse_input(question: &Question, line: &str) -> Result<Input, String> {
    let line = line.trim();
    match line {
        "" => return Ok(Input::Keep),
        "b" => return Ok(Input::Back),
        "q" => return Ok(Input::Quit),
        _ => {}
    }
    if question.kind == QuestionKind::Text {
        return Ok(Input::Answer(Answer::single(line)));
    }

    let mut values = Vec::new();
    for part in line.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let index: usize = part.parse().map_err(|_| format!("{:?} is not a number", part))?;
        let option = index
            .checked_sub(1)
            .and_then(|i| question.options.get(i))
            .ok_or_else(|| format!("{} is not one of the choices", index))?;
        values.push(option.value);
    }

    match (question.kind, values.as_slice()) {
        (QuestionKind::MultiChoice, _) => Ok(Input::Answer(Answer::multiple(values))),
        (_, [single]) => Ok(Input::Answer(Answer::single(*single))),
        _ => Err("choose exactly one option".to_string()),
    }
}

async fn assess(
    config: &ClientConfig,
    client: &ApiClient,
    project: &str,
    restart: bool,
    save: bool,
    out: Option<PathBuf>,
) -> Result<()> {
    let store: Arc<dyn KeyValueStore> = Arc::new(
        FileStore::open(&config.state_file)
            .with_context(|| format!("opening {}", config.state_file.display()))?,
    );
    let mut wizard = Wizard::resume(ai_act_risk(), store.clone(), project)?;
    if restart {
        wizard.restart()?;
    } else if wizard.was_resumed() {
        println!("Resuming saved answers for project {}.", project);
    }

    let info = StorageKey::info_box("riskClassification");
    let dismissals = Dismissals::new(store.as_ref());
    if !dismissals.is_dismissed(&info)? {
        println!("Answers are saved after every step; run again with the same project to resume.");
        dismissals.dismiss(&info)?;
    }

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let classification = loop {
        let question = match wizard.current() {
            Some(q) => q.clone(),
            None => bail!("saved progress points at an unknown question"),
        };
        print_question(&question, wizard.answers().get(question.id));
        print!("> ");
        io::stdout().flush()?;

        let Some(line) = lines.next().transpose()? else {
            println!("\nProgress saved.");
            return Ok(());
        };

        match parse_input(&question, &line) {
            Err(msg) => {
                println!("{}", msg);
                continue;
            }
            Ok(Input::Quit) => {
                println!("Progress saved.");
                return Ok(());
            }
            Ok(Input::Back) => {
                if let Err(e) = wizard.previous() {
                    println!("{}", e);
                }
                continue;
            }
            Ok(Input::Answer(answer)) => {
                if let Err(e) = wizard.answer(answer) {
                    println!("{}", e);
                    continue;
                }
            }
            Ok(Input::Keep) => {}
        }

        if wizard.is_last() {
            match wizard.submit() {
                Ok(classification) => break classification,
                Err(WizardError::Validation(e)) => println!("{}", e),
                Err(e) => return Err(e.into()),
            }
        } else if let Err(e) = wizard.next() {
            println!("{}", e);
        }
    };

    println!();
    println!("Risk classification: {}", classification.level);
    println!("{}", classification.level.description());

    if let Some(path) = out {
        utils::save_json(&serde_json::to_value(&classification)?, &path)?;
    }
    if save {
        client
            .save_risk_classification(project, classification.level)
            .await
            .context("saving classification")?;
        println!("Saved on project {}.", project);
    }
    Ok(())
}
