use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use fichaje_core::{Enroller, ModelRegistry, Pipeline, Store};
use fichaje_store::{EventFilter, NewEmployee, SqliteStore};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "fichaje", about = "Face-recognition attendance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage employees and their reference photos
    Employee {
        #[command(subcommand)]
        command: EmployeeCommands,
    },
    /// Generate face vectors for an employee's photos that have none yet
    Enroll {
        /// Employee ID
        id: String,
    },
    /// Identify the person in each image and record their attendance
    Identify {
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Query recorded attendance
    Attendance {
        #[command(subcommand)]
        command: AttendanceCommands,
    },
    /// Load the models and show their input sizes
    Models,
}

#[derive(Subcommand)]
enum EmployeeCommands {
    /// Register a new employee
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        position: Option<String>,
        #[arg(long)]
        area: Option<String>,
        /// Create the employee as inactive
        #[arg(long)]
        inactive: bool,
    },
    /// List employees
    List,
    /// Make an employee matchable again
    Activate { id: String },
    /// Stop matching an employee
    Deactivate { id: String },
    /// Register reference photos and enroll them
    AddPhoto {
        id: String,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Only register the photos; run `fichaje enroll` later
        #[arg(long)]
        no_enroll: bool,
    },
}

#[derive(Subcommand)]
enum AttendanceCommands {
    /// List events, newest first
    List {
        /// Employee name substring
        #[arg(long)]
        name: Option<String>,
        /// Start date (YYYY-MM-DD or RFC 3339), inclusive
        #[arg(long)]
        from: Option<String>,
        /// End date (YYYY-MM-DD or RFC 3339), inclusive
        #[arg(long)]
        to: Option<String>,
    },
}

/// Everything a command needs, built from [`Config`].
struct App {
    store: Arc<SqliteStore>,
    pipeline: Arc<Pipeline>,
}

impl App {
    fn open(config: &Config) -> Result<Self> {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let store = Arc::new(SqliteStore::open(&config.db_path)?);
        let registry = Arc::new(ModelRegistry::from_paths(config.model_paths(), config.models.clone()));
        let shared: Arc<dyn Store> = store.clone();
        let pipeline = Arc::new(Pipeline::new(registry, shared, config.pipeline.clone()));
        Ok(Self { store, pipeline })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    tracing::debug!(
        model_dir = %config.model_dir.display(),
        db_path = %config.db_path.display(),
        "configuration loaded"
    );
    let app = App::open(&config)?;

    match cli.command {
        Commands::Employee { command } => employee(&app, command).await?,
        Commands::Enroll { id } => {
            let pipeline = Arc::clone(&app.pipeline);
            let report = tokio::task::spawn_blocking(move || Enroller::new(&pipeline).enroll(&id)).await??;
            print_json(&report)?;
        }
        Commands::Identify { images } => identify(&app, images).await?,
        Commands::Attendance {
            command: AttendanceCommands::List { name, from, to },
        } => {
            let filter = EventFilter {
                name,
                from: from.as_deref().map(|s| parse_bound(s, false)).transpose()?,
                to: to.as_deref().map(|s| parse_bound(s, true)).transpose()?,
            };
            for record in app.store.list_events(&filter)? {
                print_json(&record)?;
            }
        }
        Commands::Models => models(&app).await?,
    }

    Ok(())
}

async fn employee(app: &App, command: EmployeeCommands) -> Result<()> {
    match command {
        EmployeeCommands::Add {
            name,
            phone,
            position,
            area,
            inactive,
        } => {
            let employee = app.store.create_employee(NewEmployee {
                name,
                phone,
                position,
                area,
                active: !inactive,
            })?;
            print_json(&employee)?;
        }
        EmployeeCommands::List => {
            for employee in app.store.list_employees()? {
                print_json(&employee)?;
            }
        }
        EmployeeCommands::Activate { id } => print_json(&app.store.set_active(&id, true)?)?,
        EmployeeCommands::Deactivate { id } => print_json(&app.store.set_active(&id, false)?)?,
        EmployeeCommands::AddPhoto { id, paths, no_enroll } => {
            for path in &paths {
                match app.store.add_image(&id, path) {
                    Ok(image) => print_json(&image)?,
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "photo not registered");
                        eprintln!("{}: {err}", path.display());
                    }
                }
            }
            if !no_enroll {
                let pipeline = Arc::clone(&app.pipeline);
                let report = tokio::task::spawn_blocking(move || Enroller::new(&pipeline).enroll(&id)).await??;
                print_json(&report)?;
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct ImageResult<T: Serialize> {
    image: String,
    #[serde(flatten)]
    result: T,
}

/// One identification per image, run concurrently on blocking worker threads.
async fn identify(app: &App, images: Vec<PathBuf>) -> Result<()> {
    {
        let pipeline = Arc::clone(&app.pipeline);
        tokio::task::spawn_blocking(move || pipeline.models().ensure_loaded()).await??;
    }

    let tasks: Vec<_> = images
        .into_iter()
        .map(|path| {
            let pipeline = Arc::clone(&app.pipeline);
            let task = tokio::task::spawn_blocking({
                let path = path.clone();
                move || -> Result<_> {
                    let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
                    Ok(pipeline.identify(&bytes)?)
                }
            });
            (path, task)
        })
        .collect();

    let mut failures = 0;
    for (path, task) in tasks {
        let image = path.display().to_string();
        match task.await? {
            Ok(outcome) => print_json(&ImageResult { image, result: outcome })?,
            Err(err) => {
                failures += 1;
                tracing::error!(image = %image, error = %err, "identification failed");
                print_json(&ImageResult {
                    image,
                    result: serde_json::json!({ "error": format!("{err:#}") }),
                })?;
            }
        }
    }

    if failures > 0 {
        bail!("{failures} image(s) could not be processed");
    }
    Ok(())
}

#[derive(Serialize)]
struct StageInfo {
    stage: &'static str,
    input_width: u32,
    input_height: u32,
}

async fn models(app: &App) -> Result<()> {
    let registry = Arc::clone(app.pipeline.models());
    let stages = tokio::task::spawn_blocking(move || -> Result<Vec<StageInfo>> {
        let stage = |stage: &'static str, (input_width, input_height): (u32, u32)| StageInfo {
            stage,
            input_width,
            input_height,
        };
        Ok(vec![
            stage("detector", registry.detector()?.input_size()),
            stage("landmarks", registry.landmarks()?.input_size()),
            stage("embedding", registry.embedding()?.input_size()),
        ])
    })
    .await??;

    for info in &stages {
        print_json(info)?;
    }
    Ok(())
}

/// `YYYY-MM-DD` covers the whole day; anything else must be RFC 3339.
fn parse_bound(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let time = if end_of_day {
            NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999)
        } else {
            NaiveTime::from_hms_opt(0, 0, 0)
        };
        let time = time.context("invalid time of day")?;
        return Ok(date.and_time(time).and_utc());
    }
    let ts = DateTime::parse_from_rfc3339(raw).with_context(|| format!("invalid date {raw:?}"))?;
    Ok(ts.with_timezone(&Utc))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_bound_dates() {
        let from = parse_bound("2026-03-02", false).unwrap();
        let to = parse_bound("2026-03-02", true).unwrap();
        assert_eq!(from.to_rfc3339(), "2026-03-02T00:00:00+00:00");
        assert!(to > from);
        assert_eq!((to - from).num_seconds(), 86_399);

        let exact = parse_bound("2026-03-02T08:30:00+01:00", false).unwrap();
        assert_eq!(exact.to_rfc3339(), "2026-03-02T07:30:00+00:00");
        assert!(parse_bound("yesterday", false).is_err());
    }

    #[test]
    fn test_add_photo_args() {
        let cli = Cli::try_parse_from(["fichaje", "employee", "add-photo", "e1", "a.jpg", "b.jpg", "--no-enroll"]).unwrap();
        match cli.command {
            Commands::Employee {
                command: EmployeeCommands::AddPhoto { id, paths, no_enroll },
            } => {
                assert_eq!(id, "e1");
                assert_eq!(paths.len(), 2);
                assert!(no_enroll);
            }
            _ => panic!("unexpected command"),
        }
    }

    #[tokio::test]
    async fn test_add_photo_enrollment_errors_propagate() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let ana = store
            .create_employee(NewEmployee {
                name: "Ana".into(),
                active: true,
                ..NewEmployee::default()
            })
            .unwrap();
        let registry = Arc::new(ModelRegistry::from_paths(
            fichaje_core::ModelPaths::in_dir(std::path::Path::new("/nonexistent/fichaje")),
            fichaje_core::ModelSettings::default(),
        ));
        let shared: Arc<dyn Store> = store.clone();
        let app = App {
            store,
            pipeline: Arc::new(Pipeline::new(registry, shared, fichaje_core::PipelineSettings::default())),
        };

        let command = EmployeeCommands::AddPhoto {
            id: ana.id,
            paths: vec![PathBuf::from("/nonexistent/fichaje/face.png")],
            no_enroll: false,
        };
        let err = employee(&app, command).await.unwrap_err();
        assert!(err.to_string().contains("no reference images"), "{err:#}");
    }
}
