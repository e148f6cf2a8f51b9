use std::{
    path::Path,
    process,
    sync::Arc,
    time::{Duration, SystemTime},
};

use mdtools::{
    application::{
        diagrams::{
            ActivationOptions, DiagramActivator, DiagramEngine, DiagramEngineConfig,
            MermaidCliEngine, MountedView,
        },
        error::AppError,
        export::{ExportFormat, ExportService},
        render::{
            PreviewRenderer, RenderConfig, RenderExecutor, RenderPipelineConfig, RenderScheduler,
            configure_render_service, serve_json_lines,
        },
    },
    config,
    domain::{
        binding::{Binder, MergeStyle},
        documents::{Document, DocumentStore, InMemoryDocumentStore, SizeClass},
    },
    infra::{error::InfraError, telemetry},
};
use time::OffsetDateTime;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tracing::{Dispatch, Level, debug, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    if dispatcher::has_been_set() {
        error!(source = report.source, error = %report.summary(), "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(source = report.source, error = %report.summary(), "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(load_error)?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;
    configure_render_service(RenderPipelineConfig::from(&settings.render))
        .map_err(|err| AppError::unexpected(err.to_string()))?;

    match cli_args.command {
        config::Command::Render(args) => run_render(settings, args).await,
        config::Command::Export(args) => run_export(settings, args).await,
        config::Command::Bind(args) => run_bind(args).await,
        config::Command::Watch(args) => run_watch(settings, args).await,
        config::Command::Worker(_) => run_worker(settings).await,
    }
}

fn load_error(error: config::LoadError) -> AppError {
    match error {
        config::LoadError::Invalid { .. } => AppError::validation(error.to_string()),
        config::LoadError::Build(_) => {
            AppError::unexpected(format!("failed to load configuration: {error}"))
        }
    }
}

fn executor(settings: &config::Settings) -> RenderExecutor {
    RenderExecutor::shared().with_timeout(settings.render.timeout)
}

async fn run_render(settings: config::Settings, args: config::RenderArgs) -> Result<(), AppError> {
    let source = read_input(&args.input).await?;
    let config = RenderConfig::new(settings.render.theme);

    let html = executor(&settings).try_render(&source, &config).await?;

    match args.output {
        Some(path) => {
            tokio::fs::write(&path, &html).await?;
            info!(
                target = "mdtools::render",
                path = %path.display(),
                bytes = html.len(),
                "Fragment written"
            );
        }
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(html.as_bytes()).await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}

async fn run_export(settings: config::Settings, args: config::ExportArgs) -> Result<(), AppError> {
    let format: ExportFormat = args.format.parse()?;
    let content = tokio::fs::read_to_string(&args.input).await?;
    let document = Document::new(file_name(&args.input)?, content);
    let config = RenderConfig::new(settings.render.theme);

    let artifact = ExportService::new(executor(&settings))
        .export(&document, format, &config)
        .await?;

    let path = args.out_dir.join(&artifact.file_name);
    tokio::fs::write(&path, &artifact.body).await?;
    info!(
        target = "mdtools::export",
        path = %path.display(),
        format = format.as_str(),
        media_type = artifact.media_type,
        "Export completed"
    );
    Ok(())
}

async fn run_bind(args: config::BindArgs) -> Result<(), AppError> {
    let style: MergeStyle = args.style.parse()?;
    let store = InMemoryDocumentStore::new();
    let mut binder = Binder::new();

    for input in &args.inputs {
        let content = tokio::fs::read_to_string(input).await?;
        let (id, size) = store.import_markdown(&file_name(input)?, content)?;
        if size != SizeClass::Normal {
            warn!(
                target = "mdtools::bind",
                path = %input.display(),
                size = ?size,
                "Large document; the merged preview may be slow"
            );
        }
        binder.add_document(&store.get(&id)?);
    }

    if binder.exceeds_recommended_size() {
        warn!(
            target = "mdtools::bind",
            bytes = binder.total_bytes(),
            "Merged document exceeds the recommended size"
        );
    }

    let bound = binder.bind(style, OffsetDateTime::now_utc())?;
    let path = args.out_dir.join(&bound.file_name);
    tokio::fs::write(&path, &bound.content).await?;

    let merged = store.add(bound.file_name, bound.content)?;
    info!(
        target = "mdtools::bind",
        path = %path.display(),
        parts = binder.items().len(),
        style = %style,
        document = %merged,
        documents = store.list_documents().len(),
        "Binding completed"
    );
    Ok(())
}

async fn run_watch(settings: config::Settings, args: config::WatchArgs) -> Result<(), AppError> {
    let config = RenderConfig::new(settings.render.theme);
    let renderer: Arc<dyn PreviewRenderer> = Arc::new(executor(&settings));
    let (scheduler, mut applied) = RenderScheduler::spawn(renderer, config, settings.render.debounce);

    let view = MountedView::new();
    let activator = if args.no_diagrams {
        None
    } else {
        let engine: Arc<dyn DiagramEngine> = Arc::new(MermaidCliEngine::new(
            settings.diagrams.mermaid_cli_path.clone(),
            settings.diagrams.cache_dir.clone(),
        )?);
        Some(DiagramActivator::new(engine))
    };
    let options = ActivationOptions::new(
        DiagramEngineConfig::for_theme(settings.render.theme)
            .with_font_family(settings.diagrams.font_family.clone()),
    );

    let mut poll = tokio::time::interval(Duration::from_millis(args.poll_ms).max(MIN_POLL_INTERVAL));
    let mut last_modified: Option<SystemTime> = None;

    info!(
        target = "mdtools::watch",
        input = %args.input.display(),
        output = %args.output.display(),
        debounce_ms = settings.render.debounce.as_millis() as u64,
        "Watching for changes"
    );

    loop {
        tokio::select! {
            _ = poll.tick() => {
                // Editors that save by rename leave the path missing for a moment.
                let modified = match tokio::fs::metadata(&args.input)
                    .await
                    .and_then(|metadata| metadata.modified())
                {
                    Ok(modified) => modified,
                    Err(err) => {
                        warn!(
                            target = "mdtools::watch",
                            input = %args.input.display(),
                            error = %err,
                            "Input unavailable; retrying on next poll"
                        );
                        continue;
                    }
                };
                if last_modified != Some(modified) {
                    let content = match tokio::fs::read_to_string(&args.input).await {
                        Ok(content) => content,
                        Err(err) => {
                            warn!(
                                target = "mdtools::watch",
                                input = %args.input.display(),
                                error = %err,
                                "Input unreadable; retrying on next poll"
                            );
                            continue;
                        }
                    };
                    last_modified = Some(modified);
                    let sequence = scheduler.submit(content);
                    debug!(target = "mdtools::watch", sequence, "Change submitted");
                }
            }
            changed = applied.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = applied.borrow_and_update().clone();
                view.mount(current.result.html);

                if let Some(activator) = &activator {
                    activator
                        .activate(&view, &settings.diagrams.selector, &options)
                        .await;
                }

                tokio::fs::write(&args.output, view.html()).await?;
                info!(
                    target = "mdtools::watch",
                    sequence = current.sequence,
                    ok = current.result.ok,
                    "Preview updated"
                );
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }

    let stats = scheduler.stats();
    info!(
        target = "mdtools::watch",
        submitted = stats.submitted,
        dispatched = stats.dispatched,
        applied = stats.applied,
        stale_discarded = stats.stale_discarded,
        "Watch stopped"
    );
    Ok(())
}

async fn run_worker(settings: config::Settings) -> Result<(), AppError> {
    let config = RenderConfig::new(settings.render.theme);
    info!(target = "mdtools::worker", theme = %config.theme, "Render worker ready");

    serve_json_lines(
        executor(&settings),
        config,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await?;
    Ok(())
}

async fn read_input(path: &Path) -> Result<String, AppError> {
    if path == Path::new("-") {
        let mut source = String::new();
        tokio::io::stdin().read_to_string(&mut source).await?;
        return Ok(source);
    }
    Ok(tokio::fs::read_to_string(path).await?)
}

fn file_name(path: &Path) -> Result<String, AppError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_owned)
        .ok_or_else(|| {
            InfraError::configuration(format!("`{}` has no usable file name", path.display()))
                .into()
        })
}
