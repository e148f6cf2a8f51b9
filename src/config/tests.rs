use std::io::Write;

use serial_test::serial;

use super::*;

fn parse(args: &[&str]) -> CliArgs {
    CliArgs::parse_from(std::iter::once("mdtools").chain(args.iter().copied()))
}

#[test]
fn defaults_resolve_without_any_source() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert_eq!(settings.logging.format, LogFormat::Compact);
    assert_eq!(settings.render.theme, Theme::Light);
    assert_eq!(
        settings.render.debounce,
        Duration::from_millis(DEFAULT_DEBOUNCE_MS)
    );
    assert_eq!(settings.render.timeout, None);
    assert_eq!(settings.render.diagram_marker, "mermaid");
    assert!(settings.render.detect_languages);
    assert_eq!(
        settings.diagrams.mermaid_cli_path,
        PathBuf::from(DEFAULT_MERMAID_CLI_PATH)
    );
    assert_eq!(settings.diagrams.selector, ".mermaid");
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.render.theme = Some("light".to_string());
    raw.logging.level = Some("info".to_string());

    let overrides = CommandOverrides {
        theme: Some("dark".to_string()),
        log_level: Some("debug".to_string()),
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.render.theme, Theme::Dark);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.logging.format, LogFormat::Json);
}

#[test]
fn zero_timeout_disables_the_limit() {
    let mut raw = RawSettings::default();
    raw.render.timeout_ms = Some(0);
    let settings = Settings::from_raw(raw.clone()).expect("valid settings");
    assert_eq!(settings.render.timeout, None);

    raw.render.timeout_ms = Some(1500);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.render.timeout, Some(Duration::from_millis(1500)));
}

#[test]
fn invalid_values_name_their_key() {
    let mut raw = RawSettings::default();
    raw.render.theme = Some("sepia".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "render.theme",
            ..
        })
    ));

    let mut raw = RawSettings::default();
    raw.render.diagram_marker = Some("two words".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "render.diagram_marker",
            ..
        })
    ));

    let mut raw = RawSettings::default();
    raw.render.debounce_ms = Some(MAX_DEBOUNCE_MS + 1);
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = RawSettings::default();
    raw.logging.level = Some("loud".to_string());
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn parse_render_arguments() {
    let args = parse(&[
        "render",
        "--theme",
        "dark",
        "--mermaid-cli-path",
        "/opt/mmdc",
        "notes.md",
        "-o",
        "notes.html",
    ]);

    match args.command {
        Command::Render(render) => {
            assert_eq!(render.input, PathBuf::from("notes.md"));
            assert_eq!(render.output, Some(PathBuf::from("notes.html")));
            assert_eq!(render.overrides.theme.as_deref(), Some("dark"));
            assert_eq!(
                render.overrides.diagrams.mermaid_cli_path,
                Some(PathBuf::from("/opt/mmdc"))
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_bind_arguments() {
    let args = parse(&["bind", "--style", "blank", "a.md", "b.md", "c.md"]);

    match args.command {
        Command::Bind(bind) => {
            assert_eq!(bind.style, "blank");
            assert_eq!(bind.inputs.len(), 3);
            assert_eq!(bind.out_dir, PathBuf::from("."));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_watch_arguments() {
    let args = parse(&[
        "watch",
        "draft.md",
        "--output",
        "preview.html",
        "--poll-ms",
        "100",
        "--no-diagrams",
        "--debounce-ms",
        "50",
    ]);

    match args.command {
        Command::Watch(watch) => {
            assert_eq!(watch.poll_ms, 100);
            assert!(watch.no_diagrams);
            assert_eq!(watch.overrides.debounce_ms, Some(50));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn export_format_defaults_to_html() {
    let args = parse(&["export", "notes.md"]);
    match args.command {
        Command::Export(export) => assert_eq!(export.format, "html"),
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn bind_requires_inputs() {
    assert!(CliArgs::try_parse_from(["mdtools", "bind"]).is_err());
}

#[test]
#[serial]
fn layered_sources_apply_in_order() {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    writeln!(
        file,
        "[render]\ntheme = \"light\"\ndebounce_ms = 120\ntimeout_ms = 900\n\n[diagrams]\nselector = \".diagram\""
    )
    .expect("write config");

    // SAFETY: env-dependent tests are serialised.
    unsafe {
        std::env::set_var("MDTOOLS__RENDER__THEME", "dark");
    }

    let path = file.path().to_string_lossy().into_owned();
    let args = parse(&["--config-file", &path, "worker", "--debounce-ms", "40"]);
    let settings = load(&args);

    unsafe {
        std::env::remove_var("MDTOOLS__RENDER__THEME");
    }

    let settings = settings.expect("settings load");
    assert_eq!(settings.render.theme, Theme::Dark);
    assert_eq!(settings.render.debounce, Duration::from_millis(40));
    assert_eq!(settings.render.timeout, Some(Duration::from_millis(900)));
    assert_eq!(settings.diagrams.selector, ".diagram");
}

#[test]
#[serial]
fn missing_explicit_config_file_is_an_error() {
    let args = parse(&["--config-file", "/nonexistent/mdtools.toml", "worker"]);
    assert!(matches!(load(&args), Err(LoadError::Build(_))));
}
