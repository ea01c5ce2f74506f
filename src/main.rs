use floormap::client::{DEFAULT_SERVER_URL, MapClient};
use floormap::config::{self, Config};
use floormap::db::store::DocumentStore;
use floormap::models::map::{ContentBox, ServerEvent};
use floormap::server::{self, AppState};
use floormap::utils::parse_float_list;
use floormap::viewer::camera::ScreenSize;
use floormap::viewer::geometry;
use floormap::viewer::render::View;
use floormap::viewer::session::ViewerSession;
use log::{error, info};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Screen assumed by `render` when laying out the camera.
const RENDER_SCREEN: ScreenSize = ScreenSize {
    width: 1280.0,
    height: 800.0,
};

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Serve,
    InspectSvg {
        file: PathBuf,
        manual_box: Option<ContentBox>,
    },
    Render {
        server: String,
        floor: Option<String>,
        search: Option<String>,
        orientation: Option<String>,
        /// Keep the realtime channel open this long and re-render on every update.
        watch: Option<Duration>,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct CliArgs {
    env_file: Option<PathBuf>,
    command: Command,
}

fn serve() -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    let paths = cfg.store_paths();
    info!(
        "Config loaded (bind={}:{}, devices={}, floors={})",
        cfg.bind_addr,
        cfg.port,
        paths.devices.display(),
        paths.floors.display()
    );

    // 2) Open store and serve
    let state = AppState::new(DocumentStore::new(paths));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to start async runtime: {}", e))?;
    runtime.block_on(server::serve(&cfg, state))
}

fn inspect_svg(file: &Path, manual_box: Option<ContentBox>) -> Result<(), String> {
    let text = std::fs::read_to_string(file).map_err(|e| format!("failed to read {}: {}", file.display(), e))?;
    let geom = geometry::analyze_svg(&text).map_err(|e| format!("{}: {}", file.display(), e))?;
    let describe = |b: &ContentBox| format!("{} {} {} {}", b.min_x, b.min_y, b.width, b.height);

    println!("viewBox:   {}", describe(&geom.view_box));
    match geom.geometric_box {
        Some(b) => {
            let verdict = if geometry::is_sane(&b, &geom.view_box) {
                "sane"
            } else {
                "rejected"
            };
            println!(
                "geometric: {} ({}, area ratio {:.3})",
                describe(&b),
                verdict,
                b.area() / geom.view_box.area()
            );
        }
        None => println!("geometric: none"),
    }
    if let Some(b) = manual_box {
        println!("manual:    {}", describe(&b));
    }
    println!("effective: {}", describe(&geom.effective_box(manual_box)));
    Ok(())
}

struct RenderOptions<'a> {
    floor: Option<&'a str>,
    search: Option<&'a str>,
    orientation: Option<&'a str>,
    watch: Option<Duration>,
}

fn print_view(view: &View) {
    println!("floor: {}", view.selected_floor.as_deref().unwrap_or("-"));
    println!("{}", view.marker_layer_svg());
    for card in &view.cards {
        println!();
        for line in card.lines() {
            println!("  {}", line);
        }
    }
}

fn render(server: &str, opts: RenderOptions<'_>) -> Result<(), String> {
    let RenderOptions {
        floor,
        search,
        orientation,
        watch,
    } = opts;
    let client = MapClient::new(server).map_err(|e| e.to_string())?;
    let mut session = ViewerSession::new(client, RENDER_SCREEN);
    session.load().map_err(|e| format!("loading map from {} failed: {}", server, e))?;
    if let Some(id) = floor {
        session.select_floor(id).map_err(|e| format!("floor {}: {}", id, e))?;
    }
    let state = session.state_mut();
    state.filters.search = search.unwrap_or_default().to_string();
    state.filters.orientation = orientation.map(str::to_string);

    print_view(&session.view());

    let Some(watch) = watch else {
        return Ok(());
    };
    if !session.is_online() {
        return Err(format!("cannot watch {}: realtime channel unavailable", server));
    }
    let deadline = Instant::now() + watch;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(());
        }
        match session.next_event(remaining).map_err(|e| e.to_string())? {
            Some(ServerEvent::DeviceCoordsUpdated { device }) => {
                info!("Device {} moved", device.identity_key());
                println!();
                print_view(&session.view());
            }
            Some(ServerEvent::Hello { .. }) | None => {}
        }
    }
}

fn run(command: Command) -> Result<(), String> {
    match command {
        Command::Serve => serve(),
        Command::InspectSvg { file, manual_box } => inspect_svg(&file, manual_box),
        Command::Render {
            server,
            floor,
            search,
            orientation,
            watch,
        } => render(
            &server,
            RenderOptions {
                floor: floor.as_deref(),
                search: search.as_deref(),
                orientation: orientation.as_deref(),
                watch,
            },
        ),
    }
}

fn parse_args(args: impl IntoIterator<Item = OsString>) -> Result<CliArgs, String> {
    let mut args = args.into_iter();
    let mut env_file: Option<PathBuf> = None;
    let mut positional: Vec<String> = Vec::new();
    let mut options: Vec<(String, String)> = Vec::new();

    while let Some(arg) = args.next() {
        let arg = arg.into_string().map_err(|_| "argument contains invalid UTF-8".to_string())?;
        let (name, inline) = match arg.split_once('=') {
            Some((n, v)) if n.starts_with("--") => (n.to_string(), Some(v.to_string())),
            _ => (arg.clone(), None),
        };
        if !name.starts_with("--") {
            positional.push(arg);
            continue;
        }
        if name == "--" {
            positional.extend(args.by_ref().filter_map(|a| a.into_string().ok()));
            break;
        }
        let value = match inline {
            Some(v) => v,
            None => args
                .next()
                .and_then(|v| v.into_string().ok())
                .ok_or_else(|| format!("`{}` requires a value", name))?,
        };
        if value.is_empty() {
            return Err(format!("`{}` requires a value", name));
        }
        if name == "--env-file" {
            if env_file.is_some() {
                return Err("`--env-file` provided more than once".to_string());
            }
            env_file = Some(PathBuf::from(value));
        } else {
            options.push((name, value));
        }
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        None | Some("serve") => Command::Serve,
        Some("inspect-svg") => {
            let file = positional
                .next()
                .ok_or_else(|| "`inspect-svg` requires a file argument".to_string())?;
            let mut manual_box = None;
            for (name, value) in options.drain(..) {
                match name.as_str() {
                    "--box" => {
                        let [x, y, w, h] = parse_float_list::<4>(&value)
                            .ok_or_else(|| format!("`--box` expects minX,minY,width,height, got {}", value))?;
                        manual_box = Some(ContentBox::new(x, y, w, h));
                    }
                    other => return Err(format!("unrecognised option for inspect-svg: {}", other)),
                }
            }
            Command::InspectSvg {
                file: PathBuf::from(file),
                manual_box,
            }
        }
        Some("render") => {
            let mut server = DEFAULT_SERVER_URL.to_string();
            let (mut floor, mut search, mut orientation, mut watch) = (None, None, None, None);
            for (name, value) in options.drain(..) {
                match name.as_str() {
                    "--server" => server = value,
                    "--floor" => floor = Some(value),
                    "--search" => search = Some(value),
                    "--orientation" => orientation = Some(value),
                    "--watch" => {
                        let secs: u64 = value
                            .parse()
                            .map_err(|_| format!("`--watch` expects whole seconds, got {}", value))?;
                        watch = Some(Duration::from_secs(secs));
                    }
                    other => return Err(format!("unrecognised option for render: {}", other)),
                }
            }
            Command::Render {
                server,
                floor,
                search,
                orientation,
                watch,
            }
        }
        Some(other) => return Err(format!("unrecognised command: {}", other)),
    };
    if let Some(extra) = positional.next() {
        return Err(format!("unrecognised argument: {}", extra));
    }
    if let Some((name, _)) = options.first() {
        return Err(format!("unrecognised option: {}", name));
    }
    Ok(CliArgs { env_file, command })
}

fn configure_env(env_file: Option<PathBuf>) -> Result<Option<LoadedEnvFile>, String> {
    if let Some(path) = env_file {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        config::load_env_file(&path)?;
        Ok(Some(LoadedEnvFile { path, explicit: true }))
    } else {
        let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
        let default_path = cwd.join(".env");
        if default_path.is_file() {
            config::load_env_file(&default_path)?;
            Ok(Some(LoadedEnvFile {
                path: default_path,
                explicit: false,
            }))
        } else {
            Ok(None)
        }
    }
}

fn main() {
    let cli = match parse_args(std::env::args_os().skip(1)) {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };
    let loaded_env = match configure_env(cli.env_file.clone()) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "floormap {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(cli.command) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliArgs, String> {
        parse_args(args.iter().map(OsString::from))
    }

    #[test]
    fn defaults_to_serve() {
        let cli = parse(&[]).expect("args");
        assert_eq!(cli.command, Command::Serve);
        assert_eq!(cli.env_file, None);
        let cli = parse(&["--env-file=prod.env", "serve"]).expect("args");
        assert_eq!(cli.env_file, Some(PathBuf::from("prod.env")));
    }

    #[test]
    fn inspect_svg_with_manual_box() {
        let cli = parse(&["inspect-svg", "plan.svg", "--box", "10,20,300,200"]).expect("args");
        assert_eq!(
            cli.command,
            Command::InspectSvg {
                file: PathBuf::from("plan.svg"),
                manual_box: Some(ContentBox::new(10.0, 20.0, 300.0, 200.0)),
            }
        );
        assert!(parse(&["inspect-svg", "plan.svg", "--box", "1,2,3"]).is_err());
        assert!(parse(&["inspect-svg"]).is_err());
    }

    #[test]
    fn render_options() {
        let cli = parse(&["--env-file", ".env.local", "render", "--server=http://map:9000", "--search", "lobby"])
            .expect("args");
        assert_eq!(cli.env_file, Some(PathBuf::from(".env.local")));
        assert_eq!(
            cli.command,
            Command::Render {
                server: "http://map:9000".to_string(),
                floor: None,
                search: Some("lobby".to_string()),
                orientation: None,
                watch: None,
            }
        );
        let cli = parse(&["render", "--watch", "30"]).expect("args");
        assert!(matches!(cli.command, Command::Render { watch: Some(w), .. } if w == Duration::from_secs(30)));
        assert!(parse(&["render", "--watch", "soon"]).is_err());
    }

    #[test]
    fn rejects_unknown_input() {
        assert!(parse(&["launch"]).is_err());
        assert!(parse(&["serve", "--floor", "x"]).is_err());
        assert!(parse(&["render", "--zoom", "2"]).is_err());
        assert!(parse(&["--env-file", "a", "--env-file", "b"]).is_err());
        assert!(parse(&["render", "--floor"]).is_err());
    }
}
