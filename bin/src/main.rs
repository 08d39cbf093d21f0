use brightdock::{
    AGGREGATE, BrightdockError, BrightnessEngine, BrightnessEngineBuilder, ControlMethod,
    watch_changes,
};

use clap::{ArgGroup, Parser, ValueEnum};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Method {
    None,
    Backlight,
    Gamma,
}

impl From<Method> for ControlMethod {
    fn from(method: Method) -> Self {
        match method {
            Method::None => ControlMethod::None,
            Method::Backlight => ControlMethod::Backlight,
            Method::Gamma => ControlMethod::Gamma,
        }
    }
}

/// Adjust monitor brightness through the backlight or the gamma ramp
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(group(
            ArgGroup::new("action")
                .required(true)
                .multiple(true)
                .args(["list", "get", "set", "inc", "dec", "method", "watch"]),
        ))]
struct Args {
    /// X display to connect to
    #[arg(long, value_name = "name")]
    display: Option<String>,

    /// Regular expression for the monitor to act on. All monitors if omitted.
    #[arg(long, value_name = "regex")]
    monitor: Option<String>,

    /// List every monitor with its method and level.
    #[arg(long)]
    list: bool,

    /// Print out the current brightness as a percentage.
    #[arg(long)]
    get: bool,

    /// Sets the brightness to the specified level. With all monitors
    /// selected this moves every monitor by the same amount, so the level
    /// stops early when one of them reaches 0% or 100%.
    #[arg(long, value_name = "percent", conflicts_with_all = ["inc", "dec"])]
    set: Option<f64>,

    /// Increases brightness by the specified amount, or by the configured step.
    #[arg(long, value_name = "percent", num_args = 0..=1, conflicts_with = "dec")]
    inc: Option<Option<f64>>,

    /// Decreases brightness by the specified amount, or by the configured step.
    #[arg(long, value_name = "percent", num_args = 0..=1)]
    dec: Option<Option<f64>>,

    /// Switch to the given brightness control method.
    #[arg(long, value_enum)]
    method: Option<Method>,

    /// Keep running and print the brightness whenever it changes.
    #[arg(long)]
    watch: bool,
}

fn print_monitors(engine: &BrightnessEngine) {
    for index in 0..engine.monitor_count() {
        let method = engine
            .method(Some(index))
            .map_or_else(|| "-".to_string(), |method| method.to_string());
        let supported: Vec<&str> = [ControlMethod::Backlight, ControlMethod::Gamma]
            .into_iter()
            .filter(|method| engine.supports(Some(index), *method))
            .map(ControlMethod::name)
            .collect();
        println!(
            "{index}: {:<8} {:<9} {:>3.0}% [{}]",
            engine.monitor_name(Some(index)),
            method,
            engine.get_level(Some(index)) * 100.0,
            supported.join(", ")
        );
    }
}

/// Move the selection by `delta`, as one adjustment session when all
/// monitors are selected.
fn adjust(engine: &mut BrightnessEngine, delta: f64) {
    engine.ready();
    engine.set_level_relative(delta);
    engine.unready();
}

#[tokio::main]
async fn main() -> Result<(), BrightdockError> {
    env_logger::init();
    let args = Args::parse();

    let mut builder = BrightnessEngineBuilder::new();
    if let Some(display) = args.display.as_deref() {
        builder = builder.with_display(display);
    }
    let mut engine = builder.build().await?;

    if let Some(monitor) = &args.monitor {
        engine.select_monitor_matching(monitor)?;
    }

    if let Some(method) = args.method {
        if !engine.set_method(method.into()) {
            log::warn!(
                "{} does not support {:?}",
                engine.monitor_name(None),
                method
            );
        }
    }

    let step = engine.config().step * 100.0;
    if let Some(set) = args.set {
        let level = (set / 100.0).clamp(0.0, 1.0);
        if engine.current_monitor() == AGGREGATE {
            let delta = level - engine.get_level(None);
            adjust(&mut engine, delta);
        } else {
            engine.set_level(level);
        }
    } else if let Some(inc) = args.inc {
        adjust(&mut engine, inc.unwrap_or(step) / 100.0);
    } else if let Some(dec) = args.dec {
        adjust(&mut engine, -dec.unwrap_or(step) / 100.0);
    }
    engine.settle().await;

    if args.list {
        print_monitors(&engine);
    }
    if args.get {
        println!("{}", engine.get_percent());
    }

    if args.watch {
        let mut changes = watch_changes(args.display.as_deref())?;
        while changes.recv().await.is_some() {
            if engine.is_changed().await {
                println!("{}: {}", engine.monitor_name(None), engine.get_percent());
            }
        }
    }

    Ok(())
}
