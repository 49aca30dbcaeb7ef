mod api;
mod server;

use clap::{Args, Parser, Subcommand};
use shiling::pipeline::{CascadeObserver, GenerationError, RecommendationResult};
use shiling::{
    logging, Language, RecommendationService, ShilingConfig, TemporalContext, TemporalEngine,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "shiling", about = "Solar-term aware meal and tea recommendations")]
struct Cli {
    /// Config file (default: $SHILING_CONFIG_PATH or config/shiling.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print pillars, lunar date, solar term and season for a moment
    Context(ContextArgs),
    /// Generate a recommendation
    Recommend(RecommendArgs),
    Serve(ServeArgs),
    /// Write the effective configuration to a file
    InitConfig(InitConfigArgs),
}

#[derive(Args, Debug, Clone, Default)]
struct ContextArgs {
    /// YYYY-MM-DD, defaults to today
    #[arg(long)]
    date: Option<String>,
    /// HH:MM, defaults to now
    #[arg(long)]
    time: Option<String>,
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug, Clone)]
struct RecommendArgs {
    #[arg(long)]
    date: Option<String>,
    #[arg(long)]
    time: Option<String>,
    /// breakfast, lunch, afternoon_tea, dinner, late_night
    #[arg(long)]
    meal: Option<String>,
    /// balanced, vegetarian, therapeutic, light, tea
    #[arg(long, default_value = "balanced")]
    diet: String,
    #[arg(long)]
    goal: Option<String>,
    #[arg(long)]
    location: Option<String>,
    #[arg(long)]
    weather: Option<String>,
    #[arg(long)]
    language: Option<String>,
    /// Also translate the result into this language
    #[arg(long)]
    translate: Option<String>,
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    #[arg(long, default_value_t = 8787)]
    port: u16,
    #[arg(long, default_value = "web")]
    web_root: String,
}

#[derive(Args, Debug, Clone)]
struct InitConfigArgs {
    #[arg(long)]
    path: Option<PathBuf>,
    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
}

#[tokio::main]
async fn main() {
    load_dotenv();
    logging::init();
    if let Err(err) = run().await {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Context(ContextArgs::default()));

    match command {
        Command::InitConfig(args) => run_init_config(cli.config, args),
        Command::Context(args) => {
            let (config, _) = ShilingConfig::load(cli.config)?;
            run_context(&config, args)
        }
        Command::Recommend(args) => {
            let (config, _) = ShilingConfig::load(cli.config)?;
            run_recommend(&config, args).await
        }
        Command::Serve(args) => {
            let (config, path) = ShilingConfig::load(cli.config)?;
            if let Some(path) = path.filter(|path| path.exists()) {
                info!(path = %path.display(), "loaded config");
            }
            let service = RecommendationService::from_config(&config)?;
            server::serve(args, service, config.generation.timeout_ms).await
        }
    }
}

fn run_init_config(path: Option<PathBuf>, args: InitConfigArgs) -> Result<(), String> {
    let target = args
        .path
        .or(path)
        .unwrap_or_else(|| PathBuf::from("config/shiling.toml"));
    if target.exists() && !args.force {
        return Err(format!(
            "{} already exists (pass --force to overwrite)",
            target.display()
        ));
    }
    let (config, _) = ShilingConfig::load(None)?;
    config.write(&target)?;
    println!("Wrote {}", target.display());
    Ok(())
}

fn run_context(config: &ShilingConfig, args: ContextArgs) -> Result<(), String> {
    let moment = api::parse_moment(args.date.as_deref(), args.time.as_deref())?;
    let context = TemporalEngine::from_config(&config.calendar)?.context(&moment);

    if args.json {
        let response = api::ApiContextResponse::from_context(&context);
        let payload = serde_json::to_string_pretty(&response)
            .map_err(|err| format!("failed to encode context: {}", err))?;
        println!("{}", payload);
        return Ok(());
    }

    print_context(&context, config.defaults.language);
    Ok(())
}

async fn run_recommend(config: &ShilingConfig, args: RecommendArgs) -> Result<(), String> {
    let request = api::ApiRecommendRequest {
        request_id: None,
        date: args.date,
        time: args.time,
        meal_period: args.meal,
        diet_type: Some(args.diet),
        health_goal: args.goal,
        location: args.location,
        weather: args.weather,
        language: args.language,
    };
    let (moment, selections) = request.into_selections()?;
    let translate_to = api::parse_language(args.translate.as_deref())?;
    let service = RecommendationService::from_config(config)?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling generation");
            interrupt.cancel();
        }
    });

    let outcome = service
        .recommend(&moment, &selections, &cancel, &LogObserver)
        .await
        .map_err(|err| err.to_string())?;

    let translated = match translate_to {
        Some(language) => Some(
            service
                .translate(language, &cancel, &LogObserver)
                .await
                .map_err(|err| err.to_string())?,
        ),
        None => None,
    };

    if args.json {
        let response = api::ApiRecommendResponse::from_outcome(outcome, "cli".to_string());
        let payload = serde_json::to_string_pretty(&response)
            .map_err(|err| format!("failed to encode recommendation: {}", err))?;
        println!("{}", payload);
        if let Some(translated) = translated {
            let payload = serde_json::to_string_pretty(&translated)
                .map_err(|err| format!("failed to encode translation: {}", err))?;
            println!("{}", payload);
        }
        return Ok(());
    }

    let language = outcome.request.language;
    print_context(&outcome.context, language);
    println!(
        "Request: {} | {} | {} | {}",
        outcome.request.meal_period.label(language),
        outcome.request.diet_type.label(language),
        outcome.request.solar_term_descriptor,
        outcome.request.season
    );
    println!(
        "Model: {} ({} attempt(s), {} ms)",
        outcome.model,
        outcome.attempts.len(),
        outcome.elapsed_ms
    );
    println!();
    print_result(&outcome.result);

    if let Some(translated) = translated {
        println!("\nTranslation:");
        print_result(&translated);
    }
    Ok(())
}

fn print_context(context: &TemporalContext, language: Language) {
    println!("Pillars: {}", context.pillars.display(&context.moment));
    println!(
        "Zodiac: {} ({})",
        context.pillars.zodiac,
        context.pillars.zodiac_english().unwrap_or("-")
    );
    println!("Lunar: {}", context.lunar.display);
    println!(
        "Solar term: {}",
        shiling::pipeline::request::solar_term_descriptor(context.solar_term.as_ref(), language)
    );
    println!("Season: {}", context.season.name(language));
    println!(
        "Sources: pillars {:?} | lunar {:?} | solar term {:?}",
        context.sources.pillars, context.sources.lunar, context.sources.solar_term
    );
}

fn print_result(result: &RecommendationResult) {
    if result.degraded {
        println!("(generated content was not valid JSON; showing extracted text)");
    }
    for (index, item) in result.items.iter().enumerate() {
        println!("{}. {}", index + 1, item.name());
        let ingredients = item.ingredient_labels();
        if !ingredients.is_empty() {
            println!("   Ingredients: {}", ingredients.join("、"));
        }
        for step in item.steps() {
            println!("   - {}", step);
        }
    }
    let nutrition = &result.total_nutrition;
    println!(
        "\nNutrition: {} kcal | protein {}g ({}%) | fat {}g ({}%) | carbs {}g ({}%)",
        nutrition.calories,
        nutrition.protein.amount,
        nutrition.protein.percentage,
        nutrition.fat.amount,
        nutrition.fat.percentage,
        nutrition.carbs.amount,
        nutrition.carbs.percentage
    );
    if !nutrition.summary.is_empty() {
        println!("{}", nutrition.summary);
    }
    if let Some(tips) = &result.tips {
        match tips {
            serde_json::Value::Array(entries) => {
                println!("\nTips:");
                for entry in entries {
                    match entry.as_str() {
                        Some(text) => println!("- {}", text),
                        None => println!("- {}", entry),
                    }
                }
            }
            serde_json::Value::String(text) => println!("\nTips: {}", text),
            other => println!("\nTips: {}", other),
        }
    }
}

struct LogObserver;

impl CascadeObserver for LogObserver {
    fn attempt_started(&self, model: &str, index: usize, total: usize) {
        info!(model, attempt = index + 1, total, "calling model");
    }

    fn attempt_failed(&self, model: &str, error: &GenerationError) {
        warn!(model, error = %error, "model failed");
    }

    fn attempt_succeeded(&self, model: &str, elapsed: Duration) {
        info!(model, elapsed_ms = elapsed.as_millis() as u64, "model answered");
    }
}

fn load_dotenv() {
    let _ = dotenvy::dotenv();
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let manifest_path = Path::new(manifest_dir).join(".env");
    let _ = dotenvy::from_path(manifest_path);
}

