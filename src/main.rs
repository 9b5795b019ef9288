use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use shepherd_config::{load_config, parse_cli_variables, Settings, VariableSet};
use shepherd_errors::ShepherdError;

mod app;
mod help;
mod query;

use app::{parse_action, Action, Application};

fn cli() -> Command {
    Command::new("shepherd")
        .version(env!("CARGO_PKG_VERSION"))
        .about("在异构存储系统之间并行搬运大批文件")
        .arg(
            Arg::new("settings")
                .short('S')
                .long("settings")
                .value_name("FILE")
                .help("设置文件路径（默认 ~/.shepherdrc）"),
        )
        .arg(
            Arg::new("configuration")
                .short('C')
                .long("configuration")
                .value_name("DIR|FILE")
                .action(ArgAction::Append)
                .help("配置文件或目录，可重复给出，后者覆盖前者（默认 ~/.shepherd）"),
        )
        .arg(
            Arg::new("variable")
                .short('v')
                .value_name("NAME=VALUE")
                .action(ArgAction::Append)
                .help("定义模板变量，可重复给出"),
        )
        .arg(
            Arg::new("variables")
                .long("variables")
                .value_name("FILE")
                .action(ArgAction::Append)
                .help("从 YAML 文件读入模板变量，可重复给出"),
        )
        .arg(
            Arg::new("resume")
                .long("resume")
                .value_name("JOB_ID")
                .value_parser(clap::value_parser!(i64))
                .help("恢复既有作业，仅运行 transfer 阶段"),
        )
        .arg(
            Arg::new("force-restart")
                .long("force-restart")
                .action(ArgAction::SetTrue)
                .requires("resume")
                .help("恢复时把上次遗留的在途尝试记为失败"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("日志级别（默认取设置文件）"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["json", "pretty"])
                .help("日志格式（默认取设置文件）"),
        )
        .arg(
            Arg::new("action")
                .num_args(0..)
                .trailing_var_arg(true)
                .help("from FS_A to FS_B QUERY | through NAMED_ROUTE QUERY | help [SUBJECT]"),
        )
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

fn home_path(file: &str) -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(file),
        Err(_) => PathBuf::from(file),
    }
}

async fn run() -> Result<i32, ShepherdError> {
    let matches = match cli().try_get_matches() {
        Ok(matches) => matches,
        Err(e)
            if matches!(
                e.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) =>
        {
            print!("{e}");
            return Ok(0);
        }
        Err(e) => return Err(ShepherdError::Usage(e.to_string())),
    };

    let action_words: Vec<String> = matches
        .get_many::<String>("action")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    // help 不需要配置即可回答
    if action_words.first().map(String::as_str) == Some("help") {
        print!("{}", help::text(action_words.get(1).map(String::as_str)));
        return Ok(0);
    }

    let settings_path = matches
        .get_one::<String>("settings")
        .map(PathBuf::from)
        .unwrap_or_else(|| home_path(".shepherdrc"));
    let settings = Settings::load(&settings_path)?;

    let log_level = matches
        .get_one::<String>("log-level")
        .cloned()
        .unwrap_or_else(|| settings.log.level.clone());
    let log_format = matches
        .get_one::<String>("log-format")
        .cloned()
        .unwrap_or_else(|| settings.log.format.clone());
    init_logging(&log_level, &log_format)?;

    info!("shepherd {} 启动", env!("CARGO_PKG_VERSION"));

    let config_paths: Vec<PathBuf> = matches
        .get_many::<String>("configuration")
        .map(|values| values.map(PathBuf::from).collect())
        .unwrap_or_else(|| vec![home_path(".shepherd")]);
    let config = load_config(&config_paths)?;

    let cli_vars = parse_cli_variables(
        &matches
            .get_many::<String>("variable")
            .map(|values| values.cloned().collect::<Vec<_>>())
            .unwrap_or_default(),
    )?;
    let variable_files: Vec<PathBuf> = matches
        .get_many::<String>("variables")
        .map(|values| values.map(PathBuf::from).collect())
        .unwrap_or_default();
    let vars = VariableSet::build(
        &config.defaults.variables,
        &variable_files,
        std::env::vars(),
        &cli_vars,
    )?;

    let action = if let Some(&job_id) = matches.get_one::<i64>("resume") {
        Action::Resume {
            job_id,
            force_restart: matches.get_flag("force-restart"),
        }
    } else {
        parse_action(&action_words)?
    };

    let application = Application::new(settings, config, vars)?;
    let outcome = application.run(action).await?;

    if outcome.is_clean() {
        Ok(0)
    } else {
        // 部分失败：已成功的任务保留在状态库中，重跑只会恢复
        // 未完成的部分
        Ok(4)
    }
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            eprintln!("shepherd: {e}");
            e.exit_code()
        }
    };
    std::process::exit(code);
}
