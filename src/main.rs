use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use bastion::builder::ImageBuilder;
use bastion::cli::{Cli, Commands, UserAction};
use bastion::config::{self, BuildConfig, FormatConfig, FormatParams};
use bastion::credentials;
use bastion::device::Device;
use bastion::format::{self, FormattingBackend, RealFormattingBackend};
use bastion::unlock::collaborators::{NoopEventSink, NoopSessionEnvironment};
use bastion::unlock::post_unlock::{
    run_post_unlock_steps, BindDataDirectories, ChangeLoginPassword, DisableAutologin,
    ExtractLiveConfig, ExtractPrivdata, PostUnlockStep, RegenerateHostKeys, RunPostUnlockScript,
};
use bastion::unlock::UnlockMachine;
use bastion_api::constants::RUN_DIR;
use bastion_api::role::LabelType;

fn parse_label_type(s: &str) -> Result<LabelType> {
    match s.to_lowercase().as_str() {
        "mbr" | "dos" => Ok(LabelType::Mbr),
        "gpt" => Ok(LabelType::Gpt),
        other => anyhow::bail!("unknown label type '{other}', expected 'mbr' or 'gpt'"),
    }
}

fn run_dev_format(
    format_config_id: &str,
    format_configs_file: &std::path::Path,
    params_file: &std::path::Path,
    devfile: &std::path::Path,
    label_type: &str,
) -> Result<()> {
    let format_config: FormatConfig = config::load_format_config(format_configs_file, format_config_id)
        .context("loading format configuration")?;
    let params_json = std::fs::read_to_string(params_file).context("reading params file")?;
    let params: FormatParams = serde_json::from_str(&params_json).context("parsing params file")?;

    let mut device = Device::new(devfile.to_path_buf(), parse_label_type(label_type)?);
    let backend: &dyn FormattingBackend = &RealFormattingBackend;
    let report = format::format_device(&mut device, backend, &format_config, &params)?;
    log::info!("device formatted, admin user uuid {}", report.admin_user_uuid);
    Ok(())
}

fn run_unlock(devfile: &std::path::Path, passwords: &[String], label_type: &str) -> Result<()> {
    let run_dir = PathBuf::from(RUN_DIR);
    let mut device = Device::new(devfile.to_path_buf(), parse_label_type(label_type)?);
    let machine = UnlockMachine::start(&run_dir)?;
    let passwords: Vec<&str> = passwords.iter().map(String::as_str).collect();
    let outcome = machine.run(&mut device, &passwords, &run_dir)?;

    match (&outcome.state, &outcome.context) {
        (bastion::unlock::UnlockState::Unlocked, Some(ctx)) => {
            log::info!("device unlocked for user {}", ctx.cn);
            let session = NoopSessionEnvironment;
            let root = PathBuf::from("/");
            let steps: Vec<&dyn PostUnlockStep> = vec![
                &ChangeLoginPassword(&session),
                &DisableAutologin(&session),
                &ExtractPrivdata,
                &ExtractLiveConfig,
                &BindDataDirectories,
                &RegenerateHostKeys { root: root.clone() },
                &RunPostUnlockScript { root },
            ];
            let report = run_post_unlock_steps(ctx, &steps, &NoopEventSink);
            report.into_result()?;
            Ok(())
        }
        (state, _) => anyhow::bail!("unlock did not succeed: {state:?}"),
    }
}

fn run_build(config_path: &std::path::Path, sources_dir: &std::path::Path, out_dir: &std::path::Path) -> Result<()> {
    let yaml = std::fs::read_to_string(config_path).context("reading build configuration")?;
    let config: BuildConfig = serde_yaml::from_str(&yaml).context("parsing build configuration")?;

    let build_dir = out_dir.join("build");
    let builder = ImageBuilder::new(sources_dir.to_path_buf(), build_dir, out_dir.to_path_buf(), config);
    let iso = builder.build()?;
    log::info!("built image at {}", iso.display());
    Ok(())
}

fn run_validate(config_path: &std::path::Path) -> Result<()> {
    let yaml = std::fs::read_to_string(config_path).context("reading configuration")?;
    if serde_yaml::from_str::<BuildConfig>(&yaml).is_ok() {
        println!("{}: valid build configuration", config_path.display());
        return Ok(());
    }
    if serde_yaml::from_str::<Vec<FormatConfig>>(&yaml).is_ok() {
        println!("{}: valid format configuration list", config_path.display());
        return Ok(());
    }
    anyhow::bail!("{} is neither a valid build nor format configuration", config_path.display())
}

fn run_user(action: UserAction) -> Result<()> {
    match action {
        UserAction::Add { dummy_mountpoint, cn, password } => {
            let mut blob0 = [0u8; 32];
            {
                use rand::RngCore;
                rand::rngs::OsRng.fill_bytes(&mut blob0);
            }
            let uuid = credentials::declare_user(&dummy_mountpoint, &cn, &password, &blob0)?;
            println!("declared user '{cn}' ({uuid})");
        }
        UserAction::List { dummy_mountpoint } => {
            for name in credentials::list_users(&dummy_mountpoint) {
                println!("{name}");
            }
        }
        UserAction::Passwd { dummy_mountpoint, current, new } => {
            credentials::change_password(&dummy_mountpoint, &current, &new)?;
            println!("password changed");
        }
        UserAction::Rm { dummy_mountpoint, cn } => {
            credentials::delete_user(&dummy_mountpoint, &cn, None)?;
            println!("removed user '{cn}'");
        }
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::DevFormat { format_config_id, format_configs_file, params_file, devfile, label_type } => {
            run_dev_format(&format_config_id, &format_configs_file, &params_file, &devfile, &label_type)
        }
        Commands::Unlock { devfile, passwords, label_type } => run_unlock(&devfile, &passwords, &label_type),
        Commands::Build { config, sources_dir, out_dir } => run_build(&config, &sources_dir, &out_dir),
        Commands::Validate { config } => run_validate(&config),
        Commands::User { action } => run_user(action),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    bastion::logging::init(cli.verbosity);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
