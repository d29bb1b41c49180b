mod config;
mod output;

use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Arg, ArgAction, ArgMatches, Command};
use config::{DEFAULT_CONFIG_PATH, JxConfig, expand_home};
use jx_common::error::Error;
use jx_controller::{
    JxContext, PromoteOptions, Promoter, WorkflowController, parse_duration,
    workflow::resolve_workflow,
};
use jx_gits::{GitCli, GitHubProvider};
use jx_helm::HelmCli;
use jx_state::FsStateDb;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    // a .env file is optional
    let _ = dotenvy::dotenv();

    let matches = cli().get_matches();
    init_tracing(matches.get_flag("verbose"));

    let config = load_config(&matches).await?;

    match matches.subcommand() {
        Some(("promote", sub)) => run_promote(&config, sub).await,
        Some(("controller", sub)) => match sub.subcommand() {
            Some(("workflow", wf)) => run_controller(&config, wf).await,
            _ => Err(Error::Configuration("unknown controller".to_string())),
        },
        Some(("get", sub)) => match sub.subcommand() {
            Some(("workflow", wf)) => get_workflow(&config, wf).await,
            Some(("activity", act)) => get_activities(&config, act).await,
            _ => Err(Error::Configuration("unknown resource kind".to_string())),
        },
        _ => Err(Error::Configuration("unknown command".to_string())),
    }
}

fn cli() -> Command {
    Command::new("jx")
        .about("Promotes application versions through GitOps environments")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("namespace")
                .short('n')
                .long("namespace")
                .help("Team namespace holding activities, environments and workflows")
                .global(true)
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("state_dir")
                .long("state-dir")
                .help("Directory of the resource store")
                .global(true)
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Path to the configuration file")
                .default_value(DEFAULT_CONFIG_PATH)
                .global(true)
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .help("Enables debug logging")
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new("promote")
                .about("Promotes a version of an application to an environment")
                .arg(
                    Arg::new("application")
                        .help("Application to promote")
                        .required(true)
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("env")
                        .short('e')
                        .long("env")
                        .help("Environment to promote to")
                        .required_unless_present("all_auto")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("version")
                        .short('v')
                        .long("version")
                        .help("Version of the application to promote")
                        .required(true)
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("pipeline")
                        .long("pipeline")
                        .help("Pipeline the version was built by, as owner/repository/branch")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("build")
                        .long("build")
                        .help("Build number of the pipeline")
                        .requires("pipeline")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("release")
                        .short('r')
                        .long("release")
                        .help("Helm release name, defaults to <namespace>-<application>")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("alias")
                        .long("alias")
                        .help("Alias of the chart dependency in the environment")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("timeout")
                        .short('t')
                        .long("timeout")
                        .help("How long to wait for the promotion")
                        .default_value("1h")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("pull_request_poll_time")
                        .long("pull-request-poll-time")
                        .help("Interval between pull request checks")
                        .default_value("20s")
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("no_poll")
                        .long("no-poll")
                        .help("Returns once the pull request is open")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("no_merge")
                        .long("no-merge")
                        .help("Never merges the pull request, even when its checks pass")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("no_helm_update")
                        .long("no-helm-update")
                        .help("Skips `helm repo update` before a direct helm promotion")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("all_auto")
                        .long("all-auto")
                        .help("Promotes through every automatic environment in order")
                        .conflicts_with("env")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("controller")
                .about("Runs controllers")
                .subcommand_required(true)
                .subcommand(
                    Command::new("workflow")
                        .about("Drives pipeline activities through their promotion workflows")
                        .arg(
                            Arg::new("no_watch")
                                .long("no-watch")
                                .help("Runs a single pass and exits")
                                .action(ArgAction::SetTrue),
                        )
                        .arg(
                            Arg::new("no_merge")
                                .long("no-merge")
                                .help("Never merges promotion pull requests")
                                .action(ArgAction::SetTrue),
                        )
                        .arg(
                            Arg::new("pull_request_poll_time")
                                .long("pull-request-poll-time")
                                .help("Interval between checks of open pull requests")
                                .action(ArgAction::Set),
                        )
                        .arg(
                            Arg::new("resync_interval")
                                .long("resync-interval")
                                .help("Interval between listings of the activity store")
                                .action(ArgAction::Set),
                        ),
                ),
        )
        .subcommand(
            Command::new("get")
                .about("Displays resources")
                .subcommand_required(true)
                .subcommand(
                    Command::new("workflow")
                        .about("Displays the steps of a workflow")
                        .arg(
                            Arg::new("name")
                                .help("Workflow name, the default workflow when omitted")
                                .action(ArgAction::Set),
                        ),
                )
                .subcommand(
                    Command::new("activity")
                        .about("Displays pipeline activities and their promotions")
                        .arg(
                            Arg::new("filter")
                                .short('f')
                                .long("filter")
                                .help("Only activities whose pipeline contains this text")
                                .action(ArgAction::Set),
                        ),
                ),
        )
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_level(true)
        .with_target(true)
        .init();
}

/// File values, then the environment, then command line flags.
async fn load_config(matches: &ArgMatches) -> Result<JxConfig, Error> {
    let path = matches
        .get_one::<String>("config")
        .map(|p| expand_home(p))
        .unwrap_or_else(|| expand_home(DEFAULT_CONFIG_PATH));

    let mut config = JxConfig::load(&path).await?;
    config.apply_env(|name| std::env::var(name).ok());

    if let Some(namespace) = matches.get_one::<String>("namespace") {
        config.namespace = Some(namespace.clone());
    }
    if let Some(dir) = matches.get_one::<String>("state_dir") {
        config.state_dir = Some(PathBuf::from(dir));
    }

    debug!(
        "Config: namespace {} state {}",
        config.namespace(),
        config.state_dir().display()
    );
    Ok(config)
}

async fn build_context(config: &JxConfig) -> Result<JxContext, Error> {
    let kube = FsStateDb::new(config.state_dir(), config.namespace()).await?;
    let provider = GitHubProvider::new(config.git_api_url(), config.git.token.clone());

    let mut gitter = GitCli::new();
    if let (Some(name), Some(email)) = (&config.git.user_name, &config.git.user_email) {
        gitter = gitter.with_identity(name, email);
    }
    let helmer = config
        .helm
        .binary
        .as_deref()
        .map(HelmCli::new)
        .unwrap_or_default();

    Ok(JxContext::new(
        Arc::new(kube),
        Arc::new(provider),
        Arc::new(gitter),
        Arc::new(helmer),
    ))
}

fn required<'a>(matches: &'a ArgMatches, id: &str) -> Result<&'a String, Error> {
    matches
        .get_one::<String>(id)
        .ok_or_else(|| Error::Configuration(format!("missing argument {id}")))
}

fn duration_arg(matches: &ArgMatches, id: &str) -> Result<Option<Duration>, Error> {
    matches
        .get_one::<String>(id)
        .map(|text| parse_duration(text))
        .transpose()
}

fn promote_options(config: &JxConfig, matches: &ArgMatches) -> Result<PromoteOptions, Error> {
    let controller = config.controller_config()?;
    let application = required(matches, "application")?;
    let version = required(matches, "version")?;
    let environment = matches
        .get_one::<String>("env")
        .map(String::as_str)
        .unwrap_or_default();

    let mut opts = PromoteOptions::new(application, version, environment);
    opts.pipeline = matches.get_one::<String>("pipeline").cloned();
    opts.build = matches.get_one::<String>("build").cloned();
    opts.release_name = matches.get_one::<String>("release").cloned();
    opts.alias = matches.get_one::<String>("alias").cloned();
    opts.helm_repository_url = controller.helm_repository_url;
    opts.local_helm_repo_name = controller.local_helm_repo_name;
    opts.no_helm_update = matches.get_flag("no_helm_update");
    opts.no_poll = matches.get_flag("no_poll");
    opts.no_merge_pull_request =
        matches.get_flag("no_merge") || controller.no_merge_pull_request;
    if let Some(timeout) = duration_arg(matches, "timeout")? {
        opts.timeout = timeout;
    }
    if let Some(interval) = duration_arg(matches, "pull_request_poll_time")? {
        opts.pull_request_poll_interval = interval;
    }
    Ok(opts)
}

async fn run_promote(config: &JxConfig, matches: &ArgMatches) -> Result<(), Error> {
    let opts = promote_options(config, matches)?;
    let promoter = Promoter::new(build_context(config).await?, config.environments_dir());

    let results = if matches.get_flag("all_auto") {
        promoter.promote_all_automatic(&opts).await?
    } else {
        vec![promoter.promote(&opts).await?]
    };

    for result in &results {
        println!(
            "{}",
            output::render_promote_result(&opts.application, &opts.version, result)
        );
    }
    Ok(())
}

fn controller_config(
    config: &JxConfig,
    matches: &ArgMatches,
) -> Result<jx_controller::ControllerConfig, Error> {
    let mut controller = config.controller_config()?;
    controller.no_watch = matches.get_flag("no_watch");
    if matches.get_flag("no_merge") {
        controller.no_merge_pull_request = true;
    }
    if let Some(interval) = duration_arg(matches, "pull_request_poll_time")? {
        controller.pull_request_poll_interval = interval;
    }
    if let Some(interval) = duration_arg(matches, "resync_interval")? {
        controller.resync_interval = interval;
    }
    Ok(controller)
}

async fn run_controller(config: &JxConfig, matches: &ArgMatches) -> Result<(), Error> {
    let controller_config = controller_config(config, matches)?;
    let ctx = build_context(config).await?;

    info!(
        "Controller: starting workflow controller in namespace {}",
        config.namespace()
    );
    WorkflowController::new(ctx, controller_config, config.environments_dir())
        .run()
        .await
}

async fn get_workflow(config: &JxConfig, matches: &ArgMatches) -> Result<(), Error> {
    let ctx = build_context(config).await?;
    let name = matches
        .get_one::<String>("name")
        .map(String::as_str)
        .unwrap_or_default();

    let workflow = resolve_workflow(ctx.kube.as_ref(), &ctx.retry, name).await?;
    print!("{}", output::render_workflow(&workflow));
    Ok(())
}

async fn get_activities(config: &JxConfig, matches: &ArgMatches) -> Result<(), Error> {
    let ctx = build_context(config).await?;
    let mut activities = ctx.kube.list_activities().await?;

    if let Some(filter) = matches.get_one::<String>("filter") {
        activities.retain(|a| a.spec.pipeline.contains(filter.as_str()));
    }
    activities.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));

    print!("{}", output::render_activities(&activities));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ArgMatches {
        cli().try_get_matches_from(args).unwrap()
    }

    #[test]
    fn test_promote_arguments() {
        let matches = parse(&[
            "jx",
            "promote",
            "cheese",
            "--env",
            "production",
            "--version",
            "1.2.3",
            "--pipeline",
            "acme/cheese/master",
            "--build",
            "7",
            "--timeout",
            "10m",
            "--no-poll",
        ]);
        let Some(("promote", sub)) = matches.subcommand() else {
            panic!("expected promote");
        };

        let opts = promote_options(&JxConfig::default(), sub).unwrap();
        assert_eq!(opts.application, "cheese");
        assert_eq!(opts.environment, "production");
        assert_eq!(opts.version, "1.2.3");
        assert_eq!(opts.pipeline.as_deref(), Some("acme/cheese/master"));
        assert_eq!(opts.build.as_deref(), Some("7"));
        assert_eq!(opts.timeout, Duration::from_secs(600));
        assert_eq!(opts.pull_request_poll_interval, Duration::from_secs(20));
        assert!(opts.no_poll);
        assert!(!opts.no_merge_pull_request);
    }

    #[test]
    fn test_promote_needs_env_or_all_auto() {
        assert!(
            cli()
                .try_get_matches_from(["jx", "promote", "cheese", "--version", "1.0.0"])
                .is_err()
        );
        assert!(
            cli()
                .try_get_matches_from([
                    "jx", "promote", "cheese", "--version", "1.0.0", "--all-auto", "--env",
                    "staging"
                ])
                .is_err()
        );

        let matches = parse(&["jx", "promote", "cheese", "--version", "1.0.0", "--all-auto"]);
        let Some(("promote", sub)) = matches.subcommand() else {
            panic!("expected promote");
        };
        assert!(sub.get_flag("all_auto"));
    }

    #[test]
    fn test_controller_flags_override_config() {
        let matches = parse(&[
            "jx",
            "controller",
            "workflow",
            "--no-watch",
            "--pull-request-poll-time",
            "5s",
            "--namespace",
            "cheese-team",
        ]);
        assert_eq!(
            matches.get_one::<String>("namespace").map(String::as_str),
            Some("cheese-team")
        );

        let Some(("controller", sub)) = matches.subcommand() else {
            panic!("expected controller");
        };
        let Some(("workflow", wf)) = sub.subcommand() else {
            panic!("expected workflow");
        };
        let controller = controller_config(&JxConfig::default(), wf).unwrap();
        assert!(controller.no_watch);
        assert_eq!(controller.pull_request_poll_interval, Duration::from_secs(5));
        assert_eq!(controller.resync_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_get_subcommands() {
        let matches = parse(&["jx", "get", "workflow", "release"]);
        let Some(("get", sub)) = matches.subcommand() else {
            panic!("expected get");
        };
        let Some(("workflow", wf)) = sub.subcommand() else {
            panic!("expected workflow");
        };
        assert_eq!(wf.get_one::<String>("name").map(String::as_str), Some("release"));

        assert!(cli().try_get_matches_from(["jx", "get"]).is_err());
    }
}
