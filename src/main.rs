use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use webdavfs::auth::{Auth, AuthCache, BasicAuthCache};
use webdavfs::cache::DiskCache;
use webdavfs::cli::{Cli, Commands, CompletionsArgs, MountArgs, ProbeArgs};
use webdavfs::config::{webdavfs_config_dir, webdavfs_data_dir, MountConfig, Verbosity};
use webdavfs::context::MountContext;
use webdavfs::error::DavError;
use webdavfs::ops;
use webdavfs::pool::StreamSlotPool;
use webdavfs::proxy::ProxyWatcher;
use webdavfs::queue::ThreadPoolQueue;
use webdavfs::trust::{AutoAcceptCertPrompt, ProcessCertPrompt, SslTrustNegotiator};

fn main() {
    let cli = Cli::parse();

    let verbosity = Verbosity::from((cli.quiet, cli.verbose));
    let filter = verbosity.as_tracing_filter();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(?verbosity, "starting webdavfs-mount");

    if let Err(err) = run(cli) {
        display_error(&err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), DavError> {
    match cli.command {
        Commands::Mount(args) => run_mount(args),
        Commands::Probe(args) => run_probe(args),
        Commands::Completions(args) => run_completions(args),
    }
}

fn mount_config_from_args(args: &MountArgs) -> MountConfig {
    MountConfig {
        base_url: args.base_url.clone(),
        username: args.username.clone(),
        read_only: args.read_only,
        mirrored: args.mirrored,
        worker_threads: args.worker_threads.unwrap_or(4),
        freshness_window_secs: args.freshness_window_secs.unwrap_or(30),
        proxy_override_path: args.proxy_override.clone(),
        cert_prompt_helper: args.cert_prompt_helper.clone(),
    }
}

fn build_context(config: &MountConfig) -> Result<Arc<MountContext>, DavError> {
    let base_url = url::Url::parse(&config.base_url)?;

    let password = if config.username.is_some() {
        std::env::var("WEBDAVFS_PASSWORD").ok()
    } else {
        None
    };
    let auth = match (&config.username, password) {
        (Some(user), Some(password)) => Auth::Password { user: user.clone(), password },
        _ => Auth::None,
    };
    let auth_cache: Arc<dyn AuthCache> = Arc::new(BasicAuthCache::new(auth));

    let proxy = Arc::new(ProxyWatcher::new(config.proxy_override_path.clone()));

    let cert_prompt: Box<dyn webdavfs::trust::CertPrompt> = match &config.cert_prompt_helper {
        Some(path) => Box::new(ProcessCertPrompt { helper_path: path.clone() }),
        None => Box::new(AutoAcceptCertPrompt),
    };
    let trust = Arc::new(SslTrustNegotiator::new(cert_prompt));

    let data_dir = webdavfs_data_dir()?;
    let cache = Arc::new(DiskCache::new(data_dir.join("cache"))?);
    let queue = Arc::new(ThreadPoolQueue::new(config.worker_threads));
    let pool = Arc::new(StreamSlotPool::new(config.worker_threads));

    let start = chrono::Utc::now();

    Ok(Arc::new(MountContext::new(
        base_url,
        Duration::from_secs(60),
        pool,
        proxy,
        trust,
        auth_cache,
        cache,
        queue,
        webdavfs::context::build_user_agent(config.mirrored),
        MountContext::build_x_source_id(start),
        unsafe { libc::getuid() },
        config.read_only,
        chrono::Duration::seconds(config.freshness_window_secs),
        MountContext::page_size_from_sysconf(),
    )?))
}

fn run_mount(args: MountArgs) -> Result<(), DavError> {
    let config = mount_config_from_args(&args);

    if let Some(name) = &args.save_as {
        let config_dir = webdavfs_config_dir()?;
        let path = config_dir.join(format!("{name}.toml"));
        std::fs::write(&path, config.to_toml_string()?)?;
        eprintln!("Saved mount configuration to {}", path.display());
        return Ok(());
    }

    let ctx = build_context(&config)?;
    let mount_result = ops::mount(&ctx)?;
    eprintln!("Mounted {} (DAV level: {:?})", ctx.base_url, mount_result.level);
    eprintln!("Root: {} entries visible via PROPFIND depth 0", if mount_result.root.is_collection { "collection" } else { "resource" });

    tracing::info!(base_url = %ctx.base_url, "mount established; network subsystem ready");
    Ok(())
}

fn run_probe(args: ProbeArgs) -> Result<(), DavError> {
    let config = MountConfig {
        base_url: args.base_url,
        username: None,
        read_only: true,
        mirrored: false,
        worker_threads: 1,
        freshness_window_secs: 30,
        proxy_override_path: None,
        cert_prompt_helper: None,
    };
    let ctx = build_context(&config)?;
    let mount_result = ops::mount(&ctx)?;
    println!("DAV level: {:?}", mount_result.level);
    println!("href: {}", mount_result.root.href);
    Ok(())
}

fn run_completions(args: CompletionsArgs) -> Result<(), DavError> {
    use clap::CommandFactory;
    use clap_complete::generate;
    let mut cmd = Cli::command();
    generate(args.shell, &mut cmd, "webdavfs-mount", &mut std::io::stdout());
    Ok(())
}

fn display_error(err: &DavError) {
    eprintln!("error: {}", err);
    if let Some(suggestion) = err.suggestion() {
        eprintln!("  hint: {}", suggestion);
    }
}
