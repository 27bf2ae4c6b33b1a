//! Gateway — wires the kernel together and runs it until shutdown.
//!
//! Construction order: bus → stores → security → providers → tools →
//! subagents → scheduler → heartbeat → agent loop → channels. Shutdown
//! cancels the services, closes the bus, and gives components a
//! ten-second grace period to drain.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use aeon_agent::approval::ApprovalBroker;
use aeon_agent::context::ContextBuilder;
use aeon_agent::subagent::{SubagentManager, DEFAULT_MAX_SUBAGENTS};
use aeon_agent::tools::cron::CronTool;
use aeon_agent::tools::filesystem::{ListDirTool, ReadFileTool, WriteFileTool};
use aeon_agent::tools::shell::ExecTool;
use aeon_agent::tools::spawn::SpawnTool;
use aeon_agent::tools::ToolRegistry;
use aeon_agent::{AgentLoop, AgentSettings};
use aeon_channels::ChannelManager;
use aeon_core::bus::{InboundMessage, MessageBus, OutboundMessage};
use aeon_core::config::Config;
use aeon_core::heartbeat::{HeartbeatService, OnHeartbeatFn};
use aeon_core::security::{CommandPolicy, CredentialScrubber, PathSandbox};
use aeon_core::utils::{expand_home, get_default_db_path};
use aeon_cron::service::OnFireFn;
use aeon_cron::{CronService, CronStore, SystemClock};
use aeon_providers::{HttpProvider, Provider, ProviderChain};

/// A fully wired kernel, ready to run.
pub struct Kernel {
    pub bus: Arc<MessageBus>,
    pub agent: AgentLoop,
    pub cron: Arc<CronService>,
    pub heartbeat: Option<Arc<HeartbeatService>>,
    pub channels: ChannelManager,
}

/// Build every component from the config.
pub fn build_kernel(config: &Config) -> Result<Kernel> {
    let bus = Arc::new(MessageBus::new(aeon_core::bus::queue::DEFAULT_CAPACITY));

    // Stores: one SQLite file holds memories, history, and cron jobs.
    let db_path = if config.memory.db_path.is_empty() {
        get_default_db_path()
    } else {
        expand_home(&config.memory.db_path)
    };
    let memory = Arc::new(aeon_memory::MemoryStore::open(&db_path)?);
    match memory.consolidate(config.memory.consolidate_after_days) {
        Ok(0) => {}
        Ok(n) => info!(removed = n, "consolidated stale memories"),
        Err(e) => warn!(error = %e, "memory consolidation failed"),
    }
    let cron_store = Arc::new(CronStore::open(&db_path)?);

    // Security policy.
    let policy = Arc::new(CommandPolicy::new(&config.security.extra_deny_patterns));
    let sandbox = Arc::new(if config.security.allowed_paths.is_empty() {
        PathSandbox::open()
    } else {
        PathSandbox::new(
            config
                .security
                .allowed_paths
                .iter()
                .map(|p| expand_home(p))
                .collect(),
        )
    });
    let scrubber = Arc::new(CredentialScrubber::new());

    // Providers and the chain.
    let chain = build_chain(config);

    // Workspace.
    let workspace = expand_home(&config.agent.workspace);
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("creating workspace {}", workspace.display()))?;

    // Tools.
    let tools = Arc::new(ToolRegistry::with_timeout(Duration::from_secs(
        config.timeouts.tool_secs,
    )));
    tools.register(Arc::new(ReadFileTool::new(sandbox.clone())));
    tools.register(Arc::new(WriteFileTool::new(sandbox.clone())));
    tools.register(Arc::new(ListDirTool::new(sandbox)));
    tools.register(Arc::new(ExecTool::new(workspace.clone(), policy)));

    let clock = Arc::new(SystemClock);
    tools.register(Arc::new(CronTool::new(cron_store.clone(), clock.clone())));

    // Subagents (only with a provider chain to drive them).
    let (subagents, spawn_tool) = match &chain {
        Some(chain) => {
            let manager = Arc::new(SubagentManager::new(
                chain.clone(),
                tools.clone(),
                bus.clone(),
                scrubber.clone(),
                DEFAULT_MAX_SUBAGENTS,
            ));
            let spawn = Arc::new(SpawnTool::new(manager.clone()));
            tools.register(spawn.clone());
            (Some(manager), Some(spawn))
        }
        None => (None, None),
    };

    // Failover notices reach the user channel as status hints.
    if let Some(chain) = &chain {
        let bus_for_retry = bus.clone();
        let user_channel = config.channels.user_channel.clone();
        chain.set_on_retry(Arc::new(move |failed, next| {
            bus_for_retry.send(OutboundMessage::status(
                &user_channel,
                "",
                format!("[provider {failed} failed, retrying on {next}]"),
            ));
        }));
    }

    // Scheduler with its trigger binding.
    let cron = Arc::new(CronService::new(
        cron_store,
        clock,
        config.scheduler.max_concurrent,
        config.scheduler.auto_pause_threshold as i64,
    ));
    bind_cron_triggers(
        &cron,
        bus.clone(),
        config.channels.user_channel.clone(),
        config.channels.user_channel_recipients().to_vec(),
    );

    // Heartbeat.
    let heartbeat = if config.heartbeat.enabled {
        let bus_for_hb = bus.clone();
        let on_heartbeat: OnHeartbeatFn = Arc::new(move |prompt| {
            let bus = bus_for_hb.clone();
            Box::pin(async move {
                bus.publish(InboundMessage::new("system", "heartbeat", "heartbeat", prompt))
                    .await
                    .map_err(|e| anyhow::anyhow!("publishing heartbeat: {e}"))
            })
        });
        Some(Arc::new(HeartbeatService::new(
            workspace.clone(),
            on_heartbeat,
            Some(config.heartbeat.interval_secs),
        )))
    } else {
        None
    };

    // The agent loop itself.
    let settings = AgentSettings {
        name: config.agent.name.clone(),
        max_history_messages: config.agent.max_history_messages,
        max_iterations: config.agent.max_tool_iterations,
        approval_timeout: Duration::from_secs(config.security.approval_timeout_secs),
    };
    let context = ContextBuilder::new(config.agent.system_prompt.clone(), memory.clone());
    let agent = AgentLoop::new(
        bus.clone(),
        chain,
        tools,
        subagents,
        memory,
        scrubber,
        Arc::new(ApprovalBroker::new()),
        context,
        spawn_tool,
        settings,
    );

    // Transports register here; they live outside the kernel.
    let channels = ChannelManager::new(bus.clone());

    Ok(Kernel {
        bus,
        agent,
        cron,
        heartbeat,
        channels,
    })
}

/// Build the provider chain from config + routing roles.
///
/// Returns `None` when no configured provider backs the primary role;
/// the agent then answers in echo mode.
fn build_chain(config: &Config) -> Option<Arc<ProviderChain>> {
    let mut all: HashMap<String, Arc<dyn Provider>> = HashMap::new();
    for (name, settings) in &config.providers {
        if settings.is_configured() {
            all.insert(
                name.clone(),
                Arc::new(HttpProvider::new(name, settings, config.timeouts.provider_secs)),
            );
        }
    }

    let primary_name = if config.routing.primary.is_empty() {
        // Unset: any single configured provider serves as primary.
        let mut names: Vec<&String> = all.keys().collect();
        names.sort();
        names.first().map(|s| s.to_string())?
    } else {
        config.routing.primary.clone()
    };
    let primary = all.get(&primary_name)?.clone();

    let mut chain = ProviderChain::new(primary, all.clone());
    for (role, name) in [
        ("fast", &config.routing.fast),
        ("multimodal", &config.routing.multimodal),
        ("fallback", &config.routing.fallback),
    ] {
        if name.is_empty() {
            continue;
        }
        match all.get(name) {
            Some(p) => {
                chain = match role {
                    "fast" => chain.with_fast(p.clone()),
                    "multimodal" => chain.with_multimodal(p.clone()),
                    _ => chain.with_fallback(p.clone()),
                };
            }
            None => warn!(role, provider = %name, "routing role names an unconfigured provider"),
        }
    }

    info!(primary = %primary_name, "provider chain ready");
    Some(Arc::new(chain))
}

/// Bind the scheduler's trigger callback to the bus.
///
/// Recurring jobs wake the agent with a synthetic system message;
/// one-shots deliver a direct reminder to every allowed recipient of
/// the user channel.
pub fn bind_cron_triggers(
    cron: &CronService,
    bus: Arc<MessageBus>,
    user_channel: String,
    recipients: Vec<String>,
) {
    let on_fire: OnFireFn = Arc::new(move |job| {
        let bus = bus.clone();
        let user_channel = user_channel.clone();
        let recipients = recipients.clone();
        Box::pin(async move {
            if job.is_oneshot() {
                for recipient in &recipients {
                    bus.send(OutboundMessage::new(
                        &user_channel,
                        recipient,
                        format!("Reminder: {}", job.payload()),
                    ));
                }
                Ok(())
            } else {
                bus.publish(InboundMessage::new(
                    "system",
                    "cron",
                    "cron",
                    format!("[cron:{}] {}", job.name, job.payload()),
                ))
                .await
                .map_err(|e| anyhow::anyhow!("publishing cron trigger: {e}"))
            }
        })
    });
    cron.set_on_fire(on_fire);
}

/// Run the kernel until SIGINT/SIGTERM, then shut down gracefully.
pub async fn run(config: Config) -> Result<()> {
    let Kernel {
        bus,
        mut agent,
        cron,
        heartbeat,
        mut channels,
    } = build_kernel(&config)?;

    channels.start_all().await?;

    let mut services: Vec<JoinHandle<()>> = Vec::new();
    {
        let cron = cron.clone();
        services.push(tokio::spawn(async move { cron.run().await }));
    }
    if let Some(hb) = &heartbeat {
        let hb = hb.clone();
        services.push(tokio::spawn(async move { hb.run().await }));
    }

    info!("aeon kernel running");
    tokio::select! {
        _ = agent.run() => {
            info!("agent loop ended");
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    // Graceful shutdown with a 10-second grace period.
    cron.stop();
    if let Some(hb) = &heartbeat {
        hb.stop();
    }
    channels.stop_all().await;
    bus.close().await;

    let drained = tokio::time::timeout(Duration::from_secs(10), async {
        for handle in services {
            let _ = handle.await;
        }
    })
    .await;
    if drained.is_err() {
        warn!("components did not drain within the grace period, forcing exit");
    }

    info!("aeon kernel stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut term =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("installing SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
