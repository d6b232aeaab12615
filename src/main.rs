//! CLI entry point: loads configuration, builds the Role Registry and
//! model/tool/snapshot collaborators, then either lists roles or runs one
//! chat cycle against a chosen role.
//!
//! Grounded on the teacher's `main.rs` (`clap` derive `Cli`/`Command`,
//! `#[tokio::main]`, tracing setup before any other work), trimmed to the
//! `/role`, `/roles`, `chat` surface this core exposes — the teacher's
//! daemon/TUI/web-server/skills surface is out of scope here.

mod agent_manager;
mod capability;
mod config;
mod conversation;
mod credentials;
mod error;
mod events;
mod llm;
mod logging;
mod paths;
mod prompt_enhancer;
mod role;
mod snapshot;
mod tools;

use clap::{Parser, Subcommand};
use config::Config;
use conversation::{AgentConversation, ConversationConfig, Observer, ToolContext, ToolRegistry};
use llm::manager::ModelManager;
use role::{EnvironmentContext, RoleRegistry};
use snapshot::hook::SnapshotHook;
use snapshot::manager::SnapshotManager;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "coreagent", version, about = "Hierarchical multi-agent LLM orchestration runtime")]
struct Cli {
    /// Workspace root; defaults to the current directory.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List roles, optionally filtered to one group ("all" lists the global group).
    Roles {
        #[arg(default_value = "all")]
        group: String,
    },
    /// Run one send cycle against the given role with the given task text.
    Chat {
        /// Role spec, e.g. "coder" or "eng.reviewer".
        role: String,
        /// Task text. Read from stdin if omitted.
        task: Option<String>,
        /// Skip the Prompt Enhancer rewrite pass.
        #[arg(long)]
        no_enhance: bool,
    },
}

struct CliObserver;

impl Observer for CliObserver {
    fn on_chain_of_thought(&self, text: &str) {
        tracing::debug!(%text, "chain-of-thought");
    }

    fn on_tool_execution(&self, tool_name: &str, args: &serde_json::Value) {
        println!("-> {tool_name} {args}");
    }

    fn on_response(&self, content: &str) {
        println!("{content}");
    }

    fn on_error(&self, message: &str) {
        eprintln!("error: {message}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let workspace_root = cli.root.clone().unwrap_or(std::env::current_dir()?);
    let config = Config::load()?;
    let log_dir = logging::setup_tracing_with_settings(config.logging.as_settings())?;
    tracing::info!(dir = %log_dir.display(), "logging initialized");

    let roles_dir = workspace_root.join(&config.roles_dir);
    let role_registry = Arc::new(if roles_dir.is_dir() {
        RoleRegistry::load(&roles_dir)?
    } else {
        tracing::warn!(dir = %roles_dir.display(), "roles directory not found, starting with an empty role registry");
        RoleRegistry::empty()
    });

    match cli.cmd {
        Command::Roles { group } => run_roles(&role_registry, &group),
        Command::Chat { role, task, no_enhance } => {
            run_chat(&workspace_root, &config, &role_registry, &role, task, no_enhance).await?
        }
    }

    Ok(())
}

fn run_roles(role_registry: &RoleRegistry, group: &str) {
    if group == "all" {
        for group_name in role_registry.groups() {
            for name in role_registry.roles_in_group(&group_name) {
                if group_name == role::GLOBAL_GROUP {
                    println!("{name}");
                } else {
                    println!("{group_name}.{name}");
                }
            }
        }
    } else {
        for name in role_registry.roles_in_group(group) {
            println!("{group}.{name}");
        }
    }
}

async fn run_chat(
    workspace_root: &PathBuf,
    config: &Config,
    role_registry: &Arc<RoleRegistry>,
    role_spec: &str,
    task: Option<String>,
    no_enhance: bool,
) -> anyhow::Result<()> {
    let credentials_path = credentials::credentials_file();
    let credentials = credentials::Credentials::load(&credentials_path);
    let resolved_models: Vec<config::ModelConfig> = config
        .models
        .iter()
        .map(|m| config::ModelConfig {
            api_key: credentials::resolve_api_key(&m.id, m.api_key.as_deref(), &credentials),
            ..m.clone()
        })
        .collect();

    let model_manager = Arc::new(ModelManager::new(&resolved_models, config.levels.to_level_map()));

    let mut tool_registry = ToolRegistry::new();
    let snapshot_manager = Arc::new(
        SnapshotManager::new(
            config.snapshot.strategy_mode(),
            workspace_root.clone(),
            config.snapshot.store_limits(),
            config.snapshot.max_concurrent_operations,
        )
        .await,
    );
    tool_registry.register(SnapshotHook::wrap(Arc::new(tools::ReadFileTool), snapshot_manager.clone(), workspace_root.clone()));
    tool_registry.register(SnapshotHook::wrap(Arc::new(tools::WriteFileTool), snapshot_manager.clone(), workspace_root.clone()));
    tool_registry.register(SnapshotHook::wrap(Arc::new(tools::BashTool), snapshot_manager.clone(), workspace_root.clone()));
    let tool_registry = Arc::new(tool_registry);

    let task_text = match task {
        Some(t) => t,
        None => {
            use std::io::Read;
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let prompt = if no_enhance {
        task_text
    } else {
        let enhancer = prompt_enhancer::PromptEnhancer::new(model_manager.clone());
        let enhanced = enhancer.enhance(&task_text).await;
        if let Some(rationale) = &enhanced.rationale {
            tracing::info!(%rationale, "prompt enhanced");
        }
        enhanced.rewritten
    };

    let conversation_config = ConversationConfig {
        tool_call_budget: config.conversation.tool_call_budget,
        max_completion_tokens: config.conversation.max_completion_tokens,
    };
    let mut conversation = AgentConversation::new(role_spec.to_string(), role_registry.clone(), model_manager, tool_registry, conversation_config);
    conversation.push_user_message(prompt);

    let ctx = ToolContext {
        current_role: role_spec.to_string(),
        current_agent_id: None,
        cwd: workspace_root.clone(),
    };
    let env = EnvironmentContext {
        os: std::env::consts::OS.to_string(),
        cwd: workspace_root.display().to_string(),
        index_exists: false,
        current_date_time: chrono::Utc::now().to_rfc3339(),
    };

    conversation.send(&ctx, &CliObserver, &env).await?;
    snapshot_manager.shutdown().await;
    Ok(())
}
