use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use prefs_core::config::config_path;
use prefs_core::{PrefsConfig, PATH_SEPARATOR};
use prefs_storage::{PreferenceNode, PreferenceTree};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum Command {
    /// Print one value
    Get(KeyArgs),
    /// Set a value and flush it
    Put(PutArgs),
    /// Remove a value and flush
    Remove(KeyArgs),
    /// Show the values and children of a node
    List(ListArgs),
    /// Remove a node and everything below it
    RemoveNode(NodeArgs),
    /// Import a legacy pref_store.ini into the native file
    Migrate(MigrateArgs),
    /// Write the effective configuration to a config file
    InitConfig(InitConfigArgs),
}

/// Node paths are relative to the configured scope, e.g. `org.example/ui`.
#[derive(Args, Debug)]
pub struct NodeArgs {
    pub node: String,
}

#[derive(Args, Debug)]
pub struct KeyArgs {
    pub node: String,
    pub key: String,
}

#[derive(Args, Debug)]
pub struct PutArgs {
    pub node: String,
    pub key: String,
    pub value: String,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    pub node: String,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct MigrateArgs {
    pub qualifier: String,
}

#[derive(Args, Debug)]
pub struct InitConfigArgs {
    /// Defaults to $PREFS_CONFIG_PATH or the user config dir
    pub path: Option<PathBuf>,
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
struct NodeListing {
    path: String,
    properties: BTreeMap<String, String>,
    children: Vec<String>,
}

impl NodeListing {
    fn from_node(node: &PreferenceNode) -> Self {
        let properties = node
            .keys()
            .into_iter()
            .filter_map(|key| node.get(&key).map(|value| (key, value)))
            .collect();
        Self {
            path: node.path().to_string(),
            properties,
            children: node.child_names(),
        }
    }

    fn render(&self) -> String {
        let mut lines: Vec<String> = self
            .properties
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        lines.extend(
            self.children
                .iter()
                .map(|child| format!("{child}{PATH_SEPARATOR}")),
        );
        lines.join("\n")
    }
}

fn scoped(config: &PrefsConfig, node: &str) -> String {
    format!(
        "{}{PATH_SEPARATOR}{}",
        config.scope,
        node.trim_start_matches(PATH_SEPARATOR)
    )
}

/// Runs `command` against a tree built from `config` and returns what
/// should be printed.
pub fn run(config: &PrefsConfig, command: Command) -> Result<String> {
    let tree = PreferenceTree::from_config(config);
    match command {
        Command::Get(args) => {
            let node = tree.node(&scoped(config, &args.node));
            match node.get(&args.key) {
                Some(value) => Ok(value),
                None => bail!("{} has no key {:?}", node.path(), args.key),
            }
        }
        Command::Put(args) => {
            let node = tree.node(&scoped(config, &args.node));
            node.put(&args.key, args.value);
            node.flush()
                .with_context(|| format!("failed to save {}", node.path()))?;
            info!(event = "value_stored", node = %node.path(), key = %args.key);
            Ok(String::new())
        }
        Command::Remove(args) => {
            let node = tree.node(&scoped(config, &args.node));
            if node.remove(&args.key).is_none() {
                bail!("{} has no key {:?}", node.path(), args.key);
            }
            node.flush()
                .with_context(|| format!("failed to save {}", node.path()))?;
            info!(event = "value_removed", node = %node.path(), key = %args.key);
            Ok(String::new())
        }
        Command::List(args) => {
            let listing = NodeListing::from_node(&tree.node(&scoped(config, &args.node)));
            if args.json {
                serde_json::to_string_pretty(&listing).context("failed to encode listing")
            } else {
                Ok(listing.render())
            }
        }
        Command::RemoveNode(args) => {
            let path = scoped(config, &args.node);
            if !tree.node_exists(&path) {
                bail!("no node at {path}");
            }
            tree.remove_node(&path)
                .with_context(|| format!("failed to remove {path}"))?;
            tree.flush_all()
                .with_context(|| format!("failed to save after removing {path}"))?;
            Ok(String::new())
        }
        Command::Migrate(args) => {
            let path = scoped(config, &args.qualifier);
            let Some(location) = tree.location_of(&path) else {
                bail!("no state directory configured; refusing to migrate {path}");
            };
            let node = tree.node(&path);
            let imported = node.is_dirty();
            node.flush()
                .with_context(|| format!("failed to save {}", node.path()))?;
            if imported {
                Ok(format!("migrated {} to {}", node.path(), location.display()))
            } else {
                Ok(format!("nothing to migrate for {}", node.path()))
            }
        }
        Command::InitConfig(args) => {
            let target = args.path.unwrap_or_else(config_path);
            if target.exists() && !args.force {
                bail!("{} already exists (use --force to overwrite)", target.display());
            }
            config
                .save(&target)
                .with_context(|| format!("failed to write {}", target.display()))?;
            info!(event = "config_written", path = %target.display());
            Ok(format!("wrote {}", target.display()))
        }
    }
}
