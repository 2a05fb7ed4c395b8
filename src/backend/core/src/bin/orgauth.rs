//! OrgAuth CLI - offline tooling for tenant authorization policies
//!
//! Validates and normalizes ABAC policy files, evaluates ad-hoc ABAC
//! requests, and prints the default security policy set of an organization.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

use orgauth_core::abac::{
    attribute_map_from_json, decide, normalize_with_report, AbacPolicy, AbacRequest, InMemoryPolicyStore,
    NormalizeOptions, PolicyEffect, TenantPolicyService,
};
use orgauth_core::config::Config;
use orgauth_core::rbac::OrganizationId;
use orgauth_core::security::{build_default_security_policies, OrgSecurityPolicies, SecurityPolicy};
use orgauth_core::telemetry::init_telemetry;

// ═══════════════════════════════════════════════════════════════════════════════
// CLI Structure
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Parser)]
#[command(
    name = "orgauth",
    version,
    about = "OrgAuth - tenant authorization policy tooling",
    propagate_version = true
)]
struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Configuration file path
    #[arg(short, long, global = true, env = "ORGAUTH_CONFIG")]
    config: Option<PathBuf>,

    /// Emit diagnostic logs
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// ABAC policy file operations
    #[command(subcommand)]
    Policy(PolicyCommands),

    /// ABAC evaluation
    #[command(subcommand)]
    Abac(AbacCommands),

    /// Security policy engine operations
    #[command(subcommand)]
    Security(SecurityCommands),
}

#[derive(Subcommand)]
enum PolicyCommands {
    /// Validate a policy file as a tenant write would (schema and selectors)
    Validate {
        /// JSON file containing an array of policies
        file: PathBuf,
    },

    /// Normalize a policy file as the read path would
    Normalize {
        /// JSON file containing an array of policies
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum AbacCommands {
    /// Evaluate one request against a policy file
    Evaluate {
        /// JSON file containing an array of policies
        #[arg(long)]
        policies: PathBuf,

        #[arg(long)]
        action: String,

        #[arg(long)]
        resource_type: String,

        /// Subject attributes as a JSON object
        #[arg(long, default_value = "{}")]
        subject: String,

        /// Resource attributes as a JSON object
        #[arg(long, default_value = "{}")]
        resource: String,
    },
}

#[derive(Subcommand)]
enum SecurityCommands {
    /// Print the default security policies of an organization
    Defaults {
        #[arg(long)]
        org: String,

        /// JSON file with organization security settings
        #[arg(long)]
        settings: Option<PathBuf>,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Output Helpers
// ═══════════════════════════════════════════════════════════════════════════════

struct OutputHelper {
    format: OutputFormat,
}

impl OutputHelper {
    fn new(format: OutputFormat, no_color: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format }
    }

    fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    fn print_success(&self, message: &str) {
        println!("{} {}", "[OK]".green().bold(), message);
    }

    fn print_error(&self, message: &str) {
        match self.format {
            OutputFormat::Json => {
                let payload = serde_json::json!({"status": "error", "message": message});
                eprintln!("{payload}");
            }
            _ => eprintln!("{} {}", "[ERROR]".red().bold(), message),
        }
    }

    fn print_warning(&self, message: &str) {
        println!("{} {}", "[WARN]".yellow().bold(), message);
    }

    fn print_table<T: Tabled>(&self, items: &[T]) {
        if items.is_empty() {
            println!("{}", "No policies.".dimmed());
            return;
        }
        let table = Table::new(items)
            .with(Style::rounded())
            .with(Modify::new(Columns::first()).with(Alignment::left()))
            .to_string();
        println!("{table}");
    }

    fn print_json<T: Serialize>(&self, data: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(data)?);
        Ok(())
    }

    fn print_header(&self, title: &str) {
        println!();
        println!("{}", title.bold().underline());
        println!();
    }

    fn print_key_value(&self, key: &str, value: &str) {
        println!("  {}: {}", key.cyan(), value);
    }
}

#[derive(Tabled)]
struct AbacPolicyRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Effect")]
    effect: String,
    #[tabled(rename = "Priority")]
    priority: i64,
    #[tabled(rename = "Actions")]
    actions: String,
    #[tabled(rename = "Resources")]
    resources: String,
}

impl From<&AbacPolicy> for AbacPolicyRow {
    fn from(policy: &AbacPolicy) -> Self {
        Self {
            id: policy.id.clone(),
            effect: effect_label(policy.effect).to_string(),
            priority: policy.effective_priority(),
            actions: policy.actions.join(", "),
            resources: policy.resources.join(", "),
        }
    }
}

#[derive(Tabled)]
struct SecurityPolicyRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Priority")]
    priority: i32,
    #[tabled(rename = "Conditions")]
    conditions: usize,
    #[tabled(rename = "Actions")]
    actions: String,
}

impl From<&SecurityPolicy> for SecurityPolicyRow {
    fn from(policy: &SecurityPolicy) -> Self {
        Self {
            id: policy.id.clone(),
            priority: policy.priority,
            conditions: policy.conditions.len(),
            actions: policy
                .actions
                .iter()
                .map(|action| action.kind.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

fn effect_label(effect: PolicyEffect) -> &'static str {
    match effect {
        PolicyEffect::Allow => "allow",
        PolicyEffect::Deny => "deny",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Command Handlers
// ═══════════════════════════════════════════════════════════════════════════════

fn read_json(path: &Path) -> Result<Value> {
    let contents = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
}

fn read_policy_array(path: &Path) -> Result<Vec<Value>> {
    match read_json(path)? {
        Value::Array(entries) => Ok(entries),
        _ => anyhow::bail!("{} must contain a JSON array of policies", path.display()),
    }
}

fn print_abac_policies(output: &OutputHelper, title: &str, policies: &[AbacPolicy]) -> Result<()> {
    match output.format {
        OutputFormat::Json => output.print_json(&policies),
        OutputFormat::Table => {
            let rows: Vec<AbacPolicyRow> = policies.iter().map(AbacPolicyRow::from).collect();
            output.print_table(&rows);
            Ok(())
        }
        OutputFormat::Text => {
            output.print_header(title);
            for policy in policies {
                output.print_key_value(
                    &policy.id,
                    &format!(
                        "{} {} on {} (priority {})",
                        effect_label(policy.effect),
                        policy.actions.join(","),
                        policy.resources.join(","),
                        policy.effective_priority()
                    ),
                );
            }
            Ok(())
        }
    }
}

async fn handle_policy_command(cmd: PolicyCommands, config: &Config, output: &OutputHelper) -> Result<()> {
    match cmd {
        PolicyCommands::Validate { file } => {
            let raw = read_policy_array(&file)?;
            let service = TenantPolicyService::new(Arc::new(InMemoryPolicyStore::new()), &config.abac);
            let policies = service
                .set_policies(&OrganizationId::new("cli-validation"), raw)
                .await?;

            if output.is_json() {
                output.print_json(&serde_json::json!({"valid": true, "policies": policies.len()}))
            } else {
                output.print_success(&format!("{} is valid ({} policies)", file.display(), policies.len()));
                Ok(())
            }
        }
        PolicyCommands::Normalize { file } => {
            let raw = read_policy_array(&file)?;
            let normalized = normalize_with_report(&raw, NormalizeOptions::read_path())?;

            if output.is_json() {
                return output.print_json(&serde_json::json!({
                    "policies": normalized.policies,
                    "dropped": normalized.dropped,
                }));
            }
            print_abac_policies(output, "Normalized policies", &normalized.policies)?;
            if normalized.dropped > 0 {
                output.print_warning(&format!("{} malformed entries dropped", normalized.dropped));
            }
            Ok(())
        }
    }
}

fn handle_abac_command(cmd: AbacCommands, output: &OutputHelper) -> Result<()> {
    match cmd {
        AbacCommands::Evaluate {
            policies,
            action,
            resource_type,
            subject,
            resource,
        } => {
            let raw = read_policy_array(&policies)?;
            let normalized = normalize_with_report(&raw, NormalizeOptions::read_path())?;
            let subject: Value = serde_json::from_str(&subject).context("parsing --subject")?;
            let resource: Value = serde_json::from_str(&resource).context("parsing --resource")?;
            let subject = attribute_map_from_json(&subject);
            let resource = attribute_map_from_json(&resource);

            let decision = decide(
                &normalized.policies,
                &AbacRequest {
                    action: &action,
                    resource_type: &resource_type,
                    subject: &subject,
                    resource: &resource,
                },
            );

            if output.is_json() {
                return output.print_json(&decision);
            }
            let verdict = if decision.allowed {
                "ALLOW".green().bold()
            } else {
                "DENY".red().bold()
            };
            println!("{verdict}");
            output.print_key_value("deciding policy", decision.deciding_policy.as_deref().unwrap_or("-"));
            output.print_key_value("matched", &decision.matched_policies.join(", "));
            if normalized.dropped > 0 {
                output.print_warning(&format!("{} malformed entries dropped", normalized.dropped));
            }
            Ok(())
        }
    }
}

fn handle_security_command(cmd: SecurityCommands, output: &OutputHelper) -> Result<()> {
    match cmd {
        SecurityCommands::Defaults { org, settings } => {
            let settings: OrgSecurityPolicies = match settings {
                Some(path) => serde_json::from_value(read_json(&path)?)
                    .with_context(|| format!("parsing {}", path.display()))?,
                None => OrgSecurityPolicies::default(),
            };
            let policies = build_default_security_policies(&OrganizationId::new(org), &settings);

            match output.format {
                OutputFormat::Json => output.print_json(&policies),
                _ => {
                    let rows: Vec<SecurityPolicyRow> = policies.iter().map(SecurityPolicyRow::from).collect();
                    output.print_table(&rows);
                    Ok(())
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main
// ═══════════════════════════════════════════════════════════════════════════════

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

async fn run(cli: Cli, output: &OutputHelper) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    if cli.verbose {
        init_telemetry(&config)?;
    }

    match cli.command {
        Commands::Policy(cmd) => handle_policy_command(cmd, &config, output).await,
        Commands::Abac(cmd) => handle_abac_command(cmd, output),
        Commands::Security(cmd) => handle_security_command(cmd, output),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let output = OutputHelper::new(cli.format, cli.no_color);

    if let Err(e) = run(cli, &output).await {
        output.print_error(&format!("{e:#}"));
        std::process::exit(1);
    }

    Ok(())
}
