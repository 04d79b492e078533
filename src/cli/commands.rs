use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde_json::{json, Value};

use crate::auth::{AuthService, Registration};
use crate::automation::AutomationRule;
use crate::crm::{EntityKind, PartnerScope, Repository};
use crate::db::{DatabaseBackend, PostgresBackend, SqliteBackend, UserRole};
use crate::server::{BackendType, ServerConfig};
use crate::types::{FindOptions, OrderBySpec, OrderDirection};

#[derive(Parser)]
#[command(name = "crmctl", about = "solarcrm administration", version)]
pub struct CliArgs {
  #[arg(short, long)]
  pub config: Option<String>,
  #[arg(long, env = "SOLARCRM_PG_URL")]
  pub pg_url: Option<String>,
  #[arg(long, env = "SOLARCRM_SQLITE_PATH")]
  pub sqlite: Option<String>,
  #[command(subcommand)]
  pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
  /// Create the database schema
  Init,
  /// Manage partners (tenants)
  Partner {
    #[command(subcommand)]
    action: PartnerAction,
  },
  /// Manage user accounts
  User {
    #[command(subcommand)]
    action: UserAction,
  },
  /// List automation rules
  Automation {
    /// Restrict to one partner
    #[arg(long)]
    partner: Option<String>,
  },
}

#[derive(Subcommand)]
pub enum PartnerAction {
  Create {
    name: String,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    document: Option<String>,
  },
  List,
}

#[derive(Subcommand)]
pub enum UserAction {
  Create {
    #[arg(long)]
    partner: String,
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
    #[arg(long, env = "SOLARCRM_USER_PASSWORD", hide_env_values = true)]
    password: String,
    #[arg(long, default_value = "user")]
    role: UserRole,
  },
  List {
    #[arg(long)]
    partner: Option<String>,
  },
}

pub async fn run(args: CliArgs) -> Result<(), anyhow::Error> {
  let backend = connect(&args).await?;

  match args.command {
    Commands::Init => {
      backend.init_schema().await?;
      println!("{}", "Schema initialized".green());
    }
    Commands::Partner { action } => partner(backend, action).await?,
    Commands::User { action } => user(backend, action).await?,
    Commands::Automation { partner } => automations(backend, partner).await?,
  }
  Ok(())
}

async fn connect(args: &CliArgs) -> Result<Arc<dyn DatabaseBackend>, anyhow::Error> {
  let mut config = match &args.config {
    Some(path) => ServerConfig::from_file(path)?,
    None => ServerConfig::find_and_load()?.unwrap_or_default(),
  };
  if let Some(url) = &args.pg_url {
    config.postgres.url = url.clone();
    config.backend = BackendType::Postgres;
  }
  if let Some(path) = &args.sqlite {
    config.sqlite.path = path.clone();
    config.backend = BackendType::Sqlite;
  }

  let backend: Arc<dyn DatabaseBackend> = match config.backend {
    BackendType::Postgres => Arc::new(PostgresBackend::new(&config.postgres.url, 2)?),
    BackendType::Sqlite => Arc::new(SqliteBackend::new(&config.sqlite.path).await?),
  };
  Ok(backend)
}

async fn partner(backend: Arc<dyn DatabaseBackend>, action: PartnerAction) -> Result<(), anyhow::Error> {
  let repo = Repository::new(backend);
  match action {
    PartnerAction::Create {
      name,
      email,
      document,
    } => {
      let mut body = json!({ "name": name });
      if let Some(email) = email {
        body["email"] = Value::String(email);
      }
      if let Some(document) = document {
        body["document"] = Value::String(document);
      }
      let partner = repo.insert(EntityKind::Partners, &PartnerScope::All, body).await?;
      println!(
        "{} {}",
        "Partner created:".green(),
        text(&partner, "_id")
      );
    }
    PartnerAction::List => {
      let partners = repo
        .query(EntityKind::Partners, &PartnerScope::All, by_name())
        .await?;
      let mut table = table(&["ID", "Name", "Email", "Active"]);
      for p in &partners {
        table.add_row(vec![
          text(p, "_id"),
          text(p, "name"),
          text(p, "email"),
          text(p, "active"),
        ]);
      }
      println!("{table}");
    }
  }
  Ok(())
}

async fn user(backend: Arc<dyn DatabaseBackend>, action: UserAction) -> Result<(), anyhow::Error> {
  match action {
    UserAction::Create {
      partner,
      name,
      email,
      password,
      role,
    } => {
      let repo = Repository::new(backend.clone());
      repo
        .get(EntityKind::Partners, &PartnerScope::All, &partner)
        .await
        .map_err(|_| anyhow::anyhow!("Partner '{}' does not exist", partner))?;

      let auth = AuthService::new(backend, chrono::Duration::days(1));
      let user = auth
        .register(Registration {
          partner_id: &partner,
          name: &name,
          email: &email,
          password: &password,
          role,
        })
        .await?;
      println!(
        "{} {} ({})",
        "User created:".green(),
        user.email,
        user.role
      );
    }
    UserAction::List { partner } => {
      let users = backend.list_users(partner.as_deref()).await?;
      let mut table = table(&["ID", "Partner", "Name", "Email", "Role"]);
      for u in &users {
        table.add_row(vec![
          u.id.to_string(),
          u.partner_id.clone(),
          u.name.clone(),
          u.email.clone(),
          u.role.to_string(),
        ]);
      }
      println!("{table}");
    }
  }
  Ok(())
}

async fn automations(backend: Arc<dyn DatabaseBackend>, partner: Option<String>) -> Result<(), anyhow::Error> {
  let repo = Repository::new(backend);
  let scope = partner.map_or(PartnerScope::All, PartnerScope::Partner);
  let rules = repo
    .query(EntityKind::Automations, &scope, FindOptions::default())
    .await?;

  let mut table = table(&["ID", "Partner", "Title", "Trigger", "Action", "Active"]);
  for record in &rules {
    let (trigger, action) = match serde_json::from_value::<AutomationRule>(record.clone()) {
      Ok(rule) => (
        format!("{} {}", rule.trigger.entity, rule.trigger.event.name()),
        rule.action.name().to_string(),
      ),
      Err(_) => ("invalid".red().to_string(), String::new()),
    };
    table.add_row(vec![
      text(record, "_id"),
      text(record, "idParceiro"),
      text(record, "title"),
      trigger,
      action,
      text(record, "active"),
    ]);
  }
  println!("{table}");
  Ok(())
}

fn by_name() -> FindOptions {
  FindOptions {
    order: Some(OrderBySpec {
      field: "name".into(),
      direction: OrderDirection::Asc,
    }),
    ..Default::default()
  }
}

fn table(header: &[&str]) -> Table {
  let mut table = Table::new();
  table
    .load_preset(UTF8_FULL)
    .set_content_arrangement(ContentArrangement::Dynamic)
    .set_header(header.to_vec());
  table
}

fn text(record: &Value, field: &str) -> String {
  match record.get(field) {
    None | Some(Value::Null) => String::new(),
    Some(Value::String(s)) => s.clone(),
    Some(v) => v.to_string(),
  }
}
