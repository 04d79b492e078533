use serde::{Deserialize, Serialize};

/// Every document collection the CRM stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
  Partners,
  Clients,
  Opportunities,
  Proposals,
  Projects,
  Revenues,
  Expenses,
  ServiceOrders,
  Activities,
  Notifications,
  Automations,
  AutomationExecutions,
}

/// A string foreign id that `expand` resolves into an embedded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
  pub field: &'static str,
  pub target: EntityKind,
  pub alias: &'static str,
}

const fn reference(field: &'static str, target: EntityKind, alias: &'static str) -> Reference {
  Reference {
    field,
    target,
    alias,
  }
}

impl EntityKind {
  /// Kinds exposed as generic CRUD resources under `/api`.
  pub const RESOURCES: [EntityKind; 11] = [
    Self::Partners,
    Self::Clients,
    Self::Opportunities,
    Self::Proposals,
    Self::Projects,
    Self::Revenues,
    Self::Expenses,
    Self::ServiceOrders,
    Self::Activities,
    Self::Notifications,
    Self::Automations,
  ];

  pub fn collection(self) -> &'static str {
    match self {
      Self::Partners => "partners",
      Self::Clients => "clients",
      Self::Opportunities => "opportunities",
      Self::Proposals => "proposals",
      Self::Projects => "projects",
      Self::Revenues => "revenues",
      Self::Expenses => "expenses",
      Self::ServiceOrders => "service_orders",
      Self::Activities => "activities",
      Self::Notifications => "notifications",
      Self::Automations => "automations",
      Self::AutomationExecutions => "automation_executions",
    }
  }

  /// URL segment under `/api`.
  pub fn route(self) -> &'static str {
    match self {
      Self::ServiceOrders => "service-orders",
      Self::AutomationExecutions => "automation-executions",
      other => other.collection(),
    }
  }

  /// Human-readable singular name used in error messages.
  pub fn label(self) -> &'static str {
    match self {
      Self::Partners => "Partner",
      Self::Clients => "Client",
      Self::Opportunities => "Opportunity",
      Self::Proposals => "Proposal",
      Self::Projects => "Project",
      Self::Revenues => "Revenue",
      Self::Expenses => "Expense",
      Self::ServiceOrders => "Service order",
      Self::Activities => "Activity",
      Self::Notifications => "Notification",
      Self::Automations => "Automation",
      Self::AutomationExecutions => "Automation execution",
    }
  }

  pub fn from_collection(name: &str) -> Option<Self> {
    Self::RESOURCES
      .into_iter()
      .chain([Self::AutomationExecutions])
      .find(|k| k.collection() == name)
  }

  /// Partners are the tenants themselves; everything else carries `idParceiro`.
  pub fn partner_scoped(self) -> bool {
    self != Self::Partners
  }

  /// Whether mutations of this kind can trigger automation rules.
  pub fn automatable(self) -> bool {
    !matches!(
      self,
      Self::Partners | Self::Notifications | Self::Automations | Self::AutomationExecutions
    )
  }

  pub fn references(self) -> &'static [Reference] {
    const OPPORTUNITY: [Reference; 3] = [
      reference("clientId", EntityKind::Clients, "client"),
      reference("projectId", EntityKind::Projects, "project"),
      reference("winningProposalId", EntityKind::Proposals, "winningProposal"),
    ];
    const PROPOSAL: [Reference; 1] = [reference(
      "opportunityId",
      EntityKind::Opportunities,
      "opportunity",
    )];
    const PROJECT: [Reference; 3] = [
      reference("clientId", EntityKind::Clients, "client"),
      reference("opportunityId", EntityKind::Opportunities, "opportunity"),
      reference("proposalId", EntityKind::Proposals, "proposal"),
    ];
    const FINANCIAL: [Reference; 1] = [reference("projectId", EntityKind::Projects, "project")];
    const SERVICE_ORDER: [Reference; 2] = [
      reference("projectId", EntityKind::Projects, "project"),
      reference("clientId", EntityKind::Clients, "client"),
    ];
    const ACTIVITY: [Reference; 2] = [
      reference("opportunityId", EntityKind::Opportunities, "opportunity"),
      reference("projectId", EntityKind::Projects, "project"),
    ];

    match self {
      Self::Opportunities => &OPPORTUNITY,
      Self::Proposals => &PROPOSAL,
      Self::Projects => &PROJECT,
      Self::Revenues | Self::Expenses => &FINANCIAL,
      Self::ServiceOrders => &SERVICE_ORDER,
      Self::Activities => &ACTIVITY,
      _ => &[],
    }
  }
}

impl std::fmt::Display for EntityKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.collection())
  }
}

impl std::str::FromStr for EntityKind {
  type Err = String;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::from_collection(s)
      .or_else(|| Self::RESOURCES.into_iter().find(|k| k.route() == s))
      .ok_or_else(|| format!("Unknown entity: {}", s))
  }
}
