//! `tm client` commands.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use super::{Context, Output, format_duration, to_json_string, view_line};
use crate::engine::{self, DeadlineRules, StageView, pause};
use crate::models::{Client, InitialKind, Milestone, MilestoneKind};
use crate::storage::{CLIENT_PREFIX, MILESTONE_PREFIX, Storage, validate_client_id};
use crate::{Error, Result};

/// A milestone id and its kind.
#[derive(Debug, Clone, Serialize)]
pub struct MilestoneRef {
    pub id: String,
    pub kind: String,
    pub due_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct ClientCreated {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub signed_on: NaiveDate,
    pub milestones: Vec<MilestoneRef>,
}

impl Output for ClientCreated {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "Created client {}{} signed on {} with {} milestones",
            self.id,
            self.name
                .as_ref()
                .map(|n| format!(" ({})", n))
                .unwrap_or_default(),
            self.signed_on,
            self.milestones.len()
        )];
        for m in &self.milestones {
            lines.push(format!(
                "  {} {:<9} due {}",
                m.id,
                m.kind,
                m.due_at.format("%Y-%m-%d %H:%M UTC")
            ));
        }
        lines.join("\n")
    }
}

/// New milestones for `client`, with ids not clashing with storage or each other.
fn new_milestones(
    storage: &Storage,
    client: &Client,
    kinds: &[MilestoneKind],
    now: DateTime<Utc>,
    reserved: &mut HashSet<String>,
) -> Result<Vec<Milestone>> {
    let mut milestones = Vec::with_capacity(kinds.len());
    for kind in kinds {
        let id = storage.unique_id(MILESTONE_PREFIX, &format!("{}:{}", client.id, kind), reserved)?;
        reserved.insert(id.clone());
        milestones.push(Milestone::new(id, client.id.clone(), *kind, now));
    }
    Ok(milestones)
}

fn refs(client: &Client, milestones: &[Milestone], rules: &DeadlineRules) -> Vec<MilestoneRef> {
    milestones
        .iter()
        .map(|m| MilestoneRef {
            id: m.id.clone(),
            kind: m.kind.to_string(),
            due_at: engine::due_at(client, m, rules),
        })
        .collect()
}

/// The recurring series may not start before the client signed on.
fn check_intake(signed_on: NaiveDate, intake: Option<NaiveDate>) -> Result<()> {
    match intake {
        Some(d) if d < signed_on => Err(Error::InvalidInput(format!(
            "Intake date {} is before sign-on date {}",
            d, signed_on
        ))),
        _ => Ok(()),
    }
}

/// Onboard a client with its full milestone set.
pub fn client_create(
    ctx: &Context,
    signed_on: NaiveDate,
    name: Option<String>,
    initial_intake_date: Option<NaiveDate>,
) -> Result<ClientCreated> {
    check_intake(signed_on, initial_intake_date)?;
    let (mut storage, config) = ctx.open()?;
    let rules = config.rules();

    let mut reserved = HashSet::new();
    let id = storage.unique_id(
        CLIENT_PREFIX,
        &format!("{}:{}", signed_on, name.as_deref().unwrap_or_default()),
        &reserved,
    )?;
    reserved.insert(id.clone());

    let mut client = Client::new(id, signed_on, ctx.now);
    client.name = name;
    client.initial_intake_date = initial_intake_date;

    let milestones = new_milestones(
        &storage,
        &client,
        &rules.onboarding_kinds(),
        ctx.now,
        &mut reserved,
    )?;
    storage.create_client(&client, &milestones)?;

    Ok(ClientCreated {
        milestones: refs(&client, &milestones, &rules),
        id: client.id,
        name: client.name,
        signed_on: client.signed_on,
    })
}

#[derive(Serialize)]
pub struct ClientDetail {
    pub client: Client,
    pub now_effective: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_stage: Option<InitialKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_recurring: Option<u32>,
    pub milestones: Vec<StageView>,
}

impl Output for ClientDetail {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        let c = &self.client;
        let mut lines = vec![format!(
            "{}{}  signed on {}{}",
            c.id,
            c.name.as_ref().map(|n| format!(" ({})", n)).unwrap_or_default(),
            c.signed_on,
            c.initial_intake_date
                .map(|d| format!(", intake {}", d))
                .unwrap_or_default()
        )];
        if c.paused {
            lines.push(format!(
                "  PAUSED since {} (total paused {})",
                c.pause_started_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "?".to_string()),
                format_duration(c.paused_total_secs)
            ));
        } else if c.paused_total_secs > 0 {
            lines.push(format!(
                "  total paused {}",
                format_duration(c.paused_total_secs)
            ));
        }
        lines.push(format!(
            "  active stage: {}  active month: {}",
            self.active_stage
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string()),
            self.active_recurring
                .map(|n| n.to_string())
                .unwrap_or_else(|| "none".to_string())
        ));
        for view in &self.milestones {
            lines.push(format!("  {}", view_line(view)));
        }
        lines.join("\n")
    }
}

fn detail(client: Client, milestones: &[Milestone], rules: &DeadlineRules, now: DateTime<Utc>) -> ClientDetail {
    ClientDetail {
        now_effective: pause::effective_now(&client, now),
        active_stage: engine::resolve_active_stage(&client, milestones, rules, now),
        active_recurring: engine::resolve_active_recurring(&client, milestones, rules, now),
        milestones: engine::stage_views(&client, milestones, rules, now),
        client,
    }
}

/// Show a client with every milestone's derived state.
pub fn client_show(ctx: &Context, id: &str) -> Result<ClientDetail> {
    validate_client_id(id)?;
    let (storage, config) = ctx.open()?;
    let client = storage.get_client(id)?;
    let milestones = storage.list_milestones(Some(id))?;
    Ok(detail(client, &milestones, &config.rules(), ctx.now))
}

#[derive(Serialize)]
pub struct ClientSummary {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub signed_on: NaiveDate,
    pub paused: bool,
    pub paused_total_secs: i64,
}

#[derive(Serialize)]
pub struct ClientList {
    pub clients: Vec<ClientSummary>,
    pub count: usize,
}

impl Output for ClientList {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        if self.clients.is_empty() {
            return "No clients found.".to_string();
        }
        let mut lines = vec![format!("{} client(s):", self.count)];
        for c in &self.clients {
            lines.push(format!(
                "  {} signed {}{}{}",
                c.id,
                c.signed_on,
                c.name.as_ref().map(|n| format!("  {}", n)).unwrap_or_default(),
                if c.paused { "  [paused]" } else { "" }
            ));
        }
        lines.join("\n")
    }
}

pub fn client_list(ctx: &Context, paused: Option<bool>) -> Result<ClientList> {
    let storage = Storage::open(&ctx.data_dir)?;
    let clients: Vec<ClientSummary> = storage
        .list_clients(paused)?
        .into_iter()
        .map(|c| ClientSummary {
            id: c.id,
            name: c.name,
            signed_on: c.signed_on,
            paused: c.paused,
            paused_total_secs: c.paused_total_secs,
        })
        .collect();
    Ok(ClientList {
        count: clients.len(),
        clients,
    })
}

#[derive(Serialize)]
pub struct PauseResult {
    pub client_id: String,
    pub paused: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause_started_at: Option<DateTime<Utc>>,
    pub paused_total_secs: i64,
    /// Seconds added by this resume
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_secs: Option<i64>,
}

impl Output for PauseResult {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        match self.elapsed_secs {
            Some(elapsed) => format!(
                "Resumed {} after {} (total paused {})",
                self.client_id,
                format_duration(elapsed),
                format_duration(self.paused_total_secs)
            ),
            None => format!("Paused {}", self.client_id),
        }
    }
}

/// Freeze a client's timers.
pub fn client_pause(ctx: &Context, id: &str) -> Result<PauseResult> {
    validate_client_id(id)?;
    let mut storage = Storage::open(&ctx.data_dir)?;
    let mut client = storage.get_client(id)?;
    pause::pause(&mut client, ctx.now)?;
    storage.update_client(&client)?;

    Ok(PauseResult {
        client_id: client.id,
        paused: true,
        pause_started_at: client.pause_started_at,
        paused_total_secs: client.paused_total_secs,
        elapsed_secs: None,
    })
}

/// Resume a client's timers.
pub fn client_resume(ctx: &Context, id: &str) -> Result<PauseResult> {
    validate_client_id(id)?;
    let mut storage = Storage::open(&ctx.data_dir)?;
    let mut client = storage.get_client(id)?;
    let elapsed = pause::resume(&mut client, ctx.now)?;
    storage.update_client(&client)?;

    Ok(PauseResult {
        client_id: client.id,
        paused: false,
        pause_started_at: None,
        paused_total_secs: client.paused_total_secs,
        elapsed_secs: Some(elapsed),
    })
}

#[derive(Serialize)]
pub struct BackfillResult {
    pub client_id: String,
    pub added: Vec<MilestoneRef>,
}

impl Output for BackfillResult {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        if self.added.is_empty() {
            return format!("{} already has every recurring milestone", self.client_id);
        }
        let kinds: Vec<&str> = self.added.iter().map(|m| m.kind.as_str()).collect();
        format!(
            "Added {} recurring milestone(s) to {}: {}",
            self.added.len(),
            self.client_id,
            kinds.join(", ")
        )
    }
}

/// Add any recurring milestones missing within the configured bounds.
pub fn client_backfill(ctx: &Context, id: &str) -> Result<BackfillResult> {
    validate_client_id(id)?;
    let (mut storage, config) = ctx.open()?;
    let rules = config.rules();
    let client = storage.get_client(id)?;

    let existing: HashSet<MilestoneKind> = storage
        .list_milestones(Some(id))?
        .into_iter()
        .map(|m| m.kind)
        .collect();
    let missing: Vec<MilestoneKind> = rules
        .recurring
        .iter()
        .map(|sequence_number| MilestoneKind::Recurring { sequence_number })
        .filter(|k| !existing.contains(k))
        .collect();

    let milestones = new_milestones(&storage, &client, &missing, ctx.now, &mut HashSet::new())?;
    storage.add_milestones(&milestones)?;

    Ok(BackfillResult {
        added: refs(&client, &milestones, &rules),
        client_id: client.id,
    })
}

#[derive(Serialize)]
pub struct IntakeResult {
    pub client_id: String,
    pub initial_intake_date: Option<NaiveDate>,
}

impl Output for IntakeResult {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        match self.initial_intake_date {
            Some(d) => format!("Set intake date of {} to {}", self.client_id, d),
            None => format!("Cleared intake date of {}", self.client_id),
        }
    }
}

/// Set or clear the base date of a client's recurring series.
pub fn client_set_intake(ctx: &Context, id: &str, date: Option<NaiveDate>) -> Result<IntakeResult> {
    validate_client_id(id)?;
    let mut storage = Storage::open(&ctx.data_dir)?;
    let mut client = storage.get_client(id)?;
    check_intake(client.signed_on, date)?;
    client.initial_intake_date = date;
    client.updated_at = ctx.now;
    storage.update_client(&client)?;

    Ok(IntakeResult {
        client_id: client.id,
        initial_intake_date: client.initial_intake_date,
    })
}
