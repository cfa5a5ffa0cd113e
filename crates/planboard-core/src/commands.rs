use anyhow::{Context, anyhow};
use chrono::{Datelike, NaiveDate, Utc};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::cli::Invocation;
use crate::config::Config;
use crate::datetime::{format_slot_time, parse_day_expr, parse_month_expr, parse_slot_time, parse_weekday_name, project_today};
use crate::grid::first_day_of_month;
use crate::notes::CalendarView;
use crate::render::Renderer;
use crate::store::RecordStore;
use crate::timetable::{EntryForm, SlotKey, TimetableSettings, TimetableView};

const ENTRY_FIELDS: &[&str] = &[
    "title", "subject", "comment", "room", "teacher", "reminder", "end", "end_time",
];

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "month",
        "day",
        "add-note",
        "edit-note",
        "delete-note",
        "timetable",
        "entry",
        "add-entry",
        "edit-entry",
        "delete-entry",
        "slots",
        "add-slot",
        "remove-slot",
        "export",
        "_commands",
        "_show",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(store, cfg, renderer, inv))]
pub fn dispatch(
    store: &dyn RecordStore,
    cfg: &Config,
    renderer: &Renderer,
    inv: Invocation,
) -> anyhow::Result<()> {
    let today = project_today(Utc::now());
    let command = inv.command.as_str();
    let args = inv.command_args.as_slice();

    debug!(command, args = ?inv.command_args, %today, "dispatching command");

    match command {
        "month" => cmd_month(store, cfg, renderer, args, today),
        "day" => cmd_day(store, cfg, renderer, args, today),
        "add-note" => cmd_add_note(store, cfg, renderer, args, today),
        "edit-note" => cmd_edit_note(store, cfg, renderer, args, today),
        "delete-note" => cmd_delete_note(store, cfg, renderer, args, today),
        "timetable" => cmd_timetable(store, cfg, renderer),
        "entry" => cmd_entry(store, cfg, renderer, args),
        "add-entry" => cmd_add_entry(store, cfg, renderer, args),
        "edit-entry" => cmd_edit_entry(store, cfg, renderer, args),
        "delete-entry" => cmd_delete_entry(store, cfg, renderer, args),
        "slots" => cmd_slots(store, cfg),
        "add-slot" => cmd_add_slot(store, cfg, args),
        "remove-slot" => cmd_remove_slot(store, cfg, args),
        "export" => cmd_export(store, cfg),
        "_commands" => cmd_commands(),
        "_show" => cmd_show(cfg),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

#[instrument(skip(store, cfg, renderer, args))]
fn cmd_month(
    store: &dyn RecordStore,
    cfg: &Config,
    renderer: &Renderer,
    args: &[String],
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command month");

    let mut month_expr = None;
    let mut select_expr = None;
    for arg in args {
        if let Some(value) = arg.strip_prefix("select:") {
            select_expr = Some(value);
        } else if month_expr.is_none() {
            month_expr = Some(arg.as_str());
        } else {
            return Err(anyhow!("month: unexpected argument: {arg}"));
        }
    }

    let this_month = first_day_of_month(today.year(), today.month());
    let month = match month_expr {
        Some(expr) => parse_month_expr(expr, today)?,
        None => this_month,
    };
    let selected = match select_expr {
        Some(expr) => parse_day_expr(expr, today)?,
        None if month == this_month => today,
        None => month,
    };

    let mut view = CalendarView::load(store, selected, cfg.week_start()?)?;
    view.show_month(month);

    renderer.print_month(&view.grid(), view.notes(), view.selected(), today)?;
    println!();
    renderer.print_day_notes(view.selected(), view.selected_notes())
}

#[instrument(skip(store, cfg, renderer, args))]
fn cmd_day(
    store: &dyn RecordStore,
    cfg: &Config,
    renderer: &Renderer,
    args: &[String],
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command day");

    let date = match args {
        [] => today,
        [expr] => parse_day_expr(expr, today)?,
        _ => return Err(anyhow!("day: expected at most one date")),
    };
    let view = CalendarView::load(store, date, cfg.week_start()?)?;
    renderer.print_day_notes(view.selected(), view.selected_notes())
}

#[instrument(skip(store, cfg, renderer, args))]
fn cmd_add_note(
    store: &dyn RecordStore,
    cfg: &Config,
    renderer: &Renderer,
    args: &[String],
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command add-note");

    let (date_expr, words) = args
        .split_first()
        .ok_or_else(|| anyhow!("add-note: a date is required"))?;
    let date = parse_day_expr(date_expr, today)?;

    let mut view = CalendarView::load(store, date, cfg.week_start()?)?;
    view.open_add();
    if let Some(form) = view.form_mut() {
        form.text = words.join(" ");
    }
    if view.save()? {
        println!("Saved note on {date}.");
    } else {
        view.cancel();
        println!("Nothing saved (empty text).");
    }
    renderer.print_day_notes(view.selected(), view.selected_notes())
}

#[instrument(skip(store, cfg, renderer, args))]
fn cmd_edit_note(
    store: &dyn RecordStore,
    cfg: &Config,
    renderer: &Renderer,
    args: &[String],
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command edit-note");

    let [date_expr, index, words @ ..] = args else {
        return Err(anyhow!("edit-note: expected <date> <index> <text>"));
    };
    let date = parse_day_expr(date_expr, today)?;
    let index = parse_note_index(index)?;

    let mut view = CalendarView::load(store, date, cfg.week_start()?)?;
    if !view.open_edit(index) {
        return Err(anyhow!("no note [{index}] on {date}"));
    }
    if let Some(form) = view.form_mut() {
        form.text = words.join(" ");
    }
    if view.save()? {
        println!("Updated note [{index}] on {date}.");
    } else {
        view.cancel();
        println!("Nothing saved (empty text).");
    }
    renderer.print_day_notes(view.selected(), view.selected_notes())
}

#[instrument(skip(store, cfg, renderer, args))]
fn cmd_delete_note(
    store: &dyn RecordStore,
    cfg: &Config,
    renderer: &Renderer,
    args: &[String],
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command delete-note");

    let [date_expr, index] = args else {
        return Err(anyhow!("delete-note: expected <date> <index>"));
    };
    let date = parse_day_expr(date_expr, today)?;
    let index = parse_note_index(index)?;

    let mut view = CalendarView::load(store, date, cfg.week_start()?)?;
    if !view.open_edit(index) {
        return Err(anyhow!("no note [{index}] on {date}"));
    }
    if view.delete()? {
        println!("Deleted note [{index}] on {date}.");
    }
    renderer.print_day_notes(view.selected(), view.selected_notes())
}

fn parse_note_index(raw: &str) -> anyhow::Result<usize> {
    raw.trim()
        .parse()
        .with_context(|| format!("invalid note index: {raw}"))
}

fn load_timetable<'s>(store: &'s dyn RecordStore, cfg: &Config) -> anyhow::Result<TimetableView<'s>> {
    let settings = TimetableSettings::from_config(cfg)?;
    TimetableView::load(store, settings)
}

#[instrument(skip(store, cfg, renderer))]
fn cmd_timetable(store: &dyn RecordStore, cfg: &Config, renderer: &Renderer) -> anyhow::Result<()> {
    info!("command timetable");
    let view = load_timetable(store, cfg)?;
    renderer.print_timetable(&view)
}

#[instrument(skip(store, cfg, renderer, args))]
fn cmd_entry(
    store: &dyn RecordStore,
    cfg: &Config,
    renderer: &Renderer,
    args: &[String],
) -> anyhow::Result<()> {
    info!("command entry");

    let [token] = args else {
        return Err(anyhow!("entry: expected <id>"));
    };
    let view = load_timetable(store, cfg)?;
    let id = resolve_entry_id(&view, token)?;
    let entry = view
        .entry(&id)
        .ok_or_else(|| anyhow!("no timetable entry with id {id}"))?;
    renderer.print_entry_info(entry)
}

#[instrument(skip(store, cfg, renderer, args))]
fn cmd_add_entry(
    store: &dyn RecordStore,
    cfg: &Config,
    renderer: &Renderer,
    args: &[String],
) -> anyhow::Result<()> {
    info!("command add-entry");

    let [day, slot, rest @ ..] = args else {
        return Err(anyhow!("add-entry: expected <day> <HH:MM> [title] [field:value ...]"));
    };
    let day = parse_weekday_name(day).ok_or_else(|| anyhow!("invalid weekday: {day}"))?;
    let key = SlotKey::new(day, parse_slot_time(slot)?);
    let (words, fields) = parse_entry_args(rest);

    let mut view = load_timetable(store, cfg)?;
    if view.is_locked() {
        println!("Timetable is locked; nothing changed.");
        return Ok(());
    }
    if !view.open_add(key) {
        return Err(anyhow!("{key} is not in the timetable grid"));
    }
    if let Some(form) = view.form_mut() {
        fill_form(form, &words, &fields)?;
    }
    finish_entry_save(&mut view, renderer, "Added")
}

#[instrument(skip(store, cfg, renderer, args))]
fn cmd_edit_entry(
    store: &dyn RecordStore,
    cfg: &Config,
    renderer: &Renderer,
    args: &[String],
) -> anyhow::Result<()> {
    info!("command edit-entry");

    let [token, rest @ ..] = args else {
        return Err(anyhow!("edit-entry: expected <id> [title] [field:value ...]"));
    };
    let (words, fields) = parse_entry_args(rest);

    let mut view = load_timetable(store, cfg)?;
    if view.is_locked() {
        println!("Timetable is locked; nothing changed.");
        return Ok(());
    }
    let id = resolve_entry_id(&view, token)?;
    if !view.open_edit(&id) {
        return Err(anyhow!("no timetable entry with id {id}"));
    }
    if let Some(form) = view.form_mut() {
        fill_form(form, &words, &fields)?;
    }
    finish_entry_save(&mut view, renderer, "Updated")
}

#[instrument(skip(store, cfg, renderer, args))]
fn cmd_delete_entry(
    store: &dyn RecordStore,
    cfg: &Config,
    renderer: &Renderer,
    args: &[String],
) -> anyhow::Result<()> {
    info!("command delete-entry");

    let [token] = args else {
        return Err(anyhow!("delete-entry: expected <id>"));
    };
    let mut view = load_timetable(store, cfg)?;
    if view.is_locked() {
        println!("Timetable is locked; nothing changed.");
        return Ok(());
    }
    let id = resolve_entry_id(&view, token)?;
    if !view.request_delete(&id) {
        return Err(anyhow!("no timetable entry with id {id}"));
    }
    if view.confirm_delete()? {
        println!("Deleted timetable entry {id}.");
    }
    renderer.print_timetable(&view)
}

fn finish_entry_save(view: &mut TimetableView<'_>, renderer: &Renderer, verb: &str) -> anyhow::Result<()> {
    let key = view.editor().session().map(|session| session.target);
    if view.save()? {
        if let Some(key) = key {
            println!("{verb} timetable entry at {key}.");
        }
    } else {
        view.cancel();
        println!("Nothing saved (empty title).");
    }
    renderer.print_timetable(view)
}

/// Full id or a unique id prefix (the timetable shows 8 characters).
fn resolve_entry_id(view: &TimetableView<'_>, token: &str) -> anyhow::Result<String> {
    if view.entry(token).is_some() {
        return Ok(token.to_string());
    }
    let mut matches = view
        .entries()
        .iter()
        .filter(|entry| entry.id.starts_with(token));
    match (matches.next(), matches.next()) {
        (Some(entry), None) => Ok(entry.id.clone()),
        (Some(_), Some(_)) => Err(anyhow!("ambiguous entry id prefix: {token}")),
        (None, _) => Err(anyhow!("no timetable entry with id {token}")),
    }
}

/// Splits trailing tokens into title words and `field:value` modifiers.
/// Tokens after `--` are always title words.
fn parse_entry_args(args: &[String]) -> (Vec<String>, Vec<(String, String)>) {
    let mut words = Vec::new();
    let mut fields = Vec::new();

    let mut literal = false;
    for arg in args {
        if arg == "--" {
            literal = true;
            continue;
        }

        if !literal
            && let Some((key, value)) = arg.split_once(':')
            && ENTRY_FIELDS.contains(&key.to_ascii_lowercase().as_str())
        {
            fields.push((key.to_ascii_lowercase(), value.to_string()));
            continue;
        }

        words.push(arg.clone());
    }

    (words, fields)
}

fn fill_form(form: &mut EntryForm, words: &[String], fields: &[(String, String)]) -> anyhow::Result<()> {
    if !words.is_empty() {
        form.title = words.join(" ");
    }
    for (field, value) in fields {
        form.set(field, value)?;
    }
    Ok(())
}

#[instrument(skip(store, cfg))]
fn cmd_slots(store: &dyn RecordStore, cfg: &Config) -> anyhow::Result<()> {
    let view = load_timetable(store, cfg)?;
    for slot in view.slots().as_slice() {
        println!("{}", format_slot_time(*slot));
    }
    if view.slots().is_default() {
        debug!("showing configured default slots");
    }
    Ok(())
}

#[instrument(skip(store, cfg, args))]
fn cmd_add_slot(store: &dyn RecordStore, cfg: &Config, args: &[String]) -> anyhow::Result<()> {
    info!("command add-slot");

    let [raw] = args else {
        return Err(anyhow!("add-slot: expected <HH:MM>"));
    };
    let slot = parse_slot_time(raw)?;
    let mut view = load_timetable(store, cfg)?;
    if view.is_locked() {
        println!("Timetable is locked; nothing changed.");
    } else if view.add_slot(slot)? {
        println!("Added time slot {}.", format_slot_time(slot));
    } else {
        println!("Time slot {} already exists.", format_slot_time(slot));
    }
    Ok(())
}

#[instrument(skip(store, cfg, args))]
fn cmd_remove_slot(store: &dyn RecordStore, cfg: &Config, args: &[String]) -> anyhow::Result<()> {
    info!("command remove-slot");

    let [raw] = args else {
        return Err(anyhow!("remove-slot: expected <HH:MM>"));
    };
    let slot = parse_slot_time(raw)?;
    let mut view = load_timetable(store, cfg)?;
    if view.is_locked() {
        println!("Timetable is locked; nothing changed.");
        return Ok(());
    }
    if !view.remove_slot(slot)? {
        println!("No time slot {}.", format_slot_time(slot));
        return Ok(());
    }

    println!("Removed time slot {}.", format_slot_time(slot));
    let orphaned = view
        .entries()
        .iter()
        .filter(|entry| entry.time_slot == slot)
        .count();
    if orphaned > 0 {
        warn!(orphaned, "entries left outside the timetable grid");
    }
    Ok(())
}

#[instrument(skip(store, cfg))]
fn cmd_export(store: &dyn RecordStore, cfg: &Config) -> anyhow::Result<()> {
    info!("command export");

    let today = project_today(Utc::now());
    let calendar = CalendarView::load(store, today, cfg.week_start()?)?;
    let notes: Vec<_> = calendar
        .notes()
        .dates_with_notes()
        .flat_map(|date| calendar.notes().for_date(date).iter())
        .collect();

    let timetable = load_timetable(store, cfg)?;
    let slots: Vec<String> = timetable
        .slots()
        .as_slice()
        .iter()
        .map(|slot| format_slot_time(*slot))
        .collect();

    let out = serde_json::to_string(&json!({
        "notes": notes,
        "slots": slots,
        "timetable": timetable.entries(),
    }))?;
    println!("{out}");
    Ok(())
}

fn cmd_commands() -> anyhow::Result<()> {
    for command in known_command_names() {
        println!("{command}");
    }
    Ok(())
}

fn cmd_show(cfg: &Config) -> anyhow::Result<()> {
    let mut pairs: Vec<_> = cfg.iter().collect();
    pairs.sort();
    for (k, v) in pairs {
        println!("{k}={v}");
    }
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "Commands: month [month] [select:<day>], day [day], add-note <day> <text>, edit-note <day> <index> <text>, delete-note <day> <index>, timetable, entry <id>, add-entry <weekday> <HH:MM> [title] [field:value], edit-entry <id> [title] [field:value], delete-entry <id>, slots, add-slot <HH:MM>, remove-slot <HH:MM>, export"
    );
    println!("Entry fields: title, comment, room, teacher, reminder (YYYY-MM-DDTHH:MM), end (HH:MM)");
    Ok(())
}
