use std::cmp::Ordering;
use std::fmt;

use anyhow::anyhow;
use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::datetime::{format_reminder_input, format_slot_time, parse_reminder, parse_slot_time, parse_weekday_name};
use crate::grid::weekday_label;
use crate::session::{Editor, Form, Persist};
use crate::store::{RecordStore, Row, decode_rows, encode_fields, log_failure, row_id};

pub const SLOTS_TABLE: &str = "timetable_slots";
pub const DEFAULT_ENTRIES_TABLE: &str = "timetable_tasks";
pub const BLOCKS_TABLE: &str = "timetable";

/// A timetable cell: weekday column and time-slot row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotKey {
    pub day: Weekday,
    pub slot: NaiveTime,
}

impl SlotKey {
    pub fn new(day: Weekday, slot: NaiveTime) -> Self {
        Self { day, slot }
    }
}

impl Ord for SlotKey {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.day.num_days_from_monday(), self.slot)
            .cmp(&(other.day.num_days_from_monday(), other.slot))
    }
}

impl PartialOrd for SlotKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", weekday_label(self.day), format_slot_time(self.slot))
    }
}

/// Wall-clock slot labels are stored as `HH:MM`; `HH:MM:SS` (a SQL `time`
/// column) is accepted on the way in.
mod slot_serde {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::datetime::{format_slot_time, parse_slot_time};

    pub fn serialize<S: Serializer>(slot: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_slot_time(*slot))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse(raw: &str) -> anyhow::Result<NaiveTime> {
        let trimmed = raw.trim();
        let short = match trimmed.matches(':').count() {
            2 => trimmed.rsplit_once(':').map(|(hm, _)| hm).unwrap_or(trimmed),
            _ => trimmed,
        };
        parse_slot_time(short)
    }

    pub mod option {
        use chrono::NaiveTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(slot: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
            match slot {
                Some(slot) => super::serialize(slot, s),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
            let raw = Option::<String>::deserialize(d)?;
            match raw.as_deref().map(str::trim) {
                None | Some("") => Ok(None),
                Some(raw) => super::parse(raw).map(Some).map_err(serde::de::Error::custom),
            }
        }
    }
}

fn id_from_string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("unsupported id: {other}"))),
    }
}

/// One timetable record. Accepts both the `title`/`time_slot` and the
/// `subject`/`start_time` column naming.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimetableEntry {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,

    pub day: Weekday,

    #[serde(alias = "start_time", with = "slot_serde")]
    pub time_slot: NaiveTime,

    #[serde(alias = "subject")]
    pub title: String,

    #[serde(default)]
    pub comment: Option<String>,

    #[serde(default)]
    pub room: Option<String>,

    #[serde(default)]
    pub teacher: Option<String>,

    #[serde(default)]
    pub reminder: Option<DateTime<Utc>>,

    #[serde(default, with = "slot_serde::option")]
    pub end_time: Option<NaiveTime>,
}

impl TimetableEntry {
    pub fn key(&self) -> SlotKey {
        SlotKey::new(self.day, self.time_slot)
    }

    pub fn to_form(&self) -> EntryForm {
        EntryForm {
            title: self.title.clone(),
            comment: self.comment.clone().unwrap_or_default(),
            room: self.room.clone().unwrap_or_default(),
            teacher: self.teacher.clone().unwrap_or_default(),
            reminder: self.reminder.map(format_reminder_input).unwrap_or_default(),
            end_time: self.end_time.map(format_slot_time).unwrap_or_default(),
        }
    }
}

/// Column values written on insert and update. Empty optional fields are
/// written as `null` so an edit can clear them.
#[derive(Debug, Serialize)]
struct EntryFields {
    day: Weekday,
    #[serde(with = "slot_serde")]
    time_slot: NaiveTime,
    title: String,
    comment: Option<String>,
    room: Option<String>,
    teacher: Option<String>,
    reminder: Option<DateTime<Utc>>,
    #[serde(with = "slot_serde::option")]
    end_time: Option<NaiveTime>,
}

/// Raw edit-form values, as typed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryForm {
    pub title: String,
    pub comment: String,
    pub room: String,
    pub teacher: String,
    /// `YYYY-MM-DDTHH:MM` on the project wall clock, or empty.
    pub reminder: String,
    /// `HH:MM`, or empty.
    pub end_time: String,
}

impl Form for EntryForm {
    fn is_blank(&self) -> bool {
        self.title.trim().is_empty()
    }
}

impl EntryForm {
    /// Sets one field by its column name (`subject` is accepted for `title`).
    pub fn set(&mut self, field: &str, value: &str) -> anyhow::Result<()> {
        let slot = match field {
            "title" | "subject" => &mut self.title,
            "comment" => &mut self.comment,
            "room" => &mut self.room,
            "teacher" => &mut self.teacher,
            "reminder" => &mut self.reminder,
            "end" | "end_time" => &mut self.end_time,
            other => return Err(anyhow!("unknown timetable field: {other}")),
        };
        *slot = value.to_string();
        Ok(())
    }

    /// Checks the typed reminder and end time without building fields.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.parsed_reminder()?;
        self.parsed_end_time()?;
        Ok(())
    }

    fn parsed_reminder(&self) -> anyhow::Result<Option<DateTime<Utc>>> {
        non_empty(&self.reminder).map(parse_reminder).transpose()
    }

    fn parsed_end_time(&self) -> anyhow::Result<Option<NaiveTime>> {
        non_empty(&self.end_time).map(parse_slot_time).transpose()
    }

    fn to_fields(&self, key: SlotKey) -> anyhow::Result<EntryFields> {
        Ok(EntryFields {
            day: key.day,
            time_slot: key.slot,
            title: self.title.trim().to_string(),
            comment: non_empty(&self.comment).map(str::to_string),
            room: non_empty(&self.room).map(str::to_string),
            teacher: non_empty(&self.teacher).map(str::to_string),
            reminder: self.parsed_reminder()?,
            end_time: self.parsed_end_time()?,
        })
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

pub type EntryEditor = Editor<SlotKey, String, EntryForm>;

/// Column naming of the entries table. Both are read; writes use the one
/// the table was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryColumns {
    /// `title` / `time_slot` (the `timetable_tasks` table).
    #[default]
    Tasks,
    /// `subject` / `start_time` (the `timetable` blocks table).
    Blocks,
}

impl EntryColumns {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "tasks" | "task" => Ok(Self::Tasks),
            "blocks" | "block" => Ok(Self::Blocks),
            other => Err(anyhow!("invalid store.timetable_schema: {other}")),
        }
    }

    /// Blocks for the table named `timetable`, tasks for anything else.
    pub fn infer(table: &str) -> Self {
        if table == BLOCKS_TABLE {
            Self::Blocks
        } else {
            Self::Tasks
        }
    }

    fn encode(self, fields: &EntryFields) -> anyhow::Result<Row> {
        let mut row = encode_fields(fields)?;
        if self == Self::Blocks {
            for (from, to) in [("title", "subject"), ("time_slot", "start_time")] {
                if let Some(value) = row.remove(from) {
                    row.insert(to.to_string(), value);
                }
            }
        }
        Ok(row)
    }
}

/// Visible columns, default rows and lock state of the timetable page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimetableSettings {
    pub table: String,
    pub columns: EntryColumns,
    pub days: Vec<Weekday>,
    pub default_slots: Vec<NaiveTime>,
    pub locked: bool,
}

impl Default for TimetableSettings {
    fn default() -> Self {
        let slot = |h| NaiveTime::from_hms_opt(h, 0, 0).unwrap_or(NaiveTime::MIN);
        Self {
            table: DEFAULT_ENTRIES_TABLE.to_string(),
            columns: EntryColumns::Tasks,
            days: vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri],
            default_slots: vec![slot(8), slot(9), slot(10)],
            locked: false,
        }
    }
}

impl TimetableSettings {
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let table = cfg
            .get("store.timetable_table")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or(defaults.table);

        let columns = match cfg.get("store.timetable_schema") {
            Some(raw) if !raw.trim().is_empty() => EntryColumns::parse(&raw)?,
            _ => EntryColumns::infer(&table),
        };

        let day_names = cfg.get_list("timetable.days");
        let days = if day_names.is_empty() {
            defaults.days
        } else {
            let mut days = Vec::with_capacity(day_names.len());
            for name in &day_names {
                let day = parse_weekday_name(name)
                    .ok_or_else(|| anyhow!("invalid weekday in timetable.days: {name}"))?;
                if !days.contains(&day) {
                    days.push(day);
                }
            }
            days
        };

        let slot_names = cfg.get_list("timetable.slots");
        let default_slots = if slot_names.is_empty() {
            defaults.default_slots
        } else {
            let mut slots = slot_names
                .iter()
                .map(|s| parse_slot_time(s))
                .collect::<anyhow::Result<Vec<_>>>()?;
            slots.sort();
            slots.dedup();
            slots
        };

        Ok(Self {
            table,
            columns,
            days,
            default_slots,
            locked: cfg.get_bool("timetable.locked").unwrap_or(false),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SlotRow {
    #[serde(deserialize_with = "id_from_string_or_number")]
    id: String,
    #[serde(with = "slot_serde")]
    time: NaiveTime,
}

#[derive(Debug, Serialize)]
struct NewSlot {
    #[serde(with = "slot_serde")]
    time: NaiveTime,
}

/// The timetable rows. When nothing is stored the configured defaults are
/// shown instead; the first edit writes them out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSlots {
    slots: Vec<NaiveTime>,
    stored: Vec<(String, NaiveTime)>,
}

impl TimeSlots {
    #[instrument(skip(store, defaults))]
    pub fn fetch(store: &dyn RecordStore, defaults: &[NaiveTime]) -> anyhow::Result<Self> {
        let rows: Vec<SlotRow> = decode_rows(SLOTS_TABLE, store.select(SLOTS_TABLE)?)?;
        let stored: Vec<(String, NaiveTime)> = rows.into_iter().map(|r| (r.id, r.time)).collect();

        let mut slots: Vec<NaiveTime> = if stored.is_empty() {
            defaults.to_vec()
        } else {
            stored.iter().map(|(_, t)| *t).collect()
        };
        slots.sort();
        slots.dedup();

        debug!(count = slots.len(), stored = stored.len(), "fetched time slots");
        Ok(Self { slots, stored })
    }

    pub fn as_slice(&self) -> &[NaiveTime] {
        &self.slots
    }

    pub fn contains(&self, slot: NaiveTime) -> bool {
        self.slots.binary_search(&slot).is_ok()
    }

    pub fn is_default(&self) -> bool {
        self.stored.is_empty()
    }
}

/// The timetable page: weekday columns × time-slot rows, the entries in
/// them and the entry editor.
pub struct TimetableView<'s> {
    store: &'s dyn RecordStore,
    settings: TimetableSettings,
    slots: TimeSlots,
    entries: Vec<TimetableEntry>,
    editor: EntryEditor,
}

impl<'s> TimetableView<'s> {
    #[instrument(skip(store))]
    pub fn load(store: &'s dyn RecordStore, settings: TimetableSettings) -> anyhow::Result<Self> {
        let slots = TimeSlots::fetch(store, &settings.default_slots)?;
        let entries = fetch_entries(store, &settings.table)?;
        let editor = EntryEditor::new(settings.locked);
        Ok(Self {
            store,
            settings,
            slots,
            entries,
            editor,
        })
    }

    pub fn days(&self) -> &[Weekday] {
        &self.settings.days
    }

    pub fn slots(&self) -> &TimeSlots {
        &self.slots
    }

    pub fn entries(&self) -> &[TimetableEntry] {
        &self.entries
    }

    pub fn editor(&self) -> &EntryEditor {
        &self.editor
    }

    pub fn is_locked(&self) -> bool {
        self.editor.is_locked()
    }

    /// Flips between the locked (read-only) and edit states.
    pub fn toggle_lock(&mut self) -> bool {
        let locked = !self.editor.is_locked();
        self.editor.set_locked(locked);
        if locked {
            self.editor.cancel();
        }
        locked
    }

    pub fn entries_at(&self, key: SlotKey) -> impl Iterator<Item = &TimetableEntry> + '_ {
        self.entries.iter().filter(move |entry| entry.key() == key)
    }

    pub fn entry(&self, id: &str) -> Option<&TimetableEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// Entries whose day or slot is not part of the visible grid.
    pub fn unplaced(&self) -> impl Iterator<Item = &TimetableEntry> + '_ {
        self.entries.iter().filter(|entry| !self.is_visible(entry.key()))
    }

    pub fn is_visible(&self, key: SlotKey) -> bool {
        self.settings.days.contains(&key.day) && self.slots.contains(key.slot)
    }

    /// Opens a blank entry in a visible cell.
    pub fn open_add(&mut self, key: SlotKey) -> bool {
        if !self.is_visible(key) {
            debug!(%key, "cell not in grid; ignoring add");
            return false;
        }
        self.editor.open_add(key, EntryForm::default())
    }

    pub fn open_edit(&mut self, id: &str) -> bool {
        let Some(entry) = self.entry(id) else {
            debug!(%id, "no timetable entry with id");
            return false;
        };
        let (key, form) = (entry.key(), entry.to_form());
        self.editor.open_edit(key, id.to_string(), form)
    }

    pub fn form_mut(&mut self) -> Option<&mut EntryForm> {
        self.editor.form_mut()
    }

    /// Returns `false` when there was nothing to save or the title is blank.
    /// A malformed reminder or end time is an error and keeps the session.
    #[instrument(skip(self))]
    pub fn save(&mut self) -> anyhow::Result<bool> {
        if let Some(session) = self.editor.session() {
            session.form.validate()?;
        }
        let Some(action) = self.editor.save() else {
            return Ok(false);
        };
        self.persist(action)?;
        Ok(true)
    }

    /// Deletes the entry open in the editor.
    #[instrument(skip(self))]
    pub fn delete(&mut self) -> anyhow::Result<bool> {
        let Some(action) = self.editor.delete() else {
            return Ok(false);
        };
        self.persist(action)?;
        Ok(true)
    }

    pub fn cancel(&mut self) {
        self.editor.cancel();
    }

    pub fn request_delete(&mut self, id: &str) -> bool {
        if self.entry(id).is_none() {
            debug!(%id, "no timetable entry with id");
            return false;
        }
        self.editor.request_delete(id.to_string())
    }

    #[instrument(skip(self))]
    pub fn confirm_delete(&mut self) -> anyhow::Result<bool> {
        let Some(action) = self.editor.confirm() else {
            return Ok(false);
        };
        self.persist(action)?;
        Ok(true)
    }

    pub fn dismiss_delete(&mut self) {
        self.editor.dismiss();
    }

    /// Adds a row. Returns `false` while locked or if the slot exists.
    #[instrument(skip(self))]
    pub fn add_slot(&mut self, slot: NaiveTime) -> anyhow::Result<bool> {
        if self.is_locked() {
            debug!("timetable locked; ignoring add slot");
            return Ok(false);
        }
        if self.slots.contains(slot) {
            return Ok(false);
        }

        let mut wanted = self.slots.as_slice().to_vec();
        wanted.push(slot);
        self.write_slots(&wanted)?;
        info!(slot = %format_slot_time(slot), "time slot added");
        Ok(true)
    }

    /// Removes a row. Entries in it stay stored but drop out of the grid.
    #[instrument(skip(self))]
    pub fn remove_slot(&mut self, slot: NaiveTime) -> anyhow::Result<bool> {
        if self.is_locked() {
            debug!("timetable locked; ignoring remove slot");
            return Ok(false);
        }
        if !self.slots.contains(slot) {
            return Ok(false);
        }

        let wanted: Vec<NaiveTime> = self
            .slots
            .as_slice()
            .iter()
            .copied()
            .filter(|s| *s != slot)
            .collect();
        self.write_slots(&wanted)?;
        info!(slot = %format_slot_time(slot), "time slot removed");
        Ok(true)
    }

    pub fn refresh(&mut self) -> anyhow::Result<()> {
        self.slots = TimeSlots::fetch(self.store, &self.settings.default_slots)?;
        self.entries = fetch_entries(self.store, &self.settings.table)?;
        Ok(())
    }

    /// Brings the stored slot rows in line with `wanted`, then refetches.
    fn write_slots(&mut self, wanted: &[NaiveTime]) -> anyhow::Result<()> {
        for (id, time) in &self.slots.stored {
            if !wanted.contains(time) {
                log_failure(self.store.delete(SLOTS_TABLE, id), "delete time slot");
            }
        }
        for time in wanted {
            if !self.slots.stored.iter().any(|(_, t)| t == time) {
                let fields = encode_fields(&NewSlot { time: *time })?;
                log_failure(self.store.insert(SLOTS_TABLE, fields), "insert time slot");
            }
        }
        self.refresh()
    }

    fn persist(&mut self, action: Persist<SlotKey, String, EntryForm>) -> anyhow::Result<()> {
        let table = self.settings.table.as_str();
        let columns = self.settings.columns;
        match action {
            Persist::Insert { target, form } => {
                let fields = columns.encode(&form.to_fields(target)?)?;
                if let Some(row) = log_failure(self.store.insert(table, fields), "insert entry") {
                    info!(key = %target, id = ?row_id(&row), "timetable entry added");
                }
            }
            Persist::Update { target, id, form } => {
                let fields = columns.encode(&form.to_fields(target)?)?;
                if log_failure(self.store.update(table, &id, fields), "update entry").is_some() {
                    info!(key = %target, %id, "timetable entry updated");
                }
            }
            Persist::Delete { id } => {
                if log_failure(self.store.delete(table, &id), "delete entry").is_some() {
                    info!(%id, "timetable entry deleted");
                }
            }
        }
        self.refresh()
    }
}

#[instrument(skip(store))]
fn fetch_entries(store: &dyn RecordStore, table: &str) -> anyhow::Result<Vec<TimetableEntry>> {
    let rows = store.select(table)?;
    let total = rows.len();
    let mut entries = Vec::with_capacity(total);
    for (idx, row) in rows.into_iter().enumerate() {
        match decode_rows::<TimetableEntry>(table, vec![row]) {
            Ok(mut one) => entries.append(&mut one),
            Err(err) => warn!(row = idx + 1, error = %err, "skipping undecodable timetable row"),
        }
    }
    debug!(count = entries.len(), total, "fetched timetable entries");
    Ok(entries)
}
