use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::grid::{MonthGrid, add_months, first_day_of_month, month_grid};
use crate::session::{Editor, Form, Persist};
use crate::store::{RecordStore, decode_rows, encode_fields, log_failure};

pub const NOTES_TABLE: &str = "day_notes";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DayNote {
    pub id: String,
    pub date: NaiveDate,
    pub text: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct NewNote<'a> {
    date: NaiveDate,
    text: &'a str,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct NoteChange<'a> {
    text: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteForm {
    pub text: String,
}

impl Form for NoteForm {
    fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

pub type NoteEditor = Editor<NaiveDate, String, NoteForm>;

/// Notes grouped by day. Dates without notes have no entry at all.
#[derive(Debug, Clone, Default)]
pub struct DayNotes {
    by_date: BTreeMap<NaiveDate, Vec<DayNote>>,
}

impl DayNotes {
    pub fn from_notes(notes: Vec<DayNote>) -> Self {
        let mut by_date: BTreeMap<NaiveDate, Vec<DayNote>> = BTreeMap::new();
        for note in notes {
            by_date.entry(note.date).or_default().push(note);
        }
        for day in by_date.values_mut() {
            day.sort_by_key(|note| note.created_at);
        }
        Self { by_date }
    }

    #[instrument(skip(store))]
    pub fn fetch(store: &dyn RecordStore) -> anyhow::Result<Self> {
        let rows = store.select(NOTES_TABLE)?;
        let notes: Vec<DayNote> = decode_rows(NOTES_TABLE, rows)?;
        debug!(count = notes.len(), "fetched day notes");
        Ok(Self::from_notes(notes))
    }

    pub fn for_date(&self, date: NaiveDate) -> &[DayNote] {
        self.by_date.get(&date).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn note(&self, date: NaiveDate, index: usize) -> Option<&DayNote> {
        self.for_date(date).get(index)
    }

    pub fn dates_with_notes(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.by_date.keys().copied()
    }

    pub fn count_on(&self, date: NaiveDate) -> usize {
        self.for_date(date).len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_date.is_empty()
    }
}

/// The month page: a displayed month, a selected day, that day's notes
/// and the note editor.
pub struct CalendarView<'s> {
    store: &'s dyn RecordStore,
    month: NaiveDate,
    selected: NaiveDate,
    week_start: Weekday,
    notes: DayNotes,
    editor: NoteEditor,
}

impl<'s> CalendarView<'s> {
    #[instrument(skip(store))]
    pub fn load(
        store: &'s dyn RecordStore,
        selected: NaiveDate,
        week_start: Weekday,
    ) -> anyhow::Result<Self> {
        let notes = DayNotes::fetch(store)?;
        Ok(Self {
            store,
            month: first_day_of_month_of(selected),
            selected,
            week_start,
            notes,
            editor: NoteEditor::default(),
        })
    }

    pub fn grid(&self) -> MonthGrid {
        month_grid(self.month, self.week_start)
    }

    pub fn month(&self) -> NaiveDate {
        self.month
    }

    pub fn selected(&self) -> NaiveDate {
        self.selected
    }

    pub fn notes(&self) -> &DayNotes {
        &self.notes
    }

    pub fn selected_notes(&self) -> &[DayNote] {
        self.notes.for_date(self.selected)
    }

    pub fn editor(&self) -> &NoteEditor {
        &self.editor
    }

    /// Shows a different month without moving the selection.
    pub fn show_month(&mut self, any_day: NaiveDate) {
        self.month = first_day_of_month_of(any_day);
    }

    pub fn next_month(&mut self) {
        self.month = add_months(self.month, 1);
    }

    pub fn prev_month(&mut self) {
        self.month = add_months(self.month, -1);
    }

    /// Selecting an overflow day is as valid as any other.
    pub fn select(&mut self, date: NaiveDate) {
        self.selected = date;
    }

    pub fn open_add(&mut self) -> bool {
        self.editor.open_add(self.selected, NoteForm::default())
    }

    /// Opens the note at `index` of the selected day; `false` if absent.
    pub fn open_edit(&mut self, index: usize) -> bool {
        let Some(note) = self.notes.note(self.selected, index) else {
            debug!(date = %self.selected, index, "no note at index");
            return false;
        };
        let form = NoteForm {
            text: note.text.clone(),
        };
        let id = note.id.clone();
        self.editor.open_edit(self.selected, id, form)
    }

    pub fn form_mut(&mut self) -> Option<&mut NoteForm> {
        self.editor.form_mut()
    }

    /// Returns `false` when the save was rejected because the text is blank.
    #[instrument(skip(self))]
    pub fn save(&mut self) -> anyhow::Result<bool> {
        let Some(action) = self.editor.save() else {
            return Ok(false);
        };
        self.persist(action)?;
        Ok(true)
    }

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

    pub fn refresh(&mut self) -> anyhow::Result<()> {
        self.notes = DayNotes::fetch(self.store)?;
        Ok(())
    }

    fn persist(&mut self, action: Persist<NaiveDate, String, NoteForm>) -> anyhow::Result<()> {
        match action {
            Persist::Insert { target, form } => {
                let fields = encode_fields(&NewNote {
                    date: target,
                    text: &form.text,
                    created_at: Utc::now(),
                })?;
                if log_failure(self.store.insert(NOTES_TABLE, fields), "insert note").is_some() {
                    info!(date = %target, "note added");
                }
            }
            Persist::Update { target, id, form } => {
                let fields = encode_fields(&NoteChange {
                    text: &form.text,
                })?;
                if log_failure(self.store.update(NOTES_TABLE, &id, fields), "update note")
                    .is_some()
                {
                    info!(date = %target, %id, "note updated");
                }
            }
            Persist::Delete { id } => {
                if log_failure(self.store.delete(NOTES_TABLE, &id), "delete note").is_some() {
                    info!(%id, "note deleted");
                }
            }
        }
        self.refresh()
    }
}

fn first_day_of_month_of(date: NaiveDate) -> NaiveDate {
    first_day_of_month(date.year(), date.month())
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Weekday};

    use super::{CalendarView, DayNotes};
    use crate::store::{MemoryStore, RecordStore};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn add_note(view: &mut CalendarView<'_>, text: &str) -> bool {
        assert!(view.open_add());
        view.form_mut().expect("form").text = text.to_string();
        view.save().expect("save")
    }

    #[test]
    fn add_edit_delete_notes_on_selected_day() {
        let store = MemoryStore::default();
        let mut view =
            CalendarView::load(&store, date(2026, 10, 16), Weekday::Sun).expect("load");

        assert!(add_note(&mut view, "dentist"));
        assert!(add_note(&mut view, "call mum"));
        let texts: Vec<_> = view.selected_notes().iter().map(|n| n.text.as_str()).collect();
        assert_eq!(texts, vec!["dentist", "call mum"]);

        assert!(view.open_edit(0));
        view.form_mut().expect("form").text = "dentist at 9".to_string();
        assert!(view.save().expect("save"));
        assert_eq!(view.selected_notes()[0].text, "dentist at 9");

        assert!(view.open_edit(1));
        assert!(view.delete().expect("delete"));
        assert!(view.open_edit(0));
        assert!(view.delete().expect("delete"));

        assert!(view.notes().is_empty());
        assert_eq!(view.notes().dates_with_notes().count(), 0);
    }

    #[test]
    fn blank_text_is_rejected_silently() {
        let store = MemoryStore::default();
        let mut view =
            CalendarView::load(&store, date(2026, 10, 16), Weekday::Sun).expect("load");

        assert!(!add_note(&mut view, "   "));
        assert!(view.editor().session().is_some());
        view.cancel();
        assert!(store.select(super::NOTES_TABLE).expect("select").is_empty());
    }

    #[test]
    fn text_is_stored_as_typed() {
        let store = MemoryStore::default();
        let mut view =
            CalendarView::load(&store, date(2026, 10, 16), Weekday::Sun).expect("load");

        assert!(add_note(&mut view, "  indented reminder "));
        assert_eq!(view.selected_notes()[0].text, "  indented reminder ");

        assert!(view.open_edit(0));
        view.form_mut().expect("form").text = "trailing space ".to_string();
        assert!(view.save().expect("save"));
        assert_eq!(view.selected_notes()[0].text, "trailing space ");
    }

    #[test]
    fn overflow_day_selection_keeps_displayed_month() {
        let store = MemoryStore::default();
        let mut view =
            CalendarView::load(&store, date(2026, 4, 15), Weekday::Sun).expect("load");
        let grid = view.grid();
        let overflow = grid
            .days()
            .find(|day| !day.in_month)
            .expect("april 2026 has overflow days");

        view.select(overflow.date);
        assert!(add_note(&mut view, "spill over"));
        assert_eq!(view.month(), date(2026, 4, 1));
        assert_eq!(view.notes().count_on(date(2026, 3, 29)), 1);

        view.next_month();
        assert_eq!(view.month(), date(2026, 5, 1));
        view.prev_month();
        view.prev_month();
        assert_eq!(view.month(), date(2026, 3, 1));
    }

    #[test]
    fn editing_missing_index_opens_nothing() {
        let store = MemoryStore::default();
        let mut view =
            CalendarView::load(&store, date(2026, 1, 1), Weekday::Mon).expect("load");
        assert!(!view.open_edit(0));
        assert!(view.editor().is_idle());
        assert!(!view.delete().expect("delete"));
    }

    #[test]
    fn groups_by_date() {
        let notes = DayNotes::from_notes(vec![]);
        assert!(notes.is_empty());
        assert!(notes.for_date(date(2026, 1, 1)).is_empty());
    }
}
