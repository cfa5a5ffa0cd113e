use chrono::{NaiveDate, Weekday};
use planboard_core::notes::{CalendarView, DayNotes, NOTES_TABLE};
use planboard_core::store::{FileStore, RecordStore};
use tempfile::tempdir;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

#[test]
fn notes_survive_reopening_the_file_store() {
    let temp = tempdir().expect("tempdir");
    let store = FileStore::open(temp.path()).expect("open store");

    let mut view = CalendarView::load(&store, date(2026, 10, 16), Weekday::Sun).expect("load");
    assert!(view.open_add());
    view.form_mut().expect("form").text = "  submit report  ".to_string();
    assert!(view.save().expect("save"));

    view.select(date(2026, 10, 20));
    assert!(view.open_add());
    view.form_mut().expect("form").text = "dentist".to_string();
    assert!(view.save().expect("save"));

    let reopened = FileStore::open(temp.path()).expect("reopen store");
    let notes = DayNotes::fetch(&reopened).expect("fetch");
    let dates: Vec<_> = notes.dates_with_notes().collect();
    assert_eq!(dates, vec![date(2026, 10, 16), date(2026, 10, 20)]);
    assert_eq!(notes.for_date(date(2026, 10, 16))[0].text, "  submit report  ");
    assert!(temp.path().join("day_notes.data").exists());
}

#[test]
fn deleting_last_note_removes_the_date() {
    let temp = tempdir().expect("tempdir");
    let store = FileStore::open(temp.path()).expect("open store");

    let mut view = CalendarView::load(&store, date(2024, 2, 29), Weekday::Mon).expect("load");
    assert!(view.open_add());
    view.form_mut().expect("form").text = "leap day".to_string();
    view.save().expect("save");
    assert_eq!(view.notes().count_on(date(2024, 2, 29)), 1);

    assert!(view.open_edit(0));
    assert!(view.delete().expect("delete"));
    assert!(view.notes().dates_with_notes().next().is_none());
    assert!(store.select(NOTES_TABLE).expect("select").is_empty());
}

#[test]
fn failed_store_write_is_swallowed_and_refetched() {
    let temp = tempdir().expect("tempdir");
    let store = FileStore::open(temp.path()).expect("open store");

    let mut view = CalendarView::load(&store, date(2026, 3, 1), Weekday::Sun).expect("load");
    assert!(view.open_add());
    view.form_mut().expect("form").text = "first".to_string();
    view.save().expect("save");

    // Another writer removes the note between fetch and edit.
    let id = view.selected_notes()[0].id.clone();
    store.delete(NOTES_TABLE, &id).expect("external delete");

    assert!(view.open_edit(0));
    view.form_mut().expect("form").text = "changed".to_string();
    assert!(view.save().expect("save should not fail"));
    assert!(view.editor().is_idle());
    assert!(view.selected_notes().is_empty());
}
