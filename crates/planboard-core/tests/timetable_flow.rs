use chrono::{NaiveTime, Weekday};
use planboard_core::config::Config;
use planboard_core::store::{FileStore, RecordStore};
use planboard_core::timetable::{SlotKey, TimetableSettings, TimetableView};
use serde_json::json;
use tempfile::tempdir;

fn at(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).expect("valid time")
}

#[test]
fn entries_and_slots_roundtrip_through_file_store() {
    let temp = tempdir().expect("tempdir");
    let store = FileStore::open(temp.path()).expect("open store");

    let mut view = TimetableView::load(&store, TimetableSettings::default()).expect("load");
    assert!(view.add_slot(at(11, 15)).expect("add slot"));

    let key = SlotKey::new(Weekday::Thu, at(11, 15));
    assert!(view.open_add(key));
    let form = view.form_mut().expect("form");
    form.title = "Physics".to_string();
    form.teacher = "Mr. Kay".to_string();
    form.reminder = "2026-10-22T10:45".to_string();
    form.end_time = "12:00".to_string();
    assert!(view.save().expect("save"));

    let reopened = FileStore::open(temp.path()).expect("reopen");
    let view = TimetableView::load(&reopened, TimetableSettings::default()).expect("reload");
    assert_eq!(view.slots().as_slice(), &[at(8, 0), at(9, 0), at(10, 0), at(11, 15)]);

    let entry = view.entries_at(key).next().expect("entry in cell");
    assert_eq!(entry.title, "Physics");
    assert_eq!(entry.teacher.as_deref(), Some("Mr. Kay"));
    assert_eq!(entry.end_time, Some(at(12, 0)));
    assert!(entry.reminder.is_some());
    assert_eq!(view.unplaced().count(), 0);
}

#[test]
fn block_shaped_table_reads_and_writes_block_columns() {
    let temp = tempdir().expect("tempdir");
    let store = FileStore::open(temp.path()).expect("open store");

    let mut row = serde_json::Map::new();
    for (k, v) in [
        ("day", json!("Tuesday")),
        ("start_time", json!("09:00:00")),
        ("subject", json!("Geography")),
        ("room", json!("A1")),
    ] {
        row.insert(k.to_string(), v);
    }
    store.insert("timetable", row).expect("insert");

    let mut cfg = Config::default();
    cfg.apply_overrides(vec![("rc.store.timetable_table".to_string(), "timetable".to_string())]);
    let settings = TimetableSettings::from_config(&cfg).expect("settings");
    let mut view = TimetableView::load(&store, settings).expect("load");

    let titles: Vec<_> = view
        .entries_at(SlotKey::new(Weekday::Tue, at(9, 0)))
        .map(|e| e.title.as_str())
        .collect();
    assert_eq!(titles, vec!["Geography"]);

    assert!(view.open_add(SlotKey::new(Weekday::Wed, at(10, 0))));
    let form = view.form_mut().expect("form");
    form.title = "Music".to_string();
    form.teacher = "Mr. Dunn".to_string();
    assert!(view.save().expect("save"));

    let reopened = FileStore::open(temp.path()).expect("reopen");
    let rows = reopened.select("timetable").expect("select");
    let music = rows
        .iter()
        .find(|row| row.get("subject") == Some(&json!("Music")))
        .expect("stored with subject column");
    assert_eq!(music["start_time"], "10:00");
    assert!(!music.contains_key("title"));
    assert_eq!(view.entries().len(), 2);
}

#[test]
fn removing_every_stored_slot_restores_defaults() {
    let temp = tempdir().expect("tempdir");
    let store = FileStore::open(temp.path()).expect("open store");
    let mut view = TimetableView::load(&store, TimetableSettings::default()).expect("load");

    view.remove_slot(at(8, 0)).expect("remove");
    view.remove_slot(at(9, 0)).expect("remove");
    assert_eq!(view.slots().as_slice(), &[at(10, 0)]);
    assert!(view.remove_slot(at(10, 0)).expect("remove last"));
    assert!(view.slots().is_default());
    assert_eq!(view.slots().as_slice(), &[at(8, 0), at(9, 0), at(10, 0)]);
}
