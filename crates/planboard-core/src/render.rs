use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{Datelike, NaiveDate};
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::{format_reminder_input, format_slot_time};
use crate::grid::{MonthGrid, weekday_label, weekday_labels};
use crate::notes::{DayNote, DayNotes};
use crate::timetable::{SlotKey, TimetableEntry, TimetableView};

const DIM: &str = "90";
const SELECTED: &str = "7";
const TODAY: &str = "1;36";
const ACCENT: &str = "36";

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => io::stdout().is_terminal(),
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    /// Month header, weekday labels and the day grid. Overflow days are
    /// dimmed, days with notes carry a `*`.
    pub fn write_month<W: Write>(
        &self,
        mut out: W,
        grid: &MonthGrid,
        notes: &DayNotes,
        selected: NaiveDate,
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        let title = NaiveDate::from_ymd_opt(grid.year(), grid.month(), 1)
            .map(|d| d.format("%B %Y").to_string())
            .unwrap_or_default();
        let width = 7 * 5 - 1;
        writeln!(out, "{}", self.paint(&format!("{title:^width$}"), ACCENT))?;

        let labels = weekday_labels(grid.week_start())
            .iter()
            .map(|label| format!("{label:>4}"))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(out, "{}", self.paint(&labels, ACCENT))?;

        for week in grid.weeks() {
            let mut cells = Vec::with_capacity(week.len());
            for day in week {
                let marker = if notes.count_on(day.date) > 0 { "*" } else { " " };
                let text = format!("{:>3}{marker}", day.date.day());
                let styled = if day.date == selected {
                    self.paint(&text, SELECTED)
                } else if day.date == today {
                    self.paint(&text, TODAY)
                } else if !day.in_month {
                    self.paint(&text, DIM)
                } else {
                    text
                };
                cells.push(styled);
            }
            writeln!(out, "{}", cells.join(" "))?;
        }
        Ok(())
    }

    pub fn write_day_notes<W: Write>(
        &self,
        mut out: W,
        date: NaiveDate,
        notes: &[DayNote],
    ) -> anyhow::Result<()> {
        writeln!(
            out,
            "{}",
            self.paint(&format!("Notes on {}", date.format("%d %b %Y")), ACCENT)
        )?;
        if notes.is_empty() {
            writeln!(out, "  (none)")?;
            return Ok(());
        }
        for (idx, note) in notes.iter().enumerate() {
            writeln!(out, "  {} {}", self.paint(&format!("[{idx}]"), "33"), note.text)?;
        }
        Ok(())
    }

    /// Time-slot rows against weekday columns. Each cell lists its entries
    /// by title and short id.
    pub fn write_timetable<W: Write>(&self, mut out: W, view: &TimetableView<'_>) -> anyhow::Result<()> {
        let mut headers = vec!["Time".to_string()];
        headers.extend(view.days().iter().map(|day| weekday_label(*day).to_string()));

        let mut rows = Vec::new();
        for slot in view.slots().as_slice() {
            let mut row = vec![format_slot_time(*slot)];
            for day in view.days() {
                let cell = view
                    .entries_at(SlotKey::new(*day, *slot))
                    .map(|entry| self.entry_label(entry))
                    .collect::<Vec<_>>()
                    .join(", ");
                row.push(cell);
            }
            rows.push(row);
        }

        if view.is_locked() {
            writeln!(out, "{}", self.paint("(locked)", DIM))?;
        }
        write_table(&mut out, headers, rows)?;

        let unplaced: Vec<&TimetableEntry> = view.unplaced().collect();
        if !unplaced.is_empty() {
            writeln!(out)?;
            writeln!(out, "{}", self.paint("Not in grid:", DIM))?;
            for entry in unplaced {
                writeln!(out, "  {} {}", entry.key(), self.entry_label(entry))?;
            }
        }
        Ok(())
    }

    pub fn write_entry_info<W: Write>(&self, mut out: W, entry: &TimetableEntry) -> anyhow::Result<()> {
        writeln!(out, "id        {}", entry.id)?;
        writeln!(out, "cell      {}", entry.key())?;
        writeln!(out, "title     {}", entry.title)?;
        if let Some(comment) = &entry.comment {
            writeln!(out, "comment   {comment}")?;
        }
        if let Some(room) = &entry.room {
            writeln!(out, "room      {room}")?;
        }
        if let Some(teacher) = &entry.teacher {
            writeln!(out, "teacher   {teacher}")?;
        }
        if let Some(reminder) = entry.reminder {
            writeln!(out, "reminder  {}", format_reminder_input(reminder))?;
        }
        if let Some(end) = entry.end_time {
            writeln!(out, "end       {}", format_slot_time(end))?;
        }
        Ok(())
    }

    pub fn print_month(
        &self,
        grid: &MonthGrid,
        notes: &DayNotes,
        selected: NaiveDate,
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        self.write_month(io::stdout().lock(), grid, notes, selected, today)
    }

    pub fn print_day_notes(&self, date: NaiveDate, notes: &[DayNote]) -> anyhow::Result<()> {
        self.write_day_notes(io::stdout().lock(), date, notes)
    }

    pub fn print_timetable(&self, view: &TimetableView<'_>) -> anyhow::Result<()> {
        self.write_timetable(io::stdout().lock(), view)
    }

    pub fn print_entry_info(&self, entry: &TimetableEntry) -> anyhow::Result<()> {
        self.write_entry_info(io::stdout().lock(), entry)
    }

    fn entry_label(&self, entry: &TimetableEntry) -> String {
        let short_id: String = entry.id.chars().take(8).collect();
        format!("{} {}", entry.title, self.paint(&format!("#{short_id}"), DIM))
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime, Weekday};

    use super::{Renderer, strip_ansi};
    use crate::grid::month_grid;
    use crate::notes::{DayNote, DayNotes};
    use crate::store::MemoryStore;
    use crate::timetable::{SlotKey, TimetableSettings, TimetableView};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn month_lists_weeks_and_marks_notes() {
        let grid = month_grid(date(2026, 4, 15), Weekday::Sun);
        let notes = DayNotes::from_notes(vec![DayNote {
            id: "n1".to_string(),
            date: date(2026, 4, 3),
            text: "pay rent".to_string(),
            created_at: None,
        }]);

        let mut buf = Vec::new();
        Renderer::plain()
            .write_month(&mut buf, &grid, &notes, date(2026, 4, 15), date(2026, 4, 15))
            .expect("render");
        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines[0].trim(), "April 2026");
        assert_eq!(lines[1].split_whitespace().next(), Some("Sun"));
        assert_eq!(lines.len(), 2 + grid.week_count());
        assert!(lines[2].starts_with(" 29"));
        assert!(lines[2].contains("  3*"));
    }

    #[test]
    fn timetable_table_places_entries() {
        let store = MemoryStore::default();
        let mut view = TimetableView::load(&store, TimetableSettings::default()).expect("load");
        let eight = NaiveTime::from_hms_opt(8, 0, 0).expect("time");
        view.open_add(SlotKey::new(Weekday::Tue, eight));
        view.form_mut().expect("form").title = "Maths".to_string();
        view.save().expect("save");

        let mut buf = Vec::new();
        Renderer::plain().write_timetable(&mut buf, &view).expect("render");
        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<_> = text.lines().collect();

        assert!(lines[0].starts_with("Time"));
        assert!(lines[0].contains("Fri"));
        assert!(lines[2].starts_with("08:00"));
        assert!(lines[2].contains("Maths #"));
        assert!(!text.contains("Not in grid"));
    }

    #[test]
    fn strips_escape_sequences() {
        assert_eq!(strip_ansi("\x1b[90m12\x1b[0m"), "12");
    }
}
